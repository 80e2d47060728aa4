//! Compliance Graph - continuously reconciled compliance engine
//!
//! Nodes (monitored entities) and Rules (requirements) are matched by class
//! into Joins; Bindings (implementations of a Rule) are expanded over their
//! target Nodes into Executions; Attestations turn every Execution into
//! NodeAttestations that run a provider check. Results roll back up:
//! NodeAttestation -> Execution -> Join -> Node -> parent Node.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use compliance_graph::{Engine, EngineConfig, MemoryStore, ProviderRegistry};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let providers = Arc::new(ProviderRegistry::with_builtin()?);
//! let engine = Engine::new(store, providers, EngineConfig::default());
//! let report = engine.converge().await?;
//! assert!(report.converged);
//! # Ok(())
//! # }
//! ```

// Core error handling
pub mod error;

// Engine configuration
pub mod config;

// Object store abstraction and the in-memory implementation
pub mod store;

// Pure derivation, rollup and hashing logic
pub mod derive;
pub mod hash;
pub mod status;

// Derived-object lifecycle shared by the structural reconcilers
pub mod lifecycle;

// Attestation provider plugins
pub mod provider;

// Per-kind reconcilers
pub mod controller;

// Continuous scheduling and batch convergence
pub mod engine;
pub mod scheduler;

// Declarations, persistence and reports
pub mod catalog;

pub use catalog::Configuration;
pub use config::{ConfigError, ControllerConfig, EngineConfig};
pub use controller::{Context, Reconciled, Reconciler};
pub use engine::{ConvergeReport, Engine, PassReport};
pub use error::ReconcileError;
pub use provider::{AttestationClient, Attested, ProviderError, ProviderFactory, ProviderRegistry};
pub use scheduler::{Controller, WorkQueue};
pub use store::{MemoryStore, ObjectStore, StoreError};

pub use graph_types;
