//! Reconcile error taxonomy
//!
//! Every controller returns [`ReconcileError`]. The scheduler uses
//! [`ReconcileError::is_retryable`] and [`ReconcileError::is_not_found`] to
//! decide between silent no-op, backoff re-queue and loud failure.

use std::time::Duration;

use graph_types::{ObjectKey, TypeError};

use crate::provider::ProviderError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// The object vanished between queue and fetch.
    #[error("Not found: {0}")]
    NotFound(ObjectKey),

    /// A derived object lacks an identifying relation.
    #[error("object '{name}' ({kind}) does not contain expected label '{label}'")]
    LabelMissing {
        kind: String,
        name: String,
        label: &'static str,
    },

    /// A Node lists a tree parent that does not exist.
    #[error("parent {kind} '{parent}' of '{child}' not found")]
    ParentMissing {
        kind: &'static str,
        parent: String,
        child: String,
    },

    #[error("Conflict on {0}, retrying on next reconcile")]
    StoreConflict(ObjectKey),

    #[error("Provider infrastructure error: {0}")]
    ProviderInfra(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Reconcile timed out after {0:?}")]
    TimedOut(Duration),

    #[error("{} errors: {}", .0.len(), join_errors(.0))]
    Many(Vec<ReconcileError>),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

fn join_errors(errors: &[ReconcileError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ReconcileError {
    /// Errors a later reconcile is expected to resolve on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcileError::StoreConflict(_)
            | ReconcileError::ProviderInfra(_)
            | ReconcileError::Store(_)
            | ReconcileError::TimedOut(_) => true,
            ReconcileError::Many(errors) => errors.iter().all(ReconcileError::is_retryable),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ReconcileError::NotFound(_))
    }

    /// Collapse collected errors: none is Ok, one is itself.
    pub fn collect(mut errors: Vec<ReconcileError>) -> Result<(), ReconcileError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ReconcileError::Many(errors)),
        }
    }
}

impl From<TypeError> for ReconcileError {
    fn from(e: TypeError) -> Self {
        match e {
            TypeError::RelationMissing { kind, name, label } => {
                ReconcileError::LabelMissing { kind, name, label }
            }
            other => ReconcileError::Internal(other.into()),
        }
    }
}

impl From<StoreError> for ReconcileError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(key) => ReconcileError::NotFound(key),
            StoreError::Conflict { key, .. } => ReconcileError::StoreConflict(key),
            StoreError::Type(t) => t.into(),
            other => ReconcileError::Store(other),
        }
    }
}

impl From<ProviderError> for ReconcileError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Infra(msg) => ReconcileError::ProviderInfra(msg),
            other => ReconcileError::Config(other.to_string()),
        }
    }
}
