//! Declaration loader
//!
//! Reads a directory tree of YAML declarations, one object per file:
//!
//! ```yaml
//! kind: Resource          # or Node, Component, Requirement, Control, ...
//! name: web1
//! hierarchy: Resource     # optional, implied by most kind aliases
//! spec:
//!   type: host
//!   classes: [public]
//! ```
//!
//! Only declared kinds are accepted. Joins, Executions and NodeAttestations
//! are owned by the engine and rejected here.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use graph_types::{
    Attestation, Binding, Entity, Hierarchy, Kind, Node, Object, ObjectKey, Provider, Rule,
};
use serde::Deserialize;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::Configuration;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to walk {}: {source}", .path.display())]
    Walk {
        path: PathBuf,
        source: walkdir::Error,
    },

    #[error("Failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("{}: unknown kind '{kind}'", .path.display())]
    UnknownKind { path: PathBuf, kind: String },

    #[error("{}: {kind} objects are derived by the engine and cannot be declared", .path.display())]
    Derived { path: PathBuf, kind: String },

    #[error(
        "{}: kind '{kind}' belongs to the {implied} hierarchy, not {declared}",
        .path.display()
    )]
    HierarchyMismatch {
        path: PathBuf,
        kind: String,
        implied: Hierarchy,
        declared: Hierarchy,
    },

    #[error("Duplicate {key} in {}", .path.display())]
    Duplicate { key: ObjectKey, path: PathBuf },
}

#[derive(Debug, Deserialize)]
struct Declaration {
    kind: String,
    name: String,
    #[serde(default)]
    hierarchy: Option<Hierarchy>,
    #[serde(default)]
    spec: serde_yaml::Value,
}

/// Resolve a declared kind name to a kind and, for hierarchy-specific
/// aliases, the hierarchy it implies.
fn resolve_kind(name: &str) -> Option<(Kind, Option<Hierarchy>)> {
    let resolved = match name {
        "Node" => (Kind::Node, None),
        "Resource" => (Kind::Node, Some(Hierarchy::Resource)),
        "Component" => (Kind::Node, Some(Hierarchy::Component)),
        "Rule" => (Kind::Rule, None),
        "Requirement" => (Kind::Rule, Some(Hierarchy::Resource)),
        "Control" => (Kind::Rule, Some(Hierarchy::Component)),
        "Binding" => (Kind::Binding, None),
        "Implementation" => (Kind::Binding, Some(Hierarchy::Resource)),
        "Assessment" => (Kind::Binding, Some(Hierarchy::Component)),
        "Attestation" => (Kind::Attestation, None),
        "Provider" | "AttestationProvider" => (Kind::Provider, None),
        _ => {
            // Derived kinds under any of their names.
            let derived = Kind::ALL.into_iter().filter(|k| k.is_derived()).find(|k| {
                format!("{k:?}") == name
                    || Hierarchy::ALL
                        .into_iter()
                        .any(|h| k.display_name(h) == name)
            })?;
            return Some((derived, None));
        }
    };
    Some(resolved)
}

/// Parse one declaration file's contents.
pub fn parse_declaration(path: &Path, text: &str) -> Result<Entity, LoadError> {
    let parse_err = |source: serde_yaml::Error| LoadError::Parse {
        path: path.to_path_buf(),
        source,
    };
    let declaration: Declaration = serde_yaml::from_str(text).map_err(parse_err)?;

    let (kind, implied) =
        resolve_kind(&declaration.kind).ok_or_else(|| LoadError::UnknownKind {
            path: path.to_path_buf(),
            kind: declaration.kind.clone(),
        })?;
    let hierarchy = match (implied, declaration.hierarchy) {
        (Some(implied), Some(declared)) if implied != declared => {
            return Err(LoadError::HierarchyMismatch {
                path: path.to_path_buf(),
                kind: declaration.kind,
                implied,
                declared,
            })
        }
        (Some(implied), _) => implied,
        (None, declared) => declared.unwrap_or_default(),
    };

    let name = declaration.name;
    // An omitted spec means all-default fields.
    let spec = match declaration.spec {
        serde_yaml::Value::Null => serde_yaml::Value::Mapping(Default::default()),
        spec => spec,
    };
    let entity = match kind {
        Kind::Node => Node::new(name, hierarchy, serde_yaml::from_value(spec).map_err(parse_err)?)
            .into_entity(),
        Kind::Rule => Rule::new(name, hierarchy, serde_yaml::from_value(spec).map_err(parse_err)?)
            .into_entity(),
        Kind::Binding => {
            Binding::new(name, hierarchy, serde_yaml::from_value(spec).map_err(parse_err)?)
                .into_entity()
        }
        Kind::Attestation => {
            Attestation::new(name, hierarchy, serde_yaml::from_value(spec).map_err(parse_err)?)
                .into_entity()
        }
        Kind::Provider => {
            Provider::new(name, hierarchy, serde_yaml::from_value(spec).map_err(parse_err)?)
                .into_entity()
        }
        Kind::Join | Kind::Execution | Kind::NodeAttestation => {
            return Err(LoadError::Derived {
                path: path.to_path_buf(),
                kind: declaration.kind,
            })
        }
    };
    Ok(entity)
}

/// YAML files under `dir`, in a stable order.
fn declaration_files(dir: &Path) -> Result<Vec<PathBuf>, LoadError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|source| LoadError::Walk {
            path: dir.to_path_buf(),
            source,
        })?;
        let is_yaml = entry
            .path()
            .extension()
            .map(|ext| ext == "yaml" || ext == "yml")
            .unwrap_or(false);
        if entry.file_type().is_file() && is_yaml {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Load every declaration under each directory into one [`Configuration`].
/// Names must be unique per kind and hierarchy across all directories.
pub fn load_dirs<P: AsRef<Path>>(dirs: &[P]) -> Result<Configuration, LoadError> {
    let mut configuration = Configuration::default();
    let mut seen = HashSet::new();

    for dir in dirs {
        let dir = dir.as_ref();
        let files = declaration_files(dir)?;
        info!("Found {} declaration files in {}", files.len(), dir.display());

        for path in files {
            let text = std::fs::read_to_string(&path).map_err(|source| LoadError::Io {
                path: path.clone(),
                source,
            })?;
            let entity = parse_declaration(&path, &text)?;
            let key = entity.key();
            if !seen.insert(key.clone()) {
                return Err(LoadError::Duplicate { key, path });
            }
            debug!(object = %key, path = %path.display(), "Loaded declaration");
            configuration.push(entity);
        }
    }

    info!("Loaded {} declarations", configuration.len());
    Ok(configuration)
}
