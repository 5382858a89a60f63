//! CLI command implementations.

pub mod export;
pub mod hotfix;
pub mod import;
pub mod inspect;
pub mod verify;

use idstore_core::{Config, StoreRegistry};
use idstore_storage::{FileProvider, SessionProvider};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by the CLI itself.
#[derive(Debug, Error)]
pub enum CliError {
    /// The store directory does not exist.
    #[error("no store found at {0}")]
    NoStore(PathBuf),

    /// A `TYPE=N` argument could not be parsed.
    #[error("invalid priority '{0}', expected TYPE=N")]
    InvalidPriority(String),

    /// The output format is not supported.
    #[error("unknown output format '{0}', expected text or json")]
    UnknownFormat(String),
}

/// A `TYPE=N` restore priority given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityArg {
    /// Object type.
    pub object_type: String,
    /// Priority.
    pub priority: i32,
}

impl FromStr for PriorityArg {
    type Err = CliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (object_type, priority) = s
            .split_once('=')
            .ok_or_else(|| CliError::InvalidPriority(s.to_string()))?;
        let priority = priority
            .trim()
            .parse()
            .map_err(|_| CliError::InvalidPriority(s.to_string()))?;
        let object_type = object_type.trim();
        if object_type.is_empty() {
            return Err(CliError::InvalidPriority(s.to_string()));
        }
        Ok(Self {
            object_type: object_type.to_string(),
            priority,
        })
    }
}

/// Priority of `object_type`: the command line value if given, else `fallback`.
pub fn priority_for(object_type: &str, priorities: &[PriorityArg], fallback: i32) -> i32 {
    priorities
        .iter()
        .find(|p| p.object_type == object_type)
        .map_or(fallback, |p| p.priority)
}

/// Opens the store directory. Unless `create` is set the directory must exist.
pub fn open_registry(
    path: &Path,
    create: bool,
    config: Config,
) -> Result<StoreRegistry, Box<dyn Error>> {
    if !create && !path.is_dir() {
        return Err(CliError::NoStore(path.to_path_buf()).into());
    }
    let provider = FileProvider::open(path)?;
    Ok(StoreRegistry::new(Arc::new(provider), config))
}

/// Object types that currently hold records.
pub fn stored_types(provider: &dyn SessionProvider) -> Result<Vec<String>, Box<dyn Error>> {
    let mut session = provider.acquire(false)?;
    let types = session.object_types();
    provider.release(session)?;
    Ok(types?)
}

/// Registers every stored type as an untyped exporter.
pub fn register_stored_types(
    registry: &StoreRegistry,
    priorities: &[PriorityArg],
) -> Result<Vec<String>, Box<dyn Error>> {
    let types = stored_types(registry.provider().as_ref())?;
    for object_type in &types {
        registry.register_raw_type(object_type.clone(), priority_for(object_type, priorities, 0));
    }
    Ok(types)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_priorities() {
        let arg: PriorityArg = "credential=10".parse().unwrap();
        assert_eq!(arg.object_type, "credential");
        assert_eq!(arg.priority, 10);
        assert_eq!("x=-3".parse::<PriorityArg>().unwrap().priority, -3);
    }

    #[test]
    fn rejects_malformed_priorities() {
        assert!("credential".parse::<PriorityArg>().is_err());
        assert!("credential=high".parse::<PriorityArg>().is_err());
        assert!("=1".parse::<PriorityArg>().is_err());
    }

    #[test]
    fn missing_store_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_registry(&dir.path().join("nope"), false, Config::default()).unwrap_err();
        assert!(err.to_string().contains("no store found"));
    }

    #[test]
    fn command_line_priority_wins() {
        let priorities = vec![PriorityArg {
            object_type: "group".into(),
            priority: 5,
        }];
        assert_eq!(priority_for("group", &priorities, 0), 5);
        assert_eq!(priority_for("other", &priorities, 7), 7);
    }
}
