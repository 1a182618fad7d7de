//! Test coverage: which tests reach which program entities.
//!
//! The instrumented test process fills a [`registry::CoverageRegistry`] and
//! writes a [`MutationCoverage`] snapshot when it exits. The orchestrator
//! reads the snapshot back and joins it with the discovered mutations in
//! [`mapper`].

pub mod mapper;
pub mod registry;

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CoverageError;
use crate::model::EntityHandle;

/// One entity reached during a test, qualified by its assembly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegisteredCoverage {
    pub assembly: String,
    pub entity: EntityHandle,
}

impl RegisteredCoverage {
    pub fn new(assembly: impl Into<String>, entity: EntityHandle) -> Self {
        Self {
            assembly: assembly.into(),
            entity,
        }
    }
}

/// Snapshot of a coverage session: test name to the entities it reached.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationCoverage {
    pub coverage: BTreeMap<String, Vec<RegisteredCoverage>>,
}

impl MutationCoverage {
    /// True when no test reached any entity.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tests with at least one recorded entity.
    pub fn len(&self) -> usize {
        self.coverage.values().filter(|hits| !hits.is_empty()).count()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CoverageError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoverageError> {
        Ok(bincode::deserialize(bytes)?)
    }

    pub fn read(path: &Path) -> Result<Self, CoverageError> {
        let bytes = fs::read(path).map_err(|source| CoverageError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(&bytes)
    }

    pub fn write(&self, path: &Path) -> Result<(), CoverageError> {
        write_atomic(path, &self.to_bytes()?)
    }
}

/// Write `bytes` to a sibling temporary file and rename it over `path`.
///
/// Readers see either the previous file or the complete new one.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CoverageError> {
    let io = |source| CoverageError::Io {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(io)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io)?;
    tmp.write_all(bytes).map_err(io)?;
    tmp.as_file().sync_all().map_err(io)?;
    tmp.persist(path).map_err(|e| io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> MutationCoverage {
        let mut coverage = MutationCoverage::default();
        coverage.coverage.insert(
            "Calculator.Tests.Adds".into(),
            vec![
                RegisteredCoverage::new("Calculator", EntityHandle(0x0600_0001)),
                RegisteredCoverage::new("Calculator", EntityHandle(0x0400_0001)),
            ],
        );
        coverage.coverage.insert("Calculator.Tests.Empty".into(), vec![]);
        coverage
    }

    #[test]
    fn snapshot_survives_disk_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("coverage.bin");
        let coverage = sample();

        coverage.write(&path).unwrap();
        assert_eq!(MutationCoverage::read(&path).unwrap(), coverage);

        // No temporary files are left next to the snapshot.
        let entries = fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn tests_without_hits_do_not_count() {
        assert_eq!(sample().len(), 1);

        let mut empty = MutationCoverage::default();
        empty.coverage.insert("Calculator.Tests.Adds".into(), vec![]);
        empty.coverage.insert("Calculator.Tests.Empty".into(), vec![]);
        assert!(empty.is_empty());
        assert_eq!(empty.len(), 0);
    }

    #[test]
    fn truncated_snapshot_is_reported_as_corrupt() {
        let bytes = sample().to_bytes().unwrap();
        let err = MutationCoverage::from_bytes(&bytes[..bytes.len() / 2]).unwrap_err();
        assert!(matches!(err, CoverageError::Corrupt(_)));
    }

    #[test]
    fn missing_snapshot_names_the_path() {
        let err = MutationCoverage::read(Path::new("does/not/exist.bin")).unwrap_err();
        assert!(err.to_string().contains("does/not/exist.bin"));
    }
}
