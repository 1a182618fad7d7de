use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

use crate::host::ARTIFACT_DIR;

/// One isolated on-disk copy of the project.
///
/// The directory is removed when the copy is dropped.
#[derive(Debug)]
pub struct ProjectCopy {
    pub index: usize,
    dir: TempDir,
}

impl ProjectCopy {
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Path of a project-relative file inside this copy.
    pub fn path(&self, relative: &Path) -> PathBuf {
        self.dir.path().join(relative)
    }
}

/// Copy the project into `count` fresh temporary directories.
pub fn duplicate_project(project: &Path, count: usize) -> io::Result<Vec<ProjectCopy>> {
    (0..count.max(1))
        .map(|index| {
            let dir = tempfile::Builder::new()
                .prefix(&format!("il-mutant-{index}-"))
                .tempdir()?;
            copy_dir_recursive(project, dir.path())?;
            debug!(index, path = ?dir.path(), "duplicated project");
            Ok(ProjectCopy { index, dir })
        })
        .collect()
}

/// Recursively copy all files and directories from `src` into `dst`.
///
/// Artifact directories left by earlier runs are not copied.
fn copy_dir_recursive(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let path = entry.path();
        let target = dst.join(entry.file_name());

        if path.is_dir() {
            if entry.file_name() == ARTIFACT_DIR {
                continue;
            }
            copy_dir_recursive(&path, &target)?;
        } else {
            fs::copy(&path, &target)?;
        }
    }

    Ok(())
}
