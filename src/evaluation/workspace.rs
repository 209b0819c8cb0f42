use super::model::Module;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

/// Private copy of a module's project. Removed on drop.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Copy the module's project into a fresh temporary directory, leaving
    /// out build output and tool caches.
    pub async fn prepare(module: &Module) -> Result<Self> {
        let project_root = module.project_root.clone();
        let skip = module.language.skip_directories();

        // Use spawn_blocking since the copy is synchronous
        let dir = tokio::task::spawn_blocking(move || -> Result<TempDir> {
            let temp_dir = TempDir::with_prefix("qualitygate-")?;
            copy_tree(&project_root, temp_dir.path(), skip)?;
            Ok(temp_dir)
        })
        .await??;

        tracing::debug!(
            "Copied {} into workspace {}",
            module.project_root.display(),
            dir.path().display()
        );
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Map a path under the original project root into this workspace.
    pub fn translate(&self, module: &Module, original: &Path) -> PathBuf {
        match original.strip_prefix(&module.project_root) {
            Ok(relative) => self.path().join(relative),
            Err(_) => self.path().join(original.file_name().unwrap_or_default()),
        }
    }
}

fn copy_tree(from: &Path, to: &Path, skip: &[&str]) -> Result<u64> {
    let mut copied = 0;
    let walker = WalkDir::new(from).follow_links(false).into_iter().filter_entry(|e| {
        e.depth() == 0
            || !e.file_type().is_dir()
            || !skip.iter().any(|s| e.file_name() == std::ffi::OsStr::new(s))
    });

    for entry in walker {
        let entry = entry.context("Failed to walk project directory")?;
        let relative = entry.path().strip_prefix(from)?;
        let target = to.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create {}", target.display()))?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &target)
                .with_context(|| format!("Failed to copy {}", entry.path().display()))?;
            copied += 1;
        }
    }

    Ok(copied)
}
