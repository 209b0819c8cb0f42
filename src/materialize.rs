//! Writes test source to where the language's tooling expects it.

use crate::evaluation::Module;
use crate::language::{JavaLanguage, Language};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestLayout {
    /// `src/test/java/<package>/` or `tests/` under a project root
    Conventional,
    /// Directly inside the target directory
    Flat,
}

/// File name and final content for a test of `module`.
pub fn prepare_test(module: &Module, test_source: &str) -> (String, String) {
    match module.language {
        Language::Java => {
            let class = JavaLanguage
                .class_name(test_source)
                .unwrap_or_else(|| format!("{}Test", module.id));
            let package = JavaLanguage.package(&module.source);
            let content = JavaLanguage.ensure_package(test_source, package.as_deref());
            (format!("{}.java", class), with_trailing_newline(content))
        }
        Language::Python => {
            let stem = module
                .path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| module.id.clone());
            (
                format!("test_{}.py", stem),
                with_trailing_newline(test_source.to_string()),
            )
        }
    }
}

/// Directory a test of `module` goes in, relative to `root`.
pub fn test_dir(module: &Module, root: &Path, layout: TestLayout) -> PathBuf {
    match (layout, module.language) {
        (TestLayout::Flat, _) => root.to_path_buf(),
        (TestLayout::Conventional, Language::Java) => {
            let mut dir = root.join("src").join("test").join("java");
            if let Some(package) = JavaLanguage.package(&module.source) {
                dir.extend(package.split('.'));
            }
            dir
        }
        (TestLayout::Conventional, Language::Python) => root.join("tests"),
    }
}

/// Write `test_source` for `module` under `root`, replacing any existing
/// file. Returns the written path.
pub fn write_test(
    module: &Module,
    test_source: &str,
    root: &Path,
    layout: TestLayout,
) -> Result<PathBuf> {
    let (file_name, content) = prepare_test(module, test_source);
    let dir = test_dir(module, root, layout);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create test directory {}", dir.display()))?;

    let path = dir.join(file_name);
    std::fs::write(&path, content)
        .with_context(|| format!("Failed to write test file {}", path.display()))?;

    tracing::debug!("Wrote test for {} to {}", module.id, path.display());
    Ok(path)
}

fn with_trailing_newline(mut content: String) -> String {
    if !content.ends_with('\n') {
        content.push('\n');
    }
    content
}
