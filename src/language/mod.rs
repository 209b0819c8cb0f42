//! Language abstraction layer for multi-language support.
//!
//! Project layout conventions and source inspection for the languages whose
//! tests can be evaluated.

mod java;
mod python;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use java::JavaLanguage;
pub use python::PythonLanguage;

/// Supported programming languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Java,
    Python,
}

impl Language {
    /// Infer the language of a source file from its extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "java" => Some(Language::Java),
            "py" => Some(Language::Python),
            _ => None,
        }
    }

    /// Human-readable name for the language.
    pub fn name(&self) -> &'static str {
        match self {
            Language::Java => "Java",
            Language::Python => "Python",
        }
    }

    /// Info string used on fenced code blocks.
    pub fn code_fence(&self) -> &'static str {
        match self {
            Language::Java => "java",
            Language::Python => "python",
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            Language::Java => "java",
            Language::Python => "py",
        }
    }

    /// Build-tool manifests that mark a project root.
    pub fn root_markers(&self) -> &'static [&'static str] {
        match self {
            Language::Java => &["pom.xml"],
            Language::Python => &["pyproject.toml", "setup.py", "setup.cfg"],
        }
    }

    /// Directories to skip when copying a project into a workspace.
    pub fn skip_directories(&self) -> &'static [&'static str] {
        match self {
            Language::Java => &["target", ".git", ".idea", ".qualitygate"],
            Language::Python => &[
                ".git",
                "__pycache__",
                ".pytest_cache",
                ".venv",
                "venv",
                ".tox",
                "mutants",
                ".qualitygate",
            ],
        }
    }

    /// Nearest ancestor of `source` holding a root marker, or the file's
    /// own directory when there is none.
    pub fn find_project_root(&self, source: &Path) -> PathBuf {
        let start = source.parent().unwrap_or(Path::new("."));
        start
            .ancestors()
            .find(|dir| self.root_markers().iter().any(|m| dir.join(m).is_file()))
            .unwrap_or(start)
            .to_path_buf()
    }

    /// Check that generated code contains a recognizable test.
    pub fn validate_test(&self, code: &str) -> Result<(), String> {
        match self {
            Language::Java => JavaLanguage.validate_test(code),
            Language::Python => PythonLanguage.validate_test(code),
        }
    }

    /// Public entry points of a module, listed in prompts.
    pub fn public_members(&self, source: &str) -> Vec<String> {
        match self {
            Language::Java => JavaLanguage.public_methods(source),
            Language::Python => PythonLanguage.public_functions(source),
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
