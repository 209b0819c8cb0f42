use crate::language::Language;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Declared complexity of a module in a comparative study.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityTier {
    #[default]
    Baseline,
    Experimental,
}

impl std::fmt::Display for ComplexityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComplexityTier::Baseline => write!(f, "baseline"),
            ComplexityTier::Experimental => write!(f, "experimental"),
        }
    }
}

/// A source file under evaluation. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    /// Stable identifier derived from the file stem
    pub id: String,
    pub path: PathBuf,
    pub language: Language,
    pub tier: ComplexityTier,
    pub project_root: PathBuf,
    #[serde(skip)]
    pub source: String,
    /// SHA-256 of the source at load time
    pub source_hash: String,
}

impl Module {
    /// Read `path` and resolve its language and project root.
    ///
    /// `language` overrides detection by file extension.
    pub fn load(path: &Path, tier: ComplexityTier, language: Option<Language>) -> Result<Self> {
        let path = path
            .canonicalize()
            .with_context(|| format!("Module not found: {}", path.display()))?;
        if !path.is_file() {
            bail!("Module is not a file: {}", path.display());
        }

        let language = match language.or_else(|| Language::from_path(&path)) {
            Some(language) => language,
            None => bail!(
                "Cannot infer language of {} (expected .java or .py)",
                path.display()
            ),
        };

        let source = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read module {}", path.display()))?;

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            id: sanitize_id(&stem),
            project_root: language.find_project_root(&path),
            source_hash: hash_source(&source),
            path,
            language,
            tier,
            source,
        })
    }

    /// Path of the module relative to its project root.
    pub fn relative_source(&self) -> PathBuf {
        self.path
            .strip_prefix(&self.project_root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| PathBuf::from(self.path.file_name().unwrap_or_default()))
    }

    /// Dotted Python import path, with a leading `src/` layout dir dropped.
    pub fn import_name(&self) -> String {
        let relative = self.relative_source().with_extension("");
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        let parts = match parts.split_first() {
            Some((first, rest)) if first == "src" && !rest.is_empty() => rest.to_vec(),
            _ => parts,
        };
        parts.join(".")
    }

    /// Whether the file on disk still matches what was loaded.
    pub fn is_unchanged(&self) -> bool {
        std::fs::read_to_string(&self.path)
            .map(|current| hash_source(&current) == self.source_hash)
            .unwrap_or(false)
    }
}

fn sanitize_id(stem: &str) -> String {
    let id: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if id.is_empty() {
        "module".to_string()
    } else {
        id
    }
}

fn hash_source(source: &str) -> String {
    let digest = Sha256::digest(source.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_java_module() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("pom.xml"), "<project/>").unwrap();
        let pkg = temp_dir.path().join("src/main/java/com/example");
        std::fs::create_dir_all(&pkg).unwrap();
        std::fs::write(pkg.join("Calculator.java"), "public class Calculator {}").unwrap();

        let module = Module::load(&pkg.join("Calculator.java"), ComplexityTier::Baseline, None).unwrap();
        assert_eq!(module.id, "Calculator");
        assert_eq!(module.language, Language::Java);
        assert_eq!(module.project_root, temp_dir.path().canonicalize().unwrap());
        assert_eq!(
            module.relative_source(),
            PathBuf::from("src/main/java/com/example/Calculator.java")
        );
        assert_eq!(module.source_hash.len(), 64);
    }

    #[test]
    fn test_load_with_language_override() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("calc.txt");
        std::fs::write(&path, "def add(a, b): return a + b").unwrap();

        assert!(Module::load(&path, ComplexityTier::Baseline, None).is_err());
        let module = Module::load(&path, ComplexityTier::Baseline, Some(Language::Python)).unwrap();
        assert_eq!(module.language, Language::Python);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Module::load(Path::new("/nonexistent/Calc.java"), ComplexityTier::Baseline, None)
            .unwrap_err();
        assert!(err.to_string().contains("Module not found"));
    }

    #[test]
    fn test_import_name_strips_src_layout() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("pyproject.toml"), "[project]").unwrap();
        let pkg = temp_dir.path().join("src/shop");
        std::fs::create_dir_all(&pkg).unwrap();
        std::fs::write(pkg.join("pricing.py"), "def total(): pass").unwrap();

        let module = Module::load(&pkg.join("pricing.py"), ComplexityTier::Experimental, None).unwrap();
        assert_eq!(module.import_name(), "shop.pricing");
    }

    #[test]
    fn test_hash_detects_change() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("calc.py");
        std::fs::write(&path, "x = 1").unwrap();
        let module = Module::load(&path, ComplexityTier::Baseline, None).unwrap();
        assert!(module.is_unchanged());

        std::fs::write(&path, "x = 2").unwrap();
        assert!(!module.is_unchanged());
    }

    #[test]
    fn test_sanitize_id() {
        assert_eq!(sanitize_id("order service"), "order_service");
        assert_eq!(sanitize_id("Calc-v2"), "Calc-v2");
        assert_eq!(sanitize_id(""), "module");
    }
}
