//! Java source conventions (Maven layout).

use regex::Regex;
use std::sync::OnceLock;

/// Java language support.
pub struct JavaLanguage;

fn package_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*package\s+([\w.]+)\s*;").unwrap())
}

fn public_class_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*public\s+(?:(?:final|abstract)\s+)*class\s+(\w+)").unwrap()
    })
}

fn any_class_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*(?:\w+\s+)*class\s+(\w+)").unwrap())
}

fn public_method_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*public\s+(?:(?:static|final|synchronized)\s+)*[\w<>\[\],.?]+\s+(\w+)\s*\(")
            .unwrap()
    })
}

fn test_annotation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@(?:Test|ParameterizedTest|RepeatedTest)\b").unwrap())
}

impl JavaLanguage {
    /// Declared package, if any.
    pub fn package(&self, source: &str) -> Option<String> {
        package_re()
            .captures(source)
            .map(|c| c[1].to_string())
    }

    /// The public top-level class, falling back to the first class declared.
    pub fn class_name(&self, source: &str) -> Option<String> {
        public_class_re()
            .captures(source)
            .or_else(|| any_class_re().captures(source))
            .map(|c| c[1].to_string())
    }

    /// Names of public methods, in declaration order without duplicates.
    pub fn public_methods(&self, source: &str) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for caps in public_method_re().captures_iter(source) {
            let name = caps[1].to_string();
            if name != "class" && !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    pub fn validate_test(&self, code: &str) -> Result<(), String> {
        if self.class_name(code).is_none() {
            return Err("no class declaration found".to_string());
        }
        if !test_annotation_re().is_match(code) {
            return Err("no @Test method found".to_string());
        }
        Ok(())
    }

    /// Make sure `code` declares `package`, inserting the declaration when
    /// it is missing. A different existing declaration is left alone.
    pub fn ensure_package(&self, code: &str, package: Option<&str>) -> String {
        match package {
            Some(pkg) if self.package(code).is_none() => {
                format!("package {};\n\n{}", pkg, code.trim_start())
            }
            _ => code.to_string(),
        }
    }

    /// Fully qualified name of `class` in `package`.
    pub fn qualified_name(&self, package: Option<&str>, class: &str) -> String {
        match package {
            Some(pkg) if !pkg.is_empty() => format!("{}.{}", pkg, class),
            _ => class.to_string(),
        }
    }
}
