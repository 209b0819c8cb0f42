//! Python source conventions (pytest layout).

use regex::Regex;
use std::sync::OnceLock;

/// Python language support.
pub struct PythonLanguage;

fn definition_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^(?:async\s+)?(?:def|class)\s+([A-Za-z]\w*)").unwrap())
}

fn test_function_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*(?:async\s+)?def\s+test\w*\s*\(").unwrap())
}

impl PythonLanguage {
    /// Top-level public functions and classes.
    pub fn public_functions(&self, source: &str) -> Vec<String> {
        definition_re()
            .captures_iter(source)
            .map(|c| c[1].to_string())
            .collect()
    }

    pub fn validate_test(&self, code: &str) -> Result<(), String> {
        if test_function_re().is_match(code) {
            Ok(())
        } else {
            Err("no `def test_` function found".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_functions() {
        let source = r#"
import math

def add(a, b):
    return a + b

def _private():
    pass

class Calculator:
    def method(self):
        pass

async def fetch():
    pass
"#;
        assert_eq!(
            PythonLanguage.public_functions(source),
            vec!["add", "Calculator", "fetch"]
        );
    }

    #[test]
    fn test_validate_test() {
        assert!(PythonLanguage
            .validate_test("from calc import add\n\ndef test_add():\n    assert add(1, 2) == 3\n")
            .is_ok());
        assert!(PythonLanguage
            .validate_test("class TestCalc:\n    def test_add(self):\n        pass\n")
            .is_ok());
        assert!(PythonLanguage.validate_test("def add(a, b): return a + b").is_err());
    }
}
