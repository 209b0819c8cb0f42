//! Prompt protocols for test generation.
//!
//! A protocol is a strictness tier: `standard` asks for a plain test class,
//! `advanced` adds boundary and exception analysis, and `expert` targets
//! the mutation operators the mutation tool applies.

use crate::evaluation::Module;
use crate::language::{JavaLanguage, Language};
use serde::{Deserialize, Serialize};

/// Prompt strictness level.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Standard,
    Advanced,
    Expert,
}

impl Protocol {
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::Standard => "standard",
            Protocol::Advanced => "advanced",
            Protocol::Expert => "expert",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Test stack named in prompts for each language.
struct Frameworks {
    unit: &'static str,
    mocking: &'static str,
    mutation_tool: &'static str,
    exception_assert: &'static str,
}

fn frameworks(language: Language) -> Frameworks {
    match language {
        Language::Java => Frameworks {
            unit: "JUnit 5",
            mocking: "Mockito",
            mutation_tool: "PIT",
            exception_assert: "assertThrows()",
        },
        Language::Python => Frameworks {
            unit: "pytest",
            mocking: "unittest.mock",
            mutation_tool: "mutmut",
            exception_assert: "pytest.raises()",
        },
    }
}

/// Build the prompt for `module` at the given protocol level.
pub fn build_prompt(module: &Module, protocol: Protocol) -> String {
    let language = module.language;
    let fw = frameworks(language);
    let fence = language.code_fence();
    let code = module.source.trim_end();
    let members = language.public_members(&module.source);
    let member_list = if members.is_empty() {
        "every public entry point".to_string()
    } else {
        members.join(", ")
    };

    let mut prompt = match protocol {
        Protocol::Standard => format!(
            "Generate {unit} unit tests for this {lang} module:\n\n\
             ```{fence}\n{code}\n```\n\n\
             Requirements:\n\
             - {unit} with {mocking}\n\
             - Test normal cases, edge cases, exceptions\n\
             - Complete test {unit_kind} with imports\n",
            unit = fw.unit,
            lang = language.name(),
            mocking = fw.mocking,
            unit_kind = test_unit_kind(language),
        ),
        Protocol::Advanced => format!(
            "You are a Senior Test Engineer specializing in comprehensive test coverage. \
             Generate {unit} unit tests following these guidelines:\n\n\
             Code to test:\n```{fence}\n{code}\n```\n\n\
             Test Requirements:\n\
             1. Boundary Value Analysis: test exact limits, off-by-one errors and boundary conditions\n\
             2. Exception Handling: test all exception paths using {exc}\n\
             3. Edge Cases: test null/None values, empty collections, extreme values and invalid inputs\n\
             4. Mock Dependencies: use {mocking} for external dependencies\n\
             5. Coverage: aim for 100% line and branch coverage\n\n\
             Cover these members: {members}\n",
            unit = fw.unit,
            exc = fw.exception_assert,
            mocking = fw.mocking,
            members = member_list,
        ),
        Protocol::Expert => format!(
            "You are an Expert Test Engineer with deep knowledge of mutation testing ({tool}). \
             Generate {unit} unit tests that reach a mutation score above 90%.\n\n\
             Code to test:\n```{fence}\n{code}\n```\n\n\
             Critical Requirements:\n\
             1. Mutation focus: detect arithmetic (+, -, *, /), conditional (>, <, ==, !=), \
             increment and negated-condition mutations\n\
             2. Boundary values: if code checks x > 10, test x = 9, 10 and 11\n\
             3. Exceptions: assert type and message with {exc}\n\
             4. Mocking: stub {mocking} dependencies with realistic values and verify interactions\n\
             5. State: verify both return values and state changes\n\
             6. Use only the API that exists in the code above; do not invent methods\n\n\
             Cover these members: {members}\n",
            tool = fw.mutation_tool,
            unit = fw.unit,
            exc = fw.exception_assert,
            mocking = fw.mocking,
            members = member_list,
        ),
    };

    prompt.push_str(&placement_hint(module));
    prompt.push_str(&format!(
        "\nRespond with a single ```{}``` code block containing only the complete test code.",
        fence
    ));
    prompt
}

fn test_unit_kind(language: Language) -> &'static str {
    match language {
        Language::Java => "class",
        Language::Python => "module",
    }
}

fn placement_hint(module: &Module) -> String {
    match module.language {
        Language::Java => {
            let class = JavaLanguage
                .class_name(&module.source)
                .unwrap_or_else(|| module.id.clone());
            match JavaLanguage.package(&module.source) {
                Some(pkg) => format!(
                    "\nThe test class must be `public class {}Test` in `package {};`.\n",
                    class, pkg
                ),
                None => format!("\nThe test class must be `public class {}Test`.\n", class),
            }
        }
        Language::Python => format!(
            "\nImport the code under test with `from {} import ...`.\n",
            module.import_name()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::ComplexityTier;
    use std::path::Path;
    use tempfile::TempDir;

    fn java_module(dir: &Path) -> Module {
        let path = dir.join("Calculator.java");
        std::fs::write(
            &path,
            "package com.example;\n\npublic class Calculator {\n    public int add(int a, int b) { return a + b; }\n}\n",
        )
        .unwrap();
        Module::load(&path, ComplexityTier::Baseline, None).unwrap()
    }

    #[test]
    fn test_protocol_parse_and_display() {
        use clap::ValueEnum;
        assert_eq!(Protocol::from_str("expert", true), Ok(Protocol::Expert));
        assert_eq!(Protocol::Advanced.to_string(), "advanced");
        assert_eq!(Protocol::default(), Protocol::Standard);
    }

    #[test]
    fn test_standard_prompt_for_java() {
        let temp_dir = TempDir::new().unwrap();
        let prompt = build_prompt(&java_module(temp_dir.path()), Protocol::Standard);
        assert!(prompt.contains("JUnit 5"));
        assert!(prompt.contains("```java\npackage com.example;"));
        assert!(prompt.contains("public class CalculatorTest"));
        assert!(prompt.contains("package com.example;`"));
        assert!(!prompt.contains("mutation score"));
    }

    #[test]
    fn test_expert_prompt_targets_mutation_tool() {
        let temp_dir = TempDir::new().unwrap();
        let prompt = build_prompt(&java_module(temp_dir.path()), Protocol::Expert);
        assert!(prompt.contains("mutation testing (PIT)"));
        assert!(prompt.contains("Cover these members: add"));
    }

    #[test]
    fn test_prompt_for_python() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("calc.py");
        std::fs::write(&path, "def add(a, b):\n    return a + b\n").unwrap();
        let module = Module::load(&path, ComplexityTier::Experimental, None).unwrap();

        let prompt = build_prompt(&module, Protocol::Advanced);
        assert!(prompt.contains("pytest"));
        assert!(prompt.contains("pytest.raises()"));
        assert!(prompt.contains("from calc import"));
        assert!(prompt.contains("```python"));
    }
}
