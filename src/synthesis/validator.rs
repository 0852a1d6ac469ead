//! Static validation gate for candidate capability source.
//!
//! Candidate code (Python, the sandbox's execution language) is
//! scanned in four stages, each appending findings:
//!
//! 1. Structure check - strings/comments stripped, bracket balance;
//!    a failure is `critical/syntax` and stops the run
//! 2. Policy gate - dangerous imports and dynamic-eval calls
//! 3. Security scan - file opens and network-shaped attribute calls
//! 4. Safety heuristics - oversized code, escape-free infinite loops
//!
//! Blockers are `critical` or `high` findings; validation passes iff
//! there are none. The validator holds no mutable state: identical
//! input always yields identical findings.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Finding severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Critical and high findings block packaging and execution.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Critical | Self::High)
    }
}

/// Finding category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingCategory {
    Syntax,
    Policy,
    Security,
    Safety,
    Types,
}

/// A single validation finding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationFinding {
    pub severity: Severity,
    pub category: FindingCategory,
    pub message: String,
    pub line: Option<usize>,
}

/// Accumulated validation outcome
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub findings: Vec<ValidationFinding>,
}

impl ValidationReport {
    pub fn add(
        &mut self,
        severity: Severity,
        category: FindingCategory,
        message: impl Into<String>,
        line: Option<usize>,
    ) {
        self.findings.push(ValidationFinding {
            severity,
            category,
            message: message.into(),
            line,
        });
    }

    /// Findings severe enough to block packaging or execution.
    pub fn blockers(&self) -> Vec<&ValidationFinding> {
        self.findings.iter().filter(|f| f.severity.is_blocking()).collect()
    }

    pub fn has_blockers(&self) -> bool {
        self.findings.iter().any(|f| f.severity.is_blocking())
    }

    pub fn passed(&self) -> bool {
        !self.has_blockers()
    }
}

static IMPORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*import\s+(.+)$").unwrap());
static FROM_IMPORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*from\s+([A-Za-z_][\w.]*)\s+import").unwrap());
static DYNAMIC_CALL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[^\w.])(eval|exec|compile|__import__)\s*\(").unwrap());
static OPEN_CALL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[^\w.])open\s*\(").unwrap());
static NET_ATTR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.(urlopen|get|post|request)\s*\(").unwrap());
static WHILE_TRUE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*while\s+(?:True|1)\s*:").unwrap());
static LOOP_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:break|return|raise)\b|sys\.exit").unwrap());
static DEF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*def\s+([A-Za-z_]\w*)\s*\(").unwrap());

/// Maximum code length before a safety finding is raised.
const MAX_CODE_LEN: usize = 10_000;

/// Policy-gated static validator
pub struct StaticValidator {
    allow_network: bool,
    always_dangerous: HashSet<&'static str>,
    network_modules: HashSet<&'static str>,
    allowed_modules: HashSet<&'static str>,
}

impl StaticValidator {
    /// Build a validator. `allow_network` moves the network modules
    /// from the blocked set to the allow-list.
    pub fn new(allow_network: bool) -> Self {
        let always_dangerous = [
            // Process control
            "os", "subprocess", "signal",
            // Reflection-heavy / FFI
            "ctypes", "importlib", "inspect",
            // Concurrency primitives
            "multiprocessing", "threading",
        ]
        .into_iter()
        .collect();

        let network_modules = ["socket", "http", "urllib", "requests", "httpx"]
            .into_iter()
            .collect::<HashSet<_>>();

        let mut allowed_modules: HashSet<&'static str> = [
            "json", "re", "math", "datetime", "typing", "dataclasses", "collections",
            "itertools", "functools", "string", "statistics", "decimal", "fractions",
        ]
        .into_iter()
        .collect();

        if allow_network {
            allowed_modules.extend(network_modules.iter().copied());
        }

        Self {
            allow_network,
            always_dangerous,
            network_modules,
            allowed_modules,
        }
    }

    /// Run all validation stages over `code`.
    pub fn validate(&self, code: &str) -> ValidationReport {
        let mut report = ValidationReport::default();

        let lines = match scan_source(code) {
            Ok(lines) => lines,
            Err((message, line)) => {
                report.add(Severity::Critical, FindingCategory::Syntax, message, Some(line));
                return report;
            }
        };

        self.check_policy(&lines, &mut report);
        self.check_security(&lines, &mut report);
        self.check_safety(code, &lines, &mut report);

        report
    }

    fn check_policy(&self, lines: &[String], report: &mut ValidationReport) {
        for (idx, line) in lines.iter().enumerate() {
            let lineno = idx + 1;

            if let Some(caps) = IMPORT_RE.captures(line) {
                for module in caps[1].split(',') {
                    let name = module.split_whitespace().next().unwrap_or("");
                    if !name.is_empty() {
                        self.check_import(name, lineno, report);
                    }
                }
            } else if let Some(caps) = FROM_IMPORT_RE.captures(line) {
                self.check_import(&caps[1], lineno, report);
            }

            if let Some(caps) = DYNAMIC_CALL_RE.captures(line) {
                report.add(
                    Severity::Critical,
                    FindingCategory::Policy,
                    format!("Forbidden function call: {}", &caps[1]),
                    Some(lineno),
                );
            }
        }
    }

    fn check_import(&self, module: &str, lineno: usize, report: &mut ValidationReport) {
        let base = module.split('.').next().unwrap_or(module);

        if self.always_dangerous.contains(base)
            || (!self.allow_network && self.network_modules.contains(base))
        {
            report.add(
                Severity::Critical,
                FindingCategory::Policy,
                format!("Forbidden import: {}", module),
                Some(lineno),
            );
        } else if !self.allowed_modules.contains(base) {
            report.add(
                Severity::Medium,
                FindingCategory::Policy,
                format!("Import requires review: {}", module),
                Some(lineno),
            );
        }
    }

    fn check_security(&self, lines: &[String], report: &mut ValidationReport) {
        for (idx, line) in lines.iter().enumerate() {
            let lineno = idx + 1;

            if OPEN_CALL_RE.is_match(line) {
                report.add(
                    Severity::High,
                    FindingCategory::Security,
                    "File operation detected - must run sandboxed",
                    Some(lineno),
                );
            }

            if let Some(caps) = NET_ATTR_RE.captures(line) {
                report.add(
                    Severity::High,
                    FindingCategory::Security,
                    format!("Network operation detected: .{}()", &caps[1]),
                    Some(lineno),
                );
            }
        }
    }

    fn check_safety(&self, code: &str, lines: &[String], report: &mut ValidationReport) {
        if code.len() > MAX_CODE_LEN {
            report.add(
                Severity::Medium,
                FindingCategory::Safety,
                "Code is very long, may indicate complexity issues",
                None,
            );
        }

        let has_escape = lines.iter().any(|l| LOOP_ESCAPE_RE.is_match(l));
        for (idx, line) in lines.iter().enumerate() {
            if WHILE_TRUE_RE.is_match(line) && !has_escape {
                report.add(
                    Severity::High,
                    FindingCategory::Safety,
                    "Potential infinite loop detected",
                    Some(idx + 1),
                );
            }
        }
    }
}

impl Default for StaticValidator {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Strip comments and string literals from source, verifying the
/// basic structure: terminated strings and balanced brackets.
/// Returns one sanitized line per input line, or a syntax error with
/// its line number.
fn scan_source(code: &str) -> Result<Vec<String>, (String, usize)> {
    #[derive(PartialEq)]
    enum Mode {
        Code,
        Str { quote: char, triple: bool },
    }

    let mut mode = Mode::Code;
    let mut out = Vec::new();
    let mut brackets: Vec<(char, usize)> = Vec::new();

    for (idx, raw) in code.lines().enumerate() {
        let lineno = idx + 1;
        let mut stripped = String::with_capacity(raw.len());
        let chars: Vec<char> = raw.chars().collect();
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            match mode {
                Mode::Code => match c {
                    '#' => break,
                    '\'' | '"' => {
                        let triple = i + 2 < chars.len() && chars[i + 1] == c && chars[i + 2] == c;
                        mode = Mode::Str { quote: c, triple };
                        if triple {
                            i += 2;
                        }
                    }
                    '(' | '[' | '{' => {
                        brackets.push((c, lineno));
                        stripped.push(c);
                    }
                    ')' | ']' | '}' => {
                        let expected = match c {
                            ')' => '(',
                            ']' => '[',
                            _ => '{',
                        };
                        match brackets.pop() {
                            Some((open, _)) if open == expected => stripped.push(c),
                            _ => {
                                return Err((format!("Syntax error: unmatched '{}'", c), lineno));
                            }
                        }
                    }
                    _ => stripped.push(c),
                },
                Mode::Str { quote, triple } => {
                    if c == '\\' {
                        i += 1; // skip escaped char
                    } else if c == quote {
                        if triple {
                            if chars.get(i + 1) == Some(&quote) && chars.get(i + 2) == Some(&quote)
                            {
                                mode = Mode::Code;
                                i += 2;
                            }
                        } else {
                            mode = Mode::Code;
                        }
                    }
                }
            }
            i += 1;
        }

        // A single-quoted string cannot span lines
        if let Mode::Str { triple: false, .. } = mode {
            return Err(("Syntax error: unterminated string literal".to_string(), lineno));
        }

        out.push(stripped);
    }

    if let Mode::Str { triple: true, .. } = mode {
        return Err((
            "Syntax error: unterminated triple-quoted string".to_string(),
            code.lines().count().max(1),
        ));
    }

    if let Some((open, lineno)) = brackets.pop() {
        return Err((format!("Syntax error: unclosed '{}'", open), lineno));
    }

    Ok(out)
}

/// Non-blocking type-hint checker.
///
/// Runs after the static gate passes and only ever emits `low/types`
/// findings; it never blocks synthesis.
#[derive(Default)]
pub struct TypeChecker;

impl TypeChecker {
    pub fn new() -> Self {
        Self
    }

    pub fn check(&self, code: &str) -> ValidationReport {
        let mut report = ValidationReport::default();

        let Ok(lines) = scan_source(code) else {
            return report;
        };

        for (idx, line) in lines.iter().enumerate() {
            let Some(caps) = DEF_RE.captures(line) else {
                continue;
            };
            let name = caps[1].to_string();

            // Walk the def header until its closing colon
            let mut header = String::new();
            for follow in &lines[idx..] {
                header.push_str(follow);
                if follow.trim_end().ends_with(':') {
                    break;
                }
            }

            if !header.contains("->") {
                report.add(
                    Severity::Low,
                    FindingCategory::Types,
                    format!("Function '{}' missing return type hint", name),
                    Some(idx + 1),
                );
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLEAN: &str = r#"
import json

def parse(input_data: dict) -> dict:
    return {"status": "success", "data": input_data}
"#;

    #[test]
    fn test_clean_code_passes() {
        let validator = StaticValidator::new(false);
        let report = validator.validate(CLEAN);
        assert!(report.passed(), "findings: {:?}", report.findings);
    }

    #[test]
    fn test_dangerous_import_blocks() {
        let validator = StaticValidator::new(false);
        let report = validator.validate("import subprocess\n");
        assert!(!report.passed());
        let blockers = report.blockers();
        assert_eq!(blockers.len(), 1);
        assert_eq!(blockers[0].category, FindingCategory::Policy);
        assert_eq!(blockers[0].severity, Severity::Critical);
        assert_eq!(blockers[0].line, Some(1));
    }

    #[test]
    fn test_comma_separated_imports() {
        let validator = StaticValidator::new(false);
        let report = validator.validate("import json, os\n");
        assert!(!report.passed());
        assert!(report.blockers()[0].message.contains("os"));
    }

    #[test]
    fn test_from_import_blocked() {
        let validator = StaticValidator::new(false);
        let report = validator.validate("from os.path import join\n");
        assert!(!report.passed());
    }

    #[test]
    fn test_network_import_gated_on_construction() {
        let blocked = StaticValidator::new(false).validate("import urllib\n");
        assert!(!blocked.passed());

        let allowed = StaticValidator::new(true).validate("import urllib\n");
        assert!(allowed.passed(), "findings: {:?}", allowed.findings);
    }

    #[test]
    fn test_unknown_import_is_review_only() {
        let validator = StaticValidator::new(false);
        let report = validator.validate("import numpy\n");
        assert!(report.passed());
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].severity, Severity::Medium);
    }

    #[test]
    fn test_dynamic_eval_call_blocked() {
        let validator = StaticValidator::new(false);
        let report = validator.validate("def f(x):\n    return eval(x)\n");
        assert!(!report.passed());
        assert!(report.blockers()[0].message.contains("eval"));
    }

    #[test]
    fn test_evaluate_name_not_confused_with_eval() {
        let validator = StaticValidator::new(false);
        let report = validator.validate("def evaluate(x):\n    return my_evaluate(x)\n");
        assert!(report.passed(), "findings: {:?}", report.findings);
    }

    #[test]
    fn test_open_call_is_high_security() {
        let validator = StaticValidator::new(false);
        let report = validator.validate("def f(p):\n    return open(p).read()\n");
        assert!(!report.passed());
        assert_eq!(report.blockers()[0].category, FindingCategory::Security);
    }

    #[test]
    fn test_network_attribute_call_flagged() {
        let validator = StaticValidator::new(false);
        let report = validator.validate("def f(s):\n    return s.post(1)\n");
        assert!(report.findings.iter().any(|f| f.category == FindingCategory::Security));
    }

    #[test]
    fn test_infinite_loop_without_escape() {
        let validator = StaticValidator::new(false);
        let report = validator.validate("while True:\n    x = 1\n");
        assert!(!report.passed());

        let with_break = validator.validate("while True:\n    break\n");
        assert!(with_break.passed());
    }

    #[test]
    fn test_strings_and_comments_not_scanned() {
        let validator = StaticValidator::new(false);
        let code = "def f(x):\n    # import os\n    return \"import subprocess\"\n";
        let report = validator.validate(code);
        assert!(report.passed(), "findings: {:?}", report.findings);
    }

    #[test]
    fn test_unbalanced_brackets_are_syntax_errors() {
        let validator = StaticValidator::new(false);
        let report = validator.validate("def f(x:\n    return x\n");
        assert!(!report.passed());
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].category, FindingCategory::Syntax);
        // Later stages are skipped after a parse failure
    }

    #[test]
    fn test_unterminated_string_is_syntax_error() {
        let validator = StaticValidator::new(false);
        let report = validator.validate("x = \"oops\n");
        assert_eq!(report.findings[0].category, FindingCategory::Syntax);
        assert_eq!(report.findings[0].line, Some(1));
    }

    #[test]
    fn test_validator_is_deterministic() {
        let validator = StaticValidator::new(false);
        let code = "import os\nimport numpy\nwhile True:\n    pass\n";
        let a = validator.validate(code);
        let b = validator.validate(code);
        assert_eq!(serde_json::to_string(&a).unwrap(), serde_json::to_string(&b).unwrap());
    }

    #[test]
    fn test_type_checker_never_blocks() {
        let checker = TypeChecker::new();
        let report = checker.check("def f(x):\n    return x\n");
        assert!(report.passed());
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].severity, Severity::Low);
        assert_eq!(report.findings[0].category, FindingCategory::Types);

        let hinted = checker.check("def f(x: int) -> int:\n    return x\n");
        assert!(hinted.findings.is_empty());
    }
}
