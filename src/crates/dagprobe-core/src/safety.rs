//! Safety scan over node code.
//!
//! Two passes. The parse pass compiles the code with a bare engine and
//! enforces the single-function contract (exactly one `fn`, named as
//! declared). The identifier pass walks every identifier token line by line
//! and rejects forbidden constructs: import/export statements, calls to
//! blocked names, dunder identifiers, and module references outside the safe
//! list. Every rejection names the offending construct and its line.

use regex::Regex;
use rhai::Engine;
use std::sync::OnceLock;

/// Call targets that must never appear in node code.
pub const FORBIDDEN_CALLS: &[&str] = &[
    "exec", "eval", "open", "compile", "globals", "locals", "vars", "dir", "delattr", "setattr",
    "sleep", "spawn",
];

/// Module namespaces node code may reference.
pub const SAFE_MODULES: &[&str] = &[
    "math",
    "statistics",
    "collections",
    "itertools",
    "functools",
    "json",
    "re",
    "datetime",
    "decimal",
    "fractions",
    "random",
    "operator",
    "string",
];

/// Result of scanning one node's code.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanReport {
    /// Syntax / function-shape failures. Any entry makes the DAG
    /// critically broken.
    pub parse_errors: Vec<String>,
    /// Forbidden-construct findings.
    pub violations: Vec<String>,
    /// Declared parameter names of the function, in order.
    pub params: Vec<String>,
}

impl ScanReport {
    pub fn is_clean(&self) -> bool {
        self.parse_errors.is_empty() && self.violations.is_empty()
    }
}

/// Scan one node's code against the declared function name.
pub fn scan_node_code(code: &str, function_name: &str) -> ScanReport {
    let mut report = ScanReport::default();
    parse_pass(code, function_name, &mut report);
    identifier_pass(code, &mut report);
    report
}

fn parse_pass(code: &str, function_name: &str, report: &mut ScanReport) {
    let engine = Engine::new_raw();
    let ast = match engine.compile(code) {
        Ok(ast) => ast,
        Err(err) => {
            report.parse_errors.push(format!("code does not parse: {err}"));
            return;
        }
    };

    let functions: Vec<_> = ast.iter_functions().collect();
    match functions.as_slice() {
        [] => report
            .parse_errors
            .push("code must define exactly one function, found none".to_string()),
        [single] => {
            if single.name != function_name {
                report.parse_errors.push(format!(
                    "function is named {} but node declares function_name {}",
                    single.name, function_name
                ));
            }
            report.params = single.params.iter().map(|p| p.to_string()).collect();
        }
        many => report.parse_errors.push(format!(
            "code must define exactly one function, found {}",
            many.len()
        )),
    }

    // Anything outside the fn body would run at eval time; the executor
    // invokes with eval_ast disabled, but flag it here so the builder hears
    // about it.
    if let Some(first) = strip_comments(code)
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
    {
        if !first.starts_with("fn ") && !first.starts_with("fn(") && !first.starts_with("private ")
        {
            report
                .parse_errors
                .push("code must be a single function definition".to_string());
        }
    }
}

fn identifier_pass(code: &str, report: &mut ScanReport) {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    static MODULE_REF: OnceLock<Regex> = OnceLock::new();
    let ident_re =
        IDENT.get_or_init(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").expect("static regex"));
    let module_re = MODULE_REF
        .get_or_init(|| Regex::new(r"([A-Za-z_][A-Za-z0-9_]*)\s*::").expect("static regex"));

    let stripped = strip_comments(code);
    for (idx, line) in stripped.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = line.trim_start();

        if trimmed.starts_with("import ") || trimmed.starts_with("import\"")
            || trimmed == "import"
        {
            report
                .violations
                .push(format!("import statement on line {line_no}"));
        }
        if trimmed.starts_with("export ") || trimmed == "export" {
            report
                .violations
                .push(format!("export statement on line {line_no}"));
        }

        for m in ident_re.find_iter(line) {
            let name = m.as_str();
            if name.starts_with("__import__") {
                report
                    .violations
                    .push(format!("reference to {name} on line {line_no}"));
                continue;
            }
            if name.len() >= 4 && name.starts_with("__") && name.ends_with("__") {
                report
                    .violations
                    .push(format!("dunder identifier {name} on line {line_no}"));
                continue;
            }
            if FORBIDDEN_CALLS.contains(&name) && is_call_site(line, m.end()) {
                report
                    .violations
                    .push(format!("call to forbidden name {name} on line {line_no}"));
            }
        }

        for caps in module_re.captures_iter(line) {
            let module = &caps[1];
            if !SAFE_MODULES.contains(&module) {
                report.violations.push(format!(
                    "reference to module {module} outside the safe list on line {line_no}"
                ));
            }
        }
    }
}

/// Whether the identifier ending at byte offset `end` is followed by an
/// opening parenthesis (i.e. used as a call target).
fn is_call_site(line: &str, end: usize) -> bool {
    line[end..].trim_start().starts_with('(')
}

/// Remove `//` line comments and `/* */` block comments. String literals are
/// not tracked; the scan is deliberately conservative.
fn strip_comments(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    let mut chars = code.chars().peekable();
    let mut in_block = false;
    while let Some(c) = chars.next() {
        if in_block {
            if c == '*' && chars.peek() == Some(&'/') {
                chars.next();
                in_block = false;
            } else if c == '\n' {
                out.push('\n');
            }
            continue;
        }
        if c == '/' {
            match chars.peek() {
                Some('/') => {
                    for skipped in chars.by_ref() {
                        if skipped == '\n' {
                            out.push('\n');
                            break;
                        }
                    }
                    continue;
                }
                Some('*') => {
                    chars.next();
                    in_block = true;
                    continue;
                }
                _ => {}
            }
        }
        out.push(c);
    }
    out
}
