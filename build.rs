use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Source-policy checks run before every build. Each rule is a line regex plus
// a filter that decides whether a matching line is really a violation.

const FORBIDDEN_WORDS: [&str; 14] = [
    "FIXED",
    "CORRECTED",
    "FIX",
    "FIXES",
    "NEW",
    "CHANGED",
    "CHANGES",
    "CHANGE",
    "MODIFIED",
    "MODIFIES",
    "MODIFY",
    "UPDATED",
    "UPDATES",
    "UPDATE",
];

struct Rule {
    title: &'static str,
    pattern: &'static str,
    include_build_script: bool,
    is_violation: fn(&str) -> bool,
    advice: &'static str,
}

// Collects every violating line of one file.
struct ViolationCollector {
    violations: Vec<String>,
    is_violation: fn(&str) -> bool,
}

impl Sink for ViolationCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if (self.is_violation)(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn is_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("//") || line.contains("/*")
}

fn is_doc_comment(line: &str) -> bool {
    line.trim_start().starts_with("///")
}

// A match inside a string literal or a comment is not an identifier.
fn is_underscore_identifier(line: &str) -> bool {
    if line.trim_start().starts_with("//") || line.contains("/*") {
        return false;
    }
    let in_string = line
        .split('"')
        .enumerate()
        .any(|(idx, part)| idx % 2 == 1 && part.contains('_'));
    !in_string
}

fn has_forbidden_word(line: &str) -> bool {
    FORBIDDEN_WORDS.iter().any(|word| line.contains(word))
}

// Bold markers are only allowed in outer doc comments.
fn has_stars_outside_doc_comment(line: &str) -> bool {
    !is_doc_comment(line) || has_forbidden_word(line)
}

fn is_all_caps_comment(line: &str) -> bool {
    if !is_comment(line) {
        return false;
    }
    let trimmed = line.trim_start();
    let comment_text = if let Some(rest) = trimmed.strip_prefix("///") {
        rest.trim()
    } else if let Some(rest) = trimmed.strip_prefix("//") {
        rest.trim()
    } else if let Some(idx) = line.find("/*") {
        let rest = &line[idx + 2..];
        rest.find("*/").map_or(rest, |end| &rest[..end]).trim()
    } else {
        return false;
    };
    let mut letters = comment_text.chars().filter(|c| c.is_alphabetic()).peekable();
    letters.peek().is_some() && letters.all(char::is_uppercase)
}

fn any_match(_: &str) -> bool {
    true
}

const RULES: [Rule; 5] = [
    Rule {
        title: "underscore-prefixed variables",
        pattern: r"\b(_[a-zA-Z0-9_]+)\b",
        include_build_script: true,
        is_violation: is_underscore_identifier,
        advice: "Underscore-prefixed variable names are not allowed. Use the variable or remove it.",
    },
    Rule {
        title: "forbidden comment words",
        pattern: r"(//|/\*).*(?:FIXED|CORRECTED|FIX|FIXES|NEW|CHANGED|CHANGES|CHANGE|MODIFIED|MODIFIES|MODIFY|UPDATED|UPDATES|UPDATE)",
        include_build_script: false,
        is_violation: any_match,
        advice: "Comments must describe the code, not its history. Remove them.",
    },
    Rule {
        title: "'**' in non-doc comments",
        pattern: r"(//|/\*).*\*\*",
        include_build_script: false,
        is_violation: has_stars_outside_doc_comment,
        advice: "The '**' pattern is only allowed in doc comments.",
    },
    Rule {
        title: "all-uppercase comments",
        pattern: r"(//|/\*).*",
        include_build_script: false,
        is_violation: is_all_caps_comment,
        advice: "Comments where every letter is uppercase are not allowed.",
    },
    Rule {
        title: "#[allow(dead_code)] attributes",
        pattern: r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]",
        include_build_script: false,
        is_violation: any_match,
        advice: "Use the code or remove it. Silencing the lint is not allowed.",
    },
];

fn rust_sources() -> Vec<PathBuf> {
    WalkDir::new(".")
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| !e.path().starts_with("./target"))
        .filter(|e| !e.path().starts_with("./examples"))
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
        .collect()
}

fn check_rule(rule: &Rule, sources: &[PathBuf]) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(rule.pattern)?;
    let mut searcher = Searcher::new();

    for path in sources {
        if !rule.include_build_script && path.file_name().is_some_and(|name| name == "build.rs") {
            continue;
        }
        let mut collector = ViolationCollector {
            violations: Vec::new(),
            is_violation: rule.is_violation,
        };
        searcher.search_path(&matcher, path, &mut collector)?;
        if !collector.violations.is_empty() {
            return Err(format_violations(rule, path, &collector.violations).into());
        }
    }
    Ok(())
}

fn format_violations(rule: &Rule, path: &Path, violations: &[String]) -> String {
    let mut message = format!(
        "\n❌ ERROR: Found {} {} in {}:\n",
        violations.len(),
        rule.title,
        path.display()
    );
    for violation in violations {
        message.push_str(&format!("   {violation}\n"));
    }
    message.push_str(&format!("\n⚠️ {}\n", rule.advice));
    message
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=score");
    println!("cargo:rerun-if-changed=cli");
    println!("cargo:rerun-if-changed=tests");

    let sources = rust_sources();
    for rule in &RULES {
        if let Err(e) = check_rule(rule, &sources) {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
