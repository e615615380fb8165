use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Directories holding the crate's own sources. Anything else under the
// package root (vendored reference material, target/) is not scanned.
const SOURCE_DIRS: &[&str] = &["recover", "shared", "deriv", "cli", "tests", "benches"];

const FORBIDDEN_WORDS: &[&str] = &[
    "FIXED", "CORRECTED", "FIXES", "FIX", "NEW", "CHANGED", "CHANGES", "CHANGE", "MODIFIED",
    "MODIFIES", "MODIFY", "UPDATED", "UPDATES", "UPDATE",
];

// One source-hygiene rule: a line regex plus a filter deciding whether a
// matching line really is a violation.
struct Rule {
    pattern: &'static str,
    is_violation: fn(&str) -> bool,
    summary: &'static str,
    advice: &'static str,
}

struct RuleCollector<'a> {
    rule: &'a Rule,
    file_path: PathBuf,
    violations: Vec<String>,
}

impl<'a> RuleCollector<'a> {
    fn new(rule: &'a Rule, file_path: &Path) -> Self {
        Self {
            rule,
            file_path: file_path.to_path_buf(),
            violations: Vec::new(),
        }
    }

    fn error_message(&self) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }

        let mut error_msg = format!(
            "\n❌ ERROR: Found {} {} in {}:\n",
            self.violations.len(),
            self.rule.summary,
            self.file_path.display()
        );
        for violation in &self.violations {
            error_msg.push_str(&format!("   {violation}\n"));
        }
        error_msg.push_str(&format!("\n⚠️ {}\n", self.rule.advice));
        Some(error_msg)
    }
}

impl Sink for RuleCollector<'_> {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();

        if (self.rule.is_violation)(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn is_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("//") || trimmed.starts_with("/*")
}

fn is_doc_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("///") || trimmed.starts_with("//!")
}

// Text after the first comment opener on the line, if any.
fn comment_text(line: &str) -> Option<&str> {
    let start = line.find("//").or_else(|| line.find("/*"))?;
    let text = line[start..].trim_start_matches(['/', '*', '!']);
    Some(text.trim_end_matches("*/").trim())
}

// Odd-numbered segments between double quotes are string contents.
fn inside_string_literal(line: &str) -> bool {
    line.split('"')
        .enumerate()
        .any(|(i, part)| i % 2 == 1 && part.contains('_'))
}

fn underscore_binding(line: &str) -> bool {
    !is_comment(line) && !inside_string_literal(line)
}

fn forbidden_word(line: &str) -> bool {
    comment_text(line).is_some_and(|text| {
        text.split(|c: char| !c.is_ascii_alphabetic())
            .any(|word| FORBIDDEN_WORDS.contains(&word))
    })
}

fn stars_in_plain_comment(line: &str) -> bool {
    is_comment(line) && !is_doc_comment(line)
}

fn shouting_comment(line: &str) -> bool {
    comment_text(line).is_some_and(|text| {
        let mut letters = text.chars().filter(|c| c.is_alphabetic()).peekable();
        letters.peek().is_some() && letters.all(char::is_uppercase)
    })
}

fn always(_: &str) -> bool {
    true
}

const RULES: &[Rule] = &[
    Rule {
        pattern: r"\b(_[a-zA-Z0-9_]+)\b",
        is_violation: underscore_binding,
        summary: "underscore-prefixed variables",
        advice: "Underscore-prefixed variable names are not allowed. Use the variable or remove it.",
    },
    Rule {
        pattern: r"(//|/\*)",
        is_violation: forbidden_word,
        summary: "forbidden comment words",
        advice: "Comments narrating edits (fix, new, change, modify, update in capitals) are not allowed.",
    },
    Rule {
        pattern: r"(//|/\*).*\*\*",
        is_violation: stars_in_plain_comment,
        summary: "'**' markers in plain comments",
        advice: "The '**' pattern is only allowed in doc comments.",
    },
    Rule {
        pattern: r"(//|/\*)",
        is_violation: shouting_comment,
        summary: "all-uppercase comments",
        advice: "Comments whose letters are all uppercase are not allowed.",
    },
    Rule {
        pattern: r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]",
        is_violation: always,
        summary: "#[allow(dead_code)] attributes",
        advice: "Use the code or delete it; silencing dead code is not allowed.",
    },
];

fn source_files() -> Vec<PathBuf> {
    SOURCE_DIRS
        .iter()
        .filter(|dir| Path::new(dir).is_dir())
        .flat_map(|dir| WalkDir::new(dir).into_iter().filter_map(|e| e.ok()))
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
        .collect()
}

fn scan(files: &[PathBuf]) -> Result<(), Box<dyn Error>> {
    let mut searcher = Searcher::new();
    for rule in RULES {
        let matcher = RegexMatcher::new_line_matcher(rule.pattern)?;
        for path in files {
            let mut collector = RuleCollector::new(rule, path);
            searcher.search_path(&matcher, path, &mut collector)?;
            if let Some(error_message) = collector.error_message() {
                return Err(error_message.into());
            }
        }
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for dir in SOURCE_DIRS {
        if Path::new(dir).is_dir() {
            println!("cargo:rerun-if-changed={dir}");
        }
    }

    if let Err(e) = scan(&source_files()) {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
