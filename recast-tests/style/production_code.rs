//! Production Code Enforcement
//!
//! Library and binary sources propagate errors instead of panicking and carry
//! no dead code allowances. Unit test modules and test-only files are exempt.

use std::fs;
use std::path::{Path, PathBuf};

const CHECKED_CRATES: [&str; 3] = ["recast-core", "recast-sim", "recast-cli"];

const FORBIDDEN: [(&str, &str); 3] = [
    (".unwrap()", "unwrap in production code"),
    (".expect(", "expect in production code"),
    ("allow(dead_code)", "dead code allowance"),
];

#[derive(Debug)]
struct Violation {
    file_path: String,
    line_number: usize,
    rule: &'static str,
    context: String,
}

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(".."))
}

fn find_rust_files(dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            find_rust_files(&path, files)?;
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            files.push(path);
        }
    }
    Ok(())
}

/// Files compiled only under `#[cfg(test)]`
fn is_test_file(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy())
        .is_some_and(|name| name.starts_with("test_") || name == "tests.rs")
}

/// Lines before the file's unit test module, comments removed.
fn production_lines(content: &str) -> Vec<(usize, &str)> {
    let lines: Vec<&str> = content.lines().collect();
    let mut result = Vec::new();

    for (index, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        if trimmed == "#[cfg(test)]"
            && lines[index + 1..]
                .iter()
                .map(|next| next.trim())
                .find(|next| !next.is_empty())
                .is_some_and(|next| next.starts_with("mod tests"))
        {
            break;
        }
        if trimmed.starts_with("//") {
            continue;
        }
        result.push((index + 1, *line));
    }
    result
}

fn check_file(path: &Path, violations: &mut Vec<Violation>) -> std::io::Result<()> {
    let content = fs::read_to_string(path)?;
    for (line_number, line) in production_lines(&content) {
        for (pattern, rule) in FORBIDDEN {
            if line.contains(pattern) {
                violations.push(Violation {
                    file_path: path.display().to_string(),
                    line_number,
                    rule,
                    context: line.trim().to_string(),
                });
            }
        }
    }
    Ok(())
}

#[test]
fn test_production_code_has_no_panicking_shortcuts() {
    let root = workspace_root();
    let mut files = Vec::new();
    for krate in CHECKED_CRATES {
        find_rust_files(&root.join(krate).join("src"), &mut files).unwrap();
    }
    assert!(!files.is_empty(), "no sources found under {}", root.display());

    let mut violations = Vec::new();
    for file in files.iter().filter(|file| !is_test_file(file)) {
        check_file(file, &mut violations).unwrap();
    }

    if !violations.is_empty() {
        for violation in &violations {
            eprintln!(
                "{}:{}: {}: {}",
                violation.file_path, violation.line_number, violation.rule, violation.context
            );
        }
        panic!("{} style violations found", violations.len());
    }
}

#[test]
fn test_unit_test_module_is_exempt() {
    let source = "fn run() -> Result<(), E> {\n    step()?;\n}\n\n#[cfg(test)]\nmod tests {\n    fn t() { run().unwrap(); }\n}\n";
    let lines = production_lines(source);
    assert_eq!(lines.len(), 4);
    assert!(lines.iter().all(|(_, line)| !line.contains("unwrap")));
}

#[test]
fn test_cfg_test_declarations_do_not_end_the_scan() {
    let source = "#[cfg(test)]\npub mod test_backend;\n\nfn open() { file.unwrap(); }\n";
    let lines = production_lines(source);
    assert!(lines.iter().any(|(number, line)| *number == 4 && line.contains("unwrap")));
}
