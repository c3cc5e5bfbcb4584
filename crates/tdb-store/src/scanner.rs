use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use tdb_core::{Result, ScannedFile};
use walkdir::WalkDir;

/// One classification rule: a path regex, the file type it assigns, and an
/// optional extra predicate for cases a single regex can't express (spec
/// DESIGN NOTES: "Dynamic dispatch over file type should be a data table,
/// not a chain of if/else").
struct TypeRule {
    pattern: &'static str,
    file_type: &'static str,
    extra: Option<fn(&str) -> bool>,
}

const SKIP_DIRS: &[&str] = &[
    "node_modules", ".git", "venv", "__pycache__", "dist", "build",
    ".direnv", ".next", "target", ".pytest_cache", "coverage", ".venv", "env",
    ".templedb",
];

// Order matters: earlier, more specific rules take precedence (mirrors the
// ordering contract of the pattern table this is grounded on).
const TYPE_RULES: &[TypeRule] = &[
    TypeRule { pattern: r"schema\.sql$", file_type: "sql_schema", extra: None },
    TypeRule { pattern: r"\.sql$", file_type: "sql_migration", extra: Some(|p| p.to_lowercase().contains("migration")) },
    TypeRule { pattern: r"\.sql$", file_type: "sql_file", extra: None },
    TypeRule { pattern: r"\.jsx$", file_type: "jsx_component", extra: None },
    TypeRule { pattern: r"\.tsx$", file_type: "tsx_component", extra: None },
    TypeRule { pattern: r"\.test\.(ts|js)$", file_type: "test_file", extra: None },
    TypeRule { pattern: r"\.spec\.(ts|js)$", file_type: "spec_file", extra: None },
    TypeRule { pattern: r"\.ts$", file_type: "typescript", extra: Some(|p| !p.contains("supabase/functions")) },
    TypeRule { pattern: r"\.m?js$", file_type: "javascript", extra: None },
    TypeRule { pattern: r"\.gitignore$", file_type: "git_ignore", extra: None },
    TypeRule { pattern: r"\.editorconfig$", file_type: "editor_config", extra: None },
    TypeRule { pattern: r"\.rs$", file_type: "rust", extra: None },
    TypeRule { pattern: r"\.go$", file_type: "go", extra: None },
    TypeRule { pattern: r"\.rb$", file_type: "ruby", extra: None },
    TypeRule { pattern: r"\.java$", file_type: "java", extra: None },
    TypeRule { pattern: r"\.kt$", file_type: "kotlin", extra: None },
    TypeRule { pattern: r"\.swift$", file_type: "swift", extra: None },
    TypeRule { pattern: r"\.c$", file_type: "c", extra: None },
    TypeRule { pattern: r"\.cpp$", file_type: "cpp", extra: None },
    TypeRule { pattern: r"\.cs$", file_type: "csharp", extra: None },
    TypeRule { pattern: r"\.php$", file_type: "php", extra: None },
    TypeRule { pattern: r"requirements\.txt$", file_type: "pip_requirements", extra: None },
    TypeRule { pattern: r"pyproject\.toml$", file_type: "poetry_config", extra: None },
    TypeRule { pattern: r"Cargo\.toml$", file_type: "cargo_toml", extra: None },
    TypeRule { pattern: r"Cargo\.lock$", file_type: "cargo_lock", extra: None },
    TypeRule { pattern: r"go\.mod$", file_type: "go_mod", extra: None },
    TypeRule { pattern: r"package\.json$", file_type: "package_json", extra: None },
    TypeRule { pattern: r"Makefile$", file_type: "makefile", extra: None },
    TypeRule { pattern: r"Dockerfile$", file_type: "docker_file", extra: None },
    TypeRule { pattern: r"docker-compose\.ya?ml$", file_type: "docker_compose", extra: None },
    TypeRule { pattern: r"README\.md$", file_type: "markdown", extra: None },
    TypeRule { pattern: r"CHANGELOG\.md$", file_type: "changelog", extra: None },
    TypeRule { pattern: r"LICENSE$", file_type: "license", extra: None },
    TypeRule { pattern: r"\.ya?ml$", file_type: "config_yaml", extra: None },
    TypeRule { pattern: r"\.json$", file_type: "config_json", extra: None },
    TypeRule { pattern: r"\.toml$", file_type: "config_toml", extra: None },
    TypeRule { pattern: r"\.sh$", file_type: "shell_script", extra: None },
    TypeRule { pattern: r"\.py$", file_type: "python", extra: None },
    TypeRule { pattern: r"\.css$", file_type: "css", extra: None },
    TypeRule { pattern: r"\.html?$", file_type: "html", extra: None },
    TypeRule { pattern: r"\.md$", file_type: "markdown", extra: None },
];

fn compiled_rules() -> &'static Vec<(Regex, &'static str, Option<fn(&str) -> bool>)> {
    static CELL: OnceLock<Vec<(Regex, &'static str, Option<fn(&str) -> bool>)>> = OnceLock::new();
    CELL.get_or_init(|| {
        TYPE_RULES
            .iter()
            .map(|r| (Regex::new(r.pattern).expect("static pattern is valid regex"), r.file_type, r.extra))
            .collect()
    })
}

/// Classifies a relative path into a file type, or `None` if it should not
/// be tracked (spec §4.3, "C3").
pub fn classify(relative_path: &str) -> Option<&'static str> {
    for (re, file_type, extra) in compiled_rules() {
        if re.is_match(relative_path) {
            if let Some(test) = extra {
                if !test(relative_path) {
                    continue;
                }
            }
            return Some(file_type);
        }
    }
    None
}

fn component_name_patterns(ext: &str) -> &'static [&'static str] {
    match ext {
        "jsx" | "tsx" | "ts" | "js" | "cjs" | "mjs" => &[
            r"export\s+(?:default\s+)?(?:function|const)\s+(\w+)",
            r"function\s+(\w+)",
            r"export\s+default\s+(\w+)",
        ],
        "py" => &[r"class\s+(\w+)", r"def\s+(\w+)"],
        "rs" => &[r"pub\s+fn\s+(\w+)", r"fn\s+(\w+)", r"pub\s+struct\s+(\w+)", r"struct\s+(\w+)"],
        "go" => &[r"func\s+(\w+)", r"type\s+(\w+)"],
        "rb" => &[r"class\s+(\w+)", r"module\s+(\w+)", r"def\s+(\w+)"],
        _ => &[],
    }
}

/// Extracts a best-guess component/function name from file content, falling
/// back to the file stem.
pub fn extract_component_name(path: &Path, content: &str) -> String {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("unknown").to_string();
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    for pattern in component_name_patterns(ext) {
        if let Ok(re) = Regex::new(pattern) {
            if let Some(caps) = re.captures(content) {
                if let Some(m) = caps.get(1) {
                    return m.as_str().to_string();
                }
            }
        }
    }

    stem
}

/// Recursively scans `root`, classifying and reading every tracked file.
/// Files that fail to decode as UTF-8 are still kept — `file_type` still
/// applies, but `component_name` falls back to the file stem and no
/// component-name regex is run against the raw bytes (spec §4.3).
pub fn scan_directory(root: &Path) -> Result<Vec<ScannedFile>> {
    let mut out = Vec::new();

    for entry in WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| {
            e.file_type().is_file()
                || !e
                    .file_name()
                    .to_str()
                    .map(|n| SKIP_DIRS.contains(&n))
                    .unwrap_or(false)
        })
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let absolute_path = entry.path().to_path_buf();
        let relative_path = match absolute_path.strip_prefix(root) {
            Ok(p) => p.to_string_lossy().replace('\\', "/"),
            Err(_) => continue,
        };

        let Some(file_type) = classify(&relative_path) else { continue };

        let bytes = match std::fs::read(&absolute_path) {
            Ok(b) => b,
            Err(_) => continue,
        };

        let file_name = entry.file_name().to_string_lossy().to_string();
        let (component_name, lines_of_code) = match std::str::from_utf8(&bytes) {
            Ok(content) => (Some(extract_component_name(&absolute_path, content)), content.lines().count() as u32),
            Err(_) => {
                let stem = absolute_path.file_stem().and_then(|s| s.to_str()).unwrap_or("unknown").to_string();
                (Some(stem), bytes.iter().filter(|&&b| b == b'\n').count() as u32)
            }
        };

        out.push(ScannedFile {
            absolute_path,
            relative_path,
            file_name,
            file_type: file_type.to_string(),
            component_name,
            lines_of_code,
        });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_rust_file() {
        assert_eq!(classify("src/main.rs"), Some("rust"));
    }

    #[test]
    fn classify_prefers_schema_sql_over_generic_sql() {
        assert_eq!(classify("db/schema.sql"), Some("sql_schema"));
        assert_eq!(classify("db/002_migration.sql"), Some("sql_migration"));
        assert_eq!(classify("db/seed.sql"), Some("sql_file"));
    }

    #[test]
    fn classify_unrecognized_extension_returns_none() {
        assert_eq!(classify("bin/payload.wasm"), None);
    }

    #[test]
    fn scan_directory_skips_target_and_reads_rust_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("target")).unwrap();
        std::fs::write(dir.path().join("target/should_skip.rs"), "fn skip() {}").unwrap();
        std::fs::write(dir.path().join("lib.rs"), "pub fn hello() {}\n").unwrap();

        let files = scan_directory(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, "lib.rs");
        assert_eq!(files[0].component_name.as_deref(), Some("hello"));
    }

    #[test]
    fn scan_directory_keeps_non_utf8_files_with_stem_component_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("logo.css"), [0xff, 0xfe, 0x00, 0x01, b'\n', 0x02]).unwrap();

        let files = scan_directory(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, "logo.css");
        assert_eq!(files[0].component_name.as_deref(), Some("logo"));
    }
}
