//! Lines-of-code counting: blank lines and comments are excluded, using a
//! simple two-state machine (in-block-comment / not) plus a per-extension
//! single-line-comment pattern. Unreadable files are silently skipped.

use std::path::PathBuf;

struct CommentSyntax {
    line: &'static str,
    block_start: &'static str,
    block_end: &'static str,
}

const HASH_COMMENTS: CommentSyntax = CommentSyntax {
    line: "#",
    block_start: "",
    block_end: "",
};
const SLASH_COMMENTS: CommentSyntax = CommentSyntax {
    line: "//",
    block_start: "/*",
    block_end: "*/",
};
const HTML_COMMENTS: CommentSyntax = CommentSyntax {
    line: "",
    block_start: "<!--",
    block_end: "-->",
};
const NO_COMMENTS: CommentSyntax = CommentSyntax {
    line: "",
    block_start: "",
    block_end: "",
};

fn syntax_for_extension(ext: &str) -> &'static CommentSyntax {
    match ext {
        "py" | "rb" | "sh" | "yaml" | "yml" | "toml" => &HASH_COMMENTS,
        "rs" | "ts" | "tsx" | "js" | "jsx" | "go" | "java" | "c" | "cpp" | "h" | "hpp" | "cs"
        | "kt" | "swift" | "scala" | "php" => &SLASH_COMMENTS,
        "html" | "xml" | "md" => &HTML_COMMENTS,
        _ => &NO_COMMENTS,
    }
}

pub fn language_for_extension(ext: &str) -> Option<&'static str> {
    Some(match ext {
        "rs" => "Rust",
        "ts" | "tsx" => "TypeScript",
        "js" | "jsx" => "JavaScript",
        "py" => "Python",
        "go" => "Go",
        "java" => "Java",
        "rb" => "Ruby",
        "php" => "PHP",
        "cs" => "C#",
        "c" => "C",
        "cpp" | "hpp" => "C++",
        "h" => "C",
        "kt" => "Kotlin",
        "swift" => "Swift",
        "dart" => "Dart",
        "scala" => "Scala",
        "ex" | "exs" => "Elixir",
        _ => return None,
    })
}

/// Count lines of code across every file, grouped by extension. Extensions
/// without a recognized comment syntax are counted as raw non-blank lines.
pub fn count_lines_of_code(files: &[(String, PathBuf)]) -> i64 {
    let mut total = 0i64;
    for (ext, path) in files {
        let Ok(contents) = std::fs::read_to_string(path) else {
            continue;
        };
        total += count_file(&contents, syntax_for_extension(ext));
    }
    total
}

fn count_file(contents: &str, syntax: &CommentSyntax) -> i64 {
    let mut count = 0i64;
    let mut in_block_comment = false;

    for raw_line in contents.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        if in_block_comment {
            if !syntax.block_end.is_empty() {
                if let Some(pos) = line.find(syntax.block_end) {
                    in_block_comment = false;
                    let rest = line[pos + syntax.block_end.len()..].trim();
                    if rest.is_empty() {
                        continue;
                    }
                } else {
                    continue;
                }
            } else {
                continue;
            }
        }

        if !syntax.block_start.is_empty() && line.starts_with(syntax.block_start) {
            if let Some(end_pos) = line[syntax.block_start.len()..].find(syntax.block_end) {
                let _ = end_pos;
                // Opens and closes on the same line — still counts as code
                // only if something follows the closing marker.
            } else {
                in_block_comment = true;
                continue;
            }
        }

        if !syntax.line.is_empty() && line.starts_with(syntax.line) {
            continue;
        }

        count += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_rust_excluding_comments_and_blanks() {
        let src = "fn main() {\n    // a comment\n\n    let x = 1;\n}\n";
        assert_eq!(count_file(src, &SLASH_COMMENTS), 3);
    }

    #[test]
    fn counts_through_block_comments() {
        let src = "code();\n/*\nblock comment\nspanning lines\n*/\nmore();\n";
        assert_eq!(count_file(src, &SLASH_COMMENTS), 2);
    }

    #[test]
    fn counts_python_hash_comments() {
        let src = "import os\n# a comment\nprint('hi')\n";
        assert_eq!(count_file(src, &HASH_COMMENTS), 2);
    }

    #[test]
    fn language_mapping_known_extensions() {
        assert_eq!(language_for_extension("rs"), Some("Rust"));
        assert_eq!(language_for_extension("py"), Some("Python"));
        assert_eq!(language_for_extension("unknown_ext"), None);
    }
}
