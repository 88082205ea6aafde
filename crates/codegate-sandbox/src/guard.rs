//! Pre-execution guard for submitted code.
//!
//! The isolate is the real boundary. These checks turn the common escape
//! attempts into a readable rejection before any JavaScript runs.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::SandboxError;

/// Maximum code size in bytes (64 KB).
pub const DEFAULT_MAX_CODE_SIZE: usize = 64 * 1024;

/// Banned constructs as `(label, pattern)`.
///
/// Whitespace-tolerant so `eval (x)` and `Deno . core` are caught too.
static BANNED: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("Deno.", r"\bDeno\s*\."),
        ("require(", r"\brequire\s*\("),
        ("import(", r"\bimport\s*\("),
        ("eval(", r"\beval\s*\("),
        ("__proto__", r"__proto__"),
        ("constructor.constructor", r"\bconstructor\s*\.\s*constructor\b"),
    ]
    .into_iter()
    .map(|(label, pattern)| (label, Regex::new(pattern).unwrap()))
    .collect()
});

/// Checks `code` before it is handed to an engine.
///
/// `max_size` defaults to [`DEFAULT_MAX_CODE_SIZE`].
pub fn check_code(code: &str, max_size: Option<usize>) -> Result<(), SandboxError> {
    let max = max_size.unwrap_or(DEFAULT_MAX_CODE_SIZE);
    if code.len() > max {
        return Err(SandboxError::CodeTooLarge {
            max,
            actual: code.len(),
        });
    }

    if code.trim().is_empty() {
        return Err(SandboxError::Rejected {
            reason: "code is empty".into(),
        });
    }

    if let Some((label, _)) = BANNED.iter().find(|(_, re)| re.is_match(code)) {
        return Err(SandboxError::BannedPattern {
            pattern: (*label).to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn banned(code: &str) -> String {
        match check_code(code, None) {
            Err(SandboxError::BannedPattern { pattern }) => pattern,
            other => panic!("expected banned pattern, got {other:?}"),
        }
    }

    #[test]
    fn accepts_tool_code() {
        let code = r#"const r = await tools.search({ q: "x" });
console.log(r.items.length);"#;
        assert!(check_code(code, None).is_ok());
    }

    #[test]
    fn rejects_empty_code() {
        assert!(matches!(
            check_code("  \n\t", None),
            Err(SandboxError::Rejected { .. })
        ));
    }

    #[test]
    fn rejects_oversized_code() {
        let big = "x".repeat(2_000);
        let err = check_code(&big, Some(1_000)).unwrap_err();
        assert!(matches!(
            err,
            SandboxError::CodeTooLarge {
                max: 1_000,
                actual: 2_000
            }
        ));
    }

    #[test]
    fn catches_spaced_escapes() {
        assert_eq!(banned("eval ('1')"), "eval(");
        assert_eq!(banned("Deno . core.ops"), "Deno.");
        assert_eq!(banned("await import ('fs')"), "import(");
        assert_eq!(banned("const fs = require('fs')"), "require(");
        assert_eq!(banned("({}).__proto__.x = 1"), "__proto__");
        assert_eq!(banned("f.constructor. constructor('x')"), "constructor.constructor");
    }

    #[test]
    fn ignores_lookalike_identifiers() {
        assert!(check_code("const medieval = retrieval(1);", None).is_ok());
        assert!(check_code("const Denotation = 1; reimport(x);", None).is_ok());
    }
}
