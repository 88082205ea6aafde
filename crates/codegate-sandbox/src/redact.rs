//! Scrubbing of tool failure text before it is raised inside the isolate.
//!
//! Submitted code only needs to know *that* a call failed and roughly why.
//! Hostnames, addresses, local paths, credentials and upstream stack frames
//! stay on the host.

use std::sync::LazyLock;

use codegate_error::BridgeError;
use regex::Regex;

/// Replacement rules, applied in order. Credentials go first because they
/// may themselves contain URLs.
static RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (
            r"-----BEGIN[A-Z\s]+PRIVATE KEY-----[\s\S]*?-----END[A-Z\s]+PRIVATE KEY-----",
            "[REDACTED]",
        ),
        (r"eyJ[\w-]+\.eyJ[\w-]+\.[\w-]+", "[REDACTED]"),
        (r"(?:AKIA|ASIA)[0-9A-Z]{16}", "[REDACTED]"),
        (r"(?:ghp_|gho_|ghs_|github_pat_)\w{20,}", "[REDACTED]"),
        (
            r"(?i)(?:Bearer\s+\S+|(?:api_key|token|password|secret)\s*=\s*[^\s&]+)",
            "[REDACTED]",
        ),
        (r#"[a-z][a-z0-9+.-]*://[^\s'")\]}>]+"#, "[url]"),
        (r"\b\d{1,3}(?:\.\d{1,3}){3}(?::\d+)?\b", "[addr]"),
        (r"\b[A-Z]:\\[\w.\\-]+", "[path]"),
        (
            r"/(?:home|Users|etc|var|tmp|opt|usr|root|mnt|srv|proc|run|nix)(?:/[\w.-]+)+",
            "[path]",
        ),
    ]
    .into_iter()
    .map(|(pattern, replacement)| (Regex::new(pattern).unwrap(), replacement))
    .collect()
});

static FRAME_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:at\s+\S.*|Caused by:.*|\.{3}\s*\d+\s*more)$").unwrap()
});

/// Strips sensitive fragments from `message`.
///
/// Stack frame lines are dropped and blank lines collapsed.
pub fn redact_message(message: &str) -> String {
    let mut text = message.to_string();
    for (re, replacement) in RULES.iter() {
        text = re.replace_all(&text, *replacement).into_owned();
    }
    text.lines()
        .filter(|line| !line.trim().is_empty() && !FRAME_LINE.is_match(line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The message raised inside the isolate when the bridge rejects a call.
///
/// Always starts with `tool call '<identifier>' failed:` so runtime errors
/// can be recognised as bridge failures. A suggested fix, such as the
/// closest of the `known` identifiers for an unknown tool, is appended.
pub fn bridge_failure(identifier: &str, err: &BridgeError, known: &[&str]) -> String {
    let detail = match err {
        BridgeError::Upstream { message, .. } => redact_message(message),
        other => redact_message(&other.to_string()),
    };
    let structured = err.to_structured_error(Some(known));
    match structured["suggested_fix"].as_str() {
        Some(fix) => format!("tool call '{identifier}' failed: {detail}. {fix}"),
        None => format!("tool call '{identifier}' failed: {detail}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_urls_and_addresses() {
        let out = redact_message("connect to https://api.internal.corp/v1?key=1 via 10.0.0.12:8443");
        assert_eq!(out, "connect to [url] via [addr]");
    }

    #[test]
    fn strips_credentials_before_urls() {
        let out = redact_message("rejected Bearer abc.def token=s3cr3t&x=1");
        assert!(!out.contains("abc.def"), "{out}");
        assert!(!out.contains("s3cr3t"), "{out}");
        assert_eq!(out.matches("[REDACTED]").count(), 2, "{out}");
    }

    #[test]
    fn strips_paths() {
        assert_eq!(
            redact_message("cannot open /home/ci/.config/app/key.pem"),
            "cannot open [path]"
        );
        assert_eq!(
            redact_message(r"cannot open C:\Users\ci\key.pem"),
            "cannot open [path]"
        );
    }

    #[test]
    fn drops_stack_frames() {
        let out = redact_message(
            "lookup failed\n    at handler (server.js:10:3)\nCaused by: timeout\nretry later",
        );
        assert_eq!(out, "lookup failed\nretry later");
    }

    #[test]
    fn keeps_plain_messages() {
        let msg = "missing required field 'query'";
        assert_eq!(redact_message(msg), msg);
    }

    #[test]
    fn bridge_failure_uses_upstream_message() {
        let err = BridgeError::Upstream {
            tool: "search-music".into(),
            message: "rate limited by http://10.1.1.1/api".into(),
        };
        assert_eq!(
            bridge_failure("search_music", &err, &["search_music"]),
            "tool call 'search_music' failed: rate limited by [url]"
        );
    }

    #[test]
    fn bridge_failure_for_unknown_tool() {
        let err = BridgeError::ToolNotFound {
            tool: "nope".into(),
        };
        assert_eq!(
            bridge_failure("nope", &err, &["search"]),
            "tool call 'nope' failed: unknown tool 'nope'"
        );
    }

    #[test]
    fn bridge_failure_carries_the_suggested_fix() {
        let err = BridgeError::ToolNotFound {
            tool: "serch".into(),
        };
        assert_eq!(
            bridge_failure("serch", &err, &["search", "list"]),
            "tool call 'serch' failed: unknown tool 'serch'. Did you mean 'search'?"
        );

        let err = BridgeError::Timeout {
            tool: "slow".into(),
            timeout_ms: 5000,
        };
        assert_eq!(
            bridge_failure("slow", &err, &[]),
            "tool call 'slow' failed: tool 'slow' timed out after 5000ms. Retry with a simpler operation"
        );
    }
}
