//! Log redaction. Raw credentials must never reach a log line: keys are
//! masked to their first and last four characters, and any header or param
//! whose name suggests a secret is replaced wholesale.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

static SENSITIVE_PARAM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(password|token|secret|key)").unwrap());

/// Headers stripped before a request is logged.
const SENSITIVE_HEADERS: [&str; 3] = ["authorization", "x-api-key", "cookie"];

const REDACTED: &str = "[REDACTED]";

/// Mask an API key for display: first four and last four characters.
/// Short keys are fully masked.
pub fn mask_key(key: &str) -> String {
    if key.len() <= 8 {
        return "********".to_string();
    }
    format!("{}...{}", &key[..4], &key[key.len() - 4..])
}

/// Replace sensitive header values. Header names compare case-insensitively.
pub fn redact_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let lowered = name.to_lowercase();
            if SENSITIVE_HEADERS.contains(&lowered.as_str()) {
                (name.clone(), REDACTED.to_string())
            } else {
                (name.clone(), value.clone())
            }
        })
        .collect()
}

/// Replace values of params whose name contains password/token/secret/key.
pub fn redact_params(params: &HashMap<String, String>) -> HashMap<String, String> {
    params
        .iter()
        .map(|(name, value)| {
            if SENSITIVE_PARAM_RE.is_match(name) {
                (name.clone(), REDACTED.to_string())
            } else {
                (name.clone(), value.clone())
            }
        })
        .collect()
}
