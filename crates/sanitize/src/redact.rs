use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use url::Url;

/// Replacement literal for every redacted value.
pub const REDACTED: &str = "[REDACTED]";

const SENSITIVE_HEADERS: [&str; 6] = [
    "authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "x-auth-token",
    "api-key",
];

const SENSITIVE_QUERY_PARAMS: [&str; 8] = [
    "token",
    "key",
    "auth",
    "session",
    "sig",
    "signature",
    "apikey",
    "api_key",
];

// Exact, case-sensitive: `apiKey` and `api_key` are both listed because the
// wild differs on naming convention, but `ApiKey` is deliberately not matched.
const SENSITIVE_JSON_KEYS: [&str; 10] = [
    "password",
    "token",
    "secret",
    "email",
    "apiKey",
    "api_key",
    "accessToken",
    "access_token",
    "refreshToken",
    "refresh_token",
];

const MAX_REDACT_DEPTH: usize = 64;
const MAX_ERROR_CHARS: usize = 200;

static WINDOWS_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z]:\\\S*").expect("windows path pattern"));
static POSIX_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:/home|/Users|/tmp|/var|/private)/\S*").expect("posix path pattern")
});

/// Replace values of sensitive headers with [`REDACTED`].
///
/// Header names match case-insensitively; key casing is preserved in the
/// output and non-matching entries pass through untouched.
pub fn redact_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            if SENSITIVE_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
                (name.clone(), REDACTED.to_string())
            } else {
                (name.clone(), value.clone())
            }
        })
        .collect()
}

/// Replace values of sensitive query parameters with [`REDACTED`].
///
/// Path, host, port and non-sensitive parameters are left intact; a URL that
/// fails to parse is returned unchanged.
pub fn redact_url(raw: &str) -> String {
    let Ok(mut parsed) = Url::parse(raw) else {
        return raw.to_string();
    };

    let has_sensitive = parsed
        .query_pairs()
        .any(|(name, _)| SENSITIVE_QUERY_PARAMS.contains(&name.to_ascii_lowercase().as_str()));
    if !has_sensitive {
        return raw.to_string();
    }

    let pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(name, value)| {
            if SENSITIVE_QUERY_PARAMS.contains(&name.to_ascii_lowercase().as_str()) {
                (name.into_owned(), REDACTED.to_string())
            } else {
                (name.into_owned(), value.into_owned())
            }
        })
        .collect();

    parsed
        .query_pairs_mut()
        .clear()
        .extend_pairs(pairs.iter().map(|(name, value)| (name.as_str(), value.as_str())));

    parsed.to_string()
}

/// Recursively replace values of sensitive object keys with [`REDACTED`].
///
/// Key matching is exact and case-sensitive. Recursion stops at a hard depth
/// of 64; whatever sits below that boundary is passed through as-is.
pub fn redact_json(value: &Value) -> Value {
    redact_json_at(value, 0)
}

fn redact_json_at(value: &Value, depth: usize) -> Value {
    if depth >= MAX_REDACT_DEPTH {
        return value.clone();
    }
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, child) in map {
                if SENSITIVE_JSON_KEYS.contains(&key.as_str()) {
                    out.insert(key.clone(), Value::String(REDACTED.to_string()));
                } else {
                    out.insert(key.clone(), redact_json_at(child, depth + 1));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| redact_json_at(item, depth + 1))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Truncate an error message to 200 chars and blank out filesystem paths.
///
/// Absolute Windows (`X:\...`) and well-known POSIX prefixes are replaced up
/// to the next whitespace with the literal `[PATH]`.
pub fn redact_error(message: &str) -> String {
    let truncated: String = message.chars().take(MAX_ERROR_CHARS).collect();
    let step = WINDOWS_PATH.replace_all(&truncated, "[PATH]");
    POSIX_PATH.replace_all(&step, "[PATH]").into_owned()
}
