use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

/// Canonical form of a URL plus its path component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub normalized_url: String,
    pub normalized_path: String,
}

/// Path segments that look like identifiers but name API surface and must
/// survive normalization.
const PRESERVED_SEGMENTS: [&str; 24] = [
    "api", "v1", "v2", "v3", "v4", "search", "query", "list", "create", "update", "delete",
    "users", "posts", "items", "products", "orders", "comments", "auth", "login", "logout",
    "register", "admin", "public", "private",
];

static UUID_SEGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .expect("uuid pattern")
});
static LONG_HEX_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-f]{32,}$").expect("hex pattern"));
static OPAQUE_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{20,}$").expect("opaque token pattern"));

fn is_id_segment(segment: &str) -> bool {
    if segment.is_empty() {
        return false;
    }
    if PRESERVED_SEGMENTS.contains(&segment.to_ascii_lowercase().as_str()) {
        return false;
    }
    if segment.bytes().all(|b| b.is_ascii_digit()) {
        return true;
    }
    UUID_SEGMENT.is_match(segment)
        || LONG_HEX_SEGMENT.is_match(segment)
        || OPAQUE_SEGMENT.is_match(segment)
}

fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| if is_id_segment(segment) { ":id" } else { segment })
        .collect::<Vec<_>>()
        .join("/")
}

/// Canonicalize a URL: drop the fragment, sort query parameters by name then
/// value, and collapse ID-like path segments to `:id`.
///
/// Idempotent: normalizing a normalized URL is a no-op. A URL that fails to
/// parse is returned as-is for both fields.
pub fn normalize_url(raw: &str) -> Normalized {
    let Ok(parsed) = Url::parse(raw) else {
        return Normalized {
            normalized_url: raw.to_string(),
            normalized_path: raw.to_string(),
        };
    };

    let normalized_path = normalize_path(parsed.path());

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    let mut rebuilt = parsed;
    rebuilt.set_fragment(None);
    rebuilt.set_path(&normalized_path);
    if pairs.is_empty() {
        rebuilt.set_query(None);
    } else {
        rebuilt
            .query_pairs_mut()
            .clear()
            .extend_pairs(pairs.iter().map(|(name, value)| (name.as_str(), value.as_str())));
    }

    Normalized {
        normalized_url: rebuilt.to_string(),
        normalized_path,
    }
}

/// Stable endpoint identity: `"METHOD normalizedPath"`.
pub fn endpoint_key(method: &str, normalized_path: &str) -> String {
    format!("{} {}", method.to_ascii_uppercase(), normalized_path)
}
