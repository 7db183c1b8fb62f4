//! Process-wide settings read once from environment variables.

use std::env;
use std::sync::OnceLock;

static GEON_STRICT_SCOPES: OnceLock<bool> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

/// Whether an unbalanced scope stack should panic instead of being logged.
pub(crate) fn strict_scopes() -> bool {
    *GEON_STRICT_SCOPES.get_or_init(|| match env::var("GEON_STRICT_SCOPES") {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    })
}
