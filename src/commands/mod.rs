pub(crate) mod boards;
pub(crate) mod cards;
pub(crate) mod content;
pub(crate) mod lists;
pub(crate) mod order;
pub(crate) mod users;
pub(crate) mod workspaces;

use uuid::Uuid;

use crate::error::{Error, Result};

pub(crate) fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Trims `value` and rejects it when empty.
pub(crate) fn require_text(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

/// Lowercase ASCII slug: alphanumerics kept, runs of anything else collapse to `-`.
pub(crate) fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut pending_dash = false;
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else if ch.is_whitespace() || ch == '-' || ch == '_' {
            pending_dash = true;
        }
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("  Product  Roadmap 2025 "), "product-roadmap-2025");
        assert_eq!(slugify("Q3 -- Launch_plan"), "q3-launch-plan");
        assert_eq!(slugify("Café & Co"), "caf-co");
    }

    #[test]
    fn require_text_trims_and_rejects_blank() {
        assert_eq!(require_text("name", "  Ops ").expect("ok"), "Ops");
        assert!(matches!(require_text("name", "   "), Err(Error::Validation(_))));
    }
}
