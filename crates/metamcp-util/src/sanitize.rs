//! Upstream-name sanitization and tool/prompt name prefixing.
//!
//! Externally visible tool/prompt names are `<sanitized-server-name>__<name>`.
//! `__` is reserved as the delimiter and is split on its *first* occurrence so
//! that one MetaMCP instance can be nested inside another.

/// Reserved delimiter between the sanitized server name and the forwarded
/// tool/prompt name.
pub const NAME_DELIMITER: &str = "__";

/// Replace any character outside `[A-Za-z0-9_-]` with nothing.
#[must_use]
pub fn sanitize_server_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// Build the externally visible name for a tool/prompt owned by `server_name`.
#[must_use]
pub fn prefixed_name(server_name: &str, original_name: &str) -> String {
    format!("{}{}{}", sanitize_server_name(server_name), NAME_DELIMITER, original_name)
}

/// Split an externally visible name on the *first* occurrence of the
/// delimiter, yielding `(sanitized_prefix, remainder)`. Splitting on the
/// first occurrence (rather than the last) is what allows one aggregator's
/// output to be re-aggregated by another without ambiguity.
#[must_use]
pub fn split_prefixed_name(name: &str) -> Option<(&str, &str)> {
    name.split_once(NAME_DELIMITER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_disallowed_characters() {
        assert_eq!(sanitize_server_name("Beta Server"), "BetaServer");
        assert_eq!(sanitize_server_name("a/b\\c.d"), "abcd");
        assert_eq!(sanitize_server_name("already_fine-1"), "already_fine-1");
    }

    #[test]
    fn prefix_and_split_round_trip() {
        let full = prefixed_name("Alpha", "ping");
        assert_eq!(full, "Alpha__ping");
        assert_eq!(split_prefixed_name(&full), Some(("Alpha", "ping")));
    }

    #[test]
    fn split_is_first_occurrence_for_nested_aggregation() {
        let nested = "Outer__Inner__do";
        assert_eq!(split_prefixed_name(nested), Some(("Outer", "Inner__do")));
    }

    #[test]
    fn split_with_no_delimiter_is_none() {
        assert_eq!(split_prefixed_name("nodeelimiter"), None);
    }
}
