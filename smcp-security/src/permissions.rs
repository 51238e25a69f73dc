//! Permission pattern matching

/// Check a required permission against a list of granted patterns.
///
/// Rules, in order: a literal `*` grants everything; an exact match grants;
/// a pattern ending in `:*` grants anything sharing its prefix (so
/// `tools:*` covers `tools:search`). Anything else denies.
pub fn permission_matches(granted: &[String], required: &str) -> bool {
    for pattern in granted {
        if pattern == "*" {
            return true;
        }
        if pattern == required {
            return true;
        }
        if let Some(prefix) = pattern.strip_suffix('*') {
            if pattern.ends_with(":*") && required.starts_with(prefix) {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn granted(patterns: &[&str]) -> Vec<String> {
        patterns.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_wildcard_grants_everything() {
        assert!(permission_matches(&granted(&["*"]), "tools:anything"));
        assert!(permission_matches(&granted(&["*"]), "admin:keys"));
    }

    #[test]
    fn test_exact_match() {
        let perms = granted(&["tools:echo.say"]);
        assert!(permission_matches(&perms, "tools:echo.say"));
        assert!(!permission_matches(&perms, "tools:echo.shout"));
    }

    #[test]
    fn test_prefix_pattern() {
        let perms = granted(&["tools:echo.*"]);
        assert!(permission_matches(&perms, "tools:echo.say"));
        assert!(permission_matches(&perms, "tools:echo.shout"));
        assert!(!permission_matches(&perms, "tools:other.say"));

        assert!(permission_matches(&granted(&["tools:*"]), "tools:search"));
    }

    #[test]
    fn test_bare_star_suffix_without_colon_does_not_match() {
        // Only `:*` patterns are prefix patterns
        assert!(!permission_matches(&granted(&["tools*"]), "tools:search"));
    }

    #[test]
    fn test_empty_grants_deny() {
        assert!(!permission_matches(&[], "tools:echo.say"));
    }
}
