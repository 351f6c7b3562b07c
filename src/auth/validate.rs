use super::models::GrantType;
use std::collections::HashSet;

/// Split a space-separated scope string, dropping duplicates but keeping order.
pub fn parse_scopes(raw: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.split_whitespace()
        .filter(|s| seen.insert(*s))
        .map(str::to_string)
        .collect()
}

pub fn join_scopes(scopes: &[String]) -> String {
    scopes.join(" ")
}

/// An empty allow-list permits everything.
pub fn scopes_allowed(allowed: &[String], requested: &[String]) -> bool {
    if requested.is_empty() || allowed.is_empty() {
        return true;
    }
    is_subset(requested, allowed)
}

pub fn is_subset(subset: &[String], superset: &[String]) -> bool {
    let set: HashSet<&str> = superset.iter().map(String::as_str).collect();
    subset.iter().all(|s| set.contains(s.as_str()))
}

/// Items of `a` not in `b`, in the order of `a`.
pub fn difference(a: &[String], b: &[String]) -> Vec<String> {
    let set: HashSet<&str> = b.iter().map(String::as_str).collect();
    a.iter().filter(|s| !set.contains(s.as_str())).cloned().collect()
}

/// Order-preserving union without duplicates.
pub fn union(a: &[String], b: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    a.iter()
        .chain(b.iter())
        .filter(|s| seen.insert(s.as_str()))
        .cloned()
        .collect()
}

/// An empty grant list permits nothing.
pub fn grant_allowed(allowed: &[GrantType], grant: GrantType) -> bool {
    allowed.contains(&grant)
}

/// Exact string match against the registered URIs. When the request omits
/// the URI and exactly one is registered, that one is used.
pub fn resolve_redirect_uri(registered: &[String], requested: Option<&str>) -> Option<String> {
    match requested.map(str::trim).filter(|r| !r.is_empty()) {
        None if registered.len() == 1 => Some(registered[0].clone()),
        None => None,
        Some(requested) => registered
            .iter()
            .find(|r| r.as_str() == requested)
            .cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn test_parse_scopes_dedupes_in_order() {
        assert_eq!(parse_scopes("  write read write  admin read"), s(&["write", "read", "admin"]));
        assert!(parse_scopes("   ").is_empty());
    }

    #[test]
    fn test_scopes_allowed_empty_allow_list() {
        assert!(scopes_allowed(&[], &s(&["anything"])));
        assert!(scopes_allowed(&s(&["read"]), &[]));
        assert!(scopes_allowed(&s(&["read", "write"]), &s(&["write"])));
        assert!(!scopes_allowed(&s(&["read"]), &s(&["read", "admin"])));
    }

    #[test]
    fn test_difference_and_union() {
        let requested = s(&["read", "write", "admin"]);
        let existing = s(&["write"]);
        assert_eq!(difference(&requested, &existing), s(&["read", "admin"]));
        assert_eq!(union(&existing, &requested), s(&["write", "read", "admin"]));
    }

    #[test]
    fn test_grant_allowed_empty_list_denies() {
        assert!(!grant_allowed(&[], GrantType::AuthorizationCode));
        assert!(grant_allowed(
            &[GrantType::RefreshToken, GrantType::AuthorizationCode],
            GrantType::AuthorizationCode
        ));
    }

    #[test]
    fn test_resolve_redirect_uri() {
        let one = s(&["https://app/cb"]);
        let two = s(&["https://app/cb", "https://app/other"]);

        assert_eq!(resolve_redirect_uri(&one, None), Some("https://app/cb".to_string()));
        assert_eq!(resolve_redirect_uri(&one, Some("")), Some("https://app/cb".to_string()));
        assert_eq!(resolve_redirect_uri(&two, None), None);
        assert_eq!(
            resolve_redirect_uri(&two, Some("https://app/other")),
            Some("https://app/other".to_string())
        );
        // no prefix or trailing-slash leniency
        assert_eq!(resolve_redirect_uri(&one, Some("https://app/cb/")), None);
        assert_eq!(resolve_redirect_uri(&one, Some("https://app/cb?x=1")), None);
    }
}
