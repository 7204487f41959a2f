//! Host matching logic.
//!
//! # Responsibilities
//! - Parse a site domain into an exact or wildcard pattern
//! - Match a `Host` value against the pattern
//!
//! # Design Decisions
//! - Host matching is ASCII case-insensitive (RFC 9110)
//! - A `:port` suffix on the host is ignored unless the domain carries one
//! - Wildcards need a `.` boundary and at least one label before the suffix
//! - No regex, matching is a suffix comparison

use std::fmt;

/// A parsed site domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainPattern {
    /// `example.com` or `example.com:8080`
    Exact(String),
    /// `*.example.com`, stored without the leading `*.`
    Wildcard(String),
}

impl DomainPattern {
    pub fn parse(domain: &str) -> Self {
        let domain = domain.trim().to_ascii_lowercase();
        match domain.strip_prefix("*.") {
            Some(suffix) => DomainPattern::Wildcard(suffix.to_owned()),
            None => DomainPattern::Exact(domain),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, DomainPattern::Wildcard(_))
    }

    /// Exact comparison only; wildcard patterns never match here.
    pub fn matches_exact(&self, host: &str) -> bool {
        let DomainPattern::Exact(domain) = self else {
            return false;
        };
        let host = host.trim();
        if domain.contains(':') {
            return host.eq_ignore_ascii_case(domain);
        }
        strip_port(host).eq_ignore_ascii_case(domain)
    }

    /// Wildcard comparison only; exact patterns never match here.
    pub fn matches_wildcard(&self, host: &str) -> bool {
        let DomainPattern::Wildcard(suffix) = self else {
            return false;
        };
        let host = if suffix.contains(':') {
            host.trim()
        } else {
            strip_port(host.trim())
        };

        // Need "<label>." in front of the suffix.
        let Some(split) = host.len().checked_sub(suffix.len() + 1) else {
            return false;
        };
        if split == 0 || !host.is_char_boundary(split) {
            return false;
        }
        let (head, tail) = host.split_at(split);
        tail.as_bytes()[0] == b'.'
            && tail[1..].eq_ignore_ascii_case(suffix)
            && !head.ends_with('.')
    }

    pub fn matches(&self, host: &str) -> bool {
        self.matches_exact(host) || self.matches_wildcard(host)
    }
}

impl fmt::Display for DomainPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainPattern::Exact(domain) => f.write_str(domain),
            DomainPattern::Wildcard(suffix) => write!(f, "*.{suffix}"),
        }
    }
}

/// Strip a trailing `:port` from a host value. Bracketed IPv6 literals keep
/// their brackets.
pub fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return host.find(']').map_or(host, |end| &host[..=end]);
    }
    match host.rsplit_once(':') {
        Some((name, port))
            if !name.contains(':') && !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) =>
        {
            name
        }
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_is_case_insensitive() {
        let pattern = DomainPattern::parse("Example.com");
        assert!(pattern.matches("example.com"));
        assert!(pattern.matches("EXAMPLE.COM"));
        assert!(!pattern.matches("other.com"));
    }

    #[test]
    fn exact_ignores_host_port() {
        let pattern = DomainPattern::parse("example.com");
        assert!(pattern.matches("example.com:8080"));

        let with_port = DomainPattern::parse("example.com:8080");
        assert!(with_port.matches("example.com:8080"));
        assert!(!with_port.matches("example.com"));
        assert!(!with_port.matches("example.com:9090"));
    }

    #[test]
    fn wildcard_requires_label_and_dot() {
        let pattern = DomainPattern::parse("*.example.com");
        assert!(pattern.is_wildcard());
        assert!(pattern.matches("a.example.com"));
        assert!(pattern.matches("a.b.example.com"));
        assert!(pattern.matches("A.Example.Com:443"));
        assert!(!pattern.matches("example.com"));
        assert!(!pattern.matches(".example.com"));
        assert!(!pattern.matches("notexample.com"));
        assert!(!pattern.matches("a.example.org"));
    }

    #[test]
    fn exact_and_wildcard_are_disjoint_checks() {
        let wildcard = DomainPattern::parse("*.example.com");
        assert!(!wildcard.matches_exact("a.example.com"));
        let exact = DomainPattern::parse("a.example.com");
        assert!(!exact.matches_wildcard("a.example.com"));
    }

    #[test]
    fn strips_ports() {
        assert_eq!(strip_port("example.com:80"), "example.com");
        assert_eq!(strip_port("example.com"), "example.com");
        assert_eq!(strip_port("[::1]:8080"), "[::1]");
        assert_eq!(strip_port("example.com:"), "example.com:");
    }

    #[test]
    fn display_round_trips_domain() {
        assert_eq!(DomainPattern::parse("*.Example.com").to_string(), "*.example.com");
        assert_eq!(DomainPattern::parse("api.example.com").to_string(), "api.example.com");
    }
}
