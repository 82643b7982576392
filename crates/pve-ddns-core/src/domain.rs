//! Domain name splitting
//!
//! Provider APIs address records as (registrable root, subdomain) pairs
//! while the config lists full names. The split here takes the last two
//! labels as the root, which covers the common case; multi-label public
//! suffixes (co.uk and friends) are out of scope and such names must be
//! delegated from a two-label zone to work.

/// A domain name split into its registrable root and subdomain part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainParts {
    /// Registrable root, e.g. "example.com"
    pub root: String,
    /// Subdomain labels before the root, empty for apex names
    pub sub: String,
}

impl DomainParts {
    /// True when the name is the zone apex
    pub fn is_apex(&self) -> bool {
        self.sub.is_empty()
    }
}

/// Split a fully-qualified name: "www.example.com" -> ("example.com", "www")
///
/// Names with two or fewer labels are treated as an apex with no subdomain.
pub fn split_domain(domain: &str) -> DomainParts {
    let trimmed = domain.trim_end_matches('.');
    let labels: Vec<&str> = trimmed.split('.').collect();
    if labels.len() <= 2 {
        return DomainParts {
            root: trimmed.to_string(),
            sub: String::new(),
        };
    }
    let split_at = labels.len() - 2;
    DomainParts {
        root: labels[split_at..].join("."),
        sub: labels[..split_at].join("."),
    }
}
