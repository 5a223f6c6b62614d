//! Include/exclude filtering of zone names.
//!
//! Patterns are either literal names (`example.com`) or `*.`-prefixed
//! wildcards (`*.example.com`) matching any depth of subdomains below the
//! suffix, but never the suffix itself.

/// Compiled include/exclude pattern lists.
///
/// A name is managed iff the include list is empty or some include pattern
/// matches, and no exclude pattern matches.
#[derive(Debug, Clone, Default)]
pub struct DomainFilter {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl DomainFilter {
    /// Build a filter from raw pattern lists; patterns are lowercased.
    pub fn new(include: &[String], exclude: &[String]) -> Self {
        Self {
            include: include.iter().map(|p| p.to_ascii_lowercase()).collect(),
            exclude: exclude.iter().map(|p| p.to_ascii_lowercase()).collect(),
        }
    }

    /// True when the filter imposes no restriction at all.
    pub fn is_open(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Whether `name` is managed under this filter.
    pub fn matches(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        let included =
            self.include.is_empty() || self.include.iter().any(|p| pattern_matches(p, &name));
        let excluded = self.exclude.iter().any(|p| pattern_matches(p, &name));
        included && !excluded
    }
}

fn pattern_matches(pattern: &str, name: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix("*.") {
        // Wildcards require at least one label below the suffix.
        name.len() > suffix.len() + 1 && name.ends_with(suffix) && {
            let head = &name[..name.len() - suffix.len()];
            head.ends_with('.') && !head[..head.len() - 1].is_empty()
        }
    } else {
        pattern == name
    }
}
