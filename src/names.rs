//! "Looks like a person's name" heuristic.
//!
//! Used only when a row has data but none of the name columns matched. The
//! rule is fuzzy on purpose and has no formal false-positive/negative bound,
//! so it lives behind a trait that callers can swap out.

pub trait NameMatcher {
    fn looks_like_name(&self, token: &str) -> bool;

    /// First value in the row that passes [`NameMatcher::looks_like_name`].
    fn find_name<'a>(&self, values: &[&'a str]) -> Option<&'a str> {
        values.iter().copied().find(|v| self.looks_like_name(v))
    }
}

/// Letters and spaces only, not an email, not an internal id, not a region code.
#[derive(Debug, Clone)]
pub struct LenientNameMatcher {
    id_prefixes: Vec<String>,
    region_codes: Vec<String>,
}

impl Default for LenientNameMatcher {
    fn default() -> Self {
        Self {
            id_prefixes: ["USR", "SCT", "GRP", "ID"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            region_codes: ["NSW", "VIC", "QLD", "WA", "SA", "TAS", "ACT", "NT"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl LenientNameMatcher {
    pub fn new(id_prefixes: Vec<String>, region_codes: Vec<String>) -> Self {
        Self {
            id_prefixes,
            region_codes,
        }
    }

    fn is_region_code(&self, t: &str) -> bool {
        let short_upper = t.len() <= 3 && t.chars().all(|c| c.is_ascii_uppercase());
        short_upper || self.region_codes.iter().any(|r| r.eq_ignore_ascii_case(t))
    }

    fn has_id_prefix(&self, t: &str) -> bool {
        let upper = t.to_ascii_uppercase();
        self.id_prefixes.iter().any(|p| {
            upper
                .strip_prefix(p.to_ascii_uppercase().as_str())
                .map(|rest| {
                    rest.is_empty()
                        || rest.starts_with(|c: char| c == '-' || c == '_' || c.is_ascii_digit())
                })
                .unwrap_or(false)
        })
    }
}

impl NameMatcher for LenientNameMatcher {
    fn looks_like_name(&self, token: &str) -> bool {
        let t = token.trim();
        if t.chars().count() < 2 || t.contains('@') {
            return false;
        }
        if !t.chars().all(|c| c.is_alphabetic() || c == ' ') {
            return false;
        }
        !self.has_id_prefix(t) && !self.is_region_code(t)
    }
}
