//! Age -> cohort assignment.
//!
//! Two tables exist and they disagree (three coarse bands vs. per-age
//! lettered bands). Neither is canonical; the active one is picked by the
//! `cohortPolicy` setting.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CohortPolicy {
    Coarse,
    Fine,
}

impl CohortPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "coarse" => Some(Self::Coarse),
            "fine" => Some(Self::Fine),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Coarse => "coarse",
            Self::Fine => "fine",
        }
    }
}

/// An inclusive age band mapped to a cohort name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CohortBand {
    pub name: String,
    pub min_age: i64,
    pub max_age: i64,
}

impl CohortBand {
    fn new(name: &str, min_age: i64, max_age: i64) -> Self {
        Self {
            name: name.to_string(),
            min_age,
            max_age,
        }
    }

    fn contains(&self, age: i64) -> bool {
        (self.min_age..=self.max_age).contains(&age)
    }
}

/// A cohort that must exist in the store for the table to be total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CohortDef {
    pub name: String,
    pub ages: Option<(i64, i64)>,
}

#[derive(Debug, Clone)]
pub struct CohortTable {
    policy: CohortPolicy,
    bands: Vec<CohortBand>,
    fallback: String,
}

impl CohortTable {
    pub fn for_policy(policy: CohortPolicy) -> Self {
        match policy {
            CohortPolicy::Coarse => Self::coarse(),
            CohortPolicy::Fine => Self::fine(),
        }
    }

    pub fn coarse() -> Self {
        Self {
            policy: CohortPolicy::Coarse,
            bands: vec![
                CohortBand::new("Joeys", 5, 7),
                CohortBand::new("Cubs", 8, 11),
                CohortBand::new("Scouts", 12, 15),
            ],
            fallback: "Cubs".to_string(),
        }
    }

    pub fn fine() -> Self {
        Self {
            policy: CohortPolicy::Fine,
            bands: vec![
                CohortBand::new("Joeys A", 5, 5),
                CohortBand::new("Joeys B", 6, 6),
                CohortBand::new("Joeys C", 7, 7),
                CohortBand::new("Cubs A", 8, 8),
                CohortBand::new("Cubs B", 9, 9),
                CohortBand::new("Cubs C", 10, 11),
                CohortBand::new("Scouts A", 12, 12),
                CohortBand::new("Scouts B", 13, 13),
                CohortBand::new("Scouts C", 14, 15),
                CohortBand::new("Rovers", 16, 18),
            ],
            fallback: "Cubs".to_string(),
        }
    }

    pub fn policy(&self) -> CohortPolicy {
        self.policy
    }

    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    /// Total: every age, including none at all, gets a cohort.
    pub fn assign(&self, age: Option<i64>) -> &str {
        age.and_then(|a| self.bands.iter().find(|b| b.contains(a)))
            .map(|b| b.name.as_str())
            .unwrap_or(self.fallback.as_str())
    }

    /// Every cohort `assign` can return, in band order, fallback last when
    /// it is not itself a band.
    pub fn cohorts(&self) -> Vec<CohortDef> {
        let mut out = self
            .bands
            .iter()
            .map(|b| CohortDef {
                name: b.name.clone(),
                ages: Some((b.min_age, b.max_age)),
            })
            .collect::<Vec<_>>();
        if !self.bands.iter().any(|b| b.name == self.fallback) {
            out.push(CohortDef {
                name: self.fallback.clone(),
                ages: None,
            });
        }
        out
    }

    /// Resolve a loosely written cohort name ("cubs", "Cubs") against this
    /// table: exact match first, then the first cohort it prefixes.
    pub fn resolve_name(&self, name: &str) -> Option<String> {
        let wanted = name.trim().to_ascii_lowercase();
        if wanted.is_empty() {
            return None;
        }
        let all = self.cohorts();
        all.iter()
            .find(|c| c.name.to_ascii_lowercase() == wanted)
            .or_else(|| {
                all.iter()
                    .find(|c| c.name.to_ascii_lowercase().starts_with(&wanted))
            })
            .map(|c| c.name.clone())
    }

    /// Compare a caller-declared division with the computed one. Returns the
    /// expected cohort when they differ. The declared value is never replaced.
    pub fn check_declared<'a>(&'a self, age: i64, declared: &str) -> Option<&'a str> {
        let expected = self.assign(Some(age));
        if expected.eq_ignore_ascii_case(declared.trim()) {
            None
        } else {
            Some(expected)
        }
    }
}
