//! Static roster and seed templates, loaded as data.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ImportError, ImportResult};

const BUILTIN_SEED: &str = include_str!("../data/seed.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StaffRole {
    Executive,
    Leader,
    Support,
}

impl StaffRole {
    pub fn as_str(self) -> &'static str {
        match self {
            StaffRole::Executive => "executive",
            StaffRole::Leader => "leader",
            StaffRole::Support => "support",
        }
    }

    /// Loose parse of the free-text role column on staff sheets.
    pub fn parse_loose(s: &str) -> Option<Self> {
        let s = s.trim().to_ascii_lowercase();
        if s.contains("exec") || s.contains("commissioner") || s.contains("chair") {
            Some(StaffRole::Executive)
        } else if s.contains("leader") {
            Some(StaffRole::Leader)
        } else if s.contains("support") || s.contains("helper") || s.contains("volunteer") {
            Some(StaffRole::Support)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffSeed {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: StaffRole,
    #[serde(default)]
    pub cohort: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSeed {
    pub title: String,
    pub description: String,
    pub location: String,
    pub start_offset_days: i64,
    /// `HH:MM`, local time.
    pub start_time: String,
    pub duration_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AchievementTemplate {
    pub title: String,
    pub description: String,
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub staff: Vec<StaffSeed>,
    #[serde(default)]
    pub events: Vec<EventSeed>,
    #[serde(default)]
    pub achievements: Vec<AchievementTemplate>,
}

impl SeedData {
    pub fn builtin() -> ImportResult<Self> {
        Self::parse(BUILTIN_SEED)
    }

    pub fn from_path(path: &Path) -> ImportResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ImportError::Config(format!("seed file {}: {e}", path.display())))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> ImportResult<Self> {
        serde_json::from_str(text).map_err(|e| ImportError::Config(format!("seed data: {e}")))
    }

    /// Staff in creation order: executives, then leaders, then support.
    /// Input order is kept within a tier.
    pub fn staff_in_tier_order(&self) -> Vec<&StaffSeed> {
        let mut staff = self.staff.iter().collect::<Vec<_>>();
        staff.sort_by_key(|s| s.role);
        staff
    }
}
