//! Import configuration.
//!
//! Persisted as the `setup.import` settings section. Callers may patch a
//! copy per request through `params.options`; the same validation applies.

use chrono::NaiveDate;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cohort::CohortPolicy;
use crate::db;

pub const SECTION_KEY: &str = "setup.import";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportSettings {
    pub cohort_policy: String,
    pub age_min: i64,
    pub age_max: i64,
    pub strict_unnamed_rows: bool,
    pub default_mode: String,
    pub placeholder_password: String,
    pub achievement_fraction: f64,
    pub attendance_min: f64,
    pub attendance_max: f64,
    pub present_probability: f64,
    pub seed: Option<u64>,
    pub reference_date: Option<String>,
    pub seed_path: Option<String>,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            cohort_policy: "coarse".to_string(),
            age_min: 5,
            age_max: 18,
            strict_unnamed_rows: false,
            default_mode: "replace".to_string(),
            placeholder_password: "changeme".to_string(),
            achievement_fraction: 0.3,
            attendance_min: 0.7,
            attendance_max: 0.9,
            present_probability: 0.9,
            seed: None,
            reference_date: None,
            seed_path: None,
        }
    }
}

impl ImportSettings {
    /// Stored section merged over defaults. A missing or unparsable section
    /// falls back to defaults.
    pub fn load(conn: &Connection) -> anyhow::Result<Self> {
        let stored = db::settings_get_json(conn, SECTION_KEY)?;
        Ok(stored
            .and_then(|v| serde_json::from_value::<ImportSettings>(v).ok())
            .unwrap_or_default())
    }

    pub fn save(&self, conn: &Connection) -> anyhow::Result<()> {
        db::settings_set_json(conn, SECTION_KEY, &serde_json::to_value(self)?)
    }

    pub fn cohort_policy(&self) -> CohortPolicy {
        CohortPolicy::parse(&self.cohort_policy).unwrap_or(CohortPolicy::Coarse)
    }

    pub fn reference_date(&self) -> NaiveDate {
        self.reference_date
            .as_deref()
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
            .unwrap_or_else(|| chrono::Local::now().date_naive())
    }

    pub fn apply_patch(&mut self, patch: &Map<String, Value>) -> Result<(), String> {
        for (k, v) in patch {
            match k.as_str() {
                "cohortPolicy" => {
                    let s = parse_string(v, k)?;
                    let Some(policy) = CohortPolicy::parse(&s) else {
                        return Err("cohortPolicy must be one of: coarse, fine".into());
                    };
                    self.cohort_policy = policy.as_str().to_string();
                }
                "ageMin" => self.age_min = parse_i64_range(v, k, 0, 120)?,
                "ageMax" => self.age_max = parse_i64_range(v, k, 0, 120)?,
                "strictUnnamedRows" => self.strict_unnamed_rows = parse_bool(v, k)?,
                "defaultMode" => {
                    let s = parse_string(v, k)?.to_ascii_lowercase();
                    if s != "upsert" && s != "replace" {
                        return Err("defaultMode must be one of: upsert, replace".into());
                    }
                    self.default_mode = s;
                }
                "placeholderPassword" => {
                    let s = parse_string(v, k)?;
                    if s.is_empty() || s.len() > 128 {
                        return Err("placeholderPassword length must be 1..=128".into());
                    }
                    self.placeholder_password = s;
                }
                "achievementFraction" => self.achievement_fraction = parse_unit(v, k)?,
                "attendanceMin" => self.attendance_min = parse_unit(v, k)?,
                "attendanceMax" => self.attendance_max = parse_unit(v, k)?,
                "presentProbability" => self.present_probability = parse_unit(v, k)?,
                "seed" => {
                    self.seed = if v.is_null() {
                        None
                    } else {
                        Some(v.as_u64().ok_or_else(|| format!("{} must be a non-negative integer or null", k))?)
                    };
                }
                "referenceDate" => {
                    self.reference_date = if v.is_null() {
                        None
                    } else {
                        let s = parse_string(v, k)?;
                        if NaiveDate::parse_from_str(&s, "%Y-%m-%d").is_err() {
                            return Err("referenceDate must be YYYY-MM-DD".into());
                        }
                        Some(s)
                    };
                }
                "seedPath" => {
                    self.seed_path = if v.is_null() {
                        None
                    } else {
                        Some(parse_string(v, k)?)
                    };
                }
                _ => return Err(format!("unknown import field: {}", k)),
            }
        }
        if self.age_min > self.age_max {
            return Err("ageMin must be <= ageMax".into());
        }
        if self.attendance_min > self.attendance_max {
            return Err("attendanceMin must be <= attendanceMax".into());
        }
        Ok(())
    }
}

fn parse_string(v: &Value, key: &str) -> Result<String, String> {
    v.as_str()
        .map(|s| s.trim().to_string())
        .ok_or_else(|| format!("{} must be string", key))
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v.as_i64().ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_unit(v: &Value, key: &str) -> Result<f64, String> {
    let n = v.as_f64().ok_or_else(|| format!("{} must be a number", key))?;
    if !(0.0..=1.0).contains(&n) {
        return Err(format!("{} must be in 0..=1", key));
    }
    Ok(n)
}
