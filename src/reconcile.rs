//! Family reconciliation: rows sharing a guardian email collapse into one
//! guardian with many dependents.
//!
//! The email map is an explicit [`GuardianRegistry`] owned by the caller for
//! exactly one run; nothing here is global or persisted.

use std::collections::HashMap;

use chrono::NaiveDate;

use crate::cohort::CohortTable;
use crate::validate::FamilyRecord;

#[derive(Debug, Clone, PartialEq)]
pub struct GuardianDraft {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DependentDraft {
    /// Index into the registry's guardians.
    pub guardian: usize,
    pub first_name: String,
    pub last_name: String,
    pub age: i64,
    pub cohort: String,
    pub join_date: NaiveDate,
    pub row: usize,
}

/// Guardians keyed by lower-cased email, in first-seen order.
#[derive(Debug, Default)]
pub struct GuardianRegistry {
    by_email: HashMap<String, usize>,
    guardians: Vec<GuardianDraft>,
}

impl GuardianRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the guardian for `record`, registering it on first sight.
    /// The flag is true when this call created it. `None` when the record
    /// carries no email to key on.
    pub fn resolve(&mut self, record: &FamilyRecord) -> Option<(usize, bool)> {
        let email = record.parent_email.as_deref()?.trim().to_lowercase();
        if email.is_empty() {
            return None;
        }
        if let Some(&idx) = self.by_email.get(&email) {
            return Some((idx, false));
        }
        let first_name = record
            .parent_first_name
            .clone()
            .or_else(|| record.detected_name.clone())
            .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());
        let last_name = record
            .parent_last_name
            .clone()
            .or_else(|| record.child_last_name.clone())
            .unwrap_or_default();
        let idx = self.guardians.len();
        self.guardians.push(GuardianDraft {
            email: email.clone(),
            first_name,
            last_name,
            phone: record.parent_phone.clone(),
        });
        self.by_email.insert(email, idx);
        Some((idx, true))
    }

    pub fn guardians(&self) -> &[GuardianDraft] {
        &self.guardians
    }

    pub fn len(&self) -> usize {
        self.guardians.len()
    }
}

#[derive(Debug, Default)]
pub struct Reconciliation {
    pub dependents: Vec<DependentDraft>,
    /// Guardians created by this run (the "processed families" counter).
    pub families: usize,
    /// Valid rows that could not be attached to any guardian.
    pub skipped: Vec<String>,
}

pub fn reconcile(
    records: &[FamilyRecord],
    registry: &mut GuardianRegistry,
    cohorts: &CohortTable,
    default_join_date: NaiveDate,
) -> Reconciliation {
    let mut out = Reconciliation::default();
    for record in records {
        let Some((guardian, created)) = registry.resolve(record) else {
            out.skipped
                .push(format!("Row {}: no parent email, row not imported", record.row));
            continue;
        };
        if created {
            out.families += 1;
        }

        // Parent-only registrations stop here.
        let (Some(first_name), Some(age)) = (record.child_first_name.as_ref(), record.child_age)
        else {
            continue;
        };
        let last_name = record
            .child_last_name
            .clone()
            .or_else(|| record.parent_last_name.clone())
            .unwrap_or_default();
        out.dependents.push(DependentDraft {
            guardian,
            first_name: first_name.clone(),
            last_name,
            age,
            cohort: cohorts.assign(Some(age)).to_string(),
            join_date: record.join_date.unwrap_or(default_join_date),
            row: record.row,
        });
    }
    out
}
