//! Row validation and classification.
//!
//! Row problems are collected, never thrown. A row ends up as one valid
//! record plus any number of warnings, or as a warning/error and nothing else.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::debug;

use crate::cohort::CohortTable;
use crate::names::NameMatcher;
use crate::seed::StaffRole;
use crate::source::{Cell, SourceRow};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub valid_records: usize,
    pub total_records: usize,
    pub multiple_children_families: usize,
}

impl ValidationResult {
    /// Import may go ahead whenever at least one record is usable.
    pub fn can_proceed(&self) -> bool {
        self.valid_records > 0
    }
}

/// Logical input columns and the header spellings accepted for each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    ParentFirstName,
    ParentLastName,
    ParentEmail,
    ParentPhone,
    ChildFirstName,
    ChildLastName,
    ChildAge,
    ChildDivision,
    JoinDate,
    StaffFullName,
    StaffRole,
    StaffEmail,
    StaffGroup,
    StaffPhone,
    StaffQualification,
}

impl Field {
    /// Tried in order; first header present with a value wins.
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Field::ParentFirstName => &[
                "Parent First Name*",
                "Parent First Name",
                "parent_first_name",
                "first_name",
            ],
            Field::ParentLastName => &["Parent Last Name*", "Parent Last Name", "parent_last_name", "last_name"],
            Field::ParentEmail => &["Parent Email*", "Parent Email", "parent_email", "email"],
            Field::ParentPhone => &["Parent Phone*", "Parent Phone", "parent_phone", "phone"],
            Field::ChildFirstName => &["Child First Name*", "Child First Name", "child_first_name"],
            Field::ChildLastName => &["Child Last Name*", "Child Last Name", "child_last_name"],
            Field::ChildAge => &["Child Age*", "Child Age", "child_age"],
            Field::ChildDivision => &[
                "Child Division (Auto-Assigned)",
                "Child Division",
                "child_division",
            ],
            Field::JoinDate => &["Join Date", "join_date", "Child Join Date"],
            Field::StaffFullName => &["Full Name*", "Full Name", "full_name"],
            Field::StaffRole => &["Role*", "Role", "role"],
            Field::StaffEmail => &["Email*", "Email", "email"],
            Field::StaffGroup => &["Group Assignment*", "Group Assignment", "group_assignment"],
            Field::StaffPhone => &["Phone", "phone", "Contact Number"],
            Field::StaffQualification => &["Qualifications", "qualifications", "Qualification"],
        }
    }
}

fn header_key(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Alias lookup with a case-insensitive, punctuation-blind fallback.
pub fn lookup(row: &SourceRow, field: Field) -> Option<String> {
    let aliases = field.aliases();
    for alias in aliases {
        if let Some(text) = row.get(alias).and_then(|c| c.text()) {
            return Some(text.into_owned());
        }
    }
    let keys = aliases.iter().map(|a| header_key(a)).collect::<Vec<_>>();
    row.cells()
        .find(|(h, c)| !c.is_blank() && keys.contains(&header_key(h)))
        .and_then(|(_, c)| c.text().map(|t| t.into_owned()))
}

pub fn is_valid_email(s: &str) -> bool {
    if s.chars().any(char::is_whitespace) {
        return false;
    }
    let mut parts = s.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    if local.is_empty() || !domain.contains('.') {
        return false;
    }
    domain.split('.').all(|label| !label.is_empty())
}

enum AgeParse {
    Missing,
    Whole(i64),
    Invalid(String),
}

fn parse_age(raw: Option<String>) -> AgeParse {
    let Some(raw) = raw else {
        return AgeParse::Missing;
    };
    if let Ok(n) = raw.parse::<i64>() {
        return AgeParse::Whole(n);
    }
    match raw.parse::<f64>() {
        Ok(f) if f.fract() == 0.0 && f.is_finite() => AgeParse::Whole(f as i64),
        _ => AgeParse::Invalid(raw),
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    ["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

/// Everything the validator needs besides the rows.
pub struct ValidationRules<'a> {
    pub cohorts: &'a CohortTable,
    pub names: &'a dyn NameMatcher,
    pub age_min: i64,
    pub age_max: i64,
    /// Escalate "no recognizable names" rows from warning to error.
    pub strict_unnamed_rows: bool,
}

/// Normalized view of one valid family row.
#[derive(Debug, Clone, PartialEq)]
pub struct FamilyRecord {
    pub row: usize,
    pub parent_first_name: Option<String>,
    pub parent_last_name: Option<String>,
    /// Trimmed and lower-cased; kept even when malformed.
    pub parent_email: Option<String>,
    pub parent_phone: Option<String>,
    pub child_first_name: Option<String>,
    pub child_last_name: Option<String>,
    pub child_age: Option<i64>,
    pub declared_division: Option<String>,
    pub join_date: Option<NaiveDate>,
    /// Set when no name column matched and the heuristic found one.
    pub detected_name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ValidatedFamilies {
    pub result: ValidationResult,
    pub records: Vec<FamilyRecord>,
}

pub fn validate_family_rows(rows: &[SourceRow], rules: &ValidationRules<'_>) -> ValidatedFamilies {
    let mut out = ValidatedFamilies::default();
    let mut rows_by_email: HashMap<String, usize> = HashMap::new();

    for row in rows {
        if row.is_blank() {
            continue;
        }
        out.result.total_records += 1;
        let n = row.row;
        let res = &mut out.result;

        let parent_first_name = lookup(row, Field::ParentFirstName);
        let child_first_name = lookup(row, Field::ChildFirstName);

        let mut detected_name = None;
        if parent_first_name.is_none() && child_first_name.is_none() {
            let values = row
                .cells()
                .filter_map(|(_, c)| match c {
                    Cell::Text(s) if !s.trim().is_empty() => Some(s.trim()),
                    _ => None,
                })
                .collect::<Vec<_>>();
            match rules.names.find_name(&values) {
                Some(name) => {
                    res.warnings.push(format!(
                        "Row {n}: no name columns recognized; treating \"{name}\" as the subject"
                    ));
                    detected_name = Some(name.to_string());
                }
                None => {
                    let msg = format!("Row {n}: no recognizable names found - skipping");
                    if rules.strict_unnamed_rows {
                        res.errors.push(msg);
                    } else {
                        res.warnings.push(msg);
                    }
                    continue;
                }
            }
        }

        let parent_email = lookup(row, Field::ParentEmail);
        let parent_email = match parent_email {
            None => {
                res.warnings.push(format!("Row {n}: missing parent email"));
                None
            }
            Some(e) => {
                if !is_valid_email(&e) {
                    res.warnings
                        .push(format!("Row {n}: invalid email format \"{e}\""));
                }
                // Still the family key, malformed or not.
                Some(e.trim().to_lowercase())
            }
        };

        let mut child_age = None;
        let declared_division = lookup(row, Field::ChildDivision);
        if let Some(child) = child_first_name.as_deref() {
            match parse_age(lookup(row, Field::ChildAge)) {
                AgeParse::Missing => res
                    .warnings
                    .push(format!("Row {n}: missing age for child {child}")),
                AgeParse::Invalid(raw) => res
                    .warnings
                    .push(format!("Row {n}: child age \"{raw}\" is not a whole number")),
                AgeParse::Whole(age) => {
                    if age < rules.age_min || age > rules.age_max {
                        res.warnings.push(format!(
                            "Row {n}: child age {age} is outside normal range ({}-{})",
                            rules.age_min, rules.age_max
                        ));
                    }
                    if let Some(declared) = declared_division.as_deref() {
                        if let Some(expected) = rules.cohorts.check_declared(age, declared) {
                            res.warnings.push(format!(
                                "Row {n}: division \"{declared}\" differs from expected \"{expected}\" for age {age}"
                            ));
                        }
                    }
                    child_age = Some(age);
                }
            }
        }

        let join_date = match lookup(row, Field::JoinDate) {
            Some(raw) => {
                let parsed = parse_date(&raw);
                if parsed.is_none() {
                    res.warnings
                        .push(format!("Row {n}: unrecognized join date \"{raw}\""));
                }
                parsed
            }
            None => None,
        };

        res.valid_records += 1;
        if let Some(email) = parent_email.as_ref() {
            *rows_by_email.entry(email.clone()).or_default() += 1;
        }
        out.records.push(FamilyRecord {
            row: n,
            parent_first_name,
            parent_last_name: lookup(row, Field::ParentLastName),
            parent_email,
            parent_phone: lookup(row, Field::ParentPhone),
            child_first_name,
            child_last_name: lookup(row, Field::ChildLastName),
            child_age,
            declared_division,
            join_date,
            detected_name,
        });
    }

    out.result.multiple_children_families = rows_by_email.values().filter(|c| **c >= 2).count();
    debug!(
        total = out.result.total_records,
        valid = out.result.valid_records,
        warnings = out.result.warnings.len(),
        errors = out.result.errors.len(),
        "validated family rows"
    );
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct StaffRecord {
    pub row: usize,
    pub full_name: String,
    pub role: Option<StaffRole>,
    pub email: Option<String>,
    pub group: Option<String>,
    pub phone: Option<String>,
    pub qualification: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ValidatedStaff {
    pub result: ValidationResult,
    pub records: Vec<StaffRecord>,
}

/// Staff sheets: a named row is always accepted; missing details only warn.
pub fn validate_staff_rows(rows: &[SourceRow], rules: &ValidationRules<'_>) -> ValidatedStaff {
    let mut out = ValidatedStaff::default();
    for row in rows {
        if row.is_blank() {
            continue;
        }
        out.result.total_records += 1;
        let n = row.row;
        let res = &mut out.result;

        let Some(full_name) = lookup(row, Field::StaffFullName) else {
            let msg = format!("Row {n}: staff row has no name - skipping");
            if rules.strict_unnamed_rows {
                res.errors.push(msg);
            } else {
                res.warnings.push(msg);
            }
            continue;
        };

        let role = match lookup(row, Field::StaffRole) {
            None => {
                res.warnings
                    .push(format!("Row {n}: {full_name} has no role"));
                None
            }
            Some(raw) => {
                let parsed = StaffRole::parse_loose(&raw);
                if parsed.is_none() {
                    res.warnings
                        .push(format!("Row {n}: unrecognized role \"{raw}\" for {full_name}"));
                }
                parsed
            }
        };

        let email = match lookup(row, Field::StaffEmail) {
            None => {
                res.warnings
                    .push(format!("Row {n}: missing email for {full_name}"));
                None
            }
            Some(e) if !is_valid_email(&e) => {
                res.warnings
                    .push(format!("Row {n}: invalid email format \"{e}\""));
                None
            }
            Some(e) => Some(e.to_lowercase()),
        };

        let group = lookup(row, Field::StaffGroup);
        if role == Some(StaffRole::Leader) {
            match group.as_deref() {
                None => res
                    .warnings
                    .push(format!("Row {n}: leader {full_name} has no group assignment")),
                Some(g) if rules.cohorts.resolve_name(g).is_none() => res.warnings.push(format!(
                    "Row {n}: group \"{g}\" does not match any cohort"
                )),
                Some(_) => {}
            }
        }

        res.valid_records += 1;
        out.records.push(StaffRecord {
            row: n,
            full_name,
            role,
            email,
            group,
            phone: lookup(row, Field::StaffPhone),
            qualification: lookup(row, Field::StaffQualification),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::LenientNameMatcher;

    fn row(n: usize, cells: &[(&str, Cell)]) -> SourceRow {
        SourceRow::new(
            n,
            cells
                .iter()
                .map(|(h, c)| (h.to_string(), c.clone()))
                .collect(),
        )
    }

    fn text(s: &str) -> Cell {
        Cell::Text(s.to_string())
    }

    fn run(rows: &[SourceRow], strict: bool) -> ValidatedFamilies {
        let cohorts = CohortTable::coarse();
        let names = LenientNameMatcher::default();
        let rules = ValidationRules {
            cohorts: &cohorts,
            names: &names,
            age_min: 5,
            age_max: 18,
            strict_unnamed_rows: strict,
        };
        validate_family_rows(rows, &rules)
    }

    fn fatima(n: usize, child: &str, age: f64) -> SourceRow {
        row(
            n,
            &[
                ("parent_first_name", text("Fatima")),
                ("parent_last_name", text("Ahmed")),
                ("parent_email", text("Fatima.Ahmed@x.com")),
                ("child_first_name", text(child)),
                ("child_age", Cell::Number(age)),
            ],
        )
    }

    #[test]
    fn clean_family_row_has_no_warnings() {
        let v = run(&[fatima(2, "Omar", 10.0)], false);
        assert_eq!(v.result.valid_records, 1);
        assert_eq!(v.result.total_records, 1);
        assert!(v.result.warnings.is_empty(), "{:?}", v.result.warnings);
        assert_eq!(v.records[0].parent_email.as_deref(), Some("fatima.ahmed@x.com"));
        assert_eq!(v.records[0].child_age, Some(10));
    }

    #[test]
    fn out_of_range_age_warns_but_counts() {
        let v = run(&[fatima(2, "Omar", 3.0)], false);
        assert_eq!(v.result.valid_records, 1);
        assert_eq!(
            v.result.warnings,
            vec!["Row 2: child age 3 is outside normal range (5-18)".to_string()]
        );
    }

    #[test]
    fn blank_rows_are_not_counted() {
        let blank = row(3, &[("parent_first_name", Cell::Empty), ("child_age", text("  "))]);
        let v = run(&[fatima(2, "Omar", 10.0), blank], false);
        assert_eq!(v.result.total_records, 1);
        assert_eq!(v.result.valid_records, 1);
    }

    #[test]
    fn shared_email_counts_one_multi_child_family() {
        let v = run(&[fatima(2, "Omar", 10.0), fatima(3, "Layla", 7.0)], false);
        assert_eq!(v.result.multiple_children_families, 1);
        assert_eq!(v.records.len(), 2);
    }

    #[test]
    fn missing_and_malformed_email_warn() {
        let no_email = row(2, &[("first_name", text("Sam"))]);
        let bad_email = row(
            3,
            &[("first_name", text("Kim")), ("email", text("kim.at.example.com"))],
        );
        let v = run(&[no_email, bad_email], false);
        assert_eq!(v.result.valid_records, 2);
        assert_eq!(
            v.result.warnings,
            vec![
                "Row 2: missing parent email".to_string(),
                "Row 3: invalid email format \"kim.at.example.com\"".to_string(),
            ]
        );
        assert_eq!(v.records[0].parent_email, None);
        assert_eq!(v.records[1].parent_email.as_deref(), Some("kim.at.example.com"));
    }

    #[test]
    fn malformed_email_still_groups_siblings() {
        let rows = [
            row(
                2,
                &[
                    ("parent_first_name", text("Noah")),
                    ("parent_email", text("Noah.at.x.com")),
                    ("child_first_name", text("Ava")),
                    ("child_age", Cell::Number(9.0)),
                ],
            ),
            row(
                3,
                &[
                    ("parent_first_name", text("Noah")),
                    ("parent_email", text(" noah.at.x.com ")),
                    ("child_first_name", text("Eli")),
                    ("child_age", Cell::Number(12.0)),
                ],
            ),
        ];
        let v = run(&rows, false);
        assert_eq!(v.result.valid_records, 2);
        assert_eq!(v.result.multiple_children_families, 1);
        assert_eq!(v.result.warnings.len(), 2);
        assert!(v
            .records
            .iter()
            .all(|r| r.parent_email.as_deref() == Some("noah.at.x.com")));
    }

    #[test]
    fn generic_header_fallback_matches_case_and_punctuation() {
        let r = row(2, &[("PARENT FIRST NAME", text("Noor")), ("Parent-Email", text("noor@x.org"))]);
        let v = run(&[r], false);
        assert_eq!(v.records[0].parent_first_name.as_deref(), Some("Noor"));
        assert_eq!(v.records[0].parent_email.as_deref(), Some("noor@x.org"));
    }

    #[test]
    fn name_heuristic_and_strict_mode() {
        let guessable = row(2, &[("Col A", text("USR-77")), ("Col B", text("Jordan Lee"))]);
        let hopeless = row(3, &[("Col A", text("NSW")), ("Col B", text("12345"))]);

        let lenient = run(&[guessable.clone(), hopeless.clone()], false);
        assert_eq!(lenient.result.valid_records, 1);
        assert!(lenient.result.errors.is_empty());
        assert_eq!(lenient.records[0].detected_name.as_deref(), Some("Jordan Lee"));
        assert!(lenient
            .result
            .warnings
            .contains(&"Row 3: no recognizable names found - skipping".to_string()));

        let strict = run(&[guessable, hopeless], true);
        assert_eq!(strict.result.valid_records, 1);
        assert_eq!(
            strict.result.errors,
            vec!["Row 3: no recognizable names found - skipping".to_string()]
        );
    }

    #[test]
    fn declared_division_is_cross_checked_not_overwritten() {
        let mut r = fatima(2, "Omar", 10.0);
        r = SourceRow::new(
            r.row,
            r.cells()
                .map(|(h, c)| (h.to_string(), c.clone()))
                .chain([("child_division".to_string(), text("Scouts"))])
                .collect(),
        );
        let v = run(&[r], false);
        assert_eq!(v.records[0].declared_division.as_deref(), Some("Scouts"));
        assert_eq!(
            v.result.warnings,
            vec!["Row 2: division \"Scouts\" differs from expected \"Cubs\" for age 10".to_string()]
        );
    }

    #[test]
    fn validation_is_idempotent() {
        let rows = vec![
            fatima(2, "Omar", 3.0),
            row(3, &[("first_name", text("Sam"))]),
            row(4, &[("Col", text("NSW"))]),
        ];
        let a = run(&rows, false);
        let b = run(&rows, false);
        assert_eq!(a.result, b.result);
        assert_eq!(a.records, b.records);
    }

    #[test]
    fn staff_without_role_is_accepted_with_warning() {
        let cohorts = CohortTable::coarse();
        let names = LenientNameMatcher::default();
        let rules = ValidationRules {
            cohorts: &cohorts,
            names: &names,
            age_min: 5,
            age_max: 18,
            strict_unnamed_rows: false,
        };
        let rows = vec![
            row(2, &[("Full Name*", text("Tom Whitfield")), ("Email*", text("tom@x.org"))]),
            row(
                3,
                &[
                    ("Full Name*", text("Aisha Rahman")),
                    ("Role*", text("Group Leader")),
                    ("Email*", text("aisha@x.org")),
                    ("Group Assignment*", text("Cubs")),
                ],
            ),
        ];
        let v = validate_staff_rows(&rows, &rules);
        assert_eq!(v.result.valid_records, 2);
        assert!(v.result.errors.is_empty());
        assert_eq!(v.result.warnings, vec!["Row 2: Tom Whitfield has no role".to_string()]);
        assert_eq!(v.records[1].role, Some(StaffRole::Leader));
    }

    #[test]
    fn email_syntax() {
        assert!(is_valid_email("a.b@c.org"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("a@@b.org"));
        assert!(!is_valid_email("@b.org"));
        assert!(!is_valid_email("a b@c.org"));
        assert!(!is_valid_email("a@b..org"));
    }
}
