//! Transactional roster import.
//!
//! Every write of one run happens inside a single transaction. Any failure
//! drops the transaction uncommitted, leaving the store exactly as it was.

use chrono::{Duration, NaiveDate, NaiveTime};
use rand::seq::SliceRandom;
use rand::Rng;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cohort::CohortTable;
use crate::config::ImportSettings;
use crate::credentials;
use crate::error::{ImportError, ImportResult};
use crate::reconcile::{reconcile, DependentDraft, GuardianRegistry};
use crate::seed::{SeedData, StaffRole};
use crate::stats::{self, StoreStats};
use crate::validate::ValidatedFamilies;

/// `Replace` wipes and rebuilds everything, seed data included; it is what
/// an import does unless told otherwise. `Upsert` must be asked for and only
/// adds or refreshes families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    Replace,
    Upsert,
}

impl ImportMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replace" => Some(Self::Replace),
            "upsert" => Some(Self::Upsert),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Replace => "replace",
            Self::Upsert => "upsert",
        }
    }
}

pub struct ImportPlan<'a> {
    pub mode: ImportMode,
    pub validated: &'a ValidatedFamilies,
    pub cohorts: &'a CohortTable,
    pub seed: &'a SeedData,
    pub settings: &'a ImportSettings,
    pub source_sha256: Option<&'a str>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportStats {
    pub families: usize,
    pub scouts: usize,
    pub leaders: usize,
    pub support: usize,
    pub executives: usize,
    pub cohorts: usize,
    pub events: usize,
    pub achievements: usize,
    pub attendance: usize,
    pub total_records: usize,
    pub skipped_rows: usize,
    pub guardians_updated: usize,
    pub scouts_unchanged: usize,
    /// Guardian emails that already belonged to a staff account. The staff
    /// account is reused as-is and not counted under `families`.
    pub staff_reused: usize,
}

#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub stats: ImportStats,
    /// Store counts as committed.
    pub store: StoreStats,
    pub skipped: Vec<String>,
}

pub fn run_import<R: Rng + ?Sized>(
    conn: &Connection,
    plan: &ImportPlan<'_>,
    rng: &mut R,
) -> ImportResult<ImportOutcome> {
    if !plan.validated.result.can_proceed() {
        return Err(ImportError::NoValidRecords);
    }
    check_sampling(plan.settings)?;
    // One hash shared by every account this run creates.
    let password_hash = credentials::hash_password(&plan.settings.placeholder_password)?;
    let started_at = chrono::Utc::now().to_rfc3339();

    info!(
        mode = plan.mode.as_str(),
        policy = plan.cohorts.policy().as_str(),
        records = plan.validated.records.len(),
        "import started"
    );

    let tx = conn.unchecked_transaction()?;
    let applied = match plan.mode {
        ImportMode::Replace => replace_all(&tx, plan, &password_hash, &started_at, rng),
        ImportMode::Upsert => upsert(&tx, plan, &password_hash, &started_at),
    }
    .and_then(|(stats, skipped)| {
        record_run(&tx, plan, &stats, &started_at)?;
        let store = stats::collect(&tx)?;
        Ok(ImportOutcome {
            stats,
            store,
            skipped,
        })
    });

    match applied {
        Ok(outcome) => {
            tx.commit()?;
            info!(
                families = outcome.stats.families,
                scouts = outcome.stats.scouts,
                cohorts = outcome.stats.cohorts,
                "import committed"
            );
            Ok(outcome)
        }
        Err(e) => {
            let _ = tx.rollback();
            warn!(error = %e, "import rolled back");
            Err(e)
        }
    }
}

fn check_sampling(s: &ImportSettings) -> ImportResult<()> {
    let unit = |v: f64| (0.0..=1.0).contains(&v);
    if !unit(s.achievement_fraction)
        || !unit(s.present_probability)
        || !unit(s.attendance_min)
        || !unit(s.attendance_max)
        || s.attendance_min > s.attendance_max
    {
        return Err(ImportError::Config(
            "sampling fractions must lie in 0..=1 with attendanceMin <= attendanceMax".to_string(),
        ));
    }
    Ok(())
}

type Applied = (ImportStats, Vec<String>);

fn wipe(conn: &Connection) -> rusqlite::Result<()> {
    // Children before parents.
    for table in [
        "attendance",
        "achievements",
        "group_members",
        "scouts",
        "messages",
        "events",
        "groups",
        "users",
    ] {
        conn.execute(&format!("DELETE FROM {table}"), [])?;
    }
    Ok(())
}

/// Inserts the table's cohorts; returns `(name, id)` in table order.
fn create_cohorts(conn: &Connection, cohorts: &CohortTable) -> rusqlite::Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for (i, c) in cohorts.cohorts().into_iter().enumerate() {
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO groups(id, name, min_age, max_age, sort_order) VALUES(?, ?, ?, ?, ?)",
            (
                &id,
                &c.name,
                c.ages.map(|a| a.0),
                c.ages.map(|a| a.1),
                i as i64,
            ),
        )?;
        out.push((c.name, id));
    }
    Ok(out)
}

fn ensure_cohorts(conn: &Connection, cohorts: &CohortTable) -> rusqlite::Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for (i, c) in cohorts.cohorts().into_iter().enumerate() {
        conn.execute(
            "INSERT INTO groups(id, name, min_age, max_age, sort_order) VALUES(?, ?, ?, ?, ?)
             ON CONFLICT(name) DO NOTHING",
            (
                Uuid::new_v4().to_string(),
                &c.name,
                c.ages.map(|a| a.0),
                c.ages.map(|a| a.1),
                i as i64,
            ),
        )?;
        let id: String =
            conn.query_row("SELECT id FROM groups WHERE name = ?", [&c.name], |r| r.get(0))?;
        out.push((c.name, id));
    }
    Ok(out)
}

fn cohort_index(groups: &[(String, String)], name: &str) -> ImportResult<usize> {
    groups
        .iter()
        .position(|(n, _)| n == name)
        .ok_or_else(|| ImportError::Config(format!("cohort '{name}' is not in the active table")))
}

#[allow(clippy::too_many_arguments)]
fn insert_user(
    conn: &Connection,
    email: &str,
    password_hash: &str,
    first_name: &str,
    last_name: &str,
    phone: Option<&str>,
    role: &str,
    created_at: &str,
) -> rusqlite::Result<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users(id, email, password_hash, first_name, last_name, phone, role, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (&id, email, password_hash, first_name, last_name, phone, role, created_at),
    )?;
    Ok(id)
}

/// `(id, role)` of the account holding `email`.
fn find_user_by_email(conn: &Connection, email: &str) -> rusqlite::Result<Option<(String, String)>> {
    conn.query_row("SELECT id, role FROM users WHERE email = ?", [email], |r| {
        Ok((r.get(0)?, r.get(1)?))
    })
    .optional()
}

fn insert_scout(
    conn: &Connection,
    parent_id: &str,
    group_id: &str,
    d: &DependentDraft,
) -> rusqlite::Result<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO scouts(id, parent_id, group_id, first_name, last_name, age, join_date, source_row)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            parent_id,
            group_id,
            &d.first_name,
            &d.last_name,
            d.age,
            d.join_date.format("%Y-%m-%d").to_string(),
            d.row as i64,
        ),
    )?;
    Ok(id)
}

fn replace_all<R: Rng + ?Sized>(
    conn: &Connection,
    plan: &ImportPlan<'_>,
    password_hash: &str,
    now: &str,
    rng: &mut R,
) -> ImportResult<Applied> {
    let settings = plan.settings;
    let today = settings.reference_date();
    let mut stats = ImportStats {
        total_records: plan.validated.result.total_records,
        ..ImportStats::default()
    };

    wipe(conn)?;
    info!("store wiped");

    let groups = create_cohorts(conn, plan.cohorts)?;
    stats.cohorts = groups.len();

    let mut executive_ids = Vec::new();
    for staff in plan.seed.staff_in_tier_order() {
        let id = insert_user(
            conn,
            &staff.email.to_lowercase(),
            password_hash,
            &staff.first_name,
            &staff.last_name,
            staff.phone.as_deref(),
            staff.role.as_str(),
            now,
        )?;
        match staff.role {
            StaffRole::Executive => {
                stats.executives += 1;
                executive_ids.push(id);
            }
            StaffRole::Leader => {
                stats.leaders += 1;
                let cohort = staff
                    .cohort
                    .as_deref()
                    .and_then(|c| plan.cohorts.resolve_name(c))
                    .unwrap_or_else(|| {
                        warn!(email = %staff.email, "leader cohort not in active table, using fallback");
                        plan.cohorts.fallback().to_string()
                    });
                let gi = cohort_index(&groups, &cohort)?;
                conn.execute(
                    "INSERT INTO group_members(group_id, user_id, role) VALUES(?, ?, 'leader')",
                    (&groups[gi].1, &id),
                )?;
            }
            StaffRole::Support => stats.support += 1,
        }
    }

    let mut registry = GuardianRegistry::new();
    let rec = reconcile(&plan.validated.records, &mut registry, plan.cohorts, today);
    let mut guardian_ids = Vec::with_capacity(registry.len());
    for g in registry.guardians() {
        // A staff member can also be a parent; keep one account per email.
        let id = match find_user_by_email(conn, &g.email)? {
            Some((existing, _)) => {
                stats.staff_reused += 1;
                existing
            }
            None => {
                stats.families += 1;
                insert_user(
                    conn,
                    &g.email,
                    password_hash,
                    &g.first_name,
                    &g.last_name,
                    g.phone.as_deref(),
                    "parent",
                    now,
                )?
            }
        };
        guardian_ids.push(id);
    }

    let mut buckets: Vec<Vec<String>> = vec![Vec::new(); groups.len()];
    for d in &rec.dependents {
        let gi = cohort_index(&groups, &d.cohort)?;
        let scout_id = insert_scout(conn, &guardian_ids[d.guardian], &groups[gi].1, d)?;
        buckets[gi].push(scout_id);
    }
    stats.scouts = rec.dependents.len();
    stats.skipped_rows = rec.skipped.len();
    info!(families = stats.families, scouts = stats.scouts, "families reconciled");

    let created_by = executive_ids.first().cloned();
    let mut events: Vec<(String, NaiveDate)> = Vec::new();
    for e in &plan.seed.events {
        let start_time = NaiveTime::parse_from_str(&e.start_time, "%H:%M").map_err(|err| {
            ImportError::Config(format!("event '{}' startTime: {err}", e.title))
        })?;
        let starts = (today + Duration::days(e.start_offset_days)).and_time(start_time);
        let ends = starts + Duration::minutes(e.duration_minutes);
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO events(id, title, description, location, starts_at, ends_at, created_by)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                &id,
                &e.title,
                &e.description,
                &e.location,
                starts.format("%Y-%m-%dT%H:%M:%S").to_string(),
                ends.format("%Y-%m-%dT%H:%M:%S").to_string(),
                &created_by,
            ),
        )?;
        events.push((id, starts.date()));
    }
    stats.events = events.len();

    let awarded_on = today.format("%Y-%m-%d").to_string();
    for bucket in &buckets {
        let k = (bucket.len() as f64 * settings.achievement_fraction).round() as usize;
        for scout_id in bucket.choose_multiple(rng, k) {
            let Some(t) = plan.seed.achievements.choose(rng) else {
                break;
            };
            conn.execute(
                "INSERT INTO achievements(id, scout_id, title, description, category, awarded_on)
                 VALUES(?, ?, ?, ?, ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    scout_id,
                    &t.title,
                    &t.description,
                    &t.category,
                    &awarded_on,
                ),
            )?;
            stats.achievements += 1;
        }
    }

    for (event_id, date) in &events {
        let recorded_on = date.format("%Y-%m-%d").to_string();
        for bucket in &buckets {
            if bucket.is_empty() {
                continue;
            }
            let fraction = rng.gen_range(settings.attendance_min..=settings.attendance_max);
            let k = (bucket.len() as f64 * fraction).round() as usize;
            for scout_id in bucket.choose_multiple(rng, k) {
                let status = if rng.gen_bool(settings.present_probability) {
                    "present"
                } else {
                    "excused"
                };
                conn.execute(
                    "INSERT INTO attendance(id, event_id, scout_id, status, recorded_on)
                     VALUES(?, ?, ?, ?, ?)",
                    (
                        Uuid::new_v4().to_string(),
                        event_id,
                        scout_id,
                        status,
                        &recorded_on,
                    ),
                )?;
                stats.attendance += 1;
            }
        }
    }
    debug!(
        events = stats.events,
        achievements = stats.achievements,
        attendance = stats.attendance,
        "seed data created"
    );

    Ok((stats, rec.skipped))
}

fn upsert(
    conn: &Connection,
    plan: &ImportPlan<'_>,
    password_hash: &str,
    now: &str,
) -> ImportResult<Applied> {
    let today = plan.settings.reference_date();
    let mut stats = ImportStats {
        total_records: plan.validated.result.total_records,
        ..ImportStats::default()
    };

    let groups = ensure_cohorts(conn, plan.cohorts)?;
    stats.cohorts = groups.len();

    let mut registry = GuardianRegistry::new();
    let rec = reconcile(&plan.validated.records, &mut registry, plan.cohorts, today);
    let mut guardian_ids = Vec::with_capacity(registry.len());
    for g in registry.guardians() {
        let id = match find_user_by_email(conn, &g.email)? {
            Some((id, role)) if role != "parent" => {
                // Staff details are not the roster's to change.
                stats.staff_reused += 1;
                id
            }
            Some((id, _)) => {
                conn.execute(
                    "UPDATE users
                     SET first_name = ?, last_name = COALESCE(NULLIF(?, ''), last_name), phone = COALESCE(?, phone)
                     WHERE id = ?",
                    (&g.first_name, &g.last_name, &g.phone, &id),
                )?;
                stats.guardians_updated += 1;
                id
            }
            None => {
                stats.families += 1;
                insert_user(
                    conn,
                    &g.email,
                    password_hash,
                    &g.first_name,
                    &g.last_name,
                    g.phone.as_deref(),
                    "parent",
                    now,
                )?
            }
        };
        guardian_ids.push(id);
    }

    for d in &rec.dependents {
        let parent_id = &guardian_ids[d.guardian];
        // Existing dependents keep the cohort they were given.
        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM scouts WHERE parent_id = ? AND first_name = ? COLLATE NOCASE",
                (parent_id, &d.first_name),
                |r| r.get(0),
            )
            .optional()?;
        if existing.is_some() {
            stats.scouts_unchanged += 1;
            continue;
        }
        let gi = cohort_index(&groups, &d.cohort)?;
        insert_scout(conn, parent_id, &groups[gi].1, d)?;
        stats.scouts += 1;
    }
    stats.skipped_rows = rec.skipped.len();
    info!(
        families = stats.families,
        updated = stats.guardians_updated,
        scouts = stats.scouts,
        unchanged = stats.scouts_unchanged,
        "families upserted"
    );

    Ok((stats, rec.skipped))
}

fn record_run(
    conn: &Connection,
    plan: &ImportPlan<'_>,
    stats: &ImportStats,
    started_at: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO import_runs(id, mode, started_at, source_sha256, total_records, valid_records, families, scouts)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            plan.mode.as_str(),
            started_at,
            plan.source_sha256,
            stats.total_records as i64,
            plan.validated.result.valid_records as i64,
            stats.families as i64,
            stats.scouts as i64,
        ),
    )?;
    Ok(())
}
