use std::path::Path;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rusqlite::Connection;
use serde_json::json;
use tracing::{info, warn};

use crate::cohort::CohortTable;
use crate::config::ImportSettings;
use crate::error::ImportError;
use crate::import::{self, ImportMode, ImportPlan};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::names::LenientNameMatcher;
use crate::seed::SeedData;
use crate::source::{self, SourceRow};
use crate::stats;
use crate::validate::{self, ValidationRules};

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<ImportError> for HandlerErr {
    fn from(e: ImportError) -> Self {
        HandlerErr {
            code: e.code(),
            message: e.to_string(),
            details: None,
        }
    }
}

fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn require_db(db: Option<&Connection>) -> Result<&Connection, HandlerErr> {
    db.ok_or_else(|| HandlerErr {
        code: "no_workspace",
        message: "select a workspace first".to_string(),
        details: None,
    })
}

/// Stored settings (defaults without a workspace) with `params.options`
/// applied on top for this request only.
fn effective_settings(
    conn: Option<&Connection>,
    params: &serde_json::Value,
) -> Result<ImportSettings, HandlerErr> {
    let mut settings = match conn {
        Some(conn) => ImportSettings::load(conn).map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?,
        None => ImportSettings::default(),
    };
    match params.get("options") {
        None | Some(serde_json::Value::Null) => {}
        Some(serde_json::Value::Object(patch)) => {
            settings.apply_patch(patch).map_err(|message| HandlerErr {
                code: "bad_params",
                message,
                details: None,
            })?;
        }
        Some(_) => {
            return Err(HandlerErr {
                code: "bad_params",
                message: "options must be an object".to_string(),
                details: None,
            })
        }
    }
    Ok(settings)
}

fn rules_for<'a>(
    settings: &ImportSettings,
    cohorts: &'a CohortTable,
    names: &'a LenientNameMatcher,
) -> ValidationRules<'a> {
    ValidationRules {
        cohorts,
        names,
        age_min: settings.age_min,
        age_max: settings.age_max,
        strict_unnamed_rows: settings.strict_unnamed_rows,
    }
}

/// Rows from `params.inPath` (+ optional `sheet`) or from `params.rows`.
fn load_rows(params: &serde_json::Value) -> Result<(Vec<SourceRow>, Option<String>), HandlerErr> {
    if let Some(in_path) = params.get("inPath").and_then(|v| v.as_str()) {
        let sheet = params.get("sheet").and_then(|v| v.as_str());
        let table = source::read_path(Path::new(in_path), sheet)?;
        return Ok((table.rows, table.sha256));
    }
    if let Some(rows) = params.get("rows") {
        return Ok((source::rows_from_json(rows)?, None));
    }
    Err(HandlerErr {
        code: "bad_params",
        message: "missing inPath or rows".to_string(),
        details: None,
    })
}

fn handle_validate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let run = || -> Result<serde_json::Value, HandlerErr> {
        let settings = effective_settings(state.db.as_ref(), &req.params)?;
        let (rows, sha256) = load_rows(&req.params)?;
        let cohorts = CohortTable::for_policy(settings.cohort_policy());
        let names = LenientNameMatcher::default();
        let rules = rules_for(&settings, &cohorts, &names);
        let validated = validate::validate_family_rows(&rows, &rules);
        Ok(json!({
            "canProceed": validated.result.can_proceed(),
            "validation": validated.result,
            "cohortPolicy": cohorts.policy().as_str(),
            "sourceSha256": sha256,
        }))
    };
    match run() {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

fn handle_validate_staff(state: &mut AppState, req: &Request) -> serde_json::Value {
    let run = || -> Result<serde_json::Value, HandlerErr> {
        let settings = effective_settings(state.db.as_ref(), &req.params)?;
        let (rows, _) = load_rows(&req.params)?;
        let cohorts = CohortTable::for_policy(settings.cohort_policy());
        let names = LenientNameMatcher::default();
        let rules = rules_for(&settings, &cohorts, &names);
        let validated = validate::validate_staff_rows(&rows, &rules);
        let staff = validated
            .records
            .iter()
            .map(|r| {
                json!({
                    "row": r.row,
                    "fullName": r.full_name,
                    "role": r.role.map(|role| role.as_str()),
                    "email": r.email,
                    "group": r.group,
                    "phone": r.phone,
                    "qualification": r.qualification,
                })
            })
            .collect::<Vec<_>>();
        Ok(json!({
            "canProceed": validated.result.can_proceed(),
            "validation": validated.result,
            "staff": staff,
        }))
    };
    match run() {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

fn import_failed(e: &ImportError) -> HandlerErr {
    let message = e.to_string();
    HandlerErr {
        code: "import_failed",
        details: Some(json!({
            "success": false,
            "error": message,
            "details": e.code(),
        })),
        message,
    }
}

fn handle_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let run = || -> Result<serde_json::Value, HandlerErr> {
        let conn = require_db(state.db.as_ref())?;
        let settings = effective_settings(Some(conn), &req.params)?;

        let mode_raw = req
            .params
            .get("mode")
            .and_then(|v| v.as_str())
            .unwrap_or(settings.default_mode.as_str());
        let Some(mode) = ImportMode::parse(mode_raw) else {
            return Err(HandlerErr {
                code: "bad_params",
                message: "mode must be one of: upsert, replace".to_string(),
                details: None,
            });
        };

        let (rows, sha256) = load_rows(&req.params)?;
        let cohorts = CohortTable::for_policy(settings.cohort_policy());
        let names = LenientNameMatcher::default();
        let rules = rules_for(&settings, &cohorts, &names);
        let validated = validate::validate_family_rows(&rows, &rules);
        if !validated.result.can_proceed() {
            return Err(HandlerErr {
                code: ImportError::NoValidRecords.code(),
                message: ImportError::NoValidRecords.to_string(),
                details: Some(json!({ "validation": validated.result })),
            });
        }

        let seed_path = req
            .params
            .get("seedPath")
            .and_then(|v| v.as_str())
            .or(settings.seed_path.as_deref());
        let seed = match seed_path {
            Some(p) => SeedData::from_path(Path::new(p)),
            None => SeedData::builtin(),
        }
        .map_err(|e| HandlerErr {
            code: "bad_params",
            message: e.to_string(),
            details: None,
        })?;

        let mut rng = match settings.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        let plan = ImportPlan {
            mode,
            validated: &validated,
            cohorts: &cohorts,
            seed: &seed,
            settings: &settings,
            source_sha256: sha256.as_deref(),
        };
        let outcome = import::run_import(conn, &plan, &mut rng).map_err(|e| {
            warn!(error = %e, "roster import failed");
            import_failed(&e)
        })?;

        info!(mode = mode.as_str(), "roster import finished");
        Ok(json!({
            "success": true,
            "message": format!(
                "Imported {} families and {} scouts ({} mode)",
                outcome.stats.families,
                outcome.stats.scouts,
                mode.as_str()
            ),
            "mode": mode,
            "stats": outcome.stats,
            "validation": validated.result,
            "skipped": outcome.skipped,
            "store": outcome.store,
            "timestamp": timestamp(),
        }))
    };
    match run() {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

fn handle_stats(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state.db.as_ref()) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    match stats::collect(conn) {
        Ok(s) => ok(
            &req.id,
            json!({
                "success": true,
                "stats": s,
                "timestamp": timestamp(),
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "roster.validate" => Some(handle_validate(state, req)),
        "roster.validateStaff" => Some(handle_validate_staff(state, req)),
        "roster.import" => Some(handle_import(state, req)),
        "roster.stats" => Some(handle_stats(state, req)),
        _ => None,
    }
}
