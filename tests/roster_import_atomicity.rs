mod test_support;

use serde_json::json;
use test_support::{error_code, fixture_path, request, request_ok, spawn_sidecar, temp_dir};

#[test]
fn failed_guardian_insert_rolls_back_the_whole_reload() {
    let workspace = temp_dir("rosterd-import-atomicity");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let first = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "roster.import",
        json!({
            "mode": "replace",
            "inPath": fixture_path("families.csv").to_string_lossy(),
            "options": { "seed": 2 }
        }),
    );

    // Cohorts and staff go in before guardians, so this fires mid-transaction.
    let side = rusqlite::Connection::open(workspace.join("roster.sqlite3")).expect("open db");
    side.execute_batch(
        "CREATE TRIGGER fail_guardian BEFORE INSERT ON users WHEN NEW.role = 'parent'
         BEGIN SELECT RAISE(ABORT, 'forced guardian failure'); END;",
    )
    .expect("install trigger");

    let failed = request(
        &mut stdin,
        &mut reader,
        "3",
        "roster.import",
        json!({
            "mode": "replace",
            "rows": [{
                "parent_first_name": "Zoe",
                "parent_email": "zoe@x.com",
                "child_first_name": "Finn",
                "child_age": 9
            }]
        }),
    );
    assert_eq!(failed["ok"], json!(false));
    assert_eq!(error_code(&failed), Some("import_failed"));
    let message = failed["error"]["message"].as_str().expect("message");
    assert!(message.contains("forced guardian failure"), "{message}");
    assert_eq!(failed["error"]["details"]["success"], json!(false));
    assert_eq!(failed["error"]["details"]["error"], json!(message));
    assert!(failed["error"].get("stats").is_none());

    let stats = request_ok(&mut stdin, &mut reader, "4", "roster.stats", json!({}));
    assert_eq!(stats["stats"], first["store"]);

    let zoe: i64 = side
        .query_row("SELECT COUNT(*) FROM users WHERE email = 'zoe@x.com'", [], |r| r.get(0))
        .expect("count");
    assert_eq!(zoe, 0);
    let runs: i64 = side
        .query_row("SELECT COUNT(*) FROM import_runs", [], |r| r.get(0))
        .expect("runs");
    assert_eq!(runs, 1);
}

#[test]
fn failure_on_empty_store_leaves_no_cohorts() {
    let workspace = temp_dir("rosterd-import-atomicity-empty");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let side = rusqlite::Connection::open(workspace.join("roster.sqlite3")).expect("open db");
    side.execute_batch(
        "CREATE TRIGGER fail_guardian BEFORE INSERT ON users WHEN NEW.role = 'parent'
         BEGIN SELECT RAISE(ABORT, 'forced guardian failure'); END;",
    )
    .expect("install trigger");

    let failed = request(
        &mut stdin,
        &mut reader,
        "2",
        "roster.import",
        json!({
            "mode": "replace",
            "inPath": fixture_path("families.csv").to_string_lossy()
        }),
    );
    assert_eq!(error_code(&failed), Some("import_failed"));

    let stats = request_ok(&mut stdin, &mut reader, "3", "roster.stats", json!({}));
    assert_eq!(stats["stats"]["groups"], json!(0));
    assert_eq!(stats["stats"]["guardians"], json!(0));
    assert_eq!(stats["stats"]["users"], json!(0));
}
