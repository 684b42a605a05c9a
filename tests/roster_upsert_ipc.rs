mod test_support;

use serde_json::json;
use test_support::{fixture_path, request_ok, spawn_sidecar, temp_dir};

#[test]
fn upsert_is_idempotent_and_skips_seed_data() {
    let workspace = temp_dir("rosterd-upsert");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let params = json!({
        "mode": "upsert",
        "inPath": fixture_path("families.csv").to_string_lossy()
    });

    let first = request_ok(&mut stdin, &mut reader, "2", "roster.import", params.clone());
    assert_eq!(first["mode"], json!("upsert"));
    assert_eq!(first["stats"]["families"], json!(4));
    assert_eq!(first["stats"]["scouts"], json!(5));
    assert_eq!(first["stats"]["events"], json!(0));
    assert_eq!(first["stats"]["executives"], json!(0));
    assert_eq!(first["store"]["users"], json!(4));
    assert_eq!(first["store"]["groups"], json!(3));

    let second = request_ok(&mut stdin, &mut reader, "3", "roster.import", params);
    assert_eq!(second["stats"]["families"], json!(0));
    assert_eq!(second["stats"]["guardiansUpdated"], json!(4));
    assert_eq!(second["stats"]["scouts"], json!(0));
    assert_eq!(second["stats"]["scoutsUnchanged"], json!(5));
    assert_eq!(second["store"], first["store"]);
}

#[test]
fn upsert_adds_new_children_and_keeps_existing_cohorts() {
    let workspace = temp_dir("rosterd-upsert-merge");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "roster.import",
        json!({
            "mode": "upsert",
            "rows": [{
                "parent_first_name": "Fatima",
                "parent_email": "fatima.ahmed@x.com",
                "child_first_name": "Omar",
                "child_age": 10
            }]
        }),
    );
    let merged = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "roster.import",
        json!({
            "mode": "upsert",
            "options": { "cohortPolicy": "fine" },
            "rows": [
                {
                    "parent_first_name": "Fatima",
                    "parent_email": "FATIMA.AHMED@x.com",
                    "parent_phone": "0400 999 000",
                    "child_first_name": "omar",
                    "child_age": 11
                },
                {
                    "parent_first_name": "Fatima",
                    "parent_email": "fatima.ahmed@x.com",
                    "child_first_name": "Layla",
                    "child_age": 6
                }
            ]
        }),
    );
    assert_eq!(merged["stats"]["families"], json!(0));
    assert_eq!(merged["stats"]["guardiansUpdated"], json!(1));
    assert_eq!(merged["stats"]["scouts"], json!(1));
    assert_eq!(merged["stats"]["scoutsUnchanged"], json!(1));

    let conn = rusqlite::Connection::open(workspace.join("roster.sqlite3")).expect("open db");
    let mut stmt = conn
        .prepare(
            "SELECT s.first_name, g.name FROM scouts s JOIN groups g ON g.id = s.group_id
             ORDER BY s.first_name",
        )
        .expect("prepare");
    let placed = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
        .expect("query")
        .collect::<Result<Vec<_>, _>>()
        .expect("rows");
    assert_eq!(
        placed,
        vec![
            ("Layla".to_string(), "Joeys B".to_string()),
            ("Omar".to_string(), "Cubs".to_string()),
        ]
    );
    let phone: Option<String> = conn
        .query_row(
            "SELECT phone FROM users WHERE email = 'fatima.ahmed@x.com'",
            [],
            |r| r.get(0),
        )
        .expect("phone");
    assert_eq!(phone.as_deref(), Some("0400 999 000"));
}
