mod test_support;

use serde_json::json;
use test_support::{error_code, request, spawn_sidecar, temp_dir};

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("rosterd-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let rows = json!([{ "parent_first_name": "Ana", "parent_email": "ana@x.com" }]);
    let calls = [
        ("1", "health", json!({})),
        ("2", "workspace.select", json!({ "path": workspace.to_string_lossy() })),
        ("3", "setup.get", json!({})),
        ("4", "setup.update", json!({ "section": "import", "patch": { "seed": 3 } })),
        ("5", "roster.validate", json!({ "rows": rows })),
        ("6", "roster.validateStaff", json!({ "rows": [{ "Full Name*": "Jo Park" }] })),
        ("7", "roster.import", json!({ "rows": rows })),
        ("8", "roster.stats", json!({})),
    ];
    for (id, method, params) in calls {
        let resp = request(&mut stdin, &mut reader, id, method, params);
        assert_eq!(resp["ok"], json!(true), "{method}: {resp}");
    }

    let unknown = request(&mut stdin, &mut reader, "9", "classes.list", json!({}));
    assert_eq!(error_code(&unknown), Some("not_implemented"));

    let health = request(&mut stdin, &mut reader, "10", "health", json!({}));
    assert_eq!(
        health["result"]["workspacePath"],
        json!(workspace.to_string_lossy())
    );

    drop(stdin);
    let _ = child.wait();
}
