use rusqlite::Connection;
use serde::Serialize;

/// Current row counts of the operational tables. Read-only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub users: i64,
    pub guardians: i64,
    pub scouts: i64,
    pub groups: i64,
    pub events: i64,
    pub achievements: i64,
    pub attendance: i64,
}

pub fn collect(conn: &Connection) -> rusqlite::Result<StoreStats> {
    let count = |sql: &str| conn.query_row(sql, [], |r| r.get::<_, i64>(0));
    Ok(StoreStats {
        users: count("SELECT COUNT(*) FROM users")?,
        guardians: count("SELECT COUNT(*) FROM users WHERE role = 'parent'")?,
        scouts: count("SELECT COUNT(*) FROM scouts")?,
        groups: count("SELECT COUNT(*) FROM groups")?,
        events: count("SELECT COUNT(*) FROM events")?,
        achievements: count("SELECT COUNT(*) FROM achievements")?,
        attendance: count("SELECT COUNT(*) FROM attendance")?,
    })
}
