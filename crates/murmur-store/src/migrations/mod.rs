//! Schema migrations.
//!
//! `PRAGMA user_version` records the last applied step. Every step runs in
//! its own transaction together with the version bump, so a failed step
//! leaves the schema at the previous version.

pub mod v001_initial;
pub mod v002_direct_pair_key;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

type Step = fn(&Connection) -> rusqlite::Result<()>;

const STEPS: &[(u32, &str, Step)] = &[
    (1, "initial", v001_initial::up),
    (2, "direct_pair_key", v002_direct_pair_key::up),
];

/// Schema version produced by this build.
pub const CURRENT_VERSION: u32 = 2;

pub fn run_migrations(conn: &Connection) -> Result<()> {
    let applied: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if applied > CURRENT_VERSION {
        return Err(StoreError::Migration {
            version: applied,
            reason: format!("database is newer than this build (v{CURRENT_VERSION})"),
        });
    }

    for &(version, name, up) in STEPS.iter().filter(|(v, _, _)| *v > applied) {
        tracing::info!(version, name, "applying schema migration");

        let tx = conn.unchecked_transaction()?;
        up(&tx).map_err(|e| StoreError::Migration {
            version,
            reason: e.to_string(),
        })?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
    }

    tracing::debug!(version = CURRENT_VERSION, "schema up to date");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(conn: &Connection) -> u32 {
        conn.pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn fresh_database_reaches_current_version() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(version(&conn), CURRENT_VERSION);

        run_migrations(&conn).unwrap();
        assert_eq!(version(&conn), CURRENT_VERSION);
    }

    #[test]
    fn steps_end_at_current_version() {
        assert_eq!(STEPS.last().map(|(v, _, _)| *v), Some(CURRENT_VERSION));
    }

    #[test]
    fn newer_schema_is_refused() {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", CURRENT_VERSION + 1)
            .unwrap();
        assert!(matches!(
            run_migrations(&conn),
            Err(StoreError::Migration { .. })
        ));
    }
}
