// Custom migration runner (§5, §9 Open Question (a)).
//
// sqlx ships its own `migrate!` macro, but it tracks applied migrations in
// a table named `_sqlx_migrations`. This store's schema calls for a
// `__migrations` table instead, so migrations are embedded and applied by
// hand: each file's contents hash to a checksum recorded alongside its
// name, and a migration whose checksum doesn't match what's on disk is
// treated as a data error rather than silently re-applied.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use sqlx::SqlitePool;

use crate::error::{DiscoveryError, Result};

struct Migration {
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    name: "0001_init",
    sql: include_str!("../../migrations/0001_init.sql"),
}];

fn checksum(sql: &str) -> String {
    let mut hasher = DefaultHasher::new();
    sql.hash(&mut hasher);
    format!("{:x}", hasher.finish())
}

pub async fn run(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS __migrations (
            name TEXT PRIMARY KEY,
            checksum TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await
    .map_err(persistence_error)?;

    for migration in MIGRATIONS {
        let existing: Option<(String,)> =
            sqlx::query_as("SELECT checksum FROM __migrations WHERE name = ?")
                .bind(migration.name)
                .fetch_optional(pool)
                .await
                .map_err(persistence_error)?;

        let expected = checksum(migration.sql);

        match existing {
            Some((recorded,)) if recorded == expected => continue,
            Some((recorded,)) => {
                return Err(DiscoveryError::PersistenceConflict {
                    entity: "migration".into(),
                    key: migration.name.into(),
                    reason: format!("checksum mismatch: recorded {recorded}, expected {expected}"),
                });
            }
            None => {
                let mut tx = pool.begin().await.map_err(persistence_error)?;
                for statement in migration.sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
                    sqlx::query(statement).execute(&mut *tx).await.map_err(persistence_error)?;
                }
                sqlx::query(
                    "INSERT INTO __migrations (name, checksum, applied_at) VALUES (?, ?, datetime('now'))",
                )
                .bind(migration.name)
                .bind(&expected)
                .execute(&mut *tx)
                .await
                .map_err(persistence_error)?;
                tx.commit().await.map_err(persistence_error)?;
            }
        }
    }

    Ok(())
}

fn persistence_error(e: sqlx::Error) -> DiscoveryError {
    DiscoveryError::PersistenceConflict {
        entity: "migration".into(),
        key: String::new(),
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_stable() {
        assert_eq!(checksum("select 1"), checksum("select 1"));
        assert_ne!(checksum("select 1"), checksum("select 2"));
    }
}
