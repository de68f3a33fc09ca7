//! Single-value slots in the `local_state` table

use sitrep_common::Result;
use sqlx::SqlitePool;

/// Write `value` under `key`, replacing any previous value
pub async fn put_slot(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO local_state (key, value, updated_at)
        VALUES (?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;

    Ok(())
}

/// Read and delete the value under `key` in one transaction
pub async fn take_slot(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let mut tx = pool.begin().await?;

    let value: Option<String> = sqlx::query_scalar("SELECT value FROM local_state WHERE key = ?")
        .bind(key)
        .fetch_optional(&mut *tx)
        .await?;

    if value.is_some() {
        sqlx::query("DELETE FROM local_state WHERE key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(value)
}

/// Read the value under `key` without consuming it
pub async fn peek_slot(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value = sqlx::query_scalar("SELECT value FROM local_state WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}
