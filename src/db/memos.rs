//! Memo persistence.

use sqlx::SqlitePool;

use super::DbError;

/// Memo has been read.
pub const MEMO_READ: i64 = 0x1;

/// One row of `memos`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MemoRow {
    pub id: i64,
    pub user_id: i64,
    pub source: String,
    pub source_id: i64,
    pub timestamp: i64,
    pub flags: i64,
    pub text: String,
}

/// Repository for memo operations.
pub struct MemoRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> MemoRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        user_id: i64,
        source: &str,
        source_id: i64,
        now: i64,
        text: &str,
    ) -> Result<i64, DbError> {
        let res = sqlx::query(
            "INSERT INTO memos (user_id, source, source_id, timestamp, flags, text) \
             VALUES (?, ?, ?, ?, 0, ?)",
        )
        .bind(user_id)
        .bind(source)
        .bind(source_id)
        .bind(now)
        .bind(text)
        .execute(self.pool)
        .await?;
        Ok(res.last_insert_rowid())
    }

    pub async fn list_for(&self, user_id: i64) -> Result<Vec<MemoRow>, DbError> {
        Ok(sqlx::query_as::<_, MemoRow>(
            "SELECT id, user_id, source, source_id, timestamp, flags, text \
             FROM memos WHERE user_id = ? ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(self.pool)
        .await?)
    }

    pub async fn get(&self, user_id: i64, memo_id: i64) -> Result<Option<MemoRow>, DbError> {
        Ok(sqlx::query_as::<_, MemoRow>(
            "SELECT id, user_id, source, source_id, timestamp, flags, text \
             FROM memos WHERE user_id = ? AND id = ?",
        )
        .bind(user_id)
        .bind(memo_id)
        .fetch_optional(self.pool)
        .await?)
    }

    pub async fn mark_read(&self, memo_id: i64) -> Result<(), DbError> {
        sqlx::query("UPDATE memos SET flags = flags | ? WHERE id = ?")
            .bind(MEMO_READ)
            .bind(memo_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, user_id: i64, memo_id: i64) -> Result<bool, DbError> {
        let res = sqlx::query("DELETE FROM memos WHERE user_id = ? AND id = ?")
            .bind(user_id)
            .bind(memo_id)
            .execute(self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn delete_all(&self, user_id: i64) -> Result<u64, DbError> {
        let res = sqlx::query("DELETE FROM memos WHERE user_id = ?")
            .bind(user_id)
            .execute(self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    pub async fn count(&self, user_id: i64) -> Result<i64, DbError> {
        Ok(
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM memos WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(self.pool)
                .await?,
        )
    }

    pub async fn count_unread(&self, user_id: i64) -> Result<i64, DbError> {
        Ok(sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM memos WHERE user_id = ? AND flags & ? = 0",
        )
        .bind(user_id)
        .bind(MEMO_READ)
        .fetch_one(self.pool)
        .await?)
    }
}
