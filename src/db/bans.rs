//! Server-wide ban persistence: klines, xlines, resvs and regex bans.
//!
//! The three mask ban types share one table keyed by `(type, mask)`.
//! A removal does not delete the row: it sets the `remove` flag and a
//! short hold so repeated SYNCs keep broadcasting the unban until the
//! row is reaped.

use sqlx::SqlitePool;

use super::{map_unique, DbError};

/// One row of `operbans`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OperBanRow {
    pub r#type: String,
    pub mask: String,
    pub reason: String,
    pub operreason: Option<String>,
    pub oper: String,
    /// Epoch expiry, 0 for permanent.
    pub hold: i64,
    /// Non-zero when this row is a pending removal marker.
    pub remove: i64,
    pub flags: i64,
    pub create_time: i64,
}

/// One row of `operbans_regexp`, with its negations joined in.
#[derive(Debug, Clone)]
pub struct RegexBanRow {
    pub id: i64,
    pub regex: String,
    pub reason: String,
    pub hold: i64,
    pub create_time: i64,
    pub oper: String,
    pub negations: Vec<(i64, String)>,
}

/// Repository for oper ban operations.
pub struct BanRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> BanRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn load_all(&self) -> Result<Vec<OperBanRow>, DbError> {
        Ok(sqlx::query_as::<_, OperBanRow>(
            "SELECT type, mask, reason, operreason, oper, hold, remove, flags, create_time \
             FROM operbans",
        )
        .fetch_all(self.pool)
        .await?)
    }

    pub async fn upsert(&self, row: &OperBanRow) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO operbans (type, mask, reason, operreason, oper, hold, remove, flags, \
             create_time) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(type, mask) DO UPDATE SET reason = excluded.reason, \
             operreason = excluded.operreason, oper = excluded.oper, hold = excluded.hold, \
             remove = excluded.remove, flags = excluded.flags, create_time = excluded.create_time",
        )
        .bind(&row.r#type)
        .bind(&row.mask)
        .bind(&row.reason)
        .bind(&row.operreason)
        .bind(&row.oper)
        .bind(row.hold)
        .bind(row.remove)
        .bind(row.flags)
        .bind(row.create_time)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Flag a ban as pending removal with an unban hold window.
    pub async fn mark_removed(
        &self,
        ban_type: &str,
        mask: &str,
        unban_hold: i64,
    ) -> Result<bool, DbError> {
        let res = sqlx::query(
            "UPDATE operbans SET remove = 1, hold = ? WHERE type = ? AND mask = ? AND remove = 0",
        )
        .bind(unban_hold)
        .bind(ban_type)
        .bind(mask)
        .execute(self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Reap rows whose hold lapsed: expired removals and expired bans.
    pub async fn reap_expired(&self, now: i64) -> Result<u64, DbError> {
        let res = sqlx::query("DELETE FROM operbans WHERE hold != 0 AND hold <= ?")
            .bind(now)
            .execute(self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    // --- regex bans ---

    pub async fn load_regexes(&self) -> Result<Vec<RegexBanRow>, DbError> {
        let rows = sqlx::query_as::<_, (i64, String, String, i64, i64, String)>(
            "SELECT id, regex, reason, hold, create_time, oper FROM operbans_regexp",
        )
        .fetch_all(self.pool)
        .await?;
        let negs = sqlx::query_as::<_, (i64, i64, String)>(
            "SELECT id, parent_id, regex FROM operbans_regexp_neg",
        )
        .fetch_all(self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, regex, reason, hold, create_time, oper)| RegexBanRow {
                id,
                regex,
                reason,
                hold,
                create_time,
                oper,
                negations: negs
                    .iter()
                    .filter(|(_, parent, _)| *parent == id)
                    .map(|(neg_id, _, neg)| (*neg_id, neg.clone()))
                    .collect(),
            })
            .collect())
    }

    pub async fn insert_regex(
        &self,
        regex: &str,
        reason: &str,
        hold: i64,
        now: i64,
        oper: &str,
    ) -> Result<i64, DbError> {
        let res = sqlx::query(
            "INSERT INTO operbans_regexp (regex, reason, hold, create_time, oper) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(regex)
        .bind(reason)
        .bind(hold)
        .bind(now)
        .bind(oper)
        .execute(self.pool)
        .await
        .map_err(map_unique)?;
        Ok(res.last_insert_rowid())
    }

    pub async fn delete_regex(&self, id: i64) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM operbans_regexp_neg WHERE parent_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM operbans_regexp WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn insert_regex_neg(
        &self,
        parent_id: i64,
        regex: &str,
        oper: &str,
    ) -> Result<i64, DbError> {
        let res = sqlx::query(
            "INSERT INTO operbans_regexp_neg (parent_id, regex, oper) VALUES (?, ?, ?)",
        )
        .bind(parent_id)
        .bind(regex)
        .bind(oper)
        .execute(self.pool)
        .await?;
        Ok(res.last_insert_rowid())
    }
}
