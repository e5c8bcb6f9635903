//! Account, nickname and reset-token persistence.

use sqlx::SqlitePool;

use super::{map_unique, DbError};

/// One row of `users`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AccountRow {
    pub id: i64,
    pub username: String,
    pub password: String,
    pub email: Option<String>,
    pub suspender: Option<String>,
    pub suspend_reason: Option<String>,
    pub suspend_time: i64,
    pub reg_time: i64,
    pub last_time: i64,
    pub flags: i64,
    pub verify_token: Option<String>,
    pub language: String,
}

/// One row of `nicks`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NickRow {
    pub nickname: String,
    pub username: String,
    pub reg_time: i64,
    pub last_time: i64,
    pub flags: i64,
}

/// One row of `users_resetpass` / `users_resetemail`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ResetRow {
    pub username: String,
    pub token: String,
    pub time: i64,
    #[sqlx(default)]
    pub email: Option<String>,
}

/// Repository for account operations.
pub struct AccountRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> AccountRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Load every account at startup.
    pub async fn load_all(&self) -> Result<Vec<AccountRow>, DbError> {
        Ok(sqlx::query_as::<_, AccountRow>(
            "SELECT id, username, password, email, suspender, suspend_reason, suspend_time, \
             reg_time, last_time, flags, verify_token, language FROM users",
        )
        .fetch_all(self.pool)
        .await?)
    }

    /// Load every registered nickname at startup.
    pub async fn load_all_nicks(&self) -> Result<Vec<NickRow>, DbError> {
        Ok(sqlx::query_as::<_, NickRow>(
            "SELECT nickname, username, reg_time, last_time, flags FROM nicks",
        )
        .fetch_all(self.pool)
        .await?)
    }

    /// Insert a fresh registration, returning the new row id.
    pub async fn insert(
        &self,
        username: &str,
        password_hash: &str,
        email: Option<&str>,
        now: i64,
        flags: i64,
        verify_token: Option<&str>,
        language: &str,
    ) -> Result<i64, DbError> {
        let result = sqlx::query(
            "INSERT INTO users (username, password, email, reg_time, last_time, flags, \
             verify_token, language) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(username)
        .bind(password_hash)
        .bind(email)
        .bind(now)
        .bind(now)
        .bind(flags)
        .bind(verify_token)
        .bind(language)
        .execute(self.pool)
        .await
        .map_err(map_unique)?;
        Ok(result.last_insert_rowid())
    }

    pub async fn delete(&self, username: &str) -> Result<(), DbError> {
        sqlx::query("DELETE FROM users WHERE username = ?")
            .bind(username)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_password(&self, username: &str, hash: &str) -> Result<(), DbError> {
        sqlx::query("UPDATE users SET password = ? WHERE username = ?")
            .bind(hash)
            .bind(username)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_email(&self, username: &str, email: Option<&str>) -> Result<(), DbError> {
        sqlx::query("UPDATE users SET email = ? WHERE username = ?")
            .bind(email)
            .bind(username)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_flags(&self, username: &str, flags: i64) -> Result<(), DbError> {
        sqlx::query("UPDATE users SET flags = ? WHERE username = ?")
            .bind(flags)
            .bind(username)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_language(&self, username: &str, language: &str) -> Result<(), DbError> {
        sqlx::query("UPDATE users SET language = ? WHERE username = ?")
            .bind(language)
            .bind(username)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn clear_verify_token(&self, username: &str) -> Result<(), DbError> {
        sqlx::query("UPDATE users SET verify_token = NULL WHERE username = ?")
            .bind(username)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_suspend(
        &self,
        username: &str,
        suspender: Option<&str>,
        reason: Option<&str>,
        expires: i64,
    ) -> Result<(), DbError> {
        sqlx::query(
            "UPDATE users SET suspender = ?, suspend_reason = ?, suspend_time = ? \
             WHERE username = ?",
        )
        .bind(suspender)
        .bind(reason)
        .bind(expires)
        .bind(username)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Flush batched last-activity updates in one transaction.
    pub async fn flush_activity(&self, updates: &[(String, i64)]) -> Result<(), DbError> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for (username, last_time) in updates {
            sqlx::query("UPDATE users SET last_time = ? WHERE username = ?")
                .bind(last_time)
                .bind(username)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    // --- nicknames ---

    pub async fn insert_nick(
        &self,
        nickname: &str,
        username: &str,
        now: i64,
    ) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO nicks (nickname, username, reg_time, last_time, flags) \
             VALUES (?, ?, ?, ?, 0)",
        )
        .bind(nickname)
        .bind(username)
        .bind(now)
        .bind(now)
        .execute(self.pool)
        .await
        .map_err(map_unique)?;
        Ok(())
    }

    pub async fn delete_nick(&self, nickname: &str) -> Result<(), DbError> {
        sqlx::query("DELETE FROM nicks WHERE nickname = ?")
            .bind(nickname)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_nick_flags(&self, nickname: &str, flags: i64) -> Result<(), DbError> {
        sqlx::query("UPDATE nicks SET flags = ? WHERE nickname = ?")
            .bind(flags)
            .bind(nickname)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    // --- reset tokens ---

    /// Store a phase-1 token, replacing any previous one for the account.
    pub async fn put_resetpass(
        &self,
        username: &str,
        token: &str,
        now: i64,
    ) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO users_resetpass (username, token, time) VALUES (?, ?, ?) \
             ON CONFLICT(username) DO UPDATE SET token = excluded.token, time = excluded.time",
        )
        .bind(username)
        .bind(token)
        .bind(now)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_resetpass(&self, username: &str) -> Result<Option<ResetRow>, DbError> {
        Ok(sqlx::query_as::<_, ResetRow>(
            "SELECT username, token, time, NULL AS email FROM users_resetpass WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(self.pool)
        .await?)
    }

    pub async fn delete_resetpass(&self, username: &str) -> Result<(), DbError> {
        sqlx::query("DELETE FROM users_resetpass WHERE username = ?")
            .bind(username)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn put_resetemail(
        &self,
        username: &str,
        token: &str,
        now: i64,
        email: Option<&str>,
    ) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO users_resetemail (username, token, time, email) VALUES (?, ?, ?, ?) \
             ON CONFLICT(username) DO UPDATE SET token = excluded.token, time = excluded.time, \
             email = excluded.email",
        )
        .bind(username)
        .bind(token)
        .bind(now)
        .bind(email)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_resetemail(&self, username: &str) -> Result<Option<ResetRow>, DbError> {
        Ok(sqlx::query_as::<_, ResetRow>(
            "SELECT username, token, time, email FROM users_resetemail WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(self.pool)
        .await?)
    }

    pub async fn delete_resetemail(&self, username: &str) -> Result<(), DbError> {
        sqlx::query("DELETE FROM users_resetemail WHERE username = ?")
            .bind(username)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Reap expired reset tokens of both kinds.
    pub async fn expire_resets(&self, cutoff: i64) -> Result<u64, DbError> {
        let a = sqlx::query("DELETE FROM users_resetpass WHERE time < ?")
            .bind(cutoff)
            .execute(self.pool)
            .await?
            .rows_affected();
        let b = sqlx::query("DELETE FROM users_resetemail WHERE time < ?")
            .bind(cutoff)
            .execute(self.pool)
            .await?
            .rows_affected();
        Ok(a + b)
    }

    /// Whether an email domain is refused for registration.
    pub async fn email_domain_banned(&self, domain: &str) -> Result<bool, DbError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM email_banned_domain WHERE domain = ?")
                .bind(domain)
                .fetch_optional(self.pool)
                .await?;
        Ok(row.is_some())
    }
}
