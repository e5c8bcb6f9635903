//! Channel registration persistence: channels, member access, stored bans,
//! plus the operserv/operbot service-channel presence tables.

use sqlx::SqlitePool;

use super::{map_unique, DbError};

/// One row of `channels`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChannelRow {
    pub chname: String,
    pub topic: Option<String>,
    pub url: Option<String>,
    pub createmodes: Option<String>,
    pub enforcemodes: Option<String>,
    pub tsinfo: i64,
    pub reg_time: i64,
    pub last_time: i64,
    pub flags: i64,
    pub suspender: Option<String>,
    pub suspend_reason: Option<String>,
    pub suspend_time: i64,
}

/// One row of `members`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MemberRow {
    pub chname: String,
    pub username: String,
    pub lastmod: Option<String>,
    pub level: i64,
    pub flags: i64,
    pub suspend: i64,
}

/// One row of `bans`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BanRowDb {
    pub chname: String,
    pub mask: String,
    pub reason: String,
    pub username: String,
    pub level: i64,
    pub hold: i64,
}

/// Repository for channel registration state.
pub struct ChannelRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ChannelRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn load_all(&self) -> Result<Vec<ChannelRow>, DbError> {
        Ok(sqlx::query_as::<_, ChannelRow>(
            "SELECT chname, topic, url, createmodes, enforcemodes, tsinfo, reg_time, \
             last_time, flags, suspender, suspend_reason, suspend_time FROM channels",
        )
        .fetch_all(self.pool)
        .await?)
    }

    pub async fn load_all_members(&self) -> Result<Vec<MemberRow>, DbError> {
        Ok(sqlx::query_as::<_, MemberRow>(
            "SELECT chname, username, lastmod, level, flags, suspend FROM members",
        )
        .fetch_all(self.pool)
        .await?)
    }

    pub async fn load_all_bans(&self) -> Result<Vec<BanRowDb>, DbError> {
        Ok(sqlx::query_as::<_, BanRowDb>(
            "SELECT chname, mask, reason, username, level, hold FROM bans",
        )
        .fetch_all(self.pool)
        .await?)
    }

    /// Insert a registration together with its owner access row.
    pub async fn insert(
        &self,
        chname: &str,
        owner: &str,
        tsinfo: i64,
        createmodes: &str,
        now: i64,
    ) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO channels (chname, createmodes, tsinfo, reg_time, last_time) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(chname)
        .bind(createmodes)
        .bind(tsinfo)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(map_unique)?;
        sqlx::query(
            "INSERT INTO members (chname, username, lastmod, level, flags, suspend) \
             VALUES (?, ?, ?, 200, 0, 0)",
        )
        .bind(chname)
        .bind(owner)
        .bind(owner)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Remove a registration and its dependents in one transaction.
    pub async fn delete(&self, chname: &str) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM bans WHERE chname = ?")
            .bind(chname)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM members WHERE chname = ?")
            .bind(chname)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM channels WHERE chname = ?")
            .bind(chname)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Update the free-form columns settable through SET.
    pub async fn update_settings(
        &self,
        chname: &str,
        topic: Option<&str>,
        url: Option<&str>,
        createmodes: &str,
        enforcemodes: &str,
        flags: i64,
    ) -> Result<(), DbError> {
        sqlx::query(
            "UPDATE channels SET topic = ?, url = ?, createmodes = ?, enforcemodes = ?, \
             flags = ? WHERE chname = ?",
        )
        .bind(topic)
        .bind(url)
        .bind(createmodes)
        .bind(enforcemodes)
        .bind(flags)
        .bind(chname)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_tsinfo(&self, chname: &str, tsinfo: i64) -> Result<(), DbError> {
        sqlx::query("UPDATE channels SET tsinfo = ? WHERE chname = ?")
            .bind(tsinfo)
            .bind(chname)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_suspend(
        &self,
        chname: &str,
        suspender: Option<&str>,
        reason: Option<&str>,
        expires: i64,
    ) -> Result<(), DbError> {
        sqlx::query(
            "UPDATE channels SET suspender = ?, suspend_reason = ?, suspend_time = ? \
             WHERE chname = ?",
        )
        .bind(suspender)
        .bind(reason)
        .bind(expires)
        .bind(chname)
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
        for (chname, last_time) in updates {
            sqlx::query("UPDATE channels SET last_time = ? WHERE chname = ?")
                .bind(last_time)
                .bind(chname)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    // --- member access ---

    pub async fn upsert_member(
        &self,
        chname: &str,
        username: &str,
        lastmod: &str,
        level: i64,
        flags: i64,
        suspend: i64,
    ) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO members (chname, username, lastmod, level, flags, suspend) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(chname, username) DO UPDATE SET lastmod = excluded.lastmod, \
             level = excluded.level, flags = excluded.flags, suspend = excluded.suspend",
        )
        .bind(chname)
        .bind(username)
        .bind(lastmod)
        .bind(level)
        .bind(flags)
        .bind(suspend)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_member(&self, chname: &str, username: &str) -> Result<(), DbError> {
        sqlx::query("DELETE FROM members WHERE chname = ? AND username = ?")
            .bind(chname)
            .bind(username)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    // --- stored bans ---

    pub async fn upsert_ban(
        &self,
        chname: &str,
        mask: &str,
        reason: &str,
        username: &str,
        level: i64,
        hold: i64,
    ) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO bans (chname, mask, reason, username, level, hold) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(chname, mask) DO UPDATE SET reason = excluded.reason, \
             username = excluded.username, level = excluded.level, hold = excluded.hold",
        )
        .bind(chname)
        .bind(mask)
        .bind(reason)
        .bind(username)
        .bind(level)
        .bind(hold)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_ban(&self, chname: &str, mask: &str) -> Result<(), DbError> {
        sqlx::query("DELETE FROM bans WHERE chname = ? AND mask = ?")
            .bind(chname)
            .bind(mask)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    // --- service channel presence (operserv/operbot tables) ---

    pub async fn load_service_channels(&self, table: ServiceChanTable) -> Result<Vec<(String, i64)>, DbError> {
        let sql = match table {
            ServiceChanTable::Operserv => "SELECT chname, tsinfo FROM operserv",
            ServiceChanTable::Operbot => "SELECT chname, tsinfo FROM operbot",
        };
        Ok(sqlx::query_as::<_, (String, i64)>(sql)
            .fetch_all(self.pool)
            .await?)
    }

    pub async fn add_service_channel(
        &self,
        table: ServiceChanTable,
        chname: &str,
        tsinfo: i64,
        oper: &str,
    ) -> Result<(), DbError> {
        let sql = match table {
            ServiceChanTable::Operserv => {
                "INSERT INTO operserv (chname, tsinfo, oper) VALUES (?, ?, ?) \
                 ON CONFLICT(chname) DO UPDATE SET tsinfo = excluded.tsinfo"
            }
            ServiceChanTable::Operbot => {
                "INSERT INTO operbot (chname, tsinfo, oper) VALUES (?, ?, ?) \
                 ON CONFLICT(chname) DO UPDATE SET tsinfo = excluded.tsinfo"
            }
        };
        sqlx::query(sql)
            .bind(chname)
            .bind(tsinfo)
            .bind(oper)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn del_service_channel(
        &self,
        table: ServiceChanTable,
        chname: &str,
    ) -> Result<(), DbError> {
        let sql = match table {
            ServiceChanTable::Operserv => "DELETE FROM operserv WHERE chname = ?",
            ServiceChanTable::Operbot => "DELETE FROM operbot WHERE chname = ?",
        };
        sqlx::query(sql).bind(chname).execute(self.pool).await?;
        Ok(())
    }

    // --- ignores and welcome messages ---

    pub async fn load_ignores(&self) -> Result<Vec<(String, String, String)>, DbError> {
        Ok(
            sqlx::query_as::<_, (String, String, String)>(
                "SELECT hostname, oper, reason FROM ignore_hosts",
            )
            .fetch_all(self.pool)
            .await?,
        )
    }

    pub async fn add_ignore(&self, hostname: &str, oper: &str, reason: &str) -> Result<(), DbError> {
        sqlx::query("INSERT INTO ignore_hosts (hostname, oper, reason) VALUES (?, ?, ?)")
            .bind(hostname)
            .bind(oper)
            .bind(reason)
            .execute(self.pool)
            .await
            .map_err(map_unique)?;
        Ok(())
    }

    pub async fn del_ignore(&self, hostname: &str) -> Result<(), DbError> {
        sqlx::query("DELETE FROM ignore_hosts WHERE hostname = ?")
            .bind(hostname)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn load_welcome(&self) -> Result<Vec<(i64, String)>, DbError> {
        Ok(
            sqlx::query_as::<_, (i64, String)>("SELECT id, text FROM global_welcome ORDER BY id")
                .fetch_all(self.pool)
                .await?,
        )
    }

    pub async fn set_welcome(&self, id: i64, text: &str) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO global_welcome (id, text) VALUES (?, ?) \
             ON CONFLICT(id) DO UPDATE SET text = excluded.text",
        )
        .bind(id)
        .bind(text)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn del_welcome(&self, id: i64) -> Result<bool, DbError> {
        let res = sqlx::query("DELETE FROM global_welcome WHERE id = ?")
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    // --- jupes ---

    pub async fn load_jupes(&self) -> Result<Vec<(String, String)>, DbError> {
        Ok(
            sqlx::query_as::<_, (String, String)>("SELECT servername, reason FROM jupes")
                .fetch_all(self.pool)
                .await?,
        )
    }

    pub async fn add_jupe(&self, servername: &str, reason: &str) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO jupes (servername, reason) VALUES (?, ?) \
             ON CONFLICT(servername) DO UPDATE SET reason = excluded.reason",
        )
        .bind(servername)
        .bind(reason)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn del_jupe(&self, servername: &str) -> Result<(), DbError> {
        sqlx::query("DELETE FROM jupes WHERE servername = ?")
            .bind(servername)
            .execute(self.pool)
            .await?;
        Ok(())
    }
}

/// Which service-channel table to address.
#[derive(Debug, Clone, Copy)]
pub enum ServiceChanTable {
    Operserv,
    Operbot,
}
