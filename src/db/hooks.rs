//! DB-hook dispatcher.
//!
//! The `users_sync` table is an inbound mailbox: an external process
//! inserts rows naming a hook and a payload, and a scheduled scan feeds
//! each row to the registered handler. Handlers return `true` to
//! acknowledge; acknowledged rows are deleted, and any side-effect
//! writes the handlers queued are committed in the same transaction.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::state::Network;

use super::DbError;

/// A mailbox row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SyncRow {
    pub id: i64,
    pub hook: String,
    pub data: String,
}

/// SQL side effects queued by handlers, committed with the deletes.
#[derive(Debug, Default)]
pub struct ScheduledWrites {
    stmts: Vec<(String, Vec<String>)>,
}

impl ScheduledWrites {
    /// Queue one parameterised statement.
    pub fn push(&mut self, sql: impl Into<String>, binds: Vec<String>) {
        self.stmts.push((sql.into(), binds));
    }
}

/// A mailbox handler. Returns whether the row was consumed.
pub type DbHookFn = fn(&Arc<Network>, &SyncRow, &mut ScheduledWrites) -> bool;

/// Handler registry, keyed by the mailbox `hook` column.
pub struct DbHooks {
    handlers: RwLock<HashMap<String, DbHookFn>>,
}

impl DbHooks {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, hook: &str, func: DbHookFn) {
        self.handlers.write().insert(hook.to_string(), func);
    }
}

impl Default for DbHooks {
    fn default() -> Self {
        Self::new()
    }
}

/// One scan of the mailbox: count, fetch that many, dispatch, commit.
pub async fn scan(net: &Arc<Network>) -> Result<(), DbError> {
    let pool = net.db.pool();

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users_sync")
        .fetch_one(pool)
        .await?;
    if count == 0 {
        return Ok(());
    }

    let rows = sqlx::query_as::<_, SyncRow>(
        "SELECT id, hook, data FROM users_sync ORDER BY id LIMIT ?",
    )
    .bind(count)
    .fetch_all(pool)
    .await?;

    let mut consumed: Vec<i64> = Vec::new();
    let mut writes = ScheduledWrites::default();

    for row in &rows {
        let handler = net.db_hooks.handlers.read().get(&row.hook).copied();
        match handler {
            Some(func) => {
                if func(net, row, &mut writes) {
                    consumed.push(row.id);
                } else {
                    debug!(id = row.id, hook = %row.hook, "mailbox row left for retry");
                }
            }
            None => {
                warn!(hook = %row.hook, "mailbox row for unknown hook, dropping");
                consumed.push(row.id);
            }
        }
    }

    if consumed.is_empty() && writes.stmts.is_empty() {
        return Ok(());
    }

    let mut tx = pool.begin().await?;
    for id in &consumed {
        sqlx::query("DELETE FROM users_sync WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }
    for (sql, binds) in &writes.stmts {
        let mut q = sqlx::query(sql);
        for bind in binds {
            q = q.bind(bind);
        }
        q.execute(&mut *tx).await?;
    }
    tx.commit().await?;

    debug!(consumed = consumed.len(), writes = writes.stmts.len(), "mailbox scan committed");
    Ok(())
}
