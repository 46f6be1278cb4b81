//! Namespaced key-value persistence (spec.md §4.1).
//!
//! `get`/`set`/`delete`/`get_group`/`keys` form the full contract. Every
//! implementation must make `set` durable before it returns and last-writer-wins
//! within a namespace; callers serialize concurrent writes to the same key via
//! the per-workflow dispatcher affinity (§4.5) or the user lock (§4.4).

use std::collections::BTreeMap;
use std::sync::Mutex;

use rusqlite::{params, Connection};
use serde_json::Value;

/// Fixed namespaces (spec.md §6, "Persistence layout").
pub mod ns {
    pub const WORKFLOW: &str = "workflow";
    pub const REQUEST: &str = "request";
    pub const CERTIFICATE: &str = "certificate";
    pub const AUDIT_TRAILS: &str = "audit_trails";
    pub const ZOMBIE_CHECK_SCHEDULES: &str = "zombie_check_schedules";
    pub const ZOMBIE_CHECKS_BY_WORKFLOW: &str = "zombie_checks_by_workflow";
    pub const POLICY_APPLICATIONS: &str = "policy_applications";
    pub const SYSTEM_DATA: &str = "system_data";
    pub const USER_LOCK: &str = "user_lock";

    /// Per-workflow checkpoint-accumulator namespace (spec.md §6: `gdpr-checkpoint-{workflowId}`).
    pub fn checkpoint(workflow_id: &str) -> String {
        format!("gdpr-checkpoint-{workflow_id}")
    }
}

pub trait StateStore: Send + Sync {
    fn get(&self, namespace: &str, key: &str) -> anyhow::Result<Option<Value>>;
    fn set(&self, namespace: &str, key: &str, value: Value) -> anyhow::Result<()>;
    fn delete(&self, namespace: &str, key: &str) -> anyhow::Result<()>;
    fn get_group(&self, namespace: &str) -> anyhow::Result<Vec<Value>>;
    fn keys(&self, namespace: &str, prefix: &str) -> anyhow::Result<Vec<String>>;
}

/// In-memory store used by tests and by the CLI's ephemeral mode.
#[derive(Default)]
pub struct MemoryStateStore {
    data: Mutex<BTreeMap<(String, String), Value>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, namespace: &str, key: &str) -> anyhow::Result<Option<Value>> {
        let data = self.data.lock().expect("state store lock poisoned");
        Ok(data.get(&(namespace.to_string(), key.to_string())).cloned())
    }

    fn set(&self, namespace: &str, key: &str, value: Value) -> anyhow::Result<()> {
        let mut data = self.data.lock().expect("state store lock poisoned");
        data.insert((namespace.to_string(), key.to_string()), value);
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> anyhow::Result<()> {
        let mut data = self.data.lock().expect("state store lock poisoned");
        data.remove(&(namespace.to_string(), key.to_string()));
        Ok(())
    }

    fn get_group(&self, namespace: &str) -> anyhow::Result<Vec<Value>> {
        let data = self.data.lock().expect("state store lock poisoned");
        Ok(data
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, v)| v.clone())
            .collect())
    }

    fn keys(&self, namespace: &str, prefix: &str) -> anyhow::Result<Vec<String>> {
        let data = self.data.lock().expect("state store lock poisoned");
        Ok(data
            .keys()
            .filter(|(ns, k)| ns == namespace && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect())
    }
}

/// Durable sqlite-backed store. A single table `(namespace, key, value)` with a
/// composite primary key gives last-writer-wins semantics for free; every write
/// runs in its own transaction so it is durable before `set` returns.
pub struct SqliteStateStore {
    conn: Mutex<Connection>,
}

impl SqliteStateStore {
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (namespace, key)
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> anyhow::Result<Self> {
        Self::open(":memory:")
    }
}

impl StateStore for SqliteStateStore {
    fn get(&self, namespace: &str, key: &str) -> anyhow::Result<Option<Value>> {
        let conn = self.conn.lock().expect("sqlite connection lock poisoned");
        let mut stmt =
            conn.prepare("SELECT value FROM kv WHERE namespace = ?1 AND key = ?2")?;
        let mut rows = stmt.query(params![namespace, key])?;
        if let Some(row) = rows.next()? {
            let raw: String = row.get(0)?;
            Ok(Some(serde_json::from_str(&raw)?))
        } else {
            Ok(None)
        }
    }

    fn set(&self, namespace: &str, key: &str, value: Value) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("sqlite connection lock poisoned");
        let raw = serde_json::to_string(&value)?;
        conn.execute(
            "INSERT INTO kv (namespace, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(namespace, key) DO UPDATE SET value = excluded.value",
            params![namespace, key, raw],
        )?;
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("sqlite connection lock poisoned");
        conn.execute(
            "DELETE FROM kv WHERE namespace = ?1 AND key = ?2",
            params![namespace, key],
        )?;
        Ok(())
    }

    fn get_group(&self, namespace: &str) -> anyhow::Result<Vec<Value>> {
        let conn = self.conn.lock().expect("sqlite connection lock poisoned");
        let mut stmt = conn.prepare("SELECT value FROM kv WHERE namespace = ?1")?;
        let rows = stmt.query_map(params![namespace], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for raw in rows {
            out.push(serde_json::from_str(&raw?)?);
        }
        Ok(out)
    }

    fn keys(&self, namespace: &str, prefix: &str) -> anyhow::Result<Vec<String>> {
        let conn = self.conn.lock().expect("sqlite connection lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT key FROM kv WHERE namespace = ?1 AND key LIKE ?2",
        )?;
        let like = format!("{prefix}%");
        let rows = stmt.query_map(params![namespace, like], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for key in rows {
            out.push(key?);
        }
        Ok(out)
    }
}
