use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::db::{init_db, open_connection};
use crate::error::Result;
use sotto_core::time::epoch_ms;

/// How often blocking list operations re-check the store.
const POLL_INTERVAL_MS: u64 = 200;

/// Shared key-value / hash / list / set store with millisecond expiry.
///
/// Wraps a single SQLite connection in a `Mutex`, the same handle discipline
/// the rest of the workspace uses. Long-poll loops must run on their own
/// handle (see [`Store::sibling`]) so they never contend with request
/// traffic for the connection.
pub struct Store {
    conn: Mutex<Connection>,
    path: String,
    prefix: String,
    /// Local nudge for blocking pops; cross-process waiters rely on polling.
    wakeup: Arc<Notify>,
}

impl Store {
    /// Open (and initialise) the store at `path`, namespacing every
    /// per-entity key with `prefix`.
    pub fn open(path: &str, prefix: &str) -> Result<Self> {
        let conn = open_connection(path)?;
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_string(),
            prefix: prefix.to_string(),
            wakeup: Arc::new(Notify::new()),
        })
    }

    /// A second handle onto the same store: own connection, shared wakeup.
    pub fn sibling(&self) -> Result<Self> {
        let conn = open_connection(&self.path)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: self.path.clone(),
            prefix: self.prefix.clone(),
            wakeup: Arc::clone(&self.wakeup),
        })
    }

    /// Apply the namespace prefix. The two cross-process handoff queues are
    /// deliberately shared between deployments and stay unprefixed.
    fn k(&self, key: &str) -> String {
        if key == crate::SUSPENDED_TRANSCRIPTS || key == crate::TRANSCRIBING_SERVERS {
            return key.to_string();
        }
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.prefix, key)
        }
    }

    // ── strings ───────────────────────────────────────────────────────────────

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let key = self.k(key);
        let conn = self.conn.lock().unwrap();
        if evict_if_expired(&conn, &key, epoch_ms())? {
            return Ok(None);
        }
        Ok(conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |r| {
                r.get(0)
            })
            .optional()?)
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        self.set_with_ttl(key, value, None)
    }

    pub fn set_ex(&self, key: &str, value: &str, ttl_ms: i64) -> Result<()> {
        self.set_with_ttl(key, value, Some(ttl_ms))
    }

    fn set_with_ttl(&self, key: &str, value: &str, ttl_ms: Option<i64>) -> Result<()> {
        let key = self.k(key);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        write_expiry(&conn, &key, ttl_ms.map(|ttl| epoch_ms() + ttl))?;
        Ok(())
    }

    /// Atomically replace `key` with `value` (and TTL) and return the prior
    /// value. Exactly one of any set of concurrent callers observes `None`
    /// for an absent key — the first-writer-wins primitive.
    pub fn get_and_set(
        &self,
        key: &str,
        value: &str,
        ttl_ms: Option<i64>,
    ) -> Result<Option<String>> {
        let key = self.k(key);
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = epoch_ms();
        let prior = if evict_if_expired(&tx, &key, now)? {
            None
        } else {
            tx.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |r| {
                r.get(0)
            })
            .optional()?
        };
        tx.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        write_expiry(&tx, &key, ttl_ms.map(|ttl| now + ttl))?;
        tx.commit()?;
        Ok(prior)
    }

    /// Delete a key of any kind. Returns true if anything was removed.
    pub fn del(&self, key: &str) -> Result<bool> {
        let key = self.k(key);
        let conn = self.conn.lock().unwrap();
        Ok(delete_key(&conn, &key)?)
    }

    pub fn exists(&self, key: &str) -> Result<bool> {
        let key = self.k(key);
        let conn = self.conn.lock().unwrap();
        if evict_if_expired(&conn, &key, epoch_ms())? {
            return Ok(false);
        }
        let n: i64 = conn.query_row(
            "SELECT (SELECT COUNT(*) FROM kv WHERE key = ?1)
                  + (SELECT COUNT(*) FROM hashes WHERE key = ?1)
                  + (SELECT COUNT(*) FROM lists WHERE key = ?1)
                  + (SELECT COUNT(*) FROM sets WHERE key = ?1)",
            params![key],
            |r| r.get(0),
        )?;
        Ok(n > 0)
    }

    /// (Re)arm the expiry of an existing key.
    pub fn expire_ms(&self, key: &str, ttl_ms: i64) -> Result<()> {
        let key = self.k(key);
        let conn = self.conn.lock().unwrap();
        write_expiry(&conn, &key, Some(epoch_ms() + ttl_ms))?;
        Ok(())
    }

    /// Milliseconds until expiry; `None` when the key has no expiry set.
    pub fn ttl_remaining_ms(&self, key: &str) -> Result<Option<i64>> {
        let key = self.k(key);
        let conn = self.conn.lock().unwrap();
        let at: Option<i64> = conn
            .query_row(
                "SELECT expires_at FROM expiry WHERE key = ?1",
                params![key],
                |r| r.get(0),
            )
            .optional()?;
        Ok(at.map(|at| at - epoch_ms()))
    }

    // ── hashes ────────────────────────────────────────────────────────────────

    /// Merge fields into a hash. Fields not named here are left untouched,
    /// which is what lets concurrent writers update disjoint fields safely.
    pub fn hset_all(&self, key: &str, fields: &[(&str, String)]) -> Result<()> {
        let key = self.k(key);
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        for (field, value) in fields {
            tx.execute(
                "INSERT INTO hashes (key, field, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key, field) DO UPDATE SET value = excluded.value",
                params![key, field, value],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let key = self.k(key);
        let conn = self.conn.lock().unwrap();
        if evict_if_expired(&conn, &key, epoch_ms())? {
            return Ok(None);
        }
        Ok(conn
            .query_row(
                "SELECT value FROM hashes WHERE key = ?1 AND field = ?2",
                params![key, field],
                |r| r.get(0),
            )
            .optional()?)
    }

    /// All fields of a hash; empty map when the key is absent or expired.
    pub fn hget_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let key = self.k(key);
        let conn = self.conn.lock().unwrap();
        if evict_if_expired(&conn, &key, epoch_ms())? {
            return Ok(HashMap::new());
        }
        let mut stmt = conn.prepare("SELECT field, value FROM hashes WHERE key = ?1")?;
        let rows = stmt.query_map(params![key], |r| Ok((r.get(0)?, r.get(1)?)))?;
        let mut map = HashMap::new();
        for row in rows {
            let (field, value): (String, String) = row?;
            map.insert(field, value);
        }
        Ok(map)
    }

    pub fn hdel(&self, key: &str, fields: &[&str]) -> Result<()> {
        let key = self.k(key);
        let conn = self.conn.lock().unwrap();
        for field in fields {
            conn.execute(
                "DELETE FROM hashes WHERE key = ?1 AND field = ?2",
                params![key, field],
            )?;
        }
        Ok(())
    }

    // ── sets ──────────────────────────────────────────────────────────────────

    pub fn sadd(&self, key: &str, member: &str) -> Result<()> {
        let key = self.k(key);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO sets (key, member) VALUES (?1, ?2)",
            params![key, member],
        )?;
        Ok(())
    }

    pub fn srem(&self, key: &str, member: &str) -> Result<()> {
        let key = self.k(key);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM sets WHERE key = ?1 AND member = ?2",
            params![key, member],
        )?;
        Ok(())
    }

    pub fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let key = self.k(key);
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT member FROM sets WHERE key = ?1")?;
        let rows = stmt.query_map(params![key], |r| r.get(0))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn scard(&self, key: &str) -> Result<i64> {
        let key = self.k(key);
        let conn = self.conn.lock().unwrap();
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM sets WHERE key = ?1",
            params![key],
            |r| r.get(0),
        )?)
    }

    // ── lists ─────────────────────────────────────────────────────────────────

    /// Push to the left (head) of a list. Lists here carry newest-first data.
    pub fn lpush(&self, key: &str, value: &str) -> Result<()> {
        let key = self.k(key);
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let head: i64 = tx.query_row(
            "SELECT COALESCE(MIN(pos), 1) - 1 FROM lists WHERE key = ?1",
            params![key],
            |r| r.get(0),
        )?;
        tx.execute(
            "INSERT INTO lists (key, pos, value) VALUES (?1, ?2, ?3)",
            params![key, head, value],
        )?;
        tx.commit()?;
        self.wakeup.notify_waiters();
        Ok(())
    }

    /// Push several entries to the head in one atomic step, in argument
    /// order (the last argument ends up leftmost). Two processes writing
    /// marker/payload pairs concurrently can interleave pairs, but never the
    /// inside of one.
    pub fn lpush_many(&self, key: &str, values: &[&str]) -> Result<()> {
        let key = self.k(key);
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        for value in values {
            let head: i64 = tx.query_row(
                "SELECT COALESCE(MIN(pos), 1) - 1 FROM lists WHERE key = ?1",
                params![key],
                |r| r.get(0),
            )?;
            tx.execute(
                "INSERT INTO lists (key, pos, value) VALUES (?1, ?2, ?3)",
                params![key, head, value],
            )?;
        }
        tx.commit()?;
        self.wakeup.notify_waiters();
        Ok(())
    }

    /// Push to the right (tail) of a list.
    pub fn rpush(&self, key: &str, value: &str) -> Result<()> {
        let key = self.k(key);
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let tail: i64 = tx.query_row(
            "SELECT COALESCE(MAX(pos), -1) + 1 FROM lists WHERE key = ?1",
            params![key],
            |r| r.get(0),
        )?;
        tx.execute(
            "INSERT INTO lists (key, pos, value) VALUES (?1, ?2, ?3)",
            params![key, tail, value],
        )?;
        tx.commit()?;
        self.wakeup.notify_waiters();
        Ok(())
    }

    /// Left-to-right slice with list semantics: 0 is the head, -1 the tail.
    pub fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let key = self.k(key);
        let conn = self.conn.lock().unwrap();
        if evict_if_expired(&conn, &key, epoch_ms())? {
            return Ok(Vec::new());
        }
        let len: i64 = conn.query_row(
            "SELECT COUNT(*) FROM lists WHERE key = ?1",
            params![key],
            |r| r.get(0),
        )?;
        if len == 0 {
            return Ok(Vec::new());
        }
        let norm = |i: i64| if i < 0 { (len + i).max(0) } else { i.min(len - 1) };
        let (start, stop) = (norm(start), norm(stop));
        if start > stop {
            return Ok(Vec::new());
        }
        let mut stmt = conn.prepare(
            "SELECT value FROM lists WHERE key = ?1 ORDER BY pos ASC LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt.query_map(params![key, stop - start + 1, start], |r| r.get(0))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn llen(&self, key: &str) -> Result<i64> {
        let key = self.k(key);
        let conn = self.conn.lock().unwrap();
        if evict_if_expired(&conn, &key, epoch_ms())? {
            return Ok(0);
        }
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM lists WHERE key = ?1",
            params![key],
            |r| r.get(0),
        )?)
    }

    /// Remove every occurrence of `value`. Returns the number removed.
    pub fn lrem(&self, key: &str, value: &str) -> Result<usize> {
        let key = self.k(key);
        let conn = self.conn.lock().unwrap();
        Ok(conn.execute(
            "DELETE FROM lists WHERE key = ?1 AND value = ?2",
            params![key, value],
        )?)
    }

    /// Pop from the right (tail).
    pub fn rpop(&self, key: &str) -> Result<Option<String>> {
        let key = self.k(key);
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let row: Option<(i64, String)> = tx
            .query_row(
                "SELECT pos, value FROM lists WHERE key = ?1
                 ORDER BY pos DESC LIMIT 1",
                params![key],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        let out = match row {
            Some((pos, value)) => {
                tx.execute(
                    "DELETE FROM lists WHERE key = ?1 AND pos = ?2",
                    params![key, pos],
                )?;
                Some(value)
            }
            None => None,
        };
        tx.commit()?;
        Ok(out)
    }

    /// Blocking right-pop with a bounded deadline. Polls the store (the file
    /// is shared across processes) and listens for local push wakeups.
    /// Returns `None` on timeout.
    pub async fn brpop(&self, key: &str, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(value) = self.rpop(key)? {
                return Ok(Some(value));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let nap = (deadline - now).min(Duration::from_millis(POLL_INTERVAL_MS));
            tokio::select! {
                _ = tokio::time::sleep(nap) => {}
                _ = self.wakeup.notified() => {}
            }
        }
    }

    /// Blocking head read: waits until the list has a head element and
    /// returns it without removing it (a head-to-head move leaves the list
    /// unchanged). Used by suspend to confirm a live peer is advertising.
    pub async fn blocking_head(&self, key: &str, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let full = self.k(key);
                let conn = self.conn.lock().unwrap();
                let head: Option<String> = conn
                    .query_row(
                        "SELECT value FROM lists WHERE key = ?1
                         ORDER BY pos ASC LIMIT 1",
                        params![full],
                        |r| r.get(0),
                    )
                    .optional()?;
                if head.is_some() {
                    return Ok(head);
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let nap = (deadline - now).min(Duration::from_millis(POLL_INTERVAL_MS));
            tokio::select! {
                _ = tokio::time::sleep(nap) => {}
                _ = self.wakeup.notified() => {}
            }
        }
    }

    /// Nudge local blocking waiters so shutdown is prompt.
    pub fn wake_blockers(&self) {
        self.wakeup.notify_waiters();
    }

    // ── maintenance ───────────────────────────────────────────────────────────

    /// Logical (prefix-stripped) keys starting with `logical_prefix`.
    pub fn keys_with_prefix(&self, logical_prefix: &str) -> Result<Vec<String>> {
        let full = self.k(logical_prefix);
        let pattern = format!("{}%", full.replace('%', "\\%").replace('_', "\\_"));
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT key FROM kv WHERE key LIKE ?1 ESCAPE '\\'
             UNION SELECT DISTINCT key FROM hashes WHERE key LIKE ?1 ESCAPE '\\'
             UNION SELECT DISTINCT key FROM lists WHERE key LIKE ?1 ESCAPE '\\'
             UNION SELECT DISTINCT key FROM sets WHERE key LIKE ?1 ESCAPE '\\'",
        )?;
        let rows = stmt.query_map(params![pattern], |r| r.get::<_, String>(0))?;
        let strip = if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}:", self.prefix)
        };
        Ok(rows
            .filter_map(|r| r.ok())
            .map(|k| k.strip_prefix(&strip).map(String::from).unwrap_or(k))
            .collect())
    }

    /// Remove every key whose expiry has passed. Returns the count removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let now = epoch_ms();
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT key FROM expiry WHERE expires_at <= ?1")?;
        let dead: Vec<String> = stmt
            .query_map(params![now], |r| r.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        for key in &dead {
            delete_key(&conn, key)?;
        }
        Ok(dead.len())
    }
}

// ── row-level helpers (full keys, caller holds the connection) ────────────────

fn write_expiry(conn: &Connection, key: &str, expires_at: Option<i64>) -> rusqlite::Result<()> {
    match expires_at {
        Some(at) => {
            conn.execute(
                "INSERT INTO expiry (key, expires_at) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET expires_at = excluded.expires_at",
                params![key, at],
            )?;
        }
        None => {
            conn.execute("DELETE FROM expiry WHERE key = ?1", params![key])?;
        }
    }
    Ok(())
}

fn evict_if_expired(conn: &Connection, key: &str, now: i64) -> rusqlite::Result<bool> {
    let expires_at: Option<i64> = conn
        .query_row(
            "SELECT expires_at FROM expiry WHERE key = ?1",
            params![key],
            |r| r.get(0),
        )
        .optional()?;
    match expires_at {
        Some(at) if at <= now => {
            delete_key(conn, key)?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

fn delete_key(conn: &Connection, key: &str) -> rusqlite::Result<bool> {
    let mut removed = 0;
    removed += conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
    removed += conn.execute("DELETE FROM hashes WHERE key = ?1", params![key])?;
    removed += conn.execute("DELETE FROM lists WHERE key = ?1", params![key])?;
    removed += conn.execute("DELETE FROM sets WHERE key = ?1", params![key])?;
    conn.execute("DELETE FROM expiry WHERE key = ?1", params![key])?;
    Ok(removed > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let store = Store::open(path.to_str().unwrap(), "t").unwrap();
        (dir, store)
    }

    #[test]
    fn set_get_roundtrip_and_delete() {
        let (_dir, store) = temp_store();
        store.set("cli:abc", "hello").unwrap();
        assert_eq!(store.get("cli:abc").unwrap().as_deref(), Some("hello"));
        assert!(store.del("cli:abc").unwrap());
        assert_eq!(store.get("cli:abc").unwrap(), None);
    }

    #[test]
    fn expired_keys_read_as_absent() {
        let (_dir, store) = temp_store();
        store.set_ex("mark", "whisper", -1).unwrap();
        assert_eq!(store.get("mark").unwrap(), None);
    }

    #[test]
    fn get_and_set_returns_prior_exactly_once() {
        let (_dir, store) = temp_store();
        let first = store.get_and_set("ccc:a|b|c", "whisper", Some(60_000)).unwrap();
        assert_eq!(first, None);
        let second = store.get_and_set("ccc:a|b|c", "whisper", Some(60_000)).unwrap();
        assert_eq!(second.as_deref(), Some("whisper"));
    }

    #[test]
    fn get_and_set_treats_expired_prior_as_absent() {
        let (_dir, store) = temp_store();
        store.set_ex("mark", "old", -1).unwrap();
        let prior = store.get_and_set("mark", "new", None).unwrap();
        assert_eq!(prior, None);
    }

    #[test]
    fn hash_merge_preserves_other_fields() {
        let (_dir, store) = temp_store();
        store
            .hset_all("cli:1", &[("token", "aa".into()), ("secret", "bb".into())])
            .unwrap();
        store.hset_all("cli:1", &[("secret", "cc".into())]).unwrap();
        let map = store.hget_all("cli:1").unwrap();
        assert_eq!(map.get("token").map(String::as_str), Some("aa"));
        assert_eq!(map.get("secret").map(String::as_str), Some("cc"));
    }

    #[test]
    fn lists_are_newest_first_under_lpush() {
        let (_dir, store) = temp_store();
        store.lpush("cts:conv", "t1").unwrap();
        store.lpush("cts:conv", "t2").unwrap();
        store.lpush("cts:conv", "t3").unwrap();
        assert_eq!(store.lrange("cts:conv", 0, -1).unwrap(), ["t3", "t2", "t1"]);
        // rpop drains from the oldest end
        assert_eq!(store.rpop("cts:conv").unwrap().as_deref(), Some("t1"));
        assert_eq!(store.llen("cts:conv").unwrap(), 2);
    }

    #[test]
    fn lrange_negative_indices() {
        let (_dir, store) = temp_store();
        for v in ["a", "b", "c", "d"] {
            store.rpush("l", v).unwrap();
        }
        assert_eq!(store.lrange("l", -2, -1).unwrap(), ["c", "d"]);
        assert_eq!(store.lrange("l", 1, 2).unwrap(), ["b", "c"]);
    }

    #[test]
    fn sets_dedupe_members() {
        let (_dir, store) = temp_store();
        store.sadd("pro-clients:p1", "c1").unwrap();
        store.sadd("pro-clients:p1", "c1").unwrap();
        store.sadd("pro-clients:p1", "c2").unwrap();
        assert_eq!(store.scard("pro-clients:p1").unwrap(), 2);
        store.srem("pro-clients:p1", "c1").unwrap();
        assert_eq!(store.smembers("pro-clients:p1").unwrap(), ["c2"]);
    }

    #[test]
    fn shared_queues_are_visible_across_prefixes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let prod = Store::open(path.to_str().unwrap(), "prod").unwrap();
        let test = Store::open(path.to_str().unwrap(), "test").unwrap();
        prod.lpush(crate::TRANSCRIBING_SERVERS, "server-1").unwrap();
        assert_eq!(
            test.lrange(crate::TRANSCRIBING_SERVERS, 0, -1).unwrap(),
            ["server-1"]
        );
        // but prefixed keys are isolated
        prod.set("con:1", "x").unwrap();
        assert_eq!(test.get("con:1").unwrap(), None);
    }

    #[test]
    fn keys_with_prefix_strips_namespace() {
        let (_dir, store) = temp_store();
        store.hset_all("tra:t1", &[("startTime", "1".into())]).unwrap();
        store.hset_all("tra:t2", &[("startTime", "2".into())]).unwrap();
        store.set("con:c1", "x").unwrap();
        let mut keys = store.keys_with_prefix("tra:").unwrap();
        keys.sort();
        assert_eq!(keys, ["tra:t1", "tra:t2"]);
    }

    #[test]
    fn purge_expired_sweeps_all_kinds() {
        let (_dir, store) = temp_store();
        store.set_ex("a", "1", -1).unwrap();
        store.hset_all("b", &[("f", "1".into())]).unwrap();
        store.expire_ms("b", -1).unwrap();
        store.set("keep", "1").unwrap();
        let purged = store.purge_expired().unwrap();
        assert_eq!(purged, 2);
        assert_eq!(store.get("keep").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn lpush_many_lands_as_a_contiguous_pair() {
        let (_dir, store) = temp_store();
        store.lpush("tcp:x", "0|old").unwrap();
        store.lpush_many("tcp:x", &["id:M1", "0|new"]).unwrap();
        assert_eq!(
            store.lrange("tcp:x", 0, -1).unwrap(),
            ["0|new", "id:M1", "0|old"]
        );
    }

    #[tokio::test]
    async fn brpop_times_out_on_empty_list() {
        let (_dir, store) = temp_store();
        let got = store
            .brpop("empty", Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn brpop_sees_a_push_from_a_sibling_handle() {
        let (_dir, store) = temp_store();
        let sibling = store.sibling().unwrap();
        let waiter = tokio::spawn(async move {
            sibling.brpop("q", Duration::from_secs(5)).await.unwrap()
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.lpush("q", "job-1").unwrap();
        let got = waiter.await.unwrap();
        assert_eq!(got.as_deref(), Some("job-1"));
    }

    #[tokio::test]
    async fn blocking_head_does_not_consume() {
        let (_dir, store) = temp_store();
        store.lpush("servers", "s1").unwrap();
        let head = store
            .blocking_head("servers", Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(head.as_deref(), Some("s1"));
        assert_eq!(store.llen("servers").unwrap(), 1);
    }
}
