//! SQLite persistence for threads, history, active-thread routing and quotas.
//!
//! The pool is capped at a single connection: SQLite is the only writer and
//! serializes every operation the bot performs.

use std::{path::Path, str::FromStr};

use chrono::Utc;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use tracing::{debug, info};

use crate::{
    domain::{ChatMessage, Role, ThreadId, UserId},
    Result,
};

const SCHEMA: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS sessions(
        user_id INTEGER NOT NULL,
        chat_id INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY(user_id, chat_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS messages(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        chat_id INTEGER NOT NULL,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS active_chat(
        user_id INTEGER PRIMARY KEY,
        chat_id INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS quotas(
        user_id INTEGER NOT NULL,
        yyyymmdd TEXT NOT NULL,
        used_tokens INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY(user_id, yyyymmdd)
    )
    "#,
];

/// One row of a user's thread listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadSummary {
    pub id: ThreadId,
    /// Unix seconds.
    pub updated_at: i64,
    pub last_message: Option<String>,
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the database file and ensure the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        info!(path = %path.display(), "Opening SQLite store");
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        Self::connect(options).await
    }

    /// Private in-memory database (tests, dry runs).
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        Self::connect(options).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self> {
        // One long-lived connection: keeps in-memory databases alive and
        // makes the store a single writer.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<()> {
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(user_id, chat_id, id)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ============== Threads ==============

    /// Allocate the next thread id for `user`, record it and make it active.
    pub async fn create_thread(&self, user: UserId) -> Result<ThreadId> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let next: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(chat_id), 0) + 1 FROM sessions WHERE user_id = ?")
                .bind(user.0)
                .fetch_one(&mut *tx)
                .await?;

        sqlx::query("INSERT OR REPLACE INTO sessions(user_id, chat_id, updated_at) VALUES(?, ?, ?)")
            .bind(user.0)
            .bind(next)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        sqlx::query("INSERT OR REPLACE INTO active_chat(user_id, chat_id) VALUES(?, ?)")
            .bind(user.0)
            .bind(next)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(user_id = user.0, thread_id = next, "Created thread");
        Ok(ThreadId(next))
    }

    pub async fn set_active(&self, user: UserId, thread: ThreadId) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO active_chat(user_id, chat_id) VALUES(?, ?)")
            .bind(user.0)
            .bind(thread.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Active thread of `user`, only if its session row still exists.
    pub async fn active_thread(&self, user: UserId) -> Result<Option<ThreadId>> {
        let id: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT a.chat_id FROM active_chat a
            JOIN sessions s ON s.user_id = a.user_id AND s.chat_id = a.chat_id
            WHERE a.user_id = ?
            "#,
        )
        .bind(user.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id.map(ThreadId))
    }

    pub async fn thread_exists(&self, user: UserId, thread: ThreadId) -> Result<bool> {
        let hit: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM sessions WHERE user_id = ? AND chat_id = ?")
                .bind(user.0)
                .bind(thread.0)
                .fetch_optional(&self.pool)
                .await?;
        Ok(hit.is_some())
    }

    /// Threads of `user`, most recently updated first.
    pub async fn list_threads(&self, user: UserId) -> Result<Vec<ThreadSummary>> {
        let rows: Vec<(i64, i64, Option<String>)> = sqlx::query_as(
            r#"
            SELECT s.chat_id, s.updated_at,
                   (SELECT m.content FROM messages m
                     WHERE m.user_id = s.user_id AND m.chat_id = s.chat_id
                     ORDER BY m.id DESC LIMIT 1)
            FROM sessions s
            WHERE s.user_id = ?
            ORDER BY s.updated_at DESC, s.chat_id DESC
            "#,
        )
        .bind(user.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, updated_at, last_message)| ThreadSummary {
                id: ThreadId(id),
                updated_at,
                last_message,
            })
            .collect())
    }

    // ============== Messages ==============

    /// Append one turn and bump the thread's `updated_at`.
    pub async fn append_message(
        &self,
        user: UserId,
        thread: ThreadId,
        role: Role,
        content: &str,
    ) -> Result<()> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO messages(user_id, chat_id, role, content, created_at) VALUES(?, ?, ?, ?, ?)",
        )
        .bind(user.0)
        .bind(thread.0)
        .bind(role.as_str())
        .bind(content)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE sessions SET updated_at = ? WHERE user_id = ? AND chat_id = ?")
            .bind(now)
            .bind(user.0)
            .bind(thread.0)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Thread history in insertion order. With `limit`, only the most recent
    /// `limit` turns are returned (still oldest first).
    pub async fn history(
        &self,
        user: UserId,
        thread: ThreadId,
        limit: Option<u32>,
    ) -> Result<Vec<ChatMessage>> {
        let rows: Vec<(String, String)> = match limit {
            Some(n) => {
                sqlx::query_as(
                    r#"
                    SELECT role, content FROM (
                        SELECT id, role, content FROM messages
                        WHERE user_id = ? AND chat_id = ?
                        ORDER BY id DESC LIMIT ?
                    ) ORDER BY id
                    "#,
                )
                .bind(user.0)
                .bind(thread.0)
                .bind(i64::from(n))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT role, content FROM messages WHERE user_id = ? AND chat_id = ? ORDER BY id",
                )
                .bind(user.0)
                .bind(thread.0)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows
            .into_iter()
            .filter_map(|(role, content)| {
                Role::parse(&role).map(|role| ChatMessage { role, content })
            })
            .collect())
    }

    // ============== Quotas ==============

    pub async fn used_tokens(&self, user: UserId, day: &str) -> Result<u64> {
        let used: Option<i64> =
            sqlx::query_scalar("SELECT used_tokens FROM quotas WHERE user_id = ? AND yyyymmdd = ?")
                .bind(user.0)
                .bind(day)
                .fetch_optional(&self.pool)
                .await?;
        Ok(used.unwrap_or(0).max(0) as u64)
    }

    pub async fn add_tokens(&self, user: UserId, day: &str, tokens: u64) -> Result<()> {
        let tokens = i64::try_from(tokens).unwrap_or(i64::MAX);
        sqlx::query(
            r#"
            INSERT INTO quotas(user_id, yyyymmdd, used_tokens) VALUES(?, ?, ?)
            ON CONFLICT(user_id, yyyymmdd) DO UPDATE SET used_tokens = used_tokens + excluded.used_tokens
            "#,
        )
        .bind(user.0)
        .bind(day)
        .bind(tokens)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: UserId = UserId(100);
    const BOB: UserId = UserId(200);

    #[tokio::test]
    async fn thread_ids_are_sequential_per_user() {
        let store = Store::open_in_memory().await.unwrap();

        assert_eq!(store.create_thread(ALICE).await.unwrap(), ThreadId(1));
        assert_eq!(store.create_thread(ALICE).await.unwrap(), ThreadId(2));
        assert_eq!(store.create_thread(BOB).await.unwrap(), ThreadId(1));

        assert_eq!(store.active_thread(ALICE).await.unwrap(), Some(ThreadId(2)));
        assert_eq!(store.active_thread(BOB).await.unwrap(), Some(ThreadId(1)));
    }

    #[tokio::test]
    async fn active_thread_requires_an_existing_session() {
        let store = Store::open_in_memory().await.unwrap();
        assert_eq!(store.active_thread(ALICE).await.unwrap(), None);

        // Dangling pointer (no session row) does not resolve.
        store.set_active(ALICE, ThreadId(7)).await.unwrap();
        assert_eq!(store.active_thread(ALICE).await.unwrap(), None);
        assert!(!store.thread_exists(ALICE, ThreadId(7)).await.unwrap());
    }

    #[tokio::test]
    async fn history_is_ordered_and_scoped_to_thread() {
        let store = Store::open_in_memory().await.unwrap();
        let t1 = store.create_thread(ALICE).await.unwrap();
        let t2 = store.create_thread(ALICE).await.unwrap();

        store.append_message(ALICE, t1, Role::User, "q1").await.unwrap();
        store.append_message(ALICE, t2, Role::User, "other").await.unwrap();
        store.append_message(ALICE, t1, Role::Assistant, "a1").await.unwrap();
        store.append_message(ALICE, t1, Role::User, "q2").await.unwrap();

        let all = store.history(ALICE, t1, None).await.unwrap();
        let texts: Vec<&str> = all.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, vec!["q1", "a1", "q2"]);
        assert_eq!(all[1].role, Role::Assistant);

        let tail = store.history(ALICE, t1, Some(2)).await.unwrap();
        let texts: Vec<&str> = tail.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, vec!["a1", "q2"]);

        assert!(store.history(BOB, t1, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn listing_carries_last_message_preview() {
        let store = Store::open_in_memory().await.unwrap();
        let t1 = store.create_thread(ALICE).await.unwrap();
        let t2 = store.create_thread(ALICE).await.unwrap();
        store.append_message(ALICE, t1, Role::User, "first").await.unwrap();
        store.append_message(ALICE, t1, Role::Assistant, "latest").await.unwrap();

        let threads = store.list_threads(ALICE).await.unwrap();
        assert_eq!(threads.len(), 2);

        let one = threads.iter().find(|t| t.id == t1).unwrap();
        assert_eq!(one.last_message.as_deref(), Some("latest"));
        let two = threads.iter().find(|t| t.id == t2).unwrap();
        assert_eq!(two.last_message, None);

        assert!(store.list_threads(BOB).await.unwrap().is_empty());
    }

    async fn set_updated_at(store: &Store, user: UserId, thread: ThreadId, at: i64) {
        sqlx::query("UPDATE sessions SET updated_at = ? WHERE user_id = ? AND chat_id = ?")
            .bind(at)
            .bind(user.0)
            .bind(thread.0)
            .execute(&store.pool)
            .await
            .unwrap();
    }

    fn ids(threads: &[ThreadSummary]) -> Vec<ThreadId> {
        threads.iter().map(|t| t.id).collect()
    }

    #[tokio::test]
    async fn listing_orders_by_update_then_id() {
        let store = Store::open_in_memory().await.unwrap();
        let t1 = store.create_thread(ALICE).await.unwrap();
        let t2 = store.create_thread(ALICE).await.unwrap();
        let t3 = store.create_thread(ALICE).await.unwrap();

        // Equal timestamps fall back to the higher id first.
        for t in [t1, t2, t3] {
            set_updated_at(&store, ALICE, t, 1_000).await;
        }
        assert_eq!(ids(&store.list_threads(ALICE).await.unwrap()), vec![t3, t2, t1]);

        set_updated_at(&store, ALICE, t2, 2_000).await;
        set_updated_at(&store, ALICE, t3, 1_500).await;
        assert_eq!(ids(&store.list_threads(ALICE).await.unwrap()), vec![t2, t3, t1]);

        // Appending to the oldest thread moves it to the front.
        store.append_message(ALICE, t1, Role::User, "bump").await.unwrap();
        let threads = store.list_threads(ALICE).await.unwrap();
        assert_eq!(ids(&threads), vec![t1, t2, t3]);
        assert!(threads[0].updated_at > 2_000);
        assert_eq!(threads[0].last_message.as_deref(), Some("bump"));
    }

    #[tokio::test]
    async fn quota_counters_accumulate_per_day() {
        let store = Store::open_in_memory().await.unwrap();
        assert_eq!(store.used_tokens(ALICE, "20260101").await.unwrap(), 0);

        store.add_tokens(ALICE, "20260101", 120).await.unwrap();
        store.add_tokens(ALICE, "20260101", 30).await.unwrap();
        store.add_tokens(ALICE, "20260102", 5).await.unwrap();

        assert_eq!(store.used_tokens(ALICE, "20260101").await.unwrap(), 150);
        assert_eq!(store.used_tokens(ALICE, "20260102").await.unwrap(), 5);
        assert_eq!(store.used_tokens(BOB, "20260101").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn open_creates_database_file() {
        let dir = std::env::temp_dir().join(format!("gtb-store-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("bot.sqlite");

        {
            let store = Store::open(&path).await.unwrap();
            store.create_thread(ALICE).await.unwrap();
        }
        assert!(path.exists());

        let reopened = Store::open(&path).await.unwrap();
        assert!(reopened.thread_exists(ALICE, ThreadId(1)).await.unwrap());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
