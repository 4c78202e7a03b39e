//! # rc-db-sqlite Implementation
//!
//! SQLite-backed `DocumentStore`. Each document is one row holding its JSON
//! body plus the few columns we filter on. A batch commits inside a single
//! transaction; commits are serialized in-process so the precondition reads
//! and the writes see the same snapshot.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rc_core::batch::{DocumentWrite, WorkingSet, WriteBatch};
use rc_core::error::{AppError, Result};
use rc_core::hub::{ChangeHub, Subscription, Topic};
use rc_core::models::{
    sort_log, Conversation, ConversationId, Message, MessageId, Post, PostId, UserId,
};
use rc_core::traits::DocumentStore;
use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Row, SqliteConnection};
use std::str::FromStr;
use tokio::sync::Mutex;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS posts (
    id          TEXT PRIMARY KEY,
    status      TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    doc         TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS conversations (
    id              TEXT PRIMARY KEY,
    post_id         TEXT NOT NULL,
    poster_id       TEXT NOT NULL,
    counterpart_id  TEXT NOT NULL,
    doc             TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_conversations_post ON conversations(post_id);
CREATE INDEX IF NOT EXISTS idx_conversations_poster ON conversations(poster_id);
CREATE INDEX IF NOT EXISTS idx_conversations_counterpart ON conversations(counterpart_id);
CREATE TABLE IF NOT EXISTS messages (
    conversation_id  TEXT NOT NULL,
    id               TEXT NOT NULL,
    sent_at          TEXT NOT NULL,
    doc              TEXT NOT NULL,
    PRIMARY KEY (conversation_id, id)
);
"#;

pub struct SqliteDocumentStore {
    pool: SqlitePool,
    hub: ChangeHub,
    commit_lock: Mutex<()>,
}

fn db_err(e: sqlx::Error) -> AppError {
    AppError::internal(format!("database error: {e}"))
}

fn decode<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| AppError::internal(format!("corrupt document: {e}")))
}

fn encode<T: serde::Serialize>(doc: &T) -> Result<String> {
    serde_json::to_string(doc).map_err(AppError::internal)
}

impl SqliteDocumentStore {
    /// Connects and creates the schema if needed. In-memory URLs get a single
    /// connection, since every SQLite connection would otherwise open its own database.
    pub async fn new(url: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        tracing::info!(url, "sqlite document store ready");
        Ok(Self {
            pool,
            hub: ChangeHub::new(),
            commit_lock: Mutex::new(()),
        })
    }

    async fn stage(conn: &mut SqliteConnection, batch: &WriteBatch) -> Result<WorkingSet> {
        let keys = batch.keys();
        let mut ws = WorkingSet::new();
        for id in keys.posts {
            let row = sqlx::query("SELECT doc FROM posts WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&mut *conn)
                .await
                .map_err(db_err)?;
            let post = row.map(|r| decode::<Post>(&r.get::<String, _>("doc"))).transpose()?;
            ws.insert_post(id, post);
        }
        for id in keys.conversations {
            let row = sqlx::query("SELECT doc FROM conversations WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&mut *conn)
                .await
                .map_err(db_err)?;
            let conversation = row
                .map(|r| decode::<Conversation>(&r.get::<String, _>("doc")))
                .transpose()?;
            ws.insert_conversation(id, conversation);
        }
        for conversation_id in keys.logs {
            let log = sqlx::query("SELECT doc FROM messages WHERE conversation_id = ?")
                .bind(conversation_id.to_string())
                .fetch_all(&mut *conn)
                .await
                .map_err(db_err)?
                .iter()
                .map(|r| decode::<Message>(&r.get::<String, _>("doc")))
                .collect::<Result<Vec<_>>>()?;
            ws.insert_log(conversation_id, log);
        }
        for (conversation_id, message_id) in keys.messages {
            let row = sqlx::query("SELECT doc FROM messages WHERE conversation_id = ? AND id = ?")
                .bind(conversation_id.to_string())
                .bind(message_id.to_string())
                .fetch_optional(&mut *conn)
                .await
                .map_err(db_err)?;
            let message = row
                .map(|r| decode::<Message>(&r.get::<String, _>("doc")))
                .transpose()?;
            ws.insert_message(conversation_id, message_id, message);
        }
        Ok(ws)
    }

    async fn persist(conn: &mut SqliteConnection, write: &DocumentWrite) -> Result<()> {
        match write {
            DocumentWrite::UpsertPost(post) => {
                sqlx::query(
                    "INSERT INTO posts (id, status, updated_at, doc) VALUES (?, ?, ?, ?)
                     ON CONFLICT(id) DO UPDATE SET status = excluded.status,
                        updated_at = excluded.updated_at, doc = excluded.doc",
                )
                .bind(post.id.to_string())
                .bind(post.status.as_str())
                .bind(post.updated_at.to_rfc3339())
                .bind(encode(post)?)
                .execute(&mut *conn)
                .await
                .map_err(db_err)?;
            }
            DocumentWrite::UpsertConversation(conversation) => {
                sqlx::query(
                    "INSERT INTO conversations (id, post_id, poster_id, counterpart_id, doc)
                     VALUES (?, ?, ?, ?, ?)
                     ON CONFLICT(id) DO UPDATE SET doc = excluded.doc",
                )
                .bind(conversation.id.to_string())
                .bind(conversation.post_id.to_string())
                .bind(conversation.poster_id.as_str())
                .bind(conversation.counterpart_id.as_str())
                .bind(encode(conversation)?)
                .execute(&mut *conn)
                .await
                .map_err(db_err)?;
            }
            DocumentWrite::DeleteConversation(id) => {
                // Message log first; there is no FK cascade on document rows.
                sqlx::query("DELETE FROM messages WHERE conversation_id = ?")
                    .bind(id.to_string())
                    .execute(&mut *conn)
                    .await
                    .map_err(db_err)?;
                sqlx::query("DELETE FROM conversations WHERE id = ?")
                    .bind(id.to_string())
                    .execute(&mut *conn)
                    .await
                    .map_err(db_err)?;
            }
            DocumentWrite::UpsertMessage(message) => {
                sqlx::query(
                    "INSERT INTO messages (conversation_id, id, sent_at, doc) VALUES (?, ?, ?, ?)
                     ON CONFLICT(conversation_id, id) DO UPDATE SET doc = excluded.doc",
                )
                .bind(message.conversation_id.to_string())
                .bind(message.id.to_string())
                .bind(message.sent_at.to_rfc3339())
                .bind(encode(message)?)
                .execute(&mut *conn)
                .await
                .map_err(db_err)?;
            }
            DocumentWrite::DeleteMessage {
                conversation_id,
                message_id,
            } => {
                sqlx::query("DELETE FROM messages WHERE conversation_id = ? AND id = ?")
                    .bind(conversation_id.to_string())
                    .bind(message_id.to_string())
                    .execute(&mut *conn)
                    .await
                    .map_err(db_err)?;
            }
        }
        Ok(())
    }

    async fn fetch_docs<T: DeserializeOwned>(&self, sql: &str, binds: &[String]) -> Result<Vec<T>> {
        let mut query = sqlx::query(sql);
        for value in binds {
            query = query.bind(value.as_str());
        }
        query
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?
            .iter()
            .map(|row| decode(&row.get::<String, _>("doc")))
            .collect()
    }

    async fn fetch_doc<T: DeserializeOwned>(&self, sql: &str, binds: &[String]) -> Result<Option<T>> {
        Ok(self.fetch_docs(sql, binds).await?.into_iter().next())
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    fn server_time(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn get_post(&self, id: PostId) -> Result<Option<Post>> {
        self.fetch_doc("SELECT doc FROM posts WHERE id = ?", &[id.to_string()])
            .await
    }

    async fn list_posts(&self) -> Result<Vec<Post>> {
        self.fetch_docs("SELECT doc FROM posts", &[]).await
    }

    async fn get_conversation(&self, id: ConversationId) -> Result<Option<Conversation>> {
        self.fetch_doc("SELECT doc FROM conversations WHERE id = ?", &[id.to_string()])
            .await
    }

    async fn conversations_for_post(&self, post_id: PostId) -> Result<Vec<Conversation>> {
        self.fetch_docs(
            "SELECT doc FROM conversations WHERE post_id = ?",
            &[post_id.to_string()],
        )
        .await
    }

    async fn conversations_for_user(&self, user_id: &UserId) -> Result<Vec<Conversation>> {
        self.fetch_docs(
            "SELECT doc FROM conversations WHERE poster_id = ? OR counterpart_id = ?",
            &[user_id.to_string(), user_id.to_string()],
        )
        .await
    }

    async fn get_message(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) -> Result<Option<Message>> {
        self.fetch_doc(
            "SELECT doc FROM messages WHERE conversation_id = ? AND id = ?",
            &[conversation_id.to_string(), message_id.to_string()],
        )
        .await
    }

    async fn list_messages(&self, conversation_id: ConversationId) -> Result<Vec<Message>> {
        let mut messages: Vec<Message> = self
            .fetch_docs(
                "SELECT doc FROM messages WHERE conversation_id = ?",
                &[conversation_id.to_string()],
            )
            .await?;
        sort_log(&mut messages);
        Ok(messages)
    }

    /// Stage, check and write inside one transaction. Dropping `tx` on any
    /// error rolls everything back.
    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        let _guard = self.commit_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let staged = Self::stage(&mut *tx, &batch).await?;
        let applied = batch.apply(staged, self.server_time())?;
        for write in &applied.writes {
            Self::persist(&mut *tx, write).await?;
        }

        tx.commit().await.map_err(db_err)?;
        self.hub.publish_all(&applied.events);
        Ok(())
    }

    fn subscribe(&self, topic: Topic) -> Subscription {
        self.hub.subscribe(topic)
    }
}
