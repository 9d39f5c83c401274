//! SQLite knowledge store: sqlite-vec for vectors, FTS5 for the lexical
//! index, one file on disk.
//!
//! The lexical index is an external-content FTS5 table kept in sync by
//! triggers, so every content write maintains it automatically. Embeddings
//! live in a `vec0` virtual table keyed by the chunk rowid.

use chrono::{DateTime, Utc};
use std::mem::transmute;
use std::os::raw::c_char;
use std::path::Path;
use std::sync::Once;
use tokio_rusqlite::{Connection, OptionalExtension, ffi, rusqlite};
use uuid::Uuid;

use super::{KnowledgeChunk, KnowledgeStore, NewChunk, ScoredChunk, StoreError};

/// Knowledge store backed by a single SQLite database.
#[derive(Clone)]
pub struct SqliteKnowledgeStore {
    conn: Connection,
    dimension: usize,
}

impl SqliteKnowledgeStore {
    /// Open (or create) the database at `path`, expecting embeddings of the
    /// given dimension.
    pub async fn open(path: impl AsRef<Path>, dimension: usize) -> Result<Self, StoreError> {
        Self::register_sqlite_vec()?;
        let conn = Connection::open(path)
            .await
            .map_err(|err| StoreError::Storage(err.to_string()))?;

        // Fail fast when the vector extension did not load.
        conn.call(|conn| -> rusqlite::Result<()> {
            conn.query_row("select vec_version()", [], |row| row.get::<_, String>(0))?;
            Ok(())
        })
        .await
        .map_err(|err| StoreError::Storage(err.to_string()))?;

        let store = Self { conn, dimension };
        store.init_schema().await?;
        Ok(store)
    }

    /// Register the sqlite-vec extension exactly once per process.
    fn register_sqlite_vec() -> Result<(), StoreError> {
        use std::sync::Mutex;

        static INIT: Once = Once::new();
        static INIT_RESULT: Mutex<Option<Result<(), String>>> = Mutex::new(None);

        INIT.call_once(|| {
            let result = unsafe {
                type SqliteExtensionInit = unsafe extern "C" fn(
                    *mut ffi::sqlite3,
                    *mut *mut c_char,
                    *const ffi::sqlite3_api_routines,
                ) -> i32;

                let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
                let init_fn: SqliteExtensionInit =
                    transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
                let rc = ffi::sqlite3_auto_extension(Some(init_fn));
                if rc != 0 {
                    Err(format!(
                        "failed to register sqlite-vec extension (code {rc})"
                    ))
                } else {
                    Ok(())
                }
            };
            *INIT_RESULT.lock().expect("init result mutex poisoned") = Some(result);
        });

        INIT_RESULT
            .lock()
            .expect("init result mutex poisoned")
            .clone()
            .expect("init was called but result not set")
            .map_err(StoreError::Storage)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        let dimension = self.dimension;
        self.conn
            .call(move |conn| -> rusqlite::Result<()> {
                conn.execute_batch(&format!(
                    "CREATE TABLE IF NOT EXISTS kb_chunks (
                        id TEXT PRIMARY KEY,
                        content TEXT NOT NULL,
                        source TEXT NOT NULL,
                        metadata TEXT NOT NULL DEFAULT '{{}}',
                        content_hash TEXT NOT NULL UNIQUE,
                        created_at TEXT NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS idx_kb_chunks_source ON kb_chunks(source);

                    CREATE VIRTUAL TABLE IF NOT EXISTS kb_chunks_fts
                        USING fts5(content, content='kb_chunks', content_rowid='rowid');

                    -- Chunks are immutable once written, so INSERT and DELETE
                    -- triggers are sufficient to keep the lexical index in sync.
                    CREATE TRIGGER IF NOT EXISTS kb_chunks_fts_insert
                    AFTER INSERT ON kb_chunks BEGIN
                        INSERT INTO kb_chunks_fts(rowid, content)
                        VALUES (new.rowid, new.content);
                    END;
                    CREATE TRIGGER IF NOT EXISTS kb_chunks_fts_delete
                    AFTER DELETE ON kb_chunks BEGIN
                        INSERT INTO kb_chunks_fts(kb_chunks_fts, rowid, content)
                        VALUES ('delete', old.rowid, old.content);
                    END;

                    CREATE VIRTUAL TABLE IF NOT EXISTS kb_chunks_vec
                        USING vec0(embedding float[{dimension}]);"
                ))?;
                Ok(())
            })
            .await
            .map_err(|err| StoreError::Storage(err.to_string()))
    }

    /// The underlying connection, for queries outside the trait surface.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn parse_metadata(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_default()
}

fn parse_created_at(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Build an FTS5 MATCH expression from free text: every alphanumeric token
/// quoted, tokens joined with OR. Quoting keeps user punctuation from being
/// parsed as FTS5 operators; OR keeps the candidate set a union, since one
/// matching term is enough for eligibility.
fn fts_match_expr(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|term| !term.is_empty())
        .map(|term| format!("\"{term}\""))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

#[async_trait::async_trait]
impl KnowledgeStore for SqliteKnowledgeStore {
    async fn submit(&self, mut chunk: NewChunk) -> Result<KnowledgeChunk, StoreError> {
        chunk.ensure_hash_in_metadata();

        if let Some(embedding) = &chunk.embedding {
            if embedding.len() != self.dimension {
                return Err(StoreError::Storage(format!(
                    "embedding dimension {} does not match store dimension {}",
                    embedding.len(),
                    self.dimension
                )));
            }
        }

        let stored = KnowledgeChunk {
            id: Uuid::new_v4().to_string(),
            content: chunk.content,
            source: chunk.source,
            metadata: chunk.metadata,
            content_hash: chunk.content_hash,
            created_at: Utc::now(),
        };

        let embedding_json = chunk
            .embedding
            .as_ref()
            .map(|embedding| {
                serde_json::to_string(embedding)
                    .map_err(|err| StoreError::Serialization(err.to_string()))
            })
            .transpose()?;

        let id = stored.id.clone();
        let content = stored.content.clone();
        let source = stored.source.clone();
        let metadata = stored.metadata.to_string();
        let content_hash = stored.content_hash.clone();
        let created_at = stored.created_at.to_rfc3339();
        let hash_for_conflict = stored.content_hash.clone();

        self.conn
            .call(move |conn| -> rusqlite::Result<()> {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO kb_chunks (id, content, source, metadata, content_hash, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    (&id, &content, &source, &metadata, &content_hash, &created_at),
                )?;
                if let Some(embedding_json) = embedding_json {
                    let rowid = tx.last_insert_rowid();
                    tx.execute(
                        "INSERT INTO kb_chunks_vec (rowid, embedding) VALUES (?1, vec_f32(?2))",
                        (rowid, &embedding_json),
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(|err| {
                let message = err.to_string();
                if message.contains("UNIQUE constraint failed: kb_chunks.content_hash") {
                    StoreError::Conflict(hash_for_conflict)
                } else {
                    StoreError::Storage(message)
                }
            })?;

        Ok(stored)
    }

    async fn exists(&self, content_hash: &str) -> Result<bool, StoreError> {
        let content_hash = content_hash.to_string();
        self.conn
            .call(move |conn| -> rusqlite::Result<bool> {
                let found = conn
                    .query_row(
                        "SELECT 1 FROM kb_chunks WHERE content_hash = ?1",
                        [&content_hash],
                        |_| Ok(()),
                    )
                    .optional()?;
                Ok(found.is_some())
            })
            .await
            .map_err(|err| StoreError::Storage(err.to_string()))
    }

    async fn search_semantic(
        &self,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        if embedding.len() != self.dimension {
            return Err(StoreError::Storage(format!(
                "query embedding dimension {} does not match store dimension {}",
                embedding.len(),
                self.dimension
            )));
        }

        let embedding_json = serde_json::to_string(embedding)
            .map_err(|err| StoreError::Serialization(err.to_string()))?;
        let limit = limit as i64;

        self.conn
            .call(move |conn| -> rusqlite::Result<Vec<ScoredChunk>> {
                let mut stmt = conn.prepare(
                    "SELECT c.id, c.content, c.source, c.metadata, c.content_hash, c.created_at, \
                     vec_distance_cosine(e.embedding, vec_f32(?1)) AS distance \
                     FROM kb_chunks c \
                     JOIN kb_chunks_vec e ON e.rowid = c.rowid \
                     ORDER BY distance ASC \
                     LIMIT ?2",
                )?;
                let rows = stmt.query_map((&embedding_json, limit), |row| {
                    let metadata: String = row.get(3)?;
                    let created_at: String = row.get(5)?;
                    let distance: f32 = row.get(6)?;
                    Ok(ScoredChunk {
                        chunk: KnowledgeChunk {
                            id: row.get(0)?,
                            content: row.get(1)?,
                            source: row.get(2)?,
                            metadata: parse_metadata(&metadata),
                            content_hash: row.get(4)?,
                            created_at: parse_created_at(&created_at),
                        },
                        score: 1.0 - distance,
                    })
                })?;

                let mut results = Vec::new();
                for row in rows {
                    results.push(row?);
                }
                Ok(results)
            })
            .await
            .map_err(|err| StoreError::Storage(err.to_string()))
    }

    async fn search_lexical(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        let Some(match_expr) = fts_match_expr(query) else {
            return Ok(Vec::new());
        };
        let limit = limit as i64;

        self.conn
            .call(move |conn| -> rusqlite::Result<Vec<ScoredChunk>> {
                let mut stmt = conn.prepare(
                    "SELECT c.id, c.content, c.source, c.metadata, c.content_hash, c.created_at, \
                     -kb_chunks_fts.rank AS score \
                     FROM kb_chunks_fts \
                     JOIN kb_chunks c ON c.rowid = kb_chunks_fts.rowid \
                     WHERE kb_chunks_fts MATCH ?1 \
                     ORDER BY kb_chunks_fts.rank \
                     LIMIT ?2",
                )?;
                let rows = stmt.query_map((&match_expr, limit), |row| {
                    let metadata: String = row.get(3)?;
                    let created_at: String = row.get(5)?;
                    let score: f32 = row.get(6)?;
                    Ok(ScoredChunk {
                        chunk: KnowledgeChunk {
                            id: row.get(0)?,
                            content: row.get(1)?,
                            source: row.get(2)?,
                            metadata: parse_metadata(&metadata),
                            content_hash: row.get(4)?,
                            created_at: parse_created_at(&created_at),
                        },
                        score,
                    })
                })?;

                let mut results = Vec::new();
                for row in rows {
                    results.push(row?);
                }
                Ok(results)
            })
            .await
            .map_err(|err| StoreError::Storage(err.to_string()))
    }

    async fn clear_source(&self, source: &str) -> Result<usize, StoreError> {
        let source = source.to_string();
        self.conn
            .call(move |conn| -> rusqlite::Result<usize> {
                let tx = conn.transaction()?;
                tx.execute(
                    "DELETE FROM kb_chunks_vec WHERE rowid IN \
                     (SELECT rowid FROM kb_chunks WHERE source = ?1)",
                    [&source],
                )?;
                let deleted = tx.execute("DELETE FROM kb_chunks WHERE source = ?1", [&source])?;
                tx.commit()?;
                Ok(deleted)
            })
            .await
            .map_err(|err| StoreError::Storage(err.to_string()))
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.conn
            .call(|conn| -> rusqlite::Result<usize> {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM kb_chunks", [], |row| row.get(0))?;
                Ok(count as usize)
            })
            .await
            .map_err(|err| StoreError::Storage(err.to_string()))
    }
}
