use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tdb_core::{BlobHash, BlobPayload, ContentBlob, ContentKind, Error, Result};

/// Intermediate row type for mapping between database rows and `ContentBlob`.
#[derive(sqlx::FromRow)]
struct BlobRow {
    hash_sha256: String,
    size_bytes: i64,
    reference_count: i64,
    kind: String,
    encoding: Option<String>,
    line_count: Option<i64>,
    content_type: Option<String>,
}

impl BlobRow {
    fn into_blob(self) -> Result<ContentBlob> {
        let kind = match self.kind.as_str() {
            "text" => ContentKind::Text {
                encoding: self.encoding.unwrap_or_else(|| "utf-8".to_string()),
                line_count: self.line_count.unwrap_or(0) as u32,
            },
            "binary" => ContentKind::Binary {
                content_type: self.content_type.unwrap_or_else(|| "application/octet-stream".to_string()),
            },
            other => return Err(Error::Internal(format!("unknown blob kind: {other}"))),
        };

        Ok(ContentBlob {
            hash_sha256: self.hash_sha256,
            size_bytes: self.size_bytes as u64,
            reference_count: self.reference_count as u64,
            kind,
        })
    }
}

/// SQLite-backed content-addressable store (spec §4.1, "C1").
///
/// Blobs are deduplicated by SHA-256 digest: `put` is idempotent, bumping
/// `reference_count` instead of inserting a duplicate row when the hash
/// already exists.
#[derive(Clone)]
pub struct ContentStore {
    pool: SqlitePool,
}

impl ContentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn hash_of(bytes: &[u8]) -> BlobHash {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode_digest(hasher.finalize())
    }

    /// Stores text content, returning its content hash. If the hash already
    /// exists the reference count is incremented and no new row is written.
    pub async fn put_text(&self, text: &str, encoding: &str) -> Result<BlobHash> {
        let bytes = text.as_bytes();
        let hash = Self::hash_of(bytes);
        let line_count = text.lines().count() as i64;

        sqlx::query(
            r#"
            INSERT INTO content_blobs (hash_sha256, size_bytes, reference_count, kind, encoding, line_count, data)
            VALUES (?1, ?2, 1, 'text', ?3, ?4, ?5)
            ON CONFLICT(hash_sha256) DO UPDATE SET reference_count = reference_count + 1
            "#,
        )
        .bind(&hash)
        .bind(bytes.len() as i64)
        .bind(encoding)
        .bind(line_count)
        .bind(bytes)
        .execute(&self.pool)
        .await?;

        Ok(hash)
    }

    /// Stores binary content, returning its content hash.
    pub async fn put_binary(&self, data: &[u8], content_type: &str) -> Result<BlobHash> {
        let hash = Self::hash_of(data);

        sqlx::query(
            r#"
            INSERT INTO content_blobs (hash_sha256, size_bytes, reference_count, kind, content_type, data)
            VALUES (?1, ?2, 1, 'binary', ?3, ?4)
            ON CONFLICT(hash_sha256) DO UPDATE SET reference_count = reference_count + 1
            "#,
        )
        .bind(&hash)
        .bind(data.len() as i64)
        .bind(content_type)
        .bind(data)
        .execute(&self.pool)
        .await?;

        Ok(hash)
    }

    /// Fetches the decoded payload for a content hash.
    pub async fn get(&self, hash: &str) -> Result<BlobPayload> {
        let row: (String, Vec<u8>) = sqlx::query_as(
            "SELECT kind, data FROM content_blobs WHERE hash_sha256 = ?1",
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("blob {hash}")))?;

        match row.0.as_str() {
            "text" => {
                let text = String::from_utf8(row.1)
                    .map_err(|e| Error::IntegrityViolation(format!("blob {hash} is not valid utf-8: {e}")))?;
                Ok(BlobPayload::Text(text))
            }
            "binary" => Ok(BlobPayload::Binary(row.1)),
            other => Err(Error::Internal(format!("unknown blob kind: {other}"))),
        }
    }

    /// Fetches blob metadata without the payload.
    pub async fn metadata(&self, hash: &str) -> Result<ContentBlob> {
        let row = sqlx::query_as::<_, BlobRow>(
            r#"
            SELECT hash_sha256, size_bytes, reference_count, kind, encoding, line_count, content_type
            FROM content_blobs WHERE hash_sha256 = ?1
            "#,
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("blob {hash}")))?;

        row.into_blob()
    }

    /// Decrements a blob's reference count. A blob at zero references is
    /// never deleted here — per spec §4.1/I3, destruction is deferred to a
    /// separate reference-count sweep, which does not exist yet.
    pub async fn release(&self, hash: &str) -> Result<()> {
        sqlx::query("UPDATE content_blobs SET reference_count = reference_count - 1 WHERE hash_sha256 = ?1")
            .bind(hash)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Whether a blob with this hash is already stored.
    pub async fn exists(&self, hash: &str) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM content_blobs WHERE hash_sha256 = ?1")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

/// Minimal hex encoding helper so this module doesn't pull in a second
/// hex-encoding crate alongside `sha2`.
mod hex {
    pub fn encode_digest(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn put_text_deduplicates_by_hash() {
        let pool = db::open_in_memory().await.unwrap();
        let store = ContentStore::new(pool);

        let h1 = store.put_text("hello world\n", "utf-8").await.unwrap();
        let h2 = store.put_text("hello world\n", "utf-8").await.unwrap();
        assert_eq!(h1, h2);

        let meta = store.metadata(&h1).await.unwrap();
        assert_eq!(meta.reference_count, 2);
    }

    #[tokio::test]
    async fn get_round_trips_text_payload() {
        let pool = db::open_in_memory().await.unwrap();
        let store = ContentStore::new(pool);

        let hash = store.put_text("fn main() {}\n", "utf-8").await.unwrap();
        match store.get(&hash).await.unwrap() {
            BlobPayload::Text(t) => assert_eq!(t, "fn main() {}\n"),
            BlobPayload::Binary(_) => panic!("expected text payload"),
        }
    }

    #[tokio::test]
    async fn release_does_not_delete_blob_at_zero_references() {
        let pool = db::open_in_memory().await.unwrap();
        let store = ContentStore::new(pool);

        let hash = store.put_binary(b"\x00\x01\x02", "application/octet-stream").await.unwrap();
        store.release(&hash).await.unwrap();

        assert!(store.exists(&hash).await.unwrap());
        let meta = store.metadata(&hash).await.unwrap();
        assert_eq!(meta.reference_count, 0);

        match store.get(&hash).await.unwrap() {
            BlobPayload::Binary(b) => assert_eq!(b, b"\x00\x01\x02"),
            BlobPayload::Text(_) => panic!("expected binary payload"),
        }
    }

    #[tokio::test]
    async fn exists_reflects_presence() {
        let pool = db::open_in_memory().await.unwrap();
        let store = ContentStore::new(pool);

        let hash = store.put_text("hi\n", "utf-8").await.unwrap();
        assert!(store.exists(&hash).await.unwrap());
        assert!(!store.exists("0000000000000000000000000000000000000000000000000000000000000000").await.unwrap());
    }
}
