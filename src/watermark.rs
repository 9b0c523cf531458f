//! Durable storage for the ingestion watermark.
//!
//! The watermark is the instant the last fully successful ingestion pass
//! started. [`FileWatermark`] keeps it as a single RFC 3339 line in a flat
//! file; [`SqliteWatermark`] keeps it as a row in the `checkpoints` table.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;

#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// The stored watermark, or `None` before the first successful pass.
    async fn read(&self) -> Result<Option<DateTime<Utc>>>;

    async fn write(&self, at: DateTime<Utc>) -> Result<()>;
}

fn parse(raw: &str) -> Result<Option<DateTime<Utc>>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    let parsed = DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid watermark timestamp '{}'", raw))?;
    Ok(Some(parsed.with_timezone(&Utc)))
}

fn encode(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub struct FileWatermark {
    path: PathBuf,
}

impl FileWatermark {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl WatermarkStore for FileWatermark {
    async fn read(&self) -> Result<Option<DateTime<Utc>>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => parse(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", self.path.display())),
        }
    }

    /// Write to a sibling temp file and rename it over the target, so a
    /// crash mid-write leaves the previous watermark intact.
    async fn write(&self, at: DateTime<Utc>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, encode(at)).await?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

pub struct SqliteWatermark {
    pool: SqlitePool,
    key: String,
}

impl SqliteWatermark {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_key(pool, "ingestion")
    }

    pub fn with_key(pool: SqlitePool, key: impl Into<String>) -> Self {
        Self {
            pool,
            key: key.into(),
        }
    }
}

#[async_trait]
impl WatermarkStore for SqliteWatermark {
    async fn read(&self) -> Result<Option<DateTime<Utc>>> {
        let cursor: Option<String> =
            sqlx::query_scalar("SELECT cursor FROM checkpoints WHERE source = ?")
                .bind(&self.key)
                .fetch_optional(&self.pool)
                .await?;
        match cursor {
            Some(raw) => parse(&raw),
            None => Ok(None),
        }
    }

    async fn write(&self, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO checkpoints (source, cursor, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(source) DO UPDATE SET
                cursor = excluded.cursor,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&self.key)
        .bind(encode(at))
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_watermark_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = FileWatermark::new(tmp.path().join("metadata/update_time"));
        assert!(store.read().await.unwrap().is_none());

        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        store.write(at).await.unwrap();
        assert_eq!(store.read().await.unwrap(), Some(at));

        let later = at + chrono::Duration::days(1);
        store.write(later).await.unwrap();
        assert_eq!(store.read().await.unwrap(), Some(later));
        assert!(!tmp.path().join("metadata/update_time.tmp").exists());
    }

    #[tokio::test]
    async fn test_file_watermark_rejects_garbage() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("update_time");
        std::fs::write(&path, "yesterday").unwrap();
        assert!(FileWatermark::new(&path).read().await.is_err());

        std::fs::write(&path, "\n").unwrap();
        assert!(FileWatermark::new(&path).read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_watermark_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let pool = crate::db::open(&tmp.path().join("w.sqlite")).await.unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();

        let store = SqliteWatermark::new(pool.clone());
        assert!(store.read().await.unwrap().is_none());

        let at = Utc::now();
        store.write(at).await.unwrap();
        store.write(at).await.unwrap();
        let read = store.read().await.unwrap().unwrap();
        assert_eq!(read.timestamp_micros(), at.timestamp_micros());

        assert!(SqliteWatermark::with_key(pool, "other").read().await.unwrap().is_none());
    }
}
