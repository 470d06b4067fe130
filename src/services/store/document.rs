use std::str::FromStr;

use async_trait::async_trait;
use log::{info, warn};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use super::CatalogStore;
use crate::error::PersistenceError;
use crate::models::{Origin, PlaylistBook, Track, TrackRecord};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tracks (
    id TEXT PRIMARY KEY,
    doc TEXT NOT NULL,
    audio BLOB
);

CREATE TABLE IF NOT EXISTS playlists (
    name TEXT PRIMARY KEY,
    doc TEXT NOT NULL
);
"#;

/// Tracks and playlists kept as JSON documents in a database, together with
/// the audio of `Stored` tracks.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    pool: SqlitePool,
}

impl DocumentStore {
    pub async fn connect(url: &str) -> Result<Self, PersistenceError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        info!("Connected to document store {}", url);
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), PersistenceError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

fn document_id(track: &Track) -> String {
    match &track.origin {
        Origin::Local { path } => path.to_string_lossy().into_owned(),
        Origin::Remote { url } => url.clone(),
        Origin::Stored { id } => id.clone(),
    }
}

#[async_trait]
impl CatalogStore for DocumentStore {
    fn name(&self) -> &'static str {
        "docstore"
    }

    async fn load_tracks(&self) -> Result<Vec<Track>, PersistenceError> {
        let rows = sqlx::query("SELECT id, doc FROM tracks ORDER BY rowid")
            .fetch_all(&self.pool)
            .await?;

        let mut tracks = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            let doc: String = row.try_get("doc")?;

            let parsed = serde_json::from_str::<TrackRecord>(&doc)
                .map_err(|e| e.to_string())
                .and_then(Track::try_from);
            match parsed {
                Ok(track) => tracks.push(track),
                Err(e) => warn!("Skipping malformed track document {}: {}", id, e),
            }
        }

        info!("Loaded {} tracks from the document store", tracks.len());
        Ok(tracks)
    }

    /// Upserts every track document. Audio blobs are left untouched.
    async fn save_tracks(&self, tracks: &[Track]) -> Result<(), PersistenceError> {
        let mut tx = self.pool.begin().await?;
        for track in tracks {
            let doc = serde_json::to_string(&TrackRecord::from(track))?;
            sqlx::query(
                "INSERT INTO tracks (id, doc) VALUES (?, ?) \
                 ON CONFLICT(id) DO UPDATE SET doc = excluded.doc",
            )
            .bind(document_id(track))
            .bind(doc)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn load_playlists(&self) -> Result<PlaylistBook, PersistenceError> {
        let rows = sqlx::query("SELECT name, doc FROM playlists ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        let mut book = PlaylistBook::default();
        for row in rows {
            let name: String = row.try_get("name")?;
            let doc: String = row.try_get("doc")?;
            match serde_json::from_str::<Vec<TrackRecord>>(&doc) {
                Ok(records) => book.insert_records(name, records),
                Err(e) => warn!("Skipping malformed playlist document \"{}\": {}", name, e),
            }
        }
        Ok(book)
    }

    async fn save_playlists(&self, book: &PlaylistBook) -> Result<(), PersistenceError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM playlists").execute(&mut *tx).await?;
        for (name, records) in book.records() {
            sqlx::query("INSERT INTO playlists (name, doc) VALUES (?, ?)")
                .bind(name)
                .bind(serde_json::to_string(records)?)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn fetch_audio(&self, id: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        let audio = sqlx::query_scalar::<_, Option<Vec<u8>>>("SELECT audio FROM tracks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(audio.flatten())
    }

    async fn put_audio(&self, track: &Track, bytes: &[u8]) -> Result<bool, PersistenceError> {
        let doc = serde_json::to_string(&TrackRecord::from(track))?;
        sqlx::query(
            "INSERT INTO tracks (id, doc, audio) VALUES (?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET doc = excluded.doc, audio = excluded.audio",
        )
        .bind(document_id(track))
        .bind(doc)
        .bind(bytes)
        .execute(&self.pool)
        .await?;
        Ok(true)
    }
}
