use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;
use crate::persistance::{
    Catalog, CatalogHit, NewSong, Song, SongUpdate, DEFAULT_ARTIST, DEFAULT_FILE_TYPE,
};

pub const DEFAULT_STORE_BATCH: usize = 500;

const SONG_COLUMNS: &str = "id, title, artist, duration_seconds, file_type, file_size, \
     fingerprint_count, created_at, updated_at";

/// SQLite-backed catalog.
pub struct Database {
    connection: SqlitePool,
    store_batch_size: usize,
}

impl Database {
    /// Open (creating if needed) the database at `url` and apply migrations.
    pub async fn init(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // every connection to an in-memory database is a separate database,
        // so keep exactly one alive for the pool's lifetime
        let pool = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let connection = pool.connect_with(options).await?;

        sqlx::migrate!().run(&connection).await?;
        info!(url, "catalog database ready");

        Ok(Self {
            connection,
            store_batch_size: DEFAULT_STORE_BATCH,
        })
    }

    pub async fn in_memory() -> Result<Self> {
        Self::init("sqlite::memory:").await
    }

    pub fn with_store_batch_size(mut self, size: usize) -> Self {
        self.store_batch_size = size.max(1);
        self
    }

    pub async fn close(&self) {
        self.connection.close().await;
    }

    async fn refresh_count(&self, song_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE songs
            SET fingerprint_count = (SELECT COUNT(*) FROM fingerprints WHERE song_id = ?),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(song_id)
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(song_id)
        .execute(&self.connection)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl Catalog for Database {
    async fn store_fingerprints(
        &self,
        song_id: i64,
        fingerprints: &[Fingerprint],
    ) -> Result<usize> {
        if self.get_song(song_id).await?.is_none() {
            return Err(Error::NotFound(format!("song {}", song_id)));
        }

        // all batches commit together; a failure leaves the song untouched
        let mut tx = self.connection.begin().await?;
        let mut total = 0;
        for batch in fingerprints.chunks(self.store_batch_size) {
            for fingerprint in batch {
                sqlx::query(
                    r#"
                    INSERT INTO fingerprints (song_id, hash, time_offset)
                    VALUES (?, ?, ?)
                    "#,
                )
                .bind(song_id)
                .bind(&fingerprint.hash)
                .bind(fingerprint.anchor_frame as i64)
                .execute(&mut *tx)
                .await?;
            }

            total += batch.len();
            debug!(song_id, inserted = total, "fingerprint batch written");
        }
        tx.commit().await?;

        self.refresh_count(song_id).await?;
        debug!(song_id, stored = total, "fingerprints stored");

        Ok(total)
    }

    async fn lookup_by_hashes(&self, hashes: &[String]) -> Result<Vec<CatalogHit>> {
        if hashes.is_empty() {
            return Ok(vec![]);
        }

        // one bound JSON array keeps the statement shape fixed
        let hash_list = serde_json::to_string(hashes)?;

        let rows: Vec<(i64, String, i64, String, String)> = sqlx::query_as(
            r#"
            SELECT f.song_id, f.hash, f.time_offset, s.title, s.artist
            FROM fingerprints f
            JOIN songs s ON s.id = f.song_id
            WHERE f.hash IN (SELECT value FROM json_each(?))
            "#,
        )
        .bind(hash_list)
        .fetch_all(&self.connection)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(song_id, hash, anchor_frame, title, artist)| CatalogHit {
                song_id,
                hash,
                anchor_frame,
                title,
                artist,
            })
            .collect())
    }

    async fn delete_fingerprints(&self, song_id: i64) -> Result<u64> {
        let removed = sqlx::query("DELETE FROM fingerprints WHERE song_id = ?")
            .bind(song_id)
            .execute(&self.connection)
            .await?
            .rows_affected();

        self.refresh_count(song_id).await?;
        Ok(removed)
    }

    async fn stored_audio(&self, song_id: i64) -> Result<Vec<u8>> {
        let row: Option<(Option<Vec<u8>>,)> =
            sqlx::query_as("SELECT audio_data FROM songs WHERE id = ?")
                .bind(song_id)
                .fetch_optional(&self.connection)
                .await?;

        match row {
            None => Err(Error::NotFound(format!("song {}", song_id))),
            Some((Some(audio),)) if !audio.is_empty() => Ok(audio),
            Some(_) => Err(Error::NoStoredAudio(song_id)),
        }
    }

    async fn create_song(&self, song: &NewSong) -> Result<i64> {
        song.validate()?;
        let now = chrono::Utc::now().to_rfc3339();

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO songs
                (title, artist, duration_seconds, file_type, file_size, audio_data,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(song.title.trim())
        .bind(song.artist.as_deref().unwrap_or(DEFAULT_ARTIST))
        .bind(song.duration_seconds)
        .bind(song.file_type.as_deref().unwrap_or(DEFAULT_FILE_TYPE))
        .bind(song.file_size)
        .bind(song.audio.as_deref())
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.connection)
        .await?;

        Ok(id)
    }

    async fn get_song(&self, song_id: i64) -> Result<Option<Song>> {
        let query = format!("SELECT {} FROM songs WHERE id = ?", SONG_COLUMNS);
        Ok(sqlx::query_as::<_, Song>(&query)
            .bind(song_id)
            .fetch_optional(&self.connection)
            .await?)
    }

    async fn list_songs(&self) -> Result<Vec<Song>> {
        let query = format!(
            "SELECT {} FROM songs ORDER BY created_at DESC, id DESC",
            SONG_COLUMNS
        );
        Ok(sqlx::query_as::<_, Song>(&query)
            .fetch_all(&self.connection)
            .await?)
    }

    async fn update_song(&self, song_id: i64, update: &SongUpdate) -> Result<Song> {
        let affected = sqlx::query(
            r#"
            UPDATE songs
            SET title = COALESCE(?, title),
                artist = COALESCE(?, artist),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(update.title.as_deref())
        .bind(update.artist.as_deref())
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(song_id)
        .execute(&self.connection)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(Error::NotFound(format!("song {}", song_id)));
        }

        self.get_song(song_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("song {}", song_id)))
    }

    async fn delete_song(&self, song_id: i64) -> Result<()> {
        let affected = sqlx::query("DELETE FROM songs WHERE id = ?")
            .bind(song_id)
            .execute(&self.connection)
            .await?
            .rows_affected();

        if affected == 0 {
            return Err(Error::NotFound(format!("song {}", song_id)));
        }
        Ok(())
    }
}
