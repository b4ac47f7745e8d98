//! Catalog storage.
//!
//! The fingerprinting core only talks to storage through [`Catalog`]. Two
//! implementations ship with the crate: [`database::Database`] backed by
//! SQLite and [`memory::MemoryCatalog`] for tests and offline tooling.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::fingerprint::{fingerprint_blocking, Fingerprint};

pub mod database;
pub mod memory;

pub const DEFAULT_ARTIST: &str = "Unknown";
pub const DEFAULT_FILE_TYPE: &str = "audio/wav";

/// A catalog song without its audio payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Song {
    pub id: i64,
    pub title: String,
    pub artist: String,
    pub duration_seconds: Option<f64>,
    pub file_type: String,
    pub file_size: Option<i64>,
    pub fingerprint_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Everything needed to register a new song.
#[derive(Debug, Clone, Default)]
pub struct NewSong {
    pub title: String,
    pub artist: Option<String>,
    pub duration_seconds: Option<f64>,
    pub file_type: Option<String>,
    pub file_size: Option<i64>,
    /// Original WAV bytes, kept for later regeneration.
    pub audio: Option<Vec<u8>>,
}

impl NewSong {
    pub fn new(title: impl Into<String>, audio: Vec<u8>) -> Self {
        Self {
            title: title.into(),
            file_size: Some(audio.len() as i64),
            audio: Some(audio),
            ..Default::default()
        }
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    /// Reject songs the catalog cannot hold.
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::Format("title is required".into()));
        }
        Ok(())
    }
}

/// Partial update of song metadata.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SongUpdate {
    pub title: Option<String>,
    pub artist: Option<String>,
}

/// One stored fingerprint returned by a hash lookup, joined with its song.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogHit {
    pub song_id: i64,
    pub hash: String,
    pub anchor_frame: i64,
    pub title: String,
    pub artist: String,
}

/// Outcome of [`persist`].
#[derive(Debug, Clone, Serialize)]
pub struct Persisted {
    pub song_id: i64,
    pub fingerprints_generated: usize,
}

/// Storage operations the fingerprinting core depends on.
///
/// Backend failures surface as [`Error::CatalogUnavailable`]; a lookup that
/// simply finds nothing returns an empty vec.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Append fingerprints for a song and return how many were stored.
    async fn store_fingerprints(&self, song_id: i64, fingerprints: &[Fingerprint])
        -> Result<usize>;

    /// Every stored fingerprint whose hash is in `hashes`.
    async fn lookup_by_hashes(&self, hashes: &[String]) -> Result<Vec<CatalogHit>>;

    /// Remove all fingerprints of a song, returning how many were removed.
    async fn delete_fingerprints(&self, song_id: i64) -> Result<u64>;

    /// Original audio of a song.
    ///
    /// Fails with [`Error::NotFound`] for unknown ids and
    /// [`Error::NoStoredAudio`] when the song has no audio.
    async fn stored_audio(&self, song_id: i64) -> Result<Vec<u8>>;

    async fn create_song(&self, song: &NewSong) -> Result<i64>;

    async fn get_song(&self, song_id: i64) -> Result<Option<Song>>;

    /// All songs, newest first.
    async fn list_songs(&self) -> Result<Vec<Song>>;

    async fn update_song(&self, song_id: i64, update: &SongUpdate) -> Result<Song>;

    /// Delete a song together with its fingerprints.
    async fn delete_song(&self, song_id: i64) -> Result<()>;
}

/// Register a song, fingerprint its audio and store the fingerprints.
pub async fn persist<C: Catalog + ?Sized>(catalog: &C, song: NewSong) -> Result<Persisted> {
    song.validate()?;
    let audio = song
        .audio
        .clone()
        .ok_or_else(|| Error::Format("audio is required".into()))?;

    // decode before touching the catalog so bad uploads leave no orphan song
    let fingerprints = fingerprint_blocking(audio).await?;

    let song_id = catalog.create_song(&song).await?;
    let stored = catalog.store_fingerprints(song_id, &fingerprints).await?;

    info!(song_id, title = %song.title, fingerprints = stored, "song persisted");

    Ok(Persisted {
        song_id,
        fingerprints_generated: stored,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::decode::tests::wav_bytes;
    use memory::MemoryCatalog;

    #[tokio::test]
    async fn persist_stores_generated_fingerprints() {
        let catalog = MemoryCatalog::new();
        let wav = wav_bytes(1, 1, 11_025, 16, &vec![0u8; 2 * 11_025]);

        let persisted = persist(&catalog, NewSong::new("Silence", wav).with_artist("Nobody"))
            .await
            .unwrap();

        // 22050 samples -> 42 frames -> 3 * (42 - 13)
        assert_eq!(persisted.fingerprints_generated, 87);
        let song = catalog.get_song(persisted.song_id).await.unwrap().unwrap();
        assert_eq!(song.fingerprint_count, 87);
        assert_eq!(song.artist, "Nobody");
    }

    #[tokio::test]
    async fn persist_rejects_bad_audio_without_creating_a_song() {
        let catalog = MemoryCatalog::new();
        let result = persist(&catalog, NewSong::new("Broken", b"garbage".to_vec())).await;

        assert!(matches!(result, Err(Error::Format(_))));
        assert!(catalog.list_songs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn persist_requires_a_title() {
        let catalog = MemoryCatalog::new();
        let result = persist(&catalog, NewSong::new("  ", vec![])).await;
        assert!(matches!(result, Err(Error::Format(_))));
    }
}
