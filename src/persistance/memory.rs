//! In-process catalog.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;
use crate::persistance::{
    Catalog, CatalogHit, NewSong, Song, SongUpdate, DEFAULT_ARTIST, DEFAULT_FILE_TYPE,
};

#[derive(Default)]
struct State {
    next_id: i64,
    songs: BTreeMap<i64, (Song, Option<Vec<u8>>)>,
    /// hash -> (song_id, anchor_frame), in insertion order
    fingerprints: HashMap<String, Vec<(i64, i64)>>,
}

/// Catalog kept entirely in memory.
///
/// [`MemoryCatalog::set_available`] simulates a backend outage: while
/// unavailable every operation fails with [`Error::CatalogUnavailable`].
pub struct MemoryCatalog {
    state: Mutex<State>,
    available: AtomicBool,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> Result<T>) -> Result<T> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(Error::CatalogUnavailable("memory catalog offline".into()));
        }
        let mut state = self
            .state
            .lock()
            .map_err(|_| Error::CatalogUnavailable("memory catalog lock poisoned".into()))?;
        f(&mut state)
    }
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

fn recount(state: &mut State, song_id: i64) {
    let count = state
        .fingerprints
        .values()
        .flat_map(|rows| rows.iter())
        .filter(|(id, _)| *id == song_id)
        .count() as i64;

    if let Some((song, _)) = state.songs.get_mut(&song_id) {
        song.fingerprint_count = count;
        song.updated_at = chrono::Utc::now().to_rfc3339();
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn store_fingerprints(
        &self,
        song_id: i64,
        fingerprints: &[Fingerprint],
    ) -> Result<usize> {
        self.with_state(|state| {
            if !state.songs.contains_key(&song_id) {
                return Err(Error::NotFound(format!("song {}", song_id)));
            }
            for fp in fingerprints {
                state
                    .fingerprints
                    .entry(fp.hash.clone())
                    .or_default()
                    .push((song_id, fp.anchor_frame as i64));
            }
            recount(state, song_id);
            Ok(fingerprints.len())
        })
    }

    async fn lookup_by_hashes(&self, hashes: &[String]) -> Result<Vec<CatalogHit>> {
        self.with_state(|state| {
            let unique: HashSet<&String> = hashes.iter().collect();
            let mut hits = Vec::new();

            for hash in unique {
                let Some(rows) = state.fingerprints.get(hash) else {
                    continue;
                };
                for &(song_id, anchor_frame) in rows {
                    if let Some((song, _)) = state.songs.get(&song_id) {
                        hits.push(CatalogHit {
                            song_id,
                            hash: hash.clone(),
                            anchor_frame,
                            title: song.title.clone(),
                            artist: song.artist.clone(),
                        });
                    }
                }
            }

            Ok(hits)
        })
    }

    async fn delete_fingerprints(&self, song_id: i64) -> Result<u64> {
        self.with_state(|state| {
            let mut removed = 0;
            for rows in state.fingerprints.values_mut() {
                let before = rows.len();
                rows.retain(|(id, _)| *id != song_id);
                removed += (before - rows.len()) as u64;
            }
            state.fingerprints.retain(|_, rows| !rows.is_empty());
            recount(state, song_id);
            Ok(removed)
        })
    }

    async fn stored_audio(&self, song_id: i64) -> Result<Vec<u8>> {
        self.with_state(|state| match state.songs.get(&song_id) {
            None => Err(Error::NotFound(format!("song {}", song_id))),
            Some((_, Some(audio))) if !audio.is_empty() => Ok(audio.clone()),
            Some(_) => Err(Error::NoStoredAudio(song_id)),
        })
    }

    async fn create_song(&self, song: &NewSong) -> Result<i64> {
        song.validate()?;
        self.with_state(|state| {
            state.next_id += 1;
            let id = state.next_id;
            let now = chrono::Utc::now().to_rfc3339();

            let record = Song {
                id,
                title: song.title.trim().to_string(),
                artist: song.artist.clone().unwrap_or_else(|| DEFAULT_ARTIST.into()),
                duration_seconds: song.duration_seconds,
                file_type: song
                    .file_type
                    .clone()
                    .unwrap_or_else(|| DEFAULT_FILE_TYPE.into()),
                file_size: song.file_size,
                fingerprint_count: 0,
                created_at: now.clone(),
                updated_at: now,
            };
            state.songs.insert(id, (record, song.audio.clone()));
            Ok(id)
        })
    }

    async fn get_song(&self, song_id: i64) -> Result<Option<Song>> {
        self.with_state(|state| Ok(state.songs.get(&song_id).map(|(song, _)| song.clone())))
    }

    async fn list_songs(&self) -> Result<Vec<Song>> {
        self.with_state(|state| {
            // ids grow monotonically, so reverse id order is newest first
            Ok(state.songs.values().rev().map(|(song, _)| song.clone()).collect())
        })
    }

    async fn update_song(&self, song_id: i64, update: &SongUpdate) -> Result<Song> {
        self.with_state(|state| {
            let (song, _) = state
                .songs
                .get_mut(&song_id)
                .ok_or_else(|| Error::NotFound(format!("song {}", song_id)))?;

            if let Some(title) = &update.title {
                song.title = title.clone();
            }
            if let Some(artist) = &update.artist {
                song.artist = artist.clone();
            }
            song.updated_at = chrono::Utc::now().to_rfc3339();
            Ok(song.clone())
        })
    }

    async fn delete_song(&self, song_id: i64) -> Result<()> {
        self.with_state(|state| {
            if state.songs.remove(&song_id).is_none() {
                return Err(Error::NotFound(format!("song {}", song_id)));
            }
            for rows in state.fingerprints.values_mut() {
                rows.retain(|(id, _)| *id != song_id);
            }
            state.fingerprints.retain(|_, rows| !rows.is_empty());
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(hash: &str, anchor_frame: u32) -> Fingerprint {
        Fingerprint {
            hash: hash.into(),
            anchor_frame,
        }
    }

    #[tokio::test]
    async fn lookup_returns_every_stored_row() {
        let catalog = MemoryCatalog::new();
        let id = catalog.create_song(&NewSong::new("A", vec![1])).await.unwrap();

        let stored = vec![fp("aa", 0), fp("aa", 0), fp("bb", 3)];
        assert_eq!(catalog.store_fingerprints(id, &stored).await.unwrap(), 3);

        let hits = catalog
            .lookup_by_hashes(&["aa".to_string(), "aa".to_string(), "cc".to_string()])
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.song_id == id && h.hash == "aa" && h.title == "A"));
    }

    #[tokio::test]
    async fn offline_catalog_fails_loudly() {
        let catalog = MemoryCatalog::new();
        catalog.set_available(false);

        let result = catalog.lookup_by_hashes(&["aa".to_string()]).await;
        assert!(matches!(result, Err(Error::CatalogUnavailable(_))));
    }

    #[tokio::test]
    async fn stored_audio_distinguishes_missing_song_and_missing_audio() {
        let catalog = MemoryCatalog::new();
        let silent = catalog
            .create_song(&NewSong {
                title: "No audio".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(matches!(catalog.stored_audio(99).await, Err(Error::NotFound(_))));
        assert!(matches!(
            catalog.stored_audio(silent).await,
            Err(Error::NoStoredAudio(id)) if id == silent
        ));
    }

    #[tokio::test]
    async fn delete_song_removes_fingerprints() {
        let catalog = MemoryCatalog::new();
        let id = catalog.create_song(&NewSong::new("A", vec![1])).await.unwrap();
        catalog.store_fingerprints(id, &[fp("aa", 1)]).await.unwrap();

        catalog.delete_song(id).await.unwrap();
        assert!(catalog.lookup_by_hashes(&["aa".into()]).await.unwrap().is_empty());
        assert!(matches!(catalog.delete_song(id).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn songs_list_newest_first_with_defaults() {
        let catalog = MemoryCatalog::new();
        catalog.create_song(&NewSong::new("First", vec![1])).await.unwrap();
        catalog.create_song(&NewSong::new("Second", vec![1])).await.unwrap();

        let songs = catalog.list_songs().await.unwrap();
        assert_eq!(songs[0].title, "Second");
        assert_eq!(songs[1].artist, DEFAULT_ARTIST);
        assert_eq!(songs[1].file_type, DEFAULT_FILE_TYPE);
    }
}
