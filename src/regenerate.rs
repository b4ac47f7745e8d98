//! Catalog maintenance: rebuild fingerprints from stored original audio.
//!
//! Regeneration is delete-then-insert and not atomic. A song whose old
//! fingerprints were deleted but whose new ones could not be stored ends up
//! with none; such songs are flagged `degraded` in the report.

use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::fingerprint::fingerprint_blocking;
use crate::persistance::Catalog;

/// Per-song outcome of a regeneration.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RegenerationStatus {
    Ok { fingerprints: usize },
    NotFound,
    NoAudio,
    Failed { message: String, degraded: bool },
}

impl RegenerationStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, RegenerationStatus::Ok { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SongRegeneration {
    pub song_id: i64,
    pub title: String,
    #[serde(flatten)]
    pub status: RegenerationStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegenerationSummary {
    pub total_songs: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub results: Vec<SongRegeneration>,
}

/// Regenerate the fingerprints of one song.
///
/// Missing songs and songs without audio are reported through the status,
/// not as errors. A catalog failure before anything was deleted is returned
/// as an error.
pub async fn regenerate<C: Catalog + ?Sized>(
    catalog: &C,
    song_id: i64,
) -> Result<RegenerationStatus> {
    let audio = match catalog.stored_audio(song_id).await {
        Ok(audio) => audio,
        Err(Error::NotFound(_)) => return Ok(RegenerationStatus::NotFound),
        Err(Error::NoStoredAudio(_)) => return Ok(RegenerationStatus::NoAudio),
        Err(err) => return Err(err),
    };

    // fingerprint first: a bad payload must not wipe the existing prints
    let fingerprints = match fingerprint_blocking(audio).await {
        Ok(fingerprints) => fingerprints,
        Err(err) => {
            return Ok(RegenerationStatus::Failed {
                message: err.to_string(),
                degraded: false,
            })
        }
    };

    catalog.delete_fingerprints(song_id).await?;

    match catalog.store_fingerprints(song_id, &fingerprints).await {
        Ok(stored) => {
            info!(song_id, fingerprints = stored, "fingerprints regenerated");
            Ok(RegenerationStatus::Ok {
                fingerprints: stored,
            })
        }
        Err(err) => {
            error!(song_id, error = %err, "song left without fingerprints");
            Ok(RegenerationStatus::Failed {
                message: err.to_string(),
                degraded: true,
            })
        }
    }
}

/// Regenerate every song in the catalog, in ascending id order.
///
/// One failing song never stops the batch.
pub async fn regenerate_all<C: Catalog + ?Sized>(catalog: &C) -> Result<RegenerationSummary> {
    let mut songs = catalog.list_songs().await?;
    songs.sort_by_key(|song| song.id);

    let mut results = Vec::with_capacity(songs.len());
    for song in &songs {
        let status = match regenerate(catalog, song.id).await {
            Ok(status) => status,
            Err(err) => RegenerationStatus::Failed {
                message: err.to_string(),
                degraded: false,
            },
        };

        if !status.is_ok() {
            warn!(song_id = song.id, ?status, "regeneration skipped");
        }

        results.push(SongRegeneration {
            song_id: song.id,
            title: song.title.clone(),
            status,
        });
    }

    let succeeded = results.iter().filter(|r| r.status.is_ok()).count();
    info!(total = songs.len(), succeeded, "catalog regeneration finished");

    Ok(RegenerationSummary {
        total_songs: songs.len(),
        processed: results.len(),
        succeeded,
        results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::decode::tests::wav_bytes;
    use crate::fingerprint::Fingerprint;
    use crate::persistance::memory::MemoryCatalog;
    use crate::persistance::{CatalogHit, NewSong, Song, SongUpdate};
    use async_trait::async_trait;

    /// Delegates to a [`MemoryCatalog`] but refuses to store prints for one
    /// song, after its old prints were already deleted.
    struct RejectingStore {
        inner: MemoryCatalog,
        reject: i64,
    }

    #[async_trait]
    impl Catalog for RejectingStore {
        async fn store_fingerprints(
            &self,
            song_id: i64,
            fingerprints: &[Fingerprint],
        ) -> Result<usize> {
            if song_id == self.reject {
                return Err(Error::CatalogUnavailable("disk full".into()));
            }
            self.inner.store_fingerprints(song_id, fingerprints).await
        }

        async fn lookup_by_hashes(&self, hashes: &[String]) -> Result<Vec<CatalogHit>> {
            self.inner.lookup_by_hashes(hashes).await
        }

        async fn delete_fingerprints(&self, song_id: i64) -> Result<u64> {
            self.inner.delete_fingerprints(song_id).await
        }

        async fn stored_audio(&self, song_id: i64) -> Result<Vec<u8>> {
            self.inner.stored_audio(song_id).await
        }

        async fn create_song(&self, song: &NewSong) -> Result<i64> {
            self.inner.create_song(song).await
        }

        async fn get_song(&self, song_id: i64) -> Result<Option<Song>> {
            self.inner.get_song(song_id).await
        }

        async fn list_songs(&self) -> Result<Vec<Song>> {
            self.inner.list_songs().await
        }

        async fn update_song(&self, song_id: i64, update: &SongUpdate) -> Result<Song> {
            self.inner.update_song(song_id, update).await
        }

        async fn delete_song(&self, song_id: i64) -> Result<()> {
            self.inner.delete_song(song_id).await
        }
    }

    fn silent_wav(samples: usize) -> Vec<u8> {
        wav_bytes(1, 1, 11_025, 16, &vec![0u8; samples * 2])
    }

    #[tokio::test]
    async fn regenerate_replaces_old_prints() {
        let catalog = MemoryCatalog::new();
        let id = catalog
            .create_song(&NewSong::new("Quiet", silent_wav(22_050)))
            .await
            .unwrap();
        let stale = Fingerprint {
            hash: "stale".into(),
            anchor_frame: 0,
        };
        catalog.store_fingerprints(id, &[stale]).await.unwrap();

        let status = regenerate(&catalog, id).await.unwrap();
        assert_eq!(status, RegenerationStatus::Ok { fingerprints: 87 });
        assert!(catalog.lookup_by_hashes(&["stale".into()]).await.unwrap().is_empty());
        assert_eq!(catalog.get_song(id).await.unwrap().unwrap().fingerprint_count, 87);
    }

    #[tokio::test]
    async fn missing_song_and_missing_audio_are_statuses() {
        let catalog = MemoryCatalog::new();
        let id = catalog
            .create_song(&NewSong {
                title: "Empty".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(regenerate(&catalog, 77).await.unwrap(), RegenerationStatus::NotFound);
        assert_eq!(regenerate(&catalog, id).await.unwrap(), RegenerationStatus::NoAudio);
    }

    #[tokio::test]
    async fn corrupt_audio_keeps_existing_prints() {
        let catalog = MemoryCatalog::new();
        let id = catalog
            .create_song(&NewSong::new("Corrupt", b"RIFF....".to_vec()))
            .await
            .unwrap();
        let kept = Fingerprint {
            hash: "kept".into(),
            anchor_frame: 1,
        };
        catalog.store_fingerprints(id, &[kept]).await.unwrap();

        let status = regenerate(&catalog, id).await.unwrap();
        assert!(matches!(status, RegenerationStatus::Failed { degraded: false, .. }));
        assert_eq!(catalog.lookup_by_hashes(&["kept".into()]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn batch_continues_past_failures() {
        let catalog = MemoryCatalog::new();
        catalog
            .create_song(&NewSong::new("Good", silent_wav(11_025)))
            .await
            .unwrap();
        catalog
            .create_song(&NewSong::new("Bad", b"nope".to_vec()))
            .await
            .unwrap();
        catalog
            .create_song(&NewSong::new("Also good", silent_wav(22_050)))
            .await
            .unwrap();

        let summary = regenerate_all(&catalog).await.unwrap();
        assert_eq!(summary.total_songs, 3);
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.results[0].title, "Good");
        assert!(!summary.results[1].status.is_ok());
        assert_eq!(
            summary.results[2].status,
            RegenerationStatus::Ok { fingerprints: 87 }
        );
    }

    #[tokio::test]
    async fn failed_restore_reports_degraded_song() {
        let inner = MemoryCatalog::new();
        let first = inner
            .create_song(&NewSong::new("Lost", silent_wav(22_050)))
            .await
            .unwrap();
        let second = inner
            .create_song(&NewSong::new("Fine", silent_wav(22_050)))
            .await
            .unwrap();
        let old = Fingerprint {
            hash: "old".into(),
            anchor_frame: 0,
        };
        inner.store_fingerprints(first, &[old]).await.unwrap();
        let catalog = RejectingStore {
            inner,
            reject: first,
        };

        let status = regenerate(&catalog, first).await.unwrap();
        match status {
            RegenerationStatus::Failed { message, degraded } => {
                assert!(degraded);
                assert!(message.contains("disk full"));
            }
            other => panic!("unexpected status {:?}", other),
        }
        assert!(catalog.lookup_by_hashes(&["old".into()]).await.unwrap().is_empty());

        let summary = regenerate_all(&catalog).await.unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.succeeded, 1);
        assert!(matches!(
            summary.results[0].status,
            RegenerationStatus::Failed { degraded: true, .. }
        ));
        assert_eq!(summary.results[1].song_id, second);
        assert_eq!(
            summary.results[1].status,
            RegenerationStatus::Ok { fingerprints: 87 }
        );
        let json = serde_json::to_value(&summary.results[0]).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["degraded"], true);
    }

    #[test]
    fn summary_serializes_flat_status() {
        let item = SongRegeneration {
            song_id: 1,
            title: "T".into(),
            status: RegenerationStatus::Ok { fingerprints: 3 },
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["fingerprints"], 3);
        assert_eq!(json["song_id"], 1);
    }
}
