//! Catalog search with temporal-coherence voting.
//!
//! Every distinct stored `(song, hash, anchor)` sharing a hash with the query
//! casts one vote per query occurrence of that hash, keyed by
//! `(song_id, db_anchor - query_anchor)`. Duplicate stored rows collapse first,
//! so a score never exceeds the query length.
//! A true match piles its votes onto a single offset (the playback
//! alignment); chance collisions scatter across many. A song's score is its
//! best single-offset vote count.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::fingerprint::{fingerprint_blocking, Fingerprint};
use crate::persistance::{Catalog, CatalogHit};

/// Coherent votes needed before a match is confirmed.
pub const MIN_MATCHES: usize = 25;
/// Candidates reported alongside the winner.
pub const MAX_CANDIDATES: usize = 5;
/// Unique hashes sent to the catalog per lookup.
pub const DEFAULT_LOOKUP_BATCH: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub song_id: i64,
    pub title: String,
    pub artist: String,
    pub matched_hashes: usize,
    pub confidence: f64,
}

/// Best match for a query plus the runners-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub song_id: i64,
    pub title: String,
    pub artist: String,
    /// Votes at the winning song's best offset.
    pub matched_hashes: usize,
    /// Number of fingerprints in the query.
    pub query_hashes: usize,
    pub confidence: f64,
    pub is_confirmed: bool,
    pub min_required: usize,
    /// Up to [`MAX_CANDIDATES`] songs, best first.
    pub candidates: Vec<Candidate>,
}

/// Outcome of identifying a clip end to end.
#[derive(Debug, Clone, PartialEq)]
pub enum Identification {
    /// The clip produced no fingerprints.
    InsufficientAudio,
    /// Fingerprints were searched and nothing in the catalog shares them.
    NoMatch,
    Match(MatchResult),
}

/// `matched / total` as a percentage with one decimal, halves to even.
pub fn confidence(matched: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let percent = matched as f64 / total as f64 * 100.0;
    (percent * 10.0).round_ties_even() / 10.0
}

#[derive(Debug, Clone)]
pub struct MatchEngine {
    lookup_batch_size: usize,
    min_matches: usize,
}

impl MatchEngine {
    pub fn new() -> Self {
        Self {
            lookup_batch_size: DEFAULT_LOOKUP_BATCH,
            min_matches: MIN_MATCHES,
        }
    }

    pub fn with_lookup_batch_size(mut self, size: usize) -> Self {
        self.lookup_batch_size = size.max(1);
        self
    }

    pub fn min_matches(&self) -> usize {
        self.min_matches
    }

    /// Look up `query` in the catalog and score the hits.
    ///
    /// `Ok(None)` means the catalog holds none of the query hashes. Catalog
    /// failures are returned as errors, never as `None`.
    pub async fn search<C: Catalog + ?Sized>(
        &self,
        catalog: &C,
        query: &[Fingerprint],
    ) -> Result<Option<MatchResult>> {
        if query.is_empty() {
            return Ok(None);
        }

        let mut seen = HashSet::new();
        let unique: Vec<String> = query
            .iter()
            .filter(|fp| seen.insert(fp.hash.as_str()))
            .map(|fp| fp.hash.clone())
            .collect();

        let mut hits = Vec::new();
        for batch in unique.chunks(self.lookup_batch_size) {
            hits.extend(catalog.lookup_by_hashes(batch).await?);
        }

        debug!(
            query = query.len(),
            unique = unique.len(),
            hits = hits.len(),
            "catalog lookup finished"
        );

        Ok(self.score(query, &hits))
    }

    /// Temporal-coherence voting over already fetched catalog hits.
    ///
    /// Songs with equal scores are ranked by ascending song id.
    pub fn score(&self, query: &[Fingerprint], hits: &[CatalogHit]) -> Option<MatchResult> {
        let mut query_times: HashMap<&str, Vec<i64>> = HashMap::new();
        for fp in query {
            query_times
                .entry(fp.hash.as_str())
                .or_default()
                .push(fp.anchor_frame as i64);
        }

        let mut votes: HashMap<(i64, i64), usize> = HashMap::new();
        let mut info: HashMap<i64, (&str, &str)> = HashMap::new();

        let mut distinct = HashSet::new();
        for hit in hits {
            if !distinct.insert((hit.song_id, hit.hash.as_str(), hit.anchor_frame)) {
                continue;
            }
            let Some(times) = query_times.get(hit.hash.as_str()) else {
                continue;
            };
            info.entry(hit.song_id)
                .or_insert((hit.title.as_str(), hit.artist.as_str()));

            for &query_time in times {
                *votes
                    .entry((hit.song_id, hit.anchor_frame - query_time))
                    .or_default() += 1;
            }
        }

        let mut best_per_song: BTreeMap<i64, usize> = BTreeMap::new();
        for ((song_id, _), count) in votes {
            let best = best_per_song.entry(song_id).or_default();
            *best = (*best).max(count);
        }

        let mut ranked: Vec<(i64, usize)> = best_per_song.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        let &(song_id, matched) = ranked.first()?;
        let total = query.len();
        let (title, artist) = info.get(&song_id).copied().unwrap_or_default();

        let candidates = ranked
            .iter()
            .take(MAX_CANDIDATES)
            .map(|&(id, count)| {
                let (title, artist) = info.get(&id).copied().unwrap_or_default();
                Candidate {
                    song_id: id,
                    title: title.to_string(),
                    artist: artist.to_string(),
                    matched_hashes: count,
                    confidence: confidence(count, total),
                }
            })
            .collect();

        Some(MatchResult {
            song_id,
            title: title.to_string(),
            artist: artist.to_string(),
            matched_hashes: matched,
            query_hashes: total,
            confidence: confidence(matched, total),
            is_confirmed: matched >= self.min_matches,
            min_required: self.min_matches,
            candidates,
        })
    }

    /// Fingerprint a WAV clip and search for it.
    pub async fn identify<C: Catalog + ?Sized>(
        &self,
        catalog: &C,
        audio_bytes: Vec<u8>,
    ) -> Result<Identification> {
        let fingerprints = fingerprint_blocking(audio_bytes).await?;
        if fingerprints.is_empty() {
            return Ok(Identification::InsufficientAudio);
        }

        Ok(match self.search(catalog, &fingerprints).await? {
            Some(result) => Identification::Match(result),
            None => Identification::NoMatch,
        })
    }
}

impl Default for MatchEngine {
    fn default() -> Self {
        Self::new()
    }
}
