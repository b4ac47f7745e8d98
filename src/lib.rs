//! Landmark audio fingerprinting and song identification.
//!
//! Audio is decoded to mono 11025 Hz, turned into a spectrogram, reduced to
//! per-frame peaks and hashed into landmark pairs. Songs and their
//! fingerprints live in a [`Catalog`]; queries are identified by hash voting,
//! either in one shot ([`MatchEngine::identify`]) or incrementally over a
//! stream ([`run_session`]).

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod matching;
pub mod persistance;
pub mod regenerate;
pub mod routes;
pub mod server;
pub mod streaming;

pub use config::Config;
pub use error::{Error, Result};
pub use fingerprint::{fingerprint_blocking, fingerprint_pipeline, Fingerprint};
pub use matching::{Identification, MatchEngine, MatchResult};
pub use persistance::database::Database;
pub use persistance::memory::MemoryCatalog;
pub use persistance::{persist, Catalog, NewSong, Song};
pub use regenerate::{regenerate, regenerate_all, RegenerationStatus, RegenerationSummary};
pub use streaming::{run_session, StreamingSession};
