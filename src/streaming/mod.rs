//! Live identification over a message stream.
//!
//! [`run_session`] drives one [`StreamingSession`] from a channel of client
//! frames and pushes [`ServerEvent`]s back out. It is transport agnostic; the
//! WebSocket route in `routes` is a thin adapter around it.

pub mod models;
pub mod session;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::matching::{Identification, MatchEngine};
use crate::persistance::Catalog;

pub use models::{ClientMessage, ControlAction, ServerEvent};
pub use session::{Effect, SessionState, StreamingSession, AUTO_ANALYSIS_BYTES};

/// Run a streaming session until the client disconnects, sends `stop`, or a
/// match is confirmed.
///
/// Dropping out of the loop aborts any analysis still running, so nothing is
/// delivered after close.
pub async fn run_session(
    catalog: Arc<dyn Catalog>,
    engine: MatchEngine,
    auto_analysis_bytes: usize,
    mut inbound: mpsc::Receiver<ClientMessage>,
    outbound: mpsc::Sender<ServerEvent>,
) {
    let mut session = StreamingSession::new().with_auto_analysis_bytes(auto_analysis_bytes);
    let mut analyses: JoinSet<(u64, Result<Identification>)> = JoinSet::new();
    let mut running_generation = session.generation();

    if outbound.send(StreamingSession::greeting()).await.is_err() {
        return;
    }

    'session: loop {
        let effects = tokio::select! {
            message = inbound.recv() => match message {
                Some(ClientMessage::Audio(chunk)) => session.on_audio(&chunk),
                Some(ClientMessage::Text(text)) => session.on_text(&text),
                None => {
                    debug!("client disconnected");
                    session.close();
                    break 'session;
                }
            },
            Some(joined) = analyses.join_next(), if !analyses.is_empty() => match joined {
                Ok((generation, outcome)) => session.on_analysis_complete(generation, outcome),
                Err(err) => {
                    warn!(error = %err, "analysis task failed");
                    session.on_analysis_complete(running_generation, Err(Error::from(err)))
                }
            },
        };

        for effect in effects {
            match effect {
                Effect::Emit(event) => {
                    debug!(kind = event.kind(), "pushing event");
                    if outbound.send(event).await.is_err() {
                        session.close();
                        break 'session;
                    }
                }
                Effect::Analyze(job) => {
                    running_generation = job.generation;
                    let catalog = Arc::clone(&catalog);
                    let engine = engine.clone();

                    analyses.spawn(async move {
                        let outcome = engine.identify(catalog.as_ref(), job.audio).await;
                        (job.generation, outcome)
                    });
                }
                Effect::Close => {
                    session.close();
                    break 'session;
                }
            }
        }
    }

    analyses.abort_all();
    info!(state = ?session.state(), "streaming session finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistance::memory::MemoryCatalog;
    use std::time::Duration;

    fn spawn_session(
        catalog: Arc<dyn Catalog>,
        auto_bytes: usize,
    ) -> (
        mpsc::Sender<ClientMessage>,
        mpsc::Receiver<ServerEvent>,
        tokio::task::JoinHandle<()>,
    ) {
        let (in_tx, in_rx) = mpsc::channel(16);
        let (out_tx, out_rx) = mpsc::channel(16);
        let handle = tokio::spawn(run_session(
            catalog,
            MatchEngine::new(),
            auto_bytes,
            in_rx,
            out_tx,
        ));
        (in_tx, out_rx, handle)
    }

    async fn next(events: &mut mpsc::Receiver<ServerEvent>) -> ServerEvent {
        tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("session ended")
    }

    #[tokio::test]
    async fn greets_then_reports_missing_audio() {
        let (tx, mut events, _handle) = spawn_session(Arc::new(MemoryCatalog::new()), 1_000);

        assert_eq!(next(&mut events).await.kind(), "status");
        tx.send(ClientMessage::Text(r#"{"action":"search"}"#.into()))
            .await
            .unwrap();
        assert_eq!(
            next(&mut events).await,
            ServerEvent::error("no audio in buffer to analyze")
        );
    }

    #[tokio::test]
    async fn unparseable_audio_surfaces_as_error_event() {
        let (tx, mut events, _handle) = spawn_session(Arc::new(MemoryCatalog::new()), 8);
        next(&mut events).await;

        tx.send(ClientMessage::Audio(b"not a wav".to_vec())).await.unwrap();
        assert_eq!(next(&mut events).await.kind(), "status");
        match next(&mut events).await {
            ServerEvent::Error { message } => assert!(message.contains("format error")),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn stop_ends_the_session() {
        let (tx, mut events, handle) = spawn_session(Arc::new(MemoryCatalog::new()), 1_000);
        next(&mut events).await;

        tx.send(ClientMessage::Text(r#"{"action":"stop"}"#.into()))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn disconnect_ends_the_session() {
        let (tx, mut events, handle) = spawn_session(Arc::new(MemoryCatalog::new()), 1_000);
        next(&mut events).await;

        drop(tx);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
