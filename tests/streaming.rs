mod common;

use std::sync::Arc;
use std::time::Duration;

use audiomark::streaming::{ClientMessage, ServerEvent};
use audiomark::{persist, run_session, Catalog, MatchEngine, MemoryCatalog, NewSong};
use common::{noise, wav, RATE};
use tokio::sync::mpsc;

async fn next(events: &mut mpsc::Receiver<ServerEvent>) -> Option<ServerEvent> {
    tokio::time::timeout(Duration::from_secs(30), events.recv())
        .await
        .expect("timed out waiting for event")
}

async fn catalog_with_song(samples: &[i16]) -> Arc<dyn Catalog> {
    let catalog = MemoryCatalog::new();
    persist(&catalog, NewSong::new("Streamed", wav(samples)))
        .await
        .unwrap();
    Arc::new(catalog)
}

#[tokio::test]
async fn chunked_upload_is_confirmed_on_search() {
    let song = noise(7, 6 * RATE as usize);
    let catalog = catalog_with_song(&song).await;

    let (tx, rx) = mpsc::channel(64);
    let (out_tx, mut events) = mpsc::channel(64);
    let session = tokio::spawn(run_session(
        catalog,
        MatchEngine::new(),
        audiomark::streaming::AUTO_ANALYSIS_BYTES,
        rx,
        out_tx,
    ));

    assert_eq!(next(&mut events).await.unwrap().kind(), "status");

    let clip = wav(&song[..2 * RATE as usize]);
    for chunk in clip.chunks(4096) {
        tx.send(ClientMessage::Audio(chunk.to_vec())).await.unwrap();
    }
    tx.send(ClientMessage::Text(r#"{"action":"search"}"#.into()))
        .await
        .unwrap();

    match next(&mut events).await.unwrap() {
        ServerEvent::Status { message } => {
            assert_eq!(message, format!("analyzing {} bytes of audio", clip.len()))
        }
        other => panic!("unexpected event {:?}", other),
    }
    match next(&mut events).await.unwrap() {
        ServerEvent::Confirmed { data, .. } => {
            assert_eq!(data.song_id, 1);
            assert!(data.is_confirmed);
        }
        other => panic!("unexpected event {:?}", other),
    }

    // the session closes itself after confirming
    assert!(next(&mut events).await.is_none());
    session.await.unwrap();
}

#[tokio::test]
async fn auto_analysis_fires_once_threshold_is_crossed() {
    let song = noise(8, 6 * RATE as usize);
    let catalog = catalog_with_song(&song).await;

    let (tx, rx) = mpsc::channel(64);
    let (out_tx, mut events) = mpsc::channel(64);
    tokio::spawn(run_session(catalog, MatchEngine::new(), 30_000, rx, out_tx));
    next(&mut events).await;

    let clip = wav(&song[..2 * RATE as usize]);
    tx.send(ClientMessage::Audio(clip)).await.unwrap();

    assert_eq!(next(&mut events).await.unwrap().kind(), "status");
    assert_eq!(next(&mut events).await.unwrap().kind(), "confirmed");
}

#[tokio::test]
async fn unknown_audio_asks_for_more() {
    let catalog = catalog_with_song(&noise(9, 6 * RATE as usize)).await;

    let (tx, rx) = mpsc::channel(64);
    let (out_tx, mut events) = mpsc::channel(64);
    tokio::spawn(run_session(catalog, MatchEngine::new(), 1 << 20, rx, out_tx));
    next(&mut events).await;

    let clip = wav(&noise(10, 2 * RATE as usize));
    let len = clip.len();
    tx.send(ClientMessage::Audio(clip)).await.unwrap();
    tx.send(ClientMessage::Text(r#"{"action":"search"}"#.into()))
        .await
        .unwrap();

    assert_eq!(next(&mut events).await.unwrap().kind(), "status");
    match next(&mut events).await.unwrap() {
        ServerEvent::NoMatch { buffer_size, .. } => assert_eq!(buffer_size, Some(len)),
        ServerEvent::Partial { data, .. } => assert!(!data.is_confirmed),
        other => panic!("unexpected event {:?}", other),
    }
}
