//! HTTP route handlers.
//!
//! JSON endpoints answer with an envelope `{status, data, message}`; the
//! WebSocket route adapts socket frames onto [`run_session`].

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::error::Error;
use crate::fingerprint::{fingerprint_blocking, Fingerprint};
use crate::matching::Identification;
use crate::persistance::{persist, NewSong, Persisted, Song, SongUpdate};
use crate::regenerate::{regenerate, regenerate_all, RegenerationStatus, RegenerationSummary};
use crate::server::AppState;
use crate::streaming::{run_session, ClientMessage};

#[derive(Serialize)]
pub struct ApiResponse<T> {
    status: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    message: String,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T, message: impl Into<String>) -> Json<Self> {
        Json(Self {
            status: true,
            data: Some(data),
            message: message.into(),
        })
    }
}

/// Error response carrying an HTTP status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::Format(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) | Error::NoStoredAudio(_) => StatusCode::NOT_FOUND,
            Error::CatalogUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %err, "request failed");
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()> {
            status: false,
            data: None,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn decode_base64(payload: &str) -> Result<Vec<u8>, ApiError> {
    if payload.is_empty() {
        return Err(ApiError::bad_request("audio is required"));
    }
    base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| ApiError::bad_request(format!("invalid base64 audio: {}", e)))
}

fn not_found(song_id: i64) -> ApiError {
    ApiError::from(Error::NotFound(format!("song {}", song_id)))
}

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    #[serde(default)]
    pub title: String,
    pub artist: Option<String>,
    #[serde(default)]
    pub audio_base64: String,
    pub file_type: Option<String>,
    pub file_size: Option<i64>,
    pub duration_seconds: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub audio_base64: String,
}

#[derive(Serialize)]
pub struct FingerprintResponse {
    fingerprints: Vec<Fingerprint>,
}

#[derive(Serialize)]
pub struct RegeneratedSong {
    song_id: i64,
    fingerprints: usize,
}

pub async fn list_songs(State(state): State<AppState>) -> ApiResult<Vec<Song>> {
    let songs = state.catalog.list_songs().await?;
    let message = format!("{} songs", songs.len());
    Ok(ApiResponse::success(songs, message))
}

pub async fn get_song(State(state): State<AppState>, Path(song_id): Path<i64>) -> ApiResult<Song> {
    let song = state
        .catalog
        .get_song(song_id)
        .await?
        .ok_or_else(|| not_found(song_id))?;
    Ok(ApiResponse::success(song, "ok"))
}

/// Register a song from base64 WAV and fingerprint it.
pub async fn upload_song(
    State(state): State<AppState>,
    Json(request): Json<UploadRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Persisted>>), ApiError> {
    if request.title.trim().is_empty() {
        return Err(ApiError::bad_request("title is required"));
    }
    let audio = decode_base64(&request.audio_base64)?;

    let song = NewSong {
        title: request.title,
        artist: request.artist,
        duration_seconds: request.duration_seconds,
        file_type: request.file_type,
        file_size: request.file_size.or(Some(audio.len() as i64)),
        audio: Some(audio),
    };

    let persisted = persist(state.catalog.as_ref(), song).await?;
    let message = format!(
        "song uploaded with {} fingerprints",
        persisted.fingerprints_generated
    );
    Ok((StatusCode::CREATED, ApiResponse::success(persisted, message)))
}

pub async fn update_song(
    State(state): State<AppState>,
    Path(song_id): Path<i64>,
    Json(update): Json<SongUpdate>,
) -> ApiResult<Song> {
    let song = state.catalog.update_song(song_id, &update).await?;
    Ok(ApiResponse::success(song, "song updated"))
}

pub async fn delete_song(State(state): State<AppState>, Path(song_id): Path<i64>) -> ApiResult<i64> {
    state.catalog.delete_song(song_id).await?;
    Ok(ApiResponse::success(song_id, "song deleted"))
}

/// Stream back the original audio of a song.
pub async fn song_audio(
    State(state): State<AppState>,
    Path(song_id): Path<i64>,
) -> Result<Response, ApiError> {
    let song = state
        .catalog
        .get_song(song_id)
        .await?
        .ok_or_else(|| not_found(song_id))?;
    let audio = state.catalog.stored_audio(song_id).await?;

    let disposition = format!("inline; filename=\"{}.wav\"", song.title.replace('"', ""));
    Ok((
        [
            (header::CONTENT_TYPE, song.file_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        audio,
    )
        .into_response())
}

/// Identify a base64 WAV clip in one shot.
pub async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Response, ApiError> {
    let audio = decode_base64(&request.audio_base64)?;

    let response = match state.engine.identify(state.catalog.as_ref(), audio).await? {
        Identification::InsufficientAudio => ApiError::bad_request(
            "could not fingerprint the audio, is it long enough and not silent?",
        )
        .into_response(),
        Identification::NoMatch => Json(ApiResponse::<()> {
            status: true,
            data: None,
            message: "no match found".into(),
        })
        .into_response(),
        Identification::Match(result) => {
            let message = if result.is_confirmed {
                format!(
                    "song confirmed: \"{}\" by {} ({}/{} matches, {}% confidence)",
                    result.title,
                    result.artist,
                    result.matched_hashes,
                    result.min_required,
                    result.confidence
                )
            } else {
                format!(
                    "possible match: \"{}\" by {} ({}/{} matches needed, {}% confidence)",
                    result.title,
                    result.artist,
                    result.matched_hashes,
                    result.min_required,
                    result.confidence
                )
            };
            ApiResponse::success(result, message).into_response()
        }
    };

    Ok(response)
}

/// Fingerprint an uploaded file without touching the catalog.
///
/// Expects a multipart field named `file` containing WAV bytes.
pub async fn fingerprint(mut audio: Multipart) -> ApiResult<FingerprintResponse> {
    let mut audio_bytes = Vec::new();

    while let Some(field) = audio
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?
    {
        if field.name() == Some("file") {
            audio_bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(e.to_string()))?
                .to_vec();
        }
    }

    let fingerprints = fingerprint_blocking(audio_bytes).await?;
    let message = format!("{} fingerprints", fingerprints.len());
    Ok(ApiResponse::success(FingerprintResponse { fingerprints }, message))
}

pub async fn regenerate_song(
    State(state): State<AppState>,
    Path(song_id): Path<i64>,
) -> ApiResult<RegeneratedSong> {
    match regenerate(state.catalog.as_ref(), song_id).await? {
        RegenerationStatus::Ok { fingerprints } => Ok(ApiResponse::success(
            RegeneratedSong {
                song_id,
                fingerprints,
            },
            format!("fingerprints regenerated: {}", fingerprints),
        )),
        RegenerationStatus::NotFound => Err(not_found(song_id)),
        RegenerationStatus::NoAudio => Err(Error::NoStoredAudio(song_id).into()),
        RegenerationStatus::Failed { message, degraded } => Err(ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: if degraded {
                format!("{} (song left without fingerprints)", message)
            } else {
                message
            },
        }),
    }
}

pub async fn regenerate_catalog(State(state): State<AppState>) -> ApiResult<RegenerationSummary> {
    let summary = regenerate_all(state.catalog.as_ref()).await?;
    let message = format!(
        "regeneration finished: {} songs processed",
        summary.processed
    );
    Ok(ApiResponse::success(summary, message))
}

pub async fn identify_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| stream_socket(socket, state))
}

async fn stream_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (inbound_tx, inbound_rx) = mpsc::channel(64);
    let (outbound_tx, mut outbound_rx) = mpsc::channel(64);

    let session = tokio::spawn(run_session(
        state.catalog.clone(),
        state.engine.clone(),
        state.auto_analysis_bytes,
        inbound_rx,
        outbound_tx,
    ));

    let writer = tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(err) => {
                    warn!(error = %err, "dropping unserializable event");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                return;
            }
        }
        // session over (confirmed or stopped)
        let _ = sink.send(Message::Close(None)).await;
    });

    while let Some(Ok(message)) = stream.next().await {
        let inbound = match message {
            Message::Binary(bytes) => ClientMessage::Audio(bytes.to_vec()),
            Message::Text(text) => ClientMessage::Text(text.as_str().to_owned()),
            Message::Close(_) => break,
            _ => continue,
        };
        if inbound_tx.send(inbound).await.is_err() {
            break;
        }
    }

    debug!("websocket reader finished");
    drop(inbound_tx);
    let _ = session.await;
    let _ = writer.await;
}
