//! Per-connection identification state machine.
//!
//! The session does no I/O. Each input returns the [`Effect`]s the driver
//! must carry out: events to push, analyses to start, or closing the
//! connection. At most one analysis is in flight per session; triggers that
//! arrive meanwhile are folded into a single follow-up run over the newest
//! buffer. Results are tagged with the generation they were started in and
//! dropped if a reset or close happened since.

use crate::error::Result;
use crate::matching::Identification;
use crate::streaming::models::{parse_control, ControlAction, ServerEvent};

/// Buffered bytes that trigger an automatic analysis (about 5 s of 16-bit
/// mono PCM at 11025 Hz).
pub const AUTO_ANALYSIS_BYTES: usize = 110_250;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accumulating audio.
    Open,
    /// Accumulating audio with an analysis in flight.
    Analyzing,
    /// A match was confirmed; further audio is ignored.
    Confirmed,
    /// Stopped or disconnected.
    Closed,
}

/// A snapshot of the buffer to fingerprint and search.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisJob {
    pub generation: u64,
    pub audio: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Emit(ServerEvent),
    Analyze(AnalysisJob),
    Close,
}

#[derive(Debug)]
pub struct StreamingSession {
    buffer: Vec<u8>,
    found: bool,
    closed: bool,
    in_flight: bool,
    rerun: bool,
    generation: u64,
    auto_analysis_bytes: usize,
}

impl StreamingSession {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            found: false,
            closed: false,
            in_flight: false,
            rerun: false,
            generation: 0,
            auto_analysis_bytes: AUTO_ANALYSIS_BYTES,
        }
    }

    pub fn with_auto_analysis_bytes(mut self, bytes: usize) -> Self {
        self.auto_analysis_bytes = bytes.max(1);
        self
    }

    /// First event sent after the connection is accepted.
    pub fn greeting() -> ServerEvent {
        ServerEvent::status("connection established, send audio to identify")
    }

    pub fn state(&self) -> SessionState {
        if self.closed {
            SessionState::Closed
        } else if self.found {
            SessionState::Confirmed
        } else if self.in_flight {
            SessionState::Analyzing
        } else {
            SessionState::Open
        }
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_found(&self) -> bool {
        self.found
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Append a binary chunk, starting an analysis once enough is buffered.
    pub fn on_audio(&mut self, chunk: &[u8]) -> Vec<Effect> {
        if self.closed || self.found {
            return vec![];
        }

        self.buffer.extend_from_slice(chunk);

        if self.buffer.len() >= self.auto_analysis_bytes {
            self.request_analysis()
        } else {
            vec![]
        }
    }

    /// Handle a text frame carrying a JSON control action.
    pub fn on_text(&mut self, text: &str) -> Vec<Effect> {
        if self.closed {
            return vec![];
        }

        match parse_control(text) {
            Ok(Some(action)) => self.on_control(action),
            Ok(None) => vec![],
            Err(_) => vec![Effect::Emit(ServerEvent::error("invalid JSON"))],
        }
    }

    pub fn on_control(&mut self, action: ControlAction) -> Vec<Effect> {
        if self.closed {
            return vec![];
        }

        match action {
            ControlAction::Search if self.found => vec![],
            ControlAction::Search if self.buffer.is_empty() => {
                vec![Effect::Emit(ServerEvent::error("no audio in buffer to analyze"))]
            }
            ControlAction::Search => self.request_analysis(),
            ControlAction::Reset => {
                self.buffer.clear();
                self.found = false;
                self.rerun = false;
                self.generation += 1;
                vec![Effect::Emit(ServerEvent::status(
                    "buffer cleared, ready for new audio",
                ))]
            }
            ControlAction::Stop => {
                self.close();
                vec![Effect::Close]
            }
        }
    }

    /// Apply the result of the analysis started in `generation`.
    pub fn on_analysis_complete(
        &mut self,
        generation: u64,
        outcome: Result<Identification>,
    ) -> Vec<Effect> {
        self.in_flight = false;
        if self.closed {
            return vec![];
        }

        let mut effects = Vec::new();

        if generation == self.generation && !self.found {
            let buffer_size = self.buffer.len();
            let event = match outcome {
                Ok(Identification::InsufficientAudio) => ServerEvent::no_match(
                    "not enough audio to fingerprint yet, keep sending audio",
                    buffer_size,
                ),
                Ok(Identification::NoMatch) => {
                    ServerEvent::no_match("no match yet, keep sending audio", buffer_size)
                }
                Ok(Identification::Match(result)) => {
                    let confirmed = result.is_confirmed;
                    let event = ServerEvent::from_match(result);
                    if confirmed {
                        self.found = true;
                        self.rerun = false;
                        return vec![Effect::Emit(event), Effect::Close];
                    }
                    event
                }
                Err(err) => ServerEvent::error(format!("failed to analyze audio: {}", err)),
            };
            effects.push(Effect::Emit(event));
        }

        if self.rerun && !self.found {
            self.rerun = false;
            if !self.buffer.is_empty() {
                effects.extend(self.request_analysis());
            }
        }

        effects
    }

    /// Stop or disconnect: discard the buffer and any pending result.
    pub fn close(&mut self) {
        self.closed = true;
        self.rerun = false;
        self.generation += 1;
        self.buffer = Vec::new();
    }

    fn request_analysis(&mut self) -> Vec<Effect> {
        if self.in_flight {
            self.rerun = true;
            return vec![];
        }

        self.in_flight = true;
        vec![
            Effect::Emit(ServerEvent::status(format!(
                "analyzing {} bytes of audio",
                self.buffer.len()
            ))),
            Effect::Analyze(AnalysisJob {
                generation: self.generation,
                audio: self.buffer.clone(),
            }),
        ]
    }
}

impl Default for StreamingSession {
    fn default() -> Self {
        Self::new()
    }
}
