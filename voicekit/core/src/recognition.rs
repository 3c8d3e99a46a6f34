//! Speech Recognition Session
//!
//! JSON protocol spoken over one duplex channel per recognition session.
//! The socket itself belongs to the host; the core only sees a
//! [`DuplexChannel`] carrying text frames.
//!
//! # Protocol
//!
//! ```text
//! client                                 server
//!   connect {token, language, codec, sampleRate} ─▶
//!   audio_begin                                  ─▶
//!   (audio travels out of band)
//!                                               ◀─ partial {text}
//!   audio_end                                    ─▶
//!                                               ◀─ final {text, historyId?}
//! ```
//!
//! The server may answer `error {code, message}` or `closed` at any time.
//!
//! # States
//!
//! `Idle → Connected → Streaming → Finished`, or `Failed` from any active
//! state. Each call checks the state first and refuses with
//! [`RecognitionError::InvalidState`] when out of order.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors raised by a recognition session
#[derive(Debug, Error)]
pub enum RecognitionError {
    /// Call made in the wrong state
    #[error("Invalid recognition state: expected {expected}, was {actual}")]
    InvalidState {
        /// States the call accepts
        expected: &'static str,
        /// Current state
        actual: SessionState,
    },

    /// The channel refused a frame
    #[error("Failed to send frame: {0}")]
    SendFailed(String),

    /// The channel closed before the final transcription
    #[error("Recognition channel closed")]
    Closed,

    /// A server frame could not be understood
    #[error("Malformed server frame: {0}")]
    Protocol(#[from] serde_json::Error),

    /// The server reported a failure
    #[error("Recognition failed ({code}): {message}")]
    Server {
        /// Server error code
        code: String,
        /// Human-readable message
        message: String,
    },
}

/// Text frame transport for one session
#[async_trait]
pub trait DuplexChannel: Send {
    /// Send one frame
    async fn send(&mut self, frame: String) -> Result<(), RecognitionError>;

    /// Next frame, or `None` once the peer is gone
    async fn receive(&mut self) -> Option<String>;
}

/// Audio encoding announced at connect time
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    /// 16-bit little-endian PCM
    #[default]
    Pcm,
    /// Opus frames
    Opus,
}

/// Parameters of the `connect` frame
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecognitionOptions {
    /// BCP-47 language tag
    pub language: String,
    /// Audio encoding
    pub codec: AudioCodec,
    /// Samples per second
    pub sample_rate: u32,
}

impl Default for RecognitionOptions {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            codec: AudioCodec::Pcm,
            sample_rate: 16_000,
        }
    }
}

/// Frames sent by the client
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Open the session
    Connect {
        /// Access token
        token: String,
        /// BCP-47 language tag
        language: String,
        /// Audio encoding
        codec: AudioCodec,
        /// Samples per second
        #[serde(rename = "sampleRate")]
        sample_rate: u32,
    },
    /// Audio starts
    AudioBegin,
    /// Audio is complete
    AudioEnd,
}

/// Frames sent by the server
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Intermediate hypothesis
    Partial {
        /// Text so far
        text: String,
    },
    /// Final transcription
    Final {
        /// Recognized text
        text: String,
        /// History identifier of the resulting exchange
        #[serde(rename = "historyId", default)]
        history_id: Option<String>,
    },
    /// Failure
    Error {
        /// Server error code
        code: String,
        /// Human-readable message
        message: String,
    },
    /// Server ended the session
    Closed,
}

/// What the session surfaced
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TranscriptionEvent {
    /// Intermediate hypothesis
    Partial(String),
    /// Final transcription
    Final {
        /// Recognized text
        text: String,
        /// History identifier, when the server already stored the exchange
        history_id: Option<String>,
    },
}

impl TranscriptionEvent {
    /// Recognized text
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Partial(text) | Self::Final { text, .. } => text,
        }
    }

    /// Whether this ends the session
    #[must_use]
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Final { .. })
    }
}

/// Session lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Not connected yet
    Idle,
    /// `connect` sent
    Connected,
    /// Audio is flowing or the final answer is pending
    Streaming,
    /// Final transcription received
    Finished,
    /// Error, or closed before the final transcription
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connected => "connected",
            Self::Streaming => "streaming",
            Self::Finished => "finished",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One speech-to-text session over a [`DuplexChannel`]
pub struct RecognitionSession<C> {
    channel: C,
    state: SessionState,
    audio_ended: bool,
}

impl<C: DuplexChannel> RecognitionSession<C> {
    /// Wrap a channel; nothing is sent yet
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            state: SessionState::Idle,
            audio_ended: false,
        }
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    fn require_state(
        &self,
        expected: &'static str,
        accepted: &[SessionState],
    ) -> Result<(), RecognitionError> {
        if accepted.contains(&self.state) {
            Ok(())
        } else {
            Err(RecognitionError::InvalidState {
                expected,
                actual: self.state,
            })
        }
    }

    async fn send_frame(&mut self, frame: &ClientFrame) -> Result<(), RecognitionError> {
        let text = serde_json::to_string(frame)?;
        if let Err(err) = self.channel.send(text).await {
            self.state = SessionState::Failed;
            return Err(err);
        }
        Ok(())
    }

    /// Send `connect`
    ///
    /// # Errors
    ///
    /// Fails outside `Idle` or when the channel refuses the frame.
    pub async fn connect(
        &mut self,
        token: &str,
        options: &RecognitionOptions,
    ) -> Result<(), RecognitionError> {
        self.require_state("idle", &[SessionState::Idle])?;
        self.send_frame(&ClientFrame::Connect {
            token: token.to_string(),
            language: options.language.clone(),
            codec: options.codec,
            sample_rate: options.sample_rate,
        })
        .await?;
        self.state = SessionState::Connected;
        tracing::debug!(language = %options.language, "Recognition session connected");
        Ok(())
    }

    /// Send `audio_begin`
    ///
    /// # Errors
    ///
    /// Fails outside `Connected` or when the channel refuses the frame.
    pub async fn begin_audio(&mut self) -> Result<(), RecognitionError> {
        self.require_state("connected", &[SessionState::Connected])?;
        self.send_frame(&ClientFrame::AudioBegin).await?;
        self.state = SessionState::Streaming;
        Ok(())
    }

    /// Send `audio_end`
    ///
    /// # Errors
    ///
    /// Fails outside `Streaming`, after a previous `audio_end`, or when
    /// the channel refuses the frame.
    pub async fn end_audio(&mut self) -> Result<(), RecognitionError> {
        self.require_state("streaming", &[SessionState::Streaming])?;
        if self.audio_ended {
            return Err(RecognitionError::InvalidState {
                expected: "streaming before audio_end",
                actual: self.state,
            });
        }
        self.send_frame(&ClientFrame::AudioEnd).await?;
        self.audio_ended = true;
        Ok(())
    }

    /// Wait for the next transcription event
    ///
    /// # Errors
    ///
    /// Fails outside `Connected`/`Streaming`, on a server error, on a
    /// malformed frame, or when the channel closes first. All of these
    /// leave the session `Failed`.
    pub async fn next_event(&mut self) -> Result<TranscriptionEvent, RecognitionError> {
        self.require_state(
            "connected or streaming",
            &[SessionState::Connected, SessionState::Streaming],
        )?;

        let Some(raw) = self.channel.receive().await else {
            self.state = SessionState::Failed;
            return Err(RecognitionError::Closed);
        };
        let frame: ServerFrame = match serde_json::from_str(&raw) {
            Ok(frame) => frame,
            Err(err) => {
                self.state = SessionState::Failed;
                tracing::warn!(error = %err, "Malformed recognition frame");
                return Err(err.into());
            }
        };

        match frame {
            ServerFrame::Partial { text } => {
                tracing::trace!(chars = text.len(), "Partial transcription");
                Ok(TranscriptionEvent::Partial(text))
            }
            ServerFrame::Final { text, history_id } => {
                self.state = SessionState::Finished;
                tracing::debug!(chars = text.len(), "Final transcription");
                Ok(TranscriptionEvent::Final { text, history_id })
            }
            ServerFrame::Error { code, message } => {
                self.state = SessionState::Failed;
                tracing::warn!(code = %code, "Recognition error from server");
                Err(RecognitionError::Server { code, message })
            }
            ServerFrame::Closed => {
                self.state = SessionState::Failed;
                Err(RecognitionError::Closed)
            }
        }
    }

    /// Drain events until the final transcription, handing each to
    /// `on_event` (partials included)
    ///
    /// # Errors
    ///
    /// Same as [`Self::next_event`].
    pub async fn receive<F>(
        &mut self,
        mut on_event: F,
    ) -> Result<TranscriptionEvent, RecognitionError>
    where
        F: FnMut(&TranscriptionEvent),
    {
        loop {
            let event = self.next_event().await?;
            on_event(&event);
            if event.is_final() {
                return Ok(event);
            }
        }
    }

    /// Give the channel back
    pub fn into_channel(self) -> C {
        self.channel
    }
}

/// In-memory [`DuplexChannel`] over tokio channels
///
/// Each end of a pair sends to the other. Tests script the server side
/// with it; hosts can pump a real socket into one end.
pub struct ChannelPair {
    tx: mpsc::Sender<String>,
    rx: mpsc::Receiver<String>,
}

impl ChannelPair {
    /// Two connected ends
    #[must_use]
    pub fn new_pair(capacity: usize) -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::channel(capacity.max(1));
        let (b_tx, b_rx) = mpsc::channel(capacity.max(1));
        (Self { tx: a_tx, rx: b_rx }, Self { tx: b_tx, rx: a_rx })
    }
}

#[async_trait]
impl DuplexChannel for ChannelPair {
    async fn send(&mut self, frame: String) -> Result<(), RecognitionError> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| RecognitionError::SendFailed("Channel closed".to_string()))
    }

    async fn receive(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn server_says(server: &mut ChannelPair, frame: ServerFrame) {
        server
            .send(serde_json::to_string(&frame).unwrap())
            .await
            .unwrap();
    }

    #[test]
    fn test_client_frames_wire_format() {
        let connect = ClientFrame::Connect {
            token: "t".into(),
            language: "fr-FR".into(),
            codec: AudioCodec::Opus,
            sample_rate: 16_000,
        };
        let json: serde_json::Value = serde_json::to_value(&connect).unwrap();
        assert_eq!(json["type"], "connect");
        assert_eq!(json["sampleRate"], 16_000);
        assert_eq!(json["codec"], "opus");

        let begin = serde_json::to_string(&ClientFrame::AudioBegin).unwrap();
        assert_eq!(begin, r#"{"type":"audio_begin"}"#);
    }

    #[test]
    fn test_server_final_frame_parses_history_id() {
        let frame: ServerFrame =
            serde_json::from_str(r#"{"type":"final","text":"hello","historyId":"h1"}"#).unwrap();
        assert_eq!(
            frame,
            ServerFrame::Final {
                text: "hello".into(),
                history_id: Some("h1".into())
            }
        );
    }

    #[tokio::test]
    async fn test_full_session() {
        let (client, mut server) = ChannelPair::new_pair(8);
        let mut session = RecognitionSession::new(client);

        session
            .connect("token", &RecognitionOptions::default())
            .await
            .unwrap();
        session.begin_audio().await.unwrap();
        assert_eq!(session.state(), SessionState::Streaming);

        server_says(&mut server, ServerFrame::Partial { text: "hel".into() }).await;
        session.end_audio().await.unwrap();
        server_says(
            &mut server,
            ServerFrame::Final {
                text: "hello".into(),
                history_id: None,
            },
        )
        .await;

        let mut partials = Vec::new();
        let event = session
            .receive(|event| {
                if !event.is_final() {
                    partials.push(event.text().to_string());
                }
            })
            .await
            .unwrap();
        assert_eq!(event.text(), "hello");
        assert_eq!(partials, vec!["hel".to_string()]);
        assert_eq!(session.state(), SessionState::Finished);

        let sent: Vec<String> = std::iter::from_fn(|| server.rx.try_recv().ok()).collect();
        assert_eq!(sent.len(), 3);
        assert!(sent[0].contains("\"connect\""));
        assert!(sent[2].contains("audio_end"));
    }

    #[tokio::test]
    async fn test_out_of_order_calls_are_refused() {
        let (client, _server) = ChannelPair::new_pair(8);
        let mut session = RecognitionSession::new(client);

        assert!(matches!(
            session.begin_audio().await,
            Err(RecognitionError::InvalidState {
                actual: SessionState::Idle,
                ..
            })
        ));
        assert!(matches!(
            session.next_event().await,
            Err(RecognitionError::InvalidState { .. })
        ));

        session
            .connect("token", &RecognitionOptions::default())
            .await
            .unwrap();
        assert!(matches!(
            session.connect("token", &RecognitionOptions::default()).await,
            Err(RecognitionError::InvalidState { .. })
        ));
        assert!(matches!(
            session.end_audio().await,
            Err(RecognitionError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_server_error_fails_session() {
        let (client, mut server) = ChannelPair::new_pair(8);
        let mut session = RecognitionSession::new(client);
        session
            .connect("token", &RecognitionOptions::default())
            .await
            .unwrap();

        server_says(
            &mut server,
            ServerFrame::Error {
                code: "asr.timeout".into(),
                message: "no speech".into(),
            },
        )
        .await;

        assert!(matches!(
            session.next_event().await,
            Err(RecognitionError::Server { code, .. }) if code == "asr.timeout"
        ));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_closed_channel_fails_session() {
        let (client, server) = ChannelPair::new_pair(8);
        let mut session = RecognitionSession::new(client);
        session
            .connect("token", &RecognitionOptions::default())
            .await
            .unwrap();
        drop(server);

        assert!(matches!(
            session.next_event().await,
            Err(RecognitionError::Closed)
        ));
        assert_eq!(session.state(), SessionState::Failed);
    }
}
