//! Message Entries
//!
//! A [`Bubble`] is one displayed conversation turn: the user's request,
//! the assistant's answer, a card, an audio player, an error, or the
//! header of a collapsed group of errors.
//!
//! Content kinds are a closed sum type ([`BubbleContent`]); code that
//! needs to special-case a kind matches on it instead of probing types.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error_group::ErrorGroup;

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

/// Process-unique, monotonically increasing bubble key
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BubbleKey(pub u64);

impl BubbleKey {
    /// Allocate the next key
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_KEY.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for BubbleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Who produced the entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Typed or spoken by the user
    User,
    /// Produced by the assistant
    Assistant,
    /// Local notices (welcome message, date hints)
    System,
}

/// Feedback state of an assistant answer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    /// No feedback given
    #[default]
    None,
    /// Thumbs up
    Positive,
    /// Thumbs down
    Negative,
}

/// Playback state of an audio controller bubble
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum AudioState {
    /// Not started
    #[default]
    Idle,
    /// Playing from the given position
    Playing {
        /// Playback position in milliseconds
        position_ms: u64,
    },
    /// Paused at the given position
    Paused {
        /// Playback position in milliseconds
        position_ms: u64,
    },
}

impl AudioState {
    /// Current playback position
    #[must_use]
    pub fn position_ms(&self) -> u64 {
        match self {
            Self::Idle => 0,
            Self::Playing { position_ms } | Self::Paused { position_ms } => *position_ms,
        }
    }

    /// Move the position, keeping the play/pause state
    #[must_use]
    pub fn seek(self, position_ms: u64) -> Self {
        match self {
            Self::Idle | Self::Paused { .. } => Self::Paused { position_ms },
            Self::Playing { .. } => Self::Playing { position_ms },
        }
    }
}

/// Structured answer families rendered by dedicated bubbles
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardKind {
    /// Weather forecast
    Weather,
    /// Music / radio playback
    Music,
    /// Timer or alarm
    Timer,
    /// Anything else
    Generic,
}

/// A structured response payload
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Card {
    /// Card family
    pub kind: CardKind,
    /// Main title
    pub title: String,
    /// Secondary line
    #[serde(default)]
    pub subtitle: Option<String>,
    /// Raw payload for the renderer
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// What a bubble shows
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BubbleContent {
    /// Plain text
    Text {
        /// The text
        text: String,
    },
    /// Remote image
    Image {
        /// Image location
        url: String,
    },
    /// Structured card
    Card(Card),
    /// Audio player
    AudioController {
        /// Audio stream location
        url: String,
        /// Playback state
        state: AudioState,
    },
    /// An error answer
    ErrorText {
        /// Backend error code
        code: String,
        /// Human-readable message
        message: String,
    },
    /// "Assistant is thinking" placeholder
    WaitingIndicator,
    /// Suggested follow-up utterances
    Recommendation {
        /// The suggestions
        items: Vec<String>,
    },
    /// Header of a collapsible run of errors
    ErrorGroup(ErrorGroup),
}

/// One displayed conversation turn
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bubble {
    /// Process-unique key
    pub key: BubbleKey,
    /// Who produced it
    pub origin: Origin,
    /// What it shows
    pub content: BubbleContent,
    /// When it was produced (ISO-8601 on the wire)
    pub timestamp: DateTime<Utc>,
    /// Server history identifier, shared by a request and its response
    #[serde(default)]
    pub history_id: Option<String>,
    /// Server trace identifier
    #[serde(default)]
    pub trace_id: Option<String>,
    /// Part of a request/response pair whose answer was an error
    #[serde(default)]
    pub failed_exchange: bool,
    /// Selected for a batch operation
    #[serde(default)]
    pub is_selected: bool,
    /// Highlighted (search hit, just-resent)
    #[serde(default)]
    pub is_highlighted: bool,
    /// Feedback given on this answer
    #[serde(default)]
    pub vote: Vote,
}

impl Bubble {
    /// Create a bubble stamped now
    #[must_use]
    pub fn new(origin: Origin, content: BubbleContent) -> Self {
        Self {
            key: BubbleKey::next(),
            origin,
            content,
            timestamp: Utc::now(),
            history_id: None,
            trace_id: None,
            failed_exchange: false,
            is_selected: false,
            is_highlighted: false,
            vote: Vote::None,
        }
    }

    /// A user text turn
    #[must_use]
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::new(Origin::User, BubbleContent::Text { text: text.into() })
    }

    /// An assistant text turn
    #[must_use]
    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::new(Origin::Assistant, BubbleContent::Text { text: text.into() })
    }

    /// An assistant error turn
    #[must_use]
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            Origin::Assistant,
            BubbleContent::ErrorText {
                code: code.into(),
                message: message.into(),
            },
        )
    }

    /// Waiting indicator shown while an answer is pending
    #[must_use]
    pub fn waiting() -> Self {
        Self::new(Origin::Assistant, BubbleContent::WaitingIndicator)
    }

    /// Set the timestamp
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Set the history identifier
    #[must_use]
    pub fn with_history_id(mut self, id: impl Into<String>) -> Self {
        self.history_id = Some(id.into());
        self
    }

    /// Set the trace identifier
    #[must_use]
    pub fn with_trace_id(mut self, id: impl Into<String>) -> Self {
        self.trace_id = Some(id.into());
        self
    }

    /// Mark as part of a failed exchange
    #[must_use]
    pub fn failed(mut self) -> Self {
        self.failed_exchange = true;
        self
    }

    /// Whether grouping treats this entry as an error
    #[must_use]
    pub fn is_error(&self) -> bool {
        match self.content {
            BubbleContent::ErrorGroup(_) => false,
            BubbleContent::ErrorText { .. } => true,
            _ => self.failed_exchange,
        }
    }

    /// Error group header, if this is one
    #[must_use]
    pub fn as_error_group(&self) -> Option<&ErrorGroup> {
        match &self.content {
            BubbleContent::ErrorGroup(group) => Some(group),
            _ => None,
        }
    }

    /// Mutable error group header, if this is one
    pub fn as_error_group_mut(&mut self) -> Option<&mut ErrorGroup> {
        match &mut self.content {
            BubbleContent::ErrorGroup(group) => Some(group),
            _ => None,
        }
    }

    /// Whether this is the waiting placeholder
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        matches!(self.content, BubbleContent::WaitingIndicator)
    }

    /// Text that can be copied, shared or spoken
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            BubbleContent::Text { text } => Some(text),
            BubbleContent::ErrorText { message, .. } => Some(message),
            BubbleContent::Card(card) => Some(&card.title),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_monotonic() {
        let a = BubbleKey::next();
        let b = BubbleKey::next();
        assert!(b > a);

        let first = Bubble::user_text("a");
        let second = Bubble::user_text("b");
        assert!(second.key > first.key);
    }

    #[test]
    fn test_is_error() {
        assert!(Bubble::error("E01", "no skill").is_error());
        assert!(Bubble::user_text("play jazz").failed().is_error());
        assert!(!Bubble::user_text("play jazz").is_error());
        assert!(!Bubble::assistant_text("ok").is_error());

        let header = Bubble::new(
            Origin::Assistant,
            BubbleContent::ErrorGroup(ErrorGroup::default()),
        )
        .failed();
        assert!(!header.is_error());
    }

    #[test]
    fn test_audio_seek_keeps_play_state() {
        let playing = AudioState::Playing { position_ms: 10 };
        assert_eq!(playing.seek(500), AudioState::Playing { position_ms: 500 });
        assert_eq!(AudioState::Idle.seek(20), AudioState::Paused { position_ms: 20 });
        assert_eq!(AudioState::Paused { position_ms: 7 }.position_ms(), 7);
    }

    #[test]
    fn test_timestamp_serializes_as_iso8601() {
        let ts = DateTime::parse_from_rfc3339("2024-03-05T10:15:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let bubble = Bubble::assistant_text("hello").at(ts);
        let json = serde_json::to_value(&bubble).unwrap();
        assert_eq!(json["timestamp"], "2024-03-05T10:15:00Z");
        assert_eq!(json["content"]["type"], "text");
    }

    #[test]
    fn test_text_accessor() {
        assert_eq!(Bubble::user_text("hi").text(), Some("hi"));
        assert_eq!(Bubble::error("E", "sorry").text(), Some("sorry"));
        assert_eq!(Bubble::waiting().text(), None);
    }
}
