//! Surface Updates
//!
//! Messages sent from the conversation controller to the host view layer.
//!
//! # Design Philosophy
//!
//! The controller owns every piece of conversation state. The host surface
//! (a table view, a terminal, a test harness) is a pure renderer: it
//! applies row and section changes exactly as described and performs the
//! platform requests (share sheet, clipboard, inspector) it is asked to.
//! Updates are emitted only after the mutation they describe, so applying
//! them in order keeps the view in lockstep with the model.

use serde::{Deserialize, Serialize};

use crate::index_path::IndexPath;

/// Messages from the controller to the host surface
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SurfaceUpdate {
    // ============================================
    // Row / Section Changes
    // ============================================
    /// Rows were inserted at these (post-insertion) coordinates
    RowsInserted(Vec<IndexPath>),

    /// Rows were deleted at these (pre-deletion) coordinates
    RowsDeleted(Vec<IndexPath>),

    /// Rows changed in place
    RowsReloaded(Vec<IndexPath>),

    /// Sections were created at these indexes
    SectionsInserted(Vec<usize>),

    /// Sections were dropped at these (pre-deletion) indexes
    SectionsDeleted(Vec<usize>),

    /// Too much changed; redraw everything
    Reloaded,

    // ============================================
    // Notifications
    // ============================================
    /// Transient notice
    Toast {
        /// Severity
        level: NotifyLevel,
        /// Text to show
        message: String,
    },

    // ============================================
    // Platform Requests
    // ============================================
    /// Open the share sheet with this text
    Share(String),

    /// Put this text on the clipboard
    Copy(String),

    /// Show the debugging identifiers of an entry
    Inspect {
        /// Server history identifier
        history_id: Option<String>,
        /// Server trace identifier
        trace_id: Option<String>,
    },

    // ============================================
    // Status
    // ============================================
    /// History pagination state changed
    HistoryState {
        /// A page load is in flight
        refreshing: bool,
        /// Nothing older remains
        reached_oldest: bool,
    },

    /// Speech recognition progress
    Transcription {
        /// Recognized text so far
        text: String,
        /// Whether this is the final transcription
        is_final: bool,
    },
}

/// Notification levels
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotifyLevel {
    /// Informational
    Info,
    /// Warning
    Warning,
    /// Error
    Error,
    /// Success
    Success,
}

impl SurfaceUpdate {
    /// Error toast
    pub fn error(message: impl Into<String>) -> Self {
        Self::Toast {
            level: NotifyLevel::Error,
            message: message.into(),
        }
    }

    /// Informational toast
    pub fn info(message: impl Into<String>) -> Self {
        Self::Toast {
            level: NotifyLevel::Info,
            message: message.into(),
        }
    }

    /// Whether this update changes rows or sections
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::RowsInserted(_)
                | Self::RowsDeleted(_)
                | Self::RowsReloaded(_)
                | Self::SectionsInserted(_)
                | Self::SectionsDeleted(_)
                | Self::Reloaded
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toast_helpers() {
        assert_eq!(
            SurfaceUpdate::error("boom"),
            SurfaceUpdate::Toast {
                level: NotifyLevel::Error,
                message: "boom".into()
            }
        );
        assert!(!SurfaceUpdate::info("hi").is_structural());
        assert!(SurfaceUpdate::Reloaded.is_structural());
    }

    #[test]
    fn test_serializes_with_variant_name() {
        let json = serde_json::to_string(&SurfaceUpdate::RowsDeleted(vec![IndexPath::new(0, 1)]))
            .unwrap();
        assert!(json.contains("RowsDeleted"));
    }
}
