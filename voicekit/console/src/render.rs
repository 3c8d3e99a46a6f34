//! Plain-text rendering of bubbles and surface updates

use std::fmt::Write as _;

use voicekit_core::api::Agreement;
use voicekit_core::bubble::AudioState;
use voicekit_core::{Bubble, BubbleContent, Conversation, NotifyLevel, Origin, SurfaceUpdate, Vote};

/// One line for a bubble
pub fn bubble_line(bubble: &Bubble) -> String {
    let time = bubble.timestamp.format("%H:%M");
    let who = match bubble.origin {
        Origin::User => "you",
        Origin::Assistant => "assistant",
        Origin::System => "voicekit",
    };

    let body = match &bubble.content {
        BubbleContent::Text { text } => text.clone(),
        BubbleContent::Image { url } => format!("[image] {url}"),
        BubbleContent::Card(card) => match &card.subtitle {
            Some(subtitle) => format!("[{:?}] {} - {subtitle}", card.kind, card.title),
            None => format!("[{:?}] {}", card.kind, card.title),
        },
        BubbleContent::AudioController { url, state } => match state {
            AudioState::Idle => format!("[audio] {url}"),
            _ => format!("[audio {}s] {url}", state.position_ms() / 1000),
        },
        BubbleContent::ErrorText { code, message } => format!("! {message} ({code})"),
        BubbleContent::WaitingIndicator => "...".to_string(),
        BubbleContent::Recommendation { items } => format!("try: {}", items.join(" | ")),
        BubbleContent::ErrorGroup(group) => {
            let marker = if group.expanded { "v" } else { ">" };
            format!("{marker} {} failed entries", group.len())
        }
    };

    let mut line = format!("[{time}] {who}: {body}");
    match bubble.vote {
        Vote::Positive => line.push_str(" (+1)"),
        Vote::Negative => line.push_str(" (-1)"),
        Vote::None => {}
    }
    if let Some(ref id) = bubble.history_id {
        let _ = write!(line, "  #{id}");
    }
    line
}

/// One line for a user agreement, checked when accepted
pub fn agreement_line(agreement: &Agreement) -> String {
    let mark = if agreement.accepted { "x" } else { " " };
    match agreement.url {
        Some(ref url) => format!("[{mark}] {}  {url}", agreement.title),
        None => format!("[{mark}] {}", agreement.title),
    }
}

/// Whole conversation, one heading per day
pub fn conversation_text(conversation: &Conversation) -> String {
    let mut out = String::new();
    for section in conversation.sections() {
        let _ = writeln!(out, "== {} ==", section.day().format("%a %d %b %Y"));
        for bubble in &section.bubbles {
            let _ = writeln!(out, "  {}", bubble_line(bubble));
        }
    }
    out
}

/// Text for updates a terminal can act on; row changes are shown by
/// reprinting bubbles instead
pub fn describe(update: &SurfaceUpdate) -> Option<String> {
    match update {
        SurfaceUpdate::Toast { level, message } => {
            let tag = match level {
                NotifyLevel::Info => "info",
                NotifyLevel::Warning => "warning",
                NotifyLevel::Error => "error",
                NotifyLevel::Success => "ok",
            };
            Some(format!("[{tag}] {message}"))
        }
        SurfaceUpdate::Share(text) => Some(format!("share: {text}")),
        SurfaceUpdate::Copy(text) => Some(format!("copied: {text}")),
        SurfaceUpdate::Inspect {
            history_id,
            trace_id,
        } => Some(format!(
            "history id: {}, trace id: {}",
            history_id.as_deref().unwrap_or("-"),
            trace_id.as_deref().unwrap_or("-")
        )),
        SurfaceUpdate::Transcription { text, is_final } => {
            Some(if *is_final { format!("heard: {text}") } else { format!("hearing: {text}") })
        }
        SurfaceUpdate::HistoryState {
            refreshing: false,
            reached_oldest: true,
        } => Some("(start of history)".to_string()),
        _ => None,
    }
}
