//! Gesture Dispatch
//!
//! Maps what the user did to a bubble (tap, swipe, long press, menu pick)
//! onto a [`BubbleAction`] the controller performs. The mapping depends on
//! the bubble kind only; no state is touched here.

use serde::{Deserialize, Serialize};

use crate::bubble::{Bubble, BubbleContent, Origin, Vote};

/// Raw user interaction with a bubble
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gesture {
    /// Single tap
    Tap,
    /// Long press (opens the context menu)
    LongPress,
    /// Swipe to delete
    Swipe,
    /// Entry picked from the context menu
    Menu(BubbleAction),
}

/// Operation on one bubble
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BubbleAction {
    /// Send the request again
    Resend,
    /// Delete the exchange (locally and on the server)
    Delete,
    /// Vote on an answer
    Feedback(Vote),
    /// Speak the text aloud
    Enunciate,
    /// Open the share sheet
    Share,
    /// Copy to the clipboard
    Copy,
    /// Show debugging identifiers
    Inspect,
    /// Expand or collapse an error group
    ToggleGroup,
}

/// Context menu entries offered for `bubble`
#[must_use]
pub fn available_actions(bubble: &Bubble) -> Vec<BubbleAction> {
    use BubbleAction as Action;

    match (&bubble.content, bubble.origin) {
        (BubbleContent::ErrorGroup(_), _) => vec![Action::ToggleGroup, Action::Delete],
        (BubbleContent::WaitingIndicator, _) => Vec::new(),
        (BubbleContent::Text { .. }, Origin::User) => {
            let mut actions = vec![Action::Resend, Action::Copy, Action::Share, Action::Delete];
            if bubble.history_id.is_some() {
                actions.push(Action::Inspect);
            }
            actions
        }
        (BubbleContent::Text { .. } | BubbleContent::Card(_), Origin::Assistant) => {
            let mut actions = vec![Action::Enunciate, Action::Copy, Action::Share];
            if bubble.history_id.is_some() {
                actions.extend([
                    Action::Feedback(Vote::Positive),
                    Action::Feedback(Vote::Negative),
                    Action::Inspect,
                ]);
            }
            actions.push(Action::Delete);
            actions
        }
        (BubbleContent::ErrorText { .. }, _) => vec![Action::Copy, Action::Inspect, Action::Delete],
        (BubbleContent::Text { .. }, Origin::System) => vec![Action::Copy],
        _ => vec![Action::Delete],
    }
}

/// Action a gesture triggers directly on `bubble`
///
/// A long press never acts directly; the host shows
/// [`available_actions`] instead.
#[must_use]
pub fn resolve(gesture: Gesture, bubble: &Bubble) -> Option<BubbleAction> {
    match gesture {
        Gesture::Menu(action) => Some(action),
        Gesture::LongPress => None,
        Gesture::Swipe => (!bubble.is_waiting()).then_some(BubbleAction::Delete),
        Gesture::Tap => match (&bubble.content, bubble.origin) {
            (BubbleContent::ErrorGroup(_), _) => Some(BubbleAction::ToggleGroup),
            (BubbleContent::Text { .. }, Origin::User) if bubble.failed_exchange => {
                Some(BubbleAction::Resend)
            }
            (BubbleContent::Text { .. }, Origin::Assistant) => Some(BubbleAction::Enunciate),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_group::ErrorGroup;

    fn header() -> Bubble {
        Bubble::new(
            Origin::Assistant,
            BubbleContent::ErrorGroup(ErrorGroup::collapsed(vec![Bubble::error("E", "m")])),
        )
    }

    #[test]
    fn test_tap_rules() {
        assert_eq!(
            resolve(Gesture::Tap, &header()),
            Some(BubbleAction::ToggleGroup)
        );
        assert_eq!(
            resolve(Gesture::Tap, &Bubble::user_text("hi").failed()),
            Some(BubbleAction::Resend)
        );
        assert_eq!(resolve(Gesture::Tap, &Bubble::user_text("hi")), None);
        assert_eq!(
            resolve(Gesture::Tap, &Bubble::assistant_text("hello")),
            Some(BubbleAction::Enunciate)
        );
        assert_eq!(resolve(Gesture::Tap, &Bubble::error("E", "m")), None);
    }

    #[test]
    fn test_swipe_menu_and_long_press() {
        let bubble = Bubble::assistant_text("hello");
        assert_eq!(resolve(Gesture::Swipe, &bubble), Some(BubbleAction::Delete));
        assert_eq!(resolve(Gesture::Swipe, &Bubble::waiting()), None);
        assert_eq!(resolve(Gesture::LongPress, &bubble), None);
        assert_eq!(
            resolve(Gesture::Menu(BubbleAction::Share), &bubble),
            Some(BubbleAction::Share)
        );
    }

    #[test]
    fn test_feedback_needs_history_id() {
        let local = Bubble::assistant_text("hello");
        assert!(!available_actions(&local).contains(&BubbleAction::Feedback(Vote::Positive)));

        let persisted = Bubble::assistant_text("hello").with_history_id("h1");
        let actions = available_actions(&persisted);
        assert!(actions.contains(&BubbleAction::Feedback(Vote::Positive)));
        assert!(actions.contains(&BubbleAction::Inspect));
        assert_eq!(actions.last(), Some(&BubbleAction::Delete));
    }

    #[test]
    fn test_menu_entries_are_distinct() {
        let bubble = Bubble::assistant_text("hello").with_history_id("h1");
        let actions = available_actions(&bubble);
        let unique: std::collections::HashSet<BubbleAction> = actions.iter().copied().collect();
        assert_eq!(unique.len(), actions.len());
        assert!(unique.contains(&BubbleAction::Feedback(Vote::Negative)));
    }

    #[test]
    fn test_menus_by_kind() {
        assert_eq!(
            available_actions(&header()),
            vec![BubbleAction::ToggleGroup, BubbleAction::Delete]
        );
        assert!(available_actions(&Bubble::waiting()).is_empty());
        assert_eq!(
            available_actions(&Bubble::user_text("hi"))[0],
            BubbleAction::Resend
        );
    }
}
