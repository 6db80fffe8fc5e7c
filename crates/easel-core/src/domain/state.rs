//! State - delivery attempt の状態機械
//!
//! ```text
//! Received → Parsing → Generating → Storing → Notifying → Done*
//! (any non-terminal) → Compensating → Failed{Input,Generation,Storage,Notification}*
//! ```

use serde::{Deserialize, Serialize};

/// Per-attempt state. Terminal states end with `Done` or `Failed*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptState {
    Received,
    Parsing,
    Generating,
    Storing,
    Notifying,
    Compensating,
    Done,
    FailedInput,
    FailedGeneration,
    FailedStorage,
    FailedNotification,
}

impl AttemptState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Done
                | Self::FailedInput
                | Self::FailedGeneration
                | Self::FailedStorage
                | Self::FailedNotification
        )
    }

    pub fn is_failure(self) -> bool {
        self.is_terminal() && self != Self::Done
    }

    /// Is `next` a legal successor of `self`?
    pub fn can_transition_to(self, next: AttemptState) -> bool {
        use AttemptState::*;
        match (self, next) {
            (Received, Parsing)
            | (Parsing, Generating)
            | (Generating, Storing)
            | (Storing, Notifying)
            | (Notifying, Done) => true,
            // 失敗は必ず Compensating を経由する
            (from, Compensating) => !from.is_terminal() && from != Compensating,
            (Compensating, to) => to.is_failure(),
            _ => false,
        }
    }
}

impl std::fmt::Display for AttemptState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Received => "RECEIVED",
            Self::Parsing => "PARSING",
            Self::Generating => "GENERATING",
            Self::Storing => "STORING",
            Self::Notifying => "NOTIFYING",
            Self::Compensating => "COMPENSATING",
            Self::Done => "DONE",
            Self::FailedInput => "FAILED_INPUT",
            Self::FailedGeneration => "FAILED_GENERATION",
            Self::FailedStorage => "FAILED_STORAGE",
            Self::FailedNotification => "FAILED_NOTIFICATION",
        };
        f.write_str(s)
    }
}
