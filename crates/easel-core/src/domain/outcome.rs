//! AttemptReport - delivery attempt の結果記録
//!
//! worker が 1 回の attempt で辿った状態と、補償処理で何をしたかを残します。
//! ログ出力とテストの観測点を兼ねます。

use serde::{Deserialize, Serialize};

use super::artifact::ArtifactKey;
use super::state::AttemptState;

/// What happened to the best-effort failure notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum FailureNotice {
    /// No conversation id was known, or the attempt succeeded.
    NotAttempted,
    Delivered,
    /// The post itself failed; logged only.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptReport {
    pub message_id: String,
    pub receive_count: u32,

    /// Current (and after processing, final) state.
    pub state: AttemptState,

    /// Every state visited, in order, starting with `Received`.
    pub trail: Vec<AttemptState>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<ArtifactKey>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub failure_notice: FailureNotice,

    /// Whether the finalize call returned Ok.
    pub finalized: bool,
}

impl AttemptReport {
    pub fn received(message_id: impl Into<String>, receive_count: u32) -> Self {
        Self {
            message_id: message_id.into(),
            receive_count,
            state: AttemptState::Received,
            trail: vec![AttemptState::Received],
            conversation_id: None,
            key: None,
            error: None,
            failure_notice: FailureNotice::NotAttempted,
            finalized: false,
        }
    }

    /// Move to `next`. Illegal transitions are a programming error.
    pub fn advance(&mut self, next: AttemptState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        self.state = next;
        self.trail.push(next);
    }

    pub fn is_done(&self) -> bool {
        self.state == AttemptState::Done
    }

    pub fn visited(&self, state: AttemptState) -> bool {
        self.trail.contains(&state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_records_trail() {
        let mut r = AttemptReport::received("m-1", 1);
        r.advance(AttemptState::Parsing);
        r.advance(AttemptState::Compensating);
        r.advance(AttemptState::FailedInput);
        assert_eq!(r.state, AttemptState::FailedInput);
        assert_eq!(r.trail.len(), 4);
        assert!(r.visited(AttemptState::Compensating));
        assert!(!r.is_done());
    }

    #[test]
    fn failure_notice_is_tagged() {
        let v = serde_json::to_value(FailureNotice::Failed("boom".into())).unwrap();
        assert_eq!(v["status"], "failed");
        assert_eq!(v["detail"], "boom");
    }
}
