//! GeneratedArtifact - 推論結果の画像と保存先キー

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const PNG_CONTENT_TYPE: &str = "image/png";

/// Storage key `{conversation_id}/{YYYY-MM-DD}/{HHMMSS}.png`.
///
/// Deterministic for a given conversation and completion time. Two completions
/// in the same second for the same conversation collide and the later write
/// wins.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactKey(String);

impl ArtifactKey {
    pub fn derive(conversation_id: &str, completed_at: NaiveDateTime) -> Self {
        Self(format!(
            "{conversation_id}/{}/{}.png",
            completed_at.format("%Y-%m-%d"),
            completed_at.format("%H%M%S"),
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Raw image bytes plus where they go.
///
/// The same buffer is handed to the store and to the notification upload.
#[derive(Debug, Clone)]
pub struct GeneratedArtifact {
    pub bytes: Vec<u8>,
    pub key: ArtifactKey,
    /// Name shown on the chat attachment, e.g. `2024-05-01T14:30:22.png`.
    pub filename: String,
    pub content_type: &'static str,
}

impl GeneratedArtifact {
    pub fn png(bytes: Vec<u8>, conversation_id: &str, completed_at: NaiveDateTime) -> Self {
        Self {
            bytes,
            key: ArtifactKey::derive(conversation_id, completed_at),
            filename: format!("{}.png", completed_at.format("%Y-%m-%dT%H:%M:%S")),
            content_type: PNG_CONTENT_TYPE,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn key_has_day_directory_and_second_filename() {
        let key = ArtifactKey::derive("C1", at(14, 30, 22));
        assert_eq!(key.as_str(), "C1/2024-05-01/143022.png");
    }

    #[test]
    fn key_pads_single_digits() {
        let key = ArtifactKey::derive("C1", at(4, 3, 2));
        assert_eq!(key.as_str(), "C1/2024-05-01/040302.png");
    }

    #[test]
    fn same_second_collides() {
        assert_eq!(
            ArtifactKey::derive("C1", at(14, 30, 22)),
            ArtifactKey::derive("C1", at(14, 30, 22))
        );
    }

    #[test]
    fn png_artifact_carries_filename_and_type() {
        let a = GeneratedArtifact::png(vec![1, 2, 3], "C1", at(14, 30, 22));
        assert_eq!(a.filename, "2024-05-01T14:30:22.png");
        assert_eq!(a.content_type, "image/png");
        assert_eq!(a.len(), 3);
    }
}
