//! Mention event - chat platform から届く app_mention の表現

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Leading bot-mention markup: `<@U123>` or `<@U123|name>`.
static LEADING_MENTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*<@[A-Za-z0-9_]+(?:\|[^>]*)?>").expect("mention pattern must compile")
});

/// An inbound mention of the bot.
///
/// Only `channel` and `text` are used for dispatch; the rest is carried for
/// logging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MentionEvent {
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
}

impl MentionEvent {
    pub fn new(channel: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            text: text.into(),
            ..Self::default()
        }
    }

    /// Prompt text with the mention token removed.
    pub fn prompt(&self) -> &str {
        strip_mention(&self.text)
    }
}

/// Remove the leading mention token and trim surrounding whitespace.
pub fn strip_mention(text: &str) -> &str {
    match LEADING_MENTION.find(text) {
        Some(m) => text[m.end()..].trim(),
        None => text.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::plain("<@BOT123> a red bicycle", "a red bicycle")]
    #[case::labelled("<@BOT123|easel> a red bicycle", "a red bicycle")]
    #[case::padded("   <@BOT123>    a red bicycle  ", "a red bicycle")]
    #[case::no_space("<@BOT123>cat", "cat")]
    #[case::no_mention("  just text ", "just text")]
    #[case::only_mention("<@BOT123>", "")]
    #[case::only_mention_and_space("<@BOT123>   \n", "")]
    #[case::inner_mention_kept("draw <@U999> as a knight", "draw <@U999> as a knight")]
    fn strips_leading_mention(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(strip_mention(input), expected);
    }

    #[test]
    fn deserializes_slack_event_shape() {
        let ev: MentionEvent = serde_json::from_value(serde_json::json!({
            "type": "app_mention",
            "user": "U1",
            "text": "<@BOT123> a red bicycle",
            "ts": "1714573822.000100",
            "channel": "C1",
            "event_ts": "1714573822.000100"
        }))
        .unwrap();
        assert_eq!(ev.channel, "C1");
        assert_eq!(ev.prompt(), "a red bicycle");
        assert_eq!(ev.user.as_deref(), Some("U1"));
    }

    #[test]
    fn missing_fields_default_to_empty() {
        let ev: MentionEvent = serde_json::from_str("{}").unwrap();
        assert!(ev.channel.is_empty());
        assert!(ev.text.is_empty());
    }
}
