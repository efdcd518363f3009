use serde::Deserialize;
use tracing::debug;

pub const TOPIC_CASSETTE: &str = "cassette";
pub const TOPIC_LOADING_STATUS: &str = "loading-status";

/// Notification shown as a cassette tape.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CassetteMessage {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct LoadingStatus {
    text: String,
}

/// A validated inbound data-channel message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataMessage {
    Cassette(CassetteMessage),
    LoadingStatus(String),
}

/// Decode a data-channel payload for `topic`.
///
/// Unknown topics and malformed payloads yield `None`; nothing is surfaced
/// to the user.
pub fn decode(topic: &str, payload: &[u8]) -> Option<DataMessage> {
    match topic {
        TOPIC_CASSETTE => match serde_json::from_slice::<CassetteMessage>(payload) {
            Ok(msg) => Some(DataMessage::Cassette(msg)),
            Err(e) => {
                debug!(topic, error = %e, "dropping malformed data message");
                None
            }
        },
        TOPIC_LOADING_STATUS => match serde_json::from_slice::<LoadingStatus>(payload) {
            Ok(status) => Some(DataMessage::LoadingStatus(status.text)),
            Err(e) => {
                debug!(topic, error = %e, "dropping malformed data message");
                None
            }
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_cassette() {
        let msg = decode("cassette", br#"{"title":"Groceries","content":"eggs, milk"}"#);
        assert_eq!(
            msg,
            Some(DataMessage::Cassette(CassetteMessage {
                title: "Groceries".into(),
                content: "eggs, milk".into(),
            }))
        );
    }

    #[test]
    fn rejects_wrong_field_types() {
        assert_eq!(decode("cassette", br#"{"title":123,"content":"x"}"#), None);
        assert_eq!(decode("cassette", br#"{"title":"x"}"#), None);
        assert_eq!(decode("cassette", br#"["title","content"]"#), None);
        assert_eq!(decode("cassette", b"not json"), None);
    }

    #[test]
    fn decodes_loading_status() {
        assert_eq!(
            decode("loading-status", br#"{"text":"Searching the web"}"#),
            Some(DataMessage::LoadingStatus("Searching the web".into()))
        );
        assert_eq!(decode("loading-status", br#"{"text":null}"#), None);
    }

    #[test]
    fn ignores_unknown_topics() {
        assert_eq!(decode("lk.chat", br#"{"title":"a","content":"b"}"#), None);
    }
}
