//! Error types shared across the gymcast crates.

use thiserror::Error;

/// Top-level error for the broadcasting core.
#[derive(Debug, Error)]
pub enum GymcastError {
    /// A channel identifier failed validation.
    #[error("invalid channel: {0}")]
    InvalidChannel(String),

    /// An activity kind string is not recognized.
    #[error("unknown activity kind: {0}")]
    UnknownActivityKind(String),

    /// An event could not be serialized for the wire.
    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, GymcastError>;

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn invalid_channel_display() {
        let err = GymcastError::InvalidChannel("channel id is empty".into());
        assert_eq!(err.to_string(), "invalid channel: channel id is empty");
    }

    #[test]
    fn unknown_kind_display() {
        let err = GymcastError::UnknownActivityKind("jump".into());
        assert_eq!(err.to_string(), "unknown activity kind: jump");
    }

    #[test]
    fn result_alias_propagates_with_question_mark() {
        fn channel_len(raw: &str) -> Result<usize> {
            Ok(crate::ChannelId::parse(raw)?.as_str().len())
        }
        assert_eq!(channel_len("gym-1").unwrap(), 5);
        assert_matches!(channel_len(" "), Err(GymcastError::InvalidChannel(_)));
    }

    #[test]
    fn serde_error_from_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad}").unwrap_err();
        let err: GymcastError = json_err.into();
        assert_matches!(err, GymcastError::Serialize(_));
    }
}
