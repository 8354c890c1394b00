//! Logical chat channels.
//!
//! A channel is a user-facing room name. On the broker it is one fanout topic
//! shared by every session that joins it.

/// Maximum channel name length in bytes (AMQP short string limit).
pub const MAX_CHANNEL_NAME_LENGTH: usize = 255;

/// Prefix the broker reserves for its own exchanges.
const RESERVED_PREFIX: &str = "amq.";

/// A channel identifier.
pub type ChannelId = String;

/// Validate a channel name.
///
/// # Errors
///
/// Returns an error message if the channel name is invalid.
pub fn validate_channel_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Channel name cannot be empty");
    }
    if name.len() > MAX_CHANNEL_NAME_LENGTH {
        return Err("Channel name too long");
    }
    if name.starts_with(RESERVED_PREFIX) {
        return Err("Channel names starting with 'amq.' are reserved");
    }
    if name.chars().any(char::is_control) {
        return Err("Channel name contains invalid characters");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_name_validation() {
        assert!(validate_channel_name("general").is_ok());
        assert!(validate_channel_name("new-channel").is_ok());
        assert!(validate_channel_name("café").is_ok());
        assert!(validate_channel_name("").is_err());
        assert!(validate_channel_name("amq.direct").is_err());
        assert!(validate_channel_name("bad\nname").is_err());

        let long_name = "a".repeat(MAX_CHANNEL_NAME_LENGTH + 1);
        assert!(validate_channel_name(&long_name).is_err());
        let max_name = "a".repeat(MAX_CHANNEL_NAME_LENGTH);
        assert!(validate_channel_name(&max_name).is_ok());
    }
}
