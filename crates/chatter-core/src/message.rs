//! Chat line formats.
//!
//! Outbound messages carry the sender as a `[username] ` prefix inside the
//! body; inbound deliveries are rendered with the channel as prefix.

use bytes::Bytes;

/// Build the body published for `text` sent by `username`.
#[must_use]
pub fn outbound_body(username: &str, text: &str) -> Bytes {
    Bytes::from(format!("[{username}] {text}"))
}

/// Render an inbound delivery for the output sink.
#[must_use]
pub fn render_inbound(channel: &str, body: &str) -> String {
    format!("[{channel}] {body}")
}

/// Decode a delivered body as UTF-8, replacing invalid sequences.
#[must_use]
pub fn decode_body(body: &[u8]) -> String {
    String::from_utf8_lossy(body).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_body() {
        assert_eq!(&outbound_body("A", "hi")[..], b"[A] hi");
        assert_eq!(&outbound_body("Anonymous", "")[..], b"[Anonymous] ");
    }

    #[test]
    fn test_render_inbound() {
        assert_eq!(render_inbound("general", "[A] hi"), "[general] [A] hi");
    }

    #[test]
    fn test_decode_body_is_lossy() {
        assert_eq!(decode_body(b"[A] hi"), "[A] hi");
        assert_eq!(decode_body(&[b'o', b'k', 0xff]), "ok\u{fffd}");
    }
}
