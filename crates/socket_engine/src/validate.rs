//! Validation helpers shared by the codec and the assembler.

use crate::error::FrameError;

/// Returns true if `code` may appear in a close frame on the wire.
///
/// Allowed: 1000-1003, 1007-1013 and the private range 3000-4999.
/// 1004 is reserved, 1005 and 1006 are local-only sentinels.
pub fn is_valid_close_code(code: u16) -> bool {
    matches!(code, 1000..=1003 | 1007..=1013 | 3000..=4999)
}

/// Validates `bytes` as UTF-8, naming `context` in the error.
pub fn utf8<'a>(bytes: &'a [u8], context: &'static str) -> Result<&'a str, FrameError> {
    std::str::from_utf8(bytes).map_err(|_| FrameError::InvalidUtf8(context))
}

/// Longest prefix of `text` that fits in `max` bytes without splitting a
/// character.
pub fn truncate_utf8(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_code_ranges() {
        for code in [1000, 1001, 1002, 1003, 1007, 1008, 1009, 1010, 1011, 1012, 1013, 3000, 4000, 4999] {
            assert!(is_valid_close_code(code), "{code} should be valid");
        }
        for code in [0, 999, 1004, 1005, 1006, 1014, 1015, 2000, 2999, 5000, u16::MAX] {
            assert!(!is_valid_close_code(code), "{code} should be rejected");
        }
    }

    #[test]
    fn test_utf8_validation() {
        assert_eq!(utf8(b"island", "text message"), Ok("island"));
        assert_eq!(
            utf8(&[0xFF, 0xFE], "text message"),
            Err(FrameError::InvalidUtf8("text message"))
        );
        // Truncated multi-byte sequence.
        assert!(utf8(&[0xE2, 0x82], "close reason").is_err());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_utf8("short", 10), "short");
        assert_eq!(truncate_utf8("abcdef", 3), "abc");
        // "é" is two bytes; cutting at 2 would split it.
        assert_eq!(truncate_utf8("aé", 2), "a");
    }
}
