//! Bidirectional translation between a host editor's UTF-16 code-unit
//! offsets and the Unicode codepoint offsets used on the wire.
//!
//! Astral-plane characters count as one codepoint but two UTF-16 units, so
//! every index crossing the editor/protocol boundary must pass through
//! these helpers rather than being compared directly.

/// Number of Unicode scalar values (codepoints) in `s`.
pub fn codepoint_len(s: &str) -> u64 {
    s.chars().count() as u64
}

/// Converts a UTF-16 code-unit offset into `text` to a codepoint offset.
///
/// # Panics
///
/// Panics if `utf16_offset` does not fall on a UTF-16 code-unit boundary
/// that also aligns with a codepoint boundary (i.e. it splits a surrogate
/// pair) — callers are expected to only pass offsets reported by the host
/// editor, which never splits a pair.
pub fn utf16_to_codepoint(text: &str, utf16_offset: u64) -> u64 {
    let mut utf16_pos = 0u64;
    let mut codepoint_pos = 0u64;
    for ch in text.chars() {
        if utf16_pos == utf16_offset {
            return codepoint_pos;
        }
        assert!(
            utf16_pos < utf16_offset,
            "utf16_offset {utf16_offset} does not land on a codepoint boundary"
        );
        utf16_pos += ch.len_utf16() as u64;
        codepoint_pos += 1;
    }
    assert_eq!(
        utf16_pos, utf16_offset,
        "utf16_offset {utf16_offset} is out of bounds for text of utf16 length {utf16_pos}"
    );
    codepoint_pos
}

/// Converts a codepoint offset into `text` to a UTF-16 code-unit offset.
pub fn codepoint_to_utf16(text: &str, codepoint_offset: u64) -> u64 {
    text.chars()
        .take(codepoint_offset as usize)
        .map(|c| c.len_utf16() as u64)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn ascii_offsets_are_identity() {
        let s = "hello";
        for i in 0..=5u64 {
            assert_eq!(utf16_to_codepoint(s, i), i);
            assert_eq!(codepoint_to_utf16(s, i), i);
        }
    }

    #[test]
    fn astral_character_counts_one_codepoint_two_units() {
        let s = "😀"; // U+1F600, one codepoint, two UTF-16 units
        assert_eq!(codepoint_len(s), 1);
        assert_eq!(utf16_to_codepoint(s, 0), 0);
        assert_eq!(utf16_to_codepoint(s, 2), 1);
        assert_eq!(codepoint_to_utf16(s, 0), 0);
        assert_eq!(codepoint_to_utf16(s, 1), 2);
    }

    #[test]
    fn mixed_bmp_and_astral() {
        let s = "a😀b"; // utf16 units: a(1) + 😀(2) + b(1) = 4; codepoints: 3
        assert_eq!(codepoint_len(s), 3);
        assert_eq!(utf16_to_codepoint(s, 0), 0);
        assert_eq!(utf16_to_codepoint(s, 1), 1); // after 'a'
        assert_eq!(utf16_to_codepoint(s, 3), 2); // after the emoji
        assert_eq!(utf16_to_codepoint(s, 4), 3); // after 'b'
        assert_eq!(codepoint_to_utf16(s, 2), 3);
    }

    #[test]
    fn round_trip_on_boundaries() {
        let s = "a😀b🚀c";
        let codepoint_count = codepoint_len(s);
        for k in 0..=codepoint_count {
            let utf16 = codepoint_to_utf16(s, k);
            assert_eq!(utf16_to_codepoint(s, utf16), k);
        }
    }
}
