//! Ready-made entity decoding.
//!
//! Deliberately narrow: a small named set plus decimal and hex numeric
//! references. Anything else is left to the caller.

use crate::callback::{Callback, Reply};
use crate::value::Value;

const NAMED: &[(&str, &str)] = &[
    ("amp", "&"),
    ("apos", "'"),
    ("copy", "\u{a9}"),
    ("gt", ">"),
    ("hellip", "\u{2026}"),
    ("laquo", "\u{ab}"),
    ("lt", "<"),
    ("mdash", "\u{2014}"),
    ("nbsp", "\u{a0}"),
    ("ndash", "\u{2013}"),
    ("quot", "\""),
    ("raquo", "\u{bb}"),
    ("reg", "\u{ae}"),
];

const MAX_HEX_DIGITS: usize = 6; // 0x10FFFF
const MAX_DEC_DIGITS: usize = 7; // 1114111

/// Decode the entity called `name` (the text between the entity start and
/// end markers).
///
/// Numeric references decode only to valid Unicode scalar values; overlong
/// digit runs and surrogates yield `None`.
pub fn decode_entity(name: &str) -> Option<String> {
    if let Some(digits) = name.strip_prefix('#') {
        return decode_numeric(digits).map(String::from);
    }
    NAMED
        .binary_search_by(|(candidate, _)| (*candidate).cmp(name))
        .ok()
        .map(|idx| NAMED[idx].1.to_string())
}

fn decode_numeric(digits: &str) -> Option<char> {
    let (digits, radix, max) = match digits.strip_prefix(['x', 'X']) {
        Some(hex) => (hex, 16, MAX_HEX_DIGITS),
        None => (digits, 10, MAX_DEC_DIGITS),
    };
    if digits.is_empty() || digits.len() > max || !digits.chars().all(|ch| ch.is_digit(radix)) {
        return None;
    }
    u32::from_str_radix(digits, radix).ok().and_then(char::from_u32)
}

/// Generic entity callback decoding with [`decode_entity`]; unknown entities
/// are kept as they are.
pub fn html_entity_callback() -> Callback {
    Callback::func(|_, event| {
        Ok(match decode_entity(&event.name) {
            Some(text) => Reply::Values(vec![Value::Text(text)]),
            None => Reply::Keep,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    #[test]
    fn named_table_is_sorted() {
        assert!(NAMED.windows(2).all(|pair| pair[0].0 < pair[1].0));
    }

    #[test]
    fn decodes_named_and_numeric_references() {
        assert_eq!(decode_entity("amp").as_deref(), Some("&"));
        assert_eq!(decode_entity("#65").as_deref(), Some("A"));
        assert_eq!(decode_entity("#x1F4A9").as_deref(), Some("\u{1F4A9}"));
        assert_eq!(decode_entity("#X41").as_deref(), Some("A"));
    }

    #[test]
    fn rejects_malformed_numeric_references() {
        assert_eq!(decode_entity("#"), None);
        assert_eq!(decode_entity("#x"), None);
        assert_eq!(decode_entity("#12a"), None);
        assert_eq!(decode_entity("#xD800"), None);
        assert_eq!(decode_entity("#99999999"), None);
        assert_eq!(decode_entity("bogus"), None);
    }

    #[test]
    fn callback_decodes_known_and_keeps_unknown() {
        let mut parser = Parser::new();
        parser.set_entity_callback(Some(html_entity_callback()));
        parser.feed("&lt;b&gt; &bogus; &#233;").expect("feed");
        parser.finish().expect("finish");
        let text: String = parser.read().iter().map(ToString::to_string).collect();
        assert_eq!(text, "<b> &bogus; \u{e9}");
    }
}
