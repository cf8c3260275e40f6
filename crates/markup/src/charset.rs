//! Small character sets used by the scanner, plus the marker sets derived from
//! a [`Config`].
//!
//! Sets holding at most three ASCII characters are searched with `memchr`;
//! larger sets fall back to a 128-bit ASCII table plus a short list of
//! non-ASCII members.

use crate::config::Config;
use memchr::{memchr, memchr2, memchr3};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct CharSet {
    ascii: [u64; 2],
    needles: Vec<u8>,
    other: Vec<char>,
}

impl CharSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_chars(chars: impl IntoIterator<Item = char>) -> Self {
        let mut set = Self::new();
        for ch in chars {
            set.insert(ch);
        }
        set
    }

    pub(crate) fn insert(&mut self, ch: char) {
        if ch.is_ascii() {
            let b = ch as u8;
            let word = usize::from(b >> 6);
            let bit = 1u64 << (b & 63);
            if self.ascii[word] & bit == 0 {
                self.ascii[word] |= bit;
                self.needles.push(b);
            }
        } else if !self.other.contains(&ch) {
            self.other.push(ch);
        }
    }

    pub(crate) fn extend(&mut self, other: &CharSet) {
        for &b in &other.needles {
            self.insert(char::from(b));
        }
        for &ch in &other.other {
            self.insert(ch);
        }
    }

    pub(crate) fn contains(&self, ch: char) -> bool {
        if ch.is_ascii() {
            let b = ch as u8;
            self.ascii[usize::from(b >> 6)] & (1u64 << (b & 63)) != 0
        } else {
            self.other.contains(&ch)
        }
    }

    /// Byte offset and char of the first member of the set in `text`.
    pub(crate) fn find_in(&self, text: &str) -> Option<(usize, char)> {
        if self.other.is_empty() {
            // ASCII needles never match inside a multi-byte UTF-8 sequence, so
            // every hit is a char boundary.
            let bytes = text.as_bytes();
            let hit = match self.needles.as_slice() {
                [] => return None,
                [a] => memchr(*a, bytes),
                [a, b] => memchr2(*a, *b, bytes),
                [a, b, c] => memchr3(*a, *b, *c, bytes),
                _ => bytes.iter().position(|&b| b.is_ascii() && self.contains(char::from(b))),
            };
            return hit.map(|idx| (idx, char::from(bytes[idx])));
        }
        text.char_indices().find(|&(_, ch)| self.contains(ch))
    }

    /// Byte offset and char of the first non-member of the set in `text`.
    pub(crate) fn find_not_in(&self, text: &str) -> Option<(usize, char)> {
        text.char_indices().find(|&(_, ch)| !self.contains(ch))
    }
}

/// Scanner sets derived from the configuration and the registration tables.
///
/// Recomputed whenever either changes so that buffered input is always
/// scanned with the current meaning of every marker.
#[derive(Clone, Debug, Default)]
pub(crate) struct Markers {
    /// Stops in `Data` when tags and entities are both recognised.
    pub data: CharSet,
    /// Stops in `Data` for frames that only resolve entities.
    pub data_entities_only: CharSet,
    /// Ends a tag name.
    pub name_stop: CharSet,
    /// Characters scanned while looking for an entity end. Anything other
    /// than the entity end (or a nested start when nestling) aborts the entity.
    pub entity_scan: CharSet,
    pub whitespace: CharSet,
    pub quote_starts: CharSet,
    pub entities_active: bool,
}

impl Markers {
    pub(crate) fn derive(config: &Config, entities_active: bool) -> Self {
        let whitespace = CharSet::from_chars(config.whitespace.chars());
        let quote_starts = CharSet::from_chars(config.quotes.iter().map(|&(open, _)| open));

        let mut data = CharSet::new();
        let mut data_entities_only = CharSet::new();
        if !config.ignore_tags {
            data.insert(config.tag_start);
        }
        if entities_active {
            data.insert(config.entity_start);
            data_entities_only.insert(config.entity_start);
        }

        let mut name_stop = whitespace.clone();
        name_stop.extend(&quote_starts);
        name_stop.insert(config.tag_end);
        name_stop.insert(config.tag_start);
        name_stop.insert(config.tag_fin);
        name_stop.insert(config.equals);

        let mut entity_scan = if config.lazy_entity_end {
            // A nested entity start is balanced, not a break, when nestling.
            let mut set = CharSet::from_chars(config.lazy_entity_break.chars().filter(|&ch| {
                !(config.nestling_entity_end && ch == config.entity_start)
            }));
            set.extend(&whitespace);
            set
        } else {
            CharSet::new()
        };
        entity_scan.insert(config.entity_end);
        if config.nestling_entity_end {
            entity_scan.insert(config.entity_start);
        }

        Self {
            data,
            data_entities_only,
            name_stop,
            entity_scan,
            whitespace,
            quote_starts,
            entities_active,
        }
    }
}
