//! Buffer chain and scanner.
//!
//! A [`Chain`] is an append-only sequence of immutable string pieces holding
//! not-yet-consumed input. Positions are [`Cursor`] values: a copyable
//! (piece index, byte offset) pair that stays valid while more pieces are
//! appended and while earlier pieces are released.
//!
//! Invariants:
//! - Pieces are never empty and never mutated in place.
//! - Cursors are canonical: `offset < len(piece)`, or the cursor is the end
//!   cursor `(end_index, 0)`. The end cursor becomes the start of the next
//!   piece once one is appended, so a parked cursor resumes exactly where
//!   scanning stopped.
//! - Every scan result is independent of how the text was split into pieces.

use crate::charset::CharSet;
use std::collections::VecDeque;
use std::rc::Rc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct Cursor {
    piece: usize,
    offset: usize,
}

/// Result of a forward scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Scan {
    /// Position of the first matching char, and the char itself.
    Found(Cursor, char),
    /// Reached the end of what is buffered so far.
    End,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ScanMode {
    /// Stop at the first char in the set.
    Include,
    /// Stop at the first char not in the set.
    Exclude,
}

/// Outcome of comparing a literal against buffered input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Prefix {
    /// Matched; the cursor is just past the literal.
    Match(Cursor),
    Mismatch,
    /// Buffered input ended while it still agreed with the literal.
    Partial,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct Chain {
    pieces: VecDeque<Rc<str>>,
    /// Absolute index of `pieces[0]`.
    base: usize,
}

impl Chain {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_text(text: &str) -> Self {
        let mut chain = Self::new();
        chain.push(text);
        chain
    }

    pub(crate) fn push(&mut self, text: &str) {
        if !text.is_empty() {
            self.pieces.push_back(Rc::from(text));
        }
    }

    pub(crate) fn start(&self) -> Cursor {
        Cursor {
            piece: self.base,
            offset: 0,
        }
    }

    pub(crate) fn end(&self) -> Cursor {
        Cursor {
            piece: self.base + self.pieces.len(),
            offset: 0,
        }
    }

    pub(crate) fn is_end(&self, at: Cursor) -> bool {
        at.piece >= self.base + self.pieces.len()
    }

    fn piece(&self, at: Cursor) -> Option<&str> {
        at.piece
            .checked_sub(self.base)
            .and_then(|idx| self.pieces.get(idx))
            .map(|piece| &**piece)
    }

    /// Canonical form of `(piece, offset)`.
    fn normalize(&self, piece: usize, offset: usize) -> Cursor {
        match self.piece(Cursor { piece, offset: 0 }) {
            Some(text) if offset >= text.len() => Cursor {
                piece: piece + 1,
                offset: 0,
            },
            _ => Cursor { piece, offset },
        }
    }

    pub(crate) fn peek(&self, at: Cursor) -> Option<char> {
        self.piece(at).and_then(|text| text[at.offset..].chars().next())
    }

    /// Char at `at` and the cursor just past it.
    pub(crate) fn next(&self, at: Cursor) -> Option<(char, Cursor)> {
        let text = self.piece(at)?;
        let ch = text[at.offset..].chars().next()?;
        Some((ch, self.normalize(at.piece, at.offset + ch.len_utf8())))
    }

    /// Cursor just past the char at `at` (the end cursor stays put).
    pub(crate) fn step(&self, at: Cursor) -> Cursor {
        self.next(at).map_or(at, |(_, next)| next)
    }

    /// First position at or after `from` whose char is in (`Include`) or not in
    /// (`Exclude`) `set`. Does not mutate the chain.
    pub(crate) fn scan(&self, from: Cursor, set: &CharSet, mode: ScanMode) -> Scan {
        let mut at = from;
        while let Some(text) = self.piece(at) {
            let rest = &text[at.offset..];
            let hit = match mode {
                ScanMode::Include => set.find_in(rest),
                ScanMode::Exclude => set.find_not_in(rest),
            };
            if let Some((idx, ch)) = hit {
                return Scan::Found(
                    Cursor {
                        piece: at.piece,
                        offset: at.offset + idx,
                    },
                    ch,
                );
            }
            at = Cursor {
                piece: at.piece + 1,
                offset: 0,
            };
        }
        Scan::End
    }

    /// Compare `literal` against the input at `at`, ignoring case when
    /// `fold_case` is set.
    pub(crate) fn prefix_at(&self, at: Cursor, literal: &str, fold_case: bool) -> Prefix {
        let mut pos = at;
        for expected in literal.chars() {
            let Some((ch, next)) = self.next(pos) else {
                return Prefix::Partial;
            };
            let same = if fold_case {
                ch.to_lowercase().eq(expected.to_lowercase())
            } else {
                ch == expected
            };
            if !same {
                return Prefix::Mismatch;
            }
            pos = next;
        }
        Prefix::Match(pos)
    }

    /// Verbatim search for `needle` at or after `from`, across piece
    /// boundaries. Returns the start of the match and the cursor past it.
    ///
    /// `None` means the needle was not found in what is buffered; a partial
    /// match at the very end counts as not found yet.
    pub(crate) fn find_literal(
        &self,
        from: Cursor,
        needle: &str,
        fold_case: bool,
    ) -> Option<(Cursor, Cursor)> {
        let Some(first) = needle.chars().next() else {
            return Some((from, from));
        };
        let mut firsts = CharSet::from_chars([first]);
        if fold_case {
            for folded in first.to_lowercase().chain(first.to_uppercase()) {
                firsts.insert(folded);
            }
        }
        let mut at = from;
        loop {
            let Scan::Found(candidate, _) = self.scan(at, &firsts, ScanMode::Include) else {
                return None;
            };
            match self.prefix_at(candidate, needle, fold_case) {
                Prefix::Match(end) => return Some((candidate, end)),
                Prefix::Partial => return None,
                Prefix::Mismatch => at = self.step(candidate),
            }
        }
    }

    /// Text between two cursors, `from <= to`.
    pub(crate) fn slice(&self, from: Cursor, to: Cursor) -> String {
        let mut out = String::new();
        self.for_each_slice(from, to, |part| out.push_str(part));
        out
    }

    pub(crate) fn for_each_slice(&self, from: Cursor, to: Cursor, mut f: impl FnMut(&str)) {
        debug_assert!(from <= to, "slice bounds out of order");
        let mut at = from;
        while at < to {
            let Some(text) = self.piece(at) else {
                break;
            };
            let end = if at.piece == to.piece {
                to.offset
            } else {
                text.len()
            };
            f(&text[at.offset..end]);
            at = Cursor {
                piece: at.piece + 1,
                offset: 0,
            };
        }
    }

    /// Drop every piece entirely before `upto`.
    pub(crate) fn release(&mut self, upto: Cursor) {
        while self.base < upto.piece && !self.pieces.is_empty() {
            let _ = self.pieces.pop_front();
            self.base += 1;
        }
    }

    /// Drop all buffered text.
    pub(crate) fn clear(&mut self) {
        self.base += self.pieces.len();
        self.pieces.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_of(parts: &[&str]) -> Chain {
        let mut chain = Chain::new();
        for part in parts {
            chain.push(part);
        }
        chain
    }

    /// Every split of `text` into two or three pieces.
    fn splits(text: &str) -> Vec<Vec<String>> {
        let bounds: Vec<usize> = text
            .char_indices()
            .map(|(idx, _)| idx)
            .skip(1)
            .collect();
        let mut out = vec![vec![text.to_string()]];
        for (i, &a) in bounds.iter().enumerate() {
            out.push(vec![text[..a].to_string(), text[a..].to_string()]);
            for &b in &bounds[i + 1..] {
                out.push(vec![
                    text[..a].to_string(),
                    text[a..b].to_string(),
                    text[b..].to_string(),
                ]);
            }
        }
        out
    }

    fn offset_of(chain: &Chain, cursor: Cursor) -> usize {
        chain.slice(chain.start(), cursor).len()
    }

    #[test]
    fn scan_is_chunk_boundary_independent() {
        let text = "héllo wörld <tag> &amp;";
        let set = CharSet::from_chars(['<', '&']);
        for parts in splits(text) {
            let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
            let chain = chain_of(&refs);
            let Scan::Found(at, ch) = chain.scan(chain.start(), &set, ScanMode::Include) else {
                panic!("marker not found for split {parts:?}");
            };
            assert_eq!((offset_of(&chain, at), ch), (14, '<'), "split {parts:?}");
            let after = chain.step(at);
            let Scan::Found(at, ch) = chain.scan(after, &set, ScanMode::Include) else {
                panic!("second marker not found for split {parts:?}");
            };
            assert_eq!((offset_of(&chain, at), ch), (20, '&'), "split {parts:?}");
        }
    }

    #[test]
    fn exclude_mode_skips_whitespace_across_pieces() {
        let chain = chain_of(&["  ", "\t", " x"]);
        let ws = CharSet::from_chars([' ', '\t']);
        let Scan::Found(at, ch) = chain.scan(chain.start(), &ws, ScanMode::Exclude) else {
            panic!("expected non-whitespace");
        };
        assert_eq!(ch, 'x');
        assert_eq!(offset_of(&chain, at), 4);
    }

    #[test]
    fn end_cursor_resumes_on_append() {
        let mut chain = chain_of(&["ab"]);
        let set = CharSet::from_chars(['>']);
        assert_eq!(chain.scan(chain.start(), &set, ScanMode::Include), Scan::End);
        let parked = chain.end();
        chain.push("c>");
        assert_eq!(chain.peek(parked), Some('c'));
        match chain.scan(parked, &set, ScanMode::Include) {
            Scan::Found(at, '>') => assert_eq!(offset_of(&chain, at), 3),
            other => panic!("unexpected scan result {other:?}"),
        }
    }

    #[test]
    fn find_literal_spans_pieces() {
        let text = "xx]]-]]>tail";
        for parts in splits(text) {
            let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
            let chain = chain_of(&refs);
            let (start, end) = chain
                .find_literal(chain.start(), "]]>", false)
                .unwrap_or_else(|| panic!("literal not found for split {parts:?}"));
            assert_eq!(offset_of(&chain, start), 5, "split {parts:?}");
            assert_eq!(offset_of(&chain, end), 8, "split {parts:?}");
        }
    }

    #[test]
    fn find_literal_reports_partial_tail_as_not_found() {
        let chain = chain_of(&["data ]", "]"]);
        assert!(chain.find_literal(chain.start(), "]]>", false).is_none());
    }

    #[test]
    fn prefix_at_distinguishes_partial_and_mismatch() {
        let chain = chain_of(&["<!-"]);
        let at = chain.step(chain.start());
        assert_eq!(chain.prefix_at(at, "!--", false), Prefix::Partial);
        assert_eq!(chain.prefix_at(at, "!x", false), Prefix::Mismatch);
        assert!(matches!(chain.prefix_at(at, "!-", false), Prefix::Match(_)));
        assert!(matches!(chain.prefix_at(at, "!-", true), Prefix::Match(_)));
    }

    #[test]
    fn release_keeps_cursors_valid() {
        let mut chain = chain_of(&["abc", "def", "ghi"]);
        let set = CharSet::from_chars(['h']);
        let Scan::Found(at, _) = chain.scan(chain.start(), &set, ScanMode::Include) else {
            panic!("expected h");
        };
        chain.release(at);
        assert_eq!(chain.pieces.len(), 1);
        assert_eq!(chain.peek(at), Some('h'));
        assert_eq!(chain.slice(chain.start(), at), "g");
    }
}
