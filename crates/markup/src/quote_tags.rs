//! Quote-tag index.
//!
//! Quote tags (`<!-- ... -->`, `<![CDATA[ ... ]]>`) are recognised before
//! ordinary tag matching. Entries are bucketed by the first two characters
//! of their name (the whole name when shorter). Inside a bucket, longer names
//! come first so the most specific registration wins; equal lengths keep
//! registration order.

use crate::callback::Callback;
use crate::chain::{Chain, Cursor};
use std::collections::BTreeMap;

#[derive(Clone, Debug)]
pub(crate) struct QuoteTag {
    pub name: String,
    pub callback: Callback,
    /// Literal that, followed by the tag end, closes the body.
    pub end: String,
}

#[derive(Clone, Debug)]
pub(crate) enum QuoteLookup {
    Found { entry: QuoteTag, after: Cursor },
    NoMatch,
    NeedMore,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct QuoteTagIndex {
    buckets: BTreeMap<String, Vec<QuoteTag>>,
    /// Char length of the longest registered name.
    longest: usize,
}

fn bucket_key(name: &str) -> String {
    name.chars().take(2).collect()
}

impl QuoteTagIndex {
    pub(crate) fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub(crate) fn insert(&mut self, name: String, callback: Callback, end: String) {
        let len = name.chars().count();
        let bucket = self.buckets.entry(bucket_key(&name)).or_default();
        if let Some(existing) = bucket.iter_mut().find(|entry| entry.name == name) {
            existing.callback = callback;
            existing.end = end;
            return;
        }
        let at = bucket
            .iter()
            .position(|entry| entry.name.chars().count() < len)
            .unwrap_or(bucket.len());
        bucket.insert(at, QuoteTag { name, callback, end });
        self.longest = self.longest.max(len);
    }

    pub(crate) fn remove(&mut self, name: &str) -> bool {
        let key = bucket_key(name);
        let Some(bucket) = self.buckets.get_mut(&key) else {
            return false;
        };
        let before = bucket.len();
        bucket.retain(|entry| entry.name != name);
        let removed = bucket.len() != before;
        if bucket.is_empty() {
            let _ = self.buckets.remove(&key);
        }
        if removed {
            self.longest = self
                .buckets
                .values()
                .flatten()
                .map(|entry| entry.name.chars().count())
                .max()
                .unwrap_or(0);
        }
        removed
    }

    pub(crate) fn get(&self, name: &str) -> Option<&QuoteTag> {
        self.buckets
            .get(&bucket_key(name))
            .and_then(|bucket| bucket.iter().find(|entry| entry.name == name))
    }

    /// `(name, end)` pairs in lookup order.
    pub(crate) fn entries(&self) -> Vec<(String, String)> {
        self.buckets
            .values()
            .flatten()
            .map(|entry| (entry.name.clone(), entry.end.clone()))
            .collect()
    }

    /// Rebuild with lowercased names (case-insensitive matching turned on).
    pub(crate) fn fold_names(&mut self) {
        let entries: Vec<QuoteTag> = std::mem::take(&mut self.buckets)
            .into_values()
            .flatten()
            .collect();
        self.longest = 0;
        for entry in entries {
            self.insert(entry.name.to_lowercase(), entry.callback, entry.end);
        }
    }

    /// Match a registered name starting at `at` (just after the tag start).
    ///
    /// Buffers as many characters as the longest name needs. When the
    /// buffered input ends while a candidate could still match and more input
    /// may arrive, reports `NeedMore` instead of settling for a shorter name.
    pub(crate) fn lookup(
        &self,
        chain: &Chain,
        at: Cursor,
        finished: bool,
        fold_case: bool,
    ) -> QuoteLookup {
        if self.is_empty() {
            return QuoteLookup::NoMatch;
        }
        // Folding may widen a char (`İ` lowers to two), so every folded char
        // records the chain cursor it ends on. Only the last char of a source
        // char's folding carries one.
        let mut ahead = String::new();
        let mut ends: Vec<Option<Cursor>> = Vec::with_capacity(self.longest);
        let mut pos = at;
        let mut exhausted = false;
        for _ in 0..self.longest {
            match chain.next(pos) {
                Some((ch, next)) => {
                    let start = ahead.len();
                    if fold_case {
                        ahead.extend(ch.to_lowercase());
                    } else {
                        ahead.push(ch);
                    }
                    let folded = ahead[start..].chars().count();
                    ends.extend(std::iter::repeat_n(None, folded - 1));
                    ends.push(Some(next));
                    pos = next;
                }
                None => {
                    exhausted = true;
                    break;
                }
            }
        }
        let undecided = exhausted && !finished;

        let buffered = ahead.chars().count();
        if buffered < 2
            && undecided
            && self.buckets.keys().any(|key| key.starts_with(ahead.as_str()))
        {
            return QuoteLookup::NeedMore;
        }

        let mut keys = Vec::with_capacity(2);
        if buffered >= 2 {
            keys.push(bucket_key(&ahead));
        }
        if buffered >= 1 {
            keys.push(ahead.chars().take(1).collect::<String>());
        }
        for key in keys {
            let Some(bucket) = self.buckets.get(&key) else {
                continue;
            };
            for entry in bucket {
                let aligned = entry
                    .name
                    .chars()
                    .count()
                    .checked_sub(1)
                    .and_then(|last| ends.get(last).copied().flatten());
                if ahead.starts_with(entry.name.as_str())
                    && let Some(after) = aligned
                {
                    return QuoteLookup::Found {
                        entry: entry.clone(),
                        after,
                    };
                }
                if undecided && entry.name.starts_with(ahead.as_str()) {
                    return QuoteLookup::NeedMore;
                }
            }
        }
        QuoteLookup::NoMatch
    }
}
