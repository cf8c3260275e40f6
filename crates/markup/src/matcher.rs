//! Construct boundary detection.
//!
//! Every routine here is a pure function of the buffered input: it either
//! decides (`Need::Ready`) or reports that the decision depends on input that
//! has not arrived yet (`Need::More`). Nothing is consumed, so the dispatcher
//! can restart the same construct after the next chunk and reach the same
//! decision it would have reached on unsplit input.

use crate::args::Args;
use crate::chain::{Chain, Cursor, Scan, ScanMode};
use crate::charset::{CharSet, Markers};
use crate::config::{Config, XmlTagSyntax};
use crate::quote_tags::QuoteLookup;
use crate::registry::Registry;

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Need<T> {
    Ready(T),
    More,
}

/// How nested tag starts inside a tag are treated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TagMatching {
    /// A nested tag start is an ordinary character.
    Plain,
    /// Unquoted nested tag starts and ends are balanced.
    Balance,
    /// An unquoted tag start ends the tag before it (end tags).
    StopAtUnbalanced,
}

/// Quote and nesting state inside an argument token, saved across
/// interruptions so a scan resumes exactly where it stopped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct QuoteState {
    /// Index into `Config::quotes` of the open quote.
    pub quote: Option<usize>,
    pub depth: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TokenMode {
    Name,
    Value,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ArgScan {
    Complete {
        text: String,
        end: Cursor,
    },
    NeedMore,
    /// Stopped at an entity start (only when asked to).
    Entity {
        at: Cursor,
        text: String,
        state: QuoteState,
    },
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct TagHead {
    /// Raw name, including a leading end-tag marker.
    pub name: String,
    pub after: Cursor,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct TagBody {
    pub args: Args,
    /// Start of the tag end (or of `/>`).
    pub close: Cursor,
    /// Just past the tag.
    pub end: Cursor,
    /// Closed with `/>`.
    pub empty: bool,
    /// False when finished input ran out before the tag end.
    pub terminated: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum EntityScan {
    Entity { name: String, end: Cursor },
    NotEntity,
    NeedMore,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum EndTag {
    Found { content_end: Cursor, end: Cursor },
    /// Finished input ended first; the container runs to the end.
    Unterminated,
    NeedMore,
}

pub(crate) struct Matcher<'a> {
    chain: &'a Chain,
    config: &'a Config,
    markers: &'a Markers,
    registry: &'a Registry,
    /// No more input will arrive for this chain.
    finished: bool,
}

impl<'a> Matcher<'a> {
    pub(crate) fn new(
        chain: &'a Chain,
        config: &'a Config,
        markers: &'a Markers,
        registry: &'a Registry,
        finished: bool,
    ) -> Self {
        Self {
            chain,
            config,
            markers,
            registry,
            finished,
        }
    }

    pub(crate) fn chain(&self) -> &'a Chain {
        self.chain
    }

    pub(crate) fn default_matching(&self) -> TagMatching {
        if self.config.match_tag {
            TagMatching::Balance
        } else {
            TagMatching::Plain
        }
    }

    fn quote_index(&self, ch: char) -> Option<usize> {
        if !self.markers.quote_starts.contains(ch) {
            return None;
        }
        self.config.quotes.iter().position(|&(open, _)| open == ch)
    }

    pub(crate) fn skip_ws(&self, from: Cursor) -> Need<Cursor> {
        match self.chain.scan(from, &self.markers.whitespace, ScanMode::Exclude) {
            Scan::Found(at, _) => Need::Ready(at),
            Scan::End if self.finished => Need::Ready(self.chain.end()),
            Scan::End => Need::More,
        }
    }

    /// Tag name starting just after the tag start.
    ///
    /// A `/` ends the name only when the tag end follows it, so the decision
    /// waits for one character of lookahead.
    pub(crate) fn scan_tag_name(&self, after_start: Cursor) -> Need<TagHead> {
        let cfg = self.config;
        let mut pos = after_start;
        if cfg.ws_before_tag_name {
            pos = match self.skip_ws(pos) {
                Need::Ready(at) => at,
                Need::More => return Need::More,
            };
        }
        let name_start = pos;
        if self.chain.peek(pos) == Some(cfg.tag_fin) {
            pos = self.chain.step(pos);
        }
        loop {
            match self.chain.scan(pos, &self.markers.name_stop, ScanMode::Include) {
                Scan::End if self.finished => {
                    pos = self.chain.end();
                    break;
                }
                Scan::End => return Need::More,
                Scan::Found(at, ch) if ch == cfg.tag_fin => {
                    let next = self.chain.step(at);
                    match self.chain.peek(next) {
                        Some(end) if end == cfg.tag_end => {
                            pos = at;
                            break;
                        }
                        None if !self.finished => return Need::More,
                        _ => pos = next,
                    }
                }
                Scan::Found(at, _) => {
                    pos = at;
                    break;
                }
            }
        }
        Need::Ready(TagHead {
            name: self.chain.slice(name_start, pos),
            after: pos,
        })
    }

    /// One argument name or value token.
    ///
    /// Quote characters delimit spans and are not part of the token text.
    pub(crate) fn scan_argument(
        &self,
        from: Cursor,
        mode: TokenMode,
        matching: TagMatching,
        mut state: QuoteState,
        break_on_entity: bool,
    ) -> ArgScan {
        let cfg = self.config;
        let mut text = String::new();
        let mut pos = from;
        loop {
            let Some((ch, next)) = self.chain.next(pos) else {
                return if self.finished {
                    ArgScan::Complete { text, end: pos }
                } else {
                    ArgScan::NeedMore
                };
            };
            if let Some(quote) = state.quote {
                if ch == cfg.quotes[quote].1 {
                    state.quote = None;
                } else if cfg.lazy_argument_end && ch == cfg.tag_end {
                    return ArgScan::Complete { text, end: pos };
                } else if break_on_entity && ch == cfg.entity_start {
                    return ArgScan::Entity {
                        at: pos,
                        text,
                        state,
                    };
                } else {
                    text.push(ch);
                }
                pos = next;
                continue;
            }
            if let Some(quote) = self.quote_index(ch) {
                state.quote = Some(quote);
                pos = next;
                continue;
            }
            if ch == cfg.tag_start && matching != TagMatching::Plain {
                if matching == TagMatching::StopAtUnbalanced {
                    return ArgScan::Complete { text, end: pos };
                }
                state.depth += 1;
                text.push(ch);
                pos = next;
                continue;
            }
            if ch == cfg.tag_end {
                if state.depth == 0 {
                    return ArgScan::Complete { text, end: pos };
                }
                state.depth -= 1;
                text.push(ch);
                pos = next;
                continue;
            }
            if state.depth == 0 {
                if self.markers.whitespace.contains(ch) || (mode == TokenMode::Name && ch == cfg.equals) {
                    return ArgScan::Complete { text, end: pos };
                }
                if ch == cfg.tag_fin && cfg.xml_tag_syntax != XmlTagSyntax::Legacy {
                    match self.chain.peek(next) {
                        Some(end) if end == cfg.tag_end => {
                            return ArgScan::Complete { text, end: pos };
                        }
                        None if !self.finished => return ArgScan::NeedMore,
                        _ => {}
                    }
                }
            }
            if break_on_entity && ch == cfg.entity_start {
                return ArgScan::Entity {
                    at: pos,
                    text,
                    state,
                };
            }
            text.push(ch);
            pos = next;
        }
    }

    fn scan_token(&self, from: Cursor, mode: TokenMode, matching: TagMatching) -> Need<(String, Cursor)> {
        match self.scan_argument(from, mode, matching, QuoteState::default(), false) {
            ArgScan::Complete { text, end } => Need::Ready((text, end)),
            ArgScan::Entity { at, text, .. } => Need::Ready((text, at)),
            ArgScan::NeedMore => Need::More,
        }
    }

    /// Arguments and end of a tag whose name ends at `from`.
    pub(crate) fn scan_tag_body(&self, from: Cursor, matching: TagMatching) -> Need<TagBody> {
        let cfg = self.config;
        let mut args = Args::new();
        let mut pos = from;
        loop {
            pos = match self.skip_ws(pos) {
                Need::Ready(at) => at,
                Need::More => return Need::More,
            };
            let Some((ch, next)) = self.chain.next(pos) else {
                return Need::Ready(TagBody {
                    args,
                    close: pos,
                    end: pos,
                    empty: false,
                    terminated: false,
                });
            };
            if ch == cfg.tag_end {
                return Need::Ready(TagBody {
                    args,
                    close: pos,
                    end: next,
                    empty: false,
                    terminated: true,
                });
            }
            if ch == cfg.tag_fin && cfg.xml_tag_syntax != XmlTagSyntax::Legacy {
                match self.chain.next(next) {
                    Some((end, after)) if end == cfg.tag_end => {
                        return Need::Ready(TagBody {
                            args,
                            close: pos,
                            end: after,
                            empty: true,
                            terminated: true,
                        });
                    }
                    None if !self.finished => return Need::More,
                    _ => {}
                }
            }
            if ch == cfg.tag_start && matching == TagMatching::StopAtUnbalanced {
                return Need::Ready(TagBody {
                    args,
                    close: pos,
                    end: pos,
                    empty: false,
                    terminated: true,
                });
            }

            let (name, name_end) = if ch == cfg.equals {
                (String::new(), pos)
            } else {
                match self.scan_token(pos, TokenMode::Name, matching) {
                    Need::Ready(token) => token,
                    Need::More => return Need::More,
                }
            };
            if name_end == pos && ch != cfg.equals {
                // Stray character that cannot start a token.
                args.push(ch.to_string(), None);
                pos = next;
                continue;
            }
            let name = cfg.normalize_name(&name);
            let after_name = match self.skip_ws(name_end) {
                Need::Ready(at) => at,
                Need::More => return Need::More,
            };
            if self.chain.peek(after_name) != Some(cfg.equals) {
                args.push(name, None);
                pos = after_name;
                continue;
            }
            let value_start = match self.skip_ws(self.chain.step(after_name)) {
                Need::Ready(at) => at,
                Need::More => return Need::More,
            };
            match self.chain.peek(value_start) {
                Some(end) if end == cfg.tag_end => {
                    args.push(name, Some(String::new()));
                    pos = value_start;
                }
                None => {
                    args.push(name, Some(String::new()));
                    pos = value_start;
                }
                _ => match self.scan_token(value_start, TokenMode::Value, matching) {
                    Need::Ready((value, end)) => {
                        args.push(name, Some(value));
                        pos = end;
                    }
                    Need::More => return Need::More,
                },
            }
        }
    }

    /// Entity name after the entity start, honouring lazy and nestling modes.
    ///
    /// With a `limit`, the entity must end before it and running out of input
    /// means "not an entity" rather than "need more".
    pub(crate) fn scan_entity(&self, after_start: Cursor, limit: Option<Cursor>) -> EntityScan {
        let cfg = self.config;
        let mut depth = 0usize;
        let mut pos = after_start;
        loop {
            let (at, ch) = match self.chain.scan(pos, &self.markers.entity_scan, ScanMode::Include) {
                Scan::Found(at, ch) if limit.is_none_or(|limit| at < limit) => (at, ch),
                Scan::Found(..) => return EntityScan::NotEntity,
                Scan::End if self.finished || limit.is_some() => return EntityScan::NotEntity,
                Scan::End => return EntityScan::NeedMore,
            };
            if ch == cfg.entity_end {
                if depth == 0 {
                    let name = self.chain.slice(after_start, at);
                    if name.is_empty() {
                        return EntityScan::NotEntity;
                    }
                    return EntityScan::Entity {
                        name,
                        end: self.chain.step(at),
                    };
                }
                depth -= 1;
            } else if cfg.nestling_entity_end && ch == cfg.entity_start {
                depth += 1;
            } else {
                return EntityScan::NotEntity;
            }
            pos = self.chain.step(at);
        }
    }

    /// Find the end tag closing container `name`, searching from just past
    /// its start tag.
    ///
    /// Nested same-named containers are balanced with a depth counter when
    /// `balance_containers` is set. Quote-tag bodies are skipped whole and
    /// entities are not looked at.
    pub(crate) fn find_matching_end_tag(&self, name: &str, from: Cursor) -> EndTag {
        let cfg = self.config;
        let starts = CharSet::from_chars([cfg.tag_start]);
        let fin_len = cfg.tag_fin.len_utf8();
        let mut depth = 0usize;
        let mut pos = from;
        loop {
            let at = match self.chain.scan(pos, &starts, ScanMode::Include) {
                Scan::Found(at, _) => at,
                Scan::End if self.finished => return EndTag::Unterminated,
                Scan::End => return EndTag::NeedMore,
            };
            let after = self.chain.step(at);

            match self.registry.quote_tags.lookup(
                self.chain,
                after,
                self.finished,
                cfg.case_insensitive_tag,
            ) {
                QuoteLookup::NeedMore => return EndTag::NeedMore,
                QuoteLookup::Found { entry, after: body } => {
                    let needle = format!("{}{}", entry.end, cfg.tag_end);
                    match self.chain.find_literal(body, &needle, false) {
                        Some((_, end)) => {
                            pos = end;
                            continue;
                        }
                        None if self.finished => return EndTag::Unterminated,
                        None => return EndTag::NeedMore,
                    }
                }
                QuoteLookup::NoMatch => {}
            }

            let head = match self.scan_tag_name(after) {
                Need::Ready(head) => head,
                Need::More => return EndTag::NeedMore,
            };
            let is_end = head.name.starts_with(cfg.tag_fin);
            let bare = if is_end {
                &head.name[fin_len..]
            } else {
                head.name.as_str()
            };
            if bare.is_empty() {
                pos = after;
                continue;
            }
            let bare = cfg.normalize_name(bare);
            if bare != name && cfg.ignore_unknown && !self.registry.is_known_tag(&bare) {
                pos = after;
                continue;
            }

            let matching = if is_end {
                TagMatching::StopAtUnbalanced
            } else {
                self.default_matching()
            };
            let body = match self.scan_tag_body(head.after, matching) {
                Need::Ready(body) => body,
                Need::More => return EndTag::NeedMore,
            };
            if !body.terminated {
                return EndTag::Unterminated;
            }
            if bare == name {
                if is_end {
                    if depth == 0 {
                        #[cfg(any(test, feature = "debug-stats"))]
                        log::trace!(target: "markup.matcher", "end tag for {name} at depth 0");
                        return EndTag::Found {
                            content_end: at,
                            end: body.end,
                        };
                    }
                    depth -= 1;
                } else if cfg.balance_containers
                    && !(body.empty && cfg.xml_tag_syntax != XmlTagSyntax::Legacy)
                {
                    depth += 1;
                }
            }
            pos = body.end;
        }
    }
}
