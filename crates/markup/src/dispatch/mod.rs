//! Dispatcher: recognises the construct at the top frame's cursor and routes
//! it to its callback.
//!
//! A construct is planned completely (name, arguments, container body, end
//! marker) before any callback runs. When the plan needs input that has not
//! arrived, the dispatcher reports `Outcome::Wait` with nothing consumed.

use crate::args::Args;
use crate::callback::{Callback, Event, EventKind, Reply};
use crate::chain::{Cursor, Scan, ScanMode};
use crate::config::XmlTagSyntax;
use crate::driver::{Construct, Outcome, TagSpan};
use crate::error::ParseError;
use crate::frame::Location;
use crate::matcher::{ArgScan, EndTag, EntityScan, Matcher, Need, QuoteState, TagBody, TagMatching, TokenMode};
use crate::parser::Parser;
use crate::quote_tags::{QuoteLookup, QuoteTag};
use crate::value::Value;

#[cfg(test)]
mod tests;

/// Where the parser is relative to the construct being processed.
///
/// Callbacks read it through [`Parser::context`]; entity callbacks invoked
/// while a passed-through tag is rebuilt see the argument state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum State {
    /// Between constructs.
    #[default]
    Data,
    /// Between the arguments of a tag.
    Tag,
    /// Inside the value of the splice argument.
    SpliceArgument,
    /// Inside an unquoted argument value.
    TagArgument,
    /// Inside an argument value quoted with `Config::quotes[n]`.
    TagQuotedArgument(usize),
}

enum TagPlan {
    NeedMore,
    /// The tag start is not followed by a name.
    NotATag,
    /// Finished input ended inside the tag.
    Unterminated,
    Quote {
        entry: QuoteTag,
        content: String,
        end: Cursor,
    },
    Tag {
        name: String,
        span: TagSpan,
        args: Args,
        target: Target,
    },
}

enum Target {
    Tag(Callback),
    Container {
        callback: Callback,
        content: String,
        end: Cursor,
    },
    Unknown,
}

/// One step of rebuilding a passed-through tag.
enum WalkStep {
    Close,
    /// Copy the text up to `to` unchanged.
    Advance {
        to: Cursor,
        state: State,
        quote: QuoteState,
    },
    /// Replace the splice argument ending at `value_end` with its value.
    Splice { value_end: Cursor },
    /// Resolve the entity at `at`; it must end before `limit`.
    Entity {
        at: Cursor,
        limit: Cursor,
        state: State,
        quote: QuoteState,
    },
}

fn malformed(location: Location, reason: &'static str) -> ParseError {
    log::debug!(
        target: "markup.dispatch",
        "malformed input at line {} column {}: {reason}",
        location.line,
        location.column()
    );
    ParseError::Malformed { location, reason }
}

impl Parser {
    /// Process the construct (or literal span) at the top frame's cursor.
    pub(crate) fn dispatch(&mut self) -> Result<Outcome, ParseError> {
        let (cursor, flags, location) = {
            let frame = self.stack.top();
            (frame.cursor, frame.flags, frame.location)
        };
        let finished = self.frame_finished();
        let chain = self.top_chain();
        if chain.is_end(cursor) {
            return Ok(Outcome::Done);
        }
        let stops = if flags.parse_tags {
            &self.markers.data
        } else {
            &self.markers.data_entities_only
        };
        let marker = match chain.scan(cursor, stops, ScanMode::Include) {
            Scan::Found(at, ch) => Some((at, ch)),
            Scan::End => None,
        };
        let (at, ch) = match marker {
            Some((at, ch)) if at == cursor => (at, ch),
            other => {
                let upto = other.map_or(chain.end(), |(at, _)| at);
                let text = chain.slice(cursor, upto);
                self.consume_to(upto);
                self.emit_data(&text, location);
                return Ok(Outcome::Reread);
            }
        };

        if !flags.ignore_data && !self.pending.is_empty() {
            self.flush_data()?;
            return Ok(Outcome::Reread);
        }
        if flags.parse_tags && ch == self.config.tag_start {
            self.dispatch_tag(at, location, finished)
        } else {
            self.dispatch_entity(at, location, finished)
        }
    }

    fn dispatch_tag(
        &mut self,
        start: Cursor,
        location: Location,
        finished: bool,
    ) -> Result<Outcome, ParseError> {
        let strict = self.config.xml_tag_syntax == XmlTagSyntax::Strict;
        match self.plan_tag(start, finished) {
            TagPlan::NeedMore => Ok(Outcome::Wait),
            TagPlan::NotATag if strict => Err(malformed(location, "empty tag name")),
            TagPlan::NotATag => Ok(self.literal_marker(start, location)),
            TagPlan::Unterminated if strict => Err(malformed(location, "unterminated tag")),
            TagPlan::Unterminated => Ok(Outcome::Wait),
            TagPlan::Quote {
                entry,
                content,
                end,
            } => {
                #[cfg(any(test, feature = "debug-stats"))]
                log::trace!(
                    target: "markup.dispatch",
                    "quote tag {:?} with {} bytes of content",
                    entry.name,
                    content.len()
                );
                let construct = Construct {
                    kind: EventKind::QuoteTag,
                    name: entry.name,
                    start,
                    end,
                    tag: None,
                    spliced: Vec::new(),
                };
                self.call(construct, entry.callback, Args::new(), Some(content), location)
            }
            TagPlan::Tag {
                name,
                span,
                args,
                target,
            } => {
                let (args, spliced) = self.splice_args(args)?;
                match target {
                    Target::Tag(callback) => {
                        let construct = Construct {
                            kind: EventKind::Tag,
                            name,
                            start,
                            end: span.end,
                            tag: Some(span),
                            spliced,
                        };
                        self.call(construct, callback, args, None, location)
                    }
                    Target::Container {
                        callback,
                        content,
                        end,
                    } => {
                        let construct = Construct {
                            kind: EventKind::Container,
                            name,
                            start,
                            end,
                            tag: None,
                            spliced: Vec::new(),
                        };
                        self.call(construct, callback, args, Some(content), location)
                    }
                    Target::Unknown => {
                        let construct = Construct {
                            kind: EventKind::Tag,
                            name,
                            start,
                            end: span.end,
                            tag: Some(span),
                            spliced,
                        };
                        self.unknown_tag(construct, args, location)
                    }
                }
            }
        }
    }

    /// Decide what the tag at `start` is without consuming anything.
    fn plan_tag(&self, start: Cursor, finished: bool) -> TagPlan {
        let cfg = &self.config;
        let m = self.matcher(finished);
        let chain = m.chain();
        let after_start = chain.step(start);

        match self
            .registry
            .quote_tags
            .lookup(chain, after_start, finished, cfg.case_insensitive_tag)
        {
            QuoteLookup::NeedMore => return TagPlan::NeedMore,
            QuoteLookup::Found { entry, after } => {
                let needle = format!("{}{}", entry.end, cfg.tag_end);
                return match chain.find_literal(after, &needle, false) {
                    Some((content_end, end)) => TagPlan::Quote {
                        content: chain.slice(after, content_end),
                        entry,
                        end,
                    },
                    None if finished => TagPlan::Unterminated,
                    None => TagPlan::NeedMore,
                };
            }
            QuoteLookup::NoMatch => {}
        }

        let head = match m.scan_tag_name(after_start) {
            Need::Ready(head) => head,
            Need::More => return TagPlan::NeedMore,
        };
        let is_end = head.name.starts_with(cfg.tag_fin);
        let bare = if is_end {
            &head.name[cfg.tag_fin.len_utf8()..]
        } else {
            head.name.as_str()
        };
        if bare.is_empty() {
            return TagPlan::NotATag;
        }
        let matching = if is_end {
            TagMatching::StopAtUnbalanced
        } else {
            m.default_matching()
        };
        let body = match m.scan_tag_body(head.after, matching) {
            Need::Ready(body) => body,
            Need::More => return TagPlan::NeedMore,
        };
        if !body.terminated {
            return TagPlan::Unterminated;
        }
        let name = cfg.normalize_name(&head.name);
        let target = match self.select_target(&m, &name, &body) {
            Need::Ready(target) => target,
            Need::More => return TagPlan::NeedMore,
        };
        TagPlan::Tag {
            name,
            span: TagSpan {
                start,
                after_name: head.after,
                close: body.close,
                end: body.end,
                matching,
            },
            args: body.args,
            target,
        }
    }

    /// Pick the tag or container registration for `name`.
    ///
    /// Strict syntax sends `<x/>` to the tag table first; otherwise a
    /// registered container wins, with empty content for `<x/>`.
    fn select_target(&self, m: &Matcher<'_>, name: &str, body: &TagBody) -> Need<Target> {
        let tag = self.registry.tags.get(name);
        let prefer_tag = body.empty && self.config.xml_tag_syntax == XmlTagSyntax::Strict;
        let callback = match (tag, self.registry.containers.get(name)) {
            (Some(callback), _) if prefer_tag => return Need::Ready(Target::Tag(callback.clone())),
            (_, Some(callback)) => callback.clone(),
            (Some(callback), None) => return Need::Ready(Target::Tag(callback.clone())),
            (None, None) => return Need::Ready(Target::Unknown),
        };
        if body.empty {
            return Need::Ready(Target::Container {
                callback,
                content: String::new(),
                end: body.end,
            });
        }
        let chain = m.chain();
        let (content_end, end) = match m.find_matching_end_tag(name, body.end) {
            EndTag::Found { content_end, end } => (content_end, end),
            EndTag::Unterminated => (chain.end(), chain.end()),
            EndTag::NeedMore => return Need::More,
        };
        Need::Ready(Target::Container {
            callback,
            content: chain.slice(body.end, content_end),
            end,
        })
    }

    fn call(
        &mut self,
        construct: Construct,
        callback: Callback,
        args: Args,
        content: Option<String>,
        location: Location,
    ) -> Result<Outcome, ParseError> {
        let raw = self.top_chain().slice(construct.start, construct.end);
        let mut event =
            Event::new(construct.kind, construct.name.clone(), raw, location).with_args(args);
        event.content = content;
        let (reply, inserts) = self.invoke(callback, event)?;
        self.apply_reply(construct, reply, inserts)
    }

    fn unknown_tag(
        &mut self,
        construct: Construct,
        args: Args,
        location: Location,
    ) -> Result<Outcome, ParseError> {
        if !self.stack.top().suppress_generic
            && let Some(callback) = self.registry.tag_callback.clone()
        {
            let construct = Construct {
                kind: EventKind::AnyTag,
                ..construct
            };
            return self.call(construct, callback, args, None, location);
        }
        #[cfg(any(test, feature = "debug-stats"))]
        log::trace!(target: "markup.dispatch", "unknown tag {:?}", construct.name);
        if self.config.ignore_unknown {
            return Ok(self.literal_marker(construct.start, location));
        }
        self.apply_reply(construct, Reply::Keep, Vec::new())
    }

    /// Emit the marker at `start` as text and continue right after it.
    fn literal_marker(&mut self, start: Cursor, location: Location) -> Outcome {
        let chain = self.top_chain();
        let after = chain.step(start);
        let marker = chain.slice(start, after);
        self.consume_to(after);
        self.emit_data(&marker, location);
        Outcome::Reread
    }

    fn dispatch_entity(
        &mut self,
        start: Cursor,
        location: Location,
        finished: bool,
    ) -> Result<Outcome, ParseError> {
        let scan = {
            let m = self.matcher(finished);
            m.scan_entity(m.chain().step(start), None)
        };
        let (name, end) = match scan {
            EntityScan::NeedMore => return Ok(Outcome::Wait),
            EntityScan::NotEntity => return Ok(self.literal_marker(start, location)),
            EntityScan::Entity { name, end } => (name, end),
        };
        let suppress = self.stack.top().suppress_generic;
        let target = self.entity_target(&name, suppress);
        let construct = Construct {
            kind: EventKind::Entity,
            name,
            start,
            end,
            tag: None,
            spliced: Vec::new(),
        };
        match target {
            Some((kind, callback)) => {
                let construct = Construct { kind, ..construct };
                self.call(construct, callback, Args::new(), None, location)
            }
            None if self.config.ignore_unknown => Ok(self.literal_marker(start, location)),
            None => self.apply_reply(construct, Reply::Keep, Vec::new()),
        }
    }

    fn entity_target(&self, name: &str, suppress_generic: bool) -> Option<(EventKind, Callback)> {
        if let Some(callback) = self.registry.entities.get(name) {
            return Some((EventKind::Entity, callback.clone()));
        }
        if suppress_generic {
            return None;
        }
        self.registry
            .entity_callback
            .clone()
            .map(|callback| (EventKind::AnyEntity, callback))
    }

    /// Replace every splice argument with the arguments parsed from its
    /// entity-resolved value. Returns the resolved values in source order.
    fn splice_args(&mut self, mut args: Args) -> Result<(Args, Vec<String>), ParseError> {
        let Some(splice) = self.splice_name() else {
            return Ok((args, Vec::new()));
        };
        let found: Vec<(usize, String)> = args
            .iter()
            .enumerate()
            .filter(|(_, arg)| arg.name == splice)
            .map(|(idx, arg)| (idx, arg.value.clone().unwrap_or_default()))
            .collect();
        let mut resolved = Vec::with_capacity(found.len());
        for (index, value) in found.into_iter().rev() {
            let text = self.resolve_entities(&value, State::SpliceArgument)?;
            args.splice(index, self.parse_tag_args(&text));
            resolved.push(text);
        }
        resolved.reverse();
        Ok((args, resolved))
    }

    fn splice_name(&self) -> Option<String> {
        self.config
            .splice_arg
            .as_deref()
            .map(|name| self.config.normalize_name(name))
    }

    fn emit_span(&mut self, from: Cursor, to: Cursor) {
        if from < to {
            let text = self.top_chain().slice(from, to);
            self.output.push_literal(&text);
        }
    }

    /// Re-emit a passed-through tag with entities in its argument values
    /// resolved and splice arguments replaced by their values.
    pub(crate) fn emit_tag_resolving(
        &mut self,
        span: TagSpan,
        spliced: &[String],
        inserts: &mut Vec<String>,
    ) -> Result<(), ParseError> {
        let saved = self.context;
        let result = self.walk_tag(span, spliced, inserts);
        self.context = saved;
        result
    }

    fn walk_tag(
        &mut self,
        span: TagSpan,
        spliced: &[String],
        inserts: &mut Vec<String>,
    ) -> Result<(), ParseError> {
        self.emit_span(span.start, span.after_name);
        let mut spliced = spliced.iter();
        let mut pos = span.after_name;
        let mut state = State::Tag;
        let mut quote = QuoteState::default();
        loop {
            match self.walk_step(span, pos, state, quote) {
                WalkStep::Close => break,
                WalkStep::Advance {
                    to,
                    state: next,
                    quote: next_quote,
                } => {
                    self.emit_span(pos, to);
                    pos = to;
                    state = next;
                    quote = next_quote;
                }
                WalkStep::Splice { value_end } => {
                    match spliced.next() {
                        Some(text) => self.output.push_literal(text),
                        None => self.emit_span(pos, value_end),
                    }
                    pos = value_end;
                    state = State::Tag;
                    quote = QuoteState::default();
                }
                WalkStep::Entity {
                    at,
                    limit,
                    state: next,
                    quote: next_quote,
                } => {
                    self.emit_span(pos, at);
                    self.context = next;
                    pos = self.entity_in_tag(at, limit, inserts)?;
                    state = next;
                    quote = next_quote;
                }
            }
        }
        self.emit_span(span.close, span.end);
        Ok(())
    }

    fn walk_step(&self, span: TagSpan, pos: Cursor, state: State, quote: QuoteState) -> WalkStep {
        if pos >= span.close {
            return WalkStep::Close;
        }
        let cfg = &self.config;
        let m = self.matcher(true);
        let chain = m.chain();
        let advance = |to: Cursor, state: State| WalkStep::Advance {
            to: to.min(span.close),
            state,
            quote: QuoteState::default(),
        };
        let ready_or_close = |need: Need<Cursor>| match need {
            Need::Ready(at) => at,
            Need::More => span.close,
        };

        match state {
            State::Data | State::Tag | State::SpliceArgument => {
                let Some(ch) = chain.peek(pos) else {
                    return WalkStep::Close;
                };
                if self.markers.whitespace.contains(ch) {
                    return advance(ready_or_close(m.skip_ws(pos)), State::Tag);
                }
                if ch == cfg.equals {
                    let value_start = ready_or_close(m.skip_ws(chain.step(pos)));
                    return advance(value_start, State::TagArgument);
                }
                let (name, end) =
                    match m.scan_argument(pos, TokenMode::Name, span.matching, QuoteState::default(), false) {
                        ArgScan::Complete { text, end } | ArgScan::Entity { at: end, text, .. } => (text, end),
                        ArgScan::NeedMore => (String::new(), span.close),
                    };
                if end == pos {
                    return advance(chain.step(pos), State::Tag);
                }
                if self
                    .splice_name()
                    .is_some_and(|splice| cfg.normalize_name(&name) == splice)
                {
                    return WalkStep::Splice {
                        value_end: self.splice_value_end(&m, span, end),
                    };
                }
                advance(end, State::Tag)
            }
            State::TagArgument | State::TagQuotedArgument(_) => {
                match m.scan_argument(pos, TokenMode::Value, span.matching, quote, true) {
                    ArgScan::Complete { end, .. } => advance(end, State::Tag),
                    ArgScan::NeedMore => advance(span.close, State::Tag),
                    ArgScan::Entity { at, state: inner, .. } => {
                        let limit = match m.scan_argument(at, TokenMode::Value, span.matching, inner, false) {
                            ArgScan::Complete { end, .. } => end.min(span.close),
                            _ => span.close,
                        };
                        let state = match inner.quote {
                            Some(idx) => State::TagQuotedArgument(idx),
                            None => State::TagArgument,
                        };
                        WalkStep::Entity {
                            at,
                            limit,
                            state,
                            quote: inner,
                        }
                    }
                }
            }
        }
    }

    /// End of the splice argument whose name ends at `name_end`: past its
    /// value when it has one.
    fn splice_value_end(&self, m: &Matcher<'_>, span: TagSpan, name_end: Cursor) -> Cursor {
        let chain = m.chain();
        let Need::Ready(after_name) = m.skip_ws(name_end) else {
            return name_end;
        };
        if chain.peek(after_name) != Some(self.config.equals) {
            return name_end;
        }
        let Need::Ready(value_start) = m.skip_ws(chain.step(after_name)) else {
            return span.close;
        };
        if value_start >= span.close {
            return span.close;
        }
        match m.scan_argument(value_start, TokenMode::Value, span.matching, QuoteState::default(), false) {
            ArgScan::Complete { end, .. } => end.min(span.close),
            _ => span.close,
        }
    }

    /// Resolve the entity at `at` inside a tag being rebuilt; returns where
    /// the rebuild continues.
    fn entity_in_tag(
        &mut self,
        at: Cursor,
        limit: Cursor,
        inserts: &mut Vec<String>,
    ) -> Result<Cursor, ParseError> {
        let scan = {
            let m = self.matcher(true);
            m.scan_entity(m.chain().step(at), Some(limit))
        };
        let EntityScan::Entity { name, end } = scan else {
            let after = self.top_chain().step(at);
            self.emit_span(at, after);
            return Ok(after);
        };
        let raw = self.top_chain().slice(at, end);
        let location = self.location_at(at);
        self.resolve_entity_reply(&name, &raw, location, inserts)?;
        Ok(end)
    }

    /// Run the entity callback for an entity inside a tag and queue its
    /// replacement into the open output layer.
    fn resolve_entity_reply(
        &mut self,
        name: &str,
        raw: &str,
        location: Location,
        inserts: &mut Vec<String>,
    ) -> Result<(), ParseError> {
        let limit = self.config.max_retries;
        let mut retries = 0;
        let mut suppress = false;
        loop {
            let Some((kind, callback)) = self.entity_target(name, suppress) else {
                self.output.push_literal(raw);
                return Ok(());
            };
            let event = Event::new(kind, name.to_string(), raw.to_string(), location);
            let (reply, queued) = self.invoke(callback, event)?;
            inserts.extend(queued);
            match reply {
                Reply::Retry => {
                    retries += 1;
                    if retries > limit {
                        log::debug!(
                            target: "markup.dispatch",
                            "entity {name:?} inside a tag kept asking for retries"
                        );
                        return Err(ParseError::RetryLoop {
                            kind,
                            name: name.to_string(),
                            limit,
                        });
                    }
                    suppress = kind == EventKind::AnyEntity;
                    continue;
                }
                Reply::Keep => self.output.push_literal(raw),
                Reply::Text(text) if self.config.reparse_strings => {
                    let resolved = self.resolve_entities(&text, self.context)?;
                    if !resolved.is_empty() {
                        self.output.push_value(Value::Text(resolved));
                    }
                }
                Reply::Text(text) => {
                    if !text.is_empty() {
                        self.output.push_value(Value::Text(text));
                    }
                }
                Reply::Values(values) => {
                    self.check_values(kind, &values)?;
                    for value in values {
                        self.output.push_value(value);
                    }
                }
            }
            return Ok(());
        }
    }
}
