//! Driver loop: runs the dispatcher over the parse stack and applies
//! callback replies.

use crate::callback::{Callback, Event, EventKind, Reply};
use crate::chain::{Chain, Cursor};
use crate::dispatch::State;
use crate::error::ParseError;
use crate::frame::{Frame, FrameFlags, Location};
use crate::matcher::{Matcher, TagMatching};
use crate::parser::{CallbackGuard, PassGuard, Parser};
use crate::value::Value;
use std::rc::Rc;

/// What the dispatcher did with the construct at the top frame's cursor.
#[derive(Debug)]
pub(crate) enum Outcome {
    /// The top frame is exhausted.
    Done,
    /// The construct needs more input than is buffered.
    Wait,
    /// Progress was made; look at the top frame again.
    Reread,
    /// The callback asked for the construct to be processed again.
    Retry {
        kind: EventKind,
        name: String,
        /// Skip the generic callback on the next attempt.
        generic: bool,
    },
}

/// Span of a matched construct, plus the tag layout needed to re-emit it
/// with entities resolved.
#[derive(Clone, Debug)]
pub(crate) struct Construct {
    pub kind: EventKind,
    pub name: String,
    pub start: Cursor,
    pub end: Cursor,
    pub tag: Option<TagSpan>,
    /// Entity-resolved splice argument values, in source order.
    pub spliced: Vec<String>,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct TagSpan {
    pub start: Cursor,
    /// Just past the tag name.
    pub after_name: Cursor,
    /// Start of the tag end.
    pub close: Cursor,
    pub end: Cursor,
    pub matching: TagMatching,
}

impl Parser {
    /// One parse pass over everything buffered.
    pub(crate) fn run_pass(&mut self) -> Result<(), ParseError> {
        if self.running.get() {
            return Err(ParseError::Reentrant);
        }
        let _pass = PassGuard::enter(&self.running);
        self.stats.passes += 1;
        #[cfg(any(test, feature = "debug-stats"))]
        log::trace!(
            target: "markup.driver",
            "parse pass {} (finished={}, depth={})",
            self.stats.passes,
            self.finished,
            self.stack.depth()
        );
        self.drive(0)?;
        while self.finished && !self.pending.is_empty() {
            self.flush_data()?;
            self.drive(0)?;
        }
        let consumed = self.stack.bottom().cursor;
        self.feed.release(consumed);
        Ok(())
    }

    /// Dispatch until the stack shrinks to `floor` frames or the outer frame
    /// suspends on incomplete input.
    pub(crate) fn drive(&mut self, floor: usize) -> Result<(), ParseError> {
        loop {
            match self.dispatch()? {
                Outcome::Reread => {}
                Outcome::Done => {
                    if self.stack.depth() == 1 {
                        return Ok(());
                    }
                    let _ = self.stack.pop();
                    #[cfg(any(test, feature = "debug-stats"))]
                    log::trace!(target: "markup.driver", "pop frame; depth {}", self.stack.depth());
                    if self.stack.depth() <= floor {
                        return Ok(());
                    }
                }
                Outcome::Wait => {
                    if !self.frame_finished() {
                        return Ok(());
                    }
                    self.flush_unterminated();
                }
                Outcome::Retry {
                    kind,
                    name,
                    generic,
                } => {
                    let limit = self.config.max_retries;
                    let frame = self.stack.top_mut();
                    frame.retries += 1;
                    if frame.retries > limit {
                        return Err(ParseError::RetryLoop { kind, name, limit });
                    }
                    frame.suppress_generic = generic;
                    self.stats.retries += 1;
                    #[cfg(any(test, feature = "debug-stats"))]
                    log::trace!(target: "markup.driver", "retry {kind} {name:?} (generic suppressed: {generic})");
                }
            }
        }
    }

    pub(crate) fn top_chain(&self) -> &Chain {
        match &self.stack.top().local {
            Some(chain) => chain,
            None => &self.feed,
        }
    }

    /// No more input will arrive for the top frame.
    pub(crate) fn frame_finished(&self) -> bool {
        self.stack.top().local.is_some() || self.finished
    }

    pub(crate) fn matcher(&self, finished: bool) -> Matcher<'_> {
        Matcher::new(
            self.top_chain(),
            &self.config,
            &self.markers,
            &self.registry,
            finished,
        )
    }

    /// Location of `at` in the top frame.
    pub(crate) fn location_at(&self, at: Cursor) -> Location {
        let frame = self.stack.top();
        let mut location = frame.location;
        self.top_chain()
            .for_each_slice(frame.cursor, at, |part| location.advance(part));
        location
    }

    /// Advance the top frame past `end`.
    pub(crate) fn consume_to(&mut self, end: Cursor) {
        let location = self.location_at(end);
        let frame = self.stack.top_mut();
        frame.cursor = end;
        frame.location = location;
        frame.retries = 0;
        frame.suppress_generic = false;
    }

    /// Finished input ended inside a construct: the rest is literal text.
    fn flush_unterminated(&mut self) {
        let chain = self.top_chain();
        let (cursor, end) = (self.stack.top().cursor, chain.end());
        let text = chain.slice(cursor, end);
        #[cfg(any(test, feature = "debug-stats"))]
        log::trace!(
            target: "markup.driver",
            "unterminated construct at end of input; {} bytes passed through",
            text.len()
        );
        let location = self.stack.top().location;
        self.consume_to(end);
        self.emit_data(&text, location);
    }

    /// Literal text from the `Data` state.
    pub(crate) fn emit_data(&mut self, text: &str, location: Location) {
        if text.is_empty() {
            return;
        }
        if self.stack.top().flags.ignore_data || self.registry.data_callback.is_none() {
            self.output.push_literal(text);
            return;
        }
        if self.pending.is_empty() {
            self.pending_at = location;
        }
        self.pending.push_str(text);
    }

    /// Hand pending literal text to the data callback.
    pub(crate) fn flush_data(&mut self) -> Result<(), ParseError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let text = std::mem::take(&mut self.pending);
        let Some(callback) = self.registry.data_callback.clone() else {
            self.output.push_literal(&text);
            return Ok(());
        };
        let event = Event::new(EventKind::Data, String::new(), text.clone(), self.pending_at)
            .with_content(text.clone());
        let (reply, inserts) = match self.invoke(callback, event) {
            Ok(result) => result,
            Err(err) => {
                self.pending = text;
                return Err(err);
            }
        };
        match reply {
            Reply::Keep => self.output.push_literal(&text),
            Reply::Retry => {
                self.pending = text;
                return Err(ParseError::InvalidResult {
                    kind: EventKind::Data,
                    reason: "data callbacks cannot retry",
                });
            }
            Reply::Text(replacement) => {
                if !replacement.is_empty() {
                    self.output.push_value(Value::Text(replacement));
                }
            }
            Reply::Values(values) => {
                if let Err(err) = self.check_values(EventKind::Data, &values) {
                    self.pending = text;
                    return Err(err);
                }
                for value in values {
                    self.output.push_value(value);
                }
            }
        }
        self.push_frames(inserts, None)
    }

    /// Call `callback` with `event`; returns the reply and any text the
    /// callback queued with `feed_insert`.
    pub(crate) fn invoke(
        &mut self,
        callback: Callback,
        mut event: Event,
    ) -> Result<(Reply, Vec<String>), ParseError> {
        let func = match callback {
            Callback::Literal(text) => return Ok((Reply::Text(text.to_string()), Vec::new())),
            Callback::Function(func) => func,
            Callback::Bound { func, extra } => {
                event.extra.extend(extra.iter().cloned());
                func
            }
        };
        event.extra.extend(self.registry.extra.iter().cloned());
        let kind = event.kind;
        let name = event.name.clone();
        #[cfg(any(test, feature = "debug-stats"))]
        log::trace!(
            target: "markup.dispatch",
            "invoke {kind} {name:?} at line {} column {}",
            event.location.line,
            event.location.column()
        );

        let event = Rc::new(event);
        let previous = self.current.replace(Rc::clone(&event));
        let outer_inserts = std::mem::take(&mut self.inserts);
        let result = {
            let _guard = CallbackGuard::enter(&self.in_callback);
            func(self, &event)
        };
        self.current = previous;
        let inserts = std::mem::replace(&mut self.inserts, outer_inserts);
        self.stats.callbacks += 1;
        match result {
            Ok(reply) => Ok((reply, inserts)),
            Err(source) => Err(ParseError::Callback { kind, name, source }),
        }
    }

    pub(crate) fn check_values(&self, kind: EventKind, values: &[Value]) -> Result<(), ParseError> {
        if !self.config.mixed_mode && values.iter().any(|value| !value.is_text()) {
            return Err(ParseError::InvalidResult {
                kind,
                reason: "non-text value outside mixed mode",
            });
        }
        Ok(())
    }

    fn ensure_room(&self, frames: usize) -> Result<(), ParseError> {
        let limit = self.config.max_stack_depth;
        let depth = self.stack.depth() + frames;
        if frames > 0 && depth > limit {
            return Err(ParseError::RecursionLimit { depth, limit });
        }
        Ok(())
    }

    /// Push frames for inserted text and a reparsed reply. The reply is
    /// parsed first, then the inserts in the order they were queued.
    pub(crate) fn push_frames(
        &mut self,
        inserts: Vec<String>,
        reparse: Option<String>,
    ) -> Result<(), ParseError> {
        let flags = FrameFlags {
            owns_feed: true,
            ..self.stack.top().flags
        };
        let limit = self.config.max_stack_depth;
        for text in inserts.into_iter().rev().chain(reparse) {
            if text.is_empty() {
                continue;
            }
            self.stack.push(Frame::injected(&text, flags), limit)?;
            self.note_push();
            #[cfg(any(test, feature = "debug-stats"))]
            log::trace!(target: "markup.driver", "push frame; depth {}", self.stack.depth());
        }
        Ok(())
    }

    /// Apply a callback reply to `construct`, which has not been consumed.
    ///
    /// Every check that can fail runs before the construct is consumed, so
    /// an error leaves the input in place.
    pub(crate) fn apply_reply(
        &mut self,
        construct: Construct,
        reply: Reply,
        mut inserts: Vec<String>,
    ) -> Result<Outcome, ParseError> {
        inserts.retain(|text| !text.is_empty());
        match reply {
            Reply::Retry => {
                self.ensure_room(inserts.len())?;
                self.push_frames(inserts, None)?;
                let generic = matches!(construct.kind, EventKind::AnyTag | EventKind::AnyEntity);
                return Ok(Outcome::Retry {
                    kind: construct.kind,
                    name: construct.name,
                    generic,
                });
            }
            Reply::Keep => {
                self.output.begin();
                let kept = self
                    .keep(&construct, &mut inserts)
                    .and_then(|()| self.ensure_room(inserts.len()));
                if let Err(err) = kept {
                    self.output.rollback();
                    return Err(err);
                }
                self.output.commit();
                self.consume_to(construct.end);
                self.push_frames(inserts, None)?;
            }
            Reply::Text(text) => {
                let reparse = self.config.reparse_strings && !text.is_empty();
                self.ensure_room(inserts.len() + usize::from(reparse))?;
                self.consume_to(construct.end);
                if reparse {
                    self.push_frames(inserts, Some(text))?;
                } else {
                    if !text.is_empty() {
                        self.output.push_value(Value::Text(text));
                    }
                    self.push_frames(inserts, None)?;
                }
            }
            Reply::Values(values) => {
                self.check_values(construct.kind, &values)?;
                self.ensure_room(inserts.len())?;
                self.consume_to(construct.end);
                for value in values {
                    self.output.push_value(value);
                }
                self.push_frames(inserts, None)?;
            }
        }
        Ok(Outcome::Reread)
    }

    /// Pass the construct through. Tags are re-emitted with entities inside
    /// their arguments resolved when any entity handling is registered, and
    /// with splice arguments replaced by their values.
    fn keep(&mut self, construct: &Construct, inserts: &mut Vec<String>) -> Result<(), ParseError> {
        let rebuild = self.markers.entities_active || !construct.spliced.is_empty();
        match construct.tag {
            Some(span) if rebuild => self.emit_tag_resolving(span, &construct.spliced, inserts),
            _ => {
                let raw = self.top_chain().slice(construct.start, construct.end);
                self.output.push_literal(&raw);
                Ok(())
            }
        }
    }

    /// Resolve entities in `text` with an entity-only sub-parse whose output
    /// is captured instead of queued.
    pub(crate) fn resolve_entities(&mut self, text: &str, context: State) -> Result<String, ParseError> {
        if !self.markers.entities_active || !text.contains(self.config.entity_start) {
            return Ok(text.to_string());
        }
        let floor = self.stack.depth();
        self.stack.push(
            Frame::injected(text, FrameFlags::entities_only()),
            self.config.max_stack_depth,
        )?;
        self.note_push();
        let saved = std::mem::replace(&mut self.context, context);
        self.output.begin();
        let result = self.drive(floor);
        self.context = saved;
        if let Err(err) = result {
            self.output.rollback();
            while self.stack.depth() > floor {
                let _ = self.stack.pop();
            }
            return Err(err);
        }
        let mut resolved = String::new();
        for item in self.output.take_layer() {
            match item.value {
                Value::Text(part) => resolved.push_str(&part),
                _ => {
                    return Err(ParseError::InvalidResult {
                        kind: EventKind::Entity,
                        reason: "entity inside an argument produced a non-text value",
                    });
                }
            }
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CallbackError;
    use std::cell::RefCell;

    fn text_of(parser: &mut Parser) -> String {
        parser.read().iter().map(ToString::to_string).collect()
    }

    #[test]
    fn callback_error_leaves_construct_unconsumed() {
        let fail = Rc::new(RefCell::new(true));
        let mut parser = Parser::new();
        let flag = Rc::clone(&fail);
        parser.add_tag(
            "x",
            Callback::func(move |_, _| {
                if *flag.borrow() {
                    Err(CallbackError::new("not yet"))
                } else {
                    Ok(Reply::text("X"))
                }
            }),
        );
        let err = parser.feed("a<x>b").unwrap_err();
        assert!(matches!(err, ParseError::Callback { kind: EventKind::Tag, .. }));
        assert_eq!(text_of(&mut parser), "a");

        *fail.borrow_mut() = false;
        parser.finish().expect("second attempt succeeds");
        assert_eq!(text_of(&mut parser), "Xb");
    }

    #[test]
    fn reparse_depth_is_bounded() {
        let mut parser = Parser::new();
        parser.set_reparse_strings(true);
        parser.add_tag("loop", Callback::literal("<loop>"));
        let err = parser.feed("<loop>").unwrap_err();
        assert!(matches!(err, ParseError::RecursionLimit { limit: 10, .. }));
    }

    #[test]
    fn endless_retry_is_reported() {
        let mut parser = Parser::new();
        parser.add_tag("again", Callback::func(|_, _| Ok(Reply::Retry)));
        let err = parser.feed("<again>").unwrap_err();
        assert!(matches!(
            err,
            ParseError::RetryLoop { kind: EventKind::Tag, limit: 16, .. }
        ));
    }

    #[test]
    fn inserts_follow_the_replaced_construct() {
        let mut parser = Parser::new();
        parser.set_reparse_strings(true);
        parser.add_tag(
            "a",
            Callback::func(|parser, _| {
                parser.feed_insert("1<b>")?;
                parser.feed_insert("2")?;
                Ok(Reply::text("<b>"))
            }),
        );
        parser.add_tag("b", Callback::literal("B"));
        parser.feed("[<a>]").expect("feed");
        parser.finish().expect("finish");
        assert_eq!(text_of(&mut parser), "[B1B2]");
    }

    #[test]
    fn unterminated_tag_is_flushed_at_finish() {
        let mut parser = Parser::new();
        parser.add_tag("a", Callback::literal("A"));
        parser.feed(r#"x <a title="open"#).expect("feed");
        assert_eq!(text_of(&mut parser), "x ");
        parser.finish().expect("finish");
        assert_eq!(text_of(&mut parser), r#"<a title="open"#);
    }
}
