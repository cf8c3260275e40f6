//! Parser state and public API.
//!
//! Input arrives through `feed`/`push`/`feed_bytes`; each `feed` runs one
//! parse pass that dispatches every complete construct and parks at the first
//! one that needs more input. `finish` runs a final pass that forces every
//! remaining construct to a decision.

use crate::args::Args;
use crate::callback::{Callback, Event};
use crate::chain::Chain;
use crate::charset::Markers;
use crate::config::{Config, XmlTagSyntax};
use crate::decoder::ByteStreamDecoder;
use crate::dispatch::State;
use crate::error::{ParseError, UsageError};
use crate::frame::{Frame, FrameFlags, Location, Stack};
use crate::matcher::{Matcher, Need};
use crate::output::Output;
use crate::registry::{Registry, TableKind};
use crate::value::Value;
use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Counters collected across parse passes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ParserStats {
    pub passes: u64,
    pub callbacks: u64,
    pub retries: u64,
    pub frames_pushed: u64,
    pub max_depth: usize,
}

/// Incremental, callback-driven markup tokenizer.
pub struct Parser {
    pub(crate) config: Config,
    pub(crate) markers: Markers,
    pub(crate) registry: Registry,
    /// Unconsumed outer input; viewed by the bottom frame.
    pub(crate) feed: Chain,
    pub(crate) stack: Stack,
    pub(crate) output: Output,
    /// Literal text waiting for the data callback.
    pub(crate) pending: String,
    pub(crate) pending_at: Location,
    /// Text queued by `feed_insert` during the running callback.
    pub(crate) inserts: Vec<String>,
    pub(crate) finished: bool,
    /// Construct handed to the running callback.
    pub(crate) current: Option<Rc<Event>>,
    /// Dispatcher state the running callback was invoked from.
    pub(crate) context: State,
    pub(crate) in_callback: Rc<Cell<usize>>,
    pub(crate) running: Rc<Cell<bool>>,
    decoder: ByteStreamDecoder,
    pub(crate) stats: ParserStats,
}

/// Marks a parse pass as running until dropped.
pub(crate) struct PassGuard {
    flag: Rc<Cell<bool>>,
}

impl PassGuard {
    pub(crate) fn enter(flag: &Rc<Cell<bool>>) -> Self {
        flag.set(true);
        Self {
            flag: Rc::clone(flag),
        }
    }
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}

/// Counts nested callback invocations until dropped.
pub(crate) struct CallbackGuard {
    depth: Rc<Cell<usize>>,
}

impl CallbackGuard {
    pub(crate) fn enter(depth: &Rc<Cell<usize>>) -> Self {
        depth.set(depth.get() + 1);
        Self {
            depth: Rc::clone(depth),
        }
    }
}

impl Drop for CallbackGuard {
    fn drop(&mut self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! flag_setters {
    ($($(#[$doc:meta])* $setter:ident => $field:ident;)*) => {
        $(
            $(#[$doc])*
            pub fn $setter(&mut self, on: bool) {
                self.config.$field = on;
                self.refresh();
            }
        )*
    };
}

impl Parser {
    pub fn new() -> Self {
        let config = Config::default();
        let registry = Registry::default();
        let feed = Chain::new();
        Self {
            markers: Markers::derive(&config, registry.entities_active()),
            config,
            registry,
            stack: Stack::new(&feed),
            feed,
            output: Output::new(),
            pending: String::new(),
            pending_at: Location::start(),
            inserts: Vec::new(),
            finished: false,
            current: None,
            context: State::Data,
            in_callback: Rc::new(Cell::new(0)),
            running: Rc::new(Cell::new(false)),
            decoder: ByteStreamDecoder::new(),
            stats: ParserStats::default(),
        }
    }

    pub fn with_config(config: Config) -> Result<Self, UsageError> {
        let mut parser = Self::new();
        parser.set_config(config)?;
        Ok(parser)
    }

    /// A fresh parser sharing this one's configuration and registrations.
    ///
    /// Tables are shared copy-on-write: registering on either parser leaves
    /// the other untouched.
    pub fn clone_template(&self) -> Self {
        let mut parser = Self::new();
        parser.config = self.config.clone();
        parser.registry = self.registry.clone();
        parser.refresh();
        parser
    }

    // ---- configuration ----

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn set_config(&mut self, config: Config) -> Result<(), UsageError> {
        config.validate()?;
        self.config = config;
        self.refresh();
        Ok(())
    }

    /// Edit the configuration in place; rejected edits leave it unchanged.
    pub fn update_config(&mut self, edit: impl FnOnce(&mut Config)) -> Result<(), UsageError> {
        let mut config = self.config.clone();
        edit(&mut config);
        self.set_config(config)
    }

    flag_setters! {
        /// Lowercase tag names (and fold registered names) from now on.
        set_case_insensitive_tag => case_insensitive_tag;
        set_lazy_argument_end => lazy_argument_end;
        set_lazy_entity_end => lazy_entity_end;
        set_nestling_entity_end => nestling_entity_end;
        set_match_tag => match_tag;
        set_balance_containers => balance_containers;
        set_ignore_unknown => ignore_unknown;
        set_ignore_tags => ignore_tags;
        set_reparse_strings => reparse_strings;
        set_ws_before_tag_name => ws_before_tag_name;
    }

    /// Allow non-text output values. Text reads are unavailable while set.
    pub fn set_mixed_mode(&mut self, on: bool) {
        self.config.mixed_mode = on;
    }

    pub fn set_xml_tag_syntax(&mut self, syntax: XmlTagSyntax) {
        self.config.xml_tag_syntax = syntax;
        self.refresh();
    }

    pub fn set_max_stack_depth(&mut self, depth: usize) -> Result<(), UsageError> {
        self.update_config(|config| config.max_stack_depth = depth)
    }

    pub fn set_splice_arg(&mut self, name: Option<&str>) -> Result<(), UsageError> {
        self.update_config(|config| config.splice_arg = name.map(str::to_string))
    }

    /// Recompute everything derived from configuration and registrations.
    pub(crate) fn refresh(&mut self) {
        if self.config.case_insensitive_tag {
            self.registry.fold_tag_names();
        }
        self.markers = Markers::derive(&self.config, self.registry.entities_active());
    }

    // ---- registration ----

    fn register(&mut self, kind: TableKind, name: &str, callback: Callback) {
        let name = match kind {
            TableKind::Entities => name.to_string(),
            _ => self.config.normalize_name(name),
        };
        log::debug!(target: "markup.registry", "register {kind:?} {name:?}");
        let _ = self.registry.table_mut(kind).insert(name, callback);
        self.refresh();
    }

    fn unregister(&mut self, kind: TableKind, name: &str) -> bool {
        let name = match kind {
            TableKind::Entities => name.to_string(),
            _ => self.config.normalize_name(name),
        };
        if !self.registry.table(kind).contains_key(&name) {
            return false;
        }
        let removed = self.registry.table_mut(kind).remove(&name).is_some();
        self.refresh();
        removed
    }

    fn clear_table(&mut self, kind: TableKind) {
        if !self.registry.table(kind).is_empty() {
            self.registry.table_mut(kind).clear();
            self.refresh();
        }
    }

    fn names(&self, kind: TableKind) -> Vec<String> {
        self.registry.table(kind).keys().cloned().collect()
    }

    /// Register a callback for a standalone tag. End tags are registered
    /// with their marker (`"/b"`).
    pub fn add_tag(&mut self, name: &str, callback: Callback) {
        self.register(TableKind::Tags, name, callback);
    }

    pub fn add_tags<'n>(&mut self, tags: impl IntoIterator<Item = (&'n str, Callback)>) {
        for (name, callback) in tags {
            self.add_tag(name, callback);
        }
    }

    pub fn remove_tag(&mut self, name: &str) -> bool {
        self.unregister(TableKind::Tags, name)
    }

    pub fn clear_tags(&mut self) {
        self.clear_table(TableKind::Tags);
    }

    pub fn tags(&self) -> Vec<String> {
        self.names(TableKind::Tags)
    }

    /// Register a callback for a start tag plus content plus end tag.
    pub fn add_container(&mut self, name: &str, callback: Callback) {
        self.register(TableKind::Containers, name, callback);
    }

    pub fn add_containers<'n>(&mut self, containers: impl IntoIterator<Item = (&'n str, Callback)>) {
        for (name, callback) in containers {
            self.add_container(name, callback);
        }
    }

    pub fn remove_container(&mut self, name: &str) -> bool {
        self.unregister(TableKind::Containers, name)
    }

    pub fn clear_containers(&mut self) {
        self.clear_table(TableKind::Containers);
    }

    pub fn containers(&self) -> Vec<String> {
        self.names(TableKind::Containers)
    }

    /// Register a callback for an entity name (without start and end markers).
    pub fn add_entity(&mut self, name: &str, callback: Callback) {
        self.register(TableKind::Entities, name, callback);
    }

    pub fn add_entities<'n>(&mut self, entities: impl IntoIterator<Item = (&'n str, Callback)>) {
        for (name, callback) in entities {
            self.add_entity(name, callback);
        }
    }

    pub fn remove_entity(&mut self, name: &str) -> bool {
        self.unregister(TableKind::Entities, name)
    }

    pub fn clear_entities(&mut self) {
        self.clear_table(TableKind::Entities);
    }

    pub fn entities(&self) -> Vec<String> {
        self.names(TableKind::Entities)
    }

    /// Register a quote tag: `name` right after the tag start opens it, and
    /// `end` followed by the tag end closes it. The body is not parsed.
    pub fn add_quote_tag(&mut self, name: &str, callback: Callback, end: &str) {
        let name = self.config.normalize_name(name);
        log::debug!(target: "markup.registry", "register quote tag {name:?} ending {end:?}");
        self.registry
            .quote_tags_mut()
            .insert(name, callback, end.to_string());
    }

    pub fn remove_quote_tag(&mut self, name: &str) -> bool {
        let name = self.config.normalize_name(name);
        if self.registry.quote_tags.get(&name).is_none() {
            return false;
        }
        self.registry.quote_tags_mut().remove(&name)
    }

    pub fn clear_quote_tags(&mut self) {
        if !self.registry.quote_tags.is_empty() {
            *self.registry.quote_tags_mut() = Default::default();
        }
    }

    /// `(name, end)` pairs of the registered quote tags.
    pub fn quote_tags(&self) -> Vec<(String, String)> {
        self.registry.quote_tags.entries()
    }

    /// Generic callback for tags that have no registration.
    pub fn set_tag_callback(&mut self, callback: Option<Callback>) {
        self.registry.tag_callback = callback;
    }

    /// Callback for literal text between constructs.
    pub fn set_data_callback(&mut self, callback: Option<Callback>) {
        self.registry.data_callback = callback;
    }

    /// Generic callback for entities that have no registration.
    pub fn set_entity_callback(&mut self, callback: Option<Callback>) {
        self.registry.entity_callback = callback;
        self.refresh();
    }

    /// Values appended to every callback's `Event::extra`.
    pub fn set_extra(&mut self, extra: impl IntoIterator<Item = Value>) {
        self.registry.extra = Rc::new(extra.into_iter().collect());
    }

    // ---- input ----

    /// Append `text` and run a parse pass.
    pub fn feed(&mut self, text: &str) -> Result<(), ParseError> {
        if self.running.get() {
            return Err(ParseError::Reentrant);
        }
        self.feed.push(text);
        self.run_pass()
    }

    /// Append `text` without parsing. Usable from inside callbacks; the
    /// running pass picks the input up.
    pub fn push(&mut self, text: &str) {
        self.feed.push(text);
    }

    /// Append raw UTF-8 bytes (a sequence may be split between calls) and
    /// run a parse pass.
    pub fn feed_bytes(&mut self, bytes: &[u8]) -> Result<(), ParseError> {
        if self.running.get() {
            return Err(ParseError::Reentrant);
        }
        let mut text = String::new();
        self.decoder.decode(bytes, &mut text);
        self.feed.push(&text);
        self.run_pass()
    }

    /// Parse `text` before the rest of the input.
    ///
    /// From inside a callback the text is parsed right after the construct
    /// being handled; otherwise it is parsed immediately.
    pub fn feed_insert(&mut self, text: &str) -> Result<(), ParseError> {
        if self.in_callback.get() > 0 {
            self.inserts.push(text.to_string());
            return Ok(());
        }
        if self.running.get() {
            return Err(ParseError::Reentrant);
        }
        if !text.is_empty() {
            self.stack.push(
                Frame::injected(text, FrameFlags::reparse()),
                self.config.max_stack_depth,
            )?;
            self.note_push();
        }
        self.run_pass()
    }

    /// Mark the end of input and run the final pass.
    pub fn finish(&mut self) -> Result<(), ParseError> {
        if self.running.get() {
            return Err(ParseError::Reentrant);
        }
        let mut tail = String::new();
        self.decoder.finish(&mut tail);
        self.feed.push(&tail);
        self.finished = true;
        self.run_pass()
    }

    /// Drop buffered input, frames and queued output; keep configuration and
    /// registrations.
    pub fn reset(&mut self) -> Result<(), ParseError> {
        if self.running.get() {
            return Err(ParseError::Reentrant);
        }
        self.feed.clear();
        self.stack.reset(&self.feed);
        self.output.clear();
        self.pending.clear();
        self.pending_at = Location::start();
        self.inserts.clear();
        self.finished = false;
        self.current = None;
        self.context = State::Data;
        self.decoder = ByteStreamDecoder::new();
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    // ---- output ----

    /// Drain all queued output values.
    pub fn read(&mut self) -> Vec<Value> {
        self.output.read_items(usize::MAX)
    }

    pub fn read_items(&mut self, max: usize) -> Vec<Value> {
        self.output.read_items(max)
    }

    /// Drain up to `max_chars` characters of text output (plain mode only).
    pub fn read_text(&mut self, max_chars: usize) -> Result<String, UsageError> {
        if self.config.mixed_mode {
            return Err(UsageError::MixedMode);
        }
        Ok(self.output.read_text(max_chars))
    }

    /// Number of queued output values.
    pub fn pending_output(&self) -> usize {
        self.output.len()
    }

    /// Queue values directly, bypassing parsing.
    pub fn write_out(&mut self, values: impl IntoIterator<Item = Value>) -> Result<(), UsageError> {
        let values: Vec<Value> = values.into_iter().collect();
        if !self.config.mixed_mode && values.iter().any(|value| !value.is_text()) {
            return Err(UsageError::NotMixedMode);
        }
        for value in values {
            self.output.push_value(value);
        }
        Ok(())
    }

    // ---- callback-time queries ----

    fn event(&self, query: &'static str) -> Result<&Rc<Event>, UsageError> {
        match &self.current {
            Some(event) if self.in_callback.get() > 0 => Ok(event),
            _ => Err(UsageError::OutsideCallback { query }),
        }
    }

    /// The construct handed to the running callback.
    pub fn current_event(&self) -> Result<Rc<Event>, UsageError> {
        self.event("current_event").map(Rc::clone)
    }

    /// Matched raw text of the current construct.
    pub fn current(&self) -> Result<String, UsageError> {
        self.event("current").map(|event| event.raw.clone())
    }

    pub fn tag_name(&self) -> Result<String, UsageError> {
        self.event("tag_name").map(|event| event.name.clone())
    }

    /// Arguments of the current tag; valueless ones map to `default` (or
    /// their own name).
    pub fn tag_args(&self, default: Option<&str>) -> Result<BTreeMap<String, String>, UsageError> {
        self.event("tag_args").map(|event| event.args.to_map(default))
    }

    pub fn tag_content(&self) -> Result<Option<String>, UsageError> {
        self.event("tag_content").map(|event| event.content.clone())
    }

    /// Name, arguments and content of the current construct.
    pub fn tag(&self) -> Result<(String, Args, Option<String>), UsageError> {
        self.event("tag")
            .map(|event| (event.name.clone(), event.args.clone(), event.content.clone()))
    }

    pub fn at(&self) -> Result<Location, UsageError> {
        self.event("at").map(|event| event.location)
    }

    pub fn at_line(&self) -> Result<usize, UsageError> {
        self.event("at_line").map(|event| event.location.line)
    }

    pub fn at_byte(&self) -> Result<usize, UsageError> {
        self.event("at_byte").map(|event| event.location.byte)
    }

    pub fn at_column(&self) -> Result<usize, UsageError> {
        self.event("at_column").map(|event| event.location.column())
    }

    /// Dispatcher state the running callback was invoked from; entity
    /// callbacks see an argument state when resolving inside a tag.
    pub fn context(&self) -> Result<State, UsageError> {
        self.event("context").map(|_| self.context)
    }

    // ---- helpers ----

    /// Name of the tag in `text` (the text after the tag start).
    pub fn parse_tag_name(&self, text: &str) -> String {
        let chain = Chain::from_text(text);
        let matcher = Matcher::new(&chain, &self.config, &self.markers, &self.registry, true);
        match matcher.scan_tag_name(chain.start()) {
            Need::Ready(head) => self.config.normalize_name(&head.name),
            Need::More => String::new(),
        }
    }

    /// Parse `text` as a tag's argument list using the current quoting and
    /// argument rules.
    pub fn parse_tag_args(&self, text: &str) -> Args {
        let chain = Chain::from_text(text);
        let matcher = Matcher::new(&chain, &self.config, &self.markers, &self.registry, true);
        match matcher.scan_tag_body(chain.start(), matcher.default_matching()) {
            Need::Ready(body) => body.args,
            Need::More => Args::new(),
        }
    }

    /// Number of stacked parse frames, the outer feed included.
    pub fn depth(&self) -> usize {
        self.stack.depth()
    }

    pub fn stats(&self) -> &ParserStats {
        &self.stats
    }

    pub(crate) fn note_push(&mut self) {
        self.stats.frames_pushed += 1;
        self.stats.max_depth = self.stats.max_depth.max(self.stack.depth());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::Reply;

    #[test]
    fn queries_outside_callbacks_are_usage_errors() {
        let parser = Parser::new();
        assert_eq!(
            parser.tag_name(),
            Err(UsageError::OutsideCallback { query: "tag_name" })
        );
        assert!(parser.at_line().is_err());
        assert!(parser.context().is_err());
    }

    #[test]
    fn template_clone_shares_registrations_copy_on_write() {
        let mut template = Parser::new();
        template.add_tag("br", Callback::literal("\n"));
        let mut copy = template.clone_template();
        copy.add_tag("hr", Callback::literal("--"));
        assert_eq!(template.tags(), vec!["br".to_string()]);
        assert_eq!(copy.tags(), vec!["br".to_string(), "hr".to_string()]);
    }

    #[test]
    fn case_insensitive_registration_folds_names() {
        let mut parser = Parser::new();
        parser.add_container("B", Callback::literal(""));
        parser.set_case_insensitive_tag(true);
        assert_eq!(parser.containers(), vec!["b".to_string()]);
        parser.add_tag("BR", Callback::literal(""));
        assert!(parser.remove_tag("Br"));
    }

    #[test]
    fn invalid_config_is_rejected_without_change() {
        let mut parser = Parser::new();
        let err = parser.update_config(|config| config.tag_end = '<').unwrap_err();
        assert!(matches!(err, UsageError::InvalidConfig { .. }));
        assert_eq!(parser.config().tag_end, '>');
    }

    #[test]
    fn parse_tag_args_uses_current_rules() {
        let parser = Parser::new();
        let args = parser.parse_tag_args(r#"a=1 b="two words" c"#);
        assert_eq!(args.to_string(), r#"[a="1" b="two words" c]"#);
        assert_eq!(parser.parse_tag_name("img src=x"), "img");
    }

    #[test]
    fn write_out_requires_mixed_mode_for_non_text() {
        let mut parser = Parser::new();
        assert_eq!(
            parser.write_out([Value::Int(1)]),
            Err(UsageError::NotMixedMode)
        );
        parser.set_mixed_mode(true);
        parser.write_out([Value::Int(1)]).expect("mixed mode accepts ints");
        assert_eq!(parser.read_text(10), Err(UsageError::MixedMode));
        assert_eq!(parser.read(), vec![Value::Int(1)]);
    }

    #[test]
    fn feed_from_callback_is_refused_but_push_is_not() {
        let mut parser = Parser::new();
        parser.add_tag(
            "more",
            Callback::func(|parser, _| {
                assert!(matches!(parser.feed("x"), Err(ParseError::Reentrant)));
                assert!(matches!(parser.reset(), Err(ParseError::Reentrant)));
                parser.push("<b>");
                Ok(Reply::Text("[more]".to_string()))
            }),
        );
        parser.add_tag("b", Callback::literal("[b]"));
        parser.feed("<more>").expect("feed");
        parser.finish().expect("finish");
        let text: String = parser.read().iter().map(ToString::to_string).collect();
        assert_eq!(text, "[more][b]");
    }
}
