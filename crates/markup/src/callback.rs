//! Callback specifications, invocation payloads and replies.

use crate::args::Args;
use crate::error::CallbackError;
use crate::frame::Location;
use crate::parser::Parser;
use crate::value::Value;
use std::fmt;
use std::rc::Rc;

/// Signature of every invocable callback.
///
/// The callback receives the parser itself (for queries, registration
/// changes, `push`, `write_out` and `feed_insert`) and the matched construct.
pub type CallbackFn = dyn Fn(&mut Parser, &Event) -> Result<Reply, CallbackError>;

/// What to do when a construct matches a registration.
#[derive(Clone)]
pub enum Callback {
    Function(Rc<CallbackFn>),
    /// Replacement text, handled as if a function had returned `Reply::Text`.
    Literal(Rc<str>),
    /// A function invoked with extra arguments bound at registration time.
    Bound {
        func: Rc<CallbackFn>,
        extra: Rc<[Value]>,
    },
}

impl Callback {
    pub fn func<F>(f: F) -> Self
    where
        F: Fn(&mut Parser, &Event) -> Result<Reply, CallbackError> + 'static,
    {
        Callback::Function(Rc::new(f))
    }

    pub fn literal(text: impl Into<String>) -> Self {
        Callback::Literal(Rc::from(text.into()))
    }

    pub fn bound<F>(f: F, extra: impl IntoIterator<Item = Value>) -> Self
    where
        F: Fn(&mut Parser, &Event) -> Result<Reply, CallbackError> + 'static,
    {
        Callback::Bound {
            func: Rc::new(f),
            extra: extra.into_iter().collect(),
        }
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callback::Function(_) => f.write_str("Callback::Function"),
            Callback::Literal(text) => f.debug_tuple("Callback::Literal").field(text).finish(),
            Callback::Bound { extra, .. } => f
                .debug_struct("Callback::Bound")
                .field("extra", extra)
                .finish_non_exhaustive(),
        }
    }
}

/// Callback result.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    /// Pass the matched text through. Tags additionally get entities inside
    /// their arguments resolved when entity callbacks exist.
    Keep,
    /// Reprocess the same input range from scratch (after changing
    /// registrations, typically).
    Retry,
    /// Replacement text; reparsed when `reparse_strings` is set.
    Text(String),
    /// Values appended to the output as they are. Non-text values require
    /// mixed mode.
    Values(Vec<Value>),
}

impl Reply {
    /// Drop the construct from the output.
    pub fn remove() -> Self {
        Reply::Values(Vec::new())
    }

    pub fn text(text: impl Into<String>) -> Self {
        Reply::Text(text.into())
    }
}

/// Which table (or generic callback) a construct was dispatched to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Tag,
    Container,
    Entity,
    QuoteTag,
    Data,
    /// Generic callback for tags nothing is registered for.
    AnyTag,
    /// Generic callback for entities nothing is registered for.
    AnyEntity,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventKind::Tag => "tag",
            EventKind::Container => "container",
            EventKind::Entity => "entity",
            EventKind::QuoteTag => "quote tag",
            EventKind::Data => "data",
            EventKind::AnyTag => "generic tag",
            EventKind::AnyEntity => "generic entity",
        })
    }
}

/// A matched construct handed to a callback.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    /// Tag, container, entity or quote-tag name; empty for data.
    pub name: String,
    pub args: Args,
    /// Container body, quote-tag body or data text.
    pub content: Option<String>,
    /// The complete matched source text.
    pub raw: String,
    /// Position of the first character of `raw` in its frame.
    pub location: Location,
    /// Values bound at registration followed by the parser's extra values.
    pub extra: Vec<Value>,
}

impl Event {
    pub(crate) fn new(kind: EventKind, name: String, raw: String, location: Location) -> Self {
        Self {
            kind,
            name,
            args: Args::new(),
            content: None,
            raw,
            location,
            extra: Vec::new(),
        }
    }

    pub(crate) fn with_args(mut self, args: Args) -> Self {
        self.args = args;
        self
    }

    pub(crate) fn with_content(mut self, content: String) -> Self {
        self.content = Some(content);
        self
    }
}
