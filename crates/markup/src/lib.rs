//! Incremental, callback-driven markup parser.
//!
//! Input is fed in arbitrary chunks. Tags, containers, entities and quote
//! tags that have a registered callback are handed to it; everything else
//! passes through to the output queue as it was written.

pub mod entities;
pub mod perf_fixtures;
#[cfg(any(test, feature = "test-harness"))]
pub mod chunker;
#[cfg(test)]
mod streaming_parity;
#[cfg(any(test, feature = "test-harness"))]
pub mod test_harness;

mod args;
mod callback;
mod chain;
mod charset;
mod config;
mod decoder;
mod dispatch;
mod driver;
mod error;
mod frame;
mod matcher;
mod output;
mod parser;
mod quote_tags;
mod registry;
mod value;

pub use crate::args::{Arg, Args};
pub use crate::callback::{Callback, CallbackFn, Event, EventKind, Reply};
pub use crate::config::{Config, XmlTagSyntax};
pub use crate::decoder::ByteStreamDecoder;
pub use crate::dispatch::State;
pub use crate::entities::{decode_entity, html_entity_callback};
pub use crate::error::{CallbackError, ParseError, UsageError};
pub use crate::frame::Location;
pub use crate::parser::{Parser, ParserStats};
pub use crate::value::Value;
