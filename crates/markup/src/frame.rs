//! Parse stack frames and position tracking.

use crate::chain::{Chain, Cursor};
use crate::error::ParseError;
use memchr::memchr_iter;

/// Position in a frame's input.
///
/// `byte` counts UTF-8 bytes consumed so far (first byte is 0), `line` starts
/// at 1 and `line_start` is the byte offset where the current line began.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Location {
    pub byte: usize,
    pub line: usize,
    pub line_start: usize,
}

impl Location {
    pub fn start() -> Self {
        Self {
            byte: 0,
            line: 1,
            line_start: 0,
        }
    }

    /// Byte offset within the current line (first column is 0).
    pub fn column(&self) -> usize {
        self.byte - self.line_start
    }

    pub(crate) fn advance(&mut self, text: &str) {
        for idx in memchr_iter(b'\n', text.as_bytes()) {
            self.line += 1;
            self.line_start = self.byte + idx + 1;
        }
        self.byte += text.len();
    }
}

impl Default for Location {
    fn default() -> Self {
        Self::start()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FrameFlags {
    /// Literal text bypasses the data callback and goes straight to output.
    pub ignore_data: bool,
    /// The frame owns its chain (injected text) rather than viewing the feed.
    pub owns_feed: bool,
    pub parse_tags: bool,
}

impl FrameFlags {
    pub(crate) fn feed() -> Self {
        Self {
            ignore_data: false,
            owns_feed: false,
            parse_tags: true,
        }
    }

    pub(crate) fn reparse() -> Self {
        Self {
            ignore_data: false,
            owns_feed: true,
            parse_tags: true,
        }
    }

    /// Entity-only sub-parse of argument text.
    pub(crate) fn entities_only() -> Self {
        Self {
            ignore_data: true,
            owns_feed: true,
            parse_tags: false,
        }
    }
}

/// One level of the parse stack.
#[derive(Debug)]
pub(crate) struct Frame {
    /// Injected text; `None` for the bottom frame, which views the outer feed.
    pub local: Option<Chain>,
    pub cursor: Cursor,
    pub flags: FrameFlags,
    pub location: Location,
    /// Consecutive retries requested for the construct at `cursor`.
    pub retries: usize,
    /// Skip the generic tag/entity callback for the next construct.
    pub suppress_generic: bool,
}

impl Frame {
    pub(crate) fn feed(feed: &Chain) -> Self {
        Self {
            local: None,
            cursor: feed.start(),
            flags: FrameFlags::feed(),
            location: Location::start(),
            retries: 0,
            suppress_generic: false,
        }
    }

    pub(crate) fn injected(text: &str, flags: FrameFlags) -> Self {
        let chain = Chain::from_text(text);
        Self {
            cursor: chain.start(),
            local: Some(chain),
            flags,
            location: Location::start(),
            retries: 0,
            suppress_generic: false,
        }
    }
}

/// Stack of frames; index 0 is the outer feed and is never popped.
#[derive(Debug)]
pub(crate) struct Stack {
    frames: Vec<Frame>,
}

impl Stack {
    pub(crate) fn new(feed: &Chain) -> Self {
        Self {
            frames: vec![Frame::feed(feed)],
        }
    }

    pub(crate) fn depth(&self) -> usize {
        self.frames.len()
    }

    pub(crate) fn push(&mut self, frame: Frame, limit: usize) -> Result<(), ParseError> {
        let depth = self.frames.len() + 1;
        if depth > limit {
            log::debug!(target: "markup.driver", "refusing frame push: depth {depth} > {limit}");
            return Err(ParseError::RecursionLimit { depth, limit });
        }
        self.frames.push(frame);
        Ok(())
    }

    /// Pop the top frame unless it is the outer feed.
    pub(crate) fn pop(&mut self) -> Option<Frame> {
        if self.frames.len() > 1 {
            self.frames.pop()
        } else {
            None
        }
    }

    pub(crate) fn top(&self) -> &Frame {
        // The outer feed frame is created with the stack and never popped.
        &self.frames[self.frames.len() - 1]
    }

    pub(crate) fn top_mut(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    pub(crate) fn bottom(&self) -> &Frame {
        &self.frames[0]
    }

    /// Drop every injected frame and rewind the outer frame to `feed`.
    pub(crate) fn reset(&mut self, feed: &Chain) {
        self.frames.clear();
        self.frames.push(Frame::feed(feed));
    }
}
