//! Chunked-feeding harness shared by unit, parity and golden tests.
//!
//! A run builds a fresh parser through a caller-supplied setup function,
//! feeds the input according to a [`ChunkPlan`], and collects the output
//! plus a textual trace of every recorded callback invocation.

use crate::callback::{Callback, CallbackFn, Event, Reply};
use crate::parser::Parser;
use crate::value::Value;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BoundaryPolicy {
    /// Chunks split only on UTF-8 char boundaries.
    Utf8Aligned,
    /// Chunks may split inside a multi-byte sequence.
    ByteStream,
}

impl fmt::Display for BoundaryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundaryPolicy::Utf8Aligned => f.write_str("utf8"),
            BoundaryPolicy::ByteStream => f.write_str("bytes"),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ChunkPlan {
    Fixed {
        size: usize,
        policy: BoundaryPolicy,
    },
    Sizes {
        sizes: Vec<usize>,
        policy: BoundaryPolicy,
    },
    Boundaries {
        indices: Vec<usize>,
        policy: BoundaryPolicy,
    },
}

impl fmt::Display for ChunkPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkPlan::Fixed { size, policy } => write!(f, "fixed size={size} policy={policy}"),
            ChunkPlan::Sizes { sizes, policy } => {
                write!(f, "sizes count={} policy={policy} sizes={sizes:?}", sizes.len())
            }
            ChunkPlan::Boundaries { indices, policy } => write!(
                f,
                "boundaries count={} policy={policy} indices={indices:?}",
                indices.len()
            ),
        }
    }
}

impl ChunkPlan {
    pub fn fixed(size: usize) -> Self {
        Self::Fixed {
            size,
            policy: BoundaryPolicy::Utf8Aligned,
        }
    }

    pub fn fixed_unaligned(size: usize) -> Self {
        Self::Fixed {
            size,
            policy: BoundaryPolicy::ByteStream,
        }
    }

    pub fn sizes(sizes: impl Into<Vec<usize>>) -> Self {
        Self::Sizes {
            sizes: sizes.into(),
            policy: BoundaryPolicy::Utf8Aligned,
        }
    }

    pub fn boundaries(indices: impl Into<Vec<usize>>) -> Self {
        Self::Boundaries {
            indices: indices.into(),
            policy: BoundaryPolicy::Utf8Aligned,
        }
    }

    pub fn boundaries_unaligned(indices: impl Into<Vec<usize>>) -> Self {
        Self::Boundaries {
            indices: indices.into(),
            policy: BoundaryPolicy::ByteStream,
        }
    }

    pub fn policy(&self) -> BoundaryPolicy {
        match self {
            ChunkPlan::Fixed { policy, .. }
            | ChunkPlan::Sizes { policy, .. }
            | ChunkPlan::Boundaries { policy, .. } => *policy,
        }
    }

    /// Split points of this plan for `input`, sorted and inside `(0, len)`.
    pub fn split_points(&self, input: &str) -> Vec<usize> {
        let len = input.len();
        let mut points = match self {
            ChunkPlan::Fixed { size, .. } => {
                assert!(*size > 0, "chunk size must be > 0");
                (1..).map(|i| i * size).take_while(|&at| at < len).collect()
            }
            ChunkPlan::Sizes { sizes, .. } => {
                let mut at = 0usize;
                let mut points = Vec::with_capacity(sizes.len());
                for size in sizes {
                    assert!(*size > 0, "chunk size must be > 0");
                    at += size;
                    if at >= len {
                        break;
                    }
                    points.push(at);
                }
                points
            }
            ChunkPlan::Boundaries { indices, .. } => indices.clone(),
        };
        points = filter_boundaries_by_policy(input, &points, self.policy());
        points.sort_unstable();
        points.dedup();
        points
    }

    pub fn for_each_chunk(&self, input: &str, mut f: impl FnMut(&[u8])) {
        let bytes = input.as_bytes();
        let mut last = 0usize;
        for at in self.split_points(input) {
            f(&bytes[last..at]);
            last = at;
        }
        if last < bytes.len() {
            f(&bytes[last..]);
        }
    }
}

pub(crate) fn filter_boundaries_by_policy(
    input: &str,
    indices: &[usize],
    policy: BoundaryPolicy,
) -> Vec<usize> {
    let len = input.len();
    indices
        .iter()
        .copied()
        .filter(|&idx| idx > 0 && idx < len)
        .filter(|&idx| policy == BoundaryPolicy::ByteStream || input.is_char_boundary(idx))
        .collect()
}

/// Chunk plans every parity check runs: fixed sizes, every byte for short
/// inputs, and splits around every marker character.
pub fn deterministic_chunk_plans(input: &str) -> Vec<ChunkPlan> {
    let mut plans = Vec::new();
    for size in [1usize, 2, 3, 4, 7, 16, 64] {
        plans.push(ChunkPlan::fixed_unaligned(size));
    }
    if input.len() <= 128 && input.len() > 1 {
        plans.push(ChunkPlan::boundaries_unaligned((1..input.len()).collect::<Vec<_>>()));
    }
    let semantic = semantic_boundaries(input);
    if !semantic.is_empty() {
        plans.push(ChunkPlan::boundaries(semantic));
    }
    plans
}

/// Offsets just before and after every markup-significant byte.
pub(crate) fn semantic_boundaries(input: &str) -> Vec<usize> {
    let mut out = Vec::new();
    for (idx, byte) in input.bytes().enumerate() {
        if matches!(byte, b'<' | b'>' | b'&' | b';' | b'/' | b'=' | b'"' | b'\'') {
            out.push(idx);
            out.push(idx + 1);
        }
    }
    filter_boundaries_by_policy(input, &out, BoundaryPolicy::Utf8Aligned)
}

/// Shrink a failing plan by dropping split points while `fails` holds.
pub fn shrink_chunk_plan(
    input: &str,
    plan: &ChunkPlan,
    mut fails: impl FnMut(&ChunkPlan) -> bool,
) -> ChunkPlan {
    let policy = plan.policy();
    let mut points = plan.split_points(input);
    let mut changed = true;
    while changed {
        changed = false;
        let mut i = 0usize;
        while i < points.len() {
            let mut candidate = points.clone();
            candidate.remove(i);
            let candidate_plan = ChunkPlan::Boundaries {
                indices: candidate.clone(),
                policy,
            };
            if fails(&candidate_plan) {
                points = candidate;
                changed = true;
            } else {
                i += 1;
            }
        }
    }
    ChunkPlan::Boundaries {
        indices: points,
        policy,
    }
}

/// Records one trace line per callback invocation.
#[derive(Clone, Debug, Default)]
pub struct Recorder {
    trace: Rc<RefCell<Vec<String>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recording callback that always answers `reply`.
    pub fn reply(&self, reply: Reply) -> Callback {
        let trace = Rc::clone(&self.trace);
        Callback::func(move |parser, event| {
            trace.borrow_mut().push(describe(parser, event));
            Ok(reply.clone())
        })
    }

    /// Wrap `inner` so each invocation is recorded before it runs.
    pub fn wrap(&self, inner: Callback) -> Callback {
        match inner {
            Callback::Literal(text) => self.reply(Reply::Text(text.to_string())),
            Callback::Function(func) => Callback::Function(self.recording(func)),
            Callback::Bound { func, extra } => Callback::Bound {
                func: self.recording(func),
                extra,
            },
        }
    }

    fn recording(&self, func: Rc<CallbackFn>) -> Rc<CallbackFn> {
        let trace = Rc::clone(&self.trace);
        Rc::new(move |parser: &mut Parser, event: &Event| {
            trace.borrow_mut().push(describe(parser, event));
            func(parser, event)
        })
    }

    pub fn lines(&self) -> Vec<String> {
        self.trace.borrow().clone()
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.trace.borrow_mut())
    }
}

fn describe(parser: &Parser, event: &Event) -> String {
    let context = parser
        .context()
        .map_or_else(|err| err.to_string(), |state| format!("{state:?}"));
    format!(
        "{} {:?} {} content={:?} raw={:?} at={}:{} ctx={context}",
        event.kind,
        event.name,
        event.args,
        event.content,
        event.raw,
        event.location.line,
        event.location.column()
    )
}

/// Everything observable from one run.
#[derive(Clone, Debug, PartialEq)]
pub struct Run {
    /// Output values with adjacent text coalesced.
    pub output: Vec<Value>,
    pub trace: Vec<String>,
    pub error: Option<String>,
}

impl Run {
    /// Output rendered as one string.
    pub fn text(&self) -> String {
        self.output.iter().map(ToString::to_string).collect()
    }
}

pub type Setup<'a> = &'a dyn Fn(&mut Parser, &Recorder);

pub fn run_whole(input: &str, setup: Setup<'_>) -> Run {
    run_chunks([input.as_bytes()], setup)
}

pub fn run_chunked(input: &str, plan: &ChunkPlan, setup: Setup<'_>) -> Run {
    let mut chunks = Vec::new();
    plan.for_each_chunk(input, |chunk| chunks.push(chunk.to_vec()));
    run_chunks(chunks.iter().map(Vec::as_slice), setup)
}

fn run_chunks<'c>(chunks: impl IntoIterator<Item = &'c [u8]>, setup: Setup<'_>) -> Run {
    let recorder = Recorder::new();
    let mut parser = Parser::new();
    setup(&mut parser, &recorder);
    let mut output = Vec::new();
    let mut error = None;
    for chunk in chunks {
        if let Err(err) = parser.feed_bytes(chunk) {
            error = Some(err.to_string());
            break;
        }
        output.extend(parser.read());
    }
    if error.is_none()
        && let Err(err) = parser.finish()
    {
        error = Some(err.to_string());
    }
    output.extend(parser.read());
    Run {
        output: coalesce(output),
        trace: recorder.take(),
        error,
    }
}

/// Merge adjacent text values; how text is split between items depends on
/// when the consumer reads.
pub fn coalesce(values: Vec<Value>) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(values.len());
    for value in values {
        if let (Some(Value::Text(prev)), Value::Text(next)) = (out.last_mut(), &value) {
            prev.push_str(next);
            continue;
        }
        if !matches!(&value, Value::Text(text) if text.is_empty()) {
            out.push(value);
        }
    }
    out
}
