//! Output queue with a stack of conditional layers.
//!
//! Speculative output (argument text rebuilt around resolved entities,
//! entity-only sub-parses) is pushed into a conditional layer and only
//! becomes visible to the consumer on `commit`. `rollback` discards it.

use crate::value::Value;
use std::collections::VecDeque;

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct OutputItem {
    pub value: Value,
    /// Literal input passed through unchanged; adjacent literal items merge.
    pub literal: bool,
}

#[derive(Debug, Default)]
pub(crate) struct Output {
    queue: VecDeque<OutputItem>,
    conditional: Vec<VecDeque<OutputItem>>,
}

impl Output {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_literal(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let item = OutputItem {
            value: Value::Text(text.to_string()),
            literal: true,
        };
        self.push_item(item);
    }

    pub(crate) fn push_value(&mut self, value: Value) {
        self.push_item(OutputItem {
            value,
            literal: false,
        });
    }

    fn push_item(&mut self, item: OutputItem) {
        match self.conditional.last_mut() {
            Some(layer) => append_merged(layer, item),
            None => append_merged(&mut self.queue, item),
        }
    }

    /// Open a conditional layer.
    pub(crate) fn begin(&mut self) {
        self.conditional.push(VecDeque::new());
    }

    /// Make the top conditional layer part of the layer (or queue) below.
    pub(crate) fn commit(&mut self) {
        if let Some(layer) = self.conditional.pop() {
            for item in layer {
                self.push_item(item);
            }
        }
    }

    pub(crate) fn rollback(&mut self) {
        let _ = self.conditional.pop();
    }

    /// Close the top conditional layer and hand its items to the caller.
    pub(crate) fn take_layer(&mut self) -> Vec<OutputItem> {
        self.conditional.pop().map(Vec::from).unwrap_or_default()
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn read_items(&mut self, max: usize) -> Vec<Value> {
        let count = max.min(self.queue.len());
        self.queue.drain(..count).map(|item| item.value).collect()
    }

    /// Drain up to `max_chars` characters of text; a longer item is split.
    ///
    /// Callers guarantee the queue only holds text (plain mode).
    pub(crate) fn read_text(&mut self, max_chars: usize) -> String {
        let mut out = String::new();
        let mut remaining = max_chars;
        while remaining > 0 {
            let Some(front) = self.queue.front_mut() else {
                break;
            };
            let Value::Text(text) = &mut front.value else {
                debug_assert!(false, "non-text item in plain-mode output");
                break;
            };
            match text.char_indices().nth(remaining) {
                Some((split, _)) => {
                    let rest = text.split_off(split);
                    out.push_str(text);
                    *text = rest;
                    remaining = 0;
                }
                None => {
                    remaining -= text.chars().count();
                    out.push_str(text);
                    let _ = self.queue.pop_front();
                }
            }
        }
        out
    }

    pub(crate) fn clear(&mut self) {
        self.queue.clear();
        self.conditional.clear();
    }
}

fn append_merged(items: &mut VecDeque<OutputItem>, item: OutputItem) {
    if item.literal
        && let Some(last) = items.back_mut()
        && last.literal
        && let (Value::Text(prev), Value::Text(next)) = (&mut last.value, &item.value)
    {
        prev.push_str(next);
        return;
    }
    items.push_back(item);
}
