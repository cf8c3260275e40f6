//! Parser configuration.

use crate::error::UsageError;

/// How the empty-element marker (`<x/>`) selects between tag and container
/// callbacks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum XmlTagSyntax {
    /// `/` before the tag end is an ordinary argument character; dispatch
    /// depends only on which table has an entry (container wins).
    Legacy,
    /// `<x/>` is recognised. A registered container is called with empty
    /// content, otherwise the tag table decides.
    #[default]
    Html,
    /// `<x/>` prefers the tag table and `<x>` prefers the container table.
    /// Empty tag names and unterminated tags are malformed input.
    Strict,
}

/// Parser configuration.
///
/// Mutable between parse passes; every change recomputes the scanner's
/// derived marker sets before any buffered input is looked at again.
#[derive(Clone, Debug)]
pub struct Config {
    pub tag_start: char,
    pub tag_end: char,
    /// Marks end tags (`</x>`) and empty elements (`<x/>`).
    pub tag_fin: char,
    pub entity_start: char,
    pub entity_end: char,
    pub equals: char,
    /// Argument quote pairs `(open, close)`.
    pub quotes: Vec<(char, char)>,
    pub whitespace: String,
    /// Lowercase tag and argument names before lookup and delivery.
    pub case_insensitive_tag: bool,
    /// A tag end inside a quoted argument value also ends the value and the tag.
    pub lazy_argument_end: bool,
    /// Give up on an entity when a break character comes before the entity end.
    pub lazy_entity_end: bool,
    /// Break characters for `lazy_entity_end` (whitespace always breaks).
    pub lazy_entity_break: String,
    /// Balance nested entity start/end pairs inside an entity.
    pub nestling_entity_end: bool,
    /// Balance unquoted nested tag starts and ends inside a tag.
    pub match_tag: bool,
    /// Balance nested same-named containers when looking for an end tag.
    pub balance_containers: bool,
    /// Callbacks may queue non-text values.
    pub mixed_mode: bool,
    /// Treat unknown tags and entities as text and keep parsing inside them.
    pub ignore_unknown: bool,
    /// Do not recognise tags at all; only entities are parsed.
    pub ignore_tags: bool,
    /// Text replies and literal callbacks are parsed again instead of queued.
    pub reparse_strings: bool,
    /// Allow whitespace between the tag start and the tag name.
    pub ws_before_tag_name: bool,
    pub xml_tag_syntax: XmlTagSyntax,
    /// Maximum number of stacked parse frames.
    pub max_stack_depth: usize,
    /// Maximum consecutive retries of the same construct.
    pub max_retries: usize,
    /// Argument whose value is spliced into the argument list.
    pub splice_arg: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tag_start: '<',
            tag_end: '>',
            tag_fin: '/',
            entity_start: '&',
            entity_end: ';',
            equals: '=',
            quotes: vec![('"', '"'), ('\'', '\'')],
            whitespace: " \t\n\r\u{0b}\u{0c}".to_string(),
            case_insensitive_tag: false,
            lazy_argument_end: false,
            lazy_entity_end: false,
            lazy_entity_break: "&<>\"'".to_string(),
            nestling_entity_end: false,
            match_tag: true,
            balance_containers: true,
            mixed_mode: false,
            ignore_unknown: false,
            ignore_tags: false,
            reparse_strings: false,
            ws_before_tag_name: false,
            xml_tag_syntax: XmlTagSyntax::Html,
            max_stack_depth: 10,
            max_retries: 16,
            splice_arg: None,
        }
    }
}

impl Config {
    /// Reject marker assignments the scanner cannot disambiguate.
    pub fn validate(&self) -> Result<(), UsageError> {
        let structural = [
            ("tag_start", self.tag_start),
            ("tag_end", self.tag_end),
            ("tag_fin", self.tag_fin),
            ("entity_start", self.entity_start),
            ("entity_end", self.entity_end),
            ("equals", self.equals),
        ];
        for (i, (name_a, a)) in structural.iter().enumerate() {
            for (name_b, b) in &structural[i + 1..] {
                if a == b {
                    return Err(invalid(format!("{name_a} and {name_b} are both {a:?}")));
                }
            }
            if self.whitespace.contains(*a) {
                return Err(invalid(format!("{name_a} {a:?} is also whitespace")));
            }
        }
        for &(open, close) in &self.quotes {
            for (name, marker) in structural {
                if open == marker || close == marker {
                    return Err(invalid(format!("quote pair ({open:?}, {close:?}) uses {name}")));
                }
            }
        }
        if self.max_stack_depth == 0 {
            return Err(invalid("max_stack_depth must be at least 1".to_string()));
        }
        if let Some(splice) = &self.splice_arg
            && splice.is_empty()
        {
            return Err(invalid("splice_arg must not be empty".to_string()));
        }
        Ok(())
    }

    pub(crate) fn normalize_name(&self, name: &str) -> String {
        if self.case_insensitive_tag {
            name.to_lowercase()
        } else {
            name.to_string()
        }
    }
}

fn invalid(reason: String) -> UsageError {
    UsageError::InvalidConfig { reason }
}
