//! TOML golden fixtures.
//!
//! A fixture file holds `[[case]]` tables. Each case names an input, optional
//! configuration overrides, the callbacks to register and the expected
//! output, trace and error.

use markup::test_harness::Recorder;
use markup::{Parser, Reply, XmlTagSyntax, html_entity_callback};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const FIXTURE_FORMAT_V1: &str = "tagstream-fixtures-v1";

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixtureFile {
    pub format: String,
    #[serde(rename = "case", default)]
    pub cases: Vec<Fixture>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Fixture {
    pub name: String,
    pub input: String,
    #[serde(default)]
    pub config: ConfigOverrides,
    #[serde(default)]
    pub register: Vec<Registration>,
    /// Generic tag callback reply.
    pub any_tag: Option<ReplySpec>,
    /// Data callback reply.
    pub data: Option<ReplySpec>,
    /// Install the ready-made HTML entity callback as generic entity callback.
    #[serde(default)]
    pub decode_entities: bool,
    pub expect: Expectation,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigOverrides {
    pub case_insensitive_tag: Option<bool>,
    pub lazy_argument_end: Option<bool>,
    pub lazy_entity_end: Option<bool>,
    pub nestling_entity_end: Option<bool>,
    pub match_tag: Option<bool>,
    pub balance_containers: Option<bool>,
    pub ignore_unknown: Option<bool>,
    pub ignore_tags: Option<bool>,
    pub reparse_strings: Option<bool>,
    pub ws_before_tag_name: Option<bool>,
    pub xml_tag_syntax: Option<SyntaxSpec>,
    pub max_stack_depth: Option<usize>,
    pub max_retries: Option<usize>,
    pub splice_arg: Option<String>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyntaxSpec {
    Legacy,
    Html,
    Strict,
}

impl From<SyntaxSpec> for XmlTagSyntax {
    fn from(spec: SyntaxSpec) -> Self {
        match spec {
            SyntaxSpec::Legacy => XmlTagSyntax::Legacy,
            SyntaxSpec::Html => XmlTagSyntax::Html,
            SyntaxSpec::Strict => XmlTagSyntax::Strict,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TableSpec {
    Tag,
    Container,
    Entity,
    QuoteTag,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Registration {
    pub kind: TableSpec,
    pub name: String,
    pub reply: ReplySpec,
    /// End marker of a quote tag.
    pub end: Option<String>,
}

/// Fixed callback reply: `"keep"`, `"remove"`, `"retry"` or `{ text = "..." }`.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReplySpec {
    Keep,
    Remove,
    Retry,
    Text(String),
}

impl ReplySpec {
    pub fn to_reply(&self) -> Reply {
        match self {
            ReplySpec::Keep => Reply::Keep,
            ReplySpec::Remove => Reply::remove(),
            ReplySpec::Retry => Reply::Retry,
            ReplySpec::Text(text) => Reply::text(text.clone()),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Expectation {
    pub output: Option<String>,
    pub trace: Option<Vec<String>>,
    /// Substring of the rendered error.
    pub error: Option<String>,
}

impl Fixture {
    /// Apply configuration overrides and registrations, recording every
    /// callback through `recorder`.
    pub fn setup(&self, parser: &mut Parser, recorder: &Recorder) -> Result<(), String> {
        let overrides = &self.config;
        parser
            .update_config(|config| {
                let flags = [
                    (&mut config.case_insensitive_tag, overrides.case_insensitive_tag),
                    (&mut config.lazy_argument_end, overrides.lazy_argument_end),
                    (&mut config.lazy_entity_end, overrides.lazy_entity_end),
                    (&mut config.nestling_entity_end, overrides.nestling_entity_end),
                    (&mut config.match_tag, overrides.match_tag),
                    (&mut config.balance_containers, overrides.balance_containers),
                    (&mut config.ignore_unknown, overrides.ignore_unknown),
                    (&mut config.ignore_tags, overrides.ignore_tags),
                    (&mut config.reparse_strings, overrides.reparse_strings),
                    (&mut config.ws_before_tag_name, overrides.ws_before_tag_name),
                ];
                for (field, value) in flags {
                    if let Some(value) = value {
                        *field = value;
                    }
                }
                if let Some(syntax) = overrides.xml_tag_syntax {
                    config.xml_tag_syntax = syntax.into();
                }
                if let Some(depth) = overrides.max_stack_depth {
                    config.max_stack_depth = depth;
                }
                if let Some(retries) = overrides.max_retries {
                    config.max_retries = retries;
                }
                if overrides.splice_arg.is_some() {
                    config.splice_arg = overrides.splice_arg.clone();
                }
            })
            .map_err(|err| format!("case '{}': {err}", self.name))?;

        for entry in &self.register {
            let callback = recorder.reply(entry.reply.to_reply());
            match entry.kind {
                TableSpec::Tag => parser.add_tag(&entry.name, callback),
                TableSpec::Container => parser.add_container(&entry.name, callback),
                TableSpec::Entity => parser.add_entity(&entry.name, callback),
                TableSpec::QuoteTag => {
                    let end = entry.end.as_deref().ok_or_else(|| {
                        format!("case '{}': quote tag '{}' needs an end", self.name, entry.name)
                    })?;
                    parser.add_quote_tag(&entry.name, callback, end);
                }
            }
        }
        if let Some(reply) = &self.any_tag {
            parser.set_tag_callback(Some(recorder.reply(reply.to_reply())));
        }
        if let Some(reply) = &self.data {
            parser.set_data_callback(Some(recorder.reply(reply.to_reply())));
        }
        if self.decode_entities {
            parser.set_entity_callback(Some(recorder.wrap(html_entity_callback())));
        }
        Ok(())
    }
}

pub fn parse_fixture_file(content: &str, path: &Path) -> FixtureFile {
    let file: FixtureFile = toml::from_str(content)
        .unwrap_or_else(|err| panic!("failed to parse fixture TOML {path:?}: {err}"));
    assert_eq!(
        file.format, FIXTURE_FORMAT_V1,
        "unsupported fixture format in {path:?}"
    );
    let mut seen = std::collections::BTreeSet::new();
    for case in &file.cases {
        assert!(
            seen.insert(case.name.as_str()),
            "duplicate fixture case '{}' in {path:?}",
            case.name
        );
        assert!(
            case.expect.output.is_some() || case.expect.error.is_some(),
            "fixture case '{}' in {path:?} expects neither output nor error",
            case.name
        );
    }
    file
}

/// Load every `*.toml` file of `dir`, sorted by path.
pub fn load_fixture_dir(dir: &Path) -> Vec<(PathBuf, FixtureFile)> {
    let entries = fs::read_dir(dir)
        .unwrap_or_else(|err| panic!("failed to read fixture dir {dir:?}: {err}"));
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    paths.sort();
    paths
        .into_iter()
        .map(|path| {
            let content = fs::read_to_string(&path)
                .unwrap_or_else(|err| panic!("failed to read fixture {path:?}: {err}"));
            let file = parse_fixture_file(&content, &path);
            (path, file)
        })
        .collect()
}
