//! Whole-input vs chunked-feed parity.
//!
//! Fast CI mode: default seeds and budget when `CI` is set.
//! Extended local mode: set `TAGSTREAM_PARITY_SEEDS` and
//! `TAGSTREAM_PARITY_BUDGET` to increase coverage.

use crate::callback::{Callback, Reply};
use crate::chunker::{ChunkPlanCase, build_chunk_plans};
use crate::entities::html_entity_callback;
use crate::parser::Parser;
use crate::test_harness::{Recorder, Run, Setup, run_chunked, run_whole, shrink_chunk_plan};

const DEFAULT_BUDGET_CI: usize = 400;
const DEFAULT_BUDGET_LOCAL: usize = 2_000;
const DEFAULT_SEEDS_CI: usize = 16;
const DEFAULT_SEEDS_LOCAL: usize = 64;
const SEED_MIX: u64 = 0x9e3779b97f4a7c15;

const CASES: &[&str] = &[
    "plain ascii",
    "café\nsecond line",
    "<b>bold &amp; brave</b> tail",
    "<img src=\"a&amp;b\" alt='it&apos;s'> after",
    "x<!-- <b>not a tag</b> -->y",
    "&lt;&unknown;&#65;&#x1F600; a & b; c",
    "<p><b>x</b><b>y</b></p><br/><br>",
    "é<b>😀</b>ö",
    "<b><b>nested</b></b>",
    "a < b > c",
    "<unknown attr = \"v\" flag>text</unknown>",
    "unterminated <a title=\"x",
    "<b>never closed",
];

fn rich_setup(parser: &mut Parser, recorder: &Recorder) {
    parser.add_container("b", recorder.reply(Reply::text("[bold]")));
    parser.add_container("p", recorder.reply(Reply::Keep));
    parser.add_tag("br", recorder.reply(Reply::text("\n")));
    parser.add_tag("img", recorder.reply(Reply::Keep));
    parser.add_entity("amp", recorder.reply(Reply::text("&")));
    parser.add_quote_tag("!--", recorder.reply(Reply::remove()), "--");
    parser.set_entity_callback(Some(recorder.wrap(html_entity_callback())));
    parser.set_tag_callback(Some(recorder.reply(Reply::Keep)));
    parser.set_data_callback(Some(recorder.reply(Reply::Keep)));
}

fn lazy_setup(parser: &mut Parser, recorder: &Recorder) {
    rich_setup(parser, recorder);
    parser.set_lazy_entity_end(true);
    parser.set_lazy_argument_end(true);
    parser.set_data_callback(None);
}

fn reparse_setup(parser: &mut Parser, recorder: &Recorder) {
    parser.set_reparse_strings(true);
    parser.add_tag("br", recorder.reply(Reply::text("<hr>&amp;")));
    parser.add_tag("hr", recorder.reply(Reply::text("-")));
    parser.add_entity("amp", recorder.reply(Reply::text("+")));
}

#[test]
fn chunked_feeds_match_whole_input() {
    assert_cases_parity("rich", &rich_setup);
}

#[test]
fn chunked_feeds_match_whole_input_with_lazy_ends() {
    assert_cases_parity("lazy", &lazy_setup);
}

#[test]
fn chunked_feeds_match_whole_input_when_reparsing() {
    let setup: Setup<'_> = &reparse_setup;
    for input in ["a<br>b", "<br><br/>&amp;", "x<br"] {
        let expected = run_whole(input, setup);
        for case in build_chunk_plans(input, 4, 0x5eed) {
            assert_run_parity("reparse", input, &expected, &case, setup);
        }
    }
    assert_eq!(run_whole("a<br>b", setup).text(), "a-+b");
}

#[test]
fn split_utf8_sequences_decode_once() {
    let run = run_whole("é<b>😀</b>ö", &rich_setup);
    assert_eq!(run.text(), "é[bold]ö");
    assert!(run.error.is_none());
}

fn assert_cases_parity(setup_label: &str, setup: Setup<'_>) {
    let seeds = seed_count();
    let budget = run_budget();
    assert!(
        budget >= CASES.len(),
        "parity budget must be >= number of cases; increase TAGSTREAM_PARITY_BUDGET"
    );
    let case_budget = (budget / CASES.len()).max(1);
    for (case_idx, input) in CASES.iter().enumerate() {
        let expected = run_whole(input, setup);
        let base_seed = 0x7461677374726561 ^ case_idx as u64;
        let fuzz_seed = base_seed.wrapping_mul(SEED_MIX);
        let mut runs_case = 0usize;
        for case in build_chunk_plans(input, seeds, fuzz_seed)
            .into_iter()
            .take(case_budget)
        {
            assert_run_parity(setup_label, input, &expected, &case, setup);
            runs_case += 1;
        }
        assert!(
            runs_case > 0,
            "parity case {case_idx} produced no runs; check budget or inputs"
        );
    }
}

fn assert_run_parity(
    setup_label: &str,
    input: &str,
    expected: &Run,
    case: &ChunkPlanCase,
    setup: Setup<'_>,
) {
    let actual = run_chunked(input, &case.plan, setup);
    if &actual == expected {
        return;
    }
    let minimal = shrink_chunk_plan(input, &case.plan, |plan| {
        &run_chunked(input, plan, setup) != expected
    });
    let minimal_run = run_chunked(input, &minimal, setup);
    panic!(
        "parity mismatch setup={setup_label} input={input:?} plan=[{}]\nminimal plan: {minimal}\nwhole: {}\nchunked: {}",
        case.label,
        preview(expected),
        preview(&minimal_run)
    );
}

fn preview(run: &Run) -> String {
    let head = run.trace.iter().take(12).cloned().collect::<Vec<_>>();
    format!(
        "output={:?} error={:?} trace_len={} trace=[{}]",
        run.text(),
        run.error,
        run.trace.len(),
        head.join(", ")
    )
}

fn seed_count() -> usize {
    if let Ok(value) = std::env::var("TAGSTREAM_PARITY_SEEDS")
        && let Ok(parsed) = value.parse::<usize>()
        && parsed > 0
    {
        return parsed;
    }
    if std::env::var("CI").is_ok() {
        DEFAULT_SEEDS_CI
    } else {
        DEFAULT_SEEDS_LOCAL
    }
}

fn run_budget() -> usize {
    if let Ok(value) = std::env::var("TAGSTREAM_PARITY_BUDGET")
        && let Ok(parsed) = value.parse::<usize>()
        && parsed > 0
    {
        return parsed;
    }
    if std::env::var("CI").is_ok() {
        DEFAULT_BUDGET_CI
    } else {
        DEFAULT_BUDGET_LOCAL
    }
}

#[test]
fn literal_callbacks_survive_recording() {
    let run = run_whole("<br>", &|parser: &mut Parser, recorder: &Recorder| {
        parser.add_tag("br", recorder.wrap(Callback::literal("!")));
    });
    assert_eq!(run.text(), "!");
    assert_eq!(run.trace.len(), 1);
}
