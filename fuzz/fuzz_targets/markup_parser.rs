#![no_main]

use libfuzzer_sys::fuzz_target;
use markup::test_harness::{ChunkPlan, Recorder, run_chunked, run_whole};
use markup::{Parser, Reply, html_entity_callback};

fn setup(parser: &mut Parser, recorder: &Recorder) {
    parser.add_container("b", recorder.reply(Reply::text("[b]")));
    parser.add_tag("img", recorder.reply(Reply::Keep));
    parser.add_tag("br", recorder.reply(Reply::remove()));
    parser.add_quote_tag("!--", recorder.reply(Reply::remove()), "--");
    parser.set_entity_callback(Some(recorder.wrap(html_entity_callback())));
    parser.set_tag_callback(Some(recorder.reply(Reply::Keep)));
    parser.set_data_callback(Some(recorder.reply(Reply::Keep)));
}

// First byte selects the chunk size, the rest is the document. Invalid
// UTF-8 is replaced before comparing, so both runs see the same text.
fuzz_target!(|data: &[u8]| {
    let Some((&size, rest)) = data.split_first() else {
        return;
    };
    let input = String::from_utf8_lossy(rest);
    let whole = run_whole(&input, &setup);
    let plan = ChunkPlan::fixed_unaligned(usize::from(size % 32) + 1);
    let chunked = run_chunked(&input, &plan, &setup);
    assert_eq!(whole, chunked, "chunked run diverged for plan {plan}");
});
