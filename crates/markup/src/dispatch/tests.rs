use super::State;
use crate::callback::{Callback, EventKind, Reply};
use crate::config::XmlTagSyntax;
use crate::error::ParseError;
use crate::parser::Parser;
use crate::test_harness::{Recorder, deterministic_chunk_plans, run_chunked, run_whole};
use crate::value::Value;
use std::cell::RefCell;
use std::rc::Rc;

type Log = Rc<RefCell<Vec<String>>>;

fn text_of(parser: &mut Parser) -> String {
    parser.read().iter().map(ToString::to_string).collect()
}

fn run(parser: &mut Parser, chunks: &[&str]) -> String {
    for chunk in chunks {
        parser.feed(chunk).expect("feed");
    }
    parser.finish().expect("finish");
    text_of(parser)
}

/// Callback that records `kind name args content` and replies `reply`.
fn recording(log: &Log, reply: Reply) -> Callback {
    let log = Rc::clone(log);
    Callback::func(move |_, event| {
        log.borrow_mut().push(format!(
            "{} {} {} {:?}",
            event.kind, event.name, event.args, event.content
        ));
        Ok(reply.clone())
    })
}

#[test]
fn unregistered_tag_is_emitted_verbatim() {
    let mut parser = Parser::new();
    assert_eq!(run(&mut parser, &["a <x> b"]), "a <x> b");
}

#[test]
fn container_content_is_not_entity_resolved() {
    let log = Log::default();
    let mut parser = Parser::new();
    parser.add_container("b", recording(&log, Reply::text("[B]")));
    parser.add_entity("amp", Callback::literal("&"));
    assert_eq!(run(&mut parser, &["<b>hi &amp; bye</b>"]), "[B]");
    assert_eq!(
        log.borrow().as_slice(),
        ["container b [] Some(\"hi &amp; bye\")"]
    );
}

#[test]
fn container_split_between_feeds_matches_whole_input() {
    let whole = Log::default();
    let mut parser = Parser::new();
    parser.add_container("b", recording(&whole, Reply::Keep));
    let whole_out = run(&mut parser, &["<b>hi</b>"]);

    let split = Log::default();
    let mut parser = Parser::new();
    parser.add_container("b", recording(&split, Reply::Keep));
    parser.feed("<b>h").expect("feed");
    assert!(split.borrow().is_empty(), "container must wait for its end tag");
    parser.feed("i</b>").expect("feed");
    assert_eq!(split.borrow().len(), 1);
    parser.finish().expect("finish");

    assert_eq!(text_of(&mut parser), whole_out);
    assert_eq!(*split.borrow(), *whole.borrow());
}

#[test]
fn quote_tag_body_is_opaque() {
    let log = Log::default();
    let mut parser = Parser::new();
    parser.add_quote_tag("!--", recording(&log, Reply::remove()), "--");
    parser.add_tag("b", Callback::literal("B"));
    parser.add_entity("amp", Callback::literal("&"));
    assert_eq!(run(&mut parser, &["x<!-- <b> &amp; -->y<b>"]), "xyB");
    assert_eq!(
        log.borrow().as_slice(),
        ["quote tag !-- [] Some(\" <b> &amp; \")"]
    );
}

#[test]
fn entities_inside_kept_tag_arguments_are_resolved() {
    let contexts = Rc::new(RefCell::new(Vec::new()));
    let seen = Rc::clone(&contexts);
    let mut parser = Parser::new();
    parser.add_entity(
        "amp",
        Callback::func(move |parser, _| {
            seen.borrow_mut().push(parser.context()?);
            Ok(Reply::text("&"))
        }),
    );
    let out = run(&mut parser, &[r#"<a href="?x=1&amp;y=2" n=&amp;>"#]);
    assert_eq!(out, r#"<a href="?x=1&y=2" n=&>"#);
    assert_eq!(
        contexts.borrow().as_slice(),
        [State::TagQuotedArgument(0), State::TagArgument]
    );
}

#[test]
fn unknown_entities_pass_through() {
    let mut parser = Parser::new();
    parser.add_entity("amp", Callback::literal("&"));
    assert_eq!(run(&mut parser, &["&foo; &amp;"]), "&foo; &");
}

#[test]
fn lazy_entities_give_up_at_whitespace() {
    let mut parser = Parser::new();
    parser.add_entity("amp", Callback::literal("&"));
    assert_eq!(run(&mut parser, &["AT&T rocks &amp;"]), "AT&T rocks &amp;");

    let mut parser = Parser::new();
    parser.add_entity("amp", Callback::literal("&"));
    parser.set_lazy_entity_end(true);
    assert_eq!(run(&mut parser, &["AT&T rocks &amp;"]), "AT&T rocks &");
}

#[test]
fn retry_after_unregistering_falls_to_generic_callback() {
    let mut parser = Parser::new();
    parser.add_tag(
        "x",
        Callback::func(|parser, _| {
            assert!(parser.remove_tag("x"));
            Ok(Reply::Retry)
        }),
    );
    parser.set_tag_callback(Some(Callback::literal("[generic]")));
    assert_eq!(run(&mut parser, &["<x>"]), "[generic]");
    assert_eq!(parser.stats().retries, 1);
}

#[test]
fn generic_retry_is_suppressed_once() {
    let calls = Rc::new(RefCell::new(0));
    let counter = Rc::clone(&calls);
    let mut parser = Parser::new();
    parser.set_tag_callback(Some(Callback::func(move |_, _| {
        *counter.borrow_mut() += 1;
        Ok(Reply::Retry)
    })));
    assert_eq!(run(&mut parser, &["<x><y>"]), "<x><y>");
    assert_eq!(*calls.borrow(), 2, "one generic call per tag");
}

#[test]
fn generic_retry_can_reclassify_as_registered_tag() {
    let mut parser = Parser::new();
    parser.set_tag_callback(Some(Callback::func(|parser, event| {
        let name = event.name.clone();
        parser.add_tag(&name, Callback::literal("X"));
        Ok(Reply::Retry)
    })));
    assert_eq!(run(&mut parser, &["<x>"]), "X");
}

#[test]
fn data_spans_are_delivered_at_construct_boundaries() {
    for chunks in [&["ab<br>cd"][..], &["a", "b<b", "r>c", "d"][..]] {
        let log = Log::default();
        let record = Rc::clone(&log);
        let mut parser = Parser::new();
        parser.set_data_callback(Some(Callback::func(move |_, event| {
            record
                .borrow_mut()
                .push(event.content.clone().unwrap_or_default());
            Ok(Reply::Keep)
        })));
        assert_eq!(run(&mut parser, chunks), "ab<br>cd");
        assert_eq!(log.borrow().as_slice(), ["ab", "cd"], "chunks {chunks:?}");
    }
}

#[test]
fn data_callback_replacements_are_queued() {
    let mut parser = Parser::new();
    parser.set_data_callback(Some(Callback::func(|_, event| {
        Ok(Reply::text(event.raw.to_uppercase()))
    })));
    parser.add_tag("br", Callback::literal("\n"));
    assert_eq!(run(&mut parser, &["one<br>two"]), "ONE\nTWO");
}

#[test]
fn strict_syntax_rejects_bare_tag_start() {
    let mut parser = Parser::new();
    parser.set_xml_tag_syntax(XmlTagSyntax::Strict);
    let err = parser.feed("a < b").unwrap_err();
    assert!(matches!(
        err,
        ParseError::Malformed {
            reason: "empty tag name",
            ..
        }
    ));

    let mut parser = Parser::new();
    assert_eq!(run(&mut parser, &["a < b"]), "a < b");
}

#[test]
fn empty_element_selects_container_with_empty_content() {
    let log = Log::default();
    let mut parser = Parser::new();
    parser.add_container("b", recording(&log, Reply::remove()));
    assert_eq!(run(&mut parser, &["x<b/>y"]), "xy");
    assert_eq!(log.borrow().as_slice(), ["container b [] Some(\"\")"]);
}

#[test]
fn strict_syntax_prefers_tags_for_empty_elements() {
    let log = Log::default();
    let mut parser = Parser::new();
    parser.set_xml_tag_syntax(XmlTagSyntax::Strict);
    parser.add_tag("b", recording(&log, Reply::remove()));
    parser.add_container("b", recording(&log, Reply::remove()));
    assert_eq!(run(&mut parser, &["<b/><b>x</b>"]), "");
    assert_eq!(
        log.borrow().as_slice(),
        ["tag b [] None", "container b [] Some(\"x\")"]
    );
}

#[test]
fn end_tags_register_with_their_marker() {
    let mut parser = Parser::new();
    parser.add_tag("b", Callback::literal("[b]"));
    parser.add_tag("/b", Callback::literal("[/b]"));
    assert_eq!(run(&mut parser, &["<b>x</b>"]), "[b]x[/b]");
}

#[test]
fn case_insensitive_names_are_lowercased() {
    let log = Log::default();
    let mut parser = Parser::new();
    parser.set_case_insensitive_tag(true);
    parser.add_tag("B", recording(&log, Reply::remove()));
    assert_eq!(run(&mut parser, &["<B CLASS=x>"]), "");
    assert_eq!(log.borrow().as_slice(), ["tag b [class=\"x\"] None"]);
}

#[test]
fn splice_argument_expands_into_argument_list() {
    let log = Log::default();
    let mut parser = Parser::new();
    parser.set_splice_arg(Some("_")).expect("valid splice name");
    parser.set_tag_callback(Some(recording(&log, Reply::Keep)));
    let out = run(&mut parser, &[r#"<a _="href=x id=3" z>"#]);
    assert_eq!(out, "<a href=x id=3 z>");
    assert_eq!(
        log.borrow().as_slice(),
        ["generic tag a [href=\"x\" id=\"3\" z] None"]
    );
}

#[test]
fn splice_value_entities_are_resolved_once() {
    let calls = Rc::new(RefCell::new(0));
    let counter = Rc::clone(&calls);
    let mut parser = Parser::new();
    parser.set_splice_arg(Some("_")).expect("valid splice name");
    parser.add_entity(
        "q",
        Callback::func(move |parser, _| {
            assert_eq!(parser.context()?, State::SpliceArgument);
            *counter.borrow_mut() += 1;
            Ok(Reply::text("\""))
        }),
    );
    let out = run(&mut parser, &["<a _='t=&q;a b&q;'>"]);
    assert_eq!(out, r#"<a t="a b">"#);
    assert_eq!(*calls.borrow(), 2);
}

#[test]
fn ignore_unknown_keeps_parsing_inside_unknown_tags() {
    let mut parser = Parser::new();
    parser.add_tag("b", Callback::literal("B"));
    assert_eq!(run(&mut parser, &["<x title='<b>'>"]), "<x title='<b>'>");

    let mut parser = Parser::new();
    parser.add_tag("b", Callback::literal("B"));
    parser.set_ignore_unknown(true);
    assert_eq!(run(&mut parser, &["<x title='<b>'>"]), "<x title='B'>");
}

#[test]
fn ignored_unknown_prefix_tags_stay_inside_container() {
    let input = "<abc>x</ab>y<ab>z</abc>w";
    let setup = |parser: &mut Parser, recorder: &Recorder| {
        parser.set_ignore_unknown(true);
        parser.add_container("abc", recorder.reply(Reply::text("C")));
    };
    let whole = run_whole(input, &setup);
    assert_eq!(whole.error, None);
    assert_eq!(whole.text(), "Cw");
    assert_eq!(whole.trace.len(), 1, "{:?}", whole.trace);
    assert!(
        whole.trace[0].contains(r#"content=Some("x</ab>y<ab>z")"#),
        "{:?}",
        whole.trace
    );
    for plan in deterministic_chunk_plans(input) {
        assert_eq!(run_chunked(input, &plan, &setup), whole, "plan {plan}");
    }
}

#[test]
fn empty_feeds_while_suspended_change_nothing() {
    let log = Log::default();
    let mut parser = Parser::new();
    parser.add_container("b", recording(&log, Reply::text("B")));
    parser.feed("x<b>h").expect("feed");
    assert_eq!(text_of(&mut parser), "x");

    parser.feed("").expect("empty feed");
    parser.feed_bytes(&[]).expect("empty byte feed");
    parser.feed("").expect("empty feed");
    assert_eq!(text_of(&mut parser), "");
    assert!(log.borrow().is_empty(), "suspended container must not fire");

    parser.feed("i</b>").expect("feed");
    parser.finish().expect("finish");
    assert_eq!(text_of(&mut parser), "B");
    assert_eq!(log.borrow().as_slice(), ["container b [] Some(\"hi\")"]);
}

#[test]
fn ignore_tags_only_resolves_entities() {
    let mut parser = Parser::new();
    parser.add_tag("b", Callback::literal("B"));
    parser.add_entity("lt", Callback::literal("<"));
    parser.set_ignore_tags(true);
    assert_eq!(run(&mut parser, &["<b>&lt;"]), "<b><");
}

#[test]
fn values_reply_requires_mixed_mode_for_non_text() {
    let mut parser = Parser::new();
    parser.add_tag(
        "n",
        Callback::func(|_, _| Ok(Reply::Values(vec![Value::Int(1), Value::from("a")]))),
    );
    let err = parser.feed("x<n>y").unwrap_err();
    assert!(matches!(
        err,
        ParseError::InvalidResult {
            kind: EventKind::Tag,
            ..
        }
    ));
    assert_eq!(text_of(&mut parser), "x");

    parser.set_mixed_mode(true);
    parser.finish().expect("finish in mixed mode");
    assert_eq!(
        parser.read(),
        vec![Value::Int(1), Value::from("a"), Value::from("y")]
    );
}

#[test]
fn reparsed_replacement_is_tokenized() {
    let mut parser = Parser::new();
    parser.set_reparse_strings(true);
    parser.add_tag("outer", Callback::literal("(<inner>)"));
    parser.add_tag("inner", Callback::literal("in"));
    assert_eq!(run(&mut parser, &["<outer>"]), "(in)");

    let mut parser = Parser::new();
    parser.add_tag("outer", Callback::literal("(<inner>)"));
    parser.add_tag("inner", Callback::literal("in"));
    assert_eq!(run(&mut parser, &["<outer>"]), "(<inner>)");
}

#[test]
fn callback_queries_describe_current_construct() {
    let seen = Rc::new(RefCell::new(None));
    let record = Rc::clone(&seen);
    let mut parser = Parser::new();
    parser.add_container(
        "c",
        Callback::func(move |parser, _| {
            let args = parser.tag_args(Some("yes"))?;
            *record.borrow_mut() = Some((
                parser.tag_name()?,
                args.get("flag").cloned(),
                parser.tag_content()?,
                parser.current()?,
                parser.at_line()?,
                parser.at_column()?,
            ));
            Ok(Reply::remove())
        }),
    );
    assert_eq!(run(&mut parser, &["l1\n  <c flag>body</c>"]), "l1\n  ");
    assert_eq!(
        seen.borrow().clone(),
        Some((
            "c".to_string(),
            Some("yes".to_string()),
            Some("body".to_string()),
            "<c flag>body</c>".to_string(),
            2,
            2,
        ))
    );
}
