use anyhow::{Context, Result};
use clap::{Parser as ClapParser, ValueEnum};
use markup::{Callback, Parser, Reply, XmlTagSyntax, html_entity_callback};
use mimalloc::MiMalloc;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::PathBuf;
use std::time::Instant;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Stream markup through the incremental parser, rewriting it on the way.
#[derive(ClapParser, Debug)]
#[command(name = "tagstream", version, about)]
struct Cli {
    /// Input files; reads stdin when none are given.
    files: Vec<PathBuf>,

    /// Bytes fed to the parser per read.
    #[arg(long, default_value_t = 8192, value_parser = clap::value_parser!(u64).range(1..))]
    chunk_size: u64,

    /// Decode named and numeric character references.
    #[arg(long)]
    decode_entities: bool,

    /// Drop `<!-- ... -->` comments.
    #[arg(long)]
    drop_comments: bool,

    /// Remove a container together with its content (repeatable).
    #[arg(long = "strip", value_name = "NAME")]
    strip: Vec<String>,

    /// Remove a tag and its end tag, keeping the content (repeatable).
    #[arg(long = "remove-tag", value_name = "NAME")]
    remove_tag: Vec<String>,

    /// Match tag names case-insensitively.
    #[arg(long)]
    case_insensitive: bool,

    /// End entities at the first character that cannot belong to a name.
    #[arg(long)]
    lazy_entities: bool,

    /// Empty-element (`<x/>`) handling.
    #[arg(long, value_enum, default_value_t = Syntax::Html)]
    syntax: Syntax,

    /// Print parser statistics as JSON on stderr.
    #[arg(long)]
    stats: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Syntax {
    Legacy,
    Html,
    Strict,
}

impl From<Syntax> for XmlTagSyntax {
    fn from(syntax: Syntax) -> Self {
        match syntax {
            Syntax::Legacy => XmlTagSyntax::Legacy,
            Syntax::Html => XmlTagSyntax::Html,
            Syntax::Strict => XmlTagSyntax::Strict,
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    // Only initialize if RUST_LOG is set
    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(io::stderr).with_target(true))
            .with(EnvFilter::from_default_env())
            .init();
    }
}

fn build_parser(cli: &Cli) -> Parser {
    let mut parser = Parser::new();
    parser.set_case_insensitive_tag(cli.case_insensitive);
    parser.set_lazy_entity_end(cli.lazy_entities);
    parser.set_xml_tag_syntax(cli.syntax.into());
    if cli.decode_entities {
        parser.set_entity_callback(Some(html_entity_callback()));
    }
    if cli.drop_comments {
        parser.add_quote_tag("!--", Callback::func(|_, _| Ok(Reply::remove())), "--");
    }
    for name in &cli.strip {
        parser.add_container(name, Callback::func(|_, _| Ok(Reply::remove())));
    }
    for name in &cli.remove_tag {
        parser.add_tag(name, Callback::func(|_, _| Ok(Reply::remove())));
        parser.add_tag(&format!("/{name}"), Callback::func(|_, _| Ok(Reply::remove())));
    }
    parser
}

fn drain(parser: &mut Parser, out: &mut impl Write) -> Result<()> {
    for value in parser.read() {
        write!(out, "{value}")?;
    }
    Ok(())
}

fn process(
    parser: &mut Parser,
    mut input: impl Read,
    chunk_size: usize,
    out: &mut impl Write,
) -> Result<u64> {
    let mut buf = vec![0u8; chunk_size];
    let mut total = 0u64;
    loop {
        let read = input.read(&mut buf)?;
        if read == 0 {
            break;
        }
        total += read as u64;
        parser.feed_bytes(&buf[..read])?;
        drain(parser, out)?;
    }
    parser.finish()?;
    drain(parser, out)?;
    Ok(total)
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let chunk_size = usize::try_from(cli.chunk_size).context("chunk size does not fit in memory")?;
    let template = build_parser(&cli);

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let started = Instant::now();
    let mut bytes = 0u64;
    let mut totals = markup::ParserStats::default();

    let mut run = |parser: &mut Parser, input: Box<dyn Read>, label: &str| -> Result<()> {
        bytes += process(parser, input, chunk_size, &mut out)
            .with_context(|| format!("failed to process {label}"))?;
        let stats = parser.stats();
        totals.passes += stats.passes;
        totals.callbacks += stats.callbacks;
        totals.retries += stats.retries;
        totals.frames_pushed += stats.frames_pushed;
        totals.max_depth = totals.max_depth.max(stats.max_depth);
        Ok(())
    };

    if cli.files.is_empty() {
        let mut parser = template.clone_template();
        run(&mut parser, Box::new(io::stdin().lock()), "stdin")?;
    } else {
        for path in &cli.files {
            let file =
                File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
            let mut parser = template.clone_template();
            run(&mut parser, Box::new(file), &path.display().to_string())?;
        }
    }
    out.flush()?;

    if cli.stats {
        let report = serde_json::json!({
            "inputs": cli.files.len().max(1),
            "bytes": bytes,
            "elapsed_ms": started.elapsed().as_secs_f64() * 1e3,
            "passes": totals.passes,
            "callbacks": totals.callbacks,
            "retries": totals.retries,
            "frames_pushed": totals.frames_pushed,
            "max_depth": totals.max_depth,
        });
        eprintln!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}
