use anyhow::{ensure, Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use rayon::prelude::*;
use serde_json::{json, Value};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use wikisplit::byte_source::LogLiveness;
use wikisplit::config::ExtractionConfig;
use wikisplit::dump_parser::{Diagnostics, RevisionRecord};
use wikisplit::fields::TIMESTAMP_FORMAT;
use wikisplit::input::{logical_len, Codec};
use wikisplit::pairing::{LengthRatioScorer, LineDiffScorer, RevisionMeta};
use wikisplit::reader::{DumpVariant, SplitReader};
use wikisplit::split::Split;
use wikisplit::variants::{
    AllPairs, DiffPairs, FragmentKind, FullRevisions, PageFragment, RevisionFragments,
    SampledPairs, TimeScale,
};

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum Mode {
    /// Every revision with its fields and text
    Full,
    /// Every revision as a single-revision page fragment
    Revisions,
    /// Every revision paired with its predecessor
    AllPairs,
    /// The last revisions of consecutive time buckets, paired
    Sampled,
    /// Revisions that changed enough, paired
    Diff,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum Scale {
    Hour,
    Day,
    Week,
    Month,
}

impl From<Scale> for TimeScale {
    fn from(scale: Scale) -> Self {
        match scale {
            Scale::Hour => TimeScale::Hour,
            Scale::Day => TimeScale::Day,
            Scale::Week => TimeScale::Week,
            Scale::Month => TimeScale::Month,
        }
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum Scorer {
    /// Relative length difference
    Length,
    /// Fraction of changed lines
    Lines,
}

#[derive(Debug, Parser)]
#[command(name = "wikisplit")]
#[command(about = "Extract revisions or revision pairs from byte-range splits of MediaWiki dumps")]
struct CommandLine {
    /// Dump file (.xml, .xml.bz2 or .xml.zst)
    input: PathBuf,

    /// First byte of the split (decompressed offset)
    #[arg(long, default_value_t = 0, conflicts_with = "splits")]
    start: u64,

    /// End of the split, exclusive (defaults to the end of the file)
    #[arg(long, conflicts_with = "splits")]
    end: Option<u64>,

    /// Partition the whole file into this many splits, processed in parallel
    #[arg(long)]
    splits: Option<u64>,

    /// Write one part-NNNNN.jsonl file per split instead of printing to stdout
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Mode::Full)]
    mode: Mode,

    /// Bucket size for `--mode sampled`
    #[arg(long, value_enum, default_value_t = Scale::Day)]
    scale: Scale,

    /// Similarity score for `--mode diff`
    #[arg(long, value_enum, default_value_t = Scorer::Length)]
    scorer: Scorer,

    /// Scores below this merge a revision into its predecessor
    #[arg(long, default_value_t = 0.01)]
    lower_threshold: f32,

    /// Scores above this emit a pair
    #[arg(long, default_value_t = 0.1)]
    upper_threshold: f32,

    /// Only keep pages of namespace 0
    #[arg(long)]
    skip_non_articles: bool,

    /// Only keep revisions at or after this time (RFC 3339)
    #[arg(long, value_parser = parse_time)]
    min_timestamp: Option<DateTime<Utc>>,

    /// Only keep revisions before this time (RFC 3339)
    #[arg(long, value_parser = parse_time)]
    max_timestamp: Option<DateTime<Utc>>,

    /// `--mode diff` ignores later revisions with less text than this, in bytes
    #[arg(long, default_value_t = 10)]
    min_revision_bytes: usize,

    /// Read-ahead buffer per split in MiB
    #[arg(long, default_value_t = 128)]
    buffer_mib: usize,

    /// Log a line every this many seconds while a read blocks
    #[arg(long, default_value_t = 300)]
    ping_secs: u64,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|err| err.to_string())
}

fn timestamp_json(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

fn revision_json(page_id: u64, revision: &RevisionRecord) -> Value {
    let contributor = revision.contributor.as_ref().map(|contributor| {
        json!({
            "username": contributor.username.as_deref(),
            "id": contributor.id,
            "ip": contributor.ip.as_deref(),
        })
    });
    json!({
        "page_id": page_id,
        "title": revision.page_title.as_str(),
        "ns": revision.namespace,
        "revision_id": revision.revision_id,
        "parent_id": revision.parent_id,
        "timestamp": timestamp_json(&revision.timestamp),
        "contributor": contributor,
        "comment": revision.comment.as_deref(),
        "text": revision.text,
    })
}

fn meta_json(meta: &RevisionMeta) -> Value {
    json!({
        "revision_id": meta.revision_id,
        "parent_id": meta.parent_id,
        "timestamp": timestamp_json(&meta.timestamp),
        "text_len": meta.text_len,
        "beginning_of_page": meta.beginning_of_page,
    })
}

fn fragment_json(page_id: u64, fragment: &PageFragment) -> Value {
    let kind = match fragment.kind {
        FragmentKind::Pair => "pair",
        FragmentKind::Single => "single",
    };
    json!({
        "page_id": page_id,
        "title": fragment.title.as_str(),
        "ns": fragment.namespace,
        "kind": kind,
        "revisions": fragment.revisions.iter().map(meta_json).collect::<Vec<_>>(),
        "xml": String::from_utf8_lossy(&fragment.xml),
    })
}

#[derive(Debug, Default)]
struct Summary {
    records: u64,
    diagnostics: Diagnostics,
}

fn extract<V, W>(
    split: &Split,
    config: &ExtractionConfig,
    variant: V,
    to_json: fn(u64, &V::Value) -> Value,
    out: &mut W,
) -> Result<Summary>
where
    V: DumpVariant<Key = u64>,
    W: Write,
{
    let mut reader = SplitReader::open(split, config, variant)
        .with_context(|| format!("failed to open split {}..{}", split.start, split.end))?;

    let mut records = 0;
    while let Some((page_id, value)) = reader
        .next_record()
        .with_context(|| format!("failed to read split {}..{}", split.start, split.end))?
    {
        serde_json::to_writer(&mut *out, &to_json(page_id, &value))?;
        out.write_all(b"\n")?;
        records += 1;
    }
    out.flush()?;

    Ok(Summary {
        records,
        diagnostics: reader.diagnostics().clone(),
    })
}

fn extract_split<W: Write>(
    args: &CommandLine,
    config: &ExtractionConfig,
    split: &Split,
    out: &mut W,
) -> Result<Summary> {
    match args.mode {
        Mode::Full => extract(split, config, FullRevisions, revision_json, out),
        Mode::Revisions => extract(split, config, RevisionFragments, fragment_json, out),
        Mode::AllPairs => extract(split, config, AllPairs::default(), fragment_json, out),
        Mode::Sampled => {
            let variant = SampledPairs::new(args.scale.into());
            extract(split, config, variant, fragment_json, out)
        }
        Mode::Diff => match args.scorer {
            Scorer::Length => {
                let variant = DiffPairs::new(config.pair_policy(LengthRatioScorer));
                extract(split, config, variant, fragment_json, out)
            }
            Scorer::Lines => {
                let variant = DiffPairs::new(config.pair_policy(LineDiffScorer));
                extract(split, config, variant, fragment_json, out)
            }
        },
    }
}

fn build_config(args: &CommandLine) -> ExtractionConfig {
    ExtractionConfig::default()
        .with_skip_non_article_namespaces(args.skip_non_articles)
        .with_timestamp_window(args.min_timestamp, args.max_timestamp)
        .with_thresholds(args.lower_threshold, args.upper_threshold)
        .with_min_meaningful_revision_bytes(args.min_revision_bytes)
        .with_read_ahead_buffer_bytes(args.buffer_mib.max(1) * 1024 * 1024)
        .with_liveness(
            Arc::new(LogLiveness),
            Duration::from_secs(args.ping_secs.max(1)),
        )
}

fn part_path(output_dir: &Path, index: usize) -> PathBuf {
    output_dir.join(format!("part-{index:05}.jsonl"))
}

fn run(args: CommandLine) -> Result<()> {
    let started = Instant::now();
    let codec = Codec::from_path(&args.input);
    let total_len = logical_len(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    info!(?codec, total_len, "input opened");

    let splits = match args.splits {
        Some(parts) => Split::partition(&args.input, total_len, parts, codec.is_compressed()),
        None => vec![Split::new(
            &args.input,
            args.start,
            args.end.unwrap_or(total_len),
            codec.is_compressed(),
        )?],
    };
    let config = build_config(&args);

    let summaries = match &args.output_dir {
        None => {
            ensure!(
                splits.len() == 1,
                "--output-dir is required with more than one split"
            );
            let mut out = BufWriter::new(io::stdout().lock());
            vec![extract_split(&args, &config, &splits[0], &mut out)?]
        }
        Some(output_dir) => {
            fs::create_dir_all(output_dir).with_context(|| {
                format!("failed to create output directory {}", output_dir.display())
            })?;
            splits
                .par_iter()
                .enumerate()
                .map(|(index, split)| -> Result<Summary> {
                    let path = part_path(output_dir, index);
                    let file = File::create(&path)
                        .with_context(|| format!("failed to create {}", path.display()))?;
                    let summary = extract_split(&args, &config, split, &mut BufWriter::new(file))?;
                    info!(
                        part = index,
                        start = split.start,
                        end = split.end,
                        records = summary.records,
                        pages = summary.diagnostics.pages,
                        "split done"
                    );
                    Ok(summary)
                })
                .collect::<Result<Vec<_>>>()?
        }
    };

    let records: u64 = summaries.iter().map(|summary| summary.records).sum();
    let pages: u64 = summaries.iter().map(|summary| summary.diagnostics.pages).sum();
    let revisions: u64 = summaries
        .iter()
        .map(|summary| summary.diagnostics.revisions)
        .sum();
    let malformed: u64 = summaries
        .iter()
        .map(|summary| summary.diagnostics.malformed_revisions + summary.diagnostics.malformed_pages)
        .sum();
    info!(
        splits = summaries.len(),
        records,
        pages,
        revisions,
        malformed,
        duration_secs = started.elapsed().as_secs_f64(),
        "extraction complete"
    );
    Ok(())
}

fn main() -> ExitCode {
    let args = CommandLine::parse();

    let default_level = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
