use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{Rng, SeedableRng};
use std::fmt::Write;
use wikisplit::config::ExtractionConfig;
use wikisplit::pairing::{LengthRatioScorer, LineDiffScorer};
use wikisplit::reader::SplitReader;
use wikisplit::variants::{DiffPairs, FullRevisions, RevisionFragments};

fn generate_text(rng: &mut impl Rng, lines: usize) -> String {
    // mostly prose, some markup and characters that have to be escaped
    const WORDS: &[&str] = &[
        "the", "revision", "of", "a", "page", "is", "stored", "[[link]]", "{{cite}}", "<ref>",
        "&nbsp;", "\"quoted\"", "'''bold'''", "==", "Ünïcödé", "и", "漢字",
    ];
    let mut text = String::new();
    for _ in 0..lines {
        for _ in 0..rng.gen_range(3..20) {
            text.push_str(WORDS[rng.gen_range(0..WORDS.len())]);
            text.push(' ');
        }
        text.push('\n');
    }
    text
}

fn generate_dump(pages: u64, revisions: u64) -> Vec<u8> {
    // generate inputs from fixed seeds
    let mut rng = rand_xoshiro::Xoshiro256PlusPlus::seed_from_u64(pages * 1000 + revisions); /* define specific algorithm to ensure reproducibility */
    let mut xml = String::from("<mediawiki xml:lang=\"en\">\n");
    for page in 1..=pages {
        write!(
            xml,
            "  <page>\n    <title>Page {page}</title>\n    <ns>{}</ns>\n    <id>{page}</id>\n",
            if rng.gen_ratio(1, 5) { 1 } else { 0 }
        )
        .unwrap();

        let mut text = generate_text(&mut rng, 40);
        for revision in 0..revisions {
            // small edits most of the time, occasionally a rewrite
            if rng.gen_ratio(1, 10) {
                let lines = rng.gen_range(10..80);
                text = generate_text(&mut rng, lines);
            } else {
                let lines = rng.gen_range(0..3);
                text.push_str(&generate_text(&mut rng, lines));
            }
            let escaped = quick_xml::escape::escape(text.as_str());
            write!(
                xml,
                "    <revision>\n      <id>{id}</id>\n      <parentid>{parent}</parentid>\n      <timestamp>2012-{month:02}-{day:02}T{hour:02}:00:00Z</timestamp>\n      <contributor>\n        <username>User {user}</username>\n        <id>{user}</id>\n      </contributor>\n      <comment>edit {revision}</comment>\n      <model>wikitext</model>\n      <format>text/x-wiki</format>\n      <text bytes=\"{bytes}\" xml:space=\"preserve\">{escaped}</text>\n    </revision>\n",
                id = page * 10_000 + revision + 1,
                parent = page * 10_000 + revision,
                month = revision % 12 + 1,
                day = revision % 28 + 1,
                hour = revision % 24,
                user = rng.gen_range(1..50),
                bytes = text.len(),
            )
            .unwrap();
        }
        xml.push_str("  </page>\n");
    }
    xml.push_str("</mediawiki>\n");
    xml.into_bytes()
}

fn bench_config() -> ExtractionConfig {
    ExtractionConfig::default()
        .with_read_ahead_buffer_bytes(1024 * 1024)
        .with_cooperative_yield(None)
}

fn bench_variants(c: &mut Criterion) {
    let config = bench_config();
    let mut group = c.benchmark_group("split_reader");
    for (pages, revisions) in [(10u64, 20u64), (50, 50)] {
        let dump = generate_dump(pages, revisions);
        let id = format!("{pages}x{revisions}");
        group.throughput(Throughput::Bytes(dump.len() as u64));

        group.bench_with_input(BenchmarkId::new("FullRevisions", &id), &dump, |b, dump| {
            b.iter(|| SplitReader::from_bytes(dump.clone(), &config, FullRevisions).count());
        });
        group.bench_with_input(BenchmarkId::new("RevisionFragments", &id), &dump, |b, dump| {
            b.iter(|| SplitReader::from_bytes(dump.clone(), &config, RevisionFragments).count());
        });
        group.bench_with_input(BenchmarkId::new("DiffPairs/length", &id), &dump, |b, dump| {
            b.iter(|| {
                let variant = DiffPairs::new(config.pair_policy(LengthRatioScorer));
                SplitReader::from_bytes(dump.clone(), &config, variant).count()
            });
        });
        group.bench_with_input(BenchmarkId::new("DiffPairs/lines", &id), &dump, |b, dump| {
            b.iter(|| {
                let variant = DiffPairs::new(config.pair_policy(LineDiffScorer));
                SplitReader::from_bytes(dump.clone(), &config, variant).count()
            });
        });
    }
    group.finish();
}

fn bench_skip_non_articles(c: &mut Criterion) {
    let config = bench_config().with_skip_non_article_namespaces(true);
    let dump = generate_dump(50, 50);
    let mut group = c.benchmark_group("skip_non_articles");
    group.throughput(Throughput::Bytes(dump.len() as u64));
    group.bench_function("FullRevisions", |b| {
        b.iter(|| SplitReader::from_bytes(dump.clone(), &config, FullRevisions).count());
    });
    group.finish();
}

criterion_group!(benches, bench_variants, bench_skip_non_articles);
criterion_main!(benches);
