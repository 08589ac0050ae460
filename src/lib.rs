// SPDX-License-Identifier: MPL-2.0
//! # wikisplit
//!
//! A split-aware streaming extractor for MediaWiki revision-history XML dumps.
//!
//! ## Overview
//!
//! `wikisplit` reads one assigned byte range (a *split*) of a dump file, which may be
//! uncompressed, bzip2- or zstd-compressed, and turns the pages starting inside that range
//! into records: single revisions, synthetic single-revision page fragments, or pairs of
//! revisions chosen for later comparison. It is meant for batch jobs where many workers
//! each process one split of the same multi-gigabyte file.
//!
//! **Key Features:**
//!
//! - **Exactly-once partitioning**: a page belongs to the split in which its `<page>` marker
//!   starts. Every page of a dump is extracted by exactly one of a set of contiguous splits,
//!   even when it extends far past the split's end.
//! - **Streaming**: bytes are matched against a small, fixed set of tag literals one at a
//!   time. Nothing but the fields of the current revision is buffered.
//! - **Recovering**: malformed ids, timestamps or text are counted and logged, and the
//!   affected revision or page is skipped.
//! - **Pairing policies**: consecutive revisions, time-bucket samples, or revisions whose
//!   similarity score crosses configurable thresholds.
//!
//! ## Getting Started
//!
//! ### Basic Usage
//!
//! Extract all revisions of an in-memory dump:
//!
//! ```rust
//! use wikisplit::{config::ExtractionConfig, reader::SplitReader, variants::FullRevisions};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let dump = br#"<page>
//!     <title>Example</title>
//!     <ns>0</ns>
//!     <id>7</id>
//!     <revision>
//!       <id>70</id>
//!       <timestamp>2020-05-01T12:00:00Z</timestamp>
//!       <text bytes="12" xml:space="preserve">Hello &amp; bye</text>
//!     </revision>
//!   </page>
//! "#;
//!     let config = ExtractionConfig::default().with_read_ahead_buffer_bytes(4096);
//!
//!     for record in SplitReader::from_bytes(dump.to_vec(), &config, FullRevisions) {
//!         let (page_id, revision) = record?;
//!         assert_eq!(page_id, 7);
//!         assert_eq!(revision.revision_id, 70);
//!         assert_eq!(revision.text, "Hello & bye");
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ### Processing a Split
//!
//! A worker assigned the range `[start, end)` of a dump opens it as a [`split::Split`]:
//!
//! ```rust,no_run
//! use wikisplit::{
//!     config::ExtractionConfig, pairing::LengthRatioScorer, reader::SplitReader,
//!     split::Split, variants::DiffPairs,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // compressed splits are positioned by decompressing and discarding `start` bytes
//!     let split = Split::new("enwiki-pages-meta-history1.xml.bz2", 1 << 30, 2 << 30, true)?;
//!     let config = ExtractionConfig::default().with_skip_non_article_namespaces(true);
//!     let variant = DiffPairs::new(config.pair_policy(LengthRatioScorer));
//!
//!     let mut reader = SplitReader::open(&split, &config, variant)?;
//!     while let Some((page_id, fragment)) = reader.next_record()? {
//!         println!("{page_id}: {:?} of {} revisions", fragment.kind, fragment.revisions.len());
//!     }
//!     println!("{:?}", reader.diagnostics());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Modules and API
//!
//! - [`tag_matcher`]: the tag literals and the incremental matcher racing them.
//! - [`byte_source`]: byte-at-a-time access over a large read-ahead buffer, with liveness
//!   pings while a read blocks and cancellation through a [`byte_source::CloseHandle`].
//! - [`dump_parser`]: the [`dump_parser::RevisionScanner`] state machine.
//! - [`fields`]: field conversion (ids, namespaces, timestamps, contributors, text).
//! - [`split`]: splits and the rules deciding which split owns a page.
//! - [`input`]: opening a split of a plain or compressed file.
//! - [`pairing`]: similarity scores and the two-revision window of the diff policy.
//! - [`reader`]: the [`reader::SplitReader`] pull loop and the [`reader::DumpVariant`] trait.
//! - [`variants`]: the built-in dump variants.
//! - [`config`]: [`config::ExtractionConfig`].
//!
//! ## Features and Configuration
//!
//! ### Logging and Error Handling
//!
//! - Uses the `tracing` crate for logging warnings and errors.
//! - The scanner recovers from malformed fields by skipping the revision or page. Enable the
//!   `strict` feature to make it fail with [`dump_parser::ExtractionError::MalformedField`]
//!   instead.
//!
//! ```toml
//! [dependencies]
//! wikisplit = { version = "0.1.0", features = ["strict"] }
//! ```
//!
//! ## Limitations
//!
//! - **XML Format Compatibility**: only the tags of the MediaWiki export schema are matched,
//!   byte for byte. Attributes are tolerated on `<text>` only, and entities are decoded in
//!   text fields only. This is not an XML parser.
//! - **Compressed splits**: compressed files cannot be seeked, so a split far into a
//!   compressed file decompresses everything before it.

pub mod byte_source;
pub mod config;
pub mod dump_parser;
pub mod fields;
pub mod input;
pub mod pairing;
pub mod reader;
pub mod split;
pub mod tag_matcher;
pub mod variants;

#[cfg(test)]
mod test_support;
