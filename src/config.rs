use std::{fmt::Debug, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};

use crate::{
    byte_source::{CooperativeYield, Liveness, SourceConfig},
    dump_parser::ScanOptions,
    fields::TimestampWindow,
    pairing::{PairPolicy, SimilarityScorer, Thresholds},
};

/// Everything a split extraction can be tuned with.
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Drop pages outside namespace 0.
    pub skip_non_article_namespaces: bool,
    pub timestamp_window: TimestampWindow,
    pub thresholds: Thresholds,
    pub min_meaningful_revision_bytes: usize,
    pub read_ahead_buffer_bytes: usize,
    pub liveness_ping_interval: Duration,
    pub cooperative_yield: Option<CooperativeYield>,
    /// Pinged every `liveness_ping_interval` while a read blocks.
    pub liveness: Option<Arc<dyn Liveness>>,
}

impl Debug for ExtractionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("skip_non_article_namespaces", &self.skip_non_article_namespaces)
            .field("timestamp_window", &self.timestamp_window)
            .field("thresholds", &self.thresholds)
            .field("min_meaningful_revision_bytes", &self.min_meaningful_revision_bytes)
            .field("read_ahead_buffer_bytes", &self.read_ahead_buffer_bytes)
            .field("liveness_ping_interval", &self.liveness_ping_interval)
            .field("cooperative_yield", &self.cooperative_yield)
            .field("liveness", &self.liveness.is_some())
            .finish()
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        let source = SourceConfig::default();
        Self {
            skip_non_article_namespaces: false,
            timestamp_window: TimestampWindow::default(),
            thresholds: Thresholds::default(),
            min_meaningful_revision_bytes: 10,
            read_ahead_buffer_bytes: source.buffer_bytes,
            liveness_ping_interval: source.ping_interval,
            cooperative_yield: source.cooperative_yield,
            liveness: source.liveness,
        }
    }
}

impl ExtractionConfig {
    pub fn with_skip_non_article_namespaces(mut self, skip: bool) -> Self {
        self.skip_non_article_namespaces = skip;
        self
    }

    /// Accepts revisions with `start <= timestamp < end`.
    pub fn with_timestamp_window(
        mut self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Self {
        self.timestamp_window = TimestampWindow::new(start, end);
        self
    }

    pub fn with_thresholds(mut self, lower: f32, upper: f32) -> Self {
        self.thresholds = Thresholds { lower, upper };
        self
    }

    pub fn with_min_meaningful_revision_bytes(mut self, bytes: usize) -> Self {
        self.min_meaningful_revision_bytes = bytes;
        self
    }

    pub fn with_read_ahead_buffer_bytes(mut self, bytes: usize) -> Self {
        self.read_ahead_buffer_bytes = bytes;
        self
    }

    pub fn with_liveness(mut self, liveness: Arc<dyn Liveness>, interval: Duration) -> Self {
        self.liveness = Some(liveness);
        self.liveness_ping_interval = interval;
        self
    }

    pub fn with_cooperative_yield(mut self, cooperative_yield: Option<CooperativeYield>) -> Self {
        self.cooperative_yield = cooperative_yield;
        self
    }

    pub fn source_config(&self) -> SourceConfig {
        SourceConfig {
            buffer_bytes: self.read_ahead_buffer_bytes.max(1),
            liveness: self.liveness.clone(),
            ping_interval: self.liveness_ping_interval,
            cooperative_yield: self.cooperative_yield,
        }
    }

    /// Scanner options before the dump variant adds what it needs.
    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            skip_non_article_namespaces: self.skip_non_article_namespaces,
            timestamp_window: self.timestamp_window,
            ..ScanOptions::default()
        }
    }

    pub fn pair_policy<S: SimilarityScorer>(&self, scorer: S) -> PairPolicy<S> {
        PairPolicy::new(scorer, self.thresholds, self.min_meaningful_revision_bytes)
    }
}
