//! Catalog Metrics
//!
//! Prometheus counters for the engine's cache, record-store and index
//! traffic. Each `CatalogMetrics` owns its own [`Registry`], so several
//! engines can live in one process (tests do this constantly).

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::error::Result;

/// Cache operations the engine reports as degraded.
pub const CACHE_OPS: &[&str] = &[
    "get",
    "get_all",
    "set",
    "delete",
    "increment",
    "top_k",
    "remove_rank",
    "mark_listing",
    "listing_complete",
    "clear_listing",
];

/// Outcome label of a cache lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
    /// The cache was unavailable or returned an undecodable entry
    Error,
}

impl CacheOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            CacheOutcome::Hit => "hit",
            CacheOutcome::Miss => "miss",
            CacheOutcome::Error => "error",
        }
    }
}

/// Point-in-time copy of the counters, mostly for tests and logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_errors: u64,
    pub record_reads: u64,
    pub listing_refills: u64,
    pub popularity_votes: u64,
    pub index_indexed: u64,
    pub index_failed: u64,
    pub index_pending: u64,
    pub cache_degraded: u64,
    pub stale_documents: i64,
}

/// Metric handles registered against a private registry.
#[derive(Clone)]
pub struct CatalogMetrics {
    registry: Registry,

    /// Cache lookups - labels: op (get, get_all, popular), outcome
    cache_lookups: IntCounterVec,

    /// Record-store reads performed by the engine
    record_reads: IntCounter,

    /// Full repopulations of the cache region
    listing_refills: IntCounter,

    /// Successful popularity increments
    popularity_votes: IntCounter,

    /// Index submissions - labels: op (upsert, remove), status
    index_submissions: IntCounterVec,

    /// Cache operations that failed and were skipped - labels: op
    cache_degraded: IntCounterVec,

    /// Documents awaiting repair
    stale_documents: IntGauge,
}

impl CatalogMetrics {
    /// Create and register all metrics.
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("catalog".to_string()), None)?;

        let cache_lookups = IntCounterVec::new(
            Opts::new("cache_lookups_total", "Cache lookups by operation and outcome"),
            &["op", "outcome"],
        )?;
        let record_reads = IntCounter::new(
            "record_reads_total",
            "Reads served by the record store on behalf of the engine",
        )?;
        let listing_refills = IntCounter::new(
            "listing_refills_total",
            "Full repopulations of the cache region",
        )?;
        let popularity_votes =
            IntCounter::new("popularity_votes_total", "Successful popularity increments")?;
        let index_submissions = IntCounterVec::new(
            Opts::new("index_submissions_total", "Search index submissions by outcome"),
            &["op", "status"],
        )?;
        let cache_degraded = IntCounterVec::new(
            Opts::new(
                "cache_degraded_total",
                "Cache operations that failed and were skipped",
            ),
            &["op"],
        )?;
        let stale_documents = IntGauge::new(
            "stale_documents",
            "Search documents whose last index attempt failed",
        )?;

        registry.register(Box::new(cache_lookups.clone()))?;
        registry.register(Box::new(record_reads.clone()))?;
        registry.register(Box::new(listing_refills.clone()))?;
        registry.register(Box::new(popularity_votes.clone()))?;
        registry.register(Box::new(index_submissions.clone()))?;
        registry.register(Box::new(cache_degraded.clone()))?;
        registry.register(Box::new(stale_documents.clone()))?;

        Ok(Self {
            registry,
            cache_lookups,
            record_reads,
            listing_refills,
            popularity_votes,
            index_submissions,
            cache_degraded,
            stale_documents,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_cache_lookup(&self, op: &str, outcome: CacheOutcome) {
        self.cache_lookups
            .with_label_values(&[op, outcome.as_str()])
            .inc();
    }

    pub fn record_record_read(&self) {
        self.record_reads.inc();
    }

    pub fn record_listing_refill(&self) {
        self.listing_refills.inc();
    }

    pub fn record_vote(&self) {
        self.popularity_votes.inc();
    }

    pub fn record_index_submission(&self, op: &str, status: &str) {
        self.index_submissions.with_label_values(&[op, status]).inc();
    }

    pub fn record_cache_degraded(&self, op: &str) {
        self.cache_degraded.with_label_values(&[op]).inc();
    }

    pub fn set_stale_documents(&self, count: usize) {
        self.stale_documents
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    fn lookups(&self, outcome: CacheOutcome) -> u64 {
        ["get", "get_all", "popular"]
            .iter()
            .map(|op| {
                self.cache_lookups
                    .with_label_values(&[*op, outcome.as_str()])
                    .get()
            })
            .sum()
    }

    fn submissions(&self, status: &str) -> u64 {
        ["upsert", "remove"]
            .iter()
            .map(|op| self.index_submissions.with_label_values(&[*op, status]).get())
            .sum()
    }

    /// Current values, summed over labels.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let degraded = CACHE_OPS
            .iter()
            .map(|op| self.cache_degraded.with_label_values(&[*op]).get())
            .sum();

        MetricsSnapshot {
            cache_hits: self.lookups(CacheOutcome::Hit),
            cache_misses: self.lookups(CacheOutcome::Miss),
            cache_errors: self.lookups(CacheOutcome::Error),
            record_reads: self.record_reads.get(),
            listing_refills: self.listing_refills.get(),
            popularity_votes: self.popularity_votes.get(),
            index_indexed: self.submissions("indexed"),
            index_failed: self.submissions("failed"),
            index_pending: self.submissions("pending"),
            cache_degraded: degraded,
            stale_documents: self.stale_documents.get(),
        }
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn gather_text(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| crate::error::Error::Internal(format!("metrics are not utf-8: {}", e)))
    }
}

impl std::fmt::Debug for CatalogMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogMetrics")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}
