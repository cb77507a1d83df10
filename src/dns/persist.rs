//! Snapshot persistence: cache entries and the learned-latency table.
//!
//! The snapshot is a single JSON document written on a fixed interval and
//! read once at startup.

use crate::dns::host_cache::PersistedEntry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

/// Where a completed job's answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    Dns,
    Proc,
    Hosts,
}

impl fmt::Display for ResolutionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionSource::Dns => f.write_str("dns"),
            ResolutionSource::Proc => f.write_str("proc"),
            ResolutionSource::Hosts => f.write_str("hosts"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencyStat {
    pub samples: u64,
    pub average_ms: f64,
}

/// Exponentially weighted job latency per source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyTable {
    stats: BTreeMap<ResolutionSource, LatencyStat>,
}

impl LatencyTable {
    /// Weight of a new sample.
    const ALPHA: f64 = 0.2;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, source: ResolutionSource, elapsed: Duration) {
        let ms = elapsed.as_secs_f64() * 1000.0;
        let stat = self.stats.entry(source).or_insert(LatencyStat {
            samples: 0,
            average_ms: ms,
        });
        stat.samples += 1;
        stat.average_ms += Self::ALPHA * (ms - stat.average_ms);
    }

    pub fn average(&self, source: ResolutionSource) -> Option<Duration> {
        self.stats
            .get(&source)
            .map(|s| Duration::from_secs_f64(s.average_ms.max(0.0) / 1000.0))
    }

    pub fn get(&self, source: ResolutionSource) -> Option<&LatencyStat> {
        self.stats.get(&source)
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolverSnapshot {
    pub entries: Vec<PersistedEntry>,
    #[serde(default)]
    pub latencies: LatencyTable,
}

impl ResolverSnapshot {
    /// Write the snapshot, replacing any existing file.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        let json = fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}
