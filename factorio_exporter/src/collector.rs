//! Per-scrape collection.
//!
//! A [`Collector`] is bound to one set of metric groups. Each call to
//! [`Collector::collect`] acquires a fresh snapshot, translates the bound
//! groups and appends the exporter health gauge. Nothing is cached between
//! calls.

use metrics::counter;
use tracing::warn;

use crate::{
    metric::{Descriptor, Family, Kind},
    source::Source,
    translate::{self, Group},
};

/// Health of the last acquisition for this collector.
pub static EXPORTER_ERROR: Descriptor<0> = Descriptor {
    name: "factorio_exporter_error",
    help: "Whether an error occurred while fetching statistics from the Factorio server.",
    kind: Kind::Gauge,
    label_keys: [],
};

fn health(failed: bool) -> Family {
    let mut error = EXPORTER_ERROR.builder();
    error.push([], crate::metric::flag(failed));
    error.build()
}

/// Collects one scrape's worth of families.
#[derive(Debug, Clone)]
pub struct Collector {
    name: &'static str,
    source: Source,
    groups: Vec<Group>,
}

impl Collector {
    /// A collector over every group.
    #[must_use]
    pub fn all(source: Source) -> Self {
        Self {
            name: "all",
            source,
            groups: Group::ALL.to_vec(),
        }
    }

    /// A collector over a single group.
    #[must_use]
    pub fn group(source: Source, group: Group) -> Self {
        Self {
            name: group.name(),
            source,
            groups: vec![group],
        }
    }

    /// Name used to label this collector's telemetry.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[cfg(test)]
    fn groups(&self) -> &[Group] {
        &self.groups
    }

    /// Acquire a snapshot and translate it.
    ///
    /// Acquisition failure is not an error: the result then holds only the
    /// health gauge, set to 1.
    pub async fn collect(&self) -> Vec<Family> {
        counter!("exporter_scrapes_total", "group" => self.name).increment(1);

        let snapshot = match self.source.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!("failed to acquire snapshot for {}: {err}", self.name);
                counter!("exporter_acquisition_failures_total", "kind" => err.kind())
                    .increment(1);
                return vec![health(true)];
            }
        };

        let mut families = translate::translate(&snapshot, &self.groups);
        families.push(health(false));
        families
    }
}
