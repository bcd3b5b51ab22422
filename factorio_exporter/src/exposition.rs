//! Prometheus text exposition of translated families.
//!
//! Every call builds a fresh [`Registry`], so nothing observed in one scrape
//! leaks into the next. The registry sorts families by name and samples by
//! label values, which makes the output of identical inputs byte-identical.

use prometheus::{CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder};
use tracing::warn;

use crate::metric::{Family, Kind, Sample};

/// Errors produced while encoding.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The prometheus registry or encoder rejected the input.
    #[error("prometheus encoding failed: {0}")]
    Prometheus(#[from] prometheus::Error),
    /// The encoder produced invalid UTF-8.
    #[error("encoded exposition is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Content type of the rendered exposition.
pub const CONTENT_TYPE: &str = prometheus::TEXT_FORMAT;

fn labels(sample: &Sample) -> Vec<&str> {
    sample.labels.iter().map(String::as_str).collect()
}

fn register(registry: &Registry, family: &Family) -> Result<(), Error> {
    let opts = Opts::new(family.name, family.help);
    match family.kind {
        Kind::Gauge => {
            let vec = GaugeVec::new(opts, family.label_keys)?;
            for sample in &family.samples {
                vec.get_metric_with_label_values(&labels(sample))?
                    .set(sample.value);
            }
            registry.register(Box::new(vec))?;
        }
        Kind::Counter => {
            let vec = CounterVec::new(opts, family.label_keys)?;
            for sample in &family.samples {
                if sample.value.is_nan() || sample.value < 0.0 {
                    warn!(
                        "dropping {} sample {:?} with invalid counter value {}",
                        family.name, sample.labels, sample.value
                    );
                    continue;
                }
                vec.get_metric_with_label_values(&labels(sample))?
                    .inc_by(sample.value);
            }
            registry.register(Box::new(vec))?;
        }
    }
    Ok(())
}

/// Render `families` in the Prometheus text format.
///
/// Families without samples are omitted.
///
/// # Errors
///
/// Returns an error if a family cannot be registered or encoded.
pub fn encode(families: &[Family]) -> Result<String, Error> {
    let registry = Registry::new();
    for family in families.iter().filter(|family| !family.samples.is_empty()) {
        register(&registry, family)?;
    }

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
