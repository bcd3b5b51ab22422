//! Flat, labeled metric samples.
//!
//! A [`Family`] is every sample emitted under one metric name during one
//! translation. Families are built through a [`Builder`] whose label arity is
//! fixed by the [`Descriptor`] it was created from, so two samples of the same
//! name can never disagree on their label keys.

/// The kind of a metric family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Monotonically increasing cumulative total.
    Counter,
    /// Point-in-time value.
    Gauge,
}

/// Name, documentation, kind and label keys of a metric family with `N`
/// labels.
#[derive(Debug)]
pub struct Descriptor<const N: usize> {
    /// The metric name, exposed verbatim.
    pub name: &'static str,
    /// The HELP string.
    pub help: &'static str,
    /// Counter or gauge.
    pub kind: Kind,
    /// Label keys in exposition order.
    pub label_keys: [&'static str; N],
}

impl<const N: usize> Descriptor<N> {
    /// Begin collecting samples for this family.
    #[must_use]
    pub fn builder(&'static self) -> Builder<N> {
        Builder {
            descriptor: self,
            samples: Vec::new(),
        }
    }
}

/// Accumulates the samples of one family.
#[derive(Debug)]
pub struct Builder<const N: usize> {
    descriptor: &'static Descriptor<N>,
    samples: Vec<([String; N], f64)>,
}

impl<const N: usize> Builder<N> {
    /// Add a sample with the given label values.
    pub fn push(&mut self, labels: [&str; N], value: f64) {
        self.samples.push((labels.map(str::to_owned), value));
    }

    /// Finish this family.
    #[must_use]
    pub fn build(self) -> Family {
        Family {
            name: self.descriptor.name,
            help: self.descriptor.help,
            kind: self.descriptor.kind,
            label_keys: &self.descriptor.label_keys,
            samples: self
                .samples
                .into_iter()
                .map(|(labels, value)| Sample {
                    labels: labels.into(),
                    value,
                })
                .collect(),
        }
    }
}

/// One labeled value.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Label values, positionally matching [`Family::label_keys`].
    pub labels: Vec<String>,
    /// The sample value.
    pub value: f64,
}

/// All samples of one metric name.
#[derive(Debug, Clone, PartialEq)]
pub struct Family {
    /// The metric name.
    pub name: &'static str,
    /// The HELP string.
    pub help: &'static str,
    /// Counter or gauge.
    pub kind: Kind,
    /// Label keys shared by every sample.
    pub label_keys: &'static [&'static str],
    /// Samples in emission order.
    pub samples: Vec<Sample>,
}

impl Family {
    /// Look up the value of the sample with exactly these label values.
    #[must_use]
    pub fn value(&self, labels: &[&str]) -> Option<f64> {
        self.samples
            .iter()
            .find(|sample| sample.labels.iter().map(String::as_str).eq(labels.iter().copied()))
            .map(|sample| sample.value)
    }
}

/// Convert a boolean to the 0/1 convention of gauges.
#[must_use]
pub fn flag(value: bool) -> f64 {
    if value { 1.0 } else { 0.0 }
}
