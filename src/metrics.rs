//! Request-scoped metric samples and the registry that groups them.
//!
//! A [`ProbeRegistry`] is assembled once per probe from the samples produced
//! by [`crate::mapper`], read by [`crate::exposition`], and dropped with the
//! response. Nothing here is shared between requests.

use std::collections::BTreeMap;
use tracing::warn;

/// Prometheus metric type of a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Gauge,
    Counter,
}

/// Static description of a metric family.
#[derive(Debug, PartialEq, Eq)]
pub struct Family {
    pub name: &'static str,
    pub help: &'static str,
    pub kind: MetricKind,
}

impl Family {
    pub const fn gauge(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            kind: MetricKind::Gauge,
        }
    }

    pub const fn counter(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            kind: MetricKind::Counter,
        }
    }
}

/// One labelled value of a family. Labels are kept sorted by key.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    family: &'static Family,
    labels: Vec<(&'static str, String)>,
    value: f64,
}

impl MetricSample {
    pub fn new<I, V>(family: &'static Family, labels: I, value: f64) -> Self
    where
        I: IntoIterator<Item = (&'static str, V)>,
        V: Into<String>,
    {
        let mut labels: Vec<(&'static str, String)> = labels
            .into_iter()
            .map(|(key, value)| (key, value.into()))
            .collect();
        labels.sort_by(|a, b| a.0.cmp(b.0));

        Self {
            family,
            labels,
            value,
        }
    }

    /// Sample without labels.
    pub fn scalar(family: &'static Family, value: f64) -> Self {
        Self {
            family,
            labels: Vec::new(),
            value,
        }
    }

    pub fn family(&self) -> &'static Family {
        self.family
    }

    pub fn name(&self) -> &'static str {
        self.family.name
    }

    pub fn labels(&self) -> &[(&'static str, String)] {
        &self.labels
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

/// Samples of a single family.
#[derive(Debug, Clone)]
pub struct FamilySamples {
    family: &'static Family,
    samples: Vec<MetricSample>,
}

impl FamilySamples {
    pub fn family(&self) -> &'static Family {
        self.family
    }

    pub fn samples(&self) -> &[MetricSample] {
        &self.samples
    }
}

/// Immutable set of metric families produced by one probe.
#[derive(Debug, Clone, Default)]
pub struct ProbeRegistry {
    families: BTreeMap<&'static str, FamilySamples>,
}

impl ProbeRegistry {
    /// Group samples into families ordered by name, samples ordered by labels.
    pub fn from_samples(samples: impl IntoIterator<Item = MetricSample>) -> Self {
        let mut families: BTreeMap<&'static str, FamilySamples> = BTreeMap::new();
        for sample in samples {
            let family = sample.family;
            families
                .entry(family.name)
                .or_insert_with(|| FamilySamples {
                    family,
                    samples: Vec::new(),
                })
                .samples
                .push(sample);
        }

        for family in families.values_mut() {
            family.samples.sort_by(|a, b| a.labels.cmp(&b.labels));

            // The sort is stable, so the first sample of a label set wins.
            let before = family.samples.len();
            family.samples.dedup_by(|later, first| later.labels == first.labels);
            if family.samples.len() != before {
                warn!(
                    family = family.family.name,
                    "Dropped {} samples with duplicate labels",
                    before - family.samples.len()
                );
            }
        }

        Self { families }
    }

    /// Families in name order.
    pub fn families(&self) -> impl Iterator<Item = &FamilySamples> {
        self.families.values()
    }

    /// Samples of the named family, if present.
    pub fn family(&self, name: &str) -> Option<&[MetricSample]> {
        self.families.get(name).map(|f| f.samples.as_slice())
    }

    /// Value of the sample in `name` whose labels include all of `labels`.
    pub fn value(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        self.family(name)?
            .iter()
            .find(|sample| {
                labels
                    .iter()
                    .all(|(key, value)| sample.label(key) == Some(*value))
            })
            .map(MetricSample::value)
    }

    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static JOB_STATUS: Family = Family::gauge("test_job_status", "Job status");
    static UP: Family = Family::gauge("test_up", "Up");

    #[test]
    fn test_labels_sorted_by_key() {
        let sample = MetricSample::new(&JOB_STATUS, [("kind", "VSA"), ("job_id", "1")], 1.0);
        let keys: Vec<_> = sample.labels().iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec!["job_id", "kind"]);
        assert_eq!(sample.label("kind"), Some("VSA"));
    }

    #[test]
    fn test_registry_groups_and_orders() {
        let registry = ProbeRegistry::from_samples([
            MetricSample::scalar(&UP, 1.0),
            MetricSample::new(&JOB_STATUS, [("job_id", "2")], 0.0),
            MetricSample::new(&JOB_STATUS, [("job_id", "1")], 1.0),
        ]);

        let names: Vec<_> = registry.families().map(|f| f.family().name).collect();
        assert_eq!(names, vec!["test_job_status", "test_up"]);

        let jobs = registry.family("test_job_status").unwrap();
        assert_eq!(jobs[0].label("job_id"), Some("1"));
        assert_eq!(registry.value("test_job_status", &[("job_id", "2")]), Some(0.0));
        assert_eq!(registry.value("test_up", &[]), Some(1.0));
        assert!(registry.family("missing").is_none());
    }

    #[test]
    fn test_duplicate_label_sets_keep_first_sample() {
        let registry = ProbeRegistry::from_samples([
            MetricSample::new(&JOB_STATUS, [("job_id", "1")], 1.0),
            MetricSample::new(&JOB_STATUS, [("job_id", "2")], 1.0),
            MetricSample::new(&JOB_STATUS, [("job_id", "1")], 0.0),
        ]);

        let jobs = registry.family("test_job_status").unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(registry.value("test_job_status", &[("job_id", "1")]), Some(1.0));
    }
}
