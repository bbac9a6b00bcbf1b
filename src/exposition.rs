//! Prometheus text exposition of a [`ProbeRegistry`].
//!
//! Each probe registry is loaded into a throwaway `prometheus::Registry` and
//! rendered with `TextEncoder`. `gather()` orders families by name and
//! samples by label values, and label pairs are kept sorted by name, so equal
//! registries always render to identical bytes.

use crate::error::{CommvaultError, Result};
use crate::metrics::{FamilySamples, MetricKind, MetricSample, ProbeRegistry};
use prometheus::{CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder};

/// Content type of the probe response.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Encode a probe registry in Prometheus text format.
pub fn encode(registry: &ProbeRegistry) -> Result<String> {
    let prometheus_registry = Registry::new();
    for family in registry.families() {
        register_family(&prometheus_registry, family)?;
    }

    let encoder = TextEncoder::new();
    let mut buffer = Vec::with_capacity(8192);
    encoder
        .encode(&prometheus_registry.gather(), &mut buffer)
        .map_err(|e| CommvaultError::Metrics(e.to_string()))?;

    String::from_utf8(buffer).map_err(|e| CommvaultError::Metrics(e.to_string()))
}

fn register_family(registry: &Registry, family: &FamilySamples) -> Result<()> {
    let desc = family.family();
    let label_names: Vec<&str> = family
        .samples()
        .first()
        .map(|sample| sample.labels().iter().map(|(key, _)| *key).collect())
        .unwrap_or_default();
    let opts = Opts::new(desc.name, desc.help);

    match desc.kind {
        MetricKind::Gauge => {
            let gauges = GaugeVec::new(opts, label_names.as_slice())
                .map_err(|e| CommvaultError::Metrics(e.to_string()))?;
            for sample in family.samples() {
                let values = label_values(sample, &label_names)?;
                gauges.with_label_values(values.as_slice()).set(sample.value());
            }
            registry
                .register(Box::new(gauges))
                .map_err(|e| CommvaultError::Metrics(e.to_string()))?;
        }
        MetricKind::Counter => {
            let counters = CounterVec::new(opts, label_names.as_slice())
                .map_err(|e| CommvaultError::Metrics(e.to_string()))?;
            for sample in family.samples() {
                if sample.value() < 0.0 {
                    return Err(CommvaultError::Metrics(format!(
                        "counter {} cannot be negative",
                        desc.name
                    )));
                }
                let values = label_values(sample, &label_names)?;
                counters
                    .with_label_values(values.as_slice())
                    .inc_by(sample.value());
            }
            registry
                .register(Box::new(counters))
                .map_err(|e| CommvaultError::Metrics(e.to_string()))?;
        }
    }

    Ok(())
}

/// Label values of `sample` in the order of `names`.
fn label_values<'a>(sample: &'a MetricSample, names: &[&str]) -> Result<Vec<&'a str>> {
    let keys_match = sample.labels().len() == names.len()
        && sample
            .labels()
            .iter()
            .zip(names)
            .all(|((key, _), name)| key == name);
    if !keys_match {
        return Err(CommvaultError::Metrics(format!(
            "inconsistent label names in family {}",
            sample.name()
        )));
    }

    Ok(sample.labels().iter().map(|(_, value)| value.as_str()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Family;

    static STATUS: Family = Family::gauge("test_job_status", "Job status");
    static UP: Family = Family::gauge("test_up", "Probe success");
    static BYTES: Family = Family::counter("test_bytes_total", "Bytes written");

    #[test]
    fn test_encode_help_type_and_samples() {
        let registry = ProbeRegistry::from_samples([
            MetricSample::scalar(&UP, 1.0),
            MetricSample::new(&STATUS, [("kind", "VSA"), ("job_id", "1001")], 1.0),
        ]);
        let text = encode(&registry).unwrap();

        assert!(text.contains("# HELP test_job_status Job status"));
        assert!(text.contains("# TYPE test_job_status gauge"));
        assert!(text.contains(r#"test_job_status{job_id="1001",kind="VSA"} 1"#));
        assert!(text.contains("test_up 1"));
        let status_at = text.find("# HELP test_job_status").unwrap();
        let up_at = text.find("# HELP test_up").unwrap();
        assert!(status_at < up_at);
    }

    #[test]
    fn test_encode_counter() {
        let registry =
            ProbeRegistry::from_samples([MetricSample::new(&BYTES, [("target", "a")], 42.0)]);
        let text = encode(&registry).unwrap();
        assert!(text.contains("# TYPE test_bytes_total counter"));
        assert!(text.contains(r#"test_bytes_total{target="a"} 42"#));

        let negative =
            ProbeRegistry::from_samples([MetricSample::new(&BYTES, [("target", "a")], -1.0)]);
        assert!(encode(&negative).is_err());
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let samples = || {
            vec![
                MetricSample::new(&STATUS, [("job_id", "2"), ("kind", "SQL")], 0.0),
                MetricSample::scalar(&UP, 0.0),
                MetricSample::new(&STATUS, [("job_id", "1"), ("kind", "VSA")], 1.0),
            ]
        };
        let forward = ProbeRegistry::from_samples(samples());
        let mut reversed_samples = samples();
        reversed_samples.reverse();
        let reversed = ProbeRegistry::from_samples(reversed_samples);

        let first = encode(&forward).unwrap();
        assert_eq!(first, encode(&forward).unwrap());
        assert_eq!(first, encode(&reversed).unwrap());
    }

    #[test]
    fn test_inconsistent_labels_rejected() {
        let registry = ProbeRegistry::from_samples([
            MetricSample::new(&STATUS, [("job_id", "1")], 1.0),
            MetricSample::new(&STATUS, [("kind", "VSA")], 1.0),
        ]);
        assert!(encode(&registry).is_err());
    }

    #[test]
    fn test_duplicate_counter_samples_not_summed() {
        let registry = ProbeRegistry::from_samples([
            MetricSample::new(&BYTES, [("target", "a")], 10.0),
            MetricSample::new(&BYTES, [("target", "a")], 5.0),
        ]);
        let text = encode(&registry).unwrap();

        assert!(text.contains(r#"test_bytes_total{target="a"} 10"#));
        assert_eq!(text.matches(r#"test_bytes_total{target="a"}"#).count(), 1);
    }

    #[test]
    fn test_empty_registry() {
        assert_eq!(encode(&ProbeRegistry::default()).unwrap(), "");
    }
}
