//! Grouping of measurements by line key

use std::collections::BTreeMap;

use crate::model::{LineKey, Measurement};

/// Group measurements by `(operator, ip_version)`
///
/// No filtering and no deduplication happen here. Within a bucket the input
/// order is preserved.
pub fn aggregate<I>(measurements: I) -> BTreeMap<LineKey, Vec<Measurement>>
where
    I: IntoIterator<Item = Measurement>,
{
    let mut buckets: BTreeMap<LineKey, Vec<Measurement>> = BTreeMap::new();
    for measurement in measurements {
        buckets
            .entry(measurement.line_key())
            .or_default()
            .push(measurement);
    }
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IpVersion;

    fn m(operator: &str, version: IpVersion, ip: &str, device: &str) -> Measurement {
        Measurement {
            device: device.to_string(),
            operator: operator.to_string(),
            ip_version: version,
            ip: ip.to_string(),
            latency_ms: 10.0,
            download_mbps: 50.0,
            loss_pct: 0.0,
            region: String::new(),
        }
    }

    #[test]
    fn empty_input_yields_empty_map() {
        assert!(aggregate(Vec::new()).is_empty());
    }

    #[test]
    fn buckets_by_operator_and_version() {
        let input = vec![
            m("cu", IpVersion::V4, "1.1.1.1", "a"),
            m("cm", IpVersion::V4, "2.2.2.2", "a"),
            m("cu", IpVersion::V6, "2606:4700::1111", "a"),
            m("cu", IpVersion::V4, "1.0.0.1", "b"),
            m("cu", IpVersion::V4, "1.1.1.1", "c"),
        ];

        let buckets = aggregate(input.clone());

        let keys: Vec<String> = buckets.keys().map(ToString::to_string).collect();
        assert_eq!(keys, vec!["cm-v4", "cu-v4", "cu-v6"]);

        for (key, bucket) in &buckets {
            assert!(bucket.iter().all(|m| &m.line_key() == key));
        }

        // Input order is kept inside a bucket, duplicates included
        let cu_v4: Vec<(&str, &str)> = buckets[&LineKey::new("cu", IpVersion::V4)]
            .iter()
            .map(|m| (m.ip.as_str(), m.device.as_str()))
            .collect();
        assert_eq!(
            cu_v4,
            vec![("1.1.1.1", "a"), ("1.0.0.1", "b"), ("1.1.1.1", "c")]
        );

        // Nothing lost, nothing added
        let total: usize = buckets.values().map(Vec::len).sum();
        assert_eq!(total, input.len());
        for original in &input {
            let bucket = &buckets[&original.line_key()];
            let expected = input.iter().filter(|m| *m == original).count();
            assert_eq!(bucket.iter().filter(|m| *m == original).count(), expected);
        }
    }
}
