//! Latency summaries.

use std::time::Duration;

use serde::Serialize;

/// Order statistics over one benchmark run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeDist {
    #[serde(rename = "min_ns", with = "nanos")]
    pub min: Duration,
    #[serde(rename = "p50_ns", with = "nanos")]
    pub p50: Duration,
    #[serde(rename = "p90_ns", with = "nanos")]
    pub p90: Duration,
    #[serde(rename = "p99_ns", with = "nanos")]
    pub p99: Duration,
    #[serde(rename = "p999_ns", with = "nanos")]
    pub p999: Duration,
}

/// Sorts a copy of `samples` and picks the tail percentiles.
///
/// The index for a tail fraction `1/d` is `count - ceil(count / d)`. If it
/// falls outside the samples the previous, coarser statistic is reused, so a
/// single sample yields five equal values. Returns `None` for no samples.
pub fn summarize(samples: &[Duration]) -> Option<TimeDist> {
    let mut sorted = samples.to_vec();
    sorted.sort_unstable();

    let min = *sorted.first()?;
    let count = sorted.len();
    let pick = |divisor: usize, fallback: Duration| {
        sorted
            .get(count - count.div_ceil(divisor))
            .copied()
            .unwrap_or(fallback)
    };

    let p50 = pick(2, min);
    let p90 = pick(10, p50);
    let p99 = pick(100, p90);
    let p999 = pick(1000, p99);
    Some(TimeDist {
        min,
        p50,
        p90,
        p99,
        p999,
    })
}

/// Formats a duration in the largest unit that keeps it above one.
pub fn format_time(time: Duration) -> String {
    let secs = time.as_secs_f64();
    if secs < 1e-6 {
        format!("{:5.1} ns", secs * 1e9)
    } else if secs < 1e-3 {
        format!("{:5.1} us", secs * 1e6)
    } else if secs < 1.0 {
        format!("{:5.2} ms", secs * 1e3)
    } else {
        format!("{:5.2} s ", secs)
    }
}

pub fn basic_header() -> &'static str {
    "   median       min       p90       p99      p999  description"
}

pub fn basic_row(dist: &TimeDist, description: &str) -> String {
    format!(
        "{:>9} {:>9} {:>9} {:>9} {:>9}  {}",
        format_time(dist.p50),
        format_time(dist.min),
        format_time(dist.p90),
        format_time(dist.p99),
        format_time(dist.p999),
        description
    )
}

mod nanos {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(time: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(time.as_nanos()).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ns(n: u64) -> Duration {
        Duration::from_nanos(n)
    }

    #[test]
    fn empty_has_no_summary() {
        assert_eq!(summarize(&[]), None);
    }

    #[test]
    fn single_sample_collapses() {
        let dist = summarize(&[ns(42)]).unwrap();
        assert_eq!(dist.min, ns(42));
        assert_eq!(dist.p50, ns(42));
        assert_eq!(dist.p90, ns(42));
        assert_eq!(dist.p99, ns(42));
        assert_eq!(dist.p999, ns(42));
    }

    #[test]
    fn thousand_samples_pick_expected_ranks() {
        // reversed so the summary has to sort
        let samples: Vec<_> = (1..=1000).rev().map(ns).collect();
        let dist = summarize(&samples).unwrap();
        assert_eq!(dist.min, ns(1));
        assert_eq!(dist.p50, ns(501));
        assert_eq!(dist.p90, ns(901));
        assert_eq!(dist.p99, ns(991));
        assert_eq!(dist.p999, ns(1000));
    }

    #[test]
    fn ordered_for_any_size() {
        for count in 1..300u64 {
            // deterministic scramble
            let samples: Vec<_> = (0..count).map(|i| ns((i * 7919) % 1013 + 3)).collect();
            let dist = summarize(&samples).unwrap();
            assert_eq!(dist.min, *samples.iter().min().unwrap(), "count {count}");
            assert!(dist.min <= dist.p50, "count {count}");
            assert!(dist.p50 <= dist.p90, "count {count}");
            assert!(dist.p90 <= dist.p99, "count {count}");
            assert!(dist.p99 <= dist.p999, "count {count}");
        }
    }

    #[test]
    fn summarize_leaves_input_untouched() {
        let samples = vec![ns(3), ns(1), ns(2)];
        summarize(&samples);
        assert_eq!(samples, vec![ns(3), ns(1), ns(2)]);
    }

    #[test]
    fn units_scale_per_value() {
        assert_eq!(format_time(ns(512)), "512.0 ns");
        assert_eq!(format_time(Duration::from_micros(12)), " 12.0 us");
        assert_eq!(format_time(Duration::from_micros(1500)), " 1.50 ms");
        assert_eq!(format_time(Duration::from_millis(2500)), " 2.50 s ");
    }

    #[test]
    fn row_keeps_column_order() {
        let dist = TimeDist {
            min: ns(100),
            p50: ns(200),
            p90: ns(300),
            p99: ns(400),
            p999: ns(500),
        };
        let row = basic_row(&dist, "demo");
        assert_eq!(
            row,
            " 200.0 ns  100.0 ns  300.0 ns  400.0 ns  500.0 ns  demo"
        );
    }

    #[test]
    fn json_reports_nanoseconds() {
        let dist = summarize(&[Duration::from_micros(5)]).unwrap();
        let json = serde_json::to_value(dist).unwrap();
        assert_eq!(json["p50_ns"], 5000);
        assert_eq!(json["min_ns"], 5000);
    }
}
