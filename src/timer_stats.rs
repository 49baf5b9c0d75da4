//! Pure timer summary-statistics and percentile computation.
//!
//! Given a bucket's accumulated sample points and the configured percentile
//! thresholds, produces the Graphite-line suffixes for that bucket. Kept
//! free of any I/O or channel concerns so it can be tested as ordinary
//! arithmetic.

use crate::model::PercentileThreshold;

/// One `<suffix> <value>` pair, to be joined with the bucket's
/// `<prefix_timers><bucket>.` stem and a timestamp by the caller.
pub struct TimerLine {
    pub suffix: String,
    pub value: f64,
}

/// Computes every `TimerLine` for one timer bucket's flush.
/// `submitted` is the bucket's `Σ round(1/sᵢ)` estimate, `flush_interval` is
/// in seconds. `points` need not be pre-sorted.
pub fn compute_timer_lines(
    points: &[f64],
    submitted: u64,
    flush_interval: u64,
    thresholds: &[PercentileThreshold],
) -> Vec<TimerLine> {
    let mut sorted = points.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("timer samples must be finite"));
    let n = sorted.len();
    debug_assert!(n >= 1, "timer buckets with no points must be skipped by caller");

    let min = sorted[0];
    let max = sorted[n - 1];
    let sum: f64 = sorted.iter().sum();
    let mean = sum / n as f64;
    let variance: f64 = sorted.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
    let std = variance.sqrt();
    let median = if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    };

    // cumulative[i] = sum of sorted[0..=i]
    let mut cumulative = Vec::with_capacity(n);
    let mut running = 0.0;
    for &x in &sorted {
        running += x;
        cumulative.push(running);
    }

    // cumulative[-1] is conventionally 0 (the empty prefix sum); this lets
    // k == n (a threshold of +/-100) fall out of the same formula as any
    // other k instead of needing a special case.
    let cumulative_at = |i: isize| -> f64 {
        if i < 0 {
            0.0
        } else {
            cumulative[i as usize]
        }
    };

    let mut lines = Vec::new();

    for threshold in thresholds {
        let (upper, sum_p, k) = if n == 1 {
            (sorted[0], sorted[0], 1)
        } else {
            let abs = threshold.absolute();
            let k = (((abs / 100.0) * n as f64 + 0.5).floor() as usize).clamp(1, n);
            if threshold.is_lower() {
                let max_at_threshold = sorted[k.min(n - 1)];
                let sum_p = cumulative_at((n - 1) as isize)
                    - cumulative_at(n as isize - k as isize - 1);
                (max_at_threshold, sum_p, k)
            } else {
                (sorted[k - 1], cumulative[k - 1], k)
            }
        };
        let mean_p = sum_p / k as f64;

        let label = &threshold.label;
        if threshold.is_lower() {
            lines.push(TimerLine {
                suffix: format!("lower_{label}"),
                value: upper,
            });
        } else {
            lines.push(TimerLine {
                suffix: format!("upper_{label}"),
                value: upper,
            });
        }
        lines.push(TimerLine {
            suffix: format!("mean_{label}"),
            value: mean_p,
        });
        lines.push(TimerLine {
            suffix: format!("sum_{label}"),
            value: sum_p,
        });
    }

    lines.push(TimerLine {
        suffix: "mean".to_string(),
        value: mean,
    });
    lines.push(TimerLine {
        suffix: "median".to_string(),
        value: median,
    });
    lines.push(TimerLine {
        suffix: "std".to_string(),
        value: std,
    });
    lines.push(TimerLine {
        suffix: "sum".to_string(),
        value: sum,
    });
    lines.push(TimerLine {
        suffix: "upper".to_string(),
        value: max,
    });
    lines.push(TimerLine {
        suffix: "lower".to_string(),
        value: min,
    });
    lines.push(TimerLine {
        suffix: "count".to_string(),
        value: submitted as f64,
    });
    lines.push(TimerLine {
        suffix: "count_ps".to_string(),
        value: submitted as f64 / flush_interval as f64,
    });

    lines
}
