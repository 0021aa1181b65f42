//! Accuracy calculation over stored results.

use std::collections::HashMap;

use super::types::{DatasetMessage, EvaluationResult, EvaluationStats};

/// Rounds to two decimal places.
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Scores `results` against the ground-truth labels of `messages`.
///
/// A result with an error message is an error. Otherwise it is correct when
/// its label equals the expected one; a missing label is incorrect. Results
/// whose message is not part of `messages` are ignored. Accuracy is the share
/// of correct results among non-error results, in percent.
pub fn calculate_stats(results: &[EvaluationResult], messages: &[DatasetMessage]) -> EvaluationStats {
    let expected: HashMap<i64, bool> = messages.iter().map(|m| (m.id, m.label)).collect();

    let mut stats = EvaluationStats::default();
    for result in results {
        let Some(&label) = expected.get(&result.dataset_message_id) else {
            continue;
        };
        stats.total += 1;
        if result.is_error() {
            stats.errors += 1;
        } else if result.llm_label == Some(label) {
            stats.correct += 1;
        }
    }

    stats.incorrect = stats.total - stats.correct - stats.errors;
    stats.accuracy = accuracy(stats.correct, stats.total, stats.errors);
    stats
}

/// `correct / (total - errors) * 100`, rounded to two decimals; 0 when no
/// result was scorable.
pub fn accuracy(correct: i64, total: i64, errors: i64) -> f64 {
    let scored = total - errors;
    if scored <= 0 {
        return 0.0;
    }
    round2(correct as f64 / scored as f64 * 100.0)
}
