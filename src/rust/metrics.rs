use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::errors::{PipelineError, PipelineResult};
use crate::types::Label;

/// Residue-level cross-validation summary
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub roc_auc: f64,
    /// Average precision, the step-wise area under the precision/recall curve
    pub pr_auc: f64,
    pub positives: usize,
    pub negatives: usize,
}

impl ClassificationMetrics {
    pub fn compute(labels: &[Label], scores: &[f64]) -> PipelineResult<Self> {
        let positives = labels.iter().filter(|l| l.is_positive()).count();
        Ok(Self {
            roc_auc: roc_auc(labels, scores)?,
            pr_auc: average_precision(labels, scores)?,
            positives,
            negatives: labels.len() - positives,
        })
    }

    /// Fraction of positives, the average precision of a random ranking
    pub fn positive_rate(&self) -> f64 {
        let total = self.positives + self.negatives;
        if total == 0 {
            0.0
        } else {
            self.positives as f64 / total as f64
        }
    }
}

/// Cumulative (false positives, true positives) at every distinct score, highest first
fn threshold_counts(labels: &[Label], scores: &[f64]) -> PipelineResult<Vec<(f64, f64)>> {
    if labels.len() != scores.len() {
        return Err(PipelineError::ValidationError {
            message: format!("{} labels but {} scores", labels.len(), scores.len()),
        });
    }
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut counts = Vec::new();
    let (mut fp, mut tp) = (0.0, 0.0);
    for (k, &i) in order.iter().enumerate() {
        if labels[i].is_positive() {
            tp += 1.0;
        } else {
            fp += 1.0;
        }
        let last_of_tie = order.get(k + 1).map_or(true, |&next| scores[next] != scores[i]);
        if last_of_tie {
            counts.push((fp, tp));
        }
    }
    Ok(counts)
}

fn class_totals(labels: &[Label]) -> (f64, f64) {
    let positives = labels.iter().filter(|l| l.is_positive()).count();
    (positives as f64, (labels.len() - positives) as f64)
}

/// Area under the ROC curve, ties handled by linear interpolation
pub fn roc_auc(labels: &[Label], scores: &[f64]) -> PipelineResult<f64> {
    let (positives, negatives) = class_totals(labels);
    if positives == 0.0 || negatives == 0.0 {
        return Err(PipelineError::ValidationError {
            message: "ROC AUC needs both positive and negative labels".to_string(),
        });
    }
    let mut area = 0.0;
    let (mut prev_fpr, mut prev_tpr) = (0.0, 0.0);
    for (fp, tp) in threshold_counts(labels, scores)? {
        let (fpr, tpr) = (fp / negatives, tp / positives);
        area += (fpr - prev_fpr) * (tpr + prev_tpr) / 2.0;
        prev_fpr = fpr;
        prev_tpr = tpr;
    }
    Ok(area)
}

/// Σ (Rₙ − Rₙ₋₁) Pₙ over distinct thresholds
pub fn average_precision(labels: &[Label], scores: &[f64]) -> PipelineResult<f64> {
    let (positives, _) = class_totals(labels);
    if positives == 0.0 {
        return Err(PipelineError::ValidationError {
            message: "average precision needs at least one positive label".to_string(),
        });
    }
    let mut ap = 0.0;
    let mut prev_recall = 0.0;
    for (fp, tp) in threshold_counts(labels, scores)? {
        let recall = tp / positives;
        ap += (recall - prev_recall) * (tp / (tp + fp));
        prev_recall = recall;
    }
    Ok(ap)
}

/// Performance timer for measuring stage durations
pub struct PerformanceTimer {
    start: Instant,
    operation: String,
}

impl PerformanceTimer {
    /// Start timing an operation
    pub fn start(operation: &str) -> Self {
        Self { start: Instant::now(), operation: operation.to_string() }
    }

    /// Finish timing and return the duration
    pub fn finish(self) -> Duration {
        self.start.elapsed()
    }

    /// Finish timing and log the result
    pub fn finish_and_log(self) -> Duration {
        let operation = self.operation.clone();
        let duration = self.finish();
        log::info!("{} took {:.2?}", operation, duration);
        duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use Label::{Negative as N, Positive as P};

    #[test]
    fn test_reference_values() {
        let labels = [N, N, P, P];
        let scores = [0.1, 0.4, 0.35, 0.8];
        assert!((roc_auc(&labels, &scores).unwrap() - 0.75).abs() < 1e-12);
        assert!((average_precision(&labels, &scores).unwrap() - 5.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_perfect_and_reversed_rankings() {
        let labels = [P, P, N, N];
        assert_eq!(roc_auc(&labels, &[0.9, 0.8, 0.2, 0.1]).unwrap(), 1.0);
        assert_eq!(average_precision(&labels, &[0.9, 0.8, 0.2, 0.1]).unwrap(), 1.0);
        assert_eq!(roc_auc(&labels, &[0.1, 0.2, 0.8, 0.9]).unwrap(), 0.0);
    }

    #[test]
    fn test_ties() {
        let labels = [P, N, N, N];
        let scores = [0.5; 4];
        assert_eq!(roc_auc(&labels, &scores).unwrap(), 0.5);
        assert_eq!(average_precision(&labels, &scores).unwrap(), 0.25);
    }

    #[test]
    fn test_single_class_is_rejected() {
        assert!(roc_auc(&[P, P], &[0.1, 0.2]).is_err());
        assert!(average_precision(&[N, N], &[0.1, 0.2]).is_err());
        assert!(roc_auc(&[P, N], &[0.1]).is_err());
    }

    #[test]
    fn test_metrics_summary() {
        let metrics = ClassificationMetrics::compute(&[P, N, N, N], &[0.9, 0.1, 0.2, 0.3]).unwrap();
        assert_eq!(metrics.positives, 1);
        assert_eq!(metrics.negatives, 3);
        assert_eq!(metrics.roc_auc, 1.0);
        assert_eq!(metrics.positive_rate(), 0.25);
    }

    #[test]
    fn test_performance_timer() {
        let timer = PerformanceTimer::start("test_operation");
        thread::sleep(Duration::from_millis(10));
        let duration = timer.finish_and_log();

        assert!(duration >= Duration::from_millis(10));
    }
}
