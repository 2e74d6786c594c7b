use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::errors::{PipelineError, PipelineResult};
use crate::types::{Label, ResidueKey};

/// Which labels a residue may legitimately carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationMode {
    /// Every atom was queued as positive, so every residue must come out positive
    Inference,
    /// Both labels are expected
    Training,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResiduePrediction {
    pub residue: ResidueKey,
    /// Mean of the residue's atom scores
    pub score: f64,
    pub label: Label,
}

/// Collapses atom rows into one prediction per residue.
///
/// Rows of a residue must be contiguous. The grouping is checked rather than re-sorted: a
/// residue key that reappears after its group closed is an error.
#[derive(Debug, Clone, Copy)]
pub struct ResidueAggregator {
    mode: AggregationMode,
}

impl ResidueAggregator {
    pub fn new(mode: AggregationMode) -> Self {
        Self { mode }
    }

    pub fn aggregate(
        &self,
        keys: &[ResidueKey],
        scores: &[f64],
        labels: &[Label],
    ) -> PipelineResult<Vec<ResiduePrediction>> {
        if keys.len() != scores.len() || keys.len() != labels.len() {
            return Err(PipelineError::ValidationError {
                message: format!(
                    "aggregation inputs differ in length: {} keys, {} scores, {} labels",
                    keys.len(),
                    scores.len(),
                    labels.len()
                ),
            });
        }

        let mut predictions = Vec::new();
        let mut closed: HashSet<&ResidueKey> = HashSet::new();
        // (key, label, score sum, row count) of the open group
        let mut open: Option<(&ResidueKey, Label, f64, usize)> = None;

        for (row, ((key, &score), &label)) in keys.iter().zip(scores).zip(labels).enumerate() {
            if let Some((_, open_label, sum, count)) = open.as_mut().filter(|g| g.0 == key) {
                if label != *open_label {
                    return Err(PipelineError::LabelMismatch {
                        residue: key.clone(),
                        row,
                        expected: *open_label,
                        found: label,
                    });
                }
                *sum += score;
                *count += 1;
                continue;
            }

            if closed.contains(key) {
                return Err(PipelineError::NonContiguousResidue { residue: key.clone(), row });
            }
            if let Some(group) = open.take() {
                closed.insert(group.0);
                predictions.push(self.emit(group)?);
            }
            open = Some((key, label, score, 1));
        }
        if let Some(group) = open {
            predictions.push(self.emit(group)?);
        }

        Ok(predictions)
    }

    fn emit(&self, (key, label, sum, count): (&ResidueKey, Label, f64, usize)) -> PipelineResult<ResiduePrediction> {
        if self.mode == AggregationMode::Inference && !label.is_positive() {
            return Err(PipelineError::UnexpectedLabel { residue: key.clone(), label });
        }
        Ok(ResiduePrediction { residue: key.clone(), score: sum / count as f64, label })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StructureId;
    use Label::{Negative as N, Positive as P};

    fn key(residue: usize) -> ResidueKey {
        ResidueKey::new(StructureId::new("s"), residue)
    }

    #[test]
    fn test_mean_per_residue() {
        let predictions = ResidueAggregator::new(AggregationMode::Inference)
            .aggregate(&[key(1), key(1), key(2)], &[0.2, 0.4, 0.9], &[P, P, P])
            .unwrap();
        assert_eq!(predictions.len(), 2);
        assert_eq!(predictions[0].residue, key(1));
        assert!((predictions[0].score - 0.3).abs() < 1e-12);
        assert_eq!(predictions[0].label, P);
        assert_eq!(predictions[1].residue, key(2));
        assert_eq!(predictions[1].score, 0.9);
    }

    #[test]
    fn test_label_mismatch_is_fatal() {
        let err = ResidueAggregator::new(AggregationMode::Training)
            .aggregate(&[key(1), key(1)], &[0.1, 0.5], &[P, N])
            .unwrap_err();
        match err {
            PipelineError::LabelMismatch { residue, row, expected, found } => {
                assert_eq!(residue, key(1));
                assert_eq!(row, 1);
                assert_eq!(expected, P);
                assert_eq!(found, N);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_training_keeps_both_labels() {
        let predictions = ResidueAggregator::new(AggregationMode::Training)
            .aggregate(&[key(0), key(3), key(3)], &[0.5, 0.1, 0.3], &[P, N, N])
            .unwrap();
        let labels: Vec<Label> = predictions.iter().map(|p| p.label).collect();
        assert_eq!(labels, vec![P, N]);
        assert!((predictions[1].score - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_inference_rejects_negative_residue() {
        let err = ResidueAggregator::new(AggregationMode::Inference)
            .aggregate(&[key(0), key(1)], &[0.5, 0.1], &[P, N])
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnexpectedLabel { label: N, .. }));
    }

    #[test]
    fn test_non_contiguous_residue_is_fatal() {
        let err = ResidueAggregator::new(AggregationMode::Training)
            .aggregate(&[key(1), key(2), key(1)], &[0.1, 0.2, 0.3], &[P, P, P])
            .unwrap_err();
        assert!(matches!(err, PipelineError::NonContiguousResidue { row: 2, .. }));
    }

    #[test]
    fn test_same_residue_index_in_other_structure_is_a_new_group() {
        let other = ResidueKey::new(StructureId::new("t"), 1);
        let predictions = ResidueAggregator::new(AggregationMode::Training)
            .aggregate(&[key(1), other.clone()], &[0.1, 0.2], &[P, P])
            .unwrap();
        assert_eq!(predictions.len(), 2);
        assert_eq!(predictions[1].residue, other);
    }

    #[test]
    fn test_empty_input_and_length_check() {
        let aggregator = ResidueAggregator::new(AggregationMode::Training);
        assert!(aggregator.aggregate(&[], &[], &[]).unwrap().is_empty());
        assert!(aggregator.aggregate(&[key(0)], &[], &[P]).is_err());
    }
}
