//! Atom scoring.
//!
//! The pipeline only needs `fit` / `score`; [`CalibratedSvm`] is the implementation shipped
//! with the crate: an L2-regularized L2-loss linear SVM trained by dual coordinate descent,
//! with a Platt sigmoid mapping decision values to probabilities.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::errors::{PipelineError, PipelineResult};
use crate::sparse::CsrMatrix;
use crate::types::Label;

/// Fit/score capability consumed by the orchestrators
pub trait Scorer: Send {
    fn fit(&mut self, x: &CsrMatrix, y: &[Label]) -> PipelineResult<()>;

    /// One score per row of `x`; higher means more likely positive
    fn score(&self, x: &CsrMatrix) -> PipelineResult<Vec<f64>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SvmParams {
    /// Misclassification penalty
    pub c: f64,
    pub max_iter: usize,
    /// Stop when the projected-gradient spread falls below this
    pub tol: f64,
    /// Seeds the coordinate visiting order
    pub seed: u64,
}

impl Default for SvmParams {
    fn default() -> Self {
        Self { c: 1.0, max_iter: 1000, tol: 1e-4, seed: 0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearSvm {
    params: SvmParams,
    /// Feature weights followed by the bias weight, empty until fitted
    weights: Vec<f64>,
}

impl LinearSvm {
    pub fn new(params: SvmParams) -> Self {
        Self { params, weights: Vec::new() }
    }

    pub fn is_fitted(&self) -> bool {
        !self.weights.is_empty()
    }

    pub fn decision_function(&self, x: &CsrMatrix) -> PipelineResult<Vec<f64>> {
        if !self.is_fitted() {
            return Err(PipelineError::Classifier("scoring with an unfitted SVM".to_string()));
        }
        let n_features = self.weights.len() - 1;
        if x.n_cols() != n_features {
            return Err(PipelineError::Classifier(format!(
                "matrix has {} columns, model was fitted on {}",
                x.n_cols(),
                n_features
            )));
        }
        let bias = self.weights[n_features];
        Ok((0..x.n_rows()).map(|i| x.row_dot(i, &self.weights) + bias).collect())
    }
}

impl Scorer for LinearSvm {
    fn fit(&mut self, x: &CsrMatrix, y: &[Label]) -> PipelineResult<()> {
        check_training_set(x, y)?;

        let n = x.n_rows();
        let bias = x.n_cols();
        let ys: Vec<f64> = y.iter().map(|l| l.as_i8() as f64).collect();
        // diagonal of the L2-loss dual
        let d = 0.5 / self.params.c;
        let q_diag: Vec<f64> = (0..n).map(|i| x.row_norm_squared(i) + 1.0 + d).collect();

        let mut w = vec![0.0; x.n_cols() + 1];
        let mut alpha = vec![0.0; n];
        let mut order: Vec<usize> = (0..n).collect();
        let mut rng = StdRng::seed_from_u64(self.params.seed);

        let mut converged = false;
        for iter in 0..self.params.max_iter {
            order.shuffle(&mut rng);
            let mut pg_max = f64::NEG_INFINITY;
            let mut pg_min = f64::INFINITY;

            for &i in &order {
                let g = ys[i] * (x.row_dot(i, &w) + w[bias]) - 1.0 + d * alpha[i];
                let pg = if alpha[i] == 0.0 { g.min(0.0) } else { g };
                pg_max = pg_max.max(pg);
                pg_min = pg_min.min(pg);

                if pg.abs() > 1e-12 {
                    let old = alpha[i];
                    alpha[i] = (alpha[i] - g / q_diag[i]).max(0.0);
                    let step = (alpha[i] - old) * ys[i];
                    let (cols, values) = x.row(i);
                    for (&c, &v) in cols.iter().zip(values) {
                        w[c] += step * v;
                    }
                    w[bias] += step;
                }
            }

            if pg_max - pg_min <= self.params.tol {
                log::debug!("Linear SVM converged after {} iterations", iter + 1);
                converged = true;
                break;
            }
        }
        if !converged {
            log::warn!("Linear SVM reached max_iter={} without converging", self.params.max_iter);
        }

        self.weights = w;
        Ok(())
    }

    fn score(&self, x: &CsrMatrix) -> PipelineResult<Vec<f64>> {
        self.decision_function(x)
    }
}

fn check_training_set(x: &CsrMatrix, y: &[Label]) -> PipelineResult<()> {
    if x.n_rows() != y.len() {
        return Err(PipelineError::Classifier(format!(
            "{} rows but {} labels",
            x.n_rows(),
            y.len()
        )));
    }
    let positives = y.iter().filter(|l| l.is_positive()).count();
    if positives == 0 || positives == y.len() {
        return Err(PipelineError::Classifier(
            "training rows must contain both positive and negative labels".to_string(),
        ));
    }
    Ok(())
}

/// Sigmoid `P(+1 | f) = 1 / (1 + exp(a*f + b))` fitted by regularized maximum likelihood
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlattScaling {
    pub a: f64,
    pub b: f64,
}

impl PlattScaling {
    const MAX_ITER: usize = 100;
    const MIN_STEP: f64 = 1e-10;
    const SIGMA: f64 = 1e-12;
    const EPS: f64 = 1e-5;

    /// Newton iterations with backtracking line search (Lin, Lin & Weng, 2007)
    pub fn fit(decisions: &[f64], labels: &[Label]) -> Self {
        let prior1 = labels.iter().filter(|l| l.is_positive()).count() as f64;
        let prior0 = labels.len() as f64 - prior1;
        let hi = (prior1 + 1.0) / (prior1 + 2.0);
        let lo = 1.0 / (prior0 + 2.0);
        let targets: Vec<f64> = labels.iter().map(|l| if l.is_positive() { hi } else { lo }).collect();

        let objective = |a: f64, b: f64| -> f64 {
            decisions
                .iter()
                .zip(&targets)
                .map(|(&f, &t)| {
                    let ab = f * a + b;
                    if ab >= 0.0 {
                        t * ab + (-ab).exp().ln_1p()
                    } else {
                        (t - 1.0) * ab + ab.exp().ln_1p()
                    }
                })
                .sum()
        };

        let mut a = 0.0;
        let mut b = ((prior0 + 1.0) / (prior1 + 1.0)).ln();
        let mut fval = objective(a, b);

        for _ in 0..Self::MAX_ITER {
            let (mut h11, mut h22, mut h21) = (Self::SIGMA, Self::SIGMA, 0.0);
            let (mut g1, mut g2) = (0.0, 0.0);
            for (&f, &t) in decisions.iter().zip(&targets) {
                let ab = f * a + b;
                let (p, q) = if ab >= 0.0 {
                    let e = (-ab).exp();
                    (e / (1.0 + e), 1.0 / (1.0 + e))
                } else {
                    let e = ab.exp();
                    (1.0 / (1.0 + e), e / (1.0 + e))
                };
                let d2 = p * q;
                h11 += f * f * d2;
                h22 += d2;
                h21 += f * d2;
                let d1 = t - p;
                g1 += f * d1;
                g2 += d1;
            }
            if g1.abs() < Self::EPS && g2.abs() < Self::EPS {
                break;
            }

            let det = h11 * h22 - h21 * h21;
            let da = -(h22 * g1 - h21 * g2) / det;
            let db = -(-h21 * g1 + h11 * g2) / det;
            let gd = g1 * da + g2 * db;

            let mut step = 1.0;
            while step >= Self::MIN_STEP {
                let (new_a, new_b) = (a + step * da, b + step * db);
                let new_f = objective(new_a, new_b);
                if new_f < fval + 1e-4 * step * gd {
                    a = new_a;
                    b = new_b;
                    fval = new_f;
                    break;
                }
                step /= 2.0;
            }
            if step < Self::MIN_STEP {
                log::debug!("Platt scaling line search failed");
                break;
            }
        }

        Self { a, b }
    }

    pub fn probability(&self, decision: f64) -> f64 {
        let ab = decision * self.a + self.b;
        if ab >= 0.0 {
            let e = (-ab).exp();
            e / (1.0 + e)
        } else {
            1.0 / (1.0 + ab.exp())
        }
    }
}

/// Linear SVM whose decision values are mapped to positive-class probabilities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibratedSvm {
    svm: LinearSvm,
    calibration: Option<PlattScaling>,
}

impl CalibratedSvm {
    pub fn new(params: SvmParams) -> Self {
        Self { svm: LinearSvm::new(params), calibration: None }
    }
}

impl Scorer for CalibratedSvm {
    fn fit(&mut self, x: &CsrMatrix, y: &[Label]) -> PipelineResult<()> {
        self.svm.fit(x, y)?;
        let decisions = self.svm.decision_function(x)?;
        let platt = PlattScaling::fit(&decisions, y);
        log::debug!("Platt calibration a={:.4} b={:.4}", platt.a, platt.b);
        self.calibration = Some(platt);
        Ok(())
    }

    fn score(&self, x: &CsrMatrix) -> PipelineResult<Vec<f64>> {
        let platt = self
            .calibration
            .ok_or_else(|| PipelineError::Classifier("scoring with an uncalibrated SVM".to_string()))?;
        Ok(self.svm.decision_function(x)?.into_iter().map(|f| platt.probability(f)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Label::{Negative as N, Positive as P};

    /// Positives load on column 0, negatives on column 1
    fn separable() -> (CsrMatrix, Vec<Label>) {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for k in 0..10 {
            let noise = k as f64 * 0.1;
            rows.push(vec![(0, 2.0 + noise), (2, 1.0)]);
            labels.push(P);
            rows.push(vec![(1, 2.0 + noise), (2, 1.0)]);
            labels.push(N);
        }
        (CsrMatrix::from_rows(rows, 3), labels)
    }

    #[test]
    fn test_linear_svm_separates() {
        let (x, y) = separable();
        let mut svm = LinearSvm::new(SvmParams::default());
        svm.fit(&x, &y).unwrap();
        let scores = svm.score(&x).unwrap();
        for (score, label) in scores.iter().zip(&y) {
            assert_eq!(*score > 0.0, label.is_positive(), "score {score} for {label}");
        }
    }

    #[test]
    fn test_fit_is_deterministic_for_a_seed() {
        let (x, y) = separable();
        let mut first = LinearSvm::new(SvmParams::default());
        let mut second = LinearSvm::new(SvmParams::default());
        first.fit(&x, &y).unwrap();
        second.fit(&x, &y).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_calibrated_scores_are_probabilities() {
        let (x, y) = separable();
        let mut model = CalibratedSvm::new(SvmParams::default());
        model.fit(&x, &y).unwrap();
        assert!(model.calibration.unwrap().a < 0.0);

        let probabilities = model.score(&x).unwrap();
        assert!(probabilities.iter().all(|p| (0.0..=1.0).contains(p)));
        let mean_pos: f64 = probabilities.iter().step_by(2).sum::<f64>() / 10.0;
        let mean_neg: f64 = probabilities.iter().skip(1).step_by(2).sum::<f64>() / 10.0;
        assert!(mean_pos > 0.5 && mean_neg < 0.5);
    }

    #[test]
    fn test_platt_is_monotonic() {
        let platt = PlattScaling::fit(&[-2.0, -1.0, -0.5, 0.5, 1.0, 2.0], &[N, N, N, P, P, P]);
        assert!(platt.probability(1.0) > platt.probability(0.0));
        assert!(platt.probability(0.0) > platt.probability(-1.0));
    }

    #[test]
    fn test_training_errors() {
        let (x, _) = separable();
        let mut svm = LinearSvm::new(SvmParams::default());
        assert!(svm.fit(&x, &[P; 20]).is_err());
        assert!(svm.fit(&x, &[P, N]).is_err());
        assert!(svm.score(&x).is_err());
        assert!(CalibratedSvm::new(SvmParams::default()).score(&x).is_err());
    }

    #[test]
    fn test_column_count_must_match() {
        let (x, y) = separable();
        let mut svm = LinearSvm::new(SvmParams::default());
        svm.fit(&x, &y).unwrap();
        let narrower = CsrMatrix::from_rows(vec![vec![(0, 1.0)]], 2);
        assert!(svm.score(&narrower).is_err());
    }

    #[test]
    fn test_fits_wide_sparse_rows() {
        // a dense copy of this matrix would hold 2 000 000 entries for 80 non-zeros
        let n_cols = 100_000;
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for k in 0..20 {
            rows.push(vec![(3 * k, 1.0), (n_cols - 1, 2.0)]);
            labels.push(P);
            rows.push(vec![(3 * k + 1, 1.0), (n_cols - 2, 2.0)]);
            labels.push(N);
        }
        let x = CsrMatrix::from_rows(rows, n_cols);
        assert_eq!(x.nnz(), 80);

        let mut model = CalibratedSvm::new(SvmParams::default());
        model.fit(&x, &labels).unwrap();
        let probabilities = model.score(&x).unwrap();
        for pair in probabilities.chunks(2) {
            assert!(pair[0] > pair[1]);
        }
    }
}
