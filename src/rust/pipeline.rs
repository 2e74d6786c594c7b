//! Stage composition for training and inference.

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use ndarray::Array1;
use ndarray_npy::WriteNpyExt;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::aggregate::{AggregationMode, ResidueAggregator, ResiduePrediction};
use crate::config::{ContactConfig, PipelineConfig};
use crate::contact_graph::ContactGraphBuilder;
use crate::counter::GraphletCounter;
use crate::errors::{PipelineError, PipelineResult, PipelineResultExt};
use crate::folds::{FoldAssignment, FoldSplitter, SplitDiagnostics, SplitTable};
use crate::io;
use crate::metrics::{ClassificationMetrics, PerformanceTimer};
use crate::queues::{AtomQueues, ResidueKeyResolver};
use crate::records::{QueueLayout, RecordPaths, StructureRecordWriter};
use crate::scorer::{CalibratedSvm, Scorer};
use crate::sparse::{FeatureIndexMap, FeatureSet, SparseFeatureAssembler};
use crate::structure::Structure;
use crate::types::{Label, StructureId};

pub const MODEL_FILE: &str = "model.bin";
pub const CV_PREDICTIONS_FILE: &str = "cv_predictions.npy";
pub const CV_LABELS_FILE: &str = "cv_labels.npy";
pub const CV_REPORT_FILE: &str = "cv_residues.csv";
/// Contact settings a record directory was built with
pub const RECORD_CONTACT_FILE: &str = "contact.bin";

/// Everything inference needs from a training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBundle {
    pub feature_index: FeatureIndexMap,
    pub classifier: CalibratedSvm,
    pub contact: ContactConfig,
}

impl ModelBundle {
    pub fn save(&self, path: &Path) -> PipelineResult<()> {
        io::write_atomically(path, |w| {
            bincode::serialize_into(w, self)?;
            Ok(())
        })?;
        Ok(())
    }

    pub fn load(path: &Path) -> PipelineResult<Self> {
        let file = File::open(path).with_field_context("model", &format!("cannot open {}", path.display()))?;
        let bundle: ModelBundle = bincode::deserialize_from(BufReader::new(file))?;
        Ok(bundle)
    }
}

/// Catalytic residue indices per structure, read from `<structure>\t<i>,<j>,...` lines
pub type CatalyticSites = HashMap<StructureId, BTreeSet<usize>>;

pub fn read_catalytic_sites(path: &Path) -> PipelineResult<CatalyticSites> {
    let contents = io::read_to_string(path)?;
    let mut sites = CatalyticSites::new();
    for (line_no, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let malformed = |message: String| PipelineError::MalformedRecord {
            file: path.to_path_buf(),
            line: line_no + 1,
            message,
        };
        let (structure, residues) = line.split_once('\t').unwrap_or((line, ""));
        let entry = sites.entry(StructureId::new(structure.trim())).or_default();
        for token in residues.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let residue = token.parse::<usize>().map_err(|_| malformed(format!("'{}' is not a residue index", token)))?;
            entry.insert(residue);
        }
    }
    Ok(sites)
}

/// Contact settings stored next to the records by [`write_structure_records`]
pub fn read_record_contact(record_dir: &Path) -> PipelineResult<ContactConfig> {
    let path = record_dir.join(RECORD_CONTACT_FILE);
    let file = File::open(&path).with_context(|| format!("reading {}", path.display()))?;
    let contact: ContactConfig = bincode::deserialize_from(BufReader::new(file))?;
    Ok(contact)
}

fn contact_mismatch(record_dir: &Path, recorded: &ContactConfig, requested: &ContactConfig) -> PipelineError {
    PipelineError::ConfigurationError {
        field: "contact".to_string(),
        message: format!(
            "records in {} were built at {} Å on chain {}, not {} Å on chain {}",
            record_dir.display(),
            recorded.threshold,
            recorded.chain,
            requested.threshold,
            requested.chain
        ),
    }
}

/// Parse, build and write the records of every structure.
///
/// With `catalytic` set, atoms are tagged and training queues written under `method`;
/// structures without annotations get no positive atoms. `contact` is stored in
/// [`RECORD_CONTACT_FILE`]; a directory already holding records of other settings is refused.
pub fn write_structure_records(
    pdb_files: &[PathBuf],
    out_dir: &Path,
    contact: &ContactConfig,
    catalytic: Option<(&CatalyticSites, &str)>,
) -> PipelineResult<Vec<RecordPaths>> {
    let layout = match catalytic {
        Some((_, method)) => QueueLayout::Training { method: method.to_string() },
        None => QueueLayout::Inference,
    };
    std::fs::create_dir_all(out_dir)?;
    if out_dir.join(RECORD_CONTACT_FILE).exists() {
        let recorded = read_record_contact(out_dir)?;
        if recorded != *contact {
            return Err(contact_mismatch(out_dir, &recorded, contact));
        }
    }
    let writer = StructureRecordWriter::new(out_dir, layout);
    let builder = ContactGraphBuilder::new(contact.threshold);
    let no_sites = BTreeSet::new();

    let mut written = Vec::with_capacity(pdb_files.len());
    for path in pdb_files {
        let mut structure = Structure::from_pdb_file(path, &contact.read_options())?;
        if let Some((sites, _)) = catalytic {
            let residues = sites.get(&structure.id).unwrap_or(&no_sites);
            structure = structure.with_catalytic_residues(residues)?;
        }
        let graph = builder.build(&structure)?;
        written.push(writer.write(&graph)?);
    }
    io::write_atomically(out_dir.join(RECORD_CONTACT_FILE), |w| {
        bincode::serialize_into(w, contact)?;
        Ok(())
    })?;
    log::info!("Wrote records for {} structures to {}", written.len(), out_dir.display());
    Ok(written)
}

/// Run the counter over every structure, one after the other
pub fn count_graphlets<C: GraphletCounter>(
    counter: &C,
    records: &[RecordPaths],
    out_dir: &Path,
) -> PipelineResult<Vec<PathBuf>> {
    let timer = PerformanceTimer::start("Graphlet counting");
    let outputs = records.iter().map(|r| counter.count(r, out_dir)).collect::<PipelineResult<Vec<_>>>()?;
    timer.finish_and_log();
    Ok(outputs)
}

/// Single-structure prediction against a trained model
pub struct InferenceOrchestrator<S: Scorer, C: GraphletCounter> {
    feature_index: FeatureIndexMap,
    scorer: S,
    contact: ContactConfig,
    counter: C,
}

impl<C: GraphletCounter> InferenceOrchestrator<CalibratedSvm, C> {
    pub fn from_bundle(bundle: ModelBundle, counter: C) -> Self {
        Self::new(bundle.feature_index, bundle.classifier, bundle.contact, counter)
    }
}

impl<S: Scorer, C: GraphletCounter> InferenceOrchestrator<S, C> {
    pub fn new(feature_index: FeatureIndexMap, scorer: S, contact: ContactConfig, counter: C) -> Self {
        Self { feature_index, scorer, contact, counter }
    }

    /// Catalytic probability of every residue with backbone atoms, in structure order
    pub fn predict(&self, pdb: &Path) -> PipelineResult<Vec<ResiduePrediction>> {
        let work = tempfile::tempdir()?;
        let structure = Structure::from_pdb_file(pdb, &self.contact.read_options())?;
        let graph = ContactGraphBuilder::new(self.contact.threshold).build(&structure)?;
        let records = StructureRecordWriter::new(work.path(), QueueLayout::Inference).write(&graph)?;

        let svml = self.counter.count(&records, &work.path().join("svml"))?;
        let (features, _) =
            SparseFeatureAssembler::with_index(self.feature_index.clone()).assemble_files(&[svml])?;
        let scores = self.scorer.score(&features.matrix)?;

        let keys = ResidueKeyResolver::new(
            graph.structure_id.clone(),
            AtomQueues::from_record_paths(&records)?,
            graph.atom_residues.clone(),
        )
        .resolve_exact(&features.labels, 0)?;
        let predictions =
            ResidueAggregator::new(AggregationMode::Inference).aggregate(&keys, &scores, &features.labels)?;

        log::info!("{}: {} residue predictions", structure.id, predictions.len());
        Ok(predictions)
    }

    /// Predict and write the residue probabilities as a float64 `.npy` array
    pub fn predict_to_npy(&self, pdb: &Path, output: &Path) -> PipelineResult<Vec<ResiduePrediction>> {
        let predictions = self.predict(pdb)?;
        let scores: Array1<f64> = predictions.iter().map(|p| p.score).collect();
        io::write_atomically(output, |w| {
            scores.write_npy(w)?;
            Ok(())
        })?;
        Ok(predictions)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FoldResult {
    pub fold: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    pub predictions: Vec<ResiduePrediction>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CrossValidationReport {
    /// In fold order
    pub folds: Vec<FoldResult>,
    pub metrics: ClassificationMetrics,
    pub diagnostics: SplitDiagnostics,
}

#[derive(Serialize)]
struct ResidueReportRow<'a> {
    fold: usize,
    structure: &'a str,
    residue: usize,
    score: f64,
    label: i8,
}

impl CrossValidationReport {
    pub fn predictions(&self) -> impl Iterator<Item = &ResiduePrediction> {
        self.folds.iter().flat_map(|f| f.predictions.iter())
    }

    /// Residue scores and labels as `.npy` plus a per-residue CSV
    pub fn write(&self, dir: &Path) -> PipelineResult<()> {
        std::fs::create_dir_all(dir)?;
        let scores: Array1<f64> = self.predictions().map(|p| p.score).collect();
        let labels: Array1<i8> = self.predictions().map(|p| p.label.as_i8()).collect();
        io::write_atomically(dir.join(CV_PREDICTIONS_FILE), |w| {
            scores.write_npy(w)?;
            Ok(())
        })?;
        io::write_atomically(dir.join(CV_LABELS_FILE), |w| {
            labels.write_npy(w)?;
            Ok(())
        })?;
        io::write_atomically(dir.join(CV_REPORT_FILE), |w| {
            let mut writer = csv::Writer::from_writer(w);
            for fold in &self.folds {
                for p in &fold.predictions {
                    writer.serialize(ResidueReportRow {
                        fold: fold.fold,
                        structure: p.residue.structure.as_str(),
                        residue: p.residue.residue,
                        score: p.score,
                        label: p.label.as_i8(),
                    })?;
                }
            }
            writer.flush()?;
            Ok(())
        })?;
        Ok(())
    }
}

/// Cross-validation and final model fitting over an assembled feature set
pub struct TrainingOrchestrator {
    config: PipelineConfig,
}

impl TrainingOrchestrator {
    pub fn new(config: PipelineConfig) -> PipelineResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Run every fold in parallel, each with its own scorer from `factory`.
    ///
    /// All folds run to completion; if any failed, the lowest failed fold is returned as
    /// [`PipelineError::Fold`] and no metrics are computed.
    pub fn cross_validate<S, F>(
        &self,
        features: &FeatureSet,
        table: &SplitTable,
        record_dir: &Path,
        factory: F,
    ) -> PipelineResult<CrossValidationReport>
    where
        S: Scorer,
        F: Fn() -> S + Sync,
    {
        let layout = QueueLayout::Training { method: self.config.training.method.clone() };
        let splitter = FoldSplitter::new(record_dir, layout, self.config.features.structure_id_suffix.as_str())
            .strict(self.config.training.strict);
        let (folds, diagnostics) = splitter.split(table, &features.structure_ids, &features.labels)?;

        let pool = rayon::ThreadPoolBuilder::new().num_threads(self.config.effective_thread_count()).build()?;
        let timer = PerformanceTimer::start("Cross-validation");
        let outcomes: Vec<PipelineResult<FoldResult>> =
            pool.install(|| folds.par_iter().map(|fold| run_fold(features, fold, &factory)).collect());
        timer.finish_and_log();

        let mut results = Vec::with_capacity(outcomes.len());
        let mut first_failure = None;
        for (fold, outcome) in folds.iter().zip(outcomes) {
            match outcome {
                Ok(result) => results.push(result),
                Err(e) => {
                    log::error!("Fold {} failed: {}", fold.fold, e);
                    if first_failure.is_none() {
                        first_failure = Some(PipelineError::Fold { fold: fold.fold, source: Box::new(e) });
                    }
                }
            }
        }
        if let Some(failure) = first_failure {
            return Err(failure);
        }

        let (labels, scores): (Vec<Label>, Vec<f64>) =
            results.iter().flat_map(|r| r.predictions.iter()).map(|p| (p.label, p.score)).unzip();
        let metrics = ClassificationMetrics::compute(&labels, &scores)?;
        log::info!(
            "Cross-validation over {} residues: ROC AUC {:.4}, PR AUC {:.4}",
            labels.len(),
            metrics.roc_auc,
            metrics.pr_auc
        );

        Ok(CrossValidationReport { folds: results, metrics, diagnostics })
    }

    /// Fit `scorer` on every row
    pub fn fit_final<S: Scorer>(&self, features: &FeatureSet, mut scorer: S) -> PipelineResult<S> {
        let timer = PerformanceTimer::start("Final model fit");
        scorer.fit(&features.matrix, &features.labels)?;
        timer.finish_and_log();
        Ok(scorer)
    }

    /// Cross-validate and fit the calibrated SVM that goes into the model bundle.
    ///
    /// The configured contact settings must be the ones `record_dir` was built with, since
    /// the bundle hands them to inference.
    pub fn train(
        &self,
        features: &FeatureSet,
        table: &SplitTable,
        record_dir: &Path,
    ) -> PipelineResult<(CrossValidationReport, ModelBundle)> {
        let recorded = read_record_contact(record_dir)?;
        if recorded != self.config.contact {
            return Err(contact_mismatch(record_dir, &recorded, &self.config.contact));
        }
        let params = self.config.training.svm_params();
        let report = self.cross_validate(features, table, record_dir, || CalibratedSvm::new(params))?;
        let classifier = self.fit_final(features, CalibratedSvm::new(params))?;
        let bundle = ModelBundle {
            feature_index: features.feature_index.clone(),
            classifier,
            contact: self.config.contact,
        };
        Ok((report, bundle))
    }
}

fn run_fold<S, F>(features: &FeatureSet, fold: &FoldAssignment, factory: &F) -> PipelineResult<FoldResult>
where
    S: Scorer,
    F: Fn() -> S + Sync,
{
    let mut result = FoldResult {
        fold: fold.fold,
        train_rows: fold.train_rows.len(),
        test_rows: fold.test_rows.len(),
        predictions: Vec::new(),
    };
    if fold.test_rows.is_empty() {
        log::warn!("Fold {} has no test rows", fold.fold);
        return Ok(result);
    }

    let select_labels = |rows: &[usize]| rows.iter().map(|&r| features.labels[r]).collect::<Vec<_>>();
    let mut scorer = factory();
    scorer.fit(&features.matrix.select_rows(&fold.train_rows), &select_labels(&fold.train_rows))?;

    let test_labels = select_labels(&fold.test_rows);
    let scores = scorer.score(&features.matrix.select_rows(&fold.test_rows))?;
    result.predictions =
        ResidueAggregator::new(AggregationMode::Training).aggregate(&fold.test_residues, &scores, &test_labels)?;

    log::debug!("Fold {}: {} test residues", fold.fold, result.predictions.len());
    Ok(result)
}
