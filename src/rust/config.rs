use crate::errors::{PipelineError, PipelineResult};
use crate::scorer::SvmParams;
use crate::structure::PdbReadOptions;
use crate::types::DistanceThreshold;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the whole pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Contact graph settings, stored with the trained model
    pub contact: ContactConfig,
    /// Feature assembly settings
    pub features: FeatureConfig,
    /// Classifier and cross-validation settings
    pub training: TrainingConfig,
    /// External graphlet counter settings
    pub counter: CounterConfig,
}

/// Contact-graph settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContactConfig {
    /// Maximum atom distance for an edge (Å)
    pub threshold: DistanceThreshold,
    /// Chain read from each structure
    pub chain: char,
}

/// Feature-assembly settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Suffix the counter appends to structure ids, stripped before matching
    pub structure_id_suffix: String,
}

/// Training settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Number of threads for parallel folds
    pub num_threads: Option<usize>,
    /// SVM penalty
    pub c: f64,
    /// Maximum coordinate-descent passes
    pub max_iter: usize,
    /// Convergence tolerance
    pub tol: f64,
    /// Seed for the coordinate visiting order
    pub seed: u64,
    /// Annotation method naming the training queue files
    pub method: String,
    /// Fail on split-table entries without rows or with unconsumed queues
    pub strict: bool,
}

/// External counter settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterConfig {
    /// Path or name of the `run_kernel` executable
    pub program: PathBuf,
    /// Kernel type flag (2 = standard graphlet)
    pub kernel_type: u32,
    /// Appended to the structure id in the output file name
    pub output_suffix: String,
}

impl Default for ContactConfig {
    fn default() -> Self {
        Self { threshold: DistanceThreshold::default(), chain: 'A' }
    }
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self { structure_id_suffix: "_sgk".to_string() }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        let svm = SvmParams::default();
        Self {
            num_threads: None, // Use system default
            c: svm.c,
            max_iter: svm.max_iter,
            tol: svm.tol,
            seed: svm.seed,
            method: "csa".to_string(),
            strict: false,
        }
    }
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self { program: PathBuf::from("run_kernel"), kernel_type: 2, output_suffix: "_sgk".to_string() }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            contact: ContactConfig::default(),
            features: FeatureConfig::default(),
            training: TrainingConfig::default(),
            counter: CounterConfig::default(),
        }
    }
}

impl ContactConfig {
    pub fn read_options(&self) -> PdbReadOptions {
        PdbReadOptions { chain: self.chain }
    }
}

impl TrainingConfig {
    pub fn svm_params(&self) -> SvmParams {
        SvmParams { c: self.c, max_iter: self.max_iter, tol: self.tol, seed: self.seed }
    }
}

fn config_error(field: &str, message: impl Into<String>) -> PipelineError {
    PipelineError::ConfigurationError { field: field.to_string(), message: message.into() }
}

impl PipelineConfig {
    /// Create a new configuration with validation
    pub fn new(threshold: f64, chain: char) -> PipelineResult<Self> {
        let threshold = DistanceThreshold::new(threshold).map_err(|e| config_error("threshold", e))?;
        if !chain.is_ascii_alphanumeric() {
            return Err(config_error("chain", format!("Chain id must be a letter or digit, got '{}'", chain)));
        }

        Ok(Self { contact: ContactConfig { threshold, chain }, ..Default::default() })
    }

    /// Validate the configuration
    pub fn validate(&self) -> PipelineResult<()> {
        if !self.training.c.is_finite() || self.training.c <= 0.0 {
            return Err(config_error("c", format!("SVM penalty must be positive, got {}", self.training.c)));
        }
        if self.training.max_iter == 0 {
            return Err(config_error("max_iter", "Maximum iterations must be greater than 0"));
        }
        if !self.training.tol.is_finite() || self.training.tol <= 0.0 {
            return Err(config_error("tol", format!("Tolerance must be positive, got {}", self.training.tol)));
        }
        if self.training.num_threads == Some(0) {
            return Err(config_error("num_threads", "Thread count must be greater than 0"));
        }
        if self.training.method.is_empty() || self.training.method.contains(['/', '.']) {
            return Err(config_error(
                "method",
                format!("Method must be a plain file-name component, got '{}'", self.training.method),
            ));
        }
        if self.counter.program.as_os_str().is_empty() {
            return Err(config_error("program", "Counter program must not be empty"));
        }

        Ok(())
    }

    /// Get the number of threads to use
    pub fn effective_thread_count(&self) -> usize {
        self.training
            .num_threads
            .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
    }
}

/// Configuration builder for more complex setups
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// Create a new builder with the contact settings
    pub fn new(threshold: f64, chain: char) -> PipelineResult<Self> {
        let config = PipelineConfig::new(threshold, chain)?;
        Ok(Self { config })
    }

    /// Set the suffix stripped from structure ids
    pub fn structure_id_suffix(mut self, suffix: &str) -> Self {
        self.config.features.structure_id_suffix = suffix.to_string();
        self
    }

    /// Set the number of threads
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.config.training.num_threads = Some(threads);
        self
    }

    pub fn c(mut self, c: f64) -> Self {
        self.config.training.c = c;
        self
    }

    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.config.training.max_iter = max_iter;
        self
    }

    pub fn tol(mut self, tol: f64) -> Self {
        self.config.training.tol = tol;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.training.seed = seed;
        self
    }

    /// Set the annotation method naming the training queues
    pub fn method(mut self, method: &str) -> Self {
        self.config.training.method = method.to_string();
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.config.training.strict = strict;
        self
    }

    /// Set the counter executable
    pub fn counter_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.config.counter.program = program.into();
        self
    }

    /// Build the final configuration
    pub fn build(self) -> PipelineResult<PipelineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_creation() {
        let config = PipelineConfig::new(7.5, 'A').unwrap();

        assert_eq!(config.contact.threshold.get(), 7.5);
        assert_eq!(config.contact.chain, 'A');
        assert_eq!(config.features.structure_id_suffix, "_sgk");
        assert_eq!(config.counter.kernel_type, 2);
        assert_eq!(config.training.c, 1.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        // Test invalid threshold
        let err = PipelineConfig::new(0.0, 'A').unwrap_err();
        assert!(matches!(err, PipelineError::ConfigurationError { ref field, .. } if field == "threshold"));

        // Test invalid chain
        assert!(PipelineConfig::new(7.5, ' ').is_err());

        // Test invalid training settings
        let mut config = PipelineConfig::default();
        config.training.c = -1.0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.training.method = "../csa".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_builder() {
        let config = PipelineConfigBuilder::new(6.0, 'B')
            .unwrap()
            .num_threads(4)
            .c(0.5)
            .seed(7)
            .method("mcsa")
            .strict(true)
            .build()
            .unwrap();

        assert_eq!(config.effective_thread_count(), 4);
        assert_eq!(config.contact.read_options().chain, 'B');
        assert_eq!(config.training.svm_params(), SvmParams { c: 0.5, max_iter: 1000, tol: 1e-4, seed: 7 });
        assert_eq!(config.training.method, "mcsa");
        assert!(config.training.strict);

        assert!(PipelineConfigBuilder::new(6.0, 'B').unwrap().num_threads(0).build().is_err());
    }
}
