use pyo3::prelude::*;
use std::path::PathBuf;

use crate::config::CounterConfig;
use crate::counter::ExternalCounter;
use crate::pipeline::{InferenceOrchestrator, ModelBundle};
use crate::scorer::CalibratedSvm;

fn to_py_err(e: crate::errors::PipelineError) -> PyErr {
    PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(e.to_string())
}

#[pyclass]
struct PyPredictor {
    inner: InferenceOrchestrator<CalibratedSvm, ExternalCounter>,
}

#[pymethods]
impl PyPredictor {
    #[new]
    #[pyo3(signature = (model_path, program = "run_kernel".to_string()))]
    fn new(model_path: String, program: String) -> PyResult<Self> {
        let bundle = ModelBundle::load(&PathBuf::from(model_path)).map_err(to_py_err)?;
        let counter = ExternalCounter::new(&CounterConfig { program: program.into(), ..CounterConfig::default() });
        Ok(Self { inner: InferenceOrchestrator::from_bundle(bundle, counter) })
    }

    /// Catalytic probability of every residue in the model's chain
    fn predict(&self, pdb_path: String) -> PyResult<Vec<f64>> {
        let predictions = self.inner.predict(&PathBuf::from(pdb_path)).map_err(to_py_err)?;
        Ok(predictions.into_iter().map(|p| p.score).collect())
    }
}

/// A Python module implemented in Rust.
#[pymodule]
fn catres(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyPredictor>()?;
    Ok(())
}
