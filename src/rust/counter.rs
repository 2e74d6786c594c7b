//! Graphlet counting capability.
//!
//! Counting is delegated to an external program; the pipeline only relies on the contract
//! that one SVML line is written per queued atom, positives first.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::config::CounterConfig;
use crate::errors::{PipelineError, PipelineResult};
use crate::records::RecordPaths;
use crate::types::StructureId;

pub trait GraphletCounter: Send + Sync {
    /// Count graphlets around every queued atom of one structure and return the SVML file
    fn count(&self, records: &RecordPaths, out_dir: &Path) -> PipelineResult<PathBuf>;
}

/// Runs `run_kernel` in sparse SVML mode
#[derive(Debug, Clone)]
pub struct ExternalCounter {
    program: PathBuf,
    kernel_type: u32,
    output_suffix: String,
}

impl ExternalCounter {
    pub fn new(config: &CounterConfig) -> Self {
        Self {
            program: config.program.clone(),
            kernel_type: config.kernel_type,
            output_suffix: config.output_suffix.clone(),
        }
    }

    /// `<out_dir>/<id><suffix>.svml`
    pub fn output_path(&self, structure: &StructureId, out_dir: &Path) -> PathBuf {
        out_dir.join(format!("{}{}.svml", structure, self.output_suffix))
    }

    fn command(&self, records: &RecordPaths, output: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command.arg("-t").arg(self.kernel_type.to_string()).arg("-p").arg(&records.positive_atoms);
        if let Some(negative) = &records.negative_atoms {
            command.arg("-n").arg(negative);
        }
        command
            .arg("-g")
            .arg(&records.graph)
            .arg("-l")
            .arg(&records.atom_labels)
            .arg("-s")
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        command
    }
}

impl GraphletCounter for ExternalCounter {
    fn count(&self, records: &RecordPaths, out_dir: &Path) -> PipelineResult<PathBuf> {
        let structure = StructureId::from_path(&records.graph).ok_or_else(|| PipelineError::Counter {
            structure: records.graph.display().to_string(),
            message: "cannot derive a structure id from the graph file".to_string(),
        })?;
        let counter_error = |message: String| PipelineError::Counter { structure: structure.to_string(), message };

        std::fs::create_dir_all(out_dir)?;
        let output = self.output_path(&structure, out_dir);
        log::debug!("Running {} for {}", self.program.display(), structure);

        let result = self
            .command(records, &output)
            .output()
            .map_err(|e| counter_error(format!("cannot start {}: {}", self.program.display(), e)))?;
        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(counter_error(format!(
                "{} exited with {}: {}",
                self.program.display(),
                result.status,
                stderr.trim()
            )));
        }
        if !output.exists() {
            return Err(counter_error(format!("{} produced no {}", self.program.display(), output.display())));
        }

        Ok(output)
    }
}
