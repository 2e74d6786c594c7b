//! Row → residue correspondence.
//!
//! The counting tool emits one row per queued atom, positives first then negatives, in queue
//! file order. Replaying the same queues against the rows of a structure recovers which atom,
//! and therefore which residue, every row belongs to.

use std::path::Path;

use crate::errors::{PipelineError, PipelineResult};
use crate::records::{read_atom_indices, read_atom_residue_indices, QueueLayout, RecordPaths};
use crate::types::{Label, ResidueKey, StructureId};

/// Positive and negative atom queues of one structure, consumed through a single cursor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomQueues {
    positive: Vec<usize>,
    negative: Vec<usize>,
    cursor: usize,
}

impl AtomQueues {
    pub fn new(positive: Vec<usize>, negative: Vec<usize>) -> Self {
        Self { positive, negative, cursor: 0 }
    }

    /// Read the queue files written for `paths`; a missing negative queue is empty
    pub fn from_record_paths(paths: &RecordPaths) -> PipelineResult<Self> {
        let positive = read_atom_indices(&paths.positive_atoms)?;
        let negative = match &paths.negative_atoms {
            Some(path) => read_atom_indices(path)?,
            None => Vec::new(),
        };
        Ok(Self::new(positive, negative))
    }

    pub fn len(&self) -> usize {
        self.positive.len() + self.negative.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remaining(&self) -> usize {
        self.len() - self.cursor
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Next atom index and the class of the queue it came from
    pub fn pop(&mut self) -> Option<(usize, Label)> {
        let item = if self.cursor < self.positive.len() {
            (self.positive[self.cursor], Label::Positive)
        } else {
            (*self.negative.get(self.cursor - self.positive.len())?, Label::Negative)
        };
        self.cursor += 1;
        Some(item)
    }
}

/// Residue keys for a run of rows, plus how many queued atoms were left over
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowResidues {
    pub keys: Vec<ResidueKey>,
    pub unconsumed: usize,
}

/// Everything needed to map the rows of one structure back to residues
#[derive(Debug, Clone)]
pub struct ResidueKeyResolver {
    structure: StructureId,
    queues: AtomQueues,
    atom_residues: Vec<usize>,
}

impl ResidueKeyResolver {
    pub fn new(structure: StructureId, queues: AtomQueues, atom_residues: Vec<usize>) -> Self {
        Self { structure, queues, atom_residues }
    }

    /// Load queues and the atom→residue map of `structure` from a record directory
    pub fn load(dir: &Path, structure: &StructureId, layout: &QueueLayout) -> PipelineResult<Self> {
        let paths = RecordPaths::new(dir, structure, layout);
        let queues = AtomQueues::from_record_paths(&paths)?;
        let atom_residues = read_atom_residue_indices(&paths.atom_res_indices)?;
        Ok(Self::new(structure.clone(), queues, atom_residues))
    }

    /// Pop one queued atom per row label, in row order.
    ///
    /// `first_row` is the global index of `labels[0]` and only used in error messages.
    /// Running out of queued atoms is fatal; leftover atoms are reported in
    /// [`RowResidues::unconsumed`] so the caller decides.
    pub fn resolve(mut self, labels: &[Label], first_row: usize) -> PipelineResult<RowResidues> {
        let mut keys = Vec::with_capacity(labels.len());
        for (offset, &label) in labels.iter().enumerate() {
            let row = first_row + offset;
            let (atom, class) = self.queues.pop().ok_or_else(|| PipelineError::QueueMismatch {
                structure: self.structure.to_string(),
                message: format!(
                    "{} rows but only {} queued atoms",
                    labels.len(),
                    self.queues.len()
                ),
            })?;
            if label != class {
                return Err(PipelineError::QueueLabelMismatch {
                    structure: self.structure.to_string(),
                    row,
                    expected: class,
                    found: label,
                });
            }
            let residue =
                *self.atom_residues.get(atom).ok_or_else(|| PipelineError::QueueMismatch {
                    structure: self.structure.to_string(),
                    message: format!(
                        "queued atom {} outside the {} mapped atoms",
                        atom,
                        self.atom_residues.len()
                    ),
                })?;
            keys.push(ResidueKey::new(self.structure.clone(), residue));
        }
        Ok(RowResidues { keys, unconsumed: self.queues.remaining() })
    }

    /// [`resolve`](Self::resolve), additionally requiring every queued atom to be consumed
    pub fn resolve_exact(self, labels: &[Label], first_row: usize) -> PipelineResult<Vec<ResidueKey>> {
        let structure = self.structure.to_string();
        let resolved = self.resolve(labels, first_row)?;
        if resolved.unconsumed > 0 {
            return Err(PipelineError::QueueMismatch {
                structure,
                message: format!(
                    "{} queued atoms left after {} rows",
                    resolved.unconsumed,
                    labels.len()
                ),
            });
        }
        Ok(resolved.keys)
    }
}
