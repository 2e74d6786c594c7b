//! Backbone contact graph construction.

use serde::{Deserialize, Serialize};

use crate::errors::{PipelineError, PipelineResult};
use crate::structure::{ElementClass, Structure};
use crate::types::{AtomClass, DistanceThreshold, StructureId};

/// Undirected contact graph over the backbone atoms of one structure, with the label arrays
/// the counting tool and the residue aggregation need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactGraph {
    pub structure_id: StructureId,
    /// Sorted neighbor lists; symmetric, no self-loops
    pub adjacency: Vec<Vec<usize>>,
    pub atom_labels: Vec<ElementClass>,
    pub residue_codes: Vec<char>,
    /// Owning residue of every atom row
    pub atom_residues: Vec<usize>,
    pub atom_classes: Vec<AtomClass>,
}

impl ContactGraph {
    pub fn atom_count(&self) -> usize {
        self.adjacency.len()
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.iter().map(Vec::len).sum::<usize>() / 2
    }

    pub fn has_edge(&self, i: usize, j: usize) -> bool {
        self.adjacency.get(i).map_or(false, |neighbors| neighbors.binary_search(&j).is_ok())
    }

    /// Atom rows tagged `class`, in atom order
    pub fn atoms_with_class(&self, class: AtomClass) -> Vec<usize> {
        self.atom_classes
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == class)
            .map(|(i, _)| i)
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ContactGraphBuilder {
    threshold: DistanceThreshold,
}

impl ContactGraphBuilder {
    pub fn new(threshold: DistanceThreshold) -> Self {
        Self { threshold }
    }

    /// Connect every pair of atoms whose Euclidean distance is at most the threshold.
    ///
    /// All n(n-1)/2 pairs are evaluated. An atom without coordinates fails the whole
    /// structure, no partial graph is returned.
    pub fn build(&self, structure: &Structure) -> PipelineResult<ContactGraph> {
        let coords = structure
            .atoms
            .iter()
            .map(|atom| {
                atom.coord.ok_or_else(|| PipelineError::MissingCoordinates {
                    structure: structure.id.to_string(),
                    residue: atom.residue,
                    atom: atom.element.atom_name().to_string(),
                })
            })
            .collect::<PipelineResult<Vec<[f64; 3]>>>()?;

        let n = coords.len();
        let threshold = self.threshold.get();
        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];

        // rows are visited in increasing i, so every neighbor list comes out sorted
        for i in 0..n {
            for j in (i + 1)..n {
                if distance(&coords[i], &coords[j]) <= threshold {
                    adjacency[i].push(j);
                    adjacency[j].push(i);
                }
            }
        }

        let graph = ContactGraph {
            structure_id: structure.id.clone(),
            adjacency,
            atom_labels: structure.atoms.iter().map(|a| a.element).collect(),
            residue_codes: structure.residues.iter().map(|r| r.code).collect(),
            atom_residues: structure.atoms.iter().map(|a| a.residue).collect(),
            atom_classes: structure.atoms.iter().map(|a| a.class).collect(),
        };

        log::debug!(
            "Contact graph for {}: {} atoms, {} edges at {} Å",
            graph.structure_id,
            graph.atom_count(),
            graph.edge_count(),
            threshold
        );

        Ok(graph)
    }
}

fn distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    (dx * dx + dy * dy + dz * dz).sqrt()
}
