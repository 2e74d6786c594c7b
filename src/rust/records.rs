//! Per-structure text records shared with the graphlet counting tool.
//!
//! For a structure `<id>` in directory `dir`:
//!
//! | file                        | contents                                               |
//! |-----------------------------|--------------------------------------------------------|
//! | `<id>.graph`                | `<atom>\t<neighbor>\t<neighbor>...` per atom row        |
//! | `<id>.aa_labels`            | one-letter residue codes, one line                     |
//! | `<id>.atom_labels`          | one character per atom row, one line                   |
//! | `<id>.atom_res_indices`     | comma-separated residue index per atom row             |
//! | `<id>.atom_pos`             | every atom row, one per line (inference)               |
//! | `<id>.<method>_atom_pos/neg`| positive / negative atom rows, one per line (training) |

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::contact_graph::ContactGraph;
use crate::errors::{PipelineError, PipelineResult, PipelineResultExt};
use crate::types::{AtomClass, StructureId};

/// Which atom index files accompany the graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueLayout {
    /// A single `<id>.atom_pos` file listing every atom row
    Inference,
    /// `<id>.<method>_atom_pos` and `<id>.<method>_atom_neg` split by atom class
    Training { method: String },
}

/// Paths of every record file for one structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPaths {
    pub graph: PathBuf,
    pub aa_labels: PathBuf,
    pub atom_labels: PathBuf,
    pub atom_res_indices: PathBuf,
    pub positive_atoms: PathBuf,
    /// Only present for [`QueueLayout::Training`]
    pub negative_atoms: Option<PathBuf>,
}

impl RecordPaths {
    pub fn new(dir: &Path, id: &StructureId, layout: &QueueLayout) -> Self {
        let file = |suffix: &str| dir.join(format!("{}.{}", id, suffix));
        let (positive_atoms, negative_atoms) = match layout {
            QueueLayout::Inference => (file("atom_pos"), None),
            QueueLayout::Training { method } => {
                (file(&format!("{method}_atom_pos")), Some(file(&format!("{method}_atom_neg"))))
            }
        };
        Self {
            graph: file("graph"),
            aa_labels: file("aa_labels"),
            atom_labels: file("atom_labels"),
            atom_res_indices: file("atom_res_indices"),
            positive_atoms,
            negative_atoms,
        }
    }
}

pub struct StructureRecordWriter {
    dir: PathBuf,
    layout: QueueLayout,
}

impl StructureRecordWriter {
    pub fn new(dir: impl Into<PathBuf>, layout: QueueLayout) -> Self {
        Self { dir: dir.into(), layout }
    }

    /// Write every record file for `graph`, returning their paths
    pub fn write(&self, graph: &ContactGraph) -> PipelineResult<RecordPaths> {
        fs::create_dir_all(&self.dir)?;
        let paths = RecordPaths::new(&self.dir, &graph.structure_id, &self.layout);

        fs::write(&paths.graph, render_graph(&graph.adjacency))?;
        fs::write(&paths.aa_labels, graph.residue_codes.iter().collect::<String>())?;
        fs::write(&paths.atom_labels, graph.atom_labels.iter().map(|l| l.label()).collect::<String>())?;
        fs::write(&paths.atom_res_indices, join_indices(&graph.atom_residues, ","))?;

        match &self.layout {
            QueueLayout::Inference => {
                let every_atom: Vec<usize> = (0..graph.atom_count()).collect();
                fs::write(&paths.positive_atoms, render_index_list(&every_atom))?;
            }
            QueueLayout::Training { .. } => {
                let positives = graph.atoms_with_class(AtomClass::Positive);
                let negatives = graph.atoms_with_class(AtomClass::Negative);
                fs::write(&paths.positive_atoms, render_index_list(&positives))?;
                if let Some(negative_path) = &paths.negative_atoms {
                    fs::write(negative_path, render_index_list(&negatives))?;
                }
                log::debug!(
                    "{}: {} positive and {} negative atom rows",
                    graph.structure_id,
                    positives.len(),
                    negatives.len()
                );
            }
        }

        Ok(paths)
    }
}

fn render_graph(adjacency: &[Vec<usize>]) -> String {
    let mut out = String::new();
    for (i, neighbors) in adjacency.iter().enumerate() {
        let _ = write!(out, "{}", i);
        for neighbor in neighbors {
            let _ = write!(out, "\t{}", neighbor);
        }
        out.push('\n');
    }
    out
}

fn render_index_list(indices: &[usize]) -> String {
    let mut out = String::new();
    for index in indices {
        let _ = writeln!(out, "{}", index);
    }
    out
}

fn join_indices(indices: &[usize], separator: &str) -> String {
    indices.iter().map(usize::to_string).collect::<Vec<_>>().join(separator)
}

fn parse_index(token: &str, path: &Path, line: usize) -> PipelineResult<usize> {
    token.trim().parse::<usize>().map_err(|_| PipelineError::MalformedRecord {
        file: path.to_path_buf(),
        line,
        message: format!("'{}' is not an atom or residue index", token),
    })
}

/// Re-read a `.graph` file into neighbor lists indexed by atom row
pub fn read_graph(path: &Path) -> PipelineResult<Vec<Vec<usize>>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let mut adjacency: Vec<Vec<usize>> = Vec::new();
    for (line_no, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let mut tokens = line.split('\t');
        let atom = parse_index(tokens.next().unwrap_or(""), path, line_no + 1)?;
        if atom != adjacency.len() {
            return Err(PipelineError::MalformedRecord {
                file: path.to_path_buf(),
                line: line_no + 1,
                message: format!("expected atom row {}, found {}", adjacency.len(), atom),
            });
        }
        let neighbors = tokens
            .map(|t| parse_index(t, path, line_no + 1))
            .collect::<PipelineResult<Vec<_>>>()?;
        adjacency.push(neighbors);
    }
    Ok(adjacency)
}

/// Read the comma-separated atom→residue map (first line only)
pub fn read_atom_residue_indices(path: &Path) -> PipelineResult<Vec<usize>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let first = contents.lines().next().unwrap_or("").trim();
    if first.is_empty() {
        return Ok(Vec::new());
    }
    first.split(',').map(|t| parse_index(t, path, 1)).collect()
}

/// Read an atom index file, one index per line, in file order
pub fn read_atom_indices(path: &Path) -> PipelineResult<Vec<usize>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(line_no, line)| parse_index(line, path, line_no + 1))
        .collect()
}
