//! Backbone view of a protein structure.
//!
//! Only the atoms the contact graph is built from are kept: `N`, `CA` and `C` of standard
//! amino-acid residues of a single chain in the first model, in file order. Atoms with
//! alternate locations keep the most occupied one.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::aminoacid::standard_one_letter;
use crate::errors::{PipelineError, PipelineResult};
use crate::io;
use crate::types::{AtomClass, StructureId};

/// Backbone element classes, each with a one-character label for the counting tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementClass {
    N,
    CA,
    C,
}

impl ElementClass {
    /// Map a PDB atom name to a backbone class
    pub fn from_atom_name(name: &str) -> Option<Self> {
        match name.trim() {
            "N" => Some(ElementClass::N),
            "CA" => Some(ElementClass::CA),
            "C" => Some(ElementClass::C),
            _ => None,
        }
    }

    pub fn label(&self) -> char {
        match self {
            ElementClass::N => 'N',
            ElementClass::CA => 'A',
            ElementClass::C => 'C',
        }
    }

    pub fn atom_name(&self) -> &'static str {
        match self {
            ElementClass::N => "N",
            ElementClass::CA => "CA",
            ElementClass::C => "C",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Atom {
    /// `None` when the coordinate columns could not be read
    pub coord: Option<[f64; 3]>,
    pub element: ElementClass,
    /// Index of the owning residue in [`Structure::residues`]
    pub residue: usize,
    pub class: AtomClass,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Residue {
    /// 0-based position in structure order
    pub index: usize,
    pub code: char,
    /// Owned atoms in discovery order
    pub atoms: Vec<usize>,
}

/// Options controlling which part of a PDB file is read
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdbReadOptions {
    pub chain: char,
}

impl Default for PdbReadOptions {
    fn default() -> Self {
        Self { chain: 'A' }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    pub id: StructureId,
    pub chain: char,
    pub atoms: Vec<Atom>,
    pub residues: Vec<Residue>,
}

impl Structure {
    /// Read a (possibly compressed) PDB file; the structure id is the file stem
    pub fn from_pdb_file(path: &Path, options: &PdbReadOptions) -> PipelineResult<Self> {
        let id = StructureId::from_path(path).ok_or_else(|| PipelineError::StructureParse {
            path: path.to_path_buf(),
            message: "cannot derive a structure id from the file name".to_string(),
        })?;
        let contents = io::read_to_string(path).map_err(|e| PipelineError::StructureParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_pdb_str(id, &contents, options)
    }

    /// Parse PDB text. Fails when the requested chain holds no standard residue.
    pub fn from_pdb_str(
        id: StructureId,
        contents: &str,
        options: &PdbReadOptions,
    ) -> PipelineResult<Self> {
        let mut atoms: Vec<Atom> = Vec::new();
        let mut residues: Vec<Residue> = Vec::new();
        let mut residue_lookup: HashMap<(i32, Option<char>), usize> = HashMap::new();
        let mut occupancies: Vec<f64> = Vec::new();
        let mut seen_model = false;

        for line in contents.lines() {
            if line.starts_with("MODEL") {
                if seen_model {
                    break;
                }
                seen_model = true;
                continue;
            }
            if line.starts_with("ENDMDL") {
                break;
            }

            let record = line.get(0..6).unwrap_or("").trim();
            if record != "ATOM" && record != "HETATM" {
                continue;
            }
            if line.get(21..22).and_then(extract_char) != Some(options.chain) {
                continue;
            }
            let residue_name = line.get(17..20).map(str::trim).unwrap_or("");
            let Some(code) = standard_one_letter(residue_name) else {
                continue;
            };
            let residue_seq = line.get(22..26).and_then(|s| s.trim().parse::<i32>().ok());
            let Some(residue_seq) = residue_seq else {
                return Err(PipelineError::StructureParse {
                    path: id.as_str().into(),
                    message: format!("invalid residue number in line: {line}"),
                });
            };
            let insertion_code = line.get(26..27).and_then(extract_char);

            let residue_index =
                *residue_lookup.entry((residue_seq, insertion_code)).or_insert_with(|| {
                    residues.push(Residue { index: residues.len(), code, atoms: Vec::new() });
                    residues.len() - 1
                });

            let atom_name = line.get(12..16).unwrap_or("");
            let Some(element) = ElementClass::from_atom_name(atom_name) else {
                continue;
            };
            let coord = match (
                parse_f64_field(line, 30..38),
                parse_f64_field(line, 38..46),
                parse_f64_field(line, 46..54),
            ) {
                (Some(x), Some(y), Some(z)) => Some([x, y, z]),
                _ => None,
            };
            let alt_loc = line.get(16..17).and_then(extract_char);
            let occupancy = parse_f64_field(line, 54..60).unwrap_or(1.0);

            let residue = &mut residues[residue_index];
            if let Some(&existing) = residue.atoms.iter().find(|&&a| atoms[a].element == element) {
                // alternate locations: the most occupied wins, the first on ties
                if alt_loc.is_some() && occupancy > occupancies[existing] {
                    atoms[existing].coord = coord;
                    occupancies[existing] = occupancy;
                }
                continue;
            }

            residue.atoms.push(atoms.len());
            atoms.push(Atom { coord, element, residue: residue_index, class: AtomClass::Unknown });
            occupancies.push(occupancy);
        }

        if residues.is_empty() {
            return Err(PipelineError::EmptyStructure {
                structure: id.to_string(),
                chain: options.chain,
            });
        }

        log::debug!(
            "Parsed {}: {} residues, {} backbone atoms in chain {}",
            id,
            residues.len(),
            atoms.len(),
            options.chain
        );

        Ok(Self { id, chain: options.chain, atoms, residues })
    }

    /// Tag the atoms of `catalytic` residues positive and every other atom negative
    pub fn with_catalytic_residues(mut self, catalytic: &BTreeSet<usize>) -> PipelineResult<Self> {
        if let Some(&out_of_range) = catalytic.iter().find(|&&r| r >= self.residues.len()) {
            return Err(PipelineError::ValidationError {
                message: format!(
                    "catalytic residue {} out of range for {} ({} residues)",
                    out_of_range,
                    self.id,
                    self.residues.len()
                ),
            });
        }
        for atom in &mut self.atoms {
            atom.class = if catalytic.contains(&atom.residue) {
                AtomClass::Positive
            } else {
                AtomClass::Negative
            };
        }
        Ok(self)
    }
}

fn extract_char(field: &str) -> Option<char> {
    field.chars().next().filter(|c| !c.is_whitespace())
}

fn parse_f64_field(line: &str, range: std::ops::Range<usize>) -> Option<f64> {
    line.get(range).and_then(|s| s.trim().parse::<f64>().ok())
}
