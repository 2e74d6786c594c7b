#![allow(dead_code)]

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use catres::counter::GraphletCounter;
use catres::errors::PipelineResult;
use catres::records::{read_atom_indices, RecordPaths};
use catres::types::StructureId;

/// A short helix-like backbone: `residues` alanines, N/CA/C each, 3.8 Å between residues
pub fn backbone_pdb(residues: usize) -> String {
    let mut pdb = String::new();
    let mut serial = 1;
    for r in 0..residues {
        let angle = r as f64 * 100f64.to_radians();
        let (x, y, z) = (2.3 * angle.cos(), 2.3 * angle.sin(), 1.5 * r as f64);
        for (name, offset) in [("N", -0.5), ("CA", 0.0), ("C", 0.5)] {
            writeln!(
                pdb,
                "ATOM  {:>5}  {:<3} ALA A{:>4}    {:>8.3}{:>8.3}{:>8.3}  1.00  0.00           {}",
                serial,
                name,
                r + 1,
                x + offset,
                y,
                z,
                &name[..1]
            )
            .unwrap();
            serial += 1;
        }
    }
    pdb.push_str("END\n");
    pdb
}

pub fn write_backbone_pdb(dir: &Path, name: &str, residues: usize) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(format!("{name}.pdb"));
    fs::write(&path, backbone_pdb(residues)).unwrap();
    path
}

/// Stand-in for `run_kernel`: one row per queued atom, featuring its degree and queue class
pub struct DegreeCounter;

impl GraphletCounter for DegreeCounter {
    fn count(&self, records: &RecordPaths, out_dir: &Path) -> PipelineResult<PathBuf> {
        let id = StructureId::from_path(&records.graph).unwrap();
        let adjacency = catres::records::read_graph(&records.graph)?;
        let positives = read_atom_indices(&records.positive_atoms)?;
        let negatives = match &records.negative_atoms {
            Some(path) => read_atom_indices(path)?,
            None => Vec::new(),
        };

        let mut svml = String::new();
        let rows = positives.iter().map(|a| (1, *a)).chain(negatives.iter().map(|a| (-1, *a)));
        for (i, (label, atom)) in rows.enumerate() {
            let class_feature = if label > 0 { "18446744073709551617" } else { "18446744073709551619" };
            writeln!(svml, "{label} {}:1 {class_feature}:1 #{i}", 100 + adjacency[atom].len()).unwrap();
        }

        fs::create_dir_all(out_dir)?;
        let path = out_dir.join(format!("{id}_sgk.svml"));
        fs::write(&path, svml)?;
        Ok(path)
    }
}
