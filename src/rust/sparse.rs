//! Sparse graphlet-count features.
//!
//! The counting tool writes one SVML-like file per structure, one line per atom row:
//!
//! ```text
//! <label> <featureId>:<count> <featureId>:<count> ... #<rowId>
//! ```
//!
//! Feature ids are arbitrarily large integers, so they are never used as matrix columns
//! directly. Every distinct id is mapped to a dense column through a [`FeatureIndexMap`]
//! ordered by numeric value, which makes the mapping reproducible for the same input set.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use ndarray::Array1;
use ndarray_npy::WriteNpyExt;
use serde::{Deserialize, Serialize};

use crate::errors::{PipelineError, PipelineResult};
use crate::io;
use crate::types::{Label, StructureId};

pub const FEATURES_FILE: &str = "features.bin";
pub const LABELS_FILE: &str = "labels.npy";
pub const STRUCTURE_IDS_FILE: &str = "structure_ids.txt";

/// Raw feature id in canonical decimal form (no sign, no leading zeros).
///
/// Ordered numerically: shorter digit strings are smaller, equal lengths compare
/// lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawFeatureId(String);

impl RawFeatureId {
    pub fn parse(token: &str) -> Result<Self, String> {
        if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("feature id '{}' is not a non-negative integer", token));
        }
        let trimmed = token.trim_start_matches('0');
        Ok(RawFeatureId(if trimmed.is_empty() { "0".to_string() } else { trimmed.to_string() }))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Ord for RawFeatureId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.len().cmp(&other.0.len()).then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for RawFeatureId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for RawFeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bijection between raw feature ids and dense columns `[0, len)`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureIndexMap {
    /// Sorted ascending, unique; position is the dense column
    ids: Vec<RawFeatureId>,
}

impl FeatureIndexMap {
    pub fn from_ids<I: IntoIterator<Item = RawFeatureId>>(ids: I) -> Self {
        let unique: BTreeSet<RawFeatureId> = ids.into_iter().collect();
        Self { ids: unique.into_iter().collect() }
    }

    pub fn index_of(&self, id: &RawFeatureId) -> Option<usize> {
        self.ids.binary_search(id).ok()
    }

    pub fn raw_id(&self, index: usize) -> Option<&RawFeatureId> {
        self.ids.get(index)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Compressed sparse row matrix of feature counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsrMatrix {
    n_cols: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    data: Vec<f64>,
}

impl CsrMatrix {
    /// Build from per-row `(column, value)` entries; columns are sorted within each row
    pub fn from_rows(rows: Vec<Vec<(usize, f64)>>, n_cols: usize) -> Self {
        let mut indptr = Vec::with_capacity(rows.len() + 1);
        let mut indices = Vec::new();
        let mut data = Vec::new();
        indptr.push(0);
        for mut row in rows {
            row.sort_by_key(|(col, _)| *col);
            for (col, value) in row {
                debug_assert!(col < n_cols);
                indices.push(col);
                data.push(value);
            }
            indptr.push(indices.len());
        }
        Self { n_cols, indptr, indices, data }
    }

    pub fn n_rows(&self) -> usize {
        self.indptr.len() - 1
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    pub fn row(&self, i: usize) -> (&[usize], &[f64]) {
        let range = self.indptr[i]..self.indptr[i + 1];
        (&self.indices[range.clone()], &self.data[range])
    }

    /// Dot product of row `i` with a dense vector of at least `n_cols` entries
    pub fn row_dot(&self, i: usize, dense: &[f64]) -> f64 {
        let (cols, values) = self.row(i);
        cols.iter().zip(values).map(|(&c, &v)| dense[c] * v).sum()
    }

    pub fn row_norm_squared(&self, i: usize) -> f64 {
        self.row(i).1.iter().map(|v| v * v).sum()
    }

    /// New matrix holding `rows` in the given order
    pub fn select_rows(&self, rows: &[usize]) -> CsrMatrix {
        let mut indptr = Vec::with_capacity(rows.len() + 1);
        let mut indices = Vec::new();
        let mut data = Vec::new();
        indptr.push(0);
        for &r in rows {
            let (cols, values) = self.row(r);
            indices.extend_from_slice(cols);
            data.extend_from_slice(values);
            indptr.push(indices.len());
        }
        CsrMatrix { n_cols: self.n_cols, indptr, indices, data }
    }
}

/// One parsed count line
#[derive(Debug, Clone, PartialEq)]
pub struct SvmlRecord {
    pub label: Label,
    /// In line order; repeated ids are kept here and resolved during assembly
    pub features: Vec<(RawFeatureId, f64)>,
    pub row_id: u64,
}

impl SvmlRecord {
    pub fn parse(line: &str) -> Result<Self, String> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 2 {
            return Err("expected '<label> [id:count ...] #<row>'".to_string());
        }
        let label = Label::parse(tokens[0])?;

        let last = tokens[tokens.len() - 1];
        let row_id = last
            .strip_prefix('#')
            .ok_or_else(|| format!("row id '{}' must start with '#'", last))?
            .parse::<u64>()
            .map_err(|_| format!("invalid row id '{}'", last))?;

        let features = tokens[1..tokens.len() - 1]
            .iter()
            .map(|token| {
                let (id, count) = token
                    .split_once(':')
                    .ok_or_else(|| format!("feature token '{}' is not id:count", token))?;
                let count =
                    count.parse::<f64>().map_err(|_| format!("invalid count in '{}'", token))?;
                Ok((RawFeatureId::parse(id)?, count))
            })
            .collect::<Result<Vec<_>, String>>()?;

        Ok(Self { label, features, row_id })
    }
}

/// Row-aligned feature matrix, labels and structure ids of one batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    pub matrix: CsrMatrix,
    pub labels: Vec<Label>,
    pub structure_ids: Vec<StructureId>,
    pub feature_index: FeatureIndexMap,
}

impl FeatureSet {
    pub fn n_rows(&self) -> usize {
        self.labels.len()
    }

    /// Persist as `features.bin` plus `labels.npy` and `structure_ids.txt` for other tools
    pub fn save(&self, dir: &Path) -> PipelineResult<()> {
        std::fs::create_dir_all(dir)?;
        io::write_atomically(dir.join(FEATURES_FILE), |w| {
            bincode::serialize_into(w, self)?;
            Ok(())
        })?;
        let labels: Array1<i8> = self.labels.iter().map(Label::as_i8).collect();
        io::write_atomically(dir.join(LABELS_FILE), |w| {
            labels.write_npy(w)?;
            Ok(())
        })?;
        io::write_atomically(dir.join(STRUCTURE_IDS_FILE), |w| {
            for id in &self.structure_ids {
                writeln!(w, "{}", id)?;
            }
            Ok(())
        })?;
        Ok(())
    }

    pub fn load(dir: &Path) -> PipelineResult<Self> {
        let file = File::open(dir.join(FEATURES_FILE))?;
        let set: FeatureSet = bincode::deserialize_from(BufReader::new(file))?;
        Ok(set)
    }
}

/// Counters reported by one assembly run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssemblyStats {
    pub files: usize,
    pub rows: usize,
    pub distinct_features: usize,
    /// Entries whose raw id is absent from a reused index map
    pub unseen_entries: usize,
}

/// Turns a directory of count files into one [`FeatureSet`].
///
/// Without a reference index the map is fitted on every id seen; with one (inference) the
/// given map is reused and unseen ids are dropped.
#[derive(Debug, Clone, Default)]
pub struct SparseFeatureAssembler {
    reference_index: Option<FeatureIndexMap>,
}

impl SparseFeatureAssembler {
    pub fn new() -> Self {
        Self { reference_index: None }
    }

    pub fn with_index(index: FeatureIndexMap) -> Self {
        Self { reference_index: Some(index) }
    }

    /// Assemble every `*.svml` file in `dir`, in file-name order
    pub fn assemble_dir(&self, dir: &Path) -> PipelineResult<(FeatureSet, AssemblyStats)> {
        let files = io::list_files_with_extension(dir, "svml")?;
        self.assemble_files(&files)
    }

    /// Assemble the given files; rows are numbered across files in the order given
    pub fn assemble_files(&self, files: &[PathBuf]) -> PipelineResult<(FeatureSet, AssemblyStats)> {
        let mut rows: Vec<BTreeMap<RawFeatureId, f64>> = Vec::new();
        let mut labels = Vec::new();
        let mut structure_ids = Vec::new();

        for path in files {
            let structure_id =
                StructureId::from_path(path).ok_or_else(|| PipelineError::MalformedRecord {
                    file: path.clone(),
                    line: 0,
                    message: "cannot derive a structure id from the file name".to_string(),
                })?;
            let reader = io::open_maybe_compressed(path)?;
            let before = rows.len();

            for (line_no, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let record =
                    SvmlRecord::parse(&line).map_err(|message| PipelineError::MalformedRecord {
                        file: path.clone(),
                        line: line_no + 1,
                        message,
                    })?;

                let mut row = BTreeMap::new();
                for (id, count) in record.features {
                    // repeated ids keep the last count
                    row.insert(id, count);
                }
                rows.push(row);
                labels.push(record.label);
                structure_ids.push(structure_id.clone());
            }
            log::debug!("{}: {} rows from {}", structure_id, rows.len() - before, path.display());
        }

        let feature_index = match &self.reference_index {
            Some(index) => index.clone(),
            None => FeatureIndexMap::from_ids(rows.iter().flat_map(|row| row.keys().cloned())),
        };

        let mut unseen_entries = 0;
        let dense_rows: Vec<Vec<(usize, f64)>> = rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .filter_map(|(id, count)| match feature_index.index_of(&id) {
                        Some(col) => Some((col, count)),
                        None => {
                            unseen_entries += 1;
                            None
                        }
                    })
                    .collect()
            })
            .collect();

        if unseen_entries > 0 {
            log::warn!("Dropped {} feature entries unseen by the reference index", unseen_entries);
        }

        let matrix = CsrMatrix::from_rows(dense_rows, feature_index.len());
        let stats = AssemblyStats {
            files: files.len(),
            rows: labels.len(),
            distinct_features: feature_index.len(),
            unseen_entries,
        };
        log::info!(
            "Assembled {} rows x {} features ({} non-zero) from {} files",
            stats.rows,
            stats.distinct_features,
            matrix.nnz(),
            stats.files
        );

        Ok((FeatureSet { matrix, labels, structure_ids, feature_index }, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(matrix: &CsrMatrix, i: usize, j: usize) -> f64 {
        let (cols, values) = matrix.row(i);
        cols.binary_search(&j).map(|pos| values[pos]).unwrap_or(0.0)
    }

    fn raw(id: &str) -> RawFeatureId {
        RawFeatureId::parse(id).unwrap()
    }

    #[test]
    fn test_raw_feature_id_numeric_order() {
        let mut ids = vec![raw("100"), raw("99"), raw("18446744073709551616000"), raw("007")];
        ids.sort();
        let sorted: Vec<&str> = ids.iter().map(RawFeatureId::as_str).collect();
        assert_eq!(sorted, vec!["7", "99", "100", "18446744073709551616000"]);
        assert_eq!(raw("000"), raw("0"));
        assert!(RawFeatureId::parse("-5").is_err());
        assert!(RawFeatureId::parse("").is_err());
    }

    #[test]
    fn test_feature_index_map_is_a_bijection() {
        let map = FeatureIndexMap::from_ids(vec![raw("50"), raw("3"), raw("50"), raw("1000")]);
        assert_eq!(map.len(), 3);
        for index in 0..map.len() {
            let id = map.raw_id(index).unwrap();
            assert_eq!(map.index_of(id), Some(index));
        }
        assert_eq!(map.index_of(&raw("3")), Some(0));
        assert_eq!(map.index_of(&raw("1000")), Some(2));
        assert_eq!(map.index_of(&raw("4")), None);
    }

    #[test]
    fn test_parse_record() {
        let record = SvmlRecord::parse("-1 12:3 99999999999999999999999:1.5 #7").unwrap();
        assert_eq!(record.label, Label::Negative);
        assert_eq!(record.row_id, 7);
        assert_eq!(
            record.features,
            vec![(raw("12"), 3.0), (raw("99999999999999999999999"), 1.5)]
        );

        let empty = SvmlRecord::parse("1 #0").unwrap();
        assert!(empty.features.is_empty());
    }

    #[test]
    fn test_parse_record_errors() {
        assert!(SvmlRecord::parse("1").is_err());
        assert!(SvmlRecord::parse("1 12:3 7").is_err());
        assert!(SvmlRecord::parse("1 12-3 #0").is_err());
        assert!(SvmlRecord::parse("1 12:x #0").is_err());
        assert!(SvmlRecord::parse("2 12:1 #0").is_err());
    }

    #[test]
    fn test_csr_select_rows() {
        let matrix = CsrMatrix::from_rows(
            vec![vec![(2, 1.0), (0, 4.0)], vec![], vec![(1, 2.0)]],
            3,
        );
        assert_eq!(matrix.n_rows(), 3);
        assert_eq!(matrix.nnz(), 3);
        assert_eq!(matrix.row(0), (&[0usize, 2][..], &[4.0, 1.0][..]));
        assert_eq!(matrix.row_dot(0, &[1.0, 1.0, 2.0]), 6.0);

        let selected = matrix.select_rows(&[2, 0]);
        assert_eq!(selected.n_rows(), 2);
        assert_eq!(entry(&selected, 0, 1), 2.0);
        assert_eq!(entry(&selected, 1, 2), 1.0);
        assert_eq!(entry(&selected, 1, 1), 0.0);
    }

    #[test]
    fn test_assembly_overwrites_repeated_pairs_and_orders_rows() -> PipelineResult<()> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join("b_sgk.svml"), "-1 5:1 #0\n")?;
        std::fs::write(dir.path().join("a.svml"), "1 300:2 5:1 300:7 #0\n\n1 20:1 #1\n")?;
        std::fs::write(dir.path().join("notes.txt"), "ignored")?;

        let (set, stats) = SparseFeatureAssembler::new().assemble_dir(dir.path())?;

        assert_eq!(stats.files, 2);
        assert_eq!(stats.rows, 3);
        assert_eq!(set.labels, vec![Label::Positive, Label::Positive, Label::Negative]);
        let ids: Vec<&str> = set.structure_ids.iter().map(StructureId::as_str).collect();
        assert_eq!(ids, vec!["a", "a", "b_sgk"]);

        // columns: 5 -> 0, 20 -> 1, 300 -> 2
        assert_eq!(set.feature_index.len(), 3);
        assert_eq!(set.matrix.n_cols(), 3);
        assert_eq!(entry(&set.matrix, 0, 2), 7.0);
        assert_eq!(entry(&set.matrix, 0, 0), 1.0);
        assert_eq!(entry(&set.matrix, 1, 1), 1.0);
        assert_eq!(entry(&set.matrix, 2, 0), 1.0);
        Ok(())
    }

    #[test]
    fn test_assembly_is_reproducible() -> PipelineResult<()> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join("s1.svml"), "1 900:1 12:2 4000000000000000000000:3 #0\n")?;
        std::fs::write(dir.path().join("s2.svml"), "-1 77:1 12:5 #0\n-1 900:2 #1\n")?;

        let (first, _) = SparseFeatureAssembler::new().assemble_dir(dir.path())?;
        let (second, _) = SparseFeatureAssembler::new().assemble_dir(dir.path())?;
        assert_eq!(first, second);
        let order: Vec<&str> =
            (0..first.feature_index.len()).map(|i| first.feature_index.raw_id(i).unwrap().as_str()).collect();
        assert_eq!(order, vec!["12", "77", "900", "4000000000000000000000"]);
        Ok(())
    }

    #[test]
    fn test_assembly_with_reference_index_drops_unseen() -> PipelineResult<()> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join("q.svml"), "1 12:2 13:9 900:1 #0\n")?;
        let index = FeatureIndexMap::from_ids(vec![raw("12"), raw("77"), raw("900")]);

        let (set, stats) = SparseFeatureAssembler::with_index(index.clone()).assemble_dir(dir.path())?;
        assert_eq!(stats.unseen_entries, 1);
        assert_eq!(set.feature_index, index);
        assert_eq!(set.matrix.n_cols(), 3);
        assert_eq!(entry(&set.matrix, 0, 0), 2.0);
        assert_eq!(entry(&set.matrix, 0, 1), 0.0);
        assert_eq!(entry(&set.matrix, 0, 2), 1.0);
        Ok(())
    }

    #[test]
    fn test_malformed_line_names_file_and_line() -> PipelineResult<()> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join("bad.svml"), "1 1:1 #0\n1 1:1 no-row-id\n")?;
        let err = SparseFeatureAssembler::new().assemble_dir(dir.path()).unwrap_err();
        match err {
            PipelineError::MalformedRecord { file, line, .. } => {
                assert!(file.ends_with("bad.svml"));
                assert_eq!(line, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        Ok(())
    }

    #[test]
    fn test_feature_set_save_and_load() -> PipelineResult<()> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join("s.svml"), "1 3:1 #0\n-1 4:2 #1\n")?;
        let (set, _) = SparseFeatureAssembler::new().assemble_dir(dir.path())?;

        let out = dir.path().join("sparse");
        set.save(&out)?;
        assert!(out.join(LABELS_FILE).exists());
        assert_eq!(std::fs::read_to_string(out.join(STRUCTURE_IDS_FILE))?, "s\ns\n");
        assert_eq!(FeatureSet::load(&out)?, set);
        Ok(())
    }
}
