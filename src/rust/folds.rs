//! Cross-validation folds grouped by structure.
//!
//! The split table has one tab-separated line per (fold, role, structure):
//!
//! ```text
//! fold0	test	1abc_A
//! fold0	train	2xyz_B
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::errors::{PipelineError, PipelineResult};
use crate::io;
use crate::queues::ResidueKeyResolver;
use crate::records::QueueLayout;
use crate::types::{Label, ResidueKey, StructureId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitRole {
    Train,
    Test,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitEntry {
    pub fold: usize,
    pub role: SplitRole,
    pub structure: StructureId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitTable {
    entries: Vec<SplitEntry>,
}

impl SplitTable {
    /// Parse the table; a structure may appear at most once per fold.
    pub fn parse(text: &str) -> PipelineResult<Self> {
        let mut entries = Vec::new();
        let mut seen: HashMap<(usize, StructureId), (SplitRole, usize)> = HashMap::new();
        for (line_no, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let invalid = |message: String| PipelineError::InvalidSplitTable { line: line_no + 1, message };

            let fields: Vec<&str> = line.trim_end_matches('\r').split('\t').collect();
            let [fold, role, structure] = fields[..] else {
                return Err(invalid(format!("expected 3 tab-separated fields, found {}", fields.len())));
            };
            let fold = parse_fold_number(fold).ok_or_else(|| invalid(format!("no fold number in '{}'", fold)))?;
            let role = match role.trim() {
                "train" => SplitRole::Train,
                "test" => SplitRole::Test,
                other => return Err(invalid(format!("role must be train or test, got '{}'", other))),
            };
            let structure = structure.trim();
            if structure.is_empty() {
                return Err(invalid("empty structure id".to_string()));
            }
            let structure = StructureId::new(structure);
            if let Some(&(first_role, first_line)) = seen.get(&(fold, structure.clone())) {
                let message = if first_role == role {
                    format!("{} listed twice in fold {} (first on line {})", structure, fold, first_line)
                } else {
                    format!(
                        "{} is both train and test in fold {} (first on line {})",
                        structure, fold, first_line
                    )
                };
                return Err(invalid(message));
            }
            seen.insert((fold, structure.clone()), (role, line_no + 1));
            entries.push(SplitEntry { fold, role, structure });
        }
        Ok(Self { entries })
    }

    pub fn from_file(path: &Path) -> PipelineResult<Self> {
        Self::parse(&io::read_to_string(path)?)
    }

    pub fn entries(&self) -> &[SplitEntry] {
        &self.entries
    }

    /// Highest fold number plus one
    pub fn fold_count(&self) -> usize {
        self.entries.iter().map(|e| e.fold + 1).max().unwrap_or(0)
    }
}

/// Trailing decimal digits of a fold token (`fold3` → 3)
fn parse_fold_number(token: &str) -> Option<usize> {
    let token = token.trim();
    let digits_start = token.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    token[digits_start..].parse().ok()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FoldAssignment {
    pub fold: usize,
    pub train_rows: Vec<usize>,
    pub test_rows: Vec<usize>,
    /// Residue key of every test row, aligned with `test_rows`
    pub test_residues: Vec<ResidueKey>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SplitDiagnostics {
    /// Table entries whose structure has no feature rows
    pub unmatched_entries: usize,
    /// Table entries whose atom queues outlasted their rows
    pub unexhausted_entries: usize,
}

pub struct FoldSplitter {
    record_dir: PathBuf,
    layout: QueueLayout,
    suffix: String,
    strict: bool,
}

impl FoldSplitter {
    /// `suffix` is stripped from row structure ids before matching them against the table
    pub fn new(record_dir: impl Into<PathBuf>, layout: QueueLayout, suffix: impl Into<String>) -> Self {
        Self { record_dir: record_dir.into(), layout, suffix: suffix.into(), strict: false }
    }

    /// Make unmatched and unexhausted entries fatal
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn split(
        &self,
        table: &SplitTable,
        structure_ids: &[StructureId],
        labels: &[Label],
    ) -> PipelineResult<(Vec<FoldAssignment>, SplitDiagnostics)> {
        let mut rows_by_structure: HashMap<StructureId, Vec<usize>> = HashMap::new();
        for (row, id) in structure_ids.iter().enumerate() {
            rows_by_structure.entry(id.normalized(&self.suffix)).or_default().push(row);
        }

        let mut folds: Vec<FoldAssignment> =
            (0..table.fold_count()).map(|fold| FoldAssignment { fold, ..Default::default() }).collect();
        let mut diagnostics = SplitDiagnostics::default();

        for entry in table.entries() {
            let Some(rows) = rows_by_structure.get(&entry.structure) else {
                if self.strict {
                    return Err(PipelineError::StructureNotInFeatures { structure: entry.structure.to_string() });
                }
                log::debug!("Split entry {} has no feature rows", entry.structure);
                diagnostics.unmatched_entries += 1;
                continue;
            };

            let row_labels: Vec<Label> = rows.iter().map(|&r| labels[r]).collect();
            let resolved = ResidueKeyResolver::load(&self.record_dir, &entry.structure, &self.layout)?
                .resolve(&row_labels, rows[0])?;
            if resolved.unconsumed > 0 {
                if self.strict {
                    return Err(PipelineError::QueueMismatch {
                        structure: entry.structure.to_string(),
                        message: format!("{} queued atoms without rows", resolved.unconsumed),
                    });
                }
                diagnostics.unexhausted_entries += 1;
            }

            let fold = &mut folds[entry.fold];
            match entry.role {
                SplitRole::Train => fold.train_rows.extend_from_slice(rows),
                SplitRole::Test => {
                    fold.test_rows.extend_from_slice(rows);
                    fold.test_residues.extend(resolved.keys);
                }
            }
        }

        if diagnostics.unmatched_entries > 0 || diagnostics.unexhausted_entries > 0 {
            log::warn!(
                "Split table: {} entries without feature rows, {} entries with unconsumed atom queues",
                diagnostics.unmatched_entries,
                diagnostics.unexhausted_entries
            );
        }
        for fold in &folds {
            log::info!("Fold {}: {} train rows, {} test rows", fold.fold, fold.train_rows.len(), fold.test_rows.len());
        }

        Ok((folds, diagnostics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;
    use Label::{Negative as N, Positive as P};

    /// Record files for a structure with `atoms` atoms, one residue per two atoms
    fn write_records(dir: &Path, id: &str, positive: &[usize], negative: &[usize], atoms: usize) {
        let join = |v: &[usize]| v.iter().map(|i| format!("{i}\n")).collect::<String>();
        fs::write(dir.join(format!("{id}.csa_atom_pos")), join(positive)).unwrap();
        fs::write(dir.join(format!("{id}.csa_atom_neg")), join(negative)).unwrap();
        let residues: Vec<String> = (0..atoms).map(|a| (a / 2).to_string()).collect();
        fs::write(dir.join(format!("{id}.atom_res_indices")), residues.join(",")).unwrap();
    }

    fn layout() -> QueueLayout {
        QueueLayout::Training { method: "csa".to_string() }
    }

    fn ids(names: &[&str]) -> Vec<StructureId> {
        names.iter().map(|n| StructureId::new(*n)).collect()
    }

    #[test]
    fn test_parse_table() {
        let table = SplitTable::parse("fold0\ttest\tS\nfold3\ttrain\tT\r\n\n").unwrap();
        assert_eq!(table.entries().len(), 2);
        assert_eq!(table.entries()[0], SplitEntry { fold: 0, role: SplitRole::Test, structure: StructureId::new("S") });
        assert_eq!(table.entries()[1].fold, 3);
        assert_eq!(table.fold_count(), 4);
        assert_eq!(parse_fold_number("fold12"), Some(12));
        assert_eq!(parse_fold_number("7"), Some(7));
        assert_eq!(parse_fold_number("fold"), None);
    }

    #[test]
    fn test_parse_table_errors() {
        assert!(matches!(
            SplitTable::parse("fold0\ttest\n").unwrap_err(),
            PipelineError::InvalidSplitTable { line: 1, .. }
        ));
        assert!(SplitTable::parse("fold0\tvalidate\tS\n").is_err());
        assert!(SplitTable::parse("foldX\ttest\tS\n").is_err());
    }

    #[test]
    fn test_structure_lands_only_in_its_test_fold() {
        let dir = tempdir().unwrap();
        // S: atoms 0..4, residue 1 (atoms 2,3) catalytic; T: atoms 0..2, none catalytic
        write_records(dir.path(), "S", &[2, 3], &[0, 1], 4);
        write_records(dir.path(), "T", &[], &[0, 1], 2);

        let table = SplitTable::parse("fold0\ttest\tS\nfold0\ttrain\tT\nfold1\ttrain\tS\nfold1\ttest\tT\n").unwrap();
        let structure_ids = ids(&["S_sgk", "S_sgk", "S_sgk", "S_sgk", "T_sgk", "T_sgk"]);
        let labels = vec![P, P, N, N, N, N];

        let (folds, diagnostics) =
            FoldSplitter::new(dir.path(), layout(), "_sgk").split(&table, &structure_ids, &labels).unwrap();

        assert_eq!(diagnostics, SplitDiagnostics::default());
        assert_eq!(folds.len(), 2);
        assert_eq!(folds[0].test_rows, vec![0, 1, 2, 3]);
        assert_eq!(folds[0].train_rows, vec![4, 5]);
        assert!(folds[1].test_rows.iter().all(|r| *r >= 4));
        assert_eq!(folds[1].train_rows, vec![0, 1, 2, 3]);
        for fold in &folds {
            assert!(fold.train_rows.iter().all(|r| !fold.test_rows.contains(r)));
        }

        let keys: Vec<String> = folds[0].test_residues.iter().map(ResidueKey::to_string).collect();
        assert_eq!(keys, vec!["S_1", "S_1", "S_0", "S_0"]);
        assert_eq!(folds[1].test_residues.len(), folds[1].test_rows.len());
    }

    #[test]
    fn test_structure_in_both_roles_of_a_fold_is_rejected() {
        let err = SplitTable::parse("fold0\ttest\tS\nfold1\ttrain\tS\nfold0\ttrain\tS\n").unwrap_err();
        match err {
            PipelineError::InvalidSplitTable { line, message } => {
                assert_eq!(line, 3);
                assert!(message.contains("both train and test in fold 0"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let err = SplitTable::parse("fold0\ttest\tS\nfold0\ttest\tS\n").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidSplitTable { line: 2, .. }));
    }

    #[test]
    fn test_diagnostics_and_strict_mode() {
        let dir = tempdir().unwrap();
        // one queued atom more than the single row
        write_records(dir.path(), "S", &[0], &[1], 2);

        let table = SplitTable::parse("fold0\ttest\tS\nfold0\ttrain\tmissing\n").unwrap();
        let structure_ids = ids(&["S"]);
        let labels = vec![P];

        let splitter = FoldSplitter::new(dir.path(), layout(), "_sgk");
        let (folds, diagnostics) = splitter.split(&table, &structure_ids, &labels).unwrap();
        assert_eq!(diagnostics.unmatched_entries, 1);
        assert_eq!(diagnostics.unexhausted_entries, 1);
        assert_eq!(folds[0].test_rows, vec![0]);

        let strict = FoldSplitter::new(dir.path(), layout(), "_sgk").strict(true);
        assert!(matches!(
            strict.split(&table, &structure_ids, &labels).unwrap_err(),
            PipelineError::QueueMismatch { .. }
        ));

        let table = SplitTable::parse("fold0\ttrain\tmissing\n").unwrap();
        assert!(matches!(
            strict.split(&table, &structure_ids, &labels).unwrap_err(),
            PipelineError::StructureNotInFeatures { .. }
        ));
    }
}
