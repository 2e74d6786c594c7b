use serde::{Deserialize, Serialize};
use std::fmt;

/// A type-safe wrapper for the contact distance threshold (Ångström)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistanceThreshold(pub f64);

impl DistanceThreshold {
    pub const DEFAULT: f64 = 7.5;

    /// Create a new threshold with validation
    pub fn new(threshold: f64) -> Result<Self, String> {
        if !threshold.is_finite() {
            Err(format!("Distance threshold must be finite, got {}", threshold))
        } else if threshold <= 0.0 {
            Err(format!("Distance threshold must be greater than 0, got {}", threshold))
        } else {
            Ok(DistanceThreshold(threshold))
        }
    }

    /// Get the raw value
    pub fn get(&self) -> f64 {
        self.0
    }
}

impl Default for DistanceThreshold {
    fn default() -> Self {
        DistanceThreshold(Self::DEFAULT)
    }
}

impl fmt::Display for DistanceThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one structure (file stem, usually `<pdb>_<chain>`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StructureId(pub String);

impl StructureId {
    pub fn new(id: impl Into<String>) -> Self {
        StructureId(id.into())
    }

    /// Derive an id from a file path: the file name up to its first `.`
    pub fn from_path(path: &std::path::Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let stem = name.split('.').next()?;
        if stem.is_empty() {
            None
        } else {
            Some(StructureId(stem.to_string()))
        }
    }

    /// Strip a trailing suffix (e.g. `_sgk`) added by the counting tool
    pub fn normalized(&self, suffix: &str) -> StructureId {
        if suffix.is_empty() {
            return self.clone();
        }
        StructureId(self.0.strip_suffix(suffix).unwrap_or(&self.0).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StructureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Class label of a count row or residue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    Positive,
    Negative,
}

impl Label {
    /// Parse the integer label token written by the counting tool
    pub fn parse(token: &str) -> Result<Self, String> {
        match token.trim_start_matches('+').parse::<i64>() {
            Ok(1) => Ok(Label::Positive),
            Ok(-1) => Ok(Label::Negative),
            Ok(other) => Err(format!("label must be 1 or -1, got {}", other)),
            Err(_) => Err(format!("invalid label token '{}'", token)),
        }
    }

    pub fn as_i8(&self) -> i8 {
        match self {
            Label::Positive => 1,
            Label::Negative => -1,
        }
    }

    pub fn is_positive(&self) -> bool {
        matches!(self, Label::Positive)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:+}", self.as_i8())
    }
}

/// A-priori class tag of an atom, only used for label bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AtomClass {
    Positive,
    Negative,
    Unknown,
}

/// Identifies all atom rows of one residue of one structure
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResidueKey {
    pub structure: StructureId,
    pub residue: usize,
}

impl ResidueKey {
    pub fn new(structure: StructureId, residue: usize) -> Self {
        Self { structure, residue }
    }
}

impl fmt::Display for ResidueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.structure, self.residue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_threshold_validation() {
        assert!(DistanceThreshold::new(0.0).is_err());
        assert!(DistanceThreshold::new(-1.0).is_err());
        assert!(DistanceThreshold::new(f64::NAN).is_err());
        assert!(DistanceThreshold::new(f64::INFINITY).is_err());
        assert_eq!(DistanceThreshold::new(7.5).unwrap().get(), 7.5);
        assert_eq!(DistanceThreshold::default().get(), 7.5);
    }

    #[test]
    fn test_label_parsing() {
        assert_eq!(Label::parse("1").unwrap(), Label::Positive);
        assert_eq!(Label::parse("+1").unwrap(), Label::Positive);
        assert_eq!(Label::parse("-1").unwrap(), Label::Negative);
        assert!(Label::parse("0").is_err());
        assert!(Label::parse("yes").is_err());
        assert_eq!(Label::Positive.to_string(), "+1");
        assert_eq!(Label::Negative.to_string(), "-1");
    }

    #[test]
    fn test_structure_id_from_path_and_normalization() {
        let id = StructureId::from_path(Path::new("/tmp/results/1abc_A_sgk.svml")).unwrap();
        assert_eq!(id.as_str(), "1abc_A_sgk");
        assert_eq!(id.normalized("_sgk").as_str(), "1abc_A");
        assert_eq!(id.normalized("").as_str(), "1abc_A_sgk");

        let id = StructureId::from_path(Path::new("2xyz.cat.pdb")).unwrap();
        assert_eq!(id.as_str(), "2xyz");
        assert_eq!(id.normalized("_sgk").as_str(), "2xyz");
    }

    #[test]
    fn test_residue_key_display() {
        let key = ResidueKey::new(StructureId::new("1abc_A"), 42);
        assert_eq!(key.to_string(), "1abc_A_42");
    }
}
