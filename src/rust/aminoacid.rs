/// Standard amino acids, one-letter codes
pub const STANDARD_AA: [char; 20] = [
    'A', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'K', 'L', 'M', 'N', 'P', 'Q', 'R', 'S', 'T', 'V', 'W',
    'Y',
];

/// Three-letter residue names of the standard amino acids, same order as [`STANDARD_AA`]
pub const STANDARD_RESIDUE_NAMES: [&str; 20] = [
    "ALA", "CYS", "ASP", "GLU", "PHE", "GLY", "HIS", "ILE", "LYS", "LEU", "MET", "ASN", "PRO",
    "GLN", "ARG", "SER", "THR", "VAL", "TRP", "TYR",
];

/// One-letter code of a standard amino acid given its three-letter residue name
/// (case-insensitive). Returns `None` for anything that is not one of the 20 standard residues.
pub fn standard_one_letter(residue_name: &str) -> Option<char> {
    let upper = residue_name.trim().to_ascii_uppercase();
    STANDARD_RESIDUE_NAMES.iter().position(|name| *name == upper).map(|idx| STANDARD_AA[idx])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_residues() {
        for (name, code) in STANDARD_RESIDUE_NAMES.iter().zip(STANDARD_AA.iter()) {
            assert_eq!(standard_one_letter(name), Some(*code));
        }
        assert_eq!(standard_one_letter("his"), Some('H'));
        assert_eq!(standard_one_letter("Ser"), Some('S'));
    }

    #[test]
    fn test_non_standard_residues() {
        assert_eq!(standard_one_letter("HOH"), None);
        assert_eq!(standard_one_letter("SEC"), None);
        assert_eq!(standard_one_letter("MSE"), None);
        assert_eq!(standard_one_letter("UNK"), None);
    }
}
