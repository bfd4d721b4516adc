use serde::{Deserialize, Serialize};

use crate::domain::ScanId;

/// One peptide-spectrum match as handed over by a format adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentificationRow {
    pub raw_source_file: String,
    pub scan_id: ScanId,
    pub peptide_sequence: String,
    pub confidence: f64,
    #[serde(default)]
    pub precursor_intensity: Option<f64>,
    #[serde(default)]
    pub protein_ids: Vec<String>,
    #[serde(default)]
    pub retention_time: Option<f64>,
    #[serde(default)]
    pub mz: Option<f64>,
    #[serde(default)]
    pub charge: Option<i32>,
}

impl IdentificationRow {
    pub fn new(
        raw_source_file: impl Into<String>,
        scan_id: impl Into<ScanId>,
        peptide_sequence: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            raw_source_file: raw_source_file.into(),
            scan_id: scan_id.into(),
            peptide_sequence: peptide_sequence.into(),
            confidence,
            precursor_intensity: None,
            protein_ids: Vec::new(),
            retention_time: None,
            mz: None,
            charge: None,
        }
    }

    pub fn with_intensity(mut self, intensity: f64) -> Self {
        self.precursor_intensity = Some(intensity);
        self
    }

    pub fn with_proteins<I, S>(mut self, proteins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protein_ids = Vec::new();
        for protein in proteins {
            let protein = protein.into();
            if !protein.is_empty() && !self.protein_ids.contains(&protein) {
                self.protein_ids.push(protein);
            }
        }
        self
    }

    /// Grouping key of this row's peptide.
    pub fn sequence_key(&self) -> String {
        normalize_sequence(&self.peptide_sequence)
    }

    /// Intensity usable for summing; negative and non-finite values count as absent.
    pub fn usable_intensity(&self) -> Option<f64> {
        self.precursor_intensity
            .filter(|value| value.is_finite() && *value >= 0.0)
    }
}

/// Strip modification annotations and flanking notation and equate I with L.
///
/// `(+15.99)`, `[Oxidation]` and `{...}` blocks are removed together with any
/// non-letter character, so `M(+15.99)PEPTIDE` and `MPEPTLDE` share a key.
pub fn normalize_sequence(sequence: &str) -> String {
    let mut normalized = String::with_capacity(sequence.len());
    let mut depth = 0usize;
    for ch in sequence.chars() {
        match ch {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            _ if depth > 0 => {}
            _ if ch.is_ascii_alphabetic() => {
                let upper = ch.to_ascii_uppercase();
                normalized.push(if upper == 'I' { 'L' } else { upper });
            }
            _ => {}
        }
    }
    normalized
}
