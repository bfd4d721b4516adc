use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Serialize;
use tracing::debug;

use crate::domain::{ConfidenceFormat, FunctionId, TaxonId};
use crate::row::{IdentificationRow, normalize_sequence};

/// Inclusive bounds on the normalized peptide length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LengthRange {
    pub min: usize,
    pub max: Option<usize>,
}

impl LengthRange {
    pub fn contains(&self, length: usize) -> bool {
        length >= self.min && self.max.is_none_or(|max| length <= max)
    }
}

#[derive(Debug, Clone)]
pub struct AggregateOptions {
    pub confidence_cutoff: f64,
    pub length_range: Option<LengthRange>,
    pub confidence_format: ConfidenceFormat,
    /// Normalized sequences dropped before grouping (contaminant list).
    pub excluded_sequences: HashSet<String>,
}

impl AggregateOptions {
    pub fn new(confidence_cutoff: f64, confidence_format: ConfidenceFormat) -> Self {
        Self {
            confidence_cutoff,
            length_range: None,
            confidence_format,
            excluded_sequences: HashSet::new(),
        }
    }

    pub fn with_length_range(mut self, range: Option<LengthRange>) -> Self {
        self.length_range = range;
        self
    }

    pub fn with_excluded<I, S>(mut self, sequences: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.excluded_sequences = sequences
            .into_iter()
            .map(|sequence| normalize_sequence(sequence.as_ref()))
            .collect();
        self
    }

    fn accepts(&self, row: &IdentificationRow, key: &str) -> bool {
        if !(row.confidence >= self.confidence_cutoff) {
            return false;
        }
        if key.is_empty() || self.excluded_sequences.contains(key) {
            return false;
        }
        self.length_range
            .is_none_or(|range| range.contains(key.chars().count()))
    }
}

/// De novo statistics attached to a peptide found by a de novo engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeNovoEvidence {
    pub psm_count: usize,
    pub max_confidence: f64,
    pub summed_intensity: Option<f64>,
    pub confidence_format: ConfidenceFormat,
}

/// All identifications of one peptide sequence within a sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeptideGroup {
    pub sequence: String,
    pub psm_count: usize,
    pub summed_intensity: Option<f64>,
    pub max_confidence: f64,
    pub confidence_format: ConfidenceFormat,
    pub representative_row: IdentificationRow,
    pub protein_ids: Vec<String>,
    pub raw_source_files: BTreeSet<String>,
    pub taxonomy_id: Option<TaxonId>,
    pub global_taxonomy_id: Option<TaxonId>,
    pub function_ids: Option<BTreeSet<FunctionId>>,
    pub is_de_novo_only: bool,
    pub de_novo: Option<DeNovoEvidence>,
}

impl PeptideGroup {
    fn start(key: String, row: &IdentificationRow, confidence_format: ConfidenceFormat) -> Self {
        Self {
            sequence: key,
            psm_count: 0,
            summed_intensity: None,
            max_confidence: row.confidence,
            confidence_format,
            representative_row: row.clone(),
            protein_ids: Vec::new(),
            raw_source_files: BTreeSet::new(),
            taxonomy_id: None,
            global_taxonomy_id: None,
            function_ids: None,
            is_de_novo_only: false,
            de_novo: None,
        }
    }

    fn push(&mut self, row: &IdentificationRow) {
        self.psm_count += 1;
        if let Some(intensity) = row.usable_intensity() {
            *self.summed_intensity.get_or_insert(0.0) += intensity;
        }
        if is_better_representative(row, &self.representative_row) {
            self.max_confidence = row.confidence;
            self.representative_row = row.clone();
        }
        merge_proteins(&mut self.protein_ids, &row.protein_ids);
        if !self.raw_source_files.contains(&row.raw_source_file) {
            self.raw_source_files.insert(row.raw_source_file.clone());
        }
    }

    /// Fold another group of the same sequence into this one.
    pub fn absorb(&mut self, other: PeptideGroup) {
        debug_assert_eq!(self.sequence, other.sequence);
        self.psm_count += other.psm_count;
        self.summed_intensity = sum_optional(self.summed_intensity, other.summed_intensity);
        if is_better_representative(&other.representative_row, &self.representative_row) {
            self.max_confidence = other.max_confidence;
            self.representative_row = other.representative_row;
        }
        merge_proteins(&mut self.protein_ids, &other.protein_ids);
        self.raw_source_files.extend(other.raw_source_files);
    }

    /// Statistics of this group when it is used as de novo evidence.
    pub fn as_de_novo_evidence(&self) -> DeNovoEvidence {
        DeNovoEvidence {
            psm_count: self.psm_count,
            max_confidence: self.max_confidence,
            summed_intensity: self.summed_intensity,
            confidence_format: self.confidence_format,
        }
    }
}

fn is_better_representative(candidate: &IdentificationRow, current: &IdentificationRow) -> bool {
    candidate.confidence > current.confidence
        || (candidate.confidence == current.confidence && candidate.scan_id < current.scan_id)
}

fn merge_proteins(target: &mut Vec<String>, incoming: &[String]) {
    for protein in incoming {
        if !target.contains(protein) {
            target.push(protein.clone());
        }
    }
}

fn sum_optional(left: Option<f64>, right: Option<f64>) -> Option<f64> {
    match (left, right) {
        (Some(left), Some(right)) => Some(left + right),
        (value, None) | (None, value) => value,
    }
}

/// Group identification rows into peptide groups, ordered by sequence.
pub fn aggregate(rows: &[IdentificationRow], options: &AggregateOptions) -> Vec<PeptideGroup> {
    let mut groups: BTreeMap<String, PeptideGroup> = BTreeMap::new();
    let mut rejected = 0usize;
    for row in rows {
        let key = normalize_sequence(&row.peptide_sequence);
        if !options.accepts(row, &key) {
            rejected += 1;
            continue;
        }
        groups
            .entry(key)
            .or_insert_with_key(|key| {
                PeptideGroup::start(key.clone(), row, options.confidence_format)
            })
            .push(row);
    }
    debug!(
        rows = rows.len(),
        rejected,
        groups = groups.len(),
        "aggregated identification rows"
    );
    groups.into_values().collect()
}
