use std::fs;
use std::path::PathBuf;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::aggregate::LengthRange;
use crate::domain::{
    AccessionKind, DbSearchFormat, DeNovoFormat, DuplicateAccessions, FunctionFormat, GlobalLookup,
    MergeMode, TaxonomyFormat,
};
use crate::error::KiraError;
use crate::resolver::AccessionTaxonomyMap;
use crate::sample::{ImportOptions, SampleFormats};

pub const DEFAULT_CONFIG_FILE: &str = "kira-mp.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub confidence_cutoff: Option<f64>,
    #[serde(default)]
    pub de_novo_confidence_cutoff: Option<f64>,
    #[serde(default)]
    pub peptide_length_range: Option<LengthRangeEntry>,
    #[serde(default)]
    pub merge_mode: Option<MergeMode>,
    #[serde(default)]
    pub combine_multiple_functions: Option<bool>,
    #[serde(default)]
    pub taxonomy_format: Option<TaxonomyFormat>,
    #[serde(default)]
    pub accession_kind: Option<AccessionKind>,
    #[serde(default)]
    pub accession_pattern: Option<String>,
    #[serde(default)]
    pub duplicate_accessions: Option<DuplicateAccessions>,
    #[serde(default)]
    pub global_lookup: Option<GlobalLookup>,
    #[serde(default)]
    pub excluded_sequences: Vec<String>,
    #[serde(default)]
    pub formats: Option<PinnedFormats>,
}

/// `[min, max]` or `{ "min": .., "max": .. }`.
#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum LengthRangeEntry {
    Pair([usize; 2]),
    Detailed {
        #[serde(default)]
        min: Option<usize>,
        #[serde(default)]
        max: Option<usize>,
    },
}

/// Formats a project accepts before its first sample arrives.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct PinnedFormats {
    #[serde(default)]
    pub db_search: Option<DbSearchFormat>,
    #[serde(default)]
    pub de_novo: Option<DeNovoFormat>,
    #[serde(default)]
    pub function: Option<FunctionFormat>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub confidence_cutoff: f64,
    pub de_novo_confidence_cutoff: f64,
    pub peptide_length_range: Option<LengthRange>,
    pub merge_mode: MergeMode,
    pub combine_multiple_functions: bool,
    pub taxonomy_format: Option<TaxonomyFormat>,
    pub accession_kind: AccessionKind,
    pub accession_pattern: Option<Regex>,
    pub duplicate_accessions: DuplicateAccessions,
    pub global_lookup: GlobalLookup,
    pub excluded_sequences: Vec<String>,
    pub pinned: SampleFormats,
}

impl ResolvedConfig {
    pub fn import_options(&self) -> ImportOptions {
        ImportOptions {
            confidence_cutoff: self.confidence_cutoff,
            de_novo_confidence_cutoff: self.de_novo_confidence_cutoff,
            length_range: self.peptide_length_range,
            merge_mode: self.merge_mode,
            combine_multiple_functions: self.combine_multiple_functions,
            accession_kind: self.accession_kind,
            global_lookup: self.global_lookup,
            excluded_sequences: self.excluded_sequences.clone(),
        }
    }

    /// Empty accession map carrying the configured pattern and duplicate policy.
    pub fn accession_map(&self) -> AccessionTaxonomyMap {
        let map = AccessionTaxonomyMap::new().with_duplicates(self.duplicate_accessions);
        match &self.accession_pattern {
            Some(pattern) => map.with_pattern(pattern.clone()),
            None => map,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, KiraError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(KiraError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| KiraError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, KiraError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(KiraError::InvalidConfig(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let confidence_cutoff = cutoff(config.confidence_cutoff, "confidence_cutoff")?;
        let de_novo_confidence_cutoff =
            cutoff(config.de_novo_confidence_cutoff, "de_novo_confidence_cutoff")?;

        let peptide_length_range = match config.peptide_length_range {
            None => None,
            Some(LengthRangeEntry::Pair([min, max])) => Some(length_range(min, Some(max))?),
            Some(LengthRangeEntry::Detailed { min, max }) => {
                Some(length_range(min.unwrap_or(0), max)?)
            }
        };

        let accession_pattern = config
            .accession_pattern
            .filter(|pattern| !pattern.is_empty())
            .map(|pattern| {
                Regex::new(&pattern)
                    .map_err(|err| KiraError::InvalidAccessionPattern(err.to_string()))
            })
            .transpose()?;

        let global_lookup = config.global_lookup.unwrap_or_default();
        if global_lookup != GlobalLookup::Off
            && config.taxonomy_format == Some(TaxonomyFormat::Gtdb)
        {
            return Err(KiraError::InvalidConfig(
                "global_lookup answers in NCBI ids and cannot be combined with GTDB taxonomy"
                    .to_string(),
            ));
        }

        let pinned = config.formats.unwrap_or_default();

        Ok(ResolvedConfig {
            schema_version,
            confidence_cutoff,
            de_novo_confidence_cutoff,
            peptide_length_range,
            merge_mode: config.merge_mode.unwrap_or_default(),
            combine_multiple_functions: config.combine_multiple_functions.unwrap_or(false),
            taxonomy_format: config.taxonomy_format,
            accession_kind: config.accession_kind.unwrap_or_default(),
            accession_pattern,
            duplicate_accessions: config.duplicate_accessions.unwrap_or_default(),
            global_lookup,
            excluded_sequences: config.excluded_sequences,
            pinned: SampleFormats {
                db_search: pinned.db_search,
                de_novo: pinned.de_novo,
                taxonomy: config.taxonomy_format,
                function: pinned.function,
            },
        })
    }
}

fn cutoff(value: Option<f64>, field: &str) -> Result<f64, KiraError> {
    match value {
        None => Ok(f64::NEG_INFINITY),
        Some(value) if value.is_finite() => Ok(value),
        Some(value) => Err(KiraError::InvalidConfig(format!(
            "{field} must be finite, got {value}"
        ))),
    }
}

fn length_range(min: usize, max: Option<usize>) -> Result<LengthRange, KiraError> {
    if let Some(max) = max
        && max < min
    {
        return Err(KiraError::InvalidConfig(format!(
            "peptide_length_range max {max} is below min {min}"
        )));
    }
    Ok(LengthRange { min, max })
}
