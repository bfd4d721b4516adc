use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::KiraError;

/// Taxonomy identifier. NCBI ids are numeric, GTDB ids are rank-prefixed
/// names such as `g__Escherichia`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "TaxonIdRepr")]
pub enum TaxonId {
    Ncbi(u32),
    Named(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TaxonIdRepr {
    Number(u64),
    Text(String),
}

impl TryFrom<TaxonIdRepr> for TaxonId {
    type Error = KiraError;

    fn try_from(value: TaxonIdRepr) -> Result<Self, Self::Error> {
        match value {
            TaxonIdRepr::Number(number) => u32::try_from(number)
                .map(TaxonId::Ncbi)
                .map_err(|_| KiraError::InvalidTaxonId(number.to_string())),
            TaxonIdRepr::Text(text) => text.parse(),
        }
    }
}

impl Serialize for TaxonId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TaxonId::Ncbi(id) => serializer.serialize_u32(*id),
            TaxonId::Named(name) => serializer.serialize_str(name),
        }
    }
}

impl From<u32> for TaxonId {
    fn from(value: u32) -> Self {
        TaxonId::Ncbi(value)
    }
}

impl fmt::Display for TaxonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaxonId::Ncbi(id) => write!(f, "{id}"),
            TaxonId::Named(name) => write!(f, "{name}"),
        }
    }
}

impl FromStr for TaxonId {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(KiraError::InvalidTaxonId(value.to_string()));
        }
        if trimmed.chars().all(|ch| ch.is_ascii_digit()) {
            return trimmed
                .parse::<u32>()
                .map(TaxonId::Ncbi)
                .map_err(|_| KiraError::InvalidTaxonId(value.to_string()));
        }
        Ok(TaxonId::Named(trimmed.to_string()))
    }
}

/// Taxonomic rank; unknown rank names (clade, strain, no rank ...) read as `Unranked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all(serialize = "lowercase"), try_from = "String")]
pub enum Rank {
    Superkingdom,
    Kingdom,
    Phylum,
    Class,
    Order,
    Family,
    Genus,
    Species,
    Unranked,
}

impl Rank {
    /// Ranks reported in a standard lineage, from the top of the tree down.
    pub const STANDARD: [Rank; 7] = [
        Rank::Superkingdom,
        Rank::Phylum,
        Rank::Class,
        Rank::Order,
        Rank::Family,
        Rank::Genus,
        Rank::Species,
    ];

    pub fn lineage_index(self) -> Option<usize> {
        Self::STANDARD.iter().position(|rank| *rank == self)
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Rank::Superkingdom => "superkingdom",
            Rank::Kingdom => "kingdom",
            Rank::Phylum => "phylum",
            Rank::Class => "class",
            Rank::Order => "order",
            Rank::Family => "family",
            Rank::Genus => "genus",
            Rank::Species => "species",
            Rank::Unranked => "unranked",
        };
        write!(f, "{name}")
    }
}

impl TryFrom<String> for Rank {
    type Error = KiraError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl FromStr for Rank {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        match normalized.as_str() {
            "" => Err(KiraError::InvalidRank(value.to_string())),
            "superkingdom" | "domain" | "realm" => Ok(Rank::Superkingdom),
            "kingdom" => Ok(Rank::Kingdom),
            "phylum" => Ok(Rank::Phylum),
            "class" => Ok(Rank::Class),
            "order" => Ok(Rank::Order),
            "family" => Ok(Rank::Family),
            "genus" => Ok(Rank::Genus),
            "species" => Ok(Rank::Species),
            _ => Ok(Rank::Unranked),
        }
    }
}

/// Spectrum scan identifier; numeric scans order numerically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "ScanIdRepr")]
pub enum ScanId {
    Number(u64),
    Text(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ScanIdRepr {
    Number(u64),
    Text(String),
}

impl TryFrom<ScanIdRepr> for ScanId {
    type Error = std::convert::Infallible;

    fn try_from(value: ScanIdRepr) -> Result<Self, Self::Error> {
        Ok(match value {
            ScanIdRepr::Number(number) => ScanId::Number(number),
            ScanIdRepr::Text(text) => ScanId::from(text.as_str()),
        })
    }
}

impl Serialize for ScanId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ScanId::Number(number) => serializer.serialize_u64(*number),
            ScanId::Text(text) => serializer.serialize_str(text),
        }
    }
}

impl From<u64> for ScanId {
    fn from(value: u64) -> Self {
        ScanId::Number(value)
    }
}

impl From<i32> for ScanId {
    fn from(value: i32) -> Self {
        match u64::try_from(value) {
            Ok(number) => ScanId::Number(number),
            Err(_) => ScanId::Text(value.to_string()),
        }
    }
}

impl From<&str> for ScanId {
    fn from(value: &str) -> Self {
        let trimmed = value.trim();
        match trimmed.parse::<u64>() {
            Ok(number) => ScanId::Number(number),
            Err(_) => ScanId::Text(trimmed.to_string()),
        }
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanId::Number(number) => write!(f, "{number}"),
            ScanId::Text(text) => write!(f, "{text}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionId(String);

impl FunctionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FunctionId {
    fn from(value: &str) -> Self {
        Self(value.trim().to_string())
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scale on which a source reports identification confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfidenceFormat {
    NegLog10P,
    Hyperscore,
    Score,
    Alc,
}

impl fmt::Display for ConfidenceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfidenceFormat::NegLog10P => write!(f, "-10lgP"),
            ConfidenceFormat::Hyperscore => write!(f, "Hyperscore"),
            ConfidenceFormat::Score => write!(f, "Score"),
            ConfidenceFormat::Alc => write!(f, "ALC"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DbSearchFormat {
    Peaks11,
    Peaks10,
    MaxQuant,
    ProteomeDiscoverer,
    Sage,
}

impl DbSearchFormat {
    pub fn confidence_format(self) -> ConfidenceFormat {
        match self {
            DbSearchFormat::Peaks11 | DbSearchFormat::Peaks10 => ConfidenceFormat::NegLog10P,
            DbSearchFormat::Sage => ConfidenceFormat::Hyperscore,
            DbSearchFormat::MaxQuant | DbSearchFormat::ProteomeDiscoverer => {
                ConfidenceFormat::Score
            }
        }
    }
}

impl fmt::Display for DbSearchFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbSearchFormat::Peaks11 => write!(f, "Peaks 11"),
            DbSearchFormat::Peaks10 => write!(f, "Peaks 10"),
            DbSearchFormat::MaxQuant => write!(f, "MaxQuant"),
            DbSearchFormat::ProteomeDiscoverer => write!(f, "ProteomeDiscoverer"),
            DbSearchFormat::Sage => write!(f, "Sage"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DeNovoFormat {
    Peaks11,
    Peaks10,
    Novor,
    Casanovo,
}

impl DeNovoFormat {
    pub fn confidence_format(self) -> ConfidenceFormat {
        match self {
            DeNovoFormat::Peaks11 | DeNovoFormat::Peaks10 => ConfidenceFormat::Alc,
            DeNovoFormat::Novor | DeNovoFormat::Casanovo => ConfidenceFormat::Score,
        }
    }
}

impl fmt::Display for DeNovoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeNovoFormat::Peaks11 => write!(f, "Peaks 11"),
            DeNovoFormat::Peaks10 => write!(f, "Peaks 10"),
            DeNovoFormat::Novor => write!(f, "Novor"),
            DeNovoFormat::Casanovo => write!(f, "Casanovo"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TaxonomyFormat {
    Ncbi,
    Gtdb,
}

impl fmt::Display for TaxonomyFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaxonomyFormat::Ncbi => write!(f, "NCBI"),
            TaxonomyFormat::Gtdb => write!(f, "GTDB"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FunctionFormat {
    Gkoala,
    Eggnog,
}

impl fmt::Display for FunctionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionFormat::Gkoala => write!(f, "gKOALA"),
            FunctionFormat::Eggnog => write!(f, "EggNOG"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MergeMode {
    /// All imported files form one sample.
    Merged,
    /// One sample per db search file.
    #[default]
    Separate,
}

/// Key used to look up taxonomy for a peptide group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AccessionKind {
    #[default]
    Protein,
    Sequence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum GlobalLookup {
    #[default]
    Off,
    /// Query the sequence service only for groups without a local result.
    Fallback,
    /// Query every group and store the answer next to the local result.
    Always,
}

/// Handling of accessions listed more than once in a taxonomy map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicateAccessions {
    #[default]
    Lca,
    KeepFirst,
}
