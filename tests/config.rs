use std::fs;

use assert_matches::assert_matches;
use tempfile::tempdir;

use kira_metapep::aggregate::LengthRange;
use kira_metapep::config::{Config, ConfigLoader};
use kira_metapep::domain::{
    AccessionKind, DbSearchFormat, DuplicateAccessions, GlobalLookup, MergeMode, TaxonId,
    TaxonomyFormat,
};
use kira_metapep::error::KiraError;

fn resolve_json(json: &str) -> Result<kira_metapep::config::ResolvedConfig, KiraError> {
    let dir = tempdir().unwrap();
    let path = dir.path().join("kira-mp.json");
    fs::write(&path, json).unwrap();
    ConfigLoader::resolve(Some(path.to_str().unwrap()))
}

#[test]
fn full_config_resolves() {
    let resolved = resolve_json(
        r#"{
            "schema_version": 1,
            "confidence_cutoff": 20.0,
            "de_novo_confidence_cutoff": 50,
            "peptide_length_range": [7, 30],
            "merge_mode": "merged",
            "combine_multiple_functions": true,
            "taxonomy_format": "ncbi",
            "accession_kind": "sequence",
            "accession_pattern": "^(?:sp|tr)\\|([^|]+)\\|",
            "duplicate_accessions": "keep-first",
            "global_lookup": "fallback",
            "excluded_sequences": ["PEPTIDE"],
            "formats": {"db_search": "peaks11"}
        }"#,
    )
    .unwrap();

    assert_eq!(resolved.confidence_cutoff, 20.0);
    assert_eq!(resolved.de_novo_confidence_cutoff, 50.0);
    assert_eq!(
        resolved.peptide_length_range,
        Some(LengthRange { min: 7, max: Some(30) })
    );
    assert_eq!(resolved.merge_mode, MergeMode::Merged);
    assert!(resolved.combine_multiple_functions);
    assert_eq!(resolved.accession_kind, AccessionKind::Sequence);
    assert_eq!(resolved.duplicate_accessions, DuplicateAccessions::KeepFirst);
    assert_eq!(resolved.global_lookup, GlobalLookup::Fallback);
    assert_eq!(resolved.pinned.db_search, Some(DbSearchFormat::Peaks11));
    assert_eq!(resolved.pinned.taxonomy, Some(TaxonomyFormat::Ncbi));

    let options = resolved.import_options();
    assert_eq!(options.excluded_sequences, vec!["PEPTIDE".to_string()]);
    assert_eq!(options.merge_mode, MergeMode::Merged);
}

#[test]
fn configured_pattern_canonicalizes_accessions() {
    let resolved = resolve_json(r#"{"accession_pattern": "^(?:sp|tr)\\|([^|]+)\\|"}"#).unwrap();
    let mut map = resolved.accession_map();
    map.insert("sp|P0A7V8|RS4_ECOLI", TaxonId::Ncbi(562));
    assert!(map.get("P0A7V8").is_some());
    assert!(map.get("tr|P0A7V8|X").is_some());
}

#[test]
fn inverted_length_range_is_rejected() {
    assert_matches!(
        resolve_json(r#"{"peptide_length_range": [30, 7]}"#),
        Err(KiraError::InvalidConfig(_))
    );
}

#[test]
fn non_finite_cutoff_is_rejected() {
    let config = Config {
        confidence_cutoff: Some(f64::NAN),
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(KiraError::InvalidConfig(message)) if message.contains("confidence_cutoff")
    );
    let config = Config {
        de_novo_confidence_cutoff: Some(f64::INFINITY),
        ..Config::default()
    };
    assert_matches!(ConfigLoader::resolve_config(config), Err(KiraError::InvalidConfig(_)));
}

#[test]
fn unknown_schema_version_is_rejected() {
    assert_matches!(
        resolve_json(r#"{"schema_version": 2}"#),
        Err(KiraError::InvalidConfig(_))
    );
}

#[test]
fn bad_pattern_is_reported() {
    assert_matches!(
        resolve_json(r#"{"accession_pattern": "(["}"#),
        Err(KiraError::InvalidAccessionPattern(_))
    );
}

#[test]
fn global_lookup_with_gtdb_is_rejected() {
    assert_matches!(
        resolve_json(r#"{"taxonomy_format": "gtdb", "global_lookup": "always"}"#),
        Err(KiraError::InvalidConfig(_))
    );
}

#[test]
fn malformed_json_is_a_parse_error() {
    assert_matches!(resolve_json("{ not json"), Err(KiraError::ConfigParse(_)));
}

#[test]
fn missing_explicit_path_is_a_read_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.json");
    assert_matches!(
        ConfigLoader::resolve(Some(path.to_str().unwrap())),
        Err(KiraError::ConfigRead(_))
    );
}
