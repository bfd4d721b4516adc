use std::fs;
use std::path::Path;

use assert_matches::assert_matches;
use camino::Utf8Path;
use tempfile::tempdir;

use kira_metapep::app::App;
use kira_metapep::config::{Config, ConfigLoader};
use kira_metapep::domain::{DbSearchFormat, FunctionId, TaxonId, TaxonomyFormat};
use kira_metapep::error::KiraError;
use kira_metapep::input::{InputLoader, load_tree};
use kira_metapep::output::JsonOutput;
use kira_metapep::project::ProjectTable;
use kira_metapep::resolver::NoSequenceService;

const NODES: &str = r#"[
    {"id": 1, "parent": 1, "rank": "no rank", "name": "root"},
    {"id": 91347, "parent": 1, "rank": "order", "name": "Enterobacterales"},
    {"id": 562, "parent": 91347, "rank": "species", "name": "Escherichia coli"},
    {"id": 550, "parent": 91347, "rank": "species", "name": "Enterobacter cloacae"}
]"#;

const TAXONOMY_MAP: &str = r#"[
    {"accession": "sp|P1|A_ECOLI", "taxonomy": 562},
    {"accession": "sp|P2|B_ENTCL", "taxonomy": 550}
]"#;

const FUNCTIONS: &str = r#"[
    {"protein_id": "P1", "function_ids": ["K00001"]},
    {"protein_id": "P2", "function_ids": ["K00001", "K00002"]}
]"#;

const PSMS: &str = r#"[
    {"raw_source_file": "run1.raw", "scan_id": 10, "peptide_sequence": "AAK", "confidence": 80.0,
     "precursor_intensity": 1.5e6, "protein_ids": ["P1", "P2"]},
    {"raw_source_file": "run1.raw", "scan_id": "F1:11", "peptide_sequence": "CCK",
     "confidence": 10.0,
     "protein_ids": ["P1"]}
]"#;

const MANIFEST: &str = r#"{
    "sample_name": "gut-1",
    "db_search": [{"path": "psms.json", "format": "peaks11"}],
    "taxonomy": {"nodes": "nodes.json", "map": "taxa.json"},
    "functions": {"format": "eggnog", "map": "functions.json"}
}"#;

fn write(dir: &Path, name: &str, content: &str) {
    fs::write(dir.join(name), content).unwrap();
}

fn utf8(path: &Path) -> &Utf8Path {
    Utf8Path::from_path(path).unwrap()
}

#[test]
fn manifest_imports_end_to_end() {
    let dir = tempdir().unwrap();
    write(dir.path(), "nodes.json", NODES);
    write(dir.path(), "taxa.json", TAXONOMY_MAP);
    write(dir.path(), "functions.json", FUNCTIONS);
    write(dir.path(), "psms.json", PSMS);
    write(dir.path(), "manifest.json", MANIFEST);
    write(
        dir.path(),
        "kira-mp.json",
        r#"{
            "confidence_cutoff": 20,
            "accession_pattern": "^sp\\|([^|]+)\\|",
            "combine_multiple_functions": true
        }"#,
    );

    let config_path = dir.path().join("kira-mp.json");
    let config = ConfigLoader::resolve(config_path.to_str()).unwrap();
    let mut loader = InputLoader::new(&config);
    let manifest_path = dir.path().join("manifest.json");
    let request = loader.load(utf8(&manifest_path)).unwrap();
    assert_eq!(request.sample_name, "gut-1");
    assert_eq!(request.db_search.len(), 1);
    assert_eq!(request.options.confidence_cutoff, 20.0);

    let app = App::new(ProjectTable::new(), NoSequenceService);
    let report = app.import(request, &JsonOutput).unwrap();
    assert_eq!(report.samples, vec!["gut-1".to_string()]);

    let sample = app.project().sample("gut-1").unwrap().unwrap();
    assert_eq!(sample.groups.len(), 1);
    assert_eq!(sample.formats.taxonomy, Some(TaxonomyFormat::Ncbi));
    assert_eq!(sample.formats.db_search, Some(DbSearchFormat::Peaks11));
    let group = sample.group("AAK").unwrap();
    assert_eq!(group.taxonomy_id, Some(TaxonId::Ncbi(91347)));
    assert_eq!(group.summed_intensity, Some(1.5e6));
    assert_eq!(
        group.function_ids.as_ref().map(|ids| ids.len()),
        Some(2)
    );
    assert!(
        group
            .function_ids
            .as_ref()
            .is_some_and(|ids| ids.contains(&FunctionId::from("K00002")))
    );
}

#[test]
fn trees_are_shared_between_manifests() {
    let dir = tempdir().unwrap();
    write(dir.path(), "nodes.json", NODES);
    let config = ConfigLoader::resolve_config(Config::default()).unwrap();
    let mut loader = InputLoader::new(&config);
    let nodes = dir.path().join("nodes.json");

    let first = loader.tree(utf8(&nodes)).unwrap();
    let second = loader.tree(utf8(&nodes)).unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &second));
    assert_eq!(first.len(), 4);
}

#[test]
fn missing_input_file_is_reported() {
    let dir = tempdir().unwrap();
    write(dir.path(), "manifest.json", MANIFEST);
    let config = ConfigLoader::resolve_config(Config::default()).unwrap();
    let mut loader = InputLoader::new(&config);
    let manifest_path = dir.path().join("manifest.json");
    assert_matches!(
        loader.load(utf8(&manifest_path)),
        Err(KiraError::InputRead { path, .. }) if path.ends_with("psms.json")
    );
}

#[test]
fn malformed_tree_is_a_parse_error() {
    let dir = tempdir().unwrap();
    write(dir.path(), "nodes.json", r#"[{"id": 1, "rank": 7}]"#);
    let nodes = dir.path().join("nodes.json");
    assert_matches!(load_tree(utf8(&nodes)), Err(KiraError::InputParse { .. }));
}

#[test]
fn dangling_parent_is_rejected() {
    let dir = tempdir().unwrap();
    write(
        dir.path(),
        "nodes.json",
        r#"[{"id": 2, "parent": 1, "rank": "superkingdom", "name": "Bacteria"}]"#,
    );
    let nodes = dir.path().join("nodes.json");
    assert_matches!(load_tree(utf8(&nodes)), Err(KiraError::InvalidTaxonomyTree(_)));
}
