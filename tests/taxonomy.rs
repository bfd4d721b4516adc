use std::collections::BTreeSet;

use assert_matches::assert_matches;

use kira_metapep::aggregate::{AggregateOptions, aggregate};
use kira_metapep::domain::{AccessionKind, ConfidenceFormat, Rank, TaxonId};
use kira_metapep::error::KiraError;
use kira_metapep::resolver::{
    AccessionTaxonRow, AccessionTaxonomyMap, TaxonomyResolver, resolve, resolve_counted,
};
use kira_metapep::row::IdentificationRow;
use kira_metapep::taxonomy::{TaxonNode, TaxonomyTree};

fn ncbi(id: u32) -> TaxonId {
    TaxonId::Ncbi(id)
}

fn tree() -> TaxonomyTree {
    TaxonomyTree::from_nodes([
        TaxonNode::new(1u32, Some(ncbi(1)), Rank::Unranked, "root"),
        TaxonNode::new(2u32, Some(ncbi(1)), Rank::Superkingdom, "Bacteria"),
        TaxonNode::new(1224u32, Some(ncbi(2)), Rank::Phylum, "Pseudomonadota"),
        TaxonNode::new(1236u32, Some(ncbi(1224)), Rank::Class, "Gammaproteobacteria"),
        TaxonNode::new(91347u32, Some(ncbi(1236)), Rank::Order, "Enterobacterales"),
        TaxonNode::new(543u32, Some(ncbi(91347)), Rank::Family, "Enterobacteriaceae"),
        TaxonNode::new(561u32, Some(ncbi(543)), Rank::Genus, "Escherichia"),
        TaxonNode::new(562u32, Some(ncbi(561)), Rank::Species, "Escherichia coli"),
        TaxonNode::new(1903409u32, Some(ncbi(91347)), Rank::Family, "Erwiniaceae"),
        TaxonNode::new(550u32, Some(ncbi(1903409)), Rank::Species, "Enterobacter cloacae"),
        TaxonNode::new(1239u32, Some(ncbi(2)), Rank::Phylum, "Bacillota"),
    ])
    .unwrap()
}

fn map_row(accession: &str, taxonomy: u32) -> AccessionTaxonRow {
    AccessionTaxonRow {
        accession: accession.to_string(),
        taxonomy: ncbi(taxonomy),
    }
}

#[test]
fn conflicting_accession_resolves_to_order() {
    let tree = tree();
    let map = AccessionTaxonomyMap::from_rows([map_row("P1", 562), map_row("P1", 550)]);
    assert_eq!(resolve("P1", &map, &tree), Some(ncbi(91347)));
    assert_eq!(tree.rank(&ncbi(91347)), Some(Rank::Order));
}

#[test]
fn lca_is_an_ancestor_of_every_input() {
    let tree = tree();
    let inputs = [ncbi(562), ncbi(550), ncbi(1239)];
    let lca = tree.lca(inputs.iter()).unwrap();
    assert_eq!(lca, ncbi(2));
    for id in &inputs {
        assert!(tree.is_ancestor(&lca, id));
    }
}

#[test]
fn lca_of_one_id_is_that_id() {
    let tree = tree();
    for id in [ncbi(1), ncbi(561), ncbi(562)] {
        assert_eq!(tree.lca([&id, &id]), Some(id.clone()));
    }
}

#[test]
fn lca_of_ancestor_and_descendant_is_ancestor() {
    let tree = tree();
    assert_eq!(tree.lca([&ncbi(562), &ncbi(543)]), Some(ncbi(543)));
}

#[test]
fn lineage_reports_standard_ranks() {
    let tree = tree();
    let lineage = tree.lineage(&ncbi(562));
    let expected = [2, 1224, 1236, 91347, 543, 561, 562].map(|id| Some(ncbi(id)));
    assert_eq!(lineage, expected);
    assert_eq!(tree.ancestor_at_rank(&ncbi(550), Rank::Genus), None);
}

#[test]
fn unknown_ids_are_counted_not_fatal() {
    let tree = tree();
    let map = AccessionTaxonomyMap::from_rows([map_row("P1", 999_999), map_row("P1", 562)]);
    let resolution = resolve_counted("P1", &map, &tree);
    assert_eq!(resolution.taxonomy, Some(ncbi(562)));
    assert_eq!(resolution.dropped, 1);
}

#[test]
fn prefetched_results_match_one_by_one_resolution() {
    let tree = tree();
    let map = AccessionTaxonomyMap::from_rows([
        map_row("P1", 562),
        map_row("P2", 550),
        map_row("P3", 1239),
        map_row("P3", 562),
        map_row("P4", 424_242),
    ]);
    let accessions = ["P1", "P2", "P3", "P4", "P5", "P1"];

    let mut batched = TaxonomyResolver::new(&map, &tree, AccessionKind::Protein);
    batched.prefetch(accessions);
    let mut single = TaxonomyResolver::new(&map, &tree, AccessionKind::Protein);
    for accession in accessions {
        assert_eq!(
            batched.resolve_accession(accession),
            single.resolve_accession(accession)
        );
    }
    assert_eq!(batched.cached(), 5);
    assert_eq!(batched.stats().dropped_ids, single.stats().dropped_ids);
}

#[test]
fn sequence_keyed_maps_resolve_by_peptide() {
    let tree = tree();
    let map = AccessionTaxonomyMap::from_rows([map_row("PEPTLDEK", 562), map_row("PEPTLDEK", 561)]);
    let mut groups = aggregate(
        &[IdentificationRow::new("r.raw", 1, "PEPTIDEK", 10.0)],
        &AggregateOptions::new(0.0, ConfidenceFormat::Score),
    );
    let mut resolver = TaxonomyResolver::new(&map, &tree, AccessionKind::Sequence);
    resolver.annotate_groups(&mut groups);
    assert_eq!(groups[0].taxonomy_id, Some(ncbi(561)));
}

#[test]
fn gtdb_names_are_supported() {
    let named = |name: &str| TaxonId::Named(name.to_string());
    let tree = TaxonomyTree::from_nodes([
        TaxonNode::new(named("d__Bacteria"), None, Rank::Superkingdom, "Bacteria"),
        TaxonNode::new(
            named("g__Escherichia"),
            Some(named("d__Bacteria")),
            Rank::Genus,
            "Escherichia",
        ),
        TaxonNode::new(named("g__Bacillus"), Some(named("d__Bacteria")), Rank::Genus, "Bacillus"),
    ])
    .unwrap();
    let ids: BTreeSet<TaxonId> = [named("g__Escherichia"), named("g__Bacillus")].into();
    assert_eq!(tree.lca(ids.iter()), Some(named("d__Bacteria")));
}

#[test]
fn nodes_json_with_unknown_ranks_loads() {
    let nodes: Vec<TaxonNode> = serde_json::from_str(
        r#"[
            {"id": 1, "parent": 1, "rank": "no rank", "name": "root"},
            {"id": 2, "parent": 1, "rank": "Domain", "name": "Bacteria"},
            {"id": "3", "parent": 2, "rank": "clade"}
        ]"#,
    )
    .unwrap();
    let tree = TaxonomyTree::from_nodes(nodes).unwrap();
    assert_eq!(tree.rank(&ncbi(2)), Some(Rank::Superkingdom));
    assert_eq!(tree.rank(&ncbi(3)), Some(Rank::Unranked));
    assert_eq!(tree.depth(&ncbi(3)), Some(2));
}

#[test]
fn duplicate_nodes_are_rejected() {
    let err = TaxonomyTree::from_nodes([
        TaxonNode::new(1u32, None, Rank::Unranked, "a"),
        TaxonNode::new(1u32, None, Rank::Unranked, "b"),
    ])
    .unwrap_err();
    assert_matches!(err, KiraError::InvalidTaxonomyTree(_));
}
