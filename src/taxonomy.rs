use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{Rank, TaxonId};
use crate::error::KiraError;

/// Parent chains longer than this are treated as corrupt.
pub const MAX_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonNode {
    pub id: TaxonId,
    #[serde(default)]
    pub parent: Option<TaxonId>,
    pub rank: Rank,
    #[serde(default)]
    pub name: String,
}

impl TaxonNode {
    pub fn new(id: impl Into<TaxonId>, parent: Option<TaxonId>, rank: Rank, name: &str) -> Self {
        Self {
            id: id.into(),
            parent,
            rank,
            name: name.to_string(),
        }
    }
}

/// Read-only taxonomy forest keyed by taxonomy id.
#[derive(Debug, Clone, Default)]
pub struct TaxonomyTree {
    nodes: HashMap<TaxonId, TaxonNode>,
}

impl TaxonomyTree {
    /// Build a tree, rejecting dangling parents, duplicates and cycles.
    ///
    /// A node whose parent is itself is read as a root, which is how NCBI
    /// `nodes.dmp` encodes taxon 1.
    pub fn from_nodes<I>(nodes: I) -> Result<Self, KiraError>
    where
        I: IntoIterator<Item = TaxonNode>,
    {
        let mut map = HashMap::new();
        for mut node in nodes {
            if node.parent.as_ref() == Some(&node.id) {
                node.parent = None;
            }
            if map.contains_key(&node.id) {
                return Err(KiraError::InvalidTaxonomyTree(format!(
                    "duplicate taxonomy id {}",
                    node.id
                )));
            }
            map.insert(node.id.clone(), node);
        }

        for node in map.values() {
            if let Some(parent) = &node.parent
                && !map.contains_key(parent)
            {
                return Err(KiraError::InvalidTaxonomyTree(format!(
                    "parent {parent} of {} is not in the tree",
                    node.id
                )));
            }
        }

        let tree = Self { nodes: map };
        tree.check_depths()?;
        debug!(nodes = tree.len(), "taxonomy tree loaded");
        Ok(tree)
    }

    fn check_depths(&self) -> Result<(), KiraError> {
        // depth of every node already known to reach a root
        let mut settled: HashMap<&TaxonId, usize> = HashMap::with_capacity(self.nodes.len());
        for start in self.nodes.keys() {
            let mut path = Vec::new();
            let mut current = Some(start);
            let mut base = 0usize;
            while let Some(id) = current {
                if let Some(depth) = settled.get(id) {
                    base = *depth + 1;
                    break;
                }
                if path.len() > MAX_DEPTH {
                    return Err(KiraError::InvalidTaxonomyTree(format!(
                        "parent chain of {start} exceeds depth {MAX_DEPTH} or contains a cycle"
                    )));
                }
                path.push(id);
                current = self.nodes.get(id).and_then(|node| node.parent.as_ref());
            }
            for (offset, id) in path.iter().rev().enumerate() {
                let depth = base + offset;
                if depth > MAX_DEPTH {
                    return Err(KiraError::InvalidTaxonomyTree(format!(
                        "parent chain of {start} exceeds depth {MAX_DEPTH}"
                    )));
                }
                settled.insert(*id, depth);
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &TaxonId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node(&self, id: &TaxonId) -> Option<&TaxonNode> {
        self.nodes.get(id)
    }

    pub fn parent(&self, id: &TaxonId) -> Option<&TaxonId> {
        self.nodes.get(id).and_then(|node| node.parent.as_ref())
    }

    pub fn rank(&self, id: &TaxonId) -> Option<Rank> {
        self.nodes.get(id).map(|node| node.rank)
    }

    pub fn name(&self, id: &TaxonId) -> Option<&str> {
        self.nodes.get(id).map(|node| node.name.as_str())
    }

    /// Chain from `id` (inclusive) up to its root. Empty for unknown ids.
    pub fn ancestors(&self, id: &TaxonId) -> Vec<&TaxonId> {
        let mut chain = Vec::new();
        let mut current = self.nodes.get_key_value(id).map(|(key, _)| key);
        while let Some(key) = current {
            chain.push(key);
            current = self.parent(key);
        }
        chain
    }

    pub fn depth(&self, id: &TaxonId) -> Option<usize> {
        let chain = self.ancestors(id);
        (!chain.is_empty()).then(|| chain.len() - 1)
    }

    pub fn is_ancestor(&self, ancestor: &TaxonId, id: &TaxonId) -> bool {
        self.ancestors(id).contains(&ancestor)
    }

    /// Closest ancestor (or the node itself) carrying `rank`.
    pub fn ancestor_at_rank(&self, id: &TaxonId, rank: Rank) -> Option<&TaxonId> {
        self.ancestors(id)
            .into_iter()
            .find(|ancestor| self.rank(ancestor) == Some(rank))
    }

    /// Ids at the standard ranks (superkingdom through species); gaps are `None`.
    pub fn lineage(&self, id: &TaxonId) -> [Option<TaxonId>; 7] {
        let mut lineage: [Option<TaxonId>; 7] = Default::default();
        for ancestor in self.ancestors(id) {
            if let Some(index) = self.rank(ancestor).and_then(Rank::lineage_index) {
                lineage[index].get_or_insert_with(|| ancestor.clone());
            }
        }
        lineage
    }

    /// Last common ancestor of every known id in `ids`.
    ///
    /// Unknown ids are skipped. Returns `None` when no id is known or when the
    /// ids sit in disjoint trees of the forest.
    pub fn lca<'a, I>(&self, ids: I) -> Option<TaxonId>
    where
        I: IntoIterator<Item = &'a TaxonId>,
    {
        let mut unique: Vec<&TaxonId> = Vec::new();
        for id in ids {
            if self.contains(id) && !unique.contains(&id) {
                unique.push(id);
            }
        }

        let (first, rest) = unique.split_first()?;
        if rest.is_empty() {
            return Some((*first).clone());
        }

        let others: Vec<HashSet<&TaxonId>> = rest
            .iter()
            .map(|id| self.ancestors(id).into_iter().collect())
            .collect();

        self.ancestors(first)
            .into_iter()
            .find(|candidate| others.iter().all(|chain| chain.contains(candidate)))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn ncbi(id: u32) -> TaxonId {
        TaxonId::Ncbi(id)
    }

    fn sample_tree() -> TaxonomyTree {
        TaxonomyTree::from_nodes([
            TaxonNode::new(1u32, None, Rank::Unranked, "root"),
            TaxonNode::new(2u32, Some(ncbi(1)), Rank::Superkingdom, "Bacteria"),
            TaxonNode::new(1224u32, Some(ncbi(2)), Rank::Phylum, "Pseudomonadota"),
            TaxonNode::new(91347u32, Some(ncbi(1224)), Rank::Order, "Enterobacterales"),
            TaxonNode::new(543u32, Some(ncbi(91347)), Rank::Family, "Enterobacteriaceae"),
            TaxonNode::new(561u32, Some(ncbi(543)), Rank::Genus, "Escherichia"),
            TaxonNode::new(562u32, Some(ncbi(561)), Rank::Species, "Escherichia coli"),
            TaxonNode::new(550u32, Some(ncbi(91347)), Rank::Species, "Enterobacter cloacae"),
        ])
        .unwrap()
    }

    #[test]
    fn ancestors_walk_to_root() {
        let tree = sample_tree();
        let chain: Vec<_> = tree.ancestors(&ncbi(562)).into_iter().cloned().collect();
        assert_eq!(chain.first(), Some(&ncbi(562)));
        assert_eq!(chain.last(), Some(&ncbi(1)));
        assert_eq!(tree.depth(&ncbi(562)), Some(6));
        assert!(tree.ancestors(&ncbi(9999)).is_empty());
    }

    #[test]
    fn lineage_fills_standard_ranks() {
        let tree = sample_tree();
        let lineage = tree.lineage(&ncbi(562));
        assert_eq!(lineage[0], Some(ncbi(2)));
        assert_eq!(lineage[2], None);
        assert_eq!(lineage[5], Some(ncbi(561)));
        assert_eq!(lineage[6], Some(ncbi(562)));
    }

    #[test]
    fn lca_of_siblings_is_shared_parent() {
        let tree = sample_tree();
        assert_eq!(tree.lca([&ncbi(562), &ncbi(550)]), Some(ncbi(91347)));
        assert_eq!(tree.lca([&ncbi(562), &ncbi(561)]), Some(ncbi(561)));
    }

    #[test]
    fn lca_skips_unknown_ids() {
        let tree = sample_tree();
        assert_eq!(tree.lca([&ncbi(562), &ncbi(4242)]), Some(ncbi(562)));
        assert_eq!(tree.lca([&ncbi(4242)]), None);
    }

    #[test]
    fn lca_across_disjoint_roots_is_none() {
        let tree = TaxonomyTree::from_nodes([
            TaxonNode::new(1u32, None, Rank::Superkingdom, "A"),
            TaxonNode::new(2u32, None, Rank::Superkingdom, "B"),
        ])
        .unwrap();
        assert_eq!(tree.lca([&ncbi(1), &ncbi(2)]), None);
    }

    #[test]
    fn self_parent_is_root() {
        let tree =
            TaxonomyTree::from_nodes([TaxonNode::new(1u32, Some(ncbi(1)), Rank::Unranked, "root")])
                .unwrap();
        assert_eq!(tree.parent(&ncbi(1)), None);
    }

    #[test]
    fn dangling_parent_rejected() {
        let err = TaxonomyTree::from_nodes([TaxonNode::new(5u32, Some(ncbi(4)), Rank::Genus, "x")])
            .unwrap_err();
        assert_matches!(err, KiraError::InvalidTaxonomyTree(_));
    }

    #[test]
    fn cycle_rejected() {
        let err = TaxonomyTree::from_nodes([
            TaxonNode::new(1u32, Some(ncbi(2)), Rank::Genus, "a"),
            TaxonNode::new(2u32, Some(ncbi(1)), Rank::Genus, "b"),
        ])
        .unwrap_err();
        assert_matches!(err, KiraError::InvalidTaxonomyTree(_));
    }
}
