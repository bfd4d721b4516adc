use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap, HashSet};

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::aggregate::PeptideGroup;
use crate::domain::{AccessionKind, DuplicateAccessions, GlobalLookup, TaxonId};
use crate::error::KiraError;
use crate::taxonomy::TaxonomyTree;

/// One `{accession, taxonomy}` row of an accession map file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessionTaxonRow {
    pub accession: String,
    pub taxonomy: TaxonId,
}

/// Accession to taxonomy ids, as delivered by a reference database.
#[derive(Debug, Clone, Default)]
pub struct AccessionTaxonomyMap {
    entries: HashMap<String, BTreeSet<TaxonId>>,
    pattern: Option<Regex>,
    duplicates: DuplicateAccessions,
}

impl AccessionTaxonomyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrite accessions through `pattern` on insert and lookup.
    ///
    /// The first capture group is used when present, otherwise the whole match.
    /// Accessions the pattern does not match are used unchanged.
    pub fn with_pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub fn with_duplicates(mut self, duplicates: DuplicateAccessions) -> Self {
        self.duplicates = duplicates;
        self
    }

    pub fn from_rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = AccessionTaxonRow>,
    {
        let mut map = Self::new();
        map.extend(rows);
        map
    }

    pub fn extend<I>(&mut self, rows: I)
    where
        I: IntoIterator<Item = AccessionTaxonRow>,
    {
        for row in rows {
            self.insert(&row.accession, row.taxonomy);
        }
    }

    pub fn insert(&mut self, accession: &str, taxonomy: TaxonId) {
        let key = self.canonical(accession).into_owned();
        if key.is_empty() {
            return;
        }
        let ids = self.entries.entry(key).or_default();
        if self.duplicates == DuplicateAccessions::KeepFirst && !ids.is_empty() {
            return;
        }
        ids.insert(taxonomy);
    }

    pub fn get(&self, accession: &str) -> Option<&BTreeSet<TaxonId>> {
        self.entries.get(self.canonical(accession).as_ref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn canonical<'a>(&self, accession: &'a str) -> Cow<'a, str> {
        let trimmed = accession.trim();
        let Some(pattern) = &self.pattern else {
            return Cow::Borrowed(trimmed);
        };
        match pattern.captures(trimmed) {
            Some(captures) => {
                let matched = captures.get(1).or_else(|| captures.get(0));
                match matched {
                    Some(found) => Cow::Owned(found.as_str().to_string()),
                    None => Cow::Borrowed(trimmed),
                }
            }
            None => Cow::Borrowed(trimmed),
        }
    }
}

/// Outcome of resolving one accession.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub taxonomy: Option<TaxonId>,
    /// Ids listed for the accession that the tree does not know.
    pub dropped: usize,
}

/// Resolve one accession to a single taxonomy id.
pub fn resolve(
    accession: &str,
    map: &AccessionTaxonomyMap,
    tree: &TaxonomyTree,
) -> Option<TaxonId> {
    resolve_counted(accession, map, tree).taxonomy
}

pub fn resolve_counted(
    accession: &str,
    map: &AccessionTaxonomyMap,
    tree: &TaxonomyTree,
) -> Resolution {
    let Some(ids) = map.get(accession) else {
        return Resolution {
            taxonomy: None,
            dropped: 0,
        };
    };

    let mut dropped = 0;
    for id in ids.iter().filter(|id| !tree.contains(id)) {
        warn!(accession, taxonomy = %id, "taxonomy id missing from tree, ignored");
        dropped += 1;
    }

    Resolution {
        taxonomy: tree.lca(ids.iter()),
        dropped,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolverStats {
    pub groups_resolved: usize,
    pub groups_unresolved: usize,
    pub dropped_ids: usize,
    pub distinct_accessions: usize,
}

/// Per-import taxonomy resolution with a memoized accession cache.
///
/// The cache lives as long as the resolver; one resolver serves one import.
pub struct TaxonomyResolver<'a> {
    map: &'a AccessionTaxonomyMap,
    tree: &'a TaxonomyTree,
    kind: AccessionKind,
    cache: HashMap<String, Option<TaxonId>>,
    stats: ResolverStats,
}

impl<'a> TaxonomyResolver<'a> {
    pub fn new(map: &'a AccessionTaxonomyMap, tree: &'a TaxonomyTree, kind: AccessionKind) -> Self {
        Self {
            map,
            tree,
            kind,
            cache: HashMap::new(),
            stats: ResolverStats::default(),
        }
    }

    pub fn stats(&self) -> ResolverStats {
        self.stats
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    fn keys<'g>(&self, group: &'g PeptideGroup) -> Vec<&'g str> {
        match self.kind {
            AccessionKind::Protein => group.protein_ids.iter().map(String::as_str).collect(),
            AccessionKind::Sequence => vec![group.sequence.as_str()],
        }
    }

    /// Resolve every accession not yet cached.
    pub fn prefetch<'k, I>(&mut self, accessions: I)
    where
        I: IntoIterator<Item = &'k str>,
    {
        let mut seen = HashSet::new();
        let pending: Vec<&str> = accessions
            .into_iter()
            .filter(|accession| !self.cache.contains_key(*accession) && seen.insert(*accession))
            .collect();
        if pending.is_empty() {
            return;
        }

        let map = self.map;
        let tree = self.tree;

        #[cfg(feature = "parallel")]
        let resolved: Vec<(String, Resolution)> = pending
            .into_par_iter()
            .map(|accession| (accession.to_string(), resolve_counted(accession, map, tree)))
            .collect();

        #[cfg(not(feature = "parallel"))]
        let resolved: Vec<(String, Resolution)> = pending
            .into_iter()
            .map(|accession| (accession.to_string(), resolve_counted(accession, map, tree)))
            .collect();

        self.stats.distinct_accessions += resolved.len();
        for (accession, resolution) in resolved {
            self.stats.dropped_ids += resolution.dropped;
            self.cache.insert(accession, resolution.taxonomy);
        }
    }

    pub fn resolve_accession(&mut self, accession: &str) -> Option<TaxonId> {
        if let Some(hit) = self.cache.get(accession) {
            return hit.clone();
        }
        let resolution = resolve_counted(accession, self.map, self.tree);
        self.stats.distinct_accessions += 1;
        self.stats.dropped_ids += resolution.dropped;
        self.cache
            .insert(accession.to_string(), resolution.taxonomy.clone());
        resolution.taxonomy
    }

    /// Resolve each key of the group, then reduce the per-key results by LCA.
    pub fn resolve_group(&mut self, group: &PeptideGroup) -> Option<TaxonId> {
        let per_key: Vec<TaxonId> = self
            .keys(group)
            .into_iter()
            .filter_map(|key| self.resolve_accession(key))
            .collect();
        self.tree.lca(per_key.iter())
    }

    pub fn annotate_group(&mut self, group: &mut PeptideGroup) {
        group.taxonomy_id = self.resolve_group(group);
        if group.taxonomy_id.is_some() {
            self.stats.groups_resolved += 1;
        } else {
            self.stats.groups_unresolved += 1;
        }
    }

    /// Fill `taxonomy_id` on every group.
    pub fn annotate_groups(&mut self, groups: &mut [PeptideGroup]) {
        let keys: Vec<String> = groups
            .iter()
            .flat_map(|group| self.keys(group))
            .map(str::to_string)
            .collect();
        self.prefetch(keys.iter().map(String::as_str));

        for group in groups.iter_mut() {
            self.annotate_group(group);
        }
        debug!(
            resolved = self.stats.groups_resolved,
            unresolved = self.stats.groups_unresolved,
            accessions = self.stats.distinct_accessions,
            "taxonomy resolved"
        );
    }
}

/// Remote-style lookup of the LCA of all proteins containing a peptide.
pub trait SequenceLcaService: Send + Sync {
    fn lookup_lca(&self, peptide_sequence: &str) -> Result<Option<TaxonId>, KiraError>;

    /// Whether lookups can answer at all; an unavailable service is not an
    /// annotation source.
    fn is_available(&self) -> bool {
        true
    }
}

/// Service used when global lookup is disabled; never answers.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSequenceService;

impl SequenceLcaService for NoSequenceService {
    fn lookup_lca(&self, _peptide_sequence: &str) -> Result<Option<TaxonId>, KiraError> {
        Ok(None)
    }

    fn is_available(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GlobalLookupStats {
    pub queried: usize,
    pub annotated: usize,
    pub failed: usize,
    pub unknown_ids: usize,
}

/// Query `service` per group according to `mode`.
///
/// `Fallback` fills `taxonomy_id` for groups left unresolved locally;
/// `Always` fills `global_taxonomy_id` for every group.
pub fn annotate_global<S>(
    groups: &mut [PeptideGroup],
    service: &S,
    tree: Option<&TaxonomyTree>,
    mode: GlobalLookup,
) -> GlobalLookupStats
where
    S: SequenceLcaService + ?Sized,
{
    let mut stats = GlobalLookupStats::default();
    if mode == GlobalLookup::Off {
        return stats;
    }

    let mut answers: HashMap<String, Option<TaxonId>> = HashMap::new();
    for group in groups.iter_mut() {
        if mode == GlobalLookup::Fallback && group.taxonomy_id.is_some() {
            continue;
        }
        let answer = match answers.get(&group.sequence) {
            Some(answer) => answer.clone(),
            None => {
                stats.queried += 1;
                let answer = match service.lookup_lca(&group.sequence) {
                    Ok(Some(id)) if tree.is_none_or(|tree| tree.contains(&id)) => Some(id),
                    Ok(Some(id)) => {
                        debug!(
                            sequence = %group.sequence,
                            taxonomy = %id,
                            "global taxonomy not in tree"
                        );
                        stats.unknown_ids += 1;
                        None
                    }
                    Ok(None) => None,
                    Err(err) => {
                        warn!(sequence = %group.sequence, error = %err, "global lookup failed");
                        stats.failed += 1;
                        None
                    }
                };
                answers.insert(group.sequence.clone(), answer.clone());
                answer
            }
        };
        if answer.is_some() {
            stats.annotated += 1;
        }
        match mode {
            GlobalLookup::Fallback => group.taxonomy_id = answer,
            GlobalLookup::Always => group.global_taxonomy_id = answer,
            GlobalLookup::Off => {}
        }
    }
    stats
}
