use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aggregate::PeptideGroup;
use crate::domain::FunctionId;

/// One `{protein_id, function_ids}` row of a function annotation file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionRow {
    pub protein_id: String,
    #[serde(default)]
    pub function_ids: Vec<FunctionId>,
}

/// Protein id to function ids (KEGG KO style).
#[derive(Debug, Clone, Default)]
pub struct FunctionMap {
    entries: HashMap<String, BTreeSet<FunctionId>>,
}

impl FunctionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = FunctionRow>,
    {
        let mut map = Self::new();
        for row in rows {
            map.insert(&row.protein_id, row.function_ids);
        }
        map
    }

    pub fn insert<I>(&mut self, protein_id: &str, functions: I)
    where
        I: IntoIterator<Item = FunctionId>,
    {
        let entry = self.entries.entry(protein_id.trim().to_string()).or_default();
        entry.extend(functions.into_iter().filter(|id| !id.as_str().is_empty()));
    }

    /// Function set of a protein; empty entries read as unmatched.
    pub fn get(&self, protein_id: &str) -> Option<&BTreeSet<FunctionId>> {
        self.entries
            .get(protein_id.trim())
            .filter(|functions| !functions.is_empty())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionOutcome {
    Annotated(BTreeSet<FunctionId>),
    Unmatched,
    /// Matched proteins carry different function sets and combining is off.
    Conflict,
}

impl FunctionOutcome {
    pub fn into_functions(self) -> Option<BTreeSet<FunctionId>> {
        match self {
            FunctionOutcome::Annotated(functions) => Some(functions),
            FunctionOutcome::Unmatched | FunctionOutcome::Conflict => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FunctionStats {
    pub annotated: usize,
    pub unmatched: usize,
    pub conflicts: usize,
}

pub struct FunctionAnnotator<'a> {
    map: &'a FunctionMap,
    combine_multiple: bool,
}

impl<'a> FunctionAnnotator<'a> {
    pub fn new(map: &'a FunctionMap, combine_multiple: bool) -> Self {
        Self {
            map,
            combine_multiple,
        }
    }

    pub fn classify(&self, group: &PeptideGroup) -> FunctionOutcome {
        let mut matched = group
            .protein_ids
            .iter()
            .filter_map(|protein| self.map.get(protein));

        let Some(first) = matched.next() else {
            return FunctionOutcome::Unmatched;
        };
        let mut functions = first.clone();

        for next in matched {
            if self.combine_multiple {
                functions.extend(next.iter().cloned());
            } else if *next != functions {
                return FunctionOutcome::Conflict;
            }
        }
        FunctionOutcome::Annotated(functions)
    }

    pub fn annotate(&self, group: &PeptideGroup) -> Option<BTreeSet<FunctionId>> {
        self.classify(group).into_functions()
    }

    /// Fill `function_ids` on every group and count the outcomes.
    pub fn annotate_groups(&self, groups: &mut [PeptideGroup]) -> FunctionStats {
        let mut stats = FunctionStats::default();
        for group in groups.iter_mut() {
            let outcome = self.classify(group);
            match &outcome {
                FunctionOutcome::Annotated(_) => stats.annotated += 1,
                FunctionOutcome::Unmatched => stats.unmatched += 1,
                FunctionOutcome::Conflict => {
                    debug!(sequence = %group.sequence, "conflicting function annotations");
                    stats.conflicts += 1;
                }
            }
            group.function_ids = outcome.into_functions();
        }
        stats
    }
}

/// Convenience form of [`FunctionAnnotator::annotate`].
pub fn annotate(
    group: &PeptideGroup,
    map: &FunctionMap,
    combine_multiple: bool,
) -> Option<BTreeSet<FunctionId>> {
    FunctionAnnotator::new(map, combine_multiple).annotate(group)
}
