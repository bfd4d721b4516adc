use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use tracing::{debug, warn};

use crate::aggregate::PeptideGroup;
use crate::domain::{DeNovoFormat, MergeMode};

/// Aggregated groups of one de novo output file.
#[derive(Debug, Clone)]
pub struct DeNovoSource {
    pub name: String,
    pub format: DeNovoFormat,
    pub raw_source_files: BTreeSet<String>,
    pub groups: Vec<PeptideGroup>,
}

impl DeNovoSource {
    pub fn new(name: impl Into<String>, format: DeNovoFormat, groups: Vec<PeptideGroup>) -> Self {
        Self {
            name: name.into(),
            format,
            raw_source_files: raw_files_of(&groups),
            groups,
        }
    }

    /// Raw files named by the source rows, including rows that were filtered out.
    pub fn with_raw_source_files(mut self, files: BTreeSet<String>) -> Self {
        self.raw_source_files.extend(files);
        self
    }

    pub fn psm_count(&self) -> usize {
        self.groups.iter().map(|group| group.psm_count).sum()
    }
}

/// Groups of one sample under construction.
#[derive(Debug, Clone, Default)]
pub struct MergeTarget {
    pub name: String,
    pub raw_source_files: BTreeSet<String>,
    pub groups: Vec<PeptideGroup>,
    pub de_novo_sources: Vec<String>,
}

impl MergeTarget {
    pub fn new(name: impl Into<String>, groups: Vec<PeptideGroup>) -> Self {
        Self {
            name: name.into(),
            raw_source_files: raw_files_of(&groups),
            groups,
            de_novo_sources: Vec::new(),
        }
    }

    pub fn with_raw_source_files(mut self, files: BTreeSet<String>) -> Self {
        self.raw_source_files.extend(files);
        self
    }
}

fn raw_files_of(groups: &[PeptideGroup]) -> BTreeSet<String> {
    groups
        .iter()
        .flat_map(|group| group.raw_source_files.iter().cloned())
        .collect()
}

/// Raw source file to the indices of the samples that contain it.
#[derive(Debug, Clone, Default)]
pub struct RawSourceIndex {
    by_file: HashMap<String, Vec<usize>>,
}

impl RawSourceIndex {
    pub fn build(targets: &[MergeTarget]) -> Self {
        let mut by_file: HashMap<String, Vec<usize>> = HashMap::new();
        for (index, target) in targets.iter().enumerate() {
            for file in &target.raw_source_files {
                by_file.entry(file.clone()).or_default().push(index);
            }
        }
        Self { by_file }
    }

    pub fn samples_for<'a, I>(&self, files: I) -> BTreeSet<usize>
    where
        I: IntoIterator<Item = &'a str>,
    {
        files
            .into_iter()
            .filter_map(|file| self.by_file.get(file))
            .flatten()
            .copied()
            .collect()
    }
}

/// De novo files that share no raw source file with any sample.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrphanReport {
    pub files: Vec<String>,
    pub groups: usize,
    pub psms: usize,
}

impl OrphanReport {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    pub targets: Vec<MergeTarget>,
    pub orphans: OrphanReport,
    /// DB search groups that received de novo evidence.
    pub confirmed: usize,
    /// Groups seen only by de novo.
    pub de_novo_only: usize,
}

#[derive(Debug, Clone)]
pub struct DeNovoMerger {
    mode: MergeMode,
    sample_name: Option<String>,
}

impl DeNovoMerger {
    pub fn new(mode: MergeMode) -> Self {
        Self {
            mode,
            sample_name: None,
        }
    }

    /// Name for samples built from de novo data alone.
    pub fn with_sample_name(mut self, name: impl Into<String>) -> Self {
        self.sample_name = Some(name.into());
        self
    }

    /// Attach de novo sources to DB search samples.
    ///
    /// Without any DB search sample, the de novo sources become the samples:
    /// one in `Merged` mode, one per source in `Separate` mode. The configured
    /// sample name is used for the merged sample and for a single source.
    pub fn merge(&self, targets: Vec<MergeTarget>, sources: Vec<DeNovoSource>) -> MergeOutcome {
        if targets.is_empty() {
            return self.de_novo_only(sources);
        }

        let mut targets = targets;
        let mut pending: Vec<Vec<DeNovoSource>> = vec![Vec::new(); targets.len()];
        let mut orphans = OrphanReport::default();
        let index = RawSourceIndex::build(&targets);

        for source in sources {
            let matches: BTreeSet<usize> = match self.mode {
                MergeMode::Merged => (0..targets.len()).collect(),
                MergeMode::Separate => {
                    index.samples_for(source.raw_source_files.iter().map(String::as_str))
                }
            };
            if matches.is_empty() {
                warn!(
                    file = %source.name,
                    groups = source.groups.len(),
                    "de novo file shares no raw source file with any sample, dropped"
                );
                orphans.groups += source.groups.len();
                orphans.psms += source.psm_count();
                orphans.files.push(source.name);
                continue;
            }
            for target in matches {
                pending[target].push(source.clone());
            }
        }

        let mut outcome = MergeOutcome {
            orphans,
            ..MergeOutcome::default()
        };
        for (target, sources) in targets.iter_mut().zip(pending) {
            let (confirmed, appended) = augment(target, sources);
            outcome.confirmed += confirmed;
            outcome.de_novo_only += appended;
        }
        outcome.targets = targets;
        outcome
    }

    fn de_novo_only(&self, sources: Vec<DeNovoSource>) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        let single = sources.len() == 1;
        let batches: Vec<(String, Vec<DeNovoSource>)> = match self.mode {
            MergeMode::Merged if sources.is_empty() => Vec::new(),
            MergeMode::Merged => {
                let name = self
                    .sample_name
                    .clone()
                    .unwrap_or_else(|| sources[0].name.clone());
                vec![(name, sources)]
            }
            MergeMode::Separate => sources
                .into_iter()
                .map(|source| {
                    let name = match &self.sample_name {
                        Some(name) if single => name.clone(),
                        _ => source.name.clone(),
                    };
                    (name, vec![source])
                })
                .collect(),
        };
        for (name, batch) in batches {
            let raw_source_files = batch
                .iter()
                .flat_map(|source| source.raw_source_files.iter().cloned())
                .collect();
            let mut target =
                MergeTarget::new(name, Vec::new()).with_raw_source_files(raw_source_files);
            let (_, appended) = augment(&mut target, batch);
            outcome.de_novo_only += appended;
            outcome.targets.push(target);
        }
        outcome
    }
}

/// Fold `sources` into the target by normalized sequence.
fn augment(target: &mut MergeTarget, sources: Vec<DeNovoSource>) -> (usize, usize) {
    let mut combined: BTreeMap<String, PeptideGroup> = BTreeMap::new();
    for source in sources {
        target.de_novo_sources.push(source.name);
        for group in source.groups {
            match combined.get_mut(&group.sequence) {
                Some(existing) => existing.absorb(group),
                None => {
                    combined.insert(group.sequence.clone(), group);
                }
            }
        }
    }

    let positions: HashMap<String, usize> = target
        .groups
        .iter()
        .enumerate()
        .map(|(position, group)| (group.sequence.clone(), position))
        .collect();

    let mut confirmed = 0;
    let mut appended = 0;
    for (sequence, mut group) in combined {
        let evidence = group.as_de_novo_evidence();
        match positions.get(&sequence) {
            Some(position) => {
                target.groups[*position].de_novo = Some(evidence);
                confirmed += 1;
            }
            None => {
                group.is_de_novo_only = true;
                group.protein_ids.clear();
                group.de_novo = Some(evidence);
                target.groups.push(group);
                appended += 1;
            }
        }
    }
    if appended > 0 {
        target.groups.sort_by(|left, right| left.sequence.cmp(&right.sequence));
    }
    debug!(sample = %target.name, confirmed, appended, "de novo merged");
    (confirmed, appended)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{AggregateOptions, aggregate};
    use crate::domain::ConfidenceFormat;
    use crate::row::IdentificationRow;

    fn groups(rows: &[IdentificationRow], format: ConfidenceFormat) -> Vec<PeptideGroup> {
        aggregate(rows, &AggregateOptions::new(0.0, format))
    }

    fn db_target(name: &str, raw: &str, sequences: &[&str]) -> MergeTarget {
        let rows: Vec<_> = sequences
            .iter()
            .enumerate()
            .map(|(scan, sequence)| IdentificationRow::new(raw, scan as u64, *sequence, 80.0))
            .collect();
        MergeTarget::new(name, groups(&rows, ConfidenceFormat::NegLog10P))
    }

    fn de_novo(name: &str, raws: &[&str], sequence: &str) -> DeNovoSource {
        let rows: Vec<_> = raws
            .iter()
            .enumerate()
            .map(|(scan, raw)| IdentificationRow::new(*raw, scan as u64, sequence, 70.0))
            .collect();
        DeNovoSource::new(name, DeNovoFormat::Novor, groups(&rows, ConfidenceFormat::Score))
    }

    #[test]
    fn index_maps_files_to_samples() {
        let targets = vec![db_target("S1", "r1", &["AAK"]), db_target("S2", "r2", &["AAK"])];
        let index = RawSourceIndex::build(&targets);
        assert_eq!(index.samples_for(["r2", "r9"]), BTreeSet::from([1]));
    }

    #[test]
    fn separate_mode_attaches_by_overlap() {
        let targets = vec![
            db_target("S1", "r1", &["AAK"]),
            db_target("S2", "r2", &["CCK"]),
            db_target("S3", "r3", &["DDK"]),
        ];
        let sources = vec![de_novo("dn", &["r1", "r2"], "EEK")];
        let outcome = DeNovoMerger::new(MergeMode::Separate).merge(targets, sources);
        let counts: Vec<usize> = outcome.targets.iter().map(|target| target.groups.len()).collect();
        assert_eq!(counts, vec![2, 2, 1]);
        assert!(outcome.targets[0].groups.iter().any(|group| group.is_de_novo_only));
        assert!(outcome.orphans.is_empty());
    }

    #[test]
    fn orphans_are_reported() {
        let targets = vec![db_target("S1", "r1", &["AAK"])];
        let sources = vec![de_novo("lost", &["r7"], "EEK")];
        let outcome = DeNovoMerger::new(MergeMode::Separate).merge(targets, sources);
        assert_eq!(outcome.orphans.files, vec!["lost".to_string()]);
        assert_eq!(outcome.orphans.psms, 1);
        assert_eq!(outcome.targets[0].groups.len(), 1);
    }

    #[test]
    fn shared_sequence_gets_evidence() {
        let targets = vec![db_target("S1", "r1", &["AAK"])];
        let sources = vec![de_novo("dn", &["r1"], "AAK")];
        let outcome = DeNovoMerger::new(MergeMode::Separate).merge(targets, sources);
        let group = &outcome.targets[0].groups[0];
        assert!(!group.is_de_novo_only);
        assert_eq!(group.de_novo.as_ref().map(|evidence| evidence.max_confidence), Some(70.0));
        assert_eq!(outcome.confirmed, 1);
    }

    #[test]
    fn de_novo_only_samples_without_db_search() {
        let sources = vec![de_novo("a", &["r1"], "AAK"), de_novo("b", &["r2"], "AAK")];
        let merged = DeNovoMerger::new(MergeMode::Merged).merge(Vec::new(), sources.clone());
        assert_eq!(merged.targets.len(), 1);
        assert_eq!(merged.targets[0].groups[0].psm_count, 2);

        let separate = DeNovoMerger::new(MergeMode::Separate).merge(Vec::new(), sources);
        assert_eq!(separate.targets.len(), 2);
        assert!(separate.targets[1].groups[0].is_de_novo_only);
    }
}
