use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::aggregate::{AggregateOptions, LengthRange, PeptideGroup, aggregate};
use crate::app::{ProgressEvent, ProgressSink};
use crate::denovo::{DeNovoMerger, DeNovoSource, MergeTarget, OrphanReport};
use crate::domain::{
    AccessionKind, ConfidenceFormat, DbSearchFormat, DeNovoFormat, FunctionFormat, FunctionId,
    GlobalLookup, MergeMode, TaxonId, TaxonomyFormat,
};
use crate::error::KiraError;
use crate::function::{FunctionAnnotator, FunctionMap, FunctionStats};
use crate::resolver::{
    AccessionTaxonomyMap, GlobalLookupStats, ResolverStats, SequenceLcaService, TaxonomyResolver,
    annotate_global,
};
use crate::row::IdentificationRow;
use crate::taxonomy::TaxonomyTree;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImportPhase {
    Collecting,
    Aggregating,
    Annotating,
    MergingDeNovo,
    Validating,
    Committed,
    Rejected,
}

impl fmt::Display for ImportPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImportPhase::Collecting => "Collecting",
            ImportPhase::Aggregating => "Aggregating",
            ImportPhase::Annotating => "Annotating",
            ImportPhase::MergingDeNovo => "MergingDeNovo",
            ImportPhase::Validating => "Validating",
            ImportPhase::Committed => "Committed",
            ImportPhase::Rejected => "Rejected",
        };
        write!(f, "{name}")
    }
}

/// Emit a `phase=<Phase>; <detail>` progress event.
pub(crate) fn report_phase(
    sink: &dyn ProgressSink,
    started: Instant,
    phase: ImportPhase,
    detail: impl fmt::Display,
) {
    sink.event(ProgressEvent {
        message: format!("phase={phase}; {detail}"),
        elapsed: Some(started.elapsed()),
    });
}

#[derive(Debug, Clone)]
pub struct DbSearchFile {
    pub name: String,
    pub format: DbSearchFormat,
    pub rows: Vec<IdentificationRow>,
}

#[derive(Debug, Clone)]
pub struct DeNovoFile {
    pub name: String,
    pub format: DeNovoFormat,
    pub rows: Vec<IdentificationRow>,
}

#[derive(Debug, Clone)]
pub struct TaxonomyAnnotation {
    pub format: TaxonomyFormat,
    pub map: AccessionTaxonomyMap,
    pub tree: Arc<TaxonomyTree>,
}

#[derive(Debug, Clone)]
pub struct FunctionAnnotation {
    pub format: FunctionFormat,
    pub map: FunctionMap,
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub confidence_cutoff: f64,
    pub de_novo_confidence_cutoff: f64,
    pub length_range: Option<LengthRange>,
    pub merge_mode: MergeMode,
    pub combine_multiple_functions: bool,
    pub accession_kind: AccessionKind,
    pub global_lookup: GlobalLookup,
    pub excluded_sequences: Vec<String>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            confidence_cutoff: f64::NEG_INFINITY,
            de_novo_confidence_cutoff: f64::NEG_INFINITY,
            length_range: None,
            merge_mode: MergeMode::default(),
            combine_multiple_functions: false,
            accession_kind: AccessionKind::default(),
            global_lookup: GlobalLookup::default(),
            excluded_sequences: Vec::new(),
        }
    }
}

/// Everything a single import brings in.
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub sample_name: String,
    pub db_search: Vec<DbSearchFile>,
    pub de_novo: Vec<DeNovoFile>,
    pub taxonomy: Option<TaxonomyAnnotation>,
    pub functions: Option<FunctionAnnotation>,
    pub options: ImportOptions,
}

impl ImportRequest {
    pub fn new(sample_name: impl Into<String>) -> Self {
        Self {
            sample_name: sample_name.into(),
            db_search: Vec::new(),
            de_novo: Vec::new(),
            taxonomy: None,
            functions: None,
            options: ImportOptions::default(),
        }
    }

    pub fn with_db_search(
        mut self,
        name: impl Into<String>,
        format: DbSearchFormat,
        rows: Vec<IdentificationRow>,
    ) -> Self {
        self.db_search.push(DbSearchFile {
            name: name.into(),
            format,
            rows,
        });
        self
    }

    pub fn with_de_novo(
        mut self,
        name: impl Into<String>,
        format: DeNovoFormat,
        rows: Vec<IdentificationRow>,
    ) -> Self {
        self.de_novo.push(DeNovoFile {
            name: name.into(),
            format,
            rows,
        });
        self
    }

    pub fn with_taxonomy(
        mut self,
        format: TaxonomyFormat,
        map: AccessionTaxonomyMap,
        tree: Arc<TaxonomyTree>,
    ) -> Self {
        self.taxonomy = Some(TaxonomyAnnotation { format, map, tree });
        self
    }

    pub fn with_functions(mut self, format: FunctionFormat, map: FunctionMap) -> Self {
        self.functions = Some(FunctionAnnotation { format, map });
        self
    }

    pub fn with_options(mut self, options: ImportOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SampleFormats {
    pub db_search: Option<DbSearchFormat>,
    pub de_novo: Option<DeNovoFormat>,
    pub taxonomy: Option<TaxonomyFormat>,
    pub function: Option<FunctionFormat>,
}

impl SampleFormats {
    pub fn db_search_confidence(&self) -> Option<ConfidenceFormat> {
        self.db_search.map(DbSearchFormat::confidence_format)
    }

    pub fn de_novo_confidence(&self) -> Option<ConfidenceFormat> {
        self.de_novo.map(DeNovoFormat::confidence_format)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Provenance {
    pub db_search_files: Vec<String>,
    pub de_novo_files: Vec<String>,
    pub raw_source_files: BTreeSet<String>,
    pub imported_at: DateTime<Utc>,
}

/// Flat export row, one per peptide group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRow {
    pub sample_name: String,
    pub peptide_sequence: String,
    pub psm_count: usize,
    pub summed_intensity: Option<f64>,
    pub max_confidence: f64,
    pub taxonomy_id: Option<TaxonId>,
    pub function_ids: Option<Vec<FunctionId>>,
    pub global_taxonomy_id: Option<TaxonId>,
    pub de_novo_confidence: Option<f64>,
    pub is_de_novo_only: bool,
}

/// Peptide-level dataset of one sample. Immutable once committed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub name: String,
    pub groups: Vec<PeptideGroup>,
    pub formats: SampleFormats,
    pub provenance: Provenance,
}

impl Sample {
    pub fn group(&self, sequence: &str) -> Option<&PeptideGroup> {
        self.groups
            .binary_search_by(|group| group.sequence.as_str().cmp(sequence))
            .ok()
            .map(|index| &self.groups[index])
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn psm_count(&self) -> usize {
        self.groups.iter().map(|group| group.psm_count).sum()
    }

    /// Number of peptides carrying each function id.
    pub fn function_peptide_counts(&self) -> BTreeMap<FunctionId, usize> {
        let mut counts = BTreeMap::new();
        for functions in self.groups.iter().filter_map(|group| group.function_ids.as_ref()) {
            for function in functions {
                *counts.entry(function.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Peptide count per taxonomy id, unannotated peptides excluded.
    pub fn taxonomy_peptide_counts(&self) -> BTreeMap<TaxonId, usize> {
        let mut counts = BTreeMap::new();
        for taxonomy in self.groups.iter().filter_map(|group| group.taxonomy_id.as_ref()) {
            *counts.entry(taxonomy.clone()).or_insert(0) += 1;
        }
        counts
    }

    pub fn export_rows(&self) -> Vec<ExportRow> {
        self.groups
            .iter()
            .map(|group| ExportRow {
                sample_name: self.name.clone(),
                peptide_sequence: group.sequence.clone(),
                psm_count: group.psm_count,
                summed_intensity: group.summed_intensity,
                max_confidence: group.max_confidence,
                taxonomy_id: group.taxonomy_id.clone(),
                function_ids: group
                    .function_ids
                    .as_ref()
                    .map(|functions| functions.iter().cloned().collect()),
                global_taxonomy_id: group.global_taxonomy_id.clone(),
                de_novo_confidence: group.de_novo.as_ref().map(|evidence| evidence.max_confidence),
                is_de_novo_only: group.is_de_novo_only,
            })
            .collect()
    }
}

/// Annotation sources an import brought along.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AnnotationSources {
    pub taxonomy_map: bool,
    pub function_map: bool,
    pub global_lookup: bool,
}

impl AnnotationSources {
    pub fn any(&self) -> bool {
        self.taxonomy_map || self.function_map || self.global_lookup
    }

    pub fn missing(&self) -> Vec<String> {
        let mut missing = Vec::new();
        if !self.taxonomy_map {
            missing.push("taxonomy map".to_string());
        }
        if !self.function_map {
            missing.push("function map".to_string());
        }
        if !self.global_lookup {
            missing.push("global sequence lookup".to_string());
        }
        missing
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportSummary {
    pub db_search_rows: usize,
    pub de_novo_rows: usize,
    pub groups: usize,
    pub empty_samples: usize,
    pub taxonomy: ResolverStats,
    pub functions: FunctionStats,
    pub global_lookup: GlobalLookupStats,
    pub orphans: OrphanReport,
    pub de_novo_confirmed: usize,
    pub de_novo_only: usize,
}

/// Samples of one import, built but not yet validated against a project.
#[derive(Debug, Clone)]
pub struct PreparedImport {
    pub samples: Vec<Sample>,
    pub sources: AnnotationSources,
    pub has_metaproteomics: bool,
    pub summary: ImportSummary,
    pub(crate) started: Instant,
}

impl PreparedImport {
    /// Source check run first during validation.
    pub fn check_sources(&self) -> Result<(), KiraError> {
        if !self.has_metaproteomics {
            return Err(KiraError::NoMetaproteomicsData);
        }
        if !self.sources.any() {
            return Err(KiraError::MissingAnnotationSource {
                missing: self.sources.missing(),
            });
        }
        Ok(())
    }
}

/// Runs an import from raw rows to unvalidated samples.
pub struct SampleBuilder<'s, S: SequenceLcaService + ?Sized> {
    service: &'s S,
}

impl<'s, S: SequenceLcaService + ?Sized> SampleBuilder<'s, S> {
    pub fn new(service: &'s S) -> Self {
        Self { service }
    }

    pub fn build(
        &self,
        request: ImportRequest,
        sink: &dyn ProgressSink,
    ) -> Result<PreparedImport, KiraError> {
        let started = Instant::now();
        let ImportRequest {
            sample_name,
            db_search,
            de_novo,
            taxonomy,
            functions,
            options,
        } = request;

        report_phase(
            sink,
            started,
            ImportPhase::Collecting,
            format!(
                "{} db search files, {} de novo files",
                db_search.len(),
                de_novo.len()
            ),
        );
        let collected = single_format(&db_search, |file| file.format, "db search").and_then(
            |db_format| {
                let de_novo_format = single_format(&de_novo, |file| file.format, "de novo")?;
                Ok((db_format, de_novo_format))
            },
        );
        let (db_format, de_novo_format) = match collected {
            Ok(formats) => formats,
            Err(err) => {
                warn!(error = %err, "import rejected");
                report_phase(sink, started, ImportPhase::Rejected, &err);
                return Err(err);
            }
        };

        let mut summary = ImportSummary {
            db_search_rows: db_search.iter().map(|file| file.rows.len()).sum(),
            de_novo_rows: de_novo.iter().map(|file| file.rows.len()).sum(),
            ..ImportSummary::default()
        };
        let lookup_requested = options.global_lookup != GlobalLookup::Off;
        let sources = AnnotationSources {
            taxonomy_map: taxonomy.is_some(),
            function_map: functions.is_some(),
            global_lookup: lookup_requested && self.service.is_available(),
        };
        if lookup_requested && !sources.global_lookup {
            warn!(sample = %sample_name, "global lookup requested without a sequence service");
        }
        let has_metaproteomics = !db_search.is_empty() || !de_novo.is_empty();

        report_phase(
            sink,
            started,
            ImportPhase::Aggregating,
            format!(
                "{} rows",
                summary.db_search_rows + summary.de_novo_rows
            ),
        );
        let db_search_files: Vec<String> = db_search.iter().map(|file| file.name.clone()).collect();
        let mut targets = aggregate_db_search(&sample_name, db_search, &options);
        let de_novo_sources = aggregate_de_novo(de_novo, &options);

        report_phase(
            sink,
            started,
            ImportPhase::Annotating,
            format!("{} samples", targets.len()),
        );
        let mut resolver = taxonomy.as_ref().map(|annotation| {
            TaxonomyResolver::new(&annotation.map, &annotation.tree, options.accession_kind)
        });
        let function_annotator = functions
            .as_ref()
            .map(|annotation| {
                FunctionAnnotator::new(&annotation.map, options.combine_multiple_functions)
            });
        for target in &mut targets {
            if let Some(resolver) = resolver.as_mut() {
                resolver.annotate_groups(&mut target.groups);
            }
            if let Some(annotator) = &function_annotator {
                let stats = annotator.annotate_groups(&mut target.groups);
                summary.functions.annotated += stats.annotated;
                summary.functions.unmatched += stats.unmatched;
                summary.functions.conflicts += stats.conflicts;
            }
        }

        report_phase(
            sink,
            started,
            ImportPhase::MergingDeNovo,
            format!("{} de novo files", de_novo_sources.len()),
        );
        let merged = DeNovoMerger::new(options.merge_mode)
            .with_sample_name(&sample_name)
            .merge(targets, de_novo_sources);
        summary.orphans = merged.orphans;
        summary.de_novo_confirmed = merged.confirmed;
        summary.de_novo_only = merged.de_novo_only;
        let mut targets = merged.targets;

        let taxonomy_format = match (&taxonomy, sources.global_lookup) {
            (Some(annotation), _) => Some(annotation.format),
            (None, true) => Some(TaxonomyFormat::Ncbi),
            (None, false) => None,
        };
        for target in &mut targets {
            if let Some(resolver) = resolver.as_mut() {
                for group in target.groups.iter_mut().filter(|group| group.is_de_novo_only) {
                    resolver.annotate_group(group);
                }
            }
            if sources.global_lookup {
                if taxonomy_format == Some(TaxonomyFormat::Gtdb) {
                    warn!(
                        sample = %target.name,
                        "global lookup answers in NCBI ids, skipped for GTDB taxonomy"
                    );
                    continue;
                }
                let tree = taxonomy.as_ref().map(|annotation| annotation.tree.as_ref());
                let stats =
                    annotate_global(&mut target.groups, self.service, tree, options.global_lookup);
                summary.global_lookup.queried += stats.queried;
                summary.global_lookup.annotated += stats.annotated;
                summary.global_lookup.failed += stats.failed;
                summary.global_lookup.unknown_ids += stats.unknown_ids;
            }
        }
        if let Some(resolver) = &resolver {
            summary.taxonomy = resolver.stats();
        }

        let imported_at = Utc::now();
        let mut samples = Vec::with_capacity(targets.len());
        for target in targets {
            if target.groups.is_empty() {
                info!(sample = %target.name, "no peptides left after filtering");
                summary.empty_samples += 1;
            }
            summary.groups += target.groups.len();
            let has_db_search = !db_search_files.is_empty();
            samples.push(Sample {
                formats: SampleFormats {
                    db_search: db_format.filter(|_| has_db_search),
                    de_novo: de_novo_format.filter(|_| !target.de_novo_sources.is_empty()),
                    taxonomy: taxonomy_format,
                    function: functions.as_ref().map(|annotation| annotation.format),
                },
                provenance: Provenance {
                    db_search_files: if has_db_search {
                        target_db_files(&target, &db_search_files, options.merge_mode)
                    } else {
                        Vec::new()
                    },
                    de_novo_files: target.de_novo_sources,
                    raw_source_files: target.raw_source_files,
                    imported_at,
                },
                name: target.name,
                groups: target.groups,
            });
        }

        Ok(PreparedImport {
            samples,
            sources,
            has_metaproteomics,
            summary,
            started,
        })
    }
}

/// The one format shared by every file of a component.
fn single_format<T, F: Copy + PartialEq + fmt::Display>(
    files: &[T],
    format_of: impl Fn(&T) -> F,
    component: &str,
) -> Result<Option<F>, KiraError> {
    let mut formats = files.iter().map(format_of);
    let Some(first) = formats.next() else {
        return Ok(None);
    };
    match formats.find(|format| *format != first) {
        Some(other) => Err(KiraError::FormatIncompatible {
            component: component.to_string(),
            established: first.to_string(),
            found: other.to_string(),
        }),
        None => Ok(Some(first)),
    }
}

fn raw_files(rows: &[IdentificationRow]) -> BTreeSet<String> {
    rows.iter().map(|row| row.raw_source_file.clone()).collect()
}

fn aggregate_db_search(
    sample_name: &str,
    files: Vec<DbSearchFile>,
    options: &ImportOptions,
) -> Vec<MergeTarget> {
    let db_options = |format: DbSearchFormat| {
        AggregateOptions::new(options.confidence_cutoff, format.confidence_format())
            .with_length_range(options.length_range)
            .with_excluded(&options.excluded_sequences)
    };

    match options.merge_mode {
        MergeMode::Merged => {
            let Some(format) = files.first().map(|file| file.format) else {
                return Vec::new();
            };
            let rows: Vec<IdentificationRow> =
                files.into_iter().flat_map(|file| file.rows).collect();
            let groups = aggregate(&rows, &db_options(format));
            vec![MergeTarget::new(sample_name, groups).with_raw_source_files(raw_files(&rows))]
        }
        MergeMode::Separate => {
            let single = files.len() == 1;
            files
                .into_iter()
                .map(|file| {
                    let groups = aggregate(&file.rows, &db_options(file.format));
                    let name = if single { sample_name.to_string() } else { file.name };
                    MergeTarget::new(name, groups).with_raw_source_files(raw_files(&file.rows))
                })
                .collect()
        }
    }
}

fn aggregate_de_novo(files: Vec<DeNovoFile>, options: &ImportOptions) -> Vec<DeNovoSource> {
    files
        .into_iter()
        .map(|file| {
            let confidence_format = file.format.confidence_format();
            let aggregate_options =
                AggregateOptions::new(options.de_novo_confidence_cutoff, confidence_format)
                    .with_length_range(options.length_range)
                    .with_excluded(&options.excluded_sequences);
            let groups = aggregate(&file.rows, &aggregate_options);
            DeNovoSource::new(file.name, file.format, groups)
                .with_raw_source_files(raw_files(&file.rows))
        })
        .collect()
}

fn target_db_files(target: &MergeTarget, files: &[String], mode: MergeMode) -> Vec<String> {
    match mode {
        MergeMode::Merged => files.to_vec(),
        MergeMode::Separate if files.len() == 1 => files.to_vec(),
        MergeMode::Separate => vec![target.name.clone()],
    }
}
