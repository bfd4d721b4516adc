use std::collections::HashSet;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use tracing::{info, warn};

use crate::app::ProgressSink;
use crate::domain::{DbSearchFormat, DeNovoFormat, FunctionFormat, TaxonomyFormat};
use crate::error::KiraError;
use crate::sample::{
    ExportRow, ImportPhase, ImportSummary, PreparedImport, Sample, SampleFormats, report_phase,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatOrigin {
    /// Set by configuration before any sample arrived.
    Pinned,
    /// Taken from the first sample carrying the component.
    Sample,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Established<F> {
    pub format: F,
    pub origin: FormatOrigin,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EstablishedFormats {
    pub db_search: Option<Established<DbSearchFormat>>,
    pub de_novo: Option<Established<DeNovoFormat>>,
    pub taxonomy: Option<Established<TaxonomyFormat>>,
    pub function: Option<Established<FunctionFormat>>,
}

impl EstablishedFormats {
    pub fn pinned(formats: SampleFormats) -> Self {
        Self {
            db_search: formats.db_search.map(|format| Established {
                format,
                origin: FormatOrigin::Pinned,
            }),
            de_novo: formats.de_novo.map(|format| Established {
                format,
                origin: FormatOrigin::Pinned,
            }),
            taxonomy: formats.taxonomy.map(|format| Established {
                format,
                origin: FormatOrigin::Pinned,
            }),
            function: formats.function.map(|format| Established {
                format,
                origin: FormatOrigin::Pinned,
            }),
        }
    }

    pub fn formats(&self) -> SampleFormats {
        SampleFormats {
            db_search: self.db_search.map(|slot| slot.format),
            de_novo: self.de_novo.map(|slot| slot.format),
            taxonomy: self.taxonomy.map(|slot| slot.format),
            function: self.function.map(|slot| slot.format),
        }
    }

    /// Check `sample` against the established formats, then adopt its formats
    /// for components that are still open.
    ///
    /// Taxonomy is checked first, then db search, de novo and function.
    fn admit(&mut self, sample: &Sample) -> Result<(), KiraError> {
        let formats = sample.formats;
        check_slot(&self.taxonomy, formats.taxonomy, "taxonomy")?;
        check_slot(&self.db_search, formats.db_search, "db search")?;
        check_slot(&self.de_novo, formats.de_novo, "de novo")?;
        check_slot(&self.function, formats.function, "function")?;

        fill_slot(&mut self.taxonomy, formats.taxonomy);
        fill_slot(&mut self.db_search, formats.db_search);
        fill_slot(&mut self.de_novo, formats.de_novo);
        fill_slot(&mut self.function, formats.function);
        Ok(())
    }

    /// Release sample-established components no remaining sample carries.
    fn release_unused(&mut self, samples: &[Sample]) {
        release_slot(&mut self.db_search, samples.iter().any(|s| s.formats.db_search.is_some()));
        release_slot(&mut self.de_novo, samples.iter().any(|s| s.formats.de_novo.is_some()));
        release_slot(&mut self.taxonomy, samples.iter().any(|s| s.formats.taxonomy.is_some()));
        release_slot(&mut self.function, samples.iter().any(|s| s.formats.function.is_some()));
    }

    fn pinned_only(&self) -> Self {
        let keep = |origin: FormatOrigin| origin == FormatOrigin::Pinned;
        Self {
            db_search: self.db_search.filter(|slot| keep(slot.origin)),
            de_novo: self.de_novo.filter(|slot| keep(slot.origin)),
            taxonomy: self.taxonomy.filter(|slot| keep(slot.origin)),
            function: self.function.filter(|slot| keep(slot.origin)),
        }
    }
}

fn check_slot<F>(
    slot: &Option<Established<F>>,
    found: Option<F>,
    component: &str,
) -> Result<(), KiraError>
where
    F: Copy + PartialEq + fmt::Display,
{
    match (slot, found) {
        (Some(established), Some(found)) if established.format != found => {
            Err(KiraError::FormatIncompatible {
                component: component.to_string(),
                established: established.format.to_string(),
                found: found.to_string(),
            })
        }
        _ => Ok(()),
    }
}

fn fill_slot<F: Copy>(slot: &mut Option<Established<F>>, found: Option<F>) {
    if slot.is_none()
        && let Some(format) = found
    {
        *slot = Some(Established {
            format,
            origin: FormatOrigin::Sample,
        });
    }
}

fn release_slot<F>(slot: &mut Option<Established<F>>, still_used: bool) {
    if !still_used && slot.as_ref().is_some_and(|slot| slot.origin == FormatOrigin::Sample) {
        *slot = None;
    }
}

/// First free `name`, `name(1)`, `name(2)`, ...
pub fn deduplicate_name(name: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(name) {
        return name.to_string();
    }
    (1..)
        .map(|suffix| format!("{name}({suffix})"))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| name.to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportReport {
    pub samples: Vec<String>,
    pub summary: ImportSummary,
}

#[derive(Debug, Default)]
struct ProjectState {
    samples: Vec<Sample>,
    formats: EstablishedFormats,
}

/// Ordered collection of samples sharing one set of formats.
///
/// All mutations go through one lock; readers get snapshots.
#[derive(Debug, Default)]
pub struct ProjectTable {
    state: Mutex<ProjectState>,
}

impl ProjectTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with formats fixed up front; these survive sample removal.
    pub fn with_formats(formats: SampleFormats) -> Self {
        Self {
            state: Mutex::new(ProjectState {
                samples: Vec::new(),
                formats: EstablishedFormats::pinned(formats),
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ProjectState>, KiraError> {
        self.state.lock().map_err(|_| KiraError::ProjectLock)
    }

    /// Validate every sample of the import and append them all, or none.
    pub fn add(
        &self,
        prepared: PreparedImport,
        sink: &dyn ProgressSink,
    ) -> Result<ImportReport, KiraError> {
        let started = prepared.started;
        report_phase(
            sink,
            started,
            ImportPhase::Validating,
            format!("{} samples", prepared.samples.len()),
        );

        let mut state = self.lock()?;
        let validated = prepared.check_sources().and_then(|_| {
            let mut formats = state.formats;
            for sample in &prepared.samples {
                formats.admit(sample)?;
            }
            Ok(formats)
        });
        let formats = match validated {
            Ok(formats) => formats,
            Err(err) => {
                warn!(error = %err, "import rejected");
                report_phase(sink, started, ImportPhase::Rejected, &err);
                return Err(err);
            }
        };

        let mut taken: HashSet<String> =
            state.samples.iter().map(|sample| sample.name.clone()).collect();
        let mut names = Vec::with_capacity(prepared.samples.len());
        let mut samples = prepared.samples;
        for sample in &mut samples {
            let name = deduplicate_name(&sample.name, &taken);
            if name != sample.name {
                info!(requested = %sample.name, assigned = %name, "sample renamed");
            }
            taken.insert(name.clone());
            names.push(name.clone());
            sample.name = name;
        }

        state.samples.extend(samples);
        state.formats = formats;
        drop(state);

        report_phase(sink, started, ImportPhase::Committed, names.join(", "));
        Ok(ImportReport {
            samples: names,
            summary: prepared.summary,
        })
    }

    pub fn remove_sample(&self, name: &str) -> Result<Sample, KiraError> {
        let mut state = self.lock()?;
        let index = state
            .samples
            .iter()
            .position(|sample| sample.name == name)
            .ok_or_else(|| KiraError::SampleNotFound(name.to_string()))?;
        let removed = state.samples.remove(index);
        let ProjectState { samples, formats } = &mut *state;
        formats.release_unused(samples);
        Ok(removed)
    }

    /// Swap in a whole set of samples, e.g. a previously exported project.
    ///
    /// Samples are checked against each other and against pinned formats.
    pub fn replace_with(&self, samples: Vec<Sample>) -> Result<(), KiraError> {
        let mut state = self.lock()?;
        let mut formats = state.formats.pinned_only();
        let mut taken = HashSet::new();
        let mut renamed = Vec::with_capacity(samples.len());
        for mut sample in samples {
            formats.admit(&sample)?;
            sample.name = deduplicate_name(&sample.name, &taken);
            taken.insert(sample.name.clone());
            renamed.push(sample);
        }
        state.samples = renamed;
        state.formats = formats;
        Ok(())
    }

    pub fn samples(&self) -> Result<Vec<Sample>, KiraError> {
        Ok(self.lock()?.samples.clone())
    }

    pub fn sample(&self, name: &str) -> Result<Option<Sample>, KiraError> {
        Ok(self
            .lock()?
            .samples
            .iter()
            .find(|sample| sample.name == name)
            .cloned())
    }

    pub fn sample_names(&self) -> Result<Vec<String>, KiraError> {
        Ok(self.lock()?.samples.iter().map(|sample| sample.name.clone()).collect())
    }

    pub fn len(&self) -> Result<usize, KiraError> {
        Ok(self.lock()?.samples.len())
    }

    pub fn is_empty(&self) -> Result<bool, KiraError> {
        Ok(self.lock()?.samples.is_empty())
    }

    pub fn established(&self) -> Result<EstablishedFormats, KiraError> {
        Ok(self.lock()?.formats)
    }

    pub fn export_rows(&self) -> Result<Vec<ExportRow>, KiraError> {
        Ok(self
            .lock()?
            .samples
            .iter()
            .flat_map(Sample::export_rows)
            .collect())
    }
}
