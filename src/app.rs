use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{Rank, TaxonId};
use crate::error::KiraError;
use crate::project::{EstablishedFormats, ImportReport, ProjectTable};
use crate::resolver::SequenceLcaService;
use crate::sample::{ExportRow, ImportRequest, SampleBuilder, SampleFormats};
use crate::taxonomy::TaxonomyTree;

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub samples: Vec<ListEntry>,
    pub established: EstablishedFormats,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListEntry {
    pub name: String,
    pub peptides: usize,
    pub psms: usize,
    pub de_novo_only: usize,
    pub formats: SampleFormats,
    pub imported_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoveResult {
    pub removed: String,
    pub remaining: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportResult {
    pub rows: Vec<ExportRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LcaResult {
    pub ids: Vec<TaxonId>,
    pub lca: Option<TaxonId>,
    pub rank: Option<Rank>,
    pub name: Option<String>,
    pub lineage: Vec<Option<TaxonId>>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Project session: one table and the sequence service used for imports.
pub struct App<S: SequenceLcaService> {
    project: ProjectTable,
    service: S,
}

impl<S: SequenceLcaService> App<S> {
    pub fn new(project: ProjectTable, service: S) -> Self {
        Self { project, service }
    }

    pub fn project(&self) -> &ProjectTable {
        &self.project
    }

    pub fn import(
        &self,
        request: ImportRequest,
        sink: &dyn ProgressSink,
    ) -> Result<ImportReport, KiraError> {
        let prepared = SampleBuilder::new(&self.service).build(request, sink)?;
        self.project.add(prepared, sink)
    }

    pub fn remove(&self, name: &str, sink: &dyn ProgressSink) -> Result<RemoveResult, KiraError> {
        let started = Instant::now();
        let removed = self.project.remove_sample(name)?;
        sink.event(ProgressEvent {
            message: format!("phase=Remove; removed {}", removed.name),
            elapsed: Some(started.elapsed()),
        });
        Ok(RemoveResult {
            removed: removed.name,
            remaining: self.project.len()?,
        })
    }

    pub fn list(&self, sink: &dyn ProgressSink) -> Result<ListResult, KiraError> {
        sink.event(ProgressEvent {
            message: "phase=List; reading project table".to_string(),
            elapsed: None,
        });
        let samples = self
            .project
            .samples()?
            .into_iter()
            .map(|sample| ListEntry {
                peptides: sample.groups.len(),
                psms: sample.psm_count(),
                de_novo_only: sample.groups.iter().filter(|group| group.is_de_novo_only).count(),
                formats: sample.formats,
                imported_at: sample.provenance.imported_at,
                name: sample.name,
            })
            .collect();
        Ok(ListResult {
            samples,
            established: self.project.established()?,
        })
    }

    pub fn export(&self, sink: &dyn ProgressSink) -> Result<ExportResult, KiraError> {
        sink.event(ProgressEvent {
            message: "phase=Export; flattening samples".to_string(),
            elapsed: None,
        });
        Ok(ExportResult {
            rows: self.project.export_rows()?,
        })
    }
}

/// LCA of `ids` with rank, name and standard lineage of the result.
pub fn lca_report(tree: &TaxonomyTree, ids: Vec<TaxonId>) -> LcaResult {
    let lca = tree.lca(ids.iter());
    let (rank, name, lineage) = match &lca {
        Some(id) => (
            tree.rank(id),
            tree.name(id).map(str::to_string),
            tree.lineage(id).to_vec(),
        ),
        None => (None, None, Vec::new()),
    };
    LcaResult {
        ids,
        lca,
        rank,
        name,
        lineage,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::{DbSearchFormat, FunctionFormat, FunctionId};
    use crate::function::FunctionMap;
    use crate::output::JsonOutput;
    use crate::resolver::NoSequenceService;
    use crate::row::IdentificationRow;
    use crate::taxonomy::TaxonNode;

    #[test]
    fn import_then_list_and_remove() {
        let app = App::new(ProjectTable::new(), NoSequenceService);
        let mut map = FunctionMap::new();
        map.insert("P1", [FunctionId::from("K00001")]);
        let request = ImportRequest::new("S1")
            .with_db_search(
                "s1.json",
                DbSearchFormat::Sage,
                vec![IdentificationRow::new("r1", 1, "AAK", 3.0).with_proteins(["P1"])],
            )
            .with_functions(FunctionFormat::Gkoala, map);

        let report = app.import(request, &JsonOutput).unwrap();
        assert_eq!(report.samples, vec!["S1".to_string()]);

        let listed = app.list(&JsonOutput).unwrap();
        assert_eq!(listed.samples[0].peptides, 1);
        assert_eq!(
            listed.established.function.map(|slot| slot.format),
            Some(FunctionFormat::Gkoala)
        );

        let removed = app.remove("S1", &JsonOutput).unwrap();
        assert_eq!(removed.remaining, 0);
        assert!(app.list(&JsonOutput).unwrap().established.function.is_none());
    }

    #[test]
    fn lca_report_includes_lineage() {
        let tree = Arc::new(
            TaxonomyTree::from_nodes([
                TaxonNode::new(2u32, None, Rank::Superkingdom, "Bacteria"),
                TaxonNode::new(561u32, Some(TaxonId::Ncbi(2)), Rank::Genus, "Escherichia"),
                TaxonNode::new(562u32, Some(TaxonId::Ncbi(561)), Rank::Species, "E. coli"),
                TaxonNode::new(564u32, Some(TaxonId::Ncbi(561)), Rank::Species, "E. fergusonii"),
            ])
            .unwrap(),
        );
        let report = lca_report(&tree, vec![TaxonId::Ncbi(562), TaxonId::Ncbi(564)]);
        assert_eq!(report.lca, Some(TaxonId::Ncbi(561)));
        assert_eq!(report.rank, Some(Rank::Genus));
        assert_eq!(report.name.as_deref(), Some("Escherichia"));
        assert_eq!(report.lineage[0], Some(TaxonId::Ncbi(2)));
    }
}
