use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::ResolvedConfig;
use crate::domain::{DbSearchFormat, DeNovoFormat, FunctionFormat, TaxonomyFormat};
use crate::error::KiraError;
use crate::function::{FunctionMap, FunctionRow};
use crate::resolver::AccessionTaxonRow;
use crate::row::IdentificationRow;
use crate::sample::ImportRequest;
use crate::taxonomy::{TaxonNode, TaxonomyTree};

/// One import described as JSON; paths are relative to the manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    pub sample_name: String,
    #[serde(default)]
    pub db_search: Vec<DbSearchEntry>,
    #[serde(default)]
    pub de_novo: Vec<DeNovoEntry>,
    #[serde(default)]
    pub taxonomy: Option<TaxonomyEntry>,
    #[serde(default)]
    pub functions: Option<FunctionEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DbSearchEntry {
    pub path: Utf8PathBuf,
    pub format: DbSearchFormat,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeNovoEntry {
    pub path: Utf8PathBuf,
    pub format: DeNovoFormat,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaxonomyEntry {
    #[serde(default)]
    pub format: Option<TaxonomyFormat>,
    pub nodes: Utf8PathBuf,
    pub map: Utf8PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FunctionEntry {
    pub format: FunctionFormat,
    pub map: Utf8PathBuf,
}

pub fn read_json<T: DeserializeOwned>(path: &Utf8Path) -> Result<T, KiraError> {
    let content = fs::read_to_string(path).map_err(|err| KiraError::InputRead {
        path: path.to_string(),
        message: err.to_string(),
    })?;
    serde_json::from_str(&content).map_err(|err| KiraError::InputParse {
        path: path.to_string(),
        message: err.to_string(),
    })
}

pub fn load_tree(path: &Utf8Path) -> Result<TaxonomyTree, KiraError> {
    let nodes: Vec<TaxonNode> = read_json(path)?;
    TaxonomyTree::from_nodes(nodes)
}

/// Loads manifests, sharing one taxonomy tree per nodes file.
pub struct InputLoader<'c> {
    config: &'c ResolvedConfig,
    trees: HashMap<Utf8PathBuf, Arc<TaxonomyTree>>,
}

impl<'c> InputLoader<'c> {
    pub fn new(config: &'c ResolvedConfig) -> Self {
        Self {
            config,
            trees: HashMap::new(),
        }
    }

    pub fn tree(&mut self, path: &Utf8Path) -> Result<Arc<TaxonomyTree>, KiraError> {
        if let Some(tree) = self.trees.get(path) {
            return Ok(Arc::clone(tree));
        }
        let tree = Arc::new(load_tree(path)?);
        self.trees.insert(path.to_path_buf(), Arc::clone(&tree));
        Ok(tree)
    }

    pub fn load(&mut self, manifest_path: &Utf8Path) -> Result<ImportRequest, KiraError> {
        let manifest: Manifest = read_json(manifest_path)?;
        let base = manifest_path.parent().unwrap_or(Utf8Path::new("."));
        debug!(manifest = %manifest_path, sample = %manifest.sample_name, "loading manifest");

        let mut request =
            ImportRequest::new(manifest.sample_name).with_options(self.config.import_options());

        for entry in manifest.db_search {
            let path = base.join(&entry.path);
            let rows: Vec<IdentificationRow> = read_json(&path)?;
            request = request.with_db_search(entry.path.as_str(), entry.format, rows);
        }
        for entry in manifest.de_novo {
            let path = base.join(&entry.path);
            let rows: Vec<IdentificationRow> = read_json(&path)?;
            request = request.with_de_novo(entry.path.as_str(), entry.format, rows);
        }

        if let Some(entry) = manifest.taxonomy {
            let format = entry
                .format
                .or(self.config.taxonomy_format)
                .unwrap_or(TaxonomyFormat::Ncbi);
            let tree = self.tree(&base.join(&entry.nodes))?;
            let rows: Vec<AccessionTaxonRow> = read_json(&base.join(&entry.map))?;
            let mut map = self.config.accession_map();
            map.extend(rows);
            request = request.with_taxonomy(format, map, tree);
        }

        if let Some(entry) = manifest.functions {
            let rows: Vec<FunctionRow> = read_json(&base.join(&entry.map))?;
            request = request.with_functions(entry.format, FunctionMap::from_rows(rows));
        }

        Ok(request)
    }
}
