//! Model archive: vocabulary, architecture and weights in one bincode file
//!
//! The archive carries a schema version so an old file cannot be silently
//! paired with a different network layout.

use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{LexsubError, Result};
use crate::llm::model::ModelConfig;
use crate::llm::vocab::DataIndexer;

/// Bumped whenever the archive layout or parameter naming changes
pub const SCHEMA_VERSION: u32 = 1;

/// File extension appended to the serialization prefix
pub const ARCHIVE_EXTENSION: &str = "lexsub";

/// One named parameter, flattened row-major
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TensorData {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// Everything needed to rebuild a trained `WordReplacer`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelArchive {
    pub schema_version: u32,
    pub indexer: DataIndexer,
    pub config: ModelConfig,
    pub tensors: Vec<TensorData>,
}

/// `<prefix>.lexsub`
pub fn archive_path(prefix: &str) -> PathBuf {
    PathBuf::from(format!("{}.{}", prefix, ARCHIVE_EXTENSION))
}

/// Flatten every variable of `varmap`, sorted by name for stable output
pub fn export_tensors(varmap: &VarMap) -> Result<Vec<TensorData>> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| LexsubError::persistence("variable map lock poisoned"))?;

    let mut tensors = Vec::with_capacity(data.len());
    for (name, var) in data.iter() {
        tensors.push(TensorData {
            name: name.clone(),
            shape: var.shape().dims().to_vec(),
            data: var.flatten_all()?.to_vec1::<f32>()?,
        });
    }
    tensors.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(tensors)
}

/// Overwrite the variables of `varmap` with archived values
///
/// Every variable must be present with the same shape; extra archived
/// tensors are rejected too.
pub fn import_tensors(varmap: &mut VarMap, tensors: &[TensorData], device: &Device) -> Result<()> {
    let expected: Vec<(String, Vec<usize>)> = {
        let data = varmap
            .data()
            .lock()
            .map_err(|_| LexsubError::persistence("variable map lock poisoned"))?;
        data.iter()
            .map(|(name, var)| (name.clone(), var.shape().dims().to_vec()))
            .collect()
    };

    if expected.len() != tensors.len() {
        return Err(LexsubError::persistence(format!(
            "archive has {} tensors, model expects {}",
            tensors.len(),
            expected.len()
        )));
    }

    for (name, shape) in &expected {
        let stored = tensors
            .iter()
            .find(|t| &t.name == name)
            .ok_or_else(|| LexsubError::persistence(format!("missing tensor {}", name)))?;
        if &stored.shape != shape {
            return Err(LexsubError::persistence(format!(
                "tensor {} has shape {:?}, model expects {:?}",
                name, stored.shape, shape
            )));
        }
        let value = Tensor::from_vec(stored.data.clone(), stored.shape.as_slice(), device)?;
        varmap.set_one(name, value)?;
    }
    Ok(())
}

impl ModelArchive {
    pub fn new(indexer: DataIndexer, config: ModelConfig, tensors: Vec<TensorData>) -> Self {
        ModelArchive {
            schema_version: SCHEMA_VERSION,
            indexer,
            config,
            tensors,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = bincode::serialize(self)?;
        fs::write(path, &bytes)?;
        info!(path = %path.display(), bytes = bytes.len(), "Model archive written");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let archive: ModelArchive = bincode::deserialize(&bytes)?;
        if archive.schema_version != SCHEMA_VERSION {
            return Err(LexsubError::persistence(format!(
                "archive schema version {} is not supported (expected {})",
                archive.schema_version, SCHEMA_VERSION
            )));
        }
        info!(
            path = %path.display(),
            bytes = bytes.len(),
            tensors = archive.tensors.len(),
            "Model archive read"
        );
        Ok(archive)
    }
}
