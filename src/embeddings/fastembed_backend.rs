//! Local ONNX embeddings via fastembed.
//!
//! The model is downloaded on first use and loaded from the fastembed cache
//! directory afterwards.

use std::sync::Mutex;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use super::Embedder;
use crate::config::EmbeddingConfig;
use crate::error::{DocError, Result};

const BATCH_SIZE: usize = 64;

/// fastembed-backed [`Embedder`]. Output vectors are L2-normalized by the
/// supported models.
pub struct FastEmbedder {
    model: Mutex<TextEmbedding>,
    name: String,
    dim: usize,
}

impl FastEmbedder {
    pub fn try_new(settings: &EmbeddingConfig) -> Result<Self> {
        let model = model_for(&settings.model)?;
        let options = InitOptions::new(model).with_show_download_progress(true);
        let embedding = TextEmbedding::try_new(options)
            .map_err(|e| DocError::Other(format!("failed to initialize embedding model: {e}")))?;
        Ok(Self {
            model: Mutex::new(embedding),
            name: settings.model.clone(),
            dim: settings.dim,
        })
    }
}

fn model_for(name: &str) -> Result<EmbeddingModel> {
    match name {
        "BAAI/bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
        "BAAI/bge-base-en-v1.5" => Ok(EmbeddingModel::BGEBaseENV15),
        "sentence-transformers/all-MiniLM-L6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "intfloat/multilingual-e5-small" => Ok(EmbeddingModel::MultilingualE5Small),
        other => Err(DocError::Config(format!("unsupported embedding model '{other}'"))),
    }
}

impl Embedder for FastEmbedder {
    fn model(&self) -> &str {
        &self.name
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut model = self
            .model
            .lock()
            .map_err(|_| DocError::Other("embedding model lock poisoned".into()))?;
        model
            .embed(texts.to_vec(), Some(BATCH_SIZE))
            .map_err(|e| DocError::stage("embed", e.to_string()))
    }
}
