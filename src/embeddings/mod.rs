//! Semantic embeddings for a version's search index.
//!
//! `embeddings-index.json` holds one vector per entry of the sibling
//! `search-index.json`, in the same order. It is regenerated only when the
//! search index is newer, and never written if the vector count or width
//! disagrees with the index it was computed from.

#[cfg(feature = "embedding")]
mod fastembed_backend;

#[cfg(feature = "embedding")]
pub use fastembed_backend::FastEmbedder;

use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::{debug, info};

use crate::error::{DocError, Result};
use crate::storage::{read_json, write_json_compact_atomic, EMBEDDINGS_FILE, SEARCH_INDEX_FILE};
use crate::types::{EmbeddingIndex, SearchEntry};

/// Document prefix expected by passage/query trained retrieval models.
const PASSAGE_PREFIX: &str = "passage: ";

/// Turns texts into fixed-width vectors.
pub trait Embedder {
    /// Model identifier recorded in the index file.
    fn model(&self) -> &str;
    fn dim(&self) -> usize;
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// The text embedded for one search entry: name, then parent class, module,
/// description, and tags when present.
pub fn embedding_text(entry: &SearchEntry) -> String {
    let mut parts: Vec<String> = Vec::new();
    if !entry.name.is_empty() {
        parts.push(entry.name.clone());
    }
    if let Some(parent) = entry.parent_class.as_deref().filter(|p| !p.is_empty()) {
        parts.push(format!("in {parent}"));
    }
    if !entry.module_name.is_empty() {
        parts.push(format!("from {}", entry.module_name));
    }
    if !entry.description.is_empty() {
        parts.push(entry.description.clone());
    }
    if let Some(tags) = entry.tags.as_ref().filter(|t| !t.is_empty()) {
        parts.push(tags.join(" "));
    }
    format!("{PASSAGE_PREFIX}{}", parts.join(" "))
}

/// True when the version has a search index and its embeddings are missing
/// or older than it.
pub fn needs_regeneration(version_dir: &Path) -> bool {
    let search = version_dir.join(SEARCH_INDEX_FILE);
    let embeddings = version_dir.join(EMBEDDINGS_FILE);
    let Ok(search_meta) = std::fs::metadata(&search) else {
        return false;
    };
    let Ok(embeddings_meta) = std::fs::metadata(&embeddings) else {
        return true;
    };
    match (search_meta.modified(), embeddings_meta.modified()) {
        (Ok(s), Ok(e)) => s > e,
        // No mtimes on this platform: regenerate rather than trust stale data.
        _ => true,
    }
}

impl EmbeddingIndex {
    /// An index for an empty search index.
    pub fn empty(model: &str, dim: usize) -> Self {
        Self {
            model: model.to_string(),
            dim,
            count: 0,
            embeddings: String::new(),
        }
    }

    /// Pack vectors as little-endian f32 and base64 encode them. Every
    /// vector must be exactly `dim` wide.
    pub fn from_vectors(model: &str, dim: usize, vectors: &[Vec<f32>]) -> Result<Self> {
        let mut bytes = Vec::with_capacity(vectors.len() * dim * 4);
        for (i, vector) in vectors.iter().enumerate() {
            if vector.len() != dim {
                return Err(DocError::stage(
                    "embed",
                    format!("vector {i} has {} dimensions, expected {dim}", vector.len()),
                ));
            }
            for value in vector {
                bytes.extend_from_slice(&value.to_le_bytes());
            }
        }
        Ok(Self {
            model: model.to_string(),
            dim,
            count: vectors.len(),
            embeddings: STANDARD.encode(bytes),
        })
    }

    /// Unpack the vectors.
    pub fn vectors(&self) -> Result<Vec<Vec<f32>>> {
        let bytes = STANDARD
            .decode(&self.embeddings)
            .map_err(|e| DocError::Other(format!("bad embeddings payload: {e}")))?;
        if self.count == 0 && bytes.is_empty() {
            return Ok(Vec::new());
        }
        if self.dim == 0 || bytes.len() != self.count * self.dim * 4 {
            return Err(DocError::Other(format!(
                "embeddings payload is {} bytes, expected {} x {} floats",
                bytes.len(),
                self.count,
                self.dim
            )));
        }
        let floats: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(floats.chunks(self.dim).map(<[f32]>::to_vec).collect())
    }
}

/// What happened to one version's embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingOutcome {
    Generated { count: usize },
    WouldGenerate,
    UpToDate,
    NoSearchIndex,
}

/// Regenerate `embeddings-index.json` for one version directory when stale
/// (or always, with `force`).
pub fn regenerate_version_embeddings(
    version_dir: &Path,
    embedder: &dyn Embedder,
    force: bool,
    dry_run: bool,
) -> Result<EmbeddingOutcome> {
    let search_path = version_dir.join(SEARCH_INDEX_FILE);
    if !search_path.is_file() {
        return Ok(EmbeddingOutcome::NoSearchIndex);
    }
    if !force && !needs_regeneration(version_dir) {
        debug!(dir = %version_dir.display(), "embeddings up to date");
        return Ok(EmbeddingOutcome::UpToDate);
    }
    if dry_run {
        return Ok(EmbeddingOutcome::WouldGenerate);
    }

    let entries: Vec<SearchEntry> = read_json(&search_path)?;
    let index = embed_entries(&entries, embedder)?;
    write_json_compact_atomic(&version_dir.join(EMBEDDINGS_FILE), &index)?;
    info!(
        dir = %version_dir.display(),
        count = index.count,
        dim = index.dim,
        "embeddings written"
    );
    Ok(EmbeddingOutcome::Generated { count: index.count })
}

/// Embed every entry, checking the result lines up with the input.
pub fn embed_entries(entries: &[SearchEntry], embedder: &dyn Embedder) -> Result<EmbeddingIndex> {
    if entries.is_empty() {
        return Ok(EmbeddingIndex::empty(embedder.model(), embedder.dim()));
    }
    let texts: Vec<String> = entries.iter().map(embedding_text).collect();
    let vectors = embedder.embed(&texts)?;
    if vectors.len() != entries.len() {
        return Err(DocError::stage(
            "embed",
            format!("got {} vectors for {} search entries", vectors.len(), entries.len()),
        ));
    }
    EmbeddingIndex::from_vectors(embedder.model(), embedder.dim(), &vectors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::write_json_atomic;
    use crate::types::EntryKind;
    use pretty_assertions::assert_eq;
    use std::time::{Duration, SystemTime};

    /// Deterministic embedder: each vector is (text length, entry number).
    struct LengthEmbedder {
        dim: usize,
        drop_last: bool,
    }

    impl Embedder for LengthEmbedder {
        fn model(&self) -> &str {
            "test/length"
        }
        fn dim(&self) -> usize {
            self.dim
        }
        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let mut out: Vec<Vec<f32>> = texts
                .iter()
                .enumerate()
                .map(|(i, t)| {
                    let mut v = vec![0.0; self.dim];
                    v[0] = t.len() as f32;
                    if self.dim > 1 {
                        v[1] = i as f32;
                    }
                    v
                })
                .collect();
            if self.drop_last {
                out.pop();
            }
            Ok(out)
        }
    }

    fn entry(name: &str, parent: Option<&str>, tags: Option<Vec<&str>>) -> SearchEntry {
        SearchEntry {
            kind: EntryKind::Method,
            name: name.into(),
            description: "Advance one step.".into(),
            path: "p/v/api#x".into(),
            package_id: "p".into(),
            module_name: "p.blocks".into(),
            parent_class: parent.map(String::from),
            tags: tags.map(|t| t.into_iter().map(String::from).collect()),
        }
    }

    fn set_mtime(path: &Path, t: SystemTime) {
        std::fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(t)
            .unwrap();
    }

    #[test]
    fn embedding_text_layout() {
        assert_eq!(
            embedding_text(&entry("step", Some("Solver"), None)),
            "passage: step in Solver from p.blocks Advance one step."
        );
        let mut example = entry("Pendulum", None, Some(vec!["ode", "physics"]));
        example.description.clear();
        assert_eq!(
            embedding_text(&example),
            "passage: Pendulum from p.blocks ode physics"
        );
    }

    #[test]
    fn staleness_follows_mtimes() {
        let dir = tempfile::tempdir().unwrap();
        let search = dir.path().join(SEARCH_INDEX_FILE);
        let embeddings = dir.path().join(EMBEDDINGS_FILE);

        assert!(!needs_regeneration(dir.path()));

        std::fs::write(&search, "[]").unwrap();
        assert!(needs_regeneration(dir.path()));

        std::fs::write(&embeddings, "{}").unwrap();
        let base = SystemTime::now() - Duration::from_secs(3600);
        set_mtime(&search, base);
        set_mtime(&embeddings, base + Duration::from_secs(10));
        assert!(!needs_regeneration(dir.path()));

        set_mtime(&search, base + Duration::from_secs(20));
        assert!(needs_regeneration(dir.path()));
    }

    #[test]
    fn vectors_round_trip_through_base64() {
        let vectors = vec![vec![1.0, -0.5], vec![0.25, 3.0]];
        let index = EmbeddingIndex::from_vectors("m", 2, &vectors).unwrap();
        assert_eq!(index.count, 2);
        assert_eq!(STANDARD.decode(&index.embeddings).unwrap().len(), 16);
        assert_eq!(index.vectors().unwrap(), vectors);
    }

    #[test]
    fn wrong_width_vector_rejected() {
        let err = EmbeddingIndex::from_vectors("m", 3, &[vec![1.0, 2.0]]).unwrap_err();
        assert!(err.to_string().contains("expected 3"));
    }

    #[test]
    fn regenerate_writes_aligned_index() {
        let dir = tempfile::tempdir().unwrap();
        let entries = vec![entry("a", None, None), entry("bb", Some("C"), None)];
        write_json_atomic(&dir.path().join(SEARCH_INDEX_FILE), &entries).unwrap();
        let embedder = LengthEmbedder { dim: 4, drop_last: false };

        let outcome = regenerate_version_embeddings(dir.path(), &embedder, false, true).unwrap();
        assert_eq!(outcome, EmbeddingOutcome::WouldGenerate);
        assert!(!dir.path().join(EMBEDDINGS_FILE).exists());

        let outcome = regenerate_version_embeddings(dir.path(), &embedder, false, false).unwrap();
        assert_eq!(outcome, EmbeddingOutcome::Generated { count: 2 });

        let index: EmbeddingIndex = read_json(&dir.path().join(EMBEDDINGS_FILE)).unwrap();
        assert_eq!(index.model, "test/length");
        assert_eq!(index.dim, 4);
        assert_eq!(index.count, entries.len());
        let vectors = index.vectors().unwrap();
        assert_eq!(vectors[1][1], 1.0);

        let outcome = regenerate_version_embeddings(dir.path(), &embedder, false, false).unwrap();
        assert_eq!(outcome, EmbeddingOutcome::UpToDate);
        let outcome = regenerate_version_embeddings(dir.path(), &embedder, true, false).unwrap();
        assert_eq!(outcome, EmbeddingOutcome::Generated { count: 2 });
    }

    #[test]
    fn count_mismatch_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        write_json_atomic(
            &dir.path().join(SEARCH_INDEX_FILE),
            &vec![entry("a", None, None), entry("b", None, None)],
        )
        .unwrap();
        let embedder = LengthEmbedder { dim: 2, drop_last: true };
        let err = regenerate_version_embeddings(dir.path(), &embedder, true, false).unwrap_err();
        assert!(err.to_string().contains("1 vectors for 2"));
        assert!(!dir.path().join(EMBEDDINGS_FILE).exists());
    }

    #[test]
    fn empty_search_index_gives_empty_payload() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SEARCH_INDEX_FILE), "[]").unwrap();
        let embedder = LengthEmbedder { dim: 384, drop_last: false };
        regenerate_version_embeddings(dir.path(), &embedder, false, false).unwrap();
        let index: EmbeddingIndex = read_json(&dir.path().join(EMBEDDINGS_FILE)).unwrap();
        assert_eq!(index, EmbeddingIndex::empty("test/length", 384));
        assert!(index.vectors().unwrap().is_empty());
    }

    #[test]
    fn missing_search_index_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = LengthEmbedder { dim: 2, drop_last: false };
        assert_eq!(
            regenerate_version_embeddings(dir.path(), &embedder, true, false).unwrap(),
            EmbeddingOutcome::NoSearchIndex
        );
    }
}
