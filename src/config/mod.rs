//! Corpus configuration: package table, categories, collaborator settings.

pub mod defaults;
pub mod schema;

pub use defaults::CONFIG_FILE;
pub use schema::{
    CategoryDef, DocsConfig, EmbeddingConfig, ExampleCategory, ExecutionConfig, ExtractorConfig,
    GitConfig, PackageConfig,
};
