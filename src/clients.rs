//! Bundles every pluggable adapter into one struct, constructed once at
//! process entry and threaded through the pipelines — replaces the
//! original's scattered module-level client singletons with a single
//! piece of explicit context.

use crate::embed::Embedder;
use crate::llm::Extractor;
use crate::rerank::Reranker;
use crate::vector_store::VectorStore;

pub struct Clients {
    pub embedder: Box<dyn Embedder>,
    pub reranker: Box<dyn Reranker>,
    pub extractor: Box<dyn Extractor>,
    pub vector_store: Box<dyn VectorStore>,
}
