//! Query-time ranking: hybrid semantic + lexical retrieval with graceful
//! degradation.

pub mod hybrid;

pub use hybrid::HybridRetriever;
