//! Content normalization: cleaning, chunking, and quality filtering.
//!
//! The write path starts here. Raw extracted text (PDF dumps, pasted
//! documents) is cleaned by an ordered pipeline of pure transforms, split
//! into overlapping retrieval-sized windows, flattened for storage and
//! embedding, and finally screened by quality heuristics so near-empty or
//! non-prose spans never reach the store.
//!
//! All functions in this module are synchronous and pure; suspension points
//! live exclusively in the I/O-bound ingestion stages.

pub mod chunk;
pub mod clean;
pub mod filter;

pub use chunk::{clean_chunk_text, split_into_windows};
pub use clean::clean_raw_text;
pub use filter::{ChunkRejection, is_valid_chunk, validate_chunk};
