//! # quarry-context
//!
//! Text units, chunks and the splitter that turns one into the other.
//!
//! Document loaders produce [`TextUnit`]s (a page, a paragraph or a whole
//! file). The [`TextSplitter`] cuts each unit into overlapping [`Chunk`]s no
//! longer than `chunk_size` characters, preferring paragraph, line, sentence
//! and word boundaries in that order. Every chunk keeps the unit's `source`
//! and `locator` so retrieval results can be traced back to a page.

pub mod error;
pub mod text;
pub mod unit;

pub use error::{ChunkError, Result};
pub use text::{
    ChunkerConfig, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, DEFAULT_DELIMITERS, TextSplitter,
    split,
};
pub use unit::{Chunk, TextUnit};
