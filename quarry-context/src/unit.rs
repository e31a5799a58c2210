//! Data model shared by the loader and the chunker.
//!
//! A [`TextUnit`] is one page, paragraph or whole file of normalized text as
//! produced by a document loader. A [`Chunk`] is a bounded slice of a unit,
//! sized for an embedding model. Chunks own a copy of their text and only a
//! back-reference (`source`, `locator`) to the unit they came from.

use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Normalized text extracted from one page, paragraph or file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextUnit {
    /// Extracted text.
    pub content: String,
    /// Name of the document the text came from.
    pub source: String,
    /// 1-based page or paragraph number, `None` for whole-file units.
    pub locator: Option<u32>,
}

impl TextUnit {
    pub fn new(content: impl Into<String>, source: impl Into<String>, locator: Option<u32>) -> Self {
        Self {
            content: content.into(),
            source: source.into(),
            locator,
        }
    }

    /// Returns true when the unit has nothing but whitespace.
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }
}

/// A slice of a [`TextUnit`] prepared for embedding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// The text of this chunk.
    pub content: String,
    /// Name of the originating document.
    pub source: String,
    /// Page or paragraph of the originating unit.
    pub locator: Option<u32>,
    /// Position of this chunk within its unit (0-indexed).
    pub chunk_index: usize,
    /// Byte range of `content` inside the unit's text.
    pub span: Range<usize>,
}

impl Chunk {
    /// Number of characters in the chunk.
    pub fn char_count(&self) -> usize {
        self.content.chars().count()
    }

    /// Human readable provenance, e.g. `report.pdf#3` or `notes.txt`.
    pub fn provenance(&self) -> String {
        match self.locator {
            Some(locator) => format!("{}#{}", self.source, locator),
            None => self.source.clone(),
        }
    }
}
