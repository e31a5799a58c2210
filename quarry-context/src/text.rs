//! Splitting normalized text units into overlapping chunks for embedding.
//!
//! The splitter works in two passes:
//!
//! 1.  **Recursive segmentation.** The text is cut at the most significant
//!     delimiter first (paragraph breaks), and any piece that is still longer
//!     than `chunk_size` is cut again with the next delimiter (line breaks,
//!     sentence ends, whitespace). Once the delimiters are exhausted the piece
//!     is hard cut on character boundaries. Delimiters stay attached to the
//!     text in front of them, so the segments are contiguous and cover the
//!     whole input.
//! 2.  **Greedy merge with overlap.** Segments are packed into a sliding
//!     window until the next one would overflow `chunk_size`. The window is
//!     emitted as a chunk, then trimmed from the front until at most
//!     `chunk_overlap` characters remain, and those carry over into the next
//!     chunk. A lone segment longer than the overlap is cut again with the
//!     finer delimiters first, so a tail of long sentences still carries
//!     over word by word.
//!
//! Sizes are counted in characters, not bytes. Both passes are deterministic.
//!
//! ```
//! use quarry_context::{ChunkerConfig, TextSplitter, TextUnit};
//!
//! let splitter = TextSplitter::new(ChunkerConfig::new(40, 10)?)?;
//! let unit = TextUnit::new(
//!     "First paragraph here.\n\nSecond paragraph, a little longer than the first.",
//!     "notes.txt",
//!     None,
//! );
//!
//! let chunks = splitter.split_unit(&unit);
//! assert!(chunks.len() > 1);
//! assert!(chunks.iter().all(|c| c.char_count() <= 40));
//! assert!(chunks[0].content.starts_with("First paragraph here."));
//! # Ok::<(), quarry_context::ChunkError>(())
//! ```

use crate::error::{ChunkError, Result};
use crate::unit::{Chunk, TextUnit};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::ops::Range;

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Default overlap between consecutive chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Delimiters for prose, ordered from most to least significant.
///
/// - `\n[ \t]*\n\s*`: paragraph breaks (blank lines)
/// - `\n`: line breaks
/// - `[.!?]+["')\]]*\s+`: sentence ends followed by whitespace
/// - `\s+`: any whitespace run
pub const DEFAULT_DELIMITERS: &[&str] = &[
    r"\n[ \t]*\n\s*",
    r"\n",
    r#"[.!?]+["')\]]*\s+"#,
    r"\s+",
];

/// Chunk size and overlap, both in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkerConfig {
    /// Creates a validated configuration.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        let config = Self {
            chunk_size,
            chunk_overlap,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks `0 < chunk_size` and `chunk_overlap < chunk_size`.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(ChunkError::invalid_config("chunk_size must be greater than 0"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ChunkError::invalid_config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Recursive, overlap-aware text splitter.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    config: ChunkerConfig,
    delimiters: Vec<Regex>,
}

/// A contiguous piece of the input no longer than `chunk_size` characters.
///
/// `depth` is the index of the first delimiter not yet applied to it.
#[derive(Debug, Clone)]
struct Segment {
    range: Range<usize>,
    chars: usize,
    depth: usize,
}

impl TextSplitter {
    /// Creates a splitter with [`DEFAULT_DELIMITERS`].
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        Self::with_delimiters(config, DEFAULT_DELIMITERS)
    }

    /// Creates a splitter with custom delimiter patterns, most significant first.
    ///
    /// The configuration is validated before any pattern is compiled.
    pub fn with_delimiters<S: AsRef<str>>(config: ChunkerConfig, patterns: &[S]) -> Result<Self> {
        config.validate()?;
        let delimiters = patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern.as_ref()).map_err(|source| ChunkError::InvalidDelimiter {
                    pattern: pattern.as_ref().to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { config, delimiters })
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Splits a batch of units, keeping their order.
    pub fn split(&self, units: &[TextUnit]) -> Vec<Chunk> {
        let chunks: Vec<Chunk> = units.iter().flat_map(|unit| self.split_unit(unit)).collect();
        tracing::debug!(
            "Split {} units into {} chunks (size {}, overlap {})",
            units.len(),
            chunks.len(),
            self.config.chunk_size,
            self.config.chunk_overlap
        );
        chunks
    }

    /// Splits one unit. `chunk_index` starts at 0 for every unit.
    pub fn split_unit(&self, unit: &TextUnit) -> Vec<Chunk> {
        if unit.is_blank() {
            return Vec::new();
        }

        self.chunk_spans(&unit.content)
            .into_iter()
            .enumerate()
            .map(|(chunk_index, span)| Chunk {
                content: unit.content[span.clone()].to_string(),
                source: unit.source.clone(),
                locator: unit.locator,
                chunk_index,
                span,
            })
            .collect()
    }

    /// Returns the byte ranges of the chunks `text` would be split into.
    pub fn chunk_spans(&self, text: &str) -> Vec<Range<usize>> {
        let mut segments = Vec::new();
        self.split_recursively_into_segments(text, 0, 0, &mut segments);
        self.merge_segments(text, segments)
    }

    fn merge_segments(&self, text: &str, segments: Vec<Segment>) -> Vec<Range<usize>> {
        let size = self.config.chunk_size;
        let overlap = self.config.chunk_overlap;

        let mut spans = Vec::new();
        let mut window: VecDeque<Segment> = VecDeque::new();
        let mut window_chars = 0;

        for segment in segments {
            if window_chars + segment.chars > size {
                if let (Some(first), Some(last)) = (window.front(), window.back()) {
                    spans.push(first.range.start..last.range.end);
                }
                // Keep at most `overlap` characters, and only as many as still
                // leave room for the incoming segment.
                while window_chars > overlap
                    || (window_chars > 0 && window_chars + segment.chars > size)
                {
                    if overlap > 0 && window.len() == 1 {
                        let pieces = self.refine(text, &window[0]);
                        if pieces.len() > 1 {
                            window = pieces.into();
                            continue;
                        }
                    }
                    match window.pop_front() {
                        Some(dropped) => window_chars -= dropped.chars,
                        None => break,
                    }
                }
            }
            window_chars += segment.chars;
            window.push_back(segment);
        }

        if let (Some(first), Some(last)) = (window.front(), window.back()) {
            spans.push(first.range.start..last.range.end);
        }

        spans
    }

    // Pieces that fit are emitted as-is; the rest are cut at the current
    // delimiter and recursed into with the next one.
    fn split_recursively_into_segments(
        &self,
        text: &str,
        delimiter_idx: usize,
        offset: usize,
        out: &mut Vec<Segment>,
    ) {
        if text.is_empty() {
            return;
        }

        let chars = text.chars().count();
        if chars <= self.config.chunk_size {
            out.push(Segment {
                range: offset..offset + text.len(),
                chars,
                depth: delimiter_idx,
            });
            return;
        }

        let Some(delimiter) = self.delimiters.get(delimiter_idx) else {
            self.hard_cut(text, offset, out);
            return;
        };

        for piece in delimited_pieces(delimiter, text) {
            self.split_recursively_into_segments(
                &text[piece.clone()],
                delimiter_idx + 1,
                offset + piece.start,
                out,
            );
        }
    }

    /// Cuts a segment with the next delimiter that divides it. Text that no
    /// delimiter matches at all falls back to single characters; a word is
    /// never cut.
    fn refine(&self, text: &str, segment: &Segment) -> Vec<Segment> {
        let piece = &text[segment.range.clone()];
        let offset = segment.range.start;

        for (idx, delimiter) in self.delimiters.iter().enumerate().skip(segment.depth) {
            let ranges = delimited_pieces(delimiter, piece);
            if ranges.len() > 1 {
                return ranges
                    .into_iter()
                    .map(|r| Segment {
                        chars: piece[r.clone()].chars().count(),
                        range: offset + r.start..offset + r.end,
                        depth: idx + 1,
                    })
                    .collect();
            }
        }

        if self.delimiters.iter().any(|delimiter| delimiter.is_match(piece)) {
            return vec![segment.clone()];
        }
        piece
            .char_indices()
            .map(|(idx, c)| Segment {
                range: offset + idx..offset + idx + c.len_utf8(),
                chars: 1,
                depth: self.delimiters.len(),
            })
            .collect()
    }

    fn hard_cut(&self, text: &str, offset: usize, out: &mut Vec<Segment>) {
        let size = self.config.chunk_size;
        let mut start = 0;
        let mut chars = 0;

        for (idx, _) in text.char_indices() {
            if chars == size {
                out.push(Segment {
                    range: offset + start..offset + idx,
                    chars,
                    depth: self.delimiters.len(),
                });
                start = idx;
                chars = 0;
            }
            chars += 1;
        }

        if start < text.len() {
            out.push(Segment {
                range: offset + start..offset + text.len(),
                chars,
                depth: self.delimiters.len(),
            });
        }
    }
}

/// Byte ranges of `text` cut after every match of `delimiter`.
fn delimited_pieces(delimiter: &Regex, text: &str) -> Vec<Range<usize>> {
    let mut pieces = Vec::new();
    let mut start = 0;
    for mat in delimiter.find_iter(text) {
        if mat.end() <= start {
            continue;
        }
        pieces.push(start..mat.end());
        start = mat.end();
    }
    if start < text.len() {
        pieces.push(start..text.len());
    }
    pieces
}

/// Validates `config` and splits `units` with the default delimiters.
pub fn split(units: &[TextUnit], config: &ChunkerConfig) -> Result<Vec<Chunk>> {
    Ok(TextSplitter::new(*config)?.split(units))
}
