//! # Diff Chunker
//!
//! Splits an oversized unified diff into ordered, budget-compliant chunks while
//! preserving coherent review context: file sections are the preferred boundary,
//! hunks the fallback, and a cut inside a hunk is never produced. A single hunk
//! that alone exceeds the budget is unreviewable and reported as such.

use crate::gateway::tokenizer::Tokenizer;
use thiserror::Error;

const FILE_HEADER_PREFIX: &str = "diff --git ";
const HUNK_HEADER_PREFIX: &str = "@@";

/// One budget-compliant slice of the diff, in original order.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffChunk {
    /// Position in the chunk sequence, 0-based.
    pub index: usize,
    pub content: String,
    /// Paths whose changes (whole or partial) are included in this chunk.
    pub files: Vec<String>,
    pub token_count: usize,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ChunkError {
    #[error("A single diff hunk in {path} spans {token_count} tokens, above the {budget}-token budget; it cannot be split coherently")]
    OversizedHunk {
        path: String,
        token_count: usize,
        budget: usize,
    },

    #[error("Chunk budget must be positive")]
    ZeroBudget,
}

/// A file's slice of the diff: the `diff --git` header block plus its hunks.
struct FileSection {
    path: String,
    header: String,
    hunks: Vec<String>,
}

/// Split `diff` into ordered chunks, each within `budget` tokens.
///
/// A diff already within budget yields exactly one chunk. Otherwise whole file
/// sections are packed greedily; a file section that alone exceeds the budget is
/// split at hunk boundaries with its header repeated per piece so every piece
/// stays a parseable diff fragment.
pub fn split_diff(
    diff: &str,
    budget: usize,
    tokenizer: &dyn Tokenizer,
) -> Result<Vec<DiffChunk>, ChunkError> {
    if budget == 0 {
        return Err(ChunkError::ZeroBudget);
    }

    let normalized = diff.replace("\r\n", "\n").replace('\r', "\n");

    if tokenizer.count_tokens(&normalized) <= budget {
        let token_count = tokenizer.count_tokens(&normalized);
        return Ok(vec![DiffChunk {
            index: 0,
            content: normalized.clone(),
            files: parse_sections(&normalized).into_iter().map(|s| s.path).collect(),
            token_count,
        }]);
    }

    let sections = parse_sections(&normalized);
    let mut builder = ChunkBuilder::new(budget, tokenizer);

    for section in sections {
        let section_text = section.full_text();
        if tokenizer.count_tokens(&section_text) <= budget {
            builder.push(&section_text, &section.path);
            continue;
        }

        // Oversized file: emit hunk groups, each re-prefixed with the file header.
        for piece in split_section_by_hunks(&section, budget, tokenizer)? {
            builder.push(&piece, &section.path);
        }
    }

    Ok(builder.finish())
}

impl FileSection {
    fn full_text(&self) -> String {
        let mut text = self.header.clone();
        for hunk in &self.hunks {
            text.push_str(hunk);
        }
        text
    }
}

/// Accumulates pieces into chunks greedily, flushing whenever the next piece would
/// cross the budget. Pieces arrive in diff order, so chunk order is diff order.
struct ChunkBuilder<'a> {
    budget: usize,
    tokenizer: &'a dyn Tokenizer,
    chunks: Vec<DiffChunk>,
    current: String,
    current_files: Vec<String>,
}

impl<'a> ChunkBuilder<'a> {
    fn new(budget: usize, tokenizer: &'a dyn Tokenizer) -> Self {
        Self {
            budget,
            tokenizer,
            chunks: Vec::new(),
            current: String::new(),
            current_files: Vec::new(),
        }
    }

    fn push(&mut self, piece: &str, path: &str) {
        if !self.current.is_empty() {
            let combined_tokens = self
                .tokenizer
                .count_tokens(&format!("{}{}", self.current, piece));
            if combined_tokens > self.budget {
                self.flush();
            }
        }
        self.current.push_str(piece);
        if !self.current_files.iter().any(|f| f == path) {
            self.current_files.push(path.to_string());
        }
    }

    fn flush(&mut self) {
        if self.current.is_empty() {
            return;
        }
        let content = std::mem::take(&mut self.current);
        let files = std::mem::take(&mut self.current_files);
        let token_count = self.tokenizer.count_tokens(&content);
        self.chunks.push(DiffChunk {
            index: self.chunks.len(),
            content,
            files,
            token_count,
        });
    }

    fn finish(mut self) -> Vec<DiffChunk> {
        self.flush();
        self.chunks
    }
}

fn split_section_by_hunks(
    section: &FileSection,
    budget: usize,
    tokenizer: &dyn Tokenizer,
) -> Result<Vec<String>, ChunkError> {
    let header_tokens = tokenizer.count_tokens(&section.header);
    let mut pieces = Vec::new();
    let mut current = String::new();

    for hunk in &section.hunks {
        let hunk_tokens = tokenizer.count_tokens(hunk);
        if header_tokens + hunk_tokens > budget {
            // The hunk itself does not fit even alone with its header.
            return Err(ChunkError::OversizedHunk {
                path: section.path.clone(),
                token_count: header_tokens + hunk_tokens,
                budget,
            });
        }

        if !current.is_empty() {
            let candidate_tokens =
                tokenizer.count_tokens(&format!("{}{}{}", section.header, current, hunk));
            if candidate_tokens > budget {
                pieces.push(format!("{}{}", section.header, current));
                current.clear();
            }
        }
        current.push_str(hunk);
    }

    if !current.is_empty() {
        pieces.push(format!("{}{}", section.header, current));
    }
    Ok(pieces)
}

/// Split a normalized diff into per-file sections. Content before the first
/// `diff --git` line (or a diff in another format entirely) becomes one section.
fn parse_sections(diff: &str) -> Vec<FileSection> {
    let mut sections: Vec<FileSection> = Vec::new();

    for line in diff.split_inclusive('\n') {
        if line.starts_with(FILE_HEADER_PREFIX) {
            sections.push(FileSection {
                path: parse_path(line),
                header: line.to_string(),
                hunks: Vec::new(),
            });
            continue;
        }

        if sections.is_empty() {
            sections.push(FileSection {
                path: String::new(),
                header: String::new(),
                hunks: vec![line.to_string()],
            });
            continue;
        }

        if let Some(section) = sections.last_mut() {
            if line.starts_with(HUNK_HEADER_PREFIX) {
                section.hunks.push(line.to_string());
            } else if let Some(hunk) = section.hunks.last_mut() {
                hunk.push_str(line);
            } else {
                // Extended header lines (index, ---, +++) ride with the header.
                section.header.push_str(line);
            }
        }
    }

    sections
}

/// `diff --git a/src/lib.rs b/src/lib.rs` -> `src/lib.rs`
fn parse_path(header_line: &str) -> String {
    header_line
        .split_whitespace()
        .rev()
        .next()
        .map(|p| p.trim_start_matches("b/").to_string())
        .unwrap_or_default()
}
