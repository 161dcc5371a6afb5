//! Chunk-size heuristics and document splitting strategies.
//!
//! - Budget: pages-per-chunk grows with the document's page count, multiplied by an assumed
//!   characters-per-page figure and capped at an absolute ceiling.
//! - Fixed-size chunking slides a window of that budget with a 15% overlap, so text around a
//!   boundary is seen by two analyses.
//! - Boundary strategies (resume, paper, table, Q&A, contract, manual) split on detected headers
//!   once the current buffer is substantial, and force a flush when it outgrows the budget.
//!
//! All lengths are counted in Unicode scalar values.

use std::sync::LazyLock;

use regex::Regex;

use super::settings::ChunkingSettings;
use super::types::{Chunk, ChunkStrategy, DocType};

const TABLE_ROWS_PER_CHUNK: usize = 100;
const TABLE_HEADER_SCAN_LINES: usize = 10;

/// Pages of text packed into one chunk for a document of `total_pages`.
pub fn pages_per_chunk(total_pages: usize) -> usize {
    match total_pages {
        0..=50 => 15,
        51..=100 => 20,
        101..=500 => 25,
        _ => 30,
    }
}

/// Character budget of one chunk.
pub fn chunk_budget(total_pages: usize, settings: &ChunkingSettings) -> usize {
    (pages_per_chunk(total_pages) * settings.chars_per_page)
        .min(settings.max_chunk_chars)
        .max(1)
}

/// Overlap between adjacent fixed-size chunks; always leaves the window room to advance.
pub fn overlap_for(budget: usize, settings: &ChunkingSettings) -> usize {
    (budget * settings.overlap_percent / 100).min(budget.saturating_sub(1))
}

/// Split `content` into overlapping fixed-size chunks sized for `total_pages`.
///
/// Produces no chunks for empty content and exactly one chunk when the content fits the budget.
pub fn create_chunks(content: &str, total_pages: usize, settings: &ChunkingSettings) -> Vec<Chunk> {
    let budget = chunk_budget(total_pages, settings);
    fixed_size_chunks(content, budget, overlap_for(budget, settings))
}

/// Split `text` with the strategy matching `doc_type`.
pub fn chunk_document(
    text: &str,
    total_pages: usize,
    doc_type: DocType,
    settings: &ChunkingSettings,
) -> Vec<Chunk> {
    let max_chars = chunk_budget(total_pages, settings);
    let chunks = match doc_type {
        DocType::General => create_chunks(text, total_pages, settings),
        DocType::Resume => boundary_chunks(text, max_chars, &RESUME_RULE),
        DocType::Paper => boundary_chunks(text, max_chars, &PAPER_RULE),
        DocType::Qa => boundary_chunks(text, max_chars, &QA_RULE),
        DocType::Contract => boundary_chunks(text, max_chars, &CONTRACT_RULE),
        DocType::Manual => boundary_chunks(text, max_chars, &MANUAL_RULE),
        DocType::Table => table_chunks(text, max_chars),
    };
    tracing::debug!(
        doc_type = %doc_type,
        chunks = chunks.len(),
        max_chars,
        "Document chunked"
    );
    chunks
}

fn fixed_size_chunks(content: &str, budget: usize, overlap: usize) -> Vec<Chunk> {
    let offsets: Vec<usize> = content
        .char_indices()
        .map(|(offset, _)| offset)
        .chain(std::iter::once(content.len()))
        .collect();
    let char_len = offsets.len() - 1;
    let step = budget - overlap;

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < char_len {
        let end = (start + budget).min(char_len);
        chunks.push(Chunk {
            index: chunks.len(),
            strategy: ChunkStrategy::FixedSize,
            text: content[offsets[start]..offsets[end]].to_string(),
            span: start..end,
            context_header: None,
        });
        if end == char_len {
            break;
        }
        start += step;
    }
    chunks
}

struct BoundaryRule {
    strategy: ChunkStrategy,
    /// Buffer length a header must exceed before it may open a new chunk.
    min_chars: usize,
    /// Match against the trimmed line instead of the raw one.
    trim_line: bool,
    patterns: &'static LazyLock<Vec<Regex>>,
}

impl BoundaryRule {
    fn is_boundary(&self, line: &str) -> bool {
        let candidate = if self.trim_line { line.trim() } else { line };
        self.patterns.iter().any(|pattern| pattern.is_match(candidate))
    }
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|pattern| Regex::new(pattern).expect("static chunking pattern is valid"))
        .collect()
}

static RESUME_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?i)experience|experiência|trabalho|professional",
        r"(?i)education|educação|formação|academic",
        r"(?i)skills|habilidades|competências|technical",
        r"(?i)projects|projetos|portfolio",
        r"(?i)certifications|certificações|cursos",
    ])
});

static PAPER_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?i)abstract|resumo",
        r"(?i)introduction|introdução",
        r"(?i)methodology|methods|métodos|metodologia",
        r"(?i)results|resultados",
        r"(?i)discussion|discussão",
        r"(?i)conclusion|conclusão",
        r"(?i)references|referências|bibliografia",
    ])
});

static QA_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[r"^\d+\.\s", r"(?i)^Q\d*[:.]?\s", r"(?i)^pergunta", r"^\?\s"])
});

static CONTRACT_PATTERNS: LazyLock<Vec<Regex>> =
    LazyLock::new(|| compile(&[r"^(\d+\.)+\s"]));

static MANUAL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?i)^chapter|capítulo",
        r"(?i)^step|passo|etapa",
        r"^\d+\.",
        r"(?i)^section|seção",
    ])
});

static RESUME_RULE: BoundaryRule = BoundaryRule {
    strategy: ChunkStrategy::ResumeSection,
    min_chars: 1000,
    trim_line: false,
    patterns: &RESUME_PATTERNS,
};

static PAPER_RULE: BoundaryRule = BoundaryRule {
    strategy: ChunkStrategy::PaperSection,
    min_chars: 2000,
    trim_line: false,
    patterns: &PAPER_PATTERNS,
};

static QA_RULE: BoundaryRule = BoundaryRule {
    strategy: ChunkStrategy::QaPair,
    min_chars: 500,
    trim_line: true,
    patterns: &QA_PATTERNS,
};

static CONTRACT_RULE: BoundaryRule = BoundaryRule {
    strategy: ChunkStrategy::ContractClause,
    min_chars: 1500,
    trim_line: true,
    patterns: &CONTRACT_PATTERNS,
};

static MANUAL_RULE: BoundaryRule = BoundaryRule {
    strategy: ChunkStrategy::ManualSection,
    min_chars: 2000,
    trim_line: true,
    patterns: &MANUAL_PATTERNS,
};

/// Line accumulator that tracks character spans while building chunks.
struct ChunkBuilder {
    strategy: ChunkStrategy,
    chunks: Vec<Chunk>,
    buffer: String,
    buffer_chars: usize,
    buffer_lines: usize,
    buffer_start: usize,
    cursor: usize,
}

impl ChunkBuilder {
    fn new(strategy: ChunkStrategy) -> Self {
        Self {
            strategy,
            chunks: Vec::new(),
            buffer: String::new(),
            buffer_chars: 0,
            buffer_lines: 0,
            buffer_start: 0,
            cursor: 0,
        }
    }

    /// Length of the buffer counting one newline per line.
    fn len_chars(&self) -> usize {
        self.buffer_chars
    }

    fn push_line(&mut self, line: &str) {
        if self.buffer_lines == 0 {
            self.buffer_start = self.cursor;
        } else {
            self.buffer.push('\n');
        }
        let line_chars = line.chars().count();
        self.buffer.push_str(line);
        self.buffer_chars += line_chars + 1;
        self.buffer_lines += 1;
        self.cursor += line_chars + 1;
    }

    fn flush(&mut self) {
        if self.buffer_lines == 0 {
            return;
        }
        let text = std::mem::take(&mut self.buffer);
        if !text.trim().is_empty() {
            self.chunks.push(Chunk {
                index: self.chunks.len(),
                strategy: self.strategy,
                text,
                span: self.buffer_start..self.cursor - 1,
                context_header: None,
            });
        }
        self.buffer_chars = 0;
        self.buffer_lines = 0;
    }

    fn finish(mut self) -> Vec<Chunk> {
        self.flush();
        self.chunks
    }
}

fn boundary_chunks(content: &str, max_chars: usize, rule: &BoundaryRule) -> Vec<Chunk> {
    let mut builder = ChunkBuilder::new(rule.strategy);
    for line in content.split('\n') {
        if rule.is_boundary(line) && builder.len_chars() > rule.min_chars {
            builder.flush();
            builder.push_line(line);
        } else {
            builder.push_line(line);
            if builder.len_chars() > max_chars {
                builder.flush();
            }
        }
    }
    builder.finish()
}

/// Group table rows; the detected header travels with later row groups as context.
fn table_chunks(content: &str, max_chars: usize) -> Vec<Chunk> {
    let mut header: Option<(usize, String)> = None;
    let mut offset = 0;
    for line in content.split('\n').take(TABLE_HEADER_SCAN_LINES) {
        if line.contains('|') || line.contains('\t') {
            header = Some((offset, line.to_string()));
            break;
        }
        offset += line.chars().count() + 1;
    }

    let mut builder = ChunkBuilder::new(ChunkStrategy::TableRows);
    for line in content.split('\n') {
        builder.push_line(line);
        if builder.buffer_lines >= TABLE_ROWS_PER_CHUNK || builder.len_chars() > max_chars {
            builder.flush();
        }
    }

    let mut chunks = builder.finish();
    if let Some((header_offset, header_line)) = header {
        for chunk in chunks.iter_mut().filter(|chunk| chunk.span.start > header_offset) {
            chunk.context_header = Some(header_line.clone());
        }
    }
    chunks
}
