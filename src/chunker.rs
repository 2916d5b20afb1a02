//! Semantic text chunker.
//!
//! Chunking runs in two phases. A recursive structural split first walks a
//! separator hierarchy (paragraph, line, sentence, word, character) to
//! produce pieces bounded by the configured chunk size with a configured
//! character overlap between neighbors. A similarity merge then computes
//! TF-IDF vectors for the pieces and greedily absorbs later pieces into
//! earlier ones when their cosine similarity clears the merge threshold
//! and the combined size stays within the merge size factor.
//!
//! The merge is a single left-to-right greedy pass: a piece only merges
//! into an earlier, still-open accumulator, never the other way around.
//! If vectorization degenerates (empty vocabulary), the unmerged
//! structural pieces are returned instead of an error.

use std::collections::HashMap;

use tracing::warn;

use crate::config::ChunkingConfig;

/// Separator hierarchy for the structural split, coarsest first. The
/// final empty separator falls back to per-character splitting.
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "! ", "? ", " ", ""];

/// Vocabulary cap for the merge-phase TF-IDF vectors.
const MAX_VOCABULARY: usize = 1000;

/// A chunk of page text ready for embedding, with its position metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub content: String,
    /// Zero-based ordinal within the page.
    pub index: usize,
    /// Character length of `content`.
    pub size: usize,
    /// Total number of chunks produced for the page.
    pub total: usize,
}

/// Two-phase chunker configured with size, overlap, and merge thresholds.
#[derive(Debug, Clone)]
pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    merge_threshold: f64,
    merge_size_factor: f64,
}

impl TextChunker {
    pub fn new(config: &ChunkingConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            chunk_overlap: config.chunk_overlap,
            merge_threshold: config.merge_similarity_threshold,
            merge_size_factor: config.merge_size_factor,
        }
    }

    /// Split `text` into retrieval-sized chunks with similar neighbors
    /// merged. Empty input yields no chunks; input that survives the
    /// structural split as a single piece is returned unchanged.
    pub fn chunk(&self, text: &str) -> Vec<TextChunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let pieces = self.split_text(text);

        let merged = if pieces.len() <= 1 {
            vec![text.to_string()]
        } else {
            self.merge_similar(pieces)
        };

        let total = merged.len();
        merged
            .into_iter()
            .enumerate()
            .map(|(index, content)| TextChunk {
                size: content.chars().count(),
                content,
                index,
                total,
            })
            .collect()
    }

    // ============ Phase 1: structural split ============

    /// Recursive separator-hierarchy split bounded by `chunk_size` with
    /// `chunk_overlap` characters carried between adjacent pieces.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, SEPARATORS)
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        // Pick the first separator that actually occurs; the empty
        // separator always matches and splits per character.
        let mut separator = *separators.last().unwrap_or(&"");
        let mut remaining: &[&str] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() || text.contains(sep) {
                separator = sep;
                remaining = &separators[i + 1..];
                break;
            }
        }

        let splits: Vec<String> = if separator.is_empty() {
            text.chars().map(|c| c.to_string()).collect()
        } else {
            text.split(separator)
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect()
        };

        let mut final_pieces = Vec::new();
        let mut goods: Vec<String> = Vec::new();

        for piece in splits {
            if piece.chars().count() <= self.chunk_size {
                goods.push(piece);
            } else {
                if !goods.is_empty() {
                    final_pieces.extend(self.merge_splits(&goods, separator));
                    goods.clear();
                }
                if remaining.is_empty() {
                    final_pieces.push(piece);
                } else {
                    final_pieces.extend(self.split_recursive(&piece, remaining));
                }
            }
        }

        if !goods.is_empty() {
            final_pieces.extend(self.merge_splits(&goods, separator));
        }

        final_pieces
    }

    /// Pack consecutive splits into pieces close to `chunk_size`, keeping
    /// a sliding overlap window at each boundary.
    fn merge_splits(&self, splits: &[String], separator: &str) -> Vec<String> {
        let sep_len = separator.chars().count();
        let mut pieces = Vec::new();
        let mut window: Vec<&str> = Vec::new();
        let mut total = 0usize;

        for split in splits {
            let len = split.chars().count();
            let extra = if window.is_empty() { 0 } else { sep_len };

            if total + len + extra > self.chunk_size && !window.is_empty() {
                let joined = window.join(separator).trim().to_string();
                if !joined.is_empty() {
                    pieces.push(joined);
                }

                // Slide the window forward until the overlap budget fits
                // the incoming split.
                while total > self.chunk_overlap
                    || (total + len + if window.is_empty() { 0 } else { sep_len }
                        > self.chunk_size
                        && total > 0)
                {
                    let head_len = window[0].chars().count();
                    total -= head_len + if window.len() > 1 { sep_len } else { 0 };
                    window.remove(0);
                    if window.is_empty() {
                        break;
                    }
                }
            }

            total += len + if window.is_empty() { 0 } else { sep_len };
            window.push(split);
        }

        let joined = window.join(separator).trim().to_string();
        if !joined.is_empty() {
            pieces.push(joined);
        }

        pieces
    }

    // ============ Phase 2: similarity merge ============

    /// Greedy single-pass merge of similar pieces. Order-dependent on
    /// purpose: an accumulator opened at piece `i` absorbs any later
    /// unconsumed piece `j` whose similarity to `i` exceeds the threshold
    /// and whose addition keeps the accumulator within
    /// `chunk_size * merge_size_factor` characters.
    fn merge_similar(&self, pieces: Vec<String>) -> Vec<String> {
        if pieces.len() <= 1 {
            return pieces;
        }

        let vectors = match tfidf_vectors(&pieces, MAX_VOCABULARY) {
            Some(v) => v,
            None => {
                warn!("semantic merge skipped: degenerate vocabulary, keeping structural pieces");
                return pieces;
            }
        };

        let max_len = (self.chunk_size as f64 * self.merge_size_factor) as usize;
        let n = pieces.len();
        let mut consumed = vec![false; n];
        let mut merged = Vec::new();

        for i in 0..n {
            if consumed[i] {
                continue;
            }
            consumed[i] = true;
            let mut current = pieces[i].clone();

            for j in (i + 1)..n {
                if consumed[j] {
                    continue;
                }
                let similarity = cosine_f64(&vectors[i], &vectors[j]);
                if similarity > self.merge_threshold {
                    let candidate_len = current.chars().count() + pieces[j].chars().count();
                    if candidate_len <= max_len {
                        current.push_str("\n\n");
                        current.push_str(&pieces[j]);
                        consumed[j] = true;
                    }
                }
            }

            merged.push(current);
        }

        merged
    }
}

// ============ Keyword extraction ============

/// Top TF-IDF unigrams and bigrams of a single text, highest score
/// first, limited to `max_keywords` terms with nonzero score. Returns an
/// empty list instead of erroring when the text yields no vocabulary.
pub fn extract_keywords(text: &str, max_keywords: usize) -> Vec<String> {
    if max_keywords == 0 {
        return Vec::new();
    }

    let tokens = tokenize(text);
    if tokens.is_empty() {
        return Vec::new();
    }

    let mut counts: HashMap<String, usize> = HashMap::new();
    for token in &tokens {
        *counts.entry(token.clone()).or_default() += 1;
    }
    for pair in tokens.windows(2) {
        *counts.entry(format!("{} {}", pair[0], pair[1])).or_default() += 1;
    }

    // Single-document corpus: idf is uniform, so frequency ranks terms.
    let mut vocab: Vec<(String, usize)> = counts.into_iter().collect();
    vocab.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    vocab.truncate(max_keywords);
    vocab
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .map(|(term, _)| term)
        .collect()
}

// ============ TF-IDF internals ============

/// English stop words excluded from TF-IDF vocabularies.
const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any", "are",
    "as", "at", "be", "because", "been", "before", "being", "below", "between", "both", "but",
    "by", "can", "cannot", "could", "did", "do", "does", "doing", "down", "during", "each",
    "few", "for", "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers",
    "herself", "him", "himself", "his", "how", "i", "if", "in", "into", "is", "it", "its",
    "itself", "just", "me", "more", "most", "my", "myself", "no", "nor", "not", "now", "of",
    "off", "on", "once", "only", "or", "other", "our", "ours", "ourselves", "out", "over",
    "own", "same", "she", "should", "so", "some", "such", "than", "that", "the", "their",
    "theirs", "them", "themselves", "then", "there", "these", "they", "this", "those",
    "through", "to", "too", "under", "until", "up", "very", "was", "we", "were", "what",
    "when", "where", "which", "while", "who", "whom", "why", "will", "with", "would", "you",
    "your", "yours", "yourself", "yourselves",
];

fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.binary_search(&token).is_ok()
}

/// Lowercased alphanumeric tokens of length >= 2, stop words removed.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2 && !is_stop_word(t))
        .map(|t| t.to_string())
        .collect()
}

/// TF-IDF vectors (smoothed idf, L2-normalized) for a set of documents,
/// with the vocabulary capped to the `max_features` most frequent terms.
/// Returns `None` when no document contributes any term.
fn tfidf_vectors(docs: &[String], max_features: usize) -> Option<Vec<Vec<f64>>> {
    let tokenized: Vec<Vec<String>> = docs.iter().map(|d| tokenize(d)).collect();

    let mut corpus_counts: HashMap<&str, usize> = HashMap::new();
    for tokens in &tokenized {
        for token in tokens {
            *corpus_counts.entry(token.as_str()).or_default() += 1;
        }
    }
    if corpus_counts.is_empty() {
        return None;
    }

    let mut vocab: Vec<(&str, usize)> = corpus_counts.into_iter().collect();
    vocab.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    vocab.truncate(max_features);
    let term_index: HashMap<&str, usize> = vocab
        .iter()
        .enumerate()
        .map(|(i, (term, _))| (*term, i))
        .collect();

    // Document frequency per vocabulary term.
    let mut df = vec![0usize; term_index.len()];
    for tokens in &tokenized {
        let mut seen = vec![false; term_index.len()];
        for token in tokens {
            if let Some(&idx) = term_index.get(token.as_str()) {
                if !seen[idx] {
                    seen[idx] = true;
                    df[idx] += 1;
                }
            }
        }
    }

    let n_docs = docs.len() as f64;
    let idf: Vec<f64> = df
        .iter()
        .map(|&d| ((1.0 + n_docs) / (1.0 + d as f64)).ln() + 1.0)
        .collect();

    let mut vectors = Vec::with_capacity(docs.len());
    for tokens in &tokenized {
        let mut vec = vec![0.0f64; term_index.len()];
        for token in tokens {
            if let Some(&idx) = term_index.get(token.as_str()) {
                vec[idx] += 1.0;
            }
        }
        for (i, weight) in vec.iter_mut().enumerate() {
            *weight *= idf[i];
        }
        let norm: f64 = vec.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > f64::EPSILON {
            for v in &mut vec {
                *v /= norm;
            }
        }
        vectors.push(vec);
    }

    Some(vectors)
}

fn cosine_f64(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|v| v * v).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|v| v * v).sum::<f64>().sqrt();
    let denom = norm_a * norm_b;
    if denom < f64::EPSILON {
        return 0.0;
    }
    dot / denom
}
