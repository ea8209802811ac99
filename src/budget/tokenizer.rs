//! Token counting
//!
//! Tokenizers are chosen by model name through a [`TokenizerRegistry`]. Models with no
//! registered tokenizer fall back to [`ApproximateTokenizer`], so counting never fails.

use std::sync::Arc;
use tracing::debug;

/// Splits text into tokens aligned to character boundaries.
///
/// Concatenating any prefix of `tokenize(text)` must yield a prefix of `text`; the
/// budgeter relies on this to truncate deterministically.
pub trait Tokenizer: Send + Sync {
    fn name(&self) -> &str;

    fn tokenize<'a>(&self, text: &'a str) -> Vec<&'a str>;

    fn count_tokens(&self, text: &str) -> usize {
        self.tokenize(text).len()
    }

    /// Keep the first `max_tokens` tokens of `text`
    fn truncate(&self, text: &str, max_tokens: usize) -> String {
        let pieces = self.tokenize(text);
        if pieces.len() <= max_tokens {
            return text.to_string();
        }
        pieces[..max_tokens].concat()
    }
}

/// Approximate tokenizer used when no exact tokenizer is registered.
///
/// Rules, applied left to right:
/// - a run of alphanumeric characters is cut into pieces of at most `max_piece_chars`;
/// - a whitespace run is one token, merged with the word piece that follows it;
/// - every other character (punctuation, symbols) is its own token.
///
/// English prose lands near four characters per token, close to common BPE
/// vocabularies. Tokenization is prefix-stable: re-tokenizing a truncated prefix gives
/// back exactly the kept tokens.
#[derive(Debug, Clone)]
pub struct ApproximateTokenizer {
    max_piece_chars: usize,
}

impl ApproximateTokenizer {
    pub const DEFAULT_PIECE_CHARS: usize = 4;

    pub fn new(max_piece_chars: usize) -> Self {
        Self {
            max_piece_chars: max_piece_chars.max(1),
        }
    }
}

impl Default for ApproximateTokenizer {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PIECE_CHARS)
    }
}

impl Tokenizer for ApproximateTokenizer {
    fn name(&self) -> &str {
        "approximate"
    }

    fn tokenize<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let mut pieces = Vec::with_capacity(text.len() / 3 + 1);
        let mut chars = text.char_indices().peekable();

        while let Some(&(start, c)) = chars.peek() {
            if c.is_whitespace() {
                while matches!(chars.peek(), Some(&(_, w)) if w.is_whitespace()) {
                    chars.next();
                }
            }

            let mut taken = 0;
            while taken < self.max_piece_chars {
                match chars.peek() {
                    Some(&(_, a)) if a.is_alphanumeric() => {
                        chars.next();
                        taken += 1;
                    }
                    _ => break,
                }
            }

            // Lone punctuation or symbol
            if taken == 0 && !c.is_whitespace() {
                chars.next();
            }

            let end = chars.peek().map(|&(i, _)| i).unwrap_or(text.len());
            pieces.push(&text[start..end]);
        }

        pieces
    }
}

/// Model-name prefix → tokenizer lookup with an approximate fallback
#[derive(Clone)]
pub struct TokenizerRegistry {
    entries: Vec<(String, Arc<dyn Tokenizer>)>,
    fallback: Arc<dyn Tokenizer>,
}

impl Default for TokenizerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenizerRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            fallback: Arc::new(ApproximateTokenizer::default()),
        }
    }

    /// Register a tokenizer for every model whose name starts with `model_prefix`.
    pub fn register(&mut self, model_prefix: impl Into<String>, tokenizer: Arc<dyn Tokenizer>) {
        self.entries.push((model_prefix.into(), tokenizer));
    }

    /// Longest matching prefix wins; unknown models get the fallback.
    pub fn for_model(&self, model: &str) -> Arc<dyn Tokenizer> {
        let matched = self
            .entries
            .iter()
            .filter(|(prefix, _)| model.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len());

        match matched {
            Some((_, tokenizer)) => Arc::clone(tokenizer),
            None => {
                debug!(
                    model,
                    fallback = self.fallback.name(),
                    "No exact tokenizer registered; using fallback"
                );
                Arc::clone(&self.fallback)
            }
        }
    }
}

impl std::fmt::Debug for TokenizerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefixes: Vec<&str> = self.entries.iter().map(|(p, _)| p.as_str()).collect();
        f.debug_struct("TokenizerRegistry")
            .field("prefixes", &prefixes)
            .field("fallback", &self.fallback.name())
            .finish()
    }
}
