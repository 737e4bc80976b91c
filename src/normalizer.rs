//! Ingredient declaration normalization for downstream categorization.

use crate::controls::AssessmentControls;
use crc32fast::Hasher as Crc32;
use std::fmt;

/// Ordered, deduplicated, bounded ingredient list plus its cache-key hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedIngredients {
    /// Ingredient names with display casing preserved, first-seen order.
    pub names: Vec<String>,
    /// Hex CRC32 over the lower-cased, sorted names; stable under reordering
    /// and casing differences in the source text.
    pub content_hash: String,
    /// True when the raw text exceeded the configured length cap.
    pub truncated: bool,
}

/// Errors surfaced while normalizing an ingredient declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    /// The declaration was empty or contained no usable ingredient names.
    EmptyInput,
}

impl fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyInput => write!(f, "ingredient declaration contains no ingredients"),
        }
    }
}

impl std::error::Error for NormalizeError {}

/// Stateless ingredient-text normalization service.
#[derive(Debug, Clone)]
pub struct Normalizer {
    max_ingredients: usize,
    max_text_chars: usize,
}

impl Normalizer {
    /// Builds a normalizer bounded by the provided controls.
    pub fn new(controls: &AssessmentControls) -> Self {
        Self {
            max_ingredients: controls.max_ingredients.max(1),
            max_text_chars: controls.max_text_chars.max(1),
        }
    }

    /// Parses free-text ingredient declarations into a canonical list.
    pub fn normalize(&self, raw: &str) -> Result<NormalizedIngredients, NormalizeError> {
        let (text, truncated) = truncate_chars(raw, self.max_text_chars);

        let mut names: Vec<String> = Vec::new();
        let mut seen: Vec<String> = Vec::new();
        for fragment in split_declaration(text) {
            let cleaned = clean_fragment(fragment);
            if cleaned.is_empty() || is_noise(&cleaned) {
                continue;
            }
            let folded = cleaned.to_lowercase();
            if seen.contains(&folded) {
                continue;
            }
            seen.push(folded);
            names.push(cleaned);
            if names.len() >= self.max_ingredients {
                break;
            }
        }

        if names.is_empty() {
            return Err(NormalizeError::EmptyInput);
        }

        let content_hash = content_hash(&names);
        Ok(NormalizedIngredients {
            names,
            content_hash,
            truncated,
        })
    }
}

/// CRC32 of the lower-cased, sorted, newline-joined names, hex-formatted.
fn content_hash(names: &[String]) -> String {
    let mut sorted: Vec<String> = names.iter().map(|n| n.to_lowercase()).collect();
    sorted.sort();
    let mut hasher = Crc32::new();
    for (idx, name) in sorted.iter().enumerate() {
        if idx > 0 {
            hasher.update(b"\n");
        }
        hasher.update(name.as_bytes());
    }
    format!("{:08x}", hasher.finalize())
}

fn truncate_chars(input: &str, max_chars: usize) -> (&str, bool) {
    match input.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (&input[..byte_idx], true),
        None => (input, false),
    }
}

/// Splits on declaration delimiters, flattening parenthesized sub-lists.
fn split_declaration(text: &str) -> impl Iterator<Item = &str> {
    text.split(|ch: char| matches!(ch, ',' | ';' | '\n' | '(' | ')' | '[' | ']' | ':' | '|'))
}

fn clean_fragment(fragment: &str) -> String {
    let trimmed = fragment
        .trim()
        .trim_matches(|ch: char| matches!(ch, '.' | '*' | '"' | '\''))
        .trim();
    // Label boilerplate like "INGREDIENTS" survives the ':' split as its own fragment.
    if trimmed.eq_ignore_ascii_case("ingredients") || trimmed.eq_ignore_ascii_case("contains") {
        return String::new();
    }
    collapse_whitespace(trimmed)
}

fn collapse_whitespace(input: &str) -> String {
    let mut buf = String::with_capacity(input.len());
    let mut last_space = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !last_space && !buf.is_empty() {
                buf.push(' ');
            }
            last_space = true;
        } else {
            buf.push(ch);
            last_space = false;
        }
    }
    buf.trim().to_string()
}

/// Fragments that are percentages or bare numbers, not ingredient names.
fn is_noise(fragment: &str) -> bool {
    fragment
        .chars()
        .all(|ch| ch.is_ascii_digit() || matches!(ch, '%' | '.' | ' ' | '-' | '<' | '>'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> Normalizer {
        Normalizer::new(&AssessmentControls::default())
    }

    #[test]
    fn splits_trims_and_preserves_casing() {
        let out = normalizer()
            .normalize("INGREDIENTS: Pork, Water, Sodium Nitrite (2%), Spices (Paprika, Celery)")
            .expect("normalizes");
        assert_eq!(
            out.names,
            vec!["Pork", "Water", "Sodium Nitrite", "Spices", "Paprika", "Celery"]
        );
    }

    #[test]
    fn deduplicates_case_insensitively_keeping_first_seen() {
        let out = normalizer()
            .normalize("Salt, salt, SALT, Sugar")
            .expect("normalizes");
        assert_eq!(out.names, vec!["Salt", "Sugar"]);
    }

    #[test]
    fn hash_stable_under_reordering_and_casing() {
        let a = normalizer().normalize("Pork, Salt, Water").unwrap();
        let b = normalizer().normalize("water, PORK, salt").unwrap();
        assert_eq!(a.content_hash, b.content_hash);

        let c = normalizer().normalize("Pork, Salt").unwrap();
        assert_ne!(a.content_hash, c.content_hash);
    }

    #[test]
    fn empty_text_is_rejected() {
        assert_eq!(
            normalizer().normalize("").unwrap_err(),
            NormalizeError::EmptyInput
        );
        assert_eq!(
            normalizer().normalize("  , ; 2% ").unwrap_err(),
            NormalizeError::EmptyInput
        );
    }

    #[test]
    fn caps_pathological_lists() {
        let mut controls = AssessmentControls::default();
        controls.max_ingredients = 4;
        let normalizer = Normalizer::new(&controls);
        let raw = (0..50).map(|i| format!("item{i}")).collect::<Vec<_>>().join(", ");
        let out = normalizer.normalize(&raw).expect("normalizes");
        assert_eq!(out.names.len(), 4);
    }

    #[test]
    fn truncates_very_long_text_before_splitting() {
        let mut controls = AssessmentControls::default();
        controls.max_text_chars = 16;
        let normalizer = Normalizer::new(&controls);
        let out = normalizer.normalize("Pork, Water, Salt, Sugar").expect("normalizes");
        assert!(out.truncated);
        assert_eq!(out.names, vec!["Pork", "Water", "Sal"]);
    }
}
