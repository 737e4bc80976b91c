//! Bibliographic source abstraction and its concrete clients.

use crate::assessment::CitationIdentifier;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod crossref;
pub mod pubmed;

pub use crossref::CrossrefSource;
pub use pubmed::PubMedSource;

/// A candidate record returned by a keyword search, prior to verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateRecord {
    /// Record title.
    pub title: String,
    /// Author names as reported by the source.
    pub authors: Vec<String>,
    /// Journal or venue name.
    pub venue: String,
    /// Publication year when reported.
    pub year: Option<u16>,
    /// Claimed identifier, verified in a separate existence check.
    pub identifier: CitationIdentifier,
    /// Resolvable URL for the record.
    pub url: String,
}

/// Keyword-searchable bibliographic index with a lightweight existence check.
#[async_trait]
pub trait BibliographicSource: Send + Sync {
    /// Short source label used in logs.
    fn name(&self) -> &'static str;

    /// Whether this source can verify the given identifier kind.
    fn can_verify(&self, identifier: &CitationIdentifier) -> bool;

    /// Runs one keyword search, returning up to `limit` candidate records.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<CandidateRecord>>;

    /// Confirms the identifier resolves to an existing record.
    async fn verify(&self, identifier: &CitationIdentifier) -> Result<bool>;
}

/// Title folded for dedupe: lowercase, alphanumeric runs joined by single
/// spaces, so punctuation and casing differences collapse.
pub fn normalized_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut last_space = true;
    for ch in title.chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn titles_normalize_across_punctuation_and_case() {
        assert_eq!(
            normalized_title("Nitrite, Nitrate and  Cancer: a Review"),
            normalized_title("nitrite nitrate and cancer A REVIEW")
        );
        assert_ne!(
            normalized_title("Nitrite and cancer"),
            normalized_title("Nitrate and cancer")
        );
    }
}
