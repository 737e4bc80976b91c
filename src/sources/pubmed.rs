//! PubMed (NCBI E-utilities) bibliographic client.

use super::{BibliographicSource, CandidateRecord};
use crate::assessment::CitationIdentifier;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const ESEARCH_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi";
const ESUMMARY_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esummary.fcgi";

/// Biomedical literature index backed by NCBI E-utilities.
#[derive(Clone)]
pub struct PubMedSource {
    client: Client,
    tool: String,
    email: Option<String>,
}

impl PubMedSource {
    /// Builds a new PubMed client. NCBI asks API consumers to identify
    /// themselves with a tool name and contact email.
    pub fn new(timeout: Duration, email: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build PubMed HTTP client")?;
        Ok(Self {
            client,
            tool: "meatwise".to_string(),
            email,
        })
    }

    fn ident_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("tool", self.tool.clone())];
        if let Some(email) = &self.email {
            params.push(("email", email.clone()));
        }
        params
    }

    async fn summaries(&self, ids: &[String]) -> Result<Vec<CandidateRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut params = self.ident_params();
        params.push(("db", "pubmed".to_string()));
        params.push(("retmode", "json".to_string()));
        params.push(("id", ids.join(",")));
        let payload: Value = self
            .client
            .get(ESUMMARY_URL)
            .query(&params)
            .send()
            .await
            .context("PubMed esummary request failed")?
            .error_for_status()
            .context("PubMed esummary returned error status")?
            .json()
            .await
            .context("failed to parse PubMed esummary payload")?;

        let result = payload
            .get("result")
            .and_then(Value::as_object)
            .context("PubMed esummary payload missing result object")?;

        let mut records = Vec::new();
        for id in ids {
            let Some(entry) = result.get(id) else {
                continue;
            };
            if entry.get("error").is_some() {
                continue;
            }
            let title = entry
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim_end_matches('.')
                .to_string();
            if title.is_empty() {
                continue;
            }
            let authors = entry
                .get("authors")
                .and_then(Value::as_array)
                .map(|list| {
                    list.iter()
                        .filter_map(|author| author.get("name").and_then(Value::as_str))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            let venue = entry
                .get("fulljournalname")
                .or_else(|| entry.get("source"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let year = entry
                .get("pubdate")
                .and_then(Value::as_str)
                .and_then(parse_year);
            records.push(CandidateRecord {
                title,
                authors,
                venue,
                year,
                identifier: CitationIdentifier::Pmid(id.clone()),
                url: format!("https://pubmed.ncbi.nlm.nih.gov/{id}/"),
            });
        }
        Ok(records)
    }
}

#[async_trait]
impl BibliographicSource for PubMedSource {
    fn name(&self) -> &'static str {
        "pubmed"
    }

    fn can_verify(&self, identifier: &CitationIdentifier) -> bool {
        matches!(identifier, CitationIdentifier::Pmid(_))
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<CandidateRecord>> {
        let mut params = self.ident_params();
        params.push(("db", "pubmed".to_string()));
        params.push(("retmode", "json".to_string()));
        params.push(("retmax", limit.to_string()));
        params.push(("term", query.to_string()));
        let payload: EsearchPayload = self
            .client
            .get(ESEARCH_URL)
            .query(&params)
            .send()
            .await
            .context("PubMed esearch request failed")?
            .error_for_status()
            .context("PubMed esearch returned error status")?
            .json()
            .await
            .context("failed to parse PubMed esearch payload")?;

        self.summaries(&payload.esearchresult.idlist).await
    }

    async fn verify(&self, identifier: &CitationIdentifier) -> Result<bool> {
        let CitationIdentifier::Pmid(pmid) = identifier else {
            return Ok(false);
        };
        let records = self.summaries(std::slice::from_ref(pmid)).await?;
        Ok(!records.is_empty())
    }
}

fn parse_year(pubdate: &str) -> Option<u16> {
    pubdate
        .split_whitespace()
        .next()
        .and_then(|token| token.parse().ok())
}

#[derive(Debug, Deserialize)]
struct EsearchPayload {
    esearchresult: EsearchResult,
}

#[derive(Debug, Deserialize)]
struct EsearchResult {
    #[serde(default)]
    idlist: Vec<String>,
}
