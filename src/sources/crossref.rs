//! Crossref REST API bibliographic client.

use super::{BibliographicSource, CandidateRecord};
use crate::assessment::CitationIdentifier;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

const WORKS_URL: &str = "https://api.crossref.org/works";

/// General academic index backed by the Crossref works API.
#[derive(Clone)]
pub struct CrossrefSource {
    client: Client,
}

impl CrossrefSource {
    /// Builds a new Crossref client. Crossref's polite pool asks for a
    /// contact address in the User-Agent.
    pub fn new(timeout: Duration, email: Option<String>) -> Result<Self> {
        let user_agent = match email {
            Some(email) => format!("meatwise/0.1 (mailto:{email})"),
            None => "meatwise/0.1".to_string(),
        };
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .context("failed to build Crossref HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl BibliographicSource for CrossrefSource {
    fn name(&self) -> &'static str {
        "crossref"
    }

    fn can_verify(&self, identifier: &CitationIdentifier) -> bool {
        matches!(identifier, CitationIdentifier::Doi(_))
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<CandidateRecord>> {
        let payload: WorksPayload = self
            .client
            .get(WORKS_URL)
            .query(&[
                ("query.bibliographic", query),
                ("rows", &limit.to_string()),
                ("select", "DOI,title,author,container-title,issued,URL"),
            ])
            .send()
            .await
            .context("Crossref works request failed")?
            .error_for_status()
            .context("Crossref works returned error status")?
            .json()
            .await
            .context("failed to parse Crossref works payload")?;

        let records = payload
            .message
            .items
            .into_iter()
            .filter_map(|item| {
                let title = item.title.into_iter().next()?;
                let doi = item.doi?;
                let url = item
                    .url
                    .unwrap_or_else(|| format!("https://doi.org/{doi}"));
                Some(CandidateRecord {
                    title,
                    authors: item
                        .author
                        .into_iter()
                        .map(|author| author.display_name())
                        .collect(),
                    venue: item.container_title.into_iter().next().unwrap_or_default(),
                    year: item.issued.and_then(|issued| issued.year()),
                    identifier: CitationIdentifier::Doi(doi),
                    url,
                })
            })
            .collect();
        Ok(records)
    }

    async fn verify(&self, identifier: &CitationIdentifier) -> Result<bool> {
        let CitationIdentifier::Doi(doi) = identifier else {
            return Ok(false);
        };
        let response = self
            .client
            .get(format!("{WORKS_URL}/{doi}"))
            .send()
            .await
            .context("Crossref DOI lookup failed")?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => anyhow::bail!("Crossref DOI lookup returned {status}"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WorksPayload {
    message: WorksMessage,
}

#[derive(Debug, Deserialize)]
struct WorksMessage {
    #[serde(default)]
    items: Vec<WorkItem>,
}

#[derive(Debug, Deserialize)]
struct WorkItem {
    #[serde(rename = "DOI")]
    doi: Option<String>,
    #[serde(default)]
    title: Vec<String>,
    #[serde(default)]
    author: Vec<WorkAuthor>,
    #[serde(rename = "container-title", default)]
    container_title: Vec<String>,
    issued: Option<WorkIssued>,
    #[serde(rename = "URL")]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WorkAuthor {
    #[serde(default)]
    given: Option<String>,
    #[serde(default)]
    family: Option<String>,
}

impl WorkAuthor {
    fn display_name(self) -> String {
        match (self.family, self.given) {
            (Some(family), Some(given)) => format!("{family} {given}"),
            (Some(family), None) => family,
            (None, Some(given)) => given,
            (None, None) => String::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WorkIssued {
    #[serde(rename = "date-parts", default)]
    date_parts: Vec<Vec<Option<i64>>>,
}

impl WorkIssued {
    fn year(&self) -> Option<u16> {
        self.date_parts
            .first()
            .and_then(|parts| parts.first())
            .and_then(|year| *year)
            .and_then(|year| u16::try_from(year).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_year_extraction() {
        let issued = WorkIssued {
            date_parts: vec![vec![Some(2019), Some(4)]],
        };
        assert_eq!(issued.year(), Some(2019));

        let empty = WorkIssued { date_parts: vec![] };
        assert_eq!(empty.year(), None);
    }

    #[test]
    fn author_display_names() {
        let full = WorkAuthor {
            given: Some("Ada".to_string()),
            family: Some("Lovelace".to_string()),
        };
        assert_eq!(full.display_name(), "Lovelace Ada");
    }
}
