//! Citation enrichment: parallel bibliographic search, dedupe, verification.

use crate::cache::{citation_key, CacheStore};
use crate::controls::AssessmentControls;
use crate::sources::{normalized_title, BibliographicSource, CandidateRecord};
use futures_util::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, warn};

/// One high/moderate ingredient paired with its health-claim phrase.
#[derive(Debug, Clone)]
pub struct EnrichmentTarget {
    /// Ingredient display name.
    pub ingredient: String,
    /// Claim phrase driving the search and the citation relevance note.
    pub claim: String,
}

/// Verified records retrieved for one ingredient. May be empty.
#[derive(Debug, Clone)]
pub struct IngredientEvidence {
    /// Ingredient display name.
    pub ingredient: String,
    /// Claim phrase the records were retrieved for.
    pub claim: String,
    /// Verified candidate records, capped per ingredient.
    pub records: Vec<CandidateRecord>,
}

/// Fans searches out across bibliographic sources with bounded parallelism.
pub struct EnrichmentEngine {
    sources: Vec<Arc<dyn BibliographicSource>>,
    cache: Arc<dyn CacheStore>,
    controls: Arc<AssessmentControls>,
    /// Process-wide bound on simultaneous outbound search/verify calls.
    permits: Arc<Semaphore>,
}

impl EnrichmentEngine {
    /// Builds a new engine over the configured sources.
    pub fn new(
        sources: Vec<Arc<dyn BibliographicSource>>,
        cache: Arc<dyn CacheStore>,
        controls: Arc<AssessmentControls>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(controls.max_concurrent_searches.max(1)));
        Self {
            sources,
            cache,
            controls,
            permits,
        }
    }

    /// Enriches every target independently and in parallel.
    ///
    /// A source's failure or timeout degrades only its own contribution;
    /// records whose identifiers fail verification are dropped silently.
    pub async fn enrich(
        &self,
        targets: &[EnrichmentTarget],
        bypass_cache: bool,
    ) -> Vec<IngredientEvidence> {
        join_all(
            targets
                .iter()
                .map(|target| self.enrich_one(target, bypass_cache)),
        )
        .await
    }

    async fn enrich_one(
        &self,
        target: &EnrichmentTarget,
        bypass_cache: bool,
    ) -> IngredientEvidence {
        let key = citation_key(&target.ingredient, &target.claim);
        if !bypass_cache {
            if let Some(payload) = self.cache.get(&key).await {
                if let Ok(records) = serde_json::from_str::<Vec<CandidateRecord>>(&payload) {
                    debug!(ingredient = %target.ingredient, "citation cache hit");
                    return IngredientEvidence {
                        ingredient: target.ingredient.clone(),
                        claim: target.claim.clone(),
                        records,
                    };
                }
            }
        }

        let query = format!("{} {}", target.ingredient, target.claim);
        let (candidates, searches_succeeded) = self.search_all(&query).await;
        let deduped = dedupe(candidates);
        let mut verified = self.verify_all(deduped).await;
        verified.truncate(self.controls.max_citations_per_ingredient);

        // An all-sources failure is not worth pinning in the 30-day tier;
        // a future request should retry the search.
        if searches_succeeded > 0 {
            if let Ok(payload) = serde_json::to_string(&verified) {
                self.cache
                    .put(&key, payload, self.controls.citation_ttl)
                    .await;
            }
        }

        IngredientEvidence {
            ingredient: target.ingredient.clone(),
            claim: target.claim.clone(),
            records: verified,
        }
    }

    async fn search_all(&self, query: &str) -> (Vec<CandidateRecord>, usize) {
        let searches = self.sources.iter().map(|source| {
            let source = Arc::clone(source);
            let permits = Arc::clone(&self.permits);
            let limit = self.controls.search_result_limit;
            let deadline = self.controls.search_timeout;
            async move {
                let _permit = permits.acquire().await.ok()?;
                match timeout(deadline, source.search(query, limit)).await {
                    Ok(Ok(records)) => Some(records),
                    Ok(Err(err)) => {
                        warn!(source = source.name(), %err, "bibliographic search failed");
                        None
                    }
                    Err(_) => {
                        warn!(source = source.name(), "bibliographic search timed out");
                        None
                    }
                }
            }
        });

        let mut candidates = Vec::new();
        let mut succeeded = 0usize;
        for outcome in join_all(searches).await {
            if let Some(records) = outcome {
                succeeded += 1;
                candidates.extend(records);
            }
        }
        (candidates, succeeded)
    }

    async fn verify_all(&self, candidates: Vec<CandidateRecord>) -> Vec<CandidateRecord> {
        let checks = candidates.into_iter().map(|record| {
            let permits = Arc::clone(&self.permits);
            let deadline = self.controls.verify_timeout;
            let verifier = self
                .sources
                .iter()
                .find(|source| source.can_verify(&record.identifier))
                .cloned();
            async move {
                let Some(source) = verifier else {
                    debug!(identifier = %record.identifier, "no source can verify identifier");
                    return None;
                };
                let _permit = permits.acquire().await.ok()?;
                match timeout(deadline, source.verify(&record.identifier)).await {
                    Ok(Ok(true)) => Some(record),
                    Ok(Ok(false)) => {
                        debug!(identifier = %record.identifier, "identifier failed verification");
                        None
                    }
                    Ok(Err(err)) => {
                        debug!(identifier = %record.identifier, %err, "verification errored");
                        None
                    }
                    Err(_) => {
                        debug!(identifier = %record.identifier, "verification timed out");
                        None
                    }
                }
            }
        });

        join_all(checks).await.into_iter().flatten().collect()
    }
}

/// Dedupe by canonical identifier and by normalized title, keeping first-seen.
fn dedupe(candidates: Vec<CandidateRecord>) -> Vec<CandidateRecord> {
    let mut seen_ids = HashSet::new();
    let mut seen_titles = HashSet::new();
    let mut out = Vec::with_capacity(candidates.len());
    for record in candidates {
        if !seen_ids.insert(record.identifier.canonical()) {
            continue;
        }
        if !seen_titles.insert(normalized_title(&record.title)) {
            continue;
        }
        out.push(record);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessment::CitationIdentifier;
    use crate::cache::MemoryCache;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FakeSource {
        name: &'static str,
        records: Vec<CandidateRecord>,
        verified: bool,
        delay: Duration,
        searches: AtomicUsize,
    }

    impl FakeSource {
        fn new(name: &'static str, records: Vec<CandidateRecord>, verified: bool) -> Self {
            Self {
                name,
                records,
                verified,
                delay: Duration::ZERO,
                searches: AtomicUsize::new(0),
            }
        }

        fn slow(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl BibliographicSource for FakeSource {
        fn name(&self) -> &'static str {
            self.name
        }

        fn can_verify(&self, _identifier: &CitationIdentifier) -> bool {
            true
        }

        async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<CandidateRecord>> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(self.records.clone())
        }

        async fn verify(&self, _identifier: &CitationIdentifier) -> Result<bool> {
            Ok(self.verified)
        }
    }

    fn record(title: &str, pmid: &str) -> CandidateRecord {
        CandidateRecord {
            title: title.to_string(),
            authors: vec!["Doe J".to_string()],
            venue: "Journal of Meat Science".to_string(),
            year: Some(2020),
            identifier: CitationIdentifier::Pmid(pmid.to_string()),
            url: format!("https://pubmed.ncbi.nlm.nih.gov/{pmid}/"),
        }
    }

    fn controls() -> Arc<AssessmentControls> {
        let mut controls = AssessmentControls::default();
        controls.search_timeout = Duration::from_millis(100);
        controls.verify_timeout = Duration::from_millis(100);
        Arc::new(controls)
    }

    fn target() -> Vec<EnrichmentTarget> {
        vec![EnrichmentTarget {
            ingredient: "Sodium Nitrite".to_string(),
            claim: "nitroso compound formation".to_string(),
        }]
    }

    #[tokio::test(flavor = "current_thread")]
    async fn merges_and_dedupes_across_sources() {
        let shared = record("Nitrite and cancer: a review", "111");
        let a = Arc::new(FakeSource::new(
            "a",
            vec![shared.clone(), record("Curing salts overview", "222")],
            true,
        ));
        let b = Arc::new(FakeSource::new(
            "b",
            vec![shared.clone()],
            true,
        ));
        let engine = EnrichmentEngine::new(
            vec![a as Arc<dyn BibliographicSource>, b],
            Arc::new(MemoryCache::new(16)),
            controls(),
        );

        let evidence = engine.enrich(&target(), false).await;
        assert_eq!(evidence.len(), 1);
        assert_eq!(evidence[0].records.len(), 2);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn fabricated_identifiers_dropped_at_verification() {
        let a = Arc::new(FakeSource::new(
            "a",
            vec![record("Fabricated finding", "999")],
            false,
        ));
        let b = Arc::new(FakeSource::new("b", Vec::new(), true));
        let engine = EnrichmentEngine::new(
            vec![a as Arc<dyn BibliographicSource>, b],
            Arc::new(MemoryCache::new(16)),
            controls(),
        );

        let evidence = engine.enrich(&target(), false).await;
        assert!(evidence[0].records.is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn slow_source_degrades_only_its_own_contribution() {
        let slow = Arc::new(
            FakeSource::new("slow", vec![record("Late paper", "333")], true)
                .slow(Duration::from_secs(5)),
        );
        let fast = Arc::new(FakeSource::new(
            "fast",
            vec![record("Prompt paper", "444")],
            true,
        ));
        let engine = EnrichmentEngine::new(
            vec![slow as Arc<dyn BibliographicSource>, fast],
            Arc::new(MemoryCache::new(16)),
            controls(),
        );

        let evidence = engine.enrich(&target(), false).await;
        assert_eq!(evidence[0].records.len(), 1);
        assert_eq!(evidence[0].records[0].title, "Prompt paper");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn second_run_served_from_cache() {
        let source = Arc::new(FakeSource::new(
            "a",
            vec![record("Cached paper", "555")],
            true,
        ));
        let engine = EnrichmentEngine::new(
            vec![Arc::clone(&source) as Arc<dyn BibliographicSource>],
            Arc::new(MemoryCache::new(16)),
            controls(),
        );

        let first = engine.enrich(&target(), false).await;
        assert_eq!(first[0].records.len(), 1);
        let second = engine.enrich(&target(), false).await;
        assert_eq!(second[0].records.len(), 1);
        assert_eq!(source.searches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn per_ingredient_cap_applies() {
        let mut controls = AssessmentControls::default();
        controls.max_citations_per_ingredient = 1;
        let source = Arc::new(FakeSource::new(
            "a",
            vec![record("First", "1"), record("Second", "2")],
            true,
        ));
        let engine = EnrichmentEngine::new(
            vec![source as Arc<dyn BibliographicSource>],
            Arc::new(MemoryCache::new(16)),
            Arc::new(controls),
        );

        let evidence = engine.enrich(&target(), false).await;
        assert_eq!(evidence[0].records.len(), 1);
    }
}
