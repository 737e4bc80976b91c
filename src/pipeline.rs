//! End-to-end assessment orchestration with graceful degradation.
//!
//! The pipeline never fails a request over a downstream outage: each stage
//! reports a tagged outcome and the pipeline steps down a rung instead of
//! returning an error. Only an empty ingredient declaration short-circuits,
//! and that is a data problem, not a failure.

use crate::cache::{assessment_key, categorization_key, CacheStore};
use crate::categorizer::{Categorizer, TieredIngredient};
use crate::composer::Composer;
use crate::controls::AssessmentControls;
use crate::enrichment::{EnrichmentEngine, EnrichmentTarget};
use crate::lexicon::Lexicon;
use crate::normalizer::{NormalizeError, Normalizer};
use crate::projector;
use crate::assessment::{HealthAssessment, MeatType, ProductInput, RiskTier};
use crate::reasoning::ReasoningService;
use crate::sources::BibliographicSource;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of one pipeline stage.
///
/// `Success` and `Degraded` both carry a usable value; the tag records
/// whether the primary path produced it. `Unavailable` means the stage could
/// not produce anything and the caller must step down a rung.
#[derive(Debug)]
pub enum StageOutcome<T> {
    /// Primary path succeeded.
    Success(T),
    /// Fallback path produced the value.
    Degraded(T),
    /// No value could be produced at all.
    Unavailable,
}

/// Which rung of the degradation ladder produced the assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Both reasoning calls succeeded.
    Normal,
    /// Tier assignment fell back to the lexicon; narrative still composed.
    CategorizerDegraded,
    /// Composition fell back to template assembly.
    ComposerDegraded,
    /// Reasoning unreachable; lexicon tiers and template assembly only.
    Minimal,
}

impl PipelineState {
    /// Keeps the worse of two rungs.
    fn escalate(self, other: PipelineState) -> PipelineState {
        self.max(other)
    }
}

/// One assessment request.
#[derive(Debug, Clone, Deserialize)]
pub struct AssessmentRequest {
    /// Product under assessment.
    pub product: ProductInput,
    /// Meat category, steering the categorization prompt.
    pub meat_type: MeatType,
    /// Project the result for constrained displays.
    #[serde(default)]
    pub mobile: bool,
    /// Skip cache reads; fresh results are still written back.
    #[serde(default)]
    pub bypass_cache: bool,
}

/// Assessment payload or the reason none could be produced.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AssessmentOutcome {
    /// A risk-tiered assessment, possibly from a degraded rung.
    Ready {
        /// The assessment itself.
        assessment: HealthAssessment,
    },
    /// The input carried nothing assessable.
    InsufficientData {
        /// Human-readable explanation.
        reason: String,
    },
}

/// Full response envelope for one request.
#[derive(Debug, Clone, Serialize)]
pub struct AssessmentResponse {
    /// Assessment or the insufficient-data marker.
    #[serde(flatten)]
    pub outcome: AssessmentOutcome,
    /// Degradation rung the result came from.
    pub state: PipelineState,
    /// True when the whole assessment was served from cache.
    pub cache_hit: bool,
}

#[derive(Serialize, Deserialize)]
struct CachedAssessment {
    state: PipelineState,
    assessment: HealthAssessment,
}

/// Orchestrates normalization, categorization, enrichment and composition.
pub struct AssessmentPipeline {
    controls: Arc<AssessmentControls>,
    normalizer: Normalizer,
    categorizer: Categorizer,
    enrichment: EnrichmentEngine,
    composer: Composer,
    cache: Arc<dyn CacheStore>,
}

impl AssessmentPipeline {
    /// Wires the pipeline from its external dependencies.
    pub fn new(
        reasoning: Arc<dyn ReasoningService>,
        sources: Vec<Arc<dyn BibliographicSource>>,
        cache: Arc<dyn CacheStore>,
        lexicon: Arc<Lexicon>,
        controls: Arc<AssessmentControls>,
    ) -> Self {
        Self {
            normalizer: Normalizer::new(&controls),
            categorizer: Categorizer::new(
                Arc::clone(&reasoning),
                lexicon,
                Arc::clone(&controls),
            ),
            enrichment: EnrichmentEngine::new(sources, Arc::clone(&cache), Arc::clone(&controls)),
            composer: Composer::new(reasoning, Arc::clone(&controls)),
            cache,
            controls,
        }
    }

    /// Assesses one product. Infallible by construction: every downstream
    /// failure mode maps to a degradation rung or an insufficient-data reply.
    pub async fn assess(&self, request: &AssessmentRequest) -> AssessmentResponse {
        let normalized = match self.normalizer.normalize(&request.product.ingredient_text) {
            Ok(normalized) => normalized,
            Err(NormalizeError::EmptyInput) => {
                debug!(code = %request.product.code, "no assessable ingredients");
                return AssessmentResponse {
                    outcome: AssessmentOutcome::InsufficientData {
                        reason: "ingredient declaration contains no ingredients".to_string(),
                    },
                    state: PipelineState::Normal,
                    cache_hit: false,
                };
            }
        };

        let key = assessment_key(&request.product.code, &normalized.content_hash);
        if !request.bypass_cache {
            if let Some(payload) = self.cache.get(&key).await {
                if let Ok(cached) = serde_json::from_str::<CachedAssessment>(&payload) {
                    info!(code = %request.product.code, "assessment cache hit");
                    return self.respond(cached.assessment, cached.state, true, request.mobile);
                }
            }
        }

        let (tiers, mut state) = self
            .categorize(&normalized.names, &normalized.content_hash, request)
            .await;
        let Some(tiers) = tiers else {
            // Reasoning unreachable: minimal rung, lexicon tiers, no citations.
            let tiers = self.categorizer.lexicon_tiers(&normalized.names);
            let assessment = self
                .composer
                .template_assessment(&request.product, &tiers, &[], true);
            warn!(code = %request.product.code, "serving minimal assessment");
            return self.respond(assessment, PipelineState::Minimal, false, request.mobile);
        };

        let targets: Vec<EnrichmentTarget> = tiers
            .iter()
            .filter(|tier| tier.tier != RiskTier::Low)
            .map(|tier| EnrichmentTarget {
                ingredient: tier.name.clone(),
                claim: tier.rationale.clone(),
            })
            .collect();
        let evidence = self.enrichment.enrich(&targets, request.bypass_cache).await;

        let assessment = match self
            .composer
            .compose(&request.product, &tiers, &evidence)
            .await
        {
            StageOutcome::Success(assessment) => assessment,
            StageOutcome::Degraded(assessment) => {
                state = state.escalate(PipelineState::ComposerDegraded);
                assessment
            }
            StageOutcome::Unavailable => {
                // Composition never reports this; template assembly is total.
                state = state.escalate(PipelineState::ComposerDegraded);
                self.composer
                    .template_assessment(&request.product, &tiers, &evidence, false)
            }
        };

        // Every terminal state except the minimal rung is cached; the minimal
        // rung carries no AI-derived content worth pinning for a day.
        if state != PipelineState::Minimal {
            let cached = CachedAssessment {
                state,
                assessment: assessment.clone(),
            };
            if let Ok(payload) = serde_json::to_string(&cached) {
                self.cache
                    .put(&key, payload, self.controls.assessment_ttl)
                    .await;
            }
        }

        info!(code = %request.product.code, ?state, "assessment composed");
        self.respond(assessment, state, false, request.mobile)
    }

    async fn categorize(
        &self,
        names: &[String],
        content_hash: &str,
        request: &AssessmentRequest,
    ) -> (Option<Vec<TieredIngredient>>, PipelineState) {
        let key = categorization_key(content_hash);
        if !request.bypass_cache {
            if let Some(payload) = self.cache.get(&key).await {
                if let Ok(tiers) = serde_json::from_str::<Vec<TieredIngredient>>(&payload) {
                    debug!("categorization cache hit");
                    return (Some(tiers), PipelineState::Normal);
                }
            }
        }

        match self.categorizer.categorize(names, request.meat_type).await {
            StageOutcome::Success(tiers) => {
                // Only primary-path output is cached; lexicon fallback tiers
                // stay uncached so the next request retries the service.
                if let Ok(payload) = serde_json::to_string(&tiers) {
                    self.cache
                        .put(&key, payload, self.controls.categorization_ttl)
                        .await;
                }
                (Some(tiers), PipelineState::Normal)
            }
            StageOutcome::Degraded(tiers) => (Some(tiers), PipelineState::CategorizerDegraded),
            StageOutcome::Unavailable => (None, PipelineState::Minimal),
        }
    }

    fn respond(
        &self,
        assessment: HealthAssessment,
        state: PipelineState,
        cache_hit: bool,
        mobile: bool,
    ) -> AssessmentResponse {
        let assessment = if mobile {
            projector::project(&assessment, &self.controls)
        } else {
            assessment
        };
        AssessmentResponse {
            outcome: AssessmentOutcome::Ready { assessment },
            state,
            cache_hit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessment::{CitationIdentifier, Grade, NutritionFacts};
    use crate::cache::MemoryCache;
    use crate::reasoning::ReasoningError;
    use crate::sources::CandidateRecord;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct ScriptedReasoner {
        replies: Mutex<VecDeque<Result<String, ReasoningError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedReasoner {
        fn new(replies: Vec<Result<String, ReasoningError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ReasoningService for ScriptedReasoner {
        async fn complete(&self, _prompt: &str, _max: usize) -> Result<String, ReasoningError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .expect("replies lock")
                .pop_front()
                .unwrap_or(Err(ReasoningError::Empty))
        }
    }

    struct StubSource {
        records: Vec<CandidateRecord>,
        searches: AtomicUsize,
    }

    impl StubSource {
        fn new(records: Vec<CandidateRecord>) -> Self {
            Self {
                records,
                searches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl BibliographicSource for StubSource {
        fn name(&self) -> &'static str {
            "stub"
        }

        fn can_verify(&self, _identifier: &CitationIdentifier) -> bool {
            true
        }

        async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<CandidateRecord>> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            Ok(self.records.clone())
        }

        async fn verify(&self, _identifier: &CitationIdentifier) -> Result<bool> {
            Ok(true)
        }
    }

    // Stands in for a cache backend that is down: every read misses and
    // every write is lost, which is exactly how implementations are required
    // to surface internal failure.
    struct DownCache {
        gets: AtomicUsize,
        puts: AtomicUsize,
    }

    impl DownCache {
        fn new() -> Self {
            Self {
                gets: AtomicUsize::new(0),
                puts: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CacheStore for DownCache {
        async fn get(&self, _key: &str) -> Option<String> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            None
        }

        async fn put(&self, _key: &str, _value: String, _ttl: Duration) {
            self.puts.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn record(title: &str, pmid: &str) -> CandidateRecord {
        CandidateRecord {
            title: title.to_string(),
            authors: vec!["Doe J".to_string()],
            venue: "Meat Science".to_string(),
            year: Some(2020),
            identifier: CitationIdentifier::Pmid(pmid.to_string()),
            url: format!("https://pubmed.ncbi.nlm.nih.gov/{pmid}/"),
        }
    }

    fn request(ingredient_text: &str) -> AssessmentRequest {
        AssessmentRequest {
            product: ProductInput {
                code: "0001".to_string(),
                name: "Smoked Bacon".to_string(),
                brand: "Acme".to_string(),
                ingredient_text: ingredient_text.to_string(),
                nutrition: NutritionFacts {
                    calories_kcal: 250.0,
                    protein_g: 12.0,
                    fat_g: 22.0,
                    carbohydrate_g: 1.0,
                    salt_g: 2.1,
                },
            },
            meat_type: MeatType::Pork,
            mobile: false,
            bypass_cache: false,
        }
    }

    struct Harness {
        pipeline: AssessmentPipeline,
        reasoner: Arc<ScriptedReasoner>,
        source: Arc<StubSource>,
    }

    fn harness(replies: Vec<Result<String, ReasoningError>>, records: Vec<CandidateRecord>) -> Harness {
        let reasoner = Arc::new(ScriptedReasoner::new(replies));
        let source = Arc::new(StubSource::new(records));
        let mut controls = AssessmentControls::default();
        controls.categorizer_timeout = Duration::from_millis(200);
        controls.composer_timeout = Duration::from_millis(200);
        controls.search_timeout = Duration::from_millis(200);
        controls.verify_timeout = Duration::from_millis(200);
        let pipeline = AssessmentPipeline::new(
            Arc::clone(&reasoner) as Arc<dyn ReasoningService>,
            vec![Arc::clone(&source) as Arc<dyn BibliographicSource>],
            Arc::new(MemoryCache::new(64)) as Arc<dyn CacheStore>,
            Arc::new(Lexicon::default()),
            Arc::new(controls),
        );
        Harness {
            pipeline,
            reasoner,
            source,
        }
    }

    fn categorize_reply() -> String {
        r#"[{"name": "Pork", "tier": "low", "rationale": "base ingredient"},
            {"name": "Water", "tier": "low", "rationale": "inert"},
            {"name": "Sodium Nitrite", "tier": "high", "rationale": "nitrosamine precursor"}]"#
            .to_string()
    }

    fn compose_reply() -> String {
        r#"{"summary": "Heavily processed cured pork product.", "grade": "D",
            "micro_reports": {"Sodium Nitrite": "Associated with nitroso compounds [1]."},
            "nutrition_comments": {"salt": "High for a single serving."}}"#
            .to_string()
    }

    fn ready(response: &AssessmentResponse) -> &HealthAssessment {
        match &response.outcome {
            AssessmentOutcome::Ready { assessment } => assessment,
            other => panic!("expected ready outcome, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn empty_input_short_circuits_without_calls() {
        let h = harness(vec![], vec![]);
        let response = h.pipeline.assess(&request("  , ; ")).await;
        assert!(matches!(
            response.outcome,
            AssessmentOutcome::InsufficientData { .. }
        ));
        assert_eq!(h.reasoner.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.source.searches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn unreachable_reasoning_serves_minimal_uncached() {
        let h = harness(
            vec![
                Err(ReasoningError::Unreachable("refused".to_string())),
                Err(ReasoningError::Unreachable("refused".to_string())),
            ],
            vec![record("Nitrite paper", "111")],
        );
        let response = h.pipeline.assess(&request("Pork, Water, Sodium Nitrite")).await;
        assert_eq!(response.state, PipelineState::Minimal);
        let assessment = ready(&response);
        assert!(assessment.limited);
        assert!(assessment.citations.is_empty());
        // No citation search on the minimal rung, and nothing cached.
        assert_eq!(h.source.searches.load(Ordering::SeqCst), 0);
        let second = h.pipeline.assess(&request("Pork, Water, Sodium Nitrite")).await;
        assert_eq!(second.state, PipelineState::Minimal);
        assert!(!second.cache_hit);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn quota_failure_degrades_but_still_enriches() {
        let h = harness(
            vec![
                Err(ReasoningError::Failed {
                    status: 429,
                    body: "quota".to_string(),
                }),
                Ok(compose_reply()),
            ],
            vec![record("Nitrite paper", "111")],
        );
        let response = h.pipeline.assess(&request("Pork, Water, Sodium Nitrite")).await;
        assert_eq!(response.state, PipelineState::CategorizerDegraded);
        let assessment = ready(&response);
        assert_eq!(assessment.high_risk.len(), 1);
        assert_eq!(assessment.high_risk[0].name, "Sodium Nitrite");
        // One search: only the single high-tier ingredient gets enriched.
        assert_eq!(h.source.searches.load(Ordering::SeqCst), 1);
        assert_eq!(assessment.citations.len(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn happy_path_partitions_and_closes_citations() {
        let h = harness(
            vec![Ok(categorize_reply()), Ok(compose_reply())],
            vec![record("Nitrite paper", "111")],
        );
        let response = h.pipeline.assess(&request("Pork, Water, Sodium Nitrite")).await;
        assert_eq!(response.state, PipelineState::Normal);
        assert!(!response.cache_hit);
        let assessment = ready(&response);
        assert_eq!(assessment.grade, Grade::D);
        assert_eq!(assessment.high_risk.len(), 1);
        assert_eq!(assessment.low_risk.len(), 2);
        assert!(assessment.moderate_risk.is_empty());

        // Every referenced citation id resolves to an entry in the list.
        let ids: Vec<u32> = assessment.citations.iter().map(|c| c.id).collect();
        for record in assessment.records() {
            for id in &record.citation_ids {
                assert!(ids.contains(id));
            }
        }
        assert_eq!(assessment.high_risk[0].citation_ids, vec![1]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn second_request_is_a_cache_hit() {
        let h = harness(
            vec![Ok(categorize_reply()), Ok(compose_reply())],
            vec![record("Nitrite paper", "111")],
        );
        let first = h.pipeline.assess(&request("Pork, Water, Sodium Nitrite")).await;
        assert!(!first.cache_hit);
        let calls_after_first = h.reasoner.calls.load(Ordering::SeqCst);

        let second = h.pipeline.assess(&request("Pork, Water, Sodium Nitrite")).await;
        assert!(second.cache_hit);
        assert_eq!(second.state, PipelineState::Normal);
        assert_eq!(h.reasoner.calls.load(Ordering::SeqCst), calls_after_first);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn concurrent_misses_both_compute_then_cache_serves() {
        let h = harness(
            vec![
                Ok(categorize_reply()),
                Ok(compose_reply()),
                Ok(categorize_reply()),
                Ok(compose_reply()),
            ],
            vec![record("Nitrite paper", "111")],
        );
        let req = request("Pork, Water, Sodium Nitrite");
        let (a, b) = tokio::join!(h.pipeline.assess(&req), h.pipeline.assess(&req));
        assert!(!a.cache_hit || !b.cache_hit);

        let third = h.pipeline.assess(&req).await;
        assert!(third.cache_hit);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn bypass_cache_recomputes_but_writes_back() {
        let h = harness(
            vec![
                Ok(categorize_reply()),
                Ok(compose_reply()),
                Ok(categorize_reply()),
                Ok(compose_reply()),
            ],
            vec![record("Nitrite paper", "111")],
        );
        let mut req = request("Pork, Water, Sodium Nitrite");
        let _ = h.pipeline.assess(&req).await;

        req.bypass_cache = true;
        let refreshed = h.pipeline.assess(&req).await;
        assert!(!refreshed.cache_hit);
        assert_eq!(h.reasoner.calls.load(Ordering::SeqCst), 4);

        req.bypass_cache = false;
        let third = h.pipeline.assess(&req).await;
        assert!(third.cache_hit);
        assert_eq!(h.reasoner.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn mobile_requests_get_projected_output() {
        let h = harness(
            vec![Ok(categorize_reply()), Ok(compose_reply())],
            vec![record("Nitrite paper", "111")],
        );
        let mut req = request("Pork, Water, Sodium Nitrite");
        req.mobile = true;
        let response = h.pipeline.assess(&req).await;
        let assessment = ready(&response);
        assert!(assessment.high_risk[0].rationale.is_empty());
        for insight in &assessment.nutrition {
            assert_ne!(
                insight.evaluation,
                crate::assessment::DvEvaluation::Low,
                "projection drops low-signal nutrition rows"
            );
        }
        // Cache stores the full assessment, so a desktop request still gets
        // the unprojected form.
        req.mobile = false;
        let desktop = h.pipeline.assess(&req).await;
        assert!(desktop.cache_hit);
        assert!(!ready(&desktop).high_risk[0].rationale.is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn unavailable_cache_store_degrades_to_misses() {
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            Ok(categorize_reply()),
            Ok(compose_reply()),
            Ok(categorize_reply()),
            Ok(compose_reply()),
        ]));
        let source = Arc::new(StubSource::new(vec![record("Nitrite paper", "111")]));
        let cache = Arc::new(DownCache::new());
        let pipeline = AssessmentPipeline::new(
            Arc::clone(&reasoner) as Arc<dyn ReasoningService>,
            vec![Arc::clone(&source) as Arc<dyn BibliographicSource>],
            Arc::clone(&cache) as Arc<dyn CacheStore>,
            Arc::new(Lexicon::default()),
            Arc::new(AssessmentControls::default()),
        );

        let req = request("Pork, Water, Sodium Nitrite");
        let first = pipeline.assess(&req).await;
        assert_eq!(first.state, PipelineState::Normal);
        assert!(!first.cache_hit);
        assert!(matches!(first.outcome, AssessmentOutcome::Ready { .. }));
        // The store was consulted and written despite losing everything.
        assert!(cache.gets.load(Ordering::SeqCst) > 0);
        assert!(cache.puts.load(Ordering::SeqCst) > 0);

        // Every retry runs the full pipeline again instead of failing.
        let second = pipeline.assess(&req).await;
        assert!(!second.cache_hit);
        assert_eq!(second.state, PipelineState::Normal);
        assert_eq!(reasoner.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn degraded_assessments_are_cached_like_normal_ones() {
        let h = harness(
            vec![
                Ok(categorize_reply()),
                Err(ReasoningError::Failed {
                    status: 500,
                    body: "boom".to_string(),
                }),
            ],
            vec![record("Nitrite paper", "111")],
        );
        let req = request("Pork, Water, Sodium Nitrite");
        let degraded = h.pipeline.assess(&req).await;
        assert_eq!(degraded.state, PipelineState::ComposerDegraded);
        assert!(!ready(&degraded).limited);
        let calls_after_first = h.reasoner.calls.load(Ordering::SeqCst);

        // Only the minimal rung is exempt from the full-assessment cache, so
        // the identical retry is a hit carrying the degraded state and makes
        // no new upstream call.
        let retry = h.pipeline.assess(&req).await;
        assert!(retry.cache_hit);
        assert_eq!(retry.state, PipelineState::ComposerDegraded);
        assert_eq!(h.reasoner.calls.load(Ordering::SeqCst), calls_after_first);
    }
}
