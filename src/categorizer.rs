//! Risk categorization: reasoning-service primary path, lexicon fallback.

use crate::assessment::{MeatType, RiskTier};
use crate::controls::AssessmentControls;
use crate::lexicon::Lexicon;
use crate::pipeline::StageOutcome;
use crate::projector::truncate_chars;
use crate::reasoning::{ReasoningError, ReasoningService};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::warn;

const CATEGORIZER_MAX_TOKENS: usize = 1024;

/// One ingredient with its assigned tier and short rationale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TieredIngredient {
    /// Display-cased name from the normalized list.
    pub name: String,
    /// Assigned risk tier.
    pub tier: RiskTier,
    /// Bounded rationale; doubles as the citation-search claim phrase.
    pub rationale: String,
}

/// Categorizes normalized ingredient lists, degrading to the lexicon when the
/// reasoning service fails.
pub struct Categorizer {
    reasoning: Arc<dyn ReasoningService>,
    lexicon: Arc<Lexicon>,
    controls: Arc<AssessmentControls>,
}

impl Categorizer {
    /// Builds a new categorizer.
    pub fn new(
        reasoning: Arc<dyn ReasoningService>,
        lexicon: Arc<Lexicon>,
        controls: Arc<AssessmentControls>,
    ) -> Self {
        Self {
            reasoning,
            lexicon,
            controls,
        }
    }

    /// Runs one categorization attempt for the whole list.
    ///
    /// The outcome is tagged: `Success` when the reasoning reply covered the
    /// list, `Degraded` when the lexicon had to stand in, `Unavailable` when
    /// the service could not be reached at all (the caller escalates that to
    /// the minimal rung).
    pub async fn categorize(
        &self,
        names: &[String],
        meat_type: MeatType,
    ) -> StageOutcome<Vec<TieredIngredient>> {
        let prompt = self.build_prompt(names, meat_type);
        let call = self.reasoning.complete(&prompt, CATEGORIZER_MAX_TOKENS);
        let reply = match timeout(self.controls.categorizer_timeout, call).await {
            Ok(Ok(text)) => text,
            Ok(Err(ReasoningError::Unreachable(detail))) => {
                warn!(%detail, "categorizer: reasoning service unreachable");
                return StageOutcome::Unavailable;
            }
            Ok(Err(err)) => {
                warn!(%err, "categorizer: primary path failed, using lexicon");
                return StageOutcome::Degraded(self.lexicon_tiers(names));
            }
            Err(_) => {
                warn!("categorizer: reasoning call timed out");
                return StageOutcome::Unavailable;
            }
        };

        match self.parse_reply(&reply, names) {
            Some(tiers) => StageOutcome::Success(tiers),
            None => {
                warn!("categorizer: unparseable reply, using lexicon");
                StageOutcome::Degraded(self.lexicon_tiers(names))
            }
        }
    }

    /// Offline tier assignment from the curated lexicon; total and I/O-free.
    pub fn lexicon_tiers(&self, names: &[String]) -> Vec<TieredIngredient> {
        names
            .iter()
            .map(|name| {
                let matched = self.lexicon.classify(name);
                TieredIngredient {
                    name: name.clone(),
                    tier: matched.tier,
                    rationale: matched.claim,
                }
            })
            .collect()
    }

    fn build_prompt(&self, names: &[String], meat_type: MeatType) -> String {
        let mut prompt = String::with_capacity(512);
        prompt.push_str(
            "You are a food-safety analyst. Classify each ingredient of a packaged ",
        );
        prompt.push_str(&meat_type.to_string());
        prompt.push_str(
            " product into exactly one risk tier: \"high\", \"moderate\", or \"low\".\n\
             Reply with ONLY a JSON array, no prose, one object per ingredient:\n\
             [{\"name\": \"...\", \"tier\": \"high|moderate|low\", \"rationale\": \"one short sentence\"}]\n\
             Ingredients:\n",
        );
        for name in names {
            prompt.push_str("- ");
            prompt.push_str(name);
            prompt.push('\n');
        }
        prompt
    }

    /// Deterministic parse of the primary-path reply. Ingredients the reply
    /// missed are filled from the lexicon so tier assignment stays total.
    fn parse_reply(&self, reply: &str, names: &[String]) -> Option<Vec<TieredIngredient>> {
        let body = extract_json_array(reply)?;
        let raw: Vec<RawTier> = serde_json::from_str(body).ok()?;
        let mut by_name: HashMap<String, (RiskTier, String)> = HashMap::new();
        for entry in raw {
            let tier = RiskTier::parse(&entry.tier)?;
            by_name.insert(entry.name.to_lowercase(), (tier, entry.rationale));
        }

        let tiers = names
            .iter()
            .map(|name| match by_name.get(&name.to_lowercase()) {
                Some((tier, rationale)) => TieredIngredient {
                    name: name.clone(),
                    tier: *tier,
                    rationale: truncate_chars(rationale, self.controls.rationale_max_chars),
                },
                None => {
                    let matched = self.lexicon.classify(name);
                    TieredIngredient {
                        name: name.clone(),
                        tier: matched.tier,
                        rationale: matched.claim,
                    }
                }
            })
            .collect();
        Some(tiers)
    }
}

#[derive(Debug, Deserialize)]
struct RawTier {
    name: String,
    tier: String,
    #[serde(default)]
    rationale: String,
}

/// Slices the first top-level JSON array out of a possibly fenced reply.
fn extract_json_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

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

    fn categorizer(reasoner: ScriptedReasoner) -> Categorizer {
        Categorizer::new(
            Arc::new(reasoner),
            Arc::new(Lexicon::default()),
            Arc::new(AssessmentControls::default()),
        )
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test(flavor = "current_thread")]
    async fn parses_well_formed_reply() {
        let reply = r#"```json
        [{"name": "Sodium Nitrite", "tier": "high", "rationale": "curing agent"},
         {"name": "Water", "tier": "low", "rationale": "inert"}]
        ```"#;
        let categorizer = categorizer(ScriptedReasoner::new(vec![Ok(reply.to_string())]));
        let outcome = categorizer
            .categorize(&names(&["Sodium Nitrite", "Water"]), MeatType::Pork)
            .await;
        let tiers = match outcome {
            StageOutcome::Success(tiers) => tiers,
            other => panic!("expected success, got {other:?}"),
        };
        assert_eq!(tiers[0].tier, RiskTier::High);
        assert_eq!(tiers[1].tier, RiskTier::Low);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn missing_ingredients_filled_from_lexicon() {
        let reply = r#"[{"name": "Water", "tier": "low", "rationale": "inert"}]"#;
        let categorizer = categorizer(ScriptedReasoner::new(vec![Ok(reply.to_string())]));
        let outcome = categorizer
            .categorize(&names(&["Water", "Sodium Nitrite"]), MeatType::Pork)
            .await;
        let tiers = match outcome {
            StageOutcome::Success(tiers) => tiers,
            other => panic!("expected success, got {other:?}"),
        };
        assert_eq!(tiers.len(), 2);
        assert_eq!(tiers[1].name, "Sodium Nitrite");
        assert_eq!(tiers[1].tier, RiskTier::High);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn quota_failure_degrades_to_lexicon() {
        let categorizer = categorizer(ScriptedReasoner::new(vec![Err(ReasoningError::Failed {
            status: 429,
            body: "quota exhausted".to_string(),
        })]));
        let outcome = categorizer
            .categorize(&names(&["Sodium Nitrite", "Water", "Salt"]), MeatType::Pork)
            .await;
        let tiers = match outcome {
            StageOutcome::Degraded(tiers) => tiers,
            other => panic!("expected degraded, got {other:?}"),
        };
        assert_eq!(tiers[0].tier, RiskTier::High);
        assert_eq!(tiers[1].tier, RiskTier::Low);
        assert_eq!(tiers[2].tier, RiskTier::Low);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn unreachable_service_reports_unavailable() {
        let categorizer = categorizer(ScriptedReasoner::new(vec![Err(
            ReasoningError::Unreachable("connection refused".to_string()),
        )]));
        let outcome = categorizer
            .categorize(&names(&["Water"]), MeatType::Beef)
            .await;
        assert!(matches!(outcome, StageOutcome::Unavailable));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn garbage_reply_degrades_to_lexicon() {
        let categorizer = categorizer(ScriptedReasoner::new(vec![Ok(
            "the ingredients look fine to me".to_string(),
        )]));
        let outcome = categorizer
            .categorize(&names(&["Carrageenan"]), MeatType::Poultry)
            .await;
        let tiers = match outcome {
            StageOutcome::Degraded(tiers) => tiers,
            other => panic!("expected degraded, got {other:?}"),
        };
        assert_eq!(tiers[0].tier, RiskTier::Moderate);
    }
}
