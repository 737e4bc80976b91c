//! Grounded assessment composition: one structured reasoning call, a
//! deterministic parse, one stricter retry, then template assembly.

use crate::assessment::{
    epoch_ms, Citation, DvEvaluation, Grade, HealthAssessment, IngredientRecord, NutritionFacts,
    NutritionInsight, ProductInput, RiskTier, SCHEMA_VERSION,
};
use crate::categorizer::TieredIngredient;
use crate::controls::{AssessmentControls, DailyValues};
use crate::enrichment::IngredientEvidence;
use crate::pipeline::StageOutcome;
use crate::projector::truncate_chars;
use crate::reasoning::ReasoningService;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::warn;

const COMPOSER_MAX_TOKENS: usize = 2048;

const STRICT_RETRY_INSTRUCTION: &str = "\nYour previous reply could not be parsed. \
Respond with ONLY the JSON object described above: no markdown fences, no prose \
before or after, double-quoted keys, and a grade that is exactly one of A, B, C, D, F.";

/// Composes the final assessment from categorized ingredients and evidence.
pub struct Composer {
    reasoning: Arc<dyn ReasoningService>,
    controls: Arc<AssessmentControls>,
}

impl Composer {
    /// Builds a new composer.
    pub fn new(reasoning: Arc<dyn ReasoningService>, controls: Arc<AssessmentControls>) -> Self {
        Self {
            reasoning,
            controls,
        }
    }

    /// Runs the grounded composition call.
    ///
    /// `Success` carries the narrative assessment; `Degraded` carries the
    /// template-assembled fallback. Composition never reports `Unavailable`:
    /// by this point the request has already survived categorization, so a
    /// dead service here degrades rather than escalating to minimal.
    pub async fn compose(
        &self,
        product: &ProductInput,
        tiers: &[TieredIngredient],
        evidence: &[IngredientEvidence],
    ) -> StageOutcome<HealthAssessment> {
        let (citations, ids_by_ingredient) = assign_citations(evidence);
        let insights = evaluate_nutrition(&product.nutrition, &self.controls.daily_values);
        let prompt = self.build_prompt(product, tiers, &citations, &insights);

        let first = self.call_once(&prompt).await;
        let reply = match first {
            Some(text) => match parse_reply(&text) {
                Some(reply) => Some(reply),
                None => {
                    // The single permitted retry: parse failure only.
                    warn!("composer: unparseable reply, retrying with stricter instructions");
                    let strict = format!("{prompt}{STRICT_RETRY_INSTRUCTION}");
                    match self.call_once(&strict).await {
                        Some(text) => parse_reply(&text),
                        None => None,
                    }
                }
            },
            None => None,
        };

        match reply {
            Some(reply) => StageOutcome::Success(self.assemble(
                reply,
                tiers,
                citations,
                &ids_by_ingredient,
                insights,
            )),
            None => {
                warn!("composer: falling back to template assembly");
                StageOutcome::Degraded(self.template_assessment(product, tiers, evidence, false))
            }
        }
    }

    /// Template-assembled assessment built purely from categorization and
    /// citation data. With `limited` set this is the minimal rung: callers
    /// pass empty evidence and the output carries the limited marker.
    pub fn template_assessment(
        &self,
        product: &ProductInput,
        tiers: &[TieredIngredient],
        evidence: &[IngredientEvidence],
        limited: bool,
    ) -> HealthAssessment {
        let (citations, ids_by_ingredient) = assign_citations(evidence);
        let insights = evaluate_nutrition(&product.nutrition, &self.controls.daily_values);

        let high = tiers.iter().filter(|t| t.tier == RiskTier::High).count();
        let moderate = tiers
            .iter()
            .filter(|t| t.tier == RiskTier::Moderate)
            .count();
        let grade = grade_from_tiers(high, moderate);

        let mut summary = format!(
            "This product lists {} ingredient(s): {} high-risk and {} moderate-risk. ",
            tiers.len(),
            high,
            moderate
        );
        if limited {
            summary.push_str(
                "Limited assessment: the evidence service was unreachable, so this \
                 report uses only the built-in risk rating with no cited narrative.",
            );
        } else {
            summary.push_str(
                "The narrative service was unavailable; this report was assembled \
                 from the risk categorization and verified citations only.",
            );
        }

        let records = |wanted: RiskTier| -> Vec<IngredientRecord> {
            tiers
                .iter()
                .filter(|t| t.tier == wanted)
                .map(|t| {
                    let ids = ids_by_ingredient
                        .get(&t.name.to_lowercase())
                        .cloned()
                        .unwrap_or_default();
                    IngredientRecord {
                        name: t.name.clone(),
                        risk_tier: t.tier,
                        rationale: t.rationale.clone(),
                        micro_report: template_micro_report(t, &ids),
                        citation_ids: ids,
                    }
                })
                .collect()
        };

        HealthAssessment {
            summary: truncate_chars(&summary, self.controls.summary_max_chars),
            grade,
            color: grade.color(),
            high_risk: records(RiskTier::High),
            moderate_risk: records(RiskTier::Moderate),
            low_risk: records(RiskTier::Low),
            nutrition: insights,
            citations,
            limited,
            generated_at_epoch_ms: epoch_ms(),
            schema_version: SCHEMA_VERSION,
        }
    }

    async fn call_once(&self, prompt: &str) -> Option<String> {
        match timeout(
            self.controls.composer_timeout,
            self.reasoning.complete(prompt, COMPOSER_MAX_TOKENS),
        )
        .await
        {
            Ok(Ok(text)) => Some(text),
            Ok(Err(err)) => {
                warn!(%err, "composer: reasoning call failed");
                None
            }
            Err(_) => {
                warn!("composer: reasoning call timed out");
                None
            }
        }
    }

    fn build_prompt(
        &self,
        product: &ProductInput,
        tiers: &[TieredIngredient],
        citations: &[Citation],
        insights: &[NutritionInsight],
    ) -> String {
        let mut prompt = String::with_capacity(2048);
        let _ = writeln!(
            prompt,
            "You are writing a consumer health assessment for \"{} {}\" (product code {}).",
            product.brand, product.name, product.code
        );
        prompt.push_str("Categorized ingredients (name | tier | rationale):\n");
        for tier in tiers {
            let _ = writeln!(prompt, "- {} | {} | {}", tier.name, tier.tier, tier.rationale);
        }

        prompt.push_str("\nVerified citations you may reference inline as [id]:\n");
        if citations.is_empty() {
            prompt.push_str("(none; write micro-reports as clearly uncited general knowledge)\n");
        }
        for citation in citations {
            let _ = writeln!(
                prompt,
                "[{}] {} ({}, {}) {}",
                citation.id,
                citation.title,
                citation.source,
                citation
                    .year
                    .map(|y| y.to_string())
                    .unwrap_or_else(|| "n.d.".to_string()),
                citation.identifier
            );
        }

        prompt.push_str("\nNutrition per serving with precomputed %DV bands:\n");
        for insight in insights {
            let _ = writeln!(
                prompt,
                "- {}: {} {} ({:?})",
                insight.nutrient, insight.amount_per_serving, insight.unit, insight.evaluation
            );
        }

        let _ = writeln!(
            prompt,
            "\nReply with ONLY a JSON object:\n\
             {{\"summary\": \"<= {} chars overall assessment\",\n\
             \"grade\": \"A|B|C|D|F\",\n\
             \"micro_reports\": {{\"<ingredient name>\": \"report citing [id] where evidence exists\"}},\n\
             \"nutrition_comments\": {{\"<nutrient>\": \"one sentence\"}}}}\n\
             Cover every high and moderate ingredient in micro_reports. Cite only the \
             listed ids. Where no citation exists, phrase the report as general knowledge.",
            self.controls.summary_max_chars
        );
        prompt
    }

    fn assemble(
        &self,
        reply: ComposedReply,
        tiers: &[TieredIngredient],
        citations: Vec<Citation>,
        ids_by_ingredient: &HashMap<String, Vec<u32>>,
        mut insights: Vec<NutritionInsight>,
    ) -> HealthAssessment {
        let known_ids: BTreeSet<u32> = citations.iter().map(|c| c.id).collect();
        let micro_by_name: HashMap<String, String> = reply
            .micro_reports
            .into_iter()
            .map(|(name, text)| (name.to_lowercase(), text))
            .collect();
        let comments_by_nutrient: HashMap<String, String> = reply
            .nutrition_comments
            .into_iter()
            .map(|(nutrient, text)| (nutrient.to_lowercase(), text))
            .collect();

        for insight in &mut insights {
            if let Some(comment) = comments_by_nutrient.get(&insight.nutrient.to_lowercase()) {
                insight.comment = truncate_chars(comment, self.controls.rationale_max_chars);
            }
        }

        let records = |wanted: RiskTier| -> Vec<IngredientRecord> {
            tiers
                .iter()
                .filter(|t| t.tier == wanted)
                .map(|t| {
                    let key = t.name.to_lowercase();
                    let ids = ids_by_ingredient.get(&key).cloned().unwrap_or_default();
                    let micro = match micro_by_name.get(&key) {
                        Some(text) => truncate_chars(
                            &strip_unknown_refs(text, &known_ids),
                            self.controls.micro_report_max_chars,
                        ),
                        None => template_micro_report(t, &ids),
                    };
                    IngredientRecord {
                        name: t.name.clone(),
                        risk_tier: t.tier,
                        rationale: t.rationale.clone(),
                        micro_report: micro,
                        citation_ids: ids,
                    }
                })
                .collect()
        };

        HealthAssessment {
            summary: truncate_chars(&reply.summary, self.controls.summary_max_chars),
            grade: reply.grade,
            color: reply.grade.color(),
            high_risk: records(RiskTier::High),
            moderate_risk: records(RiskTier::Moderate),
            low_risk: records(RiskTier::Low),
            nutrition: insights,
            citations,
            limited: false,
            generated_at_epoch_ms: epoch_ms(),
            schema_version: SCHEMA_VERSION,
        }
    }
}

/// Deterministic %DV evaluation: high >= 20% DV, moderate >= 5%, else low.
pub fn evaluate_nutrition(facts: &NutritionFacts, dv: &DailyValues) -> Vec<NutritionInsight> {
    let entries = [
        ("calories", facts.calories_kcal, "kcal", dv.calories_kcal),
        ("protein", facts.protein_g, "g", dv.protein_g),
        ("fat", facts.fat_g, "g", dv.fat_g),
        ("carbohydrate", facts.carbohydrate_g, "g", dv.carbohydrate_g),
        ("salt", facts.salt_g, "g", dv.salt_g),
    ];
    entries
        .into_iter()
        .map(|(nutrient, amount, unit, daily)| {
            let percent = if daily > 0.0 {
                (amount / daily) * 100.0
            } else {
                0.0
            };
            let evaluation = if percent >= 20.0 {
                DvEvaluation::High
            } else if percent >= 5.0 {
                DvEvaluation::Moderate
            } else {
                DvEvaluation::Low
            };
            NutritionInsight {
                nutrient: nutrient.to_string(),
                amount_per_serving: amount,
                unit: unit.to_string(),
                evaluation,
                comment: format!(
                    "{amount} {unit} per serving is {:.0}% of the daily reference value.",
                    percent
                ),
            }
        })
        .collect()
}

/// Grade derived from tier counts when the narrative service cannot grade.
pub fn grade_from_tiers(high: usize, moderate: usize) -> Grade {
    match (high, moderate) {
        (h, _) if h >= 2 => Grade::F,
        (1, _) => Grade::D,
        (0, m) if m >= 2 => Grade::C,
        (0, 1) => Grade::B,
        _ => Grade::A,
    }
}

fn template_micro_report(tier: &TieredIngredient, citation_ids: &[u32]) -> String {
    if citation_ids.is_empty() {
        if tier.tier == RiskTier::Low {
            format!("{}: no specific concern identified.", tier.name)
        } else {
            format!(
                "General guidance (uncited): {} is rated {} risk: {}.",
                tier.name, tier.tier, tier.rationale
            )
        }
    } else {
        let refs = citation_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "{} is rated {} risk: {}. See citations [{refs}].",
            tier.name, tier.tier, tier.rationale
        )
    }
}

/// Assigns assessment-local 1-based citation ids, deduplicating identifiers
/// globally while keeping first-seen order across ingredients.
fn assign_citations(
    evidence: &[IngredientEvidence],
) -> (Vec<Citation>, HashMap<String, Vec<u32>>) {
    let mut citations: Vec<Citation> = Vec::new();
    let mut id_by_identifier: HashMap<String, u32> = HashMap::new();
    let mut ids_by_ingredient: HashMap<String, Vec<u32>> = HashMap::new();

    for item in evidence {
        let mut ids: Vec<u32> = Vec::new();
        for record in &item.records {
            let canonical = record.identifier.canonical();
            let id = match id_by_identifier.get(&canonical) {
                Some(id) => *id,
                None => {
                    let id = citations.len() as u32 + 1;
                    id_by_identifier.insert(canonical, id);
                    citations.push(Citation {
                        id,
                        title: record.title.clone(),
                        authors: record.authors.clone(),
                        source: record.venue.clone(),
                        year: record.year,
                        identifier: record.identifier.clone(),
                        url: record.url.clone(),
                        relevance_note: item.claim.clone(),
                    });
                    id
                }
            };
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids_by_ingredient.insert(item.ingredient.to_lowercase(), ids);
    }

    (citations, ids_by_ingredient)
}

#[derive(Debug, Deserialize)]
struct ComposedReply {
    summary: String,
    #[serde(deserialize_with = "deserialize_grade")]
    grade: Grade,
    #[serde(default)]
    micro_reports: HashMap<String, String>,
    #[serde(default)]
    nutrition_comments: HashMap<String, String>,
}

fn deserialize_grade<'de, D>(deserializer: D) -> Result<Grade, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let label = String::deserialize(deserializer)?;
    Grade::parse(&label).ok_or_else(|| serde::de::Error::custom("unrecognized grade label"))
}

fn parse_reply(text: &str) -> Option<ComposedReply> {
    let body = extract_json_object(text)?;
    let reply: ComposedReply = serde_json::from_str(body).ok()?;
    if reply.summary.trim().is_empty() {
        return None;
    }
    Some(reply)
}

/// Slices the first top-level JSON object out of a possibly fenced reply.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Removes inline `[n]` references to ids outside the known set; any other
/// bracketed text passes through untouched.
fn strip_unknown_refs(text: &str, known: &BTreeSet<u32>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('[') {
        let Some(close_rel) = rest[open..].find(']') else {
            break;
        };
        let close = open + close_rel;
        out.push_str(&rest[..open]);
        let inner = &rest[open + 1..close];
        if inner
            .chars()
            .all(|ch| ch.is_ascii_digit() || ch == ',' || ch == ' ')
            && inner.chars().any(|ch| ch.is_ascii_digit())
        {
            let kept: Vec<&str> = inner
                .split(',')
                .map(str::trim)
                .filter(|token| {
                    token
                        .parse::<u32>()
                        .map(|id| known.contains(&id))
                        .unwrap_or(false)
                })
                .collect();
            if !kept.is_empty() {
                out.push('[');
                out.push_str(&kept.join(", "));
                out.push(']');
            } else if out.ends_with(' ') && rest[close + 1..].starts_with('.') {
                // Avoid "evidence ." artifacts when a lone reference is dropped.
                out.pop();
            }
        } else {
            out.push_str(&rest[open..=close]);
        }
        rest = &rest[close + 1..];
    }
    out.push_str(rest);
    out
}
