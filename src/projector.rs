//! Mobile projection of assessments: the single home for truncation rules.

use crate::assessment::{DvEvaluation, HealthAssessment, IngredientRecord};
use crate::controls::AssessmentControls;

/// Truncates to at most `max_chars` characters, appending an ellipsis when
/// text was cut. Stable: output never exceeds `max_chars`, so re-truncating
/// returns the input unchanged.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars - 1).collect();
    out.push('…');
    out
}

/// Pure, stateless reduction of a full assessment for bandwidth-constrained
/// callers. Idempotent; never alters grade, color, or citation identifiers.
pub fn project(assessment: &HealthAssessment, controls: &AssessmentControls) -> HealthAssessment {
    let shrink = |records: &[IngredientRecord]| -> Vec<IngredientRecord> {
        records
            .iter()
            .map(|record| IngredientRecord {
                name: record.name.clone(),
                risk_tier: record.risk_tier,
                rationale: String::new(),
                micro_report: truncate_chars(
                    &record.micro_report,
                    controls.mobile_micro_report_max_chars,
                ),
                citation_ids: record.citation_ids.clone(),
            })
            .collect()
    };

    HealthAssessment {
        summary: truncate_chars(&assessment.summary, controls.mobile_summary_max_chars),
        grade: assessment.grade,
        color: assessment.color,
        high_risk: shrink(&assessment.high_risk),
        moderate_risk: shrink(&assessment.moderate_risk),
        low_risk: shrink(&assessment.low_risk),
        nutrition: assessment
            .nutrition
            .iter()
            .filter(|insight| insight.evaluation != DvEvaluation::Low)
            .cloned()
            .collect(),
        citations: assessment.citations.clone(),
        limited: assessment.limited,
        generated_at_epoch_ms: assessment.generated_at_epoch_ms,
        schema_version: assessment.schema_version,
    }
}
