//! Pipeline tuning knobs shared across binaries.

use clap::Parser;
use std::time::Duration;

/// Reference daily values used for %DV evaluation.
///
/// Policy data, not mechanism: the thresholds and these amounts are expected
/// to be revised by nutrition policy owners, so they live here rather than in
/// the evaluation code.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyValues {
    /// Daily energy reference in kilocalories.
    pub calories_kcal: f64,
    /// Daily protein reference in grams.
    pub protein_g: f64,
    /// Daily fat reference in grams.
    pub fat_g: f64,
    /// Daily carbohydrate reference in grams.
    pub carbohydrate_g: f64,
    /// Daily salt reference in grams.
    pub salt_g: f64,
}

impl Default for DailyValues {
    fn default() -> Self {
        Self {
            calories_kcal: 2000.0,
            protein_g: 50.0,
            fat_g: 78.0,
            carbohydrate_g: 275.0,
            salt_g: 6.0,
        }
    }
}

/// Tunable knobs that bound pipeline behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct AssessmentControls {
    /// Cap on the normalized ingredient list length.
    pub max_ingredients: usize,
    /// Cap on raw ingredient text length (chars) before splitting.
    pub max_text_chars: usize,
    /// Hard deadline for the categorization reasoning call.
    pub categorizer_timeout: Duration,
    /// Hard deadline for each composer reasoning call.
    pub composer_timeout: Duration,
    /// Hard deadline for each bibliographic search call.
    pub search_timeout: Duration,
    /// Hard deadline for each identifier-existence check.
    pub verify_timeout: Duration,
    /// Maximum simultaneous outbound bibliographic calls per request.
    pub max_concurrent_searches: usize,
    /// Verified citations kept per ingredient.
    pub max_citations_per_ingredient: usize,
    /// Candidate records requested from each source per search.
    pub search_result_limit: usize,
    /// Bound on the overall summary (chars).
    pub summary_max_chars: usize,
    /// Bound on categorizer rationales (chars).
    pub rationale_max_chars: usize,
    /// Bound on per-ingredient micro-reports (chars).
    pub micro_report_max_chars: usize,
    /// Mobile projection bound on the summary (chars).
    pub mobile_summary_max_chars: usize,
    /// Mobile projection bound on micro-reports (chars).
    pub mobile_micro_report_max_chars: usize,
    /// TTL for cached ingredient categorizations.
    pub categorization_ttl: Duration,
    /// TTL for cached per-ingredient citation sets.
    pub citation_ttl: Duration,
    /// TTL for cached full assessments.
    pub assessment_ttl: Duration,
    /// Daily values backing the %DV evaluation.
    pub daily_values: DailyValues,
}

impl Default for AssessmentControls {
    fn default() -> Self {
        Self {
            max_ingredients: 32,
            max_text_chars: 4096,
            categorizer_timeout: Duration::from_secs(12),
            composer_timeout: Duration::from_secs(30),
            search_timeout: Duration::from_secs(6),
            verify_timeout: Duration::from_secs(4),
            max_concurrent_searches: 4,
            max_citations_per_ingredient: 3,
            search_result_limit: 5,
            summary_max_chars: 600,
            rationale_max_chars: 240,
            micro_report_max_chars: 400,
            mobile_summary_max_chars: 220,
            mobile_micro_report_max_chars: 160,
            categorization_ttl: Duration::from_secs(7 * 24 * 3600),
            citation_ttl: Duration::from_secs(30 * 24 * 3600),
            assessment_ttl: Duration::from_secs(24 * 3600),
            daily_values: DailyValues::default(),
        }
    }
}

/// Command-line interface shared by binaries that want pipeline controls.
#[derive(Parser, Debug, Clone)]
pub struct Cli {
    /// Maximum ingredients kept after normalization
    #[arg(long, env = "MEATWISE_MAX_INGREDIENTS", default_value_t = 32)]
    pub max_ingredients: usize,

    /// Seconds allowed for the categorization reasoning call
    #[arg(long, env = "MEATWISE_CATEGORIZER_TIMEOUT", default_value_t = 12)]
    pub categorizer_timeout_secs: u64,

    /// Seconds allowed for each composer reasoning call
    #[arg(long, env = "MEATWISE_COMPOSER_TIMEOUT", default_value_t = 30)]
    pub composer_timeout_secs: u64,

    /// Seconds allowed for each bibliographic search
    #[arg(long, env = "MEATWISE_SEARCH_TIMEOUT", default_value_t = 6)]
    pub search_timeout_secs: u64,

    /// Maximum simultaneous outbound bibliographic calls per request
    #[arg(long, env = "MEATWISE_MAX_SEARCHES", default_value_t = 4)]
    pub max_concurrent_searches: usize,

    /// Verified citations kept per ingredient
    #[arg(long, env = "MEATWISE_MAX_CITATIONS", default_value_t = 3)]
    pub max_citations_per_ingredient: usize,
}

impl Cli {
    /// Converts the parsed CLI into `AssessmentControls`.
    pub fn build_controls(&self) -> AssessmentControls {
        AssessmentControls {
            max_ingredients: self.max_ingredients,
            categorizer_timeout: Duration::from_secs(self.categorizer_timeout_secs),
            composer_timeout: Duration::from_secs(self.composer_timeout_secs),
            search_timeout: Duration::from_secs(self.search_timeout_secs),
            max_concurrent_searches: self.max_concurrent_searches.max(1),
            max_citations_per_ingredient: self.max_citations_per_ingredient.max(1),
            ..AssessmentControls::default()
        }
    }
}
