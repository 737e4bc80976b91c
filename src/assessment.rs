//! Core data model shared by every pipeline stage.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Output-format revision embedded in cache keys and emitted assessments.
///
/// Bumping this invalidates every cached entry without an explicit sweep,
/// because keys carry the version as a prefix component.
pub const SCHEMA_VERSION: u32 = 2;

/// Immutable product data supplied by the external catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductInput {
    /// Catalog product code (barcode or internal id).
    pub code: String,
    /// Display name.
    pub name: String,
    /// Brand name.
    pub brand: String,
    /// Raw ingredient declaration as printed on the package.
    pub ingredient_text: String,
    /// Per-serving nutrition facts.
    pub nutrition: NutritionFacts,
}

/// Per-serving nutrition facts from the package label.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NutritionFacts {
    /// Energy in kilocalories.
    pub calories_kcal: f64,
    /// Protein in grams.
    pub protein_g: f64,
    /// Total fat in grams.
    pub fat_g: f64,
    /// Carbohydrate in grams.
    pub carbohydrate_g: f64,
    /// Salt in grams.
    pub salt_g: f64,
}

/// Broad category of the meat product, included in categorization prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum MeatType {
    /// Beef products.
    Beef,
    /// Pork products, including cured pork.
    Pork,
    /// Chicken, turkey and other poultry.
    Poultry,
    /// Fish and seafood.
    Fish,
    /// Blends of more than one meat.
    Mixed,
    /// Category not supplied by the catalog.
    Unknown,
}

impl fmt::Display for MeatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MeatType::Beef => "beef",
            MeatType::Pork => "pork",
            MeatType::Poultry => "poultry",
            MeatType::Fish => "fish",
            MeatType::Mixed => "mixed meat",
            MeatType::Unknown => "unspecified meat",
        };
        f.write_str(label)
    }
}

/// Primary health-concern classification of a single ingredient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    /// Strong or consistent evidence of harm at typical intakes.
    High,
    /// Mixed or dose-dependent evidence.
    Moderate,
    /// No specific concern identified.
    Low,
}

impl RiskTier {
    /// Parses the tier labels the reasoning service is instructed to emit.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "high" => Some(RiskTier::High),
            "moderate" | "medium" => Some(RiskTier::Moderate),
            "low" => Some(RiskTier::Low),
            _ => None,
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskTier::High => f.write_str("high"),
            RiskTier::Moderate => f.write_str("moderate"),
            RiskTier::Low => f.write_str("low"),
        }
    }
}

/// One categorized ingredient inside an assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngredientRecord {
    /// Display-cased ingredient name from the normalized list.
    pub name: String,
    /// Assigned risk tier.
    pub risk_tier: RiskTier,
    /// Short categorizer rationale; stripped by the mobile projection.
    pub rationale: String,
    /// Narrative micro-report for this ingredient.
    pub micro_report: String,
    /// Ordered, duplicate-free references into [`HealthAssessment::citations`].
    pub citation_ids: Vec<u32>,
}

/// Verifiable bibliographic identifier attached to a citation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CitationIdentifier {
    /// Digital Object Identifier, e.g. `10.1000/xyz123`.
    Doi(String),
    /// PubMed record id.
    Pmid(String),
}

impl CitationIdentifier {
    /// Canonical lowercase form used for dedupe and cache keys.
    pub fn canonical(&self) -> String {
        match self {
            CitationIdentifier::Doi(doi) => format!("doi:{}", doi.trim().to_ascii_lowercase()),
            CitationIdentifier::Pmid(pmid) => format!("pmid:{}", pmid.trim()),
        }
    }
}

impl fmt::Display for CitationIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// A verified bibliographic reference backing one or more micro-reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    /// Assessment-local id, 1-based, stable within one assessment.
    pub id: u32,
    /// Record title.
    pub title: String,
    /// Author names, possibly truncated by the source.
    pub authors: Vec<String>,
    /// Journal or venue.
    pub source: String,
    /// Publication year when known.
    pub year: Option<u16>,
    /// Verified identifier; never absent on an emitted citation.
    pub identifier: CitationIdentifier,
    /// Resolvable URL for the record.
    pub url: String,
    /// Why this record was retrieved (the health-claim phrase searched).
    pub relevance_note: String,
}

/// %-daily-value evaluation band for a reported nutrient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DvEvaluation {
    /// Below 5% of the daily value per serving.
    Low,
    /// Between 5% and 20% of the daily value per serving.
    Moderate,
    /// At or above 20% of the daily value per serving.
    High,
}

/// Deterministic evaluation of a single nutrient against daily values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NutritionInsight {
    /// Nutrient label, e.g. `salt`.
    pub nutrient: String,
    /// Amount per serving in `unit`.
    pub amount_per_serving: f64,
    /// Unit for the amount, e.g. `g` or `kcal`.
    pub unit: String,
    /// Band derived from %DV thresholds (high >= 20%, moderate >= 5%).
    pub evaluation: DvEvaluation,
    /// Narrative comment, templated or service-written.
    pub comment: String,
}

/// Overall letter grade for the product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    /// Parses the single-letter labels used in service replies.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "A" => Some(Grade::A),
            "B" => Some(Grade::B),
            "C" => Some(Grade::C),
            "D" => Some(Grade::D),
            "F" => Some(Grade::F),
            _ => None,
        }
    }

    /// Display color paired with each grade.
    pub fn color(self) -> GradeColor {
        match self {
            Grade::A | Grade::B => GradeColor::Green,
            Grade::C => GradeColor::Yellow,
            Grade::D => GradeColor::Orange,
            Grade::F => GradeColor::Red,
        }
    }
}

/// UI color band paired with the letter grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum GradeColor {
    Green,
    Yellow,
    Orange,
    Red,
}

/// Complete, citation-backed health assessment for one product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthAssessment {
    /// Bounded-length overall narrative.
    pub summary: String,
    /// Overall letter grade.
    pub grade: Grade,
    /// Color band matching the grade.
    pub color: GradeColor,
    /// High-risk ingredients, in normalized list order.
    pub high_risk: Vec<IngredientRecord>,
    /// Moderate-risk ingredients, in normalized list order.
    pub moderate_risk: Vec<IngredientRecord>,
    /// Low-risk ingredients, in normalized list order.
    pub low_risk: Vec<IngredientRecord>,
    /// Per-nutrient evaluations.
    pub nutrition: Vec<NutritionInsight>,
    /// Verified citations referenced by the micro-reports.
    pub citations: Vec<Citation>,
    /// Set only on the minimal fallback rung: no AI-derived content inside.
    pub limited: bool,
    /// Epoch milliseconds when the assessment was generated.
    pub generated_at_epoch_ms: u64,
    /// Output-format revision that produced this assessment.
    pub schema_version: u32,
}

impl HealthAssessment {
    /// Iterates every ingredient record across the three tiers.
    pub fn records(&self) -> impl Iterator<Item = &IngredientRecord> {
        self.high_risk
            .iter()
            .chain(self.moderate_risk.iter())
            .chain(self.low_risk.iter())
    }
}

/// Current time as epoch milliseconds.
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_labels_round_trip() {
        assert_eq!(RiskTier::parse("High"), Some(RiskTier::High));
        assert_eq!(RiskTier::parse(" medium "), Some(RiskTier::Moderate));
        assert_eq!(RiskTier::parse("low"), Some(RiskTier::Low));
        assert_eq!(RiskTier::parse("severe"), None);
    }

    #[test]
    fn grade_colors_follow_mapping() {
        assert_eq!(Grade::A.color(), GradeColor::Green);
        assert_eq!(Grade::B.color(), GradeColor::Green);
        assert_eq!(Grade::C.color(), GradeColor::Yellow);
        assert_eq!(Grade::D.color(), GradeColor::Orange);
        assert_eq!(Grade::F.color(), GradeColor::Red);
    }

    #[test]
    fn identifier_canonical_forms() {
        let doi = CitationIdentifier::Doi("10.1000/ABC".to_string());
        assert_eq!(doi.canonical(), "doi:10.1000/abc");
        let pmid = CitationIdentifier::Pmid("123456".to_string());
        assert_eq!(pmid.canonical(), "pmid:123456");
    }
}
