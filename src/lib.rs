#![warn(missing_docs)]
//! Core library entry points for the meatwise assessment pipeline.

pub mod assessment;
pub mod cache;
pub mod categorizer;
pub mod composer;
pub mod controls;
pub mod enrichment;
pub mod lexicon;
pub mod normalizer;
pub mod pipeline;
pub mod projector;
pub mod reasoning;
pub mod sources;

pub use assessment::{
    Citation, CitationIdentifier, Grade, GradeColor, HealthAssessment, IngredientRecord,
    MeatType, NutritionFacts, ProductInput, RiskTier, SCHEMA_VERSION,
};
pub use cache::{CacheStore, MemoryCache};
pub use controls::{AssessmentControls, Cli, DailyValues};
pub use lexicon::Lexicon;
pub use pipeline::{
    AssessmentOutcome, AssessmentPipeline, AssessmentRequest, AssessmentResponse, PipelineState,
    StageOutcome,
};
pub use reasoning::{OpenAiReasoner, ReasoningService};
pub use sources::{BibliographicSource, CandidateRecord, CrossrefSource, PubMedSource};
