//! Curated fallback lexicon for offline risk categorization.
//!
//! The patterns are product-policy data. Defaults below cover the additives
//! most consistently flagged for processed meats; deployments can swap the
//! whole set via [`Lexicon::with_patterns`].

use crate::assessment::RiskTier;

/// One lexicon pattern: a keyword, its tier, and the health claim it carries.
#[derive(Debug, Clone)]
pub struct LexiconPattern {
    /// Lowercase keyword matched with word boundaries against ingredient names.
    pub keyword: String,
    /// Tier assigned on a match.
    pub tier: RiskTier,
    /// Short health-claim phrase; doubles as the citation search claim.
    pub claim: String,
}

impl LexiconPattern {
    fn new(keyword: &str, tier: RiskTier, claim: &str) -> Self {
        Self {
            keyword: keyword.to_string(),
            tier,
            claim: claim.to_string(),
        }
    }
}

/// Outcome of a lexicon lookup.
#[derive(Debug, Clone)]
pub struct LexiconMatch {
    /// Assigned tier; `Low` when no pattern matched.
    pub tier: RiskTier,
    /// Claim phrase for the matched pattern, or a generic low-risk note.
    pub claim: String,
}

/// Static keyword matcher that never performs I/O and always completes.
#[derive(Debug, Clone)]
pub struct Lexicon {
    patterns: Vec<LexiconPattern>,
}

impl Lexicon {
    /// Builds a lexicon from a custom pattern set.
    pub fn with_patterns(patterns: Vec<LexiconPattern>) -> Self {
        Self { patterns }
    }

    /// Classifies one ingredient name; unmatched names default to low risk.
    pub fn classify(&self, ingredient: &str) -> LexiconMatch {
        let folded = ingredient.to_lowercase();
        // High-tier patterns are listed first, so the first hit wins the
        // strictest applicable tier.
        for pattern in &self.patterns {
            if contains_word(&folded, &pattern.keyword) {
                return LexiconMatch {
                    tier: pattern.tier,
                    claim: pattern.claim.clone(),
                };
            }
        }
        LexiconMatch {
            tier: RiskTier::Low,
            claim: "no known elevated health concern for this ingredient".to_string(),
        }
    }
}

impl Default for Lexicon {
    fn default() -> Self {
        let patterns = vec![
            LexiconPattern::new(
                "sodium nitrite",
                RiskTier::High,
                "nitrite curing salts and N-nitroso compound formation in processed meat",
            ),
            LexiconPattern::new(
                "potassium nitrite",
                RiskTier::High,
                "nitrite curing salts and N-nitroso compound formation in processed meat",
            ),
            LexiconPattern::new(
                "sodium nitrate",
                RiskTier::High,
                "dietary nitrate from cured meat and endogenous nitrosation",
            ),
            LexiconPattern::new(
                "potassium nitrate",
                RiskTier::High,
                "dietary nitrate from cured meat and endogenous nitrosation",
            ),
            LexiconPattern::new(
                "nitrite",
                RiskTier::High,
                "nitrite curing salts and N-nitroso compound formation in processed meat",
            ),
            LexiconPattern::new(
                "nitrate",
                RiskTier::High,
                "dietary nitrate from cured meat and endogenous nitrosation",
            ),
            LexiconPattern::new(
                "bha",
                RiskTier::High,
                "butylated hydroxyanisole as a possible carcinogen in animal studies",
            ),
            LexiconPattern::new(
                "butylated hydroxyanisole",
                RiskTier::High,
                "butylated hydroxyanisole as a possible carcinogen in animal studies",
            ),
            LexiconPattern::new(
                "bht",
                RiskTier::High,
                "butylated hydroxytoluene safety in cured and preserved meats",
            ),
            LexiconPattern::new(
                "butylated hydroxytoluene",
                RiskTier::High,
                "butylated hydroxytoluene safety in cured and preserved meats",
            ),
            LexiconPattern::new(
                "monosodium glutamate",
                RiskTier::Moderate,
                "monosodium glutamate intake and reported sensitivity symptoms",
            ),
            LexiconPattern::new(
                "msg",
                RiskTier::Moderate,
                "monosodium glutamate intake and reported sensitivity symptoms",
            ),
            LexiconPattern::new(
                "sodium phosphate",
                RiskTier::Moderate,
                "inorganic phosphate additives and cardiovascular risk markers",
            ),
            LexiconPattern::new(
                "phosphate",
                RiskTier::Moderate,
                "inorganic phosphate additives and cardiovascular risk markers",
            ),
            LexiconPattern::new(
                "carrageenan",
                RiskTier::Moderate,
                "carrageenan and gastrointestinal inflammation findings",
            ),
            LexiconPattern::new(
                "sodium erythorbate",
                RiskTier::Moderate,
                "sodium erythorbate as a cure accelerator in processed meat",
            ),
            LexiconPattern::new(
                "caramel color",
                RiskTier::Moderate,
                "4-methylimidazole in class III and IV caramel colors",
            ),
            LexiconPattern::new(
                "corn syrup",
                RiskTier::Moderate,
                "added sugars from corn syrup and metabolic risk",
            ),
            LexiconPattern::new(
                "smoke flavor",
                RiskTier::Moderate,
                "polycyclic aromatic hydrocarbons in smoke flavorings",
            ),
            LexiconPattern::new(
                "artificial flavor",
                RiskTier::Moderate,
                "synthetic flavoring agents in processed meat products",
            ),
        ];
        Self::with_patterns(patterns)
    }
}

/// Case-folded substring match constrained to word boundaries, so `bha`
/// matches `BHA (preservative)` but not `bhaji`.
fn contains_word(haystack: &str, needle: &str) -> bool {
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(needle) {
        let begin = start + pos;
        let end = begin + needle.len();
        let left_ok = begin == 0
            || !haystack[..begin]
                .chars()
                .next_back()
                .is_some_and(|ch| ch.is_alphanumeric());
        let right_ok = end == haystack.len()
            || !haystack[end..]
                .chars()
                .next()
                .is_some_and(|ch| ch.is_alphanumeric());
        if left_ok && right_ok {
            return true;
        }
        start = begin + needle.len().max(1);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nitrite_salts_are_high_risk() {
        let lexicon = Lexicon::default();
        assert_eq!(lexicon.classify("Sodium Nitrite").tier, RiskTier::High);
        assert_eq!(lexicon.classify("Cure (sodium nitrite)").tier, RiskTier::High);
    }

    #[test]
    fn unmatched_ingredients_default_to_low() {
        let lexicon = Lexicon::default();
        assert_eq!(lexicon.classify("Water").tier, RiskTier::Low);
        assert_eq!(lexicon.classify("Salt").tier, RiskTier::Low);
    }

    #[test]
    fn keyword_match_respects_word_boundaries() {
        let lexicon = Lexicon::default();
        assert_eq!(lexicon.classify("BHA added as preservative").tier, RiskTier::High);
        assert_eq!(lexicon.classify("Onion Bhaji Seasoning").tier, RiskTier::Low);
    }

    #[test]
    fn moderate_patterns_match() {
        let lexicon = Lexicon::default();
        assert_eq!(lexicon.classify("Carrageenan").tier, RiskTier::Moderate);
        assert_eq!(
            lexicon.classify("Monosodium Glutamate").tier,
            RiskTier::Moderate
        );
    }
}
