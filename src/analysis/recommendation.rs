use std::collections::BTreeMap;
use tracing::debug;

use crate::tables::DrugRuleTable;
use crate::types::*;

/// Recommendation returned whenever no rule covers the request
pub const FALLBACK_RECOMMENDATION: &str =
    "Insufficient pharmacogenomic data. Use standard dosing with clinical monitoring.";

/// Monitoring text used when a recommendation is a single sentence
pub const GENERIC_MONITORING: &str = "Standard clinical monitoring recommended.";

const SENTENCE_BOUNDARY: &str = ". ";

/// Drug-rule lookup plus the drug → gene index built from the same table
#[derive(Debug, Clone)]
pub struct RecommendationResolver<'a> {
    rules: &'a DrugRuleTable,
    drug_index: BTreeMap<String, Vec<Gene>>,
}

impl<'a> RecommendationResolver<'a> {
    pub fn new(rules: &'a DrugRuleTable) -> Self {
        let mut drug_index: BTreeMap<String, Vec<Gene>> = BTreeMap::new();
        for gene in rules.genes() {
            for drug in rules.drugs(gene).into_iter().flat_map(|drugs| drugs.keys()) {
                drug_index.entry(drug.clone()).or_default().push(gene);
            }
        }

        Self { rules, drug_index }
    }

    /// Primary gene for a drug: the first gene listing it in the rule table
    pub fn relevant_gene(&self, drug: &str) -> Option<Gene> {
        self.drug_index
            .get(&normalize_drug(drug))
            .and_then(|genes| genes.first())
            .copied()
    }

    pub fn is_supported(&self, drug: &str) -> bool {
        self.drug_index.contains_key(&normalize_drug(drug))
    }

    /// Every drug key in the rule table, sorted
    pub fn supported_drugs(&self) -> Vec<String> {
        self.drug_index.keys().cloned().collect()
    }

    /// Every gene that lists `drug`, in table order
    pub fn genes_for(&self, drug: &str) -> &[Gene] {
        self.drug_index
            .get(&normalize_drug(drug))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Look up the rule for (drug, gene, phenotype).
    ///
    /// A hit keeps the caller's confidence (clamped). Any miss yields the
    /// `Unknown`/`none` fallback with confidence 0, whatever was passed in.
    pub fn resolve(
        &self,
        drug: &str,
        gene: Gene,
        phenotype: Phenotype,
        confidence: f64,
    ) -> DrugDecision {
        let drug_key = normalize_drug(drug);

        let rule = self
            .rules
            .drugs(gene)
            .and_then(|drugs| drugs.get(&drug_key))
            .and_then(|by_phenotype| by_phenotype.get(&phenotype));

        match rule {
            Some(rule) => DrugDecision::new(
                rule.risk_label,
                rule.severity,
                rule.recommendation.clone(),
                confidence,
            ),
            None => {
                debug!(
                    "No rule for {} / {} / {}, using fallback recommendation",
                    drug_key, gene, phenotype
                );
                Self::fallback()
            }
        }
    }

    pub fn fallback() -> DrugDecision {
        DrugDecision::new(
            RiskLabel::Unknown,
            Severity::None,
            FALLBACK_RECOMMENDATION,
            0.0,
        )
    }
}

fn normalize_drug(drug: &str) -> String {
    drug.trim().to_lowercase()
}

/// Split recommendation text on `". "`.
///
/// The first sentence is the summary, everything but the last sentence is the
/// dosing guidance and the last sentence is the monitoring guidance. A single
/// sentence serves as both summary and dosing.
pub fn split_recommendation(text: &str) -> ClinicalRecommendation {
    let sentences: Vec<&str> = text.split(SENTENCE_BOUNDARY).collect();

    match sentences.as_slice() {
        [first, .., last] => ClinicalRecommendation {
            summary: first.to_string(),
            dosing_guidance: sentences[..sentences.len() - 1].join(SENTENCE_BOUNDARY),
            monitoring_requirements: last.to_string(),
        },
        _ => ClinicalRecommendation {
            summary: text.to_string(),
            dosing_guidance: text.to_string(),
            monitoring_requirements: GENERIC_MONITORING.to_string(),
        },
    }
}
