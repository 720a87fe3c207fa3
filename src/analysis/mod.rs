//! The decision pipeline and its orchestrator.
//!
//! ```text
//! VCF text → VcfParser → AlleleMatcher → DiplotypeComposer → PhenotypeResolver
//!                                                              ↓ (per drug)
//!                                                   RecommendationResolver
//! ```
//!
//! Every stage is a pure function of its input and the immutable
//! [`KnowledgeBase`], so profiles and drugs are computed in parallel.

mod alleles;
mod diplotype;
mod phenotype;
mod recommendation;

pub use alleles::AlleleMatcher;
pub use diplotype::{normalize_diplotype, reverse_diplotype, AlleleKey, Diplotype, DiplotypeComposer, GenotypeSummary};
pub use phenotype::{classify_activity_score, PhenotypeResolver, ResolvedPhenotype, NM_LOWER_BOUND, NM_UPPER_BOUND};
pub use recommendation::{
    split_recommendation, RecommendationResolver, FALLBACK_RECOMMENDATION, GENERIC_MONITORING,
};

use chrono::Utc;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AnalysisError;
use crate::narrative::{NarrativeRequest, Narrator};
use crate::parsers::{VariantsByGene, VcfParser};
use crate::tables::KnowledgeBase;
use crate::types::*;

/// Timestamp layout of every response, always UTC
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// A drug that could not be analysed, reported next to the successes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrugFailure {
    pub drug: String,
    pub code: String,
    pub message: String,
    pub details: String,
}

impl DrugFailure {
    fn from_error(drug: &str, err: &AnalysisError) -> Self {
        Self {
            drug: drug.to_string(),
            code: err.code().to_string(),
            message: err.to_string(),
            details: err.details(),
        }
    }
}

/// Result of analysing one sample against a list of drugs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub sample_id: String,
    pub profile: Vec<GeneProfile>,
    pub responses: Vec<AnalysisResponse>,
    pub failures: Vec<DrugFailure>,
}

impl AnalysisReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Runs the full pipeline over one sample
pub struct PharmacogenomicAnalyzer<'a> {
    parser: VcfParser,
    matcher: AlleleMatcher<'a>,
    composer: DiplotypeComposer,
    phenotypes: PhenotypeResolver<'a>,
    recommendations: RecommendationResolver<'a>,
    narrator: Narrator<'a>,
}

impl<'a> PharmacogenomicAnalyzer<'a> {
    pub fn new(kb: &'a KnowledgeBase) -> Self {
        Self {
            parser: VcfParser::new(),
            matcher: AlleleMatcher::new(&kb.definitions),
            composer: DiplotypeComposer::new(),
            phenotypes: PhenotypeResolver::new(&kb.phenotypes),
            recommendations: RecommendationResolver::new(&kb.drug_rules),
            narrator: Narrator::new(),
        }
    }

    pub fn with_narrator(mut self, narrator: Narrator<'a>) -> Self {
        self.narrator = narrator;
        self
    }

    pub fn recommendations(&self) -> &RecommendationResolver<'a> {
        &self.recommendations
    }

    pub fn extract(&self, content: &str) -> VariantsByGene {
        self.parser.extract(content)
    }

    /// Genotype a single gene
    pub fn profile_gene(&self, gene: Gene, variants: &[Variant]) -> GeneProfile {
        let star_alleles = self.matcher.match_alleles(gene, variants);
        let diplotype = self.composer.compose(&star_alleles, variants);
        let resolved = self.phenotypes.resolve(
            gene,
            &diplotype.diplotype,
            &diplotype.allele_1,
            &diplotype.allele_2,
        );

        let supported_allele = star_alleles
            .first()
            .map(String::as_str)
            .unwrap_or(REFERENCE_ALLELE);

        let mut detected_variants: Vec<DetectedVariant> = variants
            .iter()
            .map(|v| DetectedVariant {
                rsid: v.rsid.clone().unwrap_or_else(|| UNKNOWN_RSID.to_string()),
                gene: v.gene,
                reference_allele: v.reference_allele.clone(),
                alternate_allele: v.alternate_allele.clone(),
                genotype: v.genotype.clone(),
                star_allele: supported_allele.to_string(),
            })
            .collect();
        detected_variants.sort_by(|a, b| a.rsid.cmp(&b.rsid));

        debug!(
            "{}: {} -> {} ({} variants)",
            gene,
            diplotype.diplotype,
            resolved.phenotype,
            detected_variants.len()
        );

        GeneProfile {
            gene,
            star_allele_1: diplotype.allele_1,
            star_allele_2: diplotype.allele_2,
            diplotype: diplotype.diplotype,
            phenotype: resolved.phenotype,
            detected_variants,
        }
    }

    /// One profile per supported gene, sorted by gene symbol
    pub fn build_profile(&self, variants_by_gene: &VariantsByGene) -> Vec<GeneProfile> {
        let mut profile: Vec<GeneProfile> = Gene::ALL
            .par_iter()
            .map(|gene| {
                let variants = variants_by_gene
                    .get(gene)
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                self.profile_gene(*gene, variants)
            })
            .collect();

        profile.sort_by_key(|p| p.gene);
        profile
    }

    /// Resolve one drug against an already-built profile
    pub fn analyze_drug(
        &self,
        drug: &str,
        profile: &[GeneProfile],
        variants_by_gene: &VariantsByGene,
    ) -> Result<AnalysisResponse, AnalysisError> {
        let gene = self
            .recommendations
            .relevant_gene(drug)
            .ok_or_else(|| AnalysisError::UnsupportedDrug {
                drug: drug.to_string(),
                supported: self.recommendations.supported_drugs(),
            })?;

        let gene_profile = match profile.iter().find(|p| p.gene == gene) {
            Some(gene_profile) => gene_profile.clone(),
            None => {
                let variants = variants_by_gene
                    .get(&gene)
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                self.profile_gene(gene, variants)
            }
        };

        let phenotype_confidence = self
            .phenotypes
            .resolve(
                gene,
                &gene_profile.diplotype,
                &gene_profile.star_allele_1,
                &gene_profile.star_allele_2,
            )
            .confidence;

        let decision =
            self.recommendations
                .resolve(drug, gene, gene_profile.phenotype, phenotype_confidence);

        let outcome = self.narrator.explain(NarrativeRequest {
            gene,
            diplotype: gene_profile.diplotype.clone(),
            phenotype: gene_profile.phenotype,
            drug: drug.to_string(),
            risk_label: decision.risk_label,
            recommendation: decision.recommendation.clone(),
            rsids: gene_profile.rsids(),
            research_context: None,
        });

        let quality_metrics = QualityMetrics {
            vcf_parsing_success: true,
            gene_variants_found: variants_by_gene.values().any(|v| !v.is_empty()),
            star_allele_determined: !gene_profile.is_ambiguous(),
            phenotype_determined: gene_profile.phenotype != Phenotype::Unknown,
            recommendation_generated: true,
            explanation_generated: true,
        };

        Ok(AnalysisResponse {
            patient_id: Uuid::new_v4().to_string(),
            drug: drug.to_string(),
            gene,
            timestamp: Utc::now().format(TIMESTAMP_FORMAT).to_string(),
            risk_assessment: RiskAssessment::from(&decision),
            pharmacogenomic_profile: profile.to_vec(),
            clinical_recommendation: split_recommendation(&decision.recommendation),
            generated_explanation: outcome.explanation,
            quality_metrics,
        })
    }

    /// Extract and profile once, then resolve every drug independently.
    /// An unsupported drug is recorded as a failure and never stops the rest.
    pub fn analyze(&self, sample_id: &str, content: &str, drugs: &[String]) -> AnalysisReport {
        let variants_by_gene = self.extract(content);
        let variant_count: usize = variants_by_gene.values().map(Vec::len).sum();
        info!("{}: {} panel variants extracted", sample_id, variant_count);

        let profile = self.build_profile(&variants_by_gene);

        let outcomes: Vec<(&String, Result<AnalysisResponse, AnalysisError>)> = drugs
            .par_iter()
            .map(|drug| (drug, self.analyze_drug(drug, &profile, &variants_by_gene)))
            .collect();

        let mut responses = Vec::new();
        let mut failures = Vec::new();
        for (drug, outcome) in outcomes {
            match outcome {
                Ok(response) => responses.push(response),
                Err(err) => {
                    warn!("{}: {}", sample_id, err);
                    failures.push(DrugFailure::from_error(drug, &err));
                }
            }
        }

        AnalysisReport {
            sample_id: sample_id.to_string(),
            profile,
            responses,
            failures,
        }
    }
}
