use serde::{Deserialize, Serialize};
use std::fmt;

/// Label credited when no star allele matches.
pub const REFERENCE_ALLELE: &str = "*1";

/// Placeholder allele label used when a diplotype cannot be called.
pub const UNKNOWN_ALLELE: &str = "Unknown";

/// Diplotype emitted when three or more star alleles match at once.
pub const AMBIGUOUS_DIPLOTYPE: &str = "Unknown/Unknown";

/// Shown in place of a missing rsID.
pub const UNKNOWN_RSID: &str = "Unknown";

/// Pharmacogenes covered by the pipeline.
///
/// Variants are declared in gene-symbol order so that the derived `Ord`
/// sorts profiles the same way a plain string sort of the symbols would.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Gene {
    #[serde(rename = "CYP2C19")]
    Cyp2c19,
    #[serde(rename = "CYP2C9")]
    Cyp2c9,
    #[serde(rename = "CYP2D6")]
    Cyp2d6,
    #[serde(rename = "DPYD")]
    Dpyd,
    #[serde(rename = "SLCO1B1")]
    Slco1b1,
    #[serde(rename = "TPMT")]
    Tpmt,
}

impl Gene {
    /// Every supported gene, sorted by symbol
    pub const ALL: [Gene; 6] = [
        Gene::Cyp2c19,
        Gene::Cyp2c9,
        Gene::Cyp2d6,
        Gene::Dpyd,
        Gene::Slco1b1,
        Gene::Tpmt,
    ];

    pub fn symbol(&self) -> &'static str {
        match self {
            Gene::Cyp2c19 => "CYP2C19",
            Gene::Cyp2c9 => "CYP2C9",
            Gene::Cyp2d6 => "CYP2D6",
            Gene::Dpyd => "DPYD",
            Gene::Slco1b1 => "SLCO1B1",
            Gene::Tpmt => "TPMT",
        }
    }

    /// Exact, case-sensitive symbol lookup. Anything else is outside the panel.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Gene::ALL.into_iter().find(|gene| gene.symbol() == symbol)
    }
}

impl fmt::Display for Gene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Called genotype (GT) as written in the sample column, with `|` folded to `/`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenotypeCall(String);

/// Zygosity classes the diplotype composer cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zygosity {
    HomozygousReference, // 0/0
    HomozygousAlternate, // 1/1
    Heterozygous,        // 0/1 or 1/0
    Other,               // multi-allelic, no-call, unknown
}

impl GenotypeCall {
    pub const UNKNOWN: &'static str = "Unknown";

    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return Self::unknown();
        }
        GenotypeCall(raw.replace('|', "/"))
    }

    pub fn unknown() -> Self {
        GenotypeCall(Self::UNKNOWN.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == Self::UNKNOWN
    }

    /// True when the call carries at least one alternate allele index (1 or 2)
    pub fn is_non_reference(&self) -> bool {
        self.0.contains(['1', '2'])
    }

    pub fn zygosity(&self) -> Zygosity {
        match self.0.as_str() {
            "0/0" => Zygosity::HomozygousReference,
            "1/1" => Zygosity::HomozygousAlternate,
            "0/1" | "1/0" => Zygosity::Heterozygous,
            _ => Zygosity::Other,
        }
    }
}

impl fmt::Display for GenotypeCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single variant call restricted to the supported gene panel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub chromosome: String,
    /// `None` when the POS column is not an unsigned integer
    pub position: Option<u64>,
    pub rsid: Option<String>,
    pub reference_allele: String,
    pub alternate_allele: String,
    pub gene: Gene,
    /// Explicit star-allele tag from the INFO column; bypasses matching
    pub star_allele: Option<String>,
    pub genotype: GenotypeCall,
}

/// Metabolizer phenotype
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phenotype {
    PM,
    IM,
    NM,
    RM,
    URM,
    Unknown,
}

impl Phenotype {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phenotype::PM => "PM",
            Phenotype::IM => "IM",
            Phenotype::NM => "NM",
            Phenotype::RM => "RM",
            Phenotype::URM => "URM",
            Phenotype::Unknown => "Unknown",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Phenotype::PM => "Poor Metabolizer",
            Phenotype::IM => "Intermediate Metabolizer",
            Phenotype::NM => "Normal Metabolizer",
            Phenotype::RM => "Rapid Metabolizer",
            Phenotype::URM => "Ultrarapid Metabolizer",
            Phenotype::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Phenotype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskLabel {
    Safe,
    #[serde(rename = "Adjust Dosage")]
    AdjustDosage,
    Toxic,
    Ineffective,
    Unknown,
}

impl RiskLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLabel::Safe => "Safe",
            RiskLabel::AdjustDosage => "Adjust Dosage",
            RiskLabel::Toxic => "Toxic",
            RiskLabel::Ineffective => "Ineffective",
            RiskLabel::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for RiskLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    None,
    Low,
    Moderate,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::Low => "low",
            Severity::Moderate => "moderate",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clamp a confidence value into [0, 1]. NaN collapses to 0.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Variant as reported in a gene profile, annotated with the allele it supports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedVariant {
    pub rsid: String,
    pub gene: Gene,
    #[serde(rename = "ref")]
    pub reference_allele: String,
    #[serde(rename = "alt")]
    pub alternate_allele: String,
    pub genotype: GenotypeCall,
    pub star_allele: String,
}

/// Per-gene genotyping outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneProfile {
    pub gene: Gene,
    pub star_allele_1: String,
    pub star_allele_2: String,
    pub diplotype: String,
    pub phenotype: Phenotype,
    pub detected_variants: Vec<DetectedVariant>,
}

impl GeneProfile {
    pub fn is_ambiguous(&self) -> bool {
        self.diplotype == AMBIGUOUS_DIPLOTYPE || self.diplotype == UNKNOWN_ALLELE
    }

    pub fn rsids(&self) -> Vec<String> {
        self.detected_variants
            .iter()
            .filter(|v| v.rsid != UNKNOWN_RSID)
            .map(|v| v.rsid.clone())
            .collect()
    }
}

/// Rule-table outcome for one drug
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrugDecision {
    pub risk_label: RiskLabel,
    pub severity: Severity,
    pub recommendation: String,
    pub confidence: f64,
}

impl DrugDecision {
    pub fn new(
        risk_label: RiskLabel,
        severity: Severity,
        recommendation: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            risk_label,
            severity,
            recommendation: recommendation.into(),
            confidence: clamp_confidence(confidence),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_label: RiskLabel,
    pub severity: Severity,
    pub confidence_score: f64,
}

impl From<&DrugDecision> for RiskAssessment {
    fn from(decision: &DrugDecision) -> Self {
        Self {
            risk_label: decision.risk_label,
            severity: decision.severity,
            confidence_score: clamp_confidence(decision.confidence),
        }
    }
}

/// Recommendation text split into summary, dosing and monitoring segments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicalRecommendation {
    pub summary: String,
    pub dosing_guidance: String,
    pub monitoring_requirements: String,
}

/// Explanatory text attached to a decision. Never feeds back into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub mechanism: String,
    pub clinical_context: String,
    pub patient_friendly_summary: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub vcf_parsing_success: bool,
    pub gene_variants_found: bool,
    pub star_allele_determined: bool,
    pub phenotype_determined: bool,
    pub recommendation_generated: bool,
    pub explanation_generated: bool,
}

/// Full per-drug response handed to the serialization layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub patient_id: String,
    pub drug: String,
    pub gene: Gene,
    pub timestamp: String,
    pub risk_assessment: RiskAssessment,
    pub pharmacogenomic_profile: Vec<GeneProfile>,
    pub clinical_recommendation: ClinicalRecommendation,
    pub generated_explanation: Explanation,
    pub quality_metrics: QualityMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genotype_call_normalizes_phased_separator() {
        let call = GenotypeCall::parse("0|1");
        assert_eq!(call.as_str(), "0/1");
        assert_eq!(call.zygosity(), Zygosity::Heterozygous);
        assert!(call.is_non_reference());
    }

    #[test]
    fn test_genotype_call_reference_and_unknown() {
        assert!(!GenotypeCall::parse("0/0").is_non_reference());
        assert!(GenotypeCall::parse("").is_unknown());
        assert!(!GenotypeCall::unknown().is_non_reference());
        assert!(GenotypeCall::parse("0/2").is_non_reference());
        assert_eq!(GenotypeCall::parse("1/2").zygosity(), Zygosity::Other);
    }

    #[test]
    fn test_gene_order_matches_symbol_order() {
        let mut symbols: Vec<&str> = Gene::ALL.iter().map(Gene::symbol).collect();
        let declared = symbols.clone();
        symbols.sort();
        assert_eq!(symbols, declared);
        assert_eq!(Gene::from_symbol("CYP2D6"), Some(Gene::Cyp2d6));
        assert_eq!(Gene::from_symbol("cyp2d6"), None);
        assert_eq!(Gene::from_symbol("BRCA1"), None);
    }

    #[test]
    fn test_clamp_confidence() {
        assert_eq!(clamp_confidence(1.7), 1.0);
        assert_eq!(clamp_confidence(-0.2), 0.0);
        assert_eq!(clamp_confidence(0.42), 0.42);
        assert_eq!(clamp_confidence(f64::NAN), 0.0);
    }

    #[test]
    fn test_enum_wire_names() {
        assert_eq!(
            serde_json::to_string(&RiskLabel::AdjustDosage).unwrap(),
            "\"Adjust Dosage\""
        );
        assert_eq!(serde_json::to_string(&Severity::Critical).unwrap(), "\"critical\"");
        assert_eq!(serde_json::to_string(&Gene::Slco1b1).unwrap(), "\"SLCO1B1\"");
        let phenotype: Phenotype = serde_json::from_str("\"URM\"").unwrap();
        assert_eq!(phenotype, Phenotype::URM);
    }
}
