//! Lookup tables driving the decision pipeline.
//!
//! Three JSON documents are loaded once at startup and never mutated:
//!
//! - `star_definitions.json`: gene → star allele → defining variants
//! - `phenotype_tables.json`: gene → diplotype → phenotype, plus the CYP2D6
//!   `activity_scores` block
//! - `drug_rules.json`: gene → drug → phenotype → rule
//!
//! A missing or malformed table is a [`TableError`] and the caller must not
//! serve analyses without a complete set.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::error::TableError;
use crate::types::{Gene, Phenotype, RiskLabel, Severity};

pub const STAR_DEFINITIONS_FILE: &str = "star_definitions.json";
pub const PHENOTYPE_TABLES_FILE: &str = "phenotype_tables.json";
pub const DRUG_RULES_FILE: &str = "drug_rules.json";

const ACTIVITY_SCORES_KEY: &str = "activity_scores";

/// Score used for CYP2D6 alleles absent from the activity-score table
pub const DEFAULT_ACTIVITY_SCORE: f64 = 1.0;

/// One defining variant of a star allele
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlleleSignature {
    pub rsid: String,
    pub alt: String,
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

/// Gene → star-allele label → defining signatures
#[derive(Debug, Clone, Default)]
pub struct GeneDefinitionTable {
    genes: BTreeMap<Gene, BTreeMap<String, Vec<AlleleSignature>>>,
}

impl GeneDefinitionTable {
    pub fn from_json(text: &str) -> Result<Self, TableError> {
        let raw: BTreeMap<String, BTreeMap<String, Vec<AlleleSignature>>> =
            serde_json::from_str(text).map_err(|source| TableError::Json {
                table: "star definition",
                source,
            })?;

        let mut genes = BTreeMap::new();
        for (symbol, alleles) in raw {
            let gene = parse_gene("star definition", &symbol)?;
            for label in alleles.keys() {
                check_label("star definition", &symbol, label)?;
            }
            genes.insert(gene, alleles);
        }

        Ok(Self { genes })
    }

    pub fn alleles(&self, gene: Gene) -> Option<&BTreeMap<String, Vec<AlleleSignature>>> {
        self.genes.get(&gene)
    }

    pub fn labels(&self, gene: Gene) -> Vec<&str> {
        self.genes
            .get(&gene)
            .map(|alleles| alleles.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn allele_count(&self) -> usize {
        self.genes.values().map(BTreeMap::len).sum()
    }
}

/// CYP2D6 star allele → activity value
#[derive(Debug, Clone, Default)]
pub struct ActivityScoreTable {
    scores: HashMap<String, f64>,
}

impl ActivityScoreTable {
    pub fn new(scores: HashMap<String, f64>) -> Self {
        Self { scores }
    }

    pub fn get(&self, allele: &str) -> Option<f64> {
        self.scores.get(allele).copied()
    }

    pub fn score_or_default(&self, allele: &str) -> f64 {
        self.get(allele).unwrap_or(DEFAULT_ACTIVITY_SCORE)
    }

    pub fn contains(&self, allele: &str) -> bool {
        self.scores.contains_key(allele)
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

/// Gene → canonical diplotype → phenotype, plus CYP2D6 activity scores
#[derive(Debug, Clone, Default)]
pub struct PhenotypeTable {
    diplotypes: BTreeMap<Gene, HashMap<String, Phenotype>>,
    activity_scores: ActivityScoreTable,
}

impl PhenotypeTable {
    pub fn from_json(text: &str) -> Result<Self, TableError> {
        let raw: BTreeMap<String, BTreeMap<String, Value>> =
            serde_json::from_str(text).map_err(|source| TableError::Json {
                table: "phenotype",
                source,
            })?;

        let mut diplotypes = BTreeMap::new();
        let mut activity_scores = None;

        for (symbol, entries) in raw {
            let gene = parse_gene("phenotype", &symbol)?;
            let mut table = HashMap::new();

            for (key, value) in entries {
                if key == ACTIVITY_SCORES_KEY {
                    if gene != Gene::Cyp2d6 {
                        return Err(TableError::InvalidEntry {
                            table: "phenotype",
                            detail: format!("activity_scores are only defined for CYP2D6, not {}", symbol),
                        });
                    }
                    activity_scores = Some(parse_activity_scores(&symbol, value)?);
                    continue;
                }

                check_diplotype_key(&symbol, &key)?;
                let phenotype: Phenotype =
                    serde_json::from_value(value).map_err(|source| TableError::Json {
                        table: "phenotype",
                        source,
                    })?;
                table.insert(key, phenotype);
            }

            diplotypes.insert(gene, table);
        }

        let activity_scores = activity_scores.ok_or(TableError::MissingActivityScores)?;

        Ok(Self {
            diplotypes,
            activity_scores,
        })
    }

    pub fn contains_gene(&self, gene: Gene) -> bool {
        self.diplotypes.contains_key(&gene)
    }

    pub fn lookup(&self, gene: Gene, diplotype: &str) -> Option<Phenotype> {
        self.diplotypes
            .get(&gene)
            .and_then(|table| table.get(diplotype))
            .copied()
    }

    pub fn activity_scores(&self) -> &ActivityScoreTable {
        &self.activity_scores
    }
}

/// Verbatim rule outcome for a (gene, drug, phenotype) triple
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrugRule {
    pub risk_label: RiskLabel,
    pub severity: Severity,
    pub recommendation: String,
}

type PhenotypeRules = HashMap<Phenotype, DrugRule>;

/// Gene → lowercased drug → phenotype → rule, genes kept in file order
#[derive(Debug, Clone, Default)]
pub struct DrugRuleTable {
    genes: Vec<(Gene, BTreeMap<String, PhenotypeRules>)>,
}

impl DrugRuleTable {
    pub fn from_json(text: &str) -> Result<Self, TableError> {
        // serde_json is built with preserve_order, so gene order follows the file
        let raw: serde_json::Map<String, Value> =
            serde_json::from_str(text).map_err(|source| TableError::Json {
                table: "drug rule",
                source,
            })?;

        let mut genes = Vec::with_capacity(raw.len());
        for (symbol, drugs) in raw {
            let gene = parse_gene("drug rule", &symbol)?;
            let drugs: BTreeMap<String, PhenotypeRules> =
                serde_json::from_value(drugs).map_err(|source| TableError::Json {
                    table: "drug rule",
                    source,
                })?;
            let mut lowered: BTreeMap<String, PhenotypeRules> = BTreeMap::new();
            for (drug, rules) in drugs {
                let key = drug.to_lowercase();
                if lowered.insert(key.clone(), rules).is_some() {
                    return Err(TableError::DuplicateDrug { gene: symbol, drug: key });
                }
            }
            genes.push((gene, lowered));
        }

        if genes.iter().all(|(_, drugs)| drugs.is_empty()) {
            return Err(TableError::EmptyDrugRules);
        }

        Ok(Self { genes })
    }

    /// Genes in the order they are listed in the table
    pub fn genes(&self) -> impl Iterator<Item = Gene> + '_ {
        self.genes.iter().map(|(gene, _)| *gene)
    }

    pub fn drugs(&self, gene: Gene) -> Option<&BTreeMap<String, PhenotypeRules>> {
        self.genes
            .iter()
            .find(|(candidate, _)| *candidate == gene)
            .map(|(_, drugs)| drugs)
    }

    pub fn rule_count(&self) -> usize {
        self.genes
            .iter()
            .flat_map(|(_, drugs)| drugs.values())
            .map(HashMap::len)
            .sum()
    }
}

/// The complete, immutable table set shared by every analysis
#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    pub definitions: GeneDefinitionTable,
    pub phenotypes: PhenotypeTable,
    pub drug_rules: DrugRuleTable,
}

impl KnowledgeBase {
    pub fn from_json(
        star_definitions: &str,
        phenotype_tables: &str,
        drug_rules: &str,
    ) -> Result<Self, TableError> {
        let kb = Self {
            definitions: GeneDefinitionTable::from_json(star_definitions)?,
            phenotypes: PhenotypeTable::from_json(phenotype_tables)?,
            drug_rules: DrugRuleTable::from_json(drug_rules)?,
        };

        info!(
            "Loaded {} star alleles, {} CYP2D6 activity scores, {} drug rules",
            kb.definitions.allele_count(),
            kb.phenotypes.activity_scores().len(),
            kb.drug_rules.rule_count()
        );

        Ok(kb)
    }

    /// Tables compiled into the binary from `data/`
    pub fn embedded() -> Result<Self, TableError> {
        Self::from_json(
            include_str!("../data/star_definitions.json"),
            include_str!("../data/phenotype_tables.json"),
            include_str!("../data/drug_rules.json"),
        )
    }

    /// Load the three tables from a directory
    pub fn load_dir(dir: &Path) -> Result<Self, TableError> {
        info!("Loading lookup tables from {}", dir.display());
        let star = read_table(&dir.join(STAR_DEFINITIONS_FILE))?;
        let phenotype = read_table(&dir.join(PHENOTYPE_TABLES_FILE))?;
        let drugs = read_table(&dir.join(DRUG_RULES_FILE))?;
        Self::from_json(&star, &phenotype, &drugs)
    }
}

fn read_table(path: &Path) -> Result<String, TableError> {
    fs::read_to_string(path).map_err(|source| TableError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_gene(table: &'static str, symbol: &str) -> Result<Gene, TableError> {
    Gene::from_symbol(symbol).ok_or_else(|| TableError::UnknownGene {
        table,
        gene: symbol.to_string(),
    })
}

fn check_label(table: &'static str, gene: &str, label: &str) -> Result<(), TableError> {
    if label.starts_with('*') {
        Ok(())
    } else {
        Err(TableError::InvalidAlleleLabel {
            table,
            gene: gene.to_string(),
            label: label.to_string(),
        })
    }
}

fn check_diplotype_key(gene: &str, key: &str) -> Result<(), TableError> {
    match key.split_once('/') {
        Some((first, second)) if !second.contains('/') => {
            check_label("phenotype", gene, first)?;
            check_label("phenotype", gene, second)
        }
        _ => Err(TableError::InvalidEntry {
            table: "phenotype",
            detail: format!("{} diplotype '{}' is not of the form *A/*B", gene, key),
        }),
    }
}

fn parse_activity_scores(gene: &str, value: Value) -> Result<ActivityScoreTable, TableError> {
    let scores: HashMap<String, f64> =
        serde_json::from_value(value).map_err(|source| TableError::Json {
            table: "phenotype",
            source,
        })?;

    for (allele, score) in &scores {
        check_label("phenotype", gene, allele)?;
        if *score < 0.0 || score.is_nan() {
            return Err(TableError::NegativeActivityScore {
                allele: allele.clone(),
                score: *score,
            });
        }
    }

    Ok(ActivityScoreTable::new(scores))
}

#[cfg(test)]
mod tests {
    use super::*;

    const STARS: &str = r#"{
        "CYP2D6": {"*4": [{"rsid": "rs3892097", "alt": "T", "ref": "C"}]},
        "TPMT": {"*3A": [{"rsid": "rs1800460", "alt": "T"}, {"rsid": "rs1142345", "alt": "C"}]}
    }"#;

    const PHENOTYPES: &str = r#"{
        "CYP2D6": {"activity_scores": {"*1": 1.0, "*4": 0.0}},
        "TPMT": {"*1/*1": "NM", "*1/*3A": "IM"}
    }"#;

    const RULES: &str = r#"{
        "TPMT": {"Azathioprine": {"IM": {"risk_label": "Adjust Dosage", "severity": "moderate", "recommendation": "Reduce dose."}}},
        "CYP2D6": {"codeine": {"PM": {"risk_label": "Ineffective", "severity": "high", "recommendation": "Avoid codeine."}}}
    }"#;

    #[test]
    fn test_load_inline_tables() {
        let kb = KnowledgeBase::from_json(STARS, PHENOTYPES, RULES).unwrap();

        assert_eq!(kb.definitions.labels(Gene::Tpmt), vec!["*3A"]);
        assert_eq!(kb.definitions.alleles(Gene::Tpmt).unwrap()["*3A"].len(), 2);
        assert_eq!(
            kb.definitions.alleles(Gene::Cyp2d6).unwrap()["*4"][0].reference.as_deref(),
            Some("C")
        );
        assert!(kb.definitions.alleles(Gene::Dpyd).is_none());

        assert_eq!(kb.phenotypes.lookup(Gene::Tpmt, "*1/*3A"), Some(Phenotype::IM));
        assert!(kb.phenotypes.contains_gene(Gene::Cyp2d6));
        assert!(!kb.phenotypes.contains_gene(Gene::Dpyd));
        assert_eq!(kb.phenotypes.activity_scores().get("*4"), Some(0.0));
        assert_eq!(kb.phenotypes.activity_scores().score_or_default("*99"), 1.0);

        // drug keys are lowercased, gene order follows the file
        assert!(kb.drug_rules.drugs(Gene::Tpmt).unwrap().contains_key("azathioprine"));
        assert_eq!(
            kb.drug_rules.genes().collect::<Vec<_>>(),
            vec![Gene::Tpmt, Gene::Cyp2d6]
        );
        assert_eq!(kb.drug_rules.rule_count(), 2);
    }

    #[test]
    fn test_embedded_tables_load() {
        let kb = KnowledgeBase::embedded().unwrap();
        for gene in Gene::ALL {
            assert!(kb.phenotypes.contains_gene(gene), "{} missing", gene);
            assert!(kb.drug_rules.drugs(gene).is_some(), "{} has no rules", gene);
        }
        assert!(!kb.phenotypes.activity_scores().is_empty());
    }

    #[test]
    fn test_rejects_drug_keys_differing_only_in_case() {
        let rules = r#"{
            "CYP2D6": {
                "Codeine": {"PM": {"risk_label": "Ineffective", "severity": "high", "recommendation": "Avoid codeine."}},
                "codeine": {"NM": {"risk_label": "Safe", "severity": "none", "recommendation": "Use label dosing."}}
            }
        }"#;
        let err = DrugRuleTable::from_json(rules).unwrap_err();
        assert!(matches!(
            err,
            TableError::DuplicateDrug { ref gene, ref drug } if gene == "CYP2D6" && drug == "codeine"
        ));
    }

    #[test]
    fn test_rejects_unknown_gene() {
        let err = GeneDefinitionTable::from_json(r#"{"BRCA1": {}}"#).unwrap_err();
        assert!(matches!(err, TableError::UnknownGene { .. }));
    }

    #[test]
    fn test_rejects_label_without_star() {
        let err = GeneDefinitionTable::from_json(r#"{"TPMT": {"3A": []}}"#).unwrap_err();
        assert!(matches!(err, TableError::InvalidAlleleLabel { .. }));
    }

    #[test]
    fn test_rejects_phenotype_outside_enum() {
        let text = r#"{"CYP2D6": {"activity_scores": {}}, "TPMT": {"*1/*1": "Extensive"}}"#;
        assert!(matches!(
            PhenotypeTable::from_json(text).unwrap_err(),
            TableError::Json { .. }
        ));
    }

    #[test]
    fn test_requires_cyp2d6_activity_scores() {
        let err = PhenotypeTable::from_json(r#"{"TPMT": {"*1/*1": "NM"}}"#).unwrap_err();
        assert!(matches!(err, TableError::MissingActivityScores));
    }

    #[test]
    fn test_rejects_negative_activity_score() {
        let text = r#"{"CYP2D6": {"activity_scores": {"*4": -0.5}}}"#;
        assert!(matches!(
            PhenotypeTable::from_json(text).unwrap_err(),
            TableError::NegativeActivityScore { .. }
        ));
    }

    #[test]
    fn test_rejects_bad_risk_label_and_empty_rules() {
        let bad = r#"{"TPMT": {"azathioprine": {"NM": {"risk_label": "Fine", "severity": "none", "recommendation": "x"}}}}"#;
        assert!(matches!(
            DrugRuleTable::from_json(bad).unwrap_err(),
            TableError::Json { .. }
        ));
        assert!(matches!(
            DrugRuleTable::from_json("{}").unwrap_err(),
            TableError::EmptyDrugRules
        ));
    }

    #[test]
    fn test_load_dir_reports_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = KnowledgeBase::load_dir(dir.path()).unwrap_err();
        assert!(matches!(err, TableError::Io { .. }));
    }
}
