use tracing::debug;

use super::diplotype::{normalize_diplotype, reverse_diplotype};
use crate::tables::PhenotypeTable;
use crate::types::*;

/// Lower bound (inclusive) of the CYP2D6 normal-metabolizer score band
pub const NM_LOWER_BOUND: f64 = 1.25;

/// Upper bound (inclusive) of the CYP2D6 normal-metabolizer score band
pub const NM_UPPER_BOUND: f64 = 2.25;

/// Phenotype call with the confidence of the lookup that produced it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedPhenotype {
    pub phenotype: Phenotype,
    pub confidence: f64,
}

impl ResolvedPhenotype {
    pub fn unknown() -> Self {
        Self {
            phenotype: Phenotype::Unknown,
            confidence: 0.0,
        }
    }

    fn certain(phenotype: Phenotype) -> Self {
        Self {
            phenotype,
            confidence: 1.0,
        }
    }
}

/// Classify a summed CYP2D6 activity score.
///
/// `0` is PM, `(0, 1.25)` IM, `[1.25, 2.25]` NM and anything above 2.25 URM.
pub fn classify_activity_score(total: f64) -> Phenotype {
    if total <= 0.0 {
        Phenotype::PM
    } else if total < NM_LOWER_BOUND {
        Phenotype::IM
    } else if total <= NM_UPPER_BOUND {
        Phenotype::NM
    } else {
        Phenotype::URM
    }
}

/// Maps a gene's diplotype to a metabolizer phenotype
#[derive(Debug, Clone, Copy)]
pub struct PhenotypeResolver<'a> {
    table: &'a PhenotypeTable,
}

impl<'a> PhenotypeResolver<'a> {
    pub fn new(table: &'a PhenotypeTable) -> Self {
        Self { table }
    }

    pub fn resolve(
        &self,
        gene: Gene,
        diplotype: &str,
        allele_1: &str,
        allele_2: &str,
    ) -> ResolvedPhenotype {
        if !self.table.contains_gene(gene) || is_ambiguity_sentinel(diplotype) {
            return ResolvedPhenotype::unknown();
        }

        match gene {
            Gene::Cyp2d6 => self.resolve_by_activity(allele_1, allele_2),
            _ => self.resolve_by_table(gene, diplotype),
        }
    }

    fn resolve_by_activity(&self, allele_1: &str, allele_2: &str) -> ResolvedPhenotype {
        let scores = self.table.activity_scores();

        let total = scores.score_or_default(allele_1) + scores.score_or_default(allele_2);
        let confidence = match (scores.contains(allele_1), scores.contains(allele_2)) {
            (true, true) => 1.0,
            (true, false) | (false, true) => 0.5,
            (false, false) => 0.0,
        };
        let phenotype = classify_activity_score(total);

        debug!(
            "CYP2D6 {}/{}: activity score {:.2} -> {} (confidence {:.1})",
            allele_1, allele_2, total, phenotype, confidence
        );

        ResolvedPhenotype {
            phenotype,
            confidence,
        }
    }

    fn resolve_by_table(&self, gene: Gene, diplotype: &str) -> ResolvedPhenotype {
        let normalized = normalize_diplotype(diplotype);

        self.table
            .lookup(gene, &normalized)
            .or_else(|| self.table.lookup(gene, &reverse_diplotype(&normalized)))
            .map(ResolvedPhenotype::certain)
            .unwrap_or_else(|| {
                debug!("{}: no phenotype entry for {}", gene, diplotype);
                ResolvedPhenotype::unknown()
            })
    }
}

fn is_ambiguity_sentinel(diplotype: &str) -> bool {
    diplotype == AMBIGUOUS_DIPLOTYPE || diplotype == UNKNOWN_ALLELE
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHENOTYPES: &str = r#"{
        "CYP2D6": {"activity_scores": {"*1": 1.0, "*2": 1.0, "*4": 0.0, "*10": 0.25, "*41": 0.5, "*9": 0.5}},
        "CYP2C19": {"*1/*1": "NM", "*1/*2": "IM", "*2/*17": "IM", "*17/*3": "PM"},
        "TPMT": {"*1/*1": "NM"}
    }"#;

    fn table() -> PhenotypeTable {
        PhenotypeTable::from_json(PHENOTYPES).unwrap()
    }

    #[test]
    fn test_activity_score_boundaries() {
        assert_eq!(classify_activity_score(0.0), Phenotype::PM);
        assert_eq!(classify_activity_score(0.25), Phenotype::IM);
        assert_eq!(classify_activity_score(1.0), Phenotype::IM);
        assert_eq!(classify_activity_score(1.2499), Phenotype::IM);
        assert_eq!(classify_activity_score(1.25), Phenotype::NM);
        assert_eq!(classify_activity_score(2.0), Phenotype::NM);
        assert_eq!(classify_activity_score(2.25), Phenotype::NM);
        assert_eq!(classify_activity_score(2.26), Phenotype::URM);
        assert_eq!(classify_activity_score(3.0), Phenotype::URM);
    }

    #[test]
    fn test_cyp2d6_uses_activity_scores() {
        let table = table();
        let resolver = PhenotypeResolver::new(&table);

        let resolved = resolver.resolve(Gene::Cyp2d6, "*2/*4", "*2", "*4");
        assert_eq!(resolved, ResolvedPhenotype { phenotype: Phenotype::IM, confidence: 1.0 });

        let resolved = resolver.resolve(Gene::Cyp2d6, "*1/*1", "*1", "*1");
        assert_eq!(resolved, ResolvedPhenotype { phenotype: Phenotype::NM, confidence: 1.0 });

        let resolved = resolver.resolve(Gene::Cyp2d6, "*4/*4", "*4", "*4");
        assert_eq!(resolved.phenotype, Phenotype::PM);

        // 1.0 + 0.25 lands exactly on the NM lower bound
        let resolved = resolver.resolve(Gene::Cyp2d6, "*1/*10", "*1", "*10");
        assert_eq!(resolved.phenotype, Phenotype::NM);
    }

    #[test]
    fn test_cyp2d6_confidence_tracks_table_coverage() {
        let table = table();
        let resolver = PhenotypeResolver::new(&table);

        // *35 is unlisted and scores the default 1.0
        let resolved = resolver.resolve(Gene::Cyp2d6, "*4/*35", "*4", "*35");
        assert_eq!(resolved.phenotype, Phenotype::IM);
        assert_eq!(resolved.confidence, 0.5);

        let resolved = resolver.resolve(Gene::Cyp2d6, "*35/*36", "*35", "*36");
        assert_eq!(resolved.phenotype, Phenotype::NM);
        assert_eq!(resolved.confidence, 0.0);

        let resolved = resolver.resolve(Gene::Cyp2d6, "*1x2/*1", "*1x2", "*1");
        assert_eq!(resolved.phenotype, Phenotype::NM);
        assert_eq!(resolved.confidence, 0.5);
    }

    #[test]
    fn test_table_lookup_tries_both_orders() {
        let table = table();
        let resolver = PhenotypeResolver::new(&table);

        let resolved = resolver.resolve(Gene::Cyp2c19, "*2/*1", "*2", "*1");
        assert_eq!(resolved, ResolvedPhenotype { phenotype: Phenotype::IM, confidence: 1.0 });

        let resolved = resolver.resolve(Gene::Cyp2c19, "*17/*2", "*17", "*2");
        assert_eq!(resolved.phenotype, Phenotype::IM);

        // table stores the non-canonical order; only the reversed probe finds it
        let resolved = resolver.resolve(Gene::Cyp2c19, "*3/*17", "*3", "*17");
        assert_eq!(resolved.phenotype, Phenotype::PM);
    }

    #[test]
    fn test_unknowns() {
        let table = table();
        let resolver = PhenotypeResolver::new(&table);

        assert_eq!(
            resolver.resolve(Gene::Tpmt, "*1/*3A", "*1", "*3A"),
            ResolvedPhenotype::unknown()
        );
        assert_eq!(
            resolver.resolve(Gene::Dpyd, "*1/*1", "*1", "*1"),
            ResolvedPhenotype::unknown()
        );
        assert_eq!(
            resolver.resolve(Gene::Cyp2d6, "Unknown/Unknown", "Unknown", "Unknown"),
            ResolvedPhenotype::unknown()
        );
        assert_eq!(
            resolver.resolve(Gene::Cyp2c19, "Unknown", "Unknown", "Unknown"),
            ResolvedPhenotype::unknown()
        );
    }
}
