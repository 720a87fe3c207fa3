use std::collections::BTreeSet;
use tracing::debug;

use crate::tables::{AlleleSignature, GeneDefinitionTable};
use crate::types::*;

/// Star-allele caller based on exact defining-variant sets
#[derive(Debug, Clone, Copy)]
pub struct AlleleMatcher<'a> {
    definitions: &'a GeneDefinitionTable,
}

impl<'a> AlleleMatcher<'a> {
    pub fn new(definitions: &'a GeneDefinitionTable) -> Self {
        Self { definitions }
    }

    /// Star alleles carried for `gene`, sorted by label.
    ///
    /// Explicit `STAR` tags win outright. Otherwise an allele is credited only
    /// when every defining variant is present with a non-reference call, and
    /// only the most specific full matches are kept. No match yields `*1`.
    pub fn match_alleles(&self, gene: Gene, variants: &[Variant]) -> Vec<String> {
        if variants.is_empty() {
            return vec![REFERENCE_ALLELE.to_string()];
        }

        if let Some(tagged) = self.explicit_tags(variants) {
            debug!("{}: using explicit star tags {:?}", gene, tagged);
            return tagged;
        }

        let alleles = match self.definitions.alleles(gene) {
            Some(alleles) => alleles,
            None => return vec![REFERENCE_ALLELE.to_string()],
        };

        let matches: Vec<(&str, usize)> = alleles
            .iter()
            .filter(|(_, signatures)| self.matches_definition(variants, signatures))
            .map(|(label, signatures)| (label.as_str(), signatures.len()))
            .collect();

        let max_specificity = match matches.iter().map(|(_, count)| *count).max() {
            Some(max) => max,
            None => {
                debug!("{}: no star allele fully matched, defaulting to *1", gene);
                return vec![REFERENCE_ALLELE.to_string()];
            }
        };

        // BTreeMap iteration already yields labels in sorted order
        let best: Vec<String> = matches
            .into_iter()
            .filter(|(_, count)| *count == max_specificity)
            .map(|(label, _)| label.to_string())
            .collect();

        debug!(
            "{}: matched {:?} with {} defining variant(s)",
            gene, best, max_specificity
        );
        best
    }

    /// Sorted, de-duplicated explicit tags, if any variant carries one
    fn explicit_tags(&self, variants: &[Variant]) -> Option<Vec<String>> {
        let tags: BTreeSet<&str> = variants
            .iter()
            .filter_map(|v| v.star_allele.as_deref())
            .collect();

        if tags.is_empty() {
            None
        } else {
            Some(tags.into_iter().map(str::to_string).collect())
        }
    }

    fn matches_definition(&self, variants: &[Variant], signatures: &[AlleleSignature]) -> bool {
        !signatures.is_empty()
            && signatures
                .iter()
                .all(|signature| self.carries_signature(variants, signature))
    }

    fn carries_signature(&self, variants: &[Variant], signature: &AlleleSignature) -> bool {
        variants.iter().any(|v| {
            v.rsid.as_deref() == Some(signature.rsid.as_str())
                && v.alternate_allele == signature.alt
                && v.genotype.is_non_reference()
        })
    }
}
