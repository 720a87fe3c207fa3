use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::*;

lazy_static! {
    /// `*` + digits + optional single disambiguating letter, e.g. `*4`, `*3A`
    static ref STAR_LABEL: Regex = Regex::new(r"^\*(\d+)([A-Za-z])?$").expect("valid star-allele pattern");
}

/// Ordering key for star-allele labels.
///
/// `*1` sorts first as 0, numbered labels by their number, and anything the
/// label grammar rejects sorts after every numbered label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlleleKey {
    Numbered(u32),
    Unorderable,
}

impl AlleleKey {
    pub fn of(label: &str) -> Self {
        if label == REFERENCE_ALLELE {
            return AlleleKey::Numbered(0);
        }

        STAR_LABEL
            .captures(label)
            .and_then(|caps| caps[1].parse().ok())
            .map(AlleleKey::Numbered)
            .unwrap_or(AlleleKey::Unorderable)
    }
}

/// Order two labels by key, falling back to the label text on ties
fn ordered_pair<'a>(first: &'a str, second: &'a str) -> (&'a str, &'a str) {
    if (AlleleKey::of(second), second) < (AlleleKey::of(first), first) {
        (second, first)
    } else {
        (first, second)
    }
}

/// Re-order an `A/B` diplotype into canonical allele order. Strings that are
/// not exactly two `/`-separated labels come back unchanged.
pub fn normalize_diplotype(diplotype: &str) -> String {
    match split_pair(diplotype) {
        Some((first, second)) => {
            let (first, second) = ordered_pair(first, second);
            format!("{}/{}", first, second)
        }
        None => diplotype.to_string(),
    }
}

/// Swap the two halves of an `A/B` diplotype
pub fn reverse_diplotype(diplotype: &str) -> String {
    match split_pair(diplotype) {
        Some((first, second)) => format!("{}/{}", second, first),
        None => diplotype.to_string(),
    }
}

fn split_pair(diplotype: &str) -> Option<(&str, &str)> {
    diplotype
        .split_once('/')
        .filter(|(_, second)| !second.contains('/'))
}

/// Two-haplotype call for one gene
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diplotype {
    pub allele_1: String,
    pub allele_2: String,
    pub diplotype: String,
}

impl Diplotype {
    pub fn new(allele_1: impl Into<String>, allele_2: impl Into<String>) -> Self {
        let allele_1 = allele_1.into();
        let allele_2 = allele_2.into();
        let diplotype = format!("{}/{}", allele_1, allele_2);
        Self {
            allele_1,
            allele_2,
            diplotype,
        }
    }

    pub fn reference() -> Self {
        Self::new(REFERENCE_ALLELE, REFERENCE_ALLELE)
    }

    pub fn ambiguous() -> Self {
        Self {
            allele_1: UNKNOWN_ALLELE.to_string(),
            allele_2: UNKNOWN_ALLELE.to_string(),
            diplotype: AMBIGUOUS_DIPLOTYPE.to_string(),
        }
    }
}

/// Genotype pattern across all of a gene's variant calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenotypeSummary {
    pub all_reference: bool,
    pub has_homozygous_alt: bool,
    pub has_heterozygous: bool,
}

impl GenotypeSummary {
    pub fn of(variants: &[Variant]) -> Self {
        let zygosities: Vec<Zygosity> = variants.iter().map(|v| v.genotype.zygosity()).collect();

        Self {
            // vacuously true for a gene without calls
            all_reference: zygosities
                .iter()
                .all(|z| *z == Zygosity::HomozygousReference),
            has_homozygous_alt: zygosities.contains(&Zygosity::HomozygousAlternate),
            has_heterozygous: zygosities.contains(&Zygosity::Heterozygous),
        }
    }
}

/// Combines matched star alleles with zygosity into a diplotype
#[derive(Debug, Default, Clone, Copy)]
pub struct DiplotypeComposer;

impl DiplotypeComposer {
    pub fn new() -> Self {
        Self
    }

    pub fn compose(&self, star_alleles: &[String], variants: &[Variant]) -> Diplotype {
        match star_alleles {
            [] => Diplotype::reference(),
            [allele] => self.compose_single(allele, GenotypeSummary::of(variants)),
            [first, second] => {
                let (first, second) = ordered_pair(first, second);
                Diplotype::new(first, second)
            }
            _ => Diplotype::ambiguous(),
        }
    }

    fn compose_single(&self, allele: &str, summary: GenotypeSummary) -> Diplotype {
        if summary.all_reference {
            // an all-0/0 profile forces the reference call even if a tag matched
            Diplotype::reference()
        } else if summary.has_homozygous_alt {
            Diplotype::new(allele, allele)
        } else {
            // heterozygous, or a pattern we cannot read: one reference copy
            Diplotype::new(REFERENCE_ALLELE, allele)
        }
    }
}
