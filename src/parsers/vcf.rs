use std::collections::HashMap;
use tracing::debug;

use crate::parsers::VariantsByGene;
use crate::types::*;

/// Minimum columns for a data line: CHROM..FORMAT
const MIN_COLUMNS: usize = 9;

/// VCF variant extractor restricted to the supported gene panel
#[derive(Debug, Default, Clone, Copy)]
pub struct VcfParser;

impl VcfParser {
    pub fn new() -> Self {
        Self
    }

    /// Extract variants from VCF text into a per-gene map.
    ///
    /// Every supported gene gets an entry, possibly empty. Header, blank and
    /// malformed lines are skipped, as are lines whose `GENE` tag is missing
    /// or outside the panel. Filtering is not an error.
    pub fn extract(&self, content: &str) -> VariantsByGene {
        let mut by_gene: VariantsByGene = Gene::ALL.iter().map(|g| (*g, Vec::new())).collect();

        for (index, line) in content.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }

            match self.parse_variant_line(line) {
                Some(variant) => by_gene.entry(variant.gene).or_default().push(variant),
                None => debug!("Skipping line {}: malformed or outside gene panel", index + 1),
            }
        }

        by_gene
    }

    /// Parse one data line. `None` means the line is filtered out.
    pub fn parse_variant_line(&self, line: &str) -> Option<Variant> {
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < MIN_COLUMNS {
            return None;
        }

        let position = parts[1].trim().parse().ok();
        let info = self.parse_info_field(parts[7]);

        let gene = info
            .get("GENE")
            .copied()
            .flatten()
            .and_then(Gene::from_symbol)?;

        let id_column = match parts[2] {
            "." | "" => None,
            id => Some(id.to_string()),
        };
        let rsid = info
            .get("RS")
            .copied()
            .flatten()
            .filter(|rs| !rs.is_empty())
            .map(str::to_string)
            .or(id_column);

        let star_allele = info
            .get("STAR")
            .copied()
            .flatten()
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(|tag| {
                if tag.starts_with('*') {
                    tag.to_string()
                } else {
                    format!("*{}", tag)
                }
            });

        let genotype = self.parse_genotype_field(parts[8], parts.get(9).copied());

        Some(Variant {
            chromosome: parts[0].to_string(),
            position,
            rsid,
            reference_allele: parts[3].to_string(),
            alternate_allele: parts[4].to_string(),
            gene,
            star_allele,
            genotype,
        })
    }

    /// INFO tokens: `key=value` maps to `Some(value)`, bare flags to `None`
    fn parse_info_field<'a>(&self, info_str: &'a str) -> HashMap<&'a str, Option<&'a str>> {
        let mut info_map = HashMap::new();
        if info_str == "." {
            return info_map;
        }

        for entry in info_str.split(';').filter(|e| !e.is_empty()) {
            match entry.split_once('=') {
                Some((key, value)) => info_map.insert(key, Some(value)),
                None => info_map.insert(entry, None),
            };
        }

        info_map
    }

    fn parse_genotype_field(&self, format_str: &str, sample_str: Option<&str>) -> GenotypeCall {
        let sample_str = match sample_str {
            Some(sample) if !sample.is_empty() && !format_str.is_empty() => sample,
            _ => return GenotypeCall::unknown(),
        };

        let gt_index = match format_str.split(':').position(|f| f == "GT") {
            Some(index) => index,
            None => return GenotypeCall::unknown(),
        };

        sample_str
            .split(':')
            .nth(gt_index)
            .map(GenotypeCall::parse)
            .unwrap_or_else(GenotypeCall::unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(info: &str, format: &str, sample: Option<&str>) -> String {
        let mut fields = vec!["22", "42130692", "rs3892097", "C", "T", "50", "PASS", info, format];
        if let Some(sample) = sample {
            fields.push(sample);
        }
        fields.join("\t")
    }

    #[test]
    fn test_extract_groups_by_gene_in_file_order() {
        let content = [
            "##fileformat=VCFv4.2".to_string(),
            "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tSAMPLE".to_string(),
            line("GENE=CYP2D6", "GT", Some("0/1")),
            String::new(),
            "22\t42126611\trs16947\tG\tA\t50\tPASS\tGENE=CYP2D6\tGT\t1|1".to_string(),
            "1\t97450058\trs3918290\tC\tT\t50\tPASS\tGENE=DPYD;STAR=*2A\tGT\t0/1".to_string(),
        ]
        .join("\n");

        let by_gene = VcfParser::new().extract(&content);

        assert_eq!(by_gene.len(), 6);
        let cyp2d6 = &by_gene[&Gene::Cyp2d6];
        assert_eq!(cyp2d6.len(), 2);
        assert_eq!(cyp2d6[0].rsid.as_deref(), Some("rs3892097"));
        assert_eq!(cyp2d6[1].rsid.as_deref(), Some("rs16947"));
        assert_eq!(cyp2d6[1].genotype.as_str(), "1/1");
        assert_eq!(by_gene[&Gene::Dpyd][0].star_allele.as_deref(), Some("*2A"));
        assert!(by_gene[&Gene::Tpmt].is_empty());
    }

    #[test]
    fn test_drops_lines_without_supported_gene() {
        let parser = VcfParser::new();
        assert!(parser.parse_variant_line(&line("DP=10", "GT", Some("0/1"))).is_none());
        assert!(parser.parse_variant_line(&line("GENE=BRCA1", "GT", Some("0/1"))).is_none());
        assert!(parser.parse_variant_line(&line("GENE", "GT", Some("0/1"))).is_none());
        assert!(parser.parse_variant_line(&line("GENE=cyp2d6", "GT", Some("0/1"))).is_none());
    }

    #[test]
    fn test_drops_short_lines() {
        let parser = VcfParser::new();
        assert!(parser
            .parse_variant_line("22\t42130692\trs3892097\tC\tT\t50\tPASS\tGENE=CYP2D6")
            .is_none());
    }

    #[test]
    fn test_keeps_lines_with_unreadable_position() {
        let parser = VcfParser::new();

        let v = parser
            .parse_variant_line("chr22\t.\trs3892097\tC\tT\t.\tPASS\tGENE=CYP2D6;RS=rs3892097\tGT\t1/1")
            .unwrap();
        assert_eq!(v.position, None);
        assert_eq!(v.rsid.as_deref(), Some("rs3892097"));
        assert_eq!(v.genotype.as_str(), "1/1");

        let v = parser
            .parse_variant_line("22\tabc\trs3892097\tC\tT\t50\tPASS\tGENE=CYP2D6\tGT\t0/1")
            .unwrap();
        assert_eq!(v.position, None);

        let v = parser.parse_variant_line(&line("GENE=CYP2D6", "GT", Some("0/1"))).unwrap();
        assert_eq!(v.position, Some(42130692));
    }

    #[test]
    fn test_rs_override_and_id_fallback() {
        let parser = VcfParser::new();

        let v = parser
            .parse_variant_line(&line("GENE=CYP2D6;RS=rs1065852", "GT", Some("0/1")))
            .unwrap();
        assert_eq!(v.rsid.as_deref(), Some("rs1065852"));

        let v = parser
            .parse_variant_line("22\t1\t.\tC\tT\t.\t.\tGENE=CYP2D6;RS\tGT\t0/1")
            .unwrap();
        assert_eq!(v.rsid, None);
    }

    #[test]
    fn test_star_tag_normalized() {
        let parser = VcfParser::new();
        let v = parser
            .parse_variant_line(&line("GENE=CYP2D6;STAR=4", "GT", Some("0/1")))
            .unwrap();
        assert_eq!(v.star_allele.as_deref(), Some("*4"));

        let v = parser
            .parse_variant_line(&line("GENE=CYP2D6;STAR=", "GT", Some("0/1")))
            .unwrap();
        assert_eq!(v.star_allele, None);
    }

    #[test]
    fn test_genotype_from_format_order() {
        let parser = VcfParser::new();

        let v = parser
            .parse_variant_line(&line("GENE=CYP2D6", "DP:GT:GQ", Some("35:0|1:99")))
            .unwrap();
        assert_eq!(v.genotype.as_str(), "0/1");

        // no sample column
        let v = parser.parse_variant_line(&line("GENE=CYP2D6", "GT", None)).unwrap();
        assert!(v.genotype.is_unknown());

        // no GT key
        let v = parser
            .parse_variant_line(&line("GENE=CYP2D6", "DP", Some("35")))
            .unwrap();
        assert!(v.genotype.is_unknown());

        // GT declared but sample truncated
        let v = parser
            .parse_variant_line(&line("GENE=CYP2D6", "DP:GT", Some("35")))
            .unwrap();
        assert!(v.genotype.is_unknown());
    }
}
