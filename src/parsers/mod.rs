use anyhow::{Context, Result};
use bzip2::read::BzDecoder;
use flate2::read::MultiGzDecoder;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use xz2::read::XzDecoder;

use crate::error::InputError;
use crate::types::{Gene, Variant};

mod vcf;

pub use vcf::VcfParser;

/// Extracted variants for every supported gene, in file order
pub type VariantsByGene = BTreeMap<Gene, Vec<Variant>>;

/// Marker that must appear near the top of every accepted file
pub const VCF_FORMAT_MARKER: &str = "##fileformat=VCF";

/// How many leading lines are scanned for the format marker
pub const HEADER_SCAN_LINES: usize = 20;

/// Upload limit applied to the decompressed text (5 MiB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 5 * 1024 * 1024;

const COMPRESSED_SUFFIXES: [&str; 4] = [".gz", ".bgz", ".bz2", ".xz"];

/// Open a possibly compressed file for buffered reading
pub fn open_file(path: &Path) -> Result<Box<dyn BufRead>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open file: {}", path.display()))?;

    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let reader: Box<dyn Read> = match extension.as_str() {
        "gz" | "bgz" => Box::new(MultiGzDecoder::new(file)),
        "bz2" => Box::new(BzDecoder::new(file)),
        "xz" => Box::new(XzDecoder::new(file)),
        _ => Box::new(file),
    };

    Ok(Box::new(BufReader::new(reader)))
}

/// True for `.vcf` files, optionally carrying a compression suffix
pub fn is_vcf_path(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let stem = COMPRESSED_SUFFIXES
        .iter()
        .find_map(|suffix| name.strip_suffix(suffix))
        .unwrap_or(&name);

    stem.ends_with(".vcf")
}

/// Check the first lines for the VCF format marker
pub fn validate_vcf_header(content: &str) -> bool {
    content
        .lines()
        .take(HEADER_SCAN_LINES)
        .any(|line| line.starts_with(VCF_FORMAT_MARKER))
}

/// Split a comma-separated drug list, dropping blanks
pub fn parse_drug_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .collect()
}

/// Boundary checks on an already-read upload: size, encoding, header
pub fn validate_content(bytes: Vec<u8>, max_size: u64) -> Result<String, InputError> {
    let size = bytes.len() as u64;
    if size > max_size {
        return Err(InputError::FileTooLarge {
            size,
            limit: max_size,
        });
    }

    let content = String::from_utf8(bytes).map_err(|_| InputError::InvalidEncoding)?;

    if !validate_vcf_header(&content) {
        return Err(InputError::InvalidVcfFormat(HEADER_SCAN_LINES));
    }

    Ok(content)
}

/// Read and validate a variant file. Validation failures surface as
/// [`InputError`] inside the returned error so callers can report a code.
pub fn read_input(path: &Path, max_size: u64) -> Result<String> {
    if !is_vcf_path(path) {
        return Err(InputError::InvalidFileType(path.display().to_string()).into());
    }

    read_content(path, max_size)
}

/// Like [`read_input`] without the file-name check, for inputs already
/// recognised by their content
pub fn read_content(path: &Path, max_size: u64) -> Result<String> {
    // read one byte past the limit so oversize input is detected without
    // pulling an unbounded stream into memory
    let mut bytes = Vec::new();
    open_file(path)?
        .take(max_size.saturating_add(1))
        .read_to_end(&mut bytes)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    Ok(validate_content(bytes, max_size)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const MINIMAL_VCF: &str = "##fileformat=VCFv4.2\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tSAMPLE\n";

    #[test]
    fn test_is_vcf_path() {
        assert!(is_vcf_path(&PathBuf::from("patient.vcf")));
        assert!(is_vcf_path(&PathBuf::from("dir/Patient.VCF.gz")));
        assert!(is_vcf_path(&PathBuf::from("patient.vcf.xz")));
        assert!(!is_vcf_path(&PathBuf::from("patient.txt")));
        assert!(!is_vcf_path(&PathBuf::from("patient.gz")));
    }

    #[test]
    fn test_header_marker_must_be_in_first_twenty_lines() {
        assert!(validate_vcf_header(MINIMAL_VCF));

        let mut late = "##comment\n".repeat(HEADER_SCAN_LINES);
        late.push_str("##fileformat=VCFv4.2\n");
        assert!(!validate_vcf_header(&late));

        let mut just_in_time = "##comment\n".repeat(HEADER_SCAN_LINES - 1);
        just_in_time.push_str("##fileformat=VCFv4.2\n");
        assert!(validate_vcf_header(&just_in_time));
    }

    #[test]
    fn test_parse_drug_list() {
        assert_eq!(
            parse_drug_list(" codeine, ,Warfarin ,"),
            vec!["codeine".to_string(), "Warfarin".to_string()]
        );
        assert!(parse_drug_list(" , ").is_empty());
    }

    #[test]
    fn test_validate_content_errors() {
        assert_eq!(
            validate_content(MINIMAL_VCF.as_bytes().to_vec(), 10).unwrap_err().code(),
            "FILE_TOO_LARGE"
        );
        assert_eq!(
            validate_content(vec![0xff, 0xfe, 0x00], 100).unwrap_err(),
            InputError::InvalidEncoding
        );
        assert_eq!(
            validate_content(b"#CHROM\tPOS\n".to_vec(), 100).unwrap_err().code(),
            "INVALID_VCF_FORMAT"
        );
        assert!(validate_content(MINIMAL_VCF.as_bytes().to_vec(), 1024).is_ok());
    }

    #[test]
    fn test_read_input_plain_and_gzip() -> Result<()> {
        let temp_dir = TempDir::new()?;

        let plain = temp_dir.path().join("sample.vcf");
        std::fs::write(&plain, MINIMAL_VCF)?;
        assert_eq!(read_input(&plain, DEFAULT_MAX_FILE_SIZE)?, MINIMAL_VCF);

        let gz = temp_dir.path().join("sample.vcf.gz");
        let mut encoder = GzEncoder::new(File::create(&gz)?, Compression::default());
        encoder.write_all(MINIMAL_VCF.as_bytes())?;
        encoder.finish()?;
        assert_eq!(read_input(&gz, DEFAULT_MAX_FILE_SIZE)?, MINIMAL_VCF);

        Ok(())
    }

    #[test]
    fn test_read_input_rejects_wrong_extension() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("sample.txt");
        std::fs::write(&path, MINIMAL_VCF)?;

        let err = read_input(&path, DEFAULT_MAX_FILE_SIZE).unwrap_err();
        let input_err = err.downcast_ref::<InputError>().unwrap();
        assert_eq!(input_err.code(), "INVALID_FILE_TYPE");
        Ok(())
    }
}
