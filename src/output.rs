use anyhow::{Context, Result};
use chrono::Local;
use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use serde_json::to_string_pretty;
use std::fs;
use std::path::{Path, PathBuf};

use crate::analysis::AnalysisReport;
use crate::types::*;

/// Supported report formats
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Json,
    Csv,
    Tsv,
    Html,
    All,
}

const TABLE_HEADER: [&str; 10] = [
    "record",
    "sample_id",
    "gene",
    "drug",
    "diplotype",
    "phenotype",
    "risk_label",
    "severity",
    "confidence",
    "detail",
];

/// Writes analysis reports to an output directory
pub struct ReportGenerator {
    output_dir: PathBuf,
}

impl ReportGenerator {
    pub fn new(output_dir: &Path) -> Result<Self> {
        if !output_dir.exists() {
            fs::create_dir_all(output_dir).with_context(|| {
                format!("Failed to create output directory {}", output_dir.display())
            })?;
        }

        Ok(Self {
            output_dir: output_dir.to_path_buf(),
        })
    }

    /// Generate reports in the requested format(s), returning the files written
    pub fn generate(&self, reports: &[AnalysisReport], format: ReportFormat) -> Result<Vec<PathBuf>> {
        let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();

        let written = match format {
            ReportFormat::Json => vec![self.generate_json_report(reports, &timestamp)?],
            ReportFormat::Csv => vec![self.generate_delimited_report(reports, &timestamp, b',', "csv")?],
            ReportFormat::Tsv => vec![self.generate_delimited_report(reports, &timestamp, b'\t', "tsv")?],
            ReportFormat::Html => vec![self.generate_html_report(reports, &timestamp)?],
            ReportFormat::All => vec![
                self.generate_json_report(reports, &timestamp)?,
                self.generate_delimited_report(reports, &timestamp, b',', "csv")?,
                self.generate_delimited_report(reports, &timestamp, b'\t', "tsv")?,
                self.generate_html_report(reports, &timestamp)?,
            ],
        };

        Ok(written)
    }

    fn report_path(&self, timestamp: &str, extension: &str) -> PathBuf {
        self.output_dir
            .join(format!("pharmaguard_{}.{}", timestamp, extension))
    }

    fn generate_json_report(&self, reports: &[AnalysisReport], timestamp: &str) -> Result<PathBuf> {
        let path = self.report_path(timestamp, "json");
        fs::write(&path, render_json(reports)?)
            .with_context(|| format!("Failed to write JSON report to {}", path.display()))?;
        Ok(path)
    }

    fn generate_delimited_report(
        &self,
        reports: &[AnalysisReport],
        timestamp: &str,
        delimiter: u8,
        extension: &str,
    ) -> Result<PathBuf> {
        let path = self.report_path(timestamp, extension);
        let mut wtr = WriterBuilder::new()
            .delimiter(delimiter)
            .from_path(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;

        wtr.write_record(TABLE_HEADER)?;
        for row in report_rows(reports) {
            wtr.write_record(&row)?;
        }

        wtr.flush()?;
        Ok(path)
    }

    fn generate_html_report(&self, reports: &[AnalysisReport], timestamp: &str) -> Result<PathBuf> {
        let path = self.report_path(timestamp, "html");
        fs::write(&path, render_html(reports))
            .with_context(|| format!("Failed to write HTML report to {}", path.display()))?;
        Ok(path)
    }
}

/// Pretty JSON for a set of reports
pub fn render_json(reports: &[AnalysisReport]) -> Result<String> {
    to_string_pretty(reports).context("Failed to serialize reports to JSON")
}

/// Flat rows shared by the CSV and TSV writers: decisions, failures, then profiles
fn report_rows(reports: &[AnalysisReport]) -> Vec<[String; 10]> {
    let mut rows = Vec::new();

    for report in reports {
        for response in &report.responses {
            let profile = response
                .pharmacogenomic_profile
                .iter()
                .find(|p| p.gene == response.gene);
            rows.push([
                "decision".to_string(),
                report.sample_id.clone(),
                response.gene.to_string(),
                response.drug.clone(),
                profile.map(|p| p.diplotype.clone()).unwrap_or_default(),
                profile.map(|p| p.phenotype.to_string()).unwrap_or_default(),
                response.risk_assessment.risk_label.to_string(),
                response.risk_assessment.severity.to_string(),
                format!("{:.2}", response.risk_assessment.confidence_score),
                response.clinical_recommendation.summary.clone(),
            ]);
        }

        for failure in &report.failures {
            rows.push([
                "failure".to_string(),
                report.sample_id.clone(),
                String::new(),
                failure.drug.clone(),
                String::new(),
                String::new(),
                String::new(),
                String::new(),
                String::new(),
                format!("{}: {}", failure.code, failure.details),
            ]);
        }

        for profile in &report.profile {
            rows.push([
                "profile".to_string(),
                report.sample_id.clone(),
                profile.gene.to_string(),
                String::new(),
                profile.diplotype.clone(),
                profile.phenotype.to_string(),
                String::new(),
                String::new(),
                String::new(),
                profile.rsids().join("; "),
            ]);
        }
    }

    rows
}

fn render_html(reports: &[AnalysisReport]) -> String {
    let generated = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let body: String = reports.iter().map(sample_section_html).collect();

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Pharmacogenomic Report</title>
    <style>
        body {{
            font-family: Arial, sans-serif;
            margin: 40px;
            background-color: #f5f5f5;
        }}
        .container {{
            max-width: 1200px;
            margin: 0 auto;
            background-color: white;
            padding: 30px;
            border-radius: 10px;
        }}
        h1, h2, h3 {{
            color: #2c3e50;
        }}
        table {{
            width: 100%;
            border-collapse: collapse;
            margin: 20px 0;
        }}
        th, td {{
            border: 1px solid #ddd;
            padding: 10px;
            text-align: left;
        }}
        th {{
            background-color: #3498db;
            color: white;
        }}
        .risk-safe {{ background-color: #d4edda; }}
        .risk-adjust {{ background-color: #fff3cd; }}
        .risk-toxic, .risk-ineffective {{ background-color: #f8d7da; }}
        .risk-unknown {{ background-color: #e2e3e5; }}
    </style>
</head>
<body>
    <div class="container">
        <h1>Pharmacogenomic Report</h1>
        <p>Generated on: {}</p>
        {}
    </div>
</body>
</html>"#,
        generated, body
    )
}

fn sample_section_html(report: &AnalysisReport) -> String {
    let mut html = format!(
        "<div class=\"section\"><h2>Sample {}</h2>\n",
        escape_html(&report.sample_id)
    );

    html.push_str("<h3>Drug decisions</h3>\n");
    if report.responses.is_empty() {
        html.push_str("<p>No drugs resolved.</p>\n");
    } else {
        html.push_str("<table>\n<tr><th>Drug</th><th>Gene</th><th>Risk</th><th>Severity</th><th>Confidence</th><th>Recommendation</th></tr>\n");
        for response in &report.responses {
            let risk = &response.risk_assessment;
            html.push_str(&format!(
                "<tr class=\"{}\"><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{:.2}</td><td>{}</td></tr>\n",
                risk_class(risk.risk_label),
                escape_html(&response.drug),
                response.gene,
                risk.risk_label,
                risk.severity,
                risk.confidence_score,
                escape_html(&response.clinical_recommendation.dosing_guidance),
            ));
        }
        html.push_str("</table>\n");
    }

    if !report.failures.is_empty() {
        html.push_str("<h3>Unsupported drugs</h3>\n<ul>\n");
        for failure in &report.failures {
            html.push_str(&format!(
                "<li>{} ({}): {}</li>\n",
                escape_html(&failure.drug),
                failure.code,
                escape_html(&failure.details)
            ));
        }
        html.push_str("</ul>\n");
    }

    html.push_str("<h3>Gene profile</h3>\n<table>\n<tr><th>Gene</th><th>Diplotype</th><th>Phenotype</th><th>Variants</th></tr>\n");
    for profile in &report.profile {
        html.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            profile.gene,
            escape_html(&profile.diplotype),
            profile.phenotype.description(),
            escape_html(&profile.rsids().join(", ")),
        ));
    }
    html.push_str("</table>\n</div>\n");

    html
}

fn risk_class(label: RiskLabel) -> &'static str {
    match label {
        RiskLabel::Safe => "risk-safe",
        RiskLabel::AdjustDosage => "risk-adjust",
        RiskLabel::Toxic => "risk-toxic",
        RiskLabel::Ineffective => "risk-ineffective",
        RiskLabel::Unknown => "risk-unknown",
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
