use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueHint};
use clap_complete::{generate, Shell};
use console::style;
use dialoguer::{theme::ColorfulTheme, Confirm, Input, Select};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use tracing::{info, warn};

use pharmaguard::analysis::{AnalysisReport, PharmacogenomicAnalyzer};
use pharmaguard::config::{Settings, CONFIG_ENV, TABLES_ENV};
use pharmaguard::discovery::FileDiscovery;
use pharmaguard::error::InputError;
use pharmaguard::output::{render_json, ReportFormat, ReportGenerator};
use pharmaguard::parsers::{parse_drug_list, read_content, read_input};
use pharmaguard::tables::KnowledgeBase;
use pharmaguard::types::{Gene, RiskLabel};

/// Pharmacogenomic risk assessment from VCF files
#[derive(Parser, Debug)]
#[command(
    name = "pharmaguard",
    version,
    about = "Deterministic pharmacogenomic risk assessment from VCF files",
    long_about = r#"
Turns a patient's variant calls into star alleles, diplotypes and metabolizer
phenotypes for CYP2C19, CYP2C9, CYP2D6, DPYD, SLCO1B1 and TPMT, then resolves
each requested drug to a risk label, severity and dosing recommendation.

Input files may be plain, gzip, bzip2 or xz compressed VCF.
"#
)]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Patient VCF file
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath, conflicts_with = "batch")]
    vcf: Option<PathBuf>,

    /// Drugs to assess, comma-separated
    #[arg(short, long, value_name = "DRUGS")]
    drug: Option<String>,

    /// VCF files or directories to analyse as a batch
    #[arg(short, long, value_name = "PATHS", num_args = 1.., value_hint = ValueHint::AnyPath)]
    batch: Vec<PathBuf>,

    /// Recursive search for VCF files in batch directories
    #[arg(short, long)]
    recursive: bool,

    /// Interactive mode with prompts for all parameters
    #[arg(short, long)]
    interactive: bool,

    /// Number of threads (0 = auto)
    #[arg(short, long)]
    threads: Option<usize>,

    /// Output format
    #[arg(short, long, value_enum)]
    format: Option<OutputFormat>,

    /// Output directory for reports
    #[arg(short, long, value_hint = ValueHint::DirPath)]
    output: Option<PathBuf>,

    /// Print the JSON report to stdout instead of writing files
    #[arg(long)]
    stdout: bool,

    /// Settings file (TOML)
    #[arg(long, value_name = "FILE", env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Directory with star_definitions.json, phenotype_tables.json and drug_rules.json
    #[arg(long, value_name = "DIR", env = TABLES_ENV)]
    tables: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Generate shell completions
    #[arg(long, value_enum, value_name = "SHELL")]
    completions: Option<Shell>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate shell completions
    Completions { shell: Shell },
    /// List supported drugs and the gene each one is resolved against
    Drugs,
    /// List supported genes and their defined star alleles
    Genes,
    /// Load and validate the lookup tables
    CheckTables {
        /// Table directory; the configured tables when omitted
        dir: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
    Tsv,
    Html,
    All,
}

impl From<OutputFormat> for ReportFormat {
    fn from(format: OutputFormat) -> ReportFormat {
        match format {
            OutputFormat::Json => ReportFormat::Json,
            OutputFormat::Csv => ReportFormat::Csv,
            OutputFormat::Tsv => ReportFormat::Tsv,
            OutputFormat::Html => ReportFormat::Html,
            OutputFormat::All => ReportFormat::All,
        }
    }
}

/// What to analyse, after CLI or interactive input
#[derive(Debug)]
struct RunConfig {
    inputs: Vec<PathBuf>,
    batch: bool,
    recursive: bool,
    drugs: Vec<String>,
    stdout: bool,
}

impl RunConfig {
    fn from_cli(cli: &Cli) -> Result<Self> {
        let (inputs, batch) = match &cli.vcf {
            Some(vcf) => (vec![vcf.clone()], false),
            None => (cli.batch.clone(), true),
        };

        if inputs.is_empty() {
            anyhow::bail!("Nothing to analyse: pass --vcf FILE or --batch PATHS");
        }

        Ok(Self {
            inputs,
            batch,
            recursive: cli.recursive,
            drugs: cli.drug.as_deref().map(parse_drug_list).unwrap_or_default(),
            stdout: cli.stdout,
        })
    }
}

fn main() {
    if let Err(err) = run() {
        match err.downcast_ref::<InputError>() {
            Some(input_err) => {
                eprintln!("{} [{}] {}", style("error").red().bold(), input_err.code(), input_err);
                process::exit(2);
            }
            None => {
                eprintln!("{} {:#}", style("error").red().bold(), err);
                process::exit(1);
            }
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(shell) = cli.completions {
        generate_completions(shell);
        return Ok(());
    }

    if let Some(Commands::Completions { shell }) = &cli.command {
        generate_completions(*shell);
        return Ok(());
    }

    let mut settings = Settings::load(cli.config.as_deref())?;
    apply_cli_overrides(&mut settings, &cli);
    settings.validate()?;

    init_logging(settings.log_level_for(cli.verbose));

    match &cli.command {
        Some(Commands::Drugs) => return list_drugs(&load_tables(&settings)?),
        Some(Commands::Genes) => return list_genes(&load_tables(&settings)?),
        Some(Commands::CheckTables { dir }) => return check_tables(&settings, dir.as_deref()),
        _ => {}
    }

    let config = if cli.interactive {
        run_interactive_mode(&mut settings)?
    } else {
        RunConfig::from_cli(&cli)?
    };

    if config.drugs.is_empty() {
        return Err(InputError::InvalidDrug.into());
    }

    init_thread_pool(settings.thread_count())?;

    let kb = load_tables(&settings)?;

    info!("Starting pharmacogenomic analysis...");
    info!("Using {} threads", rayon::current_num_threads());

    run_analysis(&config, &settings, &kb)
}

fn apply_cli_overrides(settings: &mut Settings, cli: &Cli) {
    if let Some(tables) = &cli.tables {
        settings.tables_dir = Some(tables.clone());
    }
    if let Some(threads) = cli.threads {
        settings.threads = threads;
    }
    if let Some(format) = cli.format {
        settings.format = format.into();
    }
    if let Some(output) = &cli.output {
        settings.output_dir = output.clone();
    }
}

fn generate_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
}

fn init_logging(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(format!("pharmaguard={}", level))
        .with_writer(io::stderr)
        .init();
}

fn init_thread_pool(num_threads: usize) -> Result<()> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()
        .map_err(|e| anyhow::anyhow!("Failed to initialize thread pool: {}", e))?;

    Ok(())
}

fn load_tables(settings: &Settings) -> Result<KnowledgeBase> {
    settings
        .load_knowledge_base()
        .context("Failed to load lookup tables")
}

fn list_drugs(kb: &KnowledgeBase) -> Result<()> {
    let analyzer = PharmacogenomicAnalyzer::new(kb);
    let resolver = analyzer.recommendations();

    println!("{}", style("Supported Drugs:").bold().cyan());
    println!();

    for drug in resolver.supported_drugs() {
        let genes: Vec<String> = resolver
            .genes_for(&drug)
            .iter()
            .map(Gene::to_string)
            .collect();
        println!(
            "  {} - {}",
            style(&drug).green().bold(),
            style(genes.join(", ")).yellow()
        );
    }

    Ok(())
}

fn list_genes(kb: &KnowledgeBase) -> Result<()> {
    println!("{}", style("Supported Genes:").bold().cyan());
    println!();

    for gene in Gene::ALL {
        let labels = kb.definitions.labels(gene);
        println!("  {}", style(gene).green().bold());
        if labels.is_empty() {
            println!("         {}", style("no star-allele definitions").dim());
        } else {
            println!("         {}", style(labels.join(" ")).dim());
        }
    }

    Ok(())
}

fn check_tables(settings: &Settings, dir: Option<&Path>) -> Result<()> {
    println!("{}", style("Checking Lookup Tables:").bold().cyan());
    println!();

    match settings.load_knowledge_base_from(dir) {
        Ok(kb) => {
            println!(
                "  {} {} star alleles",
                style("✓").green(),
                kb.definitions.allele_count()
            );
            println!(
                "  {} {} CYP2D6 activity scores",
                style("✓").green(),
                kb.phenotypes.activity_scores().len()
            );
            println!(
                "  {} {} drug rules",
                style("✓").green(),
                kb.drug_rules.rule_count()
            );
            for gene in Gene::ALL {
                if !kb.phenotypes.contains_gene(gene) {
                    println!("  {} {} has no phenotype table", style("!").yellow(), gene);
                }
            }
            Ok(())
        }
        Err(err) => {
            println!("  {} {}", style("✗").red(), err);
            Err(err.into())
        }
    }
}

fn run_interactive_mode(settings: &mut Settings) -> Result<RunConfig> {
    println!(
        "{}",
        style("╔══════════════════════════════════════════════════════════════╗").cyan()
    );
    println!(
        "{}",
        style("║          PharmaGuard - Interactive Mode                      ║")
            .cyan()
            .bold()
    );
    println!(
        "{}",
        style("╚══════════════════════════════════════════════════════════════╝").cyan()
    );
    println!();

    let theme = ColorfulTheme::default();

    let batch = Confirm::with_theme(&theme)
        .with_prompt("Analyse a batch of files?")
        .default(false)
        .interact()?;

    let (inputs, recursive) = if batch {
        let paths: String = Input::with_theme(&theme)
            .with_prompt("VCF files/directories (space-separated)")
            .interact_text()?;
        let recursive = Confirm::with_theme(&theme)
            .with_prompt("Enable recursive directory search?")
            .default(true)
            .interact()?;
        (paths.split_whitespace().map(PathBuf::from).collect(), recursive)
    } else {
        let vcf: String = Input::with_theme(&theme)
            .with_prompt("Patient VCF file")
            .interact_text()?;
        (vec![PathBuf::from(vcf)], false)
    };

    let drugs: String = Input::with_theme(&theme)
        .with_prompt("Drugs (comma-separated)")
        .default("codeine,clopidogrel,warfarin".to_string())
        .interact_text()?;

    let formats = ["JSON", "CSV", "TSV", "HTML", "All formats"];
    let format_idx = Select::with_theme(&theme)
        .with_prompt("Select output format")
        .default(0)
        .items(&formats)
        .interact()?;

    settings.format = match format_idx {
        1 => ReportFormat::Csv,
        2 => ReportFormat::Tsv,
        3 => ReportFormat::Html,
        4 => ReportFormat::All,
        _ => ReportFormat::Json,
    };

    let output: String = Input::with_theme(&theme)
        .with_prompt("Output directory")
        .default(settings.output_dir.display().to_string())
        .interact_text()?;
    settings.output_dir = PathBuf::from(output);

    settings.threads = Input::with_theme(&theme)
        .with_prompt("Number of threads (0 = auto-detect)")
        .default(settings.threads)
        .interact_text()?;

    Ok(RunConfig {
        inputs,
        batch,
        recursive,
        drugs: parse_drug_list(&drugs),
        stdout: false,
    })
}

fn run_analysis(config: &RunConfig, settings: &Settings, kb: &KnowledgeBase) -> Result<()> {
    let analyzer = PharmacogenomicAnalyzer::new(kb);

    let reports = if config.batch {
        run_batch(config, settings, &analyzer)?
    } else {
        let path = &config.inputs[0];
        let content = read_input(path, settings.max_file_size)?;
        vec![analyzer.analyze(&sample_id(path), &content, &config.drugs)]
    };

    if config.stdout {
        println!("{}", render_json(&reports)?);
        return Ok(());
    }

    print_summary(&reports);

    let generator = ReportGenerator::new(&settings.output_dir)?;
    let written = generator.generate(&reports, settings.format)?;

    println!(
        "\n{} {} report file(s) saved to: {}",
        style("✓").green().bold(),
        written.len(),
        style(settings.output_dir.display()).cyan()
    );

    Ok(())
}

fn run_batch(
    config: &RunConfig,
    settings: &Settings,
    analyzer: &PharmacogenomicAnalyzer,
) -> Result<Vec<AnalysisReport>> {
    let discovery = FileDiscovery::new(config.recursive);
    let files = discovery.discover(&config.inputs)?;
    info!("Found {} files to analyze", files.len());

    if files.is_empty() {
        anyhow::bail!("No VCF files found");
    }

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    pb.set_message("Analyzing samples...");

    let reports: Vec<AnalysisReport> = files
        .par_iter()
        .filter_map(|path| {
            let outcome = read_content(path, settings.max_file_size);
            pb.inc(1);
            match outcome {
                Ok(content) => Some(analyzer.analyze(&sample_id(path), &content, &config.drugs)),
                Err(e) => {
                    let code = e
                        .downcast_ref::<InputError>()
                        .map(InputError::code)
                        .unwrap_or("READ_ERROR");
                    warn!("Skipping {} [{}]: {}", path.display(), code, e);
                    None
                }
            }
        })
        .collect();

    pb.finish_with_message("Analysis complete!");

    info!("Successfully analyzed {} of {} files", reports.len(), files.len());
    Ok(reports)
}

fn print_summary(reports: &[AnalysisReport]) {
    for report in reports {
        println!("\n{}", style(&report.sample_id).bold().cyan());

        for response in &report.responses {
            let risk = &response.risk_assessment;
            let label = match risk.risk_label {
                RiskLabel::Safe => style(risk.risk_label.as_str()).green(),
                RiskLabel::AdjustDosage => style(risk.risk_label.as_str()).yellow(),
                RiskLabel::Toxic | RiskLabel::Ineffective => style(risk.risk_label.as_str()).red(),
                RiskLabel::Unknown => style(risk.risk_label.as_str()).dim(),
            };
            println!(
                "  {:<16} {:<8} {} ({}, confidence {:.2})",
                response.drug,
                response.gene.symbol(),
                label,
                risk.severity,
                risk.confidence_score
            );
        }

        for failure in &report.failures {
            println!(
                "  {:<16} {} {}",
                failure.drug,
                style(&failure.code).red(),
                style(&failure.details).dim()
            );
        }
    }
}

/// File name without the `.vcf` and compression suffixes
fn sample_id(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    let mut id = name.as_str();
    for suffix in [".gz", ".bgz", ".bz2", ".xz"] {
        if let Some(stripped) = id.strip_suffix(suffix) {
            id = stripped;
            break;
        }
    }
    id.strip_suffix(".vcf")
        .or_else(|| id.strip_suffix(".VCF"))
        .unwrap_or(id)
        .to_string()
}
