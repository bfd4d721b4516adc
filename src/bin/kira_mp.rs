use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_metapep::app::{App, LcaResult, ProgressSink, lca_report};
use kira_metapep::config::ConfigLoader;
use kira_metapep::domain::TaxonId;
use kira_metapep::error::KiraError;
use kira_metapep::input::{InputLoader, load_tree};
use kira_metapep::output::{JsonOutput, OutputMode, StderrProgress};
use kira_metapep::project::{ImportReport, ProjectTable};
use kira_metapep::resolver::NoSequenceService;

#[derive(Parser)]
#[command(name = "kira-mp")]
#[command(about = "Metaproteomics sample annotation: peptides, taxonomy LCA and functions")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Import manifests into a project and report the result")]
    Annotate(AnnotateArgs),
    #[command(about = "Last common ancestor of taxonomy ids")]
    Lca(LcaArgs),
}

#[derive(Args)]
struct AnnotateArgs {
    #[arg(required = true)]
    manifests: Vec<Utf8PathBuf>,

    #[arg(long)]
    config: Option<String>,

    /// Print flat peptide rows of the whole project after importing.
    #[arg(long)]
    export: bool,

    /// Drop a sample after importing; may be repeated.
    #[arg(long = "remove")]
    remove: Vec<String>,
}

#[derive(Args)]
struct LcaArgs {
    #[arg(long)]
    taxonomy: Utf8PathBuf,

    #[arg(required = true)]
    ids: Vec<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::MissingConfig
        | KiraError::ConfigRead(_)
        | KiraError::ConfigParse(_)
        | KiraError::InvalidConfig(_)
        | KiraError::InputRead { .. }
        | KiraError::InputParse { .. }
        | KiraError::InvalidTaxonomyTree(_)
        | KiraError::InvalidAccessionPattern(_)
        | KiraError::InvalidTaxonId(_)
        | KiraError::InvalidRank(_)
        | KiraError::SampleNotFound(_) => 2,
        KiraError::NoMetaproteomicsData
        | KiraError::MissingAnnotationSource { .. }
        | KiraError::FormatIncompatible { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    match cli.command {
        Commands::Annotate(args) => run_annotate(args, output_mode),
        Commands::Lca(args) => run_lca(args, output_mode),
    }
}

fn run_annotate(args: AnnotateArgs, output_mode: OutputMode) -> miette::Result<()> {
    let config = ConfigLoader::resolve(args.config.as_deref())?;
    let app = App::new(ProjectTable::with_formats(config.pinned), NoSequenceService);
    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Interactive => &StderrProgress,
        OutputMode::NonInteractive => &JsonOutput,
    };

    let mut loader = InputLoader::new(&config);
    let mut reports = Vec::with_capacity(args.manifests.len());
    for manifest in &args.manifests {
        let request = loader.load(manifest)?;
        reports.push(app.import(request, sink)?);
    }
    for name in &args.remove {
        let removed = app.remove(name, sink)?;
        if matches!(output_mode, OutputMode::NonInteractive) {
            JsonOutput::print_remove(&removed).into_diagnostic()?;
        }
    }

    match output_mode {
        OutputMode::NonInteractive => {
            for report in &reports {
                JsonOutput::print_import(report).into_diagnostic()?;
            }
            if args.export {
                JsonOutput::print_export(&app.export(sink)?).into_diagnostic()?;
            } else {
                JsonOutput::print_list(&app.list(sink)?).into_diagnostic()?;
            }
        }
        OutputMode::Interactive => {
            for report in &reports {
                print_import_summary(report);
            }
            if args.export {
                JsonOutput::print_export(&app.export(sink)?).into_diagnostic()?;
            }
        }
    }
    Ok(())
}

fn run_lca(args: LcaArgs, output_mode: OutputMode) -> miette::Result<()> {
    let tree = load_tree(&args.taxonomy)?;
    let ids = args
        .ids
        .iter()
        .map(|id| id.parse::<TaxonId>())
        .collect::<Result<Vec<_>, _>>()?;
    let result = lca_report(&tree, ids);
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_lca(&result).into_diagnostic(),
        OutputMode::Interactive => {
            print_lca_summary(&result);
            Ok(())
        }
    }
}

fn print_import_summary(report: &ImportReport) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";
    let summary = &report.summary;

    println!("{cyan}KIRA-MP import: {}{reset}", report.samples.join(", "));
    println!(
        "{green}  peptides: {} from {} db search and {} de novo rows{reset}",
        summary.groups, summary.db_search_rows, summary.de_novo_rows
    );
    println!(
        "{green}  taxonomy: {} resolved, {} unresolved{reset}",
        summary.taxonomy.groups_resolved, summary.taxonomy.groups_unresolved
    );
    println!(
        "{green}  function: {} annotated, {} conflicts{reset}",
        summary.functions.annotated, summary.functions.conflicts
    );
    if summary.de_novo_confirmed + summary.de_novo_only > 0 {
        println!(
            "{green}  de novo: {} confirmed, {} de novo only{reset}",
            summary.de_novo_confirmed, summary.de_novo_only
        );
    }
    if !summary.orphans.is_empty() {
        println!(
            "{yellow}  dropped de novo files: {} ({} peptides){reset}",
            summary.orphans.files.join(", "),
            summary.orphans.groups
        );
    }
    if summary.empty_samples > 0 {
        println!("{yellow}  empty samples: {}{reset}", summary.empty_samples);
    }
}

fn print_lca_summary(result: &LcaResult) {
    match &result.lca {
        Some(id) => {
            let rank = result.rank.map(|rank| rank.to_string()).unwrap_or_default();
            let name = result.name.as_deref().unwrap_or("");
            println!("{id}\t{rank}\t{name}");
        }
        None => println!("no common ancestor"),
    }
}
