//! structural - validate, render and package structural documents

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use log::LevelFilter;
use serde::Serialize;

use structural::{
    ConformanceCheck, Error, LayoutMode, ProcessingRequest, Processor, ProcessorConfig,
    ResourceCatalog, Task, ValidationOutcome,
};

#[derive(Parser)]
#[command(name = "structural")]
#[command(version, about = "Validate, render and package structural documents", long_about = None)]
#[command(after_help = "EXAMPLES:
    structural validate manual.xml                 Check a document against its schema
    structural xhtml manual.xml -o out --layout multi
    structural epub manual.xml -o out              Build out/output.epub
    structural schema -o schemas                   Export the bundled schemas")]
struct Cli {
    /// Log level
    #[arg(short, long, global = true, value_enum, default_value_t = Verbosity::Warn)]
    verbose: Verbosity,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum Verbosity {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<Verbosity> for LevelFilter {
    fn from(v: Verbosity) -> Self {
        match v {
            Verbosity::Error => LevelFilter::Error,
            Verbosity::Warn => LevelFilter::Warn,
            Verbosity::Info => LevelFilter::Info,
            Verbosity::Debug => LevelFilter::Debug,
            Verbosity::Trace => LevelFilter::Trace,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Validate a source document
    Validate {
        #[arg(value_name = "SOURCE")]
        source: PathBuf,

        /// Print findings as JSON
        #[arg(long)]
        json: bool,
    },

    /// Render a source document to XHTML
    Xhtml(TransformArgs),

    /// Render a source document to an EPUB package
    Epub {
        #[command(flatten)]
        transform: TransformArgs,

        /// File name of the package inside the output directory
        #[arg(long)]
        package_name: Option<String>,

        /// Additional resource to package, relative to the source directory
        #[arg(long = "extra", value_name = "RESOURCE")]
        extras: Vec<String>,

        /// External conformance checker (defaults to $STRUCTURAL_EPUBCHECK)
        #[arg(long, value_name = "PROGRAM", conflicts_with = "no_check")]
        epubcheck: Option<PathBuf>,

        /// Skip conformance checking
        #[arg(long)]
        no_check: bool,
    },

    /// Validate previously generated XHTML
    CheckOutput {
        #[arg(short, long, value_name = "DIR")]
        output_directory: PathBuf,
    },

    /// Export the bundled schemas
    Schema {
        #[arg(short, long, value_name = "DIR")]
        output_directory: PathBuf,

        /// Overwrite existing files
        #[arg(long)]
        replace: bool,
    },
}

#[derive(Args)]
struct TransformArgs {
    #[arg(value_name = "SOURCE")]
    source: PathBuf,

    #[arg(short, long, value_name = "DIR")]
    output_directory: PathBuf,

    #[arg(long, value_enum, default_value_t = Layout::Single)]
    layout: Layout,

    /// XHTML fragment placed at the top of every page
    #[arg(long, value_name = "FILE")]
    branding: Option<PathBuf>,

    /// Do not copy the shared style sheets
    #[arg(long)]
    no_shared_assets: bool,

    #[arg(long, value_name = "FILE")]
    trace_file: Option<PathBuf>,

    #[arg(long, value_name = "FILE")]
    message_file: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Layout {
    Single,
    Multi,
    Index,
}

impl From<Layout> for LayoutMode {
    fn from(layout: Layout) -> Self {
        match layout {
            Layout::Single => LayoutMode::SingleFile,
            Layout::Multi => LayoutMode::MultiFile,
            Layout::Index => LayoutMode::PackageIndexOnly,
        }
    }
}

#[derive(Serialize)]
struct FindingJson<'a> {
    system_id: &'a str,
    line: usize,
    column: usize,
    severity: &'static str,
    kind: &'static str,
    message: &'a str,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(cli.verbose.into())
        .format_timestamp(None)
        .init();

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error ({}): {e}", e.category());
            if let Error::Validation(failure) = &e {
                print_findings(failure.outcome());
            }
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<(), Error> {
    match command {
        Command::Validate { source, json } => {
            let source = absolute(&source)?;
            let directory = source.parent().map(Path::to_path_buf).unwrap_or_default();
            let request = ProcessingRequest::builder(directory, source.clone())
                .task(Task::Validate)
                .build()?;
            let result = Processor::with_config(ProcessorConfig::from_env()).process(&request);
            if json {
                let outcome = match &result {
                    Ok(report) => report.source.clone().unwrap_or_default(),
                    Err(Error::Validation(failure)) => failure.outcome().clone(),
                    Err(_) => ValidationOutcome::default(),
                };
                print_json(&outcome);
            }
            result?;
            println!("{}: valid", source.display());
            Ok(())
        }
        Command::Xhtml(args) => {
            let request = transform_request(&args, Task::TransformToWeb)?.build()?;
            let report = Processor::with_config(ProcessorConfig::from_env()).process(&request)?;
            if let Some(transform) = report.transform {
                for document in &transform.documents {
                    println!("{}", document.display());
                }
            }
            Ok(())
        }
        Command::Epub {
            transform,
            package_name,
            extras,
            epubcheck,
            no_check,
        } => {
            let mut builder = transform_request(&transform, Task::TransformToPackage)?;
            if let Some(name) = package_name {
                builder = builder.package_name(name);
            }
            let request = builder.build()?;

            let mut config = ProcessorConfig::from_env();
            if no_check {
                config = config.with_conformance(ConformanceCheck::Disabled);
            } else if let Some(program) = epubcheck {
                config = config.with_conformance(ConformanceCheck::External {
                    program,
                    args: Vec::new(),
                });
            }
            let report = Processor::with_config(config).process_with_extras(&request, &extras)?;
            if let Some(package) = report.package {
                println!("{}", package.archive.display());
            }
            Ok(())
        }
        Command::CheckOutput { output_directory } => {
            let output_directory = absolute(&output_directory)?;
            let processor = Processor::with_config(ProcessorConfig::from_env());
            let outcome = processor.output_validator().validate(&output_directory)?;
            println!(
                "{}: valid ({} warning(s))",
                output_directory.display(),
                outcome.len()
            );
            Ok(())
        }
        Command::Schema {
            output_directory,
            replace,
        } => {
            let output_directory = absolute(&output_directory)?;
            for path in ResourceCatalog::builtin().export_schemas(&output_directory, replace)? {
                println!("{}", path.display());
            }
            Ok(())
        }
    }
}

fn transform_request(
    args: &TransformArgs,
    task: Task,
) -> Result<structural::request::ProcessingRequestBuilder, Error> {
    let mut builder = ProcessingRequest::builder(absolute(&args.output_directory)?, absolute(&args.source)?)
        .task(task)
        .layout(args.layout.into())
        .write_shared_assets(!args.no_shared_assets);
    if let Some(branding) = &args.branding {
        builder = builder.branding_file(absolute(branding)?);
    }
    if let Some(trace) = &args.trace_file {
        builder = builder.trace_file(absolute(trace)?);
    }
    if let Some(messages) = &args.message_file {
        builder = builder.message_file(absolute(messages)?);
    }
    Ok(builder)
}

fn absolute(path: &Path) -> Result<PathBuf, Error> {
    Ok(std::path::absolute(path)?)
}

fn print_findings(outcome: &ValidationOutcome) {
    for finding in outcome.findings() {
        eprintln!("  {finding}");
    }
}

fn print_json(outcome: &ValidationOutcome) {
    let findings: Vec<FindingJson<'_>> = outcome
        .findings()
        .iter()
        .map(|f| FindingJson {
            system_id: &f.location.system_id,
            line: f.location.line,
            column: f.location.column,
            severity: f.severity.as_str(),
            kind: f.kind.as_str(),
            message: &f.message,
        })
        .collect();
    match serde_json::to_string_pretty(&findings) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("error: cannot serialize findings: {e}"),
    }
}
