use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use tracing_appender::non_blocking::WorkerGuard;

use pdf_coords::logging::{init_logging, init_logging_with_dir};
use pdf_coords::normalize::Scale;
use pdf_coords::output::{render_for_console, write_output};
use pdf_coords::{
    extract_coordinates, scan_fragments, KeywordConfig, LopdfTextSource, OutputFormat,
    TemplateConfig,
};

#[derive(Parser, Debug)]
#[clap(
    name = "pdf-coords",
    author,
    version,
    about = "Locate keyword text on the first page of a PDF in template coordinates",
    arg_required_else_help = true
)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace). RUST_LOG overrides.
    #[clap(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Also write a debug log file into this directory
    #[clap(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// Give up on PDF parsing after this many seconds
    #[clap(long, global = true, value_name = "SECS")]
    pub parse_timeout: Option<u64>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extract coordinates of keyword matches
    Extract {
        /// Path to the PDF file
        #[clap(value_name = "PDF_FILE")]
        pdf_file: PathBuf,

        /// Keyword configuration file
        #[clap(short, long, value_name = "FILE")]
        keywords: PathBuf,

        #[clap(flatten)]
        template: TemplateArgs,

        /// Also write the result to this file
        #[clap(short, long)]
        output: Option<PathBuf>,

        /// Output encoding
        #[clap(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },

    /// List every text fragment with its template coordinates
    Scan {
        /// Path to the PDF file
        #[clap(value_name = "PDF_FILE")]
        pdf_file: PathBuf,

        #[clap(flatten)]
        template: TemplateArgs,

        /// Only show fragments containing this text (case-insensitive)
        #[clap(long)]
        filter: Option<String>,

        /// Output format
        #[clap(long, value_enum, default_value_t = ScanFormat::Text)]
        format: ScanFormat,
    },

    /// Manage keyword configuration files
    Keywords {
        /// Write a sample keyword configuration to FILE
        #[clap(long, value_name = "FILE")]
        create: PathBuf,
    },
}

/// Target coordinate space.
#[derive(Args, Debug, Clone)]
pub struct TemplateArgs {
    /// X offset added to every coordinate
    #[clap(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub template_x: f64,

    /// Y offset added to every coordinate
    #[clap(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub template_y: f64,

    /// Template width the page width is scaled to
    #[clap(long, default_value_t = 210.0)]
    pub template_width: f64,

    /// Template height. Without it Y uses the X scale factor.
    #[clap(long)]
    pub template_height: Option<f64>,
}

impl From<&TemplateArgs> for TemplateConfig {
    fn from(args: &TemplateArgs) -> Self {
        TemplateConfig {
            origin_x: args.template_x,
            origin_y: args.template_y,
            width: args.template_width,
            height: args.template_height,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScanFormat {
    Text,
    Json,
}

fn main() -> ExitCode {
    // Usage errors exit 1 like every other failure, not clap's default 2.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };

    let _guards: Vec<WorkerGuard> = match &cli.log_dir {
        Some(dir) => match init_logging_with_dir(cli.verbose, dir) {
            Ok((stderr, file)) => vec![stderr, file],
            Err(e) => {
                eprintln!("Error: cannot create log directory {}: {e}", dir.display());
                return ExitCode::FAILURE;
            }
        },
        None => vec![init_logging(cli.verbose)],
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            let code = e
                .downcast_ref::<pdf_coords::Error>()
                .map(pdf_coords::Error::exit_code)
                .unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let timeout = cli.parse_timeout.map(Duration::from_secs);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let result = runtime.block_on(async move {
        match cli.command {
            Commands::Extract {
                pdf_file,
                keywords,
                template,
                output,
                format,
            } => {
                extract(
                    &pdf_file,
                    &keywords,
                    &(&template).into(),
                    output.as_deref(),
                    format,
                    timeout,
                )
                .await
            }
            Commands::Scan {
                pdf_file,
                template,
                filter,
                format,
            } => scan(&pdf_file, &(&template).into(), filter.as_deref(), format, timeout).await,
            Commands::Keywords { create } => create_keywords(&create),
        }
    });

    // An abandoned parse may still occupy a blocking thread; don't wait for it.
    runtime.shutdown_background();
    result
}

async fn extract(
    pdf_file: &Path,
    keywords_file: &Path,
    template: &TemplateConfig,
    output: Option<&Path>,
    format: OutputFormat,
    timeout: Option<Duration>,
) -> Result<()> {
    let config = KeywordConfig::load(keywords_file)?;
    let set = extract_coordinates(LopdfTextSource, pdf_file, &config.keywords, template, timeout).await?;

    let rendered = render_for_console(&set, format)?;
    if let Some(path) = output {
        write_output(path, &set, format)?;
        eprintln!("Saved to {}", path.display());
    }

    eprintln!("Found {} field(s) in {}", set.len(), pdf_file.display());
    println!("{rendered}");
    Ok(())
}

async fn scan(
    pdf_file: &Path,
    template: &TemplateConfig,
    filter: Option<&str>,
    format: ScanFormat,
    timeout: Option<Duration>,
) -> Result<()> {
    let (page, fragments) = scan_fragments(LopdfTextSource, pdf_file, template, filter, timeout).await?;

    match format {
        ScanFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&fragments)?);
        }
        ScanFormat::Text => {
            let scale = Scale::new(template, page.width, page.height);
            println!(
                "page {:.2} x {:.2}, scale x={:.4} y={:.4}",
                page.width, page.height, scale.x, scale.y
            );
            println!("text\tx\ty\twidth\theight");
            for f in &fragments {
                println!("{}\t{}\t{}\t{}\t{}", f.text, f.x, f.y, f.width, f.height);
            }
        }
    }

    if fragments.is_empty() {
        eprintln!("No text fragments found");
    } else {
        eprintln!("{} fragment(s)", fragments.len());
    }
    Ok(())
}

fn create_keywords(path: &Path) -> Result<()> {
    KeywordConfig::write_sample(path)?;
    println!("Sample keyword file written to {}", path.display());
    Ok(())
}
