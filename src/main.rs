use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;

use sitepress::build::Site;
use sitepress::config::Config;
use sitepress::source::FsSource;
use sitepress::target::FsTarget;

/// Builds a static site from a directory of Markdown content and templates.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// The project directory; `sitepress.yaml` is searched for here and in
    /// its parents.
    #[arg(default_value = ".")]
    project: PathBuf,

    /// Where to write the site.
    #[arg(short, long, default_value = "public")]
    output: PathBuf,

    /// Worker threads; overrides the project file.
    #[arg(short = 'j', long)]
    threads: Option<usize>,

    /// Log every page.
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();
    let level = match cli.verbose {
        true => LevelFilter::Debug,
        false => LevelFilter::Info,
    };
    if let Err(e) = SimpleLogger::new().with_level(level).init() {
        eprintln!("failed to initialize logging: {}", e);
    }

    if let Err(e) = run(cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = Config::from_directory(&cli.project)?;
    if cli.threads.is_some() {
        config.threads = cli.threads;
    }

    let source = FsSource::new(&config.content_dir);
    let target = FsTarget::new(&cli.output);
    let layouts_dir = config.layouts_dir.clone();

    let mut site = Site::new(config, Box::new(source), Box::new(target))?;
    let templates = site
        .templates_mut()
        .load_dir(&layouts_dir)
        .with_context(|| format!("loading templates from `{}`", layouts_dir.display()))?;
    info!("Loaded {} templates", templates);

    let report = site.build()?;
    info!(
        "Wrote {} pages and {} aliases to `{}`",
        report.pages_rendered,
        report.aliases_written,
        cli.output.display()
    );
    if !report.is_clean() {
        anyhow::bail!("{} pages failed", report.failures.len());
    }
    Ok(())
}
