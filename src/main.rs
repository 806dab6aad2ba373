//! CLI entry point for `mailmirror`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{CommandFactory, Parser, Subcommand};
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};

use mailmirror::config::Config;
use mailmirror::export::folder::{export_all, Progress};
use mailmirror::export::layout::CacheLayout;
use mailmirror::export::output::{build_output, OutputOptions};
use mailmirror::export::summary::{summarize, RunSummary};
use mailmirror::remote::http::HttpRemote;

#[derive(Parser)]
#[command(
    name = "mailmirror",
    version,
    about = "Mirror a remote mailbox into a local, human-inspectable archive"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Working directory holding index/ and caches/ (overrides config)
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Export every indexed folder into the cache
    Download {
        /// Delete the cache and exit
        #[arg(long)]
        reset: bool,
    },
    /// Report exported and failed items from the cache
    Summary {
        #[arg(long)]
        json: bool,
    },
    /// Build a human-readable tree from the cache
    Output {
        #[arg(value_name = "OUTDIR")]
        outdir: PathBuf,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = mailmirror::config::load_config();
    if let Some(root) = cli.root {
        config.general.root_dir = root;
    }

    // Configure logging: stderr + optional log file
    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        Commands::Download { reset } => cmd_download(&config, reset),
        Commands::Summary { json } => cmd_summary(&config, json),
        Commands::Output { outdir } => cmd_output(&config, &outdir),
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    // Try to set up file logging
    let log_dir = mailmirror::config::log_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "mailmirror.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        // Fall back to stderr only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mailmirror", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

/// Export all folders, with one progress bar per folder.
fn cmd_download(config: &Config, reset: bool) -> anyhow::Result<()> {
    let root = &config.general.root_dir;
    if reset {
        CacheLayout::new(root).reset()?;
        println!("  Cleared {}", root.join("caches").display());
        return Ok(());
    }

    let remote = HttpRemote::from_config(config)?;
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} {msg} [{bar:40.cyan/blue}] {pos}/{len}")
        .expect("valid template")
        .progress_chars("#>-");

    let start = Instant::now();
    let mut bar: Option<ProgressBar> = None;
    let report = export_all(root, &remote, config.export_options(), &mut |event| match event {
        Progress::FolderStarted {
            display_path,
            total,
            ..
        } => {
            let pb = ProgressBar::new(total as u64);
            pb.set_style(style.clone());
            pb.set_message(display_path.to_string());
            bar = Some(pb);
        }
        Progress::MessageDone { position, .. } => {
            if let Some(pb) = &bar {
                pb.set_position(position as u64);
            }
        }
        Progress::FolderFinished { report } => {
            if let Some(pb) = bar.take() {
                pb.finish_and_clear();
            }
            let failed = if report.failed.is_empty() {
                String::new()
            } else {
                format!(", {} failed", report.failed.len())
            };
            println!(
                "  {:<40} {:>6} message(s){failed}",
                report.display_path, report.exported
            );
        }
    })?;

    println!();
    println!(
        "  Exported {} message(s) from {} folder(s) in {:.1}s",
        report.exported(),
        report.folders.len(),
        start.elapsed().as_secs_f64()
    );
    if report.failed() > 0 {
        println!(
            "  {} message(s) failed; run `mailmirror summary` for details",
            report.failed()
        );
    }
    Ok(())
}

/// Print what the last runs left in the cache.
fn cmd_summary(config: &Config, json: bool) -> anyhow::Result<()> {
    let layout = CacheLayout::new(&config.general.root_dir);
    let summary = summarize(layout.caches_dir())?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary_table(&summary);
    }
    Ok(())
}

fn print_summary_table(summary: &RunSummary) {
    println!();
    println!("  Messages:         {}", summary.messages);
    println!("  Nested messages:  {}", summary.nested_messages);
    println!(
        "  Stored files:     {} ({})",
        summary.stored_files,
        format_size(summary.stored_bytes, BINARY)
    );
    println!("  Links:            {}", summary.links);
    println!("  Item attachments: {}", summary.items);

    if !summary.failed_messages.is_empty() {
        println!();
        println!("  Failed messages:");
        for failed in &summary.failed_messages {
            println!(
                "    {} [{:?}] {}",
                failed.path.display(),
                failed.marker.stage,
                failed.marker.error
            );
        }
    }
    if !summary.failed_attachments.is_empty() {
        println!();
        println!("  Failed attachments:");
        for failed in &summary.failed_attachments {
            println!(
                "    {} {} {}",
                failed.path.display(),
                failed.original_name.as_deref().unwrap_or(&failed.attachment_id),
                failed.error
            );
        }
    }
    if !summary.unreadable.is_empty() {
        println!();
        println!("  Unreadable artifacts: {}", summary.unreadable.len());
    }
    if !summary.retired_dirs.is_empty() {
        println!();
        println!(
            "  Not counted: {} directory(ies) under superseded shortcodes",
            summary.retired_dirs.len()
        );
    }
    println!();
}

/// Build the output tree.
fn cmd_output(config: &Config, outdir: &Path) -> anyhow::Result<()> {
    let options = OutputOptions {
        subject_chars: config.export.subject_chars,
    };
    let report = build_output(&config.general.root_dir, outdir, &options)?;
    println!(
        "  Wrote {} folder(s), {} conversation(s), {} message(s) to {}",
        report.folders,
        report.conversations,
        report.messages,
        outdir.display()
    );
    if !report.missing.is_empty() {
        println!(
            "  {} indexed message(s) have no cache yet; run `mailmirror download`",
            report.missing.len()
        );
    }
    Ok(())
}
