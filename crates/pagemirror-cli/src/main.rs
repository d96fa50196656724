//! PageMirror CLI: export, audit, and prune static page mirrors.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use serde::Serialize;

use pagemirror::pipeline::{self, absolute_dir};
use pagemirror::{
    AuditContext, AuditOutcome, ChromiumRenderer, CleanupContext, ExportContext, ExportSummary,
    HttpFetcher, MirrorConfig, PruneOutcome, Renderer,
};

#[derive(Parser)]
#[command(
    name = "pagemirror",
    about = "Mirror a rendered web page, audit which assets it uses, and prune the rest",
    version
)]
struct Cli {
    /// Path to a JSON config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Print results as JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a page at every viewport and write a self-contained mirror.
    Export {
        /// Page URL.
        url: String,

        /// Output directory for the mirror.
        #[arg(short, long)]
        out: PathBuf,

        /// Save one full-page screenshot per viewport into this directory.
        #[arg(long)]
        screenshots: Option<PathBuf>,
    },

    /// Classify every file of a mirror as essential or unused.
    Audit {
        /// Mirror directory.
        dir: PathBuf,

        /// Where to write the report (default: <dir>-audit).
        #[arg(long)]
        report_dir: Option<PathBuf>,

        /// Skip the browser pass and use static evidence only.
        #[arg(long)]
        static_only: bool,
    },

    /// Back up and delete the unused files listed in an audit report.
    Cleanup {
        /// Mirror directory.
        dir: PathBuf,

        /// Audit report to act on.
        #[arg(long)]
        report: PathBuf,

        /// Backup directory for removed files.
        #[arg(long)]
        backup: PathBuf,

        /// Report what would be removed without touching disk.
        #[arg(long)]
        dry_run: bool,

        /// Accept a report that has no runtime evidence.
        #[arg(long)]
        force: bool,
    },

    /// Export, audit, and optionally prune in one go.
    Run {
        /// Page URL.
        url: String,

        /// Output directory for the mirror.
        #[arg(short, long)]
        out: PathBuf,

        /// Prune unused files after the audit.
        #[arg(long)]
        prune: bool,

        /// Backup directory for pruned files (default: <out>-backup).
        #[arg(long)]
        backup: Option<PathBuf>,
    },

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   pagemirror completions bash > ~/.local/share/bash-completion/completions/pagemirror
    ///   pagemirror completions zsh > ~/.zfunc/_pagemirror
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let json = cli.json;
    if let Err(e) = run(cli).await {
        if json {
            let body = serde_json::json!({ "error": format!("{e:#}") });
            println!("{}", serde_json::to_string_pretty(&body)?);
            std::process::exit(1);
        }
        return Err(e);
    }
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.clone();
    let load_config =
        || MirrorConfig::load(config_path.as_deref()).context("loading configuration");

    match cli.command {
        Commands::Export {
            url,
            out,
            screenshots,
        } => {
            let mut config = load_config()?;
            if screenshots.is_some() {
                config.screenshot_dir = screenshots;
            }
            let summary = run_export(&url, &out, config).await?;
            emit(cli.json, &summary, print_export)?;
        }

        Commands::Audit {
            dir,
            report_dir,
            static_only,
        } => {
            let outcome = run_audit(&dir, report_dir, static_only, load_config()?).await?;
            emit(cli.json, &outcome.report, |_| print_audit(&outcome))?;
        }

        Commands::Cleanup {
            dir,
            report,
            backup,
            dry_run,
            force,
        } => {
            let ctx = CleanupContext {
                mirror_dir: absolute_dir(&dir)?,
                report_path: report,
                backup_dir: backup,
                dry_run,
                force,
                config: load_config()?,
            };
            let outcome = pipeline::cleanup(&ctx).await?;
            emit(cli.json, &outcome, print_prune)?;
        }

        Commands::Run {
            url,
            out,
            prune,
            backup,
        } => {
            let config = load_config()?;
            let summary = run_export(&url, &out, config.clone()).await?;
            let audit = run_audit(&out, None, false, config.clone()).await?;
            let pruned = if prune {
                let mirror_dir = absolute_dir(&out)?;
                let backup_dir = backup.unwrap_or_else(|| {
                    let name = mirror_dir
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| "mirror".into());
                    mirror_dir.with_file_name(format!("{name}-backup"))
                });
                let ctx = CleanupContext {
                    mirror_dir,
                    report_path: audit.report_path.clone(),
                    backup_dir,
                    dry_run: false,
                    force: false,
                    config,
                };
                Some(pipeline::cleanup(&ctx).await?)
            } else {
                None
            };

            if cli.json {
                let all = serde_json::json!({
                    "export": summary,
                    "audit": audit.report,
                    "cleanup": pruned,
                });
                println!("{}", serde_json::to_string_pretty(&all)?);
            } else {
                print_export(&summary);
                print_audit(&audit);
                if let Some(outcome) = &pruned {
                    print_prune(outcome);
                }
            }
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "pagemirror", &mut std::io::stdout());
        }
    }

    Ok(())
}

async fn run_export(
    url: &str,
    out: &Path,
    config: MirrorConfig,
) -> anyhow::Result<ExportSummary> {
    let url = url::Url::parse(url).with_context(|| format!("invalid URL {url}"))?;
    let fetcher = HttpFetcher::new(config.fetch_timeout(), &config.user_agent);
    let renderer = ChromiumRenderer::launch().await?;
    let ctx = ExportContext {
        url,
        out_dir: absolute_dir(out)?,
        config,
    };
    let result = pipeline::export(&ctx, &renderer, &fetcher).await;
    renderer.shutdown().await?;
    Ok(result?)
}

async fn run_audit(
    dir: &Path,
    report_dir: Option<PathBuf>,
    static_only: bool,
    config: MirrorConfig,
) -> anyhow::Result<AuditOutcome> {
    let ctx = AuditContext {
        mirror_dir: absolute_dir(dir)?,
        report_dir,
        config,
    };
    if static_only {
        return Ok(pipeline::audit(&ctx, None).await?);
    }
    let renderer = ChromiumRenderer::launch().await?;
    let as_dyn: &dyn Renderer = &renderer;
    let result = pipeline::audit(&ctx, Some(as_dyn)).await;
    renderer.shutdown().await?;
    Ok(result?)
}

fn emit<T: Serialize>(json: bool, value: &T, human: impl FnOnce(&T)) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        human(value);
    }
    Ok(())
}

fn print_export(summary: &ExportSummary) {
    println!("Mirror written to {}", summary.out_dir.display());
    println!("  Discovered:     {}", summary.discovered);
    println!("  Downloaded:     {}", summary.downloaded);
    println!("  Inlined:        {}", summary.inlined);
    println!("  Kept remote:    {}", summary.remote.len());
    println!("  Console errors: {}", summary.console_errors);
    for remote in &summary.remote {
        println!("    {} ({}: {})", remote.url, remote.kind, remote.reason);
    }
}

fn print_audit(outcome: &AuditOutcome) {
    let s = &outcome.report.summary;
    println!("Audit report: {}", outcome.report_path.display());
    println!(
        "  Files:   {} total, {} used, {} unused",
        s.total_files, s.used_files, s.unused_files
    );
    println!(
        "  Size:    {:.2} KB total, {:.2} KB unused ({:.2}% waste)",
        s.total_size_kb, s.unused_size_kb, s.waste_percentage
    );
    println!("  Console errors: {}", outcome.report.console_errors.len());
    if !outcome.report.runtime_evidence {
        println!("  (static evidence only)");
    }
    for rec in &outcome.report.recommendations {
        println!("  - [{:?}] {}: {}", rec.priority, rec.category, rec.message);
    }
}

fn print_prune(outcome: &PruneOutcome) {
    let verb = if outcome.dry_run { "Would remove" } else { "Removed" };
    println!(
        "{verb} {} files ({} bytes); backup in {}",
        outcome.removed.len(),
        outcome.bytes_removed,
        outcome.backup_root.display()
    );
    if !outcome.already_absent.is_empty() {
        println!("  Already absent: {}", outcome.already_absent.len());
    }
    for path in &outcome.protected {
        println!("  Kept: {path}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_cleanup_with_global_flags() {
        let cli = Cli::try_parse_from([
            "pagemirror",
            "cleanup",
            "site",
            "--report",
            "site-audit/audit-report.json",
            "--backup",
            "site-backup",
            "--dry-run",
            "--json",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Cleanup {
                dir,
                dry_run,
                force,
                ..
            } => {
                assert_eq!(dir, PathBuf::from("site"));
                assert!(dry_run);
                assert!(!force);
            }
            _ => panic!("expected cleanup"),
        }
    }

    #[test]
    fn test_export_requires_out() {
        assert!(Cli::try_parse_from(["pagemirror", "export", "https://example.com"]).is_err());
    }
}
