//! Kiwi CLI - command-line surface for the registry kernel

use clap::Parser;
use kiwi_artifacts::ArtifactKind;
use kiwi_core::{Kernel, KernelConfig};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kiwi")]
#[command(about = "Kiwi - content-addressed registry kernel")]
struct Cli {
    /// Project root (directory containing .ai/). Defaults to the
    /// current directory when it has an .ai/ folder.
    #[arg(long, global = true)]
    project: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Validate and sign an artifact
    Sign {
        /// Artifact kind: directive, tool, or knowledge
        kind: String,
        /// Artifact id
        id: String,
    },
    /// Resolve a tool's executor chain
    Resolve {
        /// Starting tool id
        tool_id: String,
    },
    /// Resolve, verify, and validate a tool's chain
    Verify {
        /// Starting tool id
        tool_id: String,
    },
    /// Freeze a verified chain into a lockfile
    Freeze {
        /// Starting tool id
        tool_id: String,
    },
    /// Keyword-search local artifacts
    Search {
        /// Query string
        query: String,
        /// Optional kind filter
        #[arg(long)]
        kind: Option<String>,
    },
    /// Prune stale lockfiles
    Prune,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = KernelConfig::default();
    config.paths.project_root = cli.project.or_else(detect_project_root);
    let kernel = Kernel::new(config);

    match cli.command {
        Commands::Sign { kind, id } => {
            let kind: ArtifactKind = kind.parse()?;
            let receipt = kernel.sign(kind, &id)?;
            println!(
                "Signed {} {} ({}) at {}",
                kind,
                receipt.item_id,
                &receipt.integrity[..12],
                receipt.path.display()
            );
        }
        Commands::Resolve { tool_id } => {
            let chain = kernel.resolve_chain(&tool_id)?;
            for (i, link) in chain.iter().enumerate() {
                println!(
                    "{i}: {}@{} [{}] -> {}",
                    link.tool_id,
                    link.version,
                    link.tool_type,
                    link.executor_id.as_deref().unwrap_or("(primitive)")
                );
            }
        }
        Commands::Verify { tool_id } => {
            let report = kernel.verify(&tool_id)?;
            println!(
                "OK: {} links verified ({} cached) in {} ms",
                report.verification.verified_count,
                report.verification.cached_count,
                report.verification.duration_ms
            );
            if let Some(check) = report.lockfile {
                if check.valid {
                    println!("Lockfile: match");
                } else {
                    for issue in check.issues {
                        println!("Lockfile issue: {issue}");
                    }
                }
            }
        }
        Commands::Freeze { tool_id } => {
            let (lockfile, path) = kernel.freeze(&tool_id)?;
            println!(
                "Froze {}@{} ({} links) to {}",
                lockfile.root.tool_id,
                lockfile.root.version,
                lockfile.resolved_chain.len(),
                path.display()
            );
        }
        Commands::Search { query, kind } => {
            let kind = kind.map(|k| k.parse::<ArtifactKind>()).transpose()?;
            kernel.index_local()?;
            for hit in kernel.search_local(&query, kind) {
                println!(
                    "{:>7.2}  {} [{}]  {}",
                    hit.score, hit.item_id, hit.item_type, hit.preview
                );
            }
        }
        Commands::Prune => {
            let pruned = kernel.prune_lockfiles();
            println!("Pruned {pruned} stale lockfiles");
        }
    }

    Ok(())
}

/// The current directory counts as a project when it carries `.ai/`.
fn detect_project_root() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    cwd.join(".ai").is_dir().then_some(cwd)
}
