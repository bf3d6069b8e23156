//! codehist CLI - structural analysis of every file across a codebase's
//! tagged history, with content-level caching and a parallel worker pool.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod logging;

use codehist_core::Config;
use commands::{cmd_analyse, cmd_tags};
use logging::init_cli_logging;

#[derive(Parser)]
#[command(name = "codehist")]
#[command(about = "Analyse declared symbols and aliases across a repository's tagged history")]
#[command(after_help = "\
QUICK START:
  codehist tags ./repo --from-tag v4.0.0     # List revisions that would run
  codehist analyse ./repo --from-tag v4.0.0  # Analyse them, one report each

Results are cached by content id, so re-runs and overlapping tags only pay
for content that actually changed.")]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Analyse revisions of a repository, writing one report per revision
  Analyse {
    /// Path to a git clone (standard or bare)
    repo: PathBuf,
    /// Earliest tag to include
    #[arg(long)]
    from_tag: Option<String>,
    /// Analyse exactly these revisions instead of enumerating tags
    #[arg(long = "revision", value_name = "REV")]
    revisions: Vec<String>,
    /// Include pre-release tags
    #[arg(long)]
    all_tags: bool,
    /// Worker pool size (default: available CPUs)
    #[arg(short, long)]
    jobs: Option<usize>,
    /// Blob cache directory (default: user cache dir)
    #[arg(long)]
    cache_dir: Option<PathBuf>,
    /// Report output directory (default: ./analysis)
    #[arg(long)]
    out_dir: Option<PathBuf>,
  },
  /// List the tags a run would analyse
  Tags {
    /// Path to a git clone (standard or bare)
    repo: PathBuf,
    /// Earliest tag to include
    #[arg(long)]
    from_tag: Option<String>,
    /// Include pre-release tags
    #[arg(long)]
    all_tags: bool,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  match cli.command {
    Commands::Analyse {
      repo,
      from_tag,
      revisions,
      all_tags,
      jobs,
      cache_dir,
      out_dir,
    } => {
      let mut config = Config::load_for_project(&repo);
      if let Some(jobs) = jobs {
        config.pool.size = jobs;
      }
      if let Some(dir) = cache_dir {
        config.cache.dir = Some(dir);
      }
      if let Some(dir) = out_dir {
        config.output.dir = dir;
      }
      init_cli_logging(&config.log.level);
      cmd_analyse(repo, config, from_tag, revisions, all_tags).await
    }
    Commands::Tags {
      repo,
      from_tag,
      all_tags,
    } => {
      let config = Config::load_for_project(&repo);
      init_cli_logging(&config.log.level);
      cmd_tags(repo, from_tag, all_tags).await
    }
  }
}
