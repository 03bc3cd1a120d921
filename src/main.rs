mod commands;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use cerebellum::config::Config;
use cerebellum::Store;

#[derive(Parser, Debug)]
#[command(name = "cerebellum")]
#[command(about = "Cached access to remote collections and models")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/cerebellum/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Write logs to this file instead of stderr
  #[arg(long)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Keep the guard alive so buffered log lines are flushed on exit
  let _guard = init_tracing(args.log_file.as_deref())?;

  let config = Config::load(args.config.as_deref())?;
  let store = Store::new(config.registry()?, config.store_options());

  let output = args.command.run(&store).await?;
  println!("{}", output);

  Ok(())
}

fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cerebellum=info"));

  let Some(path) = log_file else {
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(std::io::stderr)
      .init();
    return Ok(None);
  };

  let dir = path
    .parent()
    .filter(|p| !p.as_os_str().is_empty())
    .unwrap_or_else(|| Path::new("."));
  let name = path
    .file_name()
    .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;

  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();
  Ok(Some(guard))
}
