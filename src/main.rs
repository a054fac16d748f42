
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use clap::Subcommand;
use etx::log_history;
use etx::render::is_smart_terminal;
use etx::render::GitDiffRenderer;
use etx::render::LessPager;
use etx::render::Pager;
use etx::render::StdoutPager;
use etx::show_revision;
use etx::Historian;
use etx::HistorianConfig;
use etx::Result;
use etx::Revision;
use etx::SystemError;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

/// Options that older releases spelled with a single dash.
const SINGLE_DASH_OPTIONS: [&str; 5] = ["file", "addr", "auth", "prefix", "config"];

/// Records the history of an etcd key range and lets you browse it.
#[derive(Parser, Debug)]
#[command(
    name = "etx",
    disable_version_flag = true,
    after_help = "Options take two dashes (--file, --addr). The single-dash spellings \
                  -file, -addr, -auth, -prefix and -config are still accepted."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch etcd and record every mutation under a prefix
    Watch {
        /// History database
        #[arg(long)]
        file: Option<PathBuf>,
        /// etcd address, e.g. http://127.0.0.1:2379
        #[arg(long)]
        addr: Option<String>,
        /// Value of the Authorization header
        #[arg(long)]
        auth: Option<String>,
        /// Key prefix to watch
        #[arg(long)]
        prefix: Option<String>,
        /// Extra TOML configuration file
        #[arg(long)]
        config: Option<String>,
    },
    /// List recorded revisions, newest first
    Log {
        #[arg(long)]
        file: Option<PathBuf>,
        /// Only list revisions touching keys under this prefix
        #[arg(long, default_value = "")]
        prefix: String,
    },
    /// Diff the keys changed at a revision against their previous values
    Show {
        #[arg(long)]
        file: Option<PathBuf>,
        revision: Revision,
    },
    /// Print the version and the commit it was built from
    Version,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Watch { .. } => "watch",
            Command::Log { .. } => "log",
            Command::Show { .. } => "show",
            Command::Version => "version",
        }
    }
}

/// Rewrites `-file x` and `-file=x` style options to their `--` form.
fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    args.into_iter()
        .map(|arg| {
            let Some(text) = arg.to_str() else {
                return arg;
            };
            let Some(option) = text.strip_prefix('-').filter(|o| !o.starts_with('-')) else {
                return arg;
            };
            let name = option.split_once('=').map_or(option, |(name, _)| name);
            if SINGLE_DASH_OPTIONS.contains(&name) {
                OsString::from(format!("-{text}"))
            } else {
                arg
            }
        })
        .collect()
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> ExitCode {
    let cli = Cli::parse_from(normalize_args(std::env::args_os()));
    let name = cli.command.name();

    let _guard = init_observability();

    match dispatch(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{} failed: {}", name, e);
            eprintln!("etx: {name}: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(command: Command) -> Result<()> {
    match command {
        Command::Watch {
            file,
            addr,
            auth,
            prefix,
            config,
        } => {
            let mut settings = HistorianConfig::new()?;
            if let Some(path) = config {
                settings = settings.with_override_config(&path)?;
            }
            if let Some(file) = file {
                settings.storage.path = file;
            }
            if let Some(addr) = addr {
                settings.remote.addr = addr;
            }
            if auth.is_some() {
                settings.remote.auth = auth;
            }
            if let Some(prefix) = prefix {
                settings.remote.prefix = prefix;
            }
            let settings = settings.validate()?;
            info!(?settings, "starting historian");

            let historian = Historian::open(settings)?;
            let cancel = CancellationToken::new();
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    if let Err(e) = graceful_shutdown(cancel).await {
                        error!("Failed to shutdown: {:?}", e);
                    }
                }
            });

            let summary = historian.run(cancel).await?;
            info!(?summary, "historian stopped");
            Ok(())
        }
        Command::Log { file, prefix } => {
            let storage = storage_settings(file)?;
            let pager: Box<dyn Pager> = if is_smart_terminal() {
                Box::new(LessPager::default())
            } else {
                Box::new(StdoutPager)
            };
            log_history(&storage, &prefix, pager.as_ref())?;
            Ok(())
        }
        Command::Show { file, revision } => {
            let storage = storage_settings(file)?;
            show_revision(&storage, revision, &GitDiffRenderer)?;
            Ok(())
        }
        Command::Version => {
            println!(
                "etx {} ({})",
                env!("CARGO_PKG_VERSION"),
                option_env!("VERGEN_GIT_SHA").unwrap_or("unknown")
            );
            Ok(())
        }
    }
}

/// Storage settings for the read-only commands.
fn storage_settings(file: Option<PathBuf>) -> Result<etx::StorageConfig> {
    let mut settings = HistorianConfig::new()?;
    if let Some(file) = file {
        settings.storage.path = file;
    }
    settings.storage.validate()?;
    Ok(settings.storage)
}

async fn graceful_shutdown(cancel: CancellationToken) -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| SystemError::SignalReceiveFailed(format!("SIGINT handler: {e}")))?;
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| SystemError::SignalReceiveFailed(format!("SIGTERM handler: {e}")))?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C detected.");
        },
    }

    cancel.cancel();
    info!("Shutdown requested");
    Ok(())
}

fn init_observability() -> WorkerGuard {
    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stderr());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let base_subscriber = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_filter(filter);
    tracing_subscriber::registry().with(base_subscriber).init();

    guard
}
