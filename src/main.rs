use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use micasa::commands::{self, Context};
use micasa::config::Settings;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "micasa")]
#[command(author, version, about = "Install your command-line tools anywhere", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Seconds an external command may run before it is killed
    #[arg(long, global = true, value_name = "SECS")]
    timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Install a formula, or everything in the manifest
    Install {
        /// Formula name (omit to use the manifest)
        formula: Option<String>,
    },

    /// Uninstall a formula
    Uninstall {
        /// Formula name
        formula: String,
    },

    /// Show available and installed versions
    Info {
        /// Formula name (omit to use the manifest)
        formula: Option<String>,
    },

    /// List known formulae
    List,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    micasa::output::init_colors();

    let mut settings = Settings::from_env();
    if let Some(secs) = cli.timeout {
        anyhow::ensure!(secs > 0, "--timeout must be at least one second");
        settings.command_timeout = Duration::from_secs(secs);
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, stopping...");
            on_interrupt.cancel();
        }
    });

    let ctx = Context::new(settings, cancel)?;

    match cli.command {
        Commands::Install { formula } => {
            commands::install(&ctx, formula.as_deref()).await?;
        }
        Commands::Uninstall { formula } => {
            commands::uninstall(&ctx, &formula).await?;
        }
        Commands::Info { formula } => {
            commands::info(&ctx, formula.as_deref()).await?;
        }
        Commands::List => {
            commands::list(&ctx)?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "micasa", &mut std::io::stdout());
        }
    }

    Ok(())
}
