use aiterm::config::Config;
use aiterm::conversation::{ConversationOrchestrator, SessionOutcome};
use aiterm::error::SessionError;
use aiterm::http_client::ReqwestHttpClient;
use aiterm::ignore_set::{DEFAULT_FALSE_POSITIVE_RATE, IgnoreSet, PERSISTED_FILE_NAME};
use aiterm::presenter::{Presenter, TerminalPresenter};
use aiterm::provider_registry::ProviderRegistry;
use clap::{Arg, ArgAction, Command};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("aiterm")
        .about("Turn a plain-language description into shell command suggestions")
        .long_about(
            "aiterm asks a language model for shell commands that do what you describe, \
             lets you refine the request, and runs the one you pick.",
        )
        .arg(
            Arg::new("description")
                .help("What you want to do, e.g. \"find large log files\"")
                .num_args(1..),
        )
        .arg(
            Arg::new("model")
                .short('m')
                .long("model")
                .help("Model profile to try before the configured defaults")
                .value_name("MODEL")
                .num_args(1),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .help("Show configuration information")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("build-ignore-set")
                .long("build-ignore-set")
                .help("Build the persisted ignore set from a newline-separated list of command names")
                .value_name("FILE")
                .value_parser(clap::value_parser!(PathBuf))
                .num_args(1),
        )
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<ExitCode> {
    let matches = cli().get_matches();

    if matches.get_flag("config") {
        Config::show_config_info()?;
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(source) = matches.get_one::<PathBuf>("build-ignore-set") {
        build_ignore_set(source)?;
        return Ok(ExitCode::SUCCESS);
    }

    let description = matches
        .get_many::<String>("description")
        .unwrap_or_default()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ");

    if description.trim().is_empty() {
        eprintln!("No description provided. Use 'aiterm --help' for usage information.");
        return Ok(ExitCode::FAILURE);
    }

    let requested_model = matches.get_one::<String>("model").map(String::as_str);
    info!("Processing request: {:?} (model: {:?})", description, requested_model);

    let config = Config::load()?;
    let registry = ProviderRegistry::with_defaults(Arc::new(ReqwestHttpClient::new()));
    let presenter = Arc::new(TerminalPresenter::new());
    let orchestrator = ConversationOrchestrator::new(config, registry, presenter.clone());

    match orchestrator.run(requested_model, &description).await {
        Ok(outcome) => {
            debug!("Session ended: {:?}", outcome);
            if let SessionOutcome::Executed { result, .. } = &outcome {
                info!("Command finished (success: {})", result.success);
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(SessionError::Exhausted(failures)) => {
            presenter.error("No working model found. Tried:");
            for failure in &failures {
                eprintln!("  - {}", failure);
            }
            print_setup_guide();
            Ok(ExitCode::FAILURE)
        }
        // Already reported by the orchestrator.
        Err(SessionError::Execution(_)) => Ok(ExitCode::FAILURE),
        Err(e) => {
            presenter.error(&e.to_string());
            Ok(ExitCode::FAILURE)
        }
    }
}

fn build_ignore_set(source: &Path) -> anyhow::Result<()> {
    let set = IgnoreSet::from_source_file(source, DEFAULT_FALSE_POSITIVE_RATE)?;
    let target = Config::config_dir()?.join(PERSISTED_FILE_NAME);
    set.save(&target)?;
    println!(
        "✅ Wrote ignore set ({} bits, {} hashes) to {}",
        set.bit_count(),
        set.hash_count(),
        target.display()
    );
    Ok(())
}

fn print_setup_guide() {
    let config_path = Config::config_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "<config dir>/aiterm/config.toml".to_string());

    eprintln!("\nTo get started, configure at least one model:");
    eprintln!("  1. Set an API key in your environment:");
    eprintln!("       export OPENAI_API_KEY=<your-key>");
    eprintln!("       export ANTHROPIC_API_KEY=<your-key>");
    eprintln!("  2. Or add it to {}:", config_path);
    eprintln!("       [providers.openai]");
    eprintln!("       api_key = \"<your-key>\"");
    eprintln!("  3. Or run a local model with Ollama:");
    eprintln!("       ollama serve && ollama pull llama3.1");
    eprintln!("\nRun 'aiterm --config' to see the current configuration.");
}
