//! agent-cli entry point

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use agent_cli::auth::{AuthMethod, Credential, EntraAuthority, IdentityAuthority, TokenProvider};
use agent_cli::client::{AgentClient, AgentService};
use agent_cli::config::{self, Config};
use agent_cli::session::{run_session, LoopExit, SessionContext};
use agent_cli::{ui, Error};

const EXIT_OK: i32 = 0;
const EXIT_FAILURE: i32 = 1;
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser)]
#[command(name = "agent-cli")]
#[command(about = "Agent Middleware Console Client")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.agent-cli/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the agent service URL from the config
    #[arg(long, global = true)]
    server_url: Option<String>,

    /// Verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the agent (default)
    Chat {
        /// Send a single message and exit
        #[arg(short, long)]
        message: Option<String>,

        /// Continue an existing conversation thread
        #[arg(short, long)]
        thread: Option<String>,
    },

    /// Sign in and cache the account
    Login,

    /// Remove all cached accounts
    Logout,

    /// Show the cached account
    Whoami,

    /// Show configuration and cached accounts
    Status,

    /// Edit the configuration interactively
    Configure,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("agent_cli=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cancel = CancellationToken::new();
    install_interrupt_handler(cancel.clone());

    let code = match run(cli, &cancel).await {
        Ok(code) => code,
        Err(e) => {
            let code = failure_exit_code(&e);
            if code != EXIT_INTERRUPTED {
                ui::print_error(&format!("{:#}", e));
                if matches!(e.downcast_ref::<Error>(), Some(err) if err.is_auth_failure()) {
                    ui::print_warning("Check clientId and tenantId with 'agent-cli configure'");
                }
            }
            code
        }
    };

    // A pending stdin read would otherwise keep the runtime from shutting down
    std::process::exit(code);
}

/// First Ctrl+C cancels in-flight work and ends the session, the second one
/// exits immediately.
fn install_interrupt_handler(cancel: CancellationToken) {
    let pressed = Arc::new(AtomicBool::new(false));

    ctrlc::set_handler(move || {
        if pressed.swap(true, Ordering::SeqCst) {
            std::process::exit(EXIT_INTERRUPTED);
        }
        println!("\n⚠️  Interrupted (press Ctrl+C again to force exit)");
        cancel.cancel();
    })
    .ok();
}

async fn run(cli: Cli, cancel: &CancellationToken) -> Result<i32> {
    let config_path = cli.config.clone().unwrap_or_else(config::config_path);

    let command = cli.command.unwrap_or(Commands::Chat {
        message: None,
        thread: None,
    });

    if let Commands::Configure = command {
        config::configure(&config_path)?;
        return Ok(EXIT_OK);
    }

    let mut config = config::load_from(&config_path)
        .with_context(|| format!("failed to load config from {:?}", config_path))?;
    if let Some(url) = cli.server_url {
        config.server_url = url;
    }
    config.validate()?;

    let provider = TokenProvider::new(EntraAuthority::from_config(&config)?)
        .with_preferred_account(config.account.clone());

    match command {
        Commands::Chat { message, thread } => {
            return chat(&config, provider, message, thread, cancel).await;
        }

        Commands::Login => {
            sign_in(&provider, &config, cancel).await?;
        }

        Commands::Logout => {
            provider.sign_out().await?;
            ui::print_success("Signed out successfully");
        }

        Commands::Whoami => match provider.current_user().await {
            Some(user) => println!("Logged in as: {}", user),
            None => println!("Not authenticated"),
        },

        Commands::Status => {
            print_status(&config, &provider).await;
        }

        // handled before the config is loaded
        Commands::Configure => {}
    }

    Ok(EXIT_OK)
}

async fn chat<A: IdentityAuthority>(
    config: &Config,
    provider: TokenProvider<A>,
    message: Option<String>,
    thread: Option<String>,
    cancel: &CancellationToken,
) -> Result<i32> {
    ui::print_header(&config.server_url, &config.tenant_id);
    let credential = sign_in(&provider, config, cancel).await?;

    let client = AgentClient::new(&config.server_url, &credential, config.request_timeout())?
        .with_cancellation(cancel.clone());
    let mut ctx = SessionContext::new(client, provider).with_thread(thread);

    if let Some(message) = message {
        return send_once(&mut ctx, &message).await;
    }

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let exit = run_session(&mut ctx, stdin, &mut std::io::stdout(), cancel)
        .await
        .context("failed to read input")?;

    Ok(session_exit_code(exit))
}

/// Exit code for a session that ended without error. Logout counts as a
/// clean exit even when sign-out failed.
fn session_exit_code(exit: LoopExit) -> i32 {
    match exit {
        LoopExit::Interrupted => EXIT_INTERRUPTED,
        LoopExit::Quit | LoopExit::Logout | LoopExit::EndOfInput => EXIT_OK,
    }
}

/// Exit code for a run that failed
fn failure_exit_code(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<Error>() {
        Some(Error::Cancelled) => EXIT_INTERRUPTED,
        _ => EXIT_FAILURE,
    }
}

/// Authenticate, printing the device login instructions when needed.
async fn sign_in<A: IdentityAuthority>(
    provider: &TokenProvider<A>,
    config: &Config,
    cancel: &CancellationToken,
) -> Result<Credential> {
    let open_browser = config.open_browser;

    let (credential, method) = provider
        .authenticate(cancel, |code| {
            println!("Authenticating with Microsoft...\n");
            println!("{}\n", code.instructions());
            if open_browser {
                if let Err(e) = open::that(&code.verification_uri) {
                    tracing::warn!("Failed to open browser: {}", e);
                }
            }
            ui::print_thinking("Waiting for sign-in");
        })
        .await?;

    match method {
        AuthMethod::Silent => {
            ui::print_success(&format!("Authenticated as: {}", credential.display_name()));
        }
        AuthMethod::DeviceCode => {
            ui::print_success("Authentication successful!");
            println!("Logged in as: {}", credential.display_name());
        }
    }
    println!();

    Ok(credential)
}

async fn send_once<S: AgentService, A: IdentityAuthority>(
    ctx: &mut SessionContext<S, A>,
    message: &str,
) -> Result<i32> {
    let spinner = ui::spinner("Waiting for the agent");
    let result = ctx.send(message).await;
    spinner.finish_and_clear();

    let response = result?;
    println!("Agent: {}\n", response.message);
    println!("Thread: {}", response.thread_id);
    Ok(EXIT_OK)
}

async fn print_status<A: IdentityAuthority>(config: &Config, provider: &TokenProvider<A>) {
    ui::print_header("Status", &config.server_url);
    println!("Server URL: {}", config.server_url);
    println!("Tenant: {}", config.tenant_id);
    println!("Client ID: {}", config.client_id);
    println!("Token cache: {:?}", config.token_cache_path());

    match provider.authority().accounts().await {
        Ok(accounts) if accounts.is_empty() => {
            println!("Cached accounts: none (run 'agent-cli login')");
        }
        Ok(accounts) => {
            println!("Cached accounts:");
            for account in accounts {
                println!("  - {}", account.username);
            }
        }
        Err(e) => ui::print_warning(&format!("Token cache unreadable: {}", e)),
    }
}
