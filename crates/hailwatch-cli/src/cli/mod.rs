//! CLI entry and dispatch.

use anyhow::{Context, Result};
use clap::Parser;
use hailwatch_core::auth::{FileTokenStore, HttpTransport, SessionManager};
use hailwatch_core::config::{self, Config};
use hailwatch_core::routes::RouteTable;
use tracing_subscriber::EnvFilter;

mod commands;

/// Environment variable holding the log filter (e.g. `debug`).
const LOG_ENV: &str = "HAILWATCH_LOG";

#[derive(Parser)]
#[command(name = "hailwatch")]
#[command(version)]
#[command(about = "Hail-risk dashboard session client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override the dashboard API base URL from config
    #[arg(long, global = true, value_name = "URL")]
    server: Option<String>,
}

#[derive(clap::Subcommand)]
enum Commands {
    #[command(flatten)]
    Session(SessionCommands),

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Commands that need a session manager.
#[derive(clap::Subcommand)]
enum SessionCommands {
    /// Log in to the dashboard
    Login {
        /// Account e-mail
        #[arg(long)]
        email: String,
        /// Password (read from stdin when omitted)
        #[arg(long, env = "HAILWATCH_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        /// Replace an existing session without asking
        #[arg(long)]
        force: bool,
    },

    /// Create a dashboard account
    Register(commands::auth::RegisterArgs),

    /// Log out (clear the stored session)
    Logout,

    /// Show the current session
    Status,

    /// Check whether a view may be rendered for the current session
    Route {
        /// View path, e.g. /admin
        #[arg(value_name = "PATH")]
        path: String,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
    /// Set the dashboard API base URL
    SetServer {
        #[arg(value_name = "URL")]
        url: String,
    },
}

/// Everything a command needs: one session manager per process, already
/// rehydrated from the previous run.
pub struct App {
    pub session: SessionManager<HttpTransport, FileTokenStore>,
    pub routes: RouteTable,
    pub store_path: std::path::PathBuf,
}

impl App {
    fn start(config: &Config) -> Result<Self> {
        let transport = HttpTransport::new(&config.server_url, config.request_timeout())
            .context("configure dashboard API client")?;
        let store = FileTokenStore::new();
        let store_path = store.path().to_path_buf();

        let session = SessionManager::new(transport, store);
        session.rehydrate();

        Ok(Self {
            session,
            routes: RouteTable::dashboard(config.routes.clone()),
            store_path,
        })
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    // A second init (tests running in-process) is harmless.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    init_tracing();

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;

    rt.block_on(async move { dispatch(cli).await })
}

async fn dispatch(cli: Cli) -> Result<()> {
    let Cli { command, server } = cli;

    // Config commands must work even when the config file is broken.
    let command = match command {
        Commands::Config { command } => return run_config(&command),
        Commands::Session(command) => command,
    };

    let mut config = Config::load().context("load config")?;
    if let Some(url) = server {
        config.server_url = url;
    }
    tracing::debug!(
        server = %config.server_url,
        home = %config::paths::hailwatch_home().display(),
        "starting"
    );

    let app = App::start(&config)?;

    match command {
        SessionCommands::Login {
            email,
            password,
            force,
        } => commands::auth::login(&app, &email, password, force).await,
        SessionCommands::Register(args) => commands::auth::register(&app, args).await,
        SessionCommands::Logout => {
            commands::auth::logout(&app);
            Ok(())
        }
        SessionCommands::Status => {
            commands::auth::status(&app);
            Ok(())
        }
        SessionCommands::Route { path } => {
            commands::route::check(&app, &path);
            Ok(())
        }
    }
}

fn run_config(command: &ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Path => {
            commands::config::path();
            Ok(())
        }
        ConfigCommands::Init => commands::config::init(),
        ConfigCommands::SetServer { url } => commands::config::set_server(url),
    }
}
