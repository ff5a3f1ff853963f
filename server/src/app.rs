//! Core application

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api::ApiServer;
use crate::api::auth::ApiKeySet;
use crate::core::banner;
use crate::core::cli::{self, CliConfig, Commands, KeysCommands, SystemCommands};
use crate::core::config::AppConfig;
use crate::core::constants::{APP_NAME_LOWER, ENV_LOG};
use crate::core::shutdown::ShutdownService;
use crate::core::storage::AppStorage;
use crate::data::StorageService;
use crate::domain::pricing::PricingService;
use crate::domain::{EvaluationService, TraceService};
use crate::utils::api_key::generate_api_key;

pub struct CoreApp {
    pub shutdown: ShutdownService,
    pub config: AppConfig,
    pub storage: AppStorage,
    pub data: Arc<StorageService>,
    pub pricing: Arc<PricingService>,
    pub traces: Arc<TraceService>,
    pub evaluations: Arc<EvaluationService>,
    pub api_keys: Arc<ApiKeySet>,
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        let (cli_config, command) = cli::parse();
        Self::init_logging(cli_config.debug);

        tracing::debug!("Application starting");
        tracing::trace!(command = ?command, "Parsed command");

        match command {
            Some(Commands::Keys {
                command: KeysCommands::Generate,
            }) => {
                println!("{}", generate_api_key());
                return Ok(());
            }
            Some(Commands::System {
                command: system_cmd,
            }) => {
                return Self::handle_system_command(system_cmd);
            }
            Some(Commands::Start) | None => {}
        }

        let app = Self::init(&cli_config).await?;
        Self::start_server(app).await
    }

    async fn init(cli: &CliConfig) -> Result<Self> {
        let config = AppConfig::load(cli)?;
        let storage = AppStorage::init(&config).await?;

        let data = Arc::new(
            StorageService::init(config.storage.backend, &storage)
                .await
                .context("Failed to initialize storage")?,
        );
        tracing::debug!(backend = data.backend_name(), "Storage backend ready");

        let pricing = PricingService::init(&config.pricing)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to initialize pricing service: {}", e))?;
        tracing::debug!(models = pricing.model_count(), "Pricing table loaded");

        let repo = data.repository();
        let traces = Arc::new(TraceService::new(
            repo.clone(),
            pricing.clone(),
            config.ingest.clone(),
        ));
        let evaluations = Arc::new(EvaluationService::new(repo));
        let api_keys = Arc::new(ApiKeySet::new(&config.auth.api_keys, config.auth.enabled)?);

        let shutdown = ShutdownService::new(data.clone());

        Ok(Self {
            shutdown,
            config,
            storage,
            data,
            pricing,
            traces,
            evaluations,
            api_keys,
        })
    }

    fn handle_system_command(cmd: SystemCommands) -> Result<()> {
        match cmd {
            SystemCommands::Prune { yes } => Self::prune_data(yes),
        }
    }

    fn prune_data(skip_confirm: bool) -> Result<()> {
        let data_dir = AppStorage::resolve_data_dir();

        if !data_dir.exists() {
            println!(
                "Nothing to prune. Data directory does not exist: {}",
                data_dir.display()
            );
            return Ok(());
        }

        let data_dir = data_dir.canonicalize().unwrap_or(data_dir);

        println!("This will permanently delete every stored trace and evaluation in:");
        println!("  {}", data_dir.display());
        println!();
        println!("Make sure the server is not running.");

        if !skip_confirm {
            print!("\nContinue? [y/N] ");
            std::io::Write::flush(&mut std::io::stdout())?;

            let mut input = String::new();
            std::io::stdin().read_line(&mut input)?;

            if !matches!(input.trim().to_lowercase().as_str(), "y" | "yes") {
                println!("Aborted.");
                return Ok(());
            }
        }

        std::fs::remove_dir_all(&data_dir)
            .with_context(|| format!("Failed to delete data directory: {}", data_dir.display()))?;
        println!("Pruned: {}", data_dir.display());
        Ok(())
    }

    /// `--debug` raises the default filter; ARBOR_LOG / RUST_LOG still win
    fn init_logging(debug: bool) {
        let level = if debug { "debug" } else { "info" };
        let default_filter = format!("info,{APP_NAME_LOWER}={level},arbor_server={level}");

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        tracing_subscriber::fmt()
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .with_ansi(true)
            .compact()
            .with_env_filter(filter)
            .init();
    }

    async fn start_server(app: Self) -> Result<()> {
        // Signal handlers go in before anything that can block
        app.shutdown.install_signal_handlers();

        if let Some(handle) = app.data.start_checkpoint_task(app.shutdown.subscribe()) {
            app.shutdown.register(handle).await;
        }

        banner::print_banner(
            &app.config.server.host,
            app.config.server.port,
            app.api_keys.is_enabled(),
            app.data.backend_name(),
            &app.storage.data_dir().display().to_string(),
        );

        let server = ApiServer::new(app);
        let app = server.start().await?;
        app.shutdown.shutdown().await;

        Ok(())
    }
}
