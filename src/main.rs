//! Menu pipeline - Main Entry Point
//!
//! Wires the stores, the queue transport and the Google Sheets client into
//! the orchestrators, then runs the HTTP API, the queue worker or both.

use clap::{Parser, Subcommand};
use menu_pipeline::api::{self, ApiState};
use menu_pipeline::config::{PipelineConfig, QueueBackend, StoreBackend};
use menu_pipeline::observability::{init_default_logging, init_logging, LogFormat};
use menu_pipeline::orchestrator::{MenuOrchestrator, ProductOrchestrator};
use menu_pipeline::sheets::{GoogleSheetsClient, SheetSource};
use menu_pipeline::store::{AuditStore, InMemoryStore, MenuStore, SqliteStore, TaskStore};
use menu_pipeline::transport::{InMemoryQueue, MqttQueue, QueueTransport};
use menu_pipeline::worker::{PipelineWorker, WorkerOptions};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};

/// Menu ingestion and product availability pipeline
#[derive(Parser)]
#[command(name = "menu-pipeline")]
#[command(about = "Spreadsheet menu ingestion and product status pipeline")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "MENU_PIPELINE_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API and the queue worker in one process
    Run,
    /// Run only the queue worker
    Worker,
    /// Run only the HTTP API
    Api,
    /// Submit a menu parsing task and print its id
    Submit {
        #[arg(long)]
        spreadsheet_id: String,
        #[arg(long)]
        restaurant_name: String,
    },
    /// Validate configuration
    Config {
        /// Show the effective configuration
        #[arg(long)]
        show: bool,
    },
}

type BoxError = Box<dyn std::error::Error>;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_cli_logging(cli.verbose);

    info!("Starting menu-pipeline v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_pipeline(config, true, true).await,
        Commands::Worker => run_pipeline(config, false, true).await,
        Commands::Api => run_pipeline(config, true, false).await,
        Commands::Submit {
            spreadsheet_id,
            restaurant_name,
        } => submit_task(config, &spreadsheet_id, &restaurant_name).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

/// `-v` flags win over `LOG_LEVEL`; the format still comes from `LOG_FORMAT`
fn init_cli_logging(verbose: u8) {
    let level = match verbose {
        0 => {
            init_default_logging();
            return;
        }
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let format = LogFormat::parse(&std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string()));
    init_logging(level, format, false);
}

fn load_configuration(config_path: &Option<PathBuf>) -> Result<PipelineConfig, BoxError> {
    let path = match config_path {
        Some(path) => Some(path.clone()),
        None => PipelineConfig::find_default_path(),
    };

    match path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(PipelineConfig::load_from_file(&path)?)
        }
        None => {
            warn!("No configuration file found; using built-in defaults");
            let config = PipelineConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

/// The three store traits over one backend
struct Stores {
    tasks: Arc<dyn TaskStore>,
    menus: Arc<dyn MenuStore>,
    audits: Arc<dyn AuditStore>,
}

/// Store factory for the configured backend
struct StoreFactory;

impl StoreFactory {
    fn create(config: &PipelineConfig) -> Result<Stores, BoxError> {
        match config.store.backend {
            StoreBackend::Sqlite => {
                info!("Opening SQLite store at {}", config.store.path.display());
                let store = Arc::new(SqliteStore::open(&config.store.path)?);
                Ok(Stores {
                    tasks: store.clone(),
                    menus: store.clone(),
                    audits: store,
                })
            }
            StoreBackend::Memory => {
                warn!("Using in-memory store; nothing survives a restart");
                let store = Arc::new(InMemoryStore::new());
                Ok(Stores {
                    tasks: store.clone(),
                    menus: store.clone(),
                    audits: store,
                })
            }
        }
    }
}

/// Queue handle that remembers its concrete backend for shutdown
enum Queue {
    Mqtt(Arc<MqttQueue>),
    Memory(Arc<InMemoryQueue>),
}

impl Queue {
    fn transport(&self) -> Arc<dyn QueueTransport> {
        match self {
            Queue::Mqtt(queue) => queue.clone(),
            Queue::Memory(queue) => queue.clone(),
        }
    }

    async fn close(&self) {
        match self {
            Queue::Mqtt(queue) => {
                if let Err(e) = queue.disconnect().await {
                    warn!("Error while disconnecting from broker: {}", e);
                }
            }
            Queue::Memory(queue) => queue.close().await,
        }
    }
}

/// Transport factory for the configured backend
struct TransportFactory;

impl TransportFactory {
    /// Only a worker opens consumer connections; `api` and `submit` publish
    /// under throwaway client ids and never touch the worker's sessions
    async fn create(
        config: &PipelineConfig,
        consumes: bool,
        in_process: bool,
    ) -> Result<Queue, BoxError> {
        match config.queue.backend {
            QueueBackend::Mqtt => {
                let queue = if consumes {
                    MqttQueue::consumer(&config.queue)?
                } else {
                    MqttQueue::publisher(&config.queue)?
                };
                queue.connect().await?;
                info!("Connected to broker at {}", config.queue.broker_url);
                Ok(Queue::Mqtt(Arc::new(queue)))
            }
            QueueBackend::Memory => {
                if !in_process {
                    warn!("In-memory queue only reaches consumers inside this process");
                }
                Ok(Queue::Memory(Arc::new(InMemoryQueue::new())))
            }
        }
    }
}

/// Bootstrap: everything the API and the worker share
struct Components {
    queue: Queue,
    menus: Arc<MenuOrchestrator>,
    products: Arc<ProductOrchestrator>,
}

async fn build_components(
    config: &PipelineConfig,
    consumes: bool,
    in_process: bool,
) -> Result<Components, BoxError> {
    let stores = StoreFactory::create(config)?;
    let queue = TransportFactory::create(config, consumes, in_process).await?;
    let transport = queue.transport();
    let source: Arc<dyn SheetSource> =
        Arc::new(GoogleSheetsClient::new(config.sheets.client_config())?);

    let menus = Arc::new(MenuOrchestrator::new(
        stores.tasks,
        stores.menus.clone(),
        source,
        transport.clone(),
    ));
    let products = Arc::new(ProductOrchestrator::new(
        stores.menus,
        stores.audits,
        transport,
    ));

    Ok(Components {
        queue,
        menus,
        products,
    })
}

async fn run_pipeline(config: PipelineConfig, with_api: bool, with_worker: bool) -> Result<(), BoxError> {
    let components = build_components(&config, with_worker, with_api && with_worker).await?;
    let transport = components.queue.transport();
    let cancel = CancellationToken::new();

    let worker = if with_worker {
        let worker = Arc::new(PipelineWorker::new(
            components.menus.clone(),
            components.products.clone(),
            transport.clone(),
            WorkerOptions::from(&config.worker),
        ));
        Some(worker.start(cancel.clone()).await?)
    } else {
        None
    };

    let api_server = if with_api {
        let addr = config.api.socket_addr()?;
        let state = Arc::new(ApiState {
            menus: components.menus.clone(),
            products: components.products.clone(),
            transport,
        });
        let api_cancel = cancel.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = api::serve(state, addr, api_cancel.clone()).await {
                error!("API server error: {}", e);
                api_cancel.cancel();
            }
        }))
    } else {
        None
    };

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!("Pipeline is running");

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
        _ = cancel.cancelled() => {
            error!("A component stopped unexpectedly, shutting down...");
        }
    }

    info!("Application shutdown initiated");
    cancel.cancel();

    if let Some(worker) = worker {
        worker.shutdown(config.worker.shutdown_grace()).await;
    }
    if let Some(server) = api_server {
        if let Err(e) = server.await {
            warn!("API server task ended abnormally: {}", e);
        }
    }
    components.queue.close().await;

    Ok(())
}

async fn submit_task(
    config: PipelineConfig,
    spreadsheet_id: &str,
    restaurant_name: &str,
) -> Result<(), BoxError> {
    if config.queue.backend == QueueBackend::Memory {
        return Err("submit needs a broker; the in-memory queue has no consumers here".into());
    }

    let components = build_components(&config, false, false).await?;
    let result = components
        .menus
        .create_parsing_task(spreadsheet_id, restaurant_name)
        .await;
    components.queue.close().await;

    let task = result?;
    println!("{}", task.task_id);
    info!(task_id = %task.task_id, "Menu parsing task submitted");
    Ok(())
}

fn handle_config_command(config: &PipelineConfig, show: bool) -> Result<(), BoxError> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
