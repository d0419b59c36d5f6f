//! Gateway entrypoint: load settings, connect storage, hydrate the registry,
//! and serve.

use std::sync::Arc;

use {
    anyhow::Context,
    clap::Parser,
    tracing::{info, warn},
    tracing_subscriber::EnvFilter,
};

use {
    switchyard_balancer::{ClassifierConfig, Registry},
    switchyard_config::{Environment, Settings, validate},
    switchyard_dispatch::{CreditSchedule, RetryDispatcher, StreamMachine},
    switchyard_gateway::{AppState, moderation::ModerationPreCheck},
    switchyard_metrics::{MetricsRecorderConfig, init_metrics},
    switchyard_providers::AdapterFactory,
    switchyard_store::{
        AccountingStore, ProviderStore, SubProviderStore, UserStore,
        memory::{
            MemoryAccountingStore, MemoryProviderStore, MemorySubProviderStore, MemoryUserStore,
        },
    },
    switchyard_vault::KeySealer,
};

#[derive(Parser)]
#[command(name = "switchyard", about = "Multi-tenant LLM API gateway", version)]
struct Cli {
    /// Path to an env file loaded before reading the environment.
    #[arg(long)]
    env_file: Option<std::path::PathBuf>,
}

struct Stores {
    users: Arc<dyn UserStore>,
    accounting: Arc<dyn AccountingStore>,
    providers: Arc<dyn ProviderStore>,
    sub_providers: Arc<dyn SubProviderStore>,
}

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_new(&settings.logging.level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if settings.logging.environment.is_production() {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn connect_stores(settings: &Settings) -> anyhow::Result<Stores> {
    #[cfg(feature = "mongo")]
    {
        use switchyard_store::mongo::MongoStores;

        match MongoStores::connect(
            &settings.database.mongodb_uri,
            &settings.database.database_name,
        )
        .await
        {
            Ok(stores) => {
                let stores = Arc::new(stores);
                return Ok(Stores {
                    users: stores.clone(),
                    accounting: stores.clone(),
                    providers: stores.clone(),
                    sub_providers: stores,
                });
            },
            Err(e) if settings.logging.environment == Environment::Production => {
                return Err(anyhow::anyhow!(e)).context("mongodb connection failed");
            },
            Err(e) => {
                warn!(error = %e, "mongodb unavailable, using in-memory stores");
            },
        }
    }

    Ok(Stores {
        users: Arc::new(MemoryUserStore::new()),
        accounting: Arc::new(MemoryAccountingStore::new()),
        providers: Arc::new(MemoryProviderStore::new()),
        sub_providers: Arc::new(MemorySubProviderStore::new()),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match &cli.env_file {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("loading env file {}", path.display()))?;
        },
        None => {
            let _ = dotenvy::dotenv();
        },
    }

    let settings = Settings::from_env();
    init_tracing(&settings);

    let errors = validate(&settings);
    if !errors.is_empty() {
        for error in &errors {
            tracing::error!(%error, "configuration error");
        }
        anyhow::bail!("refusing to boot with {} configuration error(s)", errors.len());
    }

    let metrics = init_metrics(MetricsRecorderConfig {
        enabled: settings.metrics.enabled,
        prefix: settings.metrics.prefix.clone(),
        global_labels: Vec::new(),
    })?;

    let stores = connect_stores(&settings).await?;

    let sealer = match &settings.security.master_encryption_key {
        Some(seed) => Arc::new(KeySealer::new(seed.clone())),
        None => Arc::new(KeySealer::ephemeral()),
    };

    // Hydrate the live registry from persisted provider configuration.
    let registry = Arc::new(Registry::new(ClassifierConfig::default()));
    let provider_records = stores.providers.list().await?;
    let sub_records = stores.sub_providers.list().await?;
    info!(
        providers = provider_records.len(),
        sub_providers = sub_records.len(),
        "registry hydrated"
    );
    registry.load(provider_records, sub_records);

    let factory = Arc::new(AdapterFactory::new(sealer));
    let _sweeper = factory.spawn_sweeper();

    let dispatcher = RetryDispatcher::new(Arc::clone(&registry), Arc::clone(&factory) as _);
    let stream_machine = StreamMachine::new(
        Arc::clone(&registry),
        Arc::clone(&factory) as _,
        Arc::clone(&stores.accounting),
        Arc::clone(&stores.users),
        CreditSchedule::default(),
    );
    let moderation = ModerationPreCheck::from_settings(&settings);

    let state = Arc::new(AppState {
        settings,
        registry,
        dispatcher,
        stream_machine,
        users: stores.users,
        accounting: stores.accounting,
        moderation,
        schedule: CreditSchedule::default(),
        metrics,
    });

    switchyard_gateway::run(state).await
}
