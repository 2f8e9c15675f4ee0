//! Subcommand handlers.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use bridge_desktop::ReqwestHttpClient;
use bridge_traits::http::HttpClient;
use bridge_traits::time::{Clock, SystemClock};
use core_async::sync::CancellationToken;
use core_auth::{
    ClientCredentialsProvider, DirectoryEndpointResolver, EndpointResolver, StaticEndpoint,
    StaticTokenProvider, TokenProvider,
};
use core_runtime::config::{Credentials, EndpointSource, MirrorConfig};
use core_runtime::events::{EventBus, RecvError};
use core_schema::{CollectionRegistry, QueryBuilder, SchemaIntrospector};
use core_store::{
    column_type, create_pool, DatabaseConfig, SqlitePool, SqliteSyncStateRepository,
    SyncStateRepository,
};
use core_sync::{CollectionOutcome, SyncConfig, SyncContext, SyncOrchestrator};
use tracing::{info, warn};

use crate::cli::{DatabaseArgs, DiscoverArgs, RunArgs};

pub async fn run(args: RunArgs) -> Result<()> {
    let config = args.to_config().context("invalid configuration")?;
    info!(?config, "Starting mirror");

    let http: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new()?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let tokens = token_provider(&config, http.clone(), clock.clone());
    let endpoints = endpoint_resolver(&config, http.clone(), tokens.clone());
    let pool = open_database(&config.database_path).await?;

    let events = EventBus::default();
    if args.events {
        spawn_event_printer(&events);
    }

    let context = SyncContext::new(http, tokens, endpoints, pool)
        .with_clock(clock)
        .with_events(events);
    let orchestrator = SyncOrchestrator::new(SyncConfig::from(&config), context);
    info!(worker_id = %orchestrator.worker_id(), "Worker ready");

    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());

    let report = orchestrator.run(cancel).await?;

    for collection in &report.collections {
        match &collection.outcome {
            CollectionOutcome::Completed { pages } => {
                info!(collection = %collection.collection, pages, "Mirrored")
            }
            CollectionOutcome::Skipped => {
                info!(collection = %collection.collection, "Skipped, leased elsewhere")
            }
            CollectionOutcome::Cancelled { pages } => {
                info!(collection = %collection.collection, pages, "Interrupted")
            }
            CollectionOutcome::Failed { message } => {
                warn!(collection = %collection.collection, error = %message, "Failed")
            }
        }
    }

    if !report.is_success() {
        bail!("{} collection(s) failed", report.failed());
    }
    Ok(())
}

pub async fn discover(args: DiscoverArgs) -> Result<()> {
    let http: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new()?);
    let schema = SchemaIntrospector::new(http)
        .introspect(&args.schema_url)
        .await?;
    let descriptors = CollectionRegistry::new(args.collection_suffix).discover(&schema);

    if descriptors.is_empty() {
        println!("No collections found");
        return Ok(());
    }

    for descriptor in &descriptors {
        println!(
            "{} -> {} ({})",
            descriptor.collection_name,
            descriptor.element_type_name,
            QueryBuilder::field_name(&descriptor.element_type_name)
        );
        for field in descriptor.column_fields() {
            println!("  {:<24} {:<16} {}", field.name, field.declared_type, column_type(field));
        }
        if args.show_queries {
            println!();
            print!("{}", QueryBuilder::build(descriptor));
        }
        println!();
    }
    Ok(())
}

pub async fn status(args: DatabaseArgs) -> Result<()> {
    let pool = open_database(&args.database_path).await?;
    let records = SqliteSyncStateRepository::new(pool).list().await?;

    if records.is_empty() {
        println!("No collections mirrored yet");
        return Ok(());
    }

    let now = SystemClock.unix_timestamp();
    println!("{:<32} {:<24} {}", "COLLECTION", "CURSOR", "LEASE");
    for record in records {
        let lease = match (&record.lock_owner, record.is_locked_at(now)) {
            (Some(owner), true) => format!("held by {}", owner),
            (Some(owner), false) => format!("stale ({})", owner),
            (None, _) => "free".to_string(),
        };
        println!(
            "{:<32} {:<24} {}",
            record.collection_name,
            record.cursor.as_deref().unwrap_or("-"),
            lease
        );
    }
    Ok(())
}

pub async fn reset(collection: &str, args: DatabaseArgs) -> Result<()> {
    let pool = open_database(&args.database_path).await?;
    if SqliteSyncStateRepository::new(pool)
        .reset_cursor(collection)
        .await?
    {
        println!("Cursor cleared for {}", collection);
    } else {
        println!("No stored state for {}", collection);
    }
    Ok(())
}

async fn open_database(path: &std::path::Path) -> Result<SqlitePool> {
    create_pool(DatabaseConfig::new(path))
        .await
        .with_context(|| format!("failed to open database {}", path.display()))
}

fn token_provider(
    config: &MirrorConfig,
    http: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
) -> Arc<dyn TokenProvider> {
    match &config.credentials {
        Credentials::Static(token) => Arc::new(StaticTokenProvider::new(token.clone())),
        Credentials::ClientCredentials {
            token_url,
            client_id,
            client_secret,
        } => Arc::new(ClientCredentialsProvider::new(
            http,
            clock,
            token_url.clone(),
            client_id.clone(),
            client_secret.clone(),
        )),
    }
}

fn endpoint_resolver(
    config: &MirrorConfig,
    http: Arc<dyn HttpClient>,
    tokens: Arc<dyn TokenProvider>,
) -> Arc<dyn EndpointResolver> {
    match &config.endpoint {
        EndpointSource::Static(url) => Arc::new(StaticEndpoint::new(url.clone())),
        EndpointSource::Directory { url, account } => Arc::new(DirectoryEndpointResolver::new(
            http,
            tokens,
            url.clone(),
            account.clone(),
        )),
    }
}

fn spawn_shutdown_listener(cancel: CancellationToken) {
    core_async::spawn(async move {
        match core_async::signal::shutdown_signal().await {
            Ok(()) => {
                info!("Shutdown requested, finishing current page");
                cancel.cancel();
            }
            Err(e) => warn!(error = %e, "Could not install signal handler"),
        }
    });
}

fn spawn_event_printer(events: &EventBus) {
    let mut receiver = events.subscribe();
    core_async::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if event.is_error() {
                        warn!(%event, "Failure reported");
                    }
                    match serde_json::to_string(&event) {
                        Ok(line) => println!("{}", line),
                        Err(e) => warn!(error = %e, "Could not serialize event"),
                    }
                }
                Err(RecvError::Lagged(missed)) => warn!(missed, "Event printer fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}
