//! Waymark node: a headless replica that syncs a local store with the hub
//! and the relay network.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use waymark_core::{logging, Clock, Config, SystemClock};
use waymark_crypto::{SchnorrIdentity, SigningIdentity};
use waymark_domain::{Coordinates, EnvelopeFactory, LamportClock, Transport};
use waymark_store::{EntityStore, SqliteStore};
use waymark_sync::{
    HubClient, LocalAuthor, MergeEngine, PublicationGate, RelayClient, StoreGeoResolver,
    SyncOrchestrator, SyncTransport,
};
use waymark_trust::QualityEvaluator;

const NODE_PROTOCOL_VERSION: u32 = 1;
const ENVELOPE_FORMAT: &str = "waymark:v1";
const SECRET_KEY_ENV: &str = "WAYMARK_SECRET_KEY";

#[derive(Debug, Serialize)]
struct NodeVersionHandshake {
    version: &'static str,
    protocol_version: u32,
    envelope_format: &'static str,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|arg| arg == "--version-json") {
        let handshake = NodeVersionHandshake {
            version: env!("CARGO_PKG_VERSION"),
            protocol_version: NODE_PROTOCOL_VERSION,
            envelope_format: ENVELOPE_FORMAT,
        };
        println!("{}", serde_json::to_string(&handshake)?);
        return Ok(());
    }

    if args.iter().any(|arg| arg == "--json-logs") {
        logging::init_json();
    } else {
        logging::init();
    }

    let config = match parse_config_path(&args)? {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => {
            warn!("No --config given, running with defaults");
            Config::default_config()
        }
    };

    std::fs::create_dir_all(&config.node.data_dir).with_context(|| {
        format!("creating data dir {}", config.node.data_dir.display())
    })?;
    let store = Arc::new(SqliteStore::open(config.database_path())?);
    let identity = load_identity()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let lamport = Arc::new(LamportClock::new(store.max_lamport()?));
    let merge = Arc::new(MergeEngine::new(store.clone()).with_lamport(lamport.clone()));

    let mut transports: Vec<Arc<dyn SyncTransport>> = Vec::new();
    if config.relay.enabled {
        let mut relay = RelayClient::from_config(&config.relay, identity.clone(), clock.clone())
            .with_resolver(Arc::new(StoreGeoResolver::new(store.clone())));
        if let (Some(lat), Some(lon)) = (config.node.home_lat, config.node.home_lon) {
            relay = relay.with_home(Coordinates::new(lat, lon).context("node home location")?);
        }
        transports.push(Arc::new(relay));
    }
    if config.hub.enabled {
        transports.push(Arc::new(HubClient::from_config(&config.hub)?));
    }
    let kinds: Vec<Transport> = transports.iter().map(|t| t.kind()).collect();
    if kinds.is_empty() {
        warn!("No transport enabled; local writes will queue until one is configured");
    }

    let factory = EnvelopeFactory::new(identity, &config.node.device_id, lamport, clock.clone());
    let author = Arc::new(LocalAuthor::new(
        factory,
        merge.clone(),
        store.clone(),
        kinds.clone(),
    ));
    let gate = Arc::new(PublicationGate::new(
        store.clone(),
        QualityEvaluator::new(config.quality.clone()),
        author.clone(),
    ));

    let mut orchestrator =
        SyncOrchestrator::new(store.clone(), merge, clock, config.sync.clone()).with_publication(gate);
    for transport in transports {
        orchestrator = orchestrator.with_transport(transport);
    }

    info!(
        device_id = %config.node.device_id,
        author = %author.author_pubkey(),
        database = %config.database_path().display(),
        transports = ?kinds,
        "Waymark node started"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sync_loop = tokio::spawn(async move { orchestrator.run(shutdown_rx).await });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    let _ = shutdown_tx.send(true);
    sync_loop.await?;
    Ok(())
}

/// Signing identity from the environment. Without one the node signs with
/// placeholders and cannot publish to relays.
fn load_identity() -> Result<Option<Arc<dyn SigningIdentity>>> {
    match std::env::var(SECRET_KEY_ENV) {
        Ok(secret) => {
            let identity = SchnorrIdentity::from_secret_hex(&secret)
                .with_context(|| format!("{SECRET_KEY_ENV} is not a valid secret key"))?;
            Ok(Some(Arc::new(identity)))
        }
        Err(_) => {
            warn!("{SECRET_KEY_ENV} not set; envelopes will carry placeholder signatures");
            Ok(None)
        }
    }
}

fn parse_config_path(args: &[String]) -> Result<Option<PathBuf>> {
    let mut args_iter = args.iter();
    while let Some(arg) = args_iter.next() {
        if arg == "--config" {
            match args_iter.next() {
                Some(path) => return Ok(Some(PathBuf::from(path))),
                None => bail!("--config was provided without a path"),
            }
        }
    }
    Ok(None)
}
