//! weave CLI
//!
//! Thin wrapper around weave-core functions for command-line usage.
//!
//! ## Usage
//!
//! ```bash
//! # Derive the account key bundle and client state from kB
//! weave keys derive <kB base64>
//!
//! # Raw HKDF-SHA256
//! weave keys hkdf <secret hex> --info <info> --length 64
//!
//! # Inspect the server (needs account.json in the data directory)
//! weave collections info
//! weave collections quota
//! weave records dump history --limit 10
//!
//! # Local places snapshot
//! weave places visit https://example.com "Example"
//! weave places list
//!
//! # Sync
//! weave sync --first
//! weave push-history 3
//! weave forget-history 3
//!
//! # Checkpoint maintenance
//! weave checkpoint show
//! weave checkpoint reset
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use weave_core::crypto::OLDSYNC_INFO;
use weave_core::places::RowId;
use weave_core::sync::fetch_bulk_keys;
use weave_core::{
    client_state, hkdf, now_seconds, AccountBundle, Collection, Envelope, IdentityProvider,
    KeyBundle, MemoryPlaces, RecordQuery, ReconciliationEngine, RemoteStore, SessionManager,
    Storage, StorageClient, SyncConfig, SyncEvent, SyncRequest, SyncStatus, SyncWorker,
    TokenClient,
};

/// Account bundle file inside the data directory
const ACCOUNT_FILE: &str = "account.json";

/// Places snapshot file inside the data directory
const PLACES_FILE: &str = "places.json";

/// weave - Mozilla Sync client for history and bookmarks
#[derive(Parser)]
#[command(name = "weave")]
#[command(version)]
#[command(about = "weave - Mozilla Sync client for history and bookmarks")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// JSON config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory (default: ~/.weave/data)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Token server URL
    #[arg(long, global = true, env = "WEAVE_TOKEN_SERVER")]
    token_server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Key derivation tools
    Keys {
        #[command(subcommand)]
        action: KeysAction,
    },

    /// Server-side collection info
    Collections {
        #[command(subcommand)]
        action: CollectionsAction,
    },

    /// Server-side records
    Records {
        #[command(subcommand)]
        action: RecordsAction,
    },

    /// Local places snapshot
    Places {
        #[command(subcommand)]
        action: PlacesAction,
    },

    /// Sync checkpoint maintenance
    Checkpoint {
        #[command(subcommand)]
        action: CheckpointAction,
    },

    /// Run a full sync of history and bookmarks
    Sync {
        /// First sync on this device: never delete local bookmarks
        #[arg(long)]
        first: bool,
    },

    /// Upload one history row right away
    PushHistory {
        /// Local row id
        id: RowId,
    },

    /// Forget a history row locally and delete it on the server
    ForgetHistory {
        /// Local row id
        id: RowId,
    },
}

#[derive(Subcommand)]
enum KeysAction {
    /// Derive the account key bundle and client state from kB
    Derive {
        /// kB, base64 (default: from account.json)
        key_b: Option<String>,
    },
    /// Raw HKDF-SHA256
    Hkdf {
        /// Input keying material, hex
        secret: String,
        /// Salt, hex
        #[arg(long)]
        salt: Option<String>,
        /// Context info string
        #[arg(long, default_value = OLDSYNC_INFO)]
        info: String,
        /// Output length in bytes
        #[arg(long, default_value_t = 64)]
        length: usize,
    },
}

#[derive(Subcommand)]
enum CollectionsAction {
    /// Last modification time of every collection
    Info,
    /// Storage usage and quota
    Quota,
    /// Record count of every collection
    Counts,
}

#[derive(Subcommand)]
enum RecordsAction {
    /// Decrypt and print the records of a collection
    Dump {
        /// Collection name
        collection: String,
        /// Maximum number of records
        #[arg(short, long)]
        limit: Option<u32>,
        /// Only records modified after this time (seconds)
        #[arg(long)]
        newer: Option<f64>,
        /// Print encrypted envelopes instead of decrypting
        #[arg(long)]
        raw: bool,
    },
}

#[derive(Subcommand)]
enum PlacesAction {
    /// List history and bookmark rows
    List,
    /// Record a visit
    Visit {
        /// Visited URI
        uri: String,
        /// Page title
        title: String,
    },
    /// Create a bookmark
    Bookmark {
        /// Bookmarked URI
        uri: String,
        /// Title
        title: String,
        /// Guid of the containing folder
        #[arg(long)]
        parent: Option<String>,
        /// Tags
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Create a folder
    Folder {
        /// Title
        title: String,
        /// Guid of the containing folder
        #[arg(long)]
        parent: Option<String>,
    },
    /// Delete a bookmark locally; the next sync deletes it remotely
    Delete {
        /// Local bookmark row id
        id: RowId,
    },
}

#[derive(Subcommand)]
enum CheckpointAction {
    /// Show the checkpoint and queued remote deletes
    Show,
    /// Forget the checkpoint so the next sync pulls everything
    Reset,
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Config file, then flags on top
fn load_config(cli: &Cli) -> Result<SyncConfig> {
    let mut config = match &cli.config {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(server) = &cli.token_server {
        config.token_server = server.clone();
    }
    config.validate()?;
    Ok(config)
}

fn load_account(config: &SyncConfig) -> Result<AccountBundle> {
    let path = config.data_dir.join(ACCOUNT_FILE);
    AccountBundle::load(&path).with_context(|| format!("Cannot read {}", path.display()))
}

fn places_path(config: &SyncConfig) -> PathBuf {
    config.data_dir.join(PLACES_FILE)
}

fn decode_hex(s: &str, what: &str) -> Result<Vec<u8>> {
    hex::decode(s).map_err(|e| anyhow::anyhow!("Invalid {} hex: {}", what, e))
}

/// Storage client plus bulk keys, straight from the token server
async fn connect(config: &SyncConfig) -> Result<(StorageClient, KeyBundle)> {
    let account = load_account(config)?;
    let http = weave_core::client::http_client(config.request_timeout())?;
    let tokens = TokenClient::with_client(config.token_server.clone(), http.clone());

    let key_b = account.key_b()?;
    let audience = tokens.endpoint()?.origin().ascii_serialization();
    let assertion = account.assertion(&audience).await?;
    let credentials = tokens
        .get_credentials(&assertion, &client_state(&key_b), config.token_duration)
        .await?;
    let storage = StorageClient::new(&credentials, http)?;

    let keys = fetch_bulk_keys(&storage, &KeyBundle::from_master_key(&key_b, OLDSYNC_INFO)?).await?;
    Ok((storage, keys))
}

/// Worker over the places snapshot in the data directory
fn worker(config: &SyncConfig) -> Result<(SyncWorker, Arc<MemoryPlaces>)> {
    let account = Arc::new(load_account(config)?);
    let places = Arc::new(MemoryPlaces::load(places_path(config))?);
    let storage = Storage::open_in(&config.data_dir)?;
    let engine = ReconciliationEngine::new(places.clone(), places.clone(), storage);
    let sessions = Arc::new(SessionManager::new(account, config)?);
    Ok((SyncWorker::new(engine, sessions), places))
}

fn print_event(event: &SyncEvent) {
    match event {
        SyncEvent::Started { first_sync } => {
            println!("Sync started{}", if *first_sync { " (first sync)" } else { "" });
        }
        SyncEvent::CollectionSynced {
            collection,
            stats,
            error,
        } => match error {
            None => println!(
                "  {}: {} applied, {} skipped, {} malformed, {} pushed, {} deleted remotely, {} deleted locally",
                collection,
                stats.applied,
                stats.skipped,
                stats.malformed,
                stats.pushed,
                stats.deleted_remote,
                stats.deleted_local
            ),
            Some(error) => println!("  {}: FAILED ({})", collection, error),
        },
        SyncEvent::Finished { success } => {
            println!("Sync finished{}", if *success { "" } else { " with errors" });
        }
        SyncEvent::Failed { message } => println!("Sync failed: {}", message),
        SyncEvent::StatusChanged { .. } => {}
    }
}

/// Wait for a worker task, printing its events, and fail on an error status.
async fn run_task(
    worker: &SyncWorker,
    mut events: broadcast::Receiver<SyncEvent>,
    request: SyncRequest,
) -> Result<()> {
    match request {
        SyncRequest::Started(_) => {}
        SyncRequest::AlreadySyncing => anyhow::bail!("A sync is already running"),
        SyncRequest::Offline => anyhow::bail!("Offline"),
        SyncRequest::Stopped => anyhow::bail!("Sync worker is stopped"),
    }
    request.wait().await;

    while let Ok(event) = events.try_recv() {
        print_event(&event);
    }
    if let SyncStatus::Error(message) = worker.status() {
        anyhow::bail!("Sync failed: {}", message);
    }
    Ok(())
}

fn save_places(places: &MemoryPlaces, path: &Path) -> Result<()> {
    places
        .save(path)
        .with_context(|| format!("Cannot write {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Keys { action } => match action {
            KeysAction::Derive { key_b } => {
                let key_b = match key_b {
                    Some(encoded) => BASE64
                        .decode(encoded.trim())
                        .map_err(|e| anyhow::anyhow!("Invalid kB base64: {}", e))?,
                    None => load_account(&config)?.key_b()?,
                };
                let bundle = KeyBundle::from_master_key(&key_b, OLDSYNC_INFO)?;
                let [encryption_key, hmac_key] = bundle.to_base64_pair();

                println!("Account key bundle:");
                println!("  Encryption key: {}", encryption_key);
                println!("  HMAC key: {}", hmac_key);
                println!("Client state: {}", client_state(&key_b));
            }

            KeysAction::Hkdf {
                secret,
                salt,
                info,
                length,
            } => {
                let secret = decode_hex(&secret, "secret")?;
                let salt = salt.map(|s| decode_hex(&s, "salt")).transpose()?;
                let okm = hkdf(&secret, salt.as_deref(), info.as_bytes(), length)?;
                println!("{}", hex::encode(okm));
            }
        },

        Commands::Collections { action } => {
            let (storage, _) = connect(&config).await?;
            match action {
                CollectionsAction::Info => {
                    let collections = storage.info_collections().await?;
                    if collections.is_empty() {
                        println!("No collections.");
                    }
                    for (name, modified) in collections {
                        println!("{:<12} {:.2}", name, modified);
                    }
                }
                CollectionsAction::Quota => {
                    let quota = storage.info_quota().await?;
                    println!("Usage: {:.2} KB", quota.usage);
                    match quota.quota {
                        Some(limit) => println!("Quota: {:.2} KB", limit),
                        None => println!("Quota: unlimited"),
                    }
                }
                CollectionsAction::Counts => {
                    for (name, count) in storage.info_collection_counts().await? {
                        println!("{:<12} {}", name, count);
                    }
                }
            }
        }

        Commands::Records { action } => match action {
            RecordsAction::Dump {
                collection,
                limit,
                newer,
                raw,
            } => {
                let (storage, keys) = connect(&config).await?;
                let mut query = RecordQuery::default();
                if let Some(limit) = limit {
                    query = query.limit(limit);
                }
                if let Some(newer) = newer {
                    query = query.newer(newer);
                }

                let records = storage.get_records(&collection, &query).await?;
                println!("{} record(s) in {}", records.len(), collection);
                for bso in records {
                    let envelope = Envelope::from_bso(&bso)?;
                    let value = if raw {
                        serde_json::to_value(&envelope)?
                    } else {
                        match envelope.open_value(&keys) {
                            Ok(value) => value,
                            Err(e) => {
                                println!("{} ({:.2}): cannot decrypt: {}", bso.id, bso.modified, e);
                                continue;
                            }
                        }
                    };
                    println!("{} ({:.2}):", bso.id, bso.modified);
                    println!("{}", serde_json::to_string_pretty(&value)?);
                }
            }
        },

        Commands::Places { action } => {
            let path = places_path(&config);
            let places = MemoryPlaces::load(&path)?;
            match action {
                PlacesAction::List => {
                    let history = places.history_entries();
                    println!("History ({}):", history.len());
                    for row in history {
                        println!("  [{}] {} - {} ({})", row.id, row.title, row.uri, row.guid);
                    }

                    let bookmarks = places.bookmark_entries();
                    println!("Bookmarks ({}):", bookmarks.len());
                    for row in bookmarks {
                        let marker = if row.deleted { " (deleted)" } else { "" };
                        println!(
                            "  [{}] {} - {} ({}) in {}{}",
                            row.id,
                            row.title,
                            row.uri,
                            row.guid,
                            row.parent_guid.as_deref().unwrap_or("-"),
                            marker
                        );
                    }
                }
                PlacesAction::Visit { uri, title } => {
                    let id = places.visit(&uri, &title, now_seconds())?;
                    save_places(&places, &path)?;
                    println!("Recorded visit: {}", title);
                    println!("  ID: {}", id);
                }
                PlacesAction::Bookmark {
                    uri,
                    title,
                    parent,
                    tags,
                } => {
                    let id = places.bookmark(&uri, &title, parent.as_deref(), &tags)?;
                    save_places(&places, &path)?;
                    println!("Created bookmark: {}", title);
                    println!("  ID: {}", id);
                }
                PlacesAction::Folder { title, parent } => {
                    let id = places.folder(&title, parent.as_deref())?;
                    save_places(&places, &path)?;
                    println!("Created folder: {}", title);
                    println!("  ID: {}", id);
                }
                PlacesAction::Delete { id } => {
                    places.mark_deleted(id)?;
                    save_places(&places, &path)?;
                    println!("Deleted bookmark {}", id);
                }
            }
        }

        Commands::Checkpoint { action } => {
            let storage = Storage::open_in(&config.data_dir)?;
            match action {
                CheckpointAction::Show => {
                    let checkpoint = storage.load_checkpoint()?;
                    println!("Checkpoint:");
                    for collection in Collection::ALL {
                        match checkpoint.lookup(collection.as_str()) {
                            Some(time) => println!("  {:<12} {:.2}", collection, time),
                            None => println!("  {:<12} never synced", collection),
                        }
                    }

                    let pending = storage.pending_deletes()?;
                    println!("Queued deletes: {}", pending.len());
                    for entry in pending {
                        println!(
                            "  {}/{} ({} attempt(s))",
                            entry.collection, entry.guid, entry.attempts
                        );
                    }
                }
                CheckpointAction::Reset => {
                    storage.reset_checkpoint()?;
                    println!("Checkpoint reset. The next sync pulls every collection.");
                }
            }
        }

        Commands::Sync { first } => {
            let (worker, places) = worker(&config)?;
            let events = worker.subscribe();
            let request = worker.sync(first);
            let result = run_task(&worker, events, request).await;
            save_places(&places, &places_path(&config))?;
            result?;
        }

        Commands::PushHistory { id } => {
            let (worker, _) = worker(&config)?;
            let events = worker.subscribe();
            let request = worker.push_history(id);
            run_task(&worker, events, request).await?;
            println!("Pushed history row {}", id);
        }

        Commands::ForgetHistory { id } => {
            let (worker, places) = worker(&config)?;
            let guid = places
                .forget(id)
                .ok_or_else(|| anyhow::anyhow!("No history row {}", id))?;
            save_places(&places, &places_path(&config))?;

            let events = worker.subscribe();
            let request = worker.remove_from_history(guid.clone());
            run_task(&worker, events, request).await?;
            let queued = worker
                .engine()
                .storage()
                .pending_deletes()?
                .iter()
                .any(|entry| entry.guid == guid);
            if queued {
                println!("Forgot {}; remote delete queued for the next sync", guid);
            } else {
                println!("Forgot {}", guid);
            }
        }
    }

    Ok(())
}
