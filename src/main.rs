use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use docsentry::auth::{
    authorize_with_timeout, ClientSecrets, CredentialProvider, OAuthClient, StaticToken,
    StoredCredentials, TokenStore,
};
use docsentry::config::{required_env, ACCESS_TOKEN_ENV, DOCUMENT_ID_ENV};
use docsentry::diff::{create_diff, most_recent};
use docsentry::drive::parse_timestamp;
use docsentry::export::export_file_content;
use docsentry::{
    Config, DocumentConfig, DocumentResult, DriveApi, DriveClient, Granularity, RetryExecutor,
    SyncEngine,
};

#[derive(Parser)]
#[command(name = "docsentry")]
#[command(about = "Google Docs snapshot and revision-history sync")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Export the current text of a document as a timestamped snapshot
    Export {
        /// Document id (defaults to $GOOGLE_DOCUMENT_ID)
        #[arg(long)]
        doc_id: Option<String>,
    },

    /// Export the current text and diff it against an earlier snapshot
    Diff {
        /// Document id (defaults to $GOOGLE_DOCUMENT_ID)
        #[arg(long)]
        doc_id: Option<String>,

        /// Compare the newest snapshot with the Nth most recent one
        #[arg(long, default_value_t = 2)]
        limit: usize,
    },

    /// Download revision history into per-document folders
    Revisions {
        /// Document ids (defaults to the documents in the config file)
        doc_ids: Vec<String>,

        /// Keep one revision per period: all, hourly, daily, weekly, monthly (unknown values mean all)
        #[arg(short, long)]
        granularity: Option<String>,

        /// Folder name used instead of the document id (single document only)
        #[arg(short, long)]
        folder: Option<String>,

        /// Only revisions modified at or after this time (RFC 3339 or YYYY-MM-DD)
        #[arg(long)]
        since: Option<String>,
    },

    /// Manage Google authentication
    Auth {
        #[command(subcommand)]
        auth_command: AuthCommands,
    },

    /// Write a default configuration file
    Init {
        /// Directory for current-content exports
        #[arg(short, long)]
        export_dir: Option<String>,
    },
}

#[derive(Subcommand)]
enum AuthCommands {
    /// Authorize in the browser and store the token
    Login,

    /// Show stored token status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;

    init_logging(cli.verbose, &config)?;
    info!("Starting docsentry v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Export { doc_id } => cmd_export(doc_id, &config).await,
        Commands::Diff { doc_id, limit } => cmd_diff(doc_id, limit, &config).await,
        Commands::Revisions {
            doc_ids,
            granularity,
            folder,
            since,
        } => cmd_revisions(doc_ids, granularity, folder, since, &config).await,
        Commands::Auth { auth_command } => cmd_auth(auth_command, &config).await,
        Commands::Init { export_dir } => cmd_init(export_dir, cli.config, &config),
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool, config: &Config) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(config.logging.color))
        .with(filter)
        .init();

    Ok(())
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<&Path>) -> Result<Config> {
    match config_path {
        Some(path) if path.exists() => Ok(Config::load_permissive(path)),
        Some(_) => {
            let mut config = Config::default();
            config.expand_paths()?;
            Ok(config)
        }
        None => Config::load_or_default(),
    }
}

/// Access token from `$GOOGLE_ACCESS_TOKEN`, otherwise the stored OAuth token
fn credentials(config: &Config) -> Arc<dyn CredentialProvider> {
    if let Ok(token) = std::env::var(ACCESS_TOKEN_ENV) {
        if !token.is_empty() {
            return Arc::new(StaticToken(token));
        }
    }

    let oauth = config
        .client_secrets_path()
        .ok()
        .and_then(|path| match ClientSecrets::load(&path) {
            Ok(secrets) => Some(OAuthClient::new(secrets)),
            Err(e) => {
                warn!("Token refresh unavailable: {}", e);
                None
            }
        });

    Arc::new(StoredCredentials::new(
        TokenStore::new(&config.auth.token_file),
        oauth,
    ))
}

fn drive_client(config: &Config) -> Arc<dyn DriveApi> {
    Arc::new(DriveClient::new(credentials(config)))
}

fn resolve_doc_id(doc_id: Option<String>) -> Result<String> {
    match doc_id {
        Some(id) => Ok(id),
        None => Ok(required_env(DOCUMENT_ID_ENV)?),
    }
}

fn parse_since(value: &str) -> Result<DateTime<Utc>> {
    if let Some(timestamp) = parse_timestamp(value) {
        return Ok(timestamp);
    }

    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("Invalid --since value: {}", value))?;
    date.and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .with_context(|| format!("Invalid --since value: {}", value))
}

/// Fetch the current text and write it into the export directory
async fn export_current(doc_id: &str, config: &Config) -> Result<(String, PathBuf)> {
    let api = drive_client(config);
    let retry = RetryExecutor::new(config.backoff_policy());

    let title = retry
        .run("fetch_document_title", || api.fetch_document_title(doc_id))
        .await
        .context("Failed to fetch document title")?;
    let content = retry
        .run("export_document_text", || api.export_document_text(doc_id))
        .await
        .context("Failed to export document text")?;

    let path = export_file_content(&config.export_dir(), &content, &title)?;
    Ok((title, path))
}

async fn cmd_export(doc_id: Option<String>, config: &Config) -> Result<()> {
    let doc_id = resolve_doc_id(doc_id)?;
    info!("Exporting current content of {}", doc_id);

    let (title, path) = export_current(&doc_id, config).await?;

    println!("✅ Exported \"{}\"", title);
    println!("   📄 {}", path.display());
    Ok(())
}

async fn cmd_diff(doc_id: Option<String>, limit: usize, config: &Config) -> Result<()> {
    let doc_id = resolve_doc_id(doc_id)?;
    let (title, _) = export_current(&doc_id, config).await?;

    let snapshots = most_recent(&config.export_dir(), limit.max(2))?;
    if snapshots.len() < 2 {
        println!("📄 Only one snapshot available, nothing to compare yet");
        return Ok(());
    }

    let (newest, oldest) = (&snapshots[0], &snapshots[snapshots.len() - 1]);
    let diff = create_diff(oldest, newest)?;

    if diff.is_empty() {
        println!("✅ No changes since {}", oldest.display());
        return Ok(());
    }

    let report = export_file_content(&config.diffs_dir(), &diff, &format!("{}_diff", title))?;

    println!("{}", diff);
    println!("📝 Diff saved to {}", report.display());
    Ok(())
}

async fn cmd_revisions(
    doc_ids: Vec<String>,
    granularity: Option<String>,
    folder: Option<String>,
    since: Option<String>,
    config: &Config,
) -> Result<()> {
    let since = since.as_deref().map(parse_since).transpose()?;
    let granularity = granularity.as_deref().map(Granularity::parse_lenient);

    let mut documents: Vec<DocumentConfig> = if doc_ids.is_empty() {
        config.documents.clone()
    } else {
        doc_ids.into_iter().map(DocumentConfig::new).collect()
    };

    if documents.is_empty() {
        bail!("No documents to sync. Pass document ids or add `documents` to the config file");
    }

    if let Some(granularity) = granularity {
        for document in &mut documents {
            document.granularity = granularity;
        }
    }

    if let Some(folder) = folder {
        if documents.len() > 1 {
            bail!("--folder can only be used with a single document");
        }
        documents[0].folder_name = Some(folder);
    }

    let engine = SyncEngine::new(config.clone(), drive_client(config));

    println!("🔄 Syncing revision history for {} document(s)", documents.len());
    let summary = engine.run_sync(&documents, since).await;

    println!("\n🎉 Synchronization Complete!");
    println!("   📊 Total documents: {}", summary.total_documents);
    println!("   ✅ Successful documents: {}", summary.successful_documents);
    println!("   ❌ Failed documents: {}", summary.failed_documents);
    println!("   📄 Revisions written: {}", summary.files_written);
    println!("   ⏭️  Revisions skipped: {}", summary.revisions_skipped);
    println!("   ⏱️  Duration: {:.2}s", summary.duration.as_secs_f64());

    for result in &summary.results {
        match result {
            DocumentResult::Synced { doc_id, report } => {
                println!("   📁 {}: {}", doc_id, report.directory.display());
                for skipped in report.skipped.iter().filter(|s| s.reason.is_failure()) {
                    println!("      ⚠️  {}: {}", skipped.revision_id, skipped.reason);
                }
            }
            DocumentResult::Failed { doc_id, error } => {
                println!("   ❌ {}: {}", doc_id, error);
            }
        }
    }

    if !summary.is_success() {
        bail!("{} document(s) failed to sync", summary.failed_documents);
    }

    Ok(())
}

/// Handle authentication commands
async fn cmd_auth(auth_command: AuthCommands, config: &Config) -> Result<()> {
    let store = TokenStore::new(&config.auth.token_file);

    match auth_command {
        AuthCommands::Login => {
            let secrets_path = config.client_secrets_path()?;
            let secrets = ClientSecrets::load(&secrets_path)?;
            let client = OAuthClient::new(secrets);

            let token = authorize_with_timeout(&client, config.auth_timeout()).await?;
            store.save(&token)?;

            println!("✅ Authentication successful");
            println!("   Token saved to: {}", store.path().display());
        }
        AuthCommands::Status => match store.load()? {
            None => {
                println!("❌ Not authenticated");
                println!("   Run: docsentry auth login");
            }
            Some(token) if token.is_expired() => {
                let refreshable = token.refresh_token.is_some();
                println!("⚠️  Access token expired");
                if refreshable {
                    println!("   It will be refreshed on the next request");
                } else {
                    println!("   Run: docsentry auth login");
                }
            }
            Some(token) => {
                println!("✅ Authenticated");
                if let Some(expires_at) = token.expires_at {
                    println!("   Expires: {}", expires_at.format("%Y-%m-%d %H:%M:%S UTC"));
                }
                println!("   Scopes: {}", token.scopes.join(", "));
            }
        },
    }

    Ok(())
}

/// Write a configuration file and create the snapshot directories
fn cmd_init(export_dir: Option<String>, config_path: Option<PathBuf>, config: &Config) -> Result<()> {
    info!("Initializing docsentry...");

    let mut new_config = config.clone();
    if let Some(dir) = export_dir {
        new_config.export_directory = dir;
    }
    new_config.expand_paths()?;

    for dir in [
        new_config.export_dir(),
        new_config.revisions_dir(),
        new_config.diffs_dir(),
    ] {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory: {:?}", dir))?;
    }

    let config_path = match config_path {
        Some(path) => path,
        None => Config::default_config_path()?,
    };
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    new_config.save(&config_path)?;

    info!("Configuration saved to: {:?}", config_path);

    println!("✅ docsentry initialized successfully!");
    println!("   Config: {:?}", config_path);
    println!("   Exports: {}", new_config.export_directory);
    println!("   Next: run 'docsentry auth login', then 'docsentry export'");

    Ok(())
}
