//! Transcode Reconciler - tracks remote cloud transcoding jobs for media files.
//!
//! Files are submitted to a remote transcoding service, the resulting jobs
//! are tracked per file in Redis, and once every encoding of a job has
//! succeeded the outputs are registered as artifacts of the source media.

pub mod cli;
pub mod config;
pub mod error;
pub mod host;
pub mod materialize;
pub mod notify;
pub mod orchestrator;
pub mod profiles;
pub mod remote;
pub mod server;
pub mod storage;
pub mod store;
pub mod validation;
pub mod worker;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::cli::{Cli, Commands, RegisterFileArgs, SubmitArgs};
use crate::config::hot_reload::ConfigReloadEvent;
use crate::config::model::{AppConfig, RedisConfig, RemoteConfig};
use crate::config::ConfigManager;
use crate::error::{AppError, ConfigError};
use crate::host::{MediaFile, MediaHost};
use crate::materialize::resolve_base_urls;
use crate::notify::{DiscordNotifier, Metrics};
use crate::orchestrator::{JobOrchestrator, OrchestratorSettings};
use crate::profiles::parse_profile_names;
use crate::remote::{CachePolicy, RemoteClient, RemoteClientConfig, TranscodeApi};
use crate::server::CallbackServer;
use crate::storage::StoredId;
use crate::store::{RedisAssociationStore, RedisMediaHost};
use crate::validation::report::{format_brief_summary, format_report};
use crate::worker::{ReconcileWorker, RetryPolicy};

/// Runs the reconciler with the provided CLI arguments.
pub async fn run(cli: Cli) -> Result<()> {
    setup_logging(cli.log_level())?;

    match cli.command {
        Commands::Run => run_service(&cli.config).await,
        Commands::ConfigValidate => validate_config(&cli.config),
        Commands::ConfigShow => show_config(&cli.config),
        Commands::CloudCheck => cloud_check(&cli.config).await,
        Commands::Profiles => list_profiles(&cli.config).await,
        Commands::RegisterFile(args) => register_file(&cli.config, args).await,
        Commands::Submit(args) => submit(&cli.config, args).await,
        Commands::Reconcile { file_id, video_id } => {
            reconcile(&cli.config, &file_id, video_id.as_deref()).await
        }
        Commands::Progress { file_id } => {
            let services = Services::connect(&load_config(&cli.config)?, None).await?;
            print_json(&services.orchestrator.progress_of(&file_id).await?)
        }
        Commands::Status { file_id } => {
            let services = Services::connect(&load_config(&cli.config)?, None).await?;
            print_json(&services.orchestrator.status(&file_id).await?)
        }
        Commands::Associations { file_id, all } => {
            let services = Services::connect(&load_config(&cli.config)?, None).await?;
            print_json(&services.orchestrator.store().list(&file_id, all).await?)
        }
        Commands::Cancel { file_id, video_id } => {
            let services = Services::connect(&load_config(&cli.config)?, None).await?;
            services.orchestrator.cancel(&file_id, &video_id).await?;
            println!("Cancelled video {} of file {}.", video_id, file_id);
            Ok(())
        }
        Commands::Retry { file_id, encoding_id } => {
            let services = Services::connect(&load_config(&cli.config)?, None).await?;
            let encoding = services.orchestrator.retry(&file_id, &encoding_id).await?;
            println!("Encoding {} replaced by {}.", encoding_id, encoding.id);
            Ok(())
        }
    }
}

/// Initializes the tracing subscriber for structured logging.
fn setup_logging(level: &str) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt()
        .with_env_filter(filter)
        .json()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    Ok(())
}

/// Builds the Redis URL from configuration.
fn build_redis_url(config: &RedisConfig) -> String {
    match &config.password {
        Some(pass) => format!("redis://:{}@{}:{}/{}", pass, config.host, config.port, config.db),
        None => format!("redis://{}:{}/{}", config.host, config.port, config.db),
    }
}

fn build_client(config: &RemoteConfig) -> Result<RemoteClient, AppError> {
    let client = RemoteClient::new(
        &config.cloud_id,
        &config.access_key,
        &config.secret_key,
        RemoteClientConfig {
            api_url: config.api_url.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
            get_retries: config.get_retries,
        },
    )?;
    Ok(client)
}

/// The wired-up collaborators shared by every command.
struct Services {
    api: Arc<RemoteClient>,
    host: Arc<RedisMediaHost>,
    orchestrator: Arc<JobOrchestrator>,
}

impl Services {
    async fn connect(config: &AppConfig, metrics: Option<Arc<Metrics>>) -> Result<Self, AppError> {
        let api = Arc::new(build_client(&config.remote)?);

        let connection = store::connect(&build_redis_url(&config.global.redis)).await?;
        let associations = Arc::new(RedisAssociationStore::with_connection(connection.clone()));
        let host = Arc::new(RedisMediaHost::with_connection(connection));

        let mut orchestrator = JobOrchestrator::new(
            api.clone(),
            associations,
            host.clone(),
            OrchestratorSettings::from_config(config),
        );
        if let Some(metrics) = metrics {
            orchestrator = orchestrator.with_metrics(metrics);
        }
        if let Some(discord) = &config.global.notifications.discord {
            orchestrator = orchestrator.with_notifier(Arc::new(DiscordNotifier::new(discord)));
        }

        Ok(Self {
            api,
            host,
            orchestrator: Arc::new(orchestrator),
        })
    }
}

/// Settings for `config`, with transcoding switched off unless the remote
/// service accepts the configured credentials.
async fn checked_settings(config: &AppConfig, api: &dyn TranscodeApi) -> OrchestratorSettings {
    let mut settings = OrchestratorSettings::from_config(config);
    if !settings.transcoding_enabled {
        return settings;
    }

    match api.get_cloud(CachePolicy::Refresh).await {
        Ok(cloud) => info!(cloud_id = %cloud.id, "Remote credentials verified"),
        Err(e) => {
            error!(error = %e, "Remote credential check failed, transcoding disabled");
            settings.transcoding_enabled = false;
        }
    }
    settings
}

/// Runs the callback server and background reconciler until Ctrl+C.
async fn run_service(config_path: &Path) -> Result<()> {
    info!("Starting transcode reconciler");

    let config_manager = ConfigManager::new(config_path)?;
    let config = config_manager.snapshot().await;
    info!("Configuration loaded and validated");

    let metrics = if config.global.prometheus.enabled {
        Some(Arc::new(Metrics::new()?))
    } else {
        None
    };

    let services = Services::connect(&config, metrics.clone()).await?;
    info!(credentials = %services.api.credential_fingerprint(), "Connected to Redis");

    let settings = checked_settings(&config, services.api.as_ref()).await;
    services.orchestrator.update_settings(settings).await;

    // The callback server also serves metrics; without it metrics get
    // their own port.
    let server = if config.webhook.enabled {
        Some(CallbackServer::new(
            Some(Arc::clone(&services.orchestrator)),
            metrics.clone(),
            config.webhook.port,
        ))
    } else if metrics.is_some() {
        Some(CallbackServer::new(None, metrics.clone(), config.global.prometheus.port))
    } else {
        None
    };
    if let Some(server) = server {
        tokio::spawn(async move {
            if let Err(e) = server.start().await {
                error!(error = %e, "HTTP server failed");
            }
        });
    }

    let mut worker = ReconcileWorker::new(
        Arc::clone(&services.orchestrator),
        Duration::from_secs(config.transcoding.poll_interval_seconds),
        RetryPolicy::from_config(&config.global.retry),
    );
    if let Some(metrics) = &metrics {
        worker = worker.with_metrics(Arc::clone(metrics));
    }
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

    let mut reload_rx = config_manager.watch()?;
    info!("Config hot-reload enabled");

    info!("Transcode reconciler is running. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }

            Some(event) = reload_rx.recv() => {
                match event {
                    ConfigReloadEvent::Reloaded { credentials_changed } => {
                        if credentials_changed {
                            warn!("Remote credentials changed; restart to use them");
                        }
                        let config = config_manager.snapshot().await;
                        services.orchestrator.invalidate_caches().await;
                        let settings = checked_settings(&config, services.api.as_ref()).await;
                        services.orchestrator.update_settings(settings).await;
                        info!("Configuration reloaded");
                    }
                    ConfigReloadEvent::ValidationFailed { error_count } => {
                        warn!(error_count, "Configuration reload failed validation");
                    }
                }
            }
        }
    }

    info!("Shutting down transcode reconciler");
    let _ = shutdown_tx.send(true);
    if let Err(e) = worker_handle.await {
        error!(error = %e, "Reconcile worker panicked");
    }
    Ok(())
}

fn load_config(config_path: &Path) -> Result<AppConfig> {
    config::loader::load_and_validate(config_path)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Validates the configuration file and reports any issues.
fn validate_config(config_path: &Path) -> Result<()> {
    let (config, result) = config::loader::load_with_report(config_path)?;

    println!("{}", format_report(&result, None));
    if !result.is_valid() {
        anyhow::bail!(ConfigError::ValidationFailed {
            error_count: result.error_count()
        });
    }

    println!("{}", format_brief_summary(&result));
    println!(
        "Transcoding {}; default profiles: {}",
        if config.transcoding.enabled { "enabled" } else { "disabled" },
        parse_profile_names(&config.transcoding.encoding_profiles).join(", ")
    );
    Ok(())
}

/// Displays the parsed configuration with secrets masked.
fn show_config(config_path: &Path) -> Result<()> {
    let mut config = load_config(config_path)?;
    if !config.remote.secret_key.is_empty() {
        config.remote.secret_key = "********".to_string();
    }
    if let Some(password) = config.global.redis.password.as_mut() {
        *password = "********".to_string();
    }
    println!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}

/// Verifies the remote credentials and prints the delivery base URLs.
async fn cloud_check(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let client = build_client(&config.remote)?;

    let cloud = client.get_cloud(CachePolicy::Refresh).await?;
    println!(
        "Cloud {} ({}) accepted credentials {}.",
        cloud.id,
        cloud.name.as_deref().unwrap_or("unnamed"),
        client.credential_fingerprint()
    );

    let base_urls = resolve_base_urls(
        cloud.s3_videos_bucket.as_deref(),
        &config.delivery.cloudfront_download_domain,
        &config.delivery.cloudfront_streaming_domain,
        config.delivery.thumbnail_style,
    );
    if base_urls.is_empty() {
        println!("No videos bucket configured; outputs cannot be materialized.");
    }
    for base in base_urls {
        println!("  {} {}", base.label(), base.url);
    }
    Ok(())
}

/// Lists the remote encoding profiles.
async fn list_profiles(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let client = build_client(&config.remote)?;

    let profiles = client.list_profiles(CachePolicy::Refresh).await?;
    if profiles.is_empty() {
        println!("No profiles defined.");
        return Ok(());
    }

    println!("Profiles ({}):", profiles.len());
    for profile in profiles {
        let size = match (profile.width, profile.height) {
            (Some(w), Some(h)) => format!("{}x{}", w, h),
            _ => "-".to_string(),
        };
        println!(
            "  {} - {} (.{}, {})",
            profile.id,
            profile.name,
            profile.extension.as_deref().unwrap_or("?"),
            size
        );
    }
    Ok(())
}

/// Registers a media file with the Redis media library.
async fn register_file(config_path: &Path, args: RegisterFileArgs) -> Result<()> {
    let config = load_config(config_path)?;
    let host = RedisMediaHost::new(&build_redis_url(&config.global.redis)).await?;

    let stored_id = match (args.url, args.file) {
        (Some(url), _) => StoredId::Url { id: url },
        (None, Some(name)) => StoredId::File { id: name },
        (None, None) => anyhow::bail!("either --url or --file is required"),
    };

    let file = MediaFile {
        id: args.file_id,
        media_id: args.media_id,
        display_name: args.display_name,
        stored_id,
        width: None,
        height: None,
        size: None,
    };
    host.register_file(&file).await?;

    println!("Registered file {} as {}.", file.id, file.stored_id.to_json());
    Ok(())
}

/// Submits a media file for transcoding.
async fn submit(config_path: &Path, args: SubmitArgs) -> Result<()> {
    let config = load_config(config_path)?;
    let services = Services::connect(&config, None).await?;

    let profiles = args.profiles.as_deref().map(parse_profile_names);
    let video_id = services
        .orchestrator
        .submit(
            &args.file_id,
            args.source_url.as_deref(),
            profiles.as_deref(),
            args.callback_url.as_deref(),
        )
        .await?;

    println!("Submitted file {} as video {}.", args.file_id, video_id);
    Ok(())
}

/// Reconciles a file and prints each video's outcome.
async fn reconcile(config_path: &Path, file_id: &str, video_id: Option<&str>) -> Result<()> {
    let config = load_config(config_path)?;
    let services = Services::connect(&config, None).await?;

    let result = services.orchestrator.reconcile(file_id, video_id).await?;
    if result.videos.is_empty() {
        println!("File {} has no tracked videos.", file_id);
        return Ok(());
    }

    let mut failed = 0;
    for (video_id, outcome) in &result.videos {
        match outcome {
            Ok(outcome) => println!("{}: {}", video_id, serde_json::to_string(outcome)?),
            Err(e) => {
                failed += 1;
                println!("{}: error: {}", video_id, e);
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} video(s) failed to reconcile", failed, result.videos.len());
    }

    if let Some(duration) = match services.host.media_file(file_id).await? {
        Some(file) => services.host.duration(&file.media_id).await?,
        None => None,
    } {
        println!("Media duration: {}s", duration);
    }
    Ok(())
}
