//! Wires config into the download engine, pipeline, scheduler and bot.

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    anyhow::{Context, Result},
    relay_channels::RelayOutbound,
    relay_config::RelayConfig,
    relay_download::{DownloadEngine, HttpFetcher},
    relay_media::{ChunkPipeline, Segmenter},
    relay_queue::{JsonQuotaStore, QueueScheduler, QuotaStore, Unlimited},
    relay_telegram::{BotState, TelegramOutbound},
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use crate::config_commands::print_diagnostics;

pub async fn run(config: RelayConfig, work_dir: Option<PathBuf>) -> Result<()> {
    let validation = relay_config::validate(&config);
    print_diagnostics(&validation);
    if validation.has_errors() {
        anyhow::bail!("configuration is invalid, see `relay config check`");
    }

    let data_dir = relay_config::data_dir();
    let work_dir = work_dir
        .or_else(|| config.download.work_dir.clone())
        .unwrap_or_else(|| data_dir.join("work"));
    tokio::fs::create_dir_all(&work_dir)
        .await
        .with_context(|| format!("failed to create work dir {}", work_dir.display()))?;

    let connected = relay_telegram::connect(&config.telegram).await?;
    let outbound = Arc::new(TelegramOutbound::new(connected.bot.clone()));
    let transport: Arc<dyn RelayOutbound> = Arc::clone(&outbound) as Arc<dyn RelayOutbound>;

    let fetcher = HttpFetcher::new(
        &config.download.user_agent,
        Duration::from_secs(config.download.connect_timeout_secs),
    )?;
    let engine = DownloadEngine::new(Arc::new(fetcher), config.download.progress_interval());

    let mut pipeline = ChunkPipeline::new(
        Arc::clone(&transport),
        config.upload.chunk_cap(),
        work_dir.clone(),
    );
    let segmentation = &config.segmentation;
    if segmentation.enabled {
        info!(ffmpeg = %segmentation.ffmpeg_path.display(), "video segmentation enabled");
        pipeline = pipeline.with_segmenter(Segmenter::new(
            segmentation.ffmpeg_path.clone(),
            segmentation.segment_seconds,
            Duration::from_secs(segmentation.timeout_secs),
        ));
    }

    let quota: Arc<dyn QuotaStore> = if config.quota.daily_limit > 0 {
        let path = config
            .quota
            .store_path
            .clone()
            .unwrap_or_else(|| data_dir.join("quota.json"));
        info!(path = %path.display(), limit = config.quota.daily_limit, "daily quota enabled");
        Arc::new(JsonQuotaStore::new(path, config.quota.daily_limit))
    } else {
        Arc::new(Unlimited)
    };

    let scheduler = QueueScheduler::new(engine, pipeline, transport, quota, work_dir.clone());

    if config.telegram.allowlist.is_empty() {
        warn!("telegram allowlist is empty, every user may use the bot");
    }
    let state = BotState {
        bot: connected.bot,
        bot_username: connected.username,
        allowlist: Arc::new(config.telegram.allowlist.clone()),
        outbound,
        scheduler: scheduler.clone(),
    };

    let cancel = CancellationToken::new();
    let mut polling =
        relay_telegram::start_polling(state, config.telegram.poll_timeout_secs, cancel.clone());

    info!(
        work_dir = %work_dir.display(),
        chunk_cap = config.upload.chunk_cap(),
        "relay running, press Ctrl-C to stop"
    );

    let polling_done = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for Ctrl-C")?;
            info!("shutdown requested");
            false
        },
        result = &mut polling => {
            if let Err(e) = result {
                warn!(error = %e, "polling task ended abnormally");
            }
            warn!("telegram polling stopped, shutting down");
            true
        },
    };

    cancel.cancel();
    if !polling_done && let Err(e) = polling.await {
        warn!(error = %e, "polling task ended abnormally");
    }
    scheduler.shutdown().await;
    info!("relay stopped");
    Ok(())
}
