use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use relay_core::{
    config::Config,
    dispatch::{DispatchConfig, Dispatcher},
    messaging::{
        port::MessagingPort,
        throttled::{ThrottleConfig, ThrottledMessenger},
    },
    poller::{PollConfig, PollLoop},
    store::{JsonFileSeenStore, SeenStore},
};
use relay_portal::PortalClient;
use relay_telegram::TelegramMessenger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    relay_core::logging::init("relay")?;

    let cfg = Config::load().context("loading configuration")?;

    let store = JsonFileSeenStore::open(&cfg.seen_store_path).with_context(|| {
        format!("opening seen-set store at {}", cfg.seen_store_path.display())
    })?;
    tracing::info!(
        path = %store.path().display(),
        records = store.len().await?,
        "seen-set store ready"
    );
    let store: Arc<dyn SeenStore> = Arc::new(store);

    let telegram = TelegramMessenger::from_token(
        cfg.telegram_bot_token.clone(),
        cfg.telegram_message_limit,
    );
    telegram.log_identity().await;
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        Arc::new(telegram),
        ThrottleConfig::with_send_delay(cfg.send_delay),
    ));

    let dispatcher = Dispatcher::new(
        DispatchConfig {
            chat_id: cfg.telegram_chat_id,
            attachment_mode: cfg.attachment_mode,
            scratch_root: cfg.scratch_dir.clone(),
        },
        messenger,
        store.clone(),
    );

    let portal = PortalClient::new(cfg.portal.clone())?;
    let mut poller = PollLoop::new(
        PollConfig {
            interval: cfg.poll_interval,
            daily_reset_at: cfg.daily_reset_at,
        },
        Arc::new(portal),
        store,
        dispatcher,
    );

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            on_signal.cancel();
        }
    });

    poller
        .run(shutdown)
        .await
        .context("announcement relay stopped")?;
    Ok(())
}
