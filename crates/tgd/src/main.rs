use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use tgd_core::{
    config::Config,
    polling::{run_polling_with, PollOptions},
    ports::Messenger,
    Dispatcher,
};
use tgd_telegram::{HttpPoller, JsonCodec, PollerConfig, TelegramMessenger};

mod handlers;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tgd_core::logging::init("tgd")?;

    let cfg = Config::load()?;

    let dispatcher = Dispatcher::new(Arc::new(JsonCodec::new()), cfg.dispatcher);
    if let Some(offset) = cfg.initial_offset {
        dispatcher.set_offset(offset);
    }

    let messenger: Arc<dyn Messenger> = Arc::new(TelegramMessenger::from_config(&cfg)?);
    handlers::install(&dispatcher, messenger)?;

    let source = Arc::new(HttpPoller::new(PollerConfig::from(&cfg))?);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested");
                cancel.cancel();
            }
        });
    }

    info!(
        workers = cfg.dispatcher.workers,
        queue = cfg.dispatcher.queue_capacity,
        policy = %cfg.dispatcher.backpressure,
        "tgd started"
    );

    run_polling_with(
        dispatcher.clone(),
        source,
        PollOptions {
            retry_delay: cfg.poll_retry_delay,
        },
        cancel,
    )
    .await?;

    dispatcher.shutdown().await;
    info!(offset = dispatcher.offset(), "tgd stopped");
    Ok(())
}
