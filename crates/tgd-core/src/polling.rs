//! Long-polling driver.
//!
//! Fetches one batch at a time from the source, hands it to the dispatcher
//! and repeats. Handlers never hold up the loop; only a full worker queue
//! under [`Backpressure::Block`](crate::pool::Backpressure::Block) does.

use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{dispatcher::Dispatcher, ports::UpdateSource, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollOptions {
    /// Pause after a failed fetch or an undecodable envelope.
    pub retry_delay: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Poll until `cancel` fires, then drain in-flight handlers.
pub async fn run_polling(
    dispatcher: Dispatcher,
    source: Arc<dyn UpdateSource>,
    cancel: CancellationToken,
) -> Result<()> {
    run_polling_with(dispatcher, source, PollOptions::default(), cancel).await
}

pub async fn run_polling_with(
    dispatcher: Dispatcher,
    source: Arc<dyn UpdateSource>,
    opts: PollOptions,
    cancel: CancellationToken,
) -> Result<()> {
    info!(offset = dispatcher.offset(), "polling started");

    loop {
        let offset = dispatcher.offset();
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            res = source.fetch(offset) => res,
        };

        let outcome = match fetched {
            Ok(raw) => dispatcher.process_batch(&raw).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(report) => {
                if report.dispatched + report.dropped + report.rejected > 0 {
                    debug!(
                        dispatched = report.dispatched,
                        dropped = report.dropped,
                        rejected = report.rejected,
                        offset = report.offset,
                        "batch processed"
                    );
                }
            }
            Err(e) => {
                warn!(offset, error = %e, "batch failed, retrying");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(opts.retry_delay) => {}
                }
            }
        }
    }

    info!(offset = dispatcher.offset(), "polling stopped, draining handlers");
    dispatcher.wait_idle().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::DispatcherConfig,
        errors::Error,
        event::{fixtures::*, Event, Message, Update},
        handler::Handler,
        pool::Backpressure,
        ports::{DecodedBatch, UpdateCodec},
    };
    use async_trait::async_trait;
    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    /// Raw payload is a comma separated list of update ids; each becomes a
    /// text message "/ping" from user 1.
    struct IdListCodec;

    impl UpdateCodec for IdListCodec {
        fn decode_batch(&self, raw: &[u8]) -> Result<DecodedBatch> {
            let text = std::str::from_utf8(raw).map_err(|e| Error::Decode(e.to_string()))?;
            let mut batch = DecodedBatch::default();
            for part in text.split(',').filter(|s| !s.is_empty()) {
                let id = part
                    .parse::<u64>()
                    .map_err(|e| Error::Decode(e.to_string()))?;
                batch.updates.push(Update {
                    id,
                    event: Event::Message(text_message(1, "/ping")),
                });
            }
            Ok(batch)
        }
    }

    /// Replays scripted responses, then cancels the loop.
    struct ScriptedSource {
        script: Mutex<VecDeque<Result<Vec<u8>>>>,
        offsets: Mutex<Vec<u64>>,
        cancel: CancellationToken,
    }

    #[async_trait]
    impl UpdateSource for ScriptedSource {
        async fn fetch(&self, offset: u64) -> Result<Vec<u8>> {
            self.offsets.lock().unwrap().push(offset);
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(r) => r,
                None => {
                    self.cancel.cancel();
                    Ok(Vec::new())
                }
            }
        }
    }

    fn setup(
        script: Vec<Result<Vec<u8>>>,
    ) -> (Dispatcher, Arc<ScriptedSource>, Arc<AtomicUsize>) {
        let d = Dispatcher::new(
            Arc::new(IdListCodec),
            DispatcherConfig {
                workers: 2,
                queue_capacity: 8,
                backpressure: Backpressure::Block,
            },
        );
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let hits = hits.clone();
            d.register_command::<Message>(
                "/ping",
                Handler::sync(move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        let source = Arc::new(ScriptedSource {
            script: Mutex::new(script.into()),
            offsets: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        });
        (d, source, hits)
    }

    fn fast() -> PollOptions {
        PollOptions {
            retry_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn fetches_from_advancing_offset() {
        let (d, source, hits) = setup(vec![
            Ok(b"1,2,3".to_vec()),
            Ok(Vec::new()),
            Ok(b"7".to_vec()),
        ]);

        run_polling_with(d.clone(), source.clone(), fast(), source.cancel.clone())
            .await
            .unwrap();

        assert_eq!(*source.offsets.lock().unwrap(), vec![0, 4, 4, 8]);
        assert_eq!(hits.load(Ordering::SeqCst), 4);
        assert_eq!(d.offset(), 8);
    }

    #[tokio::test]
    async fn transport_and_decode_errors_do_not_move_the_cursor() {
        let (d, source, hits) = setup(vec![
            Err(Error::External("connection reset".into())),
            Ok(b"not-a-number".to_vec()),
            Ok(b"5".to_vec()),
        ]);
        d.set_offset(3);

        run_polling_with(d.clone(), source.clone(), fast(), source.cancel.clone())
            .await
            .unwrap();

        assert_eq!(*source.offsets.lock().unwrap(), vec![3, 3, 3, 6]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_before_start_returns_immediately() {
        let (d, source, hits) = setup(vec![Ok(b"1".to_vec())]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        run_polling(d, source.clone(), cancel).await.unwrap();
        assert!(source.offsets.lock().unwrap().is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
