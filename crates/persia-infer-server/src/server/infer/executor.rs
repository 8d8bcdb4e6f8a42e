use anyhow::Result;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

use crate::server::infer::batch::QueueEntry;
use crate::server::infer::handler::RequestHandler;

/// Queue command
pub(crate) enum Command<THandler>
where
    THandler: RequestHandler,
{
    Append(QueueEntry<THandler>),
    Stop,
}

/// Request Queue with stateful task processor
pub struct DedicatedExecutor<THandler>
where
    THandler: RequestHandler,
{
    pub(crate) tx: UnboundedSender<Command<THandler>>,
}

impl<THandler> DedicatedExecutor<THandler>
where
    THandler: RequestHandler,
{
    pub(crate) fn new(processor: THandler) -> Result<Self> {
        // Create channel
        let (tx, rx) = unbounded_channel();

        let _join_handle = std::thread::Builder::new()
            .name("inference-executor".into())
            .spawn(move || {
                // Create a new Runtime to run tasks
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .enable_all()
                    .thread_name(format!("worker-{}", Uuid::new_v4()))
                    .build()?;

                // Pull task requests off the channel and send them to the executor
                runtime.block_on(queue_task(rx, processor));
                anyhow::Ok(())
            })?;

        Ok(Self { tx })
    }

    /// Ask the executor thread to finish after the requests already queued.
    pub fn stop(&self) {
        if self.tx.send(Command::Stop).is_err() {
            tracing::debug!("Executor already stopped");
        }
    }
}

// Generic background task executor with stateful processor
async fn queue_task<THandler>(
    mut receiver: UnboundedReceiver<Command<THandler>>,
    mut processor: THandler,
) where
    THandler: RequestHandler,
{
    'main: while let Some(cmd) = receiver.recv().await {
        use Command::*;

        match cmd {
            Append(entry) => {
                tracing::trace!(
                    "Processing task {}, added {}ms ago",
                    entry.id,
                    entry.queue_time.elapsed().as_millis()
                );

                // Process the task, a failure only concerns its own caller
                let response = processor.handle(entry.request).await;
                if let Err(e) = &response {
                    tracing::warn!("Task {} failed: {:#}", entry.id, e);
                }

                if entry.response_tx.send(response).is_ok() {
                    tracing::trace!("Successfully sent response for task {}", entry.id)
                } else {
                    tracing::error!("Failed to send response for task {}", entry.id)
                }
            }
            Stop => {
                tracing::info!("Stopping queue task");
                break 'main;
            }
        }
    }
}
