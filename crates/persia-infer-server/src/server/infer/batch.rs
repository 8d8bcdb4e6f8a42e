use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use crate::server::infer::handler::RequestHandler;
use crate::server::infer::TaskId;

/// Response of a single queued request.
pub(crate) type TaskResult<THandler> = anyhow::Result<<THandler as RequestHandler>::Output>;

/// Queue entry
pub(crate) struct QueueEntry<THandler>
where
    THandler: RequestHandler,
{
    /// Identifier
    pub id: TaskId,

    /// Request
    pub request: THandler::Input,

    /// Response sender
    pub response_tx: oneshot::Sender<TaskResult<THandler>>,

    /// Instant when this entry was queued
    pub queue_time: Instant,
}

impl<THandler> QueueEntry<THandler>
where
    THandler: RequestHandler,
{
    pub fn new(
        request: THandler::Input,
        response_tx: oneshot::Sender<TaskResult<THandler>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            response_tx,
            queue_time: Instant::now(),
        }
    }
}
