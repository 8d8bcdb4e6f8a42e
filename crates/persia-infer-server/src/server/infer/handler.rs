use async_trait::async_trait;

/// Trait representing a (stateful) task processor that should run inside its
/// own thread.
#[async_trait]
pub trait RequestHandler
where
    Self: Send + Sized + 'static,
{
    type Input: Send + Sync + 'static;
    type Output: Send + Sync + 'static;

    async fn handle(&mut self, request: Self::Input) -> anyhow::Result<Self::Output>;
}
