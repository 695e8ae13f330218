use async_trait::async_trait;
use tandem_shared::Notification;

/// Notification emission contract. Fire-and-forget from the engine's
/// perspective: implementations log and swallow delivery failures rather
/// than failing the state transition that produced the event.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn emit(&self, notification: Notification);
}
