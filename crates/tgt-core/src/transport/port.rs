use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    domain::{AuthChallenge, ChannelRef, DialogSnapshot, HistoryPage},
    transport::types::{Request, Response},
    Result,
};

/// One live connection to the messaging account.
///
/// Connections are scoped to a single pass/run and must be disconnected on
/// every exit path; see [`with_connection`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn list_dialogs(&self) -> Result<DialogSnapshot>;

    /// Fetch up to `limit` messages, newest first, skipping `offset` messages.
    async fn get_history(&self, channel: ChannelRef, offset: u32, limit: u32)
        -> Result<HistoryPage>;

    async fn send(&self, request: Request) -> Result<Response>;

    /// Ask the remote to send a verification code to `phone_number`.
    async fn request_code(&self, phone_number: &str) -> Result<AuthChallenge>;

    async fn submit_code(&self, challenge: &AuthChallenge, code: &str) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;
}

/// Opens fresh connections. One connection per pass, never reused.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn Transport>>;
}

/// Run `body` against a fresh connection and always disconnect afterwards.
///
/// The body's error wins over a disconnect error; a disconnect failure after
/// a successful body is only logged.
pub async fn with_connection<T, F, Fut>(connector: &dyn Connector, body: F) -> Result<T>
where
    F: FnOnce(Arc<dyn Transport>) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let transport = connector.connect().await?;
    let out = body(transport.clone()).await;
    if let Err(e) = transport.disconnect().await {
        tracing::warn!(error = %e, "disconnect failed");
    }
    out
}
