use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    domain::{AuthChallenge, ChannelRef, DialogSnapshot, HistoryPage},
    pacing::Pacer,
    transport::{
        port::{Connector, Transport},
        types::{Request, Response},
    },
    Result,
};

/// Transport decorator that spaces out every remote call.
///
/// Best-effort defense against FLOOD_WAIT errors. The named pauses (forward,
/// page, settle) are applied by callers on top of this.
pub struct ThrottledTransport {
    inner: Arc<dyn Transport>,
    pacer: Arc<Pacer>,
}

impl ThrottledTransport {
    pub fn new(inner: Arc<dyn Transport>, pacer: Arc<Pacer>) -> Self {
        Self { inner, pacer }
    }
}

#[async_trait]
impl Transport for ThrottledTransport {
    async fn list_dialogs(&self) -> Result<DialogSnapshot> {
        self.pacer.throttle().await;
        self.inner.list_dialogs().await
    }

    async fn get_history(
        &self,
        channel: ChannelRef,
        offset: u32,
        limit: u32,
    ) -> Result<HistoryPage> {
        self.pacer.throttle().await;
        self.inner.get_history(channel, offset, limit).await
    }

    async fn send(&self, request: Request) -> Result<Response> {
        self.pacer.throttle().await;
        self.inner.send(request).await
    }

    async fn request_code(&self, phone_number: &str) -> Result<AuthChallenge> {
        self.pacer.throttle().await;
        self.inner.request_code(phone_number).await
    }

    async fn submit_code(&self, challenge: &AuthChallenge, code: &str) -> Result<()> {
        self.pacer.throttle().await;
        self.inner.submit_code(challenge, code).await
    }

    async fn disconnect(&self) -> Result<()> {
        // Local teardown, no remote request worth pacing.
        self.inner.disconnect().await
    }
}

/// Connector whose connections are all wrapped in [`ThrottledTransport`]
/// sharing one pacer.
pub struct ThrottledConnector {
    inner: Arc<dyn Connector>,
    pacer: Arc<Pacer>,
}

impl ThrottledConnector {
    pub fn new(inner: Arc<dyn Connector>, pacer: Arc<Pacer>) -> Self {
        Self { inner, pacer }
    }
}

#[async_trait]
impl Connector for ThrottledConnector {
    async fn connect(&self) -> Result<Arc<dyn Transport>> {
        let transport = self.inner.connect().await?;
        Ok(Arc::new(ThrottledTransport::new(
            transport,
            self.pacer.clone(),
        )))
    }
}
