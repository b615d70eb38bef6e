//! MTProto gateway adapter.
//!
//! Implements the `tgt-core` Transport port by relaying raw MTProto calls as
//! JSON over HTTP to a gateway sidecar that owns the wire protocol and the
//! session storage (keyed by session id).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

pub mod wire;

use tgt_core::{
    config::AuthConfig,
    domain::{AuthChallenge, ChannelRef, DialogSnapshot, HistoryPage},
    errors::Error,
    transport::{
        port::{Connector, Transport},
        types::{Request, Response},
    },
    Result,
};

use crate::wire::{Call, ConnectParams, Connected, Envelope};

#[derive(Clone, Debug)]
struct Endpoint {
    base_url: String,
    http: reqwest::Client,
}

impl Endpoint {
    async fn post(&self, path: &str, body: &impl serde::Serialize) -> Result<Value> {
        let url = format!("{}/v1/{path}", self.base_url.trim_end_matches('/'));
        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("gateway request error: {e}")))?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited { retry_after: None });
        }

        let text = resp
            .text()
            .await
            .map_err(|e| Error::Transport(format!("gateway read error: {e}")))?;
        let envelope: Envelope = serde_json::from_str(&text).map_err(|e| {
            Error::Transport(format!(
                "gateway returned {status}: {e}: {}",
                text.chars().take(200).collect::<String>()
            ))
        })?;

        if envelope.ok {
            return Ok(envelope.result);
        }
        match envelope.error {
            Some(rpc) => Err(wire::map_rpc_error(&rpc)),
            None => Err(Error::Transport(format!("gateway call failed: {status}"))),
        }
    }
}

/// Opens one gateway connection per call to [`Connector::connect`].
#[derive(Clone, Debug)]
pub struct GatewayConnector {
    endpoint: Endpoint,
    auth: AuthConfig,
}

impl GatewayConnector {
    pub fn new(auth: AuthConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::External(format!("http client build failed: {e}")))?;
        Ok(Self {
            endpoint: Endpoint {
                base_url: auth.gateway_url.clone(),
                http,
            },
            auth,
        })
    }
}

#[async_trait]
impl Connector for GatewayConnector {
    async fn connect(&self) -> Result<Arc<dyn Transport>> {
        let params = ConnectParams {
            api_id: self.auth.api_id,
            api_hash: &self.auth.api_hash,
            session: &self.auth.session_id,
        };
        let v = self.endpoint.post("connect", &params).await?;
        let connected: Connected = serde_json::from_value(v)?;
        debug!(connection = %connected.connection, "gateway connection opened");
        Ok(Arc::new(GatewayTransport {
            endpoint: self.endpoint.clone(),
            connection: connected.connection,
        }))
    }
}

/// One live gateway connection.
#[derive(Debug)]
pub struct GatewayTransport {
    endpoint: Endpoint,
    connection: String,
}

impl GatewayTransport {
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.endpoint
            .post(
                "call",
                &Call {
                    connection: &self.connection,
                    method,
                    params,
                },
            )
            .await
    }
}

#[async_trait]
impl Transport for GatewayTransport {
    async fn list_dialogs(&self) -> Result<DialogSnapshot> {
        let v = self
            .call(
                "messages.getDialogs",
                json!({ "offset_date": 0, "offset_id": 0, "limit": 100 }),
            )
            .await?;
        wire::parse_dialogs(v)
    }

    async fn get_history(
        &self,
        channel: ChannelRef,
        offset: u32,
        limit: u32,
    ) -> Result<HistoryPage> {
        let v = self
            .call(
                "messages.getHistory",
                wire::history_params(channel, offset, limit),
            )
            .await?;
        wire::parse_history(v)
    }

    async fn send(&self, request: Request) -> Result<Response> {
        let v = self
            .call(request.method(), wire::request_params(&request))
            .await?;
        Ok(match v {
            Value::Bool(b) => Response::Bool(b),
            _ => Response::Updates,
        })
    }

    async fn request_code(&self, phone_number: &str) -> Result<AuthChallenge> {
        let v = self
            .call("auth.sendCode", json!({ "phone_number": phone_number }))
            .await?;
        Ok(AuthChallenge {
            phone_number: phone_number.to_string(),
            phone_code_hash: wire::parse_sent_code(v)?,
        })
    }

    async fn submit_code(&self, challenge: &AuthChallenge, code: &str) -> Result<()> {
        self.call(
            "auth.signIn",
            json!({
                "phone_number": challenge.phone_number,
                "phone_code_hash": challenge.phone_code_hash,
                "phone_code": code,
            }),
        )
        .await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.endpoint
            .post("disconnect", &json!({ "connection": self.connection }))
            .await?;
        debug!(connection = %self.connection, "gateway connection closed");
        Ok(())
    }
}
