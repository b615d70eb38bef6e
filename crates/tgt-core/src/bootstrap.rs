//! Session bootstrap: make sure the account is logged in before the loop starts.
//!
//! A fresh login never continues in the same process. The caller gets an
//! [`AuthState::ChallengeIssued`], collects the code from an operator, calls
//! [`Bootstrapper::complete`] and then restarts the service.

use std::{path::Path, sync::Arc};

use chrono::Utc;
use tracing::{info, warn};

use crate::{
    config::AuthConfig,
    domain::{AuthChallenge, Session},
    transport::port::{with_connection, Connector},
    Result,
};

/// Outcome of [`Bootstrapper::ensure_authenticated`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthState {
    /// The stored session works; the loop may start.
    Ready(Session),
    /// A verification code was sent to the configured phone.
    ChallengeIssued(AuthChallenge),
}

pub struct Bootstrapper {
    connector: Arc<dyn Connector>,
    auth: AuthConfig,
}

impl Bootstrapper {
    pub fn new(connector: Arc<dyn Connector>, auth: AuthConfig) -> Self {
        Self { connector, auth }
    }

    /// Probe the session with a privileged call (list dialogs).
    ///
    /// Authentication failures turn into a code request; every other error
    /// propagates unchanged and is not retried here.
    pub async fn ensure_authenticated(&self) -> Result<AuthState> {
        let phone = self.auth.phone_number.clone();
        let state = with_connection(self.connector.as_ref(), |t| async move {
            match t.list_dialogs().await {
                Ok(_) => Ok(None),
                Err(e) if e.is_auth() => {
                    warn!(error = %e, "session not authorized, requesting verification code");
                    t.request_code(&phone).await.map(Some)
                }
                Err(e) => Err(e),
            }
        })
        .await?;

        match state {
            None => {
                info!("authorization ok");
                let session = load_session_file(&self.auth.session_file)?
                    .filter(|s| s.session_id == self.auth.session_id)
                    .unwrap_or_else(|| self.session(None));
                Ok(AuthState::Ready(session))
            }
            Some(challenge) => Ok(AuthState::ChallengeIssued(challenge)),
        }
    }

    /// Submit the operator's code and persist the new session metadata.
    ///
    /// The returned session is only picked up after a restart.
    pub async fn complete(&self, challenge: &AuthChallenge, code: &str) -> Result<Session> {
        let code = code.trim().to_string();
        with_connection(self.connector.as_ref(), |t| async move {
            t.submit_code(challenge, &code).await
        })
        .await?;

        let session = self.session(Some(Utc::now().to_rfc3339()));
        save_session_file(&self.auth.session_file, &session)?;
        info!(
            session_file = %self.auth.session_file.display(),
            "authorization complete, restart required"
        );
        Ok(session)
    }

    fn session(&self, authorized_at: Option<String>) -> Session {
        Session {
            api_id: self.auth.api_id,
            session_id: self.auth.session_id.clone(),
            phone_number: self.auth.phone_number.clone(),
            authorized_at,
        }
    }
}

fn load_session_file(path: &Path) -> Result<Option<Session>> {
    if !path.exists() {
        return Ok(None);
    }
    let txt = std::fs::read_to_string(path)?;
    if txt.trim().is_empty() {
        return Ok(None);
    }
    let data: Session = serde_json::from_str(&txt)?;
    Ok(Some(data))
}

fn save_session_file(path: &Path, data: &Session) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let txt = serde_json::to_string_pretty(data)?;
    std::fs::write(path, txt)?;
    Ok(())
}
