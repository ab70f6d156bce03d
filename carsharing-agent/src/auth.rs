//! Session credential management.
//!
//! casirest sessions carry no usable expiry, so the credential is kept until
//! the upstream rejects it. A rejected credential is dropped and the whole
//! operation is re-run once with a fresh session.

use std::future::Future;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::cantamen::{CantamenClient, Credential, ServiceAccount, UpstreamError};

/// The session credential could not be obtained.
#[derive(Debug, thiserror::Error)]
#[error("unable to obtain session credential: {0}")]
pub struct CredentialUnavailable(#[source] pub UpstreamError);

/// `Authorization` header value for a session: Basic over `id:customerId`.
pub fn authorization_header_value(credential: &Credential) -> String {
    let raw = format!("{}:{}", credential.id, credential.customer_id);
    format!("Basic {}", STANDARD.encode(raw))
}

/// Owns the process-wide session credential.
///
/// Acquisition is serialized: concurrent callers that find the slot empty
/// wait for a single token request instead of each issuing their own.
pub struct AuthManager {
    client: CantamenClient,
    account: ServiceAccount,
    credential: Mutex<Option<Credential>>,
}

impl AuthManager {
    pub fn new(client: CantamenClient, account: ServiceAccount) -> Self {
        Self {
            client,
            account,
            credential: Mutex::new(None),
        }
    }

    /// Return the cached credential, opening a new session if there is none.
    ///
    /// Failures are logged and returned; nothing is cached on failure.
    pub async fn get_credential(&self) -> Result<Credential, UpstreamError> {
        let mut slot = self.credential.lock().await;

        if let Some(credential) = slot.as_ref() {
            debug!("using cached session credential");
            return Ok(credential.clone());
        }

        match self.client.issue_token(&self.account).await {
            Ok(credential) => {
                info!(customer_id = %credential.customer_id, "opened upstream session");
                *slot = Some(credential.clone());
                Ok(credential)
            }
            Err(e) => {
                error!(error = %e, "failed to obtain session token");
                Err(e)
            }
        }
    }

    /// Drop the cached credential unconditionally.
    pub async fn invalidate(&self) {
        *self.credential.lock().await = None;
    }

    /// Drop the cached credential only if it is still `stale`.
    ///
    /// Returns whether anything was dropped. A request that observed a 401
    /// on an old session must not discard a session another request has
    /// already replaced it with.
    pub async fn invalidate_if_current(&self, stale: &Credential) -> bool {
        let mut slot = self.credential.lock().await;
        if slot.as_ref() == Some(stale) {
            *slot = None;
            true
        } else {
            false
        }
    }

    /// The currently cached credential, if any.
    #[cfg(test)]
    pub(crate) async fn cached(&self) -> Option<Credential> {
        self.credential.lock().await.clone()
    }

    /// Run `op` with a session credential, retrying at most once.
    ///
    /// If `op` fails with an error for which `is_auth_failure` holds, the
    /// credential it used is invalidated and `op` runs a second time with a
    /// freshly acquired one. Whatever the second run returns is final.
    pub async fn with_auth_retry<T, E, F, Fut, P>(
        &self,
        is_auth_failure: P,
        mut op: F,
    ) -> Result<T, E>
    where
        F: FnMut(Credential) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: From<CredentialUnavailable>,
    {
        let credential = self.get_credential().await.map_err(CredentialUnavailable)?;

        match op(credential.clone()).await {
            Err(err) if is_auth_failure(&err) => {
                warn!("upstream rejected session credential, retrying with a new session");
                self.invalidate_if_current(&credential).await;

                let credential = self.get_credential().await.map_err(CredentialUnavailable)?;
                op(credential).await
            }
            result => result,
        }
    }
}
