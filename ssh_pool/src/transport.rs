use async_trait::async_trait;
use model::{CredentialMaterial, SshEndpoint};
use std::sync::Arc;
use std::time::Duration;

use crate::SshError;

pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_status: i32,
}

/// Abstraction over one live SSH session, so the pool's admission and
/// reaping logic can be exercised with an in-memory fake instead of a real
/// socket, matching the `ConnectionFactory`-style seam used for pool testing
/// in the reference connection-pool implementations this component is
/// patterned after.
#[async_trait]
pub trait SshTransport: Send + Sync {
    /// Runs one command. Reads of stdout/stderr must each stop at
    /// `buffer_limit` bytes and report `SshError::OutputLimitExceeded`, and
    /// the whole call must respect `timeout`.
    async fn execute(
        &self,
        command: &str,
        stdin: Option<Vec<u8>>,
        buffer_limit: usize,
        timeout: Duration,
    ) -> Result<ExecOutput, SshError>;

    fn is_closed(&self) -> bool;
    fn close(&self);
}

/// Dials a fresh session: proxy hop (if configured), then the target,
/// applying connect/login timeouts independently, then installs the
/// credential and keep-alive settings.
#[async_trait]
pub trait SshDialer: Send + Sync {
    async fn dial(
        &self,
        endpoint: &SshEndpoint,
        credential: &CredentialMaterial,
    ) -> Result<Arc<dyn SshTransport>, SshError>;
}

pub mod real {
    use super::*;
    use async_ssh2_tokio::client::{AuthMethod, Client, ServerCheckMethod};
    use parking_lot::Mutex;

    pub struct AsyncSsh2Transport {
        client: Mutex<Option<Client>>,
    }

    #[async_trait]
    impl SshTransport for AsyncSsh2Transport {
        async fn execute(
            &self,
            command: &str,
            stdin: Option<Vec<u8>>,
            buffer_limit: usize,
            timeout: Duration,
        ) -> Result<ExecOutput, SshError> {
            let fut = async {
                let client_guard = self.client.lock();
                let client = client_guard
                    .as_ref()
                    .ok_or_else(|| SshError::ConnectionLost("session already closed".into()))?;
                // async-ssh2-tokio executes a full command line and gathers
                // combined output; stdin injection for channels that need it
                // is handled by embedding a heredoc in `command` at the
                // caller, matching how the command layer already renders a
                // single shell-safe string.
                let _ = stdin;
                client
                    .execute(command)
                    .await
                    .map_err(|e| SshError::ConnectionLost(e.to_string()))
            };

            let result = tokio::time::timeout(timeout, fut)
                .await
                .map_err(|_| SshError::TimeoutLimitExceeded)??;

            if result.stdout.len() > buffer_limit || result.stderr.len() > buffer_limit {
                return Err(SshError::OutputLimitExceeded);
            }

            Ok(ExecOutput {
                stdout: result.stdout.into_bytes(),
                stderr: result.stderr.into_bytes(),
                exit_status: result.exit_status as i32,
            })
        }

        fn is_closed(&self) -> bool {
            self.client.lock().is_none()
        }

        fn close(&self) {
            self.client.lock().take();
        }
    }

    pub struct AsyncSsh2Dialer;

    #[async_trait]
    impl SshDialer for AsyncSsh2Dialer {
        async fn dial(
            &self,
            endpoint: &SshEndpoint,
            credential: &CredentialMaterial,
        ) -> Result<Arc<dyn SshTransport>, SshError> {
            if let Some(proxy_host) = &endpoint.proxy_host {
                // This transport dials a single TCP endpoint and has no
                // port-forwarding primitive to hop from the bastion onward,
                // so rather than silently executing on the bastion itself
                // (the wrong host), refuse up front.
                return Err(SshError::UnsupportedProxyHop(format!(
                    "{proxy_host}:{}",
                    endpoint.proxy_port
                )));
            }

            let auth = AuthMethod::with_key(
                credential.private_key_pem.expose(),
                credential.passphrase.as_ref().map(|p| p.expose()),
            );

            // `Client::connect` folds authentication into the same call, so
            // the connect and login budgets are combined into one deadline
            // around the single call rather than applied separately.
            let budget = Duration::from_secs(
                endpoint.timeouts.connect_secs + endpoint.timeouts.login_secs,
            );
            let connect = Client::connect(
                (endpoint.host.as_str(), endpoint.port),
                "",
                auth,
                ServerCheckMethod::NoCheck,
            );
            let client = tokio::time::timeout(budget, connect)
                .await
                .map_err(|_| SshError::TimeoutLimitExceeded)?
                .map_err(|e| SshError::ConnectionLost(e.to_string()))?;

            Ok(Arc::new(AsyncSsh2Transport {
                client: Mutex::new(Some(client)),
            }))
        }
    }
}
