//! SSH Connection Pool: caches one live SSH session per `(cluster, user)`,
//! enforces capacity/idle/keep-alive/timeout rules, and executes shell
//! commands with bounded stdout/stderr.

pub mod transport;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use credentials::{CredentialError, CredentialProvider};
use model::{SshEndpoint, Username};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::info;

pub use transport::{ExecOutput, SshDialer, SshTransport};

const DEFAULT_BUFFER_LIMIT: usize = 5 * 1024 * 1024;
const REAP_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SshError {
    #[error("capacity exceeded")]
    CapacityExceeded,
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error("command execution timed out")]
    TimeoutLimitExceeded,
    #[error("stdout or stderr exceeded the buffer limit")]
    OutputLimitExceeded,
    #[error("proxy hop to {0} not supported by this transport")]
    UnsupportedProxyHop(String),
    #[error(transparent)]
    Credential(#[from] CredentialError),
}

impl From<SshError> for model::ErrorKind {
    fn from(e: SshError) -> Self {
        match e {
            SshError::CapacityExceeded => {
                model::ErrorKind::UpstreamUnavailable("ssh pool capacity exceeded".into())
            }
            SshError::ConnectionLost(m) => model::ErrorKind::UpstreamUnavailable(m),
            SshError::TimeoutLimitExceeded => model::ErrorKind::Timeout("ssh command".into()),
            SshError::OutputLimitExceeded => {
                model::ErrorKind::OutputTooLarge("ssh command output".into())
            }
            SshError::UnsupportedProxyHop(m) => model::ErrorKind::Internal(m),
            SshError::Credential(c) => c.into(),
        }
    }
}

/// A live SSH session for one `(cluster, user)`, owned exclusively by the
/// pool. `PooledSession::last_used` is advanced on every successful acquire;
/// `closed` latches true once reaped or observed dead.
pub struct PooledSession {
    transport: Arc<dyn SshTransport>,
    last_used: Mutex<Instant>,
    closed: AtomicBool,
}

impl PooledSession {
    fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }

    fn is_idle_expired(&self, idle_timeout: Duration) -> bool {
        self.last_used.lock().elapsed() > idle_timeout
    }
}

struct ClusterPool {
    sessions: Mutex<HashMap<Username, Arc<PooledSession>>>,
    endpoint: SshEndpoint,
    dialer: Arc<dyn SshDialer>,
    buffer_limit: usize,
}

/// One pool per cluster. Holds at most `endpoint.max_clients` live sessions.
pub struct SshPool {
    cluster: ClusterPool,
    credential_provider: Arc<dyn CredentialProvider>,
}

impl SshPool {
    pub fn new(
        endpoint: SshEndpoint,
        dialer: Arc<dyn SshDialer>,
        credential_provider: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            cluster: ClusterPool {
                sessions: Mutex::new(HashMap::new()),
                endpoint,
                dialer,
                buffer_limit: DEFAULT_BUFFER_LIMIT,
            },
            credential_provider,
        }
    }

    pub fn with_buffer_limit(mut self, limit: usize) -> Self {
        self.cluster.buffer_limit = limit;
        self
    }

    /// Single entry point: acquires a session for `user`, runs `f` against
    /// it, and returns its result. Implements the admission algorithm from
    /// the SSH Connection Pool's contract exactly.
    pub async fn with_session<F, Fut, T>(
        &self,
        user: &Username,
        access_token: &str,
        f: F,
    ) -> Result<T, SshError>
    where
        F: FnOnce(Arc<dyn SshTransport>) -> Fut,
        Fut: std::future::Future<Output = Result<T, SshError>>,
    {
        // Step 1: mint a credential before taking the pool lock.
        let credential = self
            .credential_provider
            .get_credential(user, access_token)
            .await?;

        // Steps 2-3: reuse under lock if present and alive.
        {
            let sessions = self.cluster.sessions.lock();
            if let Some(session) = sessions.get(user) {
                if !session.closed.load(Ordering::SeqCst) {
                    session.touch();
                    let transport = session.transport.clone();
                    drop(sessions);
                    return f(transport).await;
                }
            }
        }

        // Step 4: capacity check, still under lock.
        {
            let sessions = self.cluster.sessions.lock();
            if sessions.len() >= self.cluster.endpoint.max_clients {
                return Err(SshError::CapacityExceeded);
            }
        }

        // Step 5: release the lock, dial, then re-acquire to insert,
        // reconciling a race against a concurrent dialer for the same user.
        let transport = self.cluster.dialer.dial(&self.cluster.endpoint, &credential).await?;
        let session = Arc::new(PooledSession {
            transport: transport.clone(),
            last_used: Mutex::new(Instant::now()),
            closed: AtomicBool::new(false),
        });

        let winner = {
            let mut sessions = self.cluster.sessions.lock();
            match sessions.get(user) {
                Some(existing) if !existing.closed.load(Ordering::SeqCst) => existing.clone(),
                _ => {
                    sessions.insert(user.clone(), session.clone());
                    session.clone()
                }
            }
        };

        if !Arc::ptr_eq(&winner, &session) {
            // Lost the race: close the extra connection we just dialled.
            transport.close();
            winner.touch();
            return f(winner.transport.clone()).await;
        }

        f(transport).await
    }

    /// Closes sessions idle longer than `idle_timeout`, then drops entries
    /// marked closed. Intended to be driven by a process-wide periodic task
    /// firing every 5 seconds, not by each pool independently.
    pub fn prune(&self, idle_timeout: Duration) {
        let mut sessions = self.cluster.sessions.lock();
        let mut to_close = Vec::new();
        for (user, session) in sessions.iter() {
            if session.closed.load(Ordering::SeqCst) || session.is_idle_expired(idle_timeout) {
                to_close.push(user.clone());
            }
        }
        for user in &to_close {
            if let Some(session) = sessions.get(user) {
                session.transport.close();
                session.closed.store(true, Ordering::SeqCst);
            }
        }
        sessions.retain(|_, session| !session.closed.load(Ordering::SeqCst));
        if !to_close.is_empty() {
            info!(count = to_close.len(), "reaped idle ssh sessions");
        }
    }

    pub fn active_count(&self) -> usize {
        self.cluster.sessions.lock().len()
    }
}

/// Spawns the process-wide idle-reaping task. Every 5 seconds, calls
/// `prune` on every registered pool.
pub fn spawn_idle_reaper(
    pools: Vec<(Arc<SshPool>, Duration)>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(REAP_INTERVAL);
        loop {
            interval.tick().await;
            for (pool, idle_timeout) in &pools {
                pool.prune(*idle_timeout);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use credentials::StaticKeyProvider;
    use model::{CredentialMaterial, SecretString, SshTimeouts};
    use std::collections::HashMap as StdHashMap;
    use std::sync::atomic::AtomicUsize;
    use transport::ExecOutput;

    struct FakeTransport {
        closed: AtomicBool,
    }

    #[async_trait]
    impl SshTransport for FakeTransport {
        async fn execute(
            &self,
            _command: &str,
            _stdin: Option<Vec<u8>>,
            _buffer_limit: usize,
            _timeout: Duration,
        ) -> Result<ExecOutput, SshError> {
            Ok(ExecOutput {
                stdout: b"ok".to_vec(),
                stderr: Vec::new(),
                exit_status: 0,
            })
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct CountingDialer {
        dial_count: AtomicUsize,
    }

    #[async_trait]
    impl SshDialer for CountingDialer {
        async fn dial(
            &self,
            _endpoint: &SshEndpoint,
            _credential: &CredentialMaterial,
        ) -> Result<Arc<dyn SshTransport>, SshError> {
            self.dial_count.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(FakeTransport {
                closed: AtomicBool::new(false),
            }))
        }
    }

    fn test_endpoint(max_clients: usize) -> SshEndpoint {
        SshEndpoint {
            host: "cluster.example".into(),
            port: 22,
            proxy_host: None,
            proxy_port: 22,
            max_clients,
            timeouts: SshTimeouts {
                connect_secs: 5,
                login_secs: 5,
                execute_secs: 5,
                idle_secs: 60,
                keep_alive_secs: 5,
            },
        }
    }

    fn provider_for(user: &str) -> Arc<dyn CredentialProvider> {
        let mut keys = StdHashMap::new();
        keys.insert(
            Username::from(user),
            CredentialMaterial {
                private_key_pem: SecretString::new("pem"),
                public_certificate: None,
                passphrase: None,
            },
        );
        Arc::new(StaticKeyProvider::new(keys))
    }

    #[tokio::test]
    async fn concurrent_requests_for_one_user_open_exactly_one_session() {
        let dialer = Arc::new(CountingDialer {
            dial_count: AtomicUsize::new(0),
        });
        let pool = Arc::new(SshPool::new(
            test_endpoint(10),
            dialer.clone(),
            provider_for("alice"),
        ));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                pool.with_session(&Username::from("alice"), "token", |t| async move {
                    t.execute("true", None, 1024, Duration::from_secs(1)).await
                })
                .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(pool.active_count(), 1);
        assert_eq!(dialer.dial_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn capacity_exceeded_fails_fast_without_queueing() {
        let dialer = Arc::new(CountingDialer {
            dial_count: AtomicUsize::new(0),
        });
        let mut keys = StdHashMap::new();
        for u in ["u1", "u2", "u3"] {
            keys.insert(
                Username::from(u),
                CredentialMaterial {
                    private_key_pem: SecretString::new("pem"),
                    public_certificate: None,
                    passphrase: None,
                },
            );
        }
        let provider: Arc<dyn CredentialProvider> = Arc::new(StaticKeyProvider::new(keys));
        let pool = SshPool::new(test_endpoint(2), dialer, provider);

        pool.with_session(&Username::from("u1"), "t", |t| async move {
            t.execute("true", None, 1024, Duration::from_secs(1)).await
        })
        .await
        .unwrap();
        pool.with_session(&Username::from("u2"), "t", |t| async move {
            t.execute("true", None, 1024, Duration::from_secs(1)).await
        })
        .await
        .unwrap();

        let err = pool
            .with_session(&Username::from("u3"), "t", |t| async move {
                t.execute("true", None, 1024, Duration::from_secs(1)).await
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SshError::CapacityExceeded));
    }

    #[tokio::test]
    async fn prune_leaves_recently_used_sessions_open() {
        let dialer = Arc::new(CountingDialer {
            dial_count: AtomicUsize::new(0),
        });
        let pool = SshPool::new(test_endpoint(10), dialer, provider_for("alice"));
        pool.with_session(&Username::from("alice"), "t", |t| async move {
            t.execute("true", None, 1024, Duration::from_secs(1)).await
        })
        .await
        .unwrap();

        pool.prune(Duration::from_secs(60));
        assert_eq!(pool.active_count(), 1);
    }

    #[tokio::test]
    async fn prune_closes_sessions_past_idle_timeout() {
        let dialer = Arc::new(CountingDialer {
            dial_count: AtomicUsize::new(0),
        });
        let pool = SshPool::new(test_endpoint(10), dialer, provider_for("alice"));
        pool.with_session(&Username::from("alice"), "t", |t| async move {
            t.execute("true", None, 1024, Duration::from_secs(1)).await
        })
        .await
        .unwrap();

        pool.prune(Duration::from_secs(0));
        assert_eq!(pool.active_count(), 0);
    }
}
