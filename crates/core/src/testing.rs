//! In-process control session for tests.
//!
//! Publishing a service binds a loopback listener; dialing `<id>.onion:<port>`
//! connects to it. Every call is recorded as a control-port style command.

use crate::control::ControlSession;
use crate::keys::OnionKey;
use async_trait::async_trait;
use onionlink_common::{ControlAuth, SessionError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};

pub(crate) const FIXTURE_KEY_PEM: &str = include_str!("../testdata/purykhkju3itporr.onion_key");
pub(crate) const FIXTURE_SERVICE_ID: &str = "purykhkju3itporr";

pub(crate) fn fixture_key() -> OnionKey {
    OnionKey::from_pem(FIXTURE_KEY_PEM).unwrap()
}

#[derive(Default)]
struct MockState {
    password: Option<String>,
    authenticated: AtomicBool,
    closed: AtomicBool,
    fail_listen: AtomicBool,
    services: Mutex<HashMap<String, SocketAddr>>,
    commands: Mutex<Vec<String>>,
}

/// Cloning shares state, so a test can keep a handle after moving one into
/// a transport.
#[derive(Clone, Default)]
pub(crate) struct MockSession {
    state: Arc<MockState>,
}

impl MockSession {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Session that only accepts `Password { password }`
    pub(crate) fn with_password(password: &str) -> Self {
        Self {
            state: Arc::new(MockState {
                password: Some(password.to_string()),
                ..Default::default()
            }),
        }
    }

    pub(crate) fn fail_listen(&self) {
        self.state.fail_listen.store(true, Ordering::SeqCst);
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.state.commands.lock().clone()
    }

    pub(crate) fn count(&self, prefix: &str) -> usize {
        self.state
            .commands
            .lock()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub(crate) fn is_published(&self, service_id: &str) -> bool {
        let prefix = format!("{}:", service_id);
        self.state
            .services
            .lock()
            .keys()
            .any(|k| k.starts_with(&prefix))
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    fn record(&self, command: String) {
        self.state.commands.lock().push(command);
    }

    fn check_ready(&self) -> Result<(), SessionError> {
        if self.state.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }
        if !self.state.authenticated.load(Ordering::SeqCst) {
            return Err(SessionError::NotAuthenticated);
        }
        Ok(())
    }
}

#[async_trait]
impl ControlSession for MockSession {
    async fn authenticate(&self, auth: &ControlAuth) -> Result<(), SessionError> {
        self.record("AUTHENTICATE".to_string());

        if let Some(expected) = &self.state.password {
            match auth {
                ControlAuth::Password { password } if password == expected => {}
                _ => {
                    return Err(SessionError::Authentication(
                        "515 Authentication failed".to_string(),
                    ))
                }
            }
        }

        self.state.authenticated.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn listen(&self, port: u16, key: &OnionKey) -> Result<TcpListener, SessionError> {
        self.check_ready()?;

        let blob = key
            .to_key_blob()
            .map_err(|e| SessionError::command("ADD_ONION", e.to_string()))?;

        if self.state.fail_listen.load(Ordering::SeqCst) {
            self.record(format!("ADD_ONION {} Port={}", blob, port));
            return Err(SessionError::command("ADD_ONION", "551 Failed to add onion"));
        }

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let local = listener.local_addr()?;

        self.record(format!("ADD_ONION {} Port={},{}", blob, port, local));
        self.state
            .services
            .lock()
            .insert(format!("{}:{}", key.service_id(), port), local);

        Ok(listener)
    }

    async fn dial(&self, network: &str, address: &str) -> Result<TcpStream, SessionError> {
        self.check_ready()?;
        self.record(format!("DIAL {} {}", network, address));

        let target = match address.rsplit_once(':') {
            Some((host, port)) if host.ends_with(".onion") => {
                let key = format!("{}:{}", host.trim_end_matches(".onion"), port);
                let local = self.state.services.lock().get(&key).copied();
                match local {
                    Some(local) => local.to_string(),
                    None => {
                        return Err(SessionError::command(
                            "DIAL",
                            format!("{} is unreachable", address),
                        ))
                    }
                }
            }
            _ => address.to_string(),
        };

        Ok(TcpStream::connect(target).await?)
    }

    async fn remove_listener(&self, service_id: &str) -> Result<(), SessionError> {
        self.record(format!("DEL_ONION {}", service_id));

        let prefix = format!("{}:", service_id);
        let mut services = self.state.services.lock();
        let before = services.len();
        services.retain(|k, _| !k.starts_with(&prefix));

        if services.len() == before {
            return Err(SessionError::command(
                "DEL_ONION",
                "552 Unknown Onion Service id",
            ));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.record("QUIT".to_string());
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
