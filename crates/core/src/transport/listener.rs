use super::connection::{ConnTracker, OnionConn};
use super::upgrade::Upgrader;
use crate::address::{socket_multiaddr, OnionAddr};
use crate::control::ControlSession;
use multiaddr::Multiaddr;
use onionlink_common::config::listener::{ACCEPT_BACKLOG, ACCEPT_ERROR_BACKOFF};
use onionlink_common::{Result, TransportError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, Mutex, OnceCell};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// A published onion service accepting upgraded connections.
///
/// An accept loop runs in the background from creation until close, pulling
/// raw connections off the local socket Tor forwards to and upgrading them
/// concurrently. At most `ACCEPT_BACKLOG` connections are taken off the socket
/// ahead of `accept`; the rest wait in the kernel backlog. Closing the listener
/// withdraws the service and shuts down every connection it has accepted.
pub struct OnionListener<O> {
    laddr: Multiaddr,
    service_id: String,
    port: u16,
    session: Arc<dyn ControlSession>,
    incoming: Mutex<mpsc::Receiver<Result<O>>>,
    shutdown: watch::Sender<bool>,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    tracker: ConnTracker,
    closed: AtomicBool,
    teardown: OnceCell<()>,
}

impl<O: Send + 'static> OnionListener<O> {
    pub(crate) fn spawn<U>(
        raw: TcpListener,
        addr: &OnionAddr,
        session: Arc<dyn ControlSession>,
        upgrader: Arc<U>,
    ) -> Self
    where
        U: Upgrader<Output = O>,
    {
        let laddr = addr.to_multiaddr();
        let (tx, rx) = mpsc::channel(ACCEPT_BACKLOG);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let tracker = ConnTracker::new();

        if let Ok(local) = raw.local_addr() {
            info!("Onion service {} forwarding to {}", addr, local);
        }

        let task = tokio::spawn(accept_loop(
            raw,
            laddr.clone(),
            upgrader,
            tracker.clone(),
            tx,
            shutdown_rx,
        ));

        Self {
            laddr,
            service_id: addr.host().to_string(),
            port: addr.port(),
            session,
            incoming: Mutex::new(rx),
            shutdown,
            task: parking_lot::Mutex::new(Some(task)),
            tracker,
            closed: AtomicBool::new(false),
            teardown: OnceCell::new(),
        }
    }

    /// Onion address this listener serves
    pub fn multiaddr(&self) -> &Multiaddr {
        &self.laddr
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wait for the next upgraded inbound connection.
    ///
    /// Returns [`TransportError::ClosedListener`] once the listener is closed,
    /// including to callers already waiting when close happens.
    pub async fn accept(&self) -> Result<O> {
        if self.is_closed() {
            return Err(TransportError::ClosedListener);
        }

        let mut incoming = self.incoming.lock().await;
        match incoming.recv().await {
            Some(result) => result,
            None => Err(TransportError::ClosedListener),
        }
    }

    /// Stop accepting, withdraw the service and shut down accepted connections.
    ///
    /// Concurrent and repeated calls all return once teardown has finished.
    pub async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.teardown.get_or_init(|| self.tear_down()).await;
        Ok(())
    }

    async fn tear_down(&self) {
        let _ = self.shutdown.send(true);

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Accept loop for {} ended abnormally: {}", self.laddr, e);
            }
        }

        // Loop and upgrade tasks are gone, so every sender is dropped and
        // pending accept calls wake up with `None`.
        {
            let mut incoming = self.incoming.lock().await;
            incoming.close();
            while incoming.try_recv().is_ok() {}
        }

        let swept = self.tracker.shutdown_all();
        if swept > 0 {
            debug!("Shut down {} connection(s) accepted on {}", swept, self.laddr);
        }

        if let Err(e) = self.session.remove_listener(&self.service_id).await {
            warn!("Failed to remove onion service {}: {}", self.service_id, e);
        }

        info!("Closed onion listener {}", self.laddr);
    }
}

impl<O> Drop for OnionListener<O> {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let _ = self.shutdown.send(true);
        self.tracker.shutdown_all();

        // Withdraw the service in the background if a runtime is still around
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let session = self.session.clone();
            let service_id = self.service_id.clone();
            handle.spawn(async move {
                if let Err(e) = session.remove_listener(&service_id).await {
                    warn!("Failed to remove onion service {}: {}", service_id, e);
                }
            });
        } else {
            warn!(
                "Onion service {} dropped outside a runtime; it stays published",
                self.service_id
            );
        }
    }
}

async fn accept_loop<U: Upgrader>(
    raw: TcpListener,
    laddr: Multiaddr,
    upgrader: Arc<U>,
    tracker: ConnTracker,
    tx: mpsc::Sender<Result<U::Output>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut upgrades = JoinSet::new();

    loop {
        // A queue slot is reserved before each accept and held through the
        // upgrade, so queued plus in-flight connections never exceed the backlog.
        let slot = tokio::select! {
            biased;

            _ = shutdown.changed() => break,

            Some(joined) = upgrades.join_next(), if !upgrades.is_empty() => {
                reap(joined, &laddr);
                continue;
            }

            slot = tx.clone().reserve_owned() => match slot {
                Ok(slot) => slot,
                Err(_) => break,
            },
        };

        tokio::select! {
            biased;

            _ = shutdown.changed() => break,

            Some(joined) = upgrades.join_next(), if !upgrades.is_empty() => {
                reap(joined, &laddr);
            }

            accepted = raw.accept() => match accepted {
                Ok((stream, peer)) => match tracker.track(stream) {
                    Ok((stream, tracked)) => {
                        debug!("Accepted connection from {} on {}", peer, laddr);

                        let conn = OnionConn::inbound(
                            stream,
                            laddr.clone(),
                            socket_multiaddr(peer),
                            tracked,
                        );
                        let upgrader = upgrader.clone();

                        upgrades.spawn(async move {
                            match upgrader.upgrade_inbound(conn).await {
                                Ok(output) => {
                                    slot.send(Ok(output));
                                }
                                Err(e) => warn!("Inbound upgrade from {} failed: {}", peer, e),
                            }
                        });
                    }
                    Err(e) => debug!("Dropping connection from {}: {}", peer, e),
                },
                Err(e) => {
                    warn!("Accept on {} failed: {}", laddr, e);
                    slot.send(Err(TransportError::Io(e)));
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            },
        }
    }

    upgrades.shutdown().await;
    debug!("Accept loop for {} stopped", laddr);
}

fn reap(joined: std::result::Result<(), JoinError>, laddr: &Multiaddr) {
    if let Err(e) = joined {
        if e.is_panic() {
            warn!("Inbound upgrade on {} panicked", laddr);
        }
    }
}
