//! The public client facade: configuration, connection lifecycle, and
//! the `identity_removed` event stream, wiring the gateway and feedback
//! sessions together.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex};
use tokio::time::timeout;
use tokio_rustls::{client::TlsStream, TlsConnector};

use crate::endpoint::Mode;
use crate::error::{Error, Result};
use crate::feedback;
use crate::gateway::{DisconnectReason, GatewaySession};
use crate::identity::Identity;
use crate::payload::Payload;
use crate::tls::TlsCredentials;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_FEEDBACK_INTERVAL: Duration = Duration::from_secs(10 * 60);
const MIN_FEEDBACK_INTERVAL: Duration = Duration::from_secs(60);

type ProductionStream = TlsStream<TcpStream>;

/// Configuration for a [`Client`]: which APS environment to talk to, what
/// client certificate to present, and how often to poll the feedback
/// service.
#[derive(Clone)]
pub struct ClientConfig {
    mode: Mode,
    tls: TlsCredentials,
    feedback_interval: Duration,
}

impl ClientConfig {
    /// A config with the default feedback interval (10 minutes).
    pub fn new(mode: Mode, tls: TlsCredentials) -> Self {
        Self {
            mode,
            tls,
            feedback_interval: DEFAULT_FEEDBACK_INTERVAL,
        }
    }

    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }
}

/// Builder for [`ClientConfig`], for callers who want to set the feedback
/// interval explicitly.
#[derive(Default)]
pub struct ClientConfigBuilder {
    mode: Option<Mode>,
    tls: Option<TlsCredentials>,
    feedback_interval: Option<Duration>,
}

impl ClientConfigBuilder {
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn tls(mut self, tls: TlsCredentials) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Clamped to a 1-minute minimum.
    pub fn feedback_interval(mut self, interval: Duration) -> Self {
        self.feedback_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<ClientConfig> {
        let tls = self.tls.ok_or(Error::TlsNotAvailable)?;
        let feedback_interval = self
            .feedback_interval
            .unwrap_or(DEFAULT_FEEDBACK_INTERVAL)
            .max(MIN_FEEDBACK_INTERVAL);

        Ok(ClientConfig {
            mode: self.mode.unwrap_or_default(),
            tls,
            feedback_interval,
        })
    }
}

/// A connected (or connectable) APS client: one gateway session plus a
/// periodic feedback poller, both reachable through a single handle.
pub struct Client {
    config: ClientConfig,
    gateway: Arc<Mutex<Option<Arc<GatewaySession<ProductionStream>>>>>,
    feedback_task: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
    events: broadcast::Sender<Identity>,
}

impl Client {
    /// Certificate/key parsing is deliberately NOT performed here: it is
    /// latched until `connect()`, deferring fallible I/O until the
    /// operation that actually needs it.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let (events, _) = broadcast::channel(64);
        Ok(Self {
            config,
            gateway: Arc::new(Mutex::new(None)),
            feedback_task: Arc::new(Mutex::new(None)),
            events,
        })
    }

    /// Dials the gateway endpoint, completes the TLS handshake, and arms the
    /// feedback timer. Fails with `AlreadyConnected` if a session already
    /// exists, `TlsNotAvailable`/`Tls`/`InvalidPem` if the configured
    /// credentials don't parse, or `TransportError` on connect failure.
    pub async fn connect(&self) -> Result<()> {
        let mut gateway_guard = self.gateway.lock().await;
        if gateway_guard.is_some() {
            return Err(Error::AlreadyConnected);
        }

        let tls_config = self.config.tls.client_config()?;
        let (host, port) = self.config.mode.gateway_addr();
        let stream = connect_tls(host, port, tls_config.clone()).await?;

        let (session, disconnected) = GatewaySession::new(stream, self.events.clone());
        *gateway_guard = Some(Arc::new(session));
        drop(gateway_guard);

        self.spawn_disconnect_watcher(disconnected);
        self.arm_feedback_timer(tls_config).await;
        Ok(())
    }

    /// Reacts to the gateway session's one-shot disconnect signal: always
    /// clears the stale session so a subsequent `connect()` can succeed, and
    /// additionally disarms the feedback timer when the disconnect was a
    /// transport failure rather than a clean EOF (§4.D: a failed write or
    /// read "triggers session failure", which extends to the feedback
    /// poller sharing the same credentials/connection health).
    fn spawn_disconnect_watcher(&self, disconnected: tokio::sync::oneshot::Receiver<DisconnectReason>) {
        let gateway = self.gateway.clone();
        let feedback_task = self.feedback_task.clone();

        tokio::spawn(async move {
            if let Ok(reason) = disconnected.await {
                gateway.lock().await.take();
                if reason == DisconnectReason::TransportError {
                    if let Some(handle) = feedback_task.lock().await.take() {
                        handle.abort();
                    }
                }
            }
        });
    }

    /// Requires a connected session; fails with `NotConnected` otherwise.
    pub async fn deliver(&self, identity: &Identity, payload: &Payload) -> Result<()> {
        let session = self
            .gateway
            .lock()
            .await
            .clone()
            .ok_or(Error::NotConnected)?;
        session.deliver(identity, payload).await
    }

    /// Tears down the gateway connection and stops the feedback timer.
    /// Outstanding deliveries resolve with `Error::SessionClosed`.
    pub async fn close(&self) {
        if let Some(session) = self.gateway.lock().await.take() {
            session.close().await;
        }
        if let Some(handle) = self.feedback_task.lock().await.take() {
            handle.abort();
        }
    }

    /// The `identity_removed` event stream, fed by both the gateway's
    /// `INVALID_TOKEN` handler and the feedback poller.
    pub fn subscribe(&self) -> broadcast::Receiver<Identity> {
        self.events.subscribe()
    }

    async fn arm_feedback_timer(&self, tls_config: Arc<rustls::ClientConfig>) {
        let mut task_guard = self.feedback_task.lock().await;
        if task_guard.is_some() {
            return;
        }

        let mode = self.config.mode;
        let interval = self.config.feedback_interval;
        let events = self.events.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick is immediate; the feedback list is empty right after connect
            loop {
                ticker.tick().await;
                let (host, port) = mode.feedback_addr();
                match connect_tls(host, port, tls_config.clone()).await {
                    Ok(stream) => feedback::drain_feedback(stream, &events).await,
                    Err(err) => tracing::warn!(error = %err, "feedback connection failed"),
                }
            }
        });

        *task_guard = Some(handle);
    }
}

async fn connect_tls(
    host: &'static str,
    port: u16,
    tls_config: Arc<rustls::ClientConfig>,
) -> Result<ProductionStream> {
    let server_name =
        rustls::ServerName::try_from(host).map_err(|_| Error::InvalidEndpoint(host.to_owned()))?;

    let tcp = timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port)))
        .await
        .map_err(|_| Error::TransportError(connect_timed_out()))??;

    let connector = TlsConnector::from(tls_config);
    let tls = timeout(CONNECT_TIMEOUT, connector.connect(server_name, tcp))
        .await
        .map_err(|_| Error::TransportError(connect_timed_out()))??;

    Ok(tls)
}

fn connect_timed_out() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::TimedOut, "APS connect timed out")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_requires_tls_credentials() {
        let err = ClientConfig::builder().build().unwrap_err();
        assert!(matches!(err, Error::TlsNotAvailable));
    }

    #[test]
    fn builder_clamps_feedback_interval_to_one_minute() {
        let config = ClientConfig::builder()
            .tls(TlsCredentials::CertificateAndKey {
                cert_pem: Vec::new(),
                key_pem: Vec::new(),
            })
            .feedback_interval(Duration::from_secs(5))
            .build()
            .unwrap();
        assert_eq!(config.feedback_interval, MIN_FEEDBACK_INTERVAL);
    }

    #[test]
    fn builder_defaults_mode_to_production() {
        let config = ClientConfig::builder()
            .tls(TlsCredentials::CertificateAndKey {
                cert_pem: Vec::new(),
                key_pem: Vec::new(),
            })
            .build()
            .unwrap();
        assert_eq!(config.mode, Mode::Production);
    }
}
