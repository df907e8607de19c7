//! The gateway session: a single persistent TLS connection to the
//! APS send endpoint, multiplexing concurrent deliveries over one stream and
//! routing asynchronous error responses back to their originators.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{split, AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{broadcast, oneshot, Mutex};

use crate::codec::{self, ApsStatus};
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::payload::Payload;
use crate::transport::ApsStream;

/// An in-flight send awaiting either silence (success, implied at EOF) or an
/// error-response frame naming it.
struct PendingSend {
    /// The device-token text, retained so an `INVALID_TOKEN` response can be
    /// turned back into an `Identity` for the `identity_removed` event.
    device_token: String,
    result: oneshot::Sender<Result<()>>,
}

/// The write half of the connection plus the request-id counter, guarded by
/// a single lock so that id assignment and the frame that carries it reach
/// the wire atomically with respect to other `deliver` callers. `None` once
/// the session has failed or been closed: further `deliver` calls see
/// `NotConnected` instead of writing into a dead connection.
struct WriterState<S: ApsStream> {
    writer: Option<WriteHalf<S>>,
    next_request_id: u32,
}

/// Why a [`GatewaySession`] stopped accepting new deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The reader observed a clean EOF; pending sends were resolved per the
    /// usual silence-is-success / indeterminate-after-error rules.
    Eof,
    /// A read or write on the transport failed outright; every pending send
    /// was resolved with [`Error::TransportError`].
    TransportError,
}

/// A persistent APS gateway connection.
///
/// Generic over the transport so the reader/writer/pending-map state
/// machine can be driven by `tokio::io::DuplexStream` in tests instead of a
/// live TLS handshake; production code instantiates `S =
/// tokio_rustls::client::TlsStream<TcpStream>`.
pub struct GatewaySession<S: ApsStream> {
    writer: Arc<Mutex<WriterState<S>>>,
    pending: Arc<Mutex<HashMap<u32, PendingSend>>>,
    events: broadcast::Sender<Identity>,
    disconnect: Arc<Mutex<Option<oneshot::Sender<DisconnectReason>>>>,
}

impl<S: ApsStream + 'static> GatewaySession<S> {
    /// Wraps an already-established transport stream and starts the reader
    /// loop. Connection establishment (TCP dial, TLS handshake) is the
    /// caller's job (see `client::Client::connect` for the production
    /// path), so this constructor never fails.
    ///
    /// Returns the session plus a one-shot receiver that fires exactly once,
    /// when the session stops accepting deliveries (clean EOF or transport
    /// failure), so a caller such as `Client` can react — e.g. disarming its
    /// feedback timer on `DisconnectReason::TransportError`.
    pub fn new(
        stream: S,
        events: broadcast::Sender<Identity>,
    ) -> (Self, oneshot::Receiver<DisconnectReason>) {
        let (read_half, write_half) = split(stream);
        let pending = Arc::new(Mutex::new(HashMap::new()));
        let writer = Arc::new(Mutex::new(WriterState {
            writer: Some(write_half),
            next_request_id: rand::random(),
        }));
        let (disconnect_tx, disconnect_rx) = oneshot::channel();
        let disconnect = Arc::new(Mutex::new(Some(disconnect_tx)));

        let session = Self {
            writer: writer.clone(),
            pending: pending.clone(),
            events: events.clone(),
            disconnect: disconnect.clone(),
        };

        tokio::spawn(reader_loop(read_half, writer, pending, events, disconnect));
        (session, disconnect_rx)
    }

    /// Encodes and writes a send frame, then waits for its outcome: `Ok(())`
    /// on silent success (implied by a later clean EOF with no error
    /// response naming this request), `Err(Error::Aps(status))` on
    /// rejection, `Err(Error::SessionClosed)` if the connection closed while
    /// this send's outcome was indeterminate, `Err(Error::TransportError)`
    /// if this or any other send's write failed outright, or
    /// `Err(Error::Cancelled)` if this future is dropped before the frame
    /// reaches the wire.
    pub async fn deliver(&self, identity: &Identity, payload: &Payload) -> Result<()> {
        let token = identity.decoded()?;
        let json = payload.render_json();
        let (tx, rx) = oneshot::channel();

        // id assignment, pending-insert, and the write itself all happen
        // under one held `writer` lock so that wire order equals id order:
        // no other `deliver` call can slip a later id onto the wire first.
        let mut state = self.writer.lock().await;
        if state.writer.is_none() {
            return Err(Error::NotConnected);
        }

        let request_id = {
            let mut pending = self.pending.lock().await;
            let id = next_free_request_id(&mut state.next_request_id, &*pending);
            pending.insert(
                id,
                PendingSend {
                    device_token: identity.device_token().to_owned(),
                    result: tx,
                },
            );
            id
        };

        let frame = codec::encode_send(request_id, 0, &token, json.as_bytes());
        let write_err = state
            .writer
            .as_mut()
            .expect("writer is Some: checked above, and this lock excludes other deliver/reader writers")
            .write_all(&frame)
            .await
            .err();
        if write_err.is_some() {
            state.writer = None;
        }
        drop(state);

        if let Some(err) = write_err {
            // A failed write means the connection is dead: every pending
            // send (including the one just inserted above) is indeterminate,
            // not just this one.
            drain_pending(&self.pending, None, Some(err)).await;
            signal_disconnect(&self.disconnect, DisconnectReason::TransportError).await;
        }

        rx.await.map_err(|_| Error::Cancelled)?
    }

    /// Tears down the connection and completes every outstanding send with
    /// `Error::SessionClosed`.
    pub async fn close(&self) {
        self.writer.lock().await.writer = None;
        let mut pending = self.pending.lock().await;
        for (_, entry) in pending.drain() {
            let _ = entry.result.send(Err(Error::SessionClosed));
        }
    }

    /// Subscribes to `identity_removed` events sourced from `INVALID_TOKEN`
    /// responses on this session.
    pub fn subscribe(&self) -> broadcast::Receiver<Identity> {
        self.events.subscribe()
    }
}

/// Finds the next request id not already present in `pending`, incrementing
/// (and wrapping) `counter` before each check so ids are assigned in
/// monotonically increasing order.
fn next_free_request_id(counter: &mut u32, pending: &HashMap<u32, PendingSend>) -> u32 {
    loop {
        *counter = counter.wrapping_add(1);
        if !pending.contains_key(&*counter) {
            return *counter;
        }
    }
}

/// Reads 6-byte error-response frames until EOF or a transport error,
/// applying the strict indeterminate-after-error semantics documented on
/// `GatewaySession::deliver`.
async fn reader_loop<S: ApsStream>(
    mut reader: ReadHalf<S>,
    writer: Arc<Mutex<WriterState<S>>>,
    pending: Arc<Mutex<HashMap<u32, PendingSend>>>,
    events: broadcast::Sender<Identity>,
    disconnect: Arc<Mutex<Option<oneshot::Sender<DisconnectReason>>>>,
) {
    let mut last_error_id: Option<u32> = None;

    loop {
        let mut frame = [0u8; 6];
        match reader.read_exact(&mut frame).await {
            Ok(_) => {
                let response = match codec::decode_error_response(&frame) {
                    Ok(response) => response,
                    Err(err) => {
                        tracing::warn!(error = %err, "gateway connection sent a malformed error-response frame");
                        writer.lock().await.writer = None;
                        let io_err =
                            std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string());
                        drain_pending(&pending, last_error_id, Some(io_err)).await;
                        signal_disconnect(&disconnect, DisconnectReason::TransportError).await;
                        return;
                    }
                };

                let entry = pending.lock().await.remove(&response.request_id);
                if let Some(entry) = entry {
                    if response.status == ApsStatus::InvalidToken {
                        let _ = events.send(Identity::new(entry.device_token.clone()));
                    }
                    let outcome = if response.status == ApsStatus::NoError {
                        Ok(())
                    } else {
                        Err(Error::Aps(response.status))
                    };
                    let _ = entry.result.send(outcome);
                }
                last_error_id = Some(response.request_id);
            }
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                writer.lock().await.writer = None;
                drain_pending(&pending, last_error_id, None).await;
                signal_disconnect(&disconnect, DisconnectReason::Eof).await;
                return;
            }
            Err(err) => {
                writer.lock().await.writer = None;
                drain_pending(&pending, last_error_id, Some(err)).await;
                signal_disconnect(&disconnect, DisconnectReason::TransportError).await;
                return;
            }
        }
    }
}

/// Completes every remaining pending entry per the reader's termination
/// reason: a transport error fails everything; a clean EOF resolves entries
/// before `last_error_id` as `Ok(())` (accepted by APS) and entries after it
/// as `SessionClosed` (indeterminate).
async fn drain_pending(
    pending: &Arc<Mutex<HashMap<u32, PendingSend>>>,
    last_error_id: Option<u32>,
    transport_err: Option<std::io::Error>,
) {
    let mut pending = pending.lock().await;
    for (request_id, entry) in pending.drain() {
        let outcome = match &transport_err {
            Some(err) => Err(Error::TransportError(std::io::Error::new(
                err.kind(),
                err.to_string(),
            ))),
            None => match last_error_id {
                Some(failed_id) if request_id > failed_id => Err(Error::SessionClosed),
                _ => Ok(()),
            },
        };
        let _ = entry.result.send(outcome);
    }
}

/// Fires the session's disconnect signal at most once; later callers (e.g.
/// the reader loop observing a transport error right after `deliver` already
/// reported a write failure) find the sender already taken and do nothing.
async fn signal_disconnect(
    disconnect: &Arc<Mutex<Option<oneshot::Sender<DisconnectReason>>>>,
    reason: DisconnectReason,
) {
    if let Some(tx) = disconnect.lock().await.take() {
        let _ = tx.send(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncWriteExt as _};

    fn new_session() -> (GatewaySession<tokio::io::DuplexStream>, tokio::io::DuplexStream) {
        let (client, server) = duplex(4096);
        let (events_tx, _) = broadcast::channel(16);
        let (session, _disconnect) = GatewaySession::new(client, events_tx);
        (session, server)
    }

    #[tokio::test]
    async fn delivers_silently_on_clean_eof() {
        let (session, mut server) = new_session();
        let identity = Identity::from_raw_token(&[0x11; 32]);
        let payload = Payload::new();

        let deliver = tokio::spawn(async move { session.deliver(&identity, &payload).await });

        // Drain the frame the session wrote, then close: implied success.
        let mut buf = [0u8; 4096];
        let _ = server.read(&mut buf).await.unwrap();
        drop(server);

        assert!(deliver.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn invalid_token_completes_with_aps_error_and_emits_event() {
        let (session, mut server) = new_session();
        let mut subscription = session.subscribe();

        let identity = Identity::from_raw_token(&[0x22; 32]);
        let payload = Payload::new();

        let deliver = tokio::spawn(async move { session.deliver(&identity, &payload).await });

        let mut buf = [0u8; 4096];
        let n = server.read(&mut buf).await.unwrap();
        let request_id = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        assert!(n > 0);

        let mut response = [0u8; 6];
        response[0] = 0x08;
        response[1] = 8; // INVALID_TOKEN
        response[2..6].copy_from_slice(&request_id.to_be_bytes());
        server.write_all(&response).await.unwrap();
        drop(server);

        let outcome = deliver.await.unwrap();
        assert!(matches!(outcome, Err(Error::Aps(ApsStatus::InvalidToken))));

        let removed = subscription.recv().await.unwrap();
        assert_eq!(removed.decoded().unwrap(), [0x22; 32]);
    }

    #[tokio::test]
    async fn sends_after_a_failure_are_indeterminate() {
        let (session, mut server) = new_session();
        let session = Arc::new(session);

        let first_identity = Identity::from_raw_token(&[0x01; 32]);
        let second_identity = Identity::from_raw_token(&[0x02; 32]);

        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.deliver(&first_identity, &Payload::new()).await })
        };
        let mut buf = [0u8; 64];
        let n1 = server.read(&mut buf).await.unwrap();
        let first_id = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        assert!(n1 > 0);

        let second = {
            let session = session.clone();
            tokio::spawn(async move { session.deliver(&second_identity, &Payload::new()).await })
        };
        let n2 = server.read(&mut buf).await.unwrap();
        assert!(n2 > 0);

        // APS rejects the first send and then closes the connection.
        let mut response = [0u8; 6];
        response[0] = 0x08;
        response[1] = 2; // MISSING_DEVICE_TOKEN, any non-zero status
        response[2..6].copy_from_slice(&first_id.to_be_bytes());
        server.write_all(&response).await.unwrap();
        drop(server);

        assert!(matches!(
            first.await.unwrap(),
            Err(Error::Aps(ApsStatus::MissingDeviceToken))
        ));
        assert!(matches!(second.await.unwrap(), Err(Error::SessionClosed)));
    }

    #[tokio::test]
    async fn close_resolves_pending_sends_as_session_closed() {
        let (session, _server) = new_session();
        let session = Arc::new(session);

        let identity = Identity::from_raw_token(&[0x33; 32]);
        let deliver = {
            let session = session.clone();
            tokio::spawn(async move { session.deliver(&identity, &Payload::new()).await })
        };

        // Give the deliver call a chance to register in the pending map.
        tokio::task::yield_now().await;
        session.close().await;

        assert!(matches!(deliver.await.unwrap(), Err(Error::SessionClosed)));
    }

    #[tokio::test]
    async fn concurrent_sends_reach_the_wire_in_id_order() {
        // Regression test: id assignment and the write it labels must be
        // atomic with respect to other `deliver` callers, or a later-id
        // frame could overtake an earlier one on the wire.
        let (session, mut server) = new_session();
        let session = Arc::new(session);

        let mut handles = Vec::new();
        for i in 0..16u8 {
            let session = session.clone();
            handles.push(tokio::spawn(async move {
                let identity = Identity::from_raw_token(&[i; 32]);
                session.deliver(&identity, &Payload::new()).await
            }));
        }

        let frame_len = 45 + r#"{"aps":{"badge":0}}"#.len();
        let mut buf = vec![0u8; frame_len * 16];
        let mut total = 0;
        while total < buf.len() {
            let n = server.read(&mut buf[total..]).await.unwrap();
            total += n;
        }
        drop(server);

        let mut ids = Vec::new();
        for chunk in buf.chunks(frame_len) {
            ids.push(u32::from_be_bytes([chunk[1], chunk[2], chunk[3], chunk[4]]));
        }
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted, "frames must land on the wire in id order");

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
    }

    #[tokio::test]
    async fn write_failure_fails_every_other_pending_send_and_disarms_future_delivers() {
        let (client, server) = duplex(4096);
        let (events_tx, _) = broadcast::channel(16);
        let (session, mut disconnect) = GatewaySession::new(client, events_tx);
        let session = Arc::new(session);

        let first_identity = Identity::from_raw_token(&[0x01; 32]);
        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.deliver(&first_identity, &Payload::new()).await })
        };
        // Drain the first frame so its write has genuinely succeeded before
        // the connection is severed: only the second send's write should
        // fail.
        let mut buf = [0u8; 128];
        let n = server.read(&mut buf).await.unwrap();
        assert!(n > 0);

        // Sever the connection entirely: the next write will fail outright.
        drop(server);

        let second_identity = Identity::from_raw_token(&[0x02; 32]);
        let second = session.deliver(&second_identity, &Payload::new()).await;
        assert!(matches!(second, Err(Error::TransportError(_))));

        assert!(matches!(
            first.await.unwrap(),
            Err(Error::TransportError(_))
        ));

        assert_eq!(
            disconnect.try_recv().unwrap(),
            DisconnectReason::TransportError
        );

        // The writer is now torn down; further deliveries see NotConnected
        // rather than attempting to write into a dead connection.
        let third_identity = Identity::from_raw_token(&[0x03; 32]);
        let third = session.deliver(&third_identity, &Payload::new()).await;
        assert!(matches!(third, Err(Error::NotConnected)));
    }
}
