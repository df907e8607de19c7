//! The feedback session: a periodic, short-lived TLS connection that
//! reads a stream of invalidated-device records.
//!
//! Unlike the gateway session this is stateless across connections: each
//! timer fire opens a fresh connection, reads to EOF, and emits one
//! `identity_removed` event per well-formed record.

use tokio::io::AsyncReadExt;
use tokio::sync::broadcast;

use crate::identity::Identity;
use crate::transport::ApsStream;

/// Reads one feedback stream to completion, emitting an `identity_removed`
/// event (via `events`) for every well-formed 38-byte record.
///
/// A short read that doesn't land on a record boundary is logged and treated
/// as the end of this attempt; it is never propagated to the gateway
/// session, and never panics or retries within the same call. The caller
/// (the timer loop in `client`) is responsible for opening the next
/// connection on the following tick.
pub async fn drain_feedback<S: ApsStream>(mut stream: S, events: &broadcast::Sender<Identity>) {
    loop {
        let mut record = [0u8; 38];
        match read_record(&mut stream, &mut record).await {
            ReadOutcome::Record => {
                if let Some(decoded) = crate::codec::decode_feedback_record(&record) {
                    let _ = events.send(Identity::from_raw_token(&decoded.token));
                } else {
                    tracing::warn!("feedback record had an unexpected token length, dropping it");
                }
            }
            ReadOutcome::CleanEof => return,
            ReadOutcome::ShortRead => {
                tracing::warn!("feedback stream ended mid-record, discarding the remainder");
                return;
            }
        }
    }
}

enum ReadOutcome {
    Record,
    CleanEof,
    ShortRead,
}

/// Fills `record` with exactly 38 bytes, distinguishing "EOF before any byte
/// was read" (the normal termination case) from "EOF partway through a
/// record" (a malformed stream).
async fn read_record<S: ApsStream>(stream: &mut S, record: &mut [u8; 38]) -> ReadOutcome {
    let mut filled = 0;
    while filled < record.len() {
        match stream.read(&mut record[filled..]).await {
            Ok(0) if filled == 0 => return ReadOutcome::CleanEof,
            Ok(0) => return ReadOutcome::ShortRead,
            Ok(n) => filled += n,
            Err(_) => return ReadOutcome::ShortRead,
        }
    }
    ReadOutcome::Record
}
