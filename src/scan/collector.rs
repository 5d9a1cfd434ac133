//! Stream collector tasks
//!
//! One pump task per subscription. Each pump: check the cancellation signal,
//! receive one item, decode it, push it into the shared distribution queue.
//! End-of-stream is a normal terminal condition; any other transport error is
//! forwarded to the error queue and the pump exits. A pump failing never
//! halts its sibling.
//!
//! The distribution queue has capacity 1 on purpose: a slow consumer
//! suspends the collectors, which in turn throttles the transport.

use futures_util::{Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tonic::Status;

use super::record::{Record, RecordError};
use crate::metrics::{RECORDS_DROPPED, RECORDS_RECEIVED};

/// A decoded record tagged with its originating stream.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    Alert(Record),
    Log(Record),
}

/// A transport-level collector failure, reported but never fatal to the
/// other collector.
#[derive(Debug)]
pub struct CollectorError {
    pub stream: &'static str,
    pub status: Status,
}

impl std::fmt::Display for CollectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} stream failed: {}", self.stream, self.status)
    }
}

impl std::error::Error for CollectorError {}

/// Pump one subscription into the distribution queue until it ends.
///
/// # Arguments
/// * `stream` - the subscription (tonic `Streaming` or a test stream)
/// * `stream_name` - "alert" or "log", used for metrics and error reports
/// * `decode` - wire message to `Record` conversion
/// * `wrap` - tags the record as [`ScanEvent::Alert`] or [`ScanEvent::Log`]
/// * `tx` - distribution queue (capacity 1, backpressure by design)
/// * `err_tx` - shared error-reporting queue
/// * `cancel` - cooperative cancellation signal, checked before each receive
pub async fn pump_stream<T, S, D>(
    mut stream: S,
    stream_name: &'static str,
    decode: D,
    wrap: fn(Record) -> ScanEvent,
    tx: mpsc::Sender<ScanEvent>,
    err_tx: mpsc::Sender<CollectorError>,
    mut cancel: watch::Receiver<bool>,
) where
    S: Stream<Item = Result<T, Status>> + Unpin,
    D: Fn(T) -> Result<Record, RecordError>,
{
    loop {
        if *cancel.borrow() {
            tracing::debug!(stream = stream_name, "collector cancelled");
            break;
        }

        let item = tokio::select! {
            _ = cancel.changed() => {
                tracing::debug!(stream = stream_name, "collector cancelled");
                break;
            }
            item = stream.next() => item,
        };

        match item {
            Some(Ok(msg)) => match decode(msg) {
                Ok(record) => {
                    RECORDS_RECEIVED.with_label_values(&[stream_name]).inc();
                    // The consumer dropping its receiver ends the session.
                    if tx.send(wrap(record)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    RECORDS_DROPPED.with_label_values(&["decode"]).inc();
                    tracing::warn!(stream = stream_name, error = %e, "dropping undecodable record");
                }
            },
            // End-of-stream is terminal, not an error. Looping here would
            // busy-spin on a closed transport.
            None => {
                tracing::info!(stream = stream_name, "stream ended");
                break;
            }
            Some(Err(status)) => {
                let _ = err_tx.send(CollectorError { stream: stream_name, status }).await;
                break;
            }
        }
    }
}

/// Spawn the task draining the shared error queue.
///
/// Every reported error is logged; none of them halts the pipeline. Returns
/// the number of errors seen, for the session summary.
pub fn spawn_error_reporter(mut rx: mpsc::Receiver<CollectorError>) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut seen = 0usize;
        while let Some(err) = rx.recv().await {
            seen += 1;
            tracing::error!(stream = err.stream, status = %err.status, "collector error");
        }
        seen
    })
}
