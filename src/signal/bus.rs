// src/signal/bus.rs

//! Run-scoped pub/sub channel for coordination signals.
//!
//! One broadcast channel per run id. Publishing is non-blocking and
//! best-effort: a signal published with no live subscribers is dropped.
//! Signals from one publisher reach one subscriber in publish order; no
//! cross-publisher ordering is guaranteed.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::errors::{LightflowError, Result};
use crate::signal::{QueryReply, Signal, SignalBody};
use crate::types::RunId;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
pub struct SignalBus {
    channels: Mutex<HashMap<RunId, broadcast::Sender<Signal>>>,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, run_id: RunId) -> broadcast::Sender<Signal> {
        let mut channels = self.channels.lock().unwrap();
        channels
            .entry(run_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Publish a signal to current subscribers of its run channel.
    ///
    /// Best-effort: with no subscribers the signal is dropped.
    pub fn publish(&self, signal: Signal) {
        debug!(
            run_id = %signal.run_id,
            kind = signal.kind(),
            "publishing signal"
        );
        let _ = self.sender(signal.run_id).send(signal);
    }

    /// Subscribe to a run's channel.
    ///
    /// The channel is created lazily, so subscribing before the run starts
    /// is fine. The stream ends once the channel is closed and drained.
    pub fn subscribe(&self, run_id: RunId) -> SignalStream {
        SignalStream {
            rx: self.sender(run_id).subscribe(),
        }
    }

    /// Close a run's channel. Subscribers see the end of their stream after
    /// draining buffered signals.
    pub fn close_run(&self, run_id: RunId) {
        let mut channels = self.channels.lock().unwrap();
        if channels.remove(&run_id).is_some() {
            debug!(run_id = %run_id, "closed signal channel");
        }
    }

    /// Publish a signal and await the one `query-reply` carrying its
    /// correlation id.
    pub async fn request(
        &self,
        run_id: RunId,
        body: SignalBody,
        timeout: Duration,
    ) -> Result<QueryReply> {
        let kind = body.kind();

        // Subscribe before publishing so the reply cannot slip past us.
        let mut stream = self.subscribe(run_id);
        let signal = Signal::of(run_id, body);
        let correlation_id = signal.correlation_id;
        self.publish(signal);

        let wait = async {
            while let Some(signal) = stream.recv().await {
                if signal.correlation_id != correlation_id {
                    continue;
                }
                if let SignalBody::QueryReply(reply) = signal.body {
                    return Some(reply);
                }
            }
            None
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(LightflowError::SignalUnavailable(format!(
                "channel for run {} closed while awaiting reply to '{}'",
                run_id, kind
            ))),
            Err(_) => Err(LightflowError::Timeout(format!(
                "reply to '{}' on run {}",
                kind, run_id
            ))),
        }
    }
}

/// Lazy stream of signals for one run.
pub struct SignalStream {
    rx: broadcast::Receiver<Signal>,
}

impl SignalStream {
    /// Next signal, or `None` once the run channel is closed.
    ///
    /// A slow subscriber that lags behind the channel capacity loses the
    /// overwritten signals; coordination state must be re-derived from later
    /// signals, never assumed complete.
    pub async fn recv(&mut self) -> Option<Signal> {
        loop {
            match self.rx.recv().await {
                Ok(signal) => return Some(signal),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "signal subscriber lagged; skipping missed signals");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
