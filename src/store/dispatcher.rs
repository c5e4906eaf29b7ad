//! Forwards parsed orders to the downstream relay. Failures here are logged
//! and counted but never fail the page that produced the orders.

use crate::market::types::OrderParameters;
use crate::orders::parser::{OrderKind, ParsedOrder};
use crate::runtime::telemetry::Telemetry;
use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayItem {
    pub kind: OrderKind,
    pub data: OrderParameters,
}

impl From<ParsedOrder> for RelayItem {
    fn from(order: ParsedOrder) -> Self {
        Self {
            kind: order.kind(),
            data: order.into_params(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayBatch {
    pub items: Vec<RelayItem>,
    pub prioritized: bool,
}

pub type RelayFuture<'a> = BoxFuture<'a, Result<()>>;

pub trait RelaySink: Send + Sync {
    fn submit(&self, batch: RelayBatch) -> RelayFuture<'_>;
}

/// Relay backed by a bounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelRelay {
    tx: mpsc::Sender<RelayBatch>,
}

impl ChannelRelay {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<RelayBatch>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl RelaySink for ChannelRelay {
    fn submit(&self, batch: RelayBatch) -> RelayFuture<'_> {
        Box::pin(async move {
            self.tx
                .send(batch)
                .await
                .map_err(|_| anyhow!("relay channel closed"))
        })
    }
}

pub struct Dispatcher {
    sink: Arc<dyn RelaySink>,
    telemetry: Arc<Telemetry>,
}

impl Dispatcher {
    pub fn new(sink: Arc<dyn RelaySink>, telemetry: Arc<Telemetry>) -> Self {
        Self { sink, telemetry }
    }

    /// Sends one prioritized batch and returns how many orders were accepted.
    pub async fn forward(&self, parsed: Vec<ParsedOrder>) -> usize {
        if parsed.is_empty() {
            return 0;
        }

        let items: Vec<RelayItem> = parsed.into_iter().map(RelayItem::from).collect();
        let count = items.len();
        let batch = RelayBatch {
            items,
            prioritized: true,
        };

        match self.sink.submit(batch).await {
            Ok(()) => {
                self.telemetry.record_dispatched(count);
                count
            }
            Err(err) => {
                self.telemetry.record_dispatch_failure();
                tracing::warn!(orders = count, error = %err, "failed to relay parsed orders");
                0
            }
        }
    }
}
