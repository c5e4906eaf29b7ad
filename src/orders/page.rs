//! Per-page processing shared by tip sync and backfill: parse every listing
//! under a concurrency cap, persist one record per listing, then relay the
//! orders that parsed.

use crate::market::types::RawOrder;
use crate::orders::limiter::ConcurrencyLimiter;
use crate::orders::parser::{OrderParser, ParsedOrder};
use crate::orders::record::{PersistableRecord, RecordSource};
use crate::runtime::telemetry::Telemetry;
use crate::store::dispatcher::Dispatcher;
use crate::store::persister::Persister;
use anyhow::{Context, Result};
use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct ProcessedPage {
    /// One record per input order, regardless of parse outcome.
    pub records: Vec<PersistableRecord>,
    pub parsed: Vec<ParsedOrder>,
    pub parse_failures: usize,
}

pub struct PageProcessor {
    parser: Arc<dyn OrderParser>,
    limiter: ConcurrencyLimiter,
    source: RecordSource,
}

impl PageProcessor {
    pub fn new(parser: Arc<dyn OrderParser>, limiter: ConcurrencyLimiter) -> Self {
        Self {
            parser,
            limiter,
            source: RecordSource::OpenSea,
        }
    }

    pub async fn process(&self, orders: &[RawOrder]) -> ProcessedPage {
        let parser = self.parser.as_ref();
        let source = self.source;

        let futures: Vec<BoxFuture<'_, (PersistableRecord, Option<ParsedOrder>)>> = orders
            .iter()
            .map(|raw| {
                async move {
                    let parsed = match parser.parse(raw).await {
                        Ok(parsed) => Some(parsed),
                        Err(failure) => {
                            tracing::debug!(
                                hash = raw.hash(),
                                reason = %failure,
                                "order failed to parse; storing raw record"
                            );
                            None
                        }
                    };
                    let record = PersistableRecord::derive(raw, parsed.as_ref(), source);
                    (record, parsed)
                }
                .boxed()
            })
            .collect();
        let outcomes = self.limiter.run(futures).await;

        let mut page = ProcessedPage {
            records: Vec::with_capacity(outcomes.len()),
            ..ProcessedPage::default()
        };
        for (record, parsed) in outcomes {
            page.records.push(record);
            match parsed {
                Some(order) => page.parsed.push(order),
                None => page.parse_failures += 1,
            }
        }
        page
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub received: usize,
    pub parsed: usize,
    pub parse_failures: usize,
    pub inserted: usize,
    pub dispatched: usize,
}

/// Process, persist, then dispatch one page of orders.
pub struct PagePipeline {
    processor: PageProcessor,
    persister: Arc<dyn Persister>,
    dispatcher: Dispatcher,
    telemetry: Arc<Telemetry>,
}

impl PagePipeline {
    pub fn new(
        processor: PageProcessor,
        persister: Arc<dyn Persister>,
        dispatcher: Dispatcher,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            processor,
            persister,
            dispatcher,
            telemetry,
        }
    }

    /// Fails only when persistence fails; dispatch problems are absorbed.
    pub async fn ingest(&self, orders: &[RawOrder]) -> Result<IngestReport> {
        let processed = self.processor.process(orders).await;
        self.telemetry
            .record_parse_failures(processed.parse_failures);

        let inserted = self
            .persister
            .upsert(&processed.records)
            .await
            .context("failed to persist order page")?;
        self.telemetry.record_inserted(inserted.len());

        let parsed = processed.parsed.len();
        let dispatched = self.dispatcher.forward(processed.parsed).await;

        Ok(IngestReport {
            received: orders.len(),
            parsed,
            parse_failures: processed.parse_failures,
            inserted: inserted.len(),
            dispatched,
        })
    }
}
