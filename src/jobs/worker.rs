use crate::jobs::task::{format_timestamp, BackfillTask, TaskOutcome};
use crate::market::client::OrderSource;
use crate::orders::page::PagePipeline;
use crate::runtime::telemetry::Telemetry;
use std::sync::Arc;

/// Executes one backfill task: fetch a single page of the task's window,
/// ingest it, and report how the window should proceed.
pub struct BackfillWorker {
    source: Arc<dyn OrderSource>,
    pipeline: Arc<PagePipeline>,
    page_size: usize,
    telemetry: Arc<Telemetry>,
}

impl BackfillWorker {
    pub fn new(
        source: Arc<dyn OrderSource>,
        pipeline: Arc<PagePipeline>,
        page_size: usize,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            source,
            pipeline,
            page_size,
            telemetry,
        }
    }

    /// Never fails: fetch and persistence errors become a retry that resumes
    /// at the task's own cursor.
    #[tracing::instrument(
        name = "backfill",
        skip_all,
        fields(
            from = %format_timestamp(task.from),
            to = %format_timestamp(task.to),
            cursor = ?task.cursor,
        )
    )]
    pub async fn execute(&self, task: &BackfillTask) -> TaskOutcome {
        let query = task.page_query(self.page_size);

        let page = match self.source.fetch_page(&query).await {
            Ok(page) => page,
            Err(err) => {
                self.telemetry.record_fetch_error();
                tracing::error!(
                    attempts = task.attempts_made,
                    error = %err,
                    "backfill page fetch failed; retrying from the same cursor"
                );
                return TaskOutcome::RetryWithCursor {
                    cursor: task.cursor.clone(),
                };
            }
        };
        self.telemetry.record_page(page.orders.len(), page.malformed);

        let report = match self.pipeline.ingest(&page.orders).await {
            Ok(report) => report,
            Err(err) => {
                tracing::error!(
                    attempts = task.attempts_made,
                    error = %err,
                    "backfill page could not be stored; retrying from the same cursor"
                );
                return TaskOutcome::RetryWithCursor {
                    cursor: task.cursor.clone(),
                };
            }
        };

        tracing::info!(
            received = report.received,
            next = ?page.next,
            "fetched backfill page"
        );
        if report.inserted > 0 {
            tracing::info!(new_listings = report.inserted, "new listings found");
        }
        if task.attempts_made > 0 {
            tracing::info!(attempts = task.attempts_made, "backfill window recovered");
        }

        match page.next {
            Some(cursor) => TaskOutcome::Continue { cursor },
            None => {
                tracing::info!("backfill window completed");
                TaskOutcome::Completed
            }
        }
    }
}
