//! Order parsing, record derivation, and the per-page pipeline.

#[cfg(test)]
pub(crate) mod fixtures;
pub mod limiter;
pub mod page;
pub mod parser;
pub mod record;

pub use limiter::{ConcurrencyLimiter, DEFAULT_PARSE_CONCURRENCY};
pub use page::{IngestReport, PagePipeline, PageProcessor, ProcessedPage};
pub use parser::{OrderInfo, OrderKind, OrderParser, OrderSide, ParseFailure, ParsedOrder, SeaportParser};
pub use record::{PersistableRecord, RecordSource};
