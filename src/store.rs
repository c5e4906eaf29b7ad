//! Order persistence and downstream relay.

pub mod dispatcher;
pub mod persister;

pub use dispatcher::{ChannelRelay, Dispatcher, RelayBatch, RelayItem, RelaySink};
pub use persister::{Persister, SqlitePersister, StoredOrder};
