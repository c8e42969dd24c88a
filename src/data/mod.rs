mod batch;
mod provider;
mod record;
mod shard;

pub use batch::Batch;
pub use provider::{BatchStream, DataProvider, Split};
pub use record::{Record, RecordDims};
pub use shard::{shard, shard_range};
