//! Remote collection access and patch archives

pub mod source;
pub mod retry;
pub mod collection;
pub mod earth_engine;
pub mod patch_record;

pub use source::EmbeddingSource;
pub use retry::{CallContext, CancellationToken, RetryPolicy};
pub use collection::CollectionGateway;
pub use earth_engine::{EarthEngineConfig, EarthEngineSource};
pub use patch_record::{load_data, PatchRecord};
