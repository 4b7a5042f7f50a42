pub mod aggregator;
pub mod chunk;
pub mod engine;
pub mod error;
pub mod gate;
pub mod pool;
pub mod probe;
pub mod task;
pub mod transport;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use aggregator::{Aggregator, ChunkFailure, DownloadOutcome, DownloadStatus, OutcomeReport};
pub use chunk::{plan_chunks, DEFAULT_CHUNK_SIZE};
pub use engine::{download, DownloadEngine};
pub use error::{ChunkError, DownloadError, ProbeError, TransportError};
pub use gate::{ConcurrencyGate, GatePermit};
pub use pool::WorkerPool;
pub use probe::{probe_resource, ContentRange};
pub use task::{
    ByteRange, ChunkResult, ChunkStatus, ChunkTask, DownloadRequest, RequestHeaders,
    ResourceDescriptor,
};
pub use transport::{RangeResponse, RangeTransport, ReqwestTransport};
pub use worker::{ChunkWorker, SharedConfig};
