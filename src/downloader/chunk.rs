use crate::downloader::task::ChunkTask;
use std::num::NonZeroU64;
use tracing::info;

/// 默认分片大小: 8MB
pub const DEFAULT_CHUNK_SIZE: u64 = 8 * 1024 * 1024;

/// 将 `[0, length)` 切分为固定大小的分片
///
/// 每个分片为闭区间 `[start, min(start + chunk_size - 1, length - 1)]`，
/// 分片数 = `ceil(length / chunk_size)`，`length == 0` 时不产生分片
pub fn plan_chunks(length: u64, chunk_size: NonZeroU64) -> Vec<ChunkTask> {
    let chunk_size = chunk_size.get();
    let count = length.div_ceil(chunk_size);
    let mut chunks = Vec::with_capacity(usize::try_from(count).unwrap_or(0));

    let mut start = 0u64;
    let mut index = 0usize;
    while start < length {
        let stop = start.saturating_add(chunk_size - 1).min(length - 1);
        chunks.push(ChunkTask::new(index, start, stop));
        start = stop + 1;
        index += 1;
    }

    info!(
        "分片规划完成: 文件大小={} bytes, 分片大小={} bytes, 分片数量={}",
        length,
        chunk_size,
        chunks.len()
    );

    chunks
}
