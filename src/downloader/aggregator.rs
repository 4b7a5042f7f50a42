use crate::downloader::error::{ChunkError, DownloadError};
use crate::downloader::task::ChunkResult;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// 下载最终状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    /// 所有分片成功且写入总量等于资源长度
    Complete,
    /// 有分片失败，或写入总量与资源长度不符
    Incomplete,
    /// 在任何分片开始前中止
    AbortedBeforeStart,
}

/// 重试耗尽的分片
#[derive(Debug)]
pub struct ChunkFailure {
    pub index: usize,
    pub start: u64,
    pub stop: u64,
    pub attempts: u32,
    pub error: ChunkError,
}

/// 返回给调用方的下载结果
#[derive(Debug)]
pub struct DownloadOutcome {
    pub status: DownloadStatus,
    /// 所有分片实际写入的字节总数
    pub total_bytes_written: u64,
    /// 探测得到的资源长度
    pub expected_bytes: u64,
    /// 失败分片（按索引排序）
    pub failed_chunks: Vec<ChunkFailure>,
    /// 请求成功但写入字节数不足的分片索引
    pub truncated_chunks: Vec<usize>,
}

impl DownloadOutcome {
    pub fn aborted(expected_bytes: u64) -> Self {
        Self {
            status: DownloadStatus::AbortedBeforeStart,
            total_bytes_written: 0,
            expected_bytes,
            failed_chunks: Vec::new(),
            truncated_chunks: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == DownloadStatus::Complete
    }

    pub fn failed_indices(&self) -> Vec<usize> {
        self.failed_chunks.iter().map(|f| f.index).collect()
    }

    /// 将非 complete 的结果转换为错误
    pub fn into_result(self) -> Result<Self, DownloadError> {
        match self.status {
            DownloadStatus::Complete => Ok(self),
            DownloadStatus::AbortedBeforeStart => Err(DownloadError::Aborted),
            DownloadStatus::Incomplete => Err(DownloadError::Incomplete {
                failed: self.failed_indices(),
                truncated: self.truncated_chunks,
                bytes_written: self.total_bytes_written,
                expected_bytes: self.expected_bytes,
            }),
        }
    }

    /// 可序列化的报告
    pub fn report(&self) -> OutcomeReport {
        OutcomeReport {
            status: self.status,
            total_bytes_written: self.total_bytes_written,
            expected_bytes: self.expected_bytes,
            failed_chunks: self
                .failed_chunks
                .iter()
                .map(|f| FailedChunkReport {
                    index: f.index,
                    start: f.start,
                    stop: f.stop,
                    attempts: f.attempts,
                    error: f.error.to_string(),
                })
                .collect(),
            truncated_chunks: self.truncated_chunks.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OutcomeReport {
    pub status: DownloadStatus,
    pub total_bytes_written: u64,
    pub expected_bytes: u64,
    pub failed_chunks: Vec<FailedChunkReport>,
    pub truncated_chunks: Vec<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedChunkReport {
    pub index: usize,
    pub start: u64,
    pub stop: u64,
    pub attempts: u32,
    pub error: String,
}

/// 汇总分片结果，只负责报告，不做重试
#[derive(Debug)]
pub struct Aggregator {
    expected_bytes: u64,
    results: BTreeMap<usize, ChunkResult>,
}

impl Aggregator {
    pub fn new(expected_bytes: u64) -> Self {
        Self {
            expected_bytes,
            results: BTreeMap::new(),
        }
    }

    /// 记录一个分片结果，同一分片的重复结果会被忽略
    pub fn record(&mut self, result: ChunkResult) {
        if self.results.contains_key(&result.index) {
            warn!("分片 #{} 的结果重复上报，已忽略", result.index);
            return;
        }
        self.results.insert(result.index, result);
    }

    pub fn recorded(&self) -> usize {
        self.results.len()
    }

    pub fn finish(self) -> DownloadOutcome {
        let mut total_bytes_written = 0u64;
        let mut failed_chunks = Vec::new();
        let mut truncated_chunks = Vec::new();

        for (index, result) in self.results {
            total_bytes_written += result.bytes_written;
            if result.is_success() {
                if result.bytes_written != result.expected_len() {
                    truncated_chunks.push(index);
                }
                continue;
            }
            failed_chunks.push(ChunkFailure {
                index,
                start: result.start,
                stop: result.stop,
                attempts: result.attempts,
                error: result.last_error.unwrap_or(ChunkError::WorkerLost),
            });
        }

        let status = if failed_chunks.is_empty()
            && truncated_chunks.is_empty()
            && total_bytes_written == self.expected_bytes
        {
            DownloadStatus::Complete
        } else {
            DownloadStatus::Incomplete
        };

        if status == DownloadStatus::Complete {
            info!("✅ 下载完成: {} bytes", total_bytes_written);
        } else {
            warn!(
                "下载不完整: 写入 {}/{} bytes, 失败分片 {:?}, 截断分片 {:?}",
                total_bytes_written,
                self.expected_bytes,
                failed_chunks.iter().map(|f| f.index).collect::<Vec<_>>(),
                truncated_chunks
            );
        }

        DownloadOutcome {
            status,
            total_bytes_written,
            expected_bytes: self.expected_bytes,
            failed_chunks,
            truncated_chunks,
        }
    }
}
