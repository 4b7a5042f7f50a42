//! 下载引擎错误类型
//!
//! - `ProbeError`：探测阶段失败，整个下载在任何分片开始前中止
//! - `ChunkError`：单个分片失败，由分片内部重试，耗尽后只记录在结果里
//! - `DownloadError`：调用方看到的错误（含分片汇总后的 `Incomplete`）

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// 传输层错误（连接、发送、读取响应体）
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP 客户端创建失败: {0}")]
    Client(String),

    #[error("发送HTTP请求失败: {0}")]
    Request(String),

    #[error("读取数据流失败: {0}")]
    Body(String),
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("探测请求失败: {0}")]
    Transport(#[from] TransportError),

    #[error("探测失败: 服务器返回状态码 {0} (期望 206 Partial Content)")]
    InvalidResponseStatus(u16),

    #[error("探测响应缺少 Content-Range 头")]
    MissingContentRange,

    #[error("无法解析 Content-Range: {0:?}")]
    MalformedContentRange(String),
}

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("分片响应状态码异常: {0} (期望 206)")]
    UnexpectedStatus(u16),

    #[error("服务器忽略了 Range 请求 (返回 200)，拒绝写入")]
    RangeNotHonored,

    #[error("响应范围与请求不符: 期望起始 {expected}, 实际 {actual:?}")]
    RangeMismatch { expected: u64, actual: String },

    #[error("写入文件失败: {0}")]
    Write(#[from] io::Error),

    #[error("分片下载已被取消")]
    Cancelled,

    #[error("执行单元异常退出，分片未完成")]
    WorkerLost,
}

impl ChunkError {
    /// 是否值得重试
    ///
    /// 200 响应和范围不符属于协议违规，重试也不会改变结果
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChunkError::Transport(_) | ChunkError::UnexpectedStatus(_) | ChunkError::Write(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("下载参数无效: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error("准备目标文件失败 {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(
        "下载不完整: 已写入 {bytes_written}/{expected_bytes} bytes, 失败分片 {failed:?}, 截断分片 {truncated:?}"
    )]
    Incomplete {
        failed: Vec<usize>,
        truncated: Vec<usize>,
        bytes_written: u64,
        expected_bytes: u64,
    },

    #[error("下载在开始前被取消")]
    Aborted,
}
