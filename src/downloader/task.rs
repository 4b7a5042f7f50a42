use crate::downloader::error::{ChunkError, DownloadError};
use std::num::NonZeroU64;
use std::path::PathBuf;

/// 闭区间字节范围 `[start, stop]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub stop: u64,
}

impl ByteRange {
    pub fn new(start: u64, stop: u64) -> Self {
        Self { start, stop }
    }

    /// 区间包含的字节数
    pub fn len(&self) -> u64 {
        self.stop - self.start + 1
    }

    /// `Range` 请求头的值，如 `bytes=0-1023`
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.stop)
    }
}

/// 附加请求头（保持顺序，允许同名重复）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHeaders(Vec<(String, String)>);

impl RequestHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// 解析 `Name: Value` 形式的请求头
    pub fn push_line(&mut self, line: &str) -> Result<(), DownloadError> {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| DownloadError::InvalidRequest(format!("请求头格式错误: {}", line)))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(DownloadError::InvalidRequest(format!(
                "请求头名称为空: {}",
                line
            )));
        }
        self.push(name, value.trim());
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for RequestHeaders {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// 一次下载的全部输入，下载期间不可变
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    /// 资源地址
    pub url: String,
    /// 目标文件路径（相对路径基于当前工作目录）
    pub destination: PathBuf,
    /// 附加请求头
    pub headers: RequestHeaders,
    /// 分片大小（字节）
    pub chunk_size: u64,
    /// 最大并发数（执行单元数 = 文件句柄上限）
    pub max_workers: usize,
    /// 单个分片的最大重试次数
    pub max_retries: u32,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
            headers: RequestHeaders::new(),
            chunk_size: crate::config::DEFAULT_CHUNK_SIZE,
            max_workers: crate::config::DEFAULT_MAX_WORKERS,
            max_retries: crate::config::DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_headers(mut self, headers: RequestHeaders) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// 校验请求参数，返回非零分片大小
    pub fn validate(&self) -> Result<NonZeroU64, DownloadError> {
        if self.url.trim().is_empty() {
            return Err(DownloadError::InvalidRequest("URL 不能为空".to_string()));
        }
        if self.max_workers == 0 {
            return Err(DownloadError::InvalidRequest(
                "最大并发数必须大于 0".to_string(),
            ));
        }
        NonZeroU64::new(self.chunk_size)
            .ok_or_else(|| DownloadError::InvalidRequest("分片大小必须大于 0".to_string()))
    }
}

/// 探测得到的资源描述，只读
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceDescriptor {
    /// 资源总长度（字节）
    pub total_length: u64,
    /// 服务器是否确认支持 Range
    pub range_supported: bool,
}

/// 分片任务
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkTask {
    /// 分片索引（从 0 开始，与起始偏移同序）
    pub index: usize,
    /// 起始偏移（含）
    pub start: u64,
    /// 结束偏移（含）
    pub stop: u64,
    /// 已重试次数
    pub attempt: u32,
}

impl ChunkTask {
    pub fn new(index: usize, start: u64, stop: u64) -> Self {
        Self {
            index,
            start,
            stop,
            attempt: 0,
        }
    }

    pub fn byte_range(&self) -> ByteRange {
        ByteRange::new(self.start, self.stop)
    }

    /// 分片应写入的字节数
    pub fn len(&self) -> u64 {
        self.byte_range().len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    Succeeded,
    /// 重试耗尽或遇到不可重试错误
    Failed,
}

/// 单个分片的最终结果，每个分片恰好产生一次
#[derive(Debug)]
pub struct ChunkResult {
    pub index: usize,
    pub start: u64,
    pub stop: u64,
    /// 最后一次尝试实际写入的字节数
    pub bytes_written: u64,
    /// 总尝试次数（含首次）
    pub attempts: u32,
    pub status: ChunkStatus,
    pub last_error: Option<ChunkError>,
}

impl ChunkResult {
    pub fn succeeded(task: &ChunkTask, bytes_written: u64) -> Self {
        Self {
            index: task.index,
            start: task.start,
            stop: task.stop,
            bytes_written,
            attempts: task.attempt + 1,
            status: ChunkStatus::Succeeded,
            last_error: None,
        }
    }

    pub fn failed(task: &ChunkTask, bytes_written: u64, error: ChunkError) -> Self {
        Self {
            index: task.index,
            start: task.start,
            stop: task.stop,
            bytes_written,
            attempts: task.attempt + 1,
            status: ChunkStatus::Failed,
            last_error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ChunkStatus::Succeeded
    }

    /// 分片应写入的字节数
    pub fn expected_len(&self) -> u64 {
        self.stop - self.start + 1
    }
}
