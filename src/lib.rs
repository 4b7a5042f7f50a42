// rangefetch
// 基于 HTTP Range 请求的并发分片下载库

// 配置管理模块
pub mod config;

// 下载引擎模块
pub mod downloader;

// 日志模块
pub mod logging;

// 导出常用类型
pub use config::{AppConfig, DownloadConfig, LogConfig};
pub use downloader::{
    download, DownloadEngine, DownloadError, DownloadOutcome, DownloadRequest, DownloadStatus,
    OutcomeReport, RequestHeaders,
};
