use anyhow::{Context, Result};
use clap::Parser;
use rangefetch::config::{self, AppConfig, DEFAULT_CONFIG_PATH};
use rangefetch::{logging, DownloadEngine, DownloadOutcome, DownloadStatus, RequestHeaders};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};

/// 通过 HTTP Range 请求并发分片下载单个资源
#[derive(Parser, Debug)]
#[command(name = "rangefetch", version, about)]
struct Cli {
    /// 资源 URL
    url: String,

    /// 保存路径
    #[arg(short, long)]
    output: PathBuf,

    /// 配置文件路径（默认 config/app.toml，不存在时使用默认值）
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 并发数（同时打开的连接/文件句柄数）
    #[arg(short, long)]
    workers: Option<usize>,

    /// 分片大小，支持 K/M/G 后缀，例如 16M
    #[arg(long, value_parser = parse_chunk_size)]
    chunk_size: Option<u64>,

    /// 单个分片最大重试次数
    #[arg(short = 'r', long)]
    retries: Option<u32>,

    /// 额外请求头，格式 'Name: Value'，可重复
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// 以 JSON 输出下载结果
    #[arg(long)]
    json: bool,

    /// 输出调试日志
    #[arg(short, long)]
    verbose: bool,
}

fn parse_chunk_size(value: &str) -> Result<u64, String> {
    config::parse_size(value).map_err(|e| e.to_string())
}

/// 加载配置并应用命令行覆盖
async fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut app_config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path)
            .await
            .with_context(|| format!("加载配置文件失败: {:?}", path))?,
        None => AppConfig::load_or_default(DEFAULT_CONFIG_PATH).await,
    };

    let download = &mut app_config.download;
    if let Some(workers) = cli.workers {
        download.max_workers = workers;
    }
    if let Some(chunk_size) = cli.chunk_size {
        download.chunk_size = chunk_size;
    }
    if let Some(retries) = cli.retries {
        download.max_retries = retries;
    }
    download.validate().context("命令行参数无效")?;

    Ok(app_config)
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit])
    }
}

fn print_summary(outcome: &DownloadOutcome, json: bool) -> Result<()> {
    if json {
        let report = serde_json::to_string_pretty(&outcome.report())
            .context("序列化下载结果失败")?;
        println!("{}", report);
        return Ok(());
    }

    match outcome.status {
        DownloadStatus::Complete => println!(
            "下载完成: {} ({} bytes)",
            format_size(outcome.total_bytes_written),
            outcome.total_bytes_written
        ),
        DownloadStatus::Incomplete => {
            println!(
                "下载不完整: {} / {}",
                format_size(outcome.total_bytes_written),
                format_size(outcome.expected_bytes)
            );
            for failure in &outcome.failed_chunks {
                println!(
                    "  分片 #{} [{}-{}] 尝试 {} 次后失败: {}",
                    failure.index, failure.start, failure.stop, failure.attempts, failure.error
                );
            }
            if !outcome.truncated_chunks.is_empty() {
                println!("  数据不足的分片: {:?}", outcome.truncated_chunks);
            }
        }
        DownloadStatus::AbortedBeforeStart => println!("下载在开始前被取消"),
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let app_config = load_config(&cli).await?;

    // 必须保持 _log_guard 存活
    let _log_guard = logging::init_logging(&app_config.log, cli.verbose);

    info!("rangefetch v{} 启动", env!("CARGO_PKG_VERSION"));

    let mut headers = RequestHeaders::new();
    for line in &cli.headers {
        headers
            .push_line(line)
            .with_context(|| format!("无效的请求头: {}", line))?;
    }

    let engine = DownloadEngine::from_config(&app_config.download)
        .context("创建下载引擎失败")?;

    // Ctrl-C 在重试边界取消，进行中的分片会先完成
    let token = engine.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，正在取消下载...");
            token.cancel();
        }
    });

    let request = app_config
        .download
        .request_for(&cli.url, &cli.output)
        .with_headers(headers);

    let outcome = engine.download(&request).await?;
    print_summary(&outcome, cli.json)?;

    Ok(ExitCode::from(exit_status(outcome.status)))
}

/// 进程退出码：0 完成，2 未完成（含开始前被取消），1 留给错误
fn exit_status(status: DownloadStatus) -> u8 {
    match status {
        DownloadStatus::Complete => 0,
        DownloadStatus::Incomplete | DownloadStatus::AbortedBeforeStart => 2,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("错误: {:#}", e);
            ExitCode::from(1)
        }
    }
}
