use crate::downloader::error::ChunkError;
use crate::downloader::task::{ChunkResult, ChunkTask};
use crate::downloader::worker::{ChunkWorker, SharedConfig};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// 固定大小的执行单元池
///
/// 每个执行单元从共享队列取一个分片，执行到底（含重试）再取下一个。
/// `run_to_completion` 只在所有执行单元退出后返回，每个分片恰好产生一个结果。
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        Self { size: size.max(1) }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub async fn run_to_completion(
        &self,
        tasks: Vec<ChunkTask>,
        shared: Arc<SharedConfig>,
    ) -> Vec<ChunkResult> {
        let total = tasks.len();
        if total == 0 {
            return Vec::new();
        }

        // 保留一份任务副本，用于补齐异常退出的执行单元丢失的结果
        let submitted = tasks.clone();
        let queue = Arc::new(Mutex::new(VecDeque::from(tasks)));
        let (tx, mut rx) = mpsc::unbounded_channel::<ChunkResult>();

        let unit_count = self.size.min(total);
        info!("启动 {} 个执行单元处理 {} 个分片", unit_count, total);

        // 取消时关闭闸门，仍在等待许可的分片立即结束
        let closer = {
            let gate = shared.gate.clone();
            let token = shared.cancellation.clone();
            tokio::spawn(async move {
                token.cancelled().await;
                gate.close();
            })
        };

        let mut handles = Vec::with_capacity(unit_count);
        for worker_id in 1..=unit_count {
            let queue = queue.clone();
            let shared = shared.clone();
            let tx = tx.clone();

            let handle = tokio::spawn(async move {
                let worker = ChunkWorker::new(worker_id, &shared);
                loop {
                    let next = queue.lock().pop_front();
                    let Some(task) = next else {
                        break;
                    };
                    let result = worker.run(task).await;
                    if tx.send(result).is_err() {
                        break;
                    }
                }
                debug!("[执行单元{}] 队列已空，退出", worker_id);
            });
            handles.push(handle);
        }
        drop(tx);

        // 汇合屏障：等待所有执行单元退出
        for handle in handles {
            if let Err(e) = handle.await {
                error!("执行单元异常退出: {}", e);
            }
        }

        closer.abort();

        let mut results = Vec::with_capacity(total);
        while let Ok(result) = rx.try_recv() {
            results.push(result);
        }

        if results.len() < total {
            let reported: HashSet<usize> = results.iter().map(|r| r.index).collect();
            for task in submitted.iter().filter(|t| !reported.contains(&t.index)) {
                error!("分片 #{} 没有结果，记为失败", task.index);
                results.push(ChunkResult::failed(task, 0, ChunkError::WorkerLost));
            }
        }

        results
    }
}
