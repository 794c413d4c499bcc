// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 限时执行器
//!
//! 在独立的命名线程上执行一段工作，调用方在容量为 0 的完成通道上等待，
//! 直到工作完成或者截止时间到达。
//!
//! 超时后线程不会被终止，它可能继续运行；取消令牌只是一个建议，
//! 工作需要自己检查。超时的响应会被替换为超时提示并封存，之后线程对响应的写入全部被丢弃。
//! 仍在运行的超时任务数可以通过 [`BoundedExecutor::abandoned`] 查询。

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, warn};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::exception::Exception;
use crate::session::SessionCell;
use crate::writer::ResponseWriter;

const RUNNING: u8 = 0;
const FINISHED: u8 = 1;
const ABANDONED: u8 = 2;

/// 一次限时执行的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundedOutcome {
    /// 工作在截止时间前完成
    Completed,
    /// 截止时间先到，响应已被替换为超时提示
    TimedOut,
    /// 工作线程没有发出完成信号就结束了（panic 越过了工作内部的恢复）
    Abandoned,
}

/// 工作线程退出时更新任务状态，正常返回与 panic 都会经过这里
struct FinishGuard {
    state: Arc<AtomicU8>,
    abandoned: Arc<AtomicUsize>,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        let finished = self
            .state
            .compare_exchange(RUNNING, FINISHED, Ordering::SeqCst, Ordering::SeqCst);
        if finished.is_err() {
            // 调用方已经放弃了这个任务
            self.abandoned.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

pub struct BoundedExecutor {
    max_response_time: Duration,
    timeout_message: String,
    session_address: String,
    session_timeout: Duration,
    session: Arc<SessionCell>,
    abandoned: Arc<AtomicUsize>,
}

impl BoundedExecutor {
    pub fn new(config: &Config) -> Self {
        Self::with_session(config, Arc::new(SessionCell::new()))
    }

    pub fn with_session(config: &Config, session: Arc<SessionCell>) -> Self {
        Self {
            max_response_time: config.max_response_time(),
            timeout_message: config.timeout_message().to_string(),
            session_address: config.session_address().to_string(),
            session_timeout: config.session_connect_timeout(),
            session,
            abandoned: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn session(&self) -> &Arc<SessionCell> {
        &self.session
    }

    pub fn max_response_time(&self) -> Duration {
        self.max_response_time
    }

    /// 已超时但仍在运行的任务数
    pub fn abandoned(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }

    /// 限时执行 `work`。
    ///
    /// 截止时间默认取配置的最长响应时间，`custom_timeout` 可以覆盖。
    /// 第一次调用时会连接会话存储，连接失败时进程退出。
    pub fn run_bounded<F>(
        &self,
        id: u128,
        w: &ResponseWriter,
        custom_timeout: Option<Duration>,
        work: F,
    ) -> Result<BoundedOutcome, Exception>
    where
        F: FnOnce(CancellationToken) + Send + 'static,
    {
        self.session
            .get_or_connect(&self.session_address, self.session_timeout);

        let deadline = custom_timeout.unwrap_or(self.max_response_time);
        let token = CancellationToken::new();
        let state = Arc::new(AtomicU8::new(RUNNING));
        let (done_tx, done_rx) = mpsc::sync_channel::<()>(0);

        let guard = FinishGuard {
            state: Arc::clone(&state),
            abandoned: Arc::clone(&self.abandoned),
        };
        let worker_token = token.clone();
        let start = Instant::now();
        thread::Builder::new()
            .name(format!("bounded-{}", id))
            .spawn(move || {
                work(worker_token);
                drop(guard);
                // 调用方已经返回时接收端被丢弃，发送立即失败
                let _ = done_tx.send(());
            })
            .map_err(|e| Exception::Spawn(e.to_string()))?;

        let outcome = match done_rx.recv_timeout(deadline) {
            Ok(()) => {
                debug!("[ID{}]限时任务在{}ms内完成", id, start.elapsed().as_millis());
                BoundedOutcome::Completed
            }
            Err(RecvTimeoutError::Timeout) => {
                self.abandoned.fetch_add(1, Ordering::SeqCst);
                let gave_up = state
                    .compare_exchange(RUNNING, ABANDONED, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok();
                if gave_up {
                    warn!(
                        "[ID{}]{}，后台任务继续运行（当前{}个）",
                        id,
                        Exception::Timeout(deadline),
                        self.abandoned()
                    );
                    w.replace_and_seal(&self.timeout_message);
                    BoundedOutcome::TimedOut
                } else {
                    // 工作恰好在截止时刻完成
                    self.abandoned.fetch_sub(1, Ordering::SeqCst);
                    BoundedOutcome::Completed
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                error!("[ID{}]限时任务没有发出完成信号就退出了", id);
                BoundedOutcome::Abandoned
            }
        };
        token.cancel();
        Ok(outcome)
    }
}
