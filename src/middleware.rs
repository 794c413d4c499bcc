// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 中间件链
//!
//! 每个阶段包裹下一个阶段，最先追加的阶段位于最外层。标准顺序为：
//!
//! 1. [`RecoverHandler`]：最靠近传输层，把越过内层的 panic 转换为 500。
//! 2. [`LoggingHandler`]：记录方法、路径与耗时。
//! 3. [`InitHandler`]：在限时执行器中运行剩余的链，并在后台任务内部再做一次恢复。
//!
//! 每个恢复点都会记录 panic 信息与请求描述，丢弃已写的部分响应，再通过错误展示器输出 500。

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info};
use tokio_util::sync::CancellationToken;

use crate::config;
use crate::exception::Exception;
use crate::executor::{BoundedExecutor, BoundedOutcome};
use crate::param::status_text;
use crate::presenter::{recover_view_data, ErrorPresenter};
use crate::request::Request;
use crate::translate::Translator;
use crate::util::panic_message;
use crate::writer::ResponseWriter;

/// 请求级上下文：请求 ID、翻译器与取消令牌
#[derive(Debug, Clone)]
pub struct Context {
    id: u128,
    translator: Option<Arc<dyn Translator>>,
    cancel: CancellationToken,
}

impl Context {
    pub fn new(id: u128) -> Self {
        Self {
            id,
            translator: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = Some(translator);
        self
    }

    /// 换上限时任务自己的取消令牌
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn id(&self) -> u128 {
        self.id
    }

    pub fn translator(&self) -> Option<&Arc<dyn Translator>> {
        self.translator.as_ref()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

pub trait Handler: Send + Sync {
    fn serve(&self, ctx: &Context, w: &ResponseWriter, r: &Request);
}

impl<F> Handler for F
where
    F: Fn(&Context, &ResponseWriter, &Request) + Send + Sync,
{
    fn serve(&self, ctx: &Context, w: &ResponseWriter, r: &Request) {
        self(ctx, w, r)
    }
}

type Constructor = Box<dyn FnOnce(Arc<dyn Handler>) -> Arc<dyn Handler> + Send>;

/// 中间件链的构造器
#[derive(Default)]
pub struct Chain {
    constructors: Vec<Constructor>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个阶段，先追加的阶段位于外层
    pub fn append<C>(mut self, constructor: C) -> Self
    where
        C: FnOnce(Arc<dyn Handler>) -> Arc<dyn Handler> + Send + 'static,
    {
        self.constructors.push(Box::new(constructor));
        self
    }

    /// 以 `terminal` 作为最内层，生成完整的处理器
    pub fn then(self, terminal: Arc<dyn Handler>) -> Arc<dyn Handler> {
        self.constructors
            .into_iter()
            .rev()
            .fold(terminal, |next, constructor| constructor(next))
    }

    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }
}

/// 恢复点的公共逻辑：记录 panic，丢弃部分响应，输出 500
pub(crate) fn present_panic(
    presenter: &ErrorPresenter,
    source: &str,
    ctx: &Context,
    w: &ResponseWriter,
    r: &Request,
    payload: Box<dyn Any + Send>,
) {
    let panic = panic_message(payload.as_ref());
    let outcome = recover_view_data(ctx.id(), source, r, &panic, false);
    w.reset();
    let presented = panic::catch_unwind(AssertUnwindSafe(|| {
        presenter.present(ctx, outcome.context, outcome.error.as_ref(), w)
    }));
    if presented.is_err() {
        error!("[ID{}]展示错误页时再次发生panic，输出纯文本500", ctx.id());
        w.reset();
        w.error(status_text(500), 500);
    }
}

/// 最外层的 panic 恢复
pub struct RecoverHandler {
    next: Arc<dyn Handler>,
    presenter: Arc<ErrorPresenter>,
}

impl RecoverHandler {
    pub fn new(next: Arc<dyn Handler>, presenter: Arc<ErrorPresenter>) -> Self {
        Self { next, presenter }
    }

    pub fn layer(
        presenter: Arc<ErrorPresenter>,
    ) -> impl FnOnce(Arc<dyn Handler>) -> Arc<dyn Handler> + Send + 'static {
        move |next| Arc::new(Self::new(next, presenter)) as Arc<dyn Handler>
    }
}

impl Handler for RecoverHandler {
    fn serve(&self, ctx: &Context, w: &ResponseWriter, r: &Request) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.next.serve(ctx, w, r)));
        if let Err(payload) = result {
            present_panic(&self.presenter, "RecoverHandler", ctx, w, r, payload);
        }
    }
}

/// 记录请求的开始与结束
pub struct LoggingHandler {
    next: Arc<dyn Handler>,
}

impl LoggingHandler {
    pub fn new(next: Arc<dyn Handler>) -> Self {
        Self { next }
    }

    pub fn layer() -> impl FnOnce(Arc<dyn Handler>) -> Arc<dyn Handler> + Send + 'static {
        |next| Arc::new(Self::new(next)) as Arc<dyn Handler>
    }
}

impl Handler for LoggingHandler {
    fn serve(&self, ctx: &Context, w: &ResponseWriter, r: &Request) {
        // 开发模式下记录完整的请求目标，否则只记录路径
        let target = if config::live_reload() {
            r.path().to_string()
        } else {
            r.path_only()
        };
        debug!("[ID{}]开始处理[{}] {}", ctx.id(), r.method(), target);
        let start = Instant::now();
        self.next.serve(ctx, w, r);
        info!(
            "[ID{}][{}] {:?} {} {}ms",
            ctx.id(),
            r.method(),
            target,
            w.status().unwrap_or(200),
            start.elapsed().as_millis()
        );
    }
}

/// 在限时执行器中运行剩余的链
pub struct InitHandler {
    next: Arc<dyn Handler>,
    executor: Arc<BoundedExecutor>,
    presenter: Arc<ErrorPresenter>,
    custom_timeout: Option<Duration>,
}

impl InitHandler {
    pub fn new(
        next: Arc<dyn Handler>,
        executor: Arc<BoundedExecutor>,
        presenter: Arc<ErrorPresenter>,
    ) -> Self {
        Self {
            next,
            executor,
            presenter,
            custom_timeout: None,
        }
    }

    pub fn layer(
        executor: Arc<BoundedExecutor>,
        presenter: Arc<ErrorPresenter>,
        custom_timeout: Option<Duration>,
    ) -> impl FnOnce(Arc<dyn Handler>) -> Arc<dyn Handler> + Send + 'static {
        move |next| {
            let mut handler = Self::new(next, executor, presenter);
            handler.custom_timeout = custom_timeout;
            Arc::new(handler) as Arc<dyn Handler>
        }
    }

    fn run(&self, ctx: &Context, w: &ResponseWriter, r: &Request) {
        let next = Arc::clone(&self.next);
        let presenter = Arc::clone(&self.presenter);
        let task_ctx = ctx.clone();
        let task_w = w.clone();
        let task_r = r.clone();

        let outcome = self
            .executor
            .run_bounded(ctx.id(), w, self.custom_timeout, move |token| {
                let ctx = task_ctx.with_cancellation(token);
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    next.serve(&ctx, &task_w, &task_r)
                }));
                if let Err(payload) = result {
                    present_panic(&presenter, "bounded task", &ctx, &task_w, &task_r, payload);
                }
            });

        let failure = match outcome {
            Ok(BoundedOutcome::Completed) | Ok(BoundedOutcome::TimedOut) => return,
            Ok(BoundedOutcome::Abandoned) => Exception::PanicRecovered(
                "bounded task exited without signalling completion".to_string(),
            ),
            Err(e) => e,
        };
        error!("[ID{}]限时执行失败：{}，请求：{}", ctx.id(), failure, r.describe());
        w.reset();
        self.presenter
            .present_status(ctx, r, w, Some(&failure), "", 500, false);
    }
}

impl Handler for InitHandler {
    fn serve(&self, ctx: &Context, w: &ResponseWriter, r: &Request) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.run(ctx, w, r)));
        if let Err(payload) = result {
            present_panic(&self.presenter, "InitHandler", ctx, w, r, payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::view::ViewEngine;
    use std::net::TcpListener;
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn presenter() -> Arc<ErrorPresenter> {
        let dir = tempdir().unwrap();
        let engine = Arc::new(ViewEngine::new(dir.path(), dir.path()));
        Arc::new(ErrorPresenter::new(engine, None))
    }

    fn recording(name: &'static str, log: Arc<Mutex<Vec<String>>>) -> impl FnOnce(Arc<dyn Handler>) -> Arc<dyn Handler> + Send + 'static {
        move |next: Arc<dyn Handler>| {
            Arc::new(move |ctx: &Context, w: &ResponseWriter, r: &Request| {
                log.lock().unwrap().push(format!("{} in", name));
                next.serve(ctx, w, r);
                log.lock().unwrap().push(format!("{} out", name));
            }) as Arc<dyn Handler>
        }
    }

    #[test]
    fn test_chain_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let terminal_log = Arc::clone(&log);
        let chain = Chain::new()
            .append(recording("a", Arc::clone(&log)))
            .append(recording("b", Arc::clone(&log)));
        assert_eq!(chain.len(), 2);
        let handler = chain.then(Arc::new(move |_: &Context, _: &ResponseWriter, _: &Request| {
            terminal_log.lock().unwrap().push("terminal".to_string());
        }));
        handler.serve(&Context::new(0), &ResponseWriter::new(), &Request::get("/"));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a in", "b in", "terminal", "b out", "a out"]
        );
    }

    #[test]
    fn test_recover_handler_turns_panic_into_500() {
        let handler = Chain::new()
            .append(RecoverHandler::layer(presenter()))
            .then(Arc::new(|_: &Context, w: &ResponseWriter, _: &Request| {
                w.write(b"partial");
                panic!("terminal exploded");
            }));
        let w = ResponseWriter::new();
        handler.serve(&Context::new(7), &w, &Request::get("/boom"));
        let written = w.snapshot();
        assert_eq!(written.status, 500);
        assert_eq!(written.body_text(), "Internal Server Error\n");
    }

    #[test]
    fn test_init_handler_recovers_inside_task() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let config = Config::new().with_session_address(listener.local_addr().unwrap().to_string());
        let executor = Arc::new(BoundedExecutor::new(&config));
        let handler = Chain::new()
            .append(InitHandler::layer(executor, presenter(), None))
            .then(Arc::new(|_: &Context, _: &ResponseWriter, _: &Request| {
                panic!("inside task");
            }));
        let w = ResponseWriter::new();
        handler.serve(&Context::new(8), &w, &Request::get("/"));
        let written = w.snapshot();
        assert_eq!(written.status, 500);
        assert_eq!(written.body_text(), "Internal Server Error\n");
    }

    #[test]
    fn test_task_sees_cancellation_token() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let config = Config::new().with_session_address(listener.local_addr().unwrap().to_string());
        let executor = Arc::new(BoundedExecutor::new(&config));
        let seen = Arc::new(Mutex::new(None));
        let seen_in_task = Arc::clone(&seen);
        let handler = Chain::new()
            .append(InitHandler::layer(executor, presenter(), None))
            .then(Arc::new(move |ctx: &Context, _: &ResponseWriter, _: &Request| {
                *seen_in_task.lock().unwrap() = Some(ctx.cancellation().clone());
            }));
        let outer = Context::new(9);
        handler.serve(&outer, &ResponseWriter::new(), &Request::get("/"));
        let token = seen.lock().unwrap().take().unwrap();
        assert!(token.is_cancelled());
        assert!(!outer.is_cancelled());
    }
}
