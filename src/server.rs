// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 异步传输层
//!
//! 基于 Tokio 的接入循环：读取请求报文，在阻塞线程池上运行同步的处理链，再把结果写回连接。
//!
//! - [`Router`]：按精确路径、最长前缀的顺序选择处理器。
//! - [`Services`]：一个进程内共享的缓存、渲染引擎、错误展示器与限时执行器。
//! - [`Server`]：接入循环、连接计数与后台管理控制台的指令。

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
};
use tokio_util::sync::CancellationToken;

use crate::cache::FileCache;
use crate::config::Config;
use crate::controller::{ErrorController, ViewResolver};
use crate::exception::Exception;
use crate::executor::BoundedExecutor;
use crate::handlers::{ClearCacheHandler, FolderHandler, MvcHandler};
use crate::middleware::{Chain, Context, Handler, InitHandler, LoggingHandler, RecoverHandler};
use crate::param::{status_text, HttpRequestMethod};
use crate::presenter::ErrorPresenter;
use crate::request::Request;
use crate::response::Response;
use crate::translate::translater_for;
use crate::view::ViewEngine;
use crate::writer::{ResponseWriter, Written};

/// 路径到处理器的映射
#[derive(Default)]
pub struct Router {
    exact: HashMap<String, Arc<dyn Handler>>,
    prefixes: Vec<(String, Arc<dyn Handler>)>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, path: &str, handler: Arc<dyn Handler>) -> Self {
        self.exact.insert(path.to_string(), handler);
        self
    }

    /// 以 `prefix` 开头的所有路径
    pub fn prefix(mut self, prefix: &str, handler: Arc<dyn Handler>) -> Self {
        self.prefixes.push((prefix.to_string(), handler));
        // 最长前缀优先
        self.prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        self
    }

    pub fn find(&self, path: &str) -> Option<&Arc<dyn Handler>> {
        self.exact.get(path).or_else(|| {
            self.prefixes
                .iter()
                .find(|(prefix, _)| path.starts_with(prefix.as_str()))
                .map(|(_, handler)| handler)
        })
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 进程内共享的服务
#[derive(Clone)]
pub struct Services {
    pub config: Arc<Config>,
    pub views: Arc<ViewEngine>,
    pub files: Arc<FileCache>,
    pub presenter: Arc<ErrorPresenter>,
    pub executor: Arc<BoundedExecutor>,
}

impl Services {
    pub fn from_config(config: Config, error_controller: Option<Arc<dyn ErrorController>>) -> Self {
        let views = Arc::new(ViewEngine::from_config(&config));
        let presenter = Arc::new(ErrorPresenter::new(Arc::clone(&views), error_controller));
        Self::with_presenter(config, presenter)
    }

    /// 使用已经构造好的错误展示器，渲染引擎取自展示器
    pub fn with_presenter(config: Config, presenter: Arc<ErrorPresenter>) -> Self {
        let executor = Arc::new(BoundedExecutor::new(&config));
        Self {
            views: Arc::clone(presenter.engine()),
            files: Arc::new(FileCache::new()),
            presenter,
            executor,
            config: Arc::new(config),
        }
    }

    /// Recover -> Logging -> Init
    pub fn standard_chain(&self) -> Chain {
        self.chain_with_timeout(None)
    }

    /// 标准链，`custom_timeout` 覆盖配置中的最长响应时间
    pub fn chain_with_timeout(&self, custom_timeout: Option<Duration>) -> Chain {
        Chain::new()
            .append(RecoverHandler::layer(Arc::clone(&self.presenter)))
            .append(LoggingHandler::layer())
            .append(InitHandler::layer(
                Arc::clone(&self.executor),
                Arc::clone(&self.presenter),
                custom_timeout,
            ))
    }

    /// 包在标准链中的 MVC 处理器
    pub fn mvc(&self, binder_key: &str, resolver: Arc<dyn ViewResolver>) -> Arc<dyn Handler> {
        self.standard_chain().then(Arc::new(MvcHandler::new(
            binder_key,
            resolver,
            Arc::clone(&self.presenter),
        )))
    }

    /// 使用单独响应时限的 MVC 处理器
    pub fn mvc_with_timeout(
        &self,
        binder_key: &str,
        resolver: Arc<dyn ViewResolver>,
        timeout: Duration,
    ) -> Arc<dyn Handler> {
        self.chain_with_timeout(Some(timeout))
            .then(Arc::new(MvcHandler::new(
                binder_key,
                resolver,
                Arc::clone(&self.presenter),
            )))
    }

    /// 文件夹处理器不进入限时执行器
    pub fn folder(&self, folder: &str, strip_prefix: &str) -> Arc<dyn Handler> {
        Chain::new()
            .append(RecoverHandler::layer(Arc::clone(&self.presenter)))
            .append(LoggingHandler::layer())
            .then(Arc::new(FolderHandler::new(
                &self.config,
                folder,
                strip_prefix,
                Arc::clone(&self.files),
                Arc::clone(&self.presenter),
            )))
    }

    pub fn clear_cache_handler(&self) -> Arc<dyn Handler> {
        Arc::new(ClearCacheHandler::new(
            Arc::clone(&self.views),
            Arc::clone(&self.files),
        ))
    }

    pub fn clear_cache(&self) {
        self.views.clear_cache();
        self.files.clear();
    }
}

pub struct Server {
    services: Services,
    router: Router,
    active_connection: AtomicUsize,
    shutdown: CancellationToken,
}

impl Server {
    pub fn new(services: Services, router: Router) -> Self {
        Self {
            services,
            router,
            active_connection: AtomicUsize::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn active_connections(&self) -> usize {
        self.active_connection.load(Ordering::SeqCst)
    }

    /// 发出停机信号，接入循环在下一次轮询时退出
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// 对一个已解析的请求运行处理链，同步执行
    pub fn dispatch(&self, id: u128, request: &Request) -> Written {
        let mut ctx = Context::new(id);
        if let Some(lang) = request.accept_language() {
            ctx = ctx.with_translator(translater_for(&lang));
        }
        let w = ResponseWriter::new();
        match self.router.find(&request.path_only()) {
            Some(handler) => handler.serve(&ctx, &w, request),
            None => {
                warn!("[ID{}]没有匹配的路由：{}", id, request.path());
                self.services.presenter.present_status(
                    &ctx,
                    request,
                    &w,
                    Some(&Exception::FileNotFound),
                    status_text(404),
                    404,
                    true,
                );
            }
        }
        w.finish()
    }

    /// 从原始报文得到完整的响应报文
    pub fn respond(&self, id: u128, buffer: &[u8]) -> Vec<u8> {
        let start_time = Instant::now();
        let request = match Request::try_from(buffer, id) {
            Ok(req) => req,
            Err(e) => {
                error!("[ID{}]解析HTTP请求失败: {}", id, e);
                return Response::plain(400).as_bytes();
            }
        };
        debug!("[ID{}]成功解析HTTP请求", id);

        let response = if request.method() == HttpRequestMethod::Options {
            Response::options(&request)
        } else {
            Response::from_written(self.dispatch(id, &request), &request, id)
        };
        debug!(
            "[ID{}]HTTP响应构建完成，服务端用时{}ms。",
            id,
            start_time.elapsed().as_millis()
        );

        info!(
            "[ID{}] {}, {}, {}, {}, {}, {}",
            id,
            request.version(),
            request.path(),
            request.method(),
            response.status_code(),
            response.information(),
            request.user_agent(),
        );
        response.as_bytes()
    }

    async fn handle_connection(self: &Arc<Self>, mut stream: TcpStream, id: u128) {
        let mut buffer = vec![0; self.services.config.read_buffer_size()];
        let n = match stream.read(&mut buffer).await {
            Ok(0) => return,
            Ok(n) => n,
            Err(e) => {
                error!("[ID{}]读取TCPStream时遇到错误: {}", id, e);
                return;
            }
        };
        buffer.truncate(n);
        debug!("[ID{}]HTTP请求接收完毕", id);

        // 处理链会阻塞（限时执行器在等待完成信号），不能占用异步工作线程
        let server = Arc::clone(self);
        let bytes = match tokio::task::spawn_blocking(move || server.respond(id, &buffer)).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("[ID{}]处理线程异常退出：{}", id, e);
                Response::plain(500).as_bytes()
            }
        };

        debug!("[ID{}]发送全量响应，长度: {}", id, bytes.len());
        if let Err(e) = stream.write_all(&bytes).await {
            error!("[ID{}]发送响应失败: {}", id, e);
            return;
        }
        let _ = stream.flush().await;
    }

    /// 接入循环，直到收到停机信号
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        let mut id: u128 = 0;
        loop {
            let (stream, addr) = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("主循环接收到停机指令，正在退出...");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!("接受连接失败：{}", e);
                        continue;
                    }
                },
            };
            debug!("[ID{}]TCP连接已建立：{}", id, addr);

            let server = Arc::clone(&self);
            tokio::spawn(async move {
                server.active_connection.fetch_add(1, Ordering::SeqCst);
                server.handle_connection(stream, id).await;
                server.active_connection.fetch_sub(1, Ordering::SeqCst);
            });
            id += 1;
        }
    }

    /// 执行一条控制台指令，返回 false 表示控制台应当退出
    pub fn handle_command(&self, cmd: &str) -> bool {
        match cmd {
            "stop" => {
                self.shutdown();
                println!("停机指令已激活，服务器将停止接收新的连接...");
                false
            }
            "help" => {
                println!("== Viewserver Help ==");
                println!("stop   - 发出停机信号");
                println!("status - 查看当前服务器运行状态");
                println!("clear  - 清空模板缓存与文件缓存");
                println!("help   - 显示此帮助信息");
                println!("=====================");
                true
            }
            "status" => {
                println!("== Viewserver 状态 ==");
                println!("当前活跃连接数: {}", self.active_connections());
                println!("超时后仍在运行的任务数: {}", self.services.executor.abandoned());
                println!("已缓存模板数: {}", self.services.views.templates().len());
                println!("已缓存文件数: {}", self.services.files.len());
                println!("=====================");
                true
            }
            "clear" => {
                self.services.clear_cache();
                println!("缓存已清空");
                true
            }
            "" => true,
            _ => {
                println!("无效的命令：{}", cmd);
                true
            }
        }
    }
}

/// 后台管理控制台，从标准输入读取指令
pub async fn run_console(server: Arc<Server>) {
    let mut reader = BufReader::new(tokio::io::stdin());
    let mut input = String::new();
    loop {
        input.clear();
        match reader.read_line(&mut input).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        if !server.handle_command(input.trim()) {
            break;
        }
    }
}

/// 等待仍在处理的连接结束，最多等待 `grace`
pub async fn drain(server: &Server, grace: Duration) {
    let start = Instant::now();
    while server.active_connections() > 0 && start.elapsed() < grace {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    if server.active_connections() > 0 {
        warn!("停机时仍有{}个连接未处理完", server.active_connections());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::ViewOutcome;
    use std::net::TcpListener as StdListener;
    use tempfile::tempdir;

    fn text(body: &'static str) -> Arc<dyn Handler> {
        Arc::new(move |_: &Context, w: &ResponseWriter, _: &Request| {
            w.write(body.as_bytes());
        })
    }

    #[test]
    fn test_router_exact_then_longest_prefix() {
        let router = Router::new()
            .route("/", text("home"))
            .prefix("/static/", text("static"))
            .prefix("/static/img/", text("img"));
        assert_eq!(router.len(), 3);

        let w = ResponseWriter::new();
        let ctx = Context::new(0);
        let r = Request::get("/");
        router.find("/static/img/a.png").unwrap().serve(&ctx, &w, &r);
        assert_eq!(w.snapshot().body_text(), "img");
        assert!(router.find("/missing").is_none());
        assert!(router.find("/").is_some());
    }

    #[test]
    fn test_respond_unknown_route_and_bad_request() {
        let dir = tempdir().unwrap();
        let config = Config::new().with_root_dir(dir.path().to_string_lossy());
        let server = Server::new(Services::from_config(config, None), Router::new());

        let bytes = server.respond(1, b"GET /nothing HTTP/1.1\r\nHost: x\r\n\r\n");
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.ends_with("\r\n\r\nNot Found\n"));

        let bytes = server.respond(2, b"garbage");
        assert!(String::from_utf8(bytes).unwrap().starts_with("HTTP/1.1 400 Bad Request"));

        let bytes = server.respond(3, b"OPTIONS * HTTP/1.1\r\n\r\n");
        assert!(String::from_utf8(bytes).unwrap().contains("Allow: GET, HEAD, OPTIONS, POST"));
    }

    #[test]
    fn test_dispatch_through_standard_chain() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("hello.html"), "hi {[{ .data.name }]}").unwrap();
        let session = StdListener::bind("127.0.0.1:0").unwrap();
        let config = Config::new()
            .with_root_dir(dir.path().to_string_lossy())
            .with_session_address(session.local_addr().unwrap().to_string());
        let services = Services::from_config(config, None);
        let resolver = Arc::new(|_: &Context, _: &Request| {
            let mut outcome = ViewOutcome::new(Default::default(), "hello.html", "");
            outcome.context.insert("name", serde_json::json!("there"));
            outcome
        });
        let router = Router::new().route("/hello", services.mvc("hello", resolver));
        let server = Server::new(services, router);

        let written = server.dispatch(7, &Request::get("/hello"));
        assert_eq!(written.status, 200);
        assert_eq!(written.body_text(), "hi there");
    }

    #[test]
    fn test_console_commands() {
        let dir = tempdir().unwrap();
        let config = Config::new().with_root_dir(dir.path().to_string_lossy());
        let server = Server::new(Services::from_config(config, None), Router::new());
        assert!(server.handle_command("status"));
        assert!(server.handle_command("clear"));
        assert!(server.handle_command("bogus"));
        assert!(!server.is_shutting_down());
        assert!(!server.handle_command("stop"));
        assert!(server.is_shutting_down());
    }
}
