// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 视图服务器
//!
//! 基于 Tokio 运行时的多线程视图服务器：
//! - 中间件链（panic 恢复、请求日志、限时执行）
//! - 编译模板缓存与静态文件缓存，热重载模式下绕过缓存
//! - 错误页展示，错误页自身失败时降级为纯文本
//! - 后台管理控制台（CLI 指令交互）

use std::{
    net::{Ipv4Addr, SocketAddrV4},
    process,
    sync::Arc,
    thread,
    time::Duration,
};

use log::{error, info};
use serde_json::json;
use tokio::{net::TcpListener, runtime::Builder};

use viewserver::{
    config::Config,
    controller::{ErrorController, ViewResolver},
    exception::Exception,
    middleware::Context,
    request::Request,
    server::{self, Router, Server, Services},
    view::{add_messages, RenderContext, ViewOutcome},
};

const CONFIG_FILE: &str = "config/development.toml";
const LOG_CONFIG_FILE: &str = "config/log4rs.yaml";
const SLOW_ROUTE_TIMEOUT: Duration = Duration::from_secs(3);

/// 首页
struct HomeController;

impl ViewResolver for HomeController {
    fn view_data(&self, ctx: &Context, r: &Request) -> ViewOutcome {
        let mut vd = RenderContext::new().with_translator(ctx.translator().cloned());
        vd.insert("title", json!("viewserver"));
        vd.insert("path", json!(r.path_only()));
        add_messages(&mut vd, r, false);
        if let Some(target) = r.query("next") {
            vd.redirect = target.to_string();
        }
        ViewOutcome::new(vd, "views/index.html", "layout.html")
    }
}

/// 演示限时执行：按 `ms` 参数休眠，期间检查取消令牌
struct SlowController;

impl ViewResolver for SlowController {
    fn view_data(&self, ctx: &Context, r: &Request) -> ViewOutcome {
        let ms = r.query("ms").and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
        let mut slept = 0;
        while slept < ms && !ctx.is_cancelled() {
            thread::sleep(Duration::from_millis(10));
            slept += 10;
        }
        let mut vd = RenderContext::new().with_translator(ctx.translator().cloned());
        vd.insert("title", json!("slow"));
        vd.insert("slept", json!(slept));
        ViewOutcome::new(vd, "views/index.html", "layout.html")
    }
}

/// 通过 `?code=` 演示错误页
struct FailController;

impl ViewResolver for FailController {
    fn view_data(&self, ctx: &Context, r: &Request) -> ViewOutcome {
        let code = r.query("code").and_then(|v| v.parse::<u16>().ok()).unwrap_or(500);
        let mut vd = RenderContext::new().with_translator(ctx.translator().cloned());
        vd.error_type = code;
        vd.error_source = "FailController".to_string();
        ViewOutcome::failed(vd, Exception::Resolution(format!("requested failure {}", code)))
    }
}

struct ErrorPageController;

impl ErrorController for ErrorPageController {
    fn view_data(&self, mut ctx: RenderContext, _err: Option<&Exception>) -> ViewOutcome {
        let title = ctx.error_type.to_string();
        ctx.insert("title", json!(title));
        // 视图名决定执行哪个块，错误页执行根模板
        ctx.view_name.clear();
        ViewOutcome::new(ctx, "views/error.html", "layout.html")
    }
}

fn main() {
    // 日志系统通过外部 YAML 配置级别与输出目的地
    if let Err(e) = log4rs::init_file(LOG_CONFIG_FILE, Default::default()) {
        eprintln!("无法初始化日志系统：{}", e);
        process::exit(1);
    }

    std::panic::set_hook(Box::new(|panic_info| {
        error!("{}", panic_info);
    }));

    let config = match Config::from_toml(CONFIG_FILE) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };
    config.apply_process_flags();
    info!("配置文件已载入");
    info!("root: {}", config.root_dir());

    let runtime = match Builder::new_multi_thread()
        .worker_threads(config.worker_threads())
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("无法创建异步运行时：{}", e);
            process::exit(1);
        }
    };

    let port = config.port();
    let address = match config.local() {
        true => Ipv4Addr::new(127, 0, 0, 1),
        false => Ipv4Addr::new(0, 0, 0, 0),
    };
    let socket = SocketAddrV4::new(address, port);

    let services = Services::from_config(config, Some(Arc::new(ErrorPageController)));
    let router = Router::new()
        .route("/", services.mvc("index", Arc::new(HomeController)))
        .route(
            "/slow",
            services.mvc_with_timeout("slow", Arc::new(SlowController), SLOW_ROUTE_TIMEOUT),
        )
        .route("/fail", services.mvc("fail", Arc::new(FailController)))
        .route("/clear", services.clear_cache_handler())
        .prefix("/static/", services.folder("static", "/static/"));
    let server = Arc::new(Server::new(services, router));

    runtime.block_on(async move {
        let listener = match TcpListener::bind(socket).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("无法绑定端口：{}，错误：{}", port, e);
                process::exit(1);
            }
        };
        info!("服务端在{}上监听Socket连接", socket);

        tokio::spawn(server::run_console(Arc::clone(&server)));
        Arc::clone(&server).serve(listener).await;
        server::drain(&server, Duration::from_secs(5)).await;
        info!("服务器已停止");
    });
}
