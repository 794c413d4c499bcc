// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 错误展示器
//!
//! 把任意失败转换为一个完整的错误响应。
//!
//! 1. 规范化：分类码为 0 时取 500；来源为空时使用默认标签并告警；消息为空时取状态码的标准短语。
//! 2. 没有错误控制器，或上下文要求不带样式时，直接输出纯文本错误。
//! 3. 否则依次调用错误控制器、加载错误模板、渲染到缓冲区，全部成功后以 `text/html`
//!    和控制器返回的分类码写出；任何一步失败都降级为纯文本错误。

use std::sync::Arc;

use log::{error, info, warn};

use crate::controller::ErrorController;
use crate::exception::Exception;
use crate::middleware::Context;
use crate::param::{status_text, DEFAULT_ERROR_SOURCE};
use crate::request::Request;
use crate::translate::{default_translater, Translator};
use crate::view::{EmptyModel, RenderContext, ViewEngine, ViewOutcome};
use crate::writer::ResponseWriter;

/// 在展示前加工错误上下文的钩子
pub type ErrorPolishFn = Arc<dyn Fn(&mut RenderContext, &Context, &Request) + Send + Sync>;

/// 构造一个错误上下文，客户端消息为空时取状态码的标准短语
pub fn error_view_data(
    source: &str,
    error_type: u16,
    client_message: &str,
    no_style_on_error: bool,
) -> RenderContext {
    let message = if client_message.is_empty() {
        status_text(error_type)
    } else {
        client_message
    };
    RenderContext {
        error_type,
        error_source: source.to_string(),
        error_message: message.to_string(),
        no_style_on_error,
        ..RenderContext::default()
    }
}

/// 恢复点使用的错误上下文：记录 panic 并返回 500
pub fn recover_view_data(
    id: u128,
    source: &str,
    r: &Request,
    panic: &str,
    no_style_on_error: bool,
) -> ViewOutcome {
    error!(
        "[ID{}]在{}中捕获到panic：{}，请求：{}",
        id,
        source,
        panic,
        r.describe()
    );
    ViewOutcome::failed(
        error_view_data(source, 500, "", no_style_on_error),
        Exception::PanicRecovered(panic.to_string()),
    )
}

pub struct ErrorPresenter {
    engine: Arc<ViewEngine>,
    controller: Option<Arc<dyn ErrorController>>,
    polish: Option<ErrorPolishFn>,
}

impl ErrorPresenter {
    pub fn new(engine: Arc<ViewEngine>, controller: Option<Arc<dyn ErrorController>>) -> Self {
        Self {
            engine,
            controller,
            polish: None,
        }
    }

    pub fn with_polish(mut self, polish: ErrorPolishFn) -> Self {
        self.polish = Some(polish);
        self
    }

    pub fn engine(&self) -> &Arc<ViewEngine> {
        &self.engine
    }

    /// 展示错误
    pub fn present(
        &self,
        ctx: &Context,
        mut vd: RenderContext,
        err: Option<&Exception>,
        w: &ResponseWriter,
    ) {
        let id = ctx.id();
        if vd.error_type == 0 {
            vd.error_type = 500;
        }
        if vd.error_source.is_empty() {
            warn!("[ID{}]错误上下文没有提供来源，使用默认来源", id);
            vd.error_source = DEFAULT_ERROR_SOURCE.to_string();
        }
        if vd.error_message.is_empty() {
            vd.error_message = match status_text(vd.error_type) {
                "" => err.map_or_else(|| "Unknown Error".to_string(), |e| e.to_string()),
                text => text.to_string(),
            };
        }

        info!(
            "[ID{}]展示错误页：来源：{}，类型：{}，消息：{}，错误：{}",
            id,
            vd.error_source,
            vd.error_type,
            vd.error_message,
            err.map_or_else(|| "无".to_string(), |e| e.to_string())
        );

        let controller = match self.controller {
            Some(ref controller) if !vd.no_style_on_error => controller,
            _ => {
                w.error(&vd.error_message, vd.error_type);
                return;
            }
        };

        let code = vd.error_type;
        let message = vd.error_message.clone();
        match self.render_styled(controller.as_ref(), vd, err) {
            Ok((styled_code, body)) => {
                // 错误控制器可以改写分类码，状态行以控制器返回的为准
                let styled_code = if styled_code == 0 { code } else { styled_code };
                w.header("Content-Type", "text/html; charset=utf-8");
                w.write_header(styled_code);
                w.write(&body);
            }
            Err(e) => {
                error!("[ID{}]错误页渲染失败，降级为纯文本：{}", id, e);
                w.error(&message, code);
            }
        }
    }

    fn render_styled(
        &self,
        controller: &dyn ErrorController,
        vd: RenderContext,
        err: Option<&Exception>,
    ) -> Result<(u16, Vec<u8>), Exception> {
        let outcome = controller.view_data(vd, err);
        if let Some(e) = outcome.error {
            return Err(e);
        }
        let template = self
            .engine
            .get_template(&outcome.view_path, &outcome.shared_layout)?;
        let mut vd = outcome.context;
        let block = vd.view_name.clone();
        let mut body = Vec::new();
        self.engine.render_writer(&mut vd, &template, &mut body, &block)?;
        Ok((vd.error_type, body))
    }

    /// 不依赖已有视图数据的错误展示：从零构造上下文，翻译器取自请求上下文，没有时使用默认翻译器
    #[allow(clippy::too_many_arguments)]
    pub fn present_status(
        &self,
        ctx: &Context,
        r: &Request,
        w: &ResponseWriter,
        err: Option<&Exception>,
        message: &str,
        error_type: u16,
        no_style: bool,
    ) {
        let translator: Arc<dyn Translator> = match ctx.translator() {
            Some(t) => Arc::clone(t),
            None => default_translater() as Arc<dyn Translator>,
        };
        let mut vd = RenderContext {
            model: Arc::new(EmptyModel),
            translator: Some(translator),
            error_message: message.to_string(),
            error_type,
            no_style_on_error: no_style,
            ..RenderContext::default()
        };
        if let Some(ref polish) = self.polish {
            polish(&mut vd, ctx, r);
        }
        self.present(ctx, vd, err, w);
    }
}
