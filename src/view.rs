// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 视图模块
//!
//! - [`RenderContext`]：每个请求独立构造的渲染上下文，是模板执行时唯一可见的数据。
//! - [`ViewOutcome`]：视图解析器的产出，包含上下文、视图路径、共享布局以及可选的失败。
//! - [`ViewEngine`]：持有模板缓存，负责把编译好的模板与上下文渲染为字节。
//!
//! 模板执行被 `catch_unwind` 包裹，执行期间的 panic（包括 [`Model::custom`] 中的 panic）
//! 会被转换为 [`Exception::Render`]，不会越过渲染引擎。

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, error};
use serde_json::{json, Map, Value};

use crate::cache::TemplateCache;
use crate::config::{self, Config};
use crate::exception::Exception;
use crate::request::Request;
use crate::template::{html_escape, Scope, Template};
use crate::translate::Translator;
use crate::util::{append_message, panic_message};
use crate::writer::ResponseWriter;

/// 页面模型的扩展点，返回的值在模板中以 `.model` 访问
pub trait Model: Send + Sync {
    fn custom(&self) -> Value;
}

/// 不携带任何数据的模型
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyModel;

impl Model for EmptyModel {
    fn custom(&self) -> Value {
        Value::Null
    }
}

impl<F> Model for F
where
    F: Fn() -> Value + Send + Sync,
{
    fn custom(&self) -> Value {
        self()
    }
}

/// 模板执行时的全部数据
#[derive(Clone)]
pub struct RenderContext {
    pub data: Map<String, Value>,
    pub model: Arc<dyn Model>,
    pub globals: Map<String, Value>,
    pub translator: Option<Arc<dyn Translator>>,
    /// 失败分类码，0 表示没有失败
    pub error_type: u16,
    pub error_source: String,
    pub error_message: String,
    pub warning_message: String,
    pub status_message: String,
    pub debug: bool,
    /// 渲染时执行的命名块；为空时执行根模板
    pub view_name: String,
    /// 非空时渲染结果以 307 重定向到该地址
    pub redirect: String,
    /// 出错时只输出纯文本错误页
    pub no_style_on_error: bool,
}

impl Default for RenderContext {
    fn default() -> Self {
        Self {
            data: Map::new(),
            model: Arc::new(EmptyModel),
            globals: Map::new(),
            translator: None,
            error_type: 0,
            error_source: String::new(),
            error_message: String::new(),
            warning_message: String::new(),
            status_message: String::new(),
            debug: false,
            view_name: String::new(),
            redirect: String::new(),
            no_style_on_error: false,
        }
    }
}

impl fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderContext")
            .field("data", &self.data)
            .field("globals", &self.globals)
            .field("translator", &self.translator)
            .field("error_type", &self.error_type)
            .field("error_source", &self.error_source)
            .field("error_message", &self.error_message)
            .field("view_name", &self.view_name)
            .field("redirect", &self.redirect)
            .field("no_style_on_error", &self.no_style_on_error)
            .finish_non_exhaustive()
    }
}

impl RenderContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_translator(mut self, translator: Option<Arc<dyn Translator>>) -> Self {
        self.translator = translator;
        self
    }

    pub fn with_model(mut self, model: Arc<dyn Model>) -> Self {
        self.model = model;
        self
    }

    pub fn insert(&mut self, key: &str, value: Value) {
        self.data.insert(key.to_string(), value);
    }

    pub fn has_error(&self) -> bool {
        self.error_type != 0
    }

    /// 转换为模板根数据
    pub fn to_value(&self) -> Value {
        json!({
            "data": self.data,
            "model": self.model.custom(),
            "globals": self.globals,
            "language": self.translator.as_ref().map(|t| t.language().to_string()),
            "error_type": self.error_type,
            "error_source": self.error_source,
            "error_message": self.error_message,
            "warning_message": self.warning_message,
            "status_message": self.status_message,
            "debug": self.debug,
            "view_name": self.view_name,
            "redirect": self.redirect,
        })
    }
}

/// 视图解析的结果
#[derive(Debug, Default)]
pub struct ViewOutcome {
    pub context: RenderContext,
    /// 相对于根目录的视图模板路径
    pub view_path: String,
    /// 共享布局文件名，空串表示不使用布局
    pub shared_layout: String,
    pub error: Option<Exception>,
}

impl ViewOutcome {
    pub fn new(context: RenderContext, view_path: &str, shared_layout: &str) -> Self {
        Self {
            context,
            view_path: view_path.to_string(),
            shared_layout: shared_layout.to_string(),
            error: None,
        }
    }

    pub fn failed(context: RenderContext, error: Exception) -> Self {
        Self {
            context,
            error: Some(error),
            ..Default::default()
        }
    }
}

/// 把请求中的 `statusMessage`、`warningMessage`、`errorMessage` 追加到上下文。
///
/// 追加的文本会先做 HTML 转义；`ignore_if_other` 为真时，已有消息的字段保持不变。
pub fn add_messages(ctx: &mut RenderContext, r: &Request, ignore_if_other: bool) {
    let fields = [
        ("statusMessage", &mut ctx.status_message),
        ("warningMessage", &mut ctx.warning_message),
        ("errorMessage", &mut ctx.error_message),
    ];
    for (key, field) in fields {
        let Some(value) = r.form_value(key).filter(|v| !v.is_empty()) else {
            continue;
        };
        if ignore_if_other && !field.is_empty() {
            continue;
        }
        *field = append_message(field, &html_escape(value));
    }
}

/// 渲染引擎
pub struct ViewEngine {
    root_dir: PathBuf,
    templates: TemplateCache,
}

impl ViewEngine {
    pub fn new(root_dir: impl Into<PathBuf>, shared_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            templates: TemplateCache::new(shared_dir),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.root_dir(), config.shared_dir())
    }

    /// 通过模板缓存获取视图模板，视图路径相对于根目录
    pub fn get_template(
        &self,
        view_path: &str,
        shared_layout: &str,
    ) -> Result<Arc<Template>, Exception> {
        let source = self.root_dir.join(view_path.trim_start_matches('/'));
        self.templates.get_template(view_path, &source, shared_layout)
    }

    pub fn clear_cache(&self) {
        self.templates.clear_cache();
    }

    pub fn templates(&self) -> &TemplateCache {
        &self.templates
    }

    /// 渲染到响应。
    ///
    /// 模板先渲染进缓冲区，成功后才写入响应，失败时响应保持原样由调用方展示错误。
    /// `ctx.redirect` 非空时先写 307 与 `Location`，正文照常写出。
    pub fn render_http(
        &self,
        ctx: &mut RenderContext,
        template: &Template,
        w: &ResponseWriter,
        block: &str,
    ) -> Result<(), Exception> {
        let mut out = Vec::new();
        self.render_writer(ctx, template, &mut out, block)?;
        w.header("Content-Type", "text/html; charset=utf-8");
        if !ctx.redirect.is_empty() {
            debug!("渲染完成，重定向到{}", ctx.redirect);
            w.redirect(&ctx.redirect);
        }
        w.write(&out);
        Ok(())
    }

    /// 渲染到任意缓冲区。`block` 非空时执行该命名块，否则执行根模板。
    pub fn render_writer(
        &self,
        ctx: &mut RenderContext,
        template: &Template,
        out: &mut Vec<u8>,
        block: &str,
    ) -> Result<(), Exception> {
        ctx.debug = config::debugging();
        let ctx: &RenderContext = ctx;
        let mut buffer = Vec::new();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let data = ctx.to_value();
            let scope = Scope::new(&data).with_translator(ctx.translator.as_deref());
            if block.is_empty() {
                template.execute(&mut buffer, &scope)
            } else {
                template.execute_block(block, &mut buffer, &scope)
            }
        }));
        match result {
            Ok(Ok(())) => {
                out.extend_from_slice(&buffer);
                Ok(())
            }
            Ok(Err(e)) => {
                error!("模板{}渲染失败：{}", template.name(), e);
                Err(e)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("模板{}渲染时发生panic：{}", template.name(), message);
                Err(Exception::Render(format!("panic during execution: {}", message)))
            }
        }
    }
}
