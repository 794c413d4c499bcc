// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 终端处理器
//!
//! - [`MvcHandler`]：解析视图数据并渲染视图，是中间件链的最内层。
//! - [`FolderHandler`]：从根目录下的某个文件夹提供原始文件，经过文件缓存。
//! - [`ClearCacheHandler`]：清空模板缓存与文件缓存。

use std::fs;
use std::io::ErrorKind;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, error, info, warn};

use crate::cache::FileCache;
use crate::config::Config;
use crate::controller::ViewResolver;
use crate::exception::Exception;
use crate::middleware::{Context, Handler};
use crate::param::{mime_for, status_text};
use crate::presenter::{error_view_data, ErrorPresenter};
use crate::request::Request;
use crate::util::{clean_path, format_file_size, panic_message};
use crate::view::{RenderContext, ViewEngine, ViewOutcome};
use crate::writer::ResponseWriter;

/// 渲染前加工视图数据的钩子，可以改写并返回视图路径
pub type PolishFn =
    Arc<dyn Fn(&mut RenderContext, &Context, &Request, String) -> String + Send + Sync>;

pub struct MvcHandler {
    binder_key: String,
    resolver: Arc<dyn ViewResolver>,
    engine: Arc<ViewEngine>,
    presenter: Arc<ErrorPresenter>,
    polish: Option<PolishFn>,
}

impl MvcHandler {
    pub fn new(
        binder_key: &str,
        resolver: Arc<dyn ViewResolver>,
        presenter: Arc<ErrorPresenter>,
    ) -> Self {
        Self {
            binder_key: binder_key.to_string(),
            resolver,
            engine: Arc::clone(presenter.engine()),
            presenter,
            polish: None,
        }
    }

    pub fn with_polish(mut self, polish: PolishFn) -> Self {
        self.polish = Some(polish);
        self
    }
}

impl Handler for MvcHandler {
    fn serve(&self, ctx: &Context, w: &ResponseWriter, r: &Request) {
        let id = ctx.id();
        debug!("[ID{}]MvcHandler开始处理{}", id, self.binder_key);

        let ViewOutcome {
            context: mut vd,
            mut view_path,
            shared_layout,
            error,
        } = self.resolver.view_data(ctx, r);

        if vd.view_name.is_empty() {
            vd.view_name = self.binder_key.clone();
        }
        if let Some(ref polish) = self.polish {
            view_path = polish(&mut vd, ctx, r, view_path);
        }
        if vd.has_error() || error.is_some() {
            self.presenter.present(ctx, vd, error.as_ref(), w);
            return;
        }
        if ctx.is_cancelled() {
            debug!("[ID{}]请求已被取消，跳过渲染", id);
            return;
        }

        match self.engine.get_template(&view_path, &shared_layout) {
            Ok(template) => {
                if let Err(e) = self.engine.render_http(&mut vd, &template, w, "") {
                    error!("[ID{}]渲染视图{}失败：{}", id, view_path, e);
                    let mut evd = error_view_data("MvcHandler", 500, "", vd.no_style_on_error);
                    evd.translator = vd.translator.clone();
                    self.presenter.present(ctx, evd, Some(&e), w);
                }
            }
            Err(e @ Exception::TemplateNotFound(_)) => {
                info!("[ID{}]视图模板不存在：{}", id, view_path);
                self.presenter
                    .present_status(ctx, r, w, Some(&e), status_text(404), 404, false);
            }
            Err(e) => {
                error!("[ID{}]加载视图模板{}失败：{}", id, view_path, e);
                error!("[ID{}]没有可用于{}的视图", id, self.binder_key);
                self.presenter
                    .present_status(ctx, r, w, Some(&e), status_text(500), 500, false);
            }
        }
        debug!("[ID{}]MvcHandler处理结束", id);
    }
}

/// 提供文件夹中的原始文件
pub struct FolderHandler {
    folder: PathBuf,
    strip_prefix: String,
    sub_dir: String,
    as_download: bool,
    files: Arc<FileCache>,
    presenter: Arc<ErrorPresenter>,
}

impl FolderHandler {
    /// `folder` 相对于根目录；请求路径中的 `strip_prefix` 与配置的子目录会在查找前被去掉
    pub fn new(
        config: &Config,
        folder: &str,
        strip_prefix: &str,
        files: Arc<FileCache>,
        presenter: Arc<ErrorPresenter>,
    ) -> Self {
        Self {
            folder: Path::new(config.root_dir()).join(folder),
            strip_prefix: strip_prefix.to_string(),
            sub_dir: config.sub_dir().to_string(),
            as_download: false,
            files,
            presenter,
        }
    }

    /// 以附件形式下载
    pub fn as_download(mut self, as_download: bool) -> Self {
        self.as_download = as_download;
        self
    }

    fn not_found(&self, ctx: &Context, w: &ResponseWriter, r: &Request, err: Exception) {
        self.presenter
            .present_status(ctx, r, w, Some(&err), status_text(404), 404, true);
    }

    fn write_file(&self, ctx: &Context, w: &ResponseWriter, name: &str, content: &Bytes) {
        let extension = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        w.header("Content-Type", mime_for(extension));
        if self.as_download {
            w.header("Content-Disposition", "attachment");
        }
        w.write(content);
        debug!(
            "[ID{}]提供文件{}（{}）",
            ctx.id(),
            name,
            format_file_size(content.len() as u64)
        );
    }

    fn serve_file(&self, ctx: &Context, w: &ResponseWriter, r: &Request) {
        let url_path = r.path_only();
        if let Some(cached) = self.files.get(&url_path) {
            self.write_file(ctx, w, &url_path, &cached);
            return;
        }

        let mut path = url_path.clone();
        if !self.sub_dir.is_empty() {
            path = path.replacen(&self.sub_dir, "", 1);
        }
        if !self.strip_prefix.is_empty() {
            path = path.replacen(&self.strip_prefix, "", 1);
        }
        let relative = match clean_path(&path) {
            Some(relative) if !relative.is_empty() => relative,
            Some(_) => return self.not_found(ctx, w, r, Exception::FileNotFound),
            None => {
                warn!("[ID{}]拒绝包含目录穿越的路径：{}", ctx.id(), url_path);
                return self.not_found(ctx, w, r, Exception::InvalidPath);
            }
        };

        let full_path = self.folder.join(&relative);
        if full_path.is_dir() {
            return self.not_found(ctx, w, r, Exception::FileNotFound);
        }
        match fs::read(&full_path) {
            Ok(content) => {
                let content = self.files.insert_once(&url_path, Bytes::from(content));
                self.write_file(ctx, w, &url_path, &content);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("[ID{}]文件不存在：{}", ctx.id(), full_path.display());
                self.not_found(ctx, w, r, Exception::FileNotFound);
            }
            Err(e) => {
                warn!("[ID{}]读取文件{}失败：{}", ctx.id(), full_path.display(), e);
                let vd = error_view_data("FolderHandler", 500, "", true);
                self.presenter.present(ctx, vd, None, w);
            }
        }
    }
}

impl Handler for FolderHandler {
    fn serve(&self, ctx: &Context, w: &ResponseWriter, r: &Request) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.serve_file(ctx, w, r)));
        if let Err(payload) = result {
            let err = Exception::PanicRecovered(panic_message(payload.as_ref()));
            info!("[ID{}]FolderHandler从panic中恢复：{}", ctx.id(), err);
            w.reset();
            self.not_found(ctx, w, r, err);
        }
    }
}

/// 清空模板缓存与文件缓存
pub struct ClearCacheHandler {
    engine: Arc<ViewEngine>,
    files: Arc<FileCache>,
}

impl ClearCacheHandler {
    pub fn new(engine: Arc<ViewEngine>, files: Arc<FileCache>) -> Self {
        Self { engine, files }
    }
}

impl Handler for ClearCacheHandler {
    fn serve(&self, ctx: &Context, w: &ResponseWriter, _r: &Request) {
        debug!("[ID{}]清空缓存", ctx.id());
        self.engine.clear_cache();
        self.files.clear();
        w.header("Content-Type", "text/plain; charset=utf-8");
        w.write(b"cache cleared\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    fn fixture() -> (TempDir, Config, Arc<ErrorPresenter>) {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("static/css")).unwrap();
        fs::write(dir.path().join("static/css/site.css"), "body{}").unwrap();
        fs::write(dir.path().join("secret.txt"), "secret").unwrap();
        let config = Config::new().with_root_dir(dir.path().to_string_lossy());
        let engine = Arc::new(ViewEngine::from_config(&config));
        let presenter = Arc::new(ErrorPresenter::new(engine, None));
        (dir, config, presenter)
    }

    #[test]
    fn test_serves_and_caches_file() {
        let (dir, config, presenter) = fixture();
        let files = Arc::new(FileCache::new());
        let handler = FolderHandler::new(&config, "static", "/static", Arc::clone(&files), presenter);

        let w = ResponseWriter::new();
        handler.serve(&Context::new(1), &w, &Request::get("/static/css/site.css"));
        let written = w.snapshot();
        assert_eq!(written.status, 200);
        assert_eq!(written.body_text(), "body{}");
        assert_eq!(written.header("content-type"), Some("text/css;charset=utf-8"));
        assert_eq!(files.len(), 1);

        // 第二次从缓存读取，磁盘上的修改不可见
        fs::write(dir.path().join("static/css/site.css"), "changed").unwrap();
        let w = ResponseWriter::new();
        handler.serve(&Context::new(2), &w, &Request::get("/static/css/site.css"));
        assert_eq!(w.snapshot().body_text(), "body{}");
    }

    #[test]
    fn test_traversal_is_rejected() {
        let (_dir, config, presenter) = fixture();
        let handler = FolderHandler::new(&config, "static", "/static", Arc::new(FileCache::new()), presenter);
        let w = ResponseWriter::new();
        handler.serve(&Context::new(1), &w, &Request::get("/static/../secret.txt"));
        let written = w.snapshot();
        assert_eq!(written.status, 404);
        assert_eq!(written.body_text(), "Not Found\n");
    }

    #[test]
    fn test_missing_file_and_directory() {
        let (_dir, config, presenter) = fixture();
        let handler = FolderHandler::new(&config, "static", "/static", Arc::new(FileCache::new()), presenter);
        for path in ["/static/nope.css", "/static/css", "/static/"] {
            let w = ResponseWriter::new();
            handler.serve(&Context::new(1), &w, &Request::get(path));
            assert_eq!(w.snapshot().status, 404, "path {}", path);
        }
    }

    #[test]
    fn test_download_and_sub_dir() {
        let (_dir, config, presenter) = fixture();
        let config = config.with_sub_dir("/app");
        let handler = FolderHandler::new(&config, "static", "/static", Arc::new(FileCache::new()), presenter)
            .as_download(true);
        let w = ResponseWriter::new();
        handler.serve(&Context::new(1), &w, &Request::get("/app/static/css/site.css"));
        let written = w.snapshot();
        assert_eq!(written.body_text(), "body{}");
        assert_eq!(written.header("content-disposition"), Some("attachment"));
    }

    #[test]
    fn test_clear_cache_handler() {
        let (_dir, config, _) = fixture();
        let files = Arc::new(FileCache::new());
        files.insert_once("/a", Bytes::from("a"));
        let handler = ClearCacheHandler::new(Arc::new(ViewEngine::from_config(&config)), Arc::clone(&files));
        let w = ResponseWriter::new();
        handler.serve(&Context::new(1), &w, &Request::get("/clear"));
        assert!(files.is_empty());
        assert_eq!(w.snapshot().status, 200);
    }
}
