// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 缓存模块
//!
//! - [`TemplateCache`]：编译模板缓存，键为 `视图路径 + "-_-" + 共享布局名`。
//! - [`FileCache`]：静态文件字节缓存，键为规范化后的请求路径。
//!
//! 两者都可以被多个请求线程同时访问，并支持整体失效。锁只保护对映射表本身的访问，
//! 读文件和解析模板都在锁外完成。

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;
use log::{debug, error, info, warn};

use crate::config;
use crate::exception::Exception;
use crate::param::CACHE_KEY_SEPARATOR;
use crate::template::Template;

/// 编译模板的缓存键
pub fn cache_key(key: &str, shared_layout: &str) -> String {
    format!("{}{}{}", key, CACHE_KEY_SEPARATOR, shared_layout)
}

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("{}锁被污染，恢复并继续", what);
            poisoned.into_inner()
        }
    }
}

/// 从磁盘读取模板源文件
fn read_source(path: &Path) -> Result<String, Exception> {
    fs::read_to_string(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => Exception::TemplateNotFound(path.display().to_string()),
        _ => Exception::TemplateRead {
            path: path.display().to_string(),
            reason: e.to_string(),
        },
    })
}

/// 加载共享布局目录下的所有文件。解析失败的布局会被记录并跳过。
fn load_layouts(shared_dir: &Path) -> HashMap<String, Template> {
    let mut layouts = HashMap::new();
    let entries = match fs::read_dir(shared_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("无法读取共享布局目录{}：{}", shared_dir.display(), e);
            return layouts;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        let mut layout = Template::new(name.clone());
        match read_source(&path).and_then(|source| layout.parse(&source)) {
            Ok(()) => {
                debug!("共享布局{}加载完成", name);
                layouts.insert(name, layout);
            }
            Err(e) => error!("共享布局{}加载失败：{}", name, e),
        }
    }
    layouts
}

/// 编译模板缓存
pub struct TemplateCache {
    shared_dir: PathBuf,
    templates: Mutex<TemplateTable>,
    layouts: Mutex<HashMap<String, Template>>,
}

/// 编译模板表。`generation` 在每次整体失效时递增，只在持有表锁时修改。
#[derive(Default)]
struct TemplateTable {
    generation: u64,
    entries: HashMap<String, Arc<Template>>,
}

impl TemplateCache {
    /// 创建缓存并立即加载共享布局
    pub fn new(shared_dir: impl Into<PathBuf>) -> Self {
        let shared_dir = shared_dir.into();
        let layouts = load_layouts(&shared_dir);
        info!("已加载{}个共享布局", layouts.len());
        Self {
            shared_dir,
            templates: Mutex::new(TemplateTable::default()),
            layouts: Mutex::new(layouts),
        }
    }

    /// 获取编译好的模板。
    ///
    /// 未命中（或处于热重载模式）时读取 `source`，如果指定了共享布局，则在布局的克隆上解析页面。
    /// 并发未命中时可能重复解析，后写入者生效。解析期间发生过 [`clear_cache`](Self::clear_cache)
    /// 的结果只返回给调用方，不写入缓存。
    pub fn get_template(
        &self,
        key: &str,
        source: &Path,
        shared_layout: &str,
    ) -> Result<Arc<Template>, Exception> {
        let entry_key = cache_key(key, shared_layout);
        let live_reload = config::live_reload();

        let generation = {
            let table = lock(&self.templates, "模板缓存");
            if !live_reload {
                if let Some(template) = table.entries.get(&entry_key) {
                    return Ok(Arc::clone(template));
                }
            }
            table.generation
        };

        let template = self.compile(key, source, shared_layout)?;
        if !live_reload {
            self.store(entry_key, generation, &template);
        }
        Ok(template)
    }

    /// 读取源文件并解析，不触碰模板表
    fn compile(
        &self,
        key: &str,
        source: &Path,
        shared_layout: &str,
    ) -> Result<Arc<Template>, Exception> {
        let text = read_source(source)?;
        let mut template = if shared_layout.is_empty() {
            Template::new(key)
        } else {
            let layouts = lock(&self.layouts, "共享布局");
            layouts
                .get(shared_layout)
                .cloned()
                .ok_or_else(|| Exception::LayoutNotFound(shared_layout.to_string()))?
        };
        template.parse(&text)?;
        Ok(Arc::new(template))
    }

    /// 写入编译结果；`generation` 是开始编译前看到的缓存代，已过期则丢弃
    fn store(&self, entry_key: String, generation: u64, template: &Arc<Template>) -> bool {
        let mut table = lock(&self.templates, "模板缓存");
        if table.generation != generation {
            debug!("模板{}编译期间缓存已清空，不写入", entry_key);
            return false;
        }
        debug!("模板{}编译完成并写入缓存", entry_key);
        table.entries.insert(entry_key, Arc::clone(template));
        true
    }

    /// 丢弃所有编译模板，并从磁盘重新加载共享布局。
    ///
    /// 返回后每个键的下一次查询都会重新读取源文件。
    pub fn clear_cache(&self) {
        let layouts = load_layouts(&self.shared_dir);
        let count = layouts.len();
        *lock(&self.layouts, "共享布局") = layouts;
        let dropped = {
            let mut table = lock(&self.templates, "模板缓存");
            table.generation = table.generation.wrapping_add(1);
            std::mem::take(&mut table.entries).len()
        };
        info!("模板缓存已清空（丢弃{}项），重新加载{}个共享布局", dropped, count);
    }

    pub fn len(&self) -> usize {
        lock(&self.templates, "模板缓存").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_layout(&self, name: &str) -> bool {
        lock(&self.layouts, "共享布局").contains_key(name)
    }
}

/// 静态文件字节缓存。每个路径在一个缓存代内至多写入一次，`clear` 整体替换映射表。
pub struct FileCache {
    files: RwLock<HashMap<String, Bytes>>,
}

impl Default for FileCache {
    fn default() -> Self {
        Self::new()
    }
}

impl FileCache {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Bytes>> {
        match self.files.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("文件缓存读锁被污染，恢复并继续");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Bytes>> {
        match self.files.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("文件缓存写锁被污染，恢复并继续");
                poisoned.into_inner()
            }
        }
    }

    /// 查询缓存。热重载模式下总是未命中。
    pub fn get(&self, path: &str) -> Option<Bytes> {
        if config::live_reload() {
            return None;
        }
        self.read().get(path).cloned()
    }

    /// 写入缓存并返回最终生效的内容：已存在的条目不会被覆盖。
    pub fn insert_once(&self, path: &str, content: Bytes) -> Bytes {
        if config::live_reload() {
            return content;
        }
        self.write()
            .entry(path.to_string())
            .or_insert(content)
            .clone()
    }

    pub fn clear(&self) {
        let old = std::mem::take(&mut *self.write());
        info!("文件缓存已清空（丢弃{}项）", old.len());
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
