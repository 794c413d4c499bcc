// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 模板模块
//!
//! 一个极简的模板语言，只提供渲染缓存和渲染引擎所需的能力。分隔符固定为
//! `{[{` 与 `}]}`，避免与浏览器端使用 `{{ }}` 的模板库冲突。
//!
//! ## 语法
//! - `{[{ .a.b }]}`：输出当前数据（dot）上的字段，HTML 转义
//! - `{[{ $.a }]}`：从根数据开始取值
//! - `{[{ raw .x }]}`：不转义输出
//! - `{[{ T "key" }]}`：调用翻译器
//! - `{[{ if .x }]}...{[{ else }]}...{[{ end }]}`
//! - `{[{ range .items }]}{[{ . }]}{[{ else }]}空{[{ end }]}`
//! - `{[{ define "name" }]}...{[{ end }]}`：定义命名块
//! - `{[{ block "name" }]}默认内容{[{ end }]}`：定义并立即调用命名块
//! - `{[{ template "name" .x }]}`：调用命名块，省略参数时传入当前 dot
//! - `{[{/* 注释 */}]}`
//!
//! 模板可以廉价克隆：节点树通过 `Arc` 共享，向克隆体解析新内容只会修改克隆体自己的块表，
//! 共享布局因此可以作为不可变的母版。

use std::collections::HashMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

use crate::exception::Exception;
use crate::param::{LEFT_DELIM, RIGHT_DELIM};
use crate::translate::Translator;

/// 命名块相互调用的最大深度
const MAX_EXEC_DEPTH: usize = 64;

static NULL: Value = Value::Null;

lazy_static! {
    static ref ACTION: Regex = Regex::new(&format!(
        r"(?s){}(.*?){}",
        regex::escape(LEFT_DELIM),
        regex::escape(RIGHT_DELIM)
    ))
    .unwrap();
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    /// 相对当前 dot 的字段路径，空路径即 dot 本身
    Dot(Vec<String>),
    /// 相对根数据的字段路径
    Root(Vec<String>),
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Output { expr: Expr, escape: bool },
    Translate(Expr),
    If {
        cond: Expr,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
    Range {
        expr: Expr,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
    Invoke { name: String, arg: Expr },
}

#[derive(Debug)]
enum Action {
    Comment,
    Output { expr: Expr, escape: bool },
    Translate(Expr),
    If(Expr),
    Range(Expr),
    Define(String),
    Block(String, Expr),
    Invoke(String, Expr),
    Else,
    End,
}

enum Token<'a> {
    Text(&'a str),
    Action(&'a str),
}

#[derive(Debug)]
enum Frame {
    Root,
    Define(String),
    Block(String, Expr),
    If(Expr),
    Range(Expr),
}

struct Open {
    frame: Frame,
    nodes: Vec<Node>,
    else_nodes: Option<Vec<Node>>,
}

impl Open {
    fn new(frame: Frame) -> Self {
        Self {
            frame,
            nodes: Vec::new(),
            else_nodes: None,
        }
    }

    fn current(&mut self) -> &mut Vec<Node> {
        match self.else_nodes {
            Some(ref mut nodes) => nodes,
            None => &mut self.nodes,
        }
    }
}

struct Parsed {
    root: Vec<Node>,
    defines: Vec<(String, Vec<Node>)>,
}

fn tokenize(source: &str) -> Result<Vec<Token<'_>>, String> {
    let mut tokens = Vec::new();
    let mut last = 0;
    for caps in ACTION.captures_iter(source) {
        let (Some(whole), Some(body)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if whole.start() > last {
            tokens.push(Token::Text(&source[last..whole.start()]));
        }
        tokens.push(Token::Action(body.as_str()));
        last = whole.end();
    }
    let tail = &source[last..];
    if tail.contains(LEFT_DELIM) {
        return Err(format!("unclosed action, missing {}", RIGHT_DELIM));
    }
    if !tail.is_empty() {
        tokens.push(Token::Text(tail));
    }
    Ok(tokens)
}

fn parse_fields(path: &str) -> Result<Vec<String>, String> {
    path.split('.')
        .map(|field| {
            let valid = !field.is_empty()
                && field
                    .chars()
                    .all(|c| c.is_alphanumeric() || c == '_' || c == '-');
            if valid {
                Ok(field.to_string())
            } else {
                Err(format!("bad field name {:?} in {:?}", field, path))
            }
        })
        .collect()
}

fn parse_expr(text: &str) -> Result<Expr, String> {
    let text = text.trim();
    if text.starts_with('"') {
        return serde_json::from_str::<String>(text)
            .map(Expr::Str)
            .map_err(|_| format!("bad string literal {}", text));
    }
    match text {
        "" => Err("missing value".to_string()),
        "." => Ok(Expr::Dot(Vec::new())),
        "$" => Ok(Expr::Root(Vec::new())),
        _ => {
            if let Some(path) = text.strip_prefix("$.") {
                parse_fields(path).map(Expr::Root)
            } else if let Some(path) = text.strip_prefix('.') {
                parse_fields(path).map(Expr::Dot)
            } else {
                Err(format!("unexpected {:?} in action", text))
            }
        }
    }
}

/// 解析 `"name" [expr]`，省略 expr 时取当前 dot
fn parse_named(rest: &str) -> Result<(String, Expr), String> {
    let rest = rest.trim();
    if !rest.starts_with('"') {
        return Err(format!("expected quoted template name, got {:?}", rest));
    }
    let close = rest[1..]
        .find('"')
        .map(|i| i + 1)
        .ok_or_else(|| format!("unterminated template name {:?}", rest))?;
    let name = rest[1..close].to_string();
    let remainder = rest[close + 1..].trim();
    let arg = if remainder.is_empty() {
        Expr::Dot(Vec::new())
    } else {
        parse_expr(remainder)?
    };
    Ok((name, arg))
}

fn parse_action(body: &str) -> Result<Action, String> {
    let body = body.trim();
    if body.starts_with("/*") && body.ends_with("*/") {
        return Ok(Action::Comment);
    }
    let (keyword, rest) = match body.find(char::is_whitespace) {
        Some(i) => (&body[..i], body[i..].trim()),
        None => (body, ""),
    };
    match keyword {
        "end" | "else" if !rest.is_empty() => Err(format!("unexpected {:?} after {}", rest, keyword)),
        "end" => Ok(Action::End),
        "else" => Ok(Action::Else),
        "if" => parse_expr(rest).map(Action::If),
        "range" => parse_expr(rest).map(Action::Range),
        "define" => {
            let (name, arg) = parse_named(rest)?;
            if arg == Expr::Dot(Vec::new()) {
                Ok(Action::Define(name))
            } else {
                Err("define takes only a name".to_string())
            }
        }
        "block" => parse_named(rest).map(|(name, arg)| Action::Block(name, arg)),
        "template" => parse_named(rest).map(|(name, arg)| Action::Invoke(name, arg)),
        "raw" => parse_expr(rest).map(|expr| Action::Output { expr, escape: false }),
        "T" => parse_expr(rest).map(Action::Translate),
        _ => parse_expr(body).map(|expr| Action::Output { expr, escape: true }),
    }
}

fn parse_source(source: &str) -> Result<Parsed, String> {
    let mut stack = vec![Open::new(Frame::Root)];
    let mut defines = Vec::new();

    for token in tokenize(source)? {
        let action = match token {
            Token::Text(text) => {
                top(&mut stack).current().push(Node::Text(text.to_string()));
                continue;
            }
            Token::Action(body) => parse_action(body)?,
        };
        match action {
            Action::Comment => {}
            Action::Output { expr, escape } => {
                top(&mut stack).current().push(Node::Output { expr, escape })
            }
            Action::Translate(expr) => top(&mut stack).current().push(Node::Translate(expr)),
            Action::Invoke(name, arg) => {
                top(&mut stack).current().push(Node::Invoke { name, arg })
            }
            Action::If(expr) => stack.push(Open::new(Frame::If(expr))),
            Action::Range(expr) => stack.push(Open::new(Frame::Range(expr))),
            Action::Define(name) => stack.push(Open::new(Frame::Define(name))),
            Action::Block(name, arg) => stack.push(Open::new(Frame::Block(name, arg))),
            Action::Else => {
                let open = top(&mut stack);
                match open.frame {
                    Frame::If(_) | Frame::Range(_) if open.else_nodes.is_none() => {
                        open.else_nodes = Some(Vec::new())
                    }
                    _ => return Err("unexpected else".to_string()),
                }
            }
            Action::End => {
                if stack.len() == 1 {
                    return Err("unexpected end".to_string());
                }
                let Some(open) = stack.pop() else {
                    return Err("unexpected end".to_string());
                };
                let otherwise = open.else_nodes.unwrap_or_default();
                match open.frame {
                    Frame::If(cond) => top(&mut stack).current().push(Node::If {
                        cond,
                        then: open.nodes,
                        otherwise,
                    }),
                    Frame::Range(expr) => top(&mut stack).current().push(Node::Range {
                        expr,
                        body: open.nodes,
                        otherwise,
                    }),
                    Frame::Define(name) => defines.push((name, open.nodes)),
                    Frame::Block(name, arg) => {
                        defines.push((name.clone(), open.nodes));
                        top(&mut stack).current().push(Node::Invoke { name, arg });
                    }
                    Frame::Root => return Err("unexpected end".to_string()),
                }
            }
        }
    }

    if stack.len() != 1 {
        let unclosed = stack.last().map(|open| format!("{:?}", open.frame));
        return Err(format!("unexpected EOF, unclosed {}", unclosed.unwrap_or_default()));
    }
    let root = stack.pop().map(|open| open.nodes).unwrap_or_default();
    Ok(Parsed { root, defines })
}

fn top(stack: &mut [Open]) -> &mut Open {
    // 栈底始终是 Root 帧
    let last = stack.len() - 1;
    &mut stack[last]
}

fn is_blank(nodes: &[Node]) -> bool {
    nodes.iter().all(|node| match node {
        Node::Text(text) => text.trim().is_empty(),
        _ => false,
    })
}

/// 模板执行时可见的数据与函数
pub struct Scope<'a> {
    data: &'a Value,
    translator: Option<&'a dyn Translator>,
}

impl<'a> Scope<'a> {
    pub fn new(data: &'a Value) -> Self {
        Self {
            data,
            translator: None,
        }
    }

    pub fn with_translator(mut self, translator: Option<&'a dyn Translator>) -> Self {
        self.translator = translator;
        self
    }
}

/// 已编译的模板：一个可选的根节点树加上若干命名块
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    root: Option<Arc<Vec<Node>>>,
    blocks: HashMap<String, Arc<Vec<Node>>>,
}

impl Template {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root: None,
            blocks: HashMap::new(),
        }
    }

    /// 把 `source` 解析进当前模板。
    ///
    /// 同名块会被覆盖；只有当源文本在剥离 define 之后仍有非空白内容时才替换根节点，
    /// 因此只包含 define 的页面模板可以套在布局上而不破坏布局的根。
    pub fn parse(&mut self, source: &str) -> Result<(), Exception> {
        let parsed = parse_source(source).map_err(|reason| Exception::TemplateParse {
            name: self.name.clone(),
            reason,
        })?;
        for (name, nodes) in parsed.defines {
            self.blocks.insert(name, Arc::new(nodes));
        }
        if !is_blank(&parsed.root) {
            self.root = Some(Arc::new(parsed.root));
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_block(&self, name: &str) -> bool {
        self.blocks.contains_key(name)
    }

    pub fn block_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.blocks.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// 执行根模板
    pub fn execute(&self, out: &mut Vec<u8>, scope: &Scope<'_>) -> Result<(), Exception> {
        let root = self.root.clone().ok_or_else(|| {
            Exception::Render(format!("template {} is incomplete or empty", self.name))
        })?;
        self.run(&root, out, scope)
    }

    /// 执行指定的命名块
    pub fn execute_block(
        &self,
        name: &str,
        out: &mut Vec<u8>,
        scope: &Scope<'_>,
    ) -> Result<(), Exception> {
        let nodes = self.blocks.get(name).cloned().ok_or_else(|| {
            Exception::Render(format!("no such template {:?} in {}", name, self.name))
        })?;
        self.run(&nodes, out, scope)
    }

    fn run(&self, nodes: &[Node], out: &mut Vec<u8>, scope: &Scope<'_>) -> Result<(), Exception> {
        let mut exec = Exec {
            template: self,
            scope,
            out,
            depth: 0,
        };
        exec.walk(nodes, scope.data)
            .map_err(|reason| Exception::Render(format!("template {}: {}", self.name, reason)))
    }
}

struct Exec<'t, 's, 'o> {
    template: &'t Template,
    scope: &'s Scope<'s>,
    out: &'o mut Vec<u8>,
    depth: usize,
}

impl Exec<'_, '_, '_> {
    fn walk(&mut self, nodes: &[Node], dot: &Value) -> Result<(), String> {
        for node in nodes {
            match node {
                Node::Text(text) => self.out.extend_from_slice(text.as_bytes()),
                Node::Output { expr, escape } => {
                    let text = stringify(&self.eval(expr, dot)?);
                    self.emit(&text, *escape);
                }
                Node::Translate(expr) => {
                    let key = stringify(&self.eval(expr, dot)?);
                    let text = match self.scope.translator {
                        Some(t) => t.translate(&key),
                        None => key,
                    };
                    self.emit(&text, true);
                }
                Node::If {
                    cond,
                    then,
                    otherwise,
                } => {
                    if truthy(&self.eval(cond, dot)?) {
                        self.walk(then, dot)?;
                    } else {
                        self.walk(otherwise, dot)?;
                    }
                }
                Node::Range {
                    expr,
                    body,
                    otherwise,
                } => match self.eval(expr, dot)? {
                    Value::Array(items) if !items.is_empty() => {
                        for item in &items {
                            self.walk(body, item)?;
                        }
                    }
                    Value::Object(map) if !map.is_empty() => {
                        for item in map.values() {
                            self.walk(body, item)?;
                        }
                    }
                    Value::Array(_) | Value::Object(_) | Value::Null => self.walk(otherwise, dot)?,
                    other => return Err(format!("range can't iterate over {}", kind(&other))),
                },
                Node::Invoke { name, arg } => {
                    let block = self
                        .template
                        .blocks
                        .get(name)
                        .cloned()
                        .ok_or_else(|| format!("no such template {:?}", name))?;
                    if self.depth >= MAX_EXEC_DEPTH {
                        return Err(format!("exceeded maximum template depth ({})", MAX_EXEC_DEPTH));
                    }
                    let arg = self.eval(arg, dot)?;
                    self.depth += 1;
                    let result = self.walk(&block, &arg);
                    self.depth -= 1;
                    result?;
                }
            }
        }
        Ok(())
    }

    fn eval(&self, expr: &Expr, dot: &Value) -> Result<Value, String> {
        match expr {
            Expr::Str(s) => Ok(Value::String(s.clone())),
            Expr::Dot(fields) => lookup(dot, fields).cloned(),
            Expr::Root(fields) => lookup(self.scope.data, fields).cloned(),
        }
    }

    fn emit(&mut self, text: &str, escape: bool) {
        if escape {
            self.out.extend_from_slice(html_escape(text).as_bytes());
        } else {
            self.out.extend_from_slice(text.as_bytes());
        }
    }
}

fn lookup<'v>(mut value: &'v Value, fields: &[String]) -> Result<&'v Value, String> {
    for field in fields {
        value = match value {
            Value::Object(map) => map.get(field).unwrap_or(&NULL),
            Value::Null => &NULL,
            other => {
                return Err(format!(
                    "can't evaluate field {} in type {}",
                    field,
                    kind(other)
                ))
            }
        };
    }
    Ok(value)
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn html_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&#34;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
