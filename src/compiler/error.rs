use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// 编译与渲染阶段的全部错误
///
/// 词法 / 语法 / 校验错误在构建期抛出，整个模板集合的构建随之中止；
/// 渲染错误在调用期抛出，原样传播给 `render` 或组件调用方。
#[derive(Debug, Error)]
pub enum Error {
    #[error("{}", format_error("词法错误", .0))]
    Lex(SourceError),

    #[error("{}", format_error("语法错误", .0))]
    Parse(SourceError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Render(#[from] RenderError),
}

/// 带源码位置的错误（词法 / 语法）
#[derive(Debug, Clone)]
pub struct SourceError {
    pub template: String,
    pub file: Option<PathBuf>,
    /// 源码中的字节偏移
    pub offset: usize,
    pub line: usize,
    pub col: usize,
    pub message: String,
    /// 前一行 / 当前行 / 后一行，当前行下方以 `^` 标出列位置
    pub excerpt: String,
}

impl SourceError {
    pub fn new(
        template: &str,
        file: Option<&Path>,
        source: &str,
        offset: usize,
        message: impl Into<String>,
    ) -> Self {
        let offset = offset.min(source.len());
        let (line, col) = line_col(source, offset);
        Self {
            template: template.to_string(),
            file: file.map(Path::to_path_buf),
            offset,
            line,
            col,
            message: message.into(),
            excerpt: build_error_context(source, line, col),
        }
    }

    /// 源码已不可用时（如代码生成阶段）构造的错误，仅带模板名
    pub fn detached(template: &str, file: Option<&Path>, message: impl Into<String>) -> Self {
        Self {
            template: template.to_string(),
            file: file.map(Path::to_path_buf),
            offset: 0,
            line: 0,
            col: 0,
            message: message.into(),
            excerpt: String::new(),
        }
    }

    fn location(&self) -> String {
        let origin = match &self.file {
            Some(file) => file.display().to_string(),
            None => self.template.clone(),
        };
        if self.line == 0 {
            origin
        } else {
            format!("{origin}:{}:{}", self.line, self.col)
        }
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location(), self.message)
    }
}

/// 单个模板源码的错误上下文，贯穿词法、标签组装与语法树构建阶段
#[derive(Debug, Clone, Copy)]
pub(crate) struct SourceCtx<'a> {
    pub name: &'a str,
    pub file: Option<&'a Path>,
    pub text: &'a str,
}

impl<'a> SourceCtx<'a> {
    pub fn new(name: &'a str, file: Option<&'a Path>, text: &'a str) -> Self {
        Self { name, file, text }
    }

    pub fn lex_error(&self, offset: usize, message: impl Into<String>) -> Error {
        Error::Lex(SourceError::new(self.name, self.file, self.text, offset, message))
    }

    pub fn parse_error(&self, offset: usize, message: impl Into<String>) -> Error {
        Error::Parse(SourceError::new(self.name, self.file, self.text, offset, message))
    }
}

/// 跨模板语义校验失败
#[derive(Debug, Clone, Error)]
#[error("模板校验失败\n  → {}\n  错误：{message}", origin(template, file.as_deref()))]
pub struct ValidationError {
    pub template: String,
    pub file: Option<PathBuf>,
    pub message: String,
}

impl ValidationError {
    pub fn new(template: &str, file: Option<&Path>, message: impl Into<String>) -> Self {
        Self {
            template: template.to_string(),
            file: file.map(Path::to_path_buf),
            message: message.into(),
        }
    }
}

/// 渲染期错误
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("渲染 `{template}` 失败：未定义的变量 `{name}`")]
    Undefined { template: String, name: String },

    #[error("渲染 `{template}` 失败：缺少必需参数 `{name}`")]
    MissingArgument { template: String, name: String },

    #[error("渲染 `{template}` 失败：必需插槽 `{name}` 未被填充")]
    MissingSlot { template: String, name: String },

    #[error("模板 `{name}` 不存在")]
    UnknownTemplate { name: String },

    #[error("渲染 `{template}` 失败：{message}")]
    Eval { template: String, message: String },

    #[error("渲染 `{template}` 失败：循环需要解包 {expected} 个值，实际为 {found} 个")]
    Unpack {
        template: String,
        expected: usize,
        found: usize,
    },

    #[error("渲染参数无效：{message}")]
    InvalidArguments { message: String },
}

fn origin(template: &str, file: Option<&Path>) -> String {
    match file {
        Some(file) => format!("{template} ({})", file.display()),
        None => template.to_string(),
    }
}

fn format_error(kind: &str, err: &SourceError) -> String {
    let mut out = format!("htmpl {kind}\n  → {}\n\n", err.location());
    if !err.excerpt.is_empty() {
        out.push_str(&err.excerpt);
    }
    out.push_str(&format!("  错误：{}", err.message));
    out
}

/// 计算字节偏移对应的行列号（均从 1 开始，列按字符计）
fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let before = &source[..floor_char_boundary(source, offset)];
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map_or(0, |i| i + 1);
    let col = before[line_start..].chars().count() + 1;
    (line, col)
}

fn floor_char_boundary(source: &str, mut offset: usize) -> usize {
    while offset > 0 && !source.is_char_boundary(offset) {
        offset -= 1;
    }
    offset
}

fn build_error_context(source: &str, error_line: usize, col: usize) -> String {
    let lines: Vec<&str> = source.lines().collect();
    let start = error_line.saturating_sub(2);
    let end = (error_line + 1).min(lines.len().max(error_line));

    let mut ctx = String::new();
    let width = format!("{end}").len();
    for i in start..end {
        let marker = if i + 1 == error_line { ">" } else { " " };
        ctx.push_str(&format!(
            "  {} {:>width$} | {}\n",
            marker,
            i + 1,
            lines.get(i).unwrap_or(&""),
            width = width,
        ));
        if i + 1 == error_line {
            ctx.push_str(&format!(
                "    {:>width$} | {}^\n",
                "",
                " ".repeat(col.saturating_sub(1)),
                width = width,
            ));
        }
    }
    ctx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_col_counts_chars() {
        let src = "ab\ncdé{{";
        assert_eq!(line_col(src, 0), (1, 1));
        assert_eq!(line_col(src, 3), (2, 1));
        // é 占两个字节，但只算一列
        assert_eq!(line_col(src, src.find("{{").unwrap()), (2, 4));
    }

    #[test]
    fn excerpt_has_three_lines_and_caret() {
        let src = "one\ntwo {% bad %}\nthree\nfour";
        let err = SourceError::new("page", None, src, src.find("{%").unwrap(), "boom");
        assert_eq!(err.line, 2);
        assert_eq!(err.col, 5);
        assert!(err.excerpt.contains("1 | one"));
        assert!(err.excerpt.contains("> 2 | two {% bad %}"));
        assert!(err.excerpt.contains("3 | three"));
        assert!(!err.excerpt.contains("four"));
        assert!(err.excerpt.contains("|     ^"));
    }

    #[test]
    fn lex_error_display_mentions_file_and_message() {
        let err = Error::Lex(SourceError::new(
            "page",
            Some(Path::new("templates/page.html")),
            "{{ x",
            0,
            "未闭合的标签",
        ));
        let text = err.to_string();
        assert!(text.contains("templates/page.html:1:1"));
        assert!(text.contains("未闭合的标签"));
    }
}
