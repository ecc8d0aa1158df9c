use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
#[error("CSS 解析失败（偏移 {offset}）：{message}")]
pub struct CssError {
    pub offset: usize,
    pub message: String,
}

impl CssError {
    fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

/// 样式表中的顶层规则
#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    /// `prelude { block }`
    Qualified { prelude: String, block: String },
    /// `@name prelude;` 或 `@name prelude { block }`
    At {
        name: String,
        prelude: String,
        block: Option<String>,
    },
}

impl Rule {
    pub fn at_name(&self) -> Option<&str> {
        match self {
            Rule::At { name, .. } => Some(name),
            Rule::Qualified { .. } => None,
        }
    }
}

pub fn parse_stylesheet(css: &str) -> Result<Vec<Rule>, CssError> {
    let mut rules = Vec::new();
    let mut pos = skip_trivia(css, 0)?;

    while pos < css.len() {
        let rest = &css[pos..];
        if rest.starts_with('}') {
            return Err(CssError::new(pos, "多余的 `}`"));
        }
        if let Some(after_at) = rest.strip_prefix('@') {
            let name_len = after_at
                .find(|c: char| !(c.is_alphanumeric() || c == '-' || c == '_'))
                .unwrap_or(after_at.len());
            if name_len == 0 {
                return Err(CssError::new(pos, "`@` 后缺少规则名"));
            }
            let name = after_at[..name_len].to_string();
            let prelude_start = pos + 1 + name_len;
            let (stop, stop_char) = scan_prelude(css, prelude_start)?;
            let prelude = css[prelude_start..stop].trim().to_string();
            match stop_char {
                Some('{') => {
                    let end = matching_brace(css, stop)?;
                    rules.push(Rule::At {
                        name,
                        prelude,
                        block: Some(css[stop + 1..end].to_string()),
                    });
                    pos = end + 1;
                }
                Some(';') => {
                    rules.push(Rule::At {
                        name,
                        prelude,
                        block: None,
                    });
                    pos = stop + 1;
                }
                _ => {
                    rules.push(Rule::At {
                        name,
                        prelude,
                        block: None,
                    });
                    pos = stop;
                }
            }
        } else {
            let (stop, stop_char) = scan_prelude(css, pos)?;
            if stop_char != Some('{') {
                return Err(CssError::new(pos, "选择器后缺少 `{`"));
            }
            let end = matching_brace(css, stop)?;
            rules.push(Rule::Qualified {
                prelude: css[pos..stop].trim().to_string(),
                block: css[stop + 1..end].to_string(),
            });
            pos = end + 1;
        }
        pos = skip_trivia(css, pos)?;
    }

    Ok(rules)
}

pub fn serialize(rules: &[Rule]) -> String {
    serialize_joined(rules, "\n")
}

/// 以 `separator` 连接各条规则
pub fn serialize_joined(rules: &[Rule], separator: &str) -> String {
    let mut out = String::new();
    for rule in rules {
        if !out.is_empty() {
            out.push_str(separator);
        }
        match rule {
            Rule::Qualified { prelude, block } => {
                out.push_str(prelude);
                out.push('{');
                out.push_str(block);
                out.push('}');
            }
            Rule::At {
                name,
                prelude,
                block,
            } => {
                out.push('@');
                out.push_str(name);
                if !prelude.is_empty() {
                    out.push(' ');
                    out.push_str(prelude);
                }
                match block {
                    Some(block) => {
                        out.push('{');
                        out.push_str(block);
                        out.push('}');
                    }
                    None => out.push(';'),
                }
            }
        }
    }
    out
}

/// 跳过空白与注释
fn skip_trivia(css: &str, mut pos: usize) -> Result<usize, CssError> {
    loop {
        let rest = &css[pos..];
        let trimmed = rest.trim_start();
        pos += rest.len() - trimmed.len();
        if trimmed.starts_with("/*") {
            pos = skip_comment(css, pos)?;
        } else {
            return Ok(pos);
        }
    }
}

fn skip_comment(css: &str, pos: usize) -> Result<usize, CssError> {
    css[pos + 2..]
        .find("*/")
        .map(|i| pos + 2 + i + 2)
        .ok_or_else(|| CssError::new(pos, "未闭合的注释"))
}

fn skip_string(css: &str, pos: usize, quote: char) -> Result<usize, CssError> {
    let mut chars = css[pos + 1..].char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '\n' => break,
            c if c == quote => return Ok(pos + 1 + i + 1),
            _ => {}
        }
    }
    Err(CssError::new(pos, "未闭合的字符串"))
}

/// 扫描规则前导部分，停在顶层 `{` 或 `;`（或结尾）
fn scan_prelude(css: &str, mut pos: usize) -> Result<(usize, Option<char>), CssError> {
    let mut parens = 0usize;
    while pos < css.len() {
        let c = css[pos..].chars().next().unwrap_or('\0');
        match c {
            '"' | '\'' => {
                pos = skip_string(css, pos, c)?;
                continue;
            }
            '/' if css[pos..].starts_with("/*") => {
                pos = skip_comment(css, pos)?;
                continue;
            }
            '(' | '[' => parens += 1,
            ')' | ']' => parens = parens.saturating_sub(1),
            '{' | ';' if parens == 0 => return Ok((pos, Some(c))),
            '}' => return Err(CssError::new(pos, "规则中意外的 `}`")),
            _ => {}
        }
        pos += c.len_utf8();
    }
    Ok((pos, None))
}

/// 给定 `{` 的位置，返回与之匹配的 `}` 的位置
fn matching_brace(css: &str, open: usize) -> Result<usize, CssError> {
    let mut depth = 0usize;
    let mut pos = open;
    while pos < css.len() {
        let c = css[pos..].chars().next().unwrap_or('\0');
        match c {
            '"' | '\'' => {
                pos = skip_string(css, pos, c)?;
                continue;
            }
            '/' if css[pos..].starts_with("/*") => {
                pos = skip_comment(css, pos)?;
                continue;
            }
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(pos);
                }
            }
            _ => {}
        }
        pos += c.len_utf8();
    }
    Err(CssError::new(open, "未闭合的 `{`"))
}
