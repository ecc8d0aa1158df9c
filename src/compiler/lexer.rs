use crate::compiler::error::{Result, SourceCtx};

const EXPR_START: &str = "{{";
const EXPR_END: &str = "}}";
const STATEMENT_START: &str = "{%";
const STATEMENT_END: &str = "%}";
const COMPONENT_START: &str = "{<";
const COMPONENT_END: &str = ">}";
const LITERAL_ESCAPE: &str = "\\{";

/// 语句标签 `{% ... %}` 中允许出现的首个关键字
pub const STATEMENT_KEYWORDS: &[&str] = &[
    "if", "elif", "else", "endif", "for", "endfor", "set", "param", "layout", "styles",
    "include", "slot", "endslot", "block", "endblock", "html",
];

/// 词法单元
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// 原样输出的 HTML 文本
    Literal(String),
    ExprStart,
    ExprEnd,
    StatementStart,
    StatementEnd,
    ComponentStart,
    ComponentEnd,
    /// 语句中的名称（block / slot 名）
    Ident(String),
    /// 语句关键字，以及 slot 的 `required` 修饰
    Keyword(String),
    /// layout / include 的带引号模板名（已去除转义）
    StringLit(String),
    /// `{{ }}` 与 `{< >}` 内的表达式源码
    RawExprSrc(String),
    /// 语句关键字之后的剩余源码（条件、循环头、声明等）
    StmtSrc(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// 源码中的字节偏移
    pub offset: usize,
}

impl Token {
    fn new(kind: TokenKind, offset: usize) -> Self {
        Self { kind, offset }
    }
}

/// 将模板源码切分为 Token 序列，保持原有顺序
pub(crate) fn tokenize(ctx: &SourceCtx<'_>) -> Result<Vec<Token>> {
    Lexer::new(ctx).tokenize()
}

struct Lexer<'a> {
    ctx: &'a SourceCtx<'a>,
    source: &'a str,
    current: usize,
    tokens: Vec<Token>,
    literal: String,
    literal_start: usize,
}

impl<'a> Lexer<'a> {
    fn new(ctx: &'a SourceCtx<'a>) -> Self {
        Self {
            ctx,
            source: ctx.text,
            current: 0,
            tokens: Vec::new(),
            literal: String::new(),
            literal_start: 0,
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>> {
        while !self.is_at_end() {
            let rest = &self.source[self.current..];
            if rest.starts_with(LITERAL_ESCAPE) {
                self.push_literal_char('{');
                self.current += LITERAL_ESCAPE.len();
            } else if rest.starts_with(EXPR_START) {
                self.flush_literal();
                self.lex_expression()?;
            } else if rest.starts_with(STATEMENT_START) {
                self.flush_literal();
                self.lex_statement()?;
            } else if rest.starts_with(COMPONENT_START) {
                self.flush_literal();
                self.lex_component()?;
            } else {
                let c = self.peek();
                self.push_literal_char(c);
                self.current += c.len_utf8();
            }
        }
        self.flush_literal();
        Ok(self.tokens)
    }

    fn lex_expression(&mut self) -> Result<()> {
        let start = self.current;
        self.tokens.push(Token::new(TokenKind::ExprStart, start));
        self.current += EXPR_START.len();

        let (inner_start, inner_end) = self.scan_until(EXPR_END, start)?;
        let (src, src_offset) = trimmed(self.source, inner_start, inner_end);
        if src.is_empty() {
            return Err(self.ctx.lex_error(start, "空表达式 `{{ }}`"));
        }
        self.tokens
            .push(Token::new(TokenKind::RawExprSrc(src.to_string()), src_offset));
        self.tokens.push(Token::new(TokenKind::ExprEnd, inner_end));
        self.current = inner_end + EXPR_END.len();
        Ok(())
    }

    fn lex_component(&mut self) -> Result<()> {
        let start = self.current;
        self.tokens.push(Token::new(TokenKind::ComponentStart, start));
        self.current += COMPONENT_START.len();

        let (inner_start, inner_end) = self.scan_until(COMPONENT_END, start)?;
        let (src, src_offset) = trimmed(self.source, inner_start, inner_end);
        if src.is_empty() {
            return Err(self.ctx.lex_error(start, "空组件调用 `{< >}`"));
        }
        self.tokens
            .push(Token::new(TokenKind::RawExprSrc(src.to_string()), src_offset));
        self.tokens.push(Token::new(TokenKind::ComponentEnd, inner_end));
        self.current = inner_end + COMPONENT_END.len();
        Ok(())
    }

    fn lex_statement(&mut self) -> Result<()> {
        let start = self.current;
        self.tokens.push(Token::new(TokenKind::StatementStart, start));
        self.current += STATEMENT_START.len();

        let (inner_start, inner_end) = self.scan_until(STATEMENT_END, start)?;
        let (inner, inner_offset) = trimmed(self.source, inner_start, inner_end);

        let word_len = inner
            .find(|c: char| !(c.is_alphanumeric() || c == '_'))
            .unwrap_or(inner.len());
        let word = &inner[..word_len];
        if word.is_empty() {
            return Err(self.ctx.lex_error(start, "语句缺少关键字"));
        }
        if !STATEMENT_KEYWORDS.contains(&word) {
            return Err(self
                .ctx
                .lex_error(inner_offset, format!("未知的语句关键字 `{word}`")));
        }
        self.tokens
            .push(Token::new(TokenKind::Keyword(word.to_string()), inner_offset));

        let rest_start = inner_offset + word_len;
        let (rest, rest_offset) = trimmed(self.source, rest_start, inner_offset + inner.len());

        match word {
            "if" | "elif" | "for" | "set" | "param" | "html" => {
                if rest.is_empty() {
                    return Err(self
                        .ctx
                        .lex_error(inner_offset, format!("`{word}` 语句缺少内容")));
                }
                self.tokens
                    .push(Token::new(TokenKind::StmtSrc(rest.to_string()), rest_offset));
            }
            "layout" | "include" => {
                let Some(name) = parse_string_literal(rest) else {
                    return Err(self.ctx.lex_error(
                        rest_offset,
                        format!("`{word}` 需要一个带引号的模板名"),
                    ));
                };
                self.tokens
                    .push(Token::new(TokenKind::StringLit(name), rest_offset));
            }
            "block" => {
                if !is_identifier(rest) {
                    return Err(self
                        .ctx
                        .lex_error(rest_offset, "`block` 需要一个合法的名称"));
                }
                self.tokens
                    .push(Token::new(TokenKind::Ident(rest.to_string()), rest_offset));
            }
            "slot" => self.lex_slot_args(rest, rest_offset)?,
            _ => {
                if !rest.is_empty() {
                    return Err(self
                        .ctx
                        .lex_error(rest_offset, format!("`{word}` 不接受参数")));
                }
            }
        }

        self.tokens.push(Token::new(TokenKind::StatementEnd, inner_end));
        self.current = inner_end + STATEMENT_END.len();
        Ok(())
    }

    /// `slot [name] [required]`
    fn lex_slot_args(&mut self, rest: &str, rest_offset: usize) -> Result<()> {
        let mut seen_required = false;
        let mut seen_name = false;
        let mut cursor = 0;
        for word in rest.split_whitespace() {
            let rel = rest[cursor..].find(word).unwrap_or(0) + cursor;
            cursor = rel + word.len();
            let offset = rest_offset + rel;

            if seen_required {
                return Err(self.ctx.lex_error(offset, "`required` 必须位于 slot 语句末尾"));
            }
            if word == "required" {
                seen_required = true;
                self.tokens
                    .push(Token::new(TokenKind::Keyword("required".to_string()), offset));
            } else if !seen_name && is_identifier(word) {
                seen_name = true;
                self.tokens
                    .push(Token::new(TokenKind::Ident(word.to_string()), offset));
            } else {
                return Err(self
                    .ctx
                    .lex_error(offset, format!("slot 语句中无法识别的内容 `{word}`")));
            }
        }
        Ok(())
    }

    /// 从当前位置扫描到 `delimiter`，跳过字符串字面量，返回内部区间
    fn scan_until(&mut self, delimiter: &str, tag_start: usize) -> Result<(usize, usize)> {
        let inner_start = self.current;
        let mut pos = self.current;
        while pos < self.source.len() {
            let rest = &self.source[pos..];
            if rest.starts_with(delimiter) {
                return Ok((inner_start, pos));
            }
            let c = rest.chars().next().unwrap_or('\0');
            if c == '"' || c == '\'' {
                pos = self.skip_string(pos, c)?;
            } else {
                pos += c.len_utf8();
            }
        }
        Err(self
            .ctx
            .lex_error(tag_start, format!("未闭合的标签，缺少 `{delimiter}`")))
    }

    /// 跳过从 `start` 开始的字符串字面量，返回结束引号之后的位置
    fn skip_string(&self, start: usize, quote: char) -> Result<usize> {
        let mut chars = self.source[start + quote.len_utf8()..].char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => {
                    chars.next();
                }
                c if c == quote => return Ok(start + quote.len_utf8() + i + c.len_utf8()),
                _ => {}
            }
        }
        Err(self.ctx.lex_error(start, "未闭合的字符串字面量"))
    }

    fn push_literal_char(&mut self, c: char) {
        if self.literal.is_empty() {
            self.literal_start = self.current;
        }
        self.literal.push(c);
    }

    fn flush_literal(&mut self) {
        if !self.literal.is_empty() {
            let text = std::mem::take(&mut self.literal);
            self.tokens
                .push(Token::new(TokenKind::Literal(text), self.literal_start));
        }
    }

    #[inline]
    fn peek(&self) -> char {
        self.source[self.current..].chars().next().unwrap_or('\0')
    }

    #[inline]
    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }
}

/// 去除区间首尾空白，返回切片及其起始偏移
fn trimmed(source: &str, start: usize, end: usize) -> (&str, usize) {
    let raw = &source[start..end];
    let leading = raw.len() - raw.trim_start().len();
    (raw.trim(), start + leading)
}

pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// 解析完整的单 / 双引号字符串字面量并去除转义；不是单个字面量时返回 None
pub fn parse_string_literal(s: &str) -> Option<String> {
    let quote = s.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let mut value = String::new();
    let mut chars = s[1..].chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => value.push(chars.next()?),
            c if c == quote => {
                return chars.as_str().is_empty().then_some(value);
            }
            c => value.push(c),
        }
    }
    None
}
