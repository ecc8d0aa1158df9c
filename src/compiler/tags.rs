use crate::compiler::ast::{ComponentCall, Expression, TemplateParameter};
use crate::compiler::error::{Result, SourceCtx};
use crate::compiler::expr;
use crate::compiler::lexer::{Token, TokenKind, is_identifier};

/// 参数名保留字：由渲染调用方控制样式输出
pub const RESERVED_PARAM: &str = "with_styles";

/// 语句与表达式组装后的扁平标签，尚未嵌套
#[derive(Debug, Clone, PartialEq)]
pub enum FlatKind {
    Literal(String),
    Expr(Expression),
    RawExpr(Expression),
    Component(ComponentCall),
    If(Expression),
    ElIf(Expression),
    Else,
    EndIf,
    For {
        targets: Vec<String>,
        iterable: Expression,
    },
    EndFor,
    Set {
        target: String,
        value: Expression,
    },
    Param(TemplateParameter),
    Layout(String),
    Include(String),
    Styles,
    Slot {
        name: Option<String>,
        required: bool,
    },
    EndSlot,
    Block(String),
    EndBlock,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlatTag {
    pub kind: FlatKind,
    pub offset: usize,
}

impl FlatTag {
    pub fn new(kind: FlatKind, offset: usize) -> Self {
        Self { kind, offset }
    }

    /// 简短描述，用于错误信息
    pub fn describe(&self) -> &'static str {
        match self.kind {
            FlatKind::Literal(_) => "文本",
            FlatKind::Expr(_) => "{{ }}",
            FlatKind::RawExpr(_) => "{% html %}",
            FlatKind::Component(_) => "{< >}",
            FlatKind::If(_) => "{% if %}",
            FlatKind::ElIf(_) => "{% elif %}",
            FlatKind::Else => "{% else %}",
            FlatKind::EndIf => "{% endif %}",
            FlatKind::For { .. } => "{% for %}",
            FlatKind::EndFor => "{% endfor %}",
            FlatKind::Set { .. } => "{% set %}",
            FlatKind::Param(_) => "{% param %}",
            FlatKind::Layout(_) => "{% layout %}",
            FlatKind::Include(_) => "{% include %}",
            FlatKind::Styles => "{% styles %}",
            FlatKind::Slot { .. } => "{% slot %}",
            FlatKind::EndSlot => "{% endslot %}",
            FlatKind::Block(_) => "{% block %}",
            FlatKind::EndBlock => "{% endblock %}",
        }
    }
}

/// 将 Token 流组装为扁平标签序列
pub(crate) fn build_tags(ctx: &SourceCtx<'_>, tokens: Vec<Token>) -> Result<Vec<FlatTag>> {
    let mut tags = Vec::new();
    let mut iter = tokens.into_iter().peekable();

    while let Some(token) = iter.next() {
        let start = token.offset;
        match token.kind {
            TokenKind::Literal(text) => tags.push(FlatTag::new(FlatKind::Literal(text), start)),
            TokenKind::ExprStart => {
                let (src, offset) = expect_src(ctx, iter.next(), start)?;
                expect_kind(ctx, iter.next(), &TokenKind::ExprEnd, start)?;
                let expr = checked_expression(ctx, &src, offset)?;
                tags.push(FlatTag::new(FlatKind::Expr(expr), start));
            }
            TokenKind::ComponentStart => {
                let (src, offset) = expect_src(ctx, iter.next(), start)?;
                expect_kind(ctx, iter.next(), &TokenKind::ComponentEnd, start)?;
                let call = parse_component_call(ctx, &src, offset, start)?;
                tags.push(FlatTag::new(FlatKind::Component(call), start));
            }
            TokenKind::StatementStart => {
                let keyword = match iter.next() {
                    Some(Token {
                        kind: TokenKind::Keyword(word),
                        ..
                    }) => word,
                    _ => return Err(ctx.parse_error(start, "语句缺少关键字")),
                };
                let mut args = Vec::new();
                while let Some(next) = iter.next_if(|t| t.kind != TokenKind::StatementEnd) {
                    args.push(next);
                }
                expect_kind(ctx, iter.next(), &TokenKind::StatementEnd, start)?;
                let kind = build_statement(ctx, &keyword, args, start)?;
                tags.push(FlatTag::new(kind, start));
            }
            other => {
                return Err(ctx.parse_error(start, format!("意外的词法单元 {other:?}")));
            }
        }
    }

    Ok(tags)
}

fn build_statement(
    ctx: &SourceCtx<'_>,
    keyword: &str,
    args: Vec<Token>,
    start: usize,
) -> Result<FlatKind> {
    let mut args = args.into_iter();
    let kind = match keyword {
        "if" | "elif" | "html" => {
            let (src, offset) = expect_src(ctx, args.next(), start)?;
            let expr = checked_expression(ctx, &src, offset)?;
            match keyword {
                "if" => FlatKind::If(expr),
                "elif" => FlatKind::ElIf(expr),
                _ => FlatKind::RawExpr(expr),
            }
        }
        "else" => FlatKind::Else,
        "endif" => FlatKind::EndIf,
        "for" => {
            let (src, offset) = expect_src(ctx, args.next(), start)?;
            parse_for(ctx, &src, offset)?
        }
        "endfor" => FlatKind::EndFor,
        "set" => {
            let (src, offset) = expect_src(ctx, args.next(), start)?;
            parse_set(ctx, &src, offset)?
        }
        "param" => {
            let (src, offset) = expect_src(ctx, args.next(), start)?;
            FlatKind::Param(parse_param(ctx, &src, offset)?)
        }
        "layout" | "include" => {
            let name = match args.next() {
                Some(Token {
                    kind: TokenKind::StringLit(name),
                    ..
                }) => name,
                _ => return Err(ctx.parse_error(start, format!("`{keyword}` 需要模板名"))),
            };
            if keyword == "layout" {
                FlatKind::Layout(name)
            } else {
                FlatKind::Include(name)
            }
        }
        "styles" => FlatKind::Styles,
        "slot" => {
            let mut name = None;
            let mut required = false;
            for token in args.by_ref() {
                match token.kind {
                    TokenKind::Ident(ident) => name = Some(ident),
                    TokenKind::Keyword(word) if word == "required" => required = true,
                    other => {
                        return Err(
                            ctx.parse_error(token.offset, format!("slot 语句中意外的 {other:?}"))
                        );
                    }
                }
            }
            if required && name.is_none() {
                return Err(ctx.parse_error(start, "默认插槽不能声明为 required"));
            }
            FlatKind::Slot { name, required }
        }
        "endslot" => FlatKind::EndSlot,
        "block" => match args.next() {
            Some(Token {
                kind: TokenKind::Ident(name),
                ..
            }) => FlatKind::Block(name),
            _ => return Err(ctx.parse_error(start, "`block` 需要名称")),
        },
        "endblock" => FlatKind::EndBlock,
        other => return Err(ctx.parse_error(start, format!("未知的语句关键字 `{other}`"))),
    };

    if let Some(extra) = args.next() {
        return Err(ctx.parse_error(extra.offset, format!("`{keyword}` 语句中多余的内容")));
    }
    Ok(kind)
}

fn expect_src(ctx: &SourceCtx<'_>, token: Option<Token>, start: usize) -> Result<(String, usize)> {
    match token {
        Some(Token {
            kind: TokenKind::RawExprSrc(src) | TokenKind::StmtSrc(src),
            offset,
        }) => Ok((src, offset)),
        _ => Err(ctx.parse_error(start, "标签缺少表达式")),
    }
}

fn expect_kind(
    ctx: &SourceCtx<'_>,
    token: Option<Token>,
    kind: &TokenKind,
    start: usize,
) -> Result<()> {
    match token {
        Some(token) if &token.kind == kind => Ok(()),
        Some(token) => Err(ctx.parse_error(token.offset, format!("期望 {kind:?}"))),
        None => Err(ctx.parse_error(start, format!("期望 {kind:?}，但源码已结束"))),
    }
}

/// 交给表达式服务检查语法，错误转换为带位置的语法错误
fn checked_expression(ctx: &SourceCtx<'_>, src: &str, offset: usize) -> Result<Expression> {
    let src = src.trim();
    if src.is_empty() {
        return Err(ctx.parse_error(offset, "缺少表达式"));
    }
    expr::check_syntax(src)
        .map_err(|e| ctx.parse_error(offset, format!("表达式 `{src}` 无效：{e}")))?;
    Ok(Expression::new(src, offset))
}

/// `{<Name(kw=expr, ...)>}`
fn parse_component_call(
    ctx: &SourceCtx<'_>,
    src: &str,
    offset: usize,
    start: usize,
) -> Result<ComponentCall> {
    let shape_error = || {
        ctx.parse_error(
            offset,
            format!("组件调用 `{src}` 必须形如 `Name(kw=expr, ...)`"),
        )
    };

    let top = top_level_chars(src);
    let open = top
        .iter()
        .find(|(_, c)| *c == '(')
        .map(|(i, _)| *i)
        .ok_or_else(shape_error)?;
    let close = top
        .iter()
        .find(|(i, c)| *i > open && *c == ')')
        .map(|(i, _)| *i)
        .ok_or_else(shape_error)?;
    if close + 1 != src.len() {
        return Err(shape_error());
    }

    let callee = src[..open].trim();
    if callee.is_empty() || !callee.split('.').all(is_identifier) {
        return Err(ctx.parse_error(offset, format!("组件名 `{callee}` 无效")));
    }

    let inner_offset = open + 1;
    let inner = &src[inner_offset..close];
    let mut args: Vec<(String, Expression)> = Vec::new();
    for (rel, piece) in split_top_level(inner, ',') {
        if piece.trim().is_empty() {
            if rel + piece.len() == inner.len() && !args.is_empty() {
                continue;
            }
            if inner.trim().is_empty() {
                continue;
            }
            return Err(ctx.parse_error(offset + inner_offset + rel, "组件参数为空"));
        }
        let piece_offset = offset + inner_offset + rel;
        let Some(eq) = find_assign(piece) else {
            return Err(ctx.parse_error(
                piece_offset,
                format!("组件参数 `{}` 必须以关键字形式传入", piece.trim()),
            ));
        };
        let name = piece[..eq].trim();
        if !is_identifier(name) {
            return Err(ctx.parse_error(piece_offset, format!("参数名 `{name}` 无效")));
        }
        if name == RESERVED_PARAM {
            return Err(ctx.parse_error(piece_offset, "`with_styles` 由组件调用自动设置"));
        }
        if args.iter().any(|(n, _)| n == name) {
            return Err(ctx.parse_error(piece_offset, format!("重复的组件参数 `{name}`")));
        }
        let value_src = &piece[eq + 1..];
        let value_offset = piece_offset + eq + 1 + leading_ws(value_src);
        let value = checked_expression(ctx, value_src, value_offset)?;
        args.push((name.to_string(), value));
    }

    Ok(ComponentCall {
        name: callee.replace('.', "/"),
        args,
        offset: start,
    })
}

/// `t1[, t2] in expr`
fn parse_for(ctx: &SourceCtx<'_>, src: &str, offset: usize) -> Result<FlatKind> {
    let Some(pos) = find_keyword(src, "in") else {
        return Err(ctx.parse_error(offset, "for 语句需要 `in`"));
    };
    let mut targets = Vec::new();
    for target in src[..pos].split(',') {
        let target = target.trim();
        if !is_identifier(target) {
            return Err(ctx.parse_error(offset, format!("循环变量 `{target}` 无效")));
        }
        if targets.iter().any(|t| t == target) {
            return Err(ctx.parse_error(offset, format!("重复的循环变量 `{target}`")));
        }
        targets.push(target.to_string());
    }
    let iter_src = &src[pos + 2..];
    let iter_offset = offset + pos + 2 + leading_ws(iter_src);
    let iterable = checked_expression(ctx, iter_src, iter_offset)?;
    Ok(FlatKind::For { targets, iterable })
}

/// `name = expr` 或 `name: type = expr`
fn parse_set(ctx: &SourceCtx<'_>, src: &str, offset: usize) -> Result<FlatKind> {
    let Some(eq) = find_assign(src) else {
        return Err(ctx.parse_error(offset, "set 语句需要 `name = expr`"));
    };
    let (target, _) = split_annotation(&src[..eq]);
    if !is_identifier(target) {
        return Err(ctx.parse_error(
            offset,
            format!("set 只支持单个变量赋值，`{}` 无效", src[..eq].trim()),
        ));
    }
    let value_src = &src[eq + 1..];
    let value_offset = offset + eq + 1 + leading_ws(value_src);
    let value = checked_expression(ctx, value_src, value_offset)?;
    Ok(FlatKind::Set {
        target: target.to_string(),
        value,
    })
}

/// `name[: type][ = default]`
fn parse_param(ctx: &SourceCtx<'_>, src: &str, offset: usize) -> Result<TemplateParameter> {
    let (decl, default) = match find_assign(src) {
        Some(eq) => {
            let value_src = &src[eq + 1..];
            let value_offset = offset + eq + 1 + leading_ws(value_src);
            (&src[..eq], Some(checked_expression(ctx, value_src, value_offset)?))
        }
        None => (src, None),
    };
    let (name, type_hint) = split_annotation(decl);
    if !is_identifier(name) {
        return Err(ctx.parse_error(offset, format!("参数名 `{name}` 无效")));
    }
    if name == RESERVED_PARAM {
        return Err(ctx.parse_error(offset, "`with_styles` 是保留参数名"));
    }
    if let Some(hint) = type_hint
        && hint.is_empty()
    {
        return Err(ctx.parse_error(offset, format!("参数 `{name}` 的类型标注为空")));
    }
    Ok(TemplateParameter {
        name: name.to_string(),
        type_hint: type_hint.map(str::to_string),
        default,
    })
}

/// `name: type` → (name, Some(type))
fn split_annotation(decl: &str) -> (&str, Option<&str>) {
    match top_level_chars(decl).into_iter().find(|(_, c)| *c == ':') {
        Some((i, _)) => (decl[..i].trim(), Some(decl[i + 1..].trim())),
        None => (decl.trim(), None),
    }
}

fn leading_ws(s: &str) -> usize {
    s.len() - s.trim_start().len()
}

/// 位于最外层（不在括号或字符串内）的字符及其字节偏移；括号本身计入
fn top_level_chars(src: &str) -> Vec<(usize, char)> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in src.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => {
                if depth == 0 {
                    out.push((i, c));
                }
                quote = Some(c);
            }
            '(' | '[' | '{' => {
                if depth == 0 {
                    out.push((i, c));
                }
                depth += 1;
            }
            ')' | ']' | '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    out.push((i, c));
                }
            }
            _ if depth == 0 => out.push((i, c)),
            _ => {}
        }
    }
    out
}

/// 按最外层分隔符切分，返回 (相对偏移, 片段)
pub(crate) fn split_top_level(src: &str, sep: char) -> Vec<(usize, &str)> {
    let mut parts = Vec::new();
    let mut last = 0;
    for (i, c) in top_level_chars(src) {
        if c == sep {
            parts.push((last, &src[last..i]));
            last = i + sep.len_utf8();
        }
    }
    parts.push((last, &src[last..]));
    parts
}

/// 最外层的单个 `=`（排除 `==`、`!=`、`<=`、`>=`）
fn find_assign(src: &str) -> Option<usize> {
    let bytes = src.as_bytes();
    top_level_chars(src).into_iter().find_map(|(i, c)| {
        if c != '=' {
            return None;
        }
        let prev = i.checked_sub(1).map(|p| bytes[p]);
        let next = bytes.get(i + 1).copied();
        let is_comparison =
            matches!(prev, Some(b'=' | b'!' | b'<' | b'>')) || next == Some(b'=');
        (!is_comparison).then_some(i)
    })
}

/// 最外层、前后均为空白的关键字
fn find_keyword(src: &str, word: &str) -> Option<usize> {
    let top = top_level_chars(src);
    let bytes = src.as_bytes();
    top.iter().find_map(|&(i, _)| {
        if !src[i..].starts_with(word) {
            return None;
        }
        let before_ok = i > 0 && bytes[i - 1].is_ascii_whitespace();
        let after_ok = bytes
            .get(i + word.len())
            .is_some_and(|b| b.is_ascii_whitespace());
        (before_ok && after_ok).then_some(i)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::error::Error;
    use crate::compiler::lexer::tokenize;

    fn build(source: &str) -> Result<Vec<FlatKind>> {
        let ctx = SourceCtx::new("test", None, source);
        let tokens = tokenize(&ctx)?;
        build_tags(&ctx, tokens).map(|tags| tags.into_iter().map(|t| t.kind).collect())
    }

    fn parse_err(source: &str) -> String {
        match build(source) {
            Err(Error::Parse(e)) => e.message,
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_component_call_with_kwargs() {
        let tags = build(r#"{<Card(title="a, b", items=[1, 2], n=x == 1)>}"#).unwrap();
        let FlatKind::Component(call) = &tags[0] else {
            panic!("expected component");
        };
        assert_eq!(call.name, "Card");
        let names: Vec<_> = call.args.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["title", "items", "n"]);
        assert_eq!(call.args[0].1.src, r#""a, b""#);
        assert_eq!(call.args[2].1.src, "x == 1");
    }

    #[test]
    fn test_dotted_component_name() {
        let tags = build("{<forms.Input()>}").unwrap();
        assert!(matches!(
            &tags[0],
            FlatKind::Component(c) if c.name == "forms/Input" && c.args.is_empty()
        ));
    }

    #[test]
    fn test_component_rejects_positional_args() {
        assert!(parse_err("{<Card(title)>}").contains("关键字"));
        assert!(parse_err("{<Card>}").contains("Name(kw=expr"));
        assert!(parse_err("{<card.x-y()>}").contains("组件名"));
        assert!(parse_err("{<Card(a=1, a=2)>}").contains("重复"));
    }

    #[test]
    fn test_offsets_point_into_source() {
        let source = "{<Card(a=1)>}";
        let tags = build(source).unwrap();
        let FlatKind::Component(call) = &tags[0] else {
            panic!("expected component");
        };
        assert_eq!(&source[call.args[0].1.offset..call.args[0].1.offset + 1], "1");
    }

    #[test]
    fn test_for_targets() {
        let tags = build("{% for k, v in items.items() %}{% endfor %}").unwrap();
        assert_eq!(
            tags[0],
            FlatKind::For {
                targets: vec!["k".into(), "v".into()],
                iterable: Expression::new("items.items()", 15),
            }
        );
        assert!(parse_err("{% for x items %}").contains("in"));
    }

    #[test]
    fn test_set_shapes() {
        let tags = build("{% set total: int = a + b %}").unwrap();
        assert!(matches!(
            &tags[0],
            FlatKind::Set { target, value } if target == "total" && value.src == "a + b"
        ));
        assert!(parse_err("{% set a.b = 1 %}").contains("单个变量"));
        assert!(parse_err("{% set a, b = 1 %}").contains("单个变量"));
        assert!(parse_err("{% set a == 1 %}").contains("name = expr"));
    }

    #[test]
    fn test_param_declarations() {
        let tags = build(r#"{% param title %}{% param size: int = 3 %}{% param cls = "x=y" %}"#)
            .unwrap();
        let params: Vec<_> = tags
            .iter()
            .filter_map(|t| match t {
                FlatKind::Param(p) => Some(p.clone()),
                _ => None,
            })
            .collect();
        assert!(params[0].is_required());
        assert_eq!(params[1].type_hint.as_deref(), Some("int"));
        assert_eq!(params[1].default.as_ref().unwrap().src, "3");
        assert_eq!(params[2].default.as_ref().unwrap().src, r#""x=y""#);
        assert!(parse_err("{% param with_styles %}").contains("保留"));
    }

    #[test]
    fn test_slot_forms() {
        let tags = build("{% slot %}{% slot aside required %}").unwrap();
        assert_eq!(
            tags,
            vec![
                FlatKind::Slot {
                    name: None,
                    required: false
                },
                FlatKind::Slot {
                    name: Some("aside".into()),
                    required: true
                },
            ]
        );
        assert!(parse_err("{% slot required %}").contains("required"));
    }

    #[test]
    fn test_expression_syntax_checked() {
        assert!(parse_err("{{ a + }}").contains("无效"));
        assert!(parse_err("{% if (x %}{% endif %}").contains("无效"));
    }
}
