use crate::compiler::ast::{Expression, Tag};
use crate::compiler::error::{Result, SourceCtx};
use crate::compiler::tags::{FlatKind, FlatTag};
use std::iter::Peekable;
use std::vec::IntoIter;

/// 将扁平标签流组装为嵌套语法树
///
/// `param` / `layout` / `include` 只影响模板元数据，不进入语法树。
pub(crate) fn build_tree(ctx: &SourceCtx<'_>, tags: Vec<FlatTag>) -> Result<Vec<Tag>> {
    let mut builder = TreeBuilder {
        ctx,
        tags: tags.into_iter().peekable(),
    };
    let (body, stray) = builder.parse_nodes()?;
    if let Some(tag) = stray {
        return Err(ctx.parse_error(
            tag.offset,
            format!("{} 没有对应的起始标签", tag.describe()),
        ));
    }
    Ok(body)
}

struct TreeBuilder<'a> {
    ctx: &'a SourceCtx<'a>,
    tags: Peekable<IntoIter<FlatTag>>,
}

impl TreeBuilder<'_> {
    /// 读取节点直到遇到结束类标签（elif / else / end*），返回该标签供调用方判断
    fn parse_nodes(&mut self) -> Result<(Vec<Tag>, Option<FlatTag>)> {
        let mut body = Vec::new();
        while let Some(tag) = self.tags.next() {
            let offset = tag.offset;
            match tag.kind {
                FlatKind::Literal(text) => push_literal(&mut body, text),
                FlatKind::Expr(expr) => body.push(Tag::Expr(expr)),
                FlatKind::RawExpr(expr) => body.push(Tag::RawExpr(expr)),
                FlatKind::Component(call) => body.push(Tag::Component(call)),
                FlatKind::Styles => body.push(Tag::Style),
                FlatKind::Set { target, value } => body.push(Tag::Assignment { target, value }),
                FlatKind::Param(_) | FlatKind::Layout(_) | FlatKind::Include(_) => {}
                FlatKind::If(cond) => body.push(self.parse_if(cond, offset)?),
                FlatKind::For { targets, iterable } => {
                    let inner = self.parse_until(offset, "{% for %}", |k| *k == FlatKind::EndFor)?;
                    body.push(Tag::For {
                        targets,
                        iterable,
                        body: inner,
                    });
                }
                FlatKind::Slot { name, required } => {
                    // 默认插槽与 required 插槽都没有默认内容
                    let default = match &name {
                        Some(_) if !required => Some(self.parse_until(
                            offset,
                            "{% slot %}",
                            |k| *k == FlatKind::EndSlot,
                        )?),
                        _ => None,
                    };
                    body.push(Tag::Slot {
                        name,
                        required,
                        default,
                    });
                }
                FlatKind::Block(name) => {
                    let inner =
                        self.parse_until(offset, "{% block %}", |k| *k == FlatKind::EndBlock)?;
                    body.push(Tag::Block { name, body: inner });
                }
                kind @ (FlatKind::ElIf(_)
                | FlatKind::Else
                | FlatKind::EndIf
                | FlatKind::EndFor
                | FlatKind::EndSlot
                | FlatKind::EndBlock) => {
                    return Ok((body, Some(FlatTag::new(kind, offset))));
                }
            }
        }
        Ok((body, None))
    }

    /// 读取主体，要求以满足 `is_end` 的标签结束
    fn parse_until(
        &mut self,
        open_offset: usize,
        opener: &str,
        is_end: impl Fn(&FlatKind) -> bool,
    ) -> Result<Vec<Tag>> {
        let (body, end) = self.parse_nodes()?;
        match end {
            Some(tag) if is_end(&tag.kind) => Ok(body),
            Some(tag) => Err(self.ctx.parse_error(
                tag.offset,
                format!("{opener} 内出现了不匹配的 {}", tag.describe()),
            )),
            None => Err(self
                .ctx
                .parse_error(open_offset, format!("{opener} 缺少结束标签"))),
        }
    }

    fn parse_if(&mut self, cond: Expression, offset: usize) -> Result<Tag> {
        let mut elifs = Vec::new();
        let mut else_body = None;
        let (body, mut end) = self.parse_nodes()?;

        loop {
            let Some(tag) = end else {
                return Err(self.ctx.parse_error(offset, "{% if %} 缺少 {% endif %}"));
            };
            match tag.kind {
                FlatKind::ElIf(elif_cond) => {
                    let (elif_body, next) = self.parse_nodes()?;
                    elifs.push((elif_cond, elif_body));
                    end = next;
                }
                FlatKind::Else => {
                    let else_nodes =
                        self.parse_until(offset, "{% if %}", |k| *k == FlatKind::EndIf)?;
                    else_body = Some(else_nodes);
                    break;
                }
                FlatKind::EndIf => break,
                _ => {
                    return Err(self.ctx.parse_error(
                        tag.offset,
                        format!("{{% if %}} 内出现了不匹配的 {}", tag.describe()),
                    ));
                }
            }
        }

        Ok(Tag::If {
            cond,
            body,
            elifs,
            else_body,
        })
    }
}

fn push_literal(body: &mut Vec<Tag>, text: String) {
    if text.is_empty() {
        return;
    }
    if let Some(Tag::Literal(last)) = body.last_mut() {
        last.push_str(&text);
    } else {
        body.push(Tag::Literal(text));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::error::Error;
    use crate::compiler::lexer::tokenize;
    use crate::compiler::tags::build_tags;

    fn tree(source: &str) -> Result<Vec<Tag>> {
        let ctx = SourceCtx::new("test", None, source);
        let tags = build_tags(&ctx, tokenize(&ctx)?)?;
        build_tree(&ctx, tags)
    }

    fn parse_err(source: &str) -> String {
        match tree(source) {
            Err(Error::Parse(e)) => e.message,
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_if_elif_else() {
        let nodes = tree("{% if a %}A{% elif b %}B{% elif c %}C{% else %}D{% endif %}").unwrap();
        let Tag::If {
            cond,
            body,
            elifs,
            else_body,
        } = &nodes[0]
        else {
            panic!("expected if");
        };
        assert_eq!(cond.src, "a");
        assert_eq!(body, &vec![Tag::Literal("A".into())]);
        assert_eq!(elifs.len(), 2);
        assert_eq!(elifs[1].0.src, "c");
        assert_eq!(else_body, &Some(vec![Tag::Literal("D".into())]));
    }

    #[test]
    fn test_nested_for_and_block() {
        let nodes =
            tree("{% block main %}{% for x in xs %}<i>{{ x }}</i>{% endfor %}{% endblock %}")
                .unwrap();
        let Tag::Block { name, body } = &nodes[0] else {
            panic!("expected block");
        };
        assert_eq!(name, "main");
        assert!(matches!(&body[0], Tag::For { body, .. } if body.len() == 3));
    }

    #[test]
    fn test_slot_shapes() {
        let nodes =
            tree("{% slot %}{% slot side required %}{% slot foot %}<p>f</p>{% endslot %}").unwrap();
        assert_eq!(
            nodes,
            vec![
                Tag::Slot {
                    name: None,
                    required: false,
                    default: None
                },
                Tag::Slot {
                    name: Some("side".into()),
                    required: true,
                    default: None
                },
                Tag::Slot {
                    name: Some("foot".into()),
                    required: false,
                    default: Some(vec![Tag::Literal("<p>f</p>".into())])
                },
            ]
        );
    }

    #[test]
    fn test_pragmas_are_not_nodes() {
        let nodes = tree(r#"{% param a %}{% layout "base" %}x{% include "y" %}y{% styles %}"#)
            .unwrap();
        assert_eq!(nodes, vec![Tag::Literal("xy".into()), Tag::Style]);
    }

    #[test]
    fn test_unbalanced_tags() {
        assert!(parse_err("{% if a %}x").contains("endif"));
        assert!(parse_err("{% endif %}").contains("没有对应"));
        assert!(parse_err("{% else %}").contains("没有对应"));
        assert!(parse_err("{% for x in y %}{% endif %}").contains("不匹配"));
        assert!(parse_err("{% if a %}{% else %}{% else %}{% endif %}").contains("不匹配"));
        assert!(parse_err("{% block b %}x").contains("缺少结束标签"));
        assert!(parse_err("{% slot s %}x").contains("缺少结束标签"));
    }
}
