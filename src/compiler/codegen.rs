use crate::compiler::ast::{Expression, Tag, Template};
use crate::compiler::error::{Error, Result, SourceError};
use crate::compiler::expr::{CompiledExpr, is_builtin};
use std::collections::HashSet;
use std::path::PathBuf;

/// 表达式中自由变量的绑定来源，在代码生成时一次性确定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// 模板参数
    Param,
    /// 外层 `for` / `set` 绑定的局部变量
    Local,
    /// 表达式环境的内置名称，求值时不传入变量表
    Builtin,
    /// 运行时依次查找上下文映射与全局值
    Dynamic,
}

/// 编译后的表达式及其变量解析方案
#[derive(Debug)]
pub struct Compiled {
    pub expr: CompiledExpr,
    pub names: Vec<(String, Binding)>,
}

/// 连续输出片段，渲染时直接拼接到同一个缓冲区
#[derive(Debug)]
pub enum Piece {
    Text(String),
    Escaped(Compiled),
    Raw(Compiled),
}

/// 渲染例程的中间表示
#[derive(Debug)]
pub enum Instr {
    Emit(Vec<Piece>),
    Branch {
        arms: Vec<(Compiled, Vec<Instr>)>,
        otherwise: Option<Vec<Instr>>,
    },
    Loop {
        targets: Vec<String>,
        iterable: Compiled,
        body: Vec<Instr>,
    },
    Call {
        component: String,
        args: Vec<(String, Compiled)>,
    },
    Bind {
        name: String,
        value: Compiled,
    },
    /// 聚合 CSS 的输出位置
    Styles,
    Slot {
        name: Option<String>,
        required: bool,
        default: Option<Vec<Instr>>,
    },
    /// 渲染 block 主体并保存，交给布局的同名插槽
    Capture {
        block: String,
        body: Vec<Instr>,
    },
}

#[derive(Debug)]
pub struct RoutineParam {
    pub name: String,
    pub default: Option<Compiled>,
}

/// 一个模板的渲染例程：构建完成后不可变，可在多线程间共享
#[derive(Debug)]
pub struct Routine {
    pub name: String,
    pub source_file: Option<PathBuf>,
    pub params: Vec<RoutineParam>,
    pub body: Vec<Instr>,
    /// 依赖闭包聚合并最终处理后的 CSS
    pub css: String,
    pub layout: Option<String>,
}

/// 循环体内可用的 `loop` 变量
pub const LOOP_VAR: &str = "loop";

/// 将已校验的模板与其聚合 CSS 降级为渲染例程
pub fn generate(template: &Template, css: String) -> Result<Routine> {
    let mut lowering = Lowering {
        template,
        params: template.parameters.iter().map(|p| p.name.as_str()).collect(),
        scope: Vec::new(),
    };

    let mut params = Vec::with_capacity(template.parameters.len());
    for (index, param) in template.parameters.iter().enumerate() {
        let earlier: HashSet<&str> = template.parameters[..index]
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        let default = match &param.default {
            Some(expr) => Some(lowering.compile_with(expr, |name| {
                if earlier.contains(name) {
                    Binding::Param
                } else if is_builtin(name) {
                    Binding::Builtin
                } else {
                    Binding::Dynamic
                }
            })?),
            None => None,
        };
        params.push(RoutineParam {
            name: param.name.clone(),
            default,
        });
    }

    let body = lowering.lower_body(&template.body)?;
    Ok(Routine {
        name: template.name.clone(),
        source_file: template.source_file.clone(),
        params,
        body,
        css,
        layout: template.layout.clone(),
    })
}

struct Lowering<'a> {
    template: &'a Template,
    params: HashSet<&'a str>,
    /// 当前词法作用域内的局部变量，按绑定顺序
    scope: Vec<String>,
}

impl Lowering<'_> {
    /// 降级一段主体；其中的 `set` 绑定在主体结束后失效
    fn lower_body(&mut self, tags: &[Tag]) -> Result<Vec<Instr>> {
        let mark = self.scope.len();
        let mut instrs = Vec::new();
        let mut pieces: Vec<Piece> = Vec::new();

        for tag in tags {
            match tag {
                Tag::Literal(text) => match pieces.last_mut() {
                    Some(Piece::Text(last)) => last.push_str(text),
                    _ => pieces.push(Piece::Text(text.clone())),
                },
                Tag::Expr(expr) => pieces.push(Piece::Escaped(self.compile(expr)?)),
                Tag::RawExpr(expr) => pieces.push(Piece::Raw(self.compile(expr)?)),
                _ => {
                    flush(&mut pieces, &mut instrs);
                    instrs.push(self.lower_structural(tag)?);
                }
            }
        }
        flush(&mut pieces, &mut instrs);

        self.scope.truncate(mark);
        Ok(instrs)
    }

    fn lower_structural(&mut self, tag: &Tag) -> Result<Instr> {
        let instr = match tag {
            Tag::Style => Instr::Styles,
            Tag::Component(call) => Instr::Call {
                component: call.name.clone(),
                args: call
                    .args
                    .iter()
                    .map(|(name, expr)| Ok((name.clone(), self.compile(expr)?)))
                    .collect::<Result<_>>()?,
            },
            Tag::If {
                cond,
                body,
                elifs,
                else_body,
            } => {
                let mut arms = vec![(self.compile(cond)?, self.lower_body(body)?)];
                for (cond, body) in elifs {
                    arms.push((self.compile(cond)?, self.lower_body(body)?));
                }
                let otherwise = match else_body {
                    Some(body) => Some(self.lower_body(body)?),
                    None => None,
                };
                Instr::Branch { arms, otherwise }
            }
            Tag::For {
                targets,
                iterable,
                body,
            } => {
                let iterable = self.compile(iterable)?;
                let mark = self.scope.len();
                self.scope.extend(targets.iter().cloned());
                self.scope.push(LOOP_VAR.to_string());
                let body = self.lower_body(body)?;
                self.scope.truncate(mark);
                Instr::Loop {
                    targets: targets.clone(),
                    iterable,
                    body,
                }
            }
            Tag::Assignment { target, value } => {
                // 右侧先于绑定编译：`set x = x + 1` 引用的是外层的 x
                let value = self.compile(value)?;
                self.scope.push(target.clone());
                Instr::Bind {
                    name: target.clone(),
                    value,
                }
            }
            Tag::Slot {
                name,
                required,
                default,
            } => Instr::Slot {
                name: name.clone(),
                required: *required,
                default: match default {
                    Some(body) => Some(self.lower_body(body)?),
                    None => None,
                },
            },
            Tag::Block { name, body } => Instr::Capture {
                block: name.clone(),
                body: self.lower_body(body)?,
            },
            Tag::Literal(text) => Instr::Emit(vec![Piece::Text(text.clone())]),
            Tag::Expr(expr) => Instr::Emit(vec![Piece::Escaped(self.compile(expr)?)]),
            Tag::RawExpr(expr) => Instr::Emit(vec![Piece::Raw(self.compile(expr)?)]),
        };
        Ok(instr)
    }

    fn compile(&self, expr: &Expression) -> Result<Compiled> {
        self.compile_with(expr, |name| self.classify(name))
    }

    fn compile_with(
        &self,
        expr: &Expression,
        classify: impl Fn(&str) -> Binding,
    ) -> Result<Compiled> {
        let compiled = CompiledExpr::compile(&expr.src).map_err(|e| {
            Error::Parse(SourceError::detached(
                &self.template.name,
                self.template.source_file.as_deref(),
                format!("表达式 `{}` 无效：{e}", expr.src),
            ))
        })?;
        let names = compiled
            .free_names
            .iter()
            .map(|name| (name.clone(), classify(name)))
            .collect();
        Ok(Compiled {
            expr: compiled,
            names,
        })
    }

    /// 局部变量遮蔽同名参数，二者都遮蔽内置名称；其余名称推迟到运行时查找
    fn classify(&self, name: &str) -> Binding {
        if self.scope.iter().any(|local| local == name) {
            Binding::Local
        } else if self.params.contains(name) {
            Binding::Param
        } else if is_builtin(name) {
            Binding::Builtin
        } else {
            Binding::Dynamic
        }
    }
}

fn flush(pieces: &mut Vec<Piece>, instrs: &mut Vec<Instr>) {
    if !pieces.is_empty() {
        instrs.push(Instr::Emit(std::mem::take(pieces)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::TemplateParameter;
    use std::collections::BTreeSet;

    fn template(params: &[(&str, Option<&str>)], body: Vec<Tag>) -> Template {
        Template {
            name: "t".into(),
            source_file: None,
            parameters: params
                .iter()
                .map(|(name, default)| TemplateParameter {
                    name: name.to_string(),
                    type_hint: None,
                    default: default.map(|d| Expression::new(d, 0)),
                })
                .collect(),
            body,
            css: String::new(),
            layout: None,
            component_calls: Vec::new(),
            style_includes: BTreeSet::new(),
            blocks: BTreeSet::new(),
            layout_info: None,
        }
    }

    fn expr(src: &str) -> Expression {
        Expression::new(src, 0)
    }

    fn bindings(compiled: &Compiled) -> Vec<(&str, Binding)> {
        compiled
            .names
            .iter()
            .map(|(n, b)| (n.as_str(), *b))
            .collect()
    }

    #[test]
    fn adjacent_output_is_batched() {
        let t = template(
            &[("title", None)],
            vec![
                Tag::Literal("<h1>".into()),
                Tag::Expr(expr("title")),
                Tag::Literal("</h1>".into()),
                Tag::Style,
                Tag::RawExpr(expr("body")),
            ],
        );
        let routine = generate(&t, String::new()).unwrap();
        assert_eq!(routine.body.len(), 3);
        let Instr::Emit(pieces) = &routine.body[0] else {
            panic!("expected emit");
        };
        assert_eq!(pieces.len(), 3);
        let Piece::Escaped(title) = &pieces[1] else {
            panic!("expected escaped piece");
        };
        assert_eq!(bindings(title), vec![("title", Binding::Param)]);
        let Instr::Emit(raw) = &routine.body[2] else {
            panic!("expected emit");
        };
        assert!(matches!(
            &raw[0],
            Piece::Raw(c) if bindings(c) == vec![("body", Binding::Dynamic)]
        ));
    }

    #[test]
    fn loop_targets_and_set_are_local() {
        let t = template(
            &[("item", None)],
            vec![
                Tag::For {
                    targets: vec!["item".into()],
                    iterable: expr("items"),
                    body: vec![
                        Tag::Assignment {
                            target: "n".into(),
                            value: expr("loop.index + item"),
                        },
                        Tag::Expr(expr("n")),
                    ],
                },
                Tag::Expr(expr("n ~ item")),
            ],
        );
        let routine = generate(&t, String::new()).unwrap();
        let Instr::Loop { iterable, body, .. } = &routine.body[0] else {
            panic!("expected loop");
        };
        assert_eq!(bindings(iterable), vec![("items", Binding::Dynamic)]);
        let Instr::Bind { value, .. } = &body[0] else {
            panic!("expected bind");
        };
        assert_eq!(
            bindings(value),
            vec![("item", Binding::Local), ("loop", Binding::Local)]
        );
        let Instr::Emit(pieces) = &body[1] else {
            panic!("expected emit");
        };
        assert!(matches!(
            &pieces[0],
            Piece::Escaped(c) if bindings(c) == vec![("n", Binding::Local)]
        ));

        // 循环结束后局部变量失效
        let Instr::Emit(after) = &routine.body[1] else {
            panic!("expected emit");
        };
        let Piece::Escaped(after) = &after[0] else {
            panic!("expected escaped");
        };
        assert_eq!(
            bindings(after),
            vec![("item", Binding::Param), ("n", Binding::Dynamic)]
        );
    }

    #[test]
    fn defaults_see_earlier_params_only() {
        let t = template(
            &[("a", Some("1")), ("b", Some("a + c")), ("c", Some("2"))],
            Vec::new(),
        );
        let routine = generate(&t, String::new()).unwrap();
        let default = routine.params[1].default.as_ref().unwrap();
        assert_eq!(
            bindings(default),
            vec![("a", Binding::Param), ("c", Binding::Dynamic)]
        );
    }

    #[test]
    fn builtins_yield_to_params_and_locals() {
        let t = template(
            &[("range", None)],
            vec![
                Tag::Expr(expr("range ~ dict(a=1)")),
                Tag::For {
                    targets: vec!["debug".into()],
                    iterable: expr("[1]"),
                    body: vec![Tag::Expr(expr("debug"))],
                },
            ],
        );
        let routine = generate(&t, String::new()).unwrap();
        let Instr::Emit(pieces) = &routine.body[0] else {
            panic!("expected emit");
        };
        assert!(matches!(
            &pieces[0],
            Piece::Escaped(c)
                if bindings(c) == vec![("dict", Binding::Builtin), ("range", Binding::Param)]
        ));
        let Instr::Loop { body, .. } = &routine.body[1] else {
            panic!("expected loop");
        };
        let Instr::Emit(pieces) = &body[0] else {
            panic!("expected emit");
        };
        assert!(matches!(
            &pieces[0],
            Piece::Escaped(c) if bindings(c) == vec![("debug", Binding::Local)]
        ));
    }

    #[test]
    fn set_value_sees_outer_binding() {
        let t = template(
            &[],
            vec![Tag::Assignment {
                target: "x".into(),
                value: expr("x + 1"),
            }],
        );
        let routine = generate(&t, String::new()).unwrap();
        let Instr::Bind { value, .. } = &routine.body[0] else {
            panic!("expected bind");
        };
        assert_eq!(bindings(value), vec![("x", Binding::Dynamic)]);
    }
}
