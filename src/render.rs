//! 渲染例程的解释执行。每次调用使用独立的输出缓冲区与局部变量栈，不做任何 I/O。

use crate::compiler::codegen::{Binding, Compiled, Instr, LOOP_VAR, Piece, Routine};
use crate::compiler::error::RenderError;
use crate::registry::Registry;
use minijinja::Value;
use minijinja::value::ValueKind;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

type RenderResult<T> = std::result::Result<T, RenderError>;

/// 布局调用时由使用方传入的插槽内容
#[derive(Debug, Default, Clone)]
pub(crate) struct SlotFill {
    /// 使用方 block 之外的输出
    pub default: String,
    pub blocks: HashMap<String, String>,
    /// 使用方的聚合 CSS
    pub css: String,
}

/// 一次例程调用的输入
#[derive(Debug, Clone)]
pub(crate) struct Invocation {
    pub args: BTreeMap<String, Value>,
    /// 透传给嵌套组件的上下文映射
    pub context: Arc<BTreeMap<String, Value>>,
    pub with_styles: bool,
    pub fill: Option<SlotFill>,
}

impl Invocation {
    pub fn new(args: BTreeMap<String, Value>, with_styles: bool) -> Self {
        Self {
            args,
            context: Arc::new(BTreeMap::new()),
            with_styles,
            fill: None,
        }
    }
}

pub(crate) fn render_routine(
    registry: &Registry,
    routine: &Routine,
    invocation: Invocation,
) -> RenderResult<String> {
    let Invocation {
        mut args,
        context,
        with_styles,
        fill,
    } = invocation;

    let mut frame = Frame {
        registry,
        routine,
        params: BTreeMap::new(),
        locals: Vec::new(),
        context,
        with_styles,
        fill,
        blocks: HashMap::new(),
    };

    for param in &routine.params {
        let value = match args.remove(&param.name) {
            Some(value) => value,
            None => match &param.default {
                Some(default) => frame.eval(default)?,
                None => {
                    return Err(RenderError::MissingArgument {
                        template: routine.name.clone(),
                        name: param.name.clone(),
                    });
                }
            },
        };
        frame.params.insert(param.name.clone(), value);
    }

    // 未声明的关键字参数并入上下文，供嵌套组件使用
    if !args.is_empty() {
        let mut context = (*frame.context).clone();
        context.extend(args);
        frame.context = Arc::new(context);
    }

    let mut out = String::new();
    frame.exec(&routine.body, &mut out)?;

    match &routine.layout {
        Some(layout_name) => frame.wrap_in_layout(layout_name, out),
        None => Ok(out),
    }
}

struct Frame<'r> {
    registry: &'r Registry,
    routine: &'r Routine,
    params: BTreeMap<String, Value>,
    /// 局部变量栈：进入作用域时记录长度，离开时截断
    locals: Vec<(String, Value)>,
    context: Arc<BTreeMap<String, Value>>,
    with_styles: bool,
    fill: Option<SlotFill>,
    /// 本次调用捕获的 block 输出
    blocks: HashMap<String, String>,
}

impl Frame<'_> {
    fn exec(&mut self, instrs: &[Instr], out: &mut String) -> RenderResult<()> {
        for instr in instrs {
            match instr {
                Instr::Emit(pieces) => {
                    for piece in pieces {
                        match piece {
                            Piece::Text(text) => out.push_str(text),
                            Piece::Escaped(expr) => write_escaped(out, &self.eval(expr)?),
                            Piece::Raw(expr) => write_raw(out, &self.eval(expr)?),
                        }
                    }
                }
                Instr::Branch { arms, otherwise } => {
                    let mut taken = None;
                    for (cond, body) in arms {
                        if self.eval(cond)?.is_true() {
                            taken = Some(body);
                            break;
                        }
                    }
                    if let Some(body) = taken.or(otherwise.as_ref()) {
                        self.exec_scoped(body, out)?;
                    }
                }
                Instr::Loop {
                    targets,
                    iterable,
                    body,
                } => self.exec_loop(targets, iterable, body, out)?,
                Instr::Call { component, args } => {
                    let mut values = BTreeMap::new();
                    for (name, expr) in args {
                        values.insert(name.clone(), self.eval(expr)?);
                    }
                    let callee = self.registry.routine(component).ok_or_else(|| {
                        RenderError::UnknownTemplate {
                            name: component.clone(),
                        }
                    })?;
                    let invocation = Invocation {
                        args: values,
                        context: Arc::clone(&self.context),
                        with_styles: false,
                        fill: None,
                    };
                    out.push_str(&render_routine(self.registry, callee, invocation)?);
                }
                Instr::Bind { name, value } => {
                    let value = self.eval(value)?;
                    self.locals.push((name.clone(), value));
                }
                Instr::Styles => self.write_styles(out),
                Instr::Slot {
                    name,
                    required,
                    default,
                } => self.exec_slot(name.as_deref(), *required, default.as_deref(), out)?,
                Instr::Capture { block, body } => {
                    let mut captured = String::new();
                    self.exec_scoped(body, &mut captured)?;
                    self.blocks.insert(block.clone(), captured);
                }
            }
        }
        Ok(())
    }

    /// 在新的词法作用域中执行，结束后丢弃其中的 `set` 绑定
    fn exec_scoped(&mut self, instrs: &[Instr], out: &mut String) -> RenderResult<()> {
        let mark = self.locals.len();
        let result = self.exec(instrs, out);
        self.locals.truncate(mark);
        result
    }

    fn exec_loop(
        &mut self,
        targets: &[String],
        iterable: &Compiled,
        body: &[Instr],
        out: &mut String,
    ) -> RenderResult<()> {
        let value = self.eval(iterable)?;
        let items: Vec<Value> = value
            .try_iter()
            .map_err(|e| self.eval_error(&iterable.expr.src, e))?
            .collect();
        let length = items.len();

        for (index, item) in items.into_iter().enumerate() {
            let mark = self.locals.len();
            if let [target] = targets {
                self.locals.push((target.clone(), item));
            } else {
                let parts: Vec<Value> = item
                    .try_iter()
                    .map_err(|e| self.eval_error(&iterable.expr.src, e))?
                    .collect();
                if parts.len() != targets.len() {
                    return Err(RenderError::Unpack {
                        template: self.routine.name.clone(),
                        expected: targets.len(),
                        found: parts.len(),
                    });
                }
                self.locals.extend(targets.iter().cloned().zip(parts));
            }
            self.locals.push((LOOP_VAR.to_string(), loop_value(index, length)));

            let result = self.exec(body, out);
            self.locals.truncate(mark);
            result?;
        }
        Ok(())
    }

    fn exec_slot(
        &mut self,
        name: Option<&str>,
        required: bool,
        default: Option<&[Instr]>,
        out: &mut String,
    ) -> RenderResult<()> {
        let Some(name) = name else {
            if let Some(fill) = &self.fill {
                out.push_str(&fill.default);
            }
            return Ok(());
        };

        if let Some(content) = self.fill.as_ref().and_then(|f| f.blocks.get(name)) {
            out.push_str(content);
            return Ok(());
        }
        match default {
            Some(body) => self.exec_scoped(body, out),
            None if required => Err(RenderError::MissingSlot {
                template: self.routine.name.clone(),
                name: name.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// 使用布局的模板不在自身位置输出样式，CSS 交给布局统一输出
    fn write_styles(&self, out: &mut String) {
        if self.routine.layout.is_some() || !self.with_styles {
            return;
        }
        let css = match &self.fill {
            Some(fill) if !fill.css.is_empty() => fill.css.as_str(),
            _ => self.routine.css.as_str(),
        };
        if !css.is_empty() {
            out.push_str("<style>");
            out.push_str(css);
            out.push_str("</style>");
        }
    }

    fn wrap_in_layout(mut self, layout_name: &str, default: String) -> RenderResult<String> {
        let layout = self.registry.routine(layout_name).ok_or_else(|| {
            RenderError::UnknownTemplate {
                name: layout_name.to_string(),
            }
        })?;

        let mut args = (*self.context).clone();
        args.extend(std::mem::take(&mut self.params));

        let css = match self.fill.take() {
            Some(fill) if !fill.css.is_empty() => fill.css,
            _ => self.routine.css.clone(),
        };
        let invocation = Invocation {
            args,
            context: Arc::clone(&self.context),
            with_styles: self.with_styles,
            fill: Some(SlotFill {
                default,
                blocks: std::mem::take(&mut self.blocks),
                css,
            }),
        };
        render_routine(self.registry, layout, invocation)
    }

    /// 按代码生成时确定的方案准备变量并求值
    fn eval(&self, compiled: &Compiled) -> RenderResult<Value> {
        let mut vars = BTreeMap::new();
        for (name, binding) in &compiled.names {
            if *binding == Binding::Builtin {
                continue;
            }
            vars.insert(name.clone(), self.resolve(name, *binding)?);
        }
        compiled
            .expr
            .eval(Value::from_iter(vars))
            .map_err(|e| self.eval_error(&compiled.expr.src, e))
    }

    fn resolve(&self, name: &str, binding: Binding) -> RenderResult<Value> {
        let found = match binding {
            Binding::Local => self.lookup_local(name),
            Binding::Param => self.params.get(name).cloned(),
            Binding::Dynamic | Binding::Builtin => None,
        };
        found
            .or_else(|| self.context.get(name).cloned())
            .or_else(|| self.registry.global(name).cloned())
            .ok_or_else(|| RenderError::Undefined {
                template: self.routine.name.clone(),
                name: name.to_string(),
            })
    }

    fn lookup_local(&self, name: &str) -> Option<Value> {
        self.locals
            .iter()
            .rev()
            .find(|(local, _)| local == name)
            .map(|(_, value)| value.clone())
    }

    fn eval_error(&self, src: &str, err: minijinja::Error) -> RenderError {
        RenderError::Eval {
            template: self.routine.name.clone(),
            message: format!("表达式 `{src}` 求值失败：{err}"),
        }
    }
}

fn loop_value(index: usize, length: usize) -> Value {
    Value::from_iter([
        ("index", Value::from(index + 1)),
        ("index0", Value::from(index)),
        ("first", Value::from(index == 0)),
        ("last", Value::from(index + 1 == length)),
        ("length", Value::from(length)),
    ])
}

/// 数字直接输出；已标记为安全的值原样输出；其余转义 `& < > ' "`
pub(crate) fn write_escaped(out: &mut String, value: &Value) {
    if is_blank(value) {
        return;
    }
    if value.kind() == ValueKind::Number || value.is_safe() {
        out.push_str(&value.to_string());
        return;
    }
    escape_into(out, &value.to_string());
}

fn write_raw(out: &mut String, value: &Value) {
    if !is_blank(value) {
        out.push_str(&value.to_string());
    }
}

fn is_blank(value: &Value) -> bool {
    value.is_undefined() || value.is_none()
}

pub(crate) fn escape_into(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&#x27;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn escaped(value: Value) -> String {
        let mut out = String::new();
        write_escaped(&mut out, &value);
        out
    }

    #[test]
    fn strings_are_escaped() {
        assert_eq!(
            escaped(Value::from(r#"<a href="x">Tom & 'Jerry'</a>"#)),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#x27;Jerry&#x27;&lt;/a&gt;"
        );
    }

    #[test]
    fn numbers_are_plain() {
        assert_eq!(escaped(Value::from(42)), "42");
        assert_eq!(escaped(Value::from(-1.5)), "-1.5");
    }

    #[test]
    fn safe_and_blank_values() {
        assert_eq!(escaped(Value::from_safe_string("<b>x</b>".into())), "<b>x</b>");
        assert_eq!(escaped(Value::UNDEFINED), "");
        assert_eq!(escaped(Value::from(())), "");
        assert_eq!(escaped(Value::from(true)), "true");
    }

    #[test]
    fn loop_value_fields() {
        let value = loop_value(1, 3);
        assert_eq!(value.get_attr("index").unwrap(), Value::from(2));
        assert_eq!(value.get_attr("last").unwrap(), Value::from(false));
    }
}
