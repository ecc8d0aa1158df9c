use crate::compiler::ast::Template;
use crate::compiler::codegen::Routine;
use crate::compiler::error::{RenderError, Result};
use crate::render::{self, Invocation};
use minijinja::Value;
use minijinja::value::ValueKind;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::thread::JoinHandle;

/// 渲染调用中控制样式输出的保留参数
const WITH_STYLES: &str = "with_styles";

struct Entry {
    template: Arc<Template>,
    routine: Arc<Routine>,
}

/// 模板名 → 渲染例程，以及作为最后一级变量来源的全局值
///
/// 构建完成后例程不可变；`render` 可以在多个线程中并发调用。
#[derive(Default)]
pub struct Registry {
    entries: HashMap<String, Entry>,
    globals: BTreeMap<String, Value>,
    /// 构建时启动的解析缓存写入线程
    pub(crate) cache_flush: Option<JoinHandle<()>>,
}

impl Registry {
    pub(crate) fn new(globals: BTreeMap<String, Value>) -> Self {
        Self {
            entries: HashMap::new(),
            globals,
            cache_flush: None,
        }
    }

    pub(crate) fn insert(&mut self, template: Template, routine: Routine) {
        self.entries.insert(
            template.name.clone(),
            Entry {
                template: Arc::new(template),
                routine: Arc::new(routine),
            },
        );
    }

    /// 渲染模板；`kwargs` 必须序列化为映射，`with_styles` 键控制是否输出样式（默认 true）
    ///
    /// ```no_run
    /// # fn demo(registry: &htmpl::Registry) -> htmpl::Result<()> {
    /// let html = registry.render("page", htmpl::context! { title => "Hello" })?;
    /// # Ok(()) }
    /// ```
    pub fn render<S: Serialize>(&self, name: &str, kwargs: S) -> Result<String> {
        let routine = self.routine(name).ok_or_else(|| RenderError::UnknownTemplate {
            name: name.to_string(),
        })?;

        let (args, with_styles) = split_kwargs(Value::from_serialize(&kwargs))?;
        let html = render::render_routine(self, routine, Invocation::new(args, with_styles))?;
        tracing::trace!("渲染 `{name}` 完成，{} 字节", html.len());
        Ok(html)
    }

    pub fn add_global(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.globals.insert(name.into(), value.into());
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// 按名称排序的模板名
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn template(&self, name: &str) -> Option<&Template> {
        self.entries.get(name).map(|e| e.template.as_ref())
    }

    /// 模板依赖闭包聚合后的 CSS
    pub fn css(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(|e| e.routine.css.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 等待后台的解析缓存写入结束；进程退出前调用，否则写入可能丢失
    pub fn flush_cache(&mut self) {
        if let Some(handle) = self.cache_flush.take()
            && handle.join().is_err()
        {
            tracing::warn!("解析缓存写入线程异常退出");
        }
    }

    pub(crate) fn routine(&self, name: &str) -> Option<&Routine> {
        self.entries.get(name).map(|e| e.routine.as_ref())
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("templates", &self.names())
            .field("globals", &self.globals.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// 拆出 `with_styles`，其余作为关键字参数
fn split_kwargs(value: Value) -> std::result::Result<(BTreeMap<String, Value>, bool), RenderError> {
    let invalid = |message: String| RenderError::InvalidArguments { message };

    let mut args = BTreeMap::new();
    let mut with_styles = true;
    match value.kind() {
        ValueKind::Undefined | ValueKind::None => return Ok((args, with_styles)),
        ValueKind::Map => {}
        kind => return Err(invalid(format!("关键字参数必须是映射，实际为 {kind}"))),
    }

    let keys = value.try_iter().map_err(|e| invalid(e.to_string()))?;
    for key in keys {
        let Some(name) = key.as_str() else {
            return Err(invalid(format!("参数名必须是字符串，实际为 `{key}`")));
        };
        let item = value.get_item(&key).map_err(|e| invalid(e.to_string()))?;
        if name == WITH_STYLES {
            if item.kind() != ValueKind::Bool {
                return Err(invalid(format!("`{WITH_STYLES}` 必须是布尔值")));
            }
            with_styles = item.is_true();
        } else {
            args.insert(name.to_string(), item);
        }
    }
    Ok((args, with_styles))
}

#[cfg(test)]
mod tests {
    use super::*;
    use minijinja::context;

    #[test]
    fn split_kwargs_extracts_with_styles() {
        let (args, with_styles) =
            split_kwargs(Value::from_serialize(context! { a => 1, with_styles => false })).unwrap();
        assert!(!with_styles);
        assert_eq!(args.len(), 1);
        assert_eq!(args["a"], Value::from(1));
    }

    #[test]
    fn split_kwargs_rejects_non_maps() {
        assert!(split_kwargs(Value::from(vec![1, 2])).is_err());
        assert!(split_kwargs(Value::from_serialize(context! { with_styles => "no" })).is_err());
        assert!(split_kwargs(Value::from(())).unwrap().1);
    }

    #[test]
    fn unknown_template() {
        let registry = Registry::default();
        let err = registry.render("nope", context! {}).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }
}
