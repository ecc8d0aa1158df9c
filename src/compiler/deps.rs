use crate::compiler::ast::Template;
use crate::compiler::error::ValidationError;
use crate::compiler::session::CompilerSession;
use std::collections::{BTreeMap, HashSet};

/// 计算模板的 CSS 依赖闭包：自身、布局、组件、include 的传递并集，按首次访问顺序排列
///
/// 结果缓存在本次构建的 session 中；当前递归路径上再次出现的模板视为循环依赖。
pub fn css_closure(
    session: &mut CompilerSession,
    templates: &BTreeMap<String, Template>,
    name: &str,
) -> Result<Vec<String>, ValidationError> {
    if let Some(closure) = session.closures.get(name) {
        return Ok(closure.clone());
    }
    if session.visiting.iter().any(|n| n == name) {
        let mut path = session.visiting.clone();
        path.push(name.to_string());
        let root = &path[0];
        let file = templates.get(root).and_then(|t| t.source_file.as_deref());
        return Err(ValidationError::new(
            root,
            file,
            format!("circular template dependency: {}", path.join(" → ")),
        ));
    }
    let Some(template) = templates.get(name) else {
        let referrer = session.visiting.last().map_or(name, String::as_str);
        return Err(ValidationError::new(
            referrer,
            None,
            format!("依赖的模板 `{name}` 不存在"),
        ));
    };

    session.visiting.push(name.to_string());
    let mut closure = vec![name.to_string()];
    let mut seen: HashSet<String> = closure.iter().cloned().collect();

    let deps = template
        .layout
        .iter()
        .chain(template.component_calls.iter().map(|c| &c.name))
        .chain(template.style_includes.iter());
    for dep in deps {
        for member in css_closure(session, templates, dep)? {
            if seen.insert(member.clone()) {
                closure.push(member);
            }
        }
    }

    session.visiting.pop();
    session.closures.insert(name.to_string(), closure.clone());
    Ok(closure)
}

/// 按闭包顺序拼接各模板自身的 CSS；出现在多条路径上的模板只贡献一次
pub fn aggregate_css(closure: &[String], templates: &BTreeMap<String, Template>) -> String {
    closure
        .iter()
        .filter_map(|name| templates.get(name))
        .map(|t| t.css.trim())
        .filter(|css| !css.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::ComponentCall;
    use std::collections::BTreeSet;

    fn template(name: &str, css: &str, layout: Option<&str>, calls: &[&str]) -> Template {
        Template {
            name: name.to_string(),
            source_file: None,
            parameters: Vec::new(),
            body: Vec::new(),
            css: css.to_string(),
            layout: layout.map(str::to_string),
            component_calls: calls
                .iter()
                .map(|c| ComponentCall {
                    name: c.to_string(),
                    args: Vec::new(),
                    offset: 0,
                })
                .collect(),
            style_includes: BTreeSet::new(),
            blocks: BTreeSet::new(),
            layout_info: None,
        }
    }

    fn set(templates: Vec<Template>) -> BTreeMap<String, Template> {
        templates.into_iter().map(|t| (t.name.clone(), t)).collect()
    }

    #[test]
    fn test_closure_order_and_dedup() {
        let templates = set(vec![
            template("page", "p{}", Some("base"), &["card", "list", "card"]),
            template("base", "body{}", None, &[]),
            template("list", "ul{}", None, &["card"]),
            template("card", "a{}", None, &[]),
        ]);
        let mut session = CompilerSession::new();
        let closure = css_closure(&mut session, &templates, "page").unwrap();
        assert_eq!(closure, vec!["page", "base", "card", "list"]);
        assert_eq!(
            aggregate_css(&closure, &templates),
            "p{}\nbody{}\na{}\nul{}"
        );
        assert!(session.closures.contains_key("list"));
        assert!(session.visiting.is_empty());
    }

    #[test]
    fn test_style_includes_are_followed() {
        let mut page = template("page", "", None, &[]);
        page.style_includes.insert("theme".into());
        let templates = set(vec![page, template("theme", "h1{}", None, &[])]);
        let mut session = CompilerSession::new();
        let closure = css_closure(&mut session, &templates, "page").unwrap();
        assert_eq!(aggregate_css(&closure, &templates), "h1{}");
    }

    #[test]
    fn test_cycle_is_validation_error() {
        let templates = set(vec![
            template("a", "", None, &["b"]),
            template("b", "", None, &["c"]),
            template("c", "", None, &["a"]),
        ]);
        let mut session = CompilerSession::new();
        let err = css_closure(&mut session, &templates, "a").unwrap_err();
        assert!(err.message.contains("circular template dependency"));
        assert!(err.message.contains("a → b → c → a"));
    }

    #[test]
    fn test_self_recursive_component_is_cycle() {
        let templates = set(vec![template("tree", "", None, &["tree"])]);
        let mut session = CompilerSession::new();
        assert!(css_closure(&mut session, &templates, "tree").is_err());
    }
}
