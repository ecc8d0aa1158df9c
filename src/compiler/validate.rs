use crate::compiler::ast::Template;
use crate::compiler::error::ValidationError;
use std::collections::{BTreeMap, HashSet};

/// 校验整个模板集合，遇到第一个问题即返回
pub fn validate_all(templates: &BTreeMap<String, Template>) -> Result<(), ValidationError> {
    for template in templates.values() {
        validate(template, templates)?;
    }
    Ok(())
}

fn validate(
    template: &Template,
    templates: &BTreeMap<String, Template>,
) -> Result<(), ValidationError> {
    let fail = |message: String| {
        ValidationError::new(&template.name, template.source_file.as_deref(), message)
    };

    let mut seen = HashSet::new();
    for param in &template.parameters {
        if !seen.insert(param.name.as_str()) {
            return Err(fail(format!("重复的参数 `{}`", param.name)));
        }
    }

    match &template.layout {
        Some(layout_name) => {
            let Some(layout) = templates.get(layout_name) else {
                return Err(fail(format!("布局 `{layout_name}` 不存在")));
            };
            let Some(info) = &layout.layout_info else {
                return Err(fail(format!("`{layout_name}` 不是布局模板（没有声明任何插槽）")));
            };
            for slot in &info.slots {
                if let Some(slot_name) = &slot.name
                    && slot.required
                    && !template.blocks.contains(slot_name)
                {
                    return Err(fail(format!(
                        "布局 `{layout_name}` 的必需插槽 `{slot_name}` 没有对应的 block"
                    )));
                }
            }
            for block in &template.blocks {
                if info.slot(block).is_none() {
                    return Err(fail(format!("布局 `{layout_name}` 没有名为 `{block}` 的插槽")));
                }
            }
        }
        None => {
            if let Some(block) = template.blocks.iter().next() {
                return Err(fail(format!("block `{block}` 只能用于声明了布局的模板")));
            }
        }
    }

    for call in &template.component_calls {
        let Some(callee) = templates.get(&call.name) else {
            return Err(fail(format!("组件 `{}` 不存在", call.name)));
        };
        for param in callee.parameters.iter().filter(|p| p.is_required()) {
            if !call.has_arg(&param.name) {
                return Err(fail(format!(
                    "调用组件 `{}` 时缺少必需参数 `{}`",
                    call.name, param.name
                )));
            }
        }
    }

    for include in &template.style_includes {
        if !templates.contains_key(include) {
            return Err(fail(format!("include 的模板 `{include}` 不存在")));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::{ComponentCall, Expression, LayoutInfo, SlotInfo, TemplateParameter};
    use std::collections::BTreeSet;

    fn template(name: &str) -> Template {
        Template {
            name: name.to_string(),
            source_file: None,
            parameters: Vec::new(),
            body: Vec::new(),
            css: String::new(),
            layout: None,
            component_calls: Vec::new(),
            style_includes: BTreeSet::new(),
            blocks: BTreeSet::new(),
            layout_info: None,
        }
    }

    fn param(name: &str, default: Option<&str>) -> TemplateParameter {
        TemplateParameter {
            name: name.to_string(),
            type_hint: None,
            default: default.map(|d| Expression::new(d, 0)),
        }
    }

    fn set(templates: Vec<Template>) -> BTreeMap<String, Template> {
        templates.into_iter().map(|t| (t.name.clone(), t)).collect()
    }

    fn layout() -> Template {
        let mut base = template("base");
        base.layout_info = Some(LayoutInfo {
            has_default_slot: true,
            slots: vec![
                SlotInfo {
                    name: None,
                    required: false,
                },
                SlotInfo {
                    name: Some("title".into()),
                    required: true,
                },
                SlotInfo {
                    name: Some("aside".into()),
                    required: false,
                },
            ],
        });
        base
    }

    fn message(result: Result<(), ValidationError>) -> String {
        result.expect_err("expected validation error").message
    }

    #[test]
    fn test_valid_layout_usage() {
        let mut page = template("page");
        page.layout = Some("base".into());
        page.blocks.insert("title".into());
        assert!(validate_all(&set(vec![layout(), page])).is_ok());
    }

    #[test]
    fn test_layout_rules() {
        let mut page = template("page");
        page.layout = Some("missing".into());
        assert!(message(validate_all(&set(vec![page.clone()]))).contains("不存在"));

        page.layout = Some("plain".into());
        assert!(
            message(validate_all(&set(vec![page.clone(), template("plain")])))
                .contains("不是布局")
        );

        page.layout = Some("base".into());
        assert!(message(validate_all(&set(vec![page.clone(), layout()]))).contains("title"));

        page.blocks.insert("title".into());
        page.blocks.insert("footer".into());
        assert!(message(validate_all(&set(vec![page, layout()]))).contains("footer"));
    }

    #[test]
    fn test_blocks_require_layout() {
        let mut page = template("page");
        page.blocks.insert("main".into());
        assert!(message(validate_all(&set(vec![page]))).contains("main"));
    }

    #[test]
    fn test_duplicate_parameters() {
        let mut card = template("card");
        card.parameters = vec![param("a", None), param("a", Some("1"))];
        assert!(message(validate_all(&set(vec![card]))).contains("重复"));
    }

    #[test]
    fn test_component_rules() {
        let mut card = template("card");
        card.parameters = vec![param("title", None), param("size", Some("1"))];
        let mut page = template("page");
        page.component_calls.push(ComponentCall {
            name: "card".into(),
            args: vec![("size".into(), Expression::new("2", 0))],
            offset: 0,
        });
        let err = validate_all(&set(vec![card.clone(), page.clone()])).unwrap_err();
        assert_eq!(err.template, "page");
        assert!(err.message.contains("title"));

        page.component_calls[0].args.push(("title".into(), Expression::new("'x'", 0)));
        assert!(validate_all(&set(vec![card.clone(), page.clone()])).is_ok());

        page.component_calls[0].name = "nope".into();
        assert!(message(validate_all(&set(vec![card, page]))).contains("nope"));
    }

    #[test]
    fn test_unknown_include() {
        let mut page = template("page");
        page.style_includes.insert("theme".into());
        assert!(message(validate_all(&set(vec![page]))).contains("theme"));
    }
}
