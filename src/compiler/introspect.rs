use crate::compiler::ast::{ComponentCall, LayoutInfo, SlotInfo, TemplateParameter};
use crate::compiler::error::{Result, SourceCtx};
use crate::compiler::tags::{FlatKind, FlatTag};
use std::collections::BTreeSet;

/// 对扁平标签流做一次线性扫描得到的模板元数据
#[derive(Debug, Default)]
pub struct Introspection {
    pub parameters: Vec<TemplateParameter>,
    pub layout: Option<String>,
    pub slots: Vec<SlotInfo>,
    pub has_default_slot: bool,
    pub style_includes: BTreeSet<String>,
    pub component_calls: Vec<ComponentCall>,
    pub blocks: BTreeSet<String>,
    /// 是否显式声明了 `{% styles %}`
    pub has_style: bool,
}

impl Introspection {
    /// 声明了任意插槽即为布局模板
    pub fn layout_info(&self) -> Option<LayoutInfo> {
        (!self.slots.is_empty()).then(|| LayoutInfo {
            has_default_slot: self.has_default_slot,
            slots: self.slots.clone(),
        })
    }

    /// 没有显式 `{% styles %}` 但可能产生 CSS 的模板需要补一个输出位置
    pub fn needs_synthetic_style(&self, own_css: &str) -> bool {
        !self.has_style
            && (!self.slots.is_empty()
                || !own_css.is_empty()
                || !self.style_includes.is_empty()
                || !self.component_calls.is_empty())
    }
}

pub(crate) fn introspect(ctx: &SourceCtx<'_>, tags: &[FlatTag]) -> Result<Introspection> {
    let mut info = Introspection::default();

    for tag in tags {
        match &tag.kind {
            FlatKind::Param(param) => info.parameters.push(param.clone()),
            FlatKind::Layout(name) => {
                if let Some(existing) = &info.layout {
                    return Err(ctx.parse_error(
                        tag.offset,
                        format!("重复声明布局：已声明 `{existing}`，又声明 `{name}`"),
                    ));
                }
                info.layout = Some(name.clone());
            }
            FlatKind::Slot { name, required } => {
                match name {
                    None if info.has_default_slot => {
                        return Err(ctx.parse_error(tag.offset, "布局只能有一个默认插槽"));
                    }
                    None => info.has_default_slot = true,
                    Some(name) if info.slots.iter().any(|s| s.name.as_ref() == Some(name)) => {
                        return Err(ctx.parse_error(tag.offset, format!("重复的插槽 `{name}`")));
                    }
                    Some(_) => {}
                }
                info.slots.push(SlotInfo {
                    name: name.clone(),
                    required: *required,
                });
            }
            FlatKind::Include(name) => {
                info.style_includes.insert(name.clone());
            }
            FlatKind::Component(call) => info.component_calls.push(call.clone()),
            FlatKind::Block(name) => {
                if !info.blocks.insert(name.clone()) {
                    return Err(ctx.parse_error(tag.offset, format!("重复的 block `{name}`")));
                }
            }
            FlatKind::Styles => {
                if info.has_style {
                    return Err(ctx.parse_error(tag.offset, "`{% styles %}` 只能出现一次"));
                }
                info.has_style = true;
            }
            _ => {}
        }
    }

    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::error::Error;
    use crate::compiler::lexer::tokenize;
    use crate::compiler::tags::build_tags;

    fn inspect(source: &str) -> Result<Introspection> {
        let ctx = SourceCtx::new("test", None, source);
        let tags = build_tags(&ctx, tokenize(&ctx)?)?;
        introspect(&ctx, &tags)
    }

    #[test]
    fn test_collects_metadata() {
        let info = inspect(
            r#"{% layout "base" %}{% param title %}{% include "shared" %}
               {% block main %}{<Card(t=title)>}{<Card(t=1)>}{% endblock %}"#,
        )
        .unwrap();
        assert_eq!(info.layout.as_deref(), Some("base"));
        assert_eq!(info.parameters.len(), 1);
        assert!(info.style_includes.contains("shared"));
        assert_eq!(info.component_calls.len(), 2);
        assert!(info.blocks.contains("main"));
        assert!(info.layout_info().is_none());
        assert!(info.needs_synthetic_style(""));
    }

    #[test]
    fn test_layout_info() {
        let info = inspect("{% slot %}{% slot aside required %}{% styles %}").unwrap();
        let layout = info.layout_info().unwrap();
        assert!(layout.has_default_slot);
        assert_eq!(layout.slots.len(), 2);
        assert!(layout.slot("aside").unwrap().required);
        assert!(!info.needs_synthetic_style("a{}"));
    }

    #[test]
    fn test_plain_template_needs_no_style() {
        let info = inspect("<h1>{{ title }}</h1>").unwrap();
        assert!(!info.needs_synthetic_style(""));
        assert!(info.needs_synthetic_style("h1{}"));
    }

    #[test]
    fn test_duplicates_are_errors() {
        for source in [
            r#"{% layout "a" %}{% layout "b" %}"#,
            "{% slot %}{% slot %}",
            "{% slot a required %}{% slot a required %}",
            "{% styles %}{% styles %}",
            "{% block a %}{% endblock %}{% block a %}{% endblock %}",
        ] {
            assert!(matches!(inspect(source), Err(Error::Parse(_))), "{source}");
        }
    }
}
