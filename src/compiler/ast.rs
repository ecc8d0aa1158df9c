use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// 模板中嵌入的表达式源码，由表达式服务解析与求值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expression {
    pub src: String,
    /// 在模板源码中的字节偏移
    pub offset: usize,
}

impl Expression {
    pub fn new(src: impl Into<String>, offset: usize) -> Self {
        Self {
            src: src.into(),
            offset,
        }
    }
}

/// `{% param name[: type][ = default] %}`；`default` 为 None 表示必需参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub type_hint: Option<String>,
    pub default: Option<Expression>,
}

impl TemplateParameter {
    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

/// `{<Name(kw=expr, ...)>}` 组件调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentCall {
    /// 被调用模板名（点号路径已转换为 `/`）
    pub name: String,
    pub args: Vec<(String, Expression)>,
    pub offset: usize,
}

impl ComponentCall {
    pub fn has_arg(&self, name: &str) -> bool {
        self.args.iter().any(|(arg, _)| arg == name)
    }
}

/// 布局插槽；`name` 为 None 表示唯一的默认插槽
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotInfo {
    pub name: Option<String>,
    pub required: bool,
}

/// 最终语法树节点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Tag {
    Literal(String),
    /// `{{ expr }}` 转义输出
    Expr(Expression),
    /// `{% html expr %}` 原样输出
    RawExpr(Expression),
    /// 聚合 CSS 的输出位置
    Style,
    Component(ComponentCall),
    If {
        cond: Expression,
        body: Vec<Tag>,
        elifs: Vec<(Expression, Vec<Tag>)>,
        else_body: Option<Vec<Tag>>,
    },
    For {
        targets: Vec<String>,
        iterable: Expression,
        body: Vec<Tag>,
    },
    Assignment {
        target: String,
        value: Expression,
    },
    Slot {
        name: Option<String>,
        required: bool,
        default: Option<Vec<Tag>>,
    },
    Block {
        name: String,
        body: Vec<Tag>,
    },
}

/// 布局模板的附加信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutInfo {
    pub has_default_slot: bool,
    pub slots: Vec<SlotInfo>,
}

impl LayoutInfo {
    pub fn slot(&self, name: &str) -> Option<&SlotInfo> {
        self.slots.iter().find(|s| s.name.as_deref() == Some(name))
    }
}

/// 解析完成的模板
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    pub source_file: Option<PathBuf>,
    pub parameters: Vec<TemplateParameter>,
    pub body: Vec<Tag>,
    /// 本模板自身 `<style>` 块提取并作用域化后的 CSS
    pub css: String,
    pub layout: Option<String>,
    pub component_calls: Vec<ComponentCall>,
    pub style_includes: BTreeSet<String>,
    pub blocks: BTreeSet<String>,
    /// 声明了插槽的模板即为布局模板
    pub layout_info: Option<LayoutInfo>,
}

impl Template {
    pub fn is_layout(&self) -> bool {
        self.layout_info.is_some()
    }

    pub fn parameter(&self, name: &str) -> Option<&TemplateParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}
