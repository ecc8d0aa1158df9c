//! htmpl：将嵌入 HTML 的模板语言编译为可复用的渲染例程。
//!
//! 支持布局（带具名 / 默认插槽的骨架模板）、组件（带参数的子模板），
//! 以及按组件依赖图自动去重的作用域 CSS。

pub mod cache;
pub mod compiler;
pub mod config;
pub mod loader;
pub mod registry;
mod render;

pub use compiler::Compiler;
pub use compiler::ast::{SlotInfo, Tag, Template, TemplateParameter};
pub use compiler::error::{Error, RenderError, Result, SourceError, ValidationError};
pub use config::CompilerOptions;
pub use minijinja::{Value, context};
pub use registry::Registry;
