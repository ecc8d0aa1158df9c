pub mod ast;
pub mod bridge;
pub mod codegen;
pub mod css;
pub mod deps;
pub mod error;
pub mod expr;
pub mod filters;
pub mod html;
pub mod introspect;
pub mod lexer;
pub mod session;
pub mod tags;
pub mod tree;
pub mod validate;

use crate::cache::ParseCache;
use crate::config::CompilerOptions;
use crate::registry::Registry;
use ast::{Tag, Template};
use codegen::Routine;
use error::{Result, SourceCtx, ValidationError};
use html::Fragment;
use minijinja::Value;
use rayon::prelude::*;
use session::CompilerSession;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug)]
struct TemplateSource {
    source: String,
    file: Option<PathBuf>,
}

/// 模板集合的编译入口：收集源码与全局值，`build` 生成 `Registry`
///
/// ```no_run
/// # fn demo() -> htmpl::Result<()> {
/// let mut compiler = htmpl::Compiler::new(htmpl::CompilerOptions::default());
/// compiler.add_template("page", "<h1>{{ title }}</h1>", None)?;
/// let registry = compiler.build()?;
/// let html = registry.render("page", htmpl::context! { title => "Hi" })?;
/// # Ok(()) }
/// ```
#[derive(Debug, Default)]
pub struct Compiler {
    options: CompilerOptions,
    sources: BTreeMap<String, TemplateSource>,
    globals: BTreeMap<String, Value>,
}

impl Compiler {
    pub fn new(options: CompilerOptions) -> Self {
        Self {
            options,
            sources: BTreeMap::new(),
            globals: BTreeMap::new(),
        }
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    /// 添加模板源码；重名视为校验错误
    pub fn add_template(
        &mut self,
        name: impl Into<String>,
        source: impl Into<String>,
        file: Option<PathBuf>,
    ) -> Result<()> {
        let name = name.into();
        if let Some(existing) = self.sources.get(&name) {
            return Err(ValidationError::new(
                &name,
                file.as_deref().or(existing.file.as_deref()),
                format!("模板 `{name}` 重复定义"),
            )
            .into());
        }
        self.sources.insert(
            name,
            TemplateSource {
                source: source.into(),
                file,
            },
        );
        Ok(())
    }

    /// 全局值，渲染时作为变量解析的最后一级
    pub fn add_global(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.globals.insert(name.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// 编译全部模板：解析 → 校验 → CSS 依赖闭包 → 代码生成
    ///
    /// 任一模板出错都会中止整个构建。
    pub fn build(&self) -> Result<Registry> {
        let start = std::time::Instant::now();
        let mut session = CompilerSession::new();

        // 作用域种子按模板名顺序分配，保证并行解析时 scope id 仍然确定
        let jobs: Vec<ParseJob<'_>> = self
            .sources
            .iter()
            .map(|(name, src)| ParseJob {
                name,
                source: &src.source,
                file: src.file.as_deref(),
                seed: session.next_scope_seed(),
            })
            .collect();

        let mut cache = self.options.cache_dir.as_deref().map(ParseCache::load);
        let parsed: Vec<Parsed> = {
            let cache = cache.as_ref();
            let parse = |job: &ParseJob<'_>| job.run(&self.options, cache);
            if self.options.parallel {
                jobs.par_iter().map(parse).collect::<Result<_>>()?
            } else {
                jobs.iter().map(parse).collect::<Result<_>>()?
            }
        };

        let mut templates = BTreeMap::new();
        let mut cached = 0;
        for Parsed {
            template,
            fingerprint,
        } in parsed
        {
            if let Some(cache) = cache.as_mut() {
                match fingerprint {
                    Some(fingerprint) => cache.update(&template, fingerprint),
                    None => {
                        cached += 1;
                        cache.touch(&template.name);
                    }
                }
            }
            templates.insert(template.name.clone(), template);
        }

        validate::validate_all(&templates)?;

        // 依赖闭包依赖 session 的备忘表，顺序计算
        let mut aggregated = Vec::with_capacity(templates.len());
        for name in templates.keys() {
            let closure = deps::css_closure(&mut session, &templates, name)?;
            let css = deps::aggregate_css(&closure, &templates);
            aggregated.push(css::finalize(&css, self.options.minify_css, name));
        }
        drop(session);

        let units: Vec<(&Template, String)> = templates.values().zip(aggregated).collect();
        let routines: Vec<Routine> = if self.options.parallel {
            units
                .into_par_iter()
                .map(|(template, css)| codegen::generate(template, css))
                .collect::<Result<_>>()?
        } else {
            units
                .into_iter()
                .map(|(template, css)| codegen::generate(template, css))
                .collect::<Result<_>>()?
        };

        let mut registry = Registry::new(self.globals.clone());
        let count = templates.len();
        for (template, routine) in templates.into_values().zip(routines) {
            registry.insert(template, routine);
        }

        if let Some(cache) = cache {
            registry.cache_flush = Some(cache.persist_in_background());
        }

        tracing::info!(
            "模板编译完成，耗时 {:.2}s（共 {} 个，缓存命中 {}）",
            start.elapsed().as_secs_f64(),
            count,
            cached,
        );
        Ok(registry)
    }
}

struct ParseJob<'a> {
    name: &'a str,
    source: &'a str,
    file: Option<&'a Path>,
    seed: u64,
}

struct Parsed {
    template: Template,
    /// 新解析的模板带指纹，命中缓存时为 None
    fingerprint: Option<String>,
}

impl ParseJob<'_> {
    fn run(&self, options: &CompilerOptions, cache: Option<&ParseCache>) -> Result<Parsed> {
        let Some(cache) = cache else {
            let template = parse_template(self.name, self.source, self.file, self.seed, options)?;
            return Ok(Parsed {
                template,
                fingerprint: None,
            });
        };

        let fingerprint = ParseCache::fingerprint(
            self.name,
            self.source,
            self.seed,
            options.minify_html,
            options.minify_css,
        );
        if let Some(mut template) = cache.get(self.name, &fingerprint) {
            tracing::debug!("命中解析缓存：{}", self.name);
            template.source_file = self.file.map(Path::to_path_buf);
            return Ok(Parsed {
                template,
                fingerprint: None,
            });
        }

        let template = parse_template(self.name, self.source, self.file, self.seed, options)?;
        Ok(Parsed {
            template,
            fingerprint: Some(fingerprint),
        })
    }
}

/// 解析单个模板：词法 → 标签组装 → HTML 处理（样式提取、压缩）→ 语法树
pub fn parse_template(
    name: &str,
    source: &str,
    file: Option<&Path>,
    scope_seed: u64,
    options: &CompilerOptions,
) -> Result<Template> {
    let ctx = SourceCtx::new(name, file, source);
    let tokens = lexer::tokenize(&ctx)?;
    let flat = tags::build_tags(&ctx, tokens)?;
    let info = introspect::introspect(&ctx, &flat)?;

    let (html, placeholders) = bridge::to_placeholder_html(flat, &bridge::nonce(source));
    let mut fragment = Fragment::parse(&html);
    let css = css::extract_styles(&mut fragment, name, scope_seed);
    if options.minify_html {
        fragment.minify();
    }
    let flat = bridge::from_placeholder_html(&ctx, &fragment.serialize(), placeholders)?;

    let mut body = tree::build_tree(&ctx, flat)?;
    if info.needs_synthetic_style(&css) {
        body.push(Tag::Style);
    }

    tracing::debug!("已解析模板 {name}（{} 个顶层节点）", body.len());
    Ok(Template {
        name: name.to_string(),
        source_file: file.map(Path::to_path_buf),
        layout_info: info.layout_info(),
        parameters: info.parameters,
        body,
        css,
        layout: info.layout,
        component_calls: info.component_calls,
        style_includes: info.style_includes,
        blocks: info.blocks,
    })
}
