pub mod minify;
pub mod parser;
pub mod sass;
pub mod selector;

use crate::compiler::filters::slugify;
use crate::compiler::html::Fragment;
use parser::Rule;
use sha2::{Digest, Sha256};

/// 作用域 id：模板名前缀 + `-` + SHA-256(prefix, counter) 的前 8 位十六进制
pub fn scope_id(prefix: &str, counter: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prefix.as_bytes());
    hasher.update(b":");
    hasher.update(counter.to_le_bytes());
    let hash = format!("{:x}", hasher.finalize());

    let slug = slugify(prefix);
    let slug = if slug.is_empty() {
        "h".to_string()
    } else if slug.starts_with(|c: char| c.is_ascii_digit()) {
        format!("h-{slug}")
    } else {
        slug
    };
    format!("{slug}-{}", &hash[..8])
}

/// 从 HTML 片段中取出 `<style>`，给元素加作用域类名，返回本模板的 CSS
///
/// 单个样式块处理失败只记录警告，其贡献视为空。
pub fn extract_styles(fragment: &mut Fragment, template: &str, counter: u64) -> String {
    let styles = fragment.take_styles();
    if styles.is_empty() {
        return String::new();
    }

    let scope = styles
        .iter()
        .any(|s| !s.is_global())
        .then(|| scope_id(template, counter));
    if let Some(scope) = &scope {
        fragment.add_class(scope);
    }

    let mut pieces = Vec::new();
    for style in &styles {
        let css = match style.lang() {
            Some(lang @ ("scss" | "sass")) => match sass::compile(&style.css, lang == "sass") {
                Ok(css) => css,
                Err(e) => {
                    tracing::warn!("模板 `{template}` 的样式块已忽略: {e:#}");
                    continue;
                }
            },
            _ => style.css.clone(),
        };

        let css = match (&scope, style.is_global()) {
            (Some(scope), false) => match selector::scope_stylesheet(&css, scope) {
                Ok(css) => css,
                Err(e) => {
                    tracing::warn!("模板 `{template}` 的样式无法解析，已忽略: {e}");
                    continue;
                }
            },
            _ => css,
        };

        if !css.trim().is_empty() {
            pieces.push(css.trim().to_string());
        }
    }
    pieces.join("\n")
}

/// 聚合后的最终处理：压缩，再把 `@charset` / `@import` 稳定地移到最前
pub fn finalize(css: &str, minify_css: bool, template: &str) -> String {
    let css = if minify_css {
        minify::minify(css)
    } else {
        css.trim().to_string()
    };
    if css.is_empty() {
        return css;
    }

    match parser::parse_stylesheet(&css) {
        Ok(mut rules) => {
            rules.sort_by_key(rule_rank);
            let separator = if minify_css { "" } else { "\n" };
            parser::serialize_joined(&rules, separator)
        }
        Err(e) => {
            tracing::warn!("模板 `{template}` 的聚合样式无法解析，保留原顺序: {e}");
            css
        }
    }
}

fn rule_rank(rule: &Rule) -> u8 {
    match rule.at_name().map(str::to_ascii_lowercase).as_deref() {
        Some("charset") => 0,
        Some("import") => 1,
        _ => 2,
    }
}
