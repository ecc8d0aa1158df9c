use crate::compiler::css::parser::{self, CssError, Rule};

/// 内部规则同样需要作用域化的条件组 at-rule
const GROUP_AT_RULES: &[&str] = &["media", "supports", "container", "layer", "document"];

/// 为样式表中的每条规则加上作用域类名
pub fn scope_stylesheet(css: &str, scope: &str) -> Result<String, CssError> {
    let rules = parser::parse_stylesheet(css)?;
    Ok(parser::serialize(&scope_rules(rules, scope)?))
}

fn scope_rules(rules: Vec<Rule>, scope: &str) -> Result<Vec<Rule>, CssError> {
    rules
        .into_iter()
        .map(|rule| match rule {
            Rule::Qualified { prelude, block } => Ok(Rule::Qualified {
                prelude: scope_selector_list(&prelude, scope),
                block,
            }),
            Rule::At {
                name,
                prelude,
                block: Some(block),
            } if GROUP_AT_RULES.contains(&name.to_ascii_lowercase().as_str()) => {
                let inner = scope_stylesheet(&block, scope)?;
                Ok(Rule::At {
                    name,
                    prelude,
                    block: Some(inner),
                })
            }
            other => Ok(other),
        })
        .collect()
}

/// 逐个处理逗号分隔的选择器
pub fn scope_selector_list(prelude: &str, scope: &str) -> String {
    split_selectors(prelude)
        .into_iter()
        .map(|selector| scope_selector(selector.trim(), scope))
        .collect::<Vec<_>>()
        .join(", ")
}

/// 在首个与最后一个复合选择器上追加 `.scope`；两者相同时只追加一次
pub fn scope_selector(selector: &str, scope: &str) -> String {
    let compounds = compound_ranges(selector);
    let (Some(first), Some(last)) = (compounds.first(), compounds.last()) else {
        return selector.to_string();
    };

    let mut points = vec![insertion_point(selector, first.0, first.1)];
    if first != last {
        points.push(insertion_point(selector, last.0, last.1));
    }

    let class = format!(".{scope}");
    let mut out = selector.to_string();
    for point in points.into_iter().rev() {
        out.insert_str(point, &class);
    }
    out
}

fn split_selectors(prelude: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut last = 0;
    walk_top_level(prelude, |i, c| {
        if c == ',' {
            parts.push(&prelude[last..i]);
            last = i + 1;
        }
    });
    parts.push(&prelude[last..]);
    parts
}

/// 复合选择器在选择器文本中的 [start, end) 区间，组合符（空白 `>` `+` `~`）之间的部分
fn compound_ranges(selector: &str) -> Vec<(usize, usize)> {
    let mut combinators = Vec::new();
    walk_top_level(selector, |i, c| {
        if c.is_whitespace() || matches!(c, '>' | '+' | '~') {
            combinators.push(i);
        }
    });

    let mut ranges = Vec::new();
    let mut start: Option<usize> = None;
    for (i, _) in selector.char_indices() {
        if combinators.binary_search(&i).is_ok() {
            if let Some(s) = start.take() {
                ranges.push((s, i));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        ranges.push((s, selector.len()));
    }
    ranges
}

/// 复合选择器中首个顶层伪类 / 伪元素之前，否则在末尾
fn insertion_point(selector: &str, start: usize, end: usize) -> usize {
    let compound = &selector[start..end];
    let mut point = None;
    walk_top_level(compound, |i, c| {
        if c == ':' && point.is_none() {
            point = Some(i);
        }
    });
    start + point.unwrap_or(compound.len())
}

/// 遍历不在括号、方括号、字符串内且未被转义的字符
fn walk_top_level(src: &str, mut f: impl FnMut(usize, char)) {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in src.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        if c == '\\' {
            escaped = true;
            continue;
        }
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            _ if depth == 0 => f(i, c),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_compound_scoped_once() {
        assert_eq!(scope_selector("a", "s"), "a.s");
        assert_eq!(scope_selector("#main.card", "s"), "#main.card.s");
    }

    #[test]
    fn test_first_and_last_compounds() {
        assert_eq!(scope_selector("nav ul li", "s"), "nav.s ul li.s");
        assert_eq!(scope_selector("ul > li + a", "s"), "ul.s > li + a.s");
    }

    #[test]
    fn test_pseudo_classes() {
        assert_eq!(scope_selector("li:hover", "s"), "li.s:hover");
        assert_eq!(scope_selector("p::before", "s"), "p.s::before");
        assert_eq!(scope_selector("a:not(.x y)", "s"), "a.s:not(.x y)");
        assert_eq!(scope_selector(r".md\:flex", "s"), r".md\:flex.s");
    }

    #[test]
    fn test_attribute_selectors() {
        assert_eq!(scope_selector(r#"input[type="a b"]"#, "s"), r#"input[type="a b"].s"#);
    }

    #[test]
    fn test_selector_list() {
        assert_eq!(scope_selector_list("h1,h2 span", "s"), "h1.s, h2.s span.s");
    }

    #[test]
    fn test_stylesheet_recurses_into_media() {
        let css = "a{color:red}@media (max-width: 1px){b i{x:y}}@keyframes k{from{x:y}}";
        assert_eq!(
            scope_stylesheet(css, "s").unwrap(),
            "a.s{color:red}\n@media (max-width: 1px){b.s i.s{x:y}}\n@keyframes k{from{x:y}}"
        );
    }
}
