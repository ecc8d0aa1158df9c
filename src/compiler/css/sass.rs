use anyhow::{Context, Result, anyhow};
use grass::{InputSyntax, Options};

/// 交给 grass 编译 `lang="scss"` / `lang="sass"` 样式块
pub fn compile(source: &str, indented: bool) -> Result<String> {
    let (input, syntax, lang) = if indented {
        (dedent(source), InputSyntax::Sass, "sass")
    } else {
        (source.to_string(), InputSyntax::Scss, "scss")
    };
    let options = Options::default().input_syntax(syntax);
    grass::from_string(input, &options)
        .map_err(|e| anyhow!("{e}"))
        .with_context(|| format!("{lang} 样式编译失败"))
}

/// 去除公共缩进：缩进语法对首行缩进敏感，而嵌入的样式块通常整体缩进
fn dedent(source: &str) -> String {
    let indent = source
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);
    source
        .lines()
        .map(|line| line.get(indent..).unwrap_or_else(|| line.trim_start()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::css::minify::minify;

    #[test]
    fn test_dedent() {
        assert_eq!(dedent("\n    a\n      b: c\n"), "\na\n  b: c");
    }

    #[test]
    fn test_compile_scss() {
        let css = compile("$c: red; a { b { color: $c; } }", false).unwrap();
        assert_eq!(minify(&css), "a b{color:red}");
    }

    #[test]
    fn test_compile_indented_sass() {
        let css = compile("\n    a\n      color: blue\n", true).unwrap();
        assert_eq!(minify(&css), "a{color:blue}");
    }

    #[test]
    fn test_compile_error() {
        let err = compile("a { color: $missing; }", false).unwrap_err();
        assert_eq!(err.to_string(), "scss 样式编译失败");
        assert!(err.chain().count() >= 2);

        let err = compile("a\n  color: $missing\n", true).unwrap_err();
        assert_eq!(err.to_string(), "sass 样式编译失败");
    }
}
