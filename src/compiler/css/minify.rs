/// 紧贴这些字符的空白可以删除
const TIGHT_CHARS: &[char] = &['{', '}', ';', ',', '>'];

/// 去除注释、压缩空白、删除块末尾的分号；字符串内容保持不变
pub fn minify(css: &str) -> String {
    let mut out = String::with_capacity(css.len());
    let mut pending_space = false;
    let mut chars = css.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match c {
            '/' if css[i..].starts_with("/*") => {
                let end = css[i + 2..].find("*/").map_or(css.len(), |e| i + 2 + e + 2);
                while chars.next_if(|(j, _)| *j < end).is_some() {}
                pending_space = true;
            }
            c if c.is_whitespace() => pending_space = true,
            '"' | '\'' => {
                flush_space(&mut out, &mut pending_space, c);
                out.push(c);
                let mut escaped = false;
                for (_, s) in chars.by_ref() {
                    out.push(s);
                    if escaped {
                        escaped = false;
                    } else if s == '\\' {
                        escaped = true;
                    } else if s == c {
                        break;
                    }
                }
            }
            '}' => {
                pending_space = false;
                if out.ends_with(';') {
                    out.pop();
                }
                out.push('}');
            }
            _ => {
                flush_space(&mut out, &mut pending_space, c);
                out.push(c);
            }
        }
    }

    out
}

fn flush_space(out: &mut String, pending: &mut bool, next: char) {
    if !*pending {
        return;
    }
    *pending = false;
    let Some(prev) = out.chars().last() else {
        return;
    };
    if TIGHT_CHARS.contains(&prev) || prev == ':' || TIGHT_CHARS.contains(&next) {
        return;
    }
    out.push(' ');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minify_basic() {
        let css = "a  >  b ,\n c {\n  color : red ;\n  margin: 0 auto;\n}\n";
        assert_eq!(minify(css), "a>b,c{color :red;margin:0 auto}");
    }

    #[test]
    fn test_minify_strips_comments_keeps_strings() {
        let css = "/* x */ p::before { content: \"a  ;  } /* b */\"; }";
        assert_eq!(minify(css), "p::before{content:\"a  ;  } /* b */\"}");
    }

    #[test]
    fn test_minify_keeps_significant_spaces() {
        assert_eq!(
            minify("@media screen and (min-width: 10px) { .a .b { width: calc(1px + 2px) } }"),
            "@media screen and (min-width:10px){.a .b{width:calc(1px + 2px)}}"
        );
    }
}
