use minijinja::value::ValueKind;
use minijinja::{Environment, Error, ErrorKind, Value};

/// 向表达式环境注册额外的过滤器
pub fn register_filters(env: &mut Environment) {
    env.add_filter("slugify", filter_slugify);
    env.add_filter("truncate", filter_truncate);
    env.add_filter("json", filter_json);
    env.add_filter("classes", filter_classes);
}

/// 小写化，非字母数字字符折叠为单个 `-`
pub fn slugify(value: &str) -> String {
    value
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

fn filter_slugify(value: String) -> String {
    slugify(&value)
}

fn filter_truncate(value: String, length: Option<usize>) -> String {
    let len = length.unwrap_or(160);
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= len {
        value
    } else {
        let mut s: String = chars[..len].iter().collect();
        s.push('\u{2026}');
        s
    }
}

fn filter_json(value: Value) -> Result<String, Error> {
    serde_json::to_string(&value)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("无法序列化为 JSON: {e}")))
}

/// 列表：拼接真值项；映射：拼接值为真的键
fn filter_classes(value: Value) -> Result<String, Error> {
    let mut names = Vec::new();
    match value.kind() {
        ValueKind::Map => {
            for key in value.try_iter()? {
                if value.get_item(&key)?.is_true() {
                    names.push(key.to_string());
                }
            }
        }
        ValueKind::Seq | ValueKind::Iterable => {
            for item in value.try_iter()? {
                if item.is_true() {
                    names.push(item.to_string());
                }
            }
        }
        _ if value.is_true() => names.push(value.to_string()),
        _ => {}
    }
    Ok(names.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use minijinja::context;

    fn eval(src: &str, ctx: Value) -> String {
        let mut env = Environment::new();
        register_filters(&mut env);
        env.compile_expression(src)
            .unwrap()
            .eval(ctx)
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Hello, World!"), "hello-world");
        assert_eq!(slugify("--a  b--"), "a-b");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(eval("s|truncate(3)", context! { s => "abcdef" }), "abc\u{2026}");
        assert_eq!(eval("s|truncate", context! { s => "short" }), "short");
    }

    #[test]
    fn test_json() {
        assert_eq!(
            eval("v|json", context! { v => vec![1, 2] }),
            "[1,2]"
        );
    }

    #[test]
    fn test_classes() {
        assert_eq!(
            eval("['a', '', none, 'b']|classes", context! {}),
            "a b"
        );
        assert_eq!(
            eval("{'active': on, 'hidden': off}|classes", context! { on => true, off => false }),
            "active"
        );
    }
}
