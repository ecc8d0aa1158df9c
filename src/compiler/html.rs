//! 轻量 HTML 片段树：只识别标签边界与属性，足以完成样式提取、作用域类名标注与空白压缩。
//!
//! 未被修改的节点按原始文本序列化，保证占位符逐字节往返。

/// 内容按原始文本处理的元素
const RAW_TEXT_ELEMENTS: &[&str] = &["style", "script"];

/// 内部空白必须保留的元素
const PRESERVE_WS_ELEMENTS: &[&str] = &["pre", "textarea"];

#[derive(Debug, Clone, PartialEq)]
pub struct Attr {
    pub name: String,
    pub value: Option<String>,
    quote: Option<char>,
}

impl Attr {
    fn serialize(&self, out: &mut String) {
        out.push(' ');
        out.push_str(&self.name);
        if let Some(value) = &self.value {
            out.push('=');
            match self.quote {
                Some(q) => {
                    out.push(q);
                    out.push_str(value);
                    out.push(q);
                }
                None => out.push_str(value),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StartTag {
    /// 小写标签名
    pub name: String,
    pub attrs: Vec<Attr>,
    pub self_closing: bool,
    raw: String,
    dirty: bool,
}

impl StartTag {
    pub fn attr(&self, name: &str) -> Option<&Attr> {
        self.attrs.iter().find(|a| a.name.eq_ignore_ascii_case(name))
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    /// 追加到已有 class 属性，或新增一个
    pub fn add_class(&mut self, class: &str) {
        self.dirty = true;
        if let Some(attr) = self
            .attrs
            .iter_mut()
            .find(|a| a.name.eq_ignore_ascii_case("class"))
        {
            let value = attr.value.get_or_insert_with(String::new);
            if !value.trim().is_empty() {
                value.push(' ');
            }
            value.push_str(class);
            if attr.quote.is_none() {
                attr.quote = Some('"');
            }
        } else {
            self.attrs.push(Attr {
                name: "class".to_string(),
                value: Some(class.to_string()),
                quote: Some('"'),
            });
        }
    }

    fn serialize(&self, out: &mut String) {
        if !self.dirty {
            out.push_str(&self.raw);
            return;
        }
        out.push('<');
        out.push_str(&self.name);
        for attr in &self.attrs {
            attr.serialize(out);
        }
        out.push_str(if self.self_closing { " />" } else { ">" });
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Start(StartTag),
    End { name: String, raw: String },
    Text(String),
    /// `<style>` / `<script>` 的内容
    RawText(String),
    Comment(String),
    Doctype(String),
}

/// `<style>` 元素提取结果
#[derive(Debug, Clone, PartialEq)]
pub struct StyleElement {
    pub attrs: Vec<Attr>,
    pub css: String,
}

impl StyleElement {
    pub fn is_global(&self) -> bool {
        self.attrs.iter().any(|a| a.name.eq_ignore_ascii_case("global"))
    }

    pub fn lang(&self) -> Option<&str> {
        self.attrs
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case("lang"))
            .and_then(|a| a.value.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    pub nodes: Vec<Node>,
}

impl Fragment {
    pub fn parse(source: &str) -> Self {
        Parser::new(source).parse()
    }

    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            match node {
                Node::Start(tag) => tag.serialize(&mut out),
                Node::End { raw, .. } => out.push_str(raw),
                Node::Text(text) | Node::RawText(text) => out.push_str(text),
                Node::Comment(raw) | Node::Doctype(raw) => out.push_str(raw),
            }
        }
        out
    }

    /// 移除全部 `<style>` 元素并返回其内容
    pub fn take_styles(&mut self) -> Vec<StyleElement> {
        let mut styles = Vec::new();
        let mut kept = Vec::with_capacity(self.nodes.len());
        let mut nodes = std::mem::take(&mut self.nodes).into_iter().peekable();

        while let Some(node) = nodes.next() {
            match node {
                Node::Start(tag) if tag.name == "style" && !tag.self_closing => {
                    let css = match nodes.next_if(|n| matches!(n, Node::RawText(_))) {
                        Some(Node::RawText(css)) => css,
                        _ => String::new(),
                    };
                    nodes.next_if(|n| matches!(n, Node::End { name, .. } if name == "style"));
                    styles.push(StyleElement {
                        attrs: tag.attrs,
                        css,
                    });
                }
                other => kept.push(other),
            }
        }

        self.nodes = kept;
        styles
    }

    /// 为 `<head>` 之外的所有元素添加类名
    pub fn add_class(&mut self, class: &str) {
        let mut head_depth = 0usize;
        for node in &mut self.nodes {
            match node {
                Node::Start(tag) if tag.name == "head" => {
                    if !tag.self_closing {
                        head_depth += 1;
                    }
                }
                Node::End { name, .. } if name == "head" => {
                    head_depth = head_depth.saturating_sub(1);
                }
                Node::Start(tag) if head_depth == 0 => tag.add_class(class),
                _ => {}
            }
        }
    }

    /// 将文本中的连续空白压缩为单个空格；`<pre>` / `<textarea>` 与原始文本保持不变
    pub fn minify(&mut self) {
        let mut preserve_depth = 0usize;
        for node in &mut self.nodes {
            match node {
                Node::Start(tag) if PRESERVE_WS_ELEMENTS.contains(&tag.name.as_str()) => {
                    if !tag.self_closing {
                        preserve_depth += 1;
                    }
                }
                Node::End { name, .. } if PRESERVE_WS_ELEMENTS.contains(&name.as_str()) => {
                    preserve_depth = preserve_depth.saturating_sub(1);
                }
                Node::Text(text) if preserve_depth == 0 => *text = collapse_whitespace(text),
                _ => {}
            }
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_ws = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !in_ws {
                out.push(' ');
            }
            in_ws = true;
        } else {
            out.push(c);
            in_ws = false;
        }
    }
    out
}

struct Parser<'a> {
    source: &'a str,
    pos: usize,
    nodes: Vec<Node>,
    text_start: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            pos: 0,
            nodes: Vec::new(),
            text_start: 0,
        }
    }

    fn parse(mut self) -> Fragment {
        while self.pos < self.source.len() {
            let rest = &self.source[self.pos..];
            if !rest.starts_with('<') {
                self.pos += rest.find('<').unwrap_or(rest.len());
                continue;
            }
            if rest.starts_with("<!--") {
                let end = rest.find("-->").map_or(rest.len(), |i| i + 3);
                self.push_markup(Node::Comment(rest[..end].to_string()), end);
            } else if rest.starts_with("<!") || rest.starts_with("<?") {
                let end = rest.find('>').map_or(rest.len(), |i| i + 1);
                self.push_markup(Node::Doctype(rest[..end].to_string()), end);
            } else if rest.starts_with("</") && starts_with_letter(&rest[2..]) {
                let end = rest.find('>').map_or(rest.len(), |i| i + 1);
                let name = read_name(&rest[2..]).to_ascii_lowercase();
                self.push_markup(
                    Node::End {
                        name,
                        raw: rest[..end].to_string(),
                    },
                    end,
                );
            } else if starts_with_letter(&rest[1..]) {
                match parse_start_tag(rest) {
                    Some((tag, len)) => {
                        let raw_text = !tag.self_closing
                            && RAW_TEXT_ELEMENTS.contains(&tag.name.as_str());
                        let name = tag.name.clone();
                        self.push_markup(Node::Start(tag), len);
                        if raw_text {
                            self.read_raw_text(&name);
                        }
                    }
                    // 未闭合的标签按文本处理
                    None => self.pos = self.source.len(),
                }
            } else {
                self.pos += 1;
            }
        }
        self.flush_text();
        Fragment { nodes: self.nodes }
    }

    fn read_raw_text(&mut self, name: &str) {
        let rest = &self.source[self.pos..];
        let closing = format!("</{name}");
        let end = rest
            .to_ascii_lowercase()
            .find(&closing)
            .unwrap_or(rest.len());
        if end > 0 {
            self.nodes.push(Node::RawText(rest[..end].to_string()));
        }
        self.pos += end;
        self.text_start = self.pos;
    }

    fn push_markup(&mut self, node: Node, len: usize) {
        self.flush_text();
        self.nodes.push(node);
        self.pos += len;
        self.text_start = self.pos;
    }

    fn flush_text(&mut self) {
        if self.text_start < self.pos {
            self.nodes
                .push(Node::Text(self.source[self.text_start..self.pos].to_string()));
        }
        self.text_start = self.pos;
    }
}

fn starts_with_letter(s: &str) -> bool {
    s.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
}

fn read_name(s: &str) -> &str {
    let end = s
        .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .unwrap_or(s.len());
    &s[..end]
}

/// 解析 `rest` 开头的起始标签，返回标签与其长度；标签未闭合时返回 None
fn parse_start_tag(rest: &str) -> Option<(StartTag, usize)> {
    let name = read_name(&rest[1..]);
    let mut pos = 1 + name.len();
    let mut attrs = Vec::new();
    let bytes = rest.as_bytes();

    loop {
        while pos < rest.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if pos >= rest.len() {
            return None;
        }
        if rest[pos..].starts_with("/>") {
            pos += 2;
            return Some((start_tag(rest, name, attrs, true, pos), pos));
        }
        if bytes[pos] == b'>' {
            pos += 1;
            return Some((start_tag(rest, name, attrs, false, pos), pos));
        }
        if bytes[pos] == b'/' {
            pos += 1;
            continue;
        }

        let attr_rest = &rest[pos..];
        let name_len = attr_rest
            .find(|c: char| c.is_whitespace() || c == '=' || c == '>' || c == '/')
            .unwrap_or(attr_rest.len());
        let attr_name = &attr_rest[..name_len.max(1)];
        pos += attr_name.len();

        let mut value = None;
        let mut quote = None;
        let after = &rest[pos..];
        let ws = after.len() - after.trim_start().len();
        if after[ws..].starts_with('=') {
            pos += ws + 1;
            while pos < rest.len() && bytes[pos].is_ascii_whitespace() {
                pos += 1;
            }
            match bytes.get(pos) {
                Some(&q @ (b'"' | b'\'')) => {
                    let close = rest[pos + 1..].find(q as char)?;
                    value = Some(rest[pos + 1..pos + 1 + close].to_string());
                    quote = Some(q as char);
                    pos += close + 2;
                }
                Some(_) => {
                    let v = &rest[pos..];
                    let len = v
                        .find(|c: char| c.is_whitespace() || c == '>')
                        .unwrap_or(v.len());
                    value = Some(v[..len].to_string());
                    pos += len;
                }
                None => return None,
            }
        }
        attrs.push(Attr {
            name: attr_name.to_string(),
            value,
            quote,
        });
    }
}

fn start_tag(rest: &str, name: &str, attrs: Vec<Attr>, self_closing: bool, len: usize) -> StartTag {
    StartTag {
        name: name.to_ascii_lowercase(),
        attrs,
        self_closing,
        raw: rest[..len].to_string(),
        dirty: false,
    }
}
