use crate::compiler::error::{Result, SourceCtx};
use crate::compiler::tags::{FlatKind, FlatTag};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// 占位符：`htmplph{nonce}_{index}_`，只含字母数字与下划线，压缩与属性改写都不会改动它
static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"htmplph([0-9a-f]{8})_(\d+)_").unwrap());

/// 从源码派生的随机串，避免与模板文本中的普通内容冲突
pub fn nonce(source: &str) -> String {
    let digest = Sha256::digest(source.as_bytes());
    format!("{digest:x}")[..8].to_string()
}

/// 占位符到原始标签的映射，回填时逐个消耗
#[derive(Debug, Default)]
pub struct PlaceholderMap {
    nonce: String,
    tags: BTreeMap<usize, FlatTag>,
}

impl PlaceholderMap {
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

/// 将标签流序列化为 HTML：文本原样拼接，其余标签替换为占位符
pub fn to_placeholder_html(tags: Vec<FlatTag>, nonce: &str) -> (String, PlaceholderMap) {
    let mut html = String::new();
    let mut map = PlaceholderMap {
        nonce: nonce.to_string(),
        tags: BTreeMap::new(),
    };
    for tag in tags {
        match tag.kind {
            FlatKind::Literal(text) => html.push_str(&text),
            _ => {
                let index = map.tags.len();
                html.push_str(&format!("htmplph{nonce}_{index}_"));
                map.tags.insert(index, tag);
            }
        }
    }
    (html, map)
}

/// 扫描处理后的 HTML，把占位符还原为原始标签；未被还原的占位符视为错误
pub(crate) fn from_placeholder_html(
    ctx: &SourceCtx<'_>,
    html: &str,
    mut map: PlaceholderMap,
) -> Result<Vec<FlatTag>> {
    let mut tags = Vec::new();
    let mut last = 0;
    let mut literal_offset = 0;

    for caps in PLACEHOLDER_RE.captures_iter(html) {
        if &caps[1] != map.nonce.as_str() {
            continue;
        }
        let whole = caps.get(0).map_or(0..0, |m| m.range());
        let tag = caps[2]
            .parse::<usize>()
            .ok()
            .and_then(|index| map.tags.remove(&index));
        let Some(tag) = tag else {
            return Err(ctx.parse_error(
                literal_offset,
                "模板标签在 HTML 处理中被复制或损坏",
            ));
        };
        if whole.start > last {
            tags.push(FlatTag::new(
                FlatKind::Literal(html[last..whole.start].to_string()),
                literal_offset,
            ));
        }
        literal_offset = tag.offset;
        tags.push(tag);
        last = whole.end;
    }
    if last < html.len() {
        tags.push(FlatTag::new(
            FlatKind::Literal(html[last..].to_string()),
            literal_offset,
        ));
    }

    if let Some((_, lost)) = map.tags.into_iter().next() {
        return Err(ctx.parse_error(
            lost.offset,
            format!(
                "模板标签 {} 在 HTML 处理中丢失（不能出现在 <style> 内，也不能破坏 HTML 结构）",
                lost.describe()
            ),
        ));
    }
    Ok(tags)
}
