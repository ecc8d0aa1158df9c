use crate::compiler::ast::Template;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread::JoinHandle;

pub(crate) const CACHE_FILE: &str = "parse-cache.json";

/// 所有缓存写入共用一把锁，避免多个后台线程同时改写同一文件
static SAVE_LOCK: Mutex<()> = Mutex::new(());

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedTemplate {
    fingerprint: String,
    template: Template,
}

/// 解析结果缓存：按模板名保存解析后的 `Template`，以源码指纹判断是否可复用
///
/// 缓存只是加速手段，读写失败都不会影响构建结果。
#[derive(Debug)]
pub struct ParseCache {
    entries: HashMap<String, CachedTemplate>,
    cache_path: PathBuf,
    /// 本次构建涉及的模板，保存时只保留这些条目
    touched: HashSet<String>,
}

impl ParseCache {
    /// 从缓存文件加载，不存在或损坏时返回空缓存
    pub fn load(cache_dir: &Path) -> Self {
        let cache_path = cache_dir.join(CACHE_FILE);
        let entries = std::fs::read_to_string(&cache_path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        Self {
            entries,
            cache_path,
            touched: HashSet::new(),
        }
    }

    /// 解析结果的指纹：模板名、源码、作用域种子与影响输出的编译选项
    pub fn fingerprint(
        name: &str,
        source: &str,
        scope_seed: u64,
        minify_html: bool,
        minify_css: bool,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(env!("CARGO_PKG_VERSION").as_bytes());
        hasher.update([0]);
        hasher.update(name.as_bytes());
        hasher.update([0]);
        hasher.update(source.as_bytes());
        hasher.update(scope_seed.to_le_bytes());
        hasher.update([minify_html as u8, minify_css as u8]);
        format!("{:x}", hasher.finalize())
    }

    pub fn get(&self, name: &str, fingerprint: &str) -> Option<Template> {
        self.entries
            .get(name)
            .filter(|entry| entry.fingerprint == fingerprint)
            .map(|entry| entry.template.clone())
    }

    /// 标记模板属于本次构建
    pub fn touch(&mut self, name: &str) {
        self.touched.insert(name.to_string());
    }

    pub fn update(&mut self, template: &Template, fingerprint: String) {
        self.touch(&template.name);
        self.entries.insert(
            template.name.clone(),
            CachedTemplate {
                fingerprint,
                template: template.clone(),
            },
        );
    }

    /// 持久化到缓存文件：先写临时文件再重命名
    pub fn save(&self) -> Result<()> {
        let _guard = SAVE_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(parent) = self.cache_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let kept: HashMap<&String, &CachedTemplate> = self
            .entries
            .iter()
            .filter(|(name, _)| self.touched.is_empty() || self.touched.contains(*name))
            .collect();
        let json = serde_json::to_string(&kept)?;
        let tmp_path = self.cache_path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &self.cache_path)?;
        Ok(())
    }

    /// 在后台线程中保存，失败只记录警告
    pub fn persist_in_background(self) -> JoinHandle<()> {
        std::thread::spawn(move || {
            if let Err(e) = self.save() {
                tracing::warn!("保存解析缓存失败（{}）: {e}", self.cache_path.display());
            }
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn template(name: &str) -> Template {
        Template {
            name: name.to_string(),
            source_file: None,
            parameters: Vec::new(),
            body: vec![crate::Tag::Literal("<p>hi</p>".into())],
            css: "p{}".into(),
            layout: None,
            component_calls: Vec::new(),
            style_includes: BTreeSet::new(),
            blocks: BTreeSet::new(),
            layout_info: None,
        }
    }

    #[test]
    fn test_fingerprint_changes_with_inputs() {
        let base = ParseCache::fingerprint("a", "src", 0, true, true);
        assert_eq!(base, ParseCache::fingerprint("a", "src", 0, true, true));
        assert_ne!(base, ParseCache::fingerprint("a", "src2", 0, true, true));
        assert_ne!(base, ParseCache::fingerprint("a", "src", 1, true, true));
        assert_ne!(base, ParseCache::fingerprint("a", "src", 0, false, true));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ParseCache::load(dir.path());
        assert!(cache.is_empty());

        let fp = ParseCache::fingerprint("page", "<p>hi</p>", 0, true, true);
        cache.update(&template("page"), fp.clone());
        cache.save().unwrap();

        let reloaded = ParseCache::load(dir.path());
        assert_eq!(reloaded.get("page", &fp), Some(template("page")));
        assert_eq!(reloaded.get("page", "stale"), None);
    }

    #[test]
    fn test_untouched_entries_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ParseCache::load(dir.path());
        cache.update(&template("old"), "1".into());
        cache.save().unwrap();

        let mut next = ParseCache::load(dir.path());
        next.update(&template("new"), "2".into());
        next.persist_in_background().join().unwrap();

        let reloaded = ParseCache::load(dir.path());
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.get("new", "2").is_some());
    }

    #[test]
    fn test_corrupt_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CACHE_FILE), "{not json").unwrap();
        assert!(ParseCache::load(dir.path()).is_empty());
    }
}
