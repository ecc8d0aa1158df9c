use anyhow::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "htmpl.toml";

/// `htmpl.toml` 项目配置
#[derive(Debug, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub templates: TemplatesConfig,
    #[serde(default = "default_compiler")]
    pub compiler: CompilerOptions,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Deserialize)]
pub struct TemplatesConfig {
    #[serde(default = "default_template_dir")]
    pub dir: String,
    #[serde(default = "default_extension")]
    pub extension: String,
}

/// 编译选项（`[compiler]` 表），也可直接在代码中构造
#[derive(Debug, Clone, Deserialize)]
pub struct CompilerOptions {
    #[serde(default = "default_true")]
    pub minify_html: bool,
    #[serde(default = "default_true")]
    pub minify_css: bool,
    #[serde(default = "default_true")]
    pub parallel: bool,
    /// 解析结果缓存目录；为 None 时不使用缓存
    #[serde(default = "default_cache_dir")]
    pub cache_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl ProjectConfig {
    pub fn load(project_root: &Path) -> Result<Self> {
        let config_path = project_root.join(CONFIG_FILE);
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("读取 {CONFIG_FILE} 失败：{}", e))?;
        let mut config: ProjectConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("解析 {CONFIG_FILE} 失败：{}", e))?;
        config.resolve_paths(project_root);
        Ok(config)
    }

    /// 配置文件不存在时使用默认配置
    pub fn load_or_default(project_root: &Path) -> Result<Self> {
        if project_root.join(CONFIG_FILE).exists() {
            return Self::load(project_root);
        }
        tracing::debug!("未找到 {CONFIG_FILE}，使用默认配置");
        let mut config = Self::default();
        config.resolve_paths(project_root);
        Ok(config)
    }

    pub fn template_dir(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.templates.dir)
    }

    /// 相对路径的缓存目录以项目根目录为基准；`cache_dir = ""` 关闭缓存
    fn resolve_paths(&mut self, project_root: &Path) {
        self.compiler.cache_dir = match self.compiler.cache_dir.take() {
            Some(dir) if dir.as_os_str().is_empty() => None,
            Some(dir) if dir.is_relative() => Some(project_root.join(dir)),
            other => other,
        };
    }
}

impl CompilerOptions {
    /// 不压缩、不并行、不缓存，便于测试与嵌入使用
    pub fn plain() -> Self {
        Self {
            minify_html: false,
            minify_css: false,
            parallel: false,
            cache_dir: None,
        }
    }
}

// 默认值函数
fn default_template_dir() -> String { "templates".into() }
fn default_extension() -> String { "html".into() }
fn default_true() -> bool { true }
fn default_cache_dir() -> Option<PathBuf> { Some(PathBuf::from(".htmpl-cache")) }
fn default_log_level() -> String { "info".into() }
fn default_compiler() -> CompilerOptions {
    CompilerOptions {
        cache_dir: default_cache_dir(),
        ..CompilerOptions::default()
    }
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            templates: TemplatesConfig::default(),
            compiler: default_compiler(),
            log: LogConfig::default(),
        }
    }
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            dir: default_template_dir(),
            extension: default_extension(),
        }
    }
}

/// 代码中构造时默认不启用缓存，项目配置才会打开它
impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            minify_html: true,
            minify_css: true,
            parallel: true,
            cache_dir: None,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}
