use anyhow::Context;
use clap::{Parser, Subcommand};
use htmpl::config::ProjectConfig;
use htmpl::{Compiler, Registry, loader};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "htmpl", about = "HTML 模板编译器", version = long_version())]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 编译全部模板并报告错误
    Check {
        /// 项目根目录（默认当前目录）
        #[arg(short, long, default_value = ".")]
        root: PathBuf,
    },

    /// 渲染单个模板并输出到标准输出
    Render {
        /// 模板名，如 `pages/index`
        name: String,

        /// 项目根目录（默认当前目录）
        #[arg(short, long, default_value = ".")]
        root: PathBuf,

        /// 渲染参数 `key=value`，value 按 JSON 解析，失败时视为字符串
        #[arg(long = "set", value_name = "KEY=VALUE")]
        vars: Vec<String>,

        /// 不输出 <style>
        #[arg(long)]
        no_styles: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let root = match &cli.command {
        Commands::Check { root } | Commands::Render { root, .. } => root.clone(),
    };
    let root = root.canonicalize().unwrap_or(root);

    // 使用配置中的日志级别作为默认值
    let config = ProjectConfig::load_or_default(&root);
    let default_level = config
        .as_ref()
        .map(|c| c.log.level.clone())
        .unwrap_or_else(|_| "info".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = config?;

    match cli.command {
        Commands::Check { .. } => match build_registry(&root, &config) {
            Ok(mut registry) => {
                registry.flush_cache();
                tracing::info!("检查通过（{} 个模板）", registry.len());
            }
            Err(e) => {
                tracing::error!("{e:#}");
                anyhow::bail!("检查未通过");
            }
        },
        Commands::Render {
            name,
            vars,
            no_styles,
            ..
        } => {
            let mut registry = build_registry(&root, &config)?;
            let mut kwargs = parse_vars(&vars)?;
            if no_styles {
                kwargs.insert("with_styles".into(), serde_json::Value::Bool(false));
            }
            let rendered = registry.render(&name, kwargs);
            registry.flush_cache();
            println!("{}", rendered?);
        }
    }

    Ok(())
}

fn build_registry(root: &Path, config: &ProjectConfig) -> anyhow::Result<Registry> {
    let dir = config.template_dir(root);
    let mut compiler = Compiler::new(config.compiler.clone());
    if let Some(cache_dir) = &compiler.options().cache_dir {
        tracing::debug!("解析缓存目录：{}", cache_dir.display());
    }
    let count = loader::load_dir(&mut compiler, &dir, &config.templates.extension)?;
    if count == 0 {
        tracing::warn!("{} 下没有找到 .{} 模板", dir.display(), config.templates.extension);
    }
    Ok(compiler.build()?)
}

fn parse_vars(vars: &[String]) -> anyhow::Result<BTreeMap<String, serde_json::Value>> {
    let mut kwargs = BTreeMap::new();
    for var in vars {
        let (key, raw) = var
            .split_once('=')
            .with_context(|| format!("参数格式应为 KEY=VALUE：{var}"))?;
        let value = serde_json::from_str(raw)
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
        kwargs.insert(key.trim().to_string(), value);
    }
    Ok(kwargs)
}

const fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        "\ncommit:  ",
        env!("HTMPL_GIT_COMMIT"),
        " (",
        env!("HTMPL_GIT_STATE"),
        ")",
        "\ntarget:  ",
        env!("HTMPL_BUILD_TARGET"),
        "\nprofile: ",
        env!("HTMPL_BUILD_PROFILE"),
    )
}
