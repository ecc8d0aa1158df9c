use crate::compiler::Compiler;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// 递归加载目录下所有指定扩展名的模板，返回加载数量
///
/// 模板名为去掉扩展名的相对路径，分隔符统一为 `/`，如 `forms/Input`。
pub fn load_dir(compiler: &mut Compiler, dir: &Path, extension: &str) -> Result<usize> {
    let mut files = Vec::new();
    collect_templates(dir, extension, &mut files)
        .with_context(|| format!("扫描模板目录失败：{}", dir.display()))?;
    // 按路径排序，保证加载顺序与平台无关
    files.sort();

    for path in &files {
        let name = template_name(dir, path)?;
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("读取模板失败：{}", path.display()))?;
        compiler.add_template(name, source, Some(path.clone()))?;
    }
    tracing::debug!("从 {} 加载了 {} 个模板", dir.display(), files.len());
    Ok(files.len())
}

fn collect_templates(current_dir: &Path, extension: &str, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(current_dir)? {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            collect_templates(&path, extension, files)?;
        } else if path.extension().is_some_and(|ext| ext == extension) {
            files.push(path);
        }
    }
    Ok(())
}

fn template_name(base_dir: &Path, path: &Path) -> Result<String> {
    let rel_path = path.strip_prefix(base_dir)?.with_extension("");
    let parts: Vec<String> = rel_path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CompilerOptions;

    #[test]
    fn test_load_nested_templates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("forms")).unwrap();
        std::fs::write(dir.path().join("page.html"), "<p>{{ x }}</p>").unwrap();
        std::fs::write(dir.path().join("forms/Input.html"), "<input>").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut compiler = Compiler::new(CompilerOptions::plain());
        assert_eq!(load_dir(&mut compiler, dir.path(), "html").unwrap(), 2);

        let registry = compiler.build().unwrap();
        assert_eq!(registry.names(), vec!["forms/Input", "page"]);
        assert_eq!(
            registry.template("page").unwrap().source_file.as_deref(),
            Some(dir.path().join("page.html").as_path())
        );
    }

    #[test]
    fn test_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut compiler = Compiler::new(CompilerOptions::plain());
        let err = load_dir(&mut compiler, &dir.path().join("nope"), "html").unwrap_err();
        assert!(err.to_string().contains("扫描模板目录失败"));
    }
}
