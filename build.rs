use std::process::Command;

fn main() {
    let commit = git(&["rev-parse", "--short", "HEAD"]);
    let dirty = git(&["status", "--porcelain", "--untracked-files=no"])
        .map(|status| if status.is_empty() { "clean" } else { "dirty" });

    let info = [
        ("GIT_COMMIT", commit.as_deref()),
        ("GIT_STATE", dirty),
        ("BUILD_TARGET", std::env::var("TARGET").ok().as_deref()),
        ("BUILD_PROFILE", std::env::var("PROFILE").ok().as_deref()),
    ]
    .map(|(key, value)| (key, value.unwrap_or("unknown").to_string()));
    for (key, value) in &info {
        println!("cargo:rustc-env=HTMPL_{key}={value}");
    }

    for path in [".git/HEAD", ".git/refs/", ".git/index"] {
        println!("cargo:rerun-if-changed={path}");
    }
}

/// 运行 git 并返回去掉首尾空白的输出；不在仓库中或 git 不可用时为 None
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
}
