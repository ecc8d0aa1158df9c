use std::collections::HashMap;

/// 单次构建的可变状态：作用域计数器、CSS 依赖闭包缓存、递归路径
///
/// 每次 `Compiler::build` 新建一个，构建结束即丢弃，闭包缓存不会跨构建复用。
#[derive(Debug, Default)]
pub struct CompilerSession {
    scope_counter: u64,
    pub(crate) closures: HashMap<String, Vec<String>>,
    pub(crate) visiting: Vec<String>,
}

impl CompilerSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// 单调递增的作用域种子
    pub fn next_scope_seed(&mut self) -> u64 {
        let seed = self.scope_counter;
        self.scope_counter += 1;
        seed
    }
}
