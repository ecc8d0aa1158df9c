use crate::compiler::filters;
use minijinja::{Environment, Expression};
use std::fmt;
use std::sync::LazyLock;

/// 表达式服务使用的全局环境：只读，所有编译产物共享
static EXPR_ENV: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    filters::register_filters(&mut env);
    env
});

/// 由表达式环境自身提供的全局名称；未被参数或局部变量遮蔽时交给环境解析
pub const BUILTINS: &[&str] = &["range", "dict", "namespace", "debug"];

pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

/// 仅检查表达式语法
pub fn check_syntax(src: &str) -> Result<(), minijinja::Error> {
    EXPR_ENV.compile_expression_owned(src.to_string()).map(|_| ())
}

/// 编译后的表达式及其自由变量
pub struct CompiledExpr {
    pub src: String,
    expr: Expression<'static, 'static>,
    /// 按名称排序的自由变量，包含内置名称
    pub free_names: Vec<String>,
}

impl CompiledExpr {
    pub fn compile(src: &str) -> Result<Self, minijinja::Error> {
        let expr = EXPR_ENV.compile_expression_owned(src.to_string())?;
        let mut free_names: Vec<String> = expr.undeclared_variables(false).into_iter().collect();
        free_names.sort();
        Ok(Self {
            src: src.to_string(),
            expr,
            free_names,
        })
    }

    /// 以给定变量表求值
    pub fn eval(&self, vars: minijinja::Value) -> Result<minijinja::Value, minijinja::Error> {
        self.expr.eval(vars)
    }
}

impl fmt::Debug for CompiledExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledExpr")
            .field("src", &self.src)
            .field("free_names", &self.free_names)
            .finish()
    }
}
