//! Static whitelist check of a parsed script.
//!
//! The walk is pure: it never evaluates anything. A script is accepted only
//! when no node trips a rule, and anything the rules do not positively
//! recognise is rejected.

use super::ast::{Expr, ImportName, Program, Stmt};
use super::parser::parse;
use super::policy::{is_dunder, WhitelistPolicy};
use super::ScriptError;
use thiserror::Error;
use tracing::warn;

/// Why a script was refused.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Rejection {
    #[error("{0}")]
    Syntax(#[from] ScriptError),

    #[error("Disallowed import: {0}")]
    DisallowedImport(String),

    #[error("Disallowed call: {namespace}.{function}")]
    DisallowedCall { namespace: String, function: String },

    #[error("Unknown namespace: {0}")]
    UnknownNamespace(String),

    #[error("Disallowed attribute chain access")]
    AttributeChain,

    #[error("Call target is not a whitelisted function: {0}")]
    DynamicCallee(String),

    #[error("Disallowed dunder attribute: {0}")]
    DunderAttribute(String),

    #[error("Disallowed identifier: {0}")]
    ForbiddenIdentifier(String),

    #[error("Namespace used as a value: {0}")]
    NamespaceReference(String),

    #[error("Attribute read outside a call: {0}")]
    BareAttribute(String),
}

/// Parse and check `source`. Returns the program when it is acceptable.
pub fn validate(source: &str, policy: &WhitelistPolicy) -> Result<Program, Rejection> {
    let program = parse(source)?;
    validate_program(&program, policy)?;
    Ok(program)
}

/// Check an already-parsed program.
pub fn validate_program(program: &Program, policy: &WhitelistPolicy) -> Result<(), Rejection> {
    let result = program
        .statements
        .iter()
        .try_for_each(|stmt| check_stmt(stmt, policy));
    if let Err(e) = &result {
        warn!("Script rejected: {}", e);
    }
    result
}

fn check_binding(name: &str, policy: &WhitelistPolicy) -> Result<(), Rejection> {
    if policy.is_forbidden(name) {
        return Err(Rejection::ForbiddenIdentifier(name.to_string()));
    }
    if policy.is_namespace(name) || policy.is_builtin(name) {
        return Err(Rejection::NamespaceReference(name.to_string()));
    }
    Ok(())
}

fn check_import_names(names: &[ImportName], policy: &WhitelistPolicy) -> Result<(), Rejection> {
    for name in names {
        if policy.is_forbidden(&name.name) {
            return Err(Rejection::ForbiddenIdentifier(name.name.clone()));
        }
        if let Some(alias) = &name.alias {
            check_binding(alias, policy)?;
        }
    }
    Ok(())
}

fn check_stmt(stmt: &Stmt, policy: &WhitelistPolicy) -> Result<(), Rejection> {
    match stmt {
        Stmt::Import(names) => {
            for name in names {
                if !policy.allows_module(&name.name) {
                    return Err(Rejection::DisallowedImport(name.name.clone()));
                }
            }
            check_import_names(names, policy)
        }
        Stmt::FromImport { module, names } => {
            if !policy.allows_module(module) {
                return Err(Rejection::DisallowedImport(module.clone()));
            }
            check_import_names(names, policy)
        }
        Stmt::Assign { target, value } => {
            check_binding(target, policy)?;
            check_expr(value, policy)
        }
        Stmt::Expr(expr) => check_expr(expr, policy),
    }
}

fn check_expr(expr: &Expr, policy: &WhitelistPolicy) -> Result<(), Rejection> {
    match expr {
        Expr::Call {
            func,
            args,
            keywords,
        } => {
            check_callee(func, policy)?;
            for arg in args {
                check_expr(arg, policy)?;
            }
            for keyword in keywords {
                if is_dunder(&keyword.name) {
                    return Err(Rejection::DunderAttribute(keyword.name.clone()));
                }
                check_expr(&keyword.value, policy)?;
            }
            Ok(())
        }
        Expr::Attribute { value, attr } => {
            if is_dunder(attr) {
                return Err(Rejection::DunderAttribute(attr.clone()));
            }
            check_expr(value, policy)?;
            Err(Rejection::BareAttribute(attr.clone()))
        }
        Expr::Name(name) => {
            if policy.is_forbidden(name) {
                return Err(Rejection::ForbiddenIdentifier(name.clone()));
            }
            if policy.is_namespace(name) {
                return Err(Rejection::NamespaceReference(name.clone()));
            }
            Ok(())
        }
        Expr::List(items) | Expr::Tuple(items) => {
            items.iter().try_for_each(|item| check_expr(item, policy))
        }
        Expr::Index { value, index } => {
            check_expr(value, policy)?;
            check_expr(index, policy)
        }
        Expr::Unary { operand, .. } => check_expr(operand, policy),
        Expr::Binary { left, right, .. } => {
            check_expr(left, policy)?;
            check_expr(right, policy)
        }
        Expr::Int(_) | Expr::Float(_) | Expr::Str(_) | Expr::Bool(_) | Expr::None => Ok(()),
    }
}

fn check_callee(func: &Expr, policy: &WhitelistPolicy) -> Result<(), Rejection> {
    match func {
        Expr::Attribute { value, attr } => {
            if is_dunder(attr) {
                return Err(Rejection::DunderAttribute(attr.clone()));
            }
            let Expr::Name(namespace) = value.as_ref() else {
                return Err(Rejection::AttributeChain);
            };
            if policy.is_forbidden(namespace) {
                return Err(Rejection::ForbiddenIdentifier(namespace.clone()));
            }
            if !policy.is_namespace(namespace) {
                return Err(Rejection::UnknownNamespace(namespace.clone()));
            }
            if !policy.allows_call(namespace, attr) {
                return Err(Rejection::DisallowedCall {
                    namespace: namespace.clone(),
                    function: attr.clone(),
                });
            }
            Ok(())
        }
        Expr::Name(name) => {
            if policy.is_forbidden(name) {
                return Err(Rejection::ForbiddenIdentifier(name.clone()));
            }
            if policy.is_builtin(name) {
                Ok(())
            } else {
                Err(Rejection::DynamicCallee(name.clone()))
            }
        }
        other => Err(Rejection::DynamicCallee(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};

    fn accepts(source: &str) -> bool {
        validate(source, &WhitelistPolicy::standard()).is_ok()
    }

    fn reason(source: &str) -> Rejection {
        validate(source, &WhitelistPolicy::standard()).unwrap_err()
    }

    #[test]
    fn test_accepts_compiled_actions() {
        assert!(accepts("pyautogui.click(x=100, y=200)"));
        assert!(accepts("pyperclip.copy('你好')\npyautogui.hotkey('ctrl', 'v')"));
        assert!(accepts("pyautogui.scroll(-15)"));
        assert!(accepts("pyautogui.moveTo(x=1, y=2)\npyautogui.dragTo(x=3, y=4, button='left')"));
        assert!(accepts("import time\ntime.sleep(0.5)"));
        assert!(accepts("from time import sleep"));
        assert!(accepts("size = pyautogui.size()\npyautogui.click(x=int(size[0] / 2), y=max(1, 2))"));
    }

    #[test]
    fn test_rejects_imports() {
        assert_eq!(reason("import os"), Rejection::DisallowedImport("os".into()));
        assert_eq!(
            reason("from subprocess import run"),
            Rejection::DisallowedImport("subprocess".into())
        );
        assert_eq!(
            reason("import pyautogui"),
            Rejection::DisallowedImport("pyautogui".into())
        );
        assert!(matches!(reason("import time as eval"), Rejection::ForbiddenIdentifier(_)));
    }

    #[test]
    fn test_rejects_escape_shapes() {
        assert_eq!(
            reason("pyautogui.alert('hi')"),
            Rejection::DisallowedCall {
                namespace: "pyautogui".into(),
                function: "alert".into()
            }
        );
        assert_eq!(reason("os.system('ls')"), Rejection::UnknownNamespace("os".into()));
        assert_eq!(
            reason("pyautogui.click.call(1)"),
            Rejection::AttributeChain
        );
        assert!(matches!(
            reason("x = ().__class__"),
            Rejection::DunderAttribute(attr) if attr == "__class__"
        ));
        assert!(matches!(
            reason("pyautogui.__dict__"),
            Rejection::DunderAttribute(_)
        ));
        assert!(matches!(reason("f = eval"), Rejection::ForbiddenIdentifier(_)));
        assert!(matches!(reason("exec('1')"), Rejection::ForbiddenIdentifier(_)));
        assert!(matches!(reason("open('/etc/passwd')"), Rejection::ForbiddenIdentifier(_)));
        assert!(matches!(reason("print('x')"), Rejection::DynamicCallee(_)));
        assert!(matches!(reason("pyautogui.position()[0]()"), Rejection::DynamicCallee(_)));
        assert!(matches!(reason("p = pyautogui"), Rejection::NamespaceReference(_)));
        assert!(matches!(reason("pyautogui = 1"), Rejection::NamespaceReference(_)));
        assert!(matches!(reason("x = (1).real"), Rejection::BareAttribute(_)));
        assert!(matches!(reason("pyautogui.click("), Rejection::Syntax(_)));
    }

    #[test]
    fn test_rejects_oversized_chains() {
        let sum = format!("pyautogui.press('a' {})", "+ 'a' ".repeat(8_000));
        assert!(matches!(reason(&sum), Rejection::Syntax(_)));
        let index = format!("x = pyautogui.position(){}", "[0]".repeat(8_000));
        assert!(matches!(reason(&index), Rejection::Syntax(_)));
    }

    const SAFE_CALLS: &[&str] = &[
        "pyautogui.click(x={a}, y={b})",
        "pyautogui.doubleClick({a}, {b})",
        "pyautogui.rightClick(x={a}, y={b})",
        "pyautogui.moveTo({a}, {b})",
        "pyautogui.scroll(-{a})",
        "pyautogui.press('enter')",
        "pyautogui.hotkey('ctrl', 'a')",
        "pyperclip.copy('t{a}')",
        "time.sleep(0.{a})",
        "v = len([{a}, {b}])",
    ];

    const POISON: &[&str] = &[
        "import os",
        "from socket import socket",
        "eval('{a}')",
        "x = __import__",
        "pyautogui.__class__",
        "().__class__.__bases__",
        "pyautogui.moveTo.__globals__",
        "subprocess.run('x')",
        "pyautogui.alert('{a}')",
        "getattr(pyautogui, 'click')",
        "compile",
    ];

    fn render(template: &str, rng: &mut StdRng) -> String {
        template
            .replace("{a}", &rng.gen_range(1..2000).to_string())
            .replace("{b}", &rng.gen_range(1..2000).to_string())
    }

    #[test]
    fn test_generated_scripts_split_cleanly() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let len = rng.gen_range(1..6);
            let mut lines: Vec<String> = (0..len)
                .map(|_| render(SAFE_CALLS.choose(&mut rng).unwrap(), &mut rng))
                .collect();
            let safe = lines.join("\n");
            assert!(accepts(&safe), "should accept:\n{}", safe);

            let poison = render(POISON.choose(&mut rng).unwrap(), &mut rng);
            let at = rng.gen_range(0..=lines.len());
            lines.insert(at, poison);
            let unsafe_script = lines.join("\n");
            assert!(!accepts(&unsafe_script), "should reject:\n{}", unsafe_script);
        }
    }
}
