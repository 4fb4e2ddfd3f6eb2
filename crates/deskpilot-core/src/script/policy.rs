//! The capability table and the whitelist derived from it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock};

/// Every operation a script can ask the host to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    Click,
    DoubleClick,
    TripleClick,
    RightClick,
    MiddleClick,
    MoveTo,
    MoveRel,
    DragTo,
    DragRel,
    Scroll,
    HScroll,
    VScroll,
    Press,
    KeyDown,
    KeyUp,
    Hotkey,
    Write,
    TypeWrite,
    Screenshot,
    LocateOnScreen,
    LocateCenterOnScreen,
    Position,
    Size,
    Sleep,
    Copy,
    Paste,
}

/// Namespace holding input injection.
pub const INPUT_NAMESPACE: &str = "pyautogui";
/// Namespace holding clipboard access.
pub const CLIPBOARD_NAMESPACE: &str = "pyperclip";
/// Namespace holding the sleep primitive.
pub const TIMING_NAMESPACE: &str = "time";

/// `(namespace, function, capability)` for every callable.
pub const CAPABILITIES: &[(&str, &str, Capability)] = &[
    (INPUT_NAMESPACE, "click", Capability::Click),
    (INPUT_NAMESPACE, "doubleClick", Capability::DoubleClick),
    (INPUT_NAMESPACE, "tripleClick", Capability::TripleClick),
    (INPUT_NAMESPACE, "rightClick", Capability::RightClick),
    (INPUT_NAMESPACE, "middleClick", Capability::MiddleClick),
    (INPUT_NAMESPACE, "moveTo", Capability::MoveTo),
    (INPUT_NAMESPACE, "moveRel", Capability::MoveRel),
    (INPUT_NAMESPACE, "dragTo", Capability::DragTo),
    (INPUT_NAMESPACE, "dragRel", Capability::DragRel),
    (INPUT_NAMESPACE, "scroll", Capability::Scroll),
    (INPUT_NAMESPACE, "hscroll", Capability::HScroll),
    (INPUT_NAMESPACE, "vscroll", Capability::VScroll),
    (INPUT_NAMESPACE, "press", Capability::Press),
    (INPUT_NAMESPACE, "keyDown", Capability::KeyDown),
    (INPUT_NAMESPACE, "keyUp", Capability::KeyUp),
    (INPUT_NAMESPACE, "hotkey", Capability::Hotkey),
    (INPUT_NAMESPACE, "write", Capability::Write),
    (INPUT_NAMESPACE, "typewrite", Capability::TypeWrite),
    (INPUT_NAMESPACE, "screenshot", Capability::Screenshot),
    (INPUT_NAMESPACE, "locateOnScreen", Capability::LocateOnScreen),
    (INPUT_NAMESPACE, "locateCenterOnScreen", Capability::LocateCenterOnScreen),
    (INPUT_NAMESPACE, "position", Capability::Position),
    (INPUT_NAMESPACE, "size", Capability::Size),
    (TIMING_NAMESPACE, "sleep", Capability::Sleep),
    (CLIPBOARD_NAMESPACE, "copy", Capability::Copy),
    (CLIPBOARD_NAMESPACE, "paste", Capability::Paste),
];

/// Modules a script may import. The input namespace is preinstalled.
pub const ALLOWED_MODULES: &[&str] = &[TIMING_NAMESPACE, CLIPBOARD_NAMESPACE];

/// Side-effect-free builtins callable without a namespace.
pub const PURE_BUILTINS: &[&str] = &[
    "int", "float", "str", "bool", "list", "tuple", "len", "min", "max", "abs", "round",
];

/// Identifiers rejected wherever they appear.
pub const FORBIDDEN_IDENTIFIERS: &[&str] = &[
    "eval",
    "exec",
    "compile",
    "__import__",
    "open",
    "getattr",
    "setattr",
    "delattr",
    "globals",
    "locals",
    "vars",
    "breakpoint",
    "input",
    "importlib",
    "builtins",
];

/// Look up the capability behind `namespace.function`.
pub fn capability_for(namespace: &str, function: &str) -> Option<Capability> {
    CAPABILITIES
        .iter()
        .find(|(ns, f, _)| *ns == namespace && *f == function)
        .map(|(_, _, cap)| *cap)
}

/// Whether `name` uses the reserved double-underscore convention.
pub fn is_dunder(name: &str) -> bool {
    name.starts_with("__")
}

/// Approved namespaces and calls. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhitelistPolicy {
    namespaces: BTreeMap<String, BTreeSet<String>>,
    allowed_modules: BTreeSet<String>,
    builtins: BTreeSet<String>,
    forbidden: BTreeSet<String>,
}

impl WhitelistPolicy {
    /// The policy derived from [`CAPABILITIES`].
    pub fn standard() -> Self {
        let mut namespaces: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (ns, function, _) in CAPABILITIES {
            namespaces
                .entry(ns.to_string())
                .or_default()
                .insert(function.to_string());
        }

        Self {
            namespaces,
            allowed_modules: ALLOWED_MODULES.iter().map(|m| m.to_string()).collect(),
            builtins: PURE_BUILTINS.iter().map(|b| b.to_string()).collect(),
            forbidden: FORBIDDEN_IDENTIFIERS.iter().map(|f| f.to_string()).collect(),
        }
    }

    /// Shared process-wide instance of [`WhitelistPolicy::standard`].
    pub fn shared() -> Arc<WhitelistPolicy> {
        static POLICY: OnceLock<Arc<WhitelistPolicy>> = OnceLock::new();
        POLICY
            .get_or_init(|| Arc::new(WhitelistPolicy::standard()))
            .clone()
    }

    pub fn is_namespace(&self, name: &str) -> bool {
        self.namespaces.contains_key(name)
    }

    pub fn allows_call(&self, namespace: &str, function: &str) -> bool {
        self.namespaces
            .get(namespace)
            .map(|calls| calls.contains(function))
            .unwrap_or(false)
    }

    pub fn allows_module(&self, module: &str) -> bool {
        self.allowed_modules.contains(module)
    }

    pub fn is_builtin(&self, name: &str) -> bool {
        self.builtins.contains(name)
    }

    pub fn is_forbidden(&self, name: &str) -> bool {
        self.forbidden.contains(name) || is_dunder(name)
    }

    /// Namespace names, sorted.
    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.namespaces.keys().map(|k| k.as_str())
    }

    /// Approved calls of `namespace`, sorted.
    pub fn calls(&self, namespace: &str) -> impl Iterator<Item = &str> {
        self.namespaces
            .get(namespace)
            .into_iter()
            .flat_map(|calls| calls.iter().map(|c| c.as_str()))
    }
}

impl Default for WhitelistPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_matches_capability_table() {
        let policy = WhitelistPolicy::standard();
        for (ns, function, cap) in CAPABILITIES {
            assert!(policy.allows_call(ns, function));
            assert_eq!(capability_for(ns, function), Some(*cap));
        }
        assert_eq!(
            policy.namespaces().collect::<Vec<_>>(),
            vec!["pyautogui", "pyperclip", "time"]
        );
        assert_eq!(policy.calls("time").collect::<Vec<_>>(), vec!["sleep"]);
    }

    #[test]
    fn test_policy_rejections() {
        let policy = WhitelistPolicy::standard();
        assert!(!policy.allows_call("os", "system"));
        assert!(!policy.allows_call("pyautogui", "alert"));
        assert!(!policy.allows_module("os"));
        assert!(!policy.allows_module("pyautogui"));
        assert!(policy.is_forbidden("eval"));
        assert!(policy.is_forbidden("__class__"));
        assert!(!policy.is_forbidden("len"));
    }
}
