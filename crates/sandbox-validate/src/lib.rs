//! Static validation of user-submitted Python scripts.
//!
//! This is the primary security control for the degraded isolation tiers
//! and a cheap pre-flight for the full-isolation tier: it runs before any
//! subprocess is spawned, so invalid scripts never pay isolation cost.
//! The policy (module allowlists, precedence order, blocked builtins) is
//! language-agnostic; the embedded Python-grammar parser is used purely as
//! a utility.

mod policy;
mod walk;

use std::collections::HashSet;

use rustpython_parser::{Parse, ast};

pub use policy::{
    BLOCKED_BUILTINS, NETWORK_MODULES, SAFE_STDLIB, SYSTEM_MODULES, allowed_dependency_names,
    check_import, dependency_import_name,
};

use walk::Checker;

/// Validate a script against the import/builtin policy.
///
/// Returns every violation found; an empty list means the script is valid.
/// A syntax error short-circuits to a single error; the tree is never
/// partially validated.
pub fn validate(
    script: &str,
    allowed_dependencies: &HashSet<String>,
    allow_network: bool,
) -> Vec<String> {
    let suite = match ast::Suite::parse(script, "<script>") {
        Ok(suite) => suite,
        Err(e) => return vec![format!("syntax error: {e}")],
    };
    Checker::new(allowed_dependencies, allow_network).check(&suite)
}

/// Check the script-contract shape: at least one top-level function, and
/// when several exist, exactly one named `main`.
pub fn entrypoint_errors(script: &str) -> Vec<String> {
    let suite = match ast::Suite::parse(script, "<script>") {
        Ok(suite) => suite,
        Err(e) => return vec![format!("syntax error: {e}")],
    };

    let names: Vec<&str> = suite
        .iter()
        .filter_map(|stmt| match stmt {
            ast::Stmt::FunctionDef(def) => Some(def.name.as_str()),
            ast::Stmt::AsyncFunctionDef(def) => Some(def.name.as_str()),
            _ => None,
        })
        .collect();

    if names.is_empty() {
        return vec!["script must define at least one function".to_string()];
    }
    if names.len() > 1 && !names.contains(&"main") {
        return vec![format!(
            "script defines {} functions; the entry point must be named 'main'",
            names.len()
        )];
    }
    Vec::new()
}

/// Top-level module names the script may import, for the runtime
/// import-hook allowlist: safe stdlib, declared dependencies, and (when
/// network is enabled) the network set.
pub fn allowed_import_names(
    allowed_dependencies: &HashSet<String>,
    allow_network: bool,
) -> Vec<String> {
    let mut names: Vec<String> = SAFE_STDLIB.iter().map(|s| (*s).to_string()).collect();
    names.extend(allowed_dependencies.iter().cloned());
    if allow_network {
        names.extend(
            NETWORK_MODULES
                .iter()
                .filter(|m| !m.contains('.'))
                .map(|s| (*s).to_string()),
        );
    }
    names.sort_unstable();
    names.dedup();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    fn assert_valid(script: &str) {
        let errors = validate(script, &HashSet::new(), false);
        assert!(errors.is_empty(), "expected valid, got: {errors:?}");
    }

    fn assert_flags(script: &str, needle: &str) {
        let errors = validate(script, &HashSet::new(), false);
        assert!(
            errors.iter().any(|e| e.contains(needle)),
            "expected an error containing {needle:?}, got: {errors:?}"
        );
    }

    #[test]
    fn clean_script_is_valid() {
        assert_valid("import json\n\ndef main():\n    return json.dumps({})\n");
    }

    #[test]
    fn syntax_error_short_circuits_to_single_error() {
        let errors = validate("def main(:\n", &HashSet::new(), false);
        assert_eq!(errors.len(), 1);
        assert!(errors.first().is_some_and(|e| e.contains("syntax error")));
    }

    #[test]
    fn system_imports_flagged_even_when_declared() {
        for module in ["os", "sys", "subprocess", "pathlib", "shutil", "tempfile", "glob"] {
            let script = format!("import {module}\n\ndef main():\n    return 1\n");
            let errors = validate(&script, &deps(&[module]), true);
            assert!(
                errors.iter().any(|e| e.contains(module)),
                "{module} must be flagged, got: {errors:?}"
            );
        }
    }

    #[test]
    fn import_os_getcwd_scenario() {
        let errors = validate(
            "import os\ndef main(): return os.getcwd()",
            &HashSet::new(),
            false,
        );
        assert!(errors.iter().any(|e| e.contains("os")), "got: {errors:?}");
    }

    #[test]
    fn from_import_of_system_module_flagged() {
        assert_flags("from os import path\n\ndef main():\n    return 1\n", "os");
        assert_flags(
            "from os.path import join\n\ndef main():\n    return 1\n",
            "os.path",
        );
    }

    #[test]
    fn relative_import_flagged() {
        assert_flags("from . import helpers\n\ndef main():\n    return 1\n", "relative");
    }

    #[test]
    fn network_import_gated_on_allow_network() {
        let script = "import socket\n\ndef main():\n    return 1\n";
        assert!(!validate(script, &HashSet::new(), false).is_empty());
        assert!(validate(script, &HashSet::new(), true).is_empty());
    }

    #[test]
    fn all_violations_collected_not_just_first() {
        let script = "import os\nimport socket\nimport leftpad\n\ndef main():\n    return 1\n";
        let errors = validate(script, &HashSet::new(), false);
        assert_eq!(errors.len(), 3, "got: {errors:?}");
    }

    #[test]
    fn declared_dependency_import_allowed() {
        let script = "import requests\n\ndef main():\n    return requests.__name__\n";
        assert!(validate(script, &deps(&["requests"]), false).is_empty());
        assert!(!validate(script, &HashSet::new(), false).is_empty());
    }

    #[test]
    fn blocked_builtin_calls_flagged_without_imports() {
        assert_flags("def main():\n    return eval('1+1')\n", "eval");
        assert_flags("def main():\n    exec('x = 1')\n", "exec");
        assert_flags("def main():\n    return compile('1', '<s>', 'eval')\n", "compile");
        assert_flags("def main():\n    return __import__('os')\n", "__import__");
    }

    #[test]
    fn blocked_builtin_via_attribute_access_flagged() {
        assert_flags("def main():\n    import builtins\n    builtins.exec('x = 1')\n", "exec");
        assert_flags("def main(b):\n    return b.eval('1')\n", "eval");
    }

    #[test]
    fn blocked_builtin_flagged_in_nested_positions() {
        assert_flags("def main():\n    return [eval(s) for s in ('1',)]\n", "eval");
        assert_flags("def main():\n    return (lambda: eval('1'))()\n", "eval");
        assert_flags(
            "def main():\n    try:\n        pass\n    finally:\n        eval('1')\n",
            "eval",
        );
    }

    #[test]
    fn os_environ_attribute_and_subscript_flagged() {
        assert_flags("import os\n\ndef main():\n    return os.environ\n", "os.environ");
        assert_flags(
            "import os\n\ndef main():\n    return os.environ[\"HOME\"]\n",
            "os.environ",
        );
        assert_flags(
            "import os\n\ndef main():\n    return os.environ.get(\"HOME\")\n",
            "os.environ",
        );
    }

    #[test]
    fn os_environ_flagged_independent_of_import_legality() {
        // No import statement at all; the reference alone is flagged.
        assert_flags("def main(os):\n    return os.environ\n", "os.environ");
    }

    #[test]
    fn entrypoint_single_function_any_name_ok() {
        assert!(entrypoint_errors("def handler():\n    return 1\n").is_empty());
    }

    #[test]
    fn entrypoint_multiple_functions_require_main() {
        let errors =
            entrypoint_errors("def a():\n    return 1\n\ndef b():\n    return 2\n");
        assert!(
            errors.iter().any(|e| e.contains("must be named 'main'")),
            "got: {errors:?}"
        );

        let ok = "def helper():\n    return 1\n\ndef main():\n    return helper()\n";
        assert!(entrypoint_errors(ok).is_empty());
    }

    #[test]
    fn entrypoint_no_functions_rejected() {
        let errors = entrypoint_errors("x = 1\n");
        assert!(
            errors.iter().any(|e| e.contains("at least one function")),
            "got: {errors:?}"
        );
    }

    #[test]
    fn allowed_import_names_cover_deps_and_gated_network() {
        let names = allowed_import_names(&deps(&["requests"]), false);
        assert!(names.contains(&"json".to_string()));
        assert!(names.contains(&"requests".to_string()));
        assert!(!names.contains(&"socket".to_string()));
        assert!(!names.contains(&"inspect".to_string()));

        let names = allowed_import_names(&HashSet::new(), true);
        assert!(names.contains(&"socket".to_string()));
        assert!(!names.contains(&"urllib.request".to_string()));
        assert!(names.contains(&"urllib".to_string()));
    }
}
