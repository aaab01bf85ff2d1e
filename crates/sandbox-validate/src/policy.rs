use std::collections::HashSet;

/// Modules granting host/system access. Always denied, even when the same
/// name appears in the declared dependency list.
pub const SYSTEM_MODULES: &[&str] = &[
    "code",
    "ctypes",
    "fcntl",
    "gc",
    "glob",
    "grp",
    "importlib",
    "marshal",
    "mmap",
    "multiprocessing",
    "os",
    "pathlib",
    "pickle",
    "platform",
    "pty",
    "pwd",
    "resource",
    "runpy",
    "select",
    "shutil",
    "signal",
    "subprocess",
    "sys",
    "sysconfig",
    "tempfile",
    "threading",
    "tty",
];

/// Modules granting network access. Denied unless the request enabled
/// network. A few names (asyncio, ssl) also touch system facilities; the
/// fixed check order (system first) resolves the overlap and must not be
/// "corrected".
pub const NETWORK_MODULES: &[&str] = &[
    "asyncio",
    "ftplib",
    "http",
    "imaplib",
    "poplib",
    "smtplib",
    "socket",
    "socketserver",
    "ssl",
    "telnetlib",
    "urllib",
    "urllib.request",
    "xmlrpc",
];

/// Standard-library modules considered safe without declaration.
/// `inspect` is deliberately absent: frame introspection can disable the
/// runtime import hook.
pub const SAFE_STDLIB: &[&str] = &[
    "abc",
    "array",
    "base64",
    "binascii",
    "bisect",
    "calendar",
    "collections",
    "contextlib",
    "copy",
    "csv",
    "dataclasses",
    "datetime",
    "decimal",
    "difflib",
    "enum",
    "fractions",
    "functools",
    "hashlib",
    "heapq",
    "hmac",
    "html",
    "io",
    "itertools",
    "json",
    "logging",
    "math",
    "numbers",
    "operator",
    "pprint",
    "random",
    "re",
    "secrets",
    "statistics",
    "string",
    "textwrap",
    "time",
    "traceback",
    "types",
    "typing",
    "unicodedata",
    "uuid",
    "zoneinfo",
];

/// Builtins that exist specifically to defeat import-statement analysis.
/// Calls to these are flagged regardless of import policy.
pub const BLOCKED_BUILTINS: &[&str] = &["__import__", "compile", "eval", "exec"];

/// Classify one imported module name. Returns the violation message, or
/// `None` when the import is allowed.
///
/// Precedence is fixed: system-access > network (gated) >
/// declared-dependency > safe-stdlib > default-deny.
pub fn check_import(
    module: &str,
    allowed_dependencies: &HashSet<String>,
    allow_network: bool,
) -> Option<String> {
    let top = module.split('.').next().unwrap_or("");

    if SYSTEM_MODULES.contains(&top) {
        return Some(format!(
            "import of module '{module}' is not allowed: system access is always denied"
        ));
    }

    if NETWORK_MODULES.contains(&module) || NETWORK_MODULES.contains(&top) {
        return if allow_network {
            None
        } else {
            Some(format!(
                "import of module '{module}' is not allowed: network access was not requested"
            ))
        };
    }

    if dotted_prefixes(module)
        .iter()
        .any(|p| allowed_dependencies.contains(&p.to_ascii_lowercase()))
    {
        return None;
    }

    if SAFE_STDLIB.contains(&top) {
        return None;
    }

    Some(format!(
        "import of module '{module}' is not allowed: not a declared dependency or safe standard library module"
    ))
}

/// `a.b.c` → `["a", "a.b", "a.b.c"]`.
fn dotted_prefixes(module: &str) -> Vec<String> {
    let mut prefixes = Vec::new();
    let mut acc = String::new();
    for part in module.split('.') {
        if !acc.is_empty() {
            acc.push('.');
        }
        acc.push_str(part);
        prefixes.push(acc.clone());
    }
    prefixes
}

/// Extract the import name from a dependency spec string: version
/// specifiers, extras and markers are stripped, the name is lowercased and
/// dashes become underscores (`Typing-Extensions>=4.0` → `typing_extensions`).
pub fn dependency_import_name(spec: &str) -> Option<String> {
    let trimmed = spec.trim();
    let end = trimmed
        .find(|c: char| matches!(c, '=' | '<' | '>' | '!' | '~' | '[' | ';' | '@' | ' '))
        .unwrap_or(trimmed.len());
    let name = trimmed.get(..end)?.trim();
    if name.is_empty() {
        return None;
    }
    Some(name.to_ascii_lowercase().replace('-', "_"))
}

/// Normalize a dependency spec list into the allowed-import set consumed
/// by [`check_import`].
pub fn allowed_dependency_names(specs: &[String]) -> HashSet<String> {
    specs
        .iter()
        .filter_map(|s| dependency_import_name(s))
        .collect()
}
