//! Generation of the declarative jail configuration.
//!
//! The config format has no native parameter binding, so every value
//! interpolated into the text (paths, cache keys, environment names) is
//! validated against a strict allowlist pattern first. A value that fails
//! validation aborts config generation; nothing is escaped or repaired.

use std::fmt::Write as _;
use std::path::Path;

use sandbox::{ActionSandboxConfig, ResourceLimits, SandboxError, TrustMode, is_valid_env_key};

use crate::settings::NsjailSettings;

/// Job directory mount point inside the jail.
pub(crate) const WORK_DIR: &str = "/work";
/// Resolved dependency cache mount point.
pub(crate) const DEPS_DIR: &str = "/deps";
/// Package-manager cache mount point (install phase only).
pub(crate) const PIP_CACHE_DIR: &str = "/pip-cache";
/// Registry package mount prefix (action execution).
pub(crate) const PACKAGES_PREFIX: &str = "/packages";
/// Site-packages mount prefix (trusted action execution).
pub(crate) const SITE_PACKAGES_PREFIX: &str = "/site-packages";

fn unsafe_value(detail: String) -> SandboxError {
    SandboxError::Infrastructure {
        message: format!("refusing to generate sandbox config: {detail}"),
        hint: None,
    }
}

/// A path may be interpolated only if it is UTF-8 and free of the
/// characters that have meaning in the config text.
pub(crate) fn validate_path(path: &Path) -> sandbox::Result<&str> {
    let text = path
        .to_str()
        .ok_or_else(|| unsafe_value(format!("non-UTF-8 path {}", path.display())))?;
    if text.contains(['"', '\n', '\r', '\\', '{', '}']) {
        return Err(unsafe_value(format!("unsafe characters in path {text:?}")));
    }
    Ok(text)
}

/// Cache keys are produced by this system as lowercase hex; anything else
/// reaching config generation indicates tampering upstream.
pub(crate) fn validate_cache_key(key: &str) -> sandbox::Result<()> {
    let well_formed = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase());
    if well_formed {
        Ok(())
    } else {
        Err(unsafe_value(format!("malformed cache key {key:?}")))
    }
}

pub(crate) fn validate_env_key(key: &str) -> sandbox::Result<()> {
    if is_valid_env_key(key) {
        Ok(())
    } else {
        Err(unsafe_value(format!("invalid environment variable name {key:?}")))
    }
}

/// Incremental writer for the jail config text. All string values pass
/// through the validators above before reaching the buffer.
pub(crate) struct ConfigText {
    buf: String,
}

impl ConfigText {
    pub(crate) fn new(name: &str) -> Self {
        let mut this = Self { buf: String::new() };
        let _ = writeln!(this.buf, "name: \"{name}\"");
        this.line("mode: ONCE");
        this.line("hostname: \"sandbox\"");
        let _ = writeln!(this.buf, "cwd: \"{WORK_DIR}\"");
        this.line("keep_env: false");
        this.line("keep_caps: false");
        this.line("mount_proc: true");
        this.line("clone_newnet: true");
        this.line("clone_newuser: true");
        this.line("clone_newns: true");
        this.line("clone_newpid: true");
        this.line("clone_newipc: true");
        this.line("clone_newuts: true");
        this
    }

    fn line(&mut self, text: &str) {
        self.buf.push_str(text);
        self.buf.push('\n');
    }

    pub(crate) fn time_limit(&mut self, seconds: u64) {
        let _ = writeln!(self.buf, "time_limit: {seconds}");
    }

    /// Resource limits map 1:1 onto rlimits.
    pub(crate) fn rlimits(&mut self, limits: &ResourceLimits) {
        let _ = writeln!(self.buf, "rlimit_as: {}", limits.memory_mb);
        let _ = writeln!(self.buf, "rlimit_cpu: {}", limits.cpu_seconds);
        let _ = writeln!(self.buf, "rlimit_fsize: {}", limits.max_file_size_mb);
        let _ = writeln!(self.buf, "rlimit_nofile: {}", limits.max_open_files);
        let _ = writeln!(self.buf, "rlimit_nproc: {}", limits.max_processes);
    }

    pub(crate) fn bind(&mut self, src: &Path, dst: &str, rw: bool) -> sandbox::Result<()> {
        let src = validate_path(src)?;
        let _ = writeln!(
            self.buf,
            "mount {{ src: \"{src}\" dst: \"{dst}\" is_bind: true rw: {rw} }}"
        );
        Ok(())
    }

    pub(crate) fn tmpfs(&mut self, dst: &str) {
        let _ = writeln!(
            self.buf,
            "mount {{ dst: \"{dst}\" fstype: \"tmpfs\" rw: true }}"
        );
    }

    /// Fixed-value environment entry. The value is held to the same
    /// character allowlist as paths; caller-supplied values never go
    /// through here (they ride `--env KEY` pass-through instead).
    pub(crate) fn envar(&mut self, key: &str, value: &str) -> sandbox::Result<()> {
        validate_env_key(key)?;
        if value.contains(['"', '\n', '\r', '\\', '{', '}']) {
            return Err(unsafe_value(format!("unsafe environment value for {key}")));
        }
        let _ = writeln!(self.buf, "envar: \"{key}={value}\"");
        Ok(())
    }

    pub(crate) fn exec(&mut self, interpreter: &str, script: &str) {
        let _ = writeln!(
            self.buf,
            "exec_bin {{ path: \"{interpreter}\" arg: \"{script}\" }}"
        );
    }

    pub(crate) fn finish(self) -> String {
        self.buf
    }
}

/// Bind the minimal read-only rootfs: usr/lib/bin/etc always, lib64/sbin
/// when the rootfs provides them.
pub(crate) fn bind_rootfs(cfg: &mut ConfigText, rootfs: &Path) -> sandbox::Result<()> {
    for dir in ["usr", "lib", "bin", "etc"] {
        cfg.bind(&rootfs.join(dir), &format!("/{dir}"), false)?;
    }
    for dir in ["lib64", "sbin"] {
        let src = rootfs.join(dir);
        if src.is_dir() {
            cfg.bind(&src, &format!("/{dir}"), false)?;
        }
    }
    Ok(())
}

/// Config for the execute phase: read-only dependency cache, optional DNS
/// overlay for networked requests, request-scoped rlimits.
pub(crate) fn execute_config(
    settings: &NsjailSettings,
    job_dir: &Path,
    deps_dir: Option<&Path>,
    resolv_conf: Option<&Path>,
    limits: &ResourceLimits,
) -> sandbox::Result<String> {
    let mut cfg = ConfigText::new("sbx-execute");
    cfg.time_limit(limits.timeout_seconds);
    cfg.rlimits(limits);

    bind_rootfs(&mut cfg, &settings.rootfs)?;
    cfg.tmpfs("/tmp");
    cfg.bind(job_dir, WORK_DIR, true)?;
    if let Some(deps) = deps_dir {
        cfg.bind(deps, DEPS_DIR, false)?;
        cfg.envar("PYTHONPATH", DEPS_DIR)?;
    }
    // Overlays the rootfs /etc; must come after the /etc bind.
    if let Some(resolv) = resolv_conf {
        cfg.bind(resolv, "/etc/resolv.conf", false)?;
    }

    cfg.exec(&settings.jail_python, sandbox::WRAPPER_FILE);
    Ok(cfg.finish())
}

/// Limits for the install phase are fixed and generous: installs are bounded
/// by their own timeout, not by the request's script limits.
fn install_limits(install_timeout_secs: u64) -> ResourceLimits {
    ResourceLimits {
        memory_mb: 2048,
        cpu_seconds: install_timeout_secs as u32,
        max_file_size_mb: 2048,
        max_open_files: 512,
        max_processes: 128,
        timeout_seconds: install_timeout_secs,
    }
}

/// Config for the always-networked install phase: the cache-keyed target
/// directory and the shared package-manager cache are the only writable
/// mounts besides /tmp.
pub(crate) fn install_config(
    settings: &NsjailSettings,
    job_dir: &Path,
    target_dir: &Path,
    resolv_conf: &Path,
    install_script: &str,
) -> sandbox::Result<String> {
    let limits = install_limits(settings.install_timeout.as_secs());
    let mut cfg = ConfigText::new("sbx-install");
    cfg.time_limit(limits.timeout_seconds);
    cfg.rlimits(&limits);

    bind_rootfs(&mut cfg, &settings.rootfs)?;
    cfg.tmpfs("/tmp");
    cfg.bind(job_dir, WORK_DIR, true)?;
    cfg.bind(target_dir, DEPS_DIR, true)?;
    cfg.bind(&settings.pip_cache, PIP_CACHE_DIR, true)?;
    cfg.bind(resolv_conf, "/etc/resolv.conf", false)?;

    cfg.exec(&settings.jail_python, install_script);
    Ok(cfg.finish())
}

/// Config for registry-action execution: N ordered package mounts, plus
/// app/site-packages mounts in trusted mode.
pub(crate) fn action_config(
    settings: &NsjailSettings,
    job_dir: &Path,
    action: &ActionSandboxConfig,
    resolv_conf: Option<&Path>,
    runner_script: &str,
) -> sandbox::Result<String> {
    let mut cfg = ConfigText::new("sbx-action");
    cfg.time_limit(action.resources.timeout_seconds);
    cfg.rlimits(&action.resources);

    bind_rootfs(&mut cfg, &settings.rootfs)?;
    cfg.tmpfs("/tmp");
    cfg.bind(job_dir, WORK_DIR, true)?;

    let mut search_path = Vec::new();
    for (index, dir) in action.package_dirs.iter().enumerate() {
        let dst = format!("{PACKAGES_PREFIX}/{index}");
        cfg.bind(dir, &dst, false)?;
        search_path.push(dst);
    }
    if action.trust_mode == TrustMode::Trusted {
        for (index, dir) in action.site_packages.iter().enumerate() {
            let dst = format!("{SITE_PACKAGES_PREFIX}/{index}");
            cfg.bind(dir, &dst, false)?;
            search_path.push(dst);
        }
    }
    if !search_path.is_empty() {
        cfg.envar("PYTHONPATH", &search_path.join(":"))?;
    }
    if let Some(resolv) = resolv_conf {
        cfg.bind(resolv, "/etc/resolv.conf", false)?;
    }

    cfg.exec(&settings.jail_python, runner_script);
    Ok(cfg.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn limits() -> ResourceLimits {
        ResourceLimits::default()
    }

    fn settings() -> NsjailSettings {
        NsjailSettings {
            rootfs: PathBuf::from("/var/lib/sbx/rootfs"),
            pip_cache: PathBuf::from("/var/cache/sbx/pip"),
            install_timeout: std::time::Duration::from_secs(180),
            ..NsjailSettings::default()
        }
    }

    #[test]
    fn path_validation_rejects_config_metacharacters() {
        assert!(validate_path(Path::new("/var/cache/sbx/abc123")).is_ok());
        assert!(validate_path(Path::new("/tmp/job dir")).is_ok());
        assert!(validate_path(Path::new("/tmp/a\"b")).is_err());
        assert!(validate_path(Path::new("/tmp/a\nb")).is_err());
        assert!(validate_path(Path::new("/tmp/a\\b")).is_err());
        assert!(validate_path(Path::new("/tmp/a{b}")).is_err());
    }

    #[test]
    fn cache_key_validation_requires_lowercase_hex() {
        assert!(validate_cache_key("0123456789abcdef").is_ok());
        assert!(validate_cache_key("").is_err());
        assert!(validate_cache_key("ABCDEF0123456789").is_err());
        assert!(validate_cache_key("zzzz").is_err());
        assert!(validate_cache_key("abc/def").is_err());
    }

    #[test]
    fn execute_config_basic_shape() {
        let text = execute_config(
            &settings(),
            Path::new("/tmp/sbx-job-x"),
            Some(Path::new("/var/cache/sbx/packages/0123456789abcdef")),
            None,
            &limits(),
        )
        .unwrap();

        assert!(text.contains("mode: ONCE"));
        assert!(text.contains("clone_newnet: true"));
        assert!(text.contains("keep_env: false"));
        assert!(text.contains("rlimit_as: 512"));
        assert!(text.contains("time_limit: 30"));
        assert!(text.contains(r#"src: "/var/lib/sbx/rootfs/usr" dst: "/usr" is_bind: true rw: false"#));
        assert!(text.contains(r#"src: "/tmp/sbx-job-x" dst: "/work" is_bind: true rw: true"#));
        assert!(text.contains(r#"dst: "/deps" is_bind: true rw: false"#));
        assert!(text.contains("envar: \"PYTHONPATH=/deps\""));
        assert!(text.contains(r#"exec_bin { path: "/usr/bin/python3" arg: "wrapper.py" }"#));
        assert!(!text.contains("resolv.conf"));
    }

    #[test]
    fn execute_config_network_adds_dns_overlay() {
        let text = execute_config(
            &settings(),
            Path::new("/tmp/sbx-job-x"),
            None,
            Some(Path::new("/tmp/sbx-job-x/resolv.conf")),
            &limits(),
        )
        .unwrap();
        assert!(text.contains(r#"dst: "/etc/resolv.conf""#));
        // Network namespace is cloned regardless of the network flag.
        assert!(text.contains("clone_newnet: true"));
    }

    #[test]
    fn execute_config_rejects_hostile_job_path() {
        let result = execute_config(
            &settings(),
            Path::new("/tmp/evil\" mount { src: \"/\" dst: \"/host\" }"),
            None,
            None,
            &limits(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn install_config_mounts_target_and_pip_cache_writable() {
        let text = install_config(
            &settings(),
            Path::new("/tmp/sbx-install-x"),
            Path::new("/var/cache/sbx/packages/0123456789abcdef.tmp.1.x"),
            Path::new("/tmp/sbx-install-x/resolv.conf"),
            "install.py",
        )
        .unwrap();

        assert!(text.contains(r#"dst: "/deps" is_bind: true rw: true"#));
        assert!(text.contains(r#"dst: "/pip-cache" is_bind: true rw: true"#));
        assert!(text.contains("time_limit: 180"));
        assert!(text.contains(r#"arg: "install.py""#));
    }

    #[test]
    fn action_config_orders_package_mounts() {
        let action = ActionSandboxConfig {
            package_dirs: vec![PathBuf::from("/srv/registry/a"), PathBuf::from("/srv/registry/b")],
            site_packages: vec![PathBuf::from("/srv/app/site-packages")],
            network_enabled: false,
            env_vars: Default::default(),
            resources: limits(),
            trust_mode: TrustMode::Trusted,
        };
        let text = action_config(&settings(), Path::new("/tmp/sbx-job-x"), &action, None, "runner.py")
            .unwrap();

        assert!(text.contains(r#"src: "/srv/registry/a" dst: "/packages/0""#));
        assert!(text.contains(r#"src: "/srv/registry/b" dst: "/packages/1""#));
        assert!(text.contains(r#"dst: "/site-packages/0""#));
        assert!(text.contains("envar: \"PYTHONPATH=/packages/0:/packages/1:/site-packages/0\""));
    }

    #[test]
    fn action_config_untrusted_never_mounts_site_packages() {
        let action = ActionSandboxConfig {
            package_dirs: vec![PathBuf::from("/srv/registry/a")],
            site_packages: vec![PathBuf::from("/srv/app/site-packages")],
            network_enabled: false,
            env_vars: Default::default(),
            resources: limits(),
            trust_mode: TrustMode::Untrusted,
        };
        let text = action_config(&settings(), Path::new("/tmp/sbx-job-x"), &action, None, "runner.py")
            .unwrap();

        assert!(!text.contains("site-packages"));
        assert!(text.contains("envar: \"PYTHONPATH=/packages/0\""));
    }
}
