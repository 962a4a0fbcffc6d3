//! Remote host operations used by the deploy stage.
//!
//! Remote layout, per domain:
//!
//! ```text
//! {web_root}/{domain}/
//! ├── releases/
//! │   ├── v2/
//! │   ├── v3/
//! │   └── v4.partial/     # upload in progress or abandoned
//! └── current → releases/v3
//! ```
//!
//! Uploads land in `v{n}.partial` and are renamed into place once complete.
//! A leftover partial is deleted before the next attempt, never resumed.
//! `current` is repointed by renaming a freshly made `current.tmp` link over
//! it, so readers see either the old target or the new one.
//!
//! [`SshRemote`] shells out to `ssh` and `rsync`; every command is bounded by
//! the configured operation timeout and killed when it overruns.
//! [`LocalRemote`] does the same on the local filesystem and records proxy
//! actions instead of running them.

use crate::config::RemoteConfig;
use crate::naming::{parse_release_dir, partial_dir_name, release_dir_name};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("{op} failed ({status}): {stderr}")]
    Command {
        op: String,
        status: String,
        stderr: String,
    },
    #[error("{op} timed out after {secs}s")]
    Timeout { op: String, secs: u64 },
    #[error("remote not configured: {0}")]
    Config(String),
    #[error("unexpected remote state: {0}")]
    Unexpected(String),
}

/// Operations the deployer needs from a host.
pub trait Remote: Send + Sync {
    /// Transfer a local release directory to `releases/v{version}`.
    fn upload(&self, domain: &str, version: u32, local: &Path) -> Result<(), RemoteError>;

    /// Point `current` at `releases/v{version}`.
    fn point_current(&self, domain: &str, version: u32) -> Result<(), RemoteError>;

    /// Version `current` points at, if any.
    fn current(&self, domain: &str) -> Result<Option<u32>, RemoteError>;

    /// Complete releases present on the host, ascending.
    fn list_releases(&self, domain: &str) -> Result<Vec<u32>, RemoteError>;

    fn remove_release(&self, domain: &str, version: u32) -> Result<(), RemoteError>;

    /// Write the proxy config for `domain` and enable it.
    fn install_proxy_config(&self, domain: &str, config: &str) -> Result<(), RemoteError>;

    fn reload_proxy(&self) -> Result<(), RemoteError>;

    /// One-time certificate bootstrap.
    fn provision_tls(&self, domain: &str, email: Option<&str>) -> Result<(), RemoteError>;

    /// Root under which `{domain}/current` lives, as the proxy sees it.
    fn web_root(&self) -> String;
}

// ============================================================================
// Subprocesses
// ============================================================================

/// Output of a finished command.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut text = String::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_string(&mut text);
        }
        text
    })
}

/// Run `cmd` to completion, killing it once `timeout` passes.
///
/// A non-zero exit is returned as [`RemoteError::Command`] labelled `op`.
pub fn run_with_timeout(
    op: &str,
    cmd: &mut Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
) -> Result<CommandOutput, RemoteError> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());
    debug!(op, command = ?cmd, "running");
    let mut child = cmd.spawn()?;
    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input)?;
    }
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(RemoteError::Timeout {
                op: op.to_string(),
                secs: timeout.as_secs(),
            });
        }
        std::thread::sleep(Duration::from_millis(50));
    };
    let output = CommandOutput {
        status,
        stdout: stdout.join().unwrap_or_default(),
        stderr: stderr.join().unwrap_or_default(),
    };
    if !output.status.success() {
        return Err(RemoteError::Command {
            op: op.to_string(),
            status: output.status.to_string(),
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(output)
}

/// Quote a string for a POSIX shell.
pub fn shell_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}

/// Expand a leading `~/` against `$HOME`.
fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}

// ============================================================================
// SSH
// ============================================================================

/// Deploys to a host over `ssh` and `rsync`.
#[derive(Debug, Clone)]
pub struct SshRemote {
    host: String,
    user: String,
    key: PathBuf,
    web_root: String,
    available_dir: String,
    enabled_dir: String,
    timeout: Duration,
}

impl SshRemote {
    pub fn from_config(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let host = config
            .host
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| RemoteError::Config("remote.host is not set".into()))?;
        Ok(Self {
            host: host.to_string(),
            user: config.user.clone(),
            key: expand_home(&config.credential),
            web_root: config.web_root.trim_end_matches('/').to_string(),
            available_dir: config.proxy_available_dir.trim_end_matches('/').to_string(),
            enabled_dir: config.proxy_enabled_dir.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.operation_timeout_secs),
        })
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    fn ssh_options(&self) -> Vec<String> {
        vec![
            "-i".to_string(),
            self.key.display().to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "ConnectTimeout=30".to_string(),
        ]
    }

    fn ssh(&self, op: &str, script: &str, stdin: Option<&[u8]>) -> Result<CommandOutput, RemoteError> {
        let mut cmd = Command::new("ssh");
        cmd.args(self.ssh_options()).arg(self.destination()).arg(script);
        run_with_timeout(op, &mut cmd, stdin, self.timeout)
    }

    fn site_dir(&self, domain: &str) -> String {
        format!("{}/{domain}", self.web_root)
    }

    fn releases_dir(&self, domain: &str) -> String {
        format!("{}/releases", self.site_dir(domain))
    }
}

impl Remote for SshRemote {
    fn upload(&self, domain: &str, version: u32, local: &Path) -> Result<(), RemoteError> {
        let releases = self.releases_dir(domain);
        let partial = format!("{releases}/{}", partial_dir_name(version));
        let target = format!("{releases}/{}", release_dir_name(version));
        self.ssh(
            "prepare upload",
            &format!(
                "rm -rf {p} && mkdir -p {p}",
                p = shell_quote(&partial)
            ),
            None,
        )?;

        let mut rsync = Command::new("rsync");
        rsync
            .arg("-a")
            .arg("--delete")
            .arg("-e")
            .arg(format!("ssh {}", self.ssh_options().join(" ")))
            .arg(format!("{}/", local.display()))
            .arg(format!("{}:{partial}/", self.destination()));
        run_with_timeout("transfer", &mut rsync, None, self.timeout)?;

        self.ssh(
            "finalize upload",
            &format!("mv -T {} {}", shell_quote(&partial), shell_quote(&target)),
            None,
        )?;
        info!(host = %self.host, domain, version, "uploaded release");
        Ok(())
    }

    fn point_current(&self, domain: &str, version: u32) -> Result<(), RemoteError> {
        let site = self.site_dir(domain);
        self.ssh(
            "swing current",
            &format!(
                "cd {} && ln -sfn releases/{} current.tmp && mv -T current.tmp current",
                shell_quote(&site),
                release_dir_name(version)
            ),
            None,
        )?;
        Ok(())
    }

    fn current(&self, domain: &str) -> Result<Option<u32>, RemoteError> {
        let link = format!("{}/current", self.site_dir(domain));
        let out = self.ssh(
            "read current",
            &format!("readlink {} || true", shell_quote(&link)),
            None,
        )?;
        Ok(parse_link_target(out.stdout.trim()))
    }

    fn list_releases(&self, domain: &str) -> Result<Vec<u32>, RemoteError> {
        let out = self.ssh(
            "list releases",
            &format!(
                "ls -1 {} 2>/dev/null || true",
                shell_quote(&self.releases_dir(domain))
            ),
            None,
        )?;
        let mut versions: Vec<u32> = out.stdout.lines().filter_map(|l| parse_release_dir(l.trim())).collect();
        versions.sort_unstable();
        Ok(versions)
    }

    fn remove_release(&self, domain: &str, version: u32) -> Result<(), RemoteError> {
        let dir = format!("{}/{}", self.releases_dir(domain), release_dir_name(version));
        self.ssh("prune release", &format!("rm -rf {}", shell_quote(&dir)), None)?;
        Ok(())
    }

    fn install_proxy_config(&self, domain: &str, config: &str) -> Result<(), RemoteError> {
        let available = shell_quote(&format!("{}/{domain}", self.available_dir));
        let enabled = shell_quote(&format!("{}/{domain}", self.enabled_dir));
        self.ssh(
            "install proxy config",
            &format!("sudo tee {available} > /dev/null && sudo ln -sfn {available} {enabled}"),
            Some(config.as_bytes()),
        )?;
        Ok(())
    }

    fn reload_proxy(&self) -> Result<(), RemoteError> {
        self.ssh("reload proxy", "sudo nginx -t && sudo nginx -s reload", None)?;
        Ok(())
    }

    fn provision_tls(&self, domain: &str, email: Option<&str>) -> Result<(), RemoteError> {
        let contact = match email {
            Some(email) => format!("-m {}", shell_quote(email)),
            None => "--register-unsafely-without-email".to_string(),
        };
        self.ssh(
            "provision certificate",
            &format!(
                "sudo certbot --nginx -d {} --non-interactive --agree-tos --redirect {contact}",
                shell_quote(domain)
            ),
            None,
        )?;
        Ok(())
    }

    fn web_root(&self) -> String {
        self.web_root.clone()
    }
}

/// `releases/v3` (or an absolute path ending in it) → 3.
fn parse_link_target(target: &str) -> Option<u32> {
    target
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(parse_release_dir)
}

// ============================================================================
// Local
// ============================================================================

/// Deploys into directories on this machine.
///
/// Proxy reloads and certificate requests are recorded in [`LocalRemote::events`]
/// rather than executed.
#[derive(Debug)]
pub struct LocalRemote {
    web_root: PathBuf,
    available_dir: PathBuf,
    enabled_dir: PathBuf,
    upload_fails: bool,
    swing_fails: bool,
    tls_fails: bool,
    events: Mutex<Vec<String>>,
}

impl LocalRemote {
    pub fn new(web_root: impl Into<PathBuf>, available_dir: impl Into<PathBuf>, enabled_dir: impl Into<PathBuf>) -> Self {
        Self {
            web_root: web_root.into(),
            available_dir: available_dir.into(),
            enabled_dir: enabled_dir.into(),
            upload_fails: false,
            swing_fails: false,
            tls_fails: false,
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(config: &RemoteConfig) -> Self {
        Self::new(
            &config.web_root,
            &config.proxy_available_dir,
            &config.proxy_enabled_dir,
        )
    }

    /// Make every transfer fail after copying, leaving only the partial
    /// directory behind.
    pub fn with_upload_failure(mut self) -> Self {
        self.upload_fails = true;
        self
    }

    /// Make every alias swing fail without touching `current`.
    pub fn with_swing_failure(mut self) -> Self {
        self.swing_fails = true;
        self
    }

    /// Make every certificate request fail.
    pub fn with_tls_failure(mut self) -> Self {
        self.tls_fails = true;
        self
    }

    /// Actions performed so far, e.g. `upload example.com v3`, `reload`.
    pub fn events(&self) -> Vec<String> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn record(&self, event: String) {
        debug!(event = %event, "local remote");
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }

    pub fn site_dir(&self, domain: &str) -> PathBuf {
        self.web_root.join(domain)
    }

    fn releases_dir(&self, domain: &str) -> PathBuf {
        self.site_dir(domain).join("releases")
    }
}

fn copy_tree(from: &Path, to: &Path) -> Result<(), RemoteError> {
    for entry in WalkDir::new(from) {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| RemoteError::Unexpected(e.to_string()))?;
        let dest = to.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest)?;
        } else {
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

impl Remote for LocalRemote {
    fn upload(&self, domain: &str, version: u32, local: &Path) -> Result<(), RemoteError> {
        let releases = self.releases_dir(domain);
        let partial = releases.join(partial_dir_name(version));
        if partial.exists() {
            fs::remove_dir_all(&partial)?;
        }
        fs::create_dir_all(&releases)?;
        copy_tree(local, &partial)?;
        if self.upload_fails {
            return Err(RemoteError::Command {
                op: "transfer release".into(),
                status: "exit status: 12".into(),
                stderr: format!("connection to {domain} reset"),
            });
        }
        fs::rename(&partial, releases.join(release_dir_name(version)))?;
        self.record(format!("upload {domain} v{version}"));
        Ok(())
    }

    fn point_current(&self, domain: &str, version: u32) -> Result<(), RemoteError> {
        if self.swing_fails {
            return Err(RemoteError::Command {
                op: "swing alias".into(),
                status: "exit status: 1".into(),
                stderr: format!("cannot replace {domain}/current"),
            });
        }
        let site = self.site_dir(domain);
        let tmp = site.join("current.tmp");
        if fs::symlink_metadata(&tmp).is_ok() {
            fs::remove_file(&tmp)?;
        }
        std::os::unix::fs::symlink(Path::new("releases").join(release_dir_name(version)), &tmp)?;
        fs::rename(&tmp, site.join("current"))?;
        self.record(format!("point {domain} v{version}"));
        Ok(())
    }

    fn current(&self, domain: &str) -> Result<Option<u32>, RemoteError> {
        match fs::read_link(self.site_dir(domain).join("current")) {
            Ok(target) => Ok(target
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(parse_release_dir)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list_releases(&self, domain: &str) -> Result<Vec<u32>, RemoteError> {
        let entries = match fs::read_dir(self.releases_dir(domain)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut versions = Vec::new();
        for entry in entries {
            if let Some(v) = entry?.file_name().to_str().and_then(parse_release_dir) {
                versions.push(v);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    fn remove_release(&self, domain: &str, version: u32) -> Result<(), RemoteError> {
        fs::remove_dir_all(self.releases_dir(domain).join(release_dir_name(version)))?;
        self.record(format!("prune {domain} v{version}"));
        Ok(())
    }

    fn install_proxy_config(&self, domain: &str, config: &str) -> Result<(), RemoteError> {
        fs::create_dir_all(&self.available_dir)?;
        fs::create_dir_all(&self.enabled_dir)?;
        let available = self.available_dir.join(domain);
        let enabled = self.enabled_dir.join(domain);
        fs::write(&available, config)?;
        if fs::symlink_metadata(&enabled).is_ok() {
            fs::remove_file(&enabled)?;
        }
        std::os::unix::fs::symlink(&available, &enabled)?;
        self.record(format!("proxy-config {domain}"));
        Ok(())
    }

    fn reload_proxy(&self) -> Result<(), RemoteError> {
        self.record("reload".to_string());
        Ok(())
    }

    fn provision_tls(&self, domain: &str, _email: Option<&str>) -> Result<(), RemoteError> {
        self.record(format!("tls {domain}"));
        if self.tls_fails {
            return Err(RemoteError::Command {
                op: "provision certificate".into(),
                status: "exit status: 1".into(),
                stderr: format!("no certificate authority reachable for {domain}"),
            });
        }
        Ok(())
    }

    fn web_root(&self) -> String {
        self.web_root.display().to_string()
    }
}
