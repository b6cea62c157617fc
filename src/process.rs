//! Supervision of the external mitmdump process
use crate::bridge::BridgeConfig;
use crate::errors::{Error, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::io::ErrorKind;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, Once};
use tokio::process::{Child, Command};

/// Executable that ships with mitmproxy.
const MITMDUMP_BIN: &str = "mitmdump";

/// Pids of every live proxy process spawned by this process, so that one
/// cleanup pass can kill them all regardless of which bridge owns them.
static ACTIVE_PIDS: Mutex<Vec<i32>> = Mutex::new(Vec::new());
/// Cleanup may be triggered by a signal, by process exit and by an explicit
/// shutdown; it must run at most once across all of them.
static CLEANUP_DONE: AtomicBool = AtomicBool::new(false);
static HOOKS: Once = Once::new();

fn register(pid: i32) {
  HOOKS.call_once(install_cleanup_hooks);
  lock_pids().push(pid);
}

fn deregister(pid: i32) {
  lock_pids().retain(|p| *p != pid);
}

fn lock_pids() -> std::sync::MutexGuard<'static, Vec<i32>> {
  match ACTIVE_PIDS.lock() {
    Ok(guard) => guard,
    Err(poisoned) => poisoned.into_inner(),
  }
}

/// Kill every registered proxy process. Idempotent: only the first caller
/// does any work, no matter which trigger path got here first.
pub(crate) fn cleanup_registered() {
  if CLEANUP_DONE.swap(true, Ordering::SeqCst) {
    return;
  }
  for pid in lock_pids().drain(..) {
    let _ = kill(Pid::from_raw(pid), Signal::SIGKILL);
  }
}

extern "C" fn cleanup_at_exit() {
  cleanup_registered();
}

fn install_cleanup_hooks() {
  unsafe {
    libc::atexit(cleanup_at_exit);
  }
  tokio::spawn(async {
    if tokio::signal::ctrl_c().await.is_ok() {
      cleanup_registered();
      std::process::exit(130);
    }
  });
}

/// Build the mitmdump argument list from the bridge configuration.
///
/// `--anticache` disables caching, which gets in the way of transparently
/// rewriting content; `--ssl-insecure` allows self-signed upstream
/// certificates.
fn proxy_args(config: &BridgeConfig) -> Vec<String> {
  let mut args = vec![
    "--anticache".to_string(),
    "-s".to_string(),
    config.script_path.display().to_string(),
  ];
  if !config.intercept_paths.is_empty() {
    args.push("--set".to_string());
    args.push(format!("intercept={}", config.intercept_paths.join(",")));
  }
  args.push("--set".to_string());
  args.push(format!(
    "onlyInterceptTextFiles={}",
    config.only_intercept_text_files
  ));
  if let Some(hosts) = &config.ignore_hosts {
    args.push("--ignore-hosts".to_string());
    args.push(hosts.clone());
  }
  if config.quiet {
    args.push("-q".to_string());
  }
  args.push("--ssl-insecure".to_string());
  args
}

/// Handle to a spawned mitmdump process, tracked in the process-wide
/// registry for signal/exit cleanup.
pub(crate) struct ProxyProcess {
  child: Child,
  pid: i32,
}

/// Launch mitmdump with stdio inherited from this process.
///
/// A missing executable is reported as [`Error::MitmdumpNotFound`] so the
/// caller gets an actionable message; every other launch failure is wrapped
/// as [`Error::Spawn`].
pub(crate) fn spawn_proxy(config: &BridgeConfig) -> Result<ProxyProcess> {
  let mut cmd = Command::new(MITMDUMP_BIN);
  cmd
    .args(proxy_args(config))
    .stdin(Stdio::inherit())
    .stdout(Stdio::inherit())
    .stderr(Stdio::inherit());
  let child = cmd.spawn().map_err(|e| {
    if e.kind() == ErrorKind::NotFound {
      Error::MitmdumpNotFound
    } else {
      Error::Spawn(e)
    }
  })?;
  // The pid is present until the child has been reaped, which cannot have
  // happened yet.
  let pid = child.id().map(|p| p as i32).unwrap_or(-1);
  register(pid);
  Ok(ProxyProcess { child, pid })
}

impl ProxyProcess {
  /// Await the process's exit and drop it from the cleanup registry.
  pub(crate) async fn wait(&mut self) -> std::io::Result<ExitStatus> {
    let status = self.child.wait().await;
    deregister(self.pid);
    status
  }

  /// Whether the process has not exited yet.
  pub(crate) fn is_running(&mut self) -> bool {
    matches!(self.child.try_wait(), Ok(None))
  }

  /// Gracefully terminate: SIGTERM, then await the exit event. A process
  /// that is already dead is only reaped.
  pub(crate) async fn terminate(&mut self) -> Result<()> {
    if self.is_running() {
      let _ = kill(Pid::from_raw(self.pid), Signal::SIGTERM);
    }
    self.wait().await?;
    Ok(())
  }
}

/// Human-readable description of how a proxy process went away, matching
/// what [`Error::ExitedEarly`] reports.
pub(crate) fn describe_exit(status: std::io::Result<ExitStatus>) -> String {
  use std::os::unix::process::ExitStatusExt;
  match status {
    Ok(status) => match status.code() {
      Some(code) => format!("process exited with code {code}"),
      None => match status.signal() {
        Some(signal) => format!("process exited due to signal {signal}"),
        None => "process exited".to_string(),
      },
    },
    Err(e) => format!("process errored: {e}"),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::path::PathBuf;
  use std::time::Duration;

  #[test]
  fn args_carry_every_configured_option() {
    let config = BridgeConfig {
      intercept_paths: vec!["/eval".to_string(), "/probe".to_string()],
      quiet: true,
      only_intercept_text_files: true,
      ignore_hosts: Some("example\\.com".to_string()),
      script_path: PathBuf::from("scripts/proxy.py"),
    };
    let args = proxy_args(&config);
    assert_eq!(
      args,
      vec![
        "--anticache",
        "-s",
        "scripts/proxy.py",
        "--set",
        "intercept=/eval,/probe",
        "--set",
        "onlyInterceptTextFiles=true",
        "--ignore-hosts",
        "example\\.com",
        "-q",
        "--ssl-insecure",
      ]
    );
  }

  #[test]
  fn args_omit_unconfigured_options() {
    let config = BridgeConfig::default();
    let args = proxy_args(&config);
    assert!(!args.iter().any(|a| a.starts_with("intercept=")));
    assert!(!args.contains(&"--ignore-hosts".to_string()));
    assert!(args.contains(&"onlyInterceptTextFiles=false".to_string()));
    // quiet defaults to true
    assert!(args.contains(&"-q".to_string()));
  }

  async fn spawn_sleeper() -> (Child, i32) {
    let child = Command::new("sleep")
      .arg("30")
      .stdout(Stdio::null())
      .spawn()
      .expect("spawn sleep");
    let pid = child.id().unwrap() as i32;
    (child, pid)
  }

  #[tokio::test]
  async fn cleanup_runs_at_most_once() {
    let (mut first, first_pid) = spawn_sleeper().await;
    register(first_pid);

    // First trigger kills the registered child...
    cleanup_registered();
    let status = tokio::time::timeout(Duration::from_secs(5), first.wait())
      .await
      .expect("child should die promptly")
      .unwrap();
    assert!(!status.success());

    // ...and a later trigger must be a no-op, even for newly registered pids.
    let (mut second, second_pid) = spawn_sleeper().await;
    register(second_pid);
    cleanup_registered();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(second.try_wait().unwrap().is_none(), "guard did not hold");

    let _ = kill(Pid::from_raw(second_pid), Signal::SIGKILL);
    let _ = second.wait().await;
    deregister(second_pid);
  }
}
