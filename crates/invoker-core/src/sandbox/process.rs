//! Child-process plumbing: spawning, hard kill, exit classification.

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::{Child, Command};

const SPAWN_ATTEMPTS: u32 = 5;

/// Spawn `cmd`, retrying briefly on `ETXTBSY`.
///
/// A freshly written executable can still be open for writing in a sibling
/// fork that has not reached `exec` yet; the kernel then refuses to run it.
pub(crate) async fn spawn(cmd: &mut Command) -> io::Result<Child> {
    let mut attempt = 1;
    loop {
        match cmd.spawn() {
            Err(e) if is_text_busy(&e) && attempt < SPAWN_ATTEMPTS => {
                tracing::debug!(attempt, "executable busy, retrying spawn");
                tokio::time::sleep(Duration::from_millis(10 * u64::from(attempt))).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(unix)]
fn is_text_busy(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ETXTBSY)
}

#[cfg(not(unix))]
fn is_text_busy(_err: &io::Error) -> bool {
    false
}

/// SIGKILL the whole process group led by `pid`.
///
/// The child is spawned as a group leader, so this also takes down anything it
/// forked. A group that is already gone is not an error.
#[cfg(unix)]
pub(crate) fn kill_group(pid: Option<u32>) {
    let Some(pid) = pid.and_then(|p| libc::pid_t::try_from(p).ok()) else {
        return;
    };
    // SAFETY: killpg has no memory-safety preconditions.
    let rc = unsafe { libc::killpg(pid, libc::SIGKILL) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            tracing::warn!(pid, error = %err, "killpg failed");
        }
    }
}

#[cfg(not(unix))]
pub(crate) fn kill_group(_pid: Option<u32>) {}

/// Signal that terminated the process, if any.
#[cfg(unix)]
pub(crate) fn terminating_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
pub(crate) fn terminating_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// Cap the child's address space at `limit_mb` megabytes.
#[cfg(unix)]
pub(crate) fn limit_memory(cmd: &mut Command, limit_mb: u64) {
    let bytes = limit_mb.saturating_mul(1024 * 1024) as libc::rlim_t;
    let apply = move || {
        let limit = libc::rlimit {
            rlim_cur: bytes,
            rlim_max: bytes,
        };
        // SAFETY: setrlimit only reads the struct we pass.
        if unsafe { libc::setrlimit(libc::RLIMIT_AS, &limit) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    };
    // SAFETY: the hook runs between fork and exec and only calls
    // async-signal-safe setrlimit.
    unsafe {
        cmd.pre_exec(apply);
    }
}

#[cfg(not(unix))]
pub(crate) fn limit_memory(_cmd: &mut Command, limit_mb: u64) {
    tracing::warn!(limit_mb, "memory limits are not supported on this platform");
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;

    #[tokio::test]
    async fn kill_group_reaches_grandchildren() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg("sleep 30 & wait")
            .stdout(Stdio::null())
            .process_group(0);
        let mut child = spawn(&mut cmd).await.unwrap();
        let pid = child.id();

        tokio::time::sleep(Duration::from_millis(100)).await;
        kill_group(pid);

        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .expect("group should die promptly")
            .unwrap();
        assert_eq!(terminating_signal(&status), Some(libc::SIGKILL));

        // every member is gone, so a second kill finds nothing
        kill_group(pid);
    }

    #[tokio::test]
    async fn exit_codes_are_not_signals() {
        let status = Command::new("sh")
            .arg("-c")
            .arg("exit 3")
            .status()
            .await
            .unwrap();
        assert_eq!(status.code(), Some(3));
        assert_eq!(terminating_signal(&status), None);
    }
}
