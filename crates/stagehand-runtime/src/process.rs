use crate::RuntimeError;
use std::io::Read;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

/// SIGKILL the child's whole process group, so helpers it spawned (git,
/// php) die with it.
fn kill_group(child: &mut Child) {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        let _ = child.kill();
        return;
    };
    // SAFETY: killpg only sends a signal; the group was created for this
    // child by `process_group(0)` and the child has not been reaped yet.
    #[allow(unsafe_code)]
    let ret = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if ret != 0 {
        debug!("killpg({pgid}) failed: {}", std::io::Error::last_os_error());
        let _ = child.kill();
    }
}

/// Run `program args...` in `working_dir`, waiting at most `timeout`.
///
/// A non-zero exit is `ProcessFailed` with the captured output. Running past
/// the timeout kills the child's process group and yields `Timeout` without
/// waiting for output.
pub fn run_process(
    program: &str,
    args: &[String],
    working_dir: &Path,
    timeout: Duration,
    envs: &[(&str, &str)],
) -> Result<ProcessOutput, RuntimeError> {
    let command_line = if args.is_empty() {
        program.to_owned()
    } else {
        format!("{program} {}", args.join(" "))
    };
    debug!("running '{command_line}' in {}", working_dir.display());

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);
    for (k, v) in envs {
        cmd.env(k, v);
    }

    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            RuntimeError::ExecutableNotFound(program.to_owned())
        } else {
            RuntimeError::Io(e)
        }
    })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let out_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut stdout) = stdout {
            let _ = stdout.read_to_end(&mut buf);
        }
        buf
    });
    let err_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut stderr) = stderr {
            let _ = stderr.read_to_end(&mut buf);
        }
        buf
    });

    let started = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if started.elapsed() >= timeout {
            kill_group(&mut child);
            let _ = child.wait();
            // Readers are left detached: a descendant that escaped the group
            // may still hold the pipes open.
            drop((out_handle, err_handle));
            return Err(RuntimeError::Timeout {
                command: command_line,
                timeout,
            });
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    let stdout = String::from_utf8_lossy(&out_handle.join().unwrap_or_default()).into_owned();
    let stderr = String::from_utf8_lossy(&err_handle.join().unwrap_or_default()).into_owned();

    let code = status.code().unwrap_or(-1);
    if code != 0 {
        return Err(RuntimeError::ProcessFailed {
            command: command_line,
            status: code,
            stdout,
            stderr,
        });
    }

    Ok(ProcessOutput {
        status: code,
        stdout,
        stderr,
    })
}
