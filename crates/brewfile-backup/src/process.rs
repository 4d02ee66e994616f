use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const MAX_CAPTURE_BYTES: u64 = 8 * 1024 * 1024;

#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Stderr if there is any, else stdout, else the exit status.
    pub fn summary(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        format!("status {}", self.status)
    }
}

#[derive(Debug)]
pub enum ProcessError {
    NotFound(String),
    Spawn(String, std::io::Error),
    Wait(String, std::io::Error),
    TimedOut(String, Duration),
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessError::NotFound(prog) => write!(f, "{prog}: command not found"),
            ProcessError::Spawn(prog, e) => write!(f, "failed to spawn {prog}: {e}"),
            ProcessError::Wait(prog, e) => write!(f, "failed to wait for {prog}: {e}"),
            ProcessError::TimedOut(prog, t) => {
                write!(f, "{prog} timed out after {} seconds", t.as_secs())
            }
        }
    }
}

impl std::error::Error for ProcessError {}

/// Run `cmd` to completion, capturing stdout and stderr, killing it if it is still running
/// after `timeout`.
pub fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
) -> std::result::Result<CommandOutput, ProcessError> {
    let program = cmd.get_program().to_string_lossy().into_owned();

    // Own process group so a timeout takes down anything the tool forked.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        unsafe {
            cmd.pre_exec(|| {
                if libc::setpgid(0, 0) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }

    let mut child = match cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ProcessError::NotFound(program));
        }
        Err(e) => return Err(ProcessError::Spawn(program, e)),
    };

    let stdout = child.stdout.take().map(spawn_reader);
    let stderr = child.stderr.take().map(spawn_reader);

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(e) => {
                kill_tree(&mut child);
                return Err(ProcessError::Wait(program, e));
            }
        }
        if Instant::now() >= deadline {
            kill_tree(&mut child);
            drop(child);
            // Readers see EOF once the group is gone; their output is discarded.
            let _ = stdout.map(JoinHandle::join);
            let _ = stderr.map(JoinHandle::join);
            return Err(ProcessError::TimedOut(program, timeout));
        }
        thread::sleep(POLL_INTERVAL);
    };

    Ok(CommandOutput {
        status,
        stdout: join_reader(stdout),
        stderr: join_reader(stderr),
    })
}

fn spawn_reader<R: Read + Send + 'static>(reader: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.take(MAX_CAPTURE_BYTES).read_to_end(&mut buf);
        buf
    })
}

fn join_reader(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        let pgid = child.id() as i32;
        unsafe {
            libc::kill(-pgid, libc::SIGKILL);
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

/// Locate `program` on `PATH` (or accept it as-is when it contains a path separator).
pub fn find_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|p| is_executable(p))
}

fn is_executable(path: &Path) -> bool {
    let Ok(meta) = path.metadata() else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}
