use std::ffi::OsStr;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Output, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, warn};

/// Runs `program` to completion, killing it once `timeout` has passed. A non-zero exit
/// status is an error carrying the tool's stderr.
pub fn run_tool<I, S>(program: &Path, args: I, cwd: Option<&Path>, timeout: Duration) -> Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    debug!("run {:?} timeout={:?}", cmd, timeout);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning {}", program.display()))?;
    let output = wait_with_timeout(&mut child, timeout)
        .with_context(|| format!("running {}", program.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "{} exited with {}: {}",
            program.display(),
            output.status,
            stderr.trim()
        );
    }
    Ok(output)
}

/// `true` if `program --version` runs and exits successfully.
pub fn tool_available(program: &Path) -> bool {
    match run_tool(program, ["--version"], None, Duration::from_secs(30)) {
        Ok(out) => {
            let first = String::from_utf8_lossy(&out.stdout);
            debug!(
                "{} available: {}",
                program.display(),
                first.lines().next().unwrap_or("").trim()
            );
            true
        }
        Err(err) => {
            debug!("{} unavailable: {err:#}", program.display());
            false
        }
    }
}

/// How long the pipe readers may lag behind the child. Workers the tool started can keep
/// the pipes open after the tool itself has exited or been killed.
const PIPE_GRACE: Duration = Duration::from_secs(2);

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<Output> {
    // Pipes are drained on their own threads so a chatty tool cannot block on a full
    // stdout/stderr buffer while we poll.
    let stdout_rx = spawn_reader(child.stdout.take(), "stdout");
    let stderr_rx = spawn_reader(child.stderr.take(), "stderr");

    let start = Instant::now();
    let (status, timed_out) = loop {
        if let Some(status) = child.try_wait().context("try_wait")? {
            break (status, false);
        }
        if start.elapsed() > timeout {
            warn!("process timed out after {:?}", timeout);
            let _ = child.kill();
            break (child.wait().context("wait after kill")?, true);
        }
        std::thread::sleep(Duration::from_millis(50));
    };

    let stdout = collect_pipe(&stdout_rx, "stdout")?;
    let stderr = collect_pipe(&stderr_rx, "stderr")?;

    if timed_out {
        bail!(
            "process exceeded timeout ({:?}); stderr: {}",
            timeout,
            String::from_utf8_lossy(&stderr).trim()
        );
    }
    Ok(Output {
        status,
        stdout,
        stderr,
    })
}

fn spawn_reader<R>(pipe: Option<R>, what: &'static str) -> Receiver<Result<Vec<u8>>>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let res = match pipe {
            Some(mut pipe) => match pipe.read_to_end(&mut buf) {
                Ok(_) => Ok(buf),
                Err(e) => Err(anyhow!(e).context(format!("read {what}"))),
            },
            None => Ok(buf),
        };
        // the receiver is gone once the grace period ran out
        let _ = tx.send(res);
    });
    rx
}

/// Output of one reader thread. A pipe still held open after [`PIPE_GRACE`] is abandoned
/// with its reader; what it had read is lost.
fn collect_pipe(rx: &Receiver<Result<Vec<u8>>>, what: &str) -> Result<Vec<u8>> {
    match rx.recv_timeout(PIPE_GRACE) {
        Ok(res) => res,
        Err(RecvTimeoutError::Timeout) => {
            warn!("{what} still open {PIPE_GRACE:?} after the process ended; not waiting for it");
            Ok(Vec::new())
        }
        Err(RecvTimeoutError::Disconnected) => Err(anyhow!("{what} reader thread panicked")),
    }
}
