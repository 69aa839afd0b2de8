//! Child process execution with line-by-line output forwarding

use std::path::Path;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::deploy::log::BuildLog;
use crate::errors::PipelineError;

/// Run a shell command line in `cwd` and wait for it to exit
pub async fn run_shell(
    command_line: &str,
    cwd: &Path,
    log: &BuildLog,
) -> Result<ExitStatus, PipelineError> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command_line).current_dir(cwd);
    run_streaming(cmd, log).await
}

/// Spawn `cmd` and forward every stdout and stderr line as a log event, in
/// the order the lines are read. Bytes that are not valid UTF-8 are replaced,
/// never skipped. Returns once both streams are closed and the process has
/// exited.
pub async fn run_streaming(mut cmd: Command, log: &BuildLog) -> Result<ExitStatus, PipelineError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(command = ?cmd, "Spawning build process");
    let mut child = cmd
        .spawn()
        .map_err(|e| PipelineError::BuildError(format!("failed to spawn process: {}", e)))?;

    let mut stdout_reader = child.stdout.take().map(BufReader::new);
    let mut stderr_reader = child.stderr.take().map(BufReader::new);

    // partial lines survive a select! branch losing the race
    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();

    while stdout_reader.is_some() || stderr_reader.is_some() {
        tokio::select! {
            read = read_raw_line(&mut stdout_reader, &mut stdout_buf), if stdout_reader.is_some() => {
                match read {
                    Ok(0) => stdout_reader = None,
                    Ok(_) => log.line(take_line(&mut stdout_buf)).await,
                    Err(e) => {
                        warn!("Error reading stdout, stopping build process: {}", e);
                        stdout_reader = None;
                        let _ = child.start_kill();
                    }
                }
            }
            read = read_raw_line(&mut stderr_reader, &mut stderr_buf), if stderr_reader.is_some() => {
                match read {
                    Ok(0) => stderr_reader = None,
                    Ok(_) => log.line(take_line(&mut stderr_buf)).await,
                    Err(e) => {
                        warn!("Error reading stderr, stopping build process: {}", e);
                        stderr_reader = None;
                        let _ = child.start_kill();
                    }
                }
            }
        }
    }

    let status = child
        .wait()
        .await
        .map_err(|e| PipelineError::BuildError(format!("failed to wait for process: {}", e)))?;
    debug!("Build process exited with {}", status);
    Ok(status)
}

/// Read up to and including the next newline into `buf`, returning 0 at EOF
async fn read_raw_line<R>(reader: &mut Option<R>, buf: &mut Vec<u8>) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    match reader.as_mut() {
        Some(reader) => reader.read_until(b'\n', buf).await,
        None => std::future::pending().await,
    }
}

/// Decode and clear a buffered line, dropping its line terminator
fn take_line(buf: &mut Vec<u8>) -> String {
    let mut end = buf.len();
    if buf[..end].ends_with(b"\n") {
        end -= 1;
    }
    if buf[..end].ends_with(b"\r") {
        end -= 1;
    }
    let line = String::from_utf8_lossy(&buf[..end]).into_owned();
    buf.clear();
    line
}
