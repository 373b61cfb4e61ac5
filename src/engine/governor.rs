use super::process::ProcessHandle;
use super::types::{CapturedOutput, WorkerExit};
use crate::error::RunError;
use std::time::Duration;
use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

enum Event {
    Exited(std::io::Result<std::process::ExitStatus>),
    Deadline,
    Cancelled,
}

/// Race the worker's exit against `deadline` (measured from launch) and `cancel`.
///
/// On normal exit both streams are read to end-of-stream before returning, but
/// not past the deadline: whatever the worker left running with its pipes open
/// is killed then. On deadline or cancellation the worker is killed, given `grace` to be
/// reaped and to close its pipes, and any drain still running is aborted.
/// Termination failures are logged, never returned.
pub async fn supervise(
    handle: &mut ProcessHandle,
    deadline: Duration,
    grace: Duration,
    cancel: &CancellationToken,
) -> Result<WorkerExit, RunError> {
    let started = handle.started();

    let event = tokio::select! {
        status = handle.child.wait() => Event::Exited(status),
        _ = sleep_until(started + deadline) => Event::Deadline,
        _ = cancel.cancelled() => Event::Cancelled,
    };

    match event {
        Event::Exited(status) => {
            let status = status.map_err(RunError::Wait)?;
            let exit_code = status.code().unwrap_or(-1);
            // Exit code is meaningless until both streams are complete.
            let output = match handle.collect_until(started + deadline).await? {
                Some(output) => output,
                None => match reap_leftovers(handle, exit_code, grace).await? {
                    Some(output) => output,
                    None => {
                        return Ok(WorkerExit::TimedOut {
                            elapsed: started.elapsed(),
                        });
                    }
                },
            };
            debug!(
                "{} pid={:?} exited code={} after {:?}",
                handle.label(),
                handle.pid(),
                exit_code,
                started.elapsed()
            );
            Ok(WorkerExit::Exited { exit_code, output })
        }
        Event::Deadline => {
            warn!(
                "{} pid={:?} exceeded {:?}; terminating",
                handle.label(),
                handle.pid(),
                deadline
            );
            terminate(handle, grace).await;
            Ok(WorkerExit::TimedOut {
                elapsed: started.elapsed(),
            })
        }
        Event::Cancelled => {
            info!(
                "{} pid={:?} cancelled; terminating",
                handle.label(),
                handle.pid()
            );
            terminate(handle, grace).await;
            Ok(WorkerExit::Cancelled {
                elapsed: started.elapsed(),
            })
        }
    }
}

/// The worker exited but something it started still holds its output open at
/// the deadline. Kill the leftovers; once the pipes close the output is complete.
async fn reap_leftovers(
    handle: &mut ProcessHandle,
    exit_code: i32,
    grace: Duration,
) -> Result<Option<CapturedOutput>, RunError> {
    warn!(
        "{} pid={:?} exited code={} but its output was still open at the deadline; killing leftover processes",
        handle.label(),
        handle.pid(),
        exit_code
    );
    if let Err(err) = handle.kill_group() {
        warn!("{} killing process group failed: {err}", handle.label());
    }
    let output = handle.collect_until(Instant::now() + grace).await?;
    if output.is_none() {
        warn!("{} output still open {:?} after kill", handle.label(), grace);
        handle.abort_drains();
    }
    Ok(output)
}

async fn terminate(handle: &mut ProcessHandle, grace: Duration) {
    // Take down anything the worker started along with it.
    if let Err(err) = handle.kill_group() {
        warn!("{} killing process group failed: {err}", handle.label());
    }
    match handle.child.start_kill() {
        Ok(()) => match timeout(grace, handle.child.wait()).await {
            Ok(Ok(status)) => debug!("{} reaped after kill: {status}", handle.label()),
            Ok(Err(err)) => warn!("{} wait after kill failed: {err}", handle.label()),
            Err(_) => warn!("{} still running {:?} after kill", handle.label(), grace),
        },
        // Usually the process exited between the deadline firing and the kill.
        Err(err) => warn!("{} kill failed: {err}", handle.label()),
    }

    // Processes outside the group can still hold the pipes open; don't wait on
    // them past the grace period.
    handle.settle_drains(grace).await;
}
