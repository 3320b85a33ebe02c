//! vigil-exec — the managed child-process state machine.
//!
//! One [`Executor`] owns zero-or-one live child. Every mutation flows
//! through a single serialized command loop (mpsc requests answered over
//! oneshot channels), so callers can be concurrent without any lock on the
//! child handle. Process identity is a generation counter published with
//! the exit status on a `watch` channel: a bumped generation after an exit
//! means "reloaded", a same-generation exit means "the process died".

pub mod command;
pub mod error;

use std::future::pending;
use std::str::FromStr;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use rand::Rng;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use vigil_core::types::ExecSpec;

pub use command::shell_split;
pub use error::ExecError;

/// Grace period between observing an exit and deciding it was not a reload.
const EXIT_GRACE: Duration = Duration::from_secs(1);

/// Identity and liveness of the managed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildStatus {
    /// Bumped every time the process is (re)spawned; 0 means never spawned.
    pub generation: u64,
    /// Exit code of this generation, once it has exited.
    pub exit_code: Option<i32>,
}

enum Request {
    Reload {
        respond_to: oneshot::Sender<Result<(), ExecError>>,
    },
    Signal {
        signal: Signal,
        respond_to: oneshot::Sender<Result<(), ExecError>>,
    },
    Stop {
        respond_to: oneshot::Sender<Result<(), ExecError>>,
    },
}

/// Parse a signal name; the `SIG` prefix is optional (`HUP` == `SIGHUP`).
pub fn parse_signal(name: &str) -> Result<Signal, ExecError> {
    let upper = name.trim().to_ascii_uppercase();
    let full = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{upper}")
    };
    Signal::from_str(&full).map_err(|_| ExecError::BadSignal {
        name: name.to_string(),
    })
}

#[derive(Debug)]
pub struct Executor {
    /// `None` when the command line is empty — a valid no-op supervisor.
    requests: Option<mpsc::Sender<Request>>,
    status_rx: watch::Receiver<ChildStatus>,
}

impl Executor {
    fn noop() -> Self {
        let (_, status_rx) = watch::channel(ChildStatus {
            generation: 0,
            exit_code: None,
        });
        Self {
            requests: None,
            status_rx,
        }
    }

    /// Parse the command line once and spawn the managed process.
    ///
    /// An empty command yields a no-op executor whose operations all
    /// succeed trivially ("render only" resources). Cancellation during
    /// the start-delay splay also yields a no-op executor: the caller is
    /// shutting down and nothing was spawned.
    pub async fn spawn(spec: &ExecSpec, cancel: &CancellationToken) -> Result<Self, ExecError> {
        let argv = shell_split(&spec.command)?;
        if argv.is_empty() {
            return Ok(Self::noop());
        }

        let reload_signal = spec
            .reload_signal
            .as_deref()
            .map(parse_signal)
            .transpose()?;
        let kill_signal = parse_signal(&spec.kill_signal)?;
        let kill_timeout = Duration::from_secs(spec.kill_timeout);

        if spec.splay > 0 {
            let delay = rand::thread_rng().gen_range(0..spec.splay);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(Self::noop()),
                _ = tokio::time::sleep(Duration::from_secs(delay)) => {}
            }
        }

        let child = spawn_child(&argv)?;
        tracing::info!(cmd = %spec.command, pid = child.id(), "spawned managed process");

        let (status_tx, status_rx) = watch::channel(ChildStatus {
            generation: 1,
            exit_code: None,
        });
        let (request_tx, request_rx) = mpsc::channel(16);

        tokio::spawn(command_loop(CommandLoop {
            argv,
            reload_signal,
            kill_signal,
            kill_timeout,
            child: Some(child),
            generation: 1,
            status: status_tx,
            requests: request_rx,
        }));

        Ok(Self {
            requests: Some(request_tx),
            status_rx,
        })
    }

    /// True when a command line was configured (even if it has since exited).
    pub fn is_managing(&self) -> bool {
        self.requests.is_some()
    }

    pub fn status(&self) -> ChildStatus {
        *self.status_rx.borrow()
    }

    /// Deliver the reload signal, or kill-and-respawn when none is set.
    pub async fn reload(&self) -> Result<(), ExecError> {
        self.request(|respond_to| Request::Reload { respond_to })
            .await
    }

    /// Best-effort forward of an arbitrary signal to the child.
    pub async fn signal(&self, signal: Signal) -> Result<(), ExecError> {
        match self
            .request(|respond_to| Request::Signal { signal, respond_to })
            .await
        {
            Err(ExecError::Closed) => Ok(()),
            other => other,
        }
    }

    /// Stop the child: kill signal, wait up to the kill timeout, force-kill.
    /// Blocks until the child is confirmed gone. Idempotent.
    pub async fn stop(&self) -> Result<(), ExecError> {
        match self.request(|respond_to| Request::Stop { respond_to }).await {
            Err(ExecError::Closed) => Ok(()),
            other => other,
        }
    }

    /// Block until cancellation (returns `false`, "not failed") or until this
    /// generation of the process exits for real (returns `true`).
    ///
    /// After an exit notification the grace period is waited out and the
    /// generation re-checked: a reload that replaced the process is a
    /// non-event, and waiting resumes against the new generation.
    pub async fn wait(&self, cancel: &CancellationToken) -> bool {
        if self.requests.is_none() {
            cancel.cancelled().await;
            return false;
        }
        let mut rx = self.status_rx.clone();
        loop {
            let seen = *rx.borrow_and_update();
            if let Some(code) = seen.exit_code {
                tokio::select! {
                    _ = cancel.cancelled() => return false,
                    _ = tokio::time::sleep(EXIT_GRACE) => {}
                }
                let now = *rx.borrow_and_update();
                if now.generation != seen.generation {
                    continue;
                }
                tracing::warn!(code, "managed process exited unexpectedly");
                return true;
            }
            tokio::select! {
                _ = cancel.cancelled() => return false,
                changed = rx.changed() => {
                    if changed.is_err() {
                        // Command loop ended after an explicit stop.
                        cancel.cancelled().await;
                        return false;
                    }
                }
            }
        }
    }

    async fn request<F>(&self, make: F) -> Result<(), ExecError>
    where
        F: FnOnce(oneshot::Sender<Result<(), ExecError>>) -> Request,
    {
        let Some(tx) = &self.requests else {
            return Ok(());
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        if tx.send(make(reply_tx)).await.is_err() {
            return Err(ExecError::Closed);
        }
        reply_rx.await.map_err(|_| ExecError::Closed)?
    }
}

// ---------------------------------------------------------------------------
// Serialized command loop — the only code that touches the child handle
// ---------------------------------------------------------------------------

struct CommandLoop {
    argv: Vec<String>,
    reload_signal: Option<Signal>,
    kill_signal: Signal,
    kill_timeout: Duration,
    child: Option<Child>,
    generation: u64,
    status: watch::Sender<ChildStatus>,
    requests: mpsc::Receiver<Request>,
}

async fn command_loop(mut state: CommandLoop) {
    loop {
        tokio::select! {
            exit = wait_some(&mut state.child) => {
                let code = exit_code(exit);
                state.child = None;
                state.status.send_replace(ChildStatus {
                    generation: state.generation,
                    exit_code: Some(code),
                });
            }
            req = state.requests.recv() => {
                let Some(req) = req else {
                    // Executor dropped without an explicit stop.
                    stop_child(&mut state).await;
                    break;
                };
                match req {
                    Request::Signal { signal, respond_to } => {
                        let _ = respond_to.send(signal_child(&state.child, signal));
                    }
                    Request::Reload { respond_to } => {
                        let _ = respond_to.send(handle_reload(&mut state).await);
                    }
                    Request::Stop { respond_to } => {
                        stop_child(&mut state).await;
                        let _ = respond_to.send(Ok(()));
                        break;
                    }
                }
            }
        }
    }
}

async fn handle_reload(state: &mut CommandLoop) -> Result<(), ExecError> {
    if let (Some(sig), true) = (state.reload_signal, state.child.is_some()) {
        tracing::info!(signal = %sig, "reload signal delivered");
        return signal_child(&state.child, sig);
    }
    // No reload signal (or no live child): kill and respawn the same line.
    stop_child(state).await;
    let child = spawn_child(&state.argv)?;
    state.generation += 1;
    tracing::info!(
        pid = child.id(),
        generation = state.generation,
        "respawned managed process",
    );
    state.child = Some(child);
    state.status.send_replace(ChildStatus {
        generation: state.generation,
        exit_code: None,
    });
    Ok(())
}

async fn stop_child(state: &mut CommandLoop) {
    let Some(mut child) = state.child.take() else {
        return;
    };
    if let Some(pid) = child.id() {
        if let Err(err) = signal::kill(Pid::from_raw(pid as i32), state.kill_signal) {
            tracing::warn!(error = %err, "failed to deliver kill signal");
        }
    }
    let code = match tokio::time::timeout(state.kill_timeout, child.wait()).await {
        Ok(exit) => exit_code(exit),
        Err(_) => {
            tracing::warn!(
                timeout_secs = state.kill_timeout.as_secs(),
                "kill timeout elapsed, force-killing",
            );
            let _ = child.start_kill();
            exit_code(child.wait().await)
        }
    };
    state.status.send_replace(ChildStatus {
        generation: state.generation,
        exit_code: Some(code),
    });
}

fn spawn_child(argv: &[String]) -> Result<Child, ExecError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(ExecError::BadCommand {
            cmd: String::new(),
            reason: "empty command".to_string(),
        });
    };
    Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ExecError::Spawn {
            cmd: argv.join(" "),
            source,
        })
}

fn signal_child(child: &Option<Child>, sig: Signal) -> Result<(), ExecError> {
    let Some(pid) = child.as_ref().and_then(Child::id) else {
        return Ok(());
    };
    signal::kill(Pid::from_raw(pid as i32), sig).map_err(ExecError::Signal)
}

async fn wait_some(child: &mut Option<Child>) -> std::io::Result<std::process::ExitStatus> {
    match child {
        Some(c) => c.wait().await,
        None => pending().await,
    }
}

fn exit_code(exit: std::io::Result<std::process::ExitStatus>) -> i32 {
    match exit {
        Ok(status) => status.code().unwrap_or(-1),
        Err(_) => -1,
    }
}
