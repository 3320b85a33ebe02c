//! `vigil run` — supervise every configured resource until interrupted.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use nix::sys::signal::Signal;
use tokio::signal::unix::{signal, SignalKind};

use vigil_core::config;
use vigil_core::types::Config;
use vigil_daemon::Supervisor;

/// Arguments for `vigil run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Configuration file, or a directory of `*.toml` fragments.
    #[arg(long)]
    pub config: PathBuf,

    /// Fetch and render everything once, then exit.
    #[arg(long)]
    pub onetime: bool,

    /// Write the daemon's PID here; overrides `pid_file` in the config.
    #[arg(long)]
    pub pid_file: Option<PathBuf>,
}

impl RunArgs {
    pub fn run(self) -> Result<()> {
        init_tracing();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to build async runtime")?;
        runtime.block_on(self.serve())
    }

    async fn serve(self) -> Result<()> {
        let mut cfg = self.load_config()?;
        if self.onetime {
            mark_onetime(&mut cfg);
        }

        let mut supervisor = Supervisor::start(cfg, self.pid_file.clone())
            .context("failed to start resources")?;

        if self.onetime {
            supervisor.join().await;
            return Ok(());
        }

        let mut hangup = signal(SignalKind::hangup()).context("SIGHUP handler")?;
        let mut interrupt = signal(SignalKind::interrupt()).context("SIGINT handler")?;
        let mut terminate = signal(SignalKind::terminate()).context("SIGTERM handler")?;
        let mut usr1 = signal(SignalKind::user_defined1()).context("SIGUSR1 handler")?;
        let mut usr2 = signal(SignalKind::user_defined2()).context("SIGUSR2 handler")?;

        loop {
            tokio::select! {
                _ = hangup.recv() => {
                    match self.load_config() {
                        Ok(next) => {
                            if let Err(err) = supervisor.reload(next).await {
                                tracing::error!(error = %err, "reload failed");
                            }
                        }
                        // Keep running on the old configuration.
                        Err(err) => tracing::error!(error = %err, "configuration rejected"),
                    }
                }
                _ = interrupt.recv() => break,
                _ = terminate.recv() => break,
                _ = usr1.recv() => supervisor.send_signal(Signal::SIGUSR1),
                _ = usr2.recv() => supervisor.send_signal(Signal::SIGUSR2),
            }
        }

        tracing::info!("shutting down");
        supervisor.stop().await;
        Ok(())
    }

    fn load_config(&self) -> Result<Config> {
        config::load(&self.config)
            .with_context(|| format!("invalid configuration at {}", self.config.display()))
    }
}

/// Freeze every backend after its first fetch and drop managed processes so
/// the run terminates once all templates are installed.
fn mark_onetime(cfg: &mut Config) {
    for resource in &mut cfg.resources {
        for backend in &mut resource.backends {
            backend.settings.onetime = true;
        }
        resource.exec = None;
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
