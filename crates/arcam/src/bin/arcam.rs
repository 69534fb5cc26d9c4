//! arcam - drive the camera session controller against the simulator
//!
//! `arcam simulate` walks one controller through start, capability grant,
//! surface attach, rendering, a background/foreground cycle with a lost
//! surface, and teardown, with a real render thread ticking alongside.
//! `arcam config` prints the merged configuration.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use arcam::capability::{Capability, CapabilityOutcome, PermissionPrompter};
use arcam::sim::{
    demo_session_config, AnswerMode, NativeCallsSnapshot, RecordingView, ScriptedPrompter,
    SimulatedGpu, SimulatedSdk,
};
use arcam::{
    ControlLoop, ControllerError, ControllerHandle, ControllerStatus, Dimensions, LifecycleState,
    RenderLoop, RenderStatsSnapshot, SessionFactory, ViewHost,
};
use arcamconf::{ArcamConfig, SessionConfig};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// arcam - AR camera session controller
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file to use instead of ./arcam.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a full session lifecycle against the simulated SDK
    Simulate {
        /// Deny the camera permission
        #[arg(long)]
        deny: bool,

        /// Make the SDK reject session creation
        #[arg(long)]
        fail_init: bool,

        /// Also require the microphone
        #[arg(long)]
        microphone: bool,

        /// Frames to draw in each foreground phase
        #[arg(long, default_value = "5")]
        frames: u64,

        /// Render thread redraw interval in milliseconds
        #[arg(long, default_value = "16")]
        frame_interval_ms: u64,

        /// Surface width
        #[arg(long, default_value = "720")]
        width: u32,

        /// Surface height
        #[arg(long, default_value = "1280")]
        height: u32,
    },

    /// Print the merged configuration
    Config,
}

/// Upper bound on any single wait in the scenario.
const STEP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct Report {
    final_state: LifecycleState,
    failure: Option<ControllerError>,
    render: RenderStatsSnapshot,
    native: NativeCallsSnapshot,
    permission_prompts: usize,
    surface_requests: usize,
    user_messages: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, sources) = ArcamConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;

    let env_filter = EnvFilter::try_new(&config.telemetry.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    for file in &sources.files {
        info!(file = %file.display(), "loaded config file");
    }
    for var in &sources.env_overrides {
        info!(%var, "config overridden from environment");
    }

    match cli.command {
        Commands::Config => {
            for file in &sources.files {
                println!("# source: {}", file.display());
            }
            for var in &sources.env_overrides {
                println!("# env: {var}");
            }
            print!("{}", config.to_toml());
        }
        Commands::Simulate {
            deny,
            fail_init,
            microphone,
            frames,
            frame_interval_ms,
            width,
            height,
        } => {
            let mut session = with_sim_credentials(config.session);
            if microphone {
                session.capabilities.require_microphone = true;
            }
            let scenario = Scenario {
                deny,
                fail_init,
                frames,
                frame_interval: Duration::from_millis(frame_interval_ms),
                dimensions: Dimensions::new(width, height),
            };
            let report = scenario.run(session).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

/// Fill blank credentials with simulator placeholders.
fn with_sim_credentials(mut session: SessionConfig) -> SessionConfig {
    let demo = demo_session_config().credentials;
    let creds = &mut session.credentials;
    for (field, fallback) in [
        (&mut creds.api_url, demo.api_url),
        (&mut creds.api_key, demo.api_key),
        (&mut creds.secret_key, demo.secret_key),
        (&mut creds.auth_key, demo.auth_key),
    ] {
        if field.trim().is_empty() {
            *field = fallback;
        }
    }
    session
}

struct Scenario {
    deny: bool,
    fail_init: bool,
    frames: u64,
    frame_interval: Duration,
    dimensions: Dimensions,
}

impl Scenario {
    async fn run(&self, session: SessionConfig) -> Result<Report> {
        let sdk = if self.fail_init {
            SimulatedSdk::rejecting("simulated SDK rejected credentials")
        } else {
            SimulatedSdk::new()
        };
        let calls = sdk.calls();

        let mut prompter = ScriptedPrompter::granting()
            .with_mode(AnswerMode::Threaded(Duration::from_millis(50)));
        if self.deny {
            prompter = prompter.with_outcome(Capability::Camera, CapabilityOutcome::Denied);
        }
        let prompter = Arc::new(prompter);
        let view = Arc::new(RecordingView::new());

        let control = ControlLoop::new(
            session,
            Arc::new(sdk) as Arc<dyn SessionFactory>,
            Arc::clone(&prompter) as Arc<dyn PermissionPrompter>,
            Arc::clone(&view) as Arc<dyn ViewHost>,
        );
        let handle = control.handle();
        let render = control.render_loop();
        let control_task = tokio::spawn(control.run());

        let stop = Arc::new(AtomicBool::new(false));
        let render_thread = spawn_render_thread(render.clone(), Arc::clone(&stop), self.frame_interval)?;

        let outcome = self.drive(&handle, &render).await;

        if let Err(e) = handle.host_destroyed() {
            warn!(error = %e, "control loop gone before teardown");
        }
        let last = wait_for_state(&handle, LifecycleState::is_terminal).await?;
        handle.shutdown()?;

        stop.store(true, Ordering::SeqCst);
        let draws = render_thread
            .join()
            .map_err(|_| anyhow::anyhow!("render thread panicked"))?;
        let final_state = control_task.await.context("control loop task failed")?;
        outcome?;

        info!(%final_state, draws, "simulation finished");
        Ok(Report {
            final_state,
            failure: last.failure,
            render: render.stats().snapshot(),
            native: calls.snapshot(),
            permission_prompts: prompter.prompt_count(),
            surface_requests: view.surface_requests(),
            user_messages: view.messages(),
        })
    }

    async fn drive(&self, handle: &ControllerHandle, render: &RenderLoop) -> Result<()> {
        handle.start()?;
        // The view layer creates its surface right away; the controller holds
        // it until the session exists.
        handle.surface_created(self.dimensions)?;

        let status = wait_for_state(handle, |s| s == LifecycleState::Resumed || s.is_terminal()).await?;
        print_status("started", &status)?;
        if status.state.is_terminal() {
            return Ok(());
        }
        wait_for_frames(render, self.frames).await?;

        handle.host_paused()?;
        let status = wait_for_state(handle, |s| s == LifecycleState::Paused).await?;
        print_status("backgrounded", &status)?;

        handle.surface_destroyed()?;
        handle.host_resumed()?;
        tokio::time::sleep(self.frame_interval * 3).await;
        let status = handle.status().borrow().clone();
        print_status("foregrounded without surface", &status)?;
        if status.state != LifecycleState::Paused {
            bail!("controller resumed without a surface: {}", status.state);
        }

        handle.surface_created(self.dimensions)?;
        let status = wait_for_state(handle, |s| s == LifecycleState::Resumed).await?;
        print_status("surface reattached", &status)?;
        wait_for_frames(render, self.frames * 2).await?;

        Ok(())
    }
}

fn spawn_render_thread(
    render: RenderLoop,
    stop: Arc<AtomicBool>,
    interval: Duration,
) -> Result<thread::JoinHandle<usize>> {
    let handle = thread::Builder::new()
        .name("arcam-render".to_string())
        .spawn(move || {
            let mut gpu = SimulatedGpu::new();
            // Ticks keep coming while paused; those are skipped.
            while !stop.load(Ordering::SeqCst) {
                render.tick(&mut gpu);
                thread::sleep(interval);
            }
            gpu.draw_count()
        })
        .context("Failed to spawn render thread")?;
    Ok(handle)
}

async fn wait_for_state(
    handle: &ControllerHandle,
    accept: impl Fn(LifecycleState) -> bool,
) -> Result<ControllerStatus> {
    let mut rx = handle.status();
    let status = tokio::time::timeout(STEP_TIMEOUT, rx.wait_for(|status| accept(status.state)))
        .await
        .context("Timed out waiting for lifecycle state")?
        .context("Control loop closed")?
        .clone();
    Ok(status)
}

async fn wait_for_frames(render: &RenderLoop, at_least: u64) -> Result<()> {
    let poll = async {
        while render.stats().snapshot().frames_drawn < at_least {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(STEP_TIMEOUT, poll)
        .await
        .with_context(|| format!("Timed out waiting for {at_least} frames"))
}

fn print_status(phase: &str, status: &ControllerStatus) -> Result<()> {
    println!("{phase}: {}", serde_json::to_string(status)?);
    Ok(())
}
