use clap::{Parser, Subcommand};
use focus_core::*;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "pomo")]
#[command(about = "Focus-cycle timer with work/break intervals", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Use a specific config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the timer in the foreground (default)
    Run {
        /// Start the countdown immediately
        #[arg(long)]
        start: bool,

        /// Tick length in milliseconds (for testing)
        #[arg(long, hide = true, default_value_t = 1000)]
        tick_ms: u64,

        /// Exit after this many ticks (for testing)
        #[arg(long, hide = true)]
        max_ticks: Option<u64>,
    },

    /// Show the saved timer state
    Status,

    /// Arm the saved timer; the countdown only advances while `pomo run` is open
    Start,

    /// Mark the saved timer as paused
    Pause,

    /// Discard the current set and clear the saved state
    Reset,

    /// Change cycle lengths (only while paused)
    Configure {
        /// Work phase length in minutes
        #[arg(long)]
        work: Option<u32>,

        /// Short break length in minutes
        #[arg(long)]
        short_break: Option<u32>,

        /// Long break length in minutes
        #[arg(long)]
        long_break: Option<u32>,

        /// Work phases per set
        #[arg(long)]
        cycles: Option<u32>,

        /// Take a long break at the end of each set
        #[arg(long)]
        long_break_enabled: Option<bool>,

        /// Also store these values as config-file defaults
        #[arg(long)]
        save: bool,
    },

    /// Sign in so completed sets are recorded
    Login {
        /// Account identifier
        #[arg(value_parser = parse_actor_id)]
        id: String,
    },

    /// Sign out; sets are no longer recorded
    Logout,

    /// List sessions in the local journal
    Sessions,
}

struct Context {
    config: Config,
    config_path: PathBuf,
    data_dir: PathBuf,
}

impl Context {
    fn journal_path(&self) -> PathBuf {
        self.data_dir.join("sessions.jsonl")
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize logging
    focus_core::logging::init();

    let cli = Cli::parse();

    let (config, config_path) = match cli.config {
        Some(path) => (Config::load_from(&path)?, path),
        None => (Config::load()?, Config::default_config_path()),
    };
    let data_dir = cli.data_dir.unwrap_or_else(|| config.data.data_dir.clone());
    std::fs::create_dir_all(&data_dir)?;

    let ctx = Context {
        config,
        config_path,
        data_dir,
    };

    match cli.command {
        Some(Commands::Run {
            start,
            tick_ms,
            max_ticks,
        }) => cmd_run(&ctx, start, tick_ms, max_ticks).await,
        Some(Commands::Status) => cmd_status(&ctx),
        Some(Commands::Start) => cmd_set_running(&ctx, true),
        Some(Commands::Pause) => cmd_set_running(&ctx, false),
        Some(Commands::Reset) => cmd_reset(&ctx),
        Some(Commands::Configure {
            work,
            short_break,
            long_break,
            cycles,
            long_break_enabled,
            save,
        }) => cmd_configure(
            &ctx,
            ConfigureArgs {
                work,
                short_break,
                long_break,
                cycles,
                long_break_enabled,
            },
            save,
        ),
        Some(Commands::Login { id }) => cmd_login(&ctx, &id),
        Some(Commands::Logout) => cmd_logout(&ctx),
        Some(Commands::Sessions) => cmd_sessions(&ctx),
        None => {
            // Default to "run" command
            cmd_run(&ctx, false, 1000, None).await
        }
    }
}

fn build_coordinator(ctx: &Context) -> Result<SessionCoordinator> {
    let store = Arc::new(FileSnapshotStore::in_dir(&ctx.data_dir));
    let identity = Arc::new(FileIdentity::in_dir(&ctx.data_dir));
    let timeout = ctx.config.sink.timeout();

    let sink: Arc<dyn RecordingSink> = match ctx.config.sink.endpoint {
        Some(ref endpoint) => Arc::new(HttpRecordingSink::new(
            endpoint.clone(),
            ctx.config.sink.auth_token.clone(),
            timeout,
        )?),
        None => Arc::new(JsonlSink::new(ctx.journal_path())),
    };

    Ok(SessionCoordinator::new(store, sink, identity, timeout))
}

async fn cmd_run(ctx: &Context, start: bool, tick_ms: u64, max_ticks: Option<u64>) -> Result<()> {
    let defaults = ctx.config.timer.cycle_config()?;
    let coordinator = build_coordinator(ctx)?;
    let tick_interval = Duration::from_millis(tick_ms.max(1));

    let engine = FocusEngine::boot(coordinator, defaults, tick_interval).await;
    let mut notices = engine.subscribe();

    let initial = if start {
        engine.start().await
    } else {
        engine.state().await
    };

    println!("Enter: start/pause   r: reset   q: quit");
    render(&initial)?;

    let mut input = spawn_input_reader()?;
    let mut input_open = true;

    loop {
        tokio::select! {
            notice = notices.recv() => match notice {
                Ok(notice) => {
                    if show_notice(notice, max_ticks)? == Flow::Stop {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Display skipped {} notices", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            line = input.recv(), if input_open => match line {
                Some(line) => match line.trim().to_lowercase().as_str() {
                    "" | "p" => {
                        engine.toggle().await;
                    }
                    "r" => {
                        engine.reset().await;
                    }
                    "q" => break,
                    other => eprintln!("Unknown command: {}", other),
                },
                None => input_open = false,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    engine.detach().await;
    engine.flush().await;
    engine.drain_submissions().await;

    // Report submissions that settled after the loop ended
    while let Ok(notice) = notices.try_recv() {
        if !matches!(notice, EngineNotice::Ticked { .. }) {
            show_notice(notice, None)?;
        }
    }
    println!();

    Ok(())
}

/// Read stdin lines on a plain thread so a pending read never blocks exit
fn spawn_input_reader() -> Result<mpsc::UnboundedReceiver<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name("pomo-input".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}

#[derive(PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

fn show_notice(notice: EngineNotice, max_ticks: Option<u64>) -> Result<Flow> {
    match notice {
        EngineNotice::Ticked { tick, state } => {
            render(&state)?;
            if max_ticks.is_some_and(|max| tick >= max) {
                return Ok(Flow::Stop);
            }
        }
        EngineNotice::StateChanged(state) => render(&state)?,
        EngineNotice::PhaseChanged { to, .. } => {
            // Terminal bell as the local audible cue
            println!("\x07\n▶ {} started", to.label());
        }
        EngineNotice::SetComplete(totals) => {
            println!(
                "\n✓ Set complete: {} cycles, {} min work, {} min break",
                totals.cycles_completed,
                totals.work_seconds / 60,
                totals.break_seconds / 60
            );
        }
        EngineNotice::SessionRecorded(summary) => {
            println!("\n✓ Session recorded for {}", summary.actor_id);
        }
        EngineNotice::SessionSkipped => {
            println!("\nGuest session not recorded (use `pomo login` to keep history)");
        }
        EngineNotice::SubmissionFailed(message) => {
            eprintln!("\n! Could not record session: {}", message);
        }
    }
    Ok(Flow::Continue)
}

fn render(state: &EngineState) -> Result<()> {
    let marker = if state.running { "▶" } else { "⏸" };
    print!(
        "\r{} {:<11} {}  [{:>3.0}%]  cycle {}   ",
        marker,
        state.phase.label(),
        state.format_remaining(),
        state.progress_percent(),
        state.cycle_label()
    );
    io::stdout().flush()?;
    Ok(())
}

fn display_state(state: &EngineState) {
    let config = &state.config;
    println!("\n╭─────────────────────────────────────────╮");
    println!("│  {}", state.phase.label().to_uppercase());
    println!("╰─────────────────────────────────────────╯");
    println!();
    println!("  Remaining: {}", state.format_remaining());
    println!(
        "  Status: {}",
        if state.running {
            "armed (counts down while `pomo run` is open)"
        } else {
            "paused"
        }
    );
    println!("  Cycle: {}", state.cycle_label());
    println!(
        "  This set: {} min work, {} min break",
        state.accumulated_work_seconds / 60,
        state.accumulated_break_seconds / 60
    );
    println!();
    println!(
        "  Config: {}m work / {}m short / {}m long, {} cycles per set, long break {}",
        config.work_minutes(),
        config.short_break_minutes(),
        config.long_break_minutes(),
        config.cycles_per_set(),
        if config.long_break_enabled() { "on" } else { "off" }
    );
    println!();
}

fn cmd_status(ctx: &Context) -> Result<()> {
    let defaults = ctx.config.timer.cycle_config()?;
    let machine = build_coordinator(ctx)?.restore(defaults);
    display_state(machine.state());
    Ok(())
}

fn cmd_set_running(ctx: &Context, running: bool) -> Result<()> {
    let defaults = ctx.config.timer.cycle_config()?;
    let coordinator = build_coordinator(ctx)?;
    let mut machine = coordinator.restore(defaults);

    let changed = if running {
        machine.start()
    } else {
        machine.pause()
    };
    if changed {
        coordinator.persist(machine.state())?;
    }

    if machine.state().running {
        println!("Timer armed; `pomo run` resumes the countdown");
    } else {
        println!("Timer paused");
    }
    Ok(())
}

fn cmd_reset(ctx: &Context) -> Result<()> {
    build_coordinator(ctx)?.discard()?;
    println!("✓ Timer reset");
    Ok(())
}

struct ConfigureArgs {
    work: Option<u32>,
    short_break: Option<u32>,
    long_break: Option<u32>,
    cycles: Option<u32>,
    long_break_enabled: Option<bool>,
}

fn cmd_configure(ctx: &Context, args: ConfigureArgs, save: bool) -> Result<()> {
    let defaults = ctx.config.timer.cycle_config()?;
    let coordinator = build_coordinator(ctx)?;
    let mut machine = coordinator.restore(defaults);

    let current = machine.state().config;
    let updated = CycleConfig::new(
        args.work.unwrap_or(current.work_minutes()),
        args.short_break.unwrap_or(current.short_break_minutes()),
        args.long_break.unwrap_or(current.long_break_minutes()),
        args.cycles.unwrap_or(current.cycles_per_set()),
        args.long_break_enabled.unwrap_or(current.long_break_enabled()),
    )?;

    machine.reconfigure(updated)?;
    coordinator.persist(machine.state())?;

    if save {
        let mut config = ctx.config.clone();
        config.timer = focus_core::config::TimerConfig::from(updated);
        config.save_to(&ctx.config_path)?;
    }

    println!("✓ Configuration updated");
    display_state(machine.state());
    Ok(())
}

fn parse_actor_id(raw: &str) -> std::result::Result<String, String> {
    let id = raw.trim();
    if id.is_empty() {
        return Err("account id must not be empty".into());
    }
    Ok(id.to_string())
}

fn cmd_login(ctx: &Context, id: &str) -> Result<()> {
    FileIdentity::in_dir(&ctx.data_dir).login(id)?;
    println!("✓ Signed in as {}", id);
    Ok(())
}

fn cmd_logout(ctx: &Context) -> Result<()> {
    FileIdentity::in_dir(&ctx.data_dir).logout()?;
    println!("✓ Signed out");
    Ok(())
}

fn cmd_sessions(ctx: &Context) -> Result<()> {
    if let Some(ref endpoint) = ctx.config.sink.endpoint {
        println!("Sessions are recorded remotely at {}", endpoint);
        return Ok(());
    }

    let entries = read_journal(&ctx.journal_path())?;
    if entries.is_empty() {
        println!("No recorded sessions.");
        return Ok(());
    }

    for entry in entries {
        let session = entry.session;
        println!(
            "{}  {:<16} {} cycles  {} min work  {} min break",
            entry.recorded_at.format("%Y-%m-%d %H:%M"),
            session.actor_id,
            session.cycles_completed,
            session.work_duration_seconds / 60,
            session.break_duration_seconds / 60
        );
    }
    Ok(())
}
