use std::fs;
use std::io;
use std::panic;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use crossbeam_channel::unbounded;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::{info, warn};
use ratatui::{backend::CrosstermBackend, Terminal};

use density_finder::config::DensityConfig;
use density_finder::engine::external::vasp::ExternalSimulator;
use density_finder::engine::packing::RandomPacker;
use density_finder::engine::simulator::MdSimulator;
use density_finder::interface::logging::setup_logging;
use density_finder::interface::state::AppState;
use density_finder::interface::ui;
use density_finder::workflow::builder::density_workflow;
use density_finder::workflow::executor::{ChainOutcome, GraphReport, LocalExecutor};
use density_finder::workflow::graph::JobGraph;
use density_finder::workflow::pressure::PressureSampler;
use density_finder::workflow::sampler::{structure_sampler_workflows, StructureSampler};
use density_finder::workflow::sink::{JsonLinesSink, ResultSink};
use density_finder::workflow::state::{CycleState, RunSettings, DEFAULT_SIMULATION_COMMAND, DEFAULT_WALL_TIME};

// --- CLI Definitions ---

#[derive(Parser, Debug)]
#[command(author, version, about = "Density Finder: MD pressure-driven cell volume convergence", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Silence all log output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a density-convergence chain from a JSON config
    Run(RunArgs),
    /// Sample structures from a trajectory and run optimize/static on each
    Sample(SampleArgs),
    /// Print the averaged pressure of an OUTCAR (or plain series)
    Pressure(PressureArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Chain configuration (JSON)
    #[arg(short, long)]
    config: PathBuf,

    /// Override the convergence threshold
    #[arg(long)]
    threshold: Option<f64>,

    /// Override the spawn budget
    #[arg(long)]
    max_spawns: Option<u32>,

    /// Directory receiving one subdirectory per unit
    #[arg(short, long, default_value = "runs")]
    workdir: PathBuf,

    /// Number of worker threads
    #[arg(short, long, default_value_t = 4)]
    threads: usize,

    /// Show the live terminal monitor
    #[arg(short, long)]
    monitor: bool,
}

#[derive(Args, Debug)]
struct SampleArgs {
    /// XDATCAR trajectory
    #[arg(long)]
    trajectory: PathBuf,

    /// Number of structures to extract
    #[arg(short, default_value_t = 10)]
    n: usize,

    /// Leading frames to discard
    #[arg(long, default_value_t = 1000)]
    skip: usize,

    /// Prefix of the generated workflow names
    #[arg(long, default_value = "sampled_")]
    name: String,

    /// Engine command
    #[arg(long, default_value = DEFAULT_SIMULATION_COMMAND)]
    simulation_command: String,

    #[arg(long, default_value_t = DEFAULT_WALL_TIME)]
    wall_time: u64,

    #[arg(short, long, default_value = "runs")]
    workdir: PathBuf,

    #[arg(short, long, default_value_t = 4)]
    threads: usize,

    /// Only build and save the graphs
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args, Debug)]
struct PressureArgs {
    #[arg(long)]
    outcar: PathBuf,

    /// Trailing fraction of the series to average
    #[arg(long, default_value_t = 0.5)]
    fraction: f64,
}

// --- Terminal Guard (RAII) ---

struct TuiContext {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
}

impl TuiContext {
    fn new() -> Result<Self> {
        enable_raw_mode().context("Failed to enable raw mode")?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)
            .context("Failed to setup terminal alternate screen")?;
        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend).context("Failed to create terminal backend")?;
        Ok(Self { terminal })
    }
}

impl Drop for TuiContext {
    fn drop(&mut self) {
        // Best-effort restoration of terminal state
        let _ = disable_raw_mode();
        let _ = execute!(
            self.terminal.backend_mut(),
            LeaveAlternateScreen,
            DisableMouseCapture
        );
        let _ = self.terminal.show_cursor();
    }
}

// --- Initialization Helpers ---

fn setup_panic_hook() {
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        // Forcefully restore terminal before printing panic
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen, DisableMouseCapture);
        original_hook(panic_info);
    }));
}

/// Fails early when the engine executable cannot be found in PATH.
fn check_engine(command: &str) -> Result<()> {
    let program = command
        .split_whitespace()
        .next()
        .ok_or_else(|| anyhow!("Empty simulation command"))?;
    let program = Path::new(program);
    if program.components().count() > 1 {
        return if program.exists() {
            Ok(())
        } else {
            Err(anyhow!("Engine executable {:?} does not exist", program))
        };
    }
    let found = std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false);
    if found {
        Ok(())
    } else {
        Err(anyhow!(
            "Dependency Check Failed: '{}' not found in PATH.\n\
             Set 'simulation_command' to the engine executable or a wrapper script.",
            program.display()
        ))
    }
}

fn init_thread_pool(threads: usize) {
    if let Err(e) = rayon::ThreadPoolBuilder::new().num_threads(threads).build_global() {
        warn!("Thread pool already initialised: {}", e);
    }
}

fn save_graph(workdir: &Path, graph: &JobGraph) -> Result<()> {
    let dir = workdir.join(&graph.name);
    fs::create_dir_all(&dir).with_context(|| format!("Failed to create {:?}", dir))?;
    let path = dir.join("graph.json");
    let body = serde_json::to_string_pretty(graph).context("Failed to serialize graph")?;
    fs::write(&path, body).with_context(|| format!("Failed to write {:?}", path))
}

fn print_summary(reports: &[GraphReport]) {
    for r in reports {
        match &r.outcome {
            ChainOutcome::Converged(res) | ChainOutcome::BudgetExhausted(res) => println!(
                "{}: {} after {} decisions, P = {:.4} (density_calculated = {})",
                r.name,
                r.outcome.label(),
                r.decisions(),
                res.pressure,
                res.density_calculated
            ),
            ChainOutcome::Completed => println!("{}: completed {} units", r.name, r.units_run),
            ChainOutcome::Failed { unit, last_state, reason } => {
                println!("{}: FAILED in {}: {}", r.name, unit, reason);
                if let Some(state) = last_state {
                    println!(
                        "  last state: spawn_count = {}, working pressure = {:.4}",
                        state.spawn_count, state.initial_pressure
                    );
                }
            }
        }
    }
}

// --- Subcommands ---

fn cmd_run(args: RunArgs, quiet: bool) -> Result<bool> {
    let mut config = DensityConfig::load(&args.config)?;
    if let Some(t) = args.threshold {
        config.pressure_threshold = t;
    }
    if let Some(m) = args.max_spawns {
        config.max_spawns = m;
    }

    check_engine(&config.simulation_command)?;
    let graph = density_workflow(&config, &RandomPacker::default())?;
    let initial_state = config.initial_state()?;
    save_graph(&args.workdir, &graph)?;

    let simulator: Arc<dyn MdSimulator> = Arc::new(ExternalSimulator::new());
    let mut executor = LocalExecutor::new(simulator, &args.workdir);
    if let Some(path) = &config.result_sink {
        let sink: Arc<dyn ResultSink> = Arc::new(JsonLinesSink::open(path)?);
        executor = executor.with_sink(sink);
    }

    init_thread_pool(args.threads);

    let reports = if args.monitor {
        run_with_monitor(executor, vec![graph], initial_state)?
    } else {
        info!("Running chain '{}' in {:?}", graph.name, args.workdir);
        vec![executor.run(graph)]
    };

    for r in &reports {
        save_graph(&args.workdir, &r.graph)?;
    }
    if !quiet {
        print_summary(&reports);
    }
    Ok(reports.iter().all(|r| !matches!(r.outcome, ChainOutcome::Failed { .. })))
}

fn cmd_sample(args: SampleArgs, quiet: bool) -> Result<bool> {
    let settings = RunSettings {
        wall_time: args.wall_time,
        simulation_command: args.simulation_command.clone(),
        ..RunSettings::default()
    };
    let sampler = StructureSampler::new(args.n, args.skip);
    let graphs = structure_sampler_workflows(&args.trajectory, sampler, &args.name, &settings)?;
    for g in &graphs {
        save_graph(&args.workdir, g)?;
    }
    if args.dry_run {
        println!("Built {} graphs under {:?}", graphs.len(), args.workdir);
        return Ok(true);
    }

    check_engine(&settings.simulation_command)?;
    init_thread_pool(args.threads);
    let simulator: Arc<dyn MdSimulator> = Arc::new(ExternalSimulator::new());
    let executor = LocalExecutor::new(simulator, &args.workdir);
    let reports = executor.run_all(graphs);
    if !quiet {
        print_summary(&reports);
    }
    Ok(reports.iter().all(|r| !matches!(r.outcome, ChainOutcome::Failed { .. })))
}

fn cmd_pressure(args: PressureArgs) -> Result<bool> {
    let sample = PressureSampler::new(args.fraction)?.sample(&args.outcar)?;
    println!(
        "{}",
        serde_json::json!({
            "pressure": sample.value,
            "samples_used": sample.samples_used,
            "avg_pres": sample.report().avg_pres,
        })
    );
    Ok(true)
}

fn run_with_monitor(executor: LocalExecutor, graphs: Vec<JobGraph>, settings: CycleState) -> Result<Vec<GraphReport>> {
    let mut tui = TuiContext::new().context("Failed to initialize TUI")?;
    let mut app = AppState::new(settings);

    let (tx, rx) = unbounded();
    app.set_channel(rx);
    let executor = executor.with_events(tx);

    let worker = thread::Builder::new()
        .name("Chain-Worker".to_string())
        .spawn(move || executor.run_all(graphs))
        .context("Failed to spawn worker thread")?;

    // Event Loop
    let tick_rate = Duration::from_millis(50); // 20 FPS
    let mut last_tick = Instant::now();

    while !app.should_quit {
        tui.terminal.draw(|f| ui::draw(f, &mut app))?;

        let timeout = tick_rate.saturating_sub(last_tick.elapsed());
        if crossterm::event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == event::KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char(c) => app.on_key(c),
                        KeyCode::Esc => app.should_quit = true,
                        _ => {}
                    }
                }
            }
        }

        if last_tick.elapsed() >= tick_rate {
            app.tick();
            last_tick = Instant::now();
        }
    }

    drop(tui);
    if !app.all_settled() {
        eprintln!("Monitor closed; waiting for running units to finish...");
    }
    worker.join().map_err(|_| anyhow!("Worker thread panicked"))
}

// --- Main ---

fn main() -> Result<()> {
    setup_panic_hook();
    let Cli { verbose, quiet, log_file, command } = Cli::parse();

    let monitor = matches!(&command, Command::Run(r) if r.monitor);
    setup_logging(verbose, quiet, log_file, !monitor)?;

    let ok = match command {
        Command::Run(args) => cmd_run(args, quiet)?,
        Command::Sample(args) => cmd_sample(args, quiet)?,
        Command::Pressure(args) => cmd_pressure(args)?,
    };

    if !ok {
        bail!("One or more chains failed");
    }
    Ok(())
}
