use std::collections::VecDeque;
use std::time::Instant;
use crossbeam_channel::{Receiver, TryRecvError};
use ratatui::widgets::TableState;

use crate::workflow::executor::ChainOutcome;
use crate::workflow::graph::UnitStatus;
use crate::workflow::sink::CycleRecord;
use crate::workflow::state::CycleState;
use crate::workflow::ChainEvent;

// --- Constants ---
const HISTORY_CAPACITY: usize = 1000;
const LOG_CAPACITY: usize = 200;

// --- Enums ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    Dashboard,
    Cycles,
    Help,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Idle,
    Starting,
    Running,
    Finished,
    Error,
}

// --- Telemetry ---

/// Pressure trace of one chain, one point per decision.
#[derive(Debug, Clone)]
pub struct Telemetry {
    pub pressure_history: VecDeque<(f64, f64)>, // (decision index, reported pressure)
    pub volume_history: VecDeque<(f64, f64)>,

    // Global Bounds for Chart Scaling
    pub min_pressure: f64,
    pub max_pressure: f64,
}

impl Telemetry {
    pub fn new() -> Self {
        Self {
            pressure_history: VecDeque::with_capacity(HISTORY_CAPACITY),
            volume_history: VecDeque::with_capacity(HISTORY_CAPACITY),
            min_pressure: f64::MAX,
            max_pressure: f64::MIN,
        }
    }

    pub fn ingest(&mut self, record: &CycleRecord) {
        if self.pressure_history.len() >= HISTORY_CAPACITY {
            self.pressure_history.pop_front();
        }
        if self.volume_history.len() >= HISTORY_CAPACITY {
            self.volume_history.pop_front();
        }

        let x = record.spawn_count as f64;
        self.min_pressure = self.min_pressure.min(record.avg_pres);
        self.max_pressure = self.max_pressure.max(record.avg_pres);
        // Zero range would collapse the chart axis
        if (self.max_pressure - self.min_pressure).abs() < 1e-6 {
            self.max_pressure += 1.0;
            self.min_pressure -= 1.0;
        }

        self.pressure_history.push_back((x, record.avg_pres));
        if let Some(v) = record.volume_after.or(record.volume_before) {
            self.volume_history.push_back((x, v));
        }
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the monitor knows about one chain.
#[derive(Debug, Clone)]
pub struct ChainView {
    pub name: String,
    pub units_total: usize,
    pub units_done: usize,
    pub current_unit: Option<String>,
    pub last_pressure: Option<f64>,
    pub cycles: Vec<CycleRecord>,
    pub outcome: Option<ChainOutcome>,
    pub telemetry: Telemetry,
}

impl ChainView {
    fn new(name: String, units_total: usize) -> Self {
        Self {
            name,
            units_total,
            units_done: 0,
            current_unit: None,
            last_pressure: None,
            cycles: Vec::new(),
            outcome: None,
            telemetry: Telemetry::new(),
        }
    }

    pub fn status_label(&self) -> &'static str {
        match (&self.outcome, &self.current_unit) {
            (Some(o), _) => o.label(),
            (None, Some(_)) => "running",
            (None, None) => "queued",
        }
    }
}

// --- The Master State ---

pub struct AppState {
    // System
    pub should_quit: bool,
    pub mode: AppMode,
    /// Chain settings shown in the header.
    pub settings: CycleState,

    // Worker
    pub rx: Option<Receiver<ChainEvent>>,
    pub worker_status: WorkerStatus,
    pub start_time: Instant,

    pub chains: Vec<ChainView>,
    pub logs: VecDeque<String>,

    // UI Elements
    pub chain_state: TableState,
}

impl AppState {
    pub fn new(settings: CycleState) -> Self {
        let mut chain_state = TableState::default();
        chain_state.select(Some(0));

        Self {
            should_quit: false,
            mode: AppMode::Dashboard,
            settings,
            rx: None,
            worker_status: WorkerStatus::Idle,
            start_time: Instant::now(),
            chains: Vec::new(),
            logs: VecDeque::with_capacity(LOG_CAPACITY),
            chain_state,
        }
    }

    pub fn set_channel(&mut self, rx: Receiver<ChainEvent>) {
        self.rx = Some(rx);
        self.worker_status = WorkerStatus::Starting;
        self.start_time = Instant::now();
    }

    pub fn tick(&mut self) {
        if let Some(rx) = self.rx.clone() {
            for _ in 0..100 {
                match rx.try_recv() {
                    Ok(evt) => self.handle_event(evt),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        if self.worker_status != WorkerStatus::Error {
                            self.worker_status = WorkerStatus::Finished;
                        }
                        self.log("Worker disconnected.");
                        self.rx = None;
                        break;
                    }
                }
            }
        }
    }

    pub fn handle_event(&mut self, event: ChainEvent) {
        match event {
            ChainEvent::Log(msg) => self.log(msg),

            ChainEvent::GraphStarted { chain, units } => {
                self.worker_status = WorkerStatus::Running;
                self.log(format!("{}: started ({} units)", chain, units));
                match self.chains.iter().position(|c| c.name == chain) {
                    Some(i) => self.chains[i].units_total = units,
                    None => self.chains.push(ChainView::new(chain, units)),
                }
            }

            ChainEvent::UnitStarted { chain, unit } => {
                if let Some(view) = self.chain_mut(&chain) {
                    view.current_unit = Some(unit);
                }
            }

            ChainEvent::UnitFinished { chain, unit, status } => {
                if status == UnitStatus::Failed {
                    self.log(format!("{}: unit {} failed", chain, unit));
                }
                if let Some(view) = self.chain_mut(&chain) {
                    view.units_done += 1;
                    view.current_unit = None;
                }
            }

            ChainEvent::PressureSampled { chain, pressure, .. } => {
                if let Some(view) = self.chain_mut(&chain) {
                    view.last_pressure = Some(pressure);
                }
            }

            ChainEvent::Decision(record) => {
                self.log(format!(
                    "{}: P = {:.3} at spawn {} -> {}",
                    record.chain, record.avg_pres, record.spawn_count, record.decision
                ));
                if let Some(view) = self.chain_mut(&record.chain) {
                    // A spawn appends one more unit to the graph.
                    if record.decision.starts_with("spawn") {
                        view.units_total += 1;
                    }
                    view.telemetry.ingest(&record);
                    view.cycles.push(record);
                }
            }

            ChainEvent::Finished { chain, outcome } => {
                if let ChainOutcome::Failed { reason, .. } = &outcome {
                    self.worker_status = WorkerStatus::Error;
                    self.log(format!("{}: FAILED: {}", chain, reason));
                } else {
                    self.log(format!("{}: {}", chain, outcome.label()));
                }
                if let Some(view) = self.chain_mut(&chain) {
                    view.outcome = Some(outcome);
                    view.current_unit = None;
                }
            }
        }
    }

    fn chain_mut(&mut self, name: &str) -> Option<&mut ChainView> {
        self.chains.iter_mut().find(|c| c.name == name)
    }

    pub fn selected_chain(&self) -> Option<&ChainView> {
        self.chain_state.selected().and_then(|i| self.chains.get(i))
    }

    pub fn all_settled(&self) -> bool {
        !self.chains.is_empty() && self.chains.iter().all(|c| c.outcome.is_some())
    }

    /// Logs a message to the internal buffer.
    pub fn log(&mut self, msg: impl Into<String>) {
        if self.logs.len() >= LOG_CAPACITY {
            self.logs.pop_front();
        }
        self.logs.push_back(msg.into());
    }

    // --- Input Handling ---

    pub fn on_key(&mut self, key: char) {
        match key {
            'q' => self.should_quit = true,
            '1' => self.mode = AppMode::Dashboard,
            '2' => self.mode = AppMode::Cycles,
            '?' => self.mode = AppMode::Help,
            'j' => self.select_next(),
            'k' => self.select_prev(),
            _ => {}
        }
    }

    fn select_next(&mut self) {
        if self.chains.is_empty() { return; }
        let i = match self.chain_state.selected() {
            Some(i) => if i >= self.chains.len() - 1 { 0 } else { i + 1 },
            None => 0,
        };
        self.chain_state.select(Some(i));
    }

    fn select_prev(&mut self) {
        if self.chains.is_empty() { return; }
        let i = match self.chain_state.selected() {
            Some(i) => if i == 0 { self.chains.len() - 1 } else { i - 1 },
            None => 0,
        };
        self.chain_state.select(Some(i));
    }
}
