use ratatui::{
    prelude::*,
    widgets::{
        Block, Borders, BorderType, Paragraph, Tabs, Gauge,
        Sparkline, Table, Row, Cell, Wrap, ListItem, List,
    },
    style::{Color, Style, Modifier},
    text::{Line, Span},
};
use crate::interface::state::{AppState, AppMode, ChainView, WorkerStatus};

// --- Color Palette ---
const COL_FG: Color = Color::White;
const COL_HIGHLIGHT: Color = Color::Yellow;
const COL_ACCENT: Color = Color::Cyan;
const COL_SUCCESS: Color = Color::Green;
const COL_FAIL: Color = Color::Red;
const COL_HEADER: Color = Color::Magenta;

pub fn draw(f: &mut Frame, app: &mut AppState) {
    if f.area().width < 40 || f.area().height < 10 {
        let p = Paragraph::new("Terminal too small.")
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL));
        f.render_widget(p, f.area());
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(f.area());

    draw_header(f, app, chunks[0]);

    match app.mode {
        AppMode::Dashboard => draw_dashboard(f, app, chunks[1]),
        AppMode::Cycles => draw_cycles(f, app, chunks[1]),
        AppMode::Help => draw_help(f, chunks[1]),
    }

    draw_footer(f, app, chunks[2]);
}

fn draw_header(f: &mut Frame, app: &AppState, area: Rect) {
    let titles = vec![" 1:Chains ", " 2:Cycles ", " ?:Help "];
    let idx = match app.mode {
        AppMode::Dashboard => 0,
        AppMode::Cycles => 1,
        AppMode::Help => 2,
    };

    let tabs = Tabs::new(titles)
        .block(Block::default().borders(Borders::BOTTOM))
        .select(idx)
        .highlight_style(Style::default().fg(COL_HIGHLIGHT).add_modifier(Modifier::BOLD));

    f.render_widget(tabs, area);
}

fn draw_footer(f: &mut Frame, app: &AppState, area: Rect) {
    let status_str = match app.worker_status {
        WorkerStatus::Running => "RUNNING",
        WorkerStatus::Idle => "IDLE",
        WorkerStatus::Starting => "STARTING",
        WorkerStatus::Finished => "DONE",
        WorkerStatus::Error => "ERROR",
    };

    let color = match app.worker_status {
        WorkerStatus::Running => COL_SUCCESS,
        WorkerStatus::Error => COL_FAIL,
        _ => COL_FG,
    };

    let settled = app.chains.iter().filter(|c| c.outcome.is_some()).count();

    let text = Line::from(vec![
        Span::styled(format!(" STATUS: {:<8}", status_str), Style::default().fg(color).add_modifier(Modifier::BOLD)),
        Span::raw(" | "),
        Span::raw(format!("Chains: {}/{}", settled, app.chains.len())),
        Span::raw(" | "),
        Span::styled(format!("Elapsed: {:.0}s", app.start_time.elapsed().as_secs_f64()), Style::default().fg(COL_ACCENT)),
        Span::raw(" | [Q]uit [J/K]Select"),
    ]);

    let p = Paragraph::new(text)
        .style(Style::default().bg(Color::DarkGray).fg(Color::White));
    f.render_widget(p, area);
}

fn draw_dashboard(f: &mut Frame, app: &mut AppState, area: Rect) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(area);

    let left_rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(cols[0]);

    draw_chain_table(f, app, left_rows[0]);
    draw_pressure_chart(f, app, left_rows[1]);

    let right_rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(15), Constraint::Percentage(30)])
        .split(cols[1]);

    draw_logs(f, app, right_rows[0]);
    draw_gauges(f, app, right_rows[1]);
    draw_settings(f, app, right_rows[2]);
}

fn outcome_color(view: &ChainView) -> Color {
    match view.status_label() {
        "converged" => COL_SUCCESS,
        "failed" => COL_FAIL,
        "budget exhausted" => COL_HIGHLIGHT,
        _ => COL_FG,
    }
}

fn draw_chain_table(f: &mut Frame, app: &mut AppState, area: Rect) {
    let header_cells = ["Chain", "Status", "Units", "Spawns", "Last P"]
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(COL_HEADER)));
    let header = Row::new(header_cells).height(1).bottom_margin(1);

    if app.chains.is_empty() {
        f.render_widget(
            Paragraph::new("Waiting for the first chain...")
                .block(Block::default().borders(Borders::ALL).title(" Chains "))
                .alignment(Alignment::Center),
            area,
        );
        return;
    }

    let rows = app.chains.iter().map(|c| {
        let spawns = c.cycles.last().map(|r| r.spawn_count).unwrap_or(0);
        let cells = vec![
            Cell::from(c.name.clone()),
            Cell::from(c.status_label()).style(Style::default().fg(outcome_color(c))),
            Cell::from(format!("{}/{}", c.units_done, c.units_total)),
            Cell::from(spawns.to_string()),
            Cell::from(c.last_pressure.map(|p| format!("{:.3}", p)).unwrap_or_else(|| "-".into())),
        ];
        Row::new(cells).height(1)
    });

    let t = Table::new(rows, &[
        Constraint::Min(16),
        Constraint::Length(17),
        Constraint::Length(7),
        Constraint::Length(7),
        Constraint::Length(12),
    ])
    .header(header)
    .block(Block::default().borders(Borders::ALL).border_type(BorderType::Rounded).title(format!(" Chains ({}) ", app.chains.len())))
    .row_highlight_style(Style::default().add_modifier(Modifier::REVERSED));

    f.render_stateful_widget(t, area, &mut app.chain_state);
}

fn draw_pressure_chart(f: &mut Frame, app: &AppState, area: Rect) {
    let block = Block::default().title(" Pressure Convergence ").borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let Some(view) = app.selected_chain() else { return; };
    let telemetry = &view.telemetry;
    if telemetry.pressure_history.is_empty() {
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(inner);

    // Distance from target, normalised to the largest seen.
    let target = app.settings.target_pressure;
    let max_dev = telemetry.pressure_history.iter()
        .map(|(_, p)| (p - target).abs())
        .fold(0.0, f64::max)
        .max(1e-6);
    let width = inner.width as usize;
    let data: Vec<u64> = telemetry.pressure_history.iter()
        .rev()
        .take(width)
        .map(|(_, p)| (((p - target).abs() / max_dev) * 10.0) as u64)
        .collect();
    let data_rev: Vec<u64> = data.into_iter().rev().collect();

    let spark = Sparkline::default()
        .block(Block::default().title(format!("|P - target| ({})", view.name)).borders(Borders::NONE))
        .style(Style::default().fg(COL_ACCENT))
        .data(&data_rev);
    f.render_widget(spark, chunks[0]);

    let last = view.cycles.last();
    let text = vec![
        Line::from(vec![
            Span::styled("Pressure range: ", Style::default().fg(Color::Gray)),
            Span::raw(format!("{:.3} .. {:.3}", telemetry.min_pressure, telemetry.max_pressure)),
        ]),
        Line::from(vec![
            Span::styled("Last decision:  ", Style::default().fg(Color::Gray)),
            Span::styled(
                last.map(|r| r.decision.clone()).unwrap_or_else(|| "-".into()),
                Style::default().fg(COL_HIGHLIGHT),
            ),
        ]),
    ];
    f.render_widget(Paragraph::new(text).wrap(Wrap { trim: true }), chunks[1]);
}

fn draw_logs(f: &mut Frame, app: &AppState, area: Rect) {
    let block = Block::default().title(" System Log ").borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let items: Vec<ListItem> = app.logs.iter().rev().map(|line| {
        let style = if line.to_lowercase().contains("error") || line.contains("FAILED") || line.contains("failed") {
            Style::default().fg(COL_FAIL)
        } else if line.contains("converged") {
            Style::default().fg(COL_SUCCESS)
        } else {
            Style::default().fg(Color::Gray)
        };

        ListItem::new(Line::from(vec![
            Span::styled(">", Style::default().fg(Color::DarkGray)),
            Span::raw(" "),
            Span::raw(line),
        ])).style(style)
    }).collect();

    let list = List::new(items);
    f.render_widget(list, inner);
}

fn draw_gauges(f: &mut Frame, app: &AppState, area: Rect) {
    let block = Block::default().title(" Spawn Budget ").borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let max = app.settings.max_spawns.max(1);
    let used = app
        .selected_chain()
        .and_then(|c| c.cycles.last())
        .map(|r| r.spawn_count)
        .unwrap_or(0);
    let ratio = used as f64 / max as f64;
    let color = if ratio < 0.8 { COL_SUCCESS } else { COL_FAIL };

    let g = Gauge::default()
        .gauge_style(Style::default().fg(color).bg(Color::DarkGray))
        .ratio(ratio.clamp(0.0, 1.0))
        .label(format!("{}/{}", used, app.settings.max_spawns));

    f.render_widget(g, inner);
}

fn draw_settings(f: &mut Frame, app: &AppState, area: Rect) {
    let block = Block::default().borders(Borders::ALL).title(" Parameters ");
    let inner = block.inner(area);
    f.render_widget(block, area);

    let s = &app.settings;

    let kv = |k: &str, v: String| -> ListItem {
        ListItem::new(Line::from(vec![
            Span::styled(format!("{:<15}", k), Style::default().fg(COL_ACCENT)),
            Span::raw(v)
        ]))
    };

    let items = vec![
        kv("Temperature:", format!("{:.1} K", s.target_temperature)),
        kv("Target P:", format!("{:.3}", s.target_pressure)),
        kv("Threshold:", format!("{:.3}", s.pressure_threshold)),
        kv("Alpha/Beta:", format!("{:.1e} / {:.1e}", s.alpha, s.beta)),
        kv("MD steps:", s.settings.nsteps.to_string()),
        kv("Engine:", s.settings.simulation_command.clone()),
    ];

    f.render_widget(List::new(items), inner);
}

fn draw_cycles(f: &mut Frame, app: &AppState, area: Rect) {
    let header_cells = ["Unit", "Spawn", "P (raw)", "avg_pres", "V before", "V after", "Decision"]
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(COL_HEADER)));
    let header = Row::new(header_cells).height(1).bottom_margin(1);

    let Some(view) = app.selected_chain() else {
        f.render_widget(
            Paragraph::new("No chain selected.")
                .block(Block::default().borders(Borders::ALL).title(" Cycles "))
                .alignment(Alignment::Center),
            area,
        );
        return;
    };

    let fmt_opt = |v: Option<f64>| v.map(|x| format!("{:.3}", x)).unwrap_or_else(|| "-".into());
    let rows = view.cycles.iter().map(|r| {
        Row::new(vec![
            Cell::from(r.unit.clone()),
            Cell::from(r.spawn_count.to_string()),
            Cell::from(format!("{:.3}", r.pressure)),
            Cell::from(format!("{:.1}", r.avg_pres)),
            Cell::from(fmt_opt(r.volume_before)),
            Cell::from(fmt_opt(r.volume_after)),
            Cell::from(r.decision.clone()),
        ])
    });

    let t = Table::new(rows, &[
        Constraint::Min(16),
        Constraint::Length(6),
        Constraint::Length(10),
        Constraint::Length(10),
        Constraint::Length(11),
        Constraint::Length(11),
        Constraint::Length(18),
    ])
    .header(header)
    .block(Block::default().borders(Borders::ALL).title(format!(" Cycles: {} ", view.name)));

    f.render_widget(t, area);
}

fn draw_help(f: &mut Frame, area: Rect) {
    let text = vec![
        Line::from("1        chain overview"),
        Line::from("2        cycle history of the selected chain"),
        Line::from("j / k    select next / previous chain"),
        Line::from("q, Esc   quit (running engines finish in the background)"),
    ];
    let p = Paragraph::new(text)
        .block(Block::default().borders(Borders::ALL).title(" Help "))
        .wrap(Wrap { trim: true });
    f.render_widget(p, area);
}
