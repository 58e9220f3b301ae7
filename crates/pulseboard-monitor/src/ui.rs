use pulseboard_core::health::WorkerStatus;
use pulseboard_core::metrics::{latest_latency, BackpressureSeries, MetricBucket};
use pulseboard_core::{QueueStatus, TaskDetail, TaskState};
use pulseboard_monitor::poller::PollSnapshot;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Sparkline, Table, TableState, Wrap},
    Frame,
};

use crate::app::{App, View};
use crate::theme::{theme, Theme};

pub fn render_ui(frame: &mut Frame, app: &App) {
    let size = frame.size();
    let theme = theme();
    let live = app.live();
    let banner = if live.is_connected() { 0 } else { 1 };
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Length(banner),
            Constraint::Min(0),
        ])
        .split(size);

    frame.render_widget(render_header(app, theme, size.width), layout[0]);
    if banner > 0 {
        let text = match live.last_error.as_deref() {
            Some(err) => format!("Connection Lost: {}", ellipsize(err, size.width as usize)),
            None => "Connection Lost: live queue updates paused".to_string(),
        };
        frame.render_widget(
            Paragraph::new(Line::from(Span::styled(
                text,
                Style::default()
                    .fg(theme.critical)
                    .add_modifier(Modifier::BOLD),
            )))
            .style(Style::default().bg(theme.bg)),
            layout[1],
        );
    }

    match app.view {
        View::Dashboard => render_dashboard(frame, app, theme, layout[2]),
        View::Tasks => render_tasks(frame, app, theme, layout[2]),
    }
    if app.delete_dialog.is_open() {
        render_delete_dialog(frame, app, theme);
    }
    if app.help_open {
        render_help_overlay(frame, theme);
    }
}

fn panel(title: &str, theme: Theme) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme.border))
        .style(Style::default().bg(theme.surface))
        .title(Span::styled(
            title.to_string(),
            Style::default()
                .fg(theme.title)
                .add_modifier(Modifier::BOLD),
        ))
}

fn text_panel(lines: Vec<Line<'static>>, title: &str, theme: Theme) -> Paragraph<'static> {
    Paragraph::new(Text::from(lines))
        .style(Style::default().fg(theme.text).bg(theme.surface))
        .block(panel(title, theme))
        .wrap(Wrap { trim: false })
}

fn muted(text: impl Into<String>, theme: Theme) -> Line<'static> {
    Line::from(Span::styled(text.into(), Style::default().fg(theme.muted)))
}

fn render_header(app: &App, theme: Theme, width: u16) -> Paragraph<'static> {
    let live = app.live();
    let inner_width = width.saturating_sub(4) as usize;
    let mut spans = vec![
        Span::styled(
            format!("{}  ", app.view.title()),
            Style::default().fg(theme.accent),
        ),
        Span::styled(
            format!("Live: {}", live.connection_label()),
            Style::default().fg(theme.connection(live.connection)),
        ),
    ];
    if let Some(at) = live.last_event_at {
        spans.push(Span::styled(
            format!("  Last update: {}", at.format("%H:%M:%S")),
            Style::default().fg(theme.muted),
        ));
    }
    if let Some(provider) = app.provider_status() {
        let badge = provider.badge();
        spans.push(Span::styled(
            format!("  {}", badge.label()),
            Style::default()
                .fg(theme.provider(badge))
                .add_modifier(Modifier::BOLD),
        ));
        let note = provider.message.clone().or_else(|| provider.detail_line());
        if let Some(note) = note {
            spans.push(Span::styled(
                format!(" ({})", ellipsize(&note, 40)),
                Style::default().fg(theme.muted),
            ));
        }
    }

    let action = match app.status_note.as_deref() {
        Some(note) => format!("Last Action: {note}"),
        None => "Last Action: ready (Tab switch view, r refresh, ? help)".to_string(),
    };

    Paragraph::new(Text::from(vec![
        Line::from(spans),
        muted(ellipsize(&action, inner_width.max(12)), theme),
    ]))
    .style(Style::default().fg(theme.text).bg(theme.bg))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(theme.border))
            .style(Style::default().bg(theme.bg))
            .title(Span::styled(
                "Pulseboard",
                Style::default()
                    .fg(theme.title)
                    .add_modifier(Modifier::BOLD),
            )),
    )
}

fn render_dashboard(frame: &mut Frame, app: &App, theme: Theme, area: Rect) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);
    let top = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(rows[0]);
    let bottom = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(40),
            Constraint::Percentage(30),
            Constraint::Percentage(30),
        ])
        .split(rows[1]);

    let live = app.live();
    frame.render_widget(
        text_panel(queue_lines(live.queue_status.as_ref(), theme), "Queues", theme),
        top[0],
    );
    frame.render_widget(
        text_panel(worker_lines(&app.workers.snapshot(), theme), "Workers", theme),
        top[1],
    );
    render_throughput(frame, &app.throughput.snapshot(), theme, bottom[0]);
    frame.render_widget(
        text_panel(latency_lines(&app.latency.snapshot(), theme), "Latency", theme),
        bottom[1],
    );
    frame.render_widget(
        text_panel(
            backpressure_lines(&app.backpressure.snapshot(), theme),
            "Backpressure",
            theme,
        ),
        bottom[2],
    );
}

fn queue_lines(status: Option<&QueueStatus>, theme: Theme) -> Vec<Line<'static>> {
    let Some(status) = status else {
        return vec![muted("Waiting for live queue status...", theme)];
    };
    let mut lines = status
        .queues
        .entries()
        .into_iter()
        .map(|(name, depth)| {
            let color = if name == "dlq" && depth > 0 {
                theme.critical
            } else {
                theme.text
            };
            Line::from(vec![
                Span::styled(format!("{name:<10}"), Style::default().fg(theme.muted)),
                Span::styled(depth.to_string(), Style::default().fg(color)),
            ])
        })
        .collect::<Vec<_>>();
    lines.push(muted(format!("total     {}", status.queues.total()), theme));
    lines.push(Line::from(""));
    let states = TaskState::ALL
        .iter()
        .map(|state| {
            Span::styled(
                format!("{} {}  ", state.as_str(), status.state_count(*state)),
                Style::default().fg(theme.task_state(*state)),
            )
        })
        .collect::<Vec<_>>();
    lines.push(Line::from(states));
    lines.push(Line::from(format!(
        "Retry ratio: {}",
        status.retry_ratio_label()
    )));
    lines
}

fn snapshot_status<T>(snapshot: &PollSnapshot<T>, theme: Theme) -> Option<Line<'static>> {
    if snapshot.is_initial_load() {
        return Some(muted("Loading...", theme));
    }
    snapshot.last_error.as_ref().map(|err| {
        Line::from(Span::styled(
            format!("Error: {err}"),
            Style::default().fg(theme.critical),
        ))
    })
}

fn worker_lines(snapshot: &PollSnapshot<WorkerStatus>, theme: Theme) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    if let Some(status) = snapshot_status(snapshot, theme) {
        lines.push(status);
    }
    let Some(workers) = snapshot.data.as_deref() else {
        if lines.is_empty() {
            lines.push(muted("Worker health is polled while live", theme));
        }
        return lines;
    };
    let overall = workers.overall_health();
    lines.push(Line::from(vec![
        Span::raw("Overall: "),
        Span::styled(
            overall.label().to_string(),
            Style::default()
                .fg(theme.worker(overall))
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!(
                "  {}/{} healthy, {} stale",
                workers.healthy_workers, workers.total_workers, workers.stale_workers
            ),
            Style::default().fg(theme.muted),
        ),
    ]));
    for worker in &workers.worker_details {
        let health = worker.health();
        lines.push(Line::from(vec![
            Span::styled(
                format!("{:<18}", ellipsize(worker.display_name(), 18)),
                Style::default().fg(theme.text),
            ),
            Span::styled(
                format!("{:<10}", health.label()),
                Style::default().fg(theme.worker(health)),
            ),
            Span::styled(worker.heartbeat_label(), Style::default().fg(theme.muted)),
            Span::styled(
                format!("  breaker {}", worker.circuit_breaker.state.as_str()),
                Style::default().fg(theme.muted),
            ),
        ]));
    }
    lines
}

fn render_throughput(
    frame: &mut Frame,
    snapshot: &PollSnapshot<Vec<MetricBucket>>,
    theme: Theme,
    area: Rect,
) {
    let block = panel("Throughput", theme);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let split = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(2), Constraint::Min(0)])
        .split(inner);

    let mut lines = Vec::new();
    if let Some(status) = snapshot_status(snapshot, theme) {
        lines.push(status);
    }
    let buckets = snapshot.data.as_deref().map(Vec::as_slice).unwrap_or_default();
    if let Some(last) = buckets.last() {
        lines.push(Line::from(vec![
            Span::styled(
                format!("created {} ", last.created_count),
                Style::default().fg(theme.info),
            ),
            Span::styled(
                format!("completed {} ", last.completed_count),
                Style::default().fg(theme.ok),
            ),
            Span::styled(
                format!("failed {}", last.failed_count),
                Style::default().fg(theme.warn),
            ),
        ]));
    } else if lines.is_empty() {
        lines.push(muted("No metrics in window", theme));
    }
    frame.render_widget(
        Paragraph::new(Text::from(lines)).style(Style::default().fg(theme.text).bg(theme.surface)),
        split[0],
    );

    let width = split[1].width as usize;
    let completed = buckets
        .iter()
        .skip(buckets.len().saturating_sub(width))
        .map(|bucket| bucket.completed_count)
        .collect::<Vec<_>>();
    frame.render_widget(
        Sparkline::default()
            .data(&completed)
            .style(Style::default().fg(theme.accent).bg(theme.surface)),
        split[1],
    );
}

fn latency_lines(snapshot: &PollSnapshot<Vec<MetricBucket>>, theme: Theme) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    if let Some(status) = snapshot_status(snapshot, theme) {
        lines.push(status);
    }
    let latest = snapshot.data.as_deref().and_then(|buckets| latest_latency(buckets));
    let Some(bucket) = latest else {
        if lines.is_empty() {
            lines.push(muted("No latency samples", theme));
        }
        return lines;
    };
    for (label, value) in [("p50", bucket.p50), ("p95", bucket.p95), ("p99", bucket.p99)] {
        let value = value
            .map(|secs| format!("{secs:.2}s"))
            .unwrap_or_else(|| "N/A".to_string());
        lines.push(Line::from(vec![
            Span::styled(format!("{label:<5}"), Style::default().fg(theme.muted)),
            Span::raw(value),
        ]));
    }
    lines.push(muted(
        format!("at {}", bucket.timestamp.format("%H:%M UTC")),
        theme,
    ));
    lines
}

fn backpressure_lines(
    snapshot: &PollSnapshot<BackpressureSeries>,
    theme: Theme,
) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    if let Some(status) = snapshot_status(snapshot, theme) {
        lines.push(status);
    }
    let Some(series) = snapshot.data.as_deref() else {
        return lines;
    };
    let summary = series.summary;
    lines.push(Line::from(format!("Backlog: {}", series.current_backlog())));
    lines.push(Line::from(Span::styled(
        format!("{} {}", summary.direction.arrow(), summary.label),
        Style::default()
            .fg(theme.trend(summary.label))
            .add_modifier(Modifier::BOLD),
    )));
    lines.push(muted(format!("{:+.1} tasks/min", summary.trend_rate), theme));
    lines
}

fn render_tasks(frame: &mut Frame, app: &App, theme: Theme, area: Rect) {
    let detail_height = if app.details.expanded_id().is_some() {
        Constraint::Percentage(45)
    } else {
        Constraint::Length(0)
    };
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(5),
            Constraint::Length(2),
            detail_height,
        ])
        .split(area);

    let filter = app.tasks.filter();
    let search = match app.search_draft.as_deref() {
        Some(draft) => format!("/{draft}_"),
        None if filter.task_id_substring.is_empty() => "-".to_string(),
        None => filter.task_id_substring.clone(),
    };
    let filter_line = Line::from(vec![
        Span::styled("Task ID: ", Style::default().fg(theme.muted)),
        Span::styled(search, Style::default().fg(theme.accent)),
        Span::styled("  Status: ", Style::default().fg(theme.muted)),
        Span::raw(filter.status.as_param().to_string()),
        Span::styled("  Type: ", Style::default().fg(theme.muted)),
        Span::raw(filter.task_type.as_param().to_string()),
    ]);
    frame.render_widget(
        Paragraph::new(filter_line)
            .style(Style::default().fg(theme.text).bg(theme.surface))
            .block(panel("Filters", theme)),
        layout[0],
    );

    render_task_table(frame, app, theme, layout[1]);

    let controls = app.tasks.controls();
    let mut footer = Vec::new();
    if let Some(err) = app.tasks.error() {
        footer.push(Span::styled(
            format!("Error: {err}  "),
            Style::default().fg(theme.critical),
        ));
    }
    if let Some(label) = app.tasks.pagination_label() {
        footer.push(Span::styled(label, Style::default().fg(theme.muted)));
    }
    if controls.visible {
        let style = |enabled: bool| {
            Style::default().fg(if enabled { theme.accent } else { theme.border })
        };
        footer.push(Span::styled("  < prev", style(controls.previous_enabled)));
        footer.push(Span::styled("  next >", style(controls.next_enabled)));
    }
    if app.tasks.is_loading() && !app.tasks.is_initial_load() {
        footer.push(Span::styled("  updating...", Style::default().fg(theme.accent)));
    }
    let link = Line::from(vec![
        Span::styled("Link: ", Style::default().fg(theme.muted)),
        Span::styled(app.tasks.view_url().to_string(), Style::default().fg(theme.text)),
    ]);
    frame.render_widget(
        Paragraph::new(vec![Line::from(footer), link]).style(Style::default().bg(theme.bg)),
        layout[2],
    );

    if app.details.expanded_id().is_some() {
        let lines = match app.details.detail() {
            Some(detail) => detail_lines(detail, theme),
            None if app.details.is_loading() => vec![muted("Loading...", theme)],
            None => vec![Line::from(Span::styled(
                format!(
                    "Failed to load task: {}",
                    app.details.error().unwrap_or("unknown error")
                ),
                Style::default().fg(theme.critical),
            ))],
        };
        frame.render_widget(text_panel(lines, "Task Detail", theme), layout[3]);
    }
}

fn render_task_table(frame: &mut Frame, app: &App, theme: Theme, area: Rect) {
    let tasks = app.visible_tasks();
    if tasks.is_empty() {
        let message = if app.tasks.is_initial_load() {
            "Loading tasks..."
        } else {
            "No tasks match the current filters."
        };
        frame.render_widget(text_panel(vec![muted(message, theme)], "Tasks", theme), area);
        return;
    }

    let header = Row::new(vec!["Task ID", "Type", "State", "Created", "Duration"])
        .style(Style::default().fg(theme.muted).add_modifier(Modifier::BOLD));
    let rows = tasks.iter().map(|task| {
        let marker = if app.details.expanded_id() == Some(task.task_id.as_str()) {
            "v "
        } else {
            "> "
        };
        Row::new(vec![
            Cell::from(format!("{marker}{}", ellipsize(&task.task_id, 36))),
            Cell::from(task.task_type().to_string()),
            Cell::from(Span::styled(
                task.state.as_str().to_string(),
                Style::default().fg(theme.task_state(task.state)),
            )),
            Cell::from(task.created_at.format("%Y-%m-%d %H:%M:%S").to_string()),
            Cell::from(task.duration_label()),
        ])
    });
    let table = Table::new(
        rows,
        [
            Constraint::Min(20),
            Constraint::Length(10),
            Constraint::Length(10),
            Constraint::Length(20),
            Constraint::Length(9),
        ],
    )
    .header(header)
    .style(Style::default().fg(theme.text).bg(theme.surface))
    .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
    .block(panel("Tasks", theme));

    let mut state = TableState::default();
    state.select(Some(app.selected.min(tasks.len() - 1)));
    frame.render_stateful_widget(table, area, &mut state);
}

fn detail_lines(detail: &TaskDetail, theme: Theme) -> Vec<Line<'static>> {
    let label = |text: &str| Span::styled(format!("{text:<14}"), Style::default().fg(theme.muted));
    let summary = &detail.summary;
    let mut lines = vec![
        Line::from(vec![label("Task"), Span::raw(summary.task_id.clone())]),
        Line::from(vec![
            label("State"),
            Span::styled(
                summary.state.as_str().to_string(),
                Style::default().fg(theme.task_state(summary.state)),
            ),
        ]),
        Line::from(vec![
            label("Retries"),
            Span::raw(format!("{}/{}", detail.retry_count, detail.max_retries)),
        ]),
        Line::from(vec![
            label("Content"),
            Span::raw(format!("{} chars", detail.content_len())),
        ]),
    ];
    if let Some(retry_after) = detail.retry_after {
        lines.push(Line::from(vec![
            label("Retry after"),
            Span::raw(retry_after.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
        ]));
    }
    if let Some(err) = detail.last_error.as_deref() {
        let kind = detail.error_type.as_deref().unwrap_or("error");
        lines.push(Line::from(vec![
            label("Last error"),
            Span::styled(format!("[{kind}] {err}"), Style::default().fg(theme.critical)),
        ]));
    }
    if !detail.state_history.is_empty() {
        let history = detail
            .state_history
            .iter()
            .map(|step| format!("{} @ {}", step.state, step.timestamp.format("%H:%M:%S")))
            .collect::<Vec<_>>()
            .join(" -> ");
        lines.push(Line::from(vec![label("History"), Span::raw(history)]));
    }
    if let Some(errors) = detail.error_history_json() {
        lines.push(Line::from(label("Error history")));
        lines.extend(errors.lines().map(|line| muted(line.to_string(), theme)));
    }
    if let Some(result) = detail.visible_result() {
        lines.push(Line::from(vec![
            label("Result"),
            Span::raw(format!("{} chars", detail.result_len())),
        ]));
        lines.extend(result.lines().map(|line| Line::from(line.to_string())));
    }
    lines
}

fn render_delete_dialog(frame: &mut Frame, app: &App, theme: Theme) {
    let Some(target) = app.delete_dialog.target() else {
        return;
    };
    let area = centered_rect(50, 30, frame.size());
    let mut lines = vec![
        Line::from(format!("Delete task {}?", target.task_id)),
        muted("This removes the task and its stored content.", theme),
        Line::from(""),
    ];
    if app.delete_dialog.is_deleting() {
        lines.push(muted("Deleting...", theme));
    } else if let Some(err) = app.delete_dialog.error() {
        lines.push(Line::from(Span::styled(
            format!("Failed to delete task: {err}"),
            Style::default().fg(theme.critical),
        )));
    }
    lines.push(Line::from(Span::styled(
        "y/Enter confirm   n/Esc cancel",
        Style::default().fg(theme.accent),
    )));
    frame.render_widget(Clear, area);
    frame.render_widget(text_panel(lines, "Confirm Delete", theme), area);
}

fn render_help_overlay(frame: &mut Frame, theme: Theme) {
    let area = centered_rect(70, 70, frame.size());
    let heading = |text: &str| {
        Line::from(Span::styled(
            text.to_string(),
            Style::default()
                .fg(theme.accent)
                .add_modifier(Modifier::BOLD),
        ))
    };
    let lines = vec![
        heading("Navigation"),
        Line::from("  Tab      switch view"),
        Line::from("  1/2      dashboard / task history"),
        Line::from("  r        refresh metrics and tasks"),
        Line::from(""),
        heading("Task History"),
        Line::from("  j/k      select task"),
        Line::from("  Enter    expand or collapse detail"),
        Line::from("  /        search by task id"),
        Line::from("  s / t    cycle status / type filter"),
        Line::from("  n/p      next / previous page"),
        Line::from("  d        delete selected task"),
        Line::from("  Link     footer link reopens this view via --view-url"),
        Line::from(""),
        heading("Session & Exit"),
        Line::from("  ? or F1  toggle this help"),
        Line::from("  Esc      close help"),
        Line::from("  q        quit"),
    ];
    frame.render_widget(Clear, area);
    frame.render_widget(text_panel(lines, "Help", theme), area);
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100u16.saturating_sub(percent_y)) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100u16.saturating_sub(percent_y)) / 2),
        ])
        .split(area);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100u16.saturating_sub(percent_x)) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100u16.saturating_sub(percent_x)) / 2),
        ])
        .split(vertical[1])[1]
}

fn ellipsize(input: &str, max: usize) -> String {
    if input.chars().count() <= max {
        return input.to_string();
    }
    if max <= 3 {
        return "...".chars().take(max).collect();
    }
    let prefix: String = input.chars().take(max - 3).collect();
    format!("{prefix}...")
}
