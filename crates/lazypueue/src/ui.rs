use crate::theme::{self, status_color, status_icon};
use chrono::{DateTime, Local, Utc};
use lazypueue_core::app::{EditView, LogView, Mode, PendingConfirm};
use lazypueue_core::input::TextInput;
use lazypueue_core::selection::Row as TreeRow;
use lazypueue_core::{AppState, Group, Task, TaskStatus};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, TableState, Wrap},
    Frame,
};
use std::time::Instant;

/// Draw one frame and return how many task rows fit in the list.
pub fn render(f: &mut Frame, app: &AppState) -> usize {
    let area = f.size();
    let outer = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(3),
            Constraint::Length(1),
        ])
        .split(area);

    render_status_bar(f, app, outer[0]);
    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(outer[1]);
    let list_height = render_task_list(f, app, body[0]);
    render_details(f, app, body[1]);
    render_footer(f, app, outer[2]);

    match app.mode() {
        Mode::Normal => {}
        Mode::Input(input) => render_input(f, input, "Add task", area),
        Mode::Edit(view) => render_edit(f, view, area),
        Mode::Confirm(pending) => render_confirm(f, pending, area),
        Mode::Log(view) => render_log(f, view, area),
    }
    list_height
}

fn render_status_bar(f: &mut Frame, app: &AppState, area: Rect) {
    let snapshot = app.snapshot();
    let count = |wanted: fn(&TaskStatus) -> bool| {
        snapshot
            .tasks()
            .values()
            .filter(|task| wanted(&task.status))
            .count()
    };
    let running = count(|status| matches!(status, TaskStatus::Running));
    let queued = count(|status| matches!(status, TaskStatus::Queued));

    let filter = app.selection().filter();
    let mut filters = Vec::new();
    if filter.is_active() {
        filters.push(filter.status.label().to_string());
        if let Some(group) = &filter.group {
            filters.push(group.clone());
        }
    }

    let mut spans = vec![
        Span::styled(" lazypueue ", theme::HEADER_STYLE),
        Span::raw(format!("│ {} ", app.connection().label())),
        Span::raw(format!("│ {} groups ", snapshot.groups().len())),
        Span::raw(format!(
            "│ {running} running, {queued} queued, {} total ",
            snapshot.len()
        )),
    ];
    if !app.dispatcher().is_empty() {
        spans.push(Span::styled(
            format!("│ {} pending ", app.dispatcher().len()),
            Style::new().fg(theme::ACCENT),
        ));
    }
    if !filters.is_empty() {
        spans.push(Span::raw(format!("│ filter: {} ", filters.join("/"))));
    }
    f.render_widget(Paragraph::new(Line::from(spans)).style(theme::BAR_STYLE), area);
}

fn render_task_list(f: &mut Frame, app: &AppState, area: Rect) -> usize {
    let block = Block::default().borders(Borders::ALL).title("Tasks");
    let inner = block.inner(area);
    let snapshot = app.snapshot();
    let selection = app.selection();

    if selection.rows().is_empty() {
        f.render_widget(block, area);
        let message = if snapshot.is_empty() {
            "No tasks"
        } else {
            "No tasks match the filter"
        };
        f.render_widget(
            Paragraph::new(Span::styled(message, Style::new().fg(theme::MUTED))),
            inner,
        );
        return usize::from(inner.height.saturating_sub(1));
    }

    let rows: Vec<Row> = selection
        .rows()
        .iter()
        .enumerate()
        .map(|(index, row)| match row {
            TreeRow::Group(name) => {
                let folded = selection.is_collapsed(name);
                match snapshot.group(name) {
                    Some(group) => group_row(group, snapshot.tasks_in(name), folded),
                    None => Row::new(vec![Cell::from(""), Cell::from(name.clone())]),
                }
            }
            TreeRow::Task { id, .. } => match snapshot.task(*id) {
                Some(task) => task_row(task, app.dispatcher().has_pending_for(task.id))
                    .style(theme::zebra_row_style(index)),
                None => Row::new(vec![Cell::from(id.to_string())]),
            },
        })
        .collect();

    let header = Row::new(vec!["id", "status", "label", "command"]).style(theme::HEADER_STYLE);
    let table = Table::new(
        rows,
        [
            Constraint::Length(5),
            Constraint::Length(13),
            Constraint::Length(8),
            Constraint::Min(10),
        ],
    )
    .header(header)
    .block(block)
    .highlight_style(theme::SELECTED_STYLE)
    .highlight_symbol("> ");

    let mut state = TableState::default()
        .with_offset(selection.scroll())
        .with_selected(selection.cursor());
    f.render_stateful_widget(table, area, &mut state);
    usize::from(inner.height.saturating_sub(1))
}

fn group_row<'a>(
    group: &Group,
    tasks: impl Iterator<Item = &'a Task>,
    folded: bool,
) -> Row<'static> {
    let (total, running) = tasks.fold((0, 0), |(total, running), task| {
        (total + 1, running + usize::from(task.status == TaskStatus::Running))
    });
    let icon = if folded {
        theme::icons::FOLDED
    } else {
        theme::icons::OPEN
    };
    let state = if group.paused { "paused" } else { "active" };
    Row::new(vec![
        Cell::from(icon),
        Cell::from(state),
        Cell::from(group.name.clone()),
        Cell::from(format!(
            "{total} tasks, {running}/{} running",
            group.limit_label()
        )),
    ])
    .style(theme::GROUP_STYLE)
}

fn task_row(task: &Task, pending: bool) -> Row<'static> {
    let mut status_style = Style::new().fg(status_color(&task.status));
    if pending {
        status_style = status_style.add_modifier(Modifier::ITALIC);
    }
    Row::new(vec![
        Cell::from(format!("  {}", task.id)),
        Cell::from(Span::styled(
            format!("{} {}", status_icon(&task.status), task.status),
            status_style,
        )),
        Cell::from(task.label.clone().unwrap_or_default()),
        Cell::from(task.command.clone()),
    ])
}

fn render_details(f: &mut Frame, app: &AppState, area: Rect) {
    let block = Block::default().borders(Borders::ALL).title("Details");
    let Some(task) = app.selected_task() else {
        let group = app
            .selection()
            .selected_group()
            .and_then(|name| app.snapshot().group(name));
        let lines = match group {
            Some(group) => group_lines(group),
            None => vec![Line::from(Span::styled(
                "Nothing selected",
                Style::new().fg(theme::MUTED),
            ))],
        };
        f.render_widget(Paragraph::new(lines).block(block), area);
        return;
    };
    let lines = detail_lines(task, app.dispatcher().has_pending_for(task.id));
    f.render_widget(
        Paragraph::new(lines).block(block).wrap(Wrap { trim: false }),
        area,
    );
}

fn group_lines(group: &Group) -> Vec<Line<'static>> {
    let field = |name: &str, value: String| {
        Line::from(vec![
            Span::styled(format!("{name:<10}"), theme::HEADER_STYLE),
            Span::raw(value),
        ])
    };
    vec![
        field("group", group.name.clone()),
        field("state", if group.paused { "paused" } else { "active" }.to_string()),
        field("parallel", group.limit_label()),
    ]
}

fn detail_lines(task: &Task, pending: bool) -> Vec<Line<'static>> {
    let field = |name: &str, value: String| {
        Line::from(vec![
            Span::styled(format!("{name:<10}"), theme::HEADER_STYLE),
            Span::raw(value),
        ])
    };
    let optional = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".to_string());

    let mut status = task.status.to_string();
    if pending {
        status.push_str(" (command pending)");
    }
    vec![
        field("id", task.id.to_string()),
        Line::from(vec![
            Span::styled(format!("{:<10}", "status"), theme::HEADER_STYLE),
            Span::styled(
                format!("{} {status}", status_icon(&task.status)),
                Style::new().fg(status_color(&task.status)),
            ),
        ]),
        field("command", task.command.clone()),
        field("group", task.group.clone()),
        field("label", optional(&task.label)),
        field(
            "path",
            task.path
                .as_ref()
                .map_or_else(|| "-".to_string(), |path| path.display().to_string()),
        ),
        field("priority", task.priority.to_string()),
        field("start", format_time(task.start)),
        field("end", format_time(task.end)),
        field(
            "duration",
            task.duration(Utc::now())
                .map(format_duration)
                .unwrap_or_else(|| "-".to_string()),
        ),
        field(
            "exit code",
            task.exit_code
                .map(|code| code.to_string())
                .unwrap_or_else(|| "-".to_string()),
        ),
    ]
}

fn format_time(value: Option<DateTime<Utc>>) -> String {
    value
        .map(|time| time.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn format_duration(duration: chrono::Duration) -> String {
    let total = duration.num_seconds().max(0);
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}h {minutes:02}m {seconds:02}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}

fn render_footer(f: &mut Frame, app: &AppState, area: Rect) {
    let line = match app.note_at(Instant::now()) {
        Some(note) => Line::from(Span::styled(
            format!(" {}", note.text),
            theme::severity_style(note.severity),
        )),
        None => Line::from(Span::styled(hint(app.mode()), Style::new().fg(theme::MUTED))),
    };
    f.render_widget(Paragraph::new(line).style(theme::BAR_STYLE), area);
}

fn hint(mode: &Mode) -> &'static str {
    match mode {
        Mode::Normal => {
            " j/k move  h/l fold/open  space pause/resume  K kill  R restart  e edit  a add  \
             d remove  s/S stash/enqueue  p group  +/- parallel  f/tab filter  r refresh  q quit"
        }
        Mode::Input(_) => " enter submit  esc cancel",
        Mode::Edit(_) => " enter save  esc cancel and unlock",
        Mode::Confirm(_) => " y confirm  any other key cancels",
        Mode::Log(_) => " j/k scroll  g/G top/bottom  f follow  esc close",
    }
}

fn render_edit(f: &mut Frame, view: &EditView, area: Rect) {
    let title = format!("Edit task {}", view.draft.task_id);
    render_input(f, &view.input, &title, area);
}

fn render_input(f: &mut Frame, input: &TextInput, title: &str, area: Rect) {
    let popup = centered_rect(60, 3, area);
    f.render_widget(Clear, popup);
    let block = Block::default()
        .borders(Borders::ALL)
        .title(title.to_string())
        .border_style(Style::new().fg(theme::ACCENT));
    let inner = block.inner(popup);
    f.render_widget(Paragraph::new(input.value().to_string()).block(block), popup);
    let prefix: String = input.value().chars().take(input.cursor()).collect();
    let offset = u16::try_from(Line::from(prefix).width()).unwrap_or(u16::MAX);
    let x = inner.x.saturating_add(offset).min(inner.right().saturating_sub(1));
    f.set_cursor(x, inner.y);
}

fn render_confirm(f: &mut Frame, pending: &PendingConfirm, area: Rect) {
    let popup = centered_rect(50, 4, area);
    f.render_widget(Clear, popup);
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Confirm")
        .border_style(Style::new().fg(theme::ACCENT));
    let text = vec![
        Line::from(pending.prompt.clone()),
        Line::from(Span::styled("[y]es / [n]o", Style::new().fg(theme::MUTED))),
    ];
    f.render_widget(Paragraph::new(text).block(block), popup);
}

fn render_log(f: &mut Frame, view: &LogView, area: Rect) {
    let popup = centered_rect(90, area.height.saturating_sub(4), area);
    f.render_widget(Clear, popup);
    let mut title = format!("Log: task {}", view.task_id);
    if view.follow {
        title.push_str(" (follow)");
    }
    if view.loading {
        title.push_str(" …");
    }
    let block = Block::default().borders(Borders::ALL).title(title);
    let body = match &view.error {
        Some(error) => Paragraph::new(Span::styled(
            error.clone(),
            theme::severity_style(lazypueue_core::app::Severity::Error),
        )),
        None if view.text.is_empty() && !view.loading => {
            Paragraph::new(Span::styled("(no output)", Style::new().fg(theme::MUTED)))
        }
        None => Paragraph::new(view.text.clone())
            .scroll((u16::try_from(view.scroll).unwrap_or(u16::MAX), 0)),
    };
    f.render_widget(body.block(block), popup);
}

/// A `percent_x` wide, `height` tall rect centred in `area`.
fn centered_rect(percent_x: u16, height: u16, area: Rect) -> Rect {
    let width = area.width.saturating_mul(percent_x) / 100;
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width.saturating_sub(width)) / 2,
        y: area.y + (area.height.saturating_sub(height)) / 2,
        width,
        height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::{Event, KeyCode, KeyEvent, KeyModifiers};
    use lazypueue_core::{
        AdapterRequest, ClientConfig, DaemonEvent, DaemonUri, Snapshot, TaskDraft,
    };
    use ratatui::{backend::TestBackend, buffer::Buffer, Terminal};
    use tokio::sync::mpsc;

    fn loaded_app() -> (AppState, mpsc::Receiver<AdapterRequest>) {
        let config = ClientConfig::new(DaemonUri::from_path("/tmp/unused.socket"));
        let (tx, rx) = mpsc::channel(8);
        let mut app = AppState::new(&config, tx);
        app.handle_daemon(DaemonEvent::Connected);
        let mut failed = Task::new(3, "default", "cargo test", TaskStatus::DoneFailed);
        failed.exit_code = Some(101);
        let snapshot = Snapshot::new(
            1,
            vec![
                Task::new(1, "default", "sleep 60", TaskStatus::Running),
                Task::new(2, "default", "make docs", TaskStatus::Queued),
                failed,
            ],
            vec![Group::new("default", 1, false)],
        )
        .expect("snapshot");
        app.handle_daemon(DaemonEvent::Snapshot {
            snapshot,
            resync: true,
        });
        (app, rx)
    }

    fn draw(app: &AppState) -> (Buffer, usize) {
        let mut terminal = Terminal::new(TestBackend::new(100, 20)).expect("terminal");
        let mut height = 0;
        terminal
            .draw(|frame| height = render(frame, app))
            .expect("draw");
        (terminal.backend().buffer().clone(), height)
    }

    fn text(buffer: &Buffer) -> String {
        let area = buffer.area;
        let mut out = String::new();
        for y in 0..area.height {
            for x in 0..area.width {
                out.push_str(buffer.get(x, y).symbol());
            }
            out.push('\n');
        }
        out
    }

    fn press(app: &mut AppState, ch: char) {
        app.handle_event(Event::Key(KeyEvent::new(KeyCode::Char(ch), KeyModifiers::NONE)));
    }

    #[test]
    fn renders_status_bar_list_and_details() {
        let (app, _rx) = loaded_app();
        let (buffer, height) = draw(&app);
        let screen = text(&buffer);
        assert!(screen.contains("connected"), "{screen}");
        assert!(screen.contains("3 tasks, 1/1 running"), "{screen}");
        assert!(screen.contains("1 running, 1 queued, 3 total"), "{screen}");
        assert!(screen.contains("make docs"));
        assert!(screen.contains("sleep 60"));
        assert_eq!(height, 20 - 2 - 2 - 1);
    }

    #[test]
    fn details_follow_the_cursor() {
        let (mut app, _rx) = loaded_app();
        press(&mut app, 'G');
        let screen = text(&draw(&app).0);
        assert!(screen.contains("done-failed"), "{screen}");
        assert!(screen.contains("101"), "{screen}");
    }

    #[test]
    fn confirm_and_log_modals_render_on_top() {
        let (mut app, _rx) = loaded_app();
        press(&mut app, 'K');
        let screen = text(&draw(&app).0);
        assert!(screen.contains("Kill task 1?"), "{screen}");

        press(&mut app, 'n');
        press(&mut app, 'l');
        let screen = text(&draw(&app).0);
        assert!(screen.contains("Log: task 1"), "{screen}");
    }

    #[test]
    fn folded_group_shows_its_header_and_details() {
        let (mut app, _rx) = loaded_app();
        press(&mut app, 'h');
        press(&mut app, 'h');
        let screen = text(&draw(&app).0);
        assert!(!screen.contains("make docs"), "{screen}");
        assert!(screen.contains(theme::icons::FOLDED), "{screen}");
        assert!(screen.contains("parallel  1"), "{screen}");
    }

    #[test]
    fn edit_popup_is_prefilled() {
        let (mut app, _rx) = loaded_app();
        app.handle_daemon(DaemonEvent::EditReady {
            task_id: 2,
            result: Ok(TaskDraft {
                task_id: 2,
                command: "make docs".to_string(),
                path: "/srv".into(),
                label: None,
                priority: 0,
            }),
        });
        let screen = text(&draw(&app).0);
        assert!(screen.contains("Edit task 2"), "{screen}");
        assert!(matches!(app.mode(), Mode::Edit(view) if view.input.value() == "make docs"));
    }

    #[test]
    fn filter_with_no_matches_says_so() {
        let (mut app, _rx) = loaded_app();
        for _ in 0..3 {
            press(&mut app, 'f');
        }
        let screen = text(&draw(&app).0);
        assert!(screen.contains("No tasks match the filter"), "{screen}");
        assert!(screen.contains("filter: stashed"), "{screen}");
    }

    #[test]
    fn durations_are_compact() {
        assert_eq!(format_duration(chrono::Duration::seconds(42)), "42s");
        assert_eq!(format_duration(chrono::Duration::seconds(125)), "2m 05s");
        assert_eq!(format_duration(chrono::Duration::seconds(3723)), "1h 02m 03s");
        assert_eq!(format_duration(chrono::Duration::seconds(-5)), "0s");
    }
}
