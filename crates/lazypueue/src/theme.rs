use lazypueue_core::app::Severity;
use lazypueue_core::TaskStatus;
use ratatui::style::{Color, Modifier, Style};

pub const HEADER_STYLE: Style = Style::new()
    .fg(Color::Rgb(142, 192, 124))
    .add_modifier(Modifier::BOLD);
pub const SELECTED_STYLE: Style = Style::new()
    .bg(Color::Rgb(131, 165, 152))
    .fg(Color::Black)
    .add_modifier(Modifier::BOLD);
pub const BAR_STYLE: Style = Style::new()
    .bg(Color::Rgb(40, 40, 40))
    .fg(Color::Rgb(235, 219, 178));
pub const GROUP_STYLE: Style = Style::new()
    .fg(Color::Rgb(254, 128, 25))
    .add_modifier(Modifier::BOLD);
pub const MUTED: Color = Color::Rgb(146, 131, 116);
pub const ACCENT: Color = Color::Rgb(250, 189, 47);

pub mod icons {
    pub const QUEUED: &str = "●";
    pub const STASHED: &str = "⊡";
    pub const RUNNING: &str = "▶";
    pub const PAUSED: &str = "⏸";
    pub const SUCCESS: &str = "✓";
    pub const FAILED: &str = "✗";
    pub const KILLED: &str = "⊠";
    pub const UNKNOWN: &str = "?";
    pub const FOLDED: &str = "▸";
    pub const OPEN: &str = "▾";
}

pub fn status_icon(status: &TaskStatus) -> &'static str {
    match status {
        TaskStatus::Queued => icons::QUEUED,
        TaskStatus::Stashed => icons::STASHED,
        TaskStatus::Running => icons::RUNNING,
        TaskStatus::Paused => icons::PAUSED,
        TaskStatus::DoneSuccess => icons::SUCCESS,
        TaskStatus::DoneFailed => icons::FAILED,
        TaskStatus::DoneKilled => icons::KILLED,
        TaskStatus::Unknown(_) => icons::UNKNOWN,
    }
}

pub fn status_color(status: &TaskStatus) -> Color {
    match status {
        TaskStatus::Running => Color::Rgb(131, 165, 152),
        TaskStatus::Queued => Color::Rgb(235, 219, 178),
        TaskStatus::Paused => Color::Rgb(250, 189, 47),
        TaskStatus::Stashed => Color::Rgb(211, 134, 155),
        TaskStatus::DoneSuccess => Color::Rgb(184, 187, 38),
        TaskStatus::DoneFailed => Color::Rgb(251, 73, 52),
        TaskStatus::DoneKilled => Color::Rgb(214, 93, 14),
        TaskStatus::Unknown(_) => MUTED,
    }
}

pub fn severity_style(severity: Severity) -> Style {
    let fg = match severity {
        Severity::Info => Color::Rgb(142, 192, 124),
        Severity::Warn => ACCENT,
        Severity::Error => Color::Rgb(251, 73, 52),
    };
    Style::new().fg(fg).add_modifier(Modifier::BOLD)
}

pub fn zebra_row_style(index: usize) -> Style {
    let bg = if index % 2 == 0 {
        Color::Rgb(18, 20, 26)
    } else {
        Color::Rgb(24, 27, 34)
    };
    Style::new().bg(bg)
}
