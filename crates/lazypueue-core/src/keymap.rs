use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Quit,
    MoveUp,
    MoveDown,
    Top,
    Bottom,
    PageUp,
    PageDown,
    Kill,
    TogglePause,
    ToggleGroupPause,
    Refresh,
    Restart,
    Clean,
    Add,
    Remove,
    Stash,
    Enqueue,
    SwitchUp,
    SwitchDown,
    ParallelUp,
    ParallelDown,
    /// Fold the selected group, or jump from a task to its group.
    CollapseGroup,
    /// Unfold the selected group, or open the selected task's log.
    ExpandGroup,
    Edit,
    CycleStatusFilter,
    CycleGroupFilter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputAction {
    Insert(char),
    Backspace,
    Delete,
    Left,
    Right,
    Home,
    End,
    Submit,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmAction {
    Confirm,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogAction {
    ScrollUp,
    ScrollDown,
    PageUp,
    PageDown,
    Top,
    Bottom,
    ToggleFollow,
    Close,
}

/// Release events (reported on some platforms) never trigger actions.
pub fn is_actionable(key: &KeyEvent) -> bool {
    matches!(key.kind, KeyEventKind::Press | KeyEventKind::Repeat)
}

fn is_ctrl(key: &KeyEvent, ch: char) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char(ch)
}

pub fn normal_action(key: &KeyEvent) -> Option<Action> {
    if is_ctrl(key, 'c') {
        return Some(Action::Quit);
    }
    let action = match key.code {
        KeyCode::Char('q') => Action::Quit,
        KeyCode::Char('j') | KeyCode::Down => Action::MoveDown,
        KeyCode::Char('k') | KeyCode::Up => Action::MoveUp,
        KeyCode::Char('g') | KeyCode::Home => Action::Top,
        KeyCode::Char('G') | KeyCode::End => Action::Bottom,
        KeyCode::PageUp => Action::PageUp,
        KeyCode::PageDown => Action::PageDown,
        KeyCode::Char('K') => Action::Kill,
        KeyCode::Char(' ') => Action::TogglePause,
        KeyCode::Char('p') => Action::ToggleGroupPause,
        KeyCode::Char('r') => Action::Refresh,
        KeyCode::Char('R') => Action::Restart,
        KeyCode::Char('c') => Action::Clean,
        KeyCode::Char('a') => Action::Add,
        KeyCode::Char('d') | KeyCode::Char('x') | KeyCode::Delete => Action::Remove,
        KeyCode::Char('s') => Action::Stash,
        KeyCode::Char('S') => Action::Enqueue,
        KeyCode::Char('<') => Action::SwitchUp,
        KeyCode::Char('>') => Action::SwitchDown,
        KeyCode::Char('+') | KeyCode::Char('=') => Action::ParallelUp,
        KeyCode::Char('-') => Action::ParallelDown,
        KeyCode::Char('h') | KeyCode::Left => Action::CollapseGroup,
        KeyCode::Char('l') | KeyCode::Right | KeyCode::Enter => Action::ExpandGroup,
        KeyCode::Char('e') => Action::Edit,
        KeyCode::Char('f') => Action::CycleStatusFilter,
        KeyCode::Tab => Action::CycleGroupFilter,
        _ => return None,
    };
    Some(action)
}

pub fn input_action(key: &KeyEvent) -> Option<InputAction> {
    if is_ctrl(key, 'c') {
        return Some(InputAction::Cancel);
    }
    if is_ctrl(key, 'a') {
        return Some(InputAction::Home);
    }
    if is_ctrl(key, 'e') {
        return Some(InputAction::End);
    }
    let action = match key.code {
        KeyCode::Enter => InputAction::Submit,
        KeyCode::Esc => InputAction::Cancel,
        KeyCode::Backspace => InputAction::Backspace,
        KeyCode::Delete => InputAction::Delete,
        KeyCode::Left => InputAction::Left,
        KeyCode::Right => InputAction::Right,
        KeyCode::Home => InputAction::Home,
        KeyCode::End => InputAction::End,
        KeyCode::Char(ch) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
            InputAction::Insert(ch)
        }
        _ => return None,
    };
    Some(action)
}

/// Anything but an explicit yes cancels.
pub fn confirm_action(key: &KeyEvent) -> ConfirmAction {
    match key.code {
        KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => ConfirmAction::Confirm,
        _ => ConfirmAction::Cancel,
    }
}

pub fn log_action(key: &KeyEvent) -> Option<LogAction> {
    let action = match key.code {
        KeyCode::Char('j') | KeyCode::Down => LogAction::ScrollDown,
        KeyCode::Char('k') | KeyCode::Up => LogAction::ScrollUp,
        KeyCode::PageUp => LogAction::PageUp,
        KeyCode::PageDown => LogAction::PageDown,
        KeyCode::Char('g') | KeyCode::Home => LogAction::Top,
        KeyCode::Char('G') | KeyCode::End => LogAction::Bottom,
        KeyCode::Char('f') => LogAction::ToggleFollow,
        KeyCode::Esc | KeyCode::Char('q') | KeyCode::Enter => LogAction::Close,
        _ if is_ctrl(key, 'c') => LogAction::Close,
        _ => return None,
    };
    Some(action)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn ctrl(ch: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(ch), KeyModifiers::CONTROL)
    }

    #[test]
    fn normal_mode_bindings() {
        assert_eq!(normal_action(&key(KeyCode::Char('j'))), Some(Action::MoveDown));
        assert_eq!(normal_action(&key(KeyCode::Up)), Some(Action::MoveUp));
        assert_eq!(normal_action(&key(KeyCode::Char('K'))), Some(Action::Kill));
        assert_eq!(normal_action(&key(KeyCode::Char(' '))), Some(Action::TogglePause));
        assert_eq!(normal_action(&key(KeyCode::Char('x'))), Some(Action::Remove));
        assert_eq!(normal_action(&key(KeyCode::Tab)), Some(Action::CycleGroupFilter));
        assert_eq!(normal_action(&key(KeyCode::Left)), Some(Action::CollapseGroup));
        assert_eq!(normal_action(&key(KeyCode::Enter)), Some(Action::ExpandGroup));
        assert_eq!(normal_action(&key(KeyCode::Char('e'))), Some(Action::Edit));
        assert_eq!(normal_action(&ctrl('c')), Some(Action::Quit));
        assert_eq!(normal_action(&key(KeyCode::Char('z'))), None);
    }

    #[test]
    fn input_mode_treats_letters_as_text() {
        assert_eq!(
            input_action(&key(KeyCode::Char('q'))),
            Some(InputAction::Insert('q'))
        );
        assert_eq!(input_action(&ctrl('a')), Some(InputAction::Home));
        assert_eq!(input_action(&ctrl('e')), Some(InputAction::End));
        assert_eq!(input_action(&ctrl('c')), Some(InputAction::Cancel));
        assert_eq!(input_action(&ctrl('x')), None);
    }

    #[test]
    fn confirm_defaults_to_cancel() {
        assert_eq!(confirm_action(&key(KeyCode::Char('Y'))), ConfirmAction::Confirm);
        assert_eq!(confirm_action(&key(KeyCode::Enter)), ConfirmAction::Confirm);
        assert_eq!(confirm_action(&key(KeyCode::Char('n'))), ConfirmAction::Cancel);
        assert_eq!(confirm_action(&key(KeyCode::Esc)), ConfirmAction::Cancel);
    }

    #[test]
    fn release_events_are_ignored() {
        let mut release = key(KeyCode::Char('q'));
        release.kind = KeyEventKind::Release;
        assert!(!is_actionable(&release));
        assert!(is_actionable(&key(KeyCode::Char('q'))));
    }
}
