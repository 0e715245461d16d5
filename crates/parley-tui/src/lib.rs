// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

//! Full-screen terminal view over the session controller. The view owns no
//! session state: every frame renders the controller's snapshot, and every
//! key press maps to one controller operation.

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use crossterm::{execute, terminal};
use parley_app::{Chat, ChatId, Role, Screen, ThemeMode};
use parley_llm::{CompletionApi, ModelInfo};
use parley_session::{DEFAULT_CHAT_TITLE, SendOutcome, SessionController, SessionEvent, SessionState};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::widgets::{Block, Borders, List, ListItem, Paragraph, Wrap};
use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

const SIDEBAR_WIDTH: u16 = 26;
const STATUS_CLEAR_SECS: u64 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
enum UiEvent {
    ClearStatus { token: u64 },
}

#[derive(Debug, Default)]
struct ViewData {
    status_line: Option<String>,
    status_token: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Palette {
    text: Color,
    dim: Color,
    accent: Color,
    alert: Color,
}

fn palette(theme: ThemeMode) -> Palette {
    match theme {
        ThemeMode::Light => Palette {
            text: Color::Black,
            dim: Color::DarkGray,
            accent: Color::Blue,
            alert: Color::Red,
        },
        ThemeMode::Dark => Palette {
            text: Color::White,
            dim: Color::Gray,
            accent: Color::Cyan,
            alert: Color::LightRed,
        },
        // Defer to the terminal's own colors.
        ThemeMode::System => Palette {
            text: Color::Reset,
            dim: Color::DarkGray,
            accent: Color::Cyan,
            alert: Color::LightRed,
        },
    }
}

pub fn run_app<A>(controller: &mut SessionController<A>) -> Result<()>
where
    A: CompletionApi + Clone + Send + 'static,
{
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, terminal::EnterAlternateScreen).context("enter alternate screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;

    let mut view_data = ViewData::default();
    let (session_tx, session_rx) = mpsc::channel();
    let (ui_tx, ui_rx) = mpsc::channel();

    // Initial model refresh; a blank credential makes this a no-op.
    controller.refresh_models(&session_tx);

    let mut result = Ok(());
    loop {
        process_session_events(controller, &session_rx);
        process_ui_events(&mut view_data, &ui_rx);

        if let Err(error) =
            terminal.draw(|frame| render(frame, controller.state(), &view_data))
        {
            result = Err(error).context("draw frame");
            break;
        }

        let has_event = event::poll(Duration::from_millis(120)).context("poll event")?;
        if has_event {
            match event::read().context("read event")? {
                Event::Key(key) => {
                    if handle_key_event(controller, &mut view_data, &session_tx, &ui_tx, key) {
                        break;
                    }
                }
                Event::Resize(_, _) => {}
                _ => {}
            }
        }
    }

    disable_raw_mode().context("disable raw mode")?;
    execute!(io::stdout(), terminal::LeaveAlternateScreen).context("leave alternate screen")?;
    result
}

fn process_session_events<A>(controller: &mut SessionController<A>, rx: &Receiver<SessionEvent>)
where
    A: CompletionApi + Clone + Send + 'static,
{
    while let Ok(event) = rx.try_recv() {
        controller.apply(event);
    }
}

fn process_ui_events(view_data: &mut ViewData, rx: &Receiver<UiEvent>) {
    while let Ok(event) = rx.try_recv() {
        match event {
            UiEvent::ClearStatus { token } if token == view_data.status_token => {
                view_data.status_line = None;
            }
            UiEvent::ClearStatus { .. } => {}
        }
    }
}

fn emit_status(view_data: &mut ViewData, ui_tx: &Sender<UiEvent>, message: impl Into<String>) {
    view_data.status_line = Some(message.into());
    view_data.status_token = view_data.status_token.saturating_add(1);
    let token = view_data.status_token;
    let sender = ui_tx.clone();
    thread::spawn(move || {
        thread::sleep(Duration::from_secs(STATUS_CLEAR_SECS));
        let _ = sender.send(UiEvent::ClearStatus { token });
    });
}

fn handle_key_event<A>(
    controller: &mut SessionController<A>,
    view_data: &mut ViewData,
    session_tx: &Sender<SessionEvent>,
    ui_tx: &Sender<UiEvent>,
    key: KeyEvent,
) -> bool
where
    A: CompletionApi + Clone + Send + 'static,
{
    if key.code == KeyCode::Char('q') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return true;
    }

    if key.code == KeyCode::Char('s') && key.modifiers.contains(KeyModifiers::CONTROL) {
        let next = match controller.state().screen {
            Screen::Chat => Screen::Settings,
            Screen::Settings => Screen::Chat,
        };
        controller.navigate(next);
        return false;
    }

    if key.code == KeyCode::Esc {
        controller.clear_error();
        view_data.status_line = None;
        return false;
    }

    match controller.state().screen {
        Screen::Chat => handle_chat_key(controller, view_data, session_tx, ui_tx, key),
        Screen::Settings => handle_settings_key(controller, view_data, session_tx, ui_tx, key),
    }
    false
}

fn handle_chat_key<A>(
    controller: &mut SessionController<A>,
    view_data: &mut ViewData,
    session_tx: &Sender<SessionEvent>,
    ui_tx: &Sender<UiEvent>,
    key: KeyEvent,
) where
    A: CompletionApi + Clone + Send + 'static,
{
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match (key.code, ctrl) {
        (KeyCode::Enter, _) => match controller.send(session_tx) {
            SendOutcome::Busy => {
                emit_status(view_data, ui_tx, "still waiting on the last reply");
            }
            // Invalid input is deliberately silent; failures land in the
            // error slot and render on their own.
            SendOutcome::Sent | SendOutcome::Ignored | SendOutcome::Failed => {}
        },
        (KeyCode::Char('n'), true) => {
            if let Err(error) = controller.create_chat_and_select(DEFAULT_CHAT_TITLE) {
                emit_status(view_data, ui_tx, format!("new chat failed: {error:#}"));
            }
        }
        (KeyCode::Char('k'), true) => cycle_chat(controller, view_data, ui_tx, -1),
        (KeyCode::Char('j'), true) => cycle_chat(controller, view_data, ui_tx, 1),
        (KeyCode::Char('l'), true) => {
            let state = controller.state();
            if let Some(next) =
                neighbor_model(&state.models, state.selected_model.as_deref(), 1)
            {
                controller.select_model(&next);
                emit_status(view_data, ui_tx, format!("model {next}"));
            } else {
                emit_status(view_data, ui_tx, "no models loaded; set an API key first");
            }
        }
        (KeyCode::Backspace, _) => {
            let mut input = controller.state().input.clone();
            input.pop();
            controller.update_input(input);
        }
        (KeyCode::Char(ch), false) => {
            let mut input = controller.state().input.clone();
            input.push(ch);
            controller.update_input(input);
        }
        _ => {}
    }
}

fn cycle_chat<A>(
    controller: &mut SessionController<A>,
    view_data: &mut ViewData,
    ui_tx: &Sender<UiEvent>,
    delta: isize,
) where
    A: CompletionApi + Clone + Send + 'static,
{
    let state = controller.state();
    let Some(next) = neighbor_chat(&state.chats, state.current_chat, delta) else {
        return;
    };
    if let Err(error) = controller.select_chat(next) {
        emit_status(view_data, ui_tx, format!("chat switch failed: {error:#}"));
    }
}

fn handle_settings_key<A>(
    controller: &mut SessionController<A>,
    view_data: &mut ViewData,
    session_tx: &Sender<SessionEvent>,
    ui_tx: &Sender<UiEvent>,
    key: KeyEvent,
) where
    A: CompletionApi + Clone + Send + 'static,
{
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match (key.code, ctrl) {
        (KeyCode::Enter, _) => match controller.save_api_key(session_tx) {
            Ok(()) => emit_status(view_data, ui_tx, "API key saved"),
            Err(error) => emit_status(view_data, ui_tx, format!("save failed: {error:#}")),
        },
        (KeyCode::Char('t'), true) => {
            let next = controller.state().theme.next();
            match controller.update_theme(next) {
                Ok(()) => emit_status(view_data, ui_tx, format!("theme {}", next.as_str())),
                Err(error) => {
                    emit_status(view_data, ui_tx, format!("theme save failed: {error:#}"));
                }
            }
        }
        (KeyCode::Backspace, _) => {
            let mut staged = controller.state().api_key.clone();
            staged.pop();
            controller.update_api_key(staged);
        }
        (KeyCode::Char(ch), false) => {
            let mut staged = controller.state().api_key.clone();
            staged.push(ch);
            controller.update_api_key(staged);
        }
        _ => {}
    }
}

fn render(frame: &mut ratatui::Frame, state: &SessionState, view_data: &ViewData) {
    match state.screen {
        Screen::Chat => render_chat_screen(frame, state, view_data),
        Screen::Settings => render_settings_screen(frame, state, view_data),
    }
}

fn render_chat_screen(frame: &mut ratatui::Frame, state: &SessionState, view_data: &ViewData) {
    let colors = palette(state.theme);
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(3),
            Constraint::Length(3),
            Constraint::Length(1),
        ])
        .split(frame.area());

    let header = Paragraph::new(header_text(state))
        .style(Style::default().fg(colors.accent).add_modifier(Modifier::BOLD));
    frame.render_widget(header, rows[0]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(SIDEBAR_WIDTH), Constraint::Min(20)])
        .split(rows[1]);

    let items: Vec<ListItem> = state
        .chats
        .iter()
        .map(|chat| {
            let marker = if Some(chat.id) == state.current_chat {
                "▸ "
            } else {
                "  "
            };
            let style = if Some(chat.id) == state.current_chat {
                Style::default().fg(colors.accent).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(colors.text)
            };
            ListItem::new(format!("{marker}{}", chat.title)).style(style)
        })
        .collect();
    let sidebar = List::new(items).block(
        Block::default()
            .borders(Borders::ALL)
            .title("chats (^n new, ^j/^k cycle)"),
    );
    frame.render_widget(sidebar, body[0]);

    let transcript = Paragraph::new(render_transcript_text(state))
        .style(Style::default().fg(colors.text))
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title("transcript"));
    frame.render_widget(transcript, body[1]);

    let input = Paragraph::new(format!("{}▏", state.input))
        .style(Style::default().fg(colors.text))
        .block(Block::default().borders(Borders::ALL).title("message (enter sends)"));
    frame.render_widget(input, rows[2]);

    render_status_line(frame, state, view_data, rows[3], colors);
}

fn render_settings_screen(frame: &mut ratatui::Frame, state: &SessionState, view_data: &ViewData) {
    let colors = palette(state.theme);
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(3),
            Constraint::Length(1),
        ])
        .split(frame.area());

    let header = Paragraph::new("parley settings (^s back to chat)")
        .style(Style::default().fg(colors.accent).add_modifier(Modifier::BOLD));
    frame.render_widget(header, rows[0]);

    let body = Paragraph::new(render_settings_text(state))
        .style(Style::default().fg(colors.text))
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title("settings"));
    frame.render_widget(body, rows[1]);

    render_status_line(frame, state, view_data, rows[2], colors);
}

fn render_status_line(
    frame: &mut ratatui::Frame,
    state: &SessionState,
    view_data: &ViewData,
    area: ratatui::layout::Rect,
    colors: Palette,
) {
    // The error slot outranks transient notices; esc dismisses either.
    let (text, style) = match (&state.error, &view_data.status_line) {
        (Some(error), _) => (
            format!("error: {error} (esc dismisses)"),
            Style::default().fg(colors.alert),
        ),
        (None, Some(status)) => (status.clone(), Style::default().fg(colors.dim)),
        (None, None) => (
            "^q quit | ^s settings | ^l model".to_owned(),
            Style::default().fg(colors.dim),
        ),
    };
    frame.render_widget(Paragraph::new(text).style(style), area);
}

fn header_text(state: &SessionState) -> String {
    let model = state.selected_model.as_deref().unwrap_or("(no model)");
    let loading = if state.loading { " | waiting…" } else { "" };
    format!("parley | model: {model}{loading}")
}

fn render_transcript_text(state: &SessionState) -> String {
    let mut out = String::new();
    for message in &state.messages {
        let time = message.created_at.time();
        let speaker = match message.role {
            Role::User => "you",
            Role::Assistant => "assistant",
        };
        out.push_str(&format!(
            "[{:02}:{:02}] {speaker}: {}\n\n",
            time.hour(),
            time.minute(),
            message.content
        ));
    }
    if state.loading {
        out.push_str("assistant: …\n");
    }
    if out.is_empty() {
        out.push_str("no messages yet -- type below and press enter\n");
    }
    out
}

fn render_settings_text(state: &SessionState) -> String {
    let mut out = String::new();
    out.push_str("API key (type to edit, enter saves)\n");
    out.push_str(&format!("  {}\n\n", mask_key(&state.api_key)));
    out.push_str(&format!(
        "theme: {} (^t cycles: light / dark / system)\n\n",
        state.theme.as_str()
    ));
    if state.models.is_empty() {
        out.push_str("models: none loaded -- save a valid key to fetch the catalog\n");
    } else {
        out.push_str(&format!("models loaded: {}\n", state.models.len()));
    }
    out
}

/// Keys render masked: enough of the tail to recognize, never the whole
/// secret.
fn mask_key(key: &str) -> String {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return "(not set)".to_owned();
    }
    let chars: Vec<char> = trimmed.chars().collect();
    if chars.len() <= 8 {
        return "•".repeat(chars.len());
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}…{tail}", "•".repeat(8))
}

fn neighbor_chat(chats: &[Chat], current: Option<ChatId>, delta: isize) -> Option<ChatId> {
    if chats.is_empty() {
        return None;
    }
    let len = chats.len() as isize;
    let position = current
        .and_then(|id| chats.iter().position(|chat| chat.id == id))
        .unwrap_or(0) as isize;
    let next = (position + delta).rem_euclid(len) as usize;
    Some(chats[next].id)
}

fn neighbor_model(models: &[ModelInfo], selected: Option<&str>, delta: isize) -> Option<String> {
    if models.is_empty() {
        return None;
    }
    let len = models.len() as isize;
    let position = selected
        .and_then(|id| models.iter().position(|model| model.id == id))
        .unwrap_or(0) as isize;
    let next = (position + delta).rem_euclid(len) as usize;
    Some(models[next].id.clone())
}
