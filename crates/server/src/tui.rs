use std::collections::VecDeque;

use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Gauge, Paragraph, Tabs};

use crate::server::{ServerStatus, ViewerInfo};

const MAX_LOG_LINES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tab {
    Log,
    Viewers,
}

impl Tab {
    const ALL: [Tab; 2] = [Tab::Log, Tab::Viewers];

    fn title(self) -> &'static str {
        match self {
            Tab::Log => "Log",
            Tab::Viewers => "Viewers",
        }
    }

    fn index(self) -> usize {
        match self {
            Tab::Log => 0,
            Tab::Viewers => 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

struct LogLine {
    level: LogLevel,
    text: String,
}

pub struct TuiState {
    logs: VecDeque<LogLine>,
    tab: Tab,
    scroll: usize,
    selected: usize,
    pending_kick: Option<u32>,
}

impl TuiState {
    pub fn new() -> Self {
        Self {
            logs: VecDeque::new(),
            tab: Tab::Log,
            scroll: 0,
            selected: 0,
            pending_kick: None,
        }
    }

    pub fn log(&mut self, level: LogLevel, text: impl Into<String>) {
        if self.logs.len() == MAX_LOG_LINES {
            self.logs.pop_front();
        }
        self.logs.push_back(LogLine {
            level,
            text: text.into(),
        });
    }

    pub fn log_info(&mut self, text: impl Into<String>) {
        self.log(LogLevel::Info, text);
    }

    pub fn active_tab(&self) -> Tab {
        self.tab
    }

    pub fn next_tab(&mut self) {
        self.tab = Tab::ALL[(self.tab.index() + 1) % Tab::ALL.len()];
    }

    pub fn scroll_up(&mut self) {
        self.scroll = (self.scroll + 10).min(self.logs.len());
    }

    pub fn scroll_down(&mut self) {
        self.scroll = self.scroll.saturating_sub(10);
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll = 0;
    }

    pub fn select_prev(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    pub fn select_next(&mut self, count: usize) {
        if count > 0 {
            self.selected = (self.selected + 1).min(count - 1);
        }
    }

    pub fn request_kick(&mut self, viewers: &[ViewerInfo]) {
        self.pending_kick = viewers.get(self.selected).map(|v| v.viewer);
    }

    pub fn take_pending_kick(&mut self) -> Option<u32> {
        self.pending_kick.take()
    }
}

pub fn render(frame: &mut Frame, state: &TuiState, status: &ServerStatus) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(6),
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(3),
        ])
        .split(frame.area());

    render_header(frame, chunks[0], status);
    render_capacity(frame, chunks[1], status);
    render_network(frame, chunks[2], status);
    render_tabs(frame, chunks[3], state);
    match state.tab {
        Tab::Log => render_log(frame, chunks[4], state),
        Tab::Viewers => render_viewers(frame, chunks[4], state, &status.viewers),
    }
    render_help(frame, chunks[5]);
}

fn render_header(frame: &mut Frame, area: Rect, status: &ServerStatus) {
    let title = format!(" Visual Server - Uptime: {} ", format_duration(status.uptime_secs));

    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let text = format!(
        "Tick: {}  |  Viewers: {}  |  Effects: {}  |  Generation: {}",
        status.sync.tick, status.sync.viewers, status.sync.effects, status.sync.generation
    );

    let paragraph = Paragraph::new(text)
        .block(block)
        .style(Style::default().fg(Color::White));

    frame.render_widget(paragraph, area);
}

fn render_capacity(frame: &mut Frame, area: Rect, status: &ServerStatus) {
    let block = Block::default()
        .title(" Capacity ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green));

    let online = status.viewers.len();
    let ratio = online as f64 / status.max_viewers.max(1) as f64;
    let gauge = Gauge::default()
        .block(block)
        .gauge_style(Style::default().fg(Color::Green))
        .ratio(ratio.min(1.0))
        .label(format!("{}/{} viewers", online, status.max_viewers));

    frame.render_widget(gauge, area);
}

fn render_network(frame: &mut Frame, area: Rect, status: &ServerStatus) {
    let block = Block::default()
        .title(" Network ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let net = &status.sync.network;
    let lines = vec![
        Line::from(vec![
            Span::styled("Messages: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!("{} sent", net.messages_sent),
                Style::default().fg(Color::White),
            ),
        ]),
        Line::from(vec![
            Span::styled("Bytes: ", Style::default().fg(Color::Gray)),
            Span::styled(format_bytes(net.bytes_sent), Style::default().fg(Color::White)),
        ]),
        Line::from(vec![
            Span::styled("Delivery failures: ", Style::default().fg(Color::Gray)),
            Span::styled(
                net.delivery_failures.to_string(),
                Style::default().fg(if net.delivery_failures > 0 {
                    Color::Red
                } else {
                    Color::White
                }),
            ),
        ]),
        Line::from(vec![
            Span::styled("Rejected effects: ", Style::default().fg(Color::Gray)),
            Span::styled(
                net.encoding_failures.to_string(),
                Style::default().fg(if net.encoding_failures > 0 {
                    Color::Red
                } else {
                    Color::White
                }),
            ),
        ]),
    ];

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_tabs(frame: &mut Frame, area: Rect, state: &TuiState) {
    let tabs = Tabs::new(Tab::ALL.iter().map(|t| t.title()))
        .block(Block::default().borders(Borders::ALL))
        .select(state.tab.index())
        .highlight_style(
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        );

    frame.render_widget(tabs, area);
}

fn render_log(frame: &mut Frame, area: Rect, state: &TuiState) {
    let height = area.height.saturating_sub(2) as usize;
    let end = state.logs.len().saturating_sub(state.scroll);
    let start = end.saturating_sub(height);

    let lines: Vec<Line> = state
        .logs
        .range(start..end)
        .map(|line| {
            let (label, color) = match line.level {
                LogLevel::Info => ("INFO ", Color::Green),
                LogLevel::Warn => ("WARN ", Color::Yellow),
                LogLevel::Error => ("ERROR", Color::Red),
            };
            Line::from(vec![
                Span::styled(label, Style::default().fg(color)),
                Span::raw(" "),
                Span::raw(line.text.as_str()),
            ])
        })
        .collect();

    let block = Block::default().title(" Log ").borders(Borders::ALL);
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_viewers(frame: &mut Frame, area: Rect, state: &TuiState, viewers: &[ViewerInfo]) {
    let mut lines = vec![Line::from(Span::styled(
        format!(
            "{:<6} {:<16} {:<22} {:>5} {:>7} {:>8} {:<12}",
            "ID", "Name", "Address", "World", "Ping", "Effects", "State"
        ),
        Style::default().fg(Color::Gray),
    ))];

    for (index, viewer) in viewers.iter().enumerate() {
        let ping = viewer
            .rtt_ms
            .map_or_else(|| "-".to_owned(), |rtt| format!("{}ms", rtt));
        let style = if index == state.selected {
            Style::default().fg(Color::Black).bg(Color::Cyan)
        } else {
            Style::default().fg(Color::White)
        };

        lines.push(Line::from(Span::styled(
            format!(
                "{:<6} {:<16} {:<22} {:>5} {:>7} {:>8} {:<12}",
                viewer.viewer,
                viewer.name,
                viewer.addr,
                viewer.world,
                ping,
                viewer.rendered,
                viewer.state
            ),
            style,
        )));
    }

    let block = Block::default().title(" Viewers ").borders(Borders::ALL);
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_help(frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .title(" Controls ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let text = Paragraph::new("q/ESC quit | Tab switch | PgUp/PgDn/End scroll | Up/Down select | k kick")
        .block(block)
        .style(
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::ITALIC),
        );

    frame.render_widget(text, area);
}

fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;
    format!("{:02}:{:02}:{:02}", hours, mins, secs)
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1}GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_is_bounded() {
        let mut state = TuiState::new();
        for n in 0..MAX_LOG_LINES + 10 {
            state.log_info(format!("line {n}"));
        }
        assert_eq!(state.logs.len(), MAX_LOG_LINES);
        assert_eq!(state.logs.front().unwrap().text, "line 10");
    }

    #[test]
    fn selection_stays_in_range() {
        let mut state = TuiState::new();
        state.select_next(2);
        state.select_next(2);
        assert_eq!(state.selected, 1);
        state.select_prev();
        state.select_prev();
        assert_eq!(state.selected, 0);
    }

    #[test]
    fn formats_sizes() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(2048), "2.0KB");
        assert_eq!(format_duration(3725), "01:02:05");
    }
}
