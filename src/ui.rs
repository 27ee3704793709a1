use crate::app::{App, PaneFocus};
use crate::midi::PortModel;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph, Wrap},
    Frame,
};

pub fn render(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),      // Title
            Constraint::Min(8),         // Sources / destinations
            Constraint::Length(10),     // Log
            Constraint::Length(1),      // Help
        ])
        .split(f.area());

    render_title(f, chunks[0], app);
    render_ports(f, chunks[1], app);
    render_log(f, chunks[2], app);
    render_help(f, chunks[3], app);
}

fn render_title(f: &mut Frame, area: Rect, app: &App) {
    let mut spans = vec![
        Span::styled(
            "StompSync - Magicstomp MIDI",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!("  [{} backend, {} SysEx received]", app.backend_name(), app.sysex_received),
            Style::default().fg(Color::DarkGray),
        ),
    ];
    if !app.manager().listener_running() {
        spans.push(Span::styled("  INPUT STOPPED", Style::default().fg(Color::Red)));
    }
    let title = Line::from(spans);
    let paragraph = Paragraph::new(title).block(Block::default().borders(Borders::ALL));
    f.render_widget(paragraph, area);
}

fn render_ports(f: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);

    for (focus, title, chunk) in [
        (PaneFocus::Sources, "SOURCES (read from)", chunks[0]),
        (PaneFocus::Destinations, "DESTINATIONS (write to)", chunks[1]),
    ] {
        render_port_list(
            f,
            chunk,
            title,
            app.manager().model(focus.direction()),
            app.selected_idx(focus),
            app.focus == focus,
        );
    }
}

fn render_port_list(
    f: &mut Frame,
    area: Rect,
    title: &str,
    model: &PortModel,
    selected_idx: usize,
    is_active: bool,
) {
    let items: Vec<ListItem> = (0..model.row_count())
        .filter_map(|idx| model.data_at(idx).map(|row| (idx, row)))
        .map(|(idx, row)| {
            let is_selected = is_active && selected_idx == idx;
            let cursor = if is_selected { ">" } else { " " };
            let mark = if row.connected { "[x]" } else { "[ ]" };

            let style = if row.connected {
                Style::default().fg(Color::LightGreen)
            } else {
                Style::default()
            };

            let style = if is_selected {
                style.add_modifier(Modifier::BOLD)
            } else {
                style
            };

            let line = Line::from(vec![
                Span::raw(format!("{} {} ", cursor, mark)),
                Span::raw(row.name.to_string()),
                Span::styled(format!("  {}", row.id), Style::default().fg(Color::DarkGray)),
            ]);
            ListItem::new(line).style(style)
        })
        .collect();

    let border_style = if is_active {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default()
    };

    let list = List::new(items).block(
        Block::default()
            .borders(Borders::ALL)
            .title(title)
            .border_style(border_style),
    );

    f.render_widget(list, area);
}

fn render_log(f: &mut Frame, area: Rect, app: &App) {
    // Newest messages at the bottom, as many as fit
    let visible = area.height.saturating_sub(2) as usize;
    let skip = app.log_messages.len().saturating_sub(visible);
    let log_lines: Vec<Line> = app
        .log_messages
        .iter()
        .skip(skip)
        .map(|msg| {
            let style = if msg.starts_with("ERROR") {
                Style::default().fg(Color::Red)
            } else {
                Style::default()
            };
            Line::styled(msg.clone(), style)
        })
        .collect();

    let paragraph = Paragraph::new(log_lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title("LOG"));

    f.render_widget(paragraph, area);
}

fn render_help(f: &mut Frame, area: Rect, app: &App) {
    let help_text = if app.show_help {
        "[↑↓/jk] Navigate | [Tab] Switch Pane | [Space] Connect/Disconnect | [i] Identity Request | [R] Rescan | [q] Quit"
    } else {
        "[Space] Connect/Disconnect | [Tab] Switch Pane | [?] Help | [q] Quit"
    };

    let paragraph = Paragraph::new(help_text)
        .style(Style::default().fg(Color::DarkGray));

    f.render_widget(paragraph, area);
}
