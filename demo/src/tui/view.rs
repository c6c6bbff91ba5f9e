//! TUI rendering with ratatui.

use meshturn::{NodeStatus, Simulation};
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
};

use super::app::{App, NodeView};

/// Minimum width for each node panel.
/// Set to 26 to get 3 columns on an 80-char terminal (2 rows of 3 for 6 nodes).
const MIN_PANEL_WIDTH: u16 = 26;

/// Renders the application state to the terminal.
pub fn render(frame: &mut Frame<'_>, app: &App) {
    let area = frame.area();

    // Split into header and main content
    let main_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)])
        .split(area);

    // Render header
    render_header(frame, main_chunks[0], app);

    // Render nodes in a flexible grid
    render_nodes_grid(frame, main_chunks[1], app.views());
}

/// Renders nodes in a grid layout based on available width.
fn render_nodes_grid(frame: &mut Frame<'_>, area: Rect, views: &[NodeView]) {
    if views.is_empty() {
        return;
    }

    // Calculate how many nodes fit per row
    let cols_per_row = (area.width / MIN_PANEL_WIDTH).max(1) as usize;
    let cols_per_row = cols_per_row.min(views.len());

    let num_rows = views.len().div_ceil(cols_per_row);
    let row_constraints: Vec<Constraint> =
        (0..num_rows).map(|_| Constraint::Ratio(1, num_rows as u32)).collect();

    let row_chunks =
        Layout::default().direction(Direction::Vertical).constraints(row_constraints).split(area);

    for (row_idx, row_area) in row_chunks.iter().enumerate() {
        let start_idx = row_idx * cols_per_row;
        let end_idx = (start_idx + cols_per_row).min(views.len());
        let row_views = &views[start_idx..end_idx];

        let col_constraints: Vec<Constraint> =
            row_views.iter().map(|_| Constraint::Ratio(1, row_views.len() as u32)).collect();

        let col_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints(col_constraints)
            .split(*row_area);

        for (col_idx, view) in row_views.iter().enumerate() {
            render_node(frame, col_chunks[col_idx], view);
        }
    }
}

/// Renders the header showing the simulation clock and the token holders.
fn render_header(frame: &mut Frame<'_>, area: Rect, app: &App) {
    let block = Block::default()
        .title(" Meshturn Demo - Token Passing Mesh ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let inner_area = block.inner(area);
    frame.render_widget(block, area);

    let sim = app.sim();
    let masters: Vec<String> = sim.masters().iter().map(ToString::to_string).collect();
    let masters = if masters.is_empty() { "-".to_string() } else { masters.join(",") };
    let clock = if app.paused() { "paused".to_string() } else { format!("{:.1}s", secs(sim)) };

    let status_line = Line::from(vec![
        Span::styled("Time: ", Style::default().fg(Color::DarkGray)),
        Span::styled(clock, Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
        Span::raw("  "),
        Span::styled("Master: ", Style::default().fg(Color::DarkGray)),
        Span::styled(masters, Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::raw("  "),
        Span::styled("Loss: ", Style::default().fg(Color::DarkGray)),
        Span::styled(
            format!("{:.0}%", sim.medium().loss() * 100.0),
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ),
        Span::raw("  "),
        Span::styled("Speed: ", Style::default().fg(Color::DarkGray)),
        Span::styled(format!("x{}", app.speed()), Style::default().add_modifier(Modifier::BOLD)),
        Span::raw("  "),
        Span::styled(
            "[1-6] power  [space] pause  [+/-] speed  [q] quit",
            Style::default().fg(Color::DarkGray),
        ),
    ]);

    let paragraph = Paragraph::new(status_line);
    frame.render_widget(paragraph, inner_area);
}

fn secs(sim: &Simulation) -> f64 {
    sim.now().as_millis() as f64 / 1000.0
}

/// Renders a single node panel.
fn render_node(frame: &mut Frame<'_>, area: Rect, view: &NodeView) {
    let border_color = match &view.status {
        Some(status) if status.master_node => Color::Green,
        Some(_) => Color::Gray,
        None => Color::DarkGray,
    };

    let block = Block::default()
        .title(format!(" N{} ", view.id))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color));

    let inner_area = block.inner(area);
    frame.render_widget(block, area);

    let lines = view.status.as_ref().map_or_else(
        || vec![Line::from(Span::styled("powered off", Style::default().fg(Color::DarkGray)))],
        status_lines,
    );

    let paragraph = Paragraph::new(lines);
    frame.render_widget(paragraph, inner_area);
}

/// Content lines of a powered node.
fn status_lines(status: &NodeStatus) -> Vec<Line<'static>> {
    let role_style = if status.master_node {
        Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::Gray)
    };
    let session = status.session.map_or_else(|| "-".to_string(), |session| session.to_string());
    let eligible: Vec<String> = status.eligible.iter().map(ToString::to_string).collect();
    let stats = &status.stats;

    vec![
        Line::from(Span::styled(status.state, role_style)),
        field("Session", session),
        field("Eligible", eligible.join(",")),
        field("Turns", stats.turns_taken.to_string()),
        field("Acks", format!("{} in / {} out", stats.data_acks_received, stats.acks_sent)),
        field("Retries", stats.retries_sent.to_string()),
        field("Evictions", stats.evictions.to_string()),
        field("Watchdog", stats.watchdog_fires.to_string()),
        field("Yielded", stats.tokens_yielded.to_string()),
    ]
}

fn field(name: &'static str, value: String) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!("{name}: "), Style::default().fg(Color::DarkGray)),
        Span::styled(value, Style::default().add_modifier(Modifier::BOLD)),
    ])
}
