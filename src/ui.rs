use chrono::Utc;
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Gauge, Paragraph, Row, Table, Wrap},
    Frame,
};
use time_humanize::HumanTime;
use unicode_width::UnicodeWidthStr;

use crate::auth::ConfidenceTier;
use crate::capture::Capture;
use crate::enroll::EnrollmentStage;
use crate::metrics::LiveMetrics;
use crate::phrase::TARGET_PHRASE;
use crate::{App, Focus, Screen};

const HORIZONTAL_MARGIN: u16 = 4;
const VERTICAL_MARGIN: u16 = 1;

pub fn draw(app: &App, f: &mut Frame) {
    match app.screen {
        Screen::Register => render_register(app, f),
        Screen::Login => render_login(app, f),
        Screen::Dashboard => render_dashboard(app, f),
    }
}

fn tier_color(tier: ConfidenceTier) -> Color {
    match tier {
        ConfidenceTier::Verified => Color::Green,
        ConfidenceTier::Uncertain => Color::Yellow,
        ConfidenceTier::Rejected => Color::Red,
    }
}

fn score_color(percent: f64) -> Color {
    tier_color(ConfidenceTier::from_score(percent / 100.0))
}

fn input_field<'a>(label: &'a str, value: &'a str, focused: bool) -> Paragraph<'a> {
    let style = if focused {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default().add_modifier(Modifier::DIM)
    };
    let shown = if focused {
        format!("{}\u{2588}", value) // block cursor
    } else {
        value.to_string()
    };
    Paragraph::new(shown)
        .block(Block::default().borders(Borders::ALL).title(label))
        .style(style)
}

/// Per-character phrase overlay: typed characters in green when they match
/// the target (ignoring case), red otherwise, the next expected character
/// underlined, the remainder dimmed.
fn phrase_line(capture: &Capture) -> Line<'static> {
    let bold = Style::default().add_modifier(Modifier::BOLD);
    let green_bold = bold.fg(Color::Green);
    let red_bold = bold.fg(Color::Red);
    let dim_bold = bold.add_modifier(Modifier::DIM);
    let underlined_dim_bold = dim_bold.add_modifier(Modifier::UNDERLINED);

    let typed: Vec<char> = capture.typed_text().chars().collect();
    let target: Vec<char> = TARGET_PHRASE.chars().collect();

    let mut spans: Vec<Span> = Vec::with_capacity(target.len() + typed.len());
    for (idx, &c) in typed.iter().enumerate() {
        match target.get(idx) {
            Some(&expected) if c.eq_ignore_ascii_case(&expected) => {
                spans.push(Span::styled(expected.to_string(), green_bold));
            }
            _ => {
                let shown = match c {
                    ' ' => "\u{b7}".to_owned(),
                    other => other.to_string(),
                };
                spans.push(Span::styled(shown, red_bold));
            }
        }
    }
    if typed.len() < target.len() {
        spans.push(Span::styled(
            target[typed.len()].to_string(),
            underlined_dim_bold,
        ));
        let rest: String = target[typed.len() + 1..].iter().collect();
        spans.push(Span::styled(rest, dim_bold));
    }
    Line::from(spans)
}

fn metrics_line(metrics: LiveMetrics) -> Line<'static> {
    let label = Style::default().add_modifier(Modifier::DIM);
    let value = Style::default().fg(Color::Magenta);
    Line::from(vec![
        Span::styled("dwell ", label),
        Span::styled(format!("{:.0} ms", metrics.dwell_ms), value),
        Span::styled("   flight ", label),
        Span::styled(format!("{:.0} ms", metrics.flight_ms), value),
        Span::styled("   speed ", label),
        Span::styled(format!("{:.1} keys/s", metrics.keys_per_sec), value),
    ])
}

fn status_line(app: &App) -> Line<'static> {
    if let Some(error) = &app.error {
        Line::from(Span::styled(
            error.clone(),
            Style::default().fg(Color::Red),
        ))
    } else if let Some(notice) = &app.notice {
        Line::from(Span::styled(
            notice.clone(),
            Style::default().fg(Color::Green),
        ))
    } else if app.is_loading() {
        Line::from(Span::styled(
            "Analyzing...".to_string(),
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::ITALIC),
        ))
    } else {
        Line::from("")
    }
}

/// Center a fixed-width card inside the frame.
fn card(area: Rect, height: u16) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .vertical_margin(VERTICAL_MARGIN)
        .constraints([
            Constraint::Min(area.height.saturating_sub(height) / 2),
            Constraint::Length(height),
            Constraint::Min(0),
        ])
        .split(area);
    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .horizontal_margin(HORIZONTAL_MARGIN)
        .constraints([
            Constraint::Min(0),
            Constraint::Length(60u16.min(area.width.saturating_sub(2 * HORIZONTAL_MARGIN))),
            Constraint::Min(0),
        ])
        .split(vertical[1]);
    horizontal[1]
}

fn render_register(app: &App, f: &mut Frame) {
    let area = card(f.area(), 22);

    match app.enrollment.stage() {
        EnrollmentStage::ProfilePending => {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([
                    Constraint::Length(2), // title
                    Constraint::Length(1), // step
                    Constraint::Length(3), // name
                    Constraint::Length(3), // username
                    Constraint::Length(1), // status
                    Constraint::Length(2), // hints
                    Constraint::Min(0),
                ])
                .split(area);

            render_title(f, chunks[0], "Create Your Identity");
            f.render_widget(
                Paragraph::new("Step 1 of 2 · Profile")
                    .style(Style::default().add_modifier(Modifier::DIM))
                    .alignment(Alignment::Center),
                chunks[1],
            );
            f.render_widget(
                input_field("Full Name", &app.name_input, app.focus == Focus::Name),
                chunks[2],
            );
            f.render_widget(
                input_field(
                    "Username",
                    &app.username_input,
                    app.focus == Focus::Username,
                ),
                chunks[3],
            );
            f.render_widget(
                Paragraph::new(status_line(app)).alignment(Alignment::Center),
                chunks[4],
            );
            render_hints(f, chunks[5], "(tab) switch field  (enter) continue  (esc) quit");
        }
        EnrollmentStage::Collecting { collected, required } => {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([
                    Constraint::Length(2), // title
                    Constraint::Length(1), // step
                    Constraint::Length(phrase_height(area.width)),
                    Constraint::Length(1), // metrics
                    Constraint::Length(1),
                    Constraint::Length(3), // progress gauge
                    Constraint::Length(1), // status
                    Constraint::Length(2), // hints
                    Constraint::Min(0),
                ])
                .split(area);

            render_title(f, chunks[0], "Train Your Typing Pattern");
            f.render_widget(
                Paragraph::new("Step 2 of 2 · Enrollment")
                    .style(Style::default().add_modifier(Modifier::DIM))
                    .alignment(Alignment::Center),
                chunks[1],
            );
            render_phrase(app, f, chunks[2]);
            f.render_widget(
                Paragraph::new(metrics_line(app.capture.metrics())).alignment(Alignment::Center),
                chunks[3],
            );

            let ratio = if required > 0 {
                (collected as f64 / required as f64).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let gauge = Gauge::default()
                .block(Block::default().borders(Borders::ALL).title("Enrollment Progress"))
                .gauge_style(Style::default().fg(Color::Cyan))
                .ratio(ratio)
                .label(format!("{} of {}", collected, required));
            f.render_widget(gauge, chunks[5]);

            f.render_widget(
                Paragraph::new(status_line(app)).alignment(Alignment::Center),
                chunks[6],
            );
            let hint = if app.enrollment.can_submit(&app.capture) {
                "(enter) submit sample  (ctrl-r) restart  (esc) quit"
            } else {
                "type the phrase above  (ctrl-r) restart  (esc) quit"
            };
            render_hints(f, chunks[7], hint);
        }
        EnrollmentStage::Enrolled => {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([
                    Constraint::Length(2),
                    Constraint::Length(2),
                    Constraint::Length(1),
                    Constraint::Length(2),
                    Constraint::Min(0),
                ])
                .split(area);

            render_title(f, chunks[0], "Enrollment Complete");
            f.render_widget(
                Paragraph::new("Your typing pattern has been learned.")
                    .style(Style::default().fg(Color::Green))
                    .alignment(Alignment::Center),
                chunks[1],
            );
            f.render_widget(
                Paragraph::new(status_line(app)).alignment(Alignment::Center),
                chunks[2],
            );
            render_hints(f, chunks[3], "returning to login... (enter) go now");
        }
    }
}

fn render_login(app: &App, f: &mut Frame) {
    let area = card(f.area(), 24);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),                          // title
            Constraint::Length(3),                          // username
            Constraint::Length(phrase_height(area.width)),  // phrase
            Constraint::Length(1),                          // metrics
            Constraint::Length(1),
            Constraint::Length(5), // result gauge
            Constraint::Length(2), // result message
            Constraint::Length(1), // status
            Constraint::Length(2), // hints
            Constraint::Min(0),
        ])
        .split(area);

    render_title(f, chunks[0], "Authenticate With Your Typing");
    f.render_widget(
        input_field(
            "Username",
            &app.login.username,
            app.focus == Focus::Username && app.login.result().is_none(),
        ),
        chunks[1],
    );
    render_phrase(app, f, chunks[2]);
    f.render_widget(
        Paragraph::new(metrics_line(app.capture.metrics())).alignment(Alignment::Center),
        chunks[3],
    );

    if let (Some(result), Some(tier)) = (app.login.result(), app.login.tier()) {
        let color = tier_color(tier);
        let percent = (result.confidence_score * 100.0).round() as u16;
        let gauge = Gauge::default()
            .block(Block::default().borders(Borders::ALL).title("Confidence"))
            .gauge_style(Style::default().fg(color))
            .ratio(result.confidence_score.clamp(0.0, 1.0))
            .label(format!("{}% {}", percent, tier));
        f.render_widget(gauge, chunks[5]);

        let verdict = if result.authenticated {
            Span::styled(
                "Identity Verified",
                Style::default()
                    .fg(Color::Green)
                    .add_modifier(Modifier::BOLD),
            )
        } else {
            Span::styled(
                "Authentication Failed",
                Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
            )
        };
        let message = Span::styled(
            result.message.clone(),
            Style::default().add_modifier(Modifier::DIM),
        );
        f.render_widget(
            Paragraph::new(vec![Line::from(verdict), Line::from(message)])
                .alignment(Alignment::Center)
                .wrap(Wrap { trim: true }),
            chunks[6],
        );
    }

    f.render_widget(
        Paragraph::new(status_line(app)).alignment(Alignment::Center),
        chunks[7],
    );

    let hint = match app.login.result() {
        None => "(tab) focus  (enter) verify identity  (ctrl-r) restart  (esc) quit",
        Some(r) if r.authenticated => "opening dashboard... (enter) go now",
        Some(_) => "(r) try again  (esc) quit",
    };
    render_hints(f, chunks[8], hint);
}

fn render_dashboard(app: &App, f: &mut Frame) {
    let area = f.area();
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(2), // title
            Constraint::Min(0),    // columns
            Constraint::Length(1), // status
            Constraint::Length(2), // hints
        ])
        .split(area);

    render_title(f, chunks[0], "Dashboard");

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(28),
            Constraint::Percentage(44),
            Constraint::Percentage(28),
        ])
        .split(chunks[1]);

    render_profile_panel(app, f, columns[0]);
    render_history_panel(app, f, columns[1]);
    render_stats_panel(app, f, columns[2]);

    f.render_widget(
        Paragraph::new(status_line(app)).alignment(Alignment::Center),
        chunks[2],
    );
    render_hints(
        f,
        chunks[3],
        "(r) refresh  (e) export csv  (l) log out  (esc) quit",
    );
}

fn render_profile_panel(app: &App, f: &mut Frame, area: Rect) {
    let block = Block::default().borders(Borders::ALL).title("Profile");
    let Some(profile) = &app.dashboard.profile else {
        f.render_widget(
            Paragraph::new("Loading profile...")
                .block(block)
                .style(Style::default().add_modifier(Modifier::DIM)),
            area,
        );
        return;
    };

    let label = Style::default().add_modifier(Modifier::DIM);
    let mut lines = vec![
        Line::from(Span::styled(
            profile.name.clone(),
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(Span::styled(format!("@{}", profile.username), label)),
        Line::from(""),
        Line::from(vec![
            Span::styled("device    ", label),
            Span::raw(profile.device_type.clone()),
        ]),
        Line::from(vec![
            Span::styled("enrolled  ", label),
            if profile.is_enrolled {
                Span::styled("yes", Style::default().fg(Color::Green))
            } else {
                Span::styled("no", Style::default().fg(Color::Red))
            },
        ]),
        Line::from(vec![
            Span::styled("samples   ", label),
            Span::raw(profile.enrollment_samples.to_string()),
        ]),
        Line::from(vec![
            Span::styled("joined    ", label),
            Span::raw(profile.created_at.format("%Y-%m-%d").to_string()),
        ]),
    ];
    if let Some(score) = profile.security_score {
        lines.push(Line::from(vec![
            Span::styled("security  ", label),
            Span::styled(
                format!("{:.0}%", score),
                Style::default().fg(score_color(score)),
            ),
        ]));
    }

    f.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_history_panel(app: &App, f: &mut Frame, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Authentication History");
    let Some(history) = &app.dashboard.history else {
        f.render_widget(
            Paragraph::new("Loading history...")
                .block(block)
                .style(Style::default().add_modifier(Modifier::DIM)),
            area,
        );
        return;
    };

    if history.history.is_empty() {
        f.render_widget(
            Paragraph::new("No authentication attempts yet.")
                .block(block)
                .style(Style::default().add_modifier(Modifier::DIM))
                .alignment(Alignment::Center),
            area,
        );
        return;
    }

    let header = Row::new(vec![
        Cell::from("When"),
        Cell::from("Device"),
        Cell::from("Score"),
        Cell::from("Result"),
    ])
    .style(
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD),
    );

    let now = Utc::now().naive_utc();
    let rows: Vec<Row> = history
        .history
        .iter()
        .map(|entry| {
            let age_secs = (entry.timestamp - now).num_seconds();
            let when = HumanTime::from(age_secs).to_string();
            let device = match &entry.ip_address {
                Some(ip) => format!("{} {}", entry.device_type, ip),
                None => entry.device_type.clone(),
            };
            let score_style = Style::default().fg(score_color(entry.confidence_score));
            let (result_text, result_style) = if entry.result == "accepted" {
                ("accepted", Style::default().fg(Color::Green))
            } else {
                ("rejected", Style::default().fg(Color::Red))
            };
            Row::new(vec![
                Cell::from(when),
                Cell::from(device),
                Cell::from(format!("{:.1}%", entry.confidence_score)).style(score_style),
                Cell::from(result_text).style(result_style),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        &[
            Constraint::Length(20),
            Constraint::Min(14),
            Constraint::Length(8),
            Constraint::Length(8),
        ],
    )
    .header(header)
    .block(block);

    f.render_widget(table, area);
}

fn render_stats_panel(app: &App, f: &mut Frame, area: Rect) {
    let block = Block::default().borders(Borders::ALL).title("Quick Stats");
    let Some(history) = &app.dashboard.history else {
        f.render_widget(
            Paragraph::new("Loading stats...")
                .block(block)
                .style(Style::default().add_modifier(Modifier::DIM)),
            area,
        );
        return;
    };

    let label = Style::default().add_modifier(Modifier::DIM);
    let value = Style::default().fg(Color::Cyan);
    let samples = app
        .dashboard
        .profile
        .as_ref()
        .map(|p| p.enrollment_samples)
        .unwrap_or(0);
    let lines = vec![
        Line::from(vec![
            Span::styled("total logins    ", label),
            Span::styled(history.total_attempts.to_string(), value),
        ]),
        Line::from(vec![
            Span::styled("success rate    ", label),
            Span::styled(format!("{:.1}%", history.success_rate), value),
        ]),
        Line::from(vec![
            Span::styled("avg confidence  ", label),
            Span::styled(format!("{:.1}%", history.avg_confidence), value),
        ]),
        Line::from(vec![
            Span::styled("enrolled samples", label),
            Span::styled(format!(" {}", samples), value),
        ]),
    ];

    f.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_phrase(app: &App, f: &mut Frame, area: Rect) {
    let focused = app.focus == Focus::Phrase;
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Type This Phrase")
        .border_style(if focused {
            Style::default().fg(Color::Cyan)
        } else {
            Style::default().add_modifier(Modifier::DIM)
        });
    f.render_widget(
        Paragraph::new(phrase_line(&app.capture))
            .block(block)
            .alignment(Alignment::Left)
            .wrap(Wrap { trim: false }),
        area,
    );
}

fn phrase_height(card_width: u16) -> u16 {
    let inner = card_width.saturating_sub(2).max(1);
    let lines = (TARGET_PHRASE.width() as f64 / inner as f64).ceil() as u16;
    lines.max(1) + 2 // borders
}

fn render_hints(f: &mut Frame, area: Rect, text: &str) {
    f.render_widget(
        Paragraph::new(text)
            .style(
                Style::default()
                    .add_modifier(Modifier::ITALIC)
                    .add_modifier(Modifier::DIM),
            )
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true }),
        area,
    );
}

fn render_title(f: &mut Frame, area: Rect, text: &str) {
    f.render_widget(
        Paragraph::new(text)
            .style(
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            )
            .alignment(Alignment::Center),
        area,
    );
}
