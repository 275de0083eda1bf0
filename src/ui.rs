pub mod charting;

use ratatui::{
    buffer::Buffer,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Axis, Chart, Dataset, GraphType, Paragraph, Widget, Wrap},
};
use unicode_width::UnicodeWidthStr;

use crate::app::{App, AppState};
use crate::clock::Clock;
use crate::mission::MissionState;
use crate::session::SessionStatus;
use crate::time_series::wpm_coords;

const HORIZONTAL_MARGIN: u16 = 5;
const VERTICAL_MARGIN: u16 = 2;

impl<C: Clock> Widget for &App<C> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        match self.state {
            AppState::Typing => render_typing(self, area, buf),
            AppState::Results => render_results(self, area, buf),
        }
    }
}

fn bold() -> Style {
    Style::default().add_modifier(Modifier::BOLD)
}

fn dim_bold() -> Style {
    bold().add_modifier(Modifier::DIM)
}

fn mission_line(state: &MissionState) -> Option<Span<'static>> {
    let span = match state {
        MissionState::Idle => return None,
        MissionState::Briefing => Span::styled("MISSION BRIEFING", dim_bold()),
        MissionState::Operational => {
            Span::styled("MISSION ACTIVE", bold().fg(Color::Cyan))
        }
        MissionState::Succeeded => {
            Span::styled("MISSION ACCOMPLISHED", bold().fg(Color::Green))
        }
        MissionState::Failed(reason) => {
            Span::styled(format!("MISSION FAILED: {reason}"), bold().fg(Color::Red))
        }
    };
    Some(span)
}

fn render_typing<C: Clock>(app: &App<C>, area: Rect, buf: &mut Buffer) {
    let ctl = &app.controller;
    let session = ctl.session();
    let prompt = session.target_text();

    let max_chars_per_line = area.width.saturating_sub(HORIZONTAL_MARGIN * 2).max(1);
    let prompt_lines = if prompt.width() <= max_chars_per_line as usize {
        1
    } else {
        (prompt.width() as f64 / max_chars_per_line as f64).ceil() as u16 + 1
    };
    let opponent_lines = ctl.opponents().len() as u16;
    let filler = area
        .height
        .saturating_sub(prompt_lines + opponent_lines + 2)
        / 2;

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .horizontal_margin(HORIZONTAL_MARGIN)
        .constraints([
            Constraint::Length(filler),
            Constraint::Length(1), // live figures or pause banner
            Constraint::Length(1), // mission
            Constraint::Length(prompt_lines),
            Constraint::Length(opponent_lines),
            Constraint::Min(0),
        ])
        .split(area);

    let status = if ctl.is_paused() {
        Span::styled(
            "PAUSED - press any key to continue typing",
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::ITALIC),
        )
    } else {
        let tally = ctl.local_tally();
        Span::styled(
            format!(
                "{:.0} wpm   {:.0}% acc",
                tally.net_wpm(),
                ctl.metrics().accuracy
            ),
            dim_bold(),
        )
    };
    Paragraph::new(status)
        .alignment(Alignment::Center)
        .render(chunks[1], buf);

    if let Some(span) = mission_line(ctl.mission_state()) {
        Paragraph::new(span)
            .alignment(Alignment::Center)
            .render(chunks[2], buf);
    }

    let ghost = ctl.ghost_cursor();
    let ghost_style = Style::default().bg(Color::Magenta);
    let spans: Vec<Span> = session
        .target
        .iter()
        .enumerate()
        .map(|(idx, &expected)| {
            let mut span = match session.input.get(idx) {
                Some(&typed) if typed == expected => {
                    Span::styled(expected.to_string(), bold().fg(Color::Green))
                }
                Some(&typed) => Span::styled(
                    match typed {
                        ' ' => "·".to_owned(),
                        c => c.to_string(),
                    },
                    bold().fg(Color::Red),
                ),
                None if idx == session.input.len() => Span::styled(
                    expected.to_string(),
                    dim_bold().add_modifier(Modifier::UNDERLINED),
                ),
                None => Span::styled(expected.to_string(), dim_bold()),
            };
            if ghost == Some(idx) {
                span = span.patch_style(ghost_style);
            }
            span
        })
        .collect();

    Paragraph::new(Line::from(spans))
        .alignment(if prompt_lines == 1 {
            Alignment::Center
        } else {
            Alignment::Left
        })
        .wrap(Wrap { trim: true })
        .render(chunks[3], buf);

    let opponents: Vec<Line> = ctl
        .opponents()
        .iter()
        .map(|o| {
            let marker = if o.progress.is_finished { " done" } else { "" };
            Line::from(Span::styled(
                format!(
                    "{}  {:.0}%  {} wpm{}",
                    o.player_id, o.progress.progress_percent, o.progress.wpm, marker
                ),
                Style::default().fg(Color::Cyan),
            ))
        })
        .collect();
    Paragraph::new(opponents)
        .alignment(Alignment::Center)
        .render(chunks[4], buf);
}

fn render_results<C: Clock>(app: &App<C>, area: Rect, buf: &mut Buffer) {
    let ctl = &app.controller;

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .horizontal_margin(HORIZONTAL_MARGIN)
        .vertical_margin(VERTICAL_MARGIN)
        .constraints([
            Constraint::Min(1),    // chart
            Constraint::Length(1), // stats
            Constraint::Length(1), // mission
            Constraint::Length(1), // padding
            Constraint::Length(1), // legend
        ])
        .split(area);

    let coords = wpm_coords(ctl.graph_samples());
    let (overall_duration, highest_wpm) = charting::compute_chart_params(&coords);
    let datasets = vec![Dataset::default()
        .marker(ratatui::symbols::Marker::Braille)
        .style(Style::default().fg(Color::Magenta))
        .graph_type(GraphType::Line)
        .data(&coords)];

    Chart::new(datasets)
        .x_axis(
            Axis::default()
                .title("seconds")
                .bounds([0.0, overall_duration])
                .labels(vec![
                    Span::styled("0", bold()),
                    Span::styled(charting::format_label(overall_duration), bold()),
                ]),
        )
        .y_axis(
            Axis::default()
                .title("wpm")
                .bounds([0.0, highest_wpm.max(1.0)])
                .labels(vec![
                    Span::styled("0", bold()),
                    Span::styled(charting::format_label(highest_wpm), bold()),
                ]),
        )
        .render(chunks[0], buf);

    let stats = match ctl.report() {
        Some(report) => format!(
            "{:.0} wpm   {:.0} raw   {:.0}% acc   {:.0}% consistency   {} errors",
            report.net_wpm,
            report.raw_wpm,
            report.metrics.accuracy,
            report.metrics.consistency,
            report.total_errors
        ),
        None => {
            let tally = ctl.local_tally();
            format!(
                "stopped at {}/{} chars   {:.0} wpm",
                ctl.input().len(),
                ctl.session().target.len(),
                tally.net_wpm()
            )
        }
    };
    Paragraph::new(Span::styled(stats, bold()))
        .alignment(Alignment::Center)
        .render(chunks[1], buf);

    let mission = mission_line(ctl.mission_state()).or_else(|| {
        (ctl.status() == SessionStatus::Aborted)
            .then(|| Span::styled("ABORTED", bold().fg(Color::Red)))
    });
    if let Some(span) = mission {
        Paragraph::new(span)
            .alignment(Alignment::Center)
            .render(chunks[2], buf);
    }

    Paragraph::new(Span::styled(
        "(r)etry / (esc)ape",
        Style::default().add_modifier(Modifier::ITALIC),
    ))
    .render(chunks[4], buf);
}
