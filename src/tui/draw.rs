use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
};

use super::voice_fx::{glow_border, led_color, shake_offset};
use crate::cassette::CassettePhase;
use crate::engine::{Page, Snapshot};
use crate::face::{FaceEffect, FaceMode, FacePose};
use crate::messages::CassetteMessage;
use crate::screen::PowerAnim;
use crate::visual::{AgentState, ConnectionState, EyeShape, MouthShape};

const SCREEN_BG: Color = Color::Rgb(160, 232, 204);
const BODY: Color = Color::Rgb(96, 172, 160);

/// What one frame shows, gathered by the loop.
pub(crate) struct View<'a> {
    pub snap: &'a Snapshot,
    pub status_lines: Vec<String>,
    pub message: Option<&'a str>,
    pub last_sfx: Option<&'a str>,
    /// Frames since the current shake started.
    pub shake_frame: u64,
}

/// Screen regions, shared with mouse hit-testing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Areas {
    pub header: Rect,
    pub screen: Rect,
    pub slot: Rect,
    pub dpad: Rect,
    pub big_red: Rect,
    pub body: Rect,
    pub footer: Rect,
}

pub(crate) fn layout(size: Rect) -> Areas {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(9),    // Screen
            Constraint::Length(3), // Cassette slot
            Constraint::Length(5), // Controls
            Constraint::Length(3), // Footer
        ])
        .split(size);
    let controls = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Length(15),
            Constraint::Min(0),
            Constraint::Length(11),
        ])
        .split(rows[3]);

    Areas {
        header: rows[0],
        screen: rows[1],
        slot: rows[2],
        dpad: controls[0],
        body: controls[1],
        big_red: controls[2],
        footer: rows[4],
    }
}

pub(crate) fn contains(area: Rect, column: u16, row: u16) -> bool {
    column >= area.x && column < area.x + area.width && row >= area.y && row < area.y + area.height
}

pub(crate) fn center(area: Rect) -> (f32, f32) {
    (
        area.x as f32 + area.width as f32 / 2.0,
        area.y as f32 + area.height as f32 / 2.0,
    )
}

pub(crate) fn draw_ui(frame: &mut Frame, view: &View) {
    let areas = layout(frame.area());
    let snap = view.snap;

    // Header
    let mut header = vec![
        Span::styled("BMO", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::raw(format!("  {}", snap.connection.label())),
    ];
    if snap.connection == ConnectionState::Connected {
        let agent = match (snap.agent_present, snap.agent) {
            (false, _) => "waiting for agent",
            (true, AgentState::Listening) => "listening",
            (true, AgentState::Thinking) => "thinking",
            (true, AgentState::Speaking) => "speaking",
            (true, AgentState::Other) => "idle",
        };
        header.push(Span::styled(format!(" / {}", agent), Style::default().fg(Color::Gray)));
    }
    if snap.test_mode {
        header.push(Span::styled(
            format!("  TEST: {}", snap.face.preset.unwrap_or("-")),
            Style::default().fg(Color::Magenta),
        ));
    }
    header.push(Span::raw("  "));
    header.push(Span::styled("\u{25cf}", Style::default().fg(led_color(snap.led, snap.volume))));
    let header = Paragraph::new(Line::from(header))
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(BODY)),
        );
    frame.render_widget(header, areas.header);

    draw_screen(frame, areas.screen, view);
    draw_slot(frame, areas.slot, snap);
    draw_controls(frame, &areas, snap);

    // Footer
    let base_footer = "\u{2190}\u{2191}\u{2193}\u{2192}: D-pad | Space: Button | p: Power | s: Status | c: Cassette | g/b: Tap | q: Quit";
    let mut footer_text = base_footer.to_string();
    if let Some(sfx) = view.last_sfx {
        footer_text = format!("\u{266a} {} | {}", sfx, footer_text);
    }
    if let Some(message) = view.message.filter(|m| !m.is_empty()) {
        footer_text = format!("{} | {}", message, footer_text);
    }
    let footer = Paragraph::new(footer_text)
        .style(Style::default().fg(Color::Yellow))
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Gray)),
        );
    frame.render_widget(footer, areas.footer);

    if let Some(msg) = &snap.modal {
        draw_cassette_modal(frame, msg);
    }
}

fn draw_screen(frame: &mut Frame, area: Rect, view: &View) {
    let snap = view.snap;
    let (spread, _) = snap.glow;
    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(glow_border(spread))
        .border_style(Style::default().fg(led_color(snap.led, snap.volume)));

    if !snap.content_visible {
        let bg = if snap.screen_off { Color::Black } else { SCREEN_BG };
        let screen = Paragraph::new("").style(Style::default().bg(bg)).block(block);
        frame.render_widget(screen, area);
        return;
    }

    let inner_height = area.height.saturating_sub(2) as usize;
    let lines: Vec<String> = if snap.power_anim == Some(PowerAnim::Off) {
        // Picture collapsing to a line.
        let width = area.width.saturating_sub(4) as usize;
        let mut lines = vec![String::new(); inner_height / 2];
        lines.push("\u{2500}".repeat(width));
        lines
    } else {
        match snap.page {
            Page::Face => {
                let shaking = snap.face.effect == Some(FaceEffect::Shake);
                let offset = shake_offset(shaking, view.shake_frame);
                let mut lines = shift(face_lines(snap.mouth, snap.eye), offset);
                if snap.face.pose == Some(FacePose::Thinking) {
                    lines.insert(0, "?".to_string());
                }
                if snap.face.mode == FaceMode::Loading {
                    lines.push(String::new());
                    lines.push(snap.face.loading_text.clone().unwrap_or_default());
                }
                let pad = inner_height.saturating_sub(lines.len()) / 2;
                let mut padded = vec![String::new(); pad];
                padded.extend(lines);
                padded
            }
            Page::Status => view.status_lines.clone(),
        }
    };

    let alignment = match snap.page {
        Page::Status if snap.power_anim != Some(PowerAnim::Off) => Alignment::Left,
        _ => Alignment::Center,
    };
    let screen = Paragraph::new(lines.join("\n"))
        .style(Style::default().fg(Color::Black).bg(SCREEN_BG))
        .alignment(alignment)
        .block(block);
    frame.render_widget(screen, area);
}

/// Move every line left or right by `offset` cells.
fn shift(lines: Vec<String>, offset: i16) -> Vec<String> {
    match offset {
        0 => lines,
        o if o > 0 => lines
            .into_iter()
            .map(|l| format!("{}{}", " ".repeat(2 * o as usize), l))
            .collect(),
        o => lines
            .into_iter()
            .map(|l| format!("{}{}", l, " ".repeat(2 * o.unsigned_abs() as usize)))
            .collect(),
    }
}

fn eyes(eye: EyeShape) -> String {
    let (left, right) = match eye {
        EyeShape::Normal => ("\u{25cf}", "\u{25cf}"),
        EyeShape::Closed => ("\u{2501}", "\u{2501}"),
        EyeShape::ClosedSquished => (">", "<"),
    };
    format!("{}          {}", left, right)
}

fn mouth(shape: MouthShape) -> [&'static str; 2] {
    match shape {
        MouthShape::Smile => ["\\______/", "        "],
        MouthShape::Sad => [" ______ ", "/      \\"],
        MouthShape::OpenSmile | MouthShape::TalkHappy => ["\\\u{2580}\u{2580}\u{2580}\u{2580}\u{2580}\u{2580}/", " \\____/ "],
        MouthShape::MouthOh => ["  /\u{203e}\u{203e}\\  ", "  \\__/  "],
        MouthShape::OpenSad | MouthShape::TalkSad => ["  ____  ", " /\u{2584}\u{2584}\u{2584}\u{2584}\\ "],
    }
}

/// ASCII face for a static mouth/eye pair.
pub(crate) fn face_lines(mouth_shape: MouthShape, eye: EyeShape) -> Vec<String> {
    let [m1, m2] = mouth(mouth_shape);
    vec![eyes(eye), String::new(), m1.to_string(), m2.to_string()]
}

fn draw_slot(frame: &mut Frame, area: Rect, snap: &Snapshot) {
    let label = match (&snap.cassette_title, snap.cassette_phase) {
        (Some(title), Some(CassettePhase::Insert)) => format!("\u{25bc} {} \u{25bc}", title),
        (Some(title), Some(CassettePhase::Eject)) => format!("\u{25b2} {} \u{25b2}", title),
        (Some(title), Some(CassettePhase::Steady)) => format!("\u{25a0} {}  (c to play)", title),
        _ => String::new(),
    };
    let slot = Paragraph::new(label)
        .alignment(Alignment::Center)
        .style(Style::default().fg(Color::White))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("cassette")
                .border_style(Style::default().fg(BODY)),
        );
    frame.render_widget(slot, area);
}

fn draw_controls(frame: &mut Frame, areas: &Areas, snap: &Snapshot) {
    let dpad_style = if snap.pressed_dpad {
        Style::default().fg(Color::Black).bg(Color::Yellow)
    } else {
        Style::default().fg(Color::Yellow)
    };
    let dpad = Paragraph::new("  \u{25b2}\n\u{25c0}   \u{25b6}\n  \u{25bc}")
        .style(dpad_style)
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(BODY)));
    frame.render_widget(dpad, areas.dpad);

    let body = Paragraph::new("\n\n[ body ]")
        .alignment(Alignment::Center)
        .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(body, areas.body);

    let red_style = if snap.pressed_big_red {
        Style::default().fg(Color::White).bg(Color::Red)
    } else {
        Style::default().fg(Color::Red)
    };
    let big_red = Paragraph::new("\n\u{2b24}")
        .style(red_style)
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(BODY)));
    frame.render_widget(big_red, areas.big_red);
}

fn draw_cassette_modal(frame: &mut Frame, msg: &CassetteMessage) {
    let size = frame.area();
    let popup_area = centered_rect(60, 70, size);

    frame.render_widget(Clear, popup_area);

    let popup = Paragraph::new(msg.content.as_str())
        .style(Style::default().fg(Color::White).bg(Color::Blue))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("{}  (Esc to eject)", msg.title))
                .border_style(Style::default().fg(Color::Yellow)),
        )
        .wrap(Wrap { trim: true });

    frame.render_widget(popup, popup_area);
}

pub(crate) fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_stacks_regions() {
        let areas = layout(Rect::new(0, 0, 80, 30));
        assert_eq!(areas.header.height, 3);
        assert_eq!(areas.footer.y + areas.footer.height, 30);
        assert!(areas.screen.height >= 9);
        assert_eq!(areas.dpad.y, areas.big_red.y);
        assert!(areas.big_red.x > areas.dpad.x);
    }

    #[test]
    fn hit_testing() {
        let r = Rect::new(10, 5, 4, 2);
        assert!(contains(r, 10, 5));
        assert!(contains(r, 13, 6));
        assert!(!contains(r, 14, 6));
        assert!(!contains(r, 9, 5));
        assert_eq!(center(r), (12.0, 6.0));
    }

    #[test]
    fn face_art_reflects_shapes() {
        let open = face_lines(MouthShape::Smile, EyeShape::Normal);
        let closed = face_lines(MouthShape::Smile, EyeShape::Closed);
        assert_ne!(open[0], closed[0]);
        assert_eq!(face_lines(MouthShape::Sad, EyeShape::ClosedSquished)[0].chars().next(), Some('>'));
        assert_eq!(
            face_lines(MouthShape::TalkHappy, EyeShape::Normal),
            face_lines(MouthShape::OpenSmile, EyeShape::Normal)
        );
    }

    #[test]
    fn shift_pads_the_right_side() {
        let lines = vec!["ab".to_string()];
        assert_eq!(shift(lines.clone(), 0), lines);
        assert_eq!(shift(lines.clone(), 1), vec!["  ab".to_string()]);
        assert_eq!(shift(lines, -1), vec!["ab  ".to_string()]);
    }
}
