use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Rect},
    style::{Color, Style, Stylize},
    text::Line,
    widgets::{Block, BorderType, Clear, Paragraph, Widget, Wrap},
};
use ratatui_macros::line;

/// Blocking error popup. While open it swallows all key input until the
/// user acknowledges it.
#[derive(Debug, Default)]
pub struct Alert {
    queue: Vec<String>,
}

impl Alert {
    pub fn push(&mut self, message: impl Into<String>) {
        self.queue.push(message.into());
    }

    pub fn is_open(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn current(&self) -> Option<&str> {
        self.queue.first().map(String::as_str)
    }

    /// Dismisses the visible message and reveals the next queued one.
    pub fn dismiss(&mut self) {
        if !self.queue.is_empty() {
            self.queue.remove(0);
        }
    }

    pub fn render(&self, area: Rect, buf: &mut Buffer) {
        let Some(message) = self.current() else {
            return;
        };
        let popup_area = area.centered(Constraint::Percentage(50), Constraint::Length(7));
        Clear.render(popup_area, buf);
        let block = Block::bordered()
            .border_type(BorderType::Rounded)
            .border_style(Style::new().fg(Color::Red))
            .title("Error")
            .title_bottom(line!["Enter/Esc: dismiss"].dim());
        Paragraph::new(vec![Line::from(message.to_string())])
            .wrap(Wrap { trim: true })
            .block(block)
            .render(popup_area, buf);
    }
}
