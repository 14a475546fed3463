use ratatui::{
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{BlockExt, Clear, Widget},
};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelpElementKind {
    Keybind(&'static str, &'static str),
    Text(&'static str),
}

#[macro_export]
macro_rules! help_keybind {
    ($key:expr, $description:expr) => {
        $crate::ui::components::help::HelpElementKind::Keybind($key, $description)
    };
}

#[macro_export]
macro_rules! help_text {
    ($text:expr) => {
        $crate::ui::components::help::HelpElementKind::Text($text)
    };
}

pub const GLOBAL_HELP: &[HelpElementKind] = &[
    crate::help_text!("Global Help"),
    crate::help_keybind!("q / Ctrl+C", "quit"),
    crate::help_keybind!("?", "toggle this help"),
    crate::help_text!("Each screen lists its own keys here once it is active."),
];

pub fn help_elements_to_text(elements: &[HelpElementKind], width: u16) -> Text<'static> {
    let mut lines = Vec::with_capacity(elements.len());
    for element in elements {
        match element {
            HelpElementKind::Keybind(key, description) => {
                let total_length = (key.len() + description.len()) as u16;
                let padding = if total_length < width {
                    width - total_length
                } else {
                    1
                };
                lines.push(Line::from(vec![
                    Span::styled(
                        *key,
                        Style::new().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                    ),
                    Span::raw(" ".repeat(padding as usize)),
                    Span::raw(*description),
                ]));
            }
            HelpElementKind::Text(text) => {
                let wrapped = textwrap::wrap(text, width.max(1) as usize);
                lines.extend(
                    wrapped
                        .into_iter()
                        .map(|line| Line::from(line.into_owned()).centered()),
                );
            }
        }
    }
    Text::from(lines)
}

/// Help overlay, optionally centered within its parent area via `set_constraint`.
pub struct HelpComponent<'a> {
    constraint: u16,
    content: &'a [HelpElementKind],
    block: Option<ratatui::widgets::Block<'a>>,
}

impl<'a> HelpComponent<'a> {
    pub fn new(content: &'a [HelpElementKind]) -> Self {
        Self {
            content,
            constraint: 0,
            block: None,
        }
    }

    /// Percentage of the parent area the overlay may occupy.
    pub fn set_constraint(self, constraint: u16) -> Self {
        Self { constraint, ..self }
    }

    pub fn block(self, block: ratatui::widgets::Block<'a>) -> Self {
        Self {
            block: Some(block),
            ..self
        }
    }
}

impl<'a> Widget for HelpComponent<'a> {
    fn render(self, area: ratatui::layout::Rect, buf: &mut ratatui::buffer::Buffer) {
        use ratatui::layout::Constraint::Percentage;
        trace!(content_length = self.content.len(), "Rendering HelpComponent");
        let mut centered_area = if self.constraint != 0 {
            area.centered(Percentage(self.constraint), Percentage(self.constraint))
        } else {
            area
        };
        let mut inner = self.block.inner_if_some(centered_area);
        let text = help_elements_to_text(self.content, inner.width);
        let text_height = (text.height() as u16).min(inner.height);
        let y_offset = (inner.height - text_height) / 2;
        inner.y += y_offset;
        inner.height = text_height;
        centered_area.y += y_offset;
        centered_area.height = (text_height + 2).min(area.bottom().saturating_sub(centered_area.y));
        Clear.render(centered_area, buf);
        if let Some(block) = &self.block {
            block.render(centered_area, buf);
        }
        text.render(inner, buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keybinds_are_padded_to_width() {
        let text = help_elements_to_text(&[crate::help_keybind!("q", "quit")], 20);
        let line: String = text.lines[0]
            .spans
            .iter()
            .map(|s| s.content.as_ref())
            .collect();
        assert_eq!(line.len(), 20);
        assert!(line.starts_with('q') && line.ends_with("quit"));
    }

    #[test]
    fn text_elements_wrap() {
        let text = help_elements_to_text(&[crate::help_text!("one two three four")], 9);
        assert!(text.lines.len() >= 2);
    }
}
