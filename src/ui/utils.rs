use ratatui::{
    layout::Rect,
    style::{Color, Style},
};

pub fn border_style(focused: bool) -> Style {
    if focused {
        Style::new().fg(Color::Cyan)
    } else {
        Style::new().fg(Color::DarkGray)
    }
}

/// Slot in the top border of `area` where a throbber is drawn.
pub fn get_loader_area(area: Rect) -> Rect {
    Rect {
        x: area.x + 1,
        y: area.y,
        width: 10.min(area.width.saturating_sub(2)),
        height: 1.min(area.height),
    }
}
