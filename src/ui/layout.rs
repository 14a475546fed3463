use ratatui::layout::{Constraint, Rect};
use ratatui_macros::vertical;

#[derive(Debug, Clone, Copy)]
pub struct Layout {
    pub title_bar: Rect,
    pub filter_bar: Rect,
    pub main_content: Rect,
    pub modal: Rect,
    pub status_bar: Rect,
}

impl Layout {
    pub fn new(area: Rect) -> Self {
        let [title_bar, main, status_bar] = vertical![==1, *=1, ==1].areas(area);
        let [filter_bar, main_content] = vertical![==3, *=1].areas(main);
        let modal = main.centered(Constraint::Percentage(85), Constraint::Percentage(90));
        Self {
            title_bar,
            filter_bar,
            main_content,
            modal,
            status_bar,
        }
    }

    pub fn fullscreen(area: Rect) -> Self {
        Self {
            title_bar: area,
            filter_bar: area,
            main_content: area,
            modal: area,
            status_bar: area,
        }
    }
}
