use std::sync::{Arc, atomic::Ordering};

use rat_widget::statusline_stacked::StatusLineStacked;
use ratatui::{buffer::Buffer, style::Style, widgets::Widget};
use ratatui_macros::span;

use crate::{
    ui::{
        AppState,
        components::{DumbComponent, issue_list::LOADED_ISSUE_COUNT},
        layout::Layout,
    },
    users::UserInfoFetcher,
};

pub struct StatusBar {
    server_label: String,
    fetcher: Arc<UserInfoFetcher>,
}

impl StatusBar {
    pub fn new(app_state: &AppState) -> Self {
        Self {
            server_label: format!(" {} ", app_state.server),
            fetcher: app_state.fetcher.clone(),
        }
    }

    pub fn render(&mut self, area: Layout, buf: &mut Buffer) {
        let issue_count = LOADED_ISSUE_COUNT.load(Ordering::Relaxed);
        let count_text = format!(" Issues: {issue_count} ");
        let profile_text = format!(" Profiles: {} ", self.fetcher.cache_len());

        StatusLineStacked::new()
            .start(
                span!(self.server_label.as_str()).style(Style::new().black().on_green()),
                " ",
            )
            .end(span!(profile_text).style(Style::new().black().on_cyan()), " ")
            .end(span!(count_text).style(Style::new().black().on_blue()), " ")
            .render(area.status_bar, buf);
    }
}

impl DumbComponent for StatusBar {
    fn render(&mut self, area: Layout, buf: &mut Buffer) {
        self.render(area, buf);
    }
}

#[cfg(test)]
mod tests {
    use ratatui::layout::Rect;

    use super::*;
    use crate::{api::testing::FakeApi, users::fetcher::testing::fetcher};

    #[test]
    fn shows_server_and_counts() {
        let (fetcher, _) = fetcher(&[]);
        let state = AppState {
            api: Arc::new(FakeApi::new(0)),
            fetcher: Arc::new(fetcher),
            server: "http://localhost:8000/".into(),
            scroll_threshold: 10,
        };
        let mut bar = StatusBar::new(&state);
        let area = Rect::new(0, 0, 100, 10);
        let mut buf = Buffer::empty(area);
        bar.render(Layout::new(area), &mut buf);
        let rendered: String = buf.content().iter().map(|c| c.symbol()).collect();
        assert!(rendered.contains("http://localhost:8000/"));
        assert!(rendered.contains("Profiles: 0"));
    }
}
