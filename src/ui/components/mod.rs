use async_trait::async_trait;
use ratatui::buffer::Buffer;

use crate::errors::AppError;
use crate::ui::{Action, layout::Layout};
use ratatui::crossterm::event::Event;

pub mod alert;
pub mod help;
pub mod issue_detail;
pub mod issue_list;
pub mod message_thread;
pub mod profile_card;
pub mod status_bar;

#[async_trait(?Send)]
pub trait DumbComponent {
    fn render(&mut self, area: Layout, buf: &mut Buffer);
    fn register_action_tx(&mut self, action_tx: tokio::sync::mpsc::Sender<Action>) {
        let _ = action_tx;
    }
    async fn handle_event(&mut self, event: Action) -> Result<(), AppError> {
        let _ = event;
        Ok(())
    }
}

#[async_trait(?Send)]
pub trait Component {
    fn render(&mut self, area: Layout, buf: &mut Buffer);
    fn register_action_tx(&mut self, action_tx: tokio::sync::mpsc::Sender<Action>) {
        let _ = action_tx;
    }
    async fn handle_event(&mut self, event: Action) -> Result<(), AppError> {
        let _ = event;
        Ok(())
    }
    fn should_render(&self) -> bool {
        true
    }
    fn is_animating(&self) -> bool {
        false
    }
    /// Set when the component changed on input that does not normally
    /// trigger a draw, such as bare pointer motion.
    fn needs_redraw(&self) -> bool {
        false
    }
    /// Whether the component wants raw key input (e.g. while typing), which
    /// suppresses the global shortcuts.
    fn capture_focus_event(&self, _event: &Event) -> bool {
        false
    }
}
