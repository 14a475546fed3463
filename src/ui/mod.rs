pub mod components;
pub mod filter;
pub mod layout;
pub mod utils;

use std::{io::stdout, sync::Arc};

use crossterm::{
    event::{
        DisableMouseCapture, EnableMouseCapture, Event::Key, EventStream, KeyCode::Char, KeyEvent,
        KeyEventKind, KeyboardEnhancementFlags, PopKeyboardEnhancementFlags,
        PushKeyboardEnhancementFlags,
    },
    execute,
};
use futures::{StreamExt, future::FutureExt};
use rat_widget::event::ct_event;
use ratatui::{
    crossterm,
    prelude::*,
    widgets::{Block, BorderType, Paragraph},
};
use ratatui_macros::{line, span};
use tokio::{select, sync::mpsc::Sender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::{
    api::{
        IssueApi,
        models::{IssuePriority, IssueStatus, IssueSummary, Program},
    },
    errors::AppError,
    mentions::FormattedBody,
    pagination::PageAck,
    ui::components::{
        Component, DumbComponent,
        alert::Alert,
        help::{GLOBAL_HELP, HelpComponent, HelpElementKind},
        issue_detail::IssueDetail,
        issue_list::{self, IssueList, MainScreen},
        message_thread::RenderedBatch,
        profile_card::{CardId, MentionAnchor},
        status_bar::StatusBar,
    },
    users::{UserInfoFetcher, UserProfile},
};

const TICK_RATE: std::time::Duration = std::time::Duration::from_millis(100);

pub async fn run(state: AppState) -> Result<(), AppError> {
    let mut terminal = ratatui::init();
    let (action_tx, action_rx) = tokio::sync::mpsc::channel(100);
    let mut app = App::new(action_tx, action_rx, state);
    let result = app.run(&mut terminal).await;
    let _ = execute!(stdout(), DisableMouseCapture, PopKeyboardEnhancementFlags);
    ratatui::restore();
    result
}

/// Everything the components need from the outside world.
#[derive(Clone)]
pub struct AppState {
    pub api: Arc<dyn IssueApi>,
    pub fetcher: Arc<UserInfoFetcher>,
    /// Shown in the status bar.
    pub server: String,
    pub scroll_threshold: usize,
}

struct App {
    action_tx: Sender<Action>,
    action_rx: tokio::sync::mpsc::Receiver<Action>,
    cancel_action: CancellationToken,
    components: Vec<Box<dyn Component>>,
    dumb_components: Vec<Box<dyn DumbComponent>>,
    help: &'static [HelpElementKind],
    in_help: bool,
    alert: Alert,
}

impl App {
    fn new(
        action_tx: Sender<Action>,
        action_rx: tokio::sync::mpsc::Receiver<Action>,
        state: AppState,
    ) -> Self {
        let issue_list = IssueList::new(&state, action_tx.clone());
        let issue_detail = IssueDetail::new(&state);
        let status_bar = StatusBar::new(&state);
        let mut app = Self {
            action_tx,
            action_rx,
            cancel_action: CancellationToken::new(),
            // Drawn in order, so the detail popup lands on top of the list.
            components: vec![Box::new(issue_list), Box::new(issue_detail)],
            dumb_components: vec![Box::new(status_bar)],
            help: issue_list::HELP,
            in_help: false,
            alert: Alert::default(),
        };
        for component in app.components.iter_mut() {
            component.register_action_tx(app.action_tx.clone());
        }
        for component in app.dumb_components.iter_mut() {
            component.register_action_tx(app.action_tx.clone());
        }
        app
    }

    async fn run(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<impl std::io::Write>>,
    ) -> Result<(), AppError> {
        let ctok = self.cancel_action.clone();
        let action_tx = self.action_tx.clone();
        execute!(
            stdout(),
            EnableMouseCapture,
            PushKeyboardEnhancementFlags(KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES)
        )?;
        tokio::spawn(async move {
            let mut tick_interval = tokio::time::interval(TICK_RATE);
            let mut event_stream = EventStream::new();

            loop {
                let event = select! {
                    _ = ctok.cancelled() => break,
                    _ = tick_interval.tick() => Action::Tick,
                    kevent = event_stream.next().fuse() => {
                        match kevent {
                            Some(Ok(kevent)) => Action::AppEvent(kevent),
                            Some(Err(..)) => Action::None,
                            None => break,
                        }
                    }
                };
                if action_tx.send(event).await.is_err() {
                    break;
                }
            }
            Ok::<(), AppError>(())
        });

        self.draw(terminal)?;
        loop {
            let action = self.action_rx.recv().await;
            if self.update(action).await? {
                self.draw(terminal)?;
            }
            if self.cancel_action.is_cancelled() {
                break;
            }
        }

        Ok(())
    }

    /// Routes one action through the overlays, the components and the app
    /// itself. Returns whether the frame needs redrawing.
    async fn update(&mut self, action: Option<Action>) -> Result<bool, AppError> {
        let overlay_consumed = match &action {
            Some(Action::AppEvent(event)) => self.handle_overlay_event(event),
            _ => false,
        };
        if let Some(ref action) = action
            && !overlay_consumed
        {
            for component in self.components.iter_mut() {
                component.handle_event(action.clone()).await?;
            }
            for component in self.dumb_components.iter_mut() {
                component.handle_event(action.clone()).await?;
            }
        }
        let should_draw = match &action {
            Some(Action::Tick) => self.has_animated_components() || self.has_stale_components(),
            Some(Action::None) => false,
            Some(Action::AppEvent(crossterm::event::Event::Mouse(mouse))) => {
                // Bare pointer motion only matters when it changes a card.
                !matches!(mouse.kind, crossterm::event::MouseEventKind::Moved)
                    || self.has_animated_components()
                    || self.has_stale_components()
            }
            Some(Action::Quit) | None => false,
            _ => true,
        };
        match action {
            Some(Action::None) | Some(Action::Tick) => {}
            Some(Action::AppEvent(ref event)) if !overlay_consumed => {
                self.handle_event(event).await?;
            }
            Some(Action::SetHelp(help)) => {
                self.help = help;
            }
            Some(Action::ShowAlert(message)) => {
                info!(%message, "showing alert");
                self.alert.push(message);
            }
            Some(Action::Quit) | None => {
                self.cancel_action.cancel();
            }
            _ => {}
        }
        Ok(should_draw)
    }

    /// The alert and the help overlay sit above every screen and swallow key
    /// input while they are open.
    fn handle_overlay_event(&mut self, event: &crossterm::event::Event) -> bool {
        if matches!(event, ct_event!(key press CONTROL-'c')) {
            return false;
        }
        if self.alert.is_open() {
            if matches!(
                event,
                ct_event!(keycode press Enter) | ct_event!(keycode press Esc)
            ) {
                self.alert.dismiss();
            }
            return matches!(event, crossterm::event::Event::Key(_));
        }
        if self.in_help {
            if matches!(event, ct_event!(keycode press Esc))
                || matches!(event, Key(key) if key.code == Char('?') && key.kind == KeyEventKind::Press)
            {
                self.in_help = false;
            }
            return matches!(event, crossterm::event::Event::Key(_));
        }
        false
    }

    #[instrument(skip(self))]
    async fn handle_event(&mut self, event: &crossterm::event::Event) -> Result<(), AppError> {
        debug!(?event, "Handling event");
        if matches!(event, ct_event!(key press CONTROL-'c')) {
            self.cancel_action.cancel();
            return Ok(());
        }
        let capture_focus = self
            .components
            .iter()
            .any(|c| c.should_render() && c.capture_focus_event(event));
        if capture_focus {
            return Ok(());
        }
        if let Key(key) = event {
            self.handle_key(key).await?;
        }
        Ok(())
    }

    async fn handle_key(&mut self, key: &KeyEvent) -> Result<(), AppError> {
        if key.kind != KeyEventKind::Press {
            return Ok(());
        }
        match key.code {
            Char('q') => self.cancel_action.cancel(),
            Char('?') => self.in_help = true,
            _ => {}
        }
        Ok(())
    }

    fn has_animated_components(&self) -> bool {
        self.components
            .iter()
            .any(|component| component.should_render() && component.is_animating())
    }

    fn has_stale_components(&self) -> bool {
        self.components
            .iter()
            .any(|component| component.should_render() && component.needs_redraw())
    }

    fn draw(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<impl std::io::Write>>,
    ) -> Result<(), AppError> {
        terminal.draw(|f| {
            let area = f.area();
            self.render(area, f.buffer_mut());
        })?;
        Ok(())
    }

    fn render(&mut self, area: Rect, buf: &mut Buffer) {
        let layout = layout::Layout::new(area);
        Paragraph::new(line![
            span!("Triage").bold(),
            span!("  issue management").dim()
        ])
        .render(layout.title_bar, buf);

        for component in self.components.iter_mut() {
            if component.should_render() {
                component.render(layout, buf);
            }
        }
        for component in self.dumb_components.iter_mut() {
            component.render(layout, buf);
        }
        if self.in_help {
            let mut elements = GLOBAL_HELP.to_vec();
            elements.extend_from_slice(self.help);
            HelpComponent::new(&elements)
                .set_constraint(60)
                .block(
                    Block::bordered()
                        .title("Help")
                        .border_type(BorderType::Rounded),
                )
                .render(area, buf);
        }
        self.alert.render(area, buf);
    }
}

#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Action {
    None,
    Tick,
    Quit,
    AppEvent(crossterm::event::Event),
    ForceRender,
    IssuesLoaded(Vec<IssueSummary>),
    ProgramsLoaded(Vec<Program>),
    IssuesLoadError(String),
    OpenIssue {
        issue_id: String,
    },
    IssueDetailLoaded {
        session: u64,
        issue: IssueSummary,
        description: FormattedBody,
        /// Events delivered with the issue itself.
        initial: usize,
        total_events: usize,
        batch: RenderedBatch,
    },
    IssueDetailError {
        session: u64,
    },
    MessagesLoaded {
        session: u64,
        ack: PageAck,
        batch: RenderedBatch,
    },
    MessagesError {
        session: u64,
    },
    StatusUpdated {
        issue_id: String,
        status: IssueStatus,
    },
    StatusUpdateFailed {
        issue_id: String,
        previous: IssueStatus,
        message: String,
    },
    PriorityUpdated {
        issue_id: String,
        priority: IssuePriority,
    },
    PriorityUpdateFailed {
        issue_id: String,
        previous: IssuePriority,
        message: String,
    },
    ProfileCardReady {
        anchor: MentionAnchor,
        profile: UserProfile,
        pinned: bool,
    },
    ProfileCardExpired {
        card: CardId,
    },
    ShowAlert(String),
    ChangeScreen(MainScreen),
    SetHelp(&'static [HelpElementKind]),
}
