use std::{collections::HashSet, sync::Arc, time::Instant};

use async_trait::async_trait;
use rat_widget::event::ct_event;
use ratatui::{
    buffer::Buffer,
    crossterm::event::{self, MouseButton, MouseEventKind},
    layout::{Constraint, Position, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span},
    widgets::{Block, BorderType, Clear, List, ListItem, ListState, Paragraph, StatefulWidget, Widget},
};
use ratatui_macros::{line, vertical};
use throbber_widgets_tui::{BRAILLE_SIX_DOUBLE, Throbber, ThrobberState, WhichUse};
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
    api::{
        IssueApi,
        models::{IssuePriority, IssueStatus, IssueSummary, ProgramDirectory, format_timestamp},
    },
    errors::AppError,
    mentions::{FormattedBody, MentionFormatter},
    pagination::{PageAck, PageRequest, Paginator},
    ui::{
        Action, AppState,
        components::{
            Component,
            help::HelpElementKind,
            issue_list::MainScreen,
            message_thread::{MessageRenderer, MessageThread, draw_lines, wrap_segments},
            profile_card::{MentionAnchor, ProfileCards},
        },
        layout::Layout,
        utils::{border_style, get_loader_area},
    },
    users::UserInfoFetcher,
};

pub const DETAIL_ERROR: &str = "Error loading issue details";
const DESCRIPTION_ROWS: usize = 6;
const WHEEL_STEP: isize = 3;

pub const HELP: &[HelpElementKind] = &[
    crate::help_text!("Issue Details"),
    crate::help_keybind!("Up / Down", "scroll the thread"),
    crate::help_keybind!("PgUp / PgDn", "scroll a page"),
    crate::help_keybind!("Home / End", "jump to start / end"),
    crate::help_keybind!("s", "change status"),
    crate::help_keybind!("p", "change priority"),
    crate::help_keybind!("mouse over @name", "preview profile"),
    crate::help_keybind!("click @name", "pin profile"),
    crate::help_keybind!("Esc", "close picker, pinned cards, then the issue"),
];

/// One opening of the detail popup. Responses tagged with another session
/// id are stale and dropped.
#[derive(Debug)]
struct DetailSession {
    id: u64,
    issue_id: String,
    cancel: CancellationToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum DetailState {
    Loading,
    Loaded,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum EditorKind {
    Status,
    Priority,
}

#[derive(Debug)]
struct Editor {
    kind: EditorKind,
    list_state: ListState,
}

impl Editor {
    fn options(&self) -> Vec<&'static str> {
        match self.kind {
            EditorKind::Status => IssueStatus::ALL.iter().map(|s| s.label()).collect(),
            EditorKind::Priority => IssuePriority::ALL.iter().map(|p| p.label()).collect(),
        }
    }
}

pub struct IssueDetail {
    api: Arc<dyn IssueApi>,
    renderer: MessageRenderer,
    fetcher: Arc<UserInfoFetcher>,
    threshold: usize,
    screen: MainScreen,
    session: Option<DetailSession>,
    next_session: u64,
    state: DetailState,
    issue: Option<IssueSummary>,
    programs: ProgramDirectory,
    description: FormattedBody,
    thread: MessageThread,
    paginator: Paginator,
    scroll: usize,
    content_rows: usize,
    viewport_rows: usize,
    anchors: Vec<MentionAnchor>,
    cards: ProfileCards,
    /// Card revision present in the last drawn frame.
    drawn_cards: u64,
    editor: Option<Editor>,
    /// Updates sent but not yet answered. The matching editor stays closed
    /// until the server replies, so a failure never reverts a later edit.
    pending: HashSet<(String, EditorKind)>,
    throbber_state: ThrobberState,
    action_tx: Option<Sender<Action>>,
}

impl IssueDetail {
    pub fn new(state: &AppState) -> Self {
        Self {
            api: state.api.clone(),
            renderer: MessageRenderer::new(state.fetcher.clone()),
            fetcher: state.fetcher.clone(),
            threshold: state.scroll_threshold,
            screen: MainScreen::List,
            session: None,
            next_session: 0,
            state: DetailState::Loading,
            issue: None,
            programs: ProgramDirectory::default(),
            description: FormattedBody::default(),
            thread: MessageThread::default(),
            paginator: Paginator::new(0, 0, state.scroll_threshold),
            scroll: 0,
            content_rows: 0,
            viewport_rows: 0,
            anchors: Vec::new(),
            cards: ProfileCards::new(state.fetcher.clone()),
            drawn_cards: 0,
            editor: None,
            pending: HashSet::new(),
            throbber_state: ThrobberState::default(),
            action_tx: None,
        }
    }

    fn is_current(&self, session: u64) -> bool {
        self.session.as_ref().is_some_and(|s| s.id == session)
    }

    #[instrument(skip(self))]
    fn open(&mut self, issue_id: String) {
        self.close_session();
        let id = self.next_session;
        self.next_session += 1;
        let cancel = CancellationToken::new();
        self.session = Some(DetailSession {
            id,
            issue_id: issue_id.clone(),
            cancel: cancel.clone(),
        });
        self.screen = MainScreen::Details;
        self.state = DetailState::Loading;
        self.issue = None;
        self.description = FormattedBody::default();
        self.thread.clear();
        self.paginator = Paginator::new(0, 0, self.threshold);
        self.scroll = 0;
        self.anchors.clear();
        self.cards.close_all_pinned();
        self.cards.release_hover();
        self.editor = None;

        let Some(action_tx) = self.action_tx.clone() else {
            return;
        };
        let api = self.api.clone();
        let fetcher = self.fetcher.clone();
        let renderer = self.renderer.clone();
        tokio::spawn(async move {
            let load = async {
                match api.issue_detail(&issue_id).await {
                    Ok(detail) => {
                        let description = MentionFormatter::new(&fetcher)
                            .format(&detail.summary.description)
                            .await;
                        let batch = renderer.render_batch(&detail.events).await;
                        info!(
                            %issue_id,
                            initial = detail.events.len(),
                            total = detail.total_events,
                            "loaded issue details"
                        );
                        Action::IssueDetailLoaded {
                            session: id,
                            initial: detail.events.len(),
                            total_events: detail.total_events,
                            issue: detail.summary,
                            description,
                            batch,
                        }
                    }
                    Err(err) => {
                        warn!(%issue_id, %err, "failed to load issue details");
                        Action::IssueDetailError { session: id }
                    }
                }
            };
            tokio::select! {
                _ = cancel.cancelled() => debug!("detail load cancelled"),
                action = load => {
                    let _ = action_tx.send(action).await;
                }
            }
        });
    }

    fn close_session(&mut self) {
        if let Some(session) = self.session.take() {
            debug!(session = session.id, issue_id = %session.issue_id, "closing detail session");
            session.cancel.cancel();
        }
    }

    async fn close(&mut self) {
        self.close_session();
        self.cards.close_all_pinned();
        self.cards.release_hover();
        self.editor = None;
        self.screen = MainScreen::List;
        if let Some(tx) = &self.action_tx {
            let _ = tx.send(Action::ChangeScreen(MainScreen::List)).await;
        }
    }

    fn remaining_rows(&self) -> usize {
        self.content_rows
            .saturating_sub(self.scroll + self.viewport_rows)
    }

    fn max_scroll(&self) -> usize {
        self.content_rows.saturating_sub(self.viewport_rows)
    }

    fn scroll_by(&mut self, delta: isize) {
        let next = self
            .scroll
            .saturating_add_signed(delta)
            .min(self.max_scroll());
        if next != self.scroll {
            self.scroll = next;
            self.cards.release_hover();
        }
        self.evaluate_scroll(Instant::now());
    }

    fn evaluate_scroll(&mut self, now: Instant) {
        if self.state != DetailState::Loaded {
            return;
        }
        if let Some(request) = self.paginator.on_scroll(self.remaining_rows(), now) {
            self.fetch_page(request);
        }
    }

    fn fetch_page(&mut self, request: PageRequest) {
        let (Some(session), Some(action_tx)) = (&self.session, self.action_tx.clone()) else {
            self.paginator.fail();
            return;
        };
        let session_id = session.id;
        let cancel = session.cancel.clone();
        let issue_id = session.issue_id.clone();
        let api = self.api.clone();
        let renderer = self.renderer.clone();
        tokio::spawn(async move {
            let load = async {
                match api
                    .messages(&issue_id, request.offset, request.limit)
                    .await
                {
                    Ok(page) => {
                        let batch = renderer.render_batch(&page.events).await;
                        Action::MessagesLoaded {
                            session: session_id,
                            ack: PageAck {
                                offset: page.offset,
                                returned: page.returned,
                                total_events: page.total_events,
                            },
                            batch,
                        }
                    }
                    Err(err) => {
                        warn!(%issue_id, offset = request.offset, %err, "failed to load messages");
                        Action::MessagesError {
                            session: session_id,
                        }
                    }
                }
            };
            tokio::select! {
                _ = cancel.cancelled() => debug!("page load cancelled"),
                action = load => {
                    let _ = action_tx.send(action).await;
                }
            }
        });
    }

    fn open_editor(&mut self, kind: EditorKind) {
        let Some(issue) = &self.issue else {
            return;
        };
        if self.pending.contains(&(issue.id.clone(), kind)) {
            debug!(issue_id = %issue.id, ?kind, "update still in flight");
            return;
        }
        let selected = match kind {
            EditorKind::Status => IssueStatus::ALL.iter().position(|s| *s == issue.status),
            EditorKind::Priority => IssuePriority::ALL
                .iter()
                .position(|p| *p == issue.priority),
        };
        self.editor = Some(Editor {
            kind,
            list_state: ListState::default().with_selected(selected.or(Some(0))),
        });
    }

    /// Applies the picked value right away and reverts if the server refuses.
    fn apply_editor(&mut self) {
        let Some(editor) = self.editor.take() else {
            return;
        };
        let index = editor.list_state.selected().unwrap_or(0);
        let (Some(issue), Some(action_tx)) = (self.issue.as_mut(), self.action_tx.clone()) else {
            return;
        };
        let api = self.api.clone();
        let issue_id = issue.id.clone();
        match editor.kind {
            EditorKind::Status => {
                let Some(&status) = IssueStatus::ALL.get(index) else {
                    return;
                };
                let previous = issue.status;
                if previous == status {
                    return;
                }
                issue.status = status;
                self.pending.insert((issue_id.clone(), EditorKind::Status));
                tokio::spawn(async move {
                    let action = match api.update_status(&issue_id, status).await {
                        Ok(()) => Action::StatusUpdated { issue_id, status },
                        Err(err) => {
                            warn!(%issue_id, %err, "status update failed");
                            Action::StatusUpdateFailed {
                                issue_id,
                                previous,
                                message: format!("Failed to update status: {err}"),
                            }
                        }
                    };
                    let _ = action_tx.send(action).await;
                });
            }
            EditorKind::Priority => {
                let Some(&priority) = IssuePriority::ALL.get(index) else {
                    return;
                };
                let previous = issue.priority;
                if previous == priority {
                    return;
                }
                issue.priority = priority;
                self.pending.insert((issue_id.clone(), EditorKind::Priority));
                tokio::spawn(async move {
                    let action = match api.update_priority(&issue_id, priority).await {
                        Ok(()) => Action::PriorityUpdated {
                            issue_id,
                            priority,
                        },
                        Err(err) => {
                            warn!(%issue_id, %err, "priority update failed");
                            Action::PriorityUpdateFailed {
                                issue_id,
                                previous,
                                message: format!("Failed to update priority: {err}"),
                            }
                        }
                    };
                    let _ = action_tx.send(action).await;
                });
            }
        }
    }

    async fn handle_editor_event(&mut self, event: &event::Event) -> bool {
        let Some(editor) = self.editor.as_mut() else {
            return false;
        };
        match event {
            ct_event!(keycode press Esc) => self.editor = None,
            ct_event!(keycode press Up) => editor.list_state.select_previous(),
            ct_event!(keycode press Down) => {
                let last = editor.options().len().saturating_sub(1);
                let next = editor.list_state.selected().map_or(0, |i| (i + 1).min(last));
                editor.list_state.select(Some(next));
            }
            ct_event!(keycode press Enter) => self.apply_editor(),
            _ => {}
        }
        true
    }

    fn handle_mouse(&mut self, mouse: &event::MouseEvent) {
        let pos = Position::new(mouse.column, mouse.row);
        match mouse.kind {
            MouseEventKind::Moved => {
                self.cards.on_mouse_move(pos, &self.anchors);
            }
            MouseEventKind::Down(MouseButton::Left) => {
                self.cards.on_click(pos, &self.anchors);
            }
            MouseEventKind::ScrollDown => self.scroll_by(WHEEL_STEP),
            MouseEventKind::ScrollUp => self.scroll_by(-WHEEL_STEP),
            _ => {}
        }
    }

    pub fn render(&mut self, area: Layout, buf: &mut Buffer) {
        let modal = area.modal;
        self.cards.set_viewport(area.main_content);
        self.drawn_cards = self.cards.revision();
        Clear.render(modal, buf);
        let title = match &self.issue {
            Some(issue) => format!("{} ({})", issue.title, issue.id),
            None => self
                .session
                .as_ref()
                .map(|s| s.issue_id.clone())
                .unwrap_or_default(),
        };
        let block = Block::bordered()
            .border_type(BorderType::Rounded)
            .border_style(border_style(self.editor.is_none()))
            .title(title)
            .title_bottom(line!["Esc: close  s: status  p: priority"].dim());
        let inner = block.inner(modal);
        block.render(modal, buf);

        match self.state {
            DetailState::Loading => {
                let throbber = Throbber::default()
                    .label("Loading")
                    .style(Style::new().fg(Color::Cyan))
                    .throbber_set(BRAILLE_SIX_DOUBLE)
                    .use_type(WhichUse::Spin);
                StatefulWidget::render(
                    throbber,
                    get_loader_area(modal),
                    buf,
                    &mut self.throbber_state,
                );
                self.anchors.clear();
                return;
            }
            DetailState::Error => {
                Paragraph::new(line![DETAIL_ERROR].fg(Color::Red))
                    .centered()
                    .render(inner, buf);
                self.anchors.clear();
                return;
            }
            DetailState::Loaded => {}
        }

        let description_lines = wrap_segments(&self.description.segments, inner.width as usize);
        let description_rows = description_lines.len().clamp(1, DESCRIPTION_ROWS) as u16;
        let description_height = description_rows + 1;
        let [meta_area, description_area, thread_area] =
            vertical![==3, ==description_height, *=1].areas(inner);

        self.render_meta(meta_area, buf);
        let mut anchors = draw_lines(
            &description_lines[..description_rows as usize],
            description_area,
            0,
            buf,
        );

        let thread_block = Block::new()
            .borders(ratatui::widgets::Borders::TOP)
            .border_style(Style::new().fg(Color::DarkGray))
            .title(format!("Thread ({})", self.thread.len()));
        let thread_block = match self.paginator.indicator() {
            Some(indicator) => thread_block.title_bottom(Line::from(indicator).dim().right_aligned()),
            None => thread_block,
        };
        let thread_inner = thread_block.inner(thread_area);
        thread_block.render(thread_area, buf);

        self.content_rows = self.thread.lines(thread_inner.width as usize).len();
        self.viewport_rows = thread_inner.height as usize;
        self.scroll = self.scroll.min(self.max_scroll());
        anchors.extend(self.thread.draw(thread_inner, self.scroll, buf));
        self.anchors = anchors;

        if self.paginator.cursor().is_loading {
            let throbber = Throbber::default()
                .label("Loading")
                .style(Style::new().fg(Color::Cyan))
                .throbber_set(BRAILLE_SIX_DOUBLE)
                .use_type(WhichUse::Spin);
            StatefulWidget::render(
                throbber,
                get_loader_area(thread_area),
                buf,
                &mut self.throbber_state,
            );
        }

        if let Some(editor) = self.editor.as_mut() {
            render_editor(editor, modal, buf);
        }
        self.cards.render(buf);
    }

    fn render_meta(&self, area: Rect, buf: &mut Buffer) {
        let Some(issue) = &self.issue else {
            return;
        };
        let label = Style::new().add_modifier(Modifier::DIM);
        let saving = |kind: EditorKind| {
            if self.pending.contains(&(issue.id.clone(), kind)) {
                Span::styled(" (saving)", label)
            } else {
                Span::raw("")
            }
        };
        let lines = vec![
            Line::from(vec![
                Span::styled("Status: ", label),
                Span::styled(issue.status.label(), status_style(issue.status)),
                saving(EditorKind::Status),
                Span::styled("  Priority: ", label),
                Span::styled(issue.priority.label(), priority_style(issue.priority)),
                saving(EditorKind::Priority),
            ]),
            Line::from(vec![
                Span::styled("Program: ", label),
                Span::raw(self.programs.label(issue.program_id.as_deref())),
                Span::styled("  Source: ", label),
                Span::raw(issue.source.clone().unwrap_or_else(|| "-".into())),
            ]),
            Line::from(vec![
                Span::styled("Created: ", label),
                Span::raw(format_timestamp(issue.created_at.as_ref())),
                Span::styled("  Updated: ", label),
                Span::raw(format_timestamp(issue.updated_at.as_ref())),
            ]),
        ];
        Paragraph::new(lines).render(area, buf);
    }
}

fn render_editor(editor: &mut Editor, modal: Rect, buf: &mut Buffer) {
    let options = editor.options();
    let height = options.len() as u16 + 2;
    let area = modal.centered(Constraint::Length(24), Constraint::Length(height));
    let title = match editor.kind {
        EditorKind::Status => "Status",
        EditorKind::Priority => "Priority",
    };
    Clear.render(area, buf);
    let list = List::new(options.into_iter().map(ListItem::new))
        .block(
            Block::bordered()
                .border_type(BorderType::Rounded)
                .border_style(border_style(true))
                .title(title),
        )
        .highlight_style(Style::new().add_modifier(Modifier::REVERSED));
    StatefulWidget::render(list, area, buf, &mut editor.list_state);
}

pub fn status_style(status: IssueStatus) -> Style {
    match status {
        IssueStatus::Unverified => Style::new().fg(Color::Gray),
        IssueStatus::Verified => Style::new().fg(Color::Cyan),
        IssueStatus::InProgress => Style::new().fg(Color::Yellow),
        IssueStatus::Resolved => Style::new().fg(Color::Green),
    }
}

pub fn priority_style(priority: IssuePriority) -> Style {
    match priority {
        IssuePriority::Low => Style::new().fg(Color::Gray),
        IssuePriority::Medium => Style::new().fg(Color::Blue),
        IssuePriority::High => Style::new().fg(Color::Yellow),
        IssuePriority::Critical => Style::new().fg(Color::Red).add_modifier(Modifier::BOLD),
    }
}

#[async_trait(?Send)]
impl Component for IssueDetail {
    fn render(&mut self, area: Layout, buf: &mut Buffer) {
        self.render(area, buf);
    }

    fn register_action_tx(&mut self, action_tx: Sender<Action>) {
        self.cards.register_action_tx(action_tx.clone());
        self.action_tx = Some(action_tx);
    }

    async fn handle_event(&mut self, event: Action) -> Result<(), AppError> {
        match event {
            Action::OpenIssue { issue_id } => {
                self.open(issue_id);
                if let Some(tx) = &self.action_tx {
                    tx.send(Action::SetHelp(HELP)).await?;
                }
            }
            Action::ChangeScreen(screen) => {
                if screen == MainScreen::List && self.screen == MainScreen::Details {
                    self.close_session();
                }
                self.screen = screen;
            }
            Action::AppEvent(ref event) => {
                if self.screen != MainScreen::Details {
                    return Ok(());
                }
                if self.handle_editor_event(event).await {
                    return Ok(());
                }
                match event {
                    ct_event!(keycode press Esc) => {
                        if self.cards.has_pinned() {
                            self.cards.close_all_pinned();
                        } else {
                            self.close().await;
                        }
                    }
                    ct_event!(key press 's') => self.open_editor(EditorKind::Status),
                    ct_event!(key press 'p') => self.open_editor(EditorKind::Priority),
                    ct_event!(keycode press Up) => self.scroll_by(-1),
                    ct_event!(keycode press Down) => self.scroll_by(1),
                    ct_event!(keycode press PageUp) => {
                        self.scroll_by(-(self.viewport_rows.max(1) as isize))
                    }
                    ct_event!(keycode press PageDown) => {
                        self.scroll_by(self.viewport_rows.max(1) as isize)
                    }
                    ct_event!(keycode press Home) => {
                        self.scroll = 0;
                        self.cards.release_hover();
                    }
                    ct_event!(keycode press End) => {
                        self.scroll = self.max_scroll();
                        self.cards.release_hover();
                        self.evaluate_scroll(Instant::now());
                    }
                    event::Event::Mouse(mouse) => self.handle_mouse(mouse),
                    _ => {}
                }
            }
            Action::IssueDetailLoaded {
                session,
                issue,
                description,
                initial,
                total_events,
                batch,
            } => {
                if !self.is_current(session) {
                    debug!(session, "dropping stale issue details");
                    return Ok(());
                }
                self.state = DetailState::Loaded;
                self.issue = Some(issue);
                self.description = description;
                self.thread.append(batch);
                self.paginator = Paginator::new(initial, total_events, self.threshold);
            }
            Action::ProgramsLoaded(programs) => {
                self.programs = ProgramDirectory::new(programs);
            }
            Action::IssueDetailError { session } => {
                if self.is_current(session) {
                    self.state = DetailState::Error;
                }
            }
            Action::MessagesLoaded {
                session,
                ack,
                batch,
            } => {
                if !self.is_current(session) {
                    debug!(session, "dropping stale page");
                    return Ok(());
                }
                debug!(?ack, rendered = batch.len(), "page loaded");
                self.thread.append(batch);
                self.paginator.complete(ack);
            }
            Action::MessagesError { session } => {
                if self.is_current(session) {
                    self.paginator.fail();
                }
            }
            Action::StatusUpdated { issue_id, .. } => {
                self.pending.remove(&(issue_id, EditorKind::Status));
            }
            Action::PriorityUpdated { issue_id, .. } => {
                self.pending.remove(&(issue_id, EditorKind::Priority));
            }
            Action::StatusUpdateFailed {
                issue_id,
                previous,
                message,
            } => {
                self.pending.remove(&(issue_id.clone(), EditorKind::Status));
                if let Some(issue) = self.issue.as_mut()
                    && issue.id == issue_id
                {
                    issue.status = previous;
                }
                if let Some(tx) = &self.action_tx {
                    tx.send(Action::ShowAlert(message)).await?;
                }
            }
            Action::PriorityUpdateFailed {
                issue_id,
                previous,
                message,
            } => {
                self.pending.remove(&(issue_id.clone(), EditorKind::Priority));
                if let Some(issue) = self.issue.as_mut()
                    && issue.id == issue_id
                {
                    issue.priority = previous;
                }
                if let Some(tx) = &self.action_tx {
                    tx.send(Action::ShowAlert(message)).await?;
                }
            }
            Action::ProfileCardReady {
                anchor,
                profile,
                pinned,
            } => {
                if self.screen == MainScreen::Details {
                    self.cards.on_ready(anchor, profile, pinned);
                }
            }
            Action::ProfileCardExpired { card } => self.cards.expire(card),
            Action::Tick => {
                let loading =
                    self.state == DetailState::Loading || self.paginator.cursor().is_loading;
                if self.screen == MainScreen::Details && loading {
                    self.throbber_state.calc_next();
                }
                // A thread that does not fill the pane cannot be scrolled,
                // so it is evaluated as if the reader sat at the bottom.
                if self.screen == MainScreen::Details && self.max_scroll() == 0 {
                    self.evaluate_scroll(Instant::now());
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn should_render(&self) -> bool {
        self.screen == MainScreen::Details
    }

    fn is_animating(&self) -> bool {
        self.screen == MainScreen::Details
            && (self.state == DetailState::Loading
                || self.paginator.cursor().is_loading
                || self.cards.is_animating())
    }

    fn needs_redraw(&self) -> bool {
        self.screen == MainScreen::Details && self.cards.revision() != self.drawn_cards
    }

    fn capture_focus_event(&self, event: &event::Event) -> bool {
        self.screen == MainScreen::Details
            && self.editor.is_some()
            && matches!(event, event::Event::Key(_))
    }
}
