use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use async_trait::async_trait;
use rat_widget::event::ct_event;
use ratatui::{
    buffer::Buffer,
    crossterm::event::{self, KeyCode, KeyEventKind, KeyModifiers},
    layout::Rect,
    layout::Constraint,
    style::{Color, Modifier, Style, Stylize},
    symbols,
    text::Line,
    widgets::{
        Block, BorderType, List as TuiList, ListItem, ListState as TuiListState, Padding,
        Paragraph, StatefulWidget, Widget,
    },
};
use ratatui_macros::{line, span};
use textwrap::core::display_width;
use throbber_widgets_tui::{BRAILLE_SIX_DOUBLE, Throbber, ThrobberState, WhichUse};
use tokio::sync::mpsc::Sender;
use tracing::{info, trace, warn};

use crate::{
    api::{
        IssueApi,
        models::{IssueSummary, ProgramDirectory, format_timestamp},
    },
    errors::AppError,
    ui::{
        Action, AppState,
        components::{
            Component,
            help::HelpElementKind,
            issue_detail::{priority_style, status_style},
        },
        filter::IssueFilter,
        layout::Layout,
        utils::{border_style, get_loader_area},
    },
};

pub static LOADED_ISSUE_COUNT: AtomicU32 = AtomicU32::new(0);
pub const HELP: &[HelpElementKind] = &[
    crate::help_text!("Issue List Help"),
    crate::help_keybind!("Up/Down", "navigate issues"),
    crate::help_keybind!("Enter", "view issue details"),
    crate::help_keybind!("/", "search title, description and id"),
    crate::help_keybind!("Enter / Esc (search)", "stop editing the search"),
    crate::help_keybind!("s", "cycle status filter"),
    crate::help_keybind!("p", "cycle priority filter"),
    crate::help_keybind!("g", "cycle program filter"),
    crate::help_keybind!("o", "cycle source filter"),
    crate::help_keybind!("c", "clear filters"),
    crate::help_keybind!("r", "reload issues"),
];

#[derive(Debug, Clone, PartialEq, Eq, Default)]
enum LoadingState {
    #[default]
    Loading,
    Loaded,
    Failed(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MainScreen {
    #[default]
    List,
    Details,
}

pub struct IssueList {
    issues: Vec<IssueSummary>,
    programs: ProgramDirectory,
    visible: Vec<usize>,
    filter: IssueFilter,
    editing_query: bool,
    list_state: TuiListState,
    api: Arc<dyn IssueApi>,
    action_tx: Option<Sender<Action>>,
    throbber_state: ThrobberState,
    state: LoadingState,
    screen: MainScreen,
}

impl IssueList {
    pub fn new(state: &AppState, tx: Sender<Action>) -> Self {
        LOADED_ISSUE_COUNT.store(0, Ordering::Relaxed);
        let mut list = Self {
            issues: Vec::new(),
            programs: ProgramDirectory::default(),
            visible: Vec::new(),
            filter: IssueFilter::default(),
            editing_query: false,
            list_state: TuiListState::default(),
            api: state.api.clone(),
            action_tx: Some(tx),
            throbber_state: ThrobberState::default(),
            state: LoadingState::default(),
            screen: MainScreen::default(),
        };
        list.reload();
        list
    }

    fn reload(&mut self) {
        let Some(tx) = self.action_tx.clone() else {
            return;
        };
        self.state = LoadingState::Loading;
        let api = self.api.clone();
        tokio::spawn(async move {
            let (issues, programs) = tokio::join!(api.list_issues(), api.list_programs());
            match programs {
                Ok(programs) => {
                    let _ = tx.send(Action::ProgramsLoaded(programs)).await;
                }
                // Issues still load; their program ids are shown as they are.
                Err(err) => warn!(%err, "failed to load programs"),
            }
            let action = match issues {
                Ok(issues) => Action::IssuesLoaded(issues),
                Err(err) => {
                    warn!(%err, "failed to load issues");
                    Action::IssuesLoadError(err.to_string())
                }
            };
            let _ = tx.send(action).await;
        });
    }

    /// Reapplies the filter, keeping the selection on the same issue when it
    /// is still visible.
    fn refilter(&mut self) {
        let selected_id = self.selected().map(|issue| issue.id.clone());
        self.visible = self.filter.visible(&self.issues);
        let index = selected_id
            .and_then(|id| {
                self.visible
                    .iter()
                    .position(|&i| self.issues[i].id == id)
            })
            .or_else(|| (!self.visible.is_empty()).then_some(0));
        self.list_state.select(index);
        trace!(visible = self.visible.len(), filter = ?self.filter, "refiltered issues");
    }

    fn selected(&self) -> Option<&IssueSummary> {
        let index = self.list_state.selected()?;
        self.visible.get(index).and_then(|&i| self.issues.get(i))
    }

    async fn open_selected(&mut self) -> Result<(), AppError> {
        let Some(issue_id) = self.selected().map(|issue| issue.id.clone()) else {
            return Ok(());
        };
        info!(%issue_id, "opening issue");
        if let Some(tx) = &self.action_tx {
            tx.send(Action::ChangeScreen(MainScreen::Details)).await?;
            tx.send(Action::OpenIssue { issue_id }).await?;
        }
        Ok(())
    }

    fn handle_query_event(&mut self, event: &event::Event) {
        let event::Event::Key(key) = event else {
            return;
        };
        if key.kind != KeyEventKind::Press {
            return;
        }
        match key.code {
            KeyCode::Enter | KeyCode::Esc => self.editing_query = false,
            KeyCode::Backspace => {
                self.filter.query.pop();
                self.refilter();
            }
            KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.filter.query.push(c);
                self.refilter();
            }
            _ => {}
        }
    }

    pub fn render(&mut self, area: Layout, buf: &mut Buffer) {
        self.render_filter_bar(area.filter_bar, buf);

        let mut block = Block::bordered()
            .border_type(BorderType::Rounded)
            .border_style(border_style(
                self.screen == MainScreen::List && !self.editing_query,
            ))
            .padding(Padding::horizontal(1));
        match &self.state {
            LoadingState::Loading => {}
            LoadingState::Loaded => {
                block = block.title(format!(
                    "Issues ({} of {})",
                    self.visible.len(),
                    self.issues.len()
                ));
            }
            LoadingState::Failed(err) => {
                block = block.title(line!["Issues | ", span!(err.as_str()).fg(Color::Red)]);
            }
        }
        let items: Vec<ListItem<'_>> = self
            .visible
            .iter()
            .filter_map(|&i| self.issues.get(i))
            .map(|issue| build_list_item(issue, &self.programs))
            .collect();
        let list = TuiList::new(items)
            .block(block)
            .highlight_style(Style::new().reversed().add_modifier(Modifier::BOLD));
        StatefulWidget::render(list, area.main_content, buf, &mut self.list_state);

        if self.state == LoadingState::Loading {
            let throbber = Throbber::default()
                .label("Loading")
                .style(Style::new().fg(Color::Cyan))
                .throbber_set(BRAILLE_SIX_DOUBLE)
                .use_type(WhichUse::Spin);
            StatefulWidget::render(
                throbber,
                get_loader_area(area.main_content),
                buf,
                &mut self.throbber_state,
            );
        }
    }

    fn render_filter_bar(&self, area: Rect, buf: &mut Buffer) {
        let block = Block::bordered()
            .border_type(BorderType::Rounded)
            .border_style(border_style(self.editing_query))
            .title("Filter");
        let inner = block.inner(area);
        block.render(area, buf);
        let summary = self.filter.describe(&self.programs);
        let summary_width = display_width(&summary) as u16;
        let [query_area, summary_area] = ratatui::layout::Layout::horizontal([
            Constraint::Fill(1),
            Constraint::Length(summary_width),
        ])
        .areas(inner);
        let query = if self.editing_query {
            line![span!("/").fg(Color::Cyan), self.filter.query.as_str(), "▏"]
        } else if self.filter.query.is_empty() {
            line!["press / to search"].dim()
        } else {
            line![span!("/").dim(), self.filter.query.as_str()]
        };
        Paragraph::new(query).render(query_area, buf);
        Paragraph::new(Line::from(summary).dim().right_aligned()).render(summary_area, buf);
    }
}

fn build_list_item(issue: &IssueSummary, programs: &ProgramDirectory) -> ListItem<'static> {
    let lines = vec![
        line![
            span!(symbols::shade::FULL).style(status_style(issue.status)),
            " ",
            span!(issue.title.clone()),
            " ",
            span!("({})", issue.id).dim(),
        ],
        line![
            "  ",
            span!(issue.status.label()).style(status_style(issue.status)),
            "  ",
            span!(issue.priority.label()).style(priority_style(issue.priority)),
            "  ",
            span!(programs.label(issue.program_id.as_deref())).fg(Color::Magenta),
            "  ",
            span!(issue.source.clone().unwrap_or_else(|| "-".into())).dim(),
            "  ",
            span!("updated {}", format_timestamp(issue.updated_at.as_ref())).dim(),
        ],
    ];
    ListItem::new(lines)
}

#[async_trait(?Send)]
impl Component for IssueList {
    fn render(&mut self, area: Layout, buf: &mut Buffer) {
        self.render(area, buf);
    }

    fn register_action_tx(&mut self, action_tx: Sender<Action>) {
        self.action_tx = Some(action_tx);
    }

    async fn handle_event(&mut self, event: Action) -> Result<(), AppError> {
        match event {
            Action::AppEvent(ref event) => {
                if self.screen != MainScreen::List {
                    return Ok(());
                }
                if self.editing_query {
                    self.handle_query_event(event);
                    return Ok(());
                }
                match event {
                    ct_event!(keycode press Up) => self.list_state.select_previous(),
                    ct_event!(keycode press Down) => {
                        let last = self.visible.len().saturating_sub(1);
                        let next = self
                            .list_state
                            .selected()
                            .map_or(0, |i| (i + 1).min(last));
                        self.list_state.select((!self.visible.is_empty()).then_some(next));
                    }
                    ct_event!(keycode press Enter) => self.open_selected().await?,
                    ct_event!(key press '/') => self.editing_query = true,
                    ct_event!(key press 's') => {
                        self.filter.cycle_status();
                        self.refilter();
                    }
                    ct_event!(key press 'p') => {
                        self.filter.cycle_priority();
                        self.refilter();
                    }
                    ct_event!(key press 'g') => {
                        self.filter.cycle_program(&self.programs);
                        self.refilter();
                    }
                    ct_event!(key press 'o') => {
                        self.filter.cycle_source(&self.issues);
                        self.refilter();
                    }
                    ct_event!(key press 'c') => {
                        self.filter.clear();
                        self.refilter();
                    }
                    ct_event!(key press 'r') => self.reload(),
                    _ => {}
                }
            }
            Action::IssuesLoaded(issues) => {
                trace!("loaded {} issues", issues.len());
                let count = issues.len().min(u32::MAX as usize) as u32;
                LOADED_ISSUE_COUNT.store(count, Ordering::Relaxed);
                self.issues = issues;
                self.state = LoadingState::Loaded;
                self.refilter();
            }
            Action::ProgramsLoaded(programs) => {
                trace!("loaded {} programs", programs.len());
                self.programs = ProgramDirectory::new(programs);
            }
            Action::IssuesLoadError(message) => {
                self.state = LoadingState::Failed(message);
            }
            Action::StatusUpdated { issue_id, status } => {
                if let Some(issue) = self.issues.iter_mut().find(|i| i.id == issue_id) {
                    issue.status = status;
                }
                self.refilter();
            }
            Action::PriorityUpdated { issue_id, priority } => {
                if let Some(issue) = self.issues.iter_mut().find(|i| i.id == issue_id) {
                    issue.priority = priority;
                }
                self.refilter();
            }
            Action::ChangeScreen(screen) => {
                self.screen = screen;
                if screen == MainScreen::List
                    && let Some(tx) = &self.action_tx
                {
                    tx.send(Action::SetHelp(HELP)).await?;
                }
            }
            Action::Tick => {
                if self.state == LoadingState::Loading {
                    self.throbber_state.calc_next();
                }
            }
            _ => {}
        }
        Ok(())
    }

    // Stays visible under the detail popup.
    fn should_render(&self) -> bool {
        true
    }

    fn is_animating(&self) -> bool {
        self.state == LoadingState::Loading
    }

    fn capture_focus_event(&self, event: &event::Event) -> bool {
        self.screen == MainScreen::List
            && self.editing_query
            && matches!(event, event::Event::Key(_))
    }
}
