//! Profile cards shown over mentions: transient while the pointer rests on a
//! mention, pinned after a click until dismissed.

use std::{sync::Arc, time::Duration};

use ratatui::{
    buffer::Buffer,
    layout::{Position, Rect, Size},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Clear, Paragraph, Widget},
};
use textwrap::core::display_width;
use tokio::sync::mpsc::Sender;
use tracing::{debug, trace, warn};

use crate::{
    ui::Action,
    users::{UserInfoFetcher, UserProfile},
};

pub const FADE_DURATION: Duration = Duration::from_millis(200);
const CARD_MARGIN: u16 = 1;
const MAX_CARD_WIDTH: u16 = 40;
const MIN_CARD_WIDTH: u16 = 12;

pub type CardId = u64;

/// Screen cells covered by a rendered mention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionAnchor {
    pub user_id: String,
    pub area: Rect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardPhase {
    Shown,
    Fading,
}

#[derive(Debug, Clone)]
pub struct ProfileCard {
    pub id: CardId,
    pub user_id: String,
    pub profile: UserProfile,
    pub pinned: bool,
    pub area: Rect,
    pub phase: CardPhase,
}

/// Dismisses a pinned card on the first click that lands outside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OutsideClick {
    card: CardId,
}

pub struct ProfileCards {
    cards: Vec<ProfileCard>,
    subscriptions: Vec<OutsideClick>,
    /// The exact mention under the pointer. Two mentions of the same user
    /// are distinct anchors.
    hovered: Option<MentionAnchor>,
    next_id: CardId,
    revision: u64,
    viewport: Rect,
    fetcher: Arc<UserInfoFetcher>,
    action_tx: Option<Sender<Action>>,
}

impl ProfileCards {
    pub fn new(fetcher: Arc<UserInfoFetcher>) -> Self {
        Self {
            cards: Vec::new(),
            subscriptions: Vec::new(),
            hovered: None,
            next_id: 0,
            revision: 0,
            viewport: Rect::default(),
            fetcher,
            action_tx: None,
        }
    }

    pub fn register_action_tx(&mut self, action_tx: Sender<Action>) {
        self.action_tx = Some(action_tx);
    }

    pub fn set_viewport(&mut self, viewport: Rect) {
        self.viewport = viewport;
    }

    pub fn cards(&self) -> &[ProfileCard] {
        &self.cards
    }

    pub fn has_pinned(&self) -> bool {
        self.cards
            .iter()
            .any(|c| c.pinned && c.phase == CardPhase::Shown)
    }

    pub fn is_animating(&self) -> bool {
        self.cards.iter().any(|c| c.phase == CardPhase::Fading)
    }

    /// Bumped whenever a card appears, starts fading or goes away.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Shows a card for `anchor`. Cached profiles appear immediately, others
    /// once the lookup finishes via [`Action::ProfileCardReady`].
    pub fn show(&mut self, anchor: MentionAnchor, pinned: bool) {
        if let Some(profile) = self.fetcher.cached(&anchor.user_id) {
            self.insert(&anchor, profile, pinned);
            return;
        }
        let Some(action_tx) = self.action_tx.clone() else {
            warn!("profile card requested before the action channel was registered");
            return;
        };
        let fetcher = self.fetcher.clone();
        tokio::spawn(async move {
            // No card at all when the profile cannot be resolved.
            if let Some(profile) = fetcher.resolve(&anchor.user_id).await {
                let _ = action_tx
                    .send(Action::ProfileCardReady {
                        anchor,
                        profile,
                        pinned,
                    })
                    .await;
            }
        });
    }

    pub fn on_ready(&mut self, anchor: MentionAnchor, profile: UserProfile, pinned: bool) {
        if !pinned && self.hovered.as_ref() != Some(&anchor) {
            trace!(user_id = %anchor.user_id, "pointer left before the profile arrived");
            return;
        }
        self.insert(&anchor, profile, pinned);
    }

    fn insert(&mut self, anchor: &MentionAnchor, profile: UserProfile, pinned: bool) -> CardId {
        self.cards.retain(|c| c.pinned);
        if pinned {
            let previous: Vec<CardId> = self
                .cards
                .iter()
                .filter(|c| c.phase == CardPhase::Shown)
                .map(|c| c.id)
                .collect();
            for id in previous {
                self.fade(id);
            }
        }

        let lines = card_lines(&profile, CardPhase::Shown);
        let area = place_card(anchor.area, card_size(&lines), self.viewport, CARD_MARGIN);
        let id = self.next_id;
        self.next_id += 1;
        debug!(card = id, user_id = %anchor.user_id, pinned, ?area, "showing profile card");
        self.cards.push(ProfileCard {
            id,
            user_id: anchor.user_id.clone(),
            profile,
            pinned,
            area,
            phase: CardPhase::Shown,
        });
        if pinned {
            self.subscriptions.push(OutsideClick { card: id });
        }
        self.revision += 1;
        id
    }

    /// Starts the fade of a transient card. Pinned cards ignore this.
    pub fn hide(&mut self, id: CardId) {
        if self.cards.iter().any(|c| c.id == id && !c.pinned) {
            self.fade(id);
        }
    }

    pub fn close_all_pinned(&mut self) {
        let pinned: Vec<CardId> = self
            .cards
            .iter()
            .filter(|c| c.pinned)
            .map(|c| c.id)
            .collect();
        for id in pinned {
            self.fade(id);
        }
    }

    fn fade(&mut self, id: CardId) {
        let Some(card) = self.cards.iter_mut().find(|c| c.id == id) else {
            return;
        };
        if card.phase == CardPhase::Fading {
            return;
        }
        card.phase = CardPhase::Fading;
        self.revision += 1;
        self.subscriptions.retain(|s| s.card != id);
        match self.action_tx.clone() {
            Some(action_tx) => {
                tokio::spawn(async move {
                    tokio::time::sleep(FADE_DURATION).await;
                    let _ = action_tx.send(Action::ProfileCardExpired { card: id }).await;
                });
            }
            None => self.expire(id),
        }
    }

    pub fn expire(&mut self, id: CardId) {
        let before = self.cards.len();
        self.cards.retain(|c| c.id != id);
        if self.cards.len() != before {
            self.revision += 1;
        }
        self.subscriptions.retain(|s| s.card != id);
    }

    /// Tracks the pointer across mentions, returning whether it rests on one.
    pub fn on_mouse_move(&mut self, pos: Position, anchors: &[MentionAnchor]) -> bool {
        let target = anchors.iter().find(|a| a.area.contains(pos));
        if self.hovered.as_ref() == target {
            return target.is_some();
        }

        self.release_hover();
        self.hovered = target.cloned();

        let Some(anchor) = target else {
            return false;
        };
        let already_pinned = self
            .cards
            .iter()
            .any(|c| c.pinned && c.phase == CardPhase::Shown && c.user_id == anchor.user_id);
        if !already_pinned {
            self.show(anchor.clone(), false);
        }
        true
    }

    /// Fades any transient card, e.g. when the content under it scrolls away.
    pub fn release_hover(&mut self) {
        self.hovered = None;
        let transient: Vec<CardId> = self
            .cards
            .iter()
            .filter(|c| !c.pinned)
            .map(|c| c.id)
            .collect();
        for id in transient {
            self.hide(id);
        }
    }

    /// Handles a left click. Returns `true` when the click was meant for the
    /// cards (dismissed one, landed on one, or pinned a new one).
    pub fn on_click(&mut self, pos: Position, anchors: &[MentionAnchor]) -> bool {
        let fired: Vec<OutsideClick> = self
            .subscriptions
            .iter()
            .copied()
            .filter(|s| {
                self.cards
                    .iter()
                    .find(|c| c.id == s.card)
                    .is_none_or(|c| !c.area.contains(pos))
            })
            .collect();
        self.subscriptions.retain(|s| !fired.contains(s));
        for subscription in &fired {
            self.fade(subscription.card);
        }

        if let Some(anchor) = anchors.iter().find(|a| a.area.contains(pos)) {
            self.show(anchor.clone(), true);
            return true;
        }
        let on_card = self
            .cards
            .iter()
            .any(|c| c.phase == CardPhase::Shown && c.area.contains(pos));
        on_card || !fired.is_empty()
    }

    pub fn render(&self, buf: &mut Buffer) {
        let bounds = *buf.area();
        for card in &self.cards {
            let area = card.area.intersection(bounds);
            if area.is_empty() {
                continue;
            }
            let dim = if card.phase == CardPhase::Fading {
                Style::new().add_modifier(Modifier::DIM)
            } else {
                Style::new()
            };
            let border = if card.pinned {
                Style::new().fg(Color::Yellow)
            } else {
                Style::new().fg(Color::DarkGray)
            };
            Clear.render(area, buf);
            Paragraph::new(card_lines(&card.profile, card.phase))
                .style(dim)
                .block(
                    Block::bordered()
                        .border_type(BorderType::Rounded)
                        .border_style(border.patch(dim)),
                )
                .render(area, buf);
        }
    }
}

fn card_lines(profile: &UserProfile, phase: CardPhase) -> Vec<Line<'static>> {
    let dim = Style::new().add_modifier(Modifier::DIM);
    let mut lines = Vec::with_capacity(4);
    match &profile.image_url {
        Some(url) => lines.push(Line::from(Span::styled(
            url.clone(),
            Style::new().fg(Color::Blue).add_modifier(Modifier::UNDERLINED),
        ))),
        None => lines.push(Line::from(Span::styled(
            format!(" {} ", profile.initial()),
            Style::new().add_modifier(Modifier::REVERSED | Modifier::BOLD),
        ))),
    }
    let name_style = match phase {
        CardPhase::Shown => Style::new().add_modifier(Modifier::BOLD),
        CardPhase::Fading => dim,
    };
    lines.push(Line::from(Span::styled(
        profile.display_name.clone(),
        name_style,
    )));
    if let Some(pronouns) = profile.pronouns.as_deref().filter(|p| !p.is_empty()) {
        lines.push(Line::from(Span::styled(pronouns.to_string(), dim)));
    }
    lines.push(Line::from(Span::styled(profile.id.clone(), dim)));
    lines
}

fn card_size(lines: &[Line<'_>]) -> Size {
    let content = lines
        .iter()
        .map(|l| {
            l.spans
                .iter()
                .map(|s| display_width(&s.content))
                .sum::<usize>()
        })
        .max()
        .unwrap_or(0) as u16;
    Size {
        width: (content + 2).clamp(MIN_CARD_WIDTH, MAX_CARD_WIDTH),
        height: lines.len() as u16 + 2,
    }
}

/// Places a card of `size` directly above `anchor`, centered on it. Flips
/// below the anchor when the card would reach into the top margin, and keeps
/// the card `margin` cells away from the left and right edges of `viewport`.
pub fn place_card(anchor: Rect, size: Size, viewport: Rect, margin: u16) -> Rect {
    let width = size
        .width
        .min(viewport.width.saturating_sub(margin * 2))
        .max(1);
    let height = size.height.min(viewport.height).max(1);

    let center = anchor.x + anchor.width / 2;
    let min_x = viewport.x + margin.min(viewport.width / 2);
    let max_x = viewport.right().saturating_sub(margin).saturating_sub(width);
    let x = center.saturating_sub(width / 2).min(max_x).max(min_x);

    let top_limit = viewport.y + margin;
    let y = match anchor.y.checked_sub(height) {
        Some(above) if above >= top_limit => above,
        _ => anchor.bottom(),
    };
    let y = y.min(viewport.bottom().saturating_sub(height)).max(viewport.y);

    Rect::new(x, y, width, height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::fetcher::testing::fetcher;
    use tokio::sync::mpsc;

    const VIEWPORT: Rect = Rect::new(0, 0, 80, 24);

    fn anchor(user_id: &str, x: u16, y: u16) -> MentionAnchor {
        MentionAnchor {
            user_id: user_id.into(),
            area: Rect::new(x, y, 6, 1),
        }
    }

    fn profile(id: &str, name: &str) -> UserProfile {
        UserProfile {
            id: id.into(),
            display_name: name.into(),
            image_url: None,
            pronouns: Some("they/them".into()),
        }
    }

    fn cards_with_cache(names: &[(&str, &str)]) -> (ProfileCards, mpsc::Receiver<Action>) {
        let (fetcher, _) = fetcher(names);
        let mut cards = ProfileCards::new(Arc::new(fetcher));
        let (tx, rx) = mpsc::channel(16);
        cards.register_action_tx(tx);
        cards.set_viewport(VIEWPORT);
        (cards, rx)
    }

    #[test]
    fn placed_above_and_centered_on_the_anchor() {
        let area = place_card(Rect::new(30, 12, 6, 1), Size::new(20, 5), VIEWPORT, 1);
        assert_eq!(area, Rect::new(23, 7, 20, 5));
    }

    #[test]
    fn flips_below_near_the_top() {
        let area = place_card(Rect::new(30, 3, 6, 1), Size::new(20, 5), VIEWPORT, 1);
        assert_eq!(area.y, 4);
        let area = place_card(Rect::new(30, 6, 6, 1), Size::new(20, 5), VIEWPORT, 1);
        assert_eq!(area.y, 1);
    }

    #[test]
    fn clamped_within_horizontal_margins() {
        let left = place_card(Rect::new(0, 12, 4, 1), Size::new(20, 5), VIEWPORT, 1);
        assert_eq!(left.x, 1);
        let right = place_card(Rect::new(76, 12, 4, 1), Size::new(20, 5), VIEWPORT, 1);
        assert_eq!(right.right(), 79);
    }

    #[test]
    fn narrow_viewport_shrinks_the_card() {
        let viewport = Rect::new(0, 0, 10, 24);
        let area = place_card(Rect::new(2, 12, 4, 1), Size::new(20, 5), viewport, 1);
        assert_eq!(area, Rect::new(1, 7, 8, 5));
    }

    #[tokio::test]
    async fn hover_shows_transient_and_leaving_fades_it() {
        let (mut cards, mut rx) = cards_with_cache(&[("U1", "Ada")]);
        cards.fetcher.resolve("U1").await;
        let anchors = vec![anchor("U1", 10, 10)];

        assert!(cards.on_mouse_move(Position::new(11, 10), &anchors));
        assert_eq!(cards.cards().len(), 1);
        assert!(!cards.cards()[0].pinned);
        let id = cards.cards()[0].id;

        // Staying on the same mention does nothing.
        cards.on_mouse_move(Position::new(12, 10), &anchors);
        assert_eq!(cards.cards().len(), 1);

        let started = tokio::time::Instant::now();
        assert!(!cards.on_mouse_move(Position::new(50, 20), &anchors));
        assert_eq!(cards.cards()[0].phase, CardPhase::Fading);
        match rx.recv().await {
            Some(Action::ProfileCardExpired { card }) => {
                assert_eq!(card, id);
                assert!(started.elapsed() >= FADE_DURATION);
                cards.expire(card);
            }
            other => panic!("unexpected action {other:?}"),
        }
        assert!(cards.cards().is_empty());
    }

    #[tokio::test]
    async fn uncached_profiles_arrive_through_the_channel() {
        let (mut cards, mut rx) = cards_with_cache(&[("U1", "Ada")]);
        let anchors = vec![anchor("U1", 10, 10)];
        cards.on_mouse_move(Position::new(10, 10), &anchors);
        assert!(cards.cards().is_empty());

        let Some(Action::ProfileCardReady {
            anchor,
            profile,
            pinned,
        }) = rx.recv().await
        else {
            panic!("expected a ready profile");
        };
        cards.on_ready(anchor.clone(), profile.clone(), pinned);
        assert_eq!(cards.cards()[0].profile.display_name, "Ada");

        // A late arrival after the pointer left is dropped.
        cards.on_mouse_move(Position::new(60, 2), &anchors);
        cards.expire(cards.cards()[0].id);
        cards.on_ready(anchor, profile, false);
        assert!(cards.cards().is_empty());
    }

    #[tokio::test]
    async fn unresolvable_user_gets_no_card() {
        let (mut cards, mut rx) = cards_with_cache(&[]);
        cards.show(anchor("U9", 10, 10), true);
        drop(cards.action_tx.take());
        assert!(rx.recv().await.is_none());
        assert!(cards.cards().is_empty());
    }

    #[test]
    fn pinned_cards_ignore_hide() {
        let (fetcher, _) = fetcher(&[]);
        let mut cards = ProfileCards::new(Arc::new(fetcher));
        cards.set_viewport(VIEWPORT);
        let id = cards.insert(&anchor("U1", 10, 10), profile("U1", "Ada"), true);
        cards.hide(id);
        assert_eq!(cards.cards()[0].phase, CardPhase::Shown);
        assert!(cards.has_pinned());
    }

    #[test]
    fn at_most_one_card_of_each_kind() {
        let (fetcher, _) = fetcher(&[]);
        let mut cards = ProfileCards::new(Arc::new(fetcher));
        cards.set_viewport(VIEWPORT);
        cards.insert(&anchor("U1", 10, 10), profile("U1", "Ada"), false);
        cards.insert(&anchor("U2", 20, 10), profile("U2", "Bo"), false);
        assert_eq!(cards.cards().len(), 1);

        cards.insert(&anchor("U1", 10, 10), profile("U1", "Ada"), true);
        cards.insert(&anchor("U2", 20, 10), profile("U2", "Bo"), true);
        // Without a channel the replaced pinned card is removed right away.
        let ids: Vec<_> = cards.cards().iter().map(|c| c.user_id.as_str()).collect();
        assert_eq!(ids, vec!["U2"]);
    }

    #[test]
    fn outside_click_subscription_fires_once() {
        let (fetcher, _) = fetcher(&[]);
        let mut cards = ProfileCards::new(Arc::new(fetcher));
        cards.set_viewport(VIEWPORT);
        let id = cards.insert(&anchor("U1", 30, 12), profile("U1", "Ada"), true);
        let card_area = cards.cards()[0].area;
        assert_eq!(cards.subscriptions, vec![OutsideClick { card: id }]);

        // A click inside the card keeps it.
        assert!(cards.on_click(card_area.as_position(), &[]));
        assert_eq!(cards.subscriptions.len(), 1);

        assert!(cards.on_click(Position::new(0, 23), &[]));
        assert!(cards.subscriptions.is_empty());
        assert!(cards.cards().is_empty());
        assert!(!cards.on_click(Position::new(0, 23), &[]));
    }

    #[test]
    fn close_all_pinned_drops_subscriptions() {
        let (fetcher, _) = fetcher(&[]);
        let mut cards = ProfileCards::new(Arc::new(fetcher));
        cards.set_viewport(VIEWPORT);
        cards.insert(&anchor("U1", 30, 12), profile("U1", "Ada"), true);
        cards.close_all_pinned();
        assert!(cards.subscriptions.is_empty());
        assert!(cards.cards().is_empty());
    }

    #[test]
    fn renders_name_pronouns_and_id() {
        let (fetcher, _) = fetcher(&[]);
        let mut cards = ProfileCards::new(Arc::new(fetcher));
        cards.set_viewport(VIEWPORT);
        cards.insert(&anchor("U1", 30, 12), profile("U1", "Ada"), false);
        let mut buf = Buffer::empty(VIEWPORT);
        cards.render(&mut buf);
        let rendered: String = buf.content().iter().map(|c| c.symbol()).collect();
        assert!(rendered.contains("Ada"));
        assert!(rendered.contains("they/them"));
        assert!(rendered.contains(" A "));
    }

    #[tokio::test]
    async fn moving_between_mentions_of_one_user_follows_the_pointer() {
        let (mut cards, _rx) = cards_with_cache(&[("U1", "Ada")]);
        cards.fetcher.resolve("U1").await;
        let anchors = vec![anchor("U1", 10, 10), anchor("U1", 40, 16)];

        assert!(cards.on_mouse_move(Position::new(10, 10), &anchors));
        let first = cards.cards()[0].area;
        assert!(cards.on_mouse_move(Position::new(41, 16), &anchors));

        let shown: Vec<_> = cards
            .cards()
            .iter()
            .filter(|c| c.phase == CardPhase::Shown)
            .collect();
        assert_eq!(shown.len(), 1);
        assert_ne!(shown[0].area, first);
        assert_eq!(
            shown[0].area,
            place_card(anchors[1].area, shown[0].area.as_size(), VIEWPORT, CARD_MARGIN)
        );
    }

    #[tokio::test]
    async fn revision_tracks_every_visible_change() {
        let (mut cards, _rx) = cards_with_cache(&[("U1", "Ada")]);
        cards.fetcher.resolve("U1").await;
        let anchors = vec![anchor("U1", 10, 10)];
        let start = cards.revision();

        cards.on_mouse_move(Position::new(10, 10), &anchors);
        let shown = cards.revision();
        assert!(shown > start);

        // Motion within the same mention changes nothing on screen.
        cards.on_mouse_move(Position::new(11, 10), &anchors);
        assert_eq!(cards.revision(), shown);

        cards.on_mouse_move(Position::new(60, 2), &anchors);
        let fading = cards.revision();
        assert!(fading > shown);
        cards.expire(cards.cards()[0].id);
        assert!(cards.revision() > fading);
    }
}
