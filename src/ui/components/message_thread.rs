use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use futures::future::join_all;
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::Widget,
};
use textwrap::core::display_width;
use tracing::{debug, instrument};

use crate::{
    api::models::{Event, format_timestamp},
    mentions::{FormattedBody, MentionFormatter, Segment, mention_ids},
    ui::components::profile_card::MentionAnchor,
    users::UserInfoFetcher,
};

const BODY_INDENT: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub id: String,
    pub author_id: String,
    pub author_name: String,
    pub created_at: String,
    pub event_type: Option<String>,
    pub body: FormattedBody,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedBatch {
    pub messages: Vec<RenderedMessage>,
}

impl RenderedBatch {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }
}

/// Turns raw thread events into display-ready messages.
#[derive(Clone)]
pub struct MessageRenderer {
    fetcher: Arc<UserInfoFetcher>,
}

impl MessageRenderer {
    pub fn new(fetcher: Arc<UserInfoFetcher>) -> Self {
        Self { fetcher }
    }

    /// Authors are resolved in one concurrent wave, then mentions in a second
    /// one, and only then are the events formatted, in order.
    #[instrument(skip_all, fields(events = events.len()))]
    pub async fn render_batch(&self, events: &[Event]) -> RenderedBatch {
        if events.is_empty() {
            return RenderedBatch::default();
        }

        let authors: Vec<&str> = distinct(events.iter().map(|e| e.author.as_str()));
        let names = join_all(authors.iter().map(|id| self.fetcher.display_name(id))).await;
        let author_names: HashMap<&str, String> = authors.into_iter().zip(names).collect();

        let mentioned = distinct(events.iter().flat_map(|e| mention_ids(&e.body)));
        join_all(mentioned.iter().map(|id| self.fetcher.resolve(id))).await;
        debug!(mentions = mentioned.len(), "mention wave resolved");

        let formatter = MentionFormatter::new(&self.fetcher);
        let mut messages = Vec::with_capacity(events.len());
        for event in events {
            let body = formatter.format(&event.body).await;
            let author_name = author_names
                .get(event.author.as_str())
                .cloned()
                .unwrap_or_else(|| "unknown".to_string());
            messages.push(RenderedMessage {
                id: event.id.clone(),
                author_id: event.author.clone(),
                author_name,
                created_at: format_timestamp(event.created_at.as_ref()),
                event_type: event.event_type.clone(),
                body,
            });
        }
        RenderedBatch { messages }
    }
}

fn distinct<'a>(ids: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut seen = HashSet::new();
    ids.filter(|id| !id.is_empty() && seen.insert(*id)).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    Plain,
    Author,
    Meta,
    Mention,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadSpan {
    pub text: String,
    pub kind: SpanKind,
    /// Set for mention spans.
    pub user_id: Option<String>,
}

impl ThreadSpan {
    fn new(text: impl Into<String>, kind: SpanKind) -> Self {
        Self {
            text: text.into(),
            kind,
            user_id: None,
        }
    }

    fn style(&self) -> Style {
        match self.kind {
            SpanKind::Plain => Style::new(),
            SpanKind::Author => Style::new().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            SpanKind::Meta => Style::new().add_modifier(Modifier::DIM),
            SpanKind::Mention => Style::new()
                .fg(Color::Yellow)
                .add_modifier(Modifier::UNDERLINED),
        }
    }
}

pub type ThreadLine = Vec<ThreadSpan>;

/// The scroll container. Batches are appended whole and in arrival order.
#[derive(Debug, Default)]
pub struct MessageThread {
    messages: Vec<RenderedMessage>,
    layout_width: usize,
    lines: Vec<ThreadLine>,
}

impl MessageThread {
    pub fn append(&mut self, batch: RenderedBatch) {
        if batch.is_empty() {
            return;
        }
        self.messages.extend(batch.messages);
        self.lines.clear();
        self.layout_width = 0;
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[RenderedMessage] {
        &self.messages
    }

    /// Lines wrapped to `width`, recomputed only when the width or content changes.
    pub fn lines(&mut self, width: usize) -> &[ThreadLine] {
        if self.layout_width != width || self.lines.is_empty() {
            self.layout_width = width;
            self.lines = self
                .messages
                .iter()
                .flat_map(|m| layout_message(m, width))
                .collect();
        }
        &self.lines
    }

    pub fn draw(&mut self, area: Rect, scroll: usize, buf: &mut Buffer) -> Vec<MentionAnchor> {
        let lines = self.lines(area.width as usize);
        draw_lines(lines, area, scroll, buf)
    }
}

/// Draws `lines` starting at `scroll` and returns where each visible mention
/// landed on screen.
pub fn draw_lines(
    lines: &[ThreadLine],
    area: Rect,
    scroll: usize,
    buf: &mut Buffer,
) -> Vec<MentionAnchor> {
    let mut anchors = Vec::new();
    for (row, spans) in lines
        .iter()
        .skip(scroll)
        .take(area.height as usize)
        .enumerate()
    {
        let y = area.y + row as u16;
        let mut x = area.x;
        for span in spans {
            let width = display_width(&span.text) as u16;
            if let Some(user_id) = &span.user_id {
                let visible = width.min(area.right().saturating_sub(x));
                if visible > 0 {
                    anchors.push(MentionAnchor {
                        user_id: user_id.clone(),
                        area: Rect::new(x, y, visible, 1),
                    });
                }
            }
            x = x.saturating_add(width);
        }
        let line = Line::from(
            spans
                .iter()
                .map(|s| Span::styled(s.text.clone(), s.style()))
                .collect::<Vec<_>>(),
        );
        line.render(Rect::new(area.x, y, area.width, 1), buf);
    }
    anchors
}

fn layout_message(message: &RenderedMessage, width: usize) -> Vec<ThreadLine> {
    let mut header = vec![
        ThreadSpan::new(message.author_name.clone(), SpanKind::Author),
        ThreadSpan::new(format!("  {}", message.created_at), SpanKind::Meta),
    ];
    if let Some(kind) = message.event_type.as_deref()
        && kind != "message"
    {
        header.push(ThreadSpan::new(format!("  [{kind}]"), SpanKind::Meta));
    }
    let mut lines = vec![header];
    let body_width = width.saturating_sub(BODY_INDENT).max(1);
    for mut line in wrap_segments(&message.body.segments, body_width) {
        line.insert(0, ThreadSpan::new(" ".repeat(BODY_INDENT), SpanKind::Plain));
        lines.push(line);
    }
    lines.push(Vec::new());
    lines
}

enum Atom<'a> {
    Word(&'a str),
    Space(&'a str),
    Newline,
    Mention { user_id: &'a str, label: String },
}

fn atoms(segments: &[Segment]) -> Vec<Atom<'_>> {
    let mut out = Vec::new();
    for segment in segments {
        match segment {
            Segment::Mention {
                user_id,
                display_name,
            } => out.push(Atom::Mention {
                user_id,
                label: format!("@{display_name}"),
            }),
            Segment::Text(text) => {
                for (i, piece) in text.split('\n').enumerate() {
                    if i > 0 {
                        out.push(Atom::Newline);
                    }
                    let mut start = 0;
                    let mut in_space = None;
                    for (idx, ch) in piece.char_indices() {
                        let is_space = ch.is_whitespace();
                        match in_space {
                            Some(prev) if prev != is_space => {
                                out.push(atom(&piece[start..idx], prev));
                                start = idx;
                            }
                            _ => {}
                        }
                        in_space = Some(is_space);
                    }
                    if let Some(prev) = in_space {
                        out.push(atom(&piece[start..], prev));
                    }
                }
            }
        }
    }
    out
}

fn atom(text: &str, is_space: bool) -> Atom<'_> {
    if is_space {
        Atom::Space(text)
    } else {
        Atom::Word(text)
    }
}

/// Greedy word wrap that never splits a mention unless it is wider than a
/// whole line on its own.
pub fn wrap_segments(segments: &[Segment], width: usize) -> Vec<ThreadLine> {
    let width = width.max(1);
    let mut lines: Vec<ThreadLine> = Vec::new();
    let mut current: ThreadLine = Vec::new();
    let mut used = 0usize;

    let mut push_span = |current: &mut ThreadLine, span: ThreadSpan| {
        if span.user_id.is_none()
            && let Some(last) = current.last_mut()
            && last.kind == span.kind
            && last.user_id.is_none()
        {
            last.text.push_str(&span.text);
            return;
        }
        current.push(span);
    };

    for atom in atoms(segments) {
        match atom {
            Atom::Newline => {
                lines.push(std::mem::take(&mut current));
                used = 0;
            }
            Atom::Space(text) => {
                let w = display_width(text);
                if used == 0 {
                    continue;
                }
                if used + w >= width {
                    lines.push(std::mem::take(&mut current));
                    used = 0;
                    continue;
                }
                push_span(&mut current, ThreadSpan::new(text, SpanKind::Plain));
                used += w;
            }
            Atom::Word(text) => {
                for chunk in split_to_width(text, width) {
                    let w = display_width(chunk);
                    if used > 0 && used + w > width {
                        lines.push(std::mem::take(&mut current));
                        used = 0;
                    }
                    push_span(&mut current, ThreadSpan::new(chunk, SpanKind::Plain));
                    used += w;
                }
            }
            Atom::Mention { user_id, label } => {
                let chunks: Vec<String> = split_to_width(&label, width)
                    .into_iter()
                    .map(str::to_string)
                    .collect();
                for chunk in chunks {
                    let w = display_width(&chunk);
                    if used > 0 && used + w > width {
                        lines.push(std::mem::take(&mut current));
                        used = 0;
                    }
                    push_span(
                        &mut current,
                        ThreadSpan {
                            text: chunk,
                            kind: SpanKind::Mention,
                            user_id: Some(user_id.to_string()),
                        },
                    );
                    used += w;
                }
            }
        }
    }
    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

fn split_to_width(text: &str, width: usize) -> Vec<&str> {
    if display_width(text) <= width {
        return vec![text];
    }
    let mut out = Vec::new();
    let mut start = 0;
    let mut used = 0;
    for (idx, ch) in text.char_indices() {
        let w = display_width(ch.encode_utf8(&mut [0u8; 4]));
        if used + w > width && idx > start {
            out.push(&text[start..idx]);
            start = idx;
            used = 0;
        }
        used += w;
    }
    out.push(&text[start..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::fetcher::testing::fetcher;

    fn text_of(line: &ThreadLine) -> String {
        line.iter().map(|s| s.text.as_str()).collect()
    }

    fn event(id: &str, author: &str, body: &str) -> Event {
        Event {
            id: id.into(),
            author: author.into(),
            body: body.into(),
            event_type: Some("message".into()),
            created_at: None,
        }
    }

    #[test]
    fn wraps_words_and_keeps_mentions_whole() {
        let segments = vec![
            Segment::Text("please ask ".into()),
            Segment::Mention {
                user_id: "U1".into(),
                display_name: "Ada Lovelace".into(),
            },
            Segment::Text(" about it".into()),
        ];
        let lines = wrap_segments(&segments, 16);
        let texts: Vec<String> = lines.iter().map(text_of).collect();
        assert_eq!(texts, vec!["please ask", "@Ada Lovelace", "about it"]);
        assert_eq!(lines[1][0].user_id.as_deref(), Some("U1"));
        assert!(lines.iter().all(|l| display_width(&text_of(l)) <= 16));
    }

    #[test]
    fn honours_explicit_newlines_and_long_words() {
        let segments = vec![Segment::Text("ab\nabcdefghij".into())];
        let texts: Vec<String> = wrap_segments(&segments, 4).iter().map(text_of).collect();
        assert_eq!(texts, vec!["ab", "abcd", "efgh", "ij"]);
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let (fetcher, source) = fetcher(&[]);
        let renderer = MessageRenderer::new(Arc::new(fetcher));
        assert!(renderer.render_batch(&[]).await.is_empty());
        assert_eq!(source.calls(), 0);

        let mut thread = MessageThread::default();
        thread.append(RenderedBatch::default());
        assert!(thread.is_empty());
    }

    #[tokio::test]
    async fn resolves_each_identity_once_per_batch() {
        let (fetcher, source) = fetcher(&[("U1", "Ada"), ("U2", "Grace")]);
        let renderer = MessageRenderer::new(Arc::new(fetcher));
        let batch = renderer
            .render_batch(&[
                event("e1", "U1", "hi <@U2>"),
                event("e2", "U2", "<@U1> <@U1>"),
                event("e3", "U1", "unknown <@U9>"),
            ])
            .await;

        assert_eq!(batch.len(), 3);
        assert_eq!(batch.messages[0].author_name, "Ada");
        assert_eq!(batch.messages[1].author_name, "Grace");
        assert_eq!(batch.messages[1].body.to_plain_text(), "@Ada @Ada");
        assert_eq!(batch.messages[2].body.to_plain_text(), "unknown @U9");
        // U1 and U2 once each; U9 misses in the mention wave and again when formatted.
        assert_eq!(source.calls(), 4);
    }

    #[tokio::test]
    async fn draw_reports_mention_anchors() {
        let (fetcher, _) = fetcher(&[("U1", "Ada"), ("U2", "Bo")]);
        let renderer = MessageRenderer::new(Arc::new(fetcher));
        let mut thread = MessageThread::default();
        thread.append(renderer.render_batch(&[event("e1", "U1", "cc <@U2>")]).await);

        let area = Rect::new(5, 2, 30, 10);
        let mut buf = Buffer::empty(Rect::new(0, 0, 40, 20));
        let anchors = thread.draw(area, 0, &mut buf);
        assert_eq!(
            anchors,
            vec![MentionAnchor {
                user_id: "U2".into(),
                area: Rect::new(5 + 2 + 3, 3, 3, 1),
            }]
        );

        // Scrolled past the body, nothing is anchored.
        assert!(thread.draw(area, 2, &mut buf).is_empty());
    }

    #[test]
    fn appending_keeps_arrival_order() {
        let mut thread = MessageThread::default();
        let message = |id: &str| RenderedMessage {
            id: id.into(),
            author_id: "U1".into(),
            author_name: "Ada".into(),
            created_at: "-".into(),
            event_type: None,
            body: FormattedBody::plain("x"),
        };
        thread.append(RenderedBatch {
            messages: vec![message("a"), message("b")],
        });
        assert_eq!(thread.lines(20).len(), 6);
        thread.append(RenderedBatch {
            messages: vec![message("c")],
        });
        let ids: Vec<_> = thread.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(thread.lines(20).len(), 9);
    }
}
