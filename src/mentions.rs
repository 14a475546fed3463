//! Mention tokens (`<@U01ABC>`) inside message bodies.

use std::sync::LazyLock;

use regex::Regex;

use crate::users::UserInfoFetcher;

static MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<@([A-Z][A-Z0-9]*)>").expect("valid mention pattern"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Mention {
        user_id: String,
        display_name: String,
    },
}

/// A message body with every mention token substituted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormattedBody {
    pub segments: Vec<Segment>,
}

impl FormattedBody {
    pub fn plain(text: &str) -> Self {
        Self {
            segments: vec![Segment::Text(text.to_string())],
        }
    }

    pub fn mentions(&self) -> impl Iterator<Item = (&str, &str)> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Mention {
                user_id,
                display_name,
            } => Some((user_id.as_str(), display_name.as_str())),
            Segment::Text(_) => None,
        })
    }

    /// The body as it reads on screen, mentions shown as `@name`.
    pub fn to_plain_text(&self) -> String {
        self.segments
            .iter()
            .map(|s| match s {
                Segment::Text(t) => t.clone(),
                Segment::Mention { display_name, .. } => format!("@{display_name}"),
            })
            .collect()
    }
}

/// Ids of every mention token in `text`, in order, duplicates included.
pub fn mention_ids(text: &str) -> Vec<&str> {
    MENTION
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect()
}

pub struct MentionFormatter<'a> {
    fetcher: &'a UserInfoFetcher,
}

impl<'a> MentionFormatter<'a> {
    pub fn new(fetcher: &'a UserInfoFetcher) -> Self {
        Self { fetcher }
    }

    /// Resolves each distinct mention sequentially and substitutes every
    /// occurrence of it. Unresolvable ids are shown as the raw id.
    pub async fn format(&self, text: &str) -> FormattedBody {
        let mut names: Vec<(String, String)> = Vec::new();
        for id in mention_ids(text) {
            if names.iter().any(|(known, _)| known == id) {
                continue;
            }
            let name = self.fetcher.display_name(id).await;
            names.push((id.to_string(), name));
        }
        substitute(text, |id| {
            names
                .iter()
                .find(|(known, _)| known == id)
                .map(|(_, name)| name.clone())
                .unwrap_or_else(|| id.to_string())
        })
    }
}

fn substitute(text: &str, mut name_for: impl FnMut(&str) -> String) -> FormattedBody {
    let mut segments = Vec::new();
    let mut last = 0;
    for caps in MENTION.captures_iter(text) {
        let (Some(whole), Some(id)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if whole.start() > last {
            segments.push(Segment::Text(text[last..whole.start()].to_string()));
        }
        segments.push(Segment::Mention {
            user_id: id.as_str().to_string(),
            display_name: name_for(id.as_str()),
        });
        last = whole.end();
    }
    if last < text.len() {
        segments.push(Segment::Text(text[last..].to_string()));
    }
    FormattedBody { segments }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::fetcher::testing::fetcher;

    #[test]
    fn finds_tokens_in_order() {
        assert_eq!(
            mention_ids("hey <@U01ABC> and <@W9> not <@lower> <@1BAD> <@U01ABC>"),
            vec!["U01ABC", "W9", "U01ABC"]
        );
        assert!(mention_ids("no mentions here").is_empty());
    }

    #[tokio::test]
    async fn replaces_every_occurrence_of_a_token() {
        let (fetcher, source) = fetcher(&[("U1", "Ada"), ("U2", "Grace")]);
        let body = MentionFormatter::new(&fetcher)
            .format("<@U1> ping <@U2>, <@U1> and <@U1>!")
            .await;

        let mentions: Vec<_> = body.mentions().collect();
        assert_eq!(
            mentions,
            vec![("U1", "Ada"), ("U2", "Grace"), ("U1", "Ada"), ("U1", "Ada")]
        );
        assert_eq!(body.to_plain_text(), "@Ada ping @Grace, @Ada and @Ada!");
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn unresolved_mentions_fall_back_to_id() {
        let (fetcher, _) = fetcher(&[]);
        let body = MentionFormatter::new(&fetcher).format("cc <@U404>").await;
        assert_eq!(
            body.segments,
            vec![
                Segment::Text("cc ".into()),
                Segment::Mention {
                    user_id: "U404".into(),
                    display_name: "U404".into()
                }
            ]
        );
    }

    #[tokio::test]
    async fn text_without_tokens_is_untouched() {
        let (fetcher, source) = fetcher(&[]);
        let body = MentionFormatter::new(&fetcher).format("plain <@ text").await;
        assert_eq!(body, FormattedBody::plain("plain <@ text"));
        assert_eq!(source.calls(), 0);
    }
}
