//! User identities referenced by thread authors and mention tokens.

pub mod cache;
pub mod fetcher;

use serde::{Deserialize, Serialize};

pub use cache::{CacheSnapshot, UserInfoCache};
pub use fetcher::{ProfileSource, RelayProfileSource, UserInfoFetcher};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pronouns: Option<String>,
}

impl UserProfile {
    /// First character of the display name, used when there is no avatar.
    pub fn initial(&self) -> char {
        self.display_name
            .chars()
            .find(|c| !c.is_whitespace())
            .or_else(|| self.id.chars().next())
            .map(|c| c.to_uppercase().next().unwrap_or(c))
            .unwrap_or('?')
    }
}
