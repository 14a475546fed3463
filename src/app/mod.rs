use std::sync::Arc;

use tracing::info;

use crate::api::HttpIssueApi;
use crate::errors::AppError;
use crate::ui::AppState;
use crate::users::{RelayProfileSource, UserInfoCache, UserInfoFetcher};
use crate::{logging, ui};

pub mod cli;

/// Resolved runtime settings, passed down explicitly.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: String,
    pub relay: String,
    pub profile_host: String,
    pub scroll_threshold: usize,
    pub log_level: cli::LogLevel,
}

impl From<cli::Args> for Config {
    fn from(args: cli::Args) -> Self {
        Self {
            server: args.server,
            relay: args.relay,
            profile_host: args.profile_host.unwrap_or_default(),
            scroll_threshold: args.scroll_threshold.max(1),
            log_level: args.log_level,
        }
    }
}

pub struct App {
    config: Config,
}

impl App {
    pub fn new(cli: cli::Cli) -> Self {
        Self {
            config: cli.args.into(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Wires the HTTP client and the profile cache. The cache is loaded from
    /// disk here, before the first lookup can happen.
    pub fn state(&self) -> Result<AppState, AppError> {
        let api = HttpIssueApi::new(&self.config.server)?;
        let server = api.base().to_string();
        let mut cache = UserInfoCache::new(UserInfoCache::default_path());
        cache.load_from_durable_storage();
        info!(profiles = cache.len(), %server, "starting");
        let source = RelayProfileSource::new(&self.config.relay, &self.config.profile_host);
        let fetcher = UserInfoFetcher::new(cache, Arc::new(source));
        Ok(AppState {
            api: Arc::new(api),
            fetcher: Arc::new(fetcher),
            server,
            scroll_threshold: self.config.scroll_threshold,
        })
    }

    pub async fn run(&mut self) -> Result<(), AppError> {
        logging::init(self.config.log_level)?;
        let state = self.state()?;
        ui::run(state).await
    }
}
