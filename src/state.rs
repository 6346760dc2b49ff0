use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use handlebars::Handlebars;
use tokio::sync::Notify;

use crate::config::Config;
use crate::notify::{DiscordNotifier, Notifier};
use crate::poller::PollerSettings;
use crate::render::RenderOptions;
use crate::storage::Storage;
use crate::template;

/// Everything shared by the poller and the HTTP command server.
#[derive(Clone)]
pub struct State {
    pub storage: Arc<Storage>,
    pub cfg: Arc<Config>,
    pub notifier: Arc<dyn Notifier>,
    pub template: Arc<Handlebars<'static>>,

    /// Wakes the poller up for an immediate cycle.
    pub poll_now: Arc<Notify>,
}

impl State {
    pub async fn new(cfg: Config) -> Result<Self> {
        cfg.validate().context("the config is invalid")?;

        let token = cfg
            .discord_token
            .as_deref()
            .ok_or_else(|| anyhow!("no Discord bot token was configured"))?;
        let notifier = Arc::new(DiscordNotifier::new(token)?);
        let storage = Arc::new(Storage::new(&cfg.db_path).await?);

        Ok(Self::with_parts(cfg, storage, notifier))
    }

    pub fn with_parts(cfg: Config, storage: Arc<Storage>, notifier: Arc<dyn Notifier>) -> Self {
        State {
            storage,
            cfg: Arc::new(cfg),
            notifier,
            template: Arc::new(template::new()),
            poll_now: Default::default(),
        }
    }

    pub fn poller_settings(&self) -> Result<PollerSettings> {
        let timezone = time_tz::timezones::get_by_name(&self.cfg.display_timezone)
            .ok_or_else(|| anyhow!("unknown display timezone `{}`", self.cfg.display_timezone))?;

        Ok(PollerSettings {
            interval: self.cfg.poll_interval.into(),
            page_size: self.cfg.page_size,
            max_concurrent_fetches: self.cfg.max_concurrent_fetches,
            render: RenderOptions {
                color: self.cfg.embed_color,
                timezone,
            },
        })
    }
}
