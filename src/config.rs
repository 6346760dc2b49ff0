mod types;

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use take_mut::take;
use tracing::{debug, info};

pub use self::types::*;

const DEFAULT_USER_AGENT: &str = concat!("vintwatch/", env!("CARGO_PKG_VERSION"));

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct Config {
    pub bind_addr: String,
    pub db_path: PathBuf,

    /// How long to wait between two poll cycles.
    pub poll_interval: Duration,

    /// How many items to request per search.
    pub page_size: u32,

    /// How many searches may run at the same time.
    pub max_concurrent_fetches: usize,

    pub user_agent: String,

    /// IANA name of the timezone used for dates in notifications.
    pub display_timezone: String,

    pub embed_color: u32,

    pub discord_token: Option<String>,

    /// If set, changing subscriptions over HTTP requires this bearer token.
    pub admin_token: Option<String>,
}

impl Config {
    pub fn update(&mut self, args: crate::cli::Args) {
        fn set_if_some<T>(dst: &mut T, v: Option<T>) {
            if let Some(v) = v {
                *dst = v;
            }
        }

        set_if_some(&mut self.bind_addr, args.bind_addr);
        set_if_some(&mut self.db_path, args.db_path);
        set_if_some(&mut self.discord_token, args.discord_token.map(Some));
        set_if_some(&mut self.admin_token, args.admin_token.map(Some));
    }

    pub fn resolve_relative_paths(&mut self, config_dir: impl AsRef<Path>) {
        let config_dir = config_dir.as_ref();

        // do the dance for safety (so that I don't forget to update this after adding new fields).
        take(self, |this| Self {
            bind_addr: this.bind_addr,
            db_path: config_dir.join(&this.db_path),
            poll_interval: this.poll_interval,
            page_size: this.page_size,
            max_concurrent_fetches: this.max_concurrent_fetches,
            user_agent: this.user_agent,
            display_timezone: this.display_timezone,
            embed_color: this.embed_color,
            discord_token: this.discord_token,
            admin_token: this.admin_token,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if std::time::Duration::from(self.poll_interval).is_zero() {
            bail!("`poll-interval` must be positive");
        }

        if self.page_size == 0 {
            bail!("`page-size` must be positive");
        }

        if self.max_concurrent_fetches == 0 {
            bail!("`max-concurrent-fetches` must be positive");
        }

        if self.embed_color > 0xffffff {
            bail!("`embed-color` must be a 24-bit RGB value");
        }

        if time_tz::timezones::get_by_name(&self.display_timezone).is_none() {
            bail!("unknown display timezone `{}`", self.display_timezone);
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: "127.0.0.1:20655".into(),
            db_path: "./vintwatch.sqlite3".into(),
            poll_interval: Duration::from_secs(5),
            page_size: 20,
            max_concurrent_fetches: 4,
            user_agent: DEFAULT_USER_AGENT.into(),
            display_timezone: "UTC".into(),
            embed_color: 0x09b1ba,
            discord_token: None,
            admin_token: None,
        }
    }
}

fn parse(path: &Path, contents: &str) -> Result<Config> {
    let mut cfg: Config = toml::from_str(contents)
        .with_context(|| anyhow!("could not load the config file `{}`", path.display()))?;

    if let Some(parent) = path.parent() {
        cfg.resolve_relative_paths(parent);
    }

    Ok(cfg)
}

pub fn load(search_paths: &[PathBuf]) -> Result<Config> {
    for path in search_paths {
        debug!("Trying to load {}", path.display());
        let mut contents = String::new();

        {
            let mut f = match File::open(path) {
                Ok(f) => f,

                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(file = %path.display(), "File not found, skipping");
                    continue;
                }

                Err(e) => {
                    return Err(e)
                        .context(anyhow!("could not load a config file `{}`", path.display()));
                }
            };

            f.read_to_string(&mut contents).with_context(|| {
                anyhow!(
                    "could not read the contents of a config file `{}`",
                    path.display()
                )
            })?;
        }

        let cfg = parse(path, &contents)?;
        info!("Loaded a config file `{}`", path.display());

        return Ok(cfg);
    }

    info!("Using the default config");

    Ok(Default::default())
}
