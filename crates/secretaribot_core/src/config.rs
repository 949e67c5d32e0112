use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Weekday;
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "secretaribot/0.1";
pub const DEFAULT_BOT_NAME: &str = "Secretaribot";
pub const DEFAULT_WATCHLIST_PAGE: &str = "Secretaribot/Watchlist";
pub const DEFAULT_WATCH_SUMMARY: &str = "www_watch spotted a page change";
pub const DEFAULT_MEETING_TEMPLATE: &str = "Meeting_Notes_Template";
pub const DEFAULT_MEETING_PREFIX: &str = "Meeting_Notes_";
pub const DEFAULT_ORGANIZATION: &str = "Noisebridge";
pub const DEFAULT_MEETING_WEEKDAY: &str = "tuesday";
pub const DEFAULT_README_PAGE: &str = "Secretaribot";
pub const DEFAULT_README_SUMMARY: &str = "New README at github";
pub const DEFAULT_README_INTRO: &str = "README.intro";
pub const DEFAULT_README_SOURCES: &str = "crates/secretaribot_core/src";
pub const DEFAULT_README_OUTPUT: &str = "README.md";
pub const DEFAULT_PANDOC: &str = "pandoc";
pub const DEFAULT_SPAM_START_USER: &str = "Zephyr";
pub const DEFAULT_SINK_ACCOUNT: &str = "SpammerHellDontDelete";
pub const DEFAULT_USER_LIST_LIMIT: usize = 2000;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub watch: WatchSection,
    #[serde(default)]
    pub meeting: MeetingSection,
    #[serde(default)]
    pub readme: ReadmeSection,
    #[serde(default)]
    pub spam: SpamSection,
    #[serde(default)]
    pub merge: MergeSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
    pub bot_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WatchSection {
    pub page: Option<String>,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MeetingSection {
    pub template_page: Option<String>,
    pub page_prefix: Option<String>,
    pub organization: Option<String>,
    pub weekday: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ReadmeSection {
    pub page: Option<String>,
    pub summary: Option<String>,
    pub intro: Option<String>,
    pub sources: Option<String>,
    pub output: Option<String>,
    pub pandoc: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SpamSection {
    pub default_start_user: Option<String>,
    pub user_limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MergeSection {
    pub sink_account: Option<String>,
    pub user_limit: Option<usize>,
}

impl WikiConfig {
    /// Resolve the wiki API URL: env WIKI_API_URL > config > None.
    pub fn api_url_owned(&self) -> Option<String> {
        env_override("WIKI_API_URL").or_else(|| self.wiki.api_url.clone())
    }

    /// Resolve user agent: env WIKI_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        env_override("WIKI_USER_AGENT")
            .or_else(|| self.wiki.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    /// Name the bot signs deletions, blocks and edit summaries with.
    pub fn bot_name(&self) -> &str {
        self.wiki.bot_name.as_deref().unwrap_or(DEFAULT_BOT_NAME)
    }

    pub fn watchlist_page(&self) -> &str {
        self.watch.page.as_deref().unwrap_or(DEFAULT_WATCHLIST_PAGE)
    }

    pub fn watch_summary(&self) -> &str {
        self.watch.summary.as_deref().unwrap_or(DEFAULT_WATCH_SUMMARY)
    }

    pub fn meeting_template(&self) -> &str {
        self.meeting
            .template_page
            .as_deref()
            .unwrap_or(DEFAULT_MEETING_TEMPLATE)
    }

    pub fn meeting_prefix(&self) -> &str {
        self.meeting
            .page_prefix
            .as_deref()
            .unwrap_or(DEFAULT_MEETING_PREFIX)
    }

    pub fn organization(&self) -> &str {
        self.meeting
            .organization
            .as_deref()
            .unwrap_or(DEFAULT_ORGANIZATION)
    }

    pub fn meeting_weekday(&self) -> Result<Weekday> {
        let raw = self
            .meeting
            .weekday
            .as_deref()
            .unwrap_or(DEFAULT_MEETING_WEEKDAY);
        match raw.trim().parse::<Weekday>() {
            Ok(weekday) => Ok(weekday),
            Err(_) => bail!("invalid [meeting].weekday: {raw} (expected e.g. `tuesday`)"),
        }
    }

    pub fn readme_page(&self) -> &str {
        self.readme.page.as_deref().unwrap_or(DEFAULT_README_PAGE)
    }

    pub fn readme_summary(&self) -> &str {
        self.readme
            .summary
            .as_deref()
            .unwrap_or(DEFAULT_README_SUMMARY)
    }

    /// README inputs and output, resolved against `project_root`.
    pub fn readme_intro(&self, project_root: &Path) -> PathBuf {
        project_root.join(self.readme.intro.as_deref().unwrap_or(DEFAULT_README_INTRO))
    }

    pub fn readme_sources(&self, project_root: &Path) -> PathBuf {
        project_root.join(
            self.readme
                .sources
                .as_deref()
                .unwrap_or(DEFAULT_README_SOURCES),
        )
    }

    pub fn readme_output(&self, project_root: &Path) -> PathBuf {
        project_root.join(self.readme.output.as_deref().unwrap_or(DEFAULT_README_OUTPUT))
    }

    pub fn pandoc(&self) -> PathBuf {
        PathBuf::from(self.readme.pandoc.as_deref().unwrap_or(DEFAULT_PANDOC))
    }

    pub fn spam_start_user(&self) -> &str {
        self.spam
            .default_start_user
            .as_deref()
            .unwrap_or(DEFAULT_SPAM_START_USER)
    }

    pub fn spam_user_limit(&self) -> usize {
        self.spam.user_limit.unwrap_or(DEFAULT_USER_LIST_LIMIT)
    }

    pub fn sink_account(&self) -> &str {
        self.merge
            .sink_account
            .as_deref()
            .unwrap_or(DEFAULT_SINK_ACCOUNT)
    }

    pub fn merge_user_limit(&self) -> usize {
        self.merge.user_limit.unwrap_or(DEFAULT_USER_LIST_LIMIT)
    }
}

/// Load and parse a WikiConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<WikiConfig> {
    if !config_path.exists() {
        return Ok(WikiConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: WikiConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Bot credentials from WIKI_BOT_USER / WIKI_BOT_PASS, when both are set.
pub fn credentials_from_env() -> Option<(String, String)> {
    let username = env_override("WIKI_BOT_USER")?;
    let password = env_override("WIKI_BOT_PASS")?;
    Some((username, password))
}

fn env_override(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
