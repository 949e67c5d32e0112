use std::collections::BTreeSet;
use std::env;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::WikiConfig;

const USER_BATCH_SIZE: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePage {
    pub title: String,
    pub revision_id: i64,
    pub timestamp: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WikiUser {
    pub name: String,
    pub user_id: Option<i64>,
    pub registration: Option<String>,
    pub blocked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Contribution {
    pub title: String,
    pub timestamp: String,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockOptions {
    pub reason: String,
    pub expiry: String,
    pub autoblock: bool,
    pub allow_user_talk: bool,
    pub anon_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MergeOutcome {
    pub merged: bool,
    pub deleted: bool,
}

pub trait WikiReadApi {
    /// `None` when the page does not exist.
    fn get_page(&mut self, title: &str) -> Result<Option<RemotePage>>;
    fn page_exists(&mut self, title: &str) -> Result<bool>;
    /// Target title when `title` is a redirect.
    fn redirect_target(&mut self, title: &str) -> Result<Option<String>>;
    /// Accounts created after `username`, oldest first.
    fn list_users_since(&mut self, username: &str, limit: usize) -> Result<Vec<WikiUser>>;
    /// Newest contributions first. `None` fetches all of them.
    fn user_contributions(
        &mut self,
        username: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Contribution>>;
    fn request_count(&self) -> usize;
}

pub trait WikiWriteApi: WikiReadApi {
    fn login(&mut self, username: &str, password: &str) -> Result<()>;
    fn edit_page(&mut self, title: &str, content: &str, summary: &str) -> Result<()>;
    fn delete_page(&mut self, title: &str, reason: &str) -> Result<()>;
    fn block_user(&mut self, username: &str, options: &BlockOptions) -> Result<()>;
    fn merge_user(&mut self, old_user: &str, new_user: &str, delete: bool)
    -> Result<MergeOutcome>;
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub rate_limit_write_ms: u64,
    pub max_retries: usize,
    pub max_write_retries: usize,
    pub retry_delay_ms: u64,
}

impl MediaWikiClientConfig {
    pub fn from_config(config: &WikiConfig) -> Self {
        Self {
            api_url: config.api_url_owned().unwrap_or_default(),
            user_agent: config.user_agent(),
            timeout_ms: env_value_u64("WIKI_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_read_ms: env_value_u64("WIKI_RATE_LIMIT_READ", 300),
            rate_limit_write_ms: env_value_u64("WIKI_RATE_LIMIT_WRITE", 1_000),
            max_retries: env_value_usize("WIKI_HTTP_RETRIES", 2),
            max_write_retries: env_value_usize("WIKI_HTTP_WRITE_RETRIES", 1),
            retry_delay_ms: env_value_u64("WIKI_HTTP_RETRY_DELAY_MS", 500),
        }
    }
}

pub struct MediaWikiClient {
    client: Client,
    config: MediaWikiClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
    csrf_token: Option<String>,
}

impl MediaWikiClient {
    pub fn from_config(config: &WikiConfig) -> Result<Self> {
        Self::new(MediaWikiClientConfig::from_config(config))
    }

    pub fn new(config: MediaWikiClientConfig) -> Result<Self> {
        if config.api_url.trim().is_empty() {
            bail!("wiki API URL is not configured (set WIKI_API_URL or [wiki].api_url)");
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_store(true)
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            config,
            last_request_at: None,
            request_count: 0,
            csrf_token: None,
        })
    }

    fn request_json_get(&mut self, params: &[(&str, String)]) -> Result<Value> {
        let base_url = Url::parse(&self.config.api_url)
            .with_context(|| format!("invalid WIKI_API_URL: {}", self.config.api_url))?;
        let pairs = api_pairs(params);

        for attempt in 0..=self.config.max_retries {
            self.apply_rate_limit(false);
            debug!(attempt, action = ?params.first(), "MediaWiki GET");
            let response = self
                .client
                .get(base_url.clone())
                .header("User-Agent", self.config.user_agent.clone())
                .query(&pairs)
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < self.config.max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt, false);
                            continue;
                        }
                        bail!("MediaWiki API request failed with HTTP {status}");
                    }
                    let payload: Value = response
                        .json()
                        .context("failed to decode MediaWiki API JSON response")?;
                    return check_api_error(payload);
                }
                Err(error) => {
                    if attempt < self.config.max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt, false);
                        continue;
                    }
                    return Err(error).context("failed to call MediaWiki API");
                }
            }
        }

        bail!("MediaWiki API request exhausted retry budget")
    }

    fn request_json_post(&mut self, params: &[(&str, String)], is_write: bool) -> Result<Value> {
        let max_retries = if is_write {
            self.config.max_write_retries
        } else {
            self.config.max_retries
        };
        let pairs = api_pairs(params);

        for attempt in 0..=max_retries {
            self.apply_rate_limit(is_write);
            debug!(attempt, action = ?params.first(), "MediaWiki POST");
            let response = self
                .client
                .post(&self.config.api_url)
                .header("User-Agent", self.config.user_agent.clone())
                .form(&pairs)
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt, is_write);
                            continue;
                        }
                        bail!("MediaWiki API request failed with HTTP {status}");
                    }
                    let payload: Value = response
                        .json()
                        .context("failed to decode MediaWiki API JSON response")?;
                    return check_api_error(payload);
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt, is_write);
                        continue;
                    }
                    return Err(error).context("failed to call MediaWiki API");
                }
            }
        }

        bail!("MediaWiki API request exhausted retry budget")
    }

    fn apply_rate_limit(&mut self, is_write: bool) {
        let delay = if is_write {
            Duration::from_millis(self.config.rate_limit_write_ms)
        } else {
            Duration::from_millis(self.config.rate_limit_read_ms)
        };
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize, is_write: bool) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        let multiplier = if is_write { 2u64 } else { 1u64 };
        sleep(Duration::from_millis(
            base.saturating_mul(multiplier).saturating_add(jitter),
        ));
    }

    fn ensure_csrf_token(&mut self) -> Result<String> {
        if let Some(token) = &self.csrf_token {
            return Ok(token.clone());
        }
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
        ])?;
        let parsed: TokenQueryResponse =
            serde_json::from_value(response).context("failed to decode csrf token response")?;
        let token = parsed
            .query
            .tokens
            .and_then(|tokens| tokens.csrftoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki csrf token"))?;
        self.csrf_token = Some(token.clone());
        Ok(token)
    }

    fn query_page(&mut self, title: &str, with_content: bool) -> Result<Option<PageQueryItem>> {
        let mut params = vec![
            ("action", "query".to_string()),
            ("titles", title.to_string()),
        ];
        if with_content {
            params.push(("prop", "revisions".to_string()));
            params.push(("rvprop", "content|timestamp|ids".to_string()));
            params.push(("rvslots", "main".to_string()));
        }
        let response = self.request_json_get(&params)?;
        let parsed: QueryResponse =
            serde_json::from_value(response).context("failed to decode page query response")?;
        Ok(parsed
            .query
            .pages
            .into_iter()
            .find(|page| !page.missing.unwrap_or(false) && !page.invalid.unwrap_or(false)))
    }

    fn registration_of(&mut self, username: &str) -> Result<String> {
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("list", "users".to_string()),
            ("ususers", username.to_string()),
            ("usprop", "registration".to_string()),
        ])?;
        let parsed: QueryResponse =
            serde_json::from_value(response).context("failed to decode users API response")?;
        let user = parsed
            .query
            .users
            .into_iter()
            .next()
            .filter(|user| !user.missing.unwrap_or(false))
            .ok_or_else(|| anyhow::anyhow!("unknown wiki user: {username}"))?;
        user.registration
            .ok_or_else(|| anyhow::anyhow!("wiki user {username} has no registration date"))
    }

    fn attach_block_status(&mut self, users: &mut [WikiUser]) -> Result<()> {
        for batch in users.chunks_mut(USER_BATCH_SIZE) {
            let names = batch
                .iter()
                .map(|user| user.name.as_str())
                .collect::<Vec<_>>()
                .join("|");
            let response = self.request_json_get(&[
                ("action", "query".to_string()),
                ("list", "users".to_string()),
                ("ususers", names),
                ("usprop", "blockinfo|registration".to_string()),
            ])?;
            let parsed: QueryResponse = serde_json::from_value(response)
                .context("failed to decode users blockinfo response")?;
            for item in parsed.query.users {
                if let Some(user) = batch.iter_mut().find(|user| user.name == item.name) {
                    user.blocked = item.blockid.is_some();
                    user.user_id = item.userid.or(user.user_id);
                    if user.registration.is_none() {
                        user.registration = item.registration;
                    }
                }
            }
        }
        Ok(())
    }
}

impl WikiReadApi for MediaWikiClient {
    fn get_page(&mut self, title: &str) -> Result<Option<RemotePage>> {
        let Some(page) = self.query_page(title, true)? else {
            return Ok(None);
        };
        let revision = page
            .revisions
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("page {title} has no revisions"))?;
        let content = revision
            .slots
            .and_then(|slots| slots.main)
            .map(|slot| slot.content)
            .ok_or_else(|| anyhow::anyhow!("page {title} has no main slot content"))?;
        Ok(Some(RemotePage {
            title: page.title,
            revision_id: revision.revid,
            timestamp: revision.timestamp,
            content,
        }))
    }

    fn page_exists(&mut self, title: &str) -> Result<bool> {
        Ok(self.query_page(title, false)?.is_some())
    }

    fn redirect_target(&mut self, title: &str) -> Result<Option<String>> {
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("titles", title.to_string()),
            ("redirects", "1".to_string()),
        ])?;
        let parsed: QueryResponse =
            serde_json::from_value(response).context("failed to decode redirects response")?;
        Ok(parsed.query.redirects.into_iter().last().map(|item| item.to))
    }

    fn list_users_since(&mut self, username: &str, limit: usize) -> Result<Vec<WikiUser>> {
        let registration = self.registration_of(username)?;
        let mut users = Vec::new();
        let mut seen = BTreeSet::new();
        let mut continue_token: Option<String> = None;

        while users.len() < limit {
            let mut params = vec![
                ("action", "query".to_string()),
                ("list", "logevents".to_string()),
                ("letype", "newusers".to_string()),
                ("ledir", "newer".to_string()),
                ("lestart", registration.clone()),
                ("leprop", "title|user|userid|timestamp".to_string()),
                ("lelimit", "500".to_string()),
            ];
            if let Some(token) = &continue_token {
                params.push(("lecontinue", token.clone()));
            }

            let response = self.request_json_get(&params)?;
            let parsed: QueryResponse = serde_json::from_value(response)
                .context("failed to decode logevents API response")?;
            for event in parsed.query.logevents {
                let name = event
                    .title
                    .as_deref()
                    .and_then(|title| title.split_once(':').map(|(_, name)| name.to_string()))
                    .or(event.user)
                    .unwrap_or_default();
                if name.is_empty() || name == username || !seen.insert(name.clone()) {
                    continue;
                }
                users.push(WikiUser {
                    name,
                    user_id: event.userid,
                    registration: event.timestamp,
                    blocked: false,
                });
                if users.len() >= limit {
                    break;
                }
            }

            continue_token = parsed.continuation.and_then(|cont| cont.lecontinue);
            if continue_token.is_none() {
                break;
            }
        }

        self.attach_block_status(&mut users)?;
        Ok(users)
    }

    fn user_contributions(
        &mut self,
        username: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Contribution>> {
        let mut contributions = Vec::new();
        let mut continue_token: Option<String> = None;
        let page_size = limit.map(|value| value.min(500)).unwrap_or(500);

        loop {
            let mut params = vec![
                ("action", "query".to_string()),
                ("list", "usercontribs".to_string()),
                ("ucuser", username.to_string()),
                ("ucprop", "title|timestamp|comment".to_string()),
                ("uclimit", page_size.to_string()),
            ];
            if let Some(token) = &continue_token {
                params.push(("uccontinue", token.clone()));
            }

            let response = self.request_json_get(&params)?;
            let parsed: QueryResponse = serde_json::from_value(response)
                .context("failed to decode usercontribs API response")?;
            for item in parsed.query.usercontribs {
                contributions.push(Contribution {
                    title: item.title,
                    timestamp: item.timestamp,
                    comment: item.comment.unwrap_or_default(),
                });
            }

            if let Some(limit) = limit
                && contributions.len() >= limit
            {
                contributions.truncate(limit);
                break;
            }
            continue_token = parsed.continuation.and_then(|cont| cont.uccontinue);
            if continue_token.is_none() {
                break;
            }
        }

        Ok(contributions)
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

impl WikiWriteApi for MediaWikiClient {
    fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let token_response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
            ("type", "login".to_string()),
        ])?;
        let token_payload: TokenQueryResponse = serde_json::from_value(token_response)
            .context("failed to decode login token response")?;
        let login_token = token_payload
            .query
            .tokens
            .and_then(|tokens| tokens.logintoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki login token"))?;

        let login_response = self.request_json_post(
            &[
                ("action", "login".to_string()),
                ("lgname", username.to_string()),
                ("lgpassword", password.to_string()),
                ("lgtoken", login_token),
            ],
            true,
        )?;
        let login_payload: LoginResponse =
            serde_json::from_value(login_response).context("failed to decode login response")?;
        match login_payload.login.result.as_deref() {
            Some("Success") => {
                self.csrf_token = None;
                Ok(())
            }
            other => bail!(
                "MediaWiki login failed: {}",
                login_payload
                    .login
                    .reason
                    .or_else(|| other.map(ToString::to_string))
                    .unwrap_or_else(|| "unknown error".to_string())
            ),
        }
    }

    fn edit_page(&mut self, title: &str, content: &str, summary: &str) -> Result<()> {
        let token = self.ensure_csrf_token()?;
        let response = self.request_json_post(
            &[
                ("action", "edit".to_string()),
                ("title", title.to_string()),
                ("text", content.to_string()),
                ("summary", summary.to_string()),
                ("bot", "1".to_string()),
                ("token", token),
            ],
            true,
        )?;
        let edit_payload: EditResponse =
            serde_json::from_value(response).context("failed to decode edit response")?;
        let result = edit_payload.edit.and_then(|edit| edit.result);
        if result.as_deref() != Some("Success") {
            bail!(
                "MediaWiki edit failed for {}: {}",
                title,
                result.unwrap_or_else(|| "unknown".to_string())
            );
        }
        Ok(())
    }

    fn delete_page(&mut self, title: &str, reason: &str) -> Result<()> {
        let token = self.ensure_csrf_token()?;
        let response = self.request_json_post(
            &[
                ("action", "delete".to_string()),
                ("title", title.to_string()),
                ("reason", reason.to_string()),
                ("token", token),
            ],
            true,
        );

        match response {
            Ok(_) => Ok(()),
            Err(error) if error.to_string().contains("missingtitle") => Ok(()),
            Err(error) => Err(error),
        }
    }

    fn block_user(&mut self, username: &str, options: &BlockOptions) -> Result<()> {
        let token = self.ensure_csrf_token()?;
        let mut params = vec![
            ("action", "block".to_string()),
            ("user", username.to_string()),
            ("expiry", options.expiry.clone()),
            ("reason", options.reason.clone()),
            ("token", token),
        ];
        // Boolean API flags are enabled by presence; empty values are dropped.
        params.push(("autoblock", flag(options.autoblock)));
        params.push(("allowusertalk", flag(options.allow_user_talk)));
        params.push(("anononly", flag(options.anon_only)));

        let response = self.request_json_post(&params, true)?;
        if response.get("block").is_none() {
            bail!("MediaWiki block of {username} returned no block payload");
        }
        Ok(())
    }

    fn merge_user(
        &mut self,
        old_user: &str,
        new_user: &str,
        delete: bool,
    ) -> Result<MergeOutcome> {
        if old_user == new_user {
            return Ok(MergeOutcome::default());
        }
        let token = self.ensure_csrf_token()?;
        let response = self.request_json_post(
            &[
                ("action", "usermerge".to_string()),
                ("oldusername", old_user.to_string()),
                ("newusername", new_user.to_string()),
                ("delete", flag(delete)),
                ("token", token),
            ],
            true,
        )?;
        let payload: MergeResponse =
            serde_json::from_value(response).context("failed to decode usermerge response")?;
        let merged = payload
            .usermerge
            .and_then(|merge| merge.result)
            .is_some_and(|result| result.eq_ignore_ascii_case("success"));
        Ok(MergeOutcome {
            merged,
            deleted: merged && delete,
        })
    }
}

fn api_pairs(params: &[(&str, String)]) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(params.len() + 2);
    pairs.push(("format".to_string(), "json".to_string()));
    pairs.push(("formatversion".to_string(), "2".to_string()));
    for (key, value) in params {
        if !value.is_empty() {
            pairs.push(((*key).to_string(), value.clone()));
        }
    }
    pairs
}

fn check_api_error(payload: Value) -> Result<Value> {
    if let Some(error) = payload.get("error") {
        let code = error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("unknown info");
        bail!("MediaWiki API error [{code}]: {info}");
    }
    Ok(payload)
}

fn flag(enabled: bool) -> String {
    if enabled {
        "1".to_string()
    } else {
        String::new()
    }
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
    #[serde(default, rename = "continue")]
    continuation: Option<ContinuationPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    pages: Vec<PageQueryItem>,
    #[serde(default)]
    redirects: Vec<RedirectItem>,
    #[serde(default)]
    users: Vec<UserQueryItem>,
    #[serde(default)]
    logevents: Vec<LogEventItem>,
    #[serde(default)]
    usercontribs: Vec<ContributionItem>,
}

#[derive(Debug, Deserialize, Default)]
struct ContinuationPayload {
    lecontinue: Option<String>,
    uccontinue: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PageQueryItem {
    title: String,
    missing: Option<bool>,
    invalid: Option<bool>,
    #[serde(default)]
    revisions: Vec<RevisionQueryItem>,
}

#[derive(Debug, Deserialize)]
struct RevisionQueryItem {
    revid: i64,
    timestamp: String,
    slots: Option<RevisionSlotContainer>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlotContainer {
    main: Option<RevisionMainSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionMainSlot {
    content: String,
}

#[derive(Debug, Deserialize)]
struct RedirectItem {
    to: String,
}

#[derive(Debug, Deserialize)]
struct UserQueryItem {
    name: String,
    userid: Option<i64>,
    missing: Option<bool>,
    registration: Option<String>,
    blockid: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct LogEventItem {
    title: Option<String>,
    user: Option<String>,
    userid: Option<i64>,
    timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContributionItem {
    title: String,
    timestamp: String,
    comment: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryResponse {
    #[serde(default)]
    query: TokenQueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryPayload {
    tokens: Option<TokenPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenPayload {
    logintoken: Option<String>,
    csrftoken: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LoginResponse {
    #[serde(default)]
    login: LoginPayload,
}

#[derive(Debug, Deserialize, Default)]
struct LoginPayload {
    result: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct EditResponse {
    edit: Option<EditPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct EditPayload {
    result: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct MergeResponse {
    usermerge: Option<MergePayload>,
}

#[derive(Debug, Deserialize, Default)]
struct MergePayload {
    result: Option<String>,
}

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::BTreeMap;

    use anyhow::{Result, bail};

    use super::{
        BlockOptions, Contribution, MergeOutcome, RemotePage, WikiReadApi, WikiUser,
        WikiWriteApi,
    };

    /// In-memory wiki used by the job tests.
    #[derive(Default)]
    pub struct MockWiki {
        pub pages: BTreeMap<String, String>,
        pub redirects: BTreeMap<String, String>,
        pub users: Vec<WikiUser>,
        pub contributions: BTreeMap<String, Vec<Contribution>>,
        pub edits: Vec<(String, String, String)>,
        pub deleted: Vec<(String, String)>,
        pub blocked: Vec<(String, BlockOptions)>,
        pub merges: Vec<(String, String, bool)>,
        pub logged_in: bool,
        pub login_required: bool,
        pub request_count: usize,
    }

    impl MockWiki {
        pub fn with_page(mut self, title: &str, content: &str) -> Self {
            self.pages.insert(title.to_string(), content.to_string());
            self
        }

        fn ensure_login(&self) -> Result<()> {
            if self.login_required && !self.logged_in {
                bail!("not logged in");
            }
            Ok(())
        }
    }

    pub fn user(name: &str, blocked: bool) -> WikiUser {
        WikiUser {
            name: name.to_string(),
            user_id: None,
            registration: None,
            blocked,
        }
    }

    pub fn contribution(title: &str) -> Contribution {
        Contribution {
            title: title.to_string(),
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            comment: String::new(),
        }
    }

    impl WikiReadApi for MockWiki {
        fn get_page(&mut self, title: &str) -> Result<Option<RemotePage>> {
            self.request_count += 1;
            Ok(self.pages.get(title).map(|content| RemotePage {
                title: title.to_string(),
                revision_id: 1,
                timestamp: "2026-01-01T00:00:00Z".to_string(),
                content: content.clone(),
            }))
        }

        fn page_exists(&mut self, title: &str) -> Result<bool> {
            self.request_count += 1;
            Ok(self.pages.contains_key(title))
        }

        fn redirect_target(&mut self, title: &str) -> Result<Option<String>> {
            self.request_count += 1;
            Ok(self.redirects.get(title).cloned())
        }

        fn list_users_since(&mut self, username: &str, limit: usize) -> Result<Vec<WikiUser>> {
            self.request_count += 1;
            let start = self
                .users
                .iter()
                .position(|user| user.name == username)
                .ok_or_else(|| anyhow::anyhow!("unknown wiki user: {username}"))?;
            Ok(self
                .users
                .iter()
                .skip(start + 1)
                .take(limit)
                .cloned()
                .collect())
        }

        fn user_contributions(
            &mut self,
            username: &str,
            limit: Option<usize>,
        ) -> Result<Vec<Contribution>> {
            self.request_count += 1;
            let all = self.contributions.get(username).cloned().unwrap_or_default();
            Ok(match limit {
                Some(limit) => all.into_iter().take(limit).collect(),
                None => all,
            })
        }

        fn request_count(&self) -> usize {
            self.request_count
        }
    }

    impl WikiWriteApi for MockWiki {
        fn login(&mut self, _username: &str, _password: &str) -> Result<()> {
            self.request_count += 1;
            self.logged_in = true;
            Ok(())
        }

        fn edit_page(&mut self, title: &str, content: &str, summary: &str) -> Result<()> {
            self.request_count += 1;
            self.ensure_login()?;
            self.pages.insert(title.to_string(), content.to_string());
            self.edits
                .push((title.to_string(), content.to_string(), summary.to_string()));
            Ok(())
        }

        fn delete_page(&mut self, title: &str, reason: &str) -> Result<()> {
            self.request_count += 1;
            self.ensure_login()?;
            self.pages.remove(title);
            self.deleted.push((title.to_string(), reason.to_string()));
            Ok(())
        }

        fn block_user(&mut self, username: &str, options: &BlockOptions) -> Result<()> {
            self.request_count += 1;
            self.ensure_login()?;
            self.blocked.push((username.to_string(), options.clone()));
            Ok(())
        }

        fn merge_user(
            &mut self,
            old_user: &str,
            new_user: &str,
            delete: bool,
        ) -> Result<MergeOutcome> {
            self.request_count += 1;
            self.ensure_login()?;
            if old_user == new_user {
                return Ok(MergeOutcome::default());
            }
            self.merges
                .push((old_user.to_string(), new_user.to_string(), delete));
            Ok(MergeOutcome {
                merged: true,
                deleted: delete,
            })
        }
    }
}
