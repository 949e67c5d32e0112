//! despam
//!
//! Walks the users registered after a given user, shows the latest edit of
//! each one that is not blocked yet, and asks whether it is spam. Spam
//! accounts get every page they touched deleted and are blocked forever.
//! The last despammed user is remembered so the next run picks up there.

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::client::{BlockOptions, Contribution, WikiUser, WikiWriteApi};
use crate::runtime::{read_state_value, write_state_value};

/// Decides whether a user's latest edit is spam.
pub trait SpamJudge {
    fn is_spam(&mut self, user: &WikiUser, last_edit: &Contribution) -> Result<bool>;
}

#[derive(Debug, Clone)]
pub struct DespamOptions {
    pub start_user: Option<String>,
    pub default_start_user: String,
    pub cursor_path: PathBuf,
    pub user_limit: usize,
    pub bot_name: String,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpamVerdict {
    AlreadyBlocked,
    NotSpam,
    Despammed,
    WouldDespam,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserOutcome {
    pub user: String,
    pub verdict: SpamVerdict,
    pub deleted_pages: Vec<String>,
    pub asked: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DespamReport {
    pub start_user: String,
    pub users: Vec<UserOutcome>,
    pub despammed: usize,
    pub dry_run: bool,
    pub request_count: usize,
}

pub fn delete_reason(bot_name: &str) -> String {
    format!("Spam (deleted by [{bot_name}] )")
}

pub fn block_options(bot_name: &str) -> BlockOptions {
    BlockOptions {
        reason: format!("Spam: deleted by [{bot_name}]"),
        expiry: "infinite".to_string(),
        autoblock: true,
        allow_user_talk: false,
        anon_only: false,
    }
}

/// Titles the user edited, first occurrence wins.
pub fn pages_to_delete(contributions: &[Contribution]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    contributions
        .iter()
        .filter(|contribution| seen.insert(contribution.title.as_str()))
        .map(|contribution| contribution.title.clone())
        .collect()
}

/// Start user: explicit argument, then the saved cursor, then the default.
pub fn resolve_start_user(options: &DespamOptions) -> Result<String> {
    if let Some(user) = options
        .start_user
        .as_deref()
        .map(str::trim)
        .filter(|user| !user.is_empty())
    {
        return Ok(user.to_string());
    }
    Ok(read_state_value(&options.cursor_path)?
        .unwrap_or_else(|| options.default_start_user.clone()))
}

pub fn run_despam<A: WikiWriteApi, J: SpamJudge>(
    api: &mut A,
    judge: &mut J,
    options: &DespamOptions,
    credentials: Option<(&str, &str)>,
) -> Result<DespamReport> {
    let start_user = resolve_start_user(options)?;
    info!(%start_user, "listing users registered since");
    let users = api
        .list_users_since(&start_user, options.user_limit)
        .with_context(|| format!("failed to list users registered after {start_user}"))?;

    if !options.dry_run
        && let Some((username, password)) = credentials
    {
        api.login(username, password)?;
    }

    let mut report = DespamReport {
        start_user,
        users: Vec::new(),
        despammed: 0,
        dry_run: options.dry_run,
        request_count: 0,
    };

    for user in &users {
        if user.blocked {
            debug!(user = %user.name, "already blocked");
            report.users.push(UserOutcome {
                user: user.name.clone(),
                verdict: SpamVerdict::AlreadyBlocked,
                deleted_pages: Vec::new(),
                asked: false,
            });
            continue;
        }

        let latest = api.user_contributions(&user.name, Some(1))?;
        let asked = !latest.is_empty();
        let spam = match latest.first() {
            Some(last_edit) => judge.is_spam(user, last_edit)?,
            None => {
                info!(user = %user.name, "no edits; treating as spam");
                true
            }
        };
        if !spam {
            report.users.push(UserOutcome {
                user: user.name.clone(),
                verdict: SpamVerdict::NotSpam,
                deleted_pages: Vec::new(),
                asked,
            });
            continue;
        }

        let pages = pages_to_delete(&api.user_contributions(&user.name, None)?);
        if options.dry_run {
            report.users.push(UserOutcome {
                user: user.name.clone(),
                verdict: SpamVerdict::WouldDespam,
                deleted_pages: pages,
                asked,
            });
            continue;
        }

        despam_user(api, &user.name, &pages, &options.bot_name)?;
        write_state_value(&options.cursor_path, &user.name)?;
        report.despammed += 1;
        report.users.push(UserOutcome {
            user: user.name.clone(),
            verdict: SpamVerdict::Despammed,
            deleted_pages: pages,
            asked,
        });
    }

    report.request_count = api.request_count();
    Ok(report)
}

fn despam_user<A: WikiWriteApi>(
    api: &mut A,
    username: &str,
    pages: &[String],
    bot_name: &str,
) -> Result<()> {
    let reason = delete_reason(bot_name);
    for title in pages {
        info!(user = %username, page = %title, "deleting");
        api.delete_page(title, &reason)
            .with_context(|| format!("failed to delete {title}"))?;
    }
    api.block_user(username, &block_options(bot_name))
        .with_context(|| format!("failed to block {username}"))?;
    info!(user = %username, pages = pages.len(), "despammed");
    Ok(())
}
