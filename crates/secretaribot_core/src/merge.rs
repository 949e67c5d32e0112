//! merge_blocked
//!
//! Merges every blocked account registered after a given user into a single
//! sink account and deletes the merged account, which keeps the user list
//! free of dead spam accounts.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::client::WikiWriteApi;

#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub start_user: Option<String>,
    pub sink_account: String,
    pub user_limit: usize,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeAction {
    Merged,
    WouldMerge,
    NotMerged,
}

#[derive(Debug, Clone, Serialize)]
pub struct MergedUser {
    pub user: String,
    pub action: MergeAction,
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    pub start_user: String,
    pub sink_account: String,
    pub examined: usize,
    pub merged: Vec<MergedUser>,
    pub dry_run: bool,
    pub request_count: usize,
}

pub fn run_merge_blocked<A: WikiWriteApi>(
    api: &mut A,
    options: &MergeOptions,
    credentials: Option<(&str, &str)>,
) -> Result<MergeReport> {
    let start_user = options
        .start_user
        .as_deref()
        .map(str::trim)
        .filter(|user| !user.is_empty())
        .unwrap_or(&options.sink_account)
        .to_string();
    let users = api
        .list_users_since(&start_user, options.user_limit)
        .with_context(|| format!("failed to list users registered after {start_user}"))?;

    if !options.dry_run
        && let Some((username, password)) = credentials
    {
        api.login(username, password)?;
    }

    let mut report = MergeReport {
        start_user,
        sink_account: options.sink_account.clone(),
        examined: users.len(),
        merged: Vec::new(),
        dry_run: options.dry_run,
        request_count: 0,
    };

    for user in users
        .iter()
        .filter(|user| user.blocked && user.name != options.sink_account)
    {
        if options.dry_run {
            report.merged.push(MergedUser {
                user: user.name.clone(),
                action: MergeAction::WouldMerge,
                deleted: false,
            });
            continue;
        }

        let outcome = api
            .merge_user(&user.name, &options.sink_account, true)
            .with_context(|| format!("failed to merge {} into {}", user.name, options.sink_account))?;
        info!(
            user = %user.name,
            sink = %options.sink_account,
            merged = outcome.merged,
            deleted = outcome.deleted,
            "merge finished"
        );
        report.merged.push(MergedUser {
            user: user.name.clone(),
            action: if outcome.merged {
                MergeAction::Merged
            } else {
                MergeAction::NotMerged
            },
            deleted: outcome.deleted,
        });
    }

    report.request_count = api.request_count();
    Ok(report)
}
