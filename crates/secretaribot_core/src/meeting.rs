//! next_meeting
//!
//! Creates the next meeting page from the template on the wiki, with the
//! meeting number ("the 412th Meeting of ...") worked out from the last
//! meeting's page.

use anyhow::{Result, bail};
use chrono::{Datelike, Days, NaiveDate, Weekday};
use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use crate::client::WikiWriteApi;

pub const ORDINAL_PLACEHOLDER: &str = "XXXth";

#[derive(Debug, Clone)]
pub struct MeetingOptions {
    pub template_page: String,
    pub page_prefix: String,
    pub organization: String,
    pub weekday: Weekday,
    pub bot_name: String,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingAction {
    Created,
    WouldCreate,
    AlreadyExists,
}

#[derive(Debug, Clone, Serialize)]
pub struct MeetingReport {
    pub last_page: String,
    pub next_page: String,
    pub ordinal: String,
    pub action: MeetingAction,
    pub request_count: usize,
}

pub fn ordinal(value: u64) -> String {
    let suffix = if value % 100 / 10 == 1 {
        "th"
    } else {
        match value % 10 {
            1 => "st",
            2 => "nd",
            3 => "rd",
            _ => "th",
        }
    };
    format!("{value}{suffix}")
}

/// Latest date strictly before `date` that falls on `weekday`.
pub fn previous_weekday(date: NaiveDate, weekday: Weekday) -> NaiveDate {
    let back = (date.weekday().num_days_from_monday() + 7 - weekday.num_days_from_monday()) % 7;
    let back = if back == 0 { 7 } else { back };
    date - Days::new(u64::from(back))
}

/// Earliest date strictly after `date` that falls on `weekday`.
pub fn next_weekday(date: NaiveDate, weekday: Weekday) -> NaiveDate {
    let ahead = (weekday.num_days_from_monday() + 7 - date.weekday().num_days_from_monday()) % 7;
    let ahead = if ahead == 0 { 7 } else { ahead };
    date + Days::new(u64::from(ahead))
}

pub fn meeting_page_title(prefix: &str, date: NaiveDate) -> String {
    format!("{prefix}{}", date.format("%Y_%m_%d"))
}

/// Meeting number mentioned as "The NNNth Meeting of <organization>".
pub fn find_meeting_number(text: &str, organization: &str) -> Option<u64> {
    let pattern = format!(r"The (\d\d+).. Meeting of {}", regex::escape(organization));
    let matcher = Regex::new(&pattern).ok()?;
    matcher
        .captures(text)
        .and_then(|captures| captures.get(1))
        .and_then(|number| number.as_str().parse::<u64>().ok())
}

pub fn next_ordinal(last_meeting: &str, organization: &str) -> String {
    find_meeting_number(last_meeting, organization)
        .and_then(|number| number.checked_add(1))
        .map(ordinal)
        .unwrap_or_else(|| ORDINAL_PLACEHOLDER.to_string())
}

pub fn fill_template(template: &str, ordinal: &str, organization: &str) -> String {
    template.replace(
        &format!("{ORDINAL_PLACEHOLDER} Meeting of {organization}"),
        &format!("{ordinal} Meeting of {organization}"),
    )
}

pub fn run_next_meeting<A: WikiWriteApi>(
    api: &mut A,
    options: &MeetingOptions,
    today: NaiveDate,
    credentials: Option<(&str, &str)>,
) -> Result<MeetingReport> {
    let Some(template) = api.get_page(&options.template_page)? else {
        bail!("meeting template page does not exist: {}", options.template_page);
    };

    let last_page = meeting_page_title(&options.page_prefix, previous_weekday(today, options.weekday));
    let next_page = meeting_page_title(&options.page_prefix, next_weekday(today, options.weekday));

    let last_source = match api.redirect_target(&last_page)? {
        Some(target) => target,
        None => last_page.clone(),
    };
    let ordinal = match api.get_page(&last_source)? {
        Some(page) => next_ordinal(&page.content, &options.organization),
        None => {
            warn!(page = %last_source, "last meeting page not found; leaving ordinal placeholder");
            ORDINAL_PLACEHOLDER.to_string()
        }
    };

    let mut report = MeetingReport {
        last_page,
        next_page: next_page.clone(),
        ordinal: ordinal.clone(),
        action: MeetingAction::AlreadyExists,
        request_count: 0,
    };

    if api.page_exists(&next_page)? {
        info!(page = %next_page, "Already a page at {next_page} . Not overwriting.");
        report.request_count = api.request_count();
        return Ok(report);
    }

    let content = fill_template(&template.content, &ordinal, &options.organization);
    if options.dry_run {
        report.action = MeetingAction::WouldCreate;
        report.request_count = api.request_count();
        return Ok(report);
    }

    if let Some((username, password)) = credentials {
        api.login(username, password)?;
    }
    let summary = format!(
        "{} says its time for the {} {} notes",
        options.bot_name, ordinal, options.organization
    );
    api.edit_page(&next_page, &content, &summary)?;
    info!(page = %next_page, %ordinal, "meeting page created");
    report.action = MeetingAction::Created;
    report.request_count = api.request_count();
    Ok(report)
}
