//! www_watch
//!
//! Checks every URL listed in a wiki table and records its ETag and
//! Last-Modified value next to it. When one of the watched pages changes,
//! the table page changes too, so watching that single wiki page watches
//! all of the external pages.

use anyhow::{Context, Result, bail};
use serde::Serialize;
use similar::TextDiff;
use tracing::{info, warn};

use crate::client::WikiWriteApi;
use crate::probe::UrlProbe;
use crate::wikitable::{Row, WikiTable};

pub const URL_FIELD: &str = "url";
pub const ETAG_FIELD: &str = "etag";
pub const LAST_MODIFIED_FIELD: &str = "last-modified";

#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub page: String,
    pub summary: String,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeFailure {
    pub url: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchReport {
    pub page: String,
    pub rows: usize,
    pub probed: usize,
    pub failures: Vec<ProbeFailure>,
    pub changed: bool,
    pub written: bool,
    pub dry_run: bool,
    pub diff: Option<String>,
    pub request_count: usize,
}

/// Probe every row's URL and return the refreshed rows. A row whose probe
/// fails keeps its previous values.
pub fn refresh_rows<P: UrlProbe>(table: &WikiTable, probe: &mut P) -> (Vec<Row>, Vec<ProbeFailure>) {
    let mut rows = table.rows().to_vec();
    let mut failures = Vec::new();

    for row in &mut rows {
        let Some(url) = row
            .get(URL_FIELD)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
        else {
            continue;
        };

        match probe.probe(&url) {
            Ok(print) => {
                row.insert(ETAG_FIELD.to_string(), print.etag);
                row.insert(LAST_MODIFIED_FIELD.to_string(), print.last_modified);
                fill_skipped_cells(row, table.fields());
            }
            Err(error) => {
                warn!(%url, error = %format!("{error:#}"), "probe failed; keeping previous values");
                failures.push(ProbeFailure {
                    url,
                    error: format!("{error:#}"),
                });
            }
        }
    }

    (rows, failures)
}

/// Give every column before the row's last cell a value, so new cells land
/// under their own header when encoded.
fn fill_skipped_cells(row: &mut Row, fields: &[String]) {
    let Some(last) = fields.iter().rposition(|field| row.contains_key(field)) else {
        return;
    };
    for field in &fields[..last] {
        row.entry(field.clone()).or_default();
    }
}

pub fn run_watch<A: WikiWriteApi, P: UrlProbe>(
    api: &mut A,
    probe: &mut P,
    options: &WatchOptions,
    credentials: Option<(&str, &str)>,
) -> Result<WatchReport> {
    let page = api
        .get_page(&options.page)?
        .ok_or_else(|| anyhow::anyhow!("watchlist page does not exist: {}", options.page))?;
    let table = WikiTable::decode(&page.content)
        .with_context(|| format!("failed to read the table on {}", options.page))?;
    if !table.has_field(URL_FIELD) {
        bail!("table on {} has no `URL` column", options.page);
    }

    let (rows, failures) = refresh_rows(&table, probe);
    let probed = rows
        .iter()
        .filter(|row| row.get(URL_FIELD).is_some_and(|url| !url.trim().is_empty()))
        .count()
        - failures.len();
    let refreshed = table
        .with_rows(rows)
        .with_context(|| format!("refreshed rows do not fit the table on {}", options.page))?;

    let before = table.encode();
    let after = refreshed.encode();
    let mut report = WatchReport {
        page: options.page.clone(),
        rows: table.rows().len(),
        probed,
        failures,
        changed: before != after,
        written: false,
        dry_run: options.dry_run,
        diff: None,
        request_count: 0,
    };

    if !report.changed {
        info!(page = %options.page, "no watched page changed");
        report.request_count = api.request_count();
        return Ok(report);
    }

    report.diff = Some(
        TextDiff::from_lines(&before, &after)
            .unified_diff()
            .context_radius(2)
            .header(&options.page, "refreshed")
            .to_string(),
    );

    if options.dry_run {
        info!(page = %options.page, "changes detected (dry run, not writing)");
        report.request_count = api.request_count();
        return Ok(report);
    }

    if let Some((username, password)) = credentials {
        api.login(username, password)?;
    }
    api.edit_page(&options.page, &after, &options.summary)
        .with_context(|| format!("failed to write {}", options.page))?;
    info!(page = %options.page, "watchlist updated");
    report.written = true;
    report.request_count = api.request_count();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use anyhow::{Result, bail};

    use super::{WatchOptions, refresh_rows, run_watch};
    use crate::client::mock::MockWiki;
    use crate::probe::{Fingerprint, UrlProbe};
    use crate::wikitable::WikiTable;

    const PAGE: &str = "Secretaribot/Watchlist";

    const WATCHLIST: &str = "{| class=\"wikitable\"
|-
! URL
! Etag
! Last Modified
|-
| http://example.org/a
| foo
| bar
|-
| http://example.org/b
| \"abc\"
| Unknown
|}";

    #[derive(Default)]
    struct FakeProbe {
        prints: BTreeMap<String, Fingerprint>,
        calls: Vec<String>,
    }

    impl FakeProbe {
        fn with(mut self, url: &str, etag: &str, last_modified: &str) -> Self {
            self.prints.insert(
                url.to_string(),
                Fingerprint {
                    etag: etag.to_string(),
                    last_modified: last_modified.to_string(),
                },
            );
            self
        }
    }

    impl UrlProbe for FakeProbe {
        fn probe(&mut self, url: &str) -> Result<Fingerprint> {
            self.calls.push(url.to_string());
            match self.prints.get(url) {
                Some(print) => Ok(print.clone()),
                None => bail!("connection refused"),
            }
        }
    }

    fn options(dry_run: bool) -> WatchOptions {
        WatchOptions {
            page: PAGE.to_string(),
            summary: "www_watch spotted a page change".to_string(),
            dry_run,
        }
    }

    fn unchanged_probe() -> FakeProbe {
        FakeProbe::default()
            .with("http://example.org/a", "foo", "bar")
            .with("http://example.org/b", "\"abc\"", "Unknown")
    }

    #[test]
    fn unchanged_pages_cause_no_write() {
        let mut wiki = MockWiki::default().with_page(PAGE, WATCHLIST);
        let mut probe = unchanged_probe();

        let report = run_watch(&mut wiki, &mut probe, &options(false), None).expect("watch");
        assert!(!report.changed);
        assert!(!report.written);
        assert_eq!(report.probed, 2);
        assert!(wiki.edits.is_empty());
    }

    #[test]
    fn changed_etag_is_written_back_once() {
        let mut wiki = MockWiki::default().with_page(PAGE, WATCHLIST);
        let mut probe = unchanged_probe().with(
            "http://example.org/a",
            "new-etag",
            "Wed, 01 Jan 2026 00:00:00 GMT",
        );

        let report =
            run_watch(&mut wiki, &mut probe, &options(false), Some(("Bot", "secret"))).expect("watch");
        assert!(report.changed);
        assert!(report.written);
        assert!(wiki.logged_in);
        assert_eq!(wiki.edits.len(), 1);

        let (title, content, summary) = &wiki.edits[0];
        assert_eq!(title, PAGE);
        assert_eq!(summary, "www_watch spotted a page change");
        let expected = WATCHLIST
            .replace("| foo", "| new-etag")
            .replace("| bar", "| Wed, 01 Jan 2026 00:00:00 GMT");
        assert_eq!(content, &expected);
    }

    #[test]
    fn dry_run_reports_diff_without_writing() {
        let mut wiki = MockWiki::default().with_page(PAGE, WATCHLIST);
        let mut probe = unchanged_probe().with("http://example.org/b", "\"abd\"", "Unknown");

        let report = run_watch(&mut wiki, &mut probe, &options(true), None).expect("watch");
        assert!(report.changed);
        assert!(!report.written);
        let diff = report.diff.expect("diff");
        assert!(diff.contains("-| \"abc\""));
        assert!(diff.contains("+| \"abd\""));
        assert!(wiki.edits.is_empty());
    }

    #[test]
    fn failed_probes_keep_previous_values() {
        let table = WikiTable::decode(WATCHLIST).expect("decode");
        let mut probe = FakeProbe::default().with("http://example.org/b", "\"abc\"", "Unknown");

        let (rows, failures) = refresh_rows(&table, &mut probe);
        assert_eq!(rows, table.rows());
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].url, "http://example.org/a");
        assert!(failures[0].error.contains("connection refused"));
    }

    #[test]
    fn rows_without_url_are_not_probed() {
        let markup = "{|\n|-\n! URL\n! Etag\n! Last Modified\n|-\n| \n| x\n| y\n|}";
        let table = WikiTable::decode(markup).expect("decode");
        let mut probe = FakeProbe::default();

        let (rows, failures) = refresh_rows(&table, &mut probe);
        assert!(probe.calls.is_empty());
        assert!(failures.is_empty());
        assert_eq!(rows, table.rows());
    }

    #[test]
    fn short_rows_get_blank_cells_before_new_values() {
        let markup = "{|\n|-\n! URL\n! Notes\n! Etag\n! Last Modified\n|-\n| http://example.org/a\n|}";
        let mut wiki = MockWiki::default().with_page(PAGE, markup);
        let mut probe = FakeProbe::default().with("http://example.org/a", "e1", "m1");

        let report = run_watch(&mut wiki, &mut probe, &options(false), None).expect("watch");
        assert!(report.written);
        let (_, content, _) = &wiki.edits[0];
        assert_eq!(
            content,
            "{|\n|-\n! URL\n! Notes\n! Etag\n! Last Modified\n|-\n| http://example.org/a\n| \n| e1\n| m1\n|}"
        );
        let reread = WikiTable::decode(content).expect("decode");
        assert_eq!(reread.rows()[0].get("etag").map(String::as_str), Some("e1"));
    }

    #[test]
    fn malformed_page_aborts_without_write() {
        let broken = "{|\n|-\n! URL\n|-\n| http://example.org/a\n| extra\n|}";
        let mut wiki = MockWiki::default().with_page(PAGE, broken);
        let mut probe = FakeProbe::default();

        let error = run_watch(&mut wiki, &mut probe, &options(false), None).expect_err("malformed");
        assert!(format!("{error:#}").contains("more cells"));
        assert!(wiki.edits.is_empty());
        assert!(probe.calls.is_empty());
    }

    #[test]
    fn table_without_etag_column_is_a_schema_error() {
        let markup = "{|\n|-\n! URL\n|-\n| http://example.org/a\n|}";
        let mut wiki = MockWiki::default().with_page(PAGE, markup);
        let mut probe = FakeProbe::default().with("http://example.org/a", "e", "m");

        let error = run_watch(&mut wiki, &mut probe, &options(false), None).expect_err("schema");
        assert!(format!("{error:#}").contains("`etag` is not a column"));
        assert!(wiki.edits.is_empty());
    }

    #[test]
    fn missing_page_is_an_error() {
        let mut wiki = MockWiki::default();
        let mut probe = FakeProbe::default();
        let error = run_watch(&mut wiki, &mut probe, &options(false), None).expect_err("missing");
        assert!(error.to_string().contains("does not exist"));
    }
}
