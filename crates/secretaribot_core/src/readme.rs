//! make_readme
//!
//! Writes the README from an intro file plus the module docs of the bot's
//! own jobs, and publishes it to the bot's page on the wiki.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::info;
use walkdir::WalkDir;

use crate::client::WikiWriteApi;

#[derive(Debug, Clone)]
pub struct ReadmeOptions {
    pub intro_path: PathBuf,
    pub sources_dir: PathBuf,
    pub output_path: PathBuf,
    pub pandoc: PathBuf,
    pub page: String,
    pub summary: String,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceIntro {
    pub title: String,
    pub body: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadmeReport {
    pub page: String,
    pub output_path: String,
    pub sections: usize,
    pub markdown_bytes: usize,
    pub wikitext_bytes: usize,
    pub published: bool,
    pub dry_run: bool,
}

/// Leading `//!` block of a Rust source file. The first non-empty line is
/// the title.
pub fn extract_intro(source: &str) -> Option<SourceIntro> {
    let mut lines = Vec::new();
    for line in source.lines() {
        let trimmed = line.trim();
        if let Some(doc) = trimmed.strip_prefix("//!") {
            lines.push(doc.strip_prefix(' ').unwrap_or(doc).trim_end().to_string());
            continue;
        }
        if lines.is_empty() && (trimmed.is_empty() || trimmed.starts_with("#!")) {
            continue;
        }
        break;
    }

    let start = lines.iter().position(|line| !line.is_empty())?;
    let title = lines[start].clone();
    let mut body = lines.split_off(start + 1);
    while body.first().is_some_and(String::is_empty) {
        body.remove(0);
    }
    while body.last().is_some_and(String::is_empty) {
        body.pop();
    }
    Some(SourceIntro { title, body })
}

pub fn collect_sources(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut sources = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.with_context(|| format!("failed to walk {}", dir.display()))?;
        if entry.file_type().is_file()
            && entry.path().extension().and_then(|ext| ext.to_str()) == Some("rs")
        {
            sources.push(entry.into_path());
        }
    }
    sources.sort();
    Ok(sources)
}

pub fn assemble_readme(intro: &str, sections: &[SourceIntro]) -> String {
    let mut out = intro.to_string();
    for section in sections {
        out.push_str("\n### ");
        out.push_str(&section.title);
        out.push_str(" ###\n");
        out.push_str(&section.body.join("\n"));
    }
    out
}

pub fn convert_markdown(markdown: &str, pandoc: &Path) -> Result<String> {
    let mut child = Command::new(pandoc)
        .args(["-f", "markdown", "-t", "mediawiki"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to execute {}", pandoc.display()))?;
    {
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow::anyhow!("{} has no stdin", pandoc.display()))?;
        stdin
            .write_all(markdown.as_bytes())
            .with_context(|| format!("failed to write to {}", pandoc.display()))?;
    }
    let output = child
        .wait_with_output()
        .with_context(|| format!("failed to wait for {}", pandoc.display()))?;
    if !output.status.success() {
        bail!(
            "{} exited with {}: {}",
            pandoc.display(),
            output.status.code().unwrap_or(1),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    String::from_utf8(output.stdout).context("pandoc produced non UTF-8 output")
}

pub fn build_readme(intro_path: &Path, sources_dir: &Path) -> Result<(String, usize)> {
    let intro = fs::read_to_string(intro_path)
        .with_context(|| format!("failed to read {}", intro_path.display()))?;
    let mut sections = Vec::new();
    for path in collect_sources(sources_dir)? {
        let source = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if let Some(section) = extract_intro(&source) {
            sections.push(section);
        }
    }
    Ok((assemble_readme(&intro, &sections), sections.len()))
}

pub fn run_publish_readme<A: WikiWriteApi>(
    api: &mut A,
    options: &ReadmeOptions,
    credentials: Option<(&str, &str)>,
) -> Result<ReadmeReport> {
    let (markdown, sections) = build_readme(&options.intro_path, &options.sources_dir)?;
    if let Some(parent) = options.output_path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(&options.output_path, &markdown)
        .with_context(|| format!("failed to write {}", options.output_path.display()))?;
    info!(path = %options.output_path.display(), sections, "README written");

    let wikitext = convert_markdown(&markdown, &options.pandoc)?;
    let mut report = ReadmeReport {
        page: options.page.clone(),
        output_path: options.output_path.to_string_lossy().replace('\\', "/"),
        sections,
        markdown_bytes: markdown.len(),
        wikitext_bytes: wikitext.len(),
        published: false,
        dry_run: options.dry_run,
    };
    if options.dry_run {
        return Ok(report);
    }

    if let Some((username, password)) = credentials {
        api.login(username, password)?;
    }
    api.edit_page(&options.page, &wikitext, &options.summary)?;
    info!(page = %options.page, "README published");
    report.published = true;
    Ok(report)
}
