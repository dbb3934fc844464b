//! Output formatting for command reports

use crate::workspace::AttachOutcome;
use assetlink_core::{
    CleanupReport, CommentMap, MarkerOccurrence, PickAction, PickItem, ReconciliationResult,
    ScanResult, relative_slash,
};
use facet::Facet;
use owo_colors::OwoColorize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Whether a marker's target is in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerStatus {
    Valid,
    Broken,
    /// Points outside the store and is ignored
    Outside,
}

impl MarkerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MarkerStatus::Valid => "ok",
            MarkerStatus::Broken => "broken",
            MarkerStatus::Outside => "outside",
        }
    }
}

/// Status lookup keyed by marker position.
pub struct StatusIndex {
    valid: HashSet<(PathBuf, usize)>,
    broken: HashSet<(PathBuf, usize)>,
}

impl StatusIndex {
    pub fn new(result: &ReconciliationResult) -> Self {
        let key = |m: &MarkerOccurrence| (m.source_file.clone(), m.span.offset);
        Self {
            valid: result.valid.iter().map(key).collect(),
            broken: result.broken.iter().map(key).collect(),
        }
    }

    pub fn status(&self, marker: &MarkerOccurrence) -> MarkerStatus {
        let key = (marker.source_file.clone(), marker.span.offset);
        if self.valid.contains(&key) {
            MarkerStatus::Valid
        } else if self.broken.contains(&key) {
            MarkerStatus::Broken
        } else {
            MarkerStatus::Outside
        }
    }
}

#[derive(Facet)]
struct JsonMarker {
    file: String,
    line: usize,
    column: usize,
    raw_path: String,
    normalized_path: String,
    quoting: String,
    status: String,
}

#[derive(Facet)]
struct JsonScan {
    scanned: usize,
    widened: bool,
    cancelled: bool,
    markers: Vec<JsonMarker>,
}

#[derive(Facet)]
struct JsonCheck {
    clean: bool,
    valid: usize,
    broken: Vec<JsonMarker>,
    orphans: Vec<String>,
    excluded: usize,
}

#[derive(Facet)]
struct JsonPick {
    kind: String,
    label: String,
    detail: String,
}

#[derive(Facet)]
struct JsonFailure {
    target: String,
    reason: String,
}

#[derive(Facet)]
struct JsonClean {
    dry_run: bool,
    items: Vec<JsonPick>,
    succeeded: usize,
    attempted: usize,
    cancelled: bool,
    failures: Vec<JsonFailure>,
}

#[derive(Facet)]
struct JsonAttached {
    source: String,
    relative_path: String,
}

#[derive(Facet)]
struct JsonAttach {
    attached: Vec<JsonAttached>,
    inserted_into: Option<String>,
    lines: Vec<String>,
}

#[derive(Facet)]
struct JsonRule {
    extension: String,
    token: String,
}

#[derive(Facet)]
struct JsonRules {
    rules: Vec<String>,
    effective: Vec<JsonRule>,
}

/// Facts printed by `doctor`
#[derive(Debug, Clone, Facet)]
pub struct DoctorReport {
    pub workspace_root: String,
    pub config_path: String,
    pub config_found: bool,
    pub store_root: String,
    pub store_exists: bool,
    pub case_insensitive: bool,
    pub extensions: Vec<String>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub candidate_files: usize,
    pub widened: bool,
}

fn json_marker(root: &Path, marker: &MarkerOccurrence, status: MarkerStatus) -> JsonMarker {
    JsonMarker {
        file: relative_slash(root, &marker.source_file),
        line: marker.line + 1,
        column: marker.column + 1,
        raw_path: marker.raw_path.clone(),
        normalized_path: marker.normalized_path.clone(),
        quoting: marker.quoting.as_str().to_string(),
        status: status.as_str().to_string(),
    }
}

fn pick_kind(item: &PickItem) -> &'static str {
    match item.action {
        PickAction::Unlink(_) => "broken",
        PickAction::DeleteOrphan(_) => "orphan",
    }
}

/// Render the markers of a scan with their status.
pub fn render_scan(
    scan: &ScanResult,
    result: &ReconciliationResult,
    root: &Path,
    format: OutputFormat,
) -> String {
    let index = StatusIndex::new(result);
    match format {
        OutputFormat::Json => {
            let report = JsonScan {
                scanned: scan.scanned,
                widened: scan.widened,
                cancelled: scan.cancelled,
                markers: scan
                    .markers()
                    .map(|m| json_marker(root, m, index.status(m)))
                    .collect(),
            };
            facet_json::to_string_pretty(&report).unwrap_or_default()
        }
        OutputFormat::Text => {
            let mut output = String::new();
            for (file, markers) in &scan.files {
                output.push_str(&format!("{}\n", relative_slash(root, file).cyan().bold()));
                for m in markers {
                    let status = match index.status(m) {
                        MarkerStatus::Valid => "ok".green().to_string(),
                        MarkerStatus::Broken => "broken".red().bold().to_string(),
                        MarkerStatus::Outside => "outside".dimmed().to_string(),
                    };
                    output.push_str(&format!(
                        "  {:>5}:{:<3} {} {}\n",
                        m.line + 1,
                        m.column + 1,
                        m.raw_path,
                        status
                    ));
                }
            }
            output.push_str(&format!(
                "\n{} markers in {} files ({} scanned{})\n",
                scan.marker_count().to_string().bold(),
                scan.files.len(),
                scan.scanned,
                if scan.widened {
                    ", no file matched the rules so all files were scanned"
                } else {
                    ""
                }
            ));
            output
        }
    }
}

/// Render broken markers and orphans.
pub fn render_check(result: &ReconciliationResult, root: &Path, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => {
            let report = JsonCheck {
                clean: result.is_clean(),
                valid: result.valid.len(),
                broken: result
                    .broken
                    .iter()
                    .map(|m| json_marker(root, m, MarkerStatus::Broken))
                    .collect(),
                orphans: result
                    .orphans
                    .iter()
                    .map(|e| e.relative_path.clone())
                    .collect(),
                excluded: result.excluded,
            };
            facet_json::to_string_pretty(&report).unwrap_or_default()
        }
        OutputFormat::Text => {
            let mut output = String::new();

            if !result.broken.is_empty() {
                output.push_str(&format!(
                    "{} Broken links ({}):\n",
                    "!".red().bold(),
                    result.broken.len()
                ));
                for m in &result.broken {
                    output.push_str(&format!(
                        "  {} {}:{} {}\n",
                        "-".red(),
                        relative_slash(root, &m.source_file),
                        m.line + 1,
                        m.raw_path.yellow()
                    ));
                }
                output.push('\n');
            }

            if !result.orphans.is_empty() {
                output.push_str(&format!(
                    "{} Orphan assets ({}):\n",
                    "?".yellow().bold(),
                    result.orphans.len()
                ));
                for e in &result.orphans {
                    output.push_str(&format!("  {} {}\n", "-".yellow(), e.relative_path));
                }
                output.push('\n');
            }

            if result.is_clean() {
                output.push_str(&format!(
                    "{} {} links valid, nothing to clean\n",
                    "ok".green().bold(),
                    result.valid.len()
                ));
            } else {
                output.push_str(&format!(
                    "{} valid, {} broken, {} orphans\n",
                    result.valid.len().to_string().green(),
                    result.broken.len().to_string().red(),
                    result.orphans.len().to_string().yellow()
                ));
            }
            if result.excluded > 0 {
                output.push_str(&format!(
                    "{}\n",
                    format!("{} markers point outside the store and were ignored", result.excluded)
                        .dimmed()
                ));
            }
            output
        }
    }
}

/// Render the items `clean` selected, and the outcome when it ran.
pub fn render_clean(
    items: &[PickItem],
    report: Option<&CleanupReport>,
    format: OutputFormat,
) -> String {
    match format {
        OutputFormat::Json => {
            let default = CleanupReport::default();
            let r = report.unwrap_or(&default);
            let json = JsonClean {
                dry_run: report.is_none(),
                items: items
                    .iter()
                    .map(|i| JsonPick {
                        kind: pick_kind(i).to_string(),
                        label: i.label.clone(),
                        detail: i.detail.clone(),
                    })
                    .collect(),
                succeeded: r.succeeded,
                attempted: r.attempted,
                cancelled: r.cancelled,
                failures: r
                    .failures
                    .iter()
                    .map(|f| JsonFailure {
                        target: f.target.clone(),
                        reason: f.reason.clone(),
                    })
                    .collect(),
            };
            facet_json::to_string_pretty(&json).unwrap_or_default()
        }
        OutputFormat::Text => {
            let mut output = String::new();
            if items.is_empty() {
                output.push_str(&format!("{} Nothing to clean\n", "ok".green().bold()));
                return output;
            }
            for item in items {
                output.push_str(&format!("  {} {}\n", "-".red(), item.label));
                output.push_str(&format!("    {}\n", item.detail.dimmed()));
            }
            output.push('\n');

            match report {
                None => output.push_str(&format!(
                    "{} item(s) selected; dry run, nothing changed\n",
                    items.len()
                )),
                Some(r) => {
                    let count = format!("{}/{}", r.succeeded, r.attempted);
                    let count = if r.is_complete() {
                        count.green().to_string()
                    } else {
                        count.yellow().to_string()
                    };
                    output.push_str(&format!("Cleaned {count} item(s)"));
                    if r.cancelled {
                        output.push_str(&format!(
                            ", {} of {} not attempted (cancelled)",
                            r.selected.saturating_sub(r.attempted),
                            r.selected
                        ));
                    }
                    output.push('\n');
                    for f in &r.failures {
                        output.push_str(&format!(
                            "  {} {}: {}\n",
                            "!".red().bold(),
                            f.target,
                            f.reason.dimmed()
                        ));
                    }
                }
            }
            output
        }
    }
}

/// Render attached files and inserted markers.
pub fn render_attach(outcome: &AttachOutcome, root: &Path, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => {
            let json = JsonAttach {
                attached: outcome
                    .attached
                    .iter()
                    .map(|a| JsonAttached {
                        source: a.source.display().to_string(),
                        relative_path: a.relative_path.clone(),
                    })
                    .collect(),
                inserted_into: outcome
                    .inserted_into
                    .as_ref()
                    .map(|p| relative_slash(root, p)),
                lines: outcome.lines.clone(),
            };
            facet_json::to_string_pretty(&json).unwrap_or_default()
        }
        OutputFormat::Text => {
            let mut output = String::new();
            for a in &outcome.attached {
                output.push_str(&format!(
                    "{} {} {} {}\n",
                    "+".green().bold(),
                    a.source.display(),
                    "->".dimmed(),
                    a.relative_path.cyan()
                ));
            }
            match &outcome.inserted_into {
                Some(target) => {
                    output.push_str(&format!(
                        "\nInserted into {}:\n",
                        relative_slash(root, target).bold()
                    ));
                    for line in &outcome.lines {
                        output.push_str(&format!("  {line}\n"));
                    }
                }
                None => {
                    output.push_str("\nMarkers to paste:\n");
                    for a in &outcome.attached {
                        output.push_str(&format!("  @link@:{}\n", a.relative_path));
                    }
                }
            }
            output
        }
    }
}

/// Render configured rules and the effective extension map.
pub fn render_rules(rules: &[String], map: &CommentMap, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => {
            let json = JsonRules {
                rules: rules.to_vec(),
                effective: map
                    .entries()
                    .map(|(extension, token)| JsonRule {
                        extension: extension.to_string(),
                        token: token.to_string(),
                    })
                    .collect(),
            };
            facet_json::to_string_pretty(&json).unwrap_or_default()
        }
        OutputFormat::Text => {
            let mut output = String::new();
            if rules.is_empty() {
                output.push_str(&format!(
                    "No comment rules configured. Add some to the config, e.g. {}\n",
                    "\"rules\": [\"{ts,js}-{//}\"]".cyan()
                ));
                return output;
            }
            output.push_str(&format!("{}\n", "Rules".bold()));
            for rule in rules {
                output.push_str(&format!("  {rule}\n"));
            }
            output.push_str(&format!("\n{}\n", "Effective".bold()));
            for (ext, token) in map.entries() {
                output.push_str(&format!("  .{:<10} {}\n", ext, token.cyan()));
            }
            output
        }
    }
}

/// Render `doctor` facts.
pub fn render_doctor(report: &DoctorReport, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => facet_json::to_string_pretty(report).unwrap_or_default(),
        OutputFormat::Text => {
            let yes_no = |b: bool| {
                if b {
                    "yes".green().to_string()
                } else {
                    "no".yellow().to_string()
                }
            };
            let list = |items: &[String]| {
                if items.is_empty() {
                    "(none)".dimmed().to_string()
                } else {
                    items.join(", ")
                }
            };
            let mut output = String::new();
            output.push_str(&format!("workspace root   {}\n", report.workspace_root));
            output.push_str(&format!(
                "config           {} (found: {})\n",
                report.config_path,
                yes_no(report.config_found)
            ));
            output.push_str(&format!(
                "store root       {} (exists: {})\n",
                report.store_root,
                yes_no(report.store_exists)
            ));
            output.push_str(&format!(
                "case-insensitive {}\n",
                yes_no(report.case_insensitive)
            ));
            output.push_str(&format!("extensions       {}\n", list(&report.extensions)));
            output.push_str(&format!("include          {}\n", list(&report.include)));
            output.push_str(&format!("exclude          {}\n", list(&report.exclude)));
            output.push_str(&format!(
                "candidates       {}{}\n",
                report.candidate_files,
                if report.widened {
                    " (no file matched; all files)"
                } else {
                    ""
                }
            ));
            output
        }
    }
}
