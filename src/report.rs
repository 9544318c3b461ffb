//! Terminal rendering for pipeline runs.
//! Per-stage progress lines while working, then the end-of-run report:
//! errors, the to-do list, and the cost summary.

use crate::project::{CostSummary, Project};
use std::time::Duration;

const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

pub fn file_header(label: &str) {
    eprintln!("\n=== {label} ===");
}

pub fn stage_done(id: &str) {
    eprintln!("{GREEN}  done{RESET}      {id}");
}

pub fn stage_already_done(id: &str) {
    eprintln!("{DIM}  done      {id} (previous run){RESET}");
}

pub fn stage_not_ready(id: &str, reason: &str) {
    eprintln!("{YELLOW}  not ready{RESET} {id}");
    for line in reason.lines() {
        eprintln!("{DIM}            {line}{RESET}");
    }
}

pub fn stage_waiting(id: &str) {
    eprintln!("{YELLOW}  waiting{RESET}   {id} (see to-do list)");
}

pub fn stage_rerun(id: &str, reason: &str) {
    eprintln!("{DIM}  re-run    {id}: {reason}{RESET}");
}

pub fn stage_failed(id: &str, message: &str) {
    eprintln!("{RED}  failed{RESET}    {id}: {message}");
}

/// Overwrites the current line while a blocking engine call is pending.
pub fn heartbeat(engine: &str, elapsed: Duration) {
    eprint!(
        "\r\x1b[2K{DIM}  waiting for {engine}... {}s{RESET}",
        elapsed.as_secs()
    );
}

pub fn clear_line() {
    eprint!("\r\x1b[2K");
}

/// End-of-run summary across all processed files.
pub fn run_report(errors: &[String], todos: &[String], projects: &[&Project]) {
    if !errors.is_empty() {
        eprintln!("\n{RED}Errors:{RESET}");
        for error in errors {
            eprintln!("  {error}");
        }
    }
    if !todos.is_empty() {
        eprintln!("\n{YELLOW}To do:{RESET}");
        for todo in todos {
            eprintln!("  {todo}");
        }
    }
    cost_report(projects);
}

/// Per-stage cost table, skipping stages that never talked to an engine.
fn cost_report(projects: &[&Project]) {
    let mut rows: Vec<(String, CostSummary)> = Vec::new();
    for project in projects {
        for t in &project.transcriptions {
            if !t.costs.is_empty() {
                rows.push((
                    format!("{}: {}", project.label(), t.id),
                    CostSummary::sum(&t.costs),
                ));
            }
        }
        for tr in &project.translations {
            if !tr.costs.is_empty() {
                rows.push((
                    format!(
                        "{}: {}/{}",
                        project.label(),
                        tr.transcription_id,
                        tr.translation_id
                    ),
                    CostSummary::sum(&tr.costs),
                ));
            }
        }
    }
    if rows.is_empty() {
        return;
    }
    eprintln!("\n{DIM}Costs:{RESET}");
    for (label, total) in rows {
        eprintln!(
            "  {label}: {} request(s), {}s, {} item(s), {} prompt + {} completion tokens",
            total.requests,
            total.elapsed.as_secs(),
            total.items_in_response,
            total.prompt_tokens,
            total.completion_tokens
        );
    }
}
