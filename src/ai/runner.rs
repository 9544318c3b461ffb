//! Drives one AI stage to completion: sweep answered side files, then loop
//! request, execute, parse, apply, save until nothing is left to do.
//!
//! Every applied batch is saved before the next request goes out, so an
//! interrupted run resumes exactly where it stopped.

use crate::ai::batch::{AiOptions, RequestBuilder};
use crate::ai::engine::AiEngine;
use crate::ai::repair::{ParsedItem, parse_items};
use crate::ai::request::AiRequest;
use crate::error::{Result, SubgenError, TransportKind};
use crate::project::{CostRecord, MetadataTimeline, TimedItem, TimelineKey};
use crate::timing::{Interval, format_timecode};
use crate::worker::context::PipelineContext;
use regex::Regex;
use std::fs;
use std::path::PathBuf;

/// First line of a manual-engine side file; its presence means the human
/// has not pasted the response in yet.
const MANUAL_HEADER: &str =
    "# Send the prompt below to your chatbot, replace this file's content with its reply, then re-run.";

/// One AI stage, fully resolved: where results go, which engine to call,
/// and how to batch the reference timeline.
pub struct AiStage<'a> {
    pub key: TimelineKey,
    pub engine: AiEngine<'a>,
    pub options: &'a AiOptions,
    pub system_prompt: Option<String>,
    pub user_prompt: Option<String>,
}

impl AiStage<'_> {
    /// Run the stage against `reference` until every row is produced, then
    /// mark the target collection finished.
    pub fn run(&self, reference: &[TimedItem], ctx: &mut PipelineContext) -> Result<()> {
        let task_id = self.key.full_id();
        let builder = RequestBuilder::new(
            &task_id,
            reference,
            self.options,
            self.system_prompt.clone(),
            self.user_prompt.clone(),
        );

        self.sweep_side_files(&task_id, reference, ctx)?;

        let mut number = 1u32;
        loop {
            let produced = self.produced_items(ctx)?;
            let Some(request) = builder.next_request(&produced, number) else {
                break;
            };
            ctx.write_verbose_file(
                &format!("{}_{:04}_prompt.txt", task_id.replace('/', "_"), number),
                &request.full_prompt,
            )?;

            let response = match self.engine.execute(&request, &ctx.api_keys, &mut ctx.cooldowns) {
                Ok(response) => response,
                Err(SubgenError::Transport { kind, message }) => {
                    self.write_error_side_file(&request, &message, ctx)?;
                    return Err(SubgenError::Transport { kind, message });
                }
                Err(other) => return Err(other),
            };

            let Some(assistant_message) = response.assistant_message else {
                // Manual engine: park the prompt and wait for a human.
                let path = request.side_file_path(&ctx.base_path());
                fs::write(&path, format!("{MANUAL_HEADER}\n\n{}", request.full_prompt))?;
                let instruction = format!(
                    "answer '{}' with your chatbot, then run again",
                    path.display()
                );
                ctx.add_todo(&instruction);
                return Err(SubgenError::ExternalInputRequired { instruction });
            };

            ctx.write_verbose_file(
                &format!("{}_{:04}_response.txt", task_id.replace('/', "_"), number),
                &assistant_message,
            )?;

            let before = builder.remaining(&produced);
            let mut cost = response.cost;
            let items = match parse_items(&assistant_message) {
                Ok(items) => items,
                Err(SubgenError::ResponseParse { message, repaired }) => {
                    // The tokens were spent even though the answer is junk;
                    // the request stays on the books with zero items.
                    self.record_cost(cost.take(), 0, ctx);
                    ctx.project.save()?;
                    self.write_parse_error_side_file(&request, &message, &repaired, ctx)?;
                    return Err(SubgenError::ResponseParse { message, repaired });
                }
                Err(other) => return Err(other),
            };
            let item_count = items.len();
            self.apply_items(items, reference, ctx)?;

            self.record_cost(cost.take(), item_count, ctx);
            ctx.project.save()?;

            let resolved = before - builder.remaining(&self.produced_items(ctx)?);
            if resolved < self.options.min_items_to_continue {
                return Err(SubgenError::Transport {
                    kind: TransportKind::Other,
                    message: format!(
                        "request #{number} resolved {resolved} item(s), fewer than the \
                         configured minimum of {}; giving up on '{task_id}' for now",
                        self.options.min_items_to_continue
                    ),
                });
            }
            number += 1;
        }

        if let Some(timeline) = ctx.project.timeline_mut(&self.key) {
            timeline.mark_finished();
        }
        ctx.project.save()?;
        self.clean_error_side_files(&task_id, ctx)?;
        Ok(())
    }

    fn produced_items(&self, ctx: &PipelineContext) -> Result<Vec<TimedItem>> {
        ctx.project
            .timeline(&self.key)
            .map(|t| t.items().to_vec())
            .ok_or_else(|| {
                SubgenError::InvariantViolation(format!(
                    "target collection '{}' disappeared mid-run",
                    self.key.full_id()
                ))
            })
    }

    /// Pick up side files a human answered since the last run. An untouched
    /// prompt file becomes a to-do again; a broken answer becomes an error
    /// note inside the file.
    fn sweep_side_files(
        &self,
        task_id: &str,
        reference: &[TimedItem],
        ctx: &mut PipelineContext,
    ) -> Result<()> {
        for path in self.side_files(task_id, ctx, false)? {
            let contents = fs::read_to_string(&path)?;
            if contents.contains(MANUAL_HEADER) {
                let instruction = format!(
                    "answer '{}' with your chatbot, then run again",
                    path.display()
                );
                ctx.add_todo(&instruction);
                return Err(SubgenError::ExternalInputRequired { instruction });
            }
            // Strip error annotations from a previous failed sweep.
            let answer: String = contents
                .lines()
                .filter(|line| !line.starts_with("# "))
                .collect::<Vec<_>>()
                .join("\n");
            match parse_items(&answer) {
                Ok(items) => {
                    self.apply_items(items, reference, ctx)?;
                    ctx.project.save()?;
                    ctx.soft_delete(&path)?;
                }
                Err(SubgenError::ResponseParse { message, .. }) => {
                    let note = message.replace('[', "(").replace(']', ")");
                    fs::write(&path, format!("# {note}\n{answer}"))?;
                    ctx.add_todo(&format!(
                        "fix the error noted at the top of '{}', then run again",
                        path.display()
                    ));
                    return Err(SubgenError::ResponseParse {
                        message: format!("in '{}': {message}", path.display()),
                        repaired: String::new(),
                    });
                }
                Err(other) => return Err(other),
            }
        }
        Ok(())
    }

    /// Fold parsed items into the target collection. An item whose start
    /// matches an existing one updates it in place.
    fn apply_items(
        &self,
        items: Vec<ParsedItem>,
        reference: &[TimedItem],
        ctx: &mut PipelineContext,
    ) -> Result<()> {
        // Resolve intervals first so a bad item rejects the whole batch
        // before anything is written.
        let mut resolved = Vec::with_capacity(items.len());
        for parsed in items {
            let end = match parsed.end {
                Some(end) => end,
                None => reference
                    .iter()
                    .find(|r| r.interval.start == parsed.start)
                    .map(|r| r.interval.end)
                    .ok_or_else(|| SubgenError::ResponseParse {
                        message: format!(
                            "item at {} has no EndTime and matches no known row",
                            format_timecode(parsed.start)
                        ),
                        repaired: String::new(),
                    })?,
            };
            let interval = Interval::new(parsed.start, end).map_err(|e| {
                SubgenError::ResponseParse {
                    message: e.to_string(),
                    repaired: String::new(),
                }
            })?;
            resolved.push((interval, parsed.metadata));
        }

        let timeline = ctx.project.timeline_mut(&self.key).ok_or_else(|| {
            SubgenError::InvariantViolation(format!(
                "target collection '{}' disappeared mid-run",
                self.key.full_id()
            ))
        })?;
        for (interval, metadata) in resolved {
            match timeline
                .items_mut()
                .iter_mut()
                .find(|i| i.interval.start == interval.start)
            {
                Some(existing) => existing.metadata.merge(&metadata, None),
                None => timeline.add_item(interval, metadata),
            }
        }
        Ok(())
    }

    fn record_cost(
        &self,
        cost: Option<CostRecord>,
        item_count: usize,
        ctx: &mut PipelineContext,
    ) {
        if let Some(mut cost) = cost
            && let Some(timeline) = ctx.project.timeline_mut(&self.key)
        {
            cost.items_in_response = item_count;
            timeline.costs_mut().push(cost);
        }
    }

    fn write_error_side_file(
        &self,
        request: &AiRequest,
        message: &str,
        ctx: &mut PipelineContext,
    ) -> Result<()> {
        let path = request.side_file_path(&ctx.base_path());
        let name = format!(
            "E_{}",
            path.file_name().unwrap_or_default().to_string_lossy()
        );
        let path = path.with_file_name(name);
        fs::write(
            &path,
            format!("# {message}\n\n{}", request.full_prompt),
        )?;
        ctx.add_todo(&format!(
            "engine failed for '{}'; prompt kept in '{}'",
            request.task_id,
            path.display()
        ));
        Ok(())
    }

    fn write_parse_error_side_file(
        &self,
        request: &AiRequest,
        message: &str,
        repaired: &str,
        ctx: &mut PipelineContext,
    ) -> Result<()> {
        let path = request.side_file_path(&ctx.base_path());
        let note = message.replace('[', "(").replace(']', ")");
        fs::write(&path, format!("# {note}\n{repaired}"))?;
        ctx.add_todo(&format!(
            "fix the response in '{}', then run again",
            path.display()
        ));
        Ok(())
    }

    /// Stale transport-error dumps are moved to backup once the stage is
    /// actually done.
    fn clean_error_side_files(&self, task_id: &str, ctx: &PipelineContext) -> Result<()> {
        for path in self.side_files(task_id, ctx, true)? {
            ctx.soft_delete(&path)?;
        }
        Ok(())
    }

    /// Side files for this stage in the project's directory, sorted by name
    /// so batches are applied in the order they were issued.
    fn side_files(
        &self,
        task_id: &str,
        ctx: &PipelineContext,
        errors: bool,
    ) -> Result<Vec<PathBuf>> {
        let base = ctx.base_path();
        let dir = base.parent().unwrap_or_else(|| std::path::Path::new("."));
        let stem = base.file_name().unwrap_or_default().to_string_lossy();
        let prefix = if errors { "E_" } else { "" };
        let pattern = format!(
            "^{}\\.{}TODO_{}_\\d{{4}}\\.txt$",
            regex::escape(&stem),
            prefix,
            regex::escape(&task_id.replace('/', "_"))
        );
        let matcher = Regex::new(&pattern)
            .map_err(|e| SubgenError::InvariantViolation(format!("side file pattern: {e}")))?;

        let mut files = Vec::new();
        if dir.is_dir() {
            for entry in fs::read_dir(dir)? {
                let entry = entry?;
                let name = entry.file_name();
                if matcher.is_match(&name.to_string_lossy()) {
                    files.push(entry.path());
                }
            }
        }
        files.sort();
        Ok(files)
    }
}
