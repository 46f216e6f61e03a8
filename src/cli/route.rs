//! CLI route: one dispatch table from parsed commands to library calls.

use crate::assembler::ExamSpec;
use crate::cli::parse::{ArtifactCommands, Commands, QuotaCommands};
use crate::config::ExamgenConfig;
use crate::error::{ApiError, GenerationError};
use crate::orchestrator::{JobOutcome, JobRequest};
use crate::runtime::Runtime;
use crate::types::{ArtifactId, UserId};
use crate::upload::{SourceDocument, UploadTracker};
use comfy_table::presets::UTF8_FULL;
use comfy_table::Table;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shared state for one CLI invocation
pub struct RunContext {
    runtime: Runtime,
}

impl RunContext {
    pub fn new(config: ExamgenConfig) -> Result<Self, ApiError> {
        Ok(Self {
            runtime: Runtime::open(config)?,
        })
    }

    pub fn from_runtime(runtime: Runtime) -> Self {
        Self { runtime }
    }

    pub async fn execute(&self, command: &Commands) -> Result<String, ApiError> {
        let output = match command {
            Commands::Generate {
                user,
                name,
                title,
                items,
                instructions,
                style_sample,
                output,
                files,
            } => {
                let style_sample = match style_sample {
                    Some(path) => Some(read_text(path)?),
                    None => None,
                };
                let spec = ExamSpec {
                    title: title.clone().unwrap_or_else(|| name.clone()),
                    total_items: *items,
                    custom_instructions: instructions.clone(),
                    style_sample,
                };
                self.generate(UserId::new(user.as_str()), name, spec, files, output.as_deref())
                    .await?
            }
            Commands::Artifacts { command } => self.artifacts(command)?,
            Commands::Quota { command } => self.quota(command)?,
            Commands::Config => self.runtime.config().to_toml()?,
        };
        self.runtime.flush()?;
        Ok(output)
    }

    async fn generate(
        &self,
        user_id: UserId,
        name: &str,
        spec: ExamSpec,
        files: &[PathBuf],
        output: Option<&Path>,
    ) -> Result<String, ApiError> {
        let documents = files
            .iter()
            .map(|path| {
                let content = std::fs::read(path).map_err(|e| {
                    ApiError::InvalidInput(format!("Cannot read {}: {}", path.display(), e))
                })?;
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                Ok(SourceDocument::new(file_name, content))
            })
            .collect::<Result<Vec<_>, ApiError>>()?;

        let tracker = self.runtime.upload_tracker();
        let submitted = tracker.submit(documents).await;
        for rejected in &submitted.rejected {
            warn!(name = %rejected.name, reason = %rejected.reason, "Document not accepted");
        }
        let upload_report = render_uploads(&tracker);

        let cancel = CancellationToken::new();
        let watcher = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                watcher.cancel();
            }
        });

        let job = JobRequest {
            user_id,
            name: name.to_string(),
            document_refs: tracker.ready_documents(),
            spec,
        };
        let result = self.runtime.orchestrator().run(job, cancel).await;

        // The uploads only serve this one job; drop the remote copies either way.
        let removed = tracker.remove_uploaded().await;
        debug!(removed, "Uploaded documents removed from the service");

        let (content, summary) = match result {
            Ok(outcome) => (outcome.content.clone(), render_outcome(&outcome)),
            Err(err) => self.recover(err)?,
        };

        if let Some(path) = output {
            std::fs::write(path, &content).map_err(|e| {
                ApiError::InvalidInput(format!("Cannot write {}: {}", path.display(), e))
            })?;
            info!(path = %path.display(), "Exam written");
        }
        Ok(format!("{}\n{}\n\n{}", upload_report, summary, content))
    }

    /// A save failure still has the exam; try the save once more before giving up.
    fn recover(&self, err: GenerationError) -> Result<(String, String), ApiError> {
        let Some(pending) = err.pending_artifact().cloned() else {
            return Err(err.into());
        };
        match self.runtime.orchestrator().retry_save(&pending) {
            Ok(id) => Ok((pending.content, format!("Saved as {} after retry", id))),
            Err(retry_err) => {
                warn!(error = %retry_err, "Exam generated but not saved");
                Ok((
                    pending.content,
                    format!("Exam generated but NOT saved: {}", retry_err),
                ))
            }
        }
    }

    fn artifacts(&self, command: &ArtifactCommands) -> Result<String, ApiError> {
        let store = self.runtime.artifacts();
        match command {
            ArtifactCommands::List { user, format } => {
                let summaries = store.list_by_user(&UserId::new(user.as_str()))?;
                if format == "json" {
                    return serde_json::to_string_pretty(&summaries)
                        .map_err(|e| ApiError::InvalidInput(e.to_string()));
                }
                if summaries.is_empty() {
                    return Ok(format!("No artifacts for {}", user));
                }
                let mut table = Table::new();
                table.load_preset(UTF8_FULL);
                table.set_header(vec!["ID", "Name", "Created"]);
                for summary in &summaries {
                    table.add_row(vec![
                        summary.id.to_string(),
                        summary.name.clone(),
                        summary.created_at.format("%Y-%m-%d %H:%M").to_string(),
                    ]);
                }
                Ok(table.to_string())
            }
            ArtifactCommands::Show { user, id } => {
                let artifact = store.get(&parse_artifact_id(id)?, &UserId::new(user.as_str()))?;
                Ok(artifact.content)
            }
            ArtifactCommands::Delete { user, id } => {
                store.delete(&parse_artifact_id(id)?, &UserId::new(user.as_str()))?;
                Ok(format!("Deleted {}", id))
            }
        }
    }

    fn quota(&self, command: &QuotaCommands) -> Result<String, ApiError> {
        let quota = self.runtime.quota();
        match command {
            QuotaCommands::Show { user } => {
                let remaining = quota.check_available(&UserId::new(user.as_str()))?;
                Ok(format!("{}: {} credits remaining", user, remaining))
            }
            QuotaCommands::Grant { user, credits } => {
                let credits = credits.unwrap_or(self.runtime.config().quota.default_grant);
                let remaining = quota.grant(&UserId::new(user.as_str()), credits)?;
                Ok(format!("{}: granted {}, {} remaining", user, credits, remaining))
            }
        }
    }
}

fn read_text(path: &Path) -> Result<String, ApiError> {
    std::fs::read_to_string(path)
        .map_err(|e| ApiError::InvalidInput(format!("Cannot read {}: {}", path.display(), e)))
}

fn parse_artifact_id(value: &str) -> Result<ArtifactId, ApiError> {
    ArtifactId::parse(value)
        .ok_or_else(|| ApiError::InvalidInput(format!("Not an artifact id: {}", value)))
}

fn render_uploads(tracker: &UploadTracker) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Item", "Document", "Size", "Status"]);
    for item in tracker.items() {
        let status = match item.status.last_error() {
            Some(reason) => format!("error: {}", reason),
            None => item.status.label().to_string(),
        };
        table.add_row(vec![
            item.id.to_string(),
            item.name.clone(),
            item.size_bytes.to_string(),
            status,
        ]);
    }
    table.to_string()
}

fn render_outcome(outcome: &JobOutcome) -> String {
    let b = &outcome.breakdown;
    let mut summary = format!(
        "Saved as {} ({} MC / {} TF / {} SA / {} essay, {} minutes, {:.1}s)",
        outcome.artifact_id,
        b.multiple_choice,
        b.true_false,
        b.short_answer,
        b.essay,
        outcome.time_budget_minutes,
        outcome.duration.as_secs_f64()
    );
    if !outcome.quota_consumed {
        summary.push_str("\nNote: no credit was deducted for this run");
    }
    summary
}
