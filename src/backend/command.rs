//! Collaborators served by an external program.
//!
//! Each call spawns the program once, writes a JSON request to stdin and
//! reads one JSON response from stdout:
//!
//! ```text
//! request:  {"operation": "draft", "payload": {...}}
//! response: {"ok": <result>}
//!       or: {"error": {"kind": "timeout" | "rate_limited" | "malformed",
//!                      "retry_after_ms": 1500, "message": "..."}}
//! ```
//!
//! Output that is not a valid envelope, or a non-zero exit without one, is
//! treated as malformed output. Timeouts are enforced by the pipeline; the
//! child is killed when the call is dropped.

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::collaborators::{
    DraftRequest, Generator, MetricsProvider, Outliner, Planner, ReviewContext, Reviewer,
    StoryPlan, Summarizer,
};
use crate::errors::{CallKind, CollaboratorError};
use crate::metrics::{AdvisoryMetrics, TextMetrics};
use crate::story::{
    CharacterRoster, Feedback, Outline, StoryBrief, UnitOutline, WorldContext,
};

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    ok: Option<Value>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    kind: String,
    #[serde(default)]
    retry_after_ms: Option<u64>,
    #[serde(default)]
    elapsed_ms: Option<u64>,
    #[serde(default)]
    message: Option<String>,
}

impl ErrorBody {
    fn into_error(self, call: CallKind) -> CollaboratorError {
        match self.kind.as_str() {
            "timeout" => CollaboratorError::Timeout {
                call,
                after: Duration::from_millis(self.elapsed_ms.unwrap_or(0)),
            },
            "rate_limited" => CollaboratorError::RateLimited {
                call,
                retry_after: self.retry_after_ms.map(Duration::from_millis),
            },
            _ => CollaboratorError::malformed(
                call,
                self.message
                    .unwrap_or_else(|| format!("backend reported '{}'", self.kind)),
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandBackend {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandBackend {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    async fn invoke<T: DeserializeOwned>(
        &self,
        call: CallKind,
        payload: Value,
    ) -> Result<T, CollaboratorError> {
        let request = json!({ "operation": call, "payload": payload }).to_string();
        debug!(operation = %call, program = %self.program, "Invoking backend");

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        let mut child = cmd.spawn().map_err(|e| {
            CollaboratorError::malformed(call, format!("failed to spawn {}: {}", self.program, e))
        })?;

        // Feed stdin while draining stdout/stderr so neither side blocks on a
        // full pipe. Dropping stdin afterwards closes it.
        let stdin = child.stdin.take();
        let write = async move {
            if let Some(mut stdin) = stdin {
                // A backend that exits without reading stdin is judged by its output.
                if let Err(e) = stdin.write_all(request.as_bytes()).await {
                    debug!(error = %e, "Backend closed stdin early");
                }
            }
        };
        let ((), output) = tokio::join!(write, child.wait_with_output());

        let output = output.map_err(|e| {
            CollaboratorError::malformed(call, format!("failed to wait for backend: {}", e))
        })?;
        parse_response(call, &output)
    }
}

fn parse_response<T: DeserializeOwned>(
    call: CallKind,
    output: &std::process::Output,
) -> Result<T, CollaboratorError> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    let envelope = match serde_json::from_str::<Envelope>(stdout.trim()) {
        Ok(envelope) => envelope,
        Err(e) => {
            let detail = if output.status.success() {
                format!("invalid response envelope: {}", e)
            } else {
                format!(
                    "backend exited with {}: {}",
                    output.status,
                    stderr.trim().lines().last().unwrap_or("")
                )
            };
            return Err(CollaboratorError::malformed(call, detail));
        }
    };

    match envelope {
        Envelope {
            error: Some(error), ..
        } => Err(error.into_error(call)),
        Envelope { ok: Some(value), .. } => serde_json::from_value(value)
            .map_err(|e| CollaboratorError::malformed(call, format!("unexpected result shape: {}", e))),
        Envelope { .. } => Err(CollaboratorError::malformed(
            call,
            "response has neither 'ok' nor 'error'",
        )),
    }
}

#[async_trait]
impl Planner for CommandBackend {
    async fn brief(&self, prompt: &str) -> Result<StoryBrief, CollaboratorError> {
        self.invoke(CallKind::Brief, json!({ "prompt": prompt })).await
    }

    async fn roster(
        &self,
        prompt: &str,
        brief: &StoryBrief,
    ) -> Result<CharacterRoster, CollaboratorError> {
        self.invoke(CallKind::Roster, json!({ "prompt": prompt, "brief": brief }))
            .await
    }

    async fn world(
        &self,
        prompt: &str,
        brief: &StoryBrief,
        roster: &CharacterRoster,
    ) -> Result<WorldContext, CollaboratorError> {
        self.invoke(
            CallKind::World,
            json!({ "prompt": prompt, "brief": brief, "roster": roster }),
        )
        .await
    }
}

#[async_trait]
impl Outliner for CommandBackend {
    async fn outline(&self, plan: &StoryPlan) -> Result<Outline, CollaboratorError> {
        self.invoke(CallKind::Outline, json!({ "plan": plan })).await
    }
}

#[async_trait]
impl Generator for CommandBackend {
    async fn draft(&self, request: &DraftRequest<'_>) -> Result<String, CollaboratorError> {
        let payload = json!({
            "unit": request.unit,
            "prior_summary": request.prior_summary,
            "revision": request.revision,
            "plan": request.plan,
        });
        self.invoke(CallKind::Draft, payload).await
    }
}

#[async_trait]
impl Reviewer for CommandBackend {
    async fn review(
        &self,
        draft: &str,
        metrics: Option<&AdvisoryMetrics>,
        context: &ReviewContext<'_>,
    ) -> Result<Feedback, CollaboratorError> {
        let payload = json!({
            "draft": draft,
            "metrics": metrics,
            "metric_flags": metrics.map(AdvisoryMetrics::summary_lines).unwrap_or_default(),
            "unit": context.unit,
            "plan": context.plan,
            "revision_count": context.revision_count,
            "quality_threshold": context.quality_threshold,
        });
        self.invoke(CallKind::Review, payload).await
    }
}

#[async_trait]
impl Summarizer for CommandBackend {
    async fn summarize(
        &self,
        old_summary: &str,
        unit_text: &str,
        budget: usize,
    ) -> Result<String, CollaboratorError> {
        let payload = json!({
            "old_summary": old_summary,
            "unit_text": unit_text,
            "budget": budget,
        });
        self.invoke(CallKind::Summarize, payload).await
    }
}

/// Metrics are computed in-process; the external program is not consulted.
#[async_trait]
impl MetricsProvider for CommandBackend {
    async fn metrics(
        &self,
        text: &str,
        unit: &UnitOutline,
    ) -> Result<AdvisoryMetrics, CollaboratorError> {
        Ok(TextMetrics::analyze(text, unit.target_word_count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(script: &str) -> CommandBackend {
        CommandBackend::new("sh").with_args(["-c", script])
    }

    #[tokio::test]
    async fn test_ok_envelope() {
        let backend = shell(r#"cat > /dev/null; echo '{"ok": "A new summary."}'"#);
        let summary = backend.summarize("", "text", 100).await.unwrap();
        assert_eq!(summary, "A new summary.");
    }

    #[tokio::test]
    async fn test_request_carries_operation() {
        // Echo the operation back as the result.
        let backend = shell(
            r#"read line; op=$(echo "$line" | sed 's/.*"operation":"\([a-z_]*\)".*/\1/'); echo "{\"ok\": \"$op\"}""#,
        );
        let op = backend.summarize("", "text", 100).await.unwrap();
        assert_eq!(op, "summarize");
    }

    #[tokio::test]
    async fn test_rate_limit_envelope() {
        let backend = shell(
            r#"cat > /dev/null; echo '{"error": {"kind": "rate_limited", "retry_after_ms": 1500}}'"#,
        );
        let err = backend.summarize("", "text", 100).await.unwrap_err();
        assert_eq!(
            err,
            CollaboratorError::RateLimited {
                call: CallKind::Summarize,
                retry_after: Some(Duration::from_millis(1500)),
            }
        );
    }

    #[tokio::test]
    async fn test_garbage_is_malformed() {
        let backend = shell("cat > /dev/null; echo 'not json'");
        let err = backend.summarize("", "text", 100).await.unwrap_err();
        assert_eq!(err.kind(), "malformed_output");
    }

    #[tokio::test]
    async fn test_wrong_shape_is_malformed() {
        let backend = shell(r#"cat > /dev/null; echo '{"ok": {"title": 5}}'"#);
        let err = backend.brief("prompt").await.unwrap_err();
        assert!(err.to_string().contains("unexpected result shape"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_without_envelope() {
        let backend = shell("cat > /dev/null; echo 'boom' >&2; exit 3");
        let err = backend.summarize("", "text", 100).await.unwrap_err();
        match err {
            CollaboratorError::MalformedOutput { detail, .. } => assert!(detail.contains("boom")),
            other => panic!("Expected MalformedOutput, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_chatty_stderr_before_reading_large_request() {
        // 256 KiB of stderr before touching stdin, then echo the request size.
        let backend = shell(
            r#"head -c 262144 /dev/zero >&2; n=$(wc -c); echo "{\"ok\": \"$n\"}""#,
        );
        let big = "word ".repeat(40_000);
        let size = tokio::time::timeout(
            Duration::from_secs(10),
            backend.summarize("", &big, 100),
        )
        .await
        .expect("backend call should not stall on full pipes")
        .unwrap();
        assert!(size.trim().parse::<usize>().unwrap() > big.len());
    }

    #[tokio::test]
    async fn test_missing_program_is_malformed() {
        let backend = CommandBackend::new("/nonexistent/quill-backend");
        let err = backend.brief("prompt").await.unwrap_err();
        assert!(err.to_string().contains("failed to spawn"));
    }
}
