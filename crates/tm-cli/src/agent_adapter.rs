//! Process-backed agent.
//!
//! The loop treats text generation as a black box: a configured executable
//! receives the prompt on stdin and writes its transcript to stdout. The
//! selected model tier is exported as `TM_MODEL_TIER` so wrapper scripts
//! can map tiers to concrete model identifiers.

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use tm_core::types::ModelTier;
use tm_harness::agent::{AgentEvent, PlanOutcome, SessionOutcome, WorkAgent, WorkRequest};
use tm_harness::error::AgentError;
use tm_harness::verification::{parse_verification_output, VerifyOutcome};

pub struct ProcessAgent {
    command: String,
    default_tier: ModelTier,
}

impl ProcessAgent {
    pub fn new(command: String, default_tier: ModelTier) -> Self {
        Self {
            command,
            default_tier,
        }
    }

    async fn invoke(&self, prompt: &str, tier: ModelTier) -> Result<String, AgentError> {
        debug!(command = %self.command, %tier, "spawning agent process");
        let mut child = Command::new(&self.command)
            .env("TM_MODEL_TIER", tier.to_string())
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| AgentError::Connection(format!("failed to spawn {}: {e}", self.command)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| AgentError::Connection(format!("failed to write prompt: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| AgentError::Connection(format!("agent process failed: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            // Let the shared classifier decide retryability from the text.
            return Err(AgentError::classify(&format!("{stderr}\n{stdout}")));
        }
        Ok(stdout)
    }
}

/// Split a planning transcript into plan and criteria sections. Falls back
/// to treating the whole transcript as the plan when the criteria heading
/// is absent.
fn split_plan_output(transcript: &str) -> (String, String) {
    let lower = transcript.to_lowercase();
    if let Some(pos) = lower.find("## success criteria") {
        let plan = transcript[..pos].trim().to_string();
        let criteria = transcript[pos..]
            .lines()
            .skip(1)
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string();
        (plan, criteria)
    } else {
        (transcript.trim().to_string(), String::new())
    }
}

#[async_trait]
impl WorkAgent for ProcessAgent {
    async fn run_planning_phase(
        &self,
        goal: &str,
        context: &str,
    ) -> Result<PlanOutcome, AgentError> {
        let prompt = format!(
            "Create a task plan for the goal below as a markdown checklist.\n\
             Group tasks into PRs with `### PR <n>: <name>` headings and tag each task\n\
             with a complexity marker (`[coding]`, `[quick]`, `[general]` or `[debugging-qa]`).\n\
             End with a `## Success Criteria` section listing verifiable completion criteria.\n\n\
             ## Goal\n\n{goal}\n\n## Context\n\n{context}"
        );
        let transcript = self.invoke(&prompt, ModelTier::Smart).await?;
        let (plan, criteria) = split_plan_output(&transcript);
        Ok(PlanOutcome {
            plan,
            criteria,
            transcript,
        })
    }

    async fn run_work_session(
        &self,
        request: WorkRequest,
    ) -> Result<SessionOutcome, AgentError> {
        let tier = request.model_override.unwrap_or(self.default_tier);
        let mut prompt = String::new();
        if let Some(branch) = &request.required_branch {
            prompt.push_str(&format!("Work on branch `{branch}`.\n\n"));
        }
        prompt.push_str(&request.task_description);
        if !request.context.is_empty() {
            prompt.push_str(&format!("\n\n## Context\n\n{}", request.context));
        }

        let transcript = self.invoke(&prompt, tier).await?;
        Ok(SessionOutcome {
            events: vec![AgentEvent::Final {
                text: transcript.clone(),
            }],
            transcript,
        })
    }

    async fn verify(&self, criteria: &str, context: &str) -> Result<VerifyOutcome, AgentError> {
        let prompt = format!(
            "Verify whether the success criteria below are met by the current state\n\
             of the repository. Check each criterion, then end your answer with exactly\n\
             `verification_result: pass` or `verification_result: fail`.\n\n\
             ## Success Criteria\n\n{criteria}\n\n## Context\n\n{context}"
        );
        let transcript = self.invoke(&prompt, ModelTier::Smart).await?;
        Ok(parse_verification_output(&transcript))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_plan_and_criteria() {
        let transcript = "### PR 1: Auth\n- [ ] Task 1\n\n## Success Criteria\n- tests pass\n- CI green";
        let (plan, criteria) = split_plan_output(transcript);
        assert!(plan.contains("- [ ] Task 1"));
        assert!(!plan.contains("Success Criteria"));
        assert_eq!(criteria, "- tests pass\n- CI green");
    }

    #[test]
    fn missing_criteria_heading_keeps_whole_plan() {
        let (plan, criteria) = split_plan_output("- [ ] Task 1\n");
        assert_eq!(plan, "- [ ] Task 1");
        assert!(criteria.is_empty());
    }
}
