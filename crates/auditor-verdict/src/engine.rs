use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use auditor_core::config::{EmptyContextPolicy, VerdictSettings};
use auditor_core::error::BackendError;
use auditor_core::traits::{with_timeout, ReasoningBackend};
use auditor_core::types::{Outcome, Verdict};

use crate::context::ReasoningContext;
use crate::prompt::{format_only_request, judgment_request};
use crate::response::{parse_response, reconcile};

/// Asks the reasoning backend for a judgment and always returns a verdict.
///
/// Backend failures and unusable replies degrade to `UNCERTAIN`: a timeout is
/// retried once (when enabled), a schema failure is re-prompted in
/// format-only mode up to `max_format_retries` times. A malformed reply
/// envelope from the backend counts as a schema failure.
pub struct VerdictEngine {
    backend: Arc<dyn ReasoningBackend>,
    timeout: Duration,
    settings: VerdictSettings,
}

impl VerdictEngine {
    pub fn new(backend: Arc<dyn ReasoningBackend>, timeout: Duration, settings: VerdictSettings) -> Self {
        Self { backend, timeout, settings }
    }

    pub async fn evaluate(&self, ctx: &ReasoningContext) -> Verdict {
        if ctx.chunks.is_empty() {
            if ctx.retrieved > 0 {
                return Verdict::uncertain(format!(
                    "context budget admitted none of the {} retrieved policy rules",
                    ctx.retrieved
                ));
            }
            if self.settings.empty_context == EmptyContextPolicy::Pass {
                return Verdict {
                    outcome: Outcome::Pass,
                    violated_rule_ids: Default::default(),
                    rationale: "No applicable policy rule was retrieved for this input.".to_string(),
                    citations: Vec::new(),
                    confidence: self.settings.empty_context_confidence,
                };
            }
        }

        let user = ctx.render_user_prompt();
        let mut request = judgment_request(&user);
        let mut timeouts = 0usize;
        let mut format_retries = 0usize;
        loop {
            let problem = match with_timeout(self.timeout, self.backend.complete(&request)).await {
                Ok(reply) => match parse_response(&reply) {
                    Ok(parsed) => {
                        let verdict = reconcile(parsed, ctx);
                        info!(
                            outcome = ?verdict.outcome,
                            violated = verdict.violated_rule_ids.len(),
                            citations = verdict.citations.len(),
                            "verdict"
                        );
                        return verdict;
                    }
                    Err(e) => e.to_string(),
                },
                // The backend answered but the envelope was unusable.
                Err(BackendError::Malformed(msg)) => msg,
                Err(e) if e.is_timeout() => {
                    if self.settings.retry_on_timeout && timeouts == 0 {
                        timeouts += 1;
                        warn!(model = self.backend.model_id(), "reasoning backend timed out; retrying once");
                        continue;
                    }
                    warn!(model = self.backend.model_id(), "reasoning backend timed out");
                    return Verdict::uncertain(format!("reasoning backend timed out: {}", e));
                }
                Err(e) => {
                    warn!(model = self.backend.model_id(), error = %e, "reasoning backend unavailable");
                    return Verdict::uncertain(format!("reasoning backend unavailable: {}", e));
                }
            };

            if format_retries < self.settings.max_format_retries {
                format_retries += 1;
                warn!(attempt = format_retries, error = %problem, "unparseable verdict; re-prompting");
                request = format_only_request(&user, &problem);
            } else {
                warn!(error = %problem, "unparseable verdict; giving up");
                return Verdict::uncertain(format!("backend response unparseable: {}", problem));
            }
        }
    }
}
