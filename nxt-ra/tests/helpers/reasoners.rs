//! Reasoning backends with scripted behaviour

use nxt_ra::analysis::HeuristicReasoner;
use nxt_ra::types::{AnalysisError, ReasoningRequest, ReasoningResponse, ReasoningService};
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Answers with the scripted responses in order, repeating the last one
pub struct ScriptedReasoner {
    script: Vec<ReasoningResponse>,
    calls: AtomicUsize,
}

impl ScriptedReasoner {
    pub fn new(script: Vec<ReasoningResponse>) -> Self {
        assert!(!script.is_empty(), "script needs at least one response");
        Self {
            script,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ReasoningService for ScriptedReasoner {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn assess(&self, _request: &ReasoningRequest) -> Result<ReasoningResponse, AnalysisError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let index = call.min(self.script.len() - 1);
        Ok(self.script[index].clone())
    }
}

/// Heuristic answers, but the first call also commits a concurrent change to
/// the project, so the assessment it returns is stale by the time it is
/// applied
pub struct ConflictingReasoner {
    pool: SqlitePool,
    fired: AtomicBool,
}

impl ConflictingReasoner {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            fired: AtomicBool::new(false),
        }
    }
}

#[async_trait::async_trait]
impl ReasoningService for ConflictingReasoner {
    fn name(&self) -> &'static str {
        "conflicting"
    }

    async fn assess(&self, request: &ReasoningRequest) -> Result<ReasoningResponse, AnalysisError> {
        if !self.fired.swap(true, Ordering::SeqCst) {
            let project = nxt_ra::db::projects::get_project(&self.pool, &request.project_id)
                .await
                .map_err(|e| AnalysisError::Timeout(e.to_string()))?
                .ok_or_else(|| AnalysisError::Timeout("project vanished".to_string()))?;
            nxt_ra::db::projects::bump_version(
                &self.pool,
                &project.id,
                project.version,
                project.velocity_score.unwrap_or(65.0),
            )
            .await
            .map_err(|e| AnalysisError::Timeout(e.to_string()))?;
        }
        HeuristicReasoner.assess(request).await
    }
}

/// Heuristic answers after a fixed delay
pub struct SlowReasoner {
    pub delay: Duration,
}

#[async_trait::async_trait]
impl ReasoningService for SlowReasoner {
    fn name(&self) -> &'static str {
        "slow"
    }

    async fn assess(&self, request: &ReasoningRequest) -> Result<ReasoningResponse, AnalysisError> {
        tokio::time::sleep(self.delay).await;
        HeuristicReasoner.assess(request).await
    }
}

/// Times out on the first `failures` calls, then answers heuristically
pub struct FlakyReasoner {
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyReasoner {
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ReasoningService for FlakyReasoner {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn assess(&self, request: &ReasoningRequest) -> Result<ReasoningResponse, AnalysisError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(AnalysisError::Timeout("reasoning backend did not answer".to_string()));
        }
        HeuristicReasoner.assess(request).await
    }
}

/// Heuristic answers; the first call after `arm` also cancels the run
#[derive(Default)]
pub struct CancellingReasoner {
    token: Mutex<Option<CancellationToken>>,
}

impl CancellingReasoner {
    pub fn arm(&self, token: CancellationToken) {
        *self.token.lock().unwrap() = Some(token);
    }
}

#[async_trait::async_trait]
impl ReasoningService for CancellingReasoner {
    fn name(&self) -> &'static str {
        "cancelling"
    }

    async fn assess(&self, request: &ReasoningRequest) -> Result<ReasoningResponse, AnalysisError> {
        let token = self.token.lock().unwrap().take();
        if let Some(token) = token {
            token.cancel();
        }
        HeuristicReasoner.assess(request).await
    }
}
