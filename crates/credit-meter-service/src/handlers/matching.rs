//! Metered candidate/job matching.

use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use credit_meter_core::{
    score, services, summarize, CandidateProfile, InvocationId, JobTarget,
    MatchAnalysis, MatchSummary, ServiceCode,
};
use credit_meter_gateway::{InvocationReceipt, InvocationRequest};

use super::{parse_account_id, parse_invocation_id};
use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Matching request.
#[derive(Debug, Deserialize)]
pub struct MatchingRequest {
    /// Account paying for the analysis.
    pub account_id: String,
    /// Caller-chosen ID making retries safe. Generated when absent.
    pub invocation_id: Option<String>,
    /// Candidate being scored.
    pub candidate: CandidateProfile,
    /// Job the candidate is scored against.
    pub job: JobTarget,
    /// Context stored with the usage record (job or candidate references).
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Matching response.
#[derive(Debug, Serialize)]
pub struct MatchingResponse {
    /// Invocation ID to retry with or look up.
    pub invocation_id: String,
    /// Credits charged.
    pub cost: i64,
    /// Balance after the charge.
    pub balance: i64,
    /// Whether this is a replay of an earlier completed invocation.
    pub replayed: bool,
    /// The match analysis.
    pub analysis: MatchAnalysis,
}

/// Score a candidate against a job, charging the `ai_matching` price.
pub async fn run_matching(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Json(body): Json<MatchingRequest>,
) -> Result<Json<MatchingResponse>, ApiError> {
    let account_id = parse_account_id(&body.account_id)?;
    let invocation_id = body
        .invocation_id
        .as_deref()
        .map(parse_invocation_id)
        .transpose()?
        .unwrap_or_else(InvocationId::generate);
    let service_code = matching_code()?;

    tracing::debug!(
        service = %auth.service_name,
        account_id = %account_id,
        invocation_id = %invocation_id,
        "Processing matching request"
    );

    let receipt = invoke_scorer(
        &state,
        InvocationRequest {
            account_id,
            service_code,
            invocation_id,
            metadata: body.metadata,
        },
        body.candidate,
        body.job,
    )
    .await?;

    tracing::info!(
        service = %auth.service_name,
        account_id = %account_id,
        invocation_id = %invocation_id,
        overall_score = %receipt.output.overall_score,
        cost = %receipt.cost,
        balance = %receipt.balance,
        replayed = %receipt.replayed,
        "Matching completed"
    );

    Ok(Json(MatchingResponse {
        invocation_id: receipt.invocation_id.to_string(),
        cost: receipt.cost,
        balance: receipt.balance,
        replayed: receipt.replayed,
        analysis: receipt.output,
    }))
}

async fn invoke_scorer(
    state: &AppState,
    request: InvocationRequest,
    candidate: CandidateProfile,
    job: JobTarget,
) -> Result<InvocationReceipt<MatchAnalysis>, ApiError> {
    let receipt = state
        .gateway
        .invoke(request, move || async move {
            Ok::<_, Infallible>(score(&candidate, &job))
        })
        .await?;
    Ok(receipt)
}

fn matching_code() -> Result<ServiceCode, ApiError> {
    ServiceCode::new(services::AI_MATCHING).map_err(|e| ApiError::Internal(e.to_string()))
}

// ============================================================================
// Batch matching
// ============================================================================

/// Most candidates scored in one batch request.
pub const MAX_BATCH_CANDIDATES: usize = 25;

/// One candidate of a batch.
#[derive(Debug, Deserialize)]
pub struct BatchCandidate {
    /// Caller-chosen ID for this candidate's invocation. Generated when absent.
    pub invocation_id: Option<String>,
    /// Candidate being scored.
    pub candidate: CandidateProfile,
}

/// Batch matching request: several candidates against one job.
#[derive(Debug, Deserialize)]
pub struct BatchMatchingRequest {
    /// Account paying for the analyses.
    pub account_id: String,
    /// Job every candidate is scored against.
    pub job: JobTarget,
    /// Candidates, each charged as its own invocation.
    pub candidates: Vec<BatchCandidate>,
    /// Context stored with every usage record of the batch.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Outcome of one candidate in a batch.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchItemStatus {
    /// Scored and charged (or replayed).
    Completed,
    /// The invocation was refused or failed; see `error`.
    Failed,
    /// Not attempted because an earlier candidate hit an account or outage error.
    Skipped,
}

/// Per-candidate result.
#[derive(Debug, Serialize)]
pub struct BatchItem {
    /// Invocation ID to retry with or look up.
    pub invocation_id: String,
    /// Outcome.
    pub status: BatchItemStatus,
    /// Credits charged by this call (0 on replay or failure).
    pub cost: i64,
    /// Whether this is a replay of an earlier completed invocation.
    pub replayed: bool,
    /// The analysis, when completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<MatchAnalysis>,
    /// Error code, when failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Batch matching response.
#[derive(Debug, Serialize)]
pub struct BatchMatchingResponse {
    /// One entry per candidate, in request order.
    pub results: Vec<BatchItem>,
    /// Category counts and mean score over the completed analyses.
    pub summary: MatchSummary,
    /// Credits newly charged by this request.
    pub charged: i64,
    /// Balance after the batch.
    pub balance: i64,
}

/// Score several candidates against one job.
///
/// Each candidate is a separate metered invocation at the `ai_matching`
/// price, so each is charged, refunded and replayed on its own.
pub async fn run_batch_matching(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Json(body): Json<BatchMatchingRequest>,
) -> Result<Json<BatchMatchingResponse>, ApiError> {
    let account_id = parse_account_id(&body.account_id)?;
    let invocation_ids = batch_invocation_ids(&body.candidates)?;
    let service_code = matching_code()?;

    tracing::debug!(
        service = %auth.service_name,
        account_id = %account_id,
        candidates = body.candidates.len(),
        "Processing batch matching request"
    );

    let mut results = Vec::with_capacity(body.candidates.len());
    let mut analyses = Vec::new();
    let mut charged: i64 = 0;
    let mut halted = false;

    for (entry, invocation_id) in body.candidates.into_iter().zip(invocation_ids) {
        if halted {
            results.push(BatchItem::skipped(invocation_id));
            continue;
        }

        let request = InvocationRequest {
            account_id,
            service_code: service_code.clone(),
            invocation_id,
            metadata: body.metadata.clone(),
        };
        match invoke_scorer(&state, request, entry.candidate, body.job.clone()).await {
            Ok(receipt) => {
                let cost = if receipt.replayed { 0 } else { receipt.cost };
                charged = charged.saturating_add(cost);
                analyses.push(receipt.output.clone());
                results.push(BatchItem {
                    invocation_id: invocation_id.to_string(),
                    status: BatchItemStatus::Completed,
                    cost,
                    replayed: receipt.replayed,
                    analysis: Some(receipt.output),
                    error: None,
                });
            }
            Err(err) => {
                halted = halts_batch(&err);
                tracing::info!(
                    account_id = %account_id,
                    invocation_id = %invocation_id,
                    error = %err,
                    halted = halted,
                    "Batch candidate not scored"
                );
                results.push(BatchItem::failed(invocation_id, &err));
            }
        }
    }

    let summary = summarize(&analyses);
    let balance = state.ledger.balance(&account_id).await?;

    tracing::info!(
        service = %auth.service_name,
        account_id = %account_id,
        completed = summary.total,
        charged = %charged,
        average_score = summary.average_score,
        "Batch matching completed"
    );

    Ok(Json(BatchMatchingResponse {
        results,
        summary,
        charged,
        balance,
    }))
}

impl BatchItem {
    fn failed(invocation_id: InvocationId, err: &ApiError) -> Self {
        Self {
            invocation_id: invocation_id.to_string(),
            status: BatchItemStatus::Failed,
            cost: 0,
            replayed: false,
            analysis: None,
            error: Some(err.code().to_string()),
        }
    }

    fn skipped(invocation_id: InvocationId) -> Self {
        Self {
            invocation_id: invocation_id.to_string(),
            status: BatchItemStatus::Skipped,
            cost: 0,
            replayed: false,
            analysis: None,
            error: None,
        }
    }
}

/// Later candidates would fail the same way.
fn halts_batch(err: &ApiError) -> bool {
    matches!(
        err,
        ApiError::InsufficientCredits { .. }
            | ApiError::ServiceNotAvailable(_)
            | ApiError::Unavailable(_)
    )
}

/// Parse or generate one invocation ID per candidate, rejecting the whole
/// batch before anything is charged.
fn batch_invocation_ids(candidates: &[BatchCandidate]) -> Result<Vec<InvocationId>, ApiError> {
    if candidates.is_empty() {
        return Err(ApiError::BadRequest("At least one candidate is required".into()));
    }
    if candidates.len() > MAX_BATCH_CANDIDATES {
        return Err(ApiError::BadRequest(format!(
            "At most {MAX_BATCH_CANDIDATES} candidates per batch"
        )));
    }

    let mut seen = HashSet::with_capacity(candidates.len());
    candidates
        .iter()
        .map(|entry| {
            let id = entry
                .invocation_id
                .as_deref()
                .map(parse_invocation_id)
                .transpose()?
                .unwrap_or_else(InvocationId::generate);
            if seen.insert(id) {
                Ok(id)
            } else {
                Err(ApiError::BadRequest(format!(
                    "Duplicate invocation ID in batch: {id}"
                )))
            }
        })
        .collect()
}
