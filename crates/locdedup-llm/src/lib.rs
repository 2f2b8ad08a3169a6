//! LLM adjudication of duplicate-location groups.
//!
//! Trigram similarity over short place names is noisy: "Parque Industrial
//! I" and "Parque Industrial II" score high and are different places. The
//! validator sends candidate groups to a chat model in fixed-size batches,
//! with a strict rubric ([`rubric::RUBRIC`]) and the group's geographic
//! context, and gets back a structured confirm/trim/reject decision per
//! group. Decisions are cached by the folded member-name list so re-scans
//! of unchanged groups cost nothing.
//!
//! The validator is optional end to end: no credential, an unreachable
//! endpoint or an unparseable batch all yield [`ValidationOutcome::Skipped`]
//! and the pipeline persists those groups as trigram-only.

mod client;
pub mod prompt;
pub mod rubric;

pub use client::{ChatClient, LlmError};

use locdedup::normalize::fold;
use locdedup::EntityKind;
use locdedup_cache::{Cache, CacheLookup};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Groups per prompt.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Decision cache TTL: one week.
pub const DECISION_CACHE_TTL_SECONDS: u64 = 7 * 86_400;

/// One candidate group plus its resolved geographic context.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationInput {
    pub kind: EntityKind,
    pub member_ids: Vec<String>,
    /// Parallel to `member_ids`, original spellings.
    pub member_names: Vec<String>,
    pub uf: Option<String>,
    pub cidade: Option<String>,
    pub bairro: Option<String>,
    pub rua: Option<String>,
}

/// The model's per-group decision, stored verbatim in `llm_details`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmDecision {
    pub confirmed: bool,
    pub confidence: f64,
    pub canonical_name: String,
    pub rationale: String,
    pub valid_member_ids: Vec<String>,
}

/// What the validator produced for one input.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    /// A decision, fresh or cached.
    Decided(LlmDecision),
    /// Validation unavailable for this group; persist as trigram-only.
    Skipped,
}

/// Batched validator over an optional chat client and the shared cache.
#[derive(Debug, Clone)]
pub struct Validator {
    client: Option<ChatClient>,
    cache: Cache,
    batch_size: usize,
    cache_ttl_seconds: u64,
}

impl Validator {
    #[must_use]
    pub fn new(client: Option<ChatClient>, cache: Cache) -> Self {
        if client.is_none() {
            warn!("LLM credential absent: validator disabled, groups persist as trigram-only");
        }
        Self {
            client,
            cache,
            batch_size: DEFAULT_BATCH_SIZE,
            cache_ttl_seconds: DECISION_CACHE_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    /// Cache key for a member-name list: folding makes spelling variants of
    /// the same group share one decision.
    #[must_use]
    pub fn decision_cache_key(member_names: &[String]) -> String {
        format!("llm:decisao:{}", fold(&member_names.join("|")))
    }

    /// Validate every input, consulting the decision cache first and then
    /// prompting in batches. The output is parallel to `inputs`.
    pub async fn validate(&self, inputs: &[ValidationInput]) -> Vec<ValidationOutcome> {
        let mut outcomes = vec![ValidationOutcome::Skipped; inputs.len()];
        let mut pending: Vec<usize> = Vec::new();

        for (i, input) in inputs.iter().enumerate() {
            let key = Self::decision_cache_key(&input.member_names);
            match self.cache.get_json::<LlmDecision>(&key).await {
                CacheLookup::Hit(decision) => {
                    debug!("decision cache hit for {}", key);
                    outcomes[i] = ValidationOutcome::Decided(decision);
                }
                CacheLookup::Miss | CacheLookup::Absent => pending.push(i),
            }
        }

        let Some(client) = self.client.as_ref() else {
            return outcomes;
        };

        // Batches run sequentially: order preserves the detector's
        // score-descending output and keeps rate-limit windows tight.
        for chunk in pending.chunks(self.batch_size) {
            let batch: Vec<ValidationInput> =
                chunk.iter().map(|&i| inputs[i].clone()).collect();
            let user = prompt::batch_prompt(&batch);

            let content = match client.complete(&prompt::system_prompt(), &user).await {
                Ok(content) => content,
                Err(e) => {
                    warn!("LLM batch failed, {} groups skip validation: {}", chunk.len(), e);
                    continue;
                }
            };

            let decisions = match parse_decisions(&content, chunk.len()) {
                Ok(decisions) => decisions,
                Err(e) => {
                    warn!("LLM batch unparseable, {} groups skip validation: {}", chunk.len(), e);
                    continue;
                }
            };

            for (slot, decision) in chunk.iter().zip(decisions) {
                if let Some(decision) = decision {
                    let key = Self::decision_cache_key(&inputs[*slot].member_names);
                    self.cache
                        .set_json(&key, &decision, self.cache_ttl_seconds)
                        .await;
                    outcomes[*slot] = ValidationOutcome::Decided(decision);
                }
            }
        }

        let decided = outcomes
            .iter()
            .filter(|o| matches!(o, ValidationOutcome::Decided(_)))
            .count();
        info!("validated {}/{} groups", decided, inputs.len());
        outcomes
    }
}

#[derive(Debug, Deserialize)]
struct RawDecision {
    grupo: Option<usize>,
    #[serde(default)]
    confirmed: bool,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    canonical_name: String,
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    valid_member_ids: Vec<String>,
}

impl From<RawDecision> for LlmDecision {
    fn from(raw: RawDecision) -> Self {
        LlmDecision {
            confirmed: raw.confirmed,
            confidence: raw.confidence.clamp(0.0, 1.0),
            canonical_name: raw.canonical_name,
            rationale: raw.rationale,
            valid_member_ids: raw.valid_member_ids,
        }
    }
}

/// Parse a batch response into per-slot decisions.
///
/// Accepts the documented `{"resultados": [...]}` envelope, a bare array,
/// and fenced JSON. Items are placed by their 1-based `grupo` field when
/// present, positionally otherwise; out-of-range or surplus items drop.
pub fn parse_decisions(
    content: &str,
    expected: usize,
) -> Result<Vec<Option<LlmDecision>>, LlmError> {
    let trimmed = strip_code_fence(content);
    let value: serde_json::Value =
        serde_json::from_str(trimmed).map_err(|e| LlmError::Parse(e.to_string()))?;

    let items = match &value {
        serde_json::Value::Array(items) => items.clone(),
        serde_json::Value::Object(map) => map
            .get("resultados")
            .and_then(serde_json::Value::as_array)
            .cloned()
            .ok_or_else(|| LlmError::Parse("missing \"resultados\" array".to_string()))?,
        _ => return Err(LlmError::Parse("neither array nor object".to_string())),
    };

    let mut out: Vec<Option<LlmDecision>> = vec![None; expected];
    for (position, item) in items.into_iter().enumerate() {
        let raw: RawDecision = match serde_json::from_value(item) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("dropping malformed decision at position {}: {}", position, e);
                continue;
            }
        };
        let slot = raw.grupo.map_or(position, |g| g.saturating_sub(1));
        if slot < expected {
            out[slot] = Some(raw.into());
        }
    }

    Ok(out)
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim_start_matches(['\r', '\n'])
        .strip_suffix("```")
        .map_or(rest, str::trim)
}
