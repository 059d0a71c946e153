//! Weighted-voting evidence aggregation.
//!
//! For one workload, fuses the queue of unprocessed evidence into a ranked
//! classification with a status, persists it, and marks the consumed
//! records. Aggregation is a pure function of the evidence multiset:
//! delivery order never changes the outcome beyond the documented
//! first-seen tie-break.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::domain::errors::DetectionResult;
use crate::domain::models::{
    AggregationResult, Conflict, DetectionRecord, DetectionStatus, EvidenceRecord, EvidenceSource,
    FrameworkLayer, WorkloadType,
};
use crate::domain::ports::{DetectionRepository, EvidenceRepository};

/// Per-source voting weights. Callers may override the whole table.
#[derive(Debug, Clone)]
pub struct SourceWeights {
    weights: HashMap<EvidenceSource, f64>,
}

/// Weight applied when a source has no entry in the table.
const DEFAULT_SOURCE_WEIGHT: f64 = 0.30;

impl Default for SourceWeights {
    fn default() -> Self {
        Self {
            weights: [
                (EvidenceSource::WandB, 1.00),
                (EvidenceSource::ImportDetection, 0.95),
                (EvidenceSource::UserOverride, 0.95),
                (EvidenceSource::Process, 0.85),
                (EvidenceSource::Env, 0.80),
                (EvidenceSource::Log, 0.75),
                (EvidenceSource::ActiveDetection, 0.70),
                (EvidenceSource::Image, 0.60),
                (EvidenceSource::Label, 0.50),
                (EvidenceSource::Default, 0.30),
            ]
            .into(),
        }
    }
}

impl SourceWeights {
    pub fn from_table(weights: HashMap<EvidenceSource, f64>) -> Self {
        Self { weights }
    }

    pub fn weight(&self, source: EvidenceSource) -> f64 {
        self.weights
            .get(&source)
            .copied()
            .unwrap_or(DEFAULT_SOURCE_WEIGHT)
    }
}

/// Thresholds and bonus parameters for the status function.
#[derive(Debug, Clone, Copy)]
pub struct AggregatorConfig {
    pub verified_threshold: f64,
    pub confirmed_threshold: f64,
    pub suspected_threshold: f64,
    /// Peak confidence at which a framework becomes a conflict contender.
    pub conflict_threshold: f64,
    /// Bonus per distinct source beyond the first.
    pub multi_source_bonus: f64,
    /// Cap on the total multi-source bonus.
    pub multi_source_bonus_cap: f64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            verified_threshold: 0.80,
            confirmed_threshold: 0.60,
            suspected_threshold: 0.40,
            conflict_threshold: 0.50,
            multi_source_bonus: 0.05,
            multi_source_bonus_cap: 0.15,
        }
    }
}

/// Running vote for one framework, in first-seen order.
struct Tally {
    framework: String,
    total_score: f64,
    peak_confidence: f64,
    // Attribution carried from the evidence that set the peak.
    layer: Option<FrameworkLayer>,
    wrapper_framework: Option<String>,
    base_framework: Option<String>,
    workload_type: WorkloadType,
    /// Source names seen for this framework, in arrival order.
    sources: Vec<String>,
}

/// Fuses per-workload evidence into a detection state.
pub struct EvidenceAggregator {
    evidence: Arc<dyn EvidenceRepository>,
    detections: Arc<dyn DetectionRepository>,
    weights: SourceWeights,
    config: AggregatorConfig,
    /// Per-workload serialization: one aggregation at a time per uid.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl EvidenceAggregator {
    pub fn new(
        evidence: Arc<dyn EvidenceRepository>,
        detections: Arc<dyn DetectionRepository>,
    ) -> Self {
        Self {
            evidence,
            detections,
            weights: SourceWeights::default(),
            config: AggregatorConfig::default(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_weights(mut self, weights: SourceWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_config(mut self, config: AggregatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Aggregate the unprocessed evidence for a workload.
    ///
    /// With nothing queued, returns the persisted state verbatim (or an
    /// unknown result when the workload has never been seen).
    pub async fn aggregate(&self, workload_uid: &str) -> DetectionResult<AggregationResult> {
        self.aggregate_inner(workload_uid, false).await
    }

    /// Aggregate over the workload's entire evidence history.
    pub async fn aggregate_all(&self, workload_uid: &str) -> DetectionResult<AggregationResult> {
        self.aggregate_inner(workload_uid, true).await
    }

    async fn aggregate_inner(
        &self,
        workload_uid: &str,
        include_processed: bool,
    ) -> DetectionResult<AggregationResult> {
        let lock = self.lock_for(workload_uid).await;
        let _guard = lock.lock().await;

        let records = if include_processed {
            self.evidence.list_by_workload(workload_uid).await?
        } else {
            self.evidence.list_unprocessed(workload_uid).await?
        };

        if records.is_empty() {
            return Ok(self
                .detections
                .get(workload_uid)
                .await?
                .map_or_else(|| AggregationResult::unknown(workload_uid), |r| r.to_result()));
        }

        let result = self.vote(workload_uid, &records);
        self.persist(&result).await?;

        // Best-effort: a failed mark leaves records to be re-consumed, which
        // the voting function tolerates.
        let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
        if let Err(e) = self.evidence.mark_processed(&ids).await {
            tracing::warn!(workload_uid, error = %e, "failed to mark evidence processed");
        }

        Ok(result)
    }

    /// The deterministic voting function. Pure: no I/O, no randomness.
    fn vote(&self, workload_uid: &str, records: &[EvidenceRecord]) -> AggregationResult {
        let mut tallies: Vec<Tally> = Vec::new();

        for record in records {
            let weight = self.weights.weight(record.source);
            let idx = match tallies.iter().position(|t| t.framework == record.framework) {
                Some(i) => i,
                None => {
                    tallies.push(Tally {
                        framework: record.framework.clone(),
                        total_score: 0.0,
                        peak_confidence: -1.0,
                        layer: None,
                        wrapper_framework: None,
                        base_framework: None,
                        workload_type: WorkloadType::Unknown,
                        sources: Vec::new(),
                    });
                    tallies.len() - 1
                }
            };
            let tally = &mut tallies[idx];

            tally.total_score += weight * record.confidence;
            if record.confidence > tally.peak_confidence {
                tally.peak_confidence = record.confidence;
                tally.layer = record.layer;
                tally.wrapper_framework = record.wrapper_framework.clone();
                tally.base_framework = record.base_framework.clone();
                tally.workload_type = record.workload_type;
            }
            let source_name = record.source.as_str().to_string();
            if !tally.sources.contains(&source_name) {
                tally.sources.push(source_name);
            }
        }

        let mut sources: Vec<String> = records
            .iter()
            .map(|r| r.source.as_str().to_string())
            .collect();
        sources.sort();
        sources.dedup();

        let conflicts = self.detect_conflicts(&tallies);

        // Winner: highest total score, first-seen on ties.
        let mut winner = &tallies[0];
        for tally in &tallies[1..] {
            if tally.total_score > winner.total_score {
                winner = tally;
            }
        }

        let bonus = (self.config.multi_source_bonus * (sources.len() as f64 - 1.0))
            .min(self.config.multi_source_bonus_cap);
        let confidence = round3((winner.peak_confidence + bonus).min(1.0));

        let status = if conflicts.is_empty() {
            self.status_for(confidence)
        } else {
            DetectionStatus::Conflict
        };

        let mut ranked: Vec<&Tally> = tallies.iter().collect();
        ranked.sort_by(|a, b| b.total_score.total_cmp(&a.total_score));

        AggregationResult {
            workload_uid: workload_uid.to_string(),
            framework: winner.framework.clone(),
            frameworks: ranked.iter().map(|t| t.framework.clone()).collect(),
            workload_type: winner.workload_type,
            confidence,
            status,
            layer: winner.layer,
            wrapper_framework: winner.wrapper_framework.clone(),
            base_framework: winner.base_framework.clone(),
            evidence_count: records.len(),
            sources,
            conflicts,
        }
    }

    /// Frameworks whose peak confidence clears the conflict threshold are
    /// contenders; more than one contender pairs the strongest (by total
    /// score) with each of the others.
    fn detect_conflicts(&self, tallies: &[Tally]) -> Vec<Conflict> {
        let mut contenders: Vec<&Tally> = tallies
            .iter()
            .filter(|t| t.peak_confidence >= self.config.conflict_threshold)
            .collect();
        if contenders.len() < 2 {
            return Vec::new();
        }
        contenders.sort_by(|a, b| b.total_score.total_cmp(&a.total_score));

        let now = Utc::now();
        let top = contenders[0];
        contenders[1..]
            .iter()
            .map(|other| Conflict {
                framework_a: top.framework.clone(),
                confidence_a: top.peak_confidence,
                sources_a: top.sources.clone(),
                framework_b: other.framework.clone(),
                confidence_b: other.peak_confidence,
                sources_b: other.sources.clone(),
                detected_at: now,
            })
            .collect()
    }

    fn status_for(&self, confidence: f64) -> DetectionStatus {
        if confidence >= self.config.verified_threshold {
            DetectionStatus::Verified
        } else if confidence >= self.config.confirmed_threshold {
            DetectionStatus::Confirmed
        } else if confidence >= self.config.suspected_threshold {
            DetectionStatus::Suspected
        } else {
            DetectionStatus::Unknown
        }
    }

    /// Create or update the persisted detection record. Failures are
    /// logged; the in-memory result is still returned to the caller.
    async fn persist(&self, result: &AggregationResult) -> DetectionResult<()> {
        let now = Utc::now();
        match self.detections.get(&result.workload_uid).await? {
            Some(mut record) => {
                record.apply_result(result, now);
                if let Err(e) = self.detections.update(&record).await {
                    tracing::warn!(
                        workload_uid = %result.workload_uid,
                        error = %e,
                        "failed to update detection record"
                    );
                }
            }
            None => {
                let record = DetectionRecord::from_result(result, now);
                if let Err(e) = self.detections.create(&record).await {
                    tracing::warn!(
                        workload_uid = %result.workload_uid,
                        error = %e,
                        "failed to create detection record"
                    );
                }
            }
        }
        Ok(())
    }

    async fn lock_for(&self, workload_uid: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(workload_uid.to_string())
            .or_default()
            .clone()
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
