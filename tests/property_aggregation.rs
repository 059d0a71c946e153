//! Property tests for the aggregation invariants.

use std::sync::Arc;

use chrono::Utc;
use proptest::prelude::*;

use sentinel::adapters::memory::{InMemoryDetectionRepository, InMemoryEvidenceRepository};
use sentinel::domain::models::{
    AggregationResult, DetectionStatus, EvidencePayload, EvidenceRecord, EvidenceSource,
    SourceKind, WorkloadType,
};
use sentinel::domain::ports::EvidenceRepository;
use sentinel::services::aggregator::EvidenceAggregator;

const SOURCES: [EvidenceSource; 6] = [
    EvidenceSource::WandB,
    EvidenceSource::Process,
    EvidenceSource::Env,
    EvidenceSource::Log,
    EvidenceSource::Image,
    EvidenceSource::Label,
];

fn record(source: EvidenceSource, framework: &str, confidence: f64) -> EvidenceRecord {
    let now = Utc::now();
    EvidenceRecord {
        id: 0,
        workload_uid: "w-1".to_string(),
        source,
        source_kind: SourceKind::Passive,
        framework: framework.to_string(),
        frameworks: vec![framework.to_string()],
        workload_type: WorkloadType::Training,
        confidence,
        layer: None,
        wrapper_framework: None,
        base_framework: None,
        payload: EvidencePayload::Generic {},
        extra: serde_json::Map::new(),
        processed: false,
        detected_at: now,
        created_at: now,
        expires_at: None,
    }
}

fn aggregate(records: &[EvidenceRecord]) -> AggregationResult {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");
    runtime.block_on(async {
        let evidence = Arc::new(InMemoryEvidenceRepository::default());
        let detections = Arc::new(InMemoryDetectionRepository::default());
        for r in records {
            evidence.create(r).await.expect("create");
        }
        EvidenceAggregator::new(evidence, detections)
            .aggregate("w-1")
            .await
            .expect("aggregate")
    })
}

/// (source index, confidence in hundredths) pairs for one framework.
fn single_framework_evidence() -> impl Strategy<Value = Vec<(usize, u32)>> {
    prop::collection::vec((0..SOURCES.len(), 0u32..=100), 1..8)
}

proptest! {
    /// Permuting the evidence list never changes the outcome for a single
    /// framework.
    #[test]
    fn order_independent_for_one_framework(
        (items, shuffled) in single_framework_evidence()
            .prop_flat_map(|v| {
                let original = v.clone();
                (Just(original), Just(v).prop_shuffle())
            })
    ) {
        let forward: Vec<EvidenceRecord> = items
            .iter()
            .map(|(s, c)| record(SOURCES[*s], "pytorch", f64::from(*c) / 100.0))
            .collect();
        let backward: Vec<EvidenceRecord> = shuffled
            .iter()
            .map(|(s, c)| record(SOURCES[*s], "pytorch", f64::from(*c) / 100.0))
            .collect();

        let a = aggregate(&forward);
        let b = aggregate(&backward);

        prop_assert_eq!(a.framework, b.framework);
        prop_assert_eq!(a.confidence, b.confidence);
        prop_assert_eq!(a.status, b.status);
        prop_assert_eq!(a.sources, b.sources);
        prop_assert_eq!(a.evidence_count, b.evidence_count);
    }

    /// Adding another distinct agreeing source never lowers confidence, up
    /// to the +0.15 cap.
    #[test]
    fn confidence_monotone_in_distinct_sources(
        confidence in 1u32..=100,
        source_count in 1usize..=6,
    ) {
        let confidence = f64::from(confidence) / 100.0;
        let mut previous = 0.0;
        for n in 1..=source_count {
            let records: Vec<EvidenceRecord> = SOURCES[..n]
                .iter()
                .map(|s| record(*s, "pytorch", confidence))
                .collect();
            let result = aggregate(&records);
            prop_assert!(result.confidence >= previous);
            prop_assert!(result.confidence <= (confidence + 0.15).min(1.0) + 1e-9);
            previous = result.confidence;
        }
    }

    /// The status function is piecewise in confidence when no conflict is
    /// present.
    #[test]
    fn status_matches_thresholds(confidence in 0u32..=100) {
        let confidence = f64::from(confidence) / 100.0;
        let result = aggregate(&[record(EvidenceSource::Log, "pytorch", confidence)]);

        let expected = if confidence >= 0.80 {
            DetectionStatus::Verified
        } else if confidence >= 0.60 {
            DetectionStatus::Confirmed
        } else if confidence >= 0.40 {
            DetectionStatus::Suspected
        } else {
            DetectionStatus::Unknown
        };
        prop_assert_eq!(result.status, expected);
    }
}
