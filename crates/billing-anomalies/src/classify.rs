use crate::CostRecord;

/// Returns true if the record's change rate is defined and strictly exceeds `threshold`.
pub fn is_anomalous(record: &CostRecord, threshold: f64) -> bool {
    record.change_rate.is_some_and(|rate| rate > threshold)
}

/// Selects the anomalous records, in input order.
pub fn anomalies(records: &[CostRecord], threshold: f64) -> Vec<&CostRecord> {
    let anomalies: Vec<_> = records
        .iter()
        .filter(|record| is_anomalous(record, threshold))
        .collect();

    tracing::info!(
        records = records.len(),
        anomalies = anomalies.len(),
        threshold,
        "classified change rates"
    );
    anomalies
}
