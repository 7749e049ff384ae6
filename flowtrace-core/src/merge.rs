//! Timeline merging.

use crate::types::NormalizedEvent;

/// Merge the two normalized sequences into one chronological timeline.
///
/// Events are ordered by `(timestamp, source priority, sequence)`. Ties on
/// timestamp go to SmartFlow before Agent; within one source the input order
/// is kept. The sort is stable, so the result is fully deterministic.
pub fn merge(
    smartflow_events: Vec<NormalizedEvent>,
    agent_events: Vec<NormalizedEvent>,
) -> Vec<NormalizedEvent> {
    let mut timeline = smartflow_events;
    timeline.extend(agent_events);
    timeline.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

    tracing::debug!(events = timeline.len(), "Merged timeline");
    timeline
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use crate::types::Source;
    use serde_json::json;

    #[test]
    fn test_interleaves_by_timestamp() {
        let sf = normalize(
            &[
                json!({"ts": 1, "type": "plugin", "id": "P1"}),
                json!({"ts": 3, "type": "error", "code": 500}),
            ],
            Source::SmartFlow,
        );
        let ag = normalize(&[json!({"ts": 2, "role": "assistant", "text": "hi"})], Source::Agent);

        let timeline = merge(sf, ag);
        let order: Vec<(Source, usize)> = timeline.iter().map(|e| (e.source, e.sequence)).collect();
        assert_eq!(
            order,
            vec![(Source::SmartFlow, 0), (Source::Agent, 0), (Source::SmartFlow, 1)]
        );
    }

    #[test]
    fn test_equal_timestamps_put_smartflow_first() {
        let sf = normalize(&[json!({"ts": 5, "id": "sf"})], Source::SmartFlow);
        let ag = normalize(&[json!({"ts": 5, "id": "agent"})], Source::Agent);

        let timeline = merge(sf, ag);
        assert_eq!(timeline[0].source, Source::SmartFlow);
        assert_eq!(timeline[1].source, Source::Agent);
    }

    #[test]
    fn test_same_source_ties_keep_input_order() {
        let sf = normalize(
            &[
                json!({"ts": 5, "n": 0}),
                json!({"ts": 5, "n": 1}),
                json!({"ts": 5, "n": 2}),
            ],
            Source::SmartFlow,
        );
        let timeline = merge(sf, Vec::new());
        let ns: Vec<i64> = timeline.iter().map(|e| e.payload["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![0, 1, 2]);
    }

    #[test]
    fn test_output_is_non_decreasing() {
        let sf = normalize(
            &[json!({"ts": 9}), json!({"ts": 1}), json!({}), json!({"ts": 4})],
            Source::SmartFlow,
        );
        let ag = normalize(&[json!({"ts": 3}), json!("junk"), json!({"ts": 2})], Source::Agent);
        let total = sf.len() + ag.len();

        let timeline = merge(sf, ag);
        assert_eq!(timeline.len(), total);
        assert!(timeline.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_empty_inputs() {
        assert!(merge(Vec::new(), Vec::new()).is_empty());
    }
}
