//! Measurement extraction from a content tree.
//!
//! A pure, deterministic pre-order walk: every node carrying a concept code
//! and at least one numeric value emits one record per value, then its
//! children are visited in document order. Traversal uses an explicit stack
//! bounded by [`ExtractOptions::max_depth`], so hostile nesting fails cleanly
//! instead of overflowing the call stack.

use serde::Deserialize;

use crate::error::ExtractError;
use crate::models::{ContentNode, MeasurementRecord};

/// Placeholder written for a missing code or meaning.
pub const UNKNOWN: &str = "Unknown";

/// What to do with a node whose concept has no code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownConceptPolicy {
    /// Emit nothing for the node (its children are still visited).
    #[default]
    Drop,
    /// Emit the node's values under the code `"Unknown"`.
    Record,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOptions {
    pub max_depth: usize,
    pub unknown_concepts: UnknownConceptPolicy,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            max_depth: 64,
            unknown_concepts: UnknownConceptPolicy::Drop,
        }
    }
}

/// Flattens `root` into measurement records in pre-order.
pub fn extract(
    root: &ContentNode,
    options: &ExtractOptions,
) -> Result<Vec<MeasurementRecord>, ExtractError> {
    let mut records = Vec::new();
    let mut stack: Vec<(&ContentNode, usize)> = vec![(root, 0)];

    while let Some((node, depth)) = stack.pop() {
        if depth >= options.max_depth {
            return Err(ExtractError::DepthExceeded {
                max_depth: options.max_depth,
            });
        }

        emit_node(node, options.unknown_concepts, &mut records);

        // Reversed so the first child is popped first.
        for child in node.children.iter().rev() {
            stack.push((child, depth + 1));
        }
    }

    Ok(records)
}

fn emit_node(node: &ContentNode, policy: UnknownConceptPolicy, out: &mut Vec<MeasurementRecord>) {
    let (Some(concept), Some(values)) = (&node.concept, &node.values) else {
        return;
    };

    let code = match (non_blank(concept.code.as_deref()), policy) {
        (Some(code), _) => code,
        (None, UnknownConceptPolicy::Record) => UNKNOWN,
        (None, UnknownConceptPolicy::Drop) => {
            tracing::debug!(values = values.len(), "dropping values of concept without code");
            return;
        }
    };
    let name = non_blank(concept.meaning.as_deref()).unwrap_or(UNKNOWN);

    let mut result_index = 0i64;
    for raw in values {
        let Some(value) = coerce(raw) else {
            tracing::debug!(code, raw = raw.as_str(), "skipping non-numeric value");
            continue;
        };
        out.push(MeasurementRecord {
            measurement_code: code.to_string(),
            measurement_name: name.to_string(),
            result_index,
            value,
        });
        result_index += 1;
    }
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

fn coerce(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConceptName;

    fn codes(records: &[MeasurementRecord]) -> Vec<&str> {
        records.iter().map(|r| r.measurement_code.as_str()).collect()
    }

    #[test]
    fn test_single_nested_measurement() {
        let leaf = ContentNode::default();
        let child = ContentNode::measurement("56845-4", "AVA", &["2.5"]).with_children(vec![leaf]);
        let root = ContentNode::container(vec![child]);

        let records = extract(&root, &ExtractOptions::default()).unwrap();
        assert_eq!(
            records,
            vec![MeasurementRecord {
                measurement_code: "56845-4".into(),
                measurement_name: "AVA".into(),
                result_index: 0,
                value: 2.5,
            }]
        );
    }

    #[test]
    fn test_preorder_sequence() {
        // root(A) -> [B -> [C], D]
        let root = ContentNode::measurement("A", "a", &["1"]).with_children(vec![
            ContentNode::measurement("B", "b", &["2"])
                .with_children(vec![ContentNode::measurement("C", "c", &["3"])]),
            ContentNode::measurement("D", "d", &["4"]),
        ]);

        let records = extract(&root, &ExtractOptions::default()).unwrap();
        assert_eq!(codes(&records), vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn test_multiple_values_get_indices() {
        let root = ContentNode::measurement("X", "x", &["1.0", "2.0", "3.5"]);
        let records = extract(&root, &ExtractOptions::default()).unwrap();
        let indices: Vec<i64> = records.iter().map(|r| r.result_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(records[2].value, 3.5);
    }

    #[test]
    fn test_bad_values_are_skipped_not_fatal() {
        let root = ContentNode::container(vec![
            ContentNode::measurement("X", "x", &["abc", " 4.25 ", "NaN", "inf", "7"]),
            ContentNode::measurement("Y", "y", &["1e2"]),
        ]);
        let records = extract(&root, &ExtractOptions::default()).unwrap();
        assert_eq!(codes(&records), vec!["X", "X", "Y"]);
        assert_eq!(records[0].value, 4.25);
        assert_eq!(records[0].result_index, 0);
        assert_eq!(records[1].value, 7.0);
        assert_eq!(records[1].result_index, 1);
        assert_eq!(records[2].value, 100.0);
    }

    #[test]
    fn test_node_without_values_still_traversed() {
        let section = ContentNode {
            concept: Some(ConceptName::new("121070", "Findings")),
            values: None,
            children: vec![ContentNode::measurement("Z", "z", &["9"])],
        };
        let records = extract(&ContentNode::container(vec![section]), &ExtractOptions::default())
            .unwrap();
        assert_eq!(codes(&records), vec!["Z"]);
    }

    #[test]
    fn test_empty_value_list_emits_nothing() {
        let root = ContentNode::measurement("X", "x", &[]);
        assert!(extract(&root, &ExtractOptions::default()).unwrap().is_empty());
    }

    #[test]
    fn test_missing_code_dropped_by_default() {
        let node = ContentNode {
            concept: Some(ConceptName {
                code: None,
                meaning: Some("Mystery".into()),
            }),
            values: Some(vec!["1".into()]),
            children: vec![ContentNode::measurement("K", "k", &["2"])],
        };
        let records = extract(&node, &ExtractOptions::default()).unwrap();
        assert_eq!(codes(&records), vec!["K"]);
    }

    #[test]
    fn test_missing_code_recorded_when_configured() {
        let node = ContentNode {
            concept: Some(ConceptName {
                code: Some("  ".into()),
                meaning: None,
            }),
            values: Some(vec!["1".into()]),
            children: vec![],
        };
        let options = ExtractOptions {
            unknown_concepts: UnknownConceptPolicy::Record,
            ..Default::default()
        };
        let records = extract(&node, &options).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].measurement_code, UNKNOWN);
        assert_eq!(records[0].measurement_name, UNKNOWN);
    }

    #[test]
    fn test_missing_meaning_uses_placeholder() {
        let node = ContentNode {
            concept: Some(ConceptName {
                code: Some("C1".into()),
                meaning: None,
            }),
            values: Some(vec!["3".into()]),
            children: vec![],
        };
        let records = extract(&node, &ExtractOptions::default()).unwrap();
        assert_eq!(records[0].measurement_name, UNKNOWN);
    }

    #[test]
    fn test_depth_limit() {
        let mut node = ContentNode::measurement("deep", "deep", &["1"]);
        for _ in 0..9 {
            node = ContentNode::container(vec![node]);
        }
        // 10 levels in total
        let ok = ExtractOptions {
            max_depth: 10,
            ..Default::default()
        };
        assert_eq!(extract(&node, &ok).unwrap().len(), 1);

        let tight = ExtractOptions {
            max_depth: 9,
            ..Default::default()
        };
        assert_eq!(
            extract(&node, &tight),
            Err(ExtractError::DepthExceeded { max_depth: 9 })
        );
    }

    #[test]
    fn test_very_deep_tree_does_not_overflow() {
        let mut node = ContentNode::default();
        for _ in 0..100_000 {
            node = ContentNode::container(vec![node]);
        }
        let result = extract(&node, &ExtractOptions::default());
        assert!(matches!(result, Err(ExtractError::DepthExceeded { .. })));
        // Unwind the chain iteratively; the recursive Drop would overflow.
        let mut current = node;
        while let Some(child) = current.children.pop() {
            current = child;
        }
    }

    #[test]
    fn test_deterministic() {
        let root = ContentNode::container(vec![
            ContentNode::measurement("A", "a", &["1", "2"]),
            ContentNode::measurement("B", "b", &["3"]),
        ]);
        let options = ExtractOptions::default();
        assert_eq!(extract(&root, &options), extract(&root, &options));
    }
}
