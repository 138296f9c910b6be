//! Metadata extraction from job definitions.
//!
//! Definitions are arbitrarily nested mappings and sequences. The walk is
//! depth-first in document order and later visits overwrite earlier ones
//! for the same field.

use harvest_common::Metadata;
use serde_json::Value;

/// Fields recovered from one definition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DefinitionSummary {
    pub metadata: Metadata,
    pub name: String,
    pub device: Option<String>,
}

/// Walk `definition` and collect metadata, job name and target device.
///
/// Per mapping key:
/// - `metadata` merges its sub-keys into the output metadata;
/// - `job_name` sets the name;
/// - `requested_device_type_id` sets the device;
/// - in a mapping whose `role` is `target` and which has `device_type`,
///   any other key sets the device from `device_type`;
/// - in a mapping with `device_type` and no `role` at all, likewise;
/// - everything else is recursed into.
pub fn extract(definition: &Value) -> DefinitionSummary {
    let mut summary = DefinitionSummary::default();
    walk(definition, &mut summary);
    summary
}

fn walk(node: &Value, out: &mut DefinitionSummary) {
    match node {
        Value::Object(map) => {
            let device_type = map.get("device_type");
            let role = map.get("role");
            let is_target = role.and_then(Value::as_str) == Some("target");

            for (key, value) in map {
                match key.as_str() {
                    "metadata" => {
                        if let Value::Object(entries) = value {
                            for (k, v) in entries {
                                out.metadata.insert(k.clone(), v.clone());
                            }
                        }
                    }
                    "job_name" => out.name = scalar_text(value),
                    "requested_device_type_id" => out.device = Some(scalar_text(value)),
                    _ => match device_type {
                        Some(device) if (role.is_some() && is_target) || role.is_none() => {
                            out.device = Some(scalar_text(device));
                        }
                        _ => walk(value, out),
                    },
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                walk(item, out);
            }
        }
        _ => {}
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn test_legacy_definition() {
        let definition = json!({
            "job_name": "linux-mainline-juno",
            "device_type": "juno",
            "actions": [
                {"command": "deploy_linaro_kernel", "parameters": {}},
                {"command": "lava_test_shell", "parameters": {"testdef_repos": []}},
            ],
            "metadata": {"build-url": "https://ci/1", "kernel": "v6.1"},
        });
        let summary = extract(&definition);
        assert_eq!(summary.name, "linux-mainline-juno");
        assert_eq!(summary.device.as_deref(), Some("juno"));
        assert_eq!(summary.metadata["kernel"], json!("v6.1"));
        assert_eq!(summary.metadata.len(), 2);
    }

    #[test]
    fn test_device_type_without_role_stops_recursion() {
        // metadata nested below a device_type mapping is not reached
        let definition = json!({
            "device_type": "x15",
            "actions": [{"metadata": {"hidden": "yes"}}],
        });
        let summary = extract(&definition);
        assert_eq!(summary.device.as_deref(), Some("x15"));
        assert!(summary.metadata.is_empty());
    }

    #[test]
    fn test_multinode_target_role() {
        let definition = json!({
            "job_name": "android-benchmark",
            "device_group": [
                {"role": "host", "device_type": "kvm", "count": 1},
                {"role": "target", "device_type": "hi6220-hikey", "count": 1},
            ],
        });
        let summary = extract(&definition);
        assert_eq!(summary.device.as_deref(), Some("hi6220-hikey"));
    }

    #[test]
    fn test_requested_device_type_id() {
        let definition = json!({"requested_device_type_id": "panda", "job_name": "n"});
        assert_eq!(extract(&definition).device.as_deref(), Some("panda"));
    }

    #[test]
    fn test_last_visited_metadata_wins() {
        let definition = json!({
            "metadata": {"mode": "32"},
            "actions": [{"metadata": {"mode": "64", "core": "a53"}}],
        });
        let summary = extract(&definition);
        assert_eq!(summary.metadata["mode"], json!("64"));
        assert_eq!(summary.metadata["core"], json!("a53"));
    }

    #[test]
    fn test_empty_definition() {
        let summary = extract(&json!({}));
        assert_eq!(summary, DefinitionSummary::default());
    }

    fn definition_with(blocks: &[(String, BTreeMap<String, String>)], name: &str) -> Value {
        let mut actions = Vec::new();
        for (label, entries) in blocks {
            actions.push(json!({"command": label, "metadata": entries}));
        }
        json!({"job_name": name, "actions": actions})
    }

    proptest! {
        #[test]
        fn prop_sibling_order_does_not_matter(
            entries in prop::collection::btree_map("[a-z]{1,8}", "[a-z0-9]{0,8}", 0..12),
            split in 0usize..12,
        ) {
            let all: Vec<_> = entries.into_iter().collect();
            let split = split.min(all.len());
            let first: BTreeMap<_, _> = all[..split].iter().cloned().collect();
            let second: BTreeMap<_, _> = all[split..].iter().cloned().collect();

            let forward = definition_with(
                &[("a".into(), first.clone()), ("b".into(), second.clone())],
                "job",
            );
            let backward = definition_with(&[("b".into(), second), ("a".into(), first)], "job");

            let lhs: BTreeMap<_, _> = extract(&forward).metadata.into_iter().collect();
            let rhs: BTreeMap<_, _> = extract(&backward).metadata.into_iter().collect();
            prop_assert_eq!(lhs, rhs);
        }

        #[test]
        fn prop_single_block_is_returned_verbatim(
            entries in prop::collection::btree_map("[a-z]{1,8}", "[a-z0-9]{0,8}", 0..12),
            name in "[a-z][a-z0-9-]{0,16}",
        ) {
            let definition = definition_with(&[("only".into(), entries.clone())], &name);
            let summary = extract(&definition);
            prop_assert_eq!(summary.name, name);
            let got: BTreeMap<String, String> = summary
                .metadata
                .into_iter()
                .map(|(k, v)| (k, v.as_str().unwrap_or_default().to_string()))
                .collect();
            prop_assert_eq!(got, entries);
        }
    }
}
