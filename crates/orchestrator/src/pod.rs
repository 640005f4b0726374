// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Crucible Contributors

//! Pod spec construction for sandbox workers.

use crate::client::OrchestratorError;
use crucible_core::WorkerName;
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec, ResourceRequirements};
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

/// Template for worker pods, derived from configuration once at startup.
#[derive(Debug, Clone)]
pub struct WorkerPodSpec {
    /// Executor container image.
    pub image: String,
    /// Value of the `app` label; also the watch selector.
    pub app_label: String,
    /// Container resource requirements as raw JSON (requests/limits),
    /// passed through from configuration.
    pub container_resources: Option<serde_json::Value>,
    /// Extra fields deep-merged into the generated pod spec.
    pub pod_spec_extra: Option<serde_json::Value>,
}

/// Build the manifest for one worker pod.
///
/// The executor image's entrypoint keeps the pod alive and serves the
/// code-exec contract; the broker only needs the pod `Running` and its
/// container ready before handing it out.
pub(crate) fn build_pod(name: &WorkerName, spec: &WorkerPodSpec) -> Result<Pod, OrchestratorError> {
    let resources: Option<ResourceRequirements> = match &spec.container_resources {
        Some(json) => Some(serde_json::from_value(json.clone()).map_err(|e| {
            OrchestratorError::Fatal(format!("invalid executor resource JSON: {}", e))
        })?),
        None => None,
    };

    let mut pod_spec = PodSpec {
        containers: vec![Container {
            name: "executor".to_string(),
            image: Some(spec.image.clone()),
            resources,
            ..Default::default()
        }],
        restart_policy: Some("Never".to_string()),
        ..Default::default()
    };

    if let Some(extra) = &spec.pod_spec_extra {
        let mut value = serde_json::to_value(&pod_spec)
            .map_err(|e| OrchestratorError::Fatal(format!("pod spec serialization: {}", e)))?;
        merge_json(&mut value, extra);
        pod_spec = serde_json::from_value(value)
            .map_err(|e| OrchestratorError::Fatal(format!("invalid pod spec extras: {}", e)))?;
    }

    Ok(Pod {
        metadata: ObjectMeta {
            name: Some(name.as_str().to_string()),
            labels: Some(BTreeMap::from([("app".to_string(), spec.app_label.clone())])),
            ..Default::default()
        },
        spec: Some(pod_spec),
        ..Default::default()
    })
}

/// Deep-merge `extra` into `base`: objects merge key-wise, everything
/// else is replaced.
fn merge_json(base: &mut serde_json::Value, extra: &serde_json::Value) {
    match (base, extra) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(extra_map)) => {
            for (key, value) in extra_map {
                match base_map.get_mut(key) {
                    Some(slot) => merge_json(slot, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (slot, value) => *slot = value.clone(),
    }
}

#[cfg(test)]
#[path = "pod_tests.rs"]
mod tests;
