// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Create and delete workloads
//!
//! Built-in kinds use their k8s-openapi type information; the custom kinds
//! (TFJob, InferenceService) are described by hand since their CRDs may not
//! be installed. All kinds go through `DynamicObject`, so callers hand over
//! plain manifests.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, PostParams};
use kube::core::TypeMeta;
use kube::{Client, ResourceExt};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::ResourceError;

/// TFJob custom resource
pub const TF_JOB_GROUP: &str = "kubeflow.org";
pub const TF_JOB_VERSION: &str = "v1";
pub const TF_JOB_KIND: &str = "TFJob";
pub const TF_JOB_PLURAL: &str = "tfjobs";

/// KFServing custom resource
pub const KFSERVING_GROUP: &str = "serving.kubeflow.org";
pub const KFSERVING_VERSION: &str = "v1alpha2";
pub const KFSERVING_KIND: &str = "InferenceService";
pub const KFSERVING_PLURAL: &str = "inferenceservices";

/// Kinds of workload the launcher manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkloadKind {
    Job,
    TrainingJob,
    Deployment,
    ServingResource,
    Secret,
}

impl WorkloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Job => "job",
            WorkloadKind::TrainingJob => "training-job",
            WorkloadKind::Deployment => "deployment",
            WorkloadKind::ServingResource => "serving-resource",
            WorkloadKind::Secret => "secret",
        }
    }

    /// Whether the kind comes from a CRD that may be missing
    pub fn is_custom(&self) -> bool {
        matches!(self, WorkloadKind::TrainingJob | WorkloadKind::ServingResource)
    }

    pub fn api_resource(&self) -> ApiResource {
        match self {
            WorkloadKind::Job => ApiResource::erase::<Job>(&()),
            WorkloadKind::Deployment => ApiResource::erase::<Deployment>(&()),
            WorkloadKind::Secret => ApiResource::erase::<Secret>(&()),
            WorkloadKind::TrainingJob => {
                custom_resource(TF_JOB_GROUP, TF_JOB_VERSION, TF_JOB_KIND, TF_JOB_PLURAL)
            }
            WorkloadKind::ServingResource => custom_resource(
                KFSERVING_GROUP,
                KFSERVING_VERSION,
                KFSERVING_KIND,
                KFSERVING_PLURAL,
            ),
        }
    }
}

fn custom_resource(group: &str, version: &str, kind: &str, plural: &str) -> ApiResource {
    ApiResource {
        group: group.to_string(),
        version: version.to_string(),
        api_version: format!("{}/{}", group, version),
        kind: kind.to_string(),
        plural: plural.to_string(),
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkloadKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "job" | "jobs" => Ok(WorkloadKind::Job),
            "training-job" | "tfjob" | "tfjobs" => Ok(WorkloadKind::TrainingJob),
            "deployment" | "deployments" | "deploy" => Ok(WorkloadKind::Deployment),
            "serving-resource" | "inferenceservice" | "isvc" => Ok(WorkloadKind::ServingResource),
            "secret" | "secrets" => Ok(WorkloadKind::Secret),
            other => Err(format!(
                "Unknown kind '{}'. Expected one of: job, training-job, deployment, serving-resource, secret",
                other
            )),
        }
    }
}

/// Reference to a created object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceHandle {
    pub kind: WorkloadKind,
    pub name: String,
    pub namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

impl ResourceHandle {
    fn from_object(kind: WorkloadKind, namespace: &str, obj: &DynamicObject) -> Self {
        Self {
            kind,
            name: obj.name_any(),
            namespace: obj.namespace().unwrap_or_else(|| namespace.to_string()),
            uid: obj.uid(),
            resource_version: obj.resource_version(),
        }
    }
}

/// CRUD surface used around the watches
#[async_trait]
pub trait ResourceClient: Send + Sync {
    async fn create(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        spec: serde_json::Value,
    ) -> Result<ResourceHandle, ResourceError>;

    async fn delete(
        &self,
        kind: WorkloadKind,
        name: &str,
        namespace: &str,
    ) -> Result<(), ResourceError>;

    async fn secret_exists(&self, name: &str, namespace: &str) -> Result<bool, ResourceError>;
}

/// Resource client backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeResourceClient {
    client: Client,
}

impl KubeResourceClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, kind: WorkloadKind, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &kind.api_resource())
    }
}

#[async_trait]
impl ResourceClient for KubeResourceClient {
    async fn create(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        spec: serde_json::Value,
    ) -> Result<ResourceHandle, ResourceError> {
        let obj = prepare_object(kind, spec)?;
        let name = obj
            .metadata
            .name
            .clone()
            .or_else(|| obj.metadata.generate_name.clone())
            .unwrap_or_default();

        debug!(kind = %kind, name = %name, namespace = %namespace, "Creating resource");

        let created = self
            .api(kind, namespace)
            .create(&PostParams::default(), &obj)
            .await
            .map_err(|e| classify_create_error(kind, &name, e))?;

        let handle = ResourceHandle::from_object(kind, namespace, &created);
        info!(kind = %kind, name = %handle.name, namespace = %handle.namespace, "Created resource");
        Ok(handle)
    }

    async fn delete(
        &self,
        kind: WorkloadKind,
        name: &str,
        namespace: &str,
    ) -> Result<(), ResourceError> {
        self.api(kind, namespace)
            .delete(name, &DeleteParams::background())
            .await
            .map_err(|e| classify_delete_error(kind, name, e))?;

        info!(kind = %kind, name = %name, namespace = %namespace, "Deleted resource");
        Ok(())
    }

    async fn secret_exists(&self, name: &str, namespace: &str) -> Result<bool, ResourceError> {
        let found = self
            .api(WorkloadKind::Secret, namespace)
            .get_opt(name)
            .await
            .map_err(|e| classify_delete_error(WorkloadKind::Secret, name, e))?;
        Ok(found.is_some())
    }
}

/// Turn a manifest into a `DynamicObject`, filling in apiVersion/kind when absent
pub fn prepare_object(
    kind: WorkloadKind,
    spec: serde_json::Value,
) -> Result<DynamicObject, ResourceError> {
    if !spec.is_object() {
        return Err(ResourceError::InvalidSpec(
            "resource spec must be a JSON object".to_string(),
        ));
    }

    let mut obj: DynamicObject =
        serde_json::from_value(spec).map_err(|e| ResourceError::InvalidSpec(e.to_string()))?;

    let ar = kind.api_resource();
    match &obj.types {
        None => {
            obj.types = Some(TypeMeta {
                api_version: ar.api_version.clone(),
                kind: ar.kind.clone(),
            });
        }
        Some(types) if types.kind != ar.kind => {
            return Err(ResourceError::InvalidSpec(format!(
                "manifest kind '{}' does not match {} ({})",
                types.kind, kind, ar.kind
            )));
        }
        Some(_) => {}
    }

    if obj.metadata.name.is_none() && obj.metadata.generate_name.is_none() {
        return Err(ResourceError::InvalidSpec(
            "metadata.name or metadata.generateName is required".to_string(),
        ));
    }

    Ok(obj)
}

/// Classify a create failure; a 404 on a custom kind means its CRD is missing
pub fn classify_create_error(kind: WorkloadKind, name: &str, err: kube::Error) -> ResourceError {
    match err {
        kube::Error::Api(resp) => match resp.code {
            404 if kind.is_custom() => {
                let ar = kind.api_resource();
                ResourceError::CrdMissing {
                    kind: ar.kind,
                    api_version: ar.api_version,
                }
            }
            409 => ResourceError::Conflict {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            400 | 422 => ResourceError::ValidationFailed(resp.message),
            401 | 403 => ResourceError::Authorization(resp.message),
            code => ResourceError::Transport(format!("{} ({})", resp.message, code)),
        },
        other => ResourceError::Transport(other.to_string()),
    }
}

/// Classify a delete or lookup failure
pub fn classify_delete_error(kind: WorkloadKind, name: &str, err: kube::Error) -> ResourceError {
    match err {
        kube::Error::Api(resp) => match resp.code {
            404 => ResourceError::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            401 | 403 => ResourceError::Authorization(resp.message),
            code => ResourceError::Transport(format!("{} ({})", resp.message, code)),
        },
        other => ResourceError::Transport(other.to_string()),
    }
}
