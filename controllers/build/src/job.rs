//! Shell provisioner Job construction.
//!
//! Each built-in shell provisioner step runs as one Job named after the
//! step's UUID. The Job's single container receives the script (inline or
//! by ConfigMap reference) and the SSH credentials secret as arguments.

use crds::{
    BUILD_NAME_LABEL, BUILD_NAMESPACE_LABEL, MANAGED_BY_LABEL, PROVISIONER_ID_LABEL,
};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Affinity, Container, EnvVar, EnvVarSource, NodeAffinity, NodeSelector, NodeSelectorRequirement,
    NodeSelectorTerm, ObjectFieldSelector, PodSpec, PodTemplateSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

/// Name of the shell provisioner; also its managed-by value and service account
pub const SHELL_PROVISIONER_NAME: &str = "forge-provisioner-shell";

const CONTAINER_NAME: &str = "shell-provisioner";

/// Where and how shell provisioner Jobs run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellSettings {
    /// Namespace the Jobs are created in
    pub namespace: String,
    /// Provisioner container image
    pub image: String,
}

impl Default for ShellSettings {
    fn default() -> Self {
        Self {
            namespace: "forge-core".to_string(),
            image: "ghcr.io/forge-build/forge-provisioner-shell:dev".to_string(),
        }
    }
}

/// Name of the Job executing the step with `uuid`
pub fn job_name(uuid: &str) -> String {
    format!("{SHELL_PROVISIONER_NAME}-{uuid}")
}

/// Script source handed to the provisioner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Script {
    /// Script text
    Inline(String),
    /// Name of a ConfigMap holding the script
    ConfigMap(String),
}

/// Builds the Job for one shell provisioner step
#[derive(Debug, Clone)]
pub struct ShellJobBuilder<'a> {
    settings: &'a ShellSettings,
    build_name: String,
    build_namespace: String,
    uuid: String,
    script: Option<Script>,
    credentials_secret: Option<String>,
    backoff_limit: i32,
}

impl<'a> ShellJobBuilder<'a> {
    /// Start a Job for step `uuid` of Build `build_namespace/build_name`
    pub fn new(settings: &'a ShellSettings, build_name: &str, build_namespace: &str, uuid: &str) -> Self {
        Self {
            settings,
            build_name: build_name.to_string(),
            build_namespace: build_namespace.to_string(),
            uuid: uuid.to_string(),
            script: None,
            credentials_secret: None,
            backoff_limit: 1,
        }
    }

    /// Script to run
    #[must_use]
    pub fn script(mut self, script: Script) -> Self {
        self.script = Some(script);
        self
    }

    /// Secret with the SSH credentials of the build machine
    #[must_use]
    pub fn credentials_secret(mut self, name: &str) -> Self {
        self.credentials_secret = Some(name.to_string());
        self
    }

    /// Job backoff limit, passed through as given
    #[must_use]
    pub fn retries(mut self, retries: i32) -> Self {
        self.backoff_limit = retries;
        self
    }

    /// Correlation labels shared by the Job and its Pod template
    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (MANAGED_BY_LABEL.to_string(), SHELL_PROVISIONER_NAME.to_string()),
            (BUILD_NAME_LABEL.to_string(), self.build_name.clone()),
            (BUILD_NAMESPACE_LABEL.to_string(), self.build_namespace.clone()),
            (PROVISIONER_ID_LABEL.to_string(), self.uuid.clone()),
        ])
    }

    fn args(&self) -> Vec<String> {
        let mut args = vec!["--namespace".to_string(), self.build_namespace.clone()];
        match &self.script {
            Some(Script::Inline(script)) => {
                args.push("--run-script".to_string());
                args.push(script.clone());
            }
            Some(Script::ConfigMap(name)) => {
                args.push("--run-script-ref".to_string());
                args.push(name.clone());
            }
            None => {}
        }
        if let Some(secret) = &self.credentials_secret {
            args.push("--ssh-credentials-secret-name".to_string());
            args.push(secret.clone());
        }
        args
    }

    /// The Job manifest
    pub fn build(&self) -> Job {
        let labels = self.labels();
        let container = Container {
            name: CONTAINER_NAME.to_string(),
            image: Some(self.settings.image.clone()),
            args: Some(self.args()),
            env: Some(vec![EnvVar {
                name: "POD_NAMESPACE".to_string(),
                value: None,
                value_from: Some(EnvVarSource {
                    field_ref: Some(ObjectFieldSelector {
                        api_version: Some("v1".to_string()),
                        field_path: "metadata.namespace".to_string(),
                    }),
                    ..Default::default()
                }),
            }]),
            ..Default::default()
        };
        let linux_only = Affinity {
            node_affinity: Some(NodeAffinity {
                required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                    node_selector_terms: vec![NodeSelectorTerm {
                        match_expressions: Some(vec![NodeSelectorRequirement {
                            key: "kubernetes.io/os".to_string(),
                            operator: "In".to_string(),
                            values: Some(vec!["linux".to_string()]),
                        }]),
                        match_fields: None,
                    }],
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        Job {
            metadata: ObjectMeta {
                name: Some(job_name(&self.uuid)),
                namespace: Some(self.settings.namespace.clone()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(JobSpec {
                completions: Some(1),
                backoff_limit: Some(self.backoff_limit),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![container],
                        restart_policy: Some("Never".to_string()),
                        service_account_name: Some(SHELL_PROVISIONER_NAME.to_string()),
                        affinity: Some(linux_only),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            status: None,
        }
    }
}
