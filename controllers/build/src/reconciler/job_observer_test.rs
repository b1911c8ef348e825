//! Unit tests for the provisioner Job observer

#[cfg(test)]
mod tests {
    use crate::reconciler::job_observer::{
        failed_container, job_outcome, JobOutcome, CONTROLLER_UID_LABEL, LEGACY_CONTROLLER_UID_LABEL,
    };
    use crate::test_utils::*;
    use crds::*;
    use k8s_openapi::api::core::v1::{ContainerState, ContainerStateTerminated, ContainerStatus};
    use kube::ResourceExt;
    use kube_store::MockObjectStore;

    const UUID: &str = "2222";

    fn running_build() -> Build {
        let mut build = with_finalizer(test_build("demo"));
        build.spec.provisioners = vec![ProvisionerSpec {
            uuid: Some(UUID.to_string()),
            status: Some(ProvisionerStatus::Running),
            ..ProvisionerSpec::shell("echo hi")
        }];
        build
    }

    fn step(store: &MockObjectStore) -> ProvisionerSpec {
        store.build("default", "demo").unwrap().spec.provisioners[0].clone()
    }

    #[test]
    fn test_job_outcome() {
        assert_eq!(job_outcome(&finished_job("demo", UUID, "Complete")), Some(JobOutcome::Complete));
        assert_eq!(job_outcome(&finished_job("demo", UUID, "Failed")), Some(JobOutcome::Failed));
        assert_eq!(job_outcome(&finished_job("demo", UUID, "Suspended")), None);
    }

    #[test]
    fn test_failed_container_skips_successful_ones() {
        let mut pod = terminated_pod("uid", CONTROLLER_UID_LABEL, 2, "Error", "second");
        let init = ContainerStatus {
            name: "init".to_string(),
            state: Some(ContainerState {
                terminated: Some(ContainerStateTerminated {
                    exit_code: 0,
                    reason: Some("Completed".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        pod.status.as_mut().unwrap().init_container_statuses = Some(vec![init]);

        assert_eq!(failed_container(&pod), Some(("Error".to_string(), "second".to_string())));
    }

    #[tokio::test]
    async fn test_complete_job_marks_step_completed_and_is_deleted() {
        let store = MockObjectStore::new();
        store.add_build(running_build());
        let job = finished_job("demo", UUID, "Complete");
        store.add_job(job.clone());
        let harness = TestHarness::new(&store);

        harness.reconciler.reconcile_job(&job).await.unwrap();
        assert_eq!(step(&store).status, Some(ProvisionerStatus::Completed));
        assert!(store.jobs().is_empty());
    }

    #[tokio::test]
    async fn test_failed_job_records_container_failure() {
        let store = MockObjectStore::new();
        store.add_build(running_build());
        let job = finished_job("demo", UUID, "Failed");
        store.add_job(job.clone());
        store.add_pod(terminated_pod(&job.uid().unwrap(), CONTROLLER_UID_LABEL, 1, "Error", "boom"));
        let harness = TestHarness::new(&store);

        harness.reconciler.reconcile_job(&job).await.unwrap();
        let step = step(&store);
        assert_eq!(step.status, Some(ProvisionerStatus::Failed));
        assert_eq!(step.failure_reason.as_deref(), Some("Error"));
        assert_eq!(step.failure_message.as_deref(), Some("boom"));
        assert!(store.jobs().is_empty());
    }

    #[tokio::test]
    async fn test_legacy_controller_uid_label() {
        let store = MockObjectStore::new();
        store.add_build(running_build());
        let job = finished_job("demo", UUID, "Failed");
        store.add_job(job.clone());
        store.add_pod(terminated_pod(&job.uid().unwrap(), LEGACY_CONTROLLER_UID_LABEL, 3, "OOMKilled", ""));
        let harness = TestHarness::new(&store);

        harness.reconciler.reconcile_job(&job).await.unwrap();
        assert_eq!(step(&store).failure_reason.as_deref(), Some("OOMKilled"));
    }

    #[tokio::test]
    async fn test_pod_gone_still_fails_step_and_deletes_job() {
        let store = MockObjectStore::new();
        store.add_build(running_build());
        let job = finished_job("demo", UUID, "Failed");
        store.add_job(job.clone());
        let harness = TestHarness::new(&store);

        harness.reconciler.reconcile_job(&job).await.unwrap();
        let step = step(&store);
        assert_eq!(step.status, Some(ProvisionerStatus::Failed));
        assert!(step.failure_reason.is_none());
        assert!(store.jobs().is_empty());
    }

    #[tokio::test]
    async fn test_unrecognized_condition_is_ignored() {
        let store = MockObjectStore::new();
        store.add_build(running_build());
        let job = finished_job("demo", UUID, "Suspended");
        store.add_job(job.clone());
        let harness = TestHarness::new(&store);

        harness.reconciler.reconcile_job(&job).await.unwrap();
        assert_eq!(step(&store).status, Some(ProvisionerStatus::Running));
        assert_eq!(store.jobs().len(), 1);
        assert_eq!(store.writes().total(), 0);
    }

    #[tokio::test]
    async fn test_job_without_conditions_is_ignored() {
        let store = MockObjectStore::new();
        store.add_build(running_build());
        let mut job = finished_job("demo", UUID, "Complete");
        job.status = None;
        store.add_job(job.clone());
        let harness = TestHarness::new(&store);

        harness.reconciler.reconcile_job(&job).await.unwrap();
        assert_eq!(store.writes().total(), 0);
    }

    #[tokio::test]
    async fn test_terminal_step_is_not_regressed() {
        let store = MockObjectStore::new();
        let mut build = running_build();
        build.spec.provisioners[0].status = Some(ProvisionerStatus::Completed);
        store.add_build(build);
        let job = finished_job("demo", UUID, "Failed");
        store.add_job(job.clone());
        let harness = TestHarness::new(&store);

        harness.reconciler.reconcile_job(&job).await.unwrap();
        assert_eq!(step(&store).status, Some(ProvisionerStatus::Completed));
        assert_eq!(store.writes().build_patches, 0);
        assert!(store.jobs().is_empty());
    }

    #[tokio::test]
    async fn test_job_of_deleted_build_is_removed() {
        let store = MockObjectStore::new();
        let job = finished_job("demo", UUID, "Complete");
        store.add_job(job.clone());
        let harness = TestHarness::new(&store);

        harness.reconciler.reconcile_job(&job).await.unwrap();
        assert!(store.jobs().is_empty());
    }

    #[tokio::test]
    async fn test_job_of_unknown_step_is_removed() {
        let store = MockObjectStore::new();
        store.add_build(running_build());
        let job = finished_job("demo", "9999", "Complete");
        store.add_job(job.clone());
        let harness = TestHarness::new(&store);

        harness.reconciler.reconcile_job(&job).await.unwrap();
        assert!(store.jobs().is_empty());
        assert_eq!(store.writes().jobs_deleted, 1);
        assert_eq!(store.writes().build_patches, 0);
        assert_eq!(step(&store).status, Some(ProvisionerStatus::Running));
    }

    #[tokio::test]
    async fn test_already_deleted_job_is_fine() {
        let store = MockObjectStore::new();
        store.add_build(running_build());
        let job = finished_job("demo", UUID, "Complete");
        let harness = TestHarness::new(&store);

        harness.reconciler.reconcile_job(&job).await.unwrap();
        assert_eq!(step(&store).status, Some(ProvisionerStatus::Completed));
        assert_eq!(job.name_any(), format!("forge-provisioner-shell-{UUID}"));
    }
}
