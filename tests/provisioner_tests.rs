mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use suite_executor::infrastructure::kubernetes::SequentialSuffix;
use suite_executor::infrastructure::runners::EnvironmentProvisioner;

fn provisioner(cluster: &Arc<FakeCluster>, prefix: &str) -> EnvironmentProvisioner {
    EnvironmentProvisioner::new(cluster.clone(), Arc::new(SequentialSuffix::new(prefix)))
}

#[tokio::test]
async fn test_environment_is_provisioned_in_two_steps() {
    let cluster = Arc::new(FakeCluster::new(vec![PodStep::NoPod]));
    let provisioner = provisioner(&cluster, "p");
    let cancel = CancellationToken::new();

    let namespace = provisioner.create_namespace(&cancel).await.unwrap();
    assert_eq!(namespace.metadata.name.as_deref(), Some("suite-executor-p0"));
    assert!(namespace.metadata.uid.is_some());

    let environment = provisioner
        .grant_cluster_admin(&cancel, &namespace)
        .await
        .unwrap();
    assert_eq!(environment.namespace, "suite-executor-p0");
    assert_eq!(environment.service_account, "cluster-admin");

    let binding = &cluster.bindings()[0];
    assert_eq!(
        binding.metadata.name.as_deref(),
        Some(environment.cluster_role_binding.as_str())
    );
    let owner = &binding.metadata.owner_references.as_ref().unwrap()[0];
    assert_eq!(owner.name, "suite-executor-p0");
    assert_eq!(owner.uid, namespace.metadata.uid.clone().unwrap());
}

#[tokio::test]
async fn test_partial_failure_leaves_namespace_for_teardown() {
    let cluster = Arc::new(
        FakeCluster::new(vec![PodStep::NoPod]).failing(FailPoint::CreateClusterRoleBinding),
    );
    let provisioner = provisioner(&cluster, "p");
    let cancel = CancellationToken::new();

    let namespace = provisioner.create_namespace(&cancel).await.unwrap();
    let name = namespace.metadata.name.clone().unwrap();

    let err = provisioner
        .grant_cluster_admin(&cancel, &namespace)
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("creating cluster role binding"));
    assert!(cluster.namespace_exists(&name));
    assert_eq!(cluster.service_accounts().len(), 1);

    provisioner.teardown(&name, Duration::from_secs(5)).await;
    assert!(!cluster.namespace_exists(&name));
}

#[tokio::test]
async fn test_name_collision_is_not_retried() {
    let cluster = Arc::new(FakeCluster::new(vec![PodStep::NoPod]));
    let cancel = CancellationToken::new();

    provisioner(&cluster, "same")
        .create_namespace(&cancel)
        .await
        .unwrap();
    let err = provisioner(&cluster, "same")
        .create_namespace(&cancel)
        .await
        .unwrap_err();

    assert!(err.to_string().starts_with("creating namespace"));
    assert_eq!(cluster.live_namespaces().len(), 1);
}

#[tokio::test]
async fn test_teardown_failure_is_swallowed() {
    let cluster = Arc::new(
        FakeCluster::new(vec![PodStep::NoPod]).failing(FailPoint::DeleteNamespace),
    );
    let provisioner = provisioner(&cluster, "p");

    let namespace = provisioner
        .create_namespace(&CancellationToken::new())
        .await
        .unwrap();
    let name = namespace.metadata.name.unwrap();

    provisioner.teardown(&name, Duration::from_secs(5)).await;
    assert!(cluster.namespace_exists(&name));
}
