use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{
    ContainerState, ContainerStateRunning, ContainerStateTerminated, ContainerStateWaiting,
    ContainerStatus, Namespace, Pod, PodStatus, Secret, ServiceAccount,
};
use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use suite_executor::error::{ExecutorError, Result};
use suite_executor::infrastructure::kubernetes::builder::{
    JOB_NAME_LABEL, SIDECAR_CONTAINER, WORKLOAD_CONTAINER,
};
use suite_executor::infrastructure::kubernetes::{ClusterClient, ExecOutput, LogStream};

/// What one `list_job_pods` call observes for the workload container.
#[derive(Debug, Clone, PartialEq)]
pub enum PodStep {
    NoPod,
    Waiting(&'static str),
    Running,
    Terminated(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    CreateNamespace,
    CreateServiceAccount,
    CreateClusterRoleBinding,
    CreateSecret,
    CreateJob,
    ListPods,
    LogStream,
    Exec,
    DeleteNamespace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecCall {
    pub namespace: String,
    pub pod: String,
    pub container: String,
    pub command: Vec<String>,
}

#[derive(Default)]
struct State {
    namespaces: BTreeMap<String, Namespace>,
    deleted_namespaces: Vec<String>,
    service_accounts: Vec<ServiceAccount>,
    bindings: Vec<ClusterRoleBinding>,
    secrets: Vec<Secret>,
    jobs: Vec<Job>,
    events: Vec<String>,
    list_calls: HashMap<String, usize>,
    exec_calls: Vec<ExecCall>,
    failures: HashMap<FailPoint, usize>,
}

/// In-memory cluster. Every job gets its own pod whose workload container
/// walks through `script`, one step per `list_job_pods` call, repeating the
/// last step once the script is exhausted.
pub struct FakeCluster {
    state: Mutex<State>,
    script: Vec<PodStep>,
    logs: Vec<u8>,
    archive: Vec<u8>,
    replacement_pod: bool,
    next_id: AtomicU64,
}

impl FakeCluster {
    pub fn new(script: Vec<PodStep>) -> Self {
        assert!(!script.is_empty(), "pod script must have at least one step");
        Self {
            state: Mutex::new(State::default()),
            script,
            logs: b"Ran 3 of 3 Specs\nSUCCESS!".to_vec(),
            archive: Vec::new(),
            replacement_pod: false,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_logs(mut self, logs: impl Into<Vec<u8>>) -> Self {
        self.logs = logs.into();
        self
    }

    pub fn with_archive(mut self, archive: Vec<u8>) -> Self {
        self.archive = archive;
        self
    }

    /// List a newer `<job>-retry` pod ahead of the first `<job>-pod`.
    pub fn with_replacement_pod(mut self) -> Self {
        self.replacement_pod = true;
        self
    }

    /// Fail every call at `point`.
    pub fn failing(self, point: FailPoint) -> Self {
        self.failing_times(point, usize::MAX)
    }

    /// Fail the next `times` calls at `point`.
    pub fn failing_times(self, point: FailPoint, times: usize) -> Self {
        self.state.lock().unwrap().failures.insert(point, times);
        self
    }

    pub fn namespace_exists(&self, name: &str) -> bool {
        self.state.lock().unwrap().namespaces.contains_key(name)
    }

    pub fn live_namespaces(&self) -> BTreeSet<String> {
        self.state.lock().unwrap().namespaces.keys().cloned().collect()
    }

    pub fn deleted_namespaces(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted_namespaces.clone()
    }

    pub fn service_accounts(&self) -> Vec<ServiceAccount> {
        self.state.lock().unwrap().service_accounts.clone()
    }

    pub fn bindings(&self) -> Vec<ClusterRoleBinding> {
        self.state.lock().unwrap().bindings.clone()
    }

    pub fn secrets(&self) -> Vec<Secret> {
        self.state.lock().unwrap().secrets.clone()
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.state.lock().unwrap().jobs.clone()
    }

    /// Creation/deletion calls in the order they reached the cluster.
    pub fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn list_calls(&self, job_name: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .list_calls
            .get(job_name)
            .copied()
            .unwrap_or(0)
    }

    pub fn exec_calls(&self) -> Vec<ExecCall> {
        self.state.lock().unwrap().exec_calls.clone()
    }

    fn check(&self, point: FailPoint) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match state.failures.get_mut(&point) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(ExecutorError::Cluster(format!("injected {:?} failure", point)))
            }
            _ => Ok(()),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn pods_for(&self, namespace: &str, job_name: &str, step: &PodStep) -> Vec<Pod> {
        let Some(first) = self.pod_for(namespace, job_name, step) else {
            return Vec::new();
        };
        if !self.replacement_pod {
            return vec![first];
        }

        let mut replacement = first.clone();
        replacement.metadata.name = Some(format!("{}-retry", job_name));
        replacement.metadata.creation_timestamp =
            Some(Time(Utc.timestamp_opt(1_700_000_100, 0).unwrap()));
        vec![replacement, first]
    }

    fn pod_for(&self, namespace: &str, job_name: &str, step: &PodStep) -> Option<Pod> {
        let workload_state = match step {
            PodStep::NoPod => return None,
            PodStep::Waiting(reason) => ContainerState {
                waiting: Some(ContainerStateWaiting {
                    reason: Some(reason.to_string()),
                    message: None,
                }),
                ..Default::default()
            },
            PodStep::Running => running(),
            PodStep::Terminated(code) => ContainerState {
                terminated: Some(ContainerStateTerminated {
                    exit_code: *code,
                    reason: Some(if *code == 0 { "Completed" } else { "Error" }.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        };

        Some(Pod {
            metadata: ObjectMeta {
                name: Some(format!("{}-pod", job_name)),
                namespace: Some(namespace.to_string()),
                creation_timestamp: Some(Time(Utc.timestamp_opt(1_700_000_000, 0).unwrap())),
                labels: Some(BTreeMap::from([(
                    JOB_NAME_LABEL.to_string(),
                    job_name.to_string(),
                )])),
                ..Default::default()
            },
            status: Some(PodStatus {
                container_statuses: Some(vec![
                    ContainerStatus {
                        name: WORKLOAD_CONTAINER.to_string(),
                        state: Some(workload_state),
                        ..Default::default()
                    },
                    ContainerStatus {
                        name: SIDECAR_CONTAINER.to_string(),
                        state: Some(running()),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}

fn running() -> ContainerState {
    ContainerState {
        running: Some(ContainerStateRunning::default()),
        ..Default::default()
    }
}

fn generated_name(meta: &ObjectMeta, id: u64) -> String {
    match (&meta.name, &meta.generate_name) {
        (Some(name), _) => name.clone(),
        (None, Some(prefix)) => format!("{}{:05}", prefix, id),
        (None, None) => format!("object-{}", id),
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace> {
        self.check(FailPoint::CreateNamespace)?;
        let id = self.next_id();
        let mut created = namespace.clone();
        let name = generated_name(&created.metadata, id);
        created.metadata.name = Some(name.clone());
        created.metadata.uid = Some(format!("uid-{}", id));

        let mut state = self.state.lock().unwrap();
        if state.namespaces.contains_key(&name) {
            return Err(ExecutorError::Cluster(format!(
                "namespaces \"{}\" already exists",
                name
            )));
        }
        state.events.push(format!("namespace:{}", name));
        state.namespaces.insert(name, created.clone());
        Ok(created)
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        Ok(self.state.lock().unwrap().namespaces.get(name).cloned())
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        self.check(FailPoint::DeleteNamespace)?;
        let mut state = self.state.lock().unwrap();
        if state.namespaces.remove(name).is_some() {
            state.events.push(format!("delete:{}", name));
            state.deleted_namespaces.push(name.to_string());
        }
        Ok(())
    }

    async fn create_service_account(
        &self,
        namespace: &str,
        service_account: &ServiceAccount,
    ) -> Result<ServiceAccount> {
        self.check(FailPoint::CreateServiceAccount)?;
        let mut created = service_account.clone();
        created.metadata.namespace = Some(namespace.to_string());
        created.metadata.uid = Some(format!("uid-{}", self.next_id()));

        let mut state = self.state.lock().unwrap();
        state.events.push("serviceaccount".to_string());
        state.service_accounts.push(created.clone());
        Ok(created)
    }

    async fn create_cluster_role_binding(
        &self,
        binding: &ClusterRoleBinding,
    ) -> Result<ClusterRoleBinding> {
        self.check(FailPoint::CreateClusterRoleBinding)?;
        let mut created = binding.clone();
        created.metadata.name = Some(generated_name(&binding.metadata, self.next_id()));

        let mut state = self.state.lock().unwrap();
        state.events.push("clusterrolebinding".to_string());
        state.bindings.push(created.clone());
        Ok(created)
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret> {
        self.check(FailPoint::CreateSecret)?;
        let mut created = secret.clone();
        created.metadata.namespace = Some(namespace.to_string());

        let mut state = self.state.lock().unwrap();
        state.events.push(format!(
            "secret:{}",
            created.metadata.name.clone().unwrap_or_default()
        ));
        state.secrets.push(created.clone());
        Ok(created)
    }

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job> {
        self.check(FailPoint::CreateJob)?;
        let mut created = job.clone();
        let name = generated_name(&job.metadata, self.next_id());
        created.metadata.name = Some(name.clone());
        created.metadata.namespace = Some(namespace.to_string());

        let mut state = self.state.lock().unwrap();
        state.events.push(format!("job:{}", name));
        state.jobs.push(created.clone());
        Ok(created)
    }

    async fn list_job_pods(&self, namespace: &str, job_name: &str) -> Result<Vec<Pod>> {
        let step = {
            let mut state = self.state.lock().unwrap();
            let calls = state.list_calls.entry(job_name.to_string()).or_insert(0);
            let index = (*calls).min(self.script.len() - 1);
            *calls += 1;
            self.script[index].clone()
        };
        self.check(FailPoint::ListPods)?;
        Ok(self.pods_for(namespace, job_name, &step))
    }

    async fn log_stream(
        &self,
        _namespace: &str,
        _pod: &str,
        _container: &str,
    ) -> Result<LogStream> {
        self.check(FailPoint::LogStream)?;
        Ok(Box::pin(futures::io::Cursor::new(self.logs.clone())))
    }

    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: Vec<String>,
    ) -> Result<ExecOutput> {
        self.state.lock().unwrap().exec_calls.push(ExecCall {
            namespace: namespace.to_string(),
            pod: pod.to_string(),
            container: container.to_string(),
            command,
        });
        self.check(FailPoint::Exec)?;
        Ok(ExecOutput {
            stdout: self.archive.clone(),
            stderr: Vec::new(),
        })
    }
}
