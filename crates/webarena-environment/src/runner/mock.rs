// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock runtime for testing.
//!
//! A simple runtime implementation that tracks workloads in memory
//! without actually running containers.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use super::traits::*;

/// Mock workload state.
#[derive(Debug, Clone)]
pub struct MockWorkload {
    /// Workload identifier.
    pub workload_id: String,
    /// Spec the workload was launched with.
    pub spec: LaunchSpec,
    /// Whether the workload is running.
    pub running: bool,
}

/// Mock runtime for testing.
pub struct MockRuntime {
    workloads: Mutex<HashMap<String, MockWorkload>>,
    exec_script: Mutex<VecDeque<ExecOutput>>,
    exec_log: Mutex<Vec<(String, Vec<String>)>>,
    failing_removals: Mutex<HashSet<String>>,
    next_id: AtomicU64,
    launches: AtomicU64,
    /// If true, every launch fails.
    pub fail_launch: bool,
    /// If true, listing workloads fails.
    pub fail_list: bool,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRuntime {
    /// Create a new mock runtime.
    pub fn new() -> Self {
        Self {
            workloads: Mutex::new(HashMap::new()),
            exec_script: Mutex::new(VecDeque::new()),
            exec_log: Mutex::new(Vec::new()),
            failing_removals: Mutex::new(HashSet::new()),
            next_id: AtomicU64::new(1),
            launches: AtomicU64::new(0),
            fail_launch: false,
            fail_list: false,
        }
    }

    /// Create a mock runtime whose launches always fail.
    pub fn failing() -> Self {
        Self {
            fail_launch: true,
            ..Self::new()
        }
    }

    /// Queue the result of the next exec call.
    ///
    /// Once the queue is empty, exec calls succeed with empty output.
    pub async fn push_exec_result(&self, result: ExecOutput) {
        self.exec_script.lock().await.push_back(result);
    }

    /// Make `remove` fail for one workload.
    pub async fn fail_removal_of(&self, workload_id: &str) {
        self.failing_removals
            .lock()
            .await
            .insert(workload_id.to_string());
    }

    /// Register a workload that was not launched through this runtime,
    /// e.g. one left over from a previous control-plane process.
    pub async fn insert_external(
        &self,
        labels: HashMap<String, String>,
        host_port: Option<u16>,
    ) -> String {
        let workload_id = self.allocate_id();
        let spec = LaunchSpec {
            name: workload_id.clone(),
            image: "external".to_string(),
            host_port: host_port.unwrap_or(0),
            internal_port: 80,
            command: None,
            labels,
            memory_limit_bytes: None,
        };
        self.workloads.lock().await.insert(
            workload_id.clone(),
            MockWorkload {
                workload_id: workload_id.clone(),
                spec,
                running: true,
            },
        );
        workload_id
    }

    /// Snapshot of a workload.
    pub async fn workload(&self, workload_id: &str) -> Option<MockWorkload> {
        self.workloads.lock().await.get(workload_id).cloned()
    }

    /// Number of workloads that still exist (running or stopped).
    pub async fn workload_count(&self) -> usize {
        self.workloads.lock().await.len()
    }

    /// Number of successful launches.
    pub fn launch_count(&self) -> u64 {
        self.launches.load(Ordering::SeqCst)
    }

    /// Every exec call made so far, as `(workload_id, command)`.
    pub async fn exec_calls(&self) -> Vec<(String, Vec<String>)> {
        self.exec_log.lock().await.clone()
    }

    fn allocate_id(&self) -> String {
        format!("mock_{:08x}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl WorkloadRuntime for MockRuntime {
    fn runtime_type(&self) -> &'static str {
        "mock"
    }

    async fn launch(&self, spec: &LaunchSpec) -> Result<String> {
        if self.fail_launch {
            return Err(RuntimeError::LaunchFailed("Mock launch failure".to_string()));
        }

        let mut workloads = self.workloads.lock().await;
        if workloads.values().any(|w| w.spec.name == spec.name) {
            return Err(RuntimeError::LaunchFailed(format!(
                "Conflict. The container name \"/{}\" is already in use",
                spec.name
            )));
        }

        let workload_id = self.allocate_id();
        workloads.insert(
            workload_id.clone(),
            MockWorkload {
                workload_id: workload_id.clone(),
                spec: spec.clone(),
                running: true,
            },
        );
        self.launches.fetch_add(1, Ordering::SeqCst);

        Ok(workload_id)
    }

    async fn stop(&self, workload_id: &str, _timeout: Duration) -> Result<()> {
        if let Some(workload) = self.workloads.lock().await.get_mut(workload_id) {
            workload.running = false;
        }
        Ok(())
    }

    async fn remove(&self, workload_id: &str) -> Result<()> {
        if self.failing_removals.lock().await.contains(workload_id) {
            return Err(RuntimeError::Other(format!(
                "Mock removal failure for {}",
                workload_id
            )));
        }
        self.workloads.lock().await.remove(workload_id);
        Ok(())
    }

    async fn exec(&self, workload_id: &str, command: &[String]) -> Result<ExecOutput> {
        let running = self
            .workloads
            .lock()
            .await
            .get(workload_id)
            .map(|w| w.running);
        match running {
            Some(true) => {}
            Some(false) => {
                return Err(RuntimeError::Exec(format!(
                    "container {} is not running",
                    workload_id
                )));
            }
            None => return Err(RuntimeError::NotFound(workload_id.to_string())),
        }

        self.exec_log
            .lock()
            .await
            .push((workload_id.to_string(), command.to_vec()));

        Ok(self
            .exec_script
            .lock()
            .await
            .pop_front()
            .unwrap_or_default())
    }

    async fn list(&self, label: &str, value: &str) -> Result<Vec<WorkloadSummary>> {
        if self.fail_list {
            return Err(RuntimeError::Other("Mock list failure".to_string()));
        }

        let workloads = self.workloads.lock().await;
        let mut summaries: Vec<WorkloadSummary> = workloads
            .values()
            .filter(|w| w.spec.labels.get(label).map(String::as_str) == Some(value))
            .map(|w| WorkloadSummary {
                workload_id: w.workload_id.clone(),
                labels: w.spec.labels.clone(),
                published_ports: if w.spec.host_port == 0 {
                    Vec::new()
                } else {
                    vec![w.spec.host_port]
                },
            })
            .collect();
        summaries.sort_by(|a, b| a.workload_id.cmp(&b.workload_id));
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_spec(name: &str) -> LaunchSpec {
        LaunchSpec {
            name: name.to_string(),
            image: "shopping_final_0712".to_string(),
            host_port: 30001,
            internal_port: 80,
            command: None,
            labels: HashMap::from([("webarena.managed".to_string(), "true".to_string())]),
            memory_limit_bytes: None,
        }
    }

    #[tokio::test]
    async fn test_mock_runtime_launch_and_remove() {
        let runtime = MockRuntime::new();

        let id = runtime.launch(&test_spec("env_1-shopping")).await.unwrap();
        assert!(runtime.workload(&id).await.unwrap().running);
        assert_eq!(runtime.launch_count(), 1);

        runtime.stop(&id, Duration::from_secs(1)).await.unwrap();
        assert!(!runtime.workload(&id).await.unwrap().running);

        runtime.remove(&id).await.unwrap();
        assert!(runtime.workload(&id).await.is_none());
    }

    #[tokio::test]
    async fn test_mock_runtime_failing() {
        let runtime = MockRuntime::failing();

        let result = runtime.launch(&test_spec("env_1-shopping")).await;

        assert!(matches!(result, Err(RuntimeError::LaunchFailed(_))));
        assert_eq!(runtime.workload_count().await, 0);
    }

    #[tokio::test]
    async fn test_mock_runtime_name_conflict() {
        let runtime = MockRuntime::new();
        runtime.launch(&test_spec("env_1-shopping")).await.unwrap();

        let result = runtime.launch(&test_spec("env_1-shopping")).await;

        assert!(matches!(result, Err(RuntimeError::LaunchFailed(msg)) if msg.contains("already in use")));
    }

    #[tokio::test]
    async fn test_mock_runtime_absent_is_not_an_error() {
        let runtime = MockRuntime::new();

        runtime
            .stop("missing", Duration::from_secs(1))
            .await
            .unwrap();
        runtime.remove("missing").await.unwrap();
    }

    #[tokio::test]
    async fn test_mock_runtime_exec_script() {
        let runtime = MockRuntime::new();
        let id = runtime.launch(&test_spec("env_1-shopping")).await.unwrap();
        runtime
            .push_exec_result(ExecOutput::failed(1, "boom"))
            .await;

        let cmd = vec!["true".to_string()];
        let first = runtime.exec(&id, &cmd).await.unwrap();
        let second = runtime.exec(&id, &cmd).await.unwrap();

        assert!(!first.success());
        assert_eq!(first.output, "boom");
        assert!(second.success());
        assert_eq!(runtime.exec_calls().await.len(), 2);
    }

    #[tokio::test]
    async fn test_mock_runtime_exec_on_missing_workload() {
        let runtime = MockRuntime::new();

        let result = runtime.exec("missing", &["true".to_string()]).await;

        assert!(matches!(result, Err(ref e) if e.is_not_found()));
    }

    #[tokio::test]
    async fn test_mock_runtime_list_filters_by_label() {
        let runtime = MockRuntime::new();
        runtime.launch(&test_spec("env_1-shopping")).await.unwrap();
        runtime
            .insert_external(
                HashMap::from([("other".to_string(), "x".to_string())]),
                Some(30002),
            )
            .await;

        let listed = runtime.list("webarena.managed", "true").await.unwrap();

        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].published_ports, vec![30001]);
    }
}
