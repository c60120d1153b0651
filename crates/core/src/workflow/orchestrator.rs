use super::dag::DependencyGraph;
use super::definition::WorkflowDefinition;
use super::executable::{ExecutableRef, ExecutableRegistry};
use super::model::{Operator, Workflow};
use crate::cache::{CacheStats, RecencyCache};
use crate::codec::Codec;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, ValidationError};
use crate::storage::{EntityStore, Namespace};
use crate::types::{Dependency, OperatorId, OperatorResult, Payload, RunId, WorkflowId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Registers workflows and executes them in dependency order
///
/// Workflows and operators are read cache-aside: the recency cache is
/// consulted first and the durable store is the source of truth on a miss.
pub struct Orchestrator {
    store: Arc<dyn EntityStore>,
    codec: Codec,
    cache: Mutex<RecencyCache>,
    executables: ExecutableRegistry,
    operator_timeout: Option<Duration>,
    evict_on_register: bool,
}

impl Orchestrator {
    /// Prepare the store namespaces and create a cache of `cache_capacity` bytes
    pub async fn init(store: Arc<dyn EntityStore>, cache_capacity: usize) -> EngineResult<Self> {
        store.init().await?;

        tracing::info!(cache_capacity, "Orchestrator initialized");

        Ok(Self {
            store,
            codec: Codec::default(),
            cache: Mutex::new(RecencyCache::new(cache_capacity)),
            executables: ExecutableRegistry::new(),
            operator_timeout: None,
            evict_on_register: false,
        })
    }

    /// Build an orchestrator over the store described by `config`
    pub async fn from_config(config: &EngineConfig) -> EngineResult<Self> {
        let store = config.open_store()?;
        Ok(Self::init(store, config.cache_capacity_bytes)
            .await?
            .with_codec(config.codec)
            .with_operator_timeout(config.operator_timeout())
            .with_evict_on_register(config.evict_on_register))
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_operator_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.operator_timeout = timeout;
        self
    }

    pub fn with_evict_on_register(mut self, evict: bool) -> Self {
        self.evict_on_register = evict;
        self
    }

    pub fn with_executables(mut self, executables: ExecutableRegistry) -> Self {
        self.executables = executables;
        self
    }

    /// Named code available to `ExecutableRef::Registered` operators
    pub fn executables(&self) -> &ExecutableRegistry {
        &self.executables
    }

    /// Register a workflow, overwriting any previous one with the same id
    ///
    /// Vertex ids follow the iteration order of `operators`. Every dependency
    /// is validated before anything is written.
    pub async fn register_workflow<I, K, D>(
        &self,
        workflow_id: impl Into<WorkflowId>,
        operators: I,
        dependencies: impl IntoIterator<Item = D>,
    ) -> EngineResult<()>
    where
        I: IntoIterator<Item = (K, ExecutableRef)>,
        K: Into<OperatorId>,
        D: Into<Dependency>,
    {
        let workflow_id = workflow_id.into();
        if workflow_id.as_str().is_empty() {
            return Err(ValidationError::EmptyId.into());
        }
        self.check_storable(Namespace::Workflow, workflow_id.as_str())?;

        let mut records = Vec::new();
        let mut vertices: HashMap<OperatorId, usize> = HashMap::new();
        for (id, executable) in operators {
            let id = id.into();
            if id.as_str().is_empty() {
                return Err(ValidationError::EmptyId.into());
            }
            if vertices.insert(id.clone(), records.len()).is_some() {
                return Err(ValidationError::DuplicateOperator(id).into());
            }
            self.check_storable(Namespace::Operator, id.as_str())?;
            records.push(Operator::new(id, executable));
        }

        let mut edges = Vec::new();
        for dependency in dependencies {
            let Dependency {
                upstream,
                downstream,
            } = dependency.into();
            let missing = if !vertices.contains_key(&upstream) {
                Some(upstream.clone())
            } else if !vertices.contains_key(&downstream) {
                Some(downstream.clone())
            } else {
                None
            };
            match missing {
                Some(missing) => {
                    return Err(ValidationError::UnknownOperator {
                        upstream,
                        downstream,
                        missing,
                    }
                    .into())
                }
                None => edges.push((vertices[&upstream], vertices[&downstream])),
            }
        }

        let mut graph = DependencyGraph::new(records.len());
        for (from, to) in edges {
            graph.add_edge(from, to)?;
        }

        let operator_index = records.iter().map(|op| op.id.clone()).collect();
        let workflow = Workflow::new(workflow_id.clone(), operator_index, graph);

        // Encode everything up front so a codec failure writes nothing
        let workflow_bytes = self.codec.encode(&workflow)?;
        let operator_bytes = records
            .iter()
            .map(|op| -> EngineResult<_> { Ok((op.id.as_str(), self.codec.encode(op)?)) })
            .collect::<EngineResult<Vec<_>>>()?;

        self.store
            .put(Namespace::Workflow, workflow_id.as_str(), workflow_bytes)
            .await?;
        for (id, bytes) in operator_bytes {
            self.store.put(Namespace::Operator, id, bytes).await?;
        }

        if self.evict_on_register {
            let mut cache = self.cache.lock().await;
            cache.invalidate(&cache_key(Namespace::Workflow, workflow_id.as_str()));
            for op in &records {
                cache.invalidate(&cache_key(Namespace::Operator, op.id.as_str()));
            }
        }

        tracing::info!(
            workflow_id = %workflow_id,
            operators = records.len(),
            edges = workflow.graph.edge_count(),
            "Registered workflow"
        );

        Ok(())
    }

    fn check_storable(&self, namespace: Namespace, id: &str) -> EngineResult<()> {
        self.store.validate_id(namespace, id).map_err(|e| {
            ValidationError::UnstorableId {
                namespace,
                id: id.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Register a workflow read from a definition file
    pub async fn register_definition(&self, definition: &WorkflowDefinition) -> EngineResult<()> {
        self.register_workflow(
            definition.id.clone(),
            definition.operator_entries(),
            definition.dependency_list(),
        )
        .await
    }

    /// Execute a workflow and return the results of its sink operators
    pub async fn execute_workflow(
        &self,
        workflow_id: impl Into<WorkflowId>,
    ) -> EngineResult<Vec<OperatorResult>> {
        self.run(workflow_id.into(), None).await
    }

    /// Execute a workflow, aborting with `Cancelled` once `token` fires
    pub async fn execute_workflow_with_cancellation(
        &self,
        workflow_id: impl Into<WorkflowId>,
        token: CancellationToken,
    ) -> EngineResult<Vec<OperatorResult>> {
        self.run(workflow_id.into(), Some(&token)).await
    }

    /// Load a workflow record through the cache
    pub async fn load_workflow(
        &self,
        workflow_id: impl Into<WorkflowId>,
    ) -> EngineResult<Workflow> {
        let workflow_id = workflow_id.into();
        self.load_entity(Namespace::Workflow, workflow_id.as_str())
            .await
    }

    /// Empty the cache and restore its full capacity
    pub async fn flush_cache(&self) {
        self.cache.lock().await.flush();
        tracing::info!("Cache flushed");
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.lock().await.stats()
    }

    pub async fn cache_remaining_capacity(&self) -> usize {
        self.cache.lock().await.remaining_capacity()
    }

    async fn run(
        &self,
        workflow_id: WorkflowId,
        cancel: Option<&CancellationToken>,
    ) -> EngineResult<Vec<OperatorResult>> {
        let run_id = RunId::new();
        let span = tracing::info_span!("execute_workflow", %run_id, workflow_id = %workflow_id);

        async move {
            let started = std::time::Instant::now();
            let result = self.run_inner(&workflow_id, cancel).await;
            match &result {
                Ok(sinks) => tracing::info!(
                    sinks = sinks.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Workflow execution completed"
                ),
                Err(e) => tracing::error!(error = %e, "Workflow execution failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run_inner(
        &self,
        workflow_id: &WorkflowId,
        cancel: Option<&CancellationToken>,
    ) -> EngineResult<Vec<OperatorResult>> {
        let workflow: Workflow = self
            .load_entity(Namespace::Workflow, workflow_id.as_str())
            .await?;
        let graph = &workflow.graph;
        let order = graph.topological_order()?;

        // Results still needed by downstream operators, keyed by vertex
        let mut executed: HashMap<usize, OperatorResult> = HashMap::new();
        let mut sinks = Vec::new();

        for vertex in order {
            if cancel.is_some_and(|token| token.is_cancelled()) {
                tracing::warn!("Workflow execution cancelled");
                return Err(EngineError::Cancelled {
                    workflow_id: workflow_id.clone(),
                });
            }

            let operator_id = workflow.operator_at(vertex).ok_or_else(|| {
                EngineError::Internal(format!("vertex {} has no operator in the index", vertex))
            })?;
            let operator: Operator = self
                .load_entity(Namespace::Operator, operator_id.as_str())
                .await?;

            let inputs = graph
                .dependencies(vertex)
                .into_iter()
                .map(|dep| {
                    executed.get(&dep).cloned().ok_or_else(|| {
                        EngineError::Internal(format!(
                            "result of vertex {} missing before vertex {}",
                            dep, vertex
                        ))
                    })
                })
                .collect::<EngineResult<Vec<_>>>()?;

            tracing::debug!(
                operator_id = %operator.id,
                vertex,
                inputs = inputs.len(),
                "Executing operator"
            );
            let result = self.invoke(workflow_id, &operator, &inputs, cancel).await?;

            if graph.out_degree(vertex) == 0 {
                sinks.push(result);
            } else {
                executed.insert(vertex, result);
            }
        }

        Ok(sinks)
    }

    async fn invoke(
        &self,
        workflow_id: &WorkflowId,
        operator: &Operator,
        inputs: &[OperatorResult],
        cancel: Option<&CancellationToken>,
    ) -> EngineResult<OperatorResult> {
        let bounded = async {
            match self.operator_timeout {
                Some(timeout) => {
                    match tokio::time::timeout(timeout, self.call(operator, inputs)).await {
                        Ok(result) => result,
                        Err(_) => {
                            tracing::warn!(
                                operator_id = %operator.id,
                                ?timeout,
                                "Operator timed out"
                            );
                            Err(EngineError::Timeout {
                                operator_id: operator.id.clone(),
                                timeout,
                            })
                        }
                    }
                }
                None => self.call(operator, inputs).await,
            }
        };

        let payload = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::warn!(operator_id = %operator.id, "Operator cancelled");
                    return Err(EngineError::Cancelled {
                        workflow_id: workflow_id.clone(),
                    });
                }
                result = bounded => result?,
            },
            None => bounded.await?,
        };

        Ok(OperatorResult::new(operator.id.clone(), payload))
    }

    async fn call(&self, operator: &Operator, inputs: &[OperatorResult]) -> EngineResult<Payload> {
        match &operator.executable {
            ExecutableRef::Registered { name } => {
                let executable =
                    self.executables
                        .get(name)
                        .ok_or_else(|| EngineError::UnknownExecutable {
                            operator_id: operator.id.clone(),
                            name: name.clone(),
                        })?;
                executable
                    .call(inputs)
                    .await
                    .map_err(|source| EngineError::Execution {
                        operator_id: operator.id.clone(),
                        source,
                    })
            }
            ExecutableRef::Expression { expr } => {
                expr.evaluate(inputs)
                    .map_err(|e| EngineError::Execution {
                        operator_id: operator.id.clone(),
                        source: Box::new(e),
                    })
            }
        }
    }

    /// Cache-aside read: hit → decode and refresh recency; miss → store, then cache
    async fn load_entity<T>(&self, namespace: Namespace, id: &str) -> EngineResult<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let key = cache_key(namespace, id);

        let cached = self.cache.lock().await.find(&key);
        if let Some(bytes) = cached {
            let entity = self.codec.decode(&bytes)?;
            self.cache.lock().await.update(&key);
            tracing::debug!(%namespace, id, "Cache hit");
            return Ok(entity);
        }

        tracing::debug!(%namespace, id, "Cache miss");
        let bytes = self
            .store
            .get(namespace, id)
            .await?
            .ok_or_else(|| EngineError::not_found(namespace, id))?;
        let entity: T = self.codec.decode(&bytes)?;

        let encoded = self.codec.encode(&entity)?;
        self.cache.lock().await.add(&key, encoded);

        Ok(entity)
    }
}

/// Workflows and operators share one cache; the namespace keeps their ids apart
fn cache_key(namespace: Namespace, id: &str) -> String {
    format!("{}:{}", namespace, id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::storage::{FilesystemEntityStore, MemoryEntityStore};
    use crate::workflow::executable::{Executable, Expr};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn sum(inputs: &[OperatorResult]) -> Result<Payload, BoxError> {
        let mut total = 0;
        for input in inputs {
            total += input.payload.as_i64().ok_or("payload is not an integer")?;
        }
        Ok(json!(total))
    }

    fn no_operators() -> Vec<(&'static str, ExecutableRef)> {
        Vec::new()
    }

    fn no_dependencies() -> Vec<Dependency> {
        Vec::new()
    }

    async fn orchestrator(capacity: usize) -> (Orchestrator, Arc<MemoryEntityStore>) {
        let store = Arc::new(MemoryEntityStore::new());
        let orchestrator = Orchestrator::init(store.clone(), capacity).await.unwrap();
        (orchestrator, store)
    }

    fn payloads(results: &[OperatorResult]) -> Vec<Payload> {
        results.iter().map(|r| r.payload.clone()).collect()
    }

    #[tokio::test]
    async fn test_fan_in_workflow() {
        let (orch, _) = orchestrator(16 * 1024).await;
        orch.executables().register_fn("one", |_: &[OperatorResult]| Ok(json!(1)));
        orch.executables().register_fn("two", |_: &[OperatorResult]| Ok(json!(2)));
        orch.executables().register_fn("sum", sum);

        orch.register_workflow(
            "wf001",
            [
                ("a", ExecutableRef::registered("one")),
                ("b", ExecutableRef::registered("two")),
                ("c", ExecutableRef::registered("sum")),
            ],
            [("a", "c"), ("b", "c")],
        )
        .await
        .unwrap();

        let results = orch.execute_workflow("wf001").await.unwrap();
        assert_eq!(results, vec![OperatorResult::new("c", json!(3))]);
    }

    #[tokio::test]
    async fn test_diamond_with_fan_in() {
        let (orch, _) = orchestrator(16 * 1024).await;
        let c = |v: i64| ExecutableRef::expression(Expr::Const(json!(v)));
        let sum = || ExecutableRef::expression(Expr::SumInputs);

        orch.register_workflow(
            "wf002",
            [
                ("p", c(1)),
                ("q", c(2)),
                ("r", sum()),
                ("s", sum()),
                ("t", sum()),
                ("u", sum()),
                ("v", sum()),
            ],
            [
                ("p", "r"),
                ("q", "r"),
                ("r", "s"),
                ("q", "s"),
                ("s", "t"),
                ("p", "t"),
                ("t", "u"),
                ("r", "u"),
                ("q", "v"),
                ("s", "v"),
                ("t", "v"),
            ],
        )
        .await
        .unwrap();

        let results = orch.execute_workflow("wf002").await.unwrap();
        assert_eq!(results.len(), 2);
        let mut by_id: Vec<_> = results
            .iter()
            .map(|r| (r.operator_id.as_str(), r.payload.clone()))
            .collect();
        by_id.sort_by(|a, b| a.0.cmp(b.0));
        assert_eq!(by_id, vec![("u", json!(9)), ("v", json!(13))]);
    }

    #[tokio::test]
    async fn test_single_operator() {
        let (orch, _) = orchestrator(16 * 1024).await;
        orch.register_workflow(
            "wf003",
            [("only", ExecutableRef::expression(Expr::Const(json!(1))))],
            no_dependencies(),
        )
        .await
        .unwrap();

        let results = orch.execute_workflow("wf003").await.unwrap();
        assert_eq!(results, vec![OperatorResult::new("only", json!(1))]);
    }

    #[tokio::test]
    async fn test_empty_workflow() {
        let (orch, _) = orchestrator(16 * 1024).await;
        orch.register_workflow("wf004", no_operators(), no_dependencies())
            .await
            .unwrap();

        assert!(orch.execute_workflow("wf004").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_dependency_persists_nothing() {
        let (orch, store) = orchestrator(16 * 1024).await;
        let err = orch
            .register_workflow(
                "wf005",
                [
                    ("a", ExecutableRef::expression(Expr::Const(json!(1)))),
                    ("b", ExecutableRef::expression(Expr::SumInputs)),
                ],
                [("a", "b"), ("ghost", "b")],
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::UnknownOperator { ref missing, .. })
                if missing.as_str() == "ghost"
        ));
        assert_eq!(store.count(Namespace::Workflow).await, 0);
        assert_eq!(store.count(Namespace::Operator).await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_and_empty_ids_rejected() {
        let (orch, store) = orchestrator(16 * 1024).await;
        let one = || ExecutableRef::expression(Expr::Const(json!(1)));

        let err = orch
            .register_workflow("wf", [("a", one()), ("a", one())], no_dependencies())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::DuplicateOperator(_))
        ));

        let err = orch
            .register_workflow("", [("a", one())], no_dependencies())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(ValidationError::EmptyId)));
        assert_eq!(store.count(Namespace::Operator).await, 0);
    }

    #[tokio::test]
    async fn test_unstorable_operator_id_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(FilesystemEntityStore::new(temp_dir.path().to_path_buf()).unwrap());
        let orch = Orchestrator::init(store.clone(), 16 * 1024).await.unwrap();

        let err = orch
            .register_workflow(
                "wf",
                [
                    ("a", ExecutableRef::expression(Expr::Const(json!(1)))),
                    ("b/c", ExecutableRef::expression(Expr::SumInputs)),
                ],
                [("a", "b/c")],
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::UnstorableId {
                namespace: Namespace::Operator,
                ref id,
                ..
            }) if id == "b/c"
        ));
        assert!(!store.exists(Namespace::Workflow, "wf").await.unwrap());
        assert!(!store.exists(Namespace::Operator, "a").await.unwrap());

        let err = orch.execute_workflow("wf").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_unstorable_workflow_id_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(FilesystemEntityStore::new(temp_dir.path().to_path_buf()).unwrap());
        let orch = Orchestrator::init(store.clone(), 16 * 1024).await.unwrap();

        let err = orch
            .register_workflow(
                ".hidden",
                [("a", ExecutableRef::expression(Expr::Const(json!(1))))],
                no_dependencies(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::UnstorableId {
                namespace: Namespace::Workflow,
                ..
            })
        ));
        assert!(!store.exists(Namespace::Operator, "a").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_workflow_is_not_found() {
        let (orch, _) = orchestrator(16 * 1024).await;
        let err = orch.execute_workflow("nope").await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::NotFound {
                namespace: Namespace::Workflow,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_missing_operator_is_not_found() {
        let (source, source_store) = orchestrator(16 * 1024).await;
        source
            .register_workflow(
                "wf",
                [("a", ExecutableRef::expression(Expr::Const(json!(1))))],
                no_dependencies(),
            )
            .await
            .unwrap();

        // Copy only the workflow record into a fresh store
        let (orch, store) = orchestrator(16 * 1024).await;
        let bytes = source_store
            .get(Namespace::Workflow, "wf")
            .await
            .unwrap()
            .unwrap();
        store.put(Namespace::Workflow, "wf", bytes).await.unwrap();

        let err = orch.execute_workflow("wf").await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::NotFound {
                namespace: Namespace::Operator,
                ref id,
            } if id == "a"
        ));
    }

    #[tokio::test]
    async fn test_cycle_fails_before_any_operator_runs() {
        let (orch, _) = orchestrator(16 * 1024).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        orch.executables()
            .register_fn("count", move |_: &[OperatorResult]| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!(0))
            });

        orch.register_workflow(
            "cyclic",
            [
                ("root", ExecutableRef::registered("count")),
                ("x", ExecutableRef::registered("count")),
                ("y", ExecutableRef::registered("count")),
            ],
            [("root", "x"), ("x", "y"), ("y", "x")],
        )
        .await
        .unwrap();

        let err = orch.execute_workflow("cyclic").await.unwrap_err();
        assert!(err.is_cycle());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_operator_failure_aborts_run() {
        let (orch, _) = orchestrator(16 * 1024).await;
        let downstream_calls = Arc::new(AtomicUsize::new(0));
        let counter = downstream_calls.clone();
        orch.executables()
            .register_fn("boom", |_: &[OperatorResult]| Err("boom".into()));
        orch.executables()
            .register_fn("after", move |_: &[OperatorResult]| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!(0))
            });

        orch.register_workflow(
            "failing",
            [
                ("ok", ExecutableRef::expression(Expr::Const(json!(1)))),
                ("bad", ExecutableRef::registered("boom")),
                ("after", ExecutableRef::registered("after")),
            ],
            [("bad", "after")],
        )
        .await
        .unwrap();

        let err = orch.execute_workflow("failing").await.unwrap_err();
        match err {
            EngineError::Execution { operator_id, source } => {
                assert_eq!(operator_id.as_str(), "bad");
                assert_eq!(source.to_string(), "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(downstream_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expression_error_is_execution_error() {
        let (orch, _) = orchestrator(16 * 1024).await;
        orch.register_workflow(
            "wf",
            [("a", ExecutableRef::expression(Expr::Input(0)))],
            no_dependencies(),
        )
        .await
        .unwrap();

        let err = orch.execute_workflow("wf").await.unwrap_err();
        assert!(matches!(err, EngineError::Execution { .. }));
    }

    #[tokio::test]
    async fn test_unknown_executable() {
        let (orch, _) = orchestrator(16 * 1024).await;
        orch.register_workflow(
            "wf",
            [("a", ExecutableRef::registered("never-registered"))],
            no_dependencies(),
        )
        .await
        .unwrap();

        let err = orch.execute_workflow("wf").await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::UnknownExecutable { ref name, .. } if name == "never-registered"
        ));
    }

    #[tokio::test]
    async fn test_inputs_follow_dependency_declaration_order() {
        let (orch, _) = orchestrator(16 * 1024).await;
        let c = |v: i64| ExecutableRef::expression(Expr::Const(json!(v)));
        let minus = Expr::Sub(Box::new(Expr::Input(0)), Box::new(Expr::Input(1)));
        orch.register_workflow(
            "wf",
            [
                ("minus", ExecutableRef::expression(minus)),
                ("ten", c(10)),
                ("three", c(3)),
            ],
            [("ten", "minus"), ("three", "minus")],
        )
        .await
        .unwrap();

        let results = orch.execute_workflow("wf").await.unwrap();
        assert_eq!(payloads(&results), vec![json!(7)]);
    }

    #[tokio::test]
    async fn test_second_run_is_served_from_cache() {
        let (orch, _) = orchestrator(16 * 1024).await;
        orch.register_workflow(
            "wf",
            [
                ("a", ExecutableRef::expression(Expr::Const(json!(4)))),
                ("b", ExecutableRef::expression(Expr::SumInputs)),
            ],
            [("a", "b")],
        )
        .await
        .unwrap();

        orch.execute_workflow("wf").await.unwrap();
        let first = orch.cache_stats().await;
        assert_eq!(first.misses, 3);
        assert_eq!(first.hits, 0);

        let results = orch.execute_workflow("wf").await.unwrap();
        assert_eq!(payloads(&results), vec![json!(4)]);
        let second = orch.cache_stats().await;
        assert_eq!(second.hits, 3);
        assert_eq!(second.misses, 3);

        orch.flush_cache().await;
        assert_eq!(orch.cache_remaining_capacity().await, 16 * 1024);
        orch.execute_workflow("wf").await.unwrap();
        assert_eq!(orch.cache_stats().await.misses, 6);
    }

    #[tokio::test]
    async fn test_tiny_cache_still_executes() {
        let (orch, _) = orchestrator(0).await;
        orch.register_workflow(
            "wf",
            [("a", ExecutableRef::expression(Expr::Const(json!(1))))],
            no_dependencies(),
        )
        .await
        .unwrap();

        for _ in 0..2 {
            let results = orch.execute_workflow("wf").await.unwrap();
            assert_eq!(payloads(&results), vec![json!(1)]);
        }
        let stats = orch.cache_stats().await;
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.rejections, 4);
    }

    #[tokio::test]
    async fn test_reregistration_serves_stale_cache_by_default() {
        let (orch, _) = orchestrator(16 * 1024).await;
        let register = |v: i64| {
            orch.register_workflow(
                "wf",
                [("a", ExecutableRef::expression(Expr::Const(json!(v))))],
                no_dependencies(),
            )
        };

        register(1).await.unwrap();
        assert_eq!(payloads(&orch.execute_workflow("wf").await.unwrap()), vec![json!(1)]);

        register(2).await.unwrap();
        assert_eq!(payloads(&orch.execute_workflow("wf").await.unwrap()), vec![json!(1)]);

        orch.flush_cache().await;
        assert_eq!(payloads(&orch.execute_workflow("wf").await.unwrap()), vec![json!(2)]);
    }

    #[tokio::test]
    async fn test_evict_on_register_drops_stale_entries() {
        let store = Arc::new(MemoryEntityStore::new());
        let orch = Orchestrator::init(store, 16 * 1024)
            .await
            .unwrap()
            .with_evict_on_register(true);

        for v in [1, 2] {
            orch.register_workflow(
                "wf",
                [("a", ExecutableRef::expression(Expr::Const(json!(v))))],
                no_dependencies(),
            )
            .await
            .unwrap();
            let results = orch.execute_workflow("wf").await.unwrap();
            assert_eq!(payloads(&results), vec![json!(v)]);
        }
    }

    struct Sleeper;

    #[async_trait::async_trait]
    impl Executable for Sleeper {
        async fn call(&self, _inputs: &[OperatorResult]) -> Result<Payload, BoxError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(json!(null))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_operator_timeout() {
        let store = Arc::new(MemoryEntityStore::new());
        let orch = Orchestrator::init(store, 16 * 1024)
            .await
            .unwrap()
            .with_operator_timeout(Some(Duration::from_secs(5)));
        orch.executables().register("sleep", Arc::new(Sleeper));

        orch.register_workflow(
            "slow",
            [("nap", ExecutableRef::registered("sleep"))],
            no_dependencies(),
        )
        .await
        .unwrap();

        let err = orch.execute_workflow("slow").await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Timeout { timeout, .. } if timeout == Duration::from_secs(5)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_running_operator() {
        let (orch, _) = orchestrator(16 * 1024).await;
        orch.executables().register("sleep", Arc::new(Sleeper));
        orch.register_workflow(
            "slow",
            [("nap", ExecutableRef::registered("sleep"))],
            no_dependencies(),
        )
        .await
        .unwrap();

        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = orch
            .execute_workflow_with_cancellation("slow", token)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_first_operator() {
        let (orch, _) = orchestrator(16 * 1024).await;
        orch.register_workflow(
            "wf",
            [("a", ExecutableRef::expression(Expr::Const(json!(1))))],
            no_dependencies(),
        )
        .await
        .unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let err = orch
            .execute_workflow_with_cancellation("wf", token)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_workflows_survive_a_new_orchestrator() {
        let temp_dir = TempDir::new().unwrap();
        let definition = WorkflowDefinition::from_toml_str(
            r#"
            id = "persisted"
            dependencies = [["a", "c"], ["b", "c"]]

            [[operators]]
            id = "a"
            executable = { kind = "expression", expr = { const = 1 } }

            [[operators]]
            id = "b"
            executable = { kind = "expression", expr = { const = 2 } }

            [[operators]]
            id = "c"
            executable = { kind = "expression", expr = "sum_inputs" }
            "#,
        )
        .unwrap();

        {
            let store =
                Arc::new(FilesystemEntityStore::new(temp_dir.path().to_path_buf()).unwrap());
            let orch = Orchestrator::init(store, 4096)
                .await
                .unwrap()
                .with_codec(Codec::GzipJson);
            orch.register_definition(&definition).await.unwrap();
        }

        assert!(temp_dir.path().join("workflow").join("persisted").is_file());
        assert!(temp_dir.path().join("operator").join("c").is_file());

        let store = Arc::new(FilesystemEntityStore::new(temp_dir.path().to_path_buf()).unwrap());
        let orch = Orchestrator::init(store, 4096)
            .await
            .unwrap()
            .with_codec(Codec::GzipJson);

        let workflow = orch.load_workflow("persisted").await.unwrap();
        assert_eq!(workflow.operator_count(), 3);
        assert_eq!(workflow.vertex_of(&OperatorId::new("c")), Some(2));

        let results = orch.execute_workflow("persisted").await.unwrap();
        assert_eq!(results, vec![OperatorResult::new("c", json!(3))]);
    }

    #[tokio::test]
    async fn test_object_backend_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = EngineConfig::from_toml_str(
            r#"
            [storage]
            backend = "object"
            dir = "objects"
            prefix = "flows"
            "#,
        )
        .unwrap();
        config.data_dir = temp_dir.path().to_path_buf();

        let orch = Orchestrator::from_config(&config).await.unwrap();
        orch.register_workflow(
            "wf",
            [
                ("a", ExecutableRef::expression(Expr::Const(json!(20)))),
                ("b", ExecutableRef::expression(Expr::Const(json!(22)))),
                ("c", ExecutableRef::expression(Expr::SumInputs)),
            ],
            [("a", "c"), ("b", "c")],
        )
        .await
        .unwrap();

        let objects = temp_dir.path().join("objects").join("flows");
        assert!(objects.join("workflow").join("wf").is_file());
        assert!(objects.join("operator").join("c").is_file());

        let results = orch.execute_workflow("wf").await.unwrap();
        assert_eq!(results, vec![OperatorResult::new("c", json!(42))]);
    }

    #[tokio::test]
    async fn test_from_config_uses_configured_backend() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = EngineConfig::from_toml_str(
            r#"
            cache_capacity_bytes = 2048
            codec = "gzip_json"

            [storage]
            backend = "redb"
            file = "engine.redb"
            "#,
        )
        .unwrap();
        config.data_dir = temp_dir.path().to_path_buf();

        let orch = Orchestrator::from_config(&config).await.unwrap();
        orch.register_workflow(
            "wf",
            [("a", ExecutableRef::expression(Expr::Const(json!("hello"))))],
            no_dependencies(),
        )
        .await
        .unwrap();

        assert!(temp_dir.path().join("engine.redb").is_file());
        assert_eq!(orch.cache_remaining_capacity().await, 2048);
        let results = orch.execute_workflow("wf").await.unwrap();
        assert_eq!(payloads(&results), vec![json!("hello")]);
    }
}
