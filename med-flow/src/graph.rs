use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, error, info};

use crate::{
    error::{FlowError, Result, RunFailure},
    stage::Stage,
    state::{MergePolicy, PipelineState},
};

/// Directed dependency between two stages: `to` cannot start before `from`
/// has completed and its update has been merged.
#[derive(Debug, Clone)]
pub struct Edge {
    pub from: String,
    pub to: String,
}

/// A fixed-topology pipeline: a stage registry plus an explicit edge list,
/// interpreted by the wavefront scheduler in [`Pipeline::execute`].
///
/// The topology is validated at build time ([`PipelineBuilder::build`]); an
/// instance of this type is always a DAG whose concurrent stages have
/// compatible write-sets.
pub struct Pipeline {
    pub id: String,
    stages: DashMap<String, Arc<dyn Stage>>,
    order: Vec<String>,
    edges: Vec<Edge>,
}

impl Pipeline {
    /// Stage ids in registration order.
    pub fn stage_ids(&self) -> &[String] {
        &self.order
    }

    pub fn get_stage(&self, stage_id: &str) -> Option<Arc<dyn Stage>> {
        self.stages.get(stage_id).map(|entry| entry.clone())
    }

    fn deps_of(&self, stage_id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|edge| edge.to == stage_id)
            .map(|edge| edge.from.as_str())
            .collect()
    }

    /// Run the whole DAG to completion over `state`.
    ///
    /// Stages whose dependencies have all been merged are dispatched together
    /// as one wave of concurrent tasks, each over its own snapshot of the
    /// state. The wave is awaited in full before anything is merged (join
    /// barrier), and each stage's update is merged atomically after an audit
    /// against its declared write-set.
    ///
    /// A failing stage lets its in-flight siblings finish and keeps their
    /// merged output, but no further wave is dispatched: the run returns a
    /// [`RunFailure`] carrying the partial state.
    pub async fn execute(
        &self,
        mut state: PipelineState,
    ) -> std::result::Result<PipelineState, RunFailure> {
        let mut completed: HashSet<String> = HashSet::new();

        while completed.len() < self.order.len() {
            let wave: Vec<String> = self
                .order
                .iter()
                .filter(|id| !completed.contains(*id))
                .filter(|id| self.deps_of(id).iter().all(|dep| completed.contains(*dep)))
                .cloned()
                .collect();

            if wave.is_empty() {
                // Unreachable on a builder-validated pipeline.
                let err =
                    FlowError::InvalidGraph("no runnable stage left; dependency cycle".to_string());
                return Err(RunFailure::new(err, state));
            }

            info!(pipeline = %self.id, stages = ?wave, "dispatching wave");

            let mut handles = Vec::with_capacity(wave.len());
            for stage_id in &wave {
                let stage = self
                    .get_stage(stage_id)
                    .expect("stage registered at build time");
                let snapshot = state.clone();
                handles.push((
                    stage_id.clone(),
                    tokio::spawn(async move { stage.run(snapshot).await }),
                ));
            }

            let mut first_error: Option<FlowError> = None;
            for (stage_id, handle) in handles {
                let result = match handle.await {
                    Ok(result) => result,
                    Err(join_err) => Err(FlowError::StageExecutionFailed(format!(
                        "stage '{stage_id}' aborted: {join_err}"
                    ))),
                };

                match result {
                    Ok(update) => {
                        let stage = self
                            .get_stage(&stage_id)
                            .expect("stage registered at build time");
                        let undeclared = update
                            .touched_fields()
                            .into_iter()
                            .find(|field| !stage.write_set().contains(field));
                        let merge_result = match undeclared {
                            Some(field) => Err(FlowError::UndeclaredWrite {
                                stage: stage_id.clone(),
                                field,
                            }),
                            None => state.apply(update),
                        };
                        match merge_result {
                            Ok(()) => debug!(stage = %stage_id, "stage merged"),
                            Err(err) => {
                                error!(stage = %stage_id, "merge rejected: {err}");
                                first_error.get_or_insert(err);
                            }
                        }
                    }
                    Err(err) => {
                        error!(stage = %stage_id, "stage failed: {err}");
                        first_error.get_or_insert(err);
                    }
                }
                completed.insert(stage_id);
            }

            if let Some(err) = first_error {
                return Err(RunFailure::new(err, state));
            }
        }

        Ok(state)
    }
}

/// Builder for pipelines. `build` validates the declared topology: unknown
/// edge endpoints, duplicate stage ids, cycles, and incompatible write-sets
/// between stages the edge relation leaves unordered are all build errors.
pub struct PipelineBuilder {
    id: String,
    stages: Vec<Arc<dyn Stage>>,
    edges: Vec<Edge>,
}

impl PipelineBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            stages: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn add_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push(Edge {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        let mut order = Vec::with_capacity(self.stages.len());
        let registry: DashMap<String, Arc<dyn Stage>> = DashMap::new();
        for stage in self.stages {
            let stage_id = stage.id().to_string();
            if registry.insert(stage_id.clone(), stage).is_some() {
                return Err(FlowError::InvalidGraph(format!(
                    "duplicate stage id '{stage_id}'"
                )));
            }
            order.push(stage_id);
        }

        for edge in &self.edges {
            for endpoint in [&edge.from, &edge.to] {
                if !registry.contains_key(endpoint) {
                    return Err(FlowError::StageNotFound(endpoint.clone()));
                }
            }
        }

        let reachable = reachability(&order, &self.edges);
        detect_cycle(&order, &reachable)?;
        check_unordered_write_sets(&order, &registry, &reachable)?;

        Ok(Pipeline {
            id: self.id,
            stages: registry,
            order,
            edges: self.edges,
        })
    }
}

/// For every stage, the set of stages reachable from it through the edges.
fn reachability(order: &[String], edges: &[Edge]) -> HashMap<String, HashSet<String>> {
    let mut successors: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges {
        successors
            .entry(edge.from.as_str())
            .or_default()
            .push(edge.to.as_str());
    }

    let mut reachable = HashMap::new();
    for start in order {
        let mut seen: HashSet<String> = HashSet::new();
        let mut frontier = vec![start.as_str()];
        while let Some(current) = frontier.pop() {
            for next in successors.get(current).into_iter().flatten() {
                if seen.insert((*next).to_string()) {
                    frontier.push(next);
                }
            }
        }
        reachable.insert(start.clone(), seen);
    }
    reachable
}

fn detect_cycle(order: &[String], reachable: &HashMap<String, HashSet<String>>) -> Result<()> {
    for stage_id in order {
        if reachable[stage_id].contains(stage_id) {
            return Err(FlowError::InvalidGraph(format!(
                "cycle through stage '{stage_id}'"
            )));
        }
    }
    Ok(())
}

/// Stages the edge relation leaves unordered may run concurrently, so their
/// write-sets must be compatible: sharing a key-disjoint field is fine
/// (collisions are caught at merge time), sharing a single-writer or
/// append-merged field is not.
fn check_unordered_write_sets(
    order: &[String],
    registry: &DashMap<String, Arc<dyn Stage>>,
    reachable: &HashMap<String, HashSet<String>>,
) -> Result<()> {
    for (i, a) in order.iter().enumerate() {
        for b in &order[i + 1..] {
            if reachable[a].contains(b) || reachable[b].contains(a) {
                continue;
            }
            let stage_a = registry.get(a).expect("registered");
            let stage_b = registry.get(b).expect("registered");
            let shared = stage_a
                .write_set()
                .iter()
                .find(|&&field| {
                    stage_b.write_set().contains(&field)
                        && field.merge_policy() != MergePolicy::DisjointInsert
                })
                .copied();
            if let Some(field) = shared {
                return Err(FlowError::InvalidGraph(format!(
                    "unordered stages '{a}' and '{b}' both write {field:?}"
                )));
            }
        }
    }
    Ok(())
}
