//! Pipeline job graph and topological execution order.
//!
//! Jobs are nodes of a directed acyclic graph. An edge `A → B` means "B
//! depends on A": A reaches a terminal state before B is considered.
//!
//! Ordering uses Kahn's algorithm with ties broken by declaration order, so
//! the same graph always yields the same sequence.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::domain::job::JobSpec;
use crate::error::{MlciError, Result};

/// A validated DAG of [`JobSpec`]s.
#[derive(Debug, Clone, Default)]
pub struct PipelineGraph {
    name: String,
    jobs: Vec<JobSpec>,
    index: HashMap<String, usize>,
}

impl PipelineGraph {
    /// Create an empty graph.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Build a graph from job definitions, validating ids, edges and artifact
    /// directories.
    pub fn from_jobs(name: impl Into<String>, jobs: Vec<JobSpec>) -> Result<Self> {
        let mut graph = Self::new(name);
        for job in jobs {
            graph.add_job(job)?;
        }
        graph.validate()?;
        Ok(graph)
    }

    /// Register a job. Edges may reference jobs added later; call
    /// [`validate`](Self::validate) once all jobs are present.
    pub fn add_job(&mut self, job: JobSpec) -> Result<()> {
        if self.index.contains_key(&job.id) {
            return Err(MlciError::DuplicateJob { job: job.id });
        }
        self.index.insert(job.id.clone(), self.jobs.len());
        self.jobs.push(job);
        Ok(())
    }

    /// Check that every edge resolves, no two jobs share an artifact
    /// directory, and the graph is acyclic.
    pub fn validate(&self) -> Result<()> {
        let mut dirs: HashMap<&str, &str> = HashMap::new();
        for job in &self.jobs {
            for dep in &job.depends_on {
                if !self.index.contains_key(&dep.job) {
                    return Err(MlciError::UnknownDependency {
                        job: job.id.clone(),
                        dependency: dep.job.clone(),
                    });
                }
            }
            if let Some(dir) = job.artifact_dir.as_deref() {
                if let Some(first) = dirs.insert(dir, job.id.as_str()) {
                    return Err(MlciError::SharedArtifactDir {
                        dir: dir.to_string(),
                        first: first.to_string(),
                        second: job.id.clone(),
                    });
                }
            }
        }
        self.topological_order().map(|_| ())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Whether a job with this id is part of the graph.
    pub fn contains(&self, job_id: &str) -> bool {
        self.index.contains_key(job_id)
    }

    pub fn job(&self, job_id: &str) -> Result<&JobSpec> {
        self.index
            .get(job_id)
            .map(|&i| &self.jobs[i])
            .ok_or_else(|| MlciError::JobNotFound {
                job: job_id.to_string(),
            })
    }

    /// Jobs in declaration order.
    pub fn jobs(&self) -> &[JobSpec] {
        &self.jobs
    }

    /// Jobs in dependency order (dependencies before dependents).
    pub fn topological_order(&self) -> Result<Vec<&JobSpec>> {
        let mut in_degree = vec![0usize; self.jobs.len()];
        let mut downstream: Vec<Vec<usize>> = vec![Vec::new(); self.jobs.len()];

        for (i, job) in self.jobs.iter().enumerate() {
            let mut seen = HashSet::new();
            for dep in &job.depends_on {
                let Some(&d) = self.index.get(&dep.job) else {
                    return Err(MlciError::UnknownDependency {
                        job: job.id.clone(),
                        dependency: dep.job.clone(),
                    });
                };
                if seen.insert(d) {
                    in_degree[i] += 1;
                    downstream[d].push(i);
                }
            }
        }

        // Lowest declaration index first keeps the order stable.
        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &deg)| deg == 0)
            .map(|(i, _)| i)
            .collect();

        let mut sorted = Vec::with_capacity(self.jobs.len());
        while let Some(i) = ready.pop_first() {
            sorted.push(&self.jobs[i]);
            for &next in &downstream[i] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.insert(next);
                }
            }
        }

        if sorted.len() != self.jobs.len() {
            let jobs = in_degree
                .iter()
                .enumerate()
                .filter(|(_, &deg)| deg > 0)
                .map(|(i, _)| self.jobs[i].id.clone())
                .collect();
            return Err(MlciError::DependencyCycle { jobs });
        }

        Ok(sorted)
    }
}
