//! Operating-system collaborator interface
//!
//! Topology detection, CPU pinning and process priority live outside the
//! engine. Executors call into an [`OsAbstraction`] when a pool starts and
//! when units are stopped or killed.

use serde::{Deserialize, Serialize};

use crate::error::StressResult;

/// CPUs a worker should be pinned to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffinityMask {
    /// Logical CPU indices
    pub cpus: Vec<usize>,

    /// NUMA node the CPUs belong to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numa_node: Option<usize>,
}

impl AffinityMask {
    /// Mask for a single CPU
    pub fn single(cpu: usize, numa_node: Option<usize>) -> Self {
        Self {
            cpus: vec![cpu],
            numa_node,
        }
    }
}

/// One NUMA node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumaNode {
    /// Node identifier
    pub id: usize,
    /// Logical CPUs on the node
    pub cpus: Vec<usize>,
}

/// NUMA layout of the machine
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NumaTopology {
    /// Nodes in id order
    pub nodes: Vec<NumaNode>,
}

impl NumaTopology {
    /// A single node owning CPUs `0..cpu_count`
    pub fn single_node(cpu_count: usize) -> Self {
        Self {
            nodes: vec![NumaNode {
                id: 0,
                cpus: (0..cpu_count).collect(),
            }],
        }
    }

    /// Topology of the current host as far as the standard library can tell
    ///
    /// Node layout is not detectable without the OS layer, so this reports
    /// one node with every available CPU.
    pub fn detect() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::single_node(cpus)
    }

    /// Total CPU count
    pub fn cpu_count(&self) -> usize {
        self.nodes.iter().map(|n| n.cpus.len()).sum()
    }
}

/// Process priority class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityLevel {
    /// Below normal
    Low,
    /// Default scheduling
    #[default]
    Normal,
    /// Above normal
    High,
}

/// Identifies a worker unit to the OS layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerHandle {
    /// Worker identifier
    pub worker_id: usize,
}

/// Narrow interface to the operating-system layer
pub trait OsAbstraction: Send + Sync {
    /// Platform name, used in logs
    fn platform_name(&self) -> &str;

    /// One affinity mask per worker
    fn get_worker_affinity_plan(
        &self,
        worker_count: usize,
        topology: &NumaTopology,
    ) -> Vec<AffinityMask>;

    /// Change the process priority
    fn set_priority(&self, level: PriorityLevel) -> StressResult<()>;

    /// Notify that a worker is being stopped (`force = false`) or killed
    fn terminate(&self, handle: WorkerHandle, force: bool);
}

/// Portable default: round-robin placement, priority and termination are logged only
#[derive(Debug, Clone, Default)]
pub struct PortableOs;

impl OsAbstraction for PortableOs {
    fn platform_name(&self) -> &str {
        std::env::consts::OS
    }

    fn get_worker_affinity_plan(
        &self,
        worker_count: usize,
        topology: &NumaTopology,
    ) -> Vec<AffinityMask> {
        let populated: Vec<&NumaNode> = topology
            .nodes
            .iter()
            .filter(|n| !n.cpus.is_empty())
            .collect();
        if populated.is_empty() {
            return Vec::new();
        }

        // Alternate nodes first so neighbouring workers land on different
        // memory controllers, then walk each node's CPUs.
        (0..worker_count)
            .map(|worker| {
                let node = populated[worker % populated.len()];
                let slot = worker / populated.len();
                let cpu = node.cpus[slot % node.cpus.len()];
                AffinityMask::single(cpu, Some(node.id))
            })
            .collect()
    }

    fn set_priority(&self, level: PriorityLevel) -> StressResult<()> {
        tracing::debug!(?level, platform = self.platform_name(), "Priority change requested");
        Ok(())
    }

    fn terminate(&self, handle: WorkerHandle, force: bool) {
        tracing::debug!(worker_id = handle.worker_id, force, "Terminate requested");
    }
}
