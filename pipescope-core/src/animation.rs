//! Fixed-tick animation clock.
//!
//! Each tick advances the flow coordinate of every active edge and, for
//! running nodes that got no real progress since the previous tick, nudges a
//! *simulated* progress value forward. The simulation is cosmetic: it lives in
//! [`NodeAnimation::simulated`](crate::graph::NodeAnimation), never writes
//! `processed`, never reaches `total`, and never changes a status.

use rand::Rng;

use crate::config::AnimationConfig;
use crate::graph::GraphModel;
use crate::status::NodeStatus;
use crate::types::wrap_flow;

/// Bounded random progress smoothing for running nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSimulation {
    /// Largest increment per tick; each step is uniform in `1..=max_increment`.
    pub max_increment: u64,
}

/// What a single tick touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub flows_advanced: usize,
    pub nodes_simulated: usize,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self.flows_advanced == 0 && self.nodes_simulated == 0
    }
}

#[derive(Debug, Clone)]
pub struct AnimationClock {
    step: f64,
    running: bool,
    ticks: u64,
    simulation: Option<ProgressSimulation>,
}

impl AnimationClock {
    pub fn new(step: f64, simulation: Option<ProgressSimulation>) -> Self {
        Self {
            step,
            running: true,
            ticks: 0,
            simulation,
        }
    }

    pub fn from_config(config: &AnimationConfig) -> Self {
        let simulation = config.simulate_progress.then_some(ProgressSimulation {
            max_increment: config.max_simulated_increment.max(1),
        });
        Self::new(config.flow_step, simulation)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Pause or resume. Accumulated state is kept either way.
    pub fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    pub fn toggle(&mut self) -> bool {
        self.running = !self.running;
        self.running
    }

    /// Ticks performed while running.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    /// Advance one tick. Returns `None` while paused.
    pub fn tick<R: Rng>(&mut self, graph: &mut GraphModel, rng: &mut R) -> Option<TickReport> {
        if !self.running {
            return None;
        }
        self.ticks += 1;
        let mut report = TickReport::default();

        for (is_active, flow) in graph.flows_mut() {
            if is_active {
                *flow = wrap_flow(*flow + self.step);
                report.flows_advanced += 1;
            }
        }

        for (node, animation) in graph.animations_mut() {
            if node.status != NodeStatus::Running {
                animation.fresh = false;
                continue;
            }
            if std::mem::take(&mut animation.fresh) {
                continue;
            }
            let (Some(simulation), Some(metrics)) = (self.simulation, node.metrics) else {
                continue;
            };
            // Stop one short of total: completion is only ever shown from real data.
            let ceiling = metrics.total.saturating_sub(1);
            let base = animation.simulated.unwrap_or(0).max(metrics.processed);
            if base >= ceiling {
                continue;
            }
            let increment = rng.gen_range(1..=simulation.max_increment);
            animation.simulated = Some(base.saturating_add(increment).min(ceiling));
            report.nodes_simulated += 1;
        }

        Some(report)
    }
}
