//! Pluggable search strategies.
//!
//! Strategies work purely on unit-cube assignments and never see parameter
//! kinds; the configuration space turns their coordinates into settings.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use st_types::ConfigError;

use crate::space::{Assignment, Dimension};

/// The capability the search driver depends on.
pub trait SearchStrategy: Send {
    /// Next assignment to evaluate, or `None` once the strategy has nothing
    /// left to propose.
    fn propose(&mut self) -> Option<Assignment>;

    /// Score observed for an assignment this strategy proposed.
    fn feedback(&mut self, _assignment: &Assignment, _score: f64) {}

    /// Whether the strategy considers the search finished.
    fn converged(&self) -> bool {
        false
    }

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

/// Strategy selector used by run configuration and the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Random,
    Grid,
    Local,
    Bandit,
}

impl StrategyKind {
    /// Instantiate the strategy over the given dimensions.
    pub fn build(
        self,
        dimensions: Vec<Dimension>,
        seed: u64,
        grid_steps: usize,
    ) -> Box<dyn SearchStrategy> {
        match self {
            StrategyKind::Random => Box::new(RandomSearch::new(dimensions, seed)),
            StrategyKind::Grid => Box::new(GridSearch::new(dimensions, grid_steps)),
            StrategyKind::Local => Box::new(LocalSearch::new(dimensions)),
            StrategyKind::Bandit => Box::new(BanditSearch::with_default_arms(dimensions, seed)),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrategyKind::Random => "random",
            StrategyKind::Grid => "grid",
            StrategyKind::Local => "local",
            StrategyKind::Bandit => "bandit",
        };
        f.write_str(name)
    }
}

impl FromStr for StrategyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "random" => Ok(StrategyKind::Random),
            "grid" => Ok(StrategyKind::Grid),
            "local" => Ok(StrategyKind::Local),
            "bandit" => Ok(StrategyKind::Bandit),
            other => Err(ConfigError::InvalidValue {
                parameter: "strategy".to_string(),
                reason: format!("unknown strategy '{other}' (expected random, grid, local or bandit)"),
            }),
        }
    }
}

// ---- Random search ----

/// Independent uniform sampling. Discrete axes sample their levels uniformly.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    dimensions: Vec<Dimension>,
    rng: StdRng,
}

impl RandomSearch {
    pub fn new(dimensions: Vec<Dimension>, seed: u64) -> Self {
        Self {
            dimensions,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl SearchStrategy for RandomSearch {
    fn propose(&mut self) -> Option<Assignment> {
        let mut assignment = Assignment::new();
        for dim in &self.dimensions {
            let coordinate = match dim.levels {
                Some(levels) if levels > 0 => {
                    let k = self.rng.random_range(0..levels);
                    Dimension::level_coordinate(k, levels)
                }
                _ => self.rng.random::<f64>(),
            };
            assignment.insert(dim.name.clone(), coordinate);
        }
        Some(assignment)
    }

    fn name(&self) -> &str {
        "random"
    }
}

// ---- Grid search ----

/// Exhaustive walk over the Cartesian product of per-axis levels.
///
/// Discrete axes use their own levels, capped at `steps`; continuous axes are
/// split into `steps` evenly spaced points. Combinations are decoded from a
/// mixed-radix cursor instead of being materialized up front.
#[derive(Debug, Clone)]
pub struct GridSearch {
    axes: Vec<(String, usize)>,
    total: usize,
    cursor: usize,
}

impl GridSearch {
    pub fn new(dimensions: Vec<Dimension>, steps: usize) -> Self {
        let steps = steps.max(2);
        let axes: Vec<(String, usize)> = dimensions
            .into_iter()
            .map(|d| {
                let levels = d.levels.map_or(steps, |n| n.clamp(1, steps));
                (d.name, levels)
            })
            .collect();
        let total = axes
            .iter()
            .try_fold(1usize, |acc, (_, n)| acc.checked_mul(*n))
            .unwrap_or(usize::MAX);
        Self {
            axes,
            total,
            cursor: 0,
        }
    }

    /// Number of grid points.
    pub fn size(&self) -> usize {
        self.total
    }

    pub fn remaining(&self) -> usize {
        self.total - self.cursor
    }
}

impl SearchStrategy for GridSearch {
    fn propose(&mut self) -> Option<Assignment> {
        if self.cursor >= self.total {
            return None;
        }
        let mut index = self.cursor;
        let mut assignment = Assignment::new();
        for (name, levels) in self.axes.iter().rev() {
            let k = index % levels;
            index /= levels;
            assignment.insert(name.clone(), Dimension::level_coordinate(k, *levels));
        }
        self.cursor += 1;
        Some(assignment)
    }

    fn converged(&self) -> bool {
        self.cursor >= self.total
    }

    fn name(&self) -> &str {
        "grid"
    }
}

// ---- Local search ----

/// Zero-gradient pattern search.
///
/// Starts at the center of the cube and probes `center ± step` along each
/// axis. Any improving probe becomes the new center; a full sweep without
/// improvement halves the step. Converges once the step falls below the floor.
#[derive(Debug, Clone)]
pub struct LocalSearch {
    dimensions: Vec<Dimension>,
    center: Assignment,
    center_score: Option<f64>,
    step: f64,
    floor: f64,
    probes: VecDeque<Assignment>,
}

impl LocalSearch {
    pub const INITIAL_STEP: f64 = 0.25;
    pub const STEP_FLOOR: f64 = 1.0 / 64.0;

    pub fn new(dimensions: Vec<Dimension>) -> Self {
        Self::starting_at(dimensions, None)
    }

    /// Start from a given point instead of the center of the cube.
    pub fn starting_at(dimensions: Vec<Dimension>, start: Option<Assignment>) -> Self {
        let center = start.unwrap_or_else(|| {
            dimensions
                .iter()
                .map(|d| (d.name.clone(), 0.5))
                .collect()
        });
        Self {
            dimensions,
            center,
            center_score: None,
            step: Self::INITIAL_STEP,
            floor: Self::STEP_FLOOR,
            probes: VecDeque::new(),
        }
    }

    pub fn with_step(mut self, initial: f64, floor: f64) -> Self {
        self.step = initial;
        self.floor = floor;
        self
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    fn sweep(&self) -> VecDeque<Assignment> {
        let mut probes = VecDeque::new();
        for dim in &self.dimensions {
            let here = self.center.get(&dim.name).copied().unwrap_or(0.5);
            for delta in [self.step, -self.step] {
                let moved = (here + delta).clamp(0.0, 1.0);
                if moved == here {
                    continue;
                }
                let mut probe = self.center.clone();
                probe.insert(dim.name.clone(), moved);
                if !probes.contains(&probe) {
                    probes.push_back(probe);
                }
            }
        }
        probes
    }
}

impl SearchStrategy for LocalSearch {
    fn propose(&mut self) -> Option<Assignment> {
        if self.center_score.is_none() {
            return Some(self.center.clone());
        }
        while self.probes.is_empty() {
            if self.converged() {
                return None;
            }
            self.probes = self.sweep();
            if self.probes.is_empty() {
                self.step /= 2.0;
            }
        }
        self.probes.front().cloned()
    }

    fn feedback(&mut self, assignment: &Assignment, score: f64) {
        let Some(center_score) = self.center_score else {
            if *assignment == self.center {
                self.center_score = Some(score);
            }
            return;
        };

        if self.probes.front() != Some(assignment) {
            return;
        }
        self.probes.pop_front();

        if score < center_score {
            self.center = assignment.clone();
            self.center_score = Some(score);
            self.probes.clear();
        } else if self.probes.is_empty() {
            self.step /= 2.0;
        }
    }

    fn converged(&self) -> bool {
        self.step < self.floor
    }

    fn name(&self) -> &str {
        "local"
    }
}

// ---- Bandit allocation ----

struct Arm {
    strategy: Box<dyn SearchStrategy>,
    exhausted: bool,
}

/// Multi-armed bandit over child strategies.
///
/// Each proposal is delegated to the arm with the highest UCB1 index, where
/// an arm's reward is how often its proposals produced a new best score
/// within a sliding window of recent pulls. Feedback is routed to the arm
/// that made the proposal.
pub struct BanditSearch {
    arms: Vec<Arm>,
    window: VecDeque<(usize, f64)>,
    window_size: usize,
    exploration: f64,
    best: Option<f64>,
    last_arm: Option<usize>,
}

impl BanditSearch {
    pub const DEFAULT_WINDOW: usize = 20;

    pub fn new(arms: Vec<Box<dyn SearchStrategy>>) -> Self {
        Self {
            arms: arms
                .into_iter()
                .map(|strategy| Arm {
                    strategy,
                    exhausted: false,
                })
                .collect(),
            window: VecDeque::new(),
            window_size: Self::DEFAULT_WINDOW,
            exploration: std::f64::consts::SQRT_2,
            best: None,
            last_arm: None,
        }
    }

    /// Random sampling and local search.
    pub fn with_default_arms(dimensions: Vec<Dimension>, seed: u64) -> Self {
        Self::new(vec![
            Box::new(RandomSearch::new(dimensions.clone(), seed)),
            Box::new(LocalSearch::new(dimensions)),
        ])
    }

    pub fn with_window(mut self, window_size: usize) -> Self {
        self.window_size = window_size.max(1);
        self
    }

    /// UCB1 index of each live arm over the sliding window.
    fn ranked_arms(&self) -> Vec<usize> {
        let total = self.window.len().max(1) as f64;
        let mut scored: Vec<(usize, f64)> = self
            .arms
            .iter()
            .enumerate()
            .filter(|(_, arm)| !arm.exhausted)
            .map(|(i, _)| {
                let (pulls, reward) = self
                    .window
                    .iter()
                    .filter(|(arm, _)| *arm == i)
                    .fold((0usize, 0.0), |(n, r), (_, x)| (n + 1, r + x));
                let index = if pulls == 0 {
                    f64::INFINITY
                } else {
                    let n = pulls as f64;
                    reward / n + self.exploration * (total.ln() / n).sqrt()
                };
                (i, index)
            })
            .collect();
        // Stable sort keeps arm order as the tie-break.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.into_iter().map(|(i, _)| i).collect()
    }
}

impl SearchStrategy for BanditSearch {
    fn propose(&mut self) -> Option<Assignment> {
        for i in self.ranked_arms() {
            match self.arms[i].strategy.propose() {
                Some(assignment) => {
                    self.last_arm = Some(i);
                    return Some(assignment);
                }
                None => self.arms[i].exhausted = true,
            }
        }
        self.last_arm = None;
        None
    }

    fn feedback(&mut self, assignment: &Assignment, score: f64) {
        let Some(arm) = self.last_arm.take() else {
            return;
        };
        let improved = self.best.map_or(true, |best| score < best);
        if improved {
            self.best = Some(score);
        }
        self.window.push_back((arm, if improved { 1.0 } else { 0.0 }));
        while self.window.len() > self.window_size {
            self.window.pop_front();
        }

        let child = &mut self.arms[arm];
        child.strategy.feedback(assignment, score);
        if child.strategy.converged() {
            child.exhausted = true;
        }
    }

    fn converged(&self) -> bool {
        self.arms.iter().all(|arm| arm.exhausted)
    }

    fn name(&self) -> &str {
        "bandit"
    }
}
