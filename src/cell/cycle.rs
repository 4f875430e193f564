use rand::distr::Uniform;
use rand::Rng;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};
use tissue_common::{CellCycleKind, CellsConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CellCyclePhase {
    G0,
    G1,
    S,
    G2,
    M,
}

impl CellCyclePhase {
    pub const ALL: [CellCyclePhase; 5] = [Self::G0, Self::G1, Self::S, Self::G2, Self::M];

    pub fn ordinal(self) -> usize {
        self as usize
    }
}

/// Per-cell cycle progress.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellCycleState {
    /// Time since the cell was born.
    pub age: f64,
    /// G1 duration drawn for the current cycle.
    pub g1_duration: f64,
    /// Number of divisions since the founding stem cell.
    pub generation: u32,
}

/// Phase durations and the rule for drawing G1, shared by every cell of a population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellCycleModel {
    pub kind: CellCycleKind,
    pub g1_duration: f64,
    pub g1_spread: f64,
    pub s_duration: f64,
    pub g2_duration: f64,
    pub m_duration: f64,
    pub max_transit_generations: u32,
}

impl CellCycleModel {
    pub fn from_config(cells: &CellsConfig) -> Self {
        Self {
            kind: cells.cell_cycle,
            g1_duration: cells.g1_duration,
            g1_spread: cells.g1_spread,
            s_duration: cells.s_duration,
            g2_duration: cells.g2_duration,
            m_duration: cells.m_duration,
            max_transit_generations: cells.max_transit_generations,
        }
    }

    /// A model whose cells never divide.
    pub fn no_cycle() -> Self {
        Self {
            kind: CellCycleKind::NoCycle,
            g1_duration: 0.0,
            g1_spread: 0.0,
            s_duration: 0.0,
            g2_duration: 0.0,
            m_duration: 0.0,
            max_transit_generations: 0,
        }
    }

    pub fn fixed(g1: f64, s: f64, g2: f64, m: f64) -> Self {
        Self {
            kind: CellCycleKind::FixedDuration,
            g1_duration: g1,
            g1_spread: 0.0,
            s_duration: s,
            g2_duration: g2,
            m_duration: m,
            max_transit_generations: u32::MAX,
        }
    }

    /// Draws the G1 duration for a new cycle.
    pub fn sample_g1_duration<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let sampled = match self.kind {
            CellCycleKind::NoCycle | CellCycleKind::FixedDuration => self.g1_duration,
            CellCycleKind::UniformG1 => Uniform::new_inclusive(self.g1_duration - self.g1_spread, self.g1_duration + self.g1_spread)
                .map(|dist| rng.sample(dist))
                .unwrap_or(self.g1_duration),
            CellCycleKind::StochasticDuration => {
                Normal::new(self.g1_duration, self.g1_spread).map(|dist| rng.sample(dist)).unwrap_or(self.g1_duration)
            }
        };
        sampled.max(0.0)
    }

    pub fn cycle_duration(&self, state: &CellCycleState) -> f64 {
        state.g1_duration + self.s_duration + self.g2_duration + self.m_duration
    }

    /// State for a founding cell, with an age spread over one cycle so the
    /// population does not divide in lockstep.
    pub fn initial_state<R: Rng + ?Sized>(&self, rng: &mut R) -> CellCycleState {
        let mut state = CellCycleState { age: 0.0, g1_duration: self.sample_g1_duration(rng), generation: 0 };
        let total = self.cycle_duration(&state);
        if self.kind != CellCycleKind::NoCycle && total > 0.0 {
            state.age = Uniform::new(0.0, total).map(|dist| rng.sample(dist)).unwrap_or(0.0);
        }
        state
    }

    pub fn phase(&self, state: &CellCycleState, differentiated: bool) -> CellCyclePhase {
        if differentiated || self.kind == CellCycleKind::NoCycle {
            return CellCyclePhase::G0;
        }
        let mut boundary = state.g1_duration;
        if state.age < boundary {
            return CellCyclePhase::G1;
        }
        boundary += self.s_duration;
        if state.age < boundary {
            return CellCyclePhase::S;
        }
        boundary += self.g2_duration;
        if state.age < boundary {
            return CellCyclePhase::G2;
        }
        CellCyclePhase::M
    }

    pub fn ready_to_divide(&self, state: &CellCycleState, differentiated: bool) -> bool {
        !differentiated && self.kind != CellCycleKind::NoCycle && state.age >= self.cycle_duration(state)
    }

    /// Restarts the parent's cycle and returns the daughter's state.
    pub fn divide<R: Rng + ?Sized>(&self, parent: &mut CellCycleState, rng: &mut R) -> CellCycleState {
        parent.age = 0.0;
        parent.g1_duration = self.sample_g1_duration(rng);
        CellCycleState { age: 0.0, g1_duration: self.sample_g1_duration(rng), generation: parent.generation }
    }
}
