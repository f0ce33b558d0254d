//! Client input sampling with sequencing
//!
//! The core never polls devices. Anything that can produce an
//! [`InputSnapshot`] once per tick implements [`InputSource`]; the
//! [`InputSampler`] stamps each snapshot with a sequence number and timestamp
//! so the server can report which inputs it has applied.

use glam::Vec2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{get_timestamp, InputCommand, InputSnapshot, Tick};
use std::collections::VecDeque;

/// Produces one input snapshot per simulation tick.
pub trait InputSource {
    fn sample(&mut self, tick: Tick) -> InputSnapshot;
}

/// The same snapshot every tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeldInput(pub InputSnapshot);

impl InputSource for HeldInput {
    fn sample(&mut self, _tick: Tick) -> InputSnapshot {
        self.0
    }
}

/// Plays back a fixed list of snapshots, then idles.
#[derive(Debug, Clone, Default)]
pub struct ScriptedInput {
    steps: VecDeque<InputSnapshot>,
}

impl ScriptedInput {
    pub fn new(steps: impl IntoIterator<Item = InputSnapshot>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
        }
    }

    /// Repeats `snapshot` for `ticks` ticks.
    pub fn hold(mut self, snapshot: InputSnapshot, ticks: usize) -> Self {
        self.steps.extend(std::iter::repeat(snapshot).take(ticks));
        self
    }

    pub fn remaining(&self) -> usize {
        self.steps.len()
    }
}

impl InputSource for ScriptedInput {
    fn sample(&mut self, _tick: Tick) -> InputSnapshot {
        self.steps.pop_front().unwrap_or_default()
    }
}

/// Wanders, turns and fires at random. Drives the headless client.
#[derive(Debug, Clone)]
pub struct WanderInput {
    rng: StdRng,
    current: InputSnapshot,
    change_every: Tick,
}

impl WanderInput {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            current: InputSnapshot::default(),
            change_every: 30,
        }
    }
}

impl InputSource for WanderInput {
    fn sample(&mut self, tick: Tick) -> InputSnapshot {
        if tick % self.change_every == 0 {
            self.current = InputSnapshot {
                move_vector: Vec2::new(self.rng.gen_range(-1.0..=1.0), self.rng.gen_range(-1.0..=1.0)),
                look_delta: Vec2::new(self.rng.gen_range(-1.0..=1.0), 0.0),
                fire: self.rng.gen_bool(0.5),
                vertical_move: 0.0,
            };
        }
        self.current
    }
}

/// Stamps snapshots with increasing sequence numbers.
#[derive(Debug)]
pub struct InputSampler {
    next_sequence: u32,
    last_command: Option<InputCommand>,
}

impl InputSampler {
    pub fn new() -> Self {
        Self {
            next_sequence: 1,
            last_command: None,
        }
    }

    /// Samples `source` for this tick. Snapshots are sanitized before they
    /// are predicted or sent so both sides see the same values.
    pub fn sample<S: InputSource>(&mut self, source: &mut S, tick: Tick) -> InputCommand {
        let command = InputCommand {
            sequence: self.next_sequence,
            timestamp: get_timestamp(),
            snapshot: source.sample(tick).sanitize(),
        };
        self.next_sequence += 1;
        self.last_command = Some(command);
        command
    }

    pub fn last_command(&self) -> Option<&InputCommand> {
        self.last_command.as_ref()
    }

    pub fn next_sequence(&self) -> u32 {
        self.next_sequence
    }
}

impl Default for InputSampler {
    fn default() -> Self {
        Self::new()
    }
}
