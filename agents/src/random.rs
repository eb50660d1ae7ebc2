// ═══════════════════════════════════════════════════════════════════════
// Random Walk Strategy — sends idle units to random cells.
// Serves as a baseline and for stress-testing the movement resolver.
// ═══════════════════════════════════════════════════════════════════════

use crate::context::TurnContext;
use crate::strategy::{Strategy, StrategyKind};
use crate::tasks::set_task;
use lux_engine::{Position, Task, Unit};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

pub struct RandomWalkStrategy {
    rng: ChaCha8Rng,
}

impl RandomWalkStrategy {
    pub fn new(seed: u64) -> Self {
        RandomWalkStrategy {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl Strategy for RandomWalkStrategy {
    fn name(&self) -> &str { "RandomWalk" }
    fn kind(&self) -> StrategyKind { StrategyKind::RandomWalk }

    fn assign_task(&mut self, unit: &mut Unit, ctx: &mut TurnContext<'_>) {
        if !unit.can_act() {
            return;
        }
        let map = &ctx.state.map;
        let target = Position::new(self.rng.gen_range(0..map.width), self.rng.gen_range(0..map.height));
        if let Err(e) = set_task(unit, Task::Move(target), ctx) {
            debug!(unit = %unit.id, error = %e, "random target rejected");
        }
    }
}
