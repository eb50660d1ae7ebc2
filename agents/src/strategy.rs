// ═══════════════════════════════════════════════════════════════════════
// Strategy Trait — decides what an idle unit should be trying to do
//
// A strategy only hands out high-level tasks. Turning those into safe,
// collision-free commands is the task layer's and the resolver's job.
// ═══════════════════════════════════════════════════════════════════════

use crate::context::TurnContext;
use lux_engine::Unit;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StrategyKind {
    #[default]
    Starter,
    TimeBased,
    ResearchBased,
    RandomWalk,
}

impl StrategyKind {
    /// Whether depleted clusters without a city stay in the live set.
    pub fn keeps_depleted_clusters(self) -> bool {
        self != StrategyKind::Starter
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::Starter => write!(f, "starter"),
            StrategyKind::TimeBased => write!(f, "time-based"),
            StrategyKind::ResearchBased => write!(f, "research-based"),
            StrategyKind::RandomWalk => write!(f, "random-walk"),
        }
    }
}

pub trait Strategy: Send {
    /// Human-readable name, used in logs.
    fn name(&self) -> &str;

    fn kind(&self) -> StrategyKind;

    /// Give `unit` something to do. Leaving it idle is allowed.
    fn assign_task(&mut self, unit: &mut Unit, ctx: &mut TurnContext<'_>);

    /// Visit every unit without a task, most wood carried first.
    fn assign_tasks(&mut self, ctx: &mut TurnContext<'_>) {
        let mut idle: Vec<(i32, usize)> = ctx
            .state
            .player()
            .units
            .iter()
            .enumerate()
            .filter(|(_, u)| u.current_task.is_none())
            .map(|(idx, u)| (u.cargo.wood, idx))
            .collect();
        idle.sort_unstable();
        idle.reverse();
        for (_, idx) in idle {
            ctx.with_unit(idx, |unit, ctx| self.assign_task(unit, ctx));
        }
    }
}
