// ═══════════════════════════════════════════════════════════════════════
// Turn Context — everything one turn's decisions read and write
//
// Two lifetimes live here:
//   AgentMemory   persists for the whole match (clusters, roles, the
//                 orientation tie-break, which strategy is active).
//   TurnContext   is built fresh every turn around a borrow of the game
//                 state and the memory, filled in by the ingestion
//                 sweep, consumed by the task layer, the placement
//                 helper and the resolver, and dropped at turn end.
// ═══════════════════════════════════════════════════════════════════════

use crate::cluster::ClusterSet;
use crate::strategy::StrategyKind;
use lux_engine::navigation::{Navigator, Orientation};
use lux_engine::{ClusterId, GameState, Hyperparameters, Position, Unit};
use std::collections::{BTreeMap, BTreeSet};

// ── Roles ──────────────────────────────────────────────────────────────

/// Builder and manager rosters per cluster. A unit is never both for the
/// same cluster: adding one role drops the other first.
#[derive(Debug, Clone, Default)]
pub struct Roles {
    builders: BTreeMap<ClusterId, BTreeSet<String>>,
    managers: BTreeMap<ClusterId, BTreeSet<String>>,
}

impl Roles {
    pub fn add_as_builder(&mut self, unit_id: &str, cluster: Option<ClusterId>) {
        let Some(cluster) = cluster else { return };
        self.remove_as_manager(unit_id, cluster);
        self.builders.entry(cluster).or_default().insert(unit_id.to_string());
    }

    pub fn add_as_manager(&mut self, unit_id: &str, cluster: Option<ClusterId>) {
        let Some(cluster) = cluster else { return };
        self.remove_as_builder(unit_id, cluster);
        self.managers.entry(cluster).or_default().insert(unit_id.to_string());
    }

    pub fn remove_as_builder(&mut self, unit_id: &str, cluster: ClusterId) {
        if let Some(set) = self.builders.get_mut(&cluster) {
            set.remove(unit_id);
        }
    }

    pub fn remove_as_manager(&mut self, unit_id: &str, cluster: ClusterId) {
        if let Some(set) = self.managers.get_mut(&cluster) {
            set.remove(unit_id);
        }
    }

    pub fn builders_of(&self, cluster: ClusterId) -> usize {
        self.builders.get(&cluster).map_or(0, |s| s.len())
    }

    pub fn managers_of(&self, cluster: ClusterId) -> usize {
        self.managers.get(&cluster).map_or(0, |s| s.len())
    }

    pub fn staff_of(&self, cluster: ClusterId) -> usize {
        self.builders_of(cluster) + self.managers_of(cluster)
    }

    #[cfg(test)]
    pub(crate) fn is_builder(&self, unit_id: &str, cluster: ClusterId) -> bool {
        self.builders.get(&cluster).map_or(false, |s| s.contains(unit_id))
    }

    #[cfg(test)]
    pub(crate) fn is_manager(&self, unit_id: &str, cluster: ClusterId) -> bool {
        self.managers.get(&cluster).map_or(false, |s| s.contains(unit_id))
    }

    /// Snapshot of the builder roster, cluster by cluster.
    pub fn builder_rosters(&self) -> Vec<(ClusterId, Vec<String>)> {
        self.builders
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(&id, ids)| (id, ids.iter().cloned().collect()))
            .collect()
    }

    /// Forget units that are no longer alive.
    pub fn retain_live(&mut self, live: &BTreeSet<String>) {
        for set in self.builders.values_mut().chain(self.managers.values_mut()) {
            set.retain(|id| live.contains(id));
        }
    }
}

// ── Memory ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct AgentMemory {
    pub clusters: ClusterSet,
    pub roles: Roles,
    pub orientation: Orientation,
    pub strategy: StrategyKind,
}

// ── TurnContext ────────────────────────────────────────────────────────

pub struct TurnContext<'a> {
    pub state: &'a mut GameState,
    pub hp: &'a Hyperparameters,
    pub memory: &'a mut AgentMemory,

    /// Build targets claimed by any unit this turn.
    pub pos_being_built: BTreeSet<Position>,
    /// Cells no unit may end its move on.
    pub blocked_positions: BTreeSet<Position>,
    /// Cells no unit may even consider stepping on.
    pub enemy_blocked_positions: BTreeSet<Position>,
    /// Resource cell → ids of the units holding a COLLECT on it.
    pub resources_being_collected: BTreeMap<Position, BTreeSet<String>>,
    /// Clusters of unlocked types nobody has started settling yet.
    pub clusters_to_colonize: BTreeSet<ClusterId>,
    /// Largest remaining amount among `clusters_to_colonize` (at least 1).
    pub max_amount: i32,
}

impl<'a> TurnContext<'a> {
    pub fn new(state: &'a mut GameState, hp: &'a Hyperparameters, memory: &'a mut AgentMemory) -> Self {
        TurnContext {
            state,
            hp,
            memory,
            pos_being_built: BTreeSet::new(),
            blocked_positions: BTreeSet::new(),
            enemy_blocked_positions: BTreeSet::new(),
            resources_being_collected: BTreeMap::new(),
            clusters_to_colonize: BTreeSet::new(),
            max_amount: 1,
        }
    }

    pub fn nav(&self) -> Navigator<'_> {
        Navigator::new(&*self.state, self.hp, self.memory.orientation)
    }

    pub fn collectors_at(&self, pos: Position) -> usize {
        self.resources_being_collected.get(&pos).map_or(0, |s| s.len())
    }

    /// Run `f` on a copy of our `idx`-th unit and store the result back.
    /// The copy lets `f` query the rest of the context while it mutates
    /// the unit.
    pub fn with_unit<R>(&mut self, idx: usize, f: impl FnOnce(&mut Unit, &mut TurnContext<'a>) -> R) -> Option<R> {
        let mut unit = self.state.player().units.get(idx)?.clone();
        let out = f(&mut unit, self);
        if let Some(slot) = self.state.player_mut().units.get_mut(idx) {
            *slot = unit;
        }
        Some(out)
    }
}
