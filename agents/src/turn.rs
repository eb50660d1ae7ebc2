// ═══════════════════════════════════════════════════════════════════════
// Turn Pipeline — one observation in, one command list out
//
//   update_logic              orientation, colonization flags, roster upkeep
//   gather_turn_information   completion checks and the per-turn caches
//   assign_tasks              idle units ask the strategy
//   switch_builds_if_needed   builders re-target
//   propose + resolve         unit commands, then resolved moves
//   city_actions              spawn or research
// ═══════════════════════════════════════════════════════════════════════

use crate::context::{AgentMemory, TurnContext};
use crate::placement::switch_builds_if_needed;
use crate::resolver::{move_request, resolve};
use crate::starter::StarterStrategy;
use crate::strategy::Strategy;
use crate::tasks::{check_for_task_completion, propose_action};
use lux_engine::navigation::Orientation;
use lux_engine::protocol::Command;
use lux_engine::{numeric_suffix, GameState, Hyperparameters, Task};
use tracing::{debug, info, warn};

pub struct Agent {
    pub hp: Hyperparameters,
    pub memory: AgentMemory,
    strategy: Box<dyn Strategy>,
}

impl Agent {
    pub fn new(hp: Hyperparameters, strategy: Box<dyn Strategy>) -> Self {
        Agent {
            hp,
            memory: AgentMemory::default(),
            strategy,
        }
    }

    pub fn starter(hp: Hyperparameters) -> Self {
        Agent::new(hp, Box::new(StarterStrategy::new()))
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    /// Decide this turn's commands. `state` must already hold the turn's
    /// observation.
    pub fn play_turn(&mut self, state: &mut GameState) -> Vec<Command> {
        self.memory.strategy = self.strategy.kind();
        if !self.memory.clusters.is_found() {
            self.memory.clusters.find_clusters(&state.map);
            info!(clusters = self.memory.clusters.len(), "resource clusters found");
        }

        let start = first_city_tile(state);
        if state.turn == 0 {
            if let Some(start) = start {
                self.memory.orientation = Orientation::from_start(start, state.map.width, state.map.height);
            }
        }
        self.memory
            .clusters
            .update(state, &self.hp, self.memory.orientation, self.memory.strategy);
        if state.turn == 0 {
            if let Some(start) = start {
                self.memory.clusters.set_sort_anchors(start, state.player());
                self.memory
                    .clusters
                    .update(state, &self.hp, self.memory.orientation, self.memory.strategy);
            }
        }

        let (turn, night) = (state.turn, state.is_night());
        let mut ctx = TurnContext::new(state, &self.hp, &mut self.memory);
        update_logic(&mut ctx);
        let mut commands = unit_action_resolution(&mut ctx, self.strategy.as_mut());
        commands.extend(city_actions(&mut ctx));

        info!(
            turn,
            night,
            strategy = self.strategy.name(),
            commands = commands.len(),
            clusters = self.memory.clusters.len(),
            "turn done"
        );
        commands
    }
}

fn first_city_tile(state: &GameState) -> Option<lux_engine::Position> {
    state
        .player()
        .cities
        .values()
        .min_by_key(|c| c.numeric_id())
        .and_then(|c| c.tile_positions().min())
}

// ── Bookkeeping ────────────────────────────────────────────────────────

pub fn update_logic(ctx: &mut TurnContext<'_>) {
    if ctx.state.turn == 0 {
        for unit in &mut ctx.state.player_mut().units {
            unit.has_colonized = true;
        }
    }

    let c = &ctx.state.constants;
    let player = ctx.state.player();
    ctx.clusters_to_colonize = ctx
        .memory
        .clusters
        .iter()
        .filter(|cl| cl.total_amount >= 0 && player.can_harvest(cl.resource_type, c))
        .map(|cl| cl.id)
        .collect();

    let live = player.unit_ids();
    ctx.memory.roles.retain_live(&live);
}

/// Settle every unit's plan and fill the per-turn caches from the result.
pub fn gather_turn_information(ctx: &mut TurnContext<'_>) {
    for city in ctx.state.opponent().cities.values() {
        for p in city.tile_positions() {
            ctx.blocked_positions.insert(p);
            ctx.enemy_blocked_positions.insert(p);
        }
    }
    // Opponent units still cooling down cannot leave their cell this turn.
    for unit in ctx.state.opponent().units.iter().filter(|u| !u.can_act()) {
        ctx.blocked_positions.insert(unit.pos);
        ctx.enemy_blocked_positions.insert(unit.pos);
    }

    for idx in 0..ctx.state.player().units.len() {
        ctx.with_unit(idx, |unit, ctx| {
            check_for_task_completion(unit, ctx);
            ctx.blocked_positions.insert(unit.pos);

            let mut orphaned = false;
            for task in unit.current_task.iter().chain(unit.task_queue.iter()) {
                match task {
                    Task::Build(p) => {
                        ctx.pos_being_built.insert(*p);
                    }
                    Task::Manage(city_id) => match ctx.state.player_mut().cities.get_mut(city_id) {
                        Some(city) => {
                            city.managers.insert(unit.id.clone());
                        }
                        None => orphaned = true,
                    },
                    Task::Collect(p) => {
                        ctx.resources_being_collected.entry(*p).or_default().insert(unit.id.clone());
                    }
                    _ => {}
                }
            }
            if orphaned {
                warn!(unit = %unit.id, "managing a city that no longer exists");
                unit.current_task = None;
            }
        });
    }

    let own_cities = ctx.state.player().city_positions();
    let clusters = &ctx.memory.clusters;
    let being_built = &ctx.pos_being_built;
    ctx.clusters_to_colonize.retain(|&id| {
        let Some(cl) = clusters.get(id) else { return false };
        let settling = cl.pos_to_defend.iter().any(|p| being_built.contains(p))
            || cl.pos_defended.iter().any(|p| own_cities.contains(p));
        !settling
    });

    ctx.max_amount = ctx
        .clusters_to_colonize
        .iter()
        .filter_map(|&id| ctx.memory.clusters.get(id))
        .map(|cl| cl.total_amount)
        .fold(1, i32::max);
    let state = &*ctx.state;
    for &id in &ctx.clusters_to_colonize {
        if let Some(cl) = ctx.memory.clusters.get_mut(id) {
            cl.calculate_score(state.player(), state.opponent(), ctx.max_amount);
        }
    }

    for p in &own_cities {
        ctx.blocked_positions.remove(p);
    }
}

// ── Units ──────────────────────────────────────────────────────────────

/// Every unit command for this turn: non-move actions in unit order,
/// then the resolved moves.
pub fn unit_action_resolution(ctx: &mut TurnContext<'_>, strategy: &mut dyn Strategy) -> Vec<Command> {
    gather_turn_information(ctx);
    strategy.assign_tasks(ctx);
    switch_builds_if_needed(ctx);

    let mut commands = Vec::new();
    let mut requests = Vec::new();
    for idx in 0..ctx.state.player().units.len() {
        ctx.with_unit(idx, |unit, ctx| {
            let Some(action) = propose_action(unit, ctx) else { return };
            match action {
                Task::Build(_) => commands.push(Command::BuildCity { unit_id: unit.id.clone() }),
                Task::Pillage(_) => commands.push(Command::Pillage { unit_id: unit.id.clone() }),
                Task::Transfer { dest_id, resource, amount, .. } => {
                    commands.push(Command::Transfer {
                        src_id: unit.id.clone(),
                        dst_id: dest_id,
                        resource,
                        amount,
                    });
                    unit.did_just_transfer = true;
                }
                Task::Move(target) => {
                    if let Some(req) = move_request(unit, target, ctx) {
                        requests.push(req);
                    }
                }
                Task::Collect(_) | Task::Manage(_) => {}
            }
        });
    }

    let own_cities = ctx.state.player().city_positions();
    let resolution = resolve(requests, &mut ctx.blocked_positions, &own_cities);
    for (id, wait) in &resolution.waits {
        if let Some(unit) = ctx.state.player_mut().unit_mut(id) {
            unit.turns_spent_waiting_to_move = *wait;
        }
    }
    if !resolution.stalled.is_empty() {
        debug!(stalled = ?resolution.stalled, "units waiting to move");
    }
    commands.extend(resolution.commands());
    commands
}

// ── Cities ─────────────────────────────────────────────────────────────

/// Spawn or research from every city tile that can act, newest city
/// first. Research counted here stays local to the turn.
pub fn city_actions(ctx: &mut TurnContext<'_>) -> Vec<Command> {
    let state = &*ctx.state;
    let c = &state.constants;
    let player = state.player();
    let ratio = ctx.hp.tuning_for(state.map.width).spawn_to_research_ratio;

    let mut cities: Vec<_> = player.cities.values().collect();
    cities.sort_by_key(|city| std::cmp::Reverse(numeric_suffix(&city.id)));
    let can_act = cities.iter().flat_map(|city| city.citytiles.iter()).filter(|t| t.can_act()).count();

    let n_units = player.units.len();
    let tiles = player.city_tile_count();
    let mut research_points = player.research_points;
    let mut spawned = 0usize;
    let mut spawn_sites = Vec::new();
    let mut commands = Vec::new();

    for tile in cities.iter().flat_map(|city| city.citytiles.iter()).filter(|t| t.can_act()) {
        let uranium = research_points >= c.research_requirements.uranium;
        let wants_spawn = n_units == 0 || uranium || spawned as f64 <= can_act as f64 * ratio;
        if wants_spawn && n_units + spawned < tiles {
            commands.push(Command::BuildWorker { pos: tile.pos });
            spawned += 1;
            spawn_sites.push(tile.pos);
        } else if !uranium {
            commands.push(Command::Research { pos: tile.pos });
            research_points += 1;
        }
    }

    for pos in spawn_sites {
        if let Some(id) = ctx.memory.clusters.position_to_cluster(Some(pos)) {
            if let Some(cluster) = ctx.memory.clusters.get_mut(id) {
                cluster.n_workers_spawned += 1;
            }
        }
    }
    if spawned > 0 {
        debug!(spawned, "workers queued");
    }
    commands
}
