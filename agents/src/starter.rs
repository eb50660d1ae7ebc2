// ═══════════════════════════════════════════════════════════════════════
// Starter Strategy — claim a cluster, ring it with cities, keep them lit
//
// Each idle worker is first tied to a cluster:
//   - A worker that has not colonized yet is sent to the closest cluster
//     nobody is settling, once its home cluster has spawned enough
//     workers to spare one. Otherwise it stays home.
//   - A worker that has colonized goes to the least-staffed cluster of a
//     type we can mine, falling back to the cluster of the closest
//     resource.
// It then builds on that cluster's ring when the cluster needs more
// cities, and manages the neediest city otherwise.
// ═══════════════════════════════════════════════════════════════════════

use crate::context::TurnContext;
use crate::placement::city_tile_to_build_from_id;
use crate::strategy::{Strategy, StrategyKind};
use crate::tasks::set_task;
use lux_engine::navigation::NO_TIE_BREAK;
use lux_engine::survival::can_survive_until_end_of_game;
use lux_engine::{ClusterId, Task, Unit};
use std::cmp::Ordering;
use tracing::{debug, warn};

/// Projected fuel headroom each manager is credited with per day turn.
const MANAGER_FUEL_PER_TURN: f64 = 20.0;

#[derive(Debug, Clone, Default)]
pub struct StarterStrategy;

impl StarterStrategy {
    pub fn new() -> Self {
        StarterStrategy
    }
}

impl Strategy for StarterStrategy {
    fn name(&self) -> &str {
        "Starter"
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Starter
    }

    fn assign_task(&mut self, unit: &mut Unit, ctx: &mut TurnContext<'_>) {
        if !unit.can_act() || !unit.is_worker() {
            return;
        }
        set_unit_cluster_to_defend_id(unit, ctx);
        let Some(cluster_id) = unit.cluster_to_defend_id else { return };

        if cluster_wants_builders(cluster_id, ctx) {
            if let Some(site) = city_tile_to_build_from_id(cluster_id, unit, ctx) {
                match set_task(unit, Task::Build(site), ctx) {
                    Ok(()) => {
                        ctx.pos_being_built.insert(site);
                        return;
                    }
                    Err(e) => warn!(unit = %unit.id, error = %e, "build assignment rejected"),
                }
            }
        }

        let Some(city_id) = neediest_city(cluster_id, unit, ctx) else {
            debug!(unit = %unit.id, cluster = cluster_id.0, "no task: ring fully claimed and no city to manage");
            return;
        };
        match set_task(unit, Task::Manage(city_id.clone()), ctx) {
            Ok(()) => {
                if let Some(city) = ctx.state.player_mut().cities.get_mut(&city_id) {
                    city.managers.insert(unit.id.clone());
                }
            }
            Err(e) => warn!(unit = %unit.id, error = %e, "manage assignment rejected"),
        }
    }
}

// ── Cluster assignment ─────────────────────────────────────────────────

fn set_unit_cluster_to_defend_id(unit: &mut Unit, ctx: &mut TurnContext<'_>) {
    let hp = ctx.hp;
    let player = ctx.state.player();
    let current = unit.cluster_to_defend_id.and_then(|id| ctx.memory.clusters.get(id));
    let keep = match current {
        None => false,
        Some(cluster) => {
            let city_tiles: usize = cluster
                .city_ids
                .iter()
                .filter_map(|id| player.cities.get(id))
                .map(|c| c.citytiles.len())
                .sum();
            let overstaffed =
                ctx.memory.roles.managers_of(cluster.id) as f64 > hp.manager_to_city_ratio * city_tiles as f64;
            !(cluster.is_depleted() && !hp.continue_to_build_after_resources_depleted && overstaffed)
        }
    };
    if keep {
        return;
    }

    if let Some(old) = unit.cluster_to_defend_id.take() {
        ctx.memory.roles.remove_as_builder(&unit.id, old);
        ctx.memory.roles.remove_as_manager(&unit.id, old);
    }

    let home = ctx
        .nav()
        .find_closest_city_tile(unit.pos, ctx.state.player())
        .and_then(|p| ctx.memory.clusters.position_to_cluster(Some(p)));

    if !unit.has_colonized {
        unit.cluster_to_defend_id = match home {
            Some(home_id) => colonize_or_stay(unit, home_id, ctx),
            None => closest_understaffed_cluster(unit, ctx),
        };
    } else {
        unit.cluster_to_defend_id = closest_understaffed_cluster(unit, ctx).or_else(|| closest_cluster(unit, ctx));
    }
    if let Some(id) = unit.cluster_to_defend_id {
        debug!(unit = %unit.id, cluster = id.0, "cluster to defend set");
    }
}

fn colonize_or_stay(unit: &Unit, home_id: ClusterId, ctx: &mut TurnContext<'_>) -> Option<ClusterId> {
    let per_colonist = ctx.hp.tuning_for(ctx.state.map.width).n_units_spawn_before_colonize;
    let home = ctx.memory.clusters.get(home_id)?;
    let can_spare = home.n_workers_sent_to_colonize as f64 <= home.n_workers_spawned as f64 / per_colonist;
    if !can_spare {
        return Some(home_id);
    }
    match closest_cluster_to_colonize(unit, ctx) {
        Some(target) => {
            if let Some(home) = ctx.memory.clusters.get_mut(home_id) {
                home.n_workers_sent_to_colonize += 1;
            }
            Some(target)
        }
        None => closest_understaffed_cluster(unit, ctx),
    }
}

fn closest_cluster_to_colonize(unit: &Unit, ctx: &TurnContext<'_>) -> Option<ClusterId> {
    ctx.clusters_to_colonize
        .iter()
        .filter_map(|&id| ctx.memory.clusters.get(id))
        .min_by_key(|c| (unit.pos.distance_to(c.center), c.id))
        .map(|c| c.id)
}

/// Fewest builders plus managers, then nearest. Clusters we cannot mine
/// yet only count when there is nothing else.
fn closest_understaffed_cluster(unit: &Unit, ctx: &TurnContext<'_>) -> Option<ClusterId> {
    let c = &ctx.state.constants;
    let player = ctx.state.player();
    let clusters = &ctx.memory.clusters;
    let mineable: Vec<_> = clusters.iter().filter(|cl| player.can_harvest(cl.resource_type, c)).collect();
    let pool = if mineable.is_empty() { clusters.iter().collect() } else { mineable };
    let orientation = ctx.memory.orientation;
    pool.into_iter()
        .min_by_key(|cl| {
            let (kx, ky) = orientation.key(cl.center);
            (ctx.memory.roles.staff_of(cl.id), unit.pos.distance_to(cl.center), kx, ky)
        })
        .map(|cl| cl.id)
}

fn closest_cluster(unit: &Unit, ctx: &TurnContext<'_>) -> Option<ClusterId> {
    let resource = ctx.nav().find_closest_resource(unit.pos, NO_TIE_BREAK);
    ctx.memory.clusters.position_to_cluster(resource)
}

// ── Build or manage ────────────────────────────────────────────────────

fn cluster_wants_builders(cluster_id: ClusterId, ctx: &TurnContext<'_>) -> bool {
    let Some(cluster) = ctx.memory.clusters.get(cluster_id) else { return false };
    let state = &*ctx.state;
    let player = state.player();
    if cluster.city_ids.is_empty() {
        return true;
    }
    let all_survive = cluster
        .city_ids
        .iter()
        .filter_map(|id| player.cities.get(id))
        .all(|city| can_survive_until_end_of_game(city, state));
    if all_survive {
        return true;
    }
    if cluster.is_depleted() && !ctx.hp.continue_to_build_after_resources_depleted {
        return false;
    }
    let ratio = ctx.hp.tuning_for(state.map.width).builder_to_manager_ratio;
    let builders = ctx.memory.roles.builders_of(cluster_id) as f64;
    builders <= (ratio * ctx.memory.roles.managers_of(cluster_id) as f64).max(1.0)
}

/// The cluster's city most in need of a manager: one that cannot last
/// the game, with the least projected fuel, nearest to the unit.
fn neediest_city(cluster_id: ClusterId, unit: &Unit, ctx: &TurnContext<'_>) -> Option<String> {
    let cluster = ctx.memory.clusters.get(cluster_id)?;
    let state = &*ctx.state;
    let c = &state.constants;
    let player = state.player();
    let turns_until_night = state.turns_until_next_night() as f64;

    let need = |id: &String| {
        let city = player.cities.get(id)?;
        let headroom = city.fuel - c.night_length as f64 * city.light_upkeep
            + city.managers.len() as f64 * turns_until_night * MANAGER_FUEL_PER_TURN;
        let distance = city.tile_positions().map(|p| unit.pos.distance_to(p)).min().unwrap_or(i32::MAX);
        Some((can_survive_until_end_of_game(city, state), headroom, distance, city.numeric_id(), id.clone()))
    };
    cluster
        .city_ids
        .iter()
        .filter_map(need)
        .min_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal))
        .map(|(.., id)| id)
}
