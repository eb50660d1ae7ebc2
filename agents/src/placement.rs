// ═══════════════════════════════════════════════════════════════════════
// Placement — where builders put city tiles, and when they change their mind
// ═══════════════════════════════════════════════════════════════════════

use crate::context::TurnContext;
use crate::tasks::{remove_next_build_action, set_task};
use lux_engine::navigation::Orientation;
use lux_engine::{ClusterId, GameState, Position, Task, Unit};
use std::cmp::Reverse;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Cardinal neighbors of `pos` holding one of our city tiles.
pub fn adjacent_own_city_tiles(pos: Position, state: &GameState) -> usize {
    pos.adjacent_positions(false, false)
        .into_iter()
        .filter(|&p| state.map.citytile_at(p).map_or(false, |t| t.team == state.id))
        .count()
}

/// Nearest to `from`, then most city neighbors, then orientation.
fn best_site(from: Position, sites: &BTreeSet<Position>, state: &GameState, orientation: Orientation) -> Option<Position> {
    sites.iter().copied().min_by_key(|&p| {
        let (kx, ky) = orientation.key(p);
        (from.distance_to(p), Reverse(adjacent_own_city_tiles(p, state)), kx, ky)
    })
}

/// Ring cell of `cluster_id` this unit should build on. A contested
/// cluster is built in ring order; otherwise the unit takes the closest
/// open cell, preferring ones that grow an existing city.
pub fn city_tile_to_build_from_id(cluster_id: ClusterId, unit: &Unit, ctx: &TurnContext<'_>) -> Option<Position> {
    let cluster = ctx.memory.clusters.get(cluster_id)?;
    let map = &ctx.state.map;
    let mut open = cluster
        .pos_to_defend
        .iter()
        .copied()
        .filter(|&p| map.is_empty(p) && !ctx.pos_being_built.contains(&p));
    if cluster.needs_defending_from_opponent {
        return open.next();
    }
    let sites: BTreeSet<Position> = open.collect();
    best_site(unit.pos, &sites, &*ctx.state, ctx.memory.orientation)
}

fn build_target(unit: &Unit) -> Option<Position> {
    unit.current_task
        .iter()
        .chain(unit.task_queue.iter())
        .find_map(|t| match t {
            Task::Build(p) => Some(*p),
            _ => None,
        })
}

/// Move builders off targets the opponent took, or onto better ones,
/// cluster by cluster. Units already standing on their target with the
/// material to build are left alone.
pub fn switch_builds_if_needed(ctx: &mut TurnContext<'_>) {
    let rosters = ctx.memory.roles.builder_rosters();
    for (cluster_id, ids) in rosters {
        let Some((switchers, sites)) = plan_switches(cluster_id, &ids, ctx) else { continue };
        apply_switches(cluster_id, switchers, sites, ctx);
    }
}

/// Units to retarget in this cluster, and the cells they may take.
fn plan_switches(cluster_id: ClusterId, ids: &[String], ctx: &TurnContext<'_>) -> Option<(Vec<usize>, BTreeSet<Position>)> {
    let cluster = ctx.memory.clusters.get(cluster_id)?;
    let state = &*ctx.state;
    let c = &state.constants;
    let map = &state.map;
    let units = &state.player().units;
    let opponent_units = state.opponent().unit_positions();
    let taken = |p: Position| {
        opponent_units.contains(&p) || map.citytile_at(p).map_or(false, |t| t.team != state.id)
    };

    let builders: Vec<(usize, Position)> = ids
        .iter()
        .filter_map(|id| units.iter().position(|u| &u.id == id))
        .filter_map(|idx| {
            let unit = &units[idx];
            let target = build_target(unit)?;
            let settled = unit.current_task == Some(Task::Build(target))
                && unit.pos == target
                && unit.has_enough_to_build(c);
            (!settled).then_some((idx, target))
        })
        .collect();
    if builders.is_empty() {
        return None;
    }

    let mut switchers = Vec::new();
    let sites = if cluster.needs_defending_from_opponent {
        let mut wanted: BTreeSet<Position> = cluster
            .pos_to_defend
            .iter()
            .copied()
            .filter(|&p| map.is_empty(p) && !opponent_units.contains(&p))
            .take(builders.len())
            .collect();
        for &(idx, target) in &builders {
            if taken(target) || !wanted.remove(&target) {
                switchers.push(idx);
            }
        }
        wanted
    } else {
        let mut open: BTreeSet<Position> = cluster
            .pos_to_defend
            .iter()
            .copied()
            .filter(|&p| !ctx.pos_being_built.contains(&p) && map.is_empty(p) && !opponent_units.contains(&p))
            .collect();
        for &(idx, target) in &builders {
            let from = units[idx].pos;
            let lost = taken(target);
            let closer = open.iter().any(|&p| from.distance_to(p) < from.distance_to(target));
            if lost || closer {
                switchers.push(idx);
                if !lost {
                    open.insert(target);
                }
            }
        }
        open
    };

    switchers.sort_by_key(|&idx| (units[idx].cargo_space_left(c), idx));
    Some((switchers, sites))
}

fn apply_switches(cluster_id: ClusterId, switchers: Vec<usize>, mut sites: BTreeSet<Position>, ctx: &mut TurnContext<'_>) {
    for idx in switchers {
        ctx.with_unit(idx, |unit, ctx| {
            let old = build_target(unit);
            let free: BTreeSet<Position> = sites
                .iter()
                .copied()
                .filter(|p| !ctx.pos_being_built.contains(p) || Some(*p) == old)
                .collect();
            let Some(site) = best_site(unit.pos, &free, &*ctx.state, ctx.memory.orientation) else { return };
            sites.remove(&site);
            if Some(site) == old {
                return;
            }
            remove_next_build_action(unit);
            if let Some(old) = old {
                ctx.pos_being_built.remove(&old);
            }
            match set_task(unit, Task::Build(site), ctx) {
                Ok(()) => {
                    debug!(unit = %unit.id, cluster = cluster_id.0, %site, "builder switched target");
                    ctx.pos_being_built.insert(site);
                }
                Err(e) => warn!(unit = %unit.id, error = %e, "could not switch build target"),
            }
        });
    }
}
