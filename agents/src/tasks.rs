// ═══════════════════════════════════════════════════════════════════════
// Task State Machine — settling a unit's plan and turning it into an action
//
// A unit's plan is a stack: `current_task` on top, `task_queue` below it.
//
//   check_for_task_completion()   runs first every turn. Drops queued
//                                 tasks that can no longer succeed, then
//                                 pops finished tasks off the top until
//                                 one sticks or the plan is empty.
//   propose_action()              turns the top of the stack into this
//                                 turn's concrete action, pushing
//                                 corrective sub-tasks ("collect first",
//                                 "walk there first") in front of it
//                                 until one is directly actionable.
//
// Neither function errors: a task that cannot safely proceed this turn
// produces no action and is reconsidered next turn.
// ═══════════════════════════════════════════════════════════════════════

use crate::context::TurnContext;
use crate::strategy::StrategyKind;
use lux_engine::navigation::NO_TIE_BREAK;
use lux_engine::survival::can_survive_until_end_of_game;
use lux_engine::{GameState, Hyperparameters, Position, ResourceType, Task, TaskKind, Unit, UnitType};
use std::cmp::Reverse;
use thiserror::Error;
use tracing::{debug, warn};

/// Upper bound on sub-task pushes while proposing one action.
const MAX_SUBSTITUTIONS: usize = 8;

/// Safety margin on travel-time and fuel checks.
const TRAVEL_MARGIN: f64 = 1.1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("{kind} is not a valid task for a {unit_type}")]
    InvalidForUnitType { kind: TaskKind, unit_type: UnitType },
    #[error("move target {0} is the unit's own position")]
    MoveToOwnPosition(Position),
    #[error("cannot collect with a full cargo")]
    CollectWithFullCargo,
}

// ── Assignment ─────────────────────────────────────────────────────────

/// Replace the unit's current task, keeping its queue. BUILD and MANAGE
/// also enrol the unit in the matching role of its assigned cluster.
pub fn set_task(unit: &mut Unit, task: Task, ctx: &mut TurnContext<'_>) -> Result<(), TaskError> {
    let kind = task.kind();
    if !kind.valid_for(unit.unit_type) {
        return Err(TaskError::InvalidForUnitType { kind, unit_type: unit.unit_type });
    }
    match &task {
        Task::Move(p) if *p == unit.pos => return Err(TaskError::MoveToOwnPosition(*p)),
        Task::Collect(_) if unit.cargo_space_left(&ctx.state.constants) <= 0 => {
            return Err(TaskError::CollectWithFullCargo)
        }
        Task::Build(_) => ctx.memory.roles.add_as_builder(&unit.id, unit.cluster_to_defend_id),
        Task::Manage(_) => ctx.memory.roles.add_as_manager(&unit.id, unit.cluster_to_defend_id),
        _ => {}
    }
    debug!(unit = %unit.id, %task, "task set");
    unit.current_task = Some(task);
    Ok(())
}

/// Take the unit's next BUILD off its plan, if it has one queued. A BUILD
/// that is already the current task is taken as well.
pub fn remove_next_build_action(unit: &mut Unit) -> Option<Task> {
    if matches!(unit.current_task, Some(Task::Build(_))) {
        return unit.current_task.take();
    }
    let idx = unit.task_queue.iter().position(|t| t.kind() == TaskKind::Build)?;
    unit.task_queue.remove(idx)
}

/// Whether this unit's path should route around our own city tiles.
/// Units carrying building material or fuel for a transfer would lose it
/// by stepping onto a city.
pub fn should_avoid_citytiles(unit: &Unit, state: &GameState, hp: &Hyperparameters) -> bool {
    match &unit.current_task {
        Some(Task::Build(_)) => return true,
        Some(Task::Move(_))
            if unit.num_resources() > 0 && unit.task_queue.iter().take(2).any(|t| t.kind() == TaskKind::Build) =>
        {
            return true
        }
        _ => {}
    }
    match unit.task_queue.front() {
        None => false,
        Some(Task::Transfer { .. }) => true,
        Some(Task::Manage(_)) => unit.num_resources() > 0,
        Some(Task::Build(_)) => state.turns_until_next_night() >= hp.build_night_turn_buffer,
        Some(_) => false,
    }
}

// ── Completion ─────────────────────────────────────────────────────────

/// Settle the unit's plan for this turn. Returns how many tasks were
/// examined, which never exceeds the queue length plus one.
pub fn check_for_task_completion(unit: &mut Unit, ctx: &mut TurnContext<'_>) -> usize {
    if sweep_queue(unit, ctx) {
        return 0;
    }

    let limit = unit.task_queue.len() + 1;
    let mut steps = 0;
    while steps < limit {
        steps += 1;
        if unit.current_task.is_none() {
            unit.load_next_task();
        }
        let Some(task) = unit.current_task.clone() else { break };
        if !settle(unit, &task, ctx) {
            break;
        }
        if unit.current_task.is_some() || unit.task_queue.is_empty() {
            break;
        }
        debug!(unit = %unit.id, finished = %task, "task finished, advancing queue");
    }
    steps
}

/// Drop queued tasks that can no longer succeed, along with everything
/// planned before them. Returns true if the whole plan was abandoned.
fn sweep_queue(unit: &mut Unit, ctx: &TurnContext<'_>) -> bool {
    let map = &ctx.state.map;
    loop {
        let stale = unit.task_queue.iter().position(|t| match t {
            Task::Build(p) => {
                ctx.memory.strategy == StrategyKind::Starter
                    && ctx.memory.clusters.position_to_cluster(Some(*p)).is_none()
            }
            Task::Collect(p) => map.is_within_bounds(*p) && !map.has_resource(*p),
            _ => false,
        });
        let Some(idx) = stale else { break };
        debug!(unit = %unit.id, dropped = idx + 1, "dropping stale queued tasks");
        unit.task_queue.drain(..=idx);
        unit.current_task = None;
    }

    let cities = &ctx.state.player().cities;
    let orphaned = unit
        .task_queue
        .iter()
        .any(|t| matches!(t, Task::Manage(city_id) if !cities.contains_key(city_id)));
    if orphaned {
        warn!(unit = %unit.id, "queued manage task points at a city that no longer exists");
        unit.clear_tasks();
        return true;
    }
    false
}

/// Apply the completion rule for `task`, clearing `current_task` when it
/// is done. Returns false when the plan was abandoned outright.
fn settle(unit: &mut Unit, task: &Task, ctx: &mut TurnContext<'_>) -> bool {
    match task {
        Task::Move(target) => settle_move(unit, *target, ctx),
        Task::Collect(target) => settle_collect(unit, *target, ctx),
        Task::Build(target) => settle_build(unit, *target, ctx),
        Task::Pillage(target) => {
            if ctx.state.map.road_at(*target) <= 0.0 {
                unit.current_task = None;
            }
        }
        Task::Transfer { .. } => {
            if unit.did_just_transfer {
                unit.did_just_transfer = false;
                unit.current_task = None;
            }
        }
        Task::Manage(city_id) => {
            let Some(city) = ctx.state.player().cities.get(city_id) else {
                warn!(unit = %unit.id, city = %city_id, "manager's city no longer exists");
                unit.clear_tasks();
                return false;
            };
            if can_survive_until_end_of_game(city, &*ctx.state) {
                debug!(unit = %unit.id, city = %city_id, "city is safe until the end, releasing manager");
                unit.current_task = None;
                unit.cluster_to_defend_id = None;
            }
        }
    }
    true
}

fn settle_move(unit: &mut Unit, target: Position, ctx: &TurnContext<'_>) {
    if unit.pos == target {
        unit.current_task = None;
        unit.previous_pos.clear();
        return;
    }
    let Some(next) = unit.task_queue.front() else { return };
    let next_kind = next.kind();
    if next_kind.can_be_adjacent() && unit.pos.is_adjacent(target) && !ctx.state.map.has_citytile(unit.pos) {
        unit.current_task = None;
        unit.previous_pos.clear();
    } else if next_kind == TaskKind::Transfer {
        unit.current_task = None;
    } else if ctx.state.player().just_unlocked_new_resource(&ctx.state.constants)
        && unit.task_queue.len() >= 2
        && next_kind == TaskKind::Collect
        && unit.task_queue.get(1).map_or(false, |t| t.kind() != TaskKind::Build)
    {
        // A fresh unlock makes the queued collect spot stale; skip it.
        unit.task_queue.pop_front();
        unit.current_task = unit.task_queue.pop_front();
    }
}

fn settle_collect(unit: &mut Unit, target: Position, ctx: &TurnContext<'_>) {
    let c = &ctx.state.constants;
    if !ctx.state.map.has_resource(target) || unit.cargo_space_left(c) <= 0 {
        unit.current_task = None;
        return;
    }
    let Some(Task::Manage(city_id)) = unit.task_queue.front() else { return };
    let city = ctx.state.player().cities.get(city_id);
    let max_fuel = ctx.hp.tuning_for(ctx.state.map.width).max_fuel_per_manager;
    let avoid = should_avoid_citytiles(unit, &*ctx.state, ctx.hp);

    let done = unit.has_enough_to_manage(c)
        || (unit.num_resources() > 0
            && city.map_or(false, |city| !ctx.nav().can_make_it_back_to_city(unit, city, TRAVEL_MARGIN, avoid)))
        || unit.total_fuel(c) >= max_fuel;
    if done {
        unit.current_task = None;
    }
}

fn settle_build(unit: &mut Unit, target: Position, ctx: &mut TurnContext<'_>) {
    if ctx.state.map.has_citytile(target) {
        let cluster = unit.cluster_to_defend_id;
        if let Some(tile) = ctx.state.player_mut().city_tile_at_mut(target) {
            tile.cluster_to_defend_id = cluster;
        }
        unit.current_task = None;
        unit.has_colonized = true;
    } else if ctx.memory.strategy == StrategyKind::Starter
        && ctx.memory.clusters.position_to_cluster(Some(target)).is_none()
    {
        unit.current_task = None;
        unit.has_colonized = true;
    }
}

// ── Proposal ───────────────────────────────────────────────────────────

enum Step {
    /// The top of the plan is this turn's action.
    Act,
    /// Nothing safe to do this turn.
    Idle,
    /// The plan changed; look at the new top.
    Again,
}

/// This turn's concrete action for the unit, or `None` to stay idle.
/// May push sub-tasks onto the unit's plan along the way; the returned
/// task is always the unit's current task.
pub fn propose_action(unit: &mut Unit, ctx: &mut TurnContext<'_>) -> Option<Task> {
    if !unit.can_act() {
        return None;
    }
    for _ in 0..MAX_SUBSTITUTIONS {
        let task = unit.current_task.clone()?;
        let step = match &task {
            Task::Transfer { dest_id, .. } => propose_transfer(unit, dest_id, ctx),
            Task::Manage(city_id) => propose_manage(unit, city_id, ctx),
            Task::Build(target) => propose_build(unit, *target, ctx),
            Task::Collect(target) => propose_collect(unit, *target, ctx),
            Task::Move(target) => propose_move(unit, *target, ctx),
            Task::Pillage(_) => Step::Act,
        };
        match step {
            Step::Act => {
                debug!(unit = %unit.id, action = %task, "proposed");
                return Some(task);
            }
            Step::Idle => return None,
            Step::Again => {}
        }
    }
    debug!(unit = %unit.id, "gave up after too many task substitutions");
    None
}

fn propose_transfer(unit: &mut Unit, dest_id: &str, ctx: &TurnContext<'_>) -> Step {
    let Some(dest) = ctx.state.player().unit(dest_id).map(|u| u.pos) else {
        debug!(unit = %unit.id, dest = %dest_id, "transfer destination is gone");
        return Step::Idle;
    };
    if let Some(Task::Transfer { target, .. }) = unit.current_task.as_mut() {
        *target = dest;
    }
    if !unit.pos.is_adjacent(dest) {
        unit.push_task(Task::Move(dest));
        return Step::Again;
    }
    Step::Act
}

fn propose_manage(unit: &mut Unit, city_id: &str, ctx: &TurnContext<'_>) -> Step {
    let state = &*ctx.state;
    let c = &state.constants;
    let player = state.player();
    let Some(city) = player.cities.get(city_id) else {
        warn!(unit = %unit.id, city = %city_id, "managing a city that no longer exists");
        return Step::Idle;
    };

    // Prefer a city tile next to something we can mine right now.
    let map = &state.map;
    let harvestable: Vec<ResourceType> = ResourceType::ALL.into_iter().filter(|&rt| player.can_harvest(rt, c)).collect();
    let mut spots: Vec<Position> = city.tile_positions().collect();
    spots.sort_by_key(|&p| Reverse(map.num_adjacent_resources(p, false, true, &ResourceType::ALL)));
    let productive: Vec<Position> = spots
        .into_iter()
        .filter(|&p| map.num_adjacent_resources(p, true, false, &harvestable) > 0)
        .collect();
    if productive.contains(&unit.pos) {
        return Step::Idle;
    }
    let occupied = player.unit_positions();
    if let Some(&spot) = productive.iter().find(|p| !occupied.contains(p)) {
        unit.push_task(Task::Move(spot));
        return Step::Again;
    }

    let nav = ctx.nav();
    let avoid = should_avoid_citytiles(unit, state, ctx.hp);
    let Some(closest) = city
        .tile_positions()
        .min_by_key(|&p| (unit.pos.distance_to(p), nav.orientation.key(p)))
    else {
        return Step::Idle;
    };

    if !unit.has_enough_to_manage(c) {
        let Some(resource) = nav.find_closest_resource(unit.pos, NO_TIE_BREAK) else {
            debug!(unit = %unit.id, "manager has no resource left to fetch");
            return Step::Idle;
        };
        if nav.can_make_it_back_to_city(unit, city, TRAVEL_MARGIN, avoid) {
            if resource != unit.pos && nav.can_make_it_to_pos_without_dying(unit, resource, TRAVEL_MARGIN, avoid) {
                unit.push_task(Task::Collect(resource));
                return Step::Again;
            }
            debug!(unit = %unit.id, %resource, "manager cannot reach fuel safely");
            return Step::Idle;
        }
    }

    if closest != unit.pos && nav.can_make_it_to_pos_without_dying(unit, closest, TRAVEL_MARGIN, avoid) {
        unit.push_task(Task::Move(closest));
        return Step::Again;
    }
    Step::Idle
}

fn propose_build(unit: &mut Unit, target: Position, ctx: &mut TurnContext<'_>) -> Step {
    let c = &ctx.state.constants;
    let buffer = ctx.hp.build_night_turn_buffer;
    let avoid = should_avoid_citytiles(unit, &*ctx.state, ctx.hp);

    if !unit.has_enough_to_build(c) {
        let found = {
            let nav = ctx.nav();
            let collectors = |p: Position| ctx.collectors_at(p);
            let by_travel = Some(|p: Position| nav.unit_turn_distance(unit, p, avoid));
            if unit.num_resources() as f64 >= 0.75 * c.city_build_cost as f64 {
                nav.find_closest_resource_for_collecting(target, collectors, by_travel)
            } else {
                nav.find_closest_wood_for_collecting(target, collectors, by_travel)
                    .or_else(|| nav.find_closest_resource_for_collecting(target, collectors, by_travel))
            }
        };
        return match found {
            Some(resource) => {
                unit.push_task(Task::Collect(resource));
                Step::Again
            }
            None => {
                debug!(unit = %unit.id, %target, "no material left for this build, moving on");
                unit.load_next_task();
                check_for_task_completion(unit, ctx);
                Step::Again
            }
        };
    }

    let nav = ctx.nav();
    if unit.pos != target {
        if nav.can_make_it_before_nightfall(unit, target, TRAVEL_MARGIN, buffer, avoid) {
            unit.push_task(Task::Move(target));
            return Step::Again;
        }
        let shelter = nav
            .find_closest_city_tile(target, ctx.state.player())
            .filter(|&p| p != unit.pos)
            .filter(|&p| nav.can_make_it_to_pos_without_dying(unit, p, 1.0, avoid))
            .filter(|&p| nav.unit_turn_distance(unit, p, avoid) < ctx.state.turns_until_next_day());
        return match shelter {
            Some(p) => {
                unit.push_task(Task::Move(p));
                Step::Again
            }
            None => Step::Idle,
        };
    }

    if ctx.state.turns_until_next_night() < buffer {
        return Step::Idle;
    }
    Step::Act
}

fn propose_collect(unit: &mut Unit, target: Position, ctx: &TurnContext<'_>) -> Step {
    let map = &ctx.state.map;
    if !map.has_resource(target) {
        let Some(next) = ctx.nav().find_closest_resource(target, NO_TIE_BREAK) else {
            debug!(unit = %unit.id, "wants to collect but no resource is left");
            return Step::Idle;
        };
        unit.current_task = Some(Task::Collect(next));
        if next != unit.pos {
            unit.push_task(Task::Move(next));
        }
        return Step::Again;
    }
    if !unit.pos.is_adjacent(target) || map.has_citytile(unit.pos) {
        unit.push_task(Task::Move(target));
        return Step::Again;
    }
    Step::Act
}

fn propose_move(unit: &mut Unit, target: Position, ctx: &TurnContext<'_>) -> Step {
    let nav = ctx.nav();
    let avoid = should_avoid_citytiles(unit, &*ctx.state, ctx.hp);
    if !nav.can_make_it_to_pos_without_dying(unit, target, 1.0, avoid) {
        if let Some(resource) = nav.find_closest_resource(unit.pos, NO_TIE_BREAK) {
            if resource != target {
                debug!(unit = %unit.id, %target, %resource, "would starve on the way, refuelling first");
                unit.push_task(Task::Collect(resource));
                return Step::Again;
            }
        }
    }
    Step::Act
}
