// ═══════════════════════════════════════════════════════════════════════
// Navigation — grid distance metrics and nearest-target searches
//
// tile_distance:  unit-cost BFS, used to order cluster rings.
// turn_distance:  cooldown/road-weighted search plus the night penalty,
//                 used to rank a unit's next step and to judge survival.
// ═══════════════════════════════════════════════════════════════════════

use crate::constants::Hyperparameters;
use crate::engine::GameState;
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashSet, VecDeque};

// ── Orientation ────────────────────────────────────────────────────────
// Signed coordinate tie-break, fixed once from the starting quadrant so
// ties resolve the same way every turn.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Orientation {
    pub x_mult: i32,
    pub y_mult: i32,
}

impl Default for Orientation {
    fn default() -> Self {
        Orientation { x_mult: 1, y_mult: 1 }
    }
}

impl Orientation {
    /// Mirror toward the map half the starting city sits in.
    pub fn from_start(start: Position, width: i32, height: i32) -> Self {
        Orientation {
            x_mult: if start.x > width / 2 { 1 } else { -1 },
            y_mult: if start.y > height / 2 { 1 } else { -1 },
        }
    }

    pub fn key(&self, p: Position) -> (i32, i32) {
        (self.x_mult * p.x, self.y_mult * p.y)
    }
}

/// Pass as `tie_breaker` when only distance and orientation matter.
pub const NO_TIE_BREAK: Option<fn(Position) -> i32> = None;

/// One ranked first step toward a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectionCandidate {
    pub dir: Direction,
    pub pos: Position,
    pub turns: i32,
    pub manhattan: i32,
}

// ── Navigator ──────────────────────────────────────────────────────────

/// Read-only view bundling what every distance query needs.
#[derive(Clone, Copy)]
pub struct Navigator<'a> {
    pub state: &'a GameState,
    pub hp: &'a Hyperparameters,
    pub orientation: Orientation,
}

impl<'a> Navigator<'a> {
    pub fn new(state: &'a GameState, hp: &'a Hyperparameters, orientation: Orientation) -> Self {
        Navigator { state, hp, orientation }
    }

    /// Own-city tiles that never block a path with these endpoints.
    fn endpoint_city_tiles(&self, a: Position, b: Position) -> HashSet<Position> {
        let mut out: HashSet<Position> = [a, b].into_iter().collect();
        let player = self.state.player();
        for p in [a, b] {
            if let Some(tile) = self.state.map.citytile_at(p) {
                if let Some(city) = player.cities.get(&tile.city_id) {
                    out.extend(city.tile_positions());
                }
            }
        }
        out
    }

    /// BFS steps from `from` to `to`, never stepping on `avoid`.
    /// Falls back to Manhattan distance for far-apart endpoints and gives
    /// up (returning the depth reached) past the search radius.
    pub fn tile_distance(&self, from: Position, to: Position, avoid: &BTreeSet<Position>) -> i32 {
        let map = &self.state.map;
        if !map.is_within_bounds(to) {
            return self.hp.infinite_distance;
        }
        if from == to {
            return 0;
        }
        let manhattan = from.distance_to(to);
        if manhattan > self.hp.max_search_distance {
            return manhattan;
        }

        let mut queue: VecDeque<(Position, i32)> = VecDeque::new();
        let mut visited: HashSet<Position> = HashSet::new();
        queue.push_back((to, 0));
        visited.insert(to);

        while let Some((current, step)) = queue.pop_front() {
            if step >= self.hp.max_search_distance {
                return step;
            }
            for next in current.adjacent_positions(false, false) {
                if next == from {
                    return step + 1;
                }
                if map.is_within_bounds(next) && !avoid.contains(&next) && visited.insert(next) {
                    queue.push_back((next, step + 1));
                }
            }
        }
        self.hp.infinite_distance
    }

    /// Turns for a unit with `cooldown` to get from `from` to `to`.
    ///
    /// Entering a cell costs `max(1, cooldown - road)`. Opponent city tiles
    /// are impassable, as are own units parked on a city tile with a
    /// non-MOVE task, and own city tiles when `avoid_own_cities` is set;
    /// tiles of own cities containing either endpoint stay open.
    pub fn turn_distance(
        &self,
        from: Position,
        to: Position,
        cooldown: i32,
        avoid_own_cities: bool,
        include_target_road: bool,
    ) -> i32 {
        let turns = self.raw_turn_distance(from, to, cooldown, avoid_own_cities, include_target_road);
        if turns == 0 || turns >= self.hp.infinite_distance {
            return turns;
        }
        turns + self.night_penalty(turns, cooldown)
    }

    /// Extra turns spent waiting out nights during a trip of `turns`.
    pub fn night_penalty(&self, turns: i32, cooldown: i32) -> i32 {
        let cooldown = cooldown.max(1);
        let mut extra = 0;
        let mut turn = self.state.turn + 1;
        let mut left = turns - 1;
        while left > 0 {
            if self.state.is_night_at(turn) {
                extra += cooldown;
                turn += cooldown;
            }
            turn += cooldown;
            left -= cooldown;
        }
        extra
    }

    fn raw_turn_distance(
        &self,
        from: Position,
        to: Position,
        cooldown: i32,
        avoid_own_cities: bool,
        include_target_road: bool,
    ) -> i32 {
        let map = &self.state.map;
        if !map.is_within_bounds(to) {
            return self.hp.infinite_distance;
        }
        if from == to {
            return 0;
        }
        let manhattan = from.distance_to(to);
        if manhattan > self.hp.max_search_distance {
            return manhattan * cooldown;
        }

        let step_cost = |p: Position| (cooldown as f64 - map.road_at(p)).max(1.0) as i32;
        let open = self.endpoint_city_tiles(from, to);
        let player = self.state.player();
        let mut blocked: HashSet<Position> = self.state.opponent().city_positions().into_iter().collect();
        blocked.extend(
            player
                .units
                .iter()
                .filter(|u| map.has_citytile(u.pos))
                .filter(|u| u.current_task.as_ref().map_or(false, |t| t.kind() != TaskKind::Move))
                .map(|u| u.pos),
        );
        if avoid_own_cities {
            blocked.extend(player.city_positions());
        }

        let start = if include_target_road { step_cost(to) } else { 1 };
        let mut frontier = BinaryHeap::new();
        let mut discovered: HashSet<Position> = HashSet::new();
        let (kx, ky) = self.orientation.key(to);
        frontier.push(Reverse((start, kx, ky, to)));
        discovered.insert(to);

        while let Some(Reverse((step, _, _, current))) = frontier.pop() {
            if step >= self.hp.max_search_distance * cooldown {
                return step;
            }
            for next in current.adjacent_positions(false, false) {
                if next == from {
                    return step;
                }
                let passable = map.is_within_bounds(next) && (open.contains(&next) || !blocked.contains(&next));
                if passable && discovered.insert(next) {
                    let (kx, ky) = self.orientation.key(next);
                    frontier.push(Reverse((step + step_cost(next), kx, ky, next)));
                }
            }
        }
        self.hp.infinite_distance
    }

    // ── Nearest-target searches ────────────────────────────────────────

    fn closest_by<F>(&self, from: Position, candidates: Vec<Position>, tie_breaker: Option<F>) -> Option<Position>
    where
        F: Fn(Position) -> i32,
    {
        let orient = self.orientation;
        match tie_breaker {
            Some(tb) => candidates
                .into_iter()
                .min_by_key(|&p| (from.distance_to(p), tb(p), orient.key(p))),
            None => candidates.into_iter().min_by_key(|&p| (from.distance_to(p), orient.key(p))),
        }
    }

    fn harvestable_types(&self) -> Vec<ResourceType> {
        let c = &self.state.constants;
        let player = self.state.player();
        ResourceType::ALL.into_iter().filter(|&rt| player.can_harvest(rt, c)).collect()
    }

    /// Closest live resource of a type we can currently mine.
    pub fn find_closest_resource<F>(&self, from: Position, tie_breaker: Option<F>) -> Option<Position>
    where
        F: Fn(Position) -> i32,
    {
        let types = self.harvestable_types();
        self.find_closest_of_types(from, &types, tie_breaker)
    }

    pub fn find_closest_of_types<F>(&self, from: Position, types: &[ResourceType], tie_breaker: Option<F>) -> Option<Position>
    where
        F: Fn(Position) -> i32,
    {
        let candidates = self
            .state
            .map
            .resource_cells()
            .filter(|c| c.resource_type().map_or(false, |rt| types.contains(&rt)))
            .map(|c| c.pos)
            .collect();
        self.closest_by(from, candidates, tie_breaker)
    }

    /// Like `find_closest_of_types`, skipping cells that already have as
    /// many collectors as they have open sides.
    pub fn find_closest_for_collecting<C, F>(
        &self,
        from: Position,
        types: &[ResourceType],
        collector_count: C,
        tie_breaker: Option<F>,
    ) -> Option<Position>
    where
        C: Fn(Position) -> usize,
        F: Fn(Position) -> i32,
    {
        let map = &self.state.map;
        let candidates = map
            .resource_cells()
            .filter(|c| c.resource_type().map_or(false, |rt| types.contains(&rt)))
            .filter(|c| collector_count(c.pos) < map.max_collectors_allowed_at(c.pos))
            .map(|c| c.pos)
            .collect();
        self.closest_by(from, candidates, tie_breaker)
    }

    pub fn find_closest_resource_for_collecting<C, F>(&self, from: Position, collector_count: C, tie_breaker: Option<F>) -> Option<Position>
    where
        C: Fn(Position) -> usize,
        F: Fn(Position) -> i32,
    {
        let types = self.harvestable_types();
        self.find_closest_for_collecting(from, &types, collector_count, tie_breaker)
    }

    pub fn find_closest_wood_for_collecting<C, F>(&self, from: Position, collector_count: C, tie_breaker: Option<F>) -> Option<Position>
    where
        C: Fn(Position) -> usize,
        F: Fn(Position) -> i32,
    {
        self.find_closest_for_collecting(from, &[ResourceType::Wood], collector_count, tie_breaker)
    }

    /// Closest tile of any of `player`'s cities, by Manhattan distance.
    pub fn find_closest_city_tile(&self, from: Position, player: &Player) -> Option<Position> {
        player
            .cities
            .values()
            .flat_map(|c| c.tile_positions())
            .min_by_key(|&p| (from.distance_to(p), self.orientation.key(p)))
    }

    // ── Direction ranking ──────────────────────────────────────────────

    /// Rank candidate first steps by the turns still needed to reach
    /// `target` from them, then by Manhattan distance, then by direction
    /// letter. With a tolerance, candidates more than `tolerance` turns
    /// worse than the best are dropped.
    pub fn sort_directions_by_turn_distance(
        &self,
        target: Position,
        candidates: &[(Direction, Position)],
        cooldown: i32,
        tolerance: Option<i32>,
        avoid_own_cities: bool,
    ) -> Vec<DirectionCandidate> {
        let mut ranked: Vec<DirectionCandidate> = candidates
            .iter()
            .map(|&(dir, pos)| DirectionCandidate {
                dir,
                pos,
                turns: self.turn_distance(target, pos, cooldown, avoid_own_cities, true),
                manhattan: target.distance_to(pos),
            })
            .collect();
        if let (Some(tol), Some(best)) = (tolerance, ranked.iter().map(|c| c.turns).min()) {
            ranked.retain(|c| c.turns <= tol + best);
        }
        ranked.sort_by_key(|c| (c.turns, c.manhattan, c.dir.letter()));
        ranked
    }
}
