// ═══════════════════════════════════════════════════════════════════════
// Survival arithmetic — how long cities last, whether a unit dies en route
// ═══════════════════════════════════════════════════════════════════════

use crate::constants::GameConstants;
use crate::engine::GameState;
use crate::navigation::Navigator;
use crate::types::*;

// ── Cities ─────────────────────────────────────────────────────────────

/// Nights' worth of upkeep in the city's fuel store.
pub fn num_night_turns_can_survive(city: &City) -> f64 {
    if city.light_upkeep <= 0.0 {
        return f64::INFINITY;
    }
    city.fuel / city.light_upkeep
}

/// Turns from now until the city runs dry, walking forward whole
/// day/night cycles while more than one night's worth of fuel remains.
pub fn num_turns_can_survive(city: &City, state: &GameState) -> f64 {
    let c = &state.constants;
    let mut turns = state.turns_until_next_night() as f64;
    let mut nights = num_night_turns_can_survive(city);
    if nights.is_infinite() {
        return nights;
    }
    while nights > c.night_length as f64 {
        turns += c.cycle_length() as f64;
        nights -= c.night_length as f64;
    }
    turns + nights
}

pub fn can_survive_until_end_of_game(city: &City, state: &GameState) -> bool {
    num_turns_can_survive(city, state) >= (state.turns_left() + 1) as f64
}

// ── Units ──────────────────────────────────────────────────────────────

/// Night turns spent outside while travelling for `travel_turns`.
pub fn night_turns_exposed(travel_turns: i32, turns_until_night: i32, c: &GameConstants) -> i32 {
    let mut left = travel_turns - turns_until_night;
    let mut nights = 0;
    while left > c.night_length {
        nights += c.night_length;
        left -= c.day_length;
    }
    nights + left.max(0)
}

impl<'a> Navigator<'a> {
    pub fn unit_turn_distance(&self, unit: &Unit, target: Position, avoid_citytiles: bool) -> i32 {
        let cooldown = self.state.constants.cooldown(unit.unit_type);
        self.turn_distance(unit.pos, target, cooldown, avoid_citytiles, false)
    }

    /// Whether the unit's carried fuel covers the nights it would spend
    /// outside on the way to `target`. Short hops onto or beside a
    /// resource always pass since the unit can refuel on arrival.
    pub fn can_make_it_to_pos_without_dying(&self, unit: &Unit, target: Position, mult: f64, avoid_citytiles: bool) -> bool {
        let map = &self.state.map;
        if unit.pos.is_adjacent(target) && map.num_adjacent_resources(target, true, true, &ResourceType::ALL) > 0 {
            return true;
        }
        if unit.pos.distance_to(target) <= 2 && map.has_resource(target) {
            return true;
        }
        let c = &self.state.constants;
        let travel = self.unit_turn_distance(unit, target, avoid_citytiles);
        let nights = night_turns_exposed(travel, self.state.turns_until_next_night(), c);
        let fuel_needed = nights as f64 * c.unit_upkeep(unit.unit_type);
        unit.total_fuel(c) as f64 >= mult * fuel_needed
    }

    pub fn can_make_it_before_nightfall(&self, unit: &Unit, target: Position, mult: f64, tolerance: i32, avoid_citytiles: bool) -> bool {
        let turns = self.unit_turn_distance(unit, target, avoid_citytiles);
        (turns as f64) * mult + (tolerance as f64) < self.state.turns_until_next_night() as f64
    }

    /// Whether the city outlives the unit's trip to its nearest tile.
    pub fn can_make_it_back_to_city(&self, unit: &Unit, city: &City, mult: f64, avoid_citytiles: bool) -> bool {
        let Some(closest) = city.tile_positions().min_by_key(|&p| unit.pos.distance_to(p)) else {
            return false;
        };
        let survive = num_turns_can_survive(city, self.state);
        mult * survive > self.unit_turn_distance(unit, closest, avoid_citytiles) as f64
    }
}
