// ═══════════════════════════════════════════════════════════════════════
// Game constants and tunable agent hyperparameters
// Both load from JSON; every field falls back to its default.
// ═══════════════════════════════════════════════════════════════════════

use crate::error::ConfigError;
use crate::types::{ResourceType, UnitType};
use serde::{Deserialize, Serialize};
use std::path::Path;

// ── Game rules ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerUnit<T> {
    pub worker: T,
    pub cart: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerResource {
    pub wood: i32,
    pub coal: i32,
    pub uranium: i32,
}

impl PerResource {
    pub fn get(&self, rt: ResourceType) -> i32 {
        match rt {
            ResourceType::Wood => self.wood,
            ResourceType::Coal => self.coal,
            ResourceType::Uranium => self.uranium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LightUpkeep {
    pub city: f64,
    pub worker: f64,
    pub cart: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchRequirements {
    pub coal: i32,
    pub uranium: i32,
}

/// Official ruleset parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConstants {
    pub day_length: i32,
    pub night_length: i32,
    pub max_days: i32,
    pub unit_action_cooldown: PerUnit<i32>,
    pub resource_capacity: PerUnit<i32>,
    pub city_build_cost: i32,
    pub light_upkeep: LightUpkeep,
    pub resource_to_fuel_rate: PerResource,
    pub worker_collection_rate: PerResource,
    pub research_requirements: ResearchRequirements,
    pub max_wood_amount: i32,
    pub max_road: f64,
}

impl Default for GameConstants {
    fn default() -> Self {
        GameConstants {
            day_length: 30,
            night_length: 10,
            max_days: 360,
            unit_action_cooldown: PerUnit { worker: 2, cart: 3 },
            resource_capacity: PerUnit { worker: 100, cart: 2000 },
            city_build_cost: 100,
            light_upkeep: LightUpkeep { city: 23.0, worker: 4.0, cart: 10.0 },
            resource_to_fuel_rate: PerResource { wood: 1, coal: 10, uranium: 40 },
            worker_collection_rate: PerResource { wood: 20, coal: 5, uranium: 2 },
            research_requirements: ResearchRequirements { coal: 50, uranium: 200 },
            max_wood_amount: 500,
            max_road: 6.0,
        }
    }
}

impl GameConstants {
    pub fn cycle_length(&self) -> i32 {
        self.day_length + self.night_length
    }

    pub fn cooldown(&self, ut: UnitType) -> i32 {
        match ut {
            UnitType::Worker => self.unit_action_cooldown.worker,
            UnitType::Cart => self.unit_action_cooldown.cart,
        }
    }

    pub fn capacity(&self, ut: UnitType) -> i32 {
        match ut {
            UnitType::Worker => self.resource_capacity.worker,
            UnitType::Cart => self.resource_capacity.cart,
        }
    }

    pub fn unit_upkeep(&self, ut: UnitType) -> f64 {
        match ut {
            UnitType::Worker => self.light_upkeep.worker,
            UnitType::Cart => self.light_upkeep.cart,
        }
    }

    pub fn fuel_rate(&self, rt: ResourceType) -> i32 {
        self.resource_to_fuel_rate.get(rt)
    }
}

// ── Agent hyperparameters ──────────────────────────────────────────────

/// Knobs that vary with map size. The row whose `map_size` is the
/// smallest one not below the map width applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizeTuning {
    pub map_size: i32,
    pub spawn_to_research_ratio: f64,
    pub builder_to_manager_ratio: f64,
    pub n_units_spawn_before_colonize: f64,
    pub max_fuel_per_manager: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hyperparameters {
    pub max_distance_from_edge: i32,
    pub build_night_turn_buffer: i32,
    pub infinite_distance: i32,
    /// Beyond this many steps the searches fall back to Manhattan distance.
    pub max_search_distance: i32,
    /// Stalled turns after which a unit may cut through any city tile.
    pub stall_escape_turns: u32,
    /// Stalled turns before direction tolerance starts widening.
    pub stall_tolerance_offset: u32,
    pub continue_to_build_after_resources_depleted: bool,
    pub manager_to_city_ratio: f64,
    pub size_tuning: Vec<SizeTuning>,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        let row = |map_size, n_units_spawn_before_colonize| SizeTuning {
            map_size,
            spawn_to_research_ratio: 1.0,
            builder_to_manager_ratio: 1.0,
            n_units_spawn_before_colonize,
            max_fuel_per_manager: 2000,
        };
        Hyperparameters {
            max_distance_from_edge: 3,
            build_night_turn_buffer: 4,
            infinite_distance: 999,
            max_search_distance: 10,
            stall_escape_turns: 5,
            stall_tolerance_offset: 3,
            continue_to_build_after_resources_depleted: false,
            manager_to_city_ratio: 1.0,
            size_tuning: vec![row(12, 2.0), row(16, 2.0), row(24, 3.0), row(32, 3.0)],
        }
    }
}

impl Hyperparameters {
    pub fn tuning_for(&self, map_width: i32) -> SizeTuning {
        self.size_tuning
            .iter()
            .filter(|t| t.map_size >= map_width)
            .min_by_key(|t| t.map_size)
            .or_else(|| self.size_tuning.iter().max_by_key(|t| t.map_size))
            .cloned()
            .unwrap_or(SizeTuning {
                map_size: map_width,
                spawn_to_research_ratio: 1.0,
                builder_to_manager_ratio: 1.0,
                n_units_spawn_before_colonize: 2.0,
                max_fuel_per_manager: 2000,
            })
    }
}

// ── Config file ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub constants: GameConstants,
    pub hyperparameters: Hyperparameters,
}

impl Config {
    pub fn from_json_str(s: &str) -> Result<Config, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Config::from_json_str(&text)
    }
}
