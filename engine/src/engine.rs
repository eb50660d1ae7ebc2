// ═══════════════════════════════════════════════════════════════════════
// Game State — per-turn ingestion and the day/night clock
//
// Architecture:
//   The state is a pure data holder. It never does I/O. The runner reads
//   a turn's records off the wire, hands them to `update()`, and then
//   passes the state to the agent pipeline.
//
//   The grid and the cities are rebuilt from scratch each turn. Units
//   live in a persistent per-player arena: a unit whose id shows up
//   again keeps its task, queue and bookkeeping, and only its position,
//   cooldown and cargo are refreshed. Ids that stop appearing are gone.
// ═══════════════════════════════════════════════════════════════════════

use crate::constants::GameConstants;
use crate::error::ProtocolError;
use crate::map::{CityTileRef, GameMap};
use crate::protocol::Record;
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameState {
    /// Our team.
    pub id: u8,
    /// -1 before the first update.
    pub turn: i32,
    pub map: GameMap,
    pub players: [Player; 2],
    pub constants: GameConstants,
}

impl GameState {
    pub fn new(id: u8, width: i32, height: i32, constants: GameConstants) -> Self {
        GameState {
            id,
            turn: -1,
            map: GameMap::new(width, height, constants.max_wood_amount),
            players: [Player::new(0), Player::new(1)],
            constants,
        }
    }

    pub fn player(&self) -> &Player {
        &self.players[self.id as usize]
    }

    pub fn player_mut(&mut self) -> &mut Player {
        &mut self.players[self.id as usize]
    }

    pub fn opponent(&self) -> &Player {
        &self.players[(1 - self.id) as usize]
    }

    // ── Clock ──────────────────────────────────────────────────────────

    pub fn is_night_at(&self, turn: i32) -> bool {
        self.constants.day_length - turn.rem_euclid(self.constants.cycle_length()) <= 0
    }

    pub fn is_night(&self) -> bool {
        self.is_night_at(self.turn)
    }

    pub fn turns_until_next_night(&self) -> i32 {
        (self.constants.day_length - self.turn.rem_euclid(self.constants.cycle_length())).max(0)
    }

    pub fn turns_until_next_day(&self) -> i32 {
        self.constants.cycle_length() - self.turn.rem_euclid(self.constants.cycle_length())
    }

    pub fn turns_left(&self) -> i32 {
        self.constants.max_days - self.turn
    }

    // ── Ingestion ──────────────────────────────────────────────────────

    fn check_bounds(&self, x: i32, y: i32) -> Result<Position, ProtocolError> {
        let pos = Position::new(x, y);
        if self.map.is_within_bounds(pos) {
            Ok(pos)
        } else {
            Err(ProtocolError::OutOfBounds(x, y))
        }
    }

    /// Reject a turn before anything is torn down: every coordinate must be
    /// on the map and every city tile must follow its city's record.
    fn validate(&self, records: &[Record]) -> Result<(), ProtocolError> {
        let mut cities: HashSet<(u8, &str)> = HashSet::new();
        for record in records {
            match record {
                Record::Resource { x, y, .. } | Record::Unit { x, y, .. } | Record::Road { x, y, .. } => {
                    self.check_bounds(*x, *y)?;
                }
                Record::City { team, id, .. } => {
                    cities.insert((*team, id.as_str()));
                }
                Record::CityTile { team, city_id, x, y, .. } => {
                    self.check_bounds(*x, *y)?;
                    if !cities.contains(&(*team, city_id.as_str())) {
                        return Err(ProtocolError::UnknownCity(city_id.clone()));
                    }
                }
                Record::ResearchPoints { .. } => {}
                Record::Done => break,
            }
        }
        Ok(())
    }

    /// Apply one turn's worth of records and advance the turn counter. A
    /// rejected turn leaves the state exactly as it was.
    pub fn update(&mut self, records: &[Record]) -> Result<(), ProtocolError> {
        self.validate(records)?;
        self.turn += 1;
        self.map = GameMap::new(self.map.width, self.map.height, self.constants.max_wood_amount);

        let mut old_units: [HashMap<String, Unit>; 2] = Default::default();
        let mut old_tile_clusters: [HashMap<Position, ClusterId>; 2] = Default::default();
        for (team, player) in self.players.iter_mut().enumerate() {
            player.prev_research_points = player.research_points;
            old_units[team] = player.units.drain(..).map(|u| (u.id.clone(), u)).collect();
            old_tile_clusters[team] = std::mem::take(&mut player.cities)
                .into_values()
                .flat_map(|c| c.citytiles.into_iter())
                .filter_map(|t| t.cluster_to_defend_id.map(|id| (t.pos, id)))
                .collect();
        }

        for record in records {
            match record {
                Record::ResearchPoints { team, points } => {
                    self.players[*team as usize].research_points = *points;
                }
                Record::Resource { resource_type, x, y, amount } => {
                    let pos = self.check_bounds(*x, *y)?;
                    self.map.set_resource(pos, *resource_type, *amount);
                }
                Record::Unit { unit_type, team, id, x, y, cooldown, cargo } => {
                    let pos = self.check_bounds(*x, *y)?;
                    let mut unit = Unit::new(id.clone(), *team, *unit_type, pos);
                    unit.cooldown = *cooldown;
                    unit.cargo = *cargo;
                    if let Some(prev) = old_units[*team as usize].remove(id) {
                        unit.inherit_state(prev);
                    }
                    unit.record_position();
                    self.players[*team as usize].units.push(unit);
                }
                Record::City { team, id, fuel, light_upkeep } => {
                    self.players[*team as usize]
                        .cities
                        .insert(id.clone(), City::new(id.clone(), *team, *fuel, *light_upkeep));
                }
                Record::CityTile { team, city_id, x, y, cooldown } => {
                    let pos = self.check_bounds(*x, *y)?;
                    let cluster_to_defend_id = old_tile_clusters[*team as usize].get(&pos).copied();
                    let city = self.players[*team as usize]
                        .cities
                        .get_mut(city_id)
                        .ok_or_else(|| ProtocolError::UnknownCity(city_id.clone()))?;
                    city.citytiles.push(CityTile {
                        city_id: city_id.clone(),
                        team: *team,
                        pos,
                        cooldown: *cooldown,
                        cluster_to_defend_id,
                    });
                    if let Some(cell) = self.map.cell_mut(pos) {
                        cell.citytile = Some(CityTileRef { team: *team, city_id: city_id.clone() });
                    }
                }
                Record::Road { x, y, level } => {
                    let pos = self.check_bounds(*x, *y)?;
                    if let Some(cell) = self.map.cell_mut(pos) {
                        cell.road = *level;
                    }
                }
                Record::Done => break,
            }
        }

        for (team, gone) in old_units.iter().enumerate() {
            for id in gone.keys() {
                debug!(team, unit = %id, "unit no longer reported, dropping");
            }
        }
        Ok(())
    }
}
