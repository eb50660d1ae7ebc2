// ═══════════════════════════════════════════════════════════════════════
// Core types — positions, resources, units, cities, players
// ═══════════════════════════════════════════════════════════════════════

use crate::constants::GameConstants;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

// ── Enums ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    North,
    East,
    South,
    West,
    Center,
}

impl Direction {
    pub const CARDINAL: [Direction; 4] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    /// Single-letter form used on the wire.
    pub fn letter(self) -> char {
        match self {
            Direction::North => 'n',
            Direction::East => 'e',
            Direction::South => 's',
            Direction::West => 'w',
            Direction::Center => 'c',
        }
    }

    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::North => (0, -1),
            Direction::East => (1, 0),
            Direction::South => (0, 1),
            Direction::West => (-1, 0),
            Direction::Center => (0, 0),
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.letter())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub enum ResourceType {
    Wood,
    Coal,
    Uranium,
}

impl ResourceType {
    pub const ALL: [ResourceType; 3] = [ResourceType::Wood, ResourceType::Coal, ResourceType::Uranium];

    pub fn from_wire(s: &str) -> Option<ResourceType> {
        match s {
            "wood" => Some(ResourceType::Wood),
            "coal" => Some(ResourceType::Coal),
            "uranium" => Some(ResourceType::Uranium),
            _ => None,
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceType::Wood => write!(f, "wood"),
            ResourceType::Coal => write!(f, "coal"),
            ResourceType::Uranium => write!(f, "uranium"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitType {
    Worker,
    Cart,
}

impl UnitType {
    pub fn from_wire(code: u8) -> Option<UnitType> {
        match code {
            0 => Some(UnitType::Worker),
            1 => Some(UnitType::Cart),
            _ => None,
        }
    }
}

impl std::fmt::Display for UnitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitType::Worker => write!(f, "worker"),
            UnitType::Cart => write!(f, "cart"),
        }
    }
}

// ── Position ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord, Default)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32) -> Self {
        Position { x, y }
    }

    pub fn distance_to(self, other: Position) -> i32 {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }

    /// Adjacent in the game's sense: same cell or one cardinal step away.
    pub fn is_adjacent(self, other: Position) -> bool {
        self.distance_to(other) <= 1
    }

    pub fn translate(self, dir: Direction, units: i32) -> Position {
        let (dx, dy) = dir.delta();
        Position::new(self.x + dx * units, self.y + dy * units)
    }

    pub fn shift_by(self, dx: i32, dy: i32) -> Position {
        Position::new(self.x + dx, self.y + dy)
    }

    /// Point reflection about `center`.
    pub fn reflect_about(self, center: Position) -> Position {
        Position::new(2 * center.x - self.x, 2 * center.y - self.y)
    }

    pub fn adjacent_positions(self, include_center: bool, include_diagonals: bool) -> Vec<Position> {
        let mut out = Vec::with_capacity(9);
        if include_center {
            out.push(self);
        }
        for dir in Direction::CARDINAL {
            out.push(self.translate(dir, 1));
        }
        if include_diagonals {
            for (dx, dy) in [(-1, -1), (1, -1), (-1, 1), (1, 1)] {
                out.push(self.shift_by(dx, dy));
            }
        }
        out
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

// ── Cluster ID ─────────────────────────────────────────────────────────
// Sequential arena index assigned when clusters are discovered.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct ClusterId(pub u32);

impl std::fmt::Display for ClusterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cluster#{}", self.0)
    }
}

// ── Resource / Cargo ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub resource_type: ResourceType,
    pub amount: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Cargo {
    pub wood: i32,
    pub coal: i32,
    pub uranium: i32,
}

impl Cargo {
    pub fn total(&self) -> i32 {
        self.wood + self.coal + self.uranium
    }

    pub fn get(&self, rt: ResourceType) -> i32 {
        match rt {
            ResourceType::Wood => self.wood,
            ResourceType::Coal => self.coal,
            ResourceType::Uranium => self.uranium,
        }
    }

    pub fn fuel(&self, c: &GameConstants) -> i32 {
        ResourceType::ALL.iter().map(|&rt| self.get(rt) * c.fuel_rate(rt)).sum()
    }
}

// ── Task ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    Move,
    Build,
    Collect,
    Manage,
    Transfer,
    Pillage,
}

impl TaskKind {
    /// Whether a unit of this type may ever hold this task.
    pub fn valid_for(self, unit_type: UnitType) -> bool {
        match unit_type {
            UnitType::Worker => true,
            UnitType::Cart => matches!(self, TaskKind::Move | TaskKind::Transfer | TaskKind::Manage),
        }
    }

    /// Tasks that are satisfied from a cell next to the target.
    pub fn can_be_adjacent(self) -> bool {
        matches!(self, TaskKind::Collect | TaskKind::Transfer)
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Move => write!(f, "move"),
            TaskKind::Build => write!(f, "build"),
            TaskKind::Collect => write!(f, "collect"),
            TaskKind::Manage => write!(f, "manage"),
            TaskKind::Transfer => write!(f, "transfer"),
            TaskKind::Pillage => write!(f, "pillage"),
        }
    }
}

/// One unit of planned work: what to do and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Task {
    Move(Position),
    Build(Position),
    Collect(Position),
    /// Target is a city id.
    Manage(String),
    Transfer {
        target: Position,
        dest_id: String,
        resource: ResourceType,
        amount: i32,
    },
    Pillage(Position),
}

impl Task {
    pub fn kind(&self) -> TaskKind {
        match self {
            Task::Move(_) => TaskKind::Move,
            Task::Build(_) => TaskKind::Build,
            Task::Collect(_) => TaskKind::Collect,
            Task::Manage(_) => TaskKind::Manage,
            Task::Transfer { .. } => TaskKind::Transfer,
            Task::Pillage(_) => TaskKind::Pillage,
        }
    }

    /// Grid target, if the task has one (MANAGE points at a city instead).
    pub fn target_pos(&self) -> Option<Position> {
        match self {
            Task::Move(p) | Task::Build(p) | Task::Collect(p) | Task::Pillage(p) => Some(*p),
            Task::Transfer { target, .. } => Some(*target),
            Task::Manage(_) => None,
        }
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Task::Manage(city_id) => write!(f, "manage {}", city_id),
            Task::Transfer { dest_id, resource, amount, .. } => {
                write!(f, "transfer {} {} to {}", amount, resource, dest_id)
            }
            other => match other.target_pos() {
                Some(p) => write!(f, "{} {}", other.kind(), p),
                None => write!(f, "{}", other.kind()),
            },
        }
    }
}

// ── Unit ───────────────────────────────────────────────────────────────

/// A unit as held in the player's persistent arena. The raw fields are
/// refreshed from the wire each turn; the behavioral fields below them
/// carry over for as long as the id stays alive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    pub id: String,
    pub team: u8,
    pub unit_type: UnitType,
    pub pos: Position,
    pub cooldown: f64,
    pub cargo: Cargo,

    pub current_task: Option<Task>,
    pub task_queue: VecDeque<Task>,
    pub did_just_transfer: bool,
    pub turns_spent_waiting_to_move: u32,
    pub has_colonized: bool,
    pub cluster_to_defend_id: Option<ClusterId>,
    /// Last two distinct positions, oldest first.
    pub previous_pos: VecDeque<Position>,
}

impl Unit {
    pub fn new(id: impl Into<String>, team: u8, unit_type: UnitType, pos: Position) -> Self {
        Unit {
            id: id.into(),
            team,
            unit_type,
            pos,
            cooldown: 0.0,
            cargo: Cargo::default(),
            current_task: None,
            task_queue: VecDeque::new(),
            did_just_transfer: false,
            turns_spent_waiting_to_move: 0,
            has_colonized: false,
            cluster_to_defend_id: None,
            previous_pos: VecDeque::with_capacity(2),
        }
    }

    pub fn is_worker(&self) -> bool {
        self.unit_type == UnitType::Worker
    }

    pub fn can_act(&self) -> bool {
        self.cooldown < 1.0
    }

    pub fn num_resources(&self) -> i32 {
        self.cargo.total()
    }

    pub fn total_fuel(&self, c: &GameConstants) -> i32 {
        self.cargo.fuel(c)
    }

    pub fn cargo_space_left(&self, c: &GameConstants) -> i32 {
        c.capacity(self.unit_type) - self.num_resources()
    }

    pub fn has_enough_to_build(&self, c: &GameConstants) -> bool {
        self.num_resources() >= c.city_build_cost
    }

    pub fn has_enough_to_manage(&self, c: &GameConstants) -> bool {
        self.num_resources() as f64 > 0.9 * c.capacity(self.unit_type) as f64
    }

    /// BUILD is the current task or anywhere in the queue.
    pub fn is_building(&self) -> bool {
        self.current_task.iter().chain(self.task_queue.iter()).any(|t| t.kind() == TaskKind::Build)
    }

    /// Current task goes to the front of the queue; `task` takes its place.
    pub fn push_task(&mut self, task: Task) {
        if let Some(current) = self.current_task.take() {
            self.task_queue.push_front(current);
        }
        self.current_task = Some(task);
    }

    pub fn load_next_task(&mut self) {
        self.current_task = self.task_queue.pop_front();
    }

    pub fn clear_tasks(&mut self) {
        self.current_task = None;
        self.task_queue.clear();
    }

    /// Record the position seen this turn in the two-slot history.
    pub fn record_position(&mut self) {
        if self.previous_pos.contains(&self.pos) {
            return;
        }
        if self.previous_pos.len() == 2 {
            self.previous_pos.pop_front();
        }
        self.previous_pos.push_back(self.pos);
    }

    /// Copy the behavioral fields of last turn's incarnation of this unit.
    pub fn inherit_state(&mut self, prev: Unit) {
        self.current_task = prev.current_task;
        self.task_queue = prev.task_queue;
        self.did_just_transfer = prev.did_just_transfer;
        self.turns_spent_waiting_to_move = prev.turns_spent_waiting_to_move;
        self.has_colonized = prev.has_colonized;
        self.cluster_to_defend_id = prev.cluster_to_defend_id;
        self.previous_pos = prev.previous_pos;
    }
}

// ── City ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CityTile {
    pub city_id: String,
    pub team: u8,
    pub pos: Position,
    pub cooldown: f64,
    pub cluster_to_defend_id: Option<ClusterId>,
}

impl CityTile {
    pub fn can_act(&self) -> bool {
        self.cooldown < 1.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct City {
    pub id: String,
    pub team: u8,
    pub fuel: f64,
    pub light_upkeep: f64,
    pub citytiles: Vec<CityTile>,
    pub managers: BTreeSet<String>,
}

impl City {
    pub fn new(id: impl Into<String>, team: u8, fuel: f64, light_upkeep: f64) -> Self {
        City {
            id: id.into(),
            team,
            fuel,
            light_upkeep,
            citytiles: Vec::new(),
            managers: BTreeSet::new(),
        }
    }

    pub fn tile_positions(&self) -> impl Iterator<Item = Position> + '_ {
        self.citytiles.iter().map(|t| t.pos)
    }

    pub fn contains(&self, pos: Position) -> bool {
        self.citytiles.iter().any(|t| t.pos == pos)
    }

    /// Numeric suffix of ids like `c_12`, used for stable ordering.
    pub fn numeric_id(&self) -> i64 {
        numeric_suffix(&self.id)
    }
}

/// Trailing integer of a wire id (`u_7` → 7). Ids without one sort first.
pub fn numeric_suffix(id: &str) -> i64 {
    id.rsplit('_').next().and_then(|s| s.parse().ok()).unwrap_or(-1)
}

// ── Player ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub team: u8,
    pub research_points: i32,
    /// Research points at the previous update.
    pub prev_research_points: i32,
    pub units: Vec<Unit>,
    pub cities: BTreeMap<String, City>,
}

impl Player {
    pub fn new(team: u8) -> Self {
        Player {
            team,
            research_points: 0,
            prev_research_points: 0,
            units: Vec::new(),
            cities: BTreeMap::new(),
        }
    }

    pub fn researched_coal(&self, c: &GameConstants) -> bool {
        self.research_points >= c.research_requirements.coal
    }

    pub fn researched_uranium(&self, c: &GameConstants) -> bool {
        self.research_points >= c.research_requirements.uranium
    }

    pub fn can_harvest(&self, rt: ResourceType, c: &GameConstants) -> bool {
        match rt {
            ResourceType::Wood => true,
            ResourceType::Coal => self.researched_coal(c),
            ResourceType::Uranium => self.researched_uranium(c),
        }
    }

    /// Research crossed the coal or uranium threshold on the latest update.
    pub fn just_unlocked_new_resource(&self, c: &GameConstants) -> bool {
        let coal = c.research_requirements.coal;
        let uranium = c.research_requirements.uranium;
        (self.prev_research_points < coal && self.research_points >= coal)
            || (self.prev_research_points < uranium && self.research_points >= uranium)
    }

    pub fn city_tile_count(&self) -> usize {
        self.cities.values().map(|c| c.citytiles.len()).sum()
    }

    pub fn city_positions(&self) -> BTreeSet<Position> {
        self.cities.values().flat_map(|c| c.tile_positions()).collect()
    }

    pub fn unit_positions(&self) -> BTreeSet<Position> {
        self.units.iter().map(|u| u.pos).collect()
    }

    pub fn unit(&self, id: &str) -> Option<&Unit> {
        self.units.iter().find(|u| u.id == id)
    }

    pub fn unit_mut(&mut self, id: &str) -> Option<&mut Unit> {
        self.units.iter_mut().find(|u| u.id == id)
    }

    pub fn unit_ids(&self) -> BTreeSet<String> {
        self.units.iter().map(|u| u.id.clone()).collect()
    }

    /// City whose tiles include `pos`.
    pub fn city_at(&self, pos: Position) -> Option<&City> {
        self.cities.values().find(|c| c.contains(pos))
    }

    pub fn city_tile_at_mut(&mut self, pos: Position) -> Option<&mut CityTile> {
        self.cities
            .values_mut()
            .flat_map(|c| c.citytiles.iter_mut())
            .find(|t| t.pos == pos)
    }
}
