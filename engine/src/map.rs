// ═══════════════════════════════════════════════════════════════════════
// Grid — per-turn snapshot of the W×H board
// Rebuilt from the wire every turn; cells are stored row-major.
// ═══════════════════════════════════════════════════════════════════════

use crate::types::*;
use serde::{Deserialize, Serialize};

/// Weak reference from a cell to the city tile standing on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CityTileRef {
    pub team: u8,
    pub city_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    pub pos: Position,
    pub resource: Option<Resource>,
    pub citytile: Option<CityTileRef>,
    pub road: f64,
}

impl Cell {
    /// A live resource; growing wood (below the regrowth cap) optionally excluded.
    pub fn has_resource(&self, include_wood_that_is_growing: bool, max_wood_amount: i32) -> bool {
        match self.resource {
            None => false,
            Some(r) if r.amount <= 0 => false,
            Some(r) => {
                include_wood_that_is_growing
                    || r.resource_type != ResourceType::Wood
                    || r.amount >= max_wood_amount
            }
        }
    }

    pub fn resource_type(&self) -> Option<ResourceType> {
        self.resource.filter(|r| r.amount > 0).map(|r| r.resource_type)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameMap {
    pub width: i32,
    pub height: i32,
    pub max_wood_amount: i32,
    cells: Vec<Cell>,
}

impl GameMap {
    pub fn new(width: i32, height: i32, max_wood_amount: i32) -> Self {
        let mut cells = Vec::with_capacity((width.max(0) * height.max(0)) as usize);
        for y in 0..height {
            for x in 0..width {
                cells.push(Cell {
                    pos: Position::new(x, y),
                    resource: None,
                    citytile: None,
                    road: 0.0,
                });
            }
        }
        GameMap { width, height, max_wood_amount, cells }
    }

    pub fn is_within_bounds(&self, pos: Position) -> bool {
        pos.x >= 0 && pos.y >= 0 && pos.x < self.width && pos.y < self.height
    }

    fn index(&self, pos: Position) -> Option<usize> {
        if self.is_within_bounds(pos) {
            Some((pos.y * self.width + pos.x) as usize)
        } else {
            None
        }
    }

    pub fn cell(&self, pos: Position) -> Option<&Cell> {
        self.index(pos).map(|i| &self.cells[i])
    }

    pub fn cell_mut(&mut self, pos: Position) -> Option<&mut Cell> {
        self.index(pos).map(move |i| &mut self.cells[i])
    }

    pub fn center(&self) -> Position {
        Position::new(self.width / 2, self.height / 2)
    }

    /// Every position, x-major then y (the order clusters are discovered in).
    pub fn positions(&self) -> impl Iterator<Item = Position> + '_ {
        (0..self.width).flat_map(move |x| (0..self.height).map(move |y| Position::new(x, y)))
    }

    pub fn resource_cells(&self) -> impl Iterator<Item = &Cell> + '_ {
        self.cells.iter().filter(|c| c.resource_type().is_some())
    }

    pub fn resource_at(&self, pos: Position) -> Option<Resource> {
        self.cell(pos).and_then(|c| c.resource).filter(|r| r.amount > 0)
    }

    pub fn has_resource(&self, pos: Position) -> bool {
        self.resource_at(pos).is_some()
    }

    pub fn citytile_at(&self, pos: Position) -> Option<&CityTileRef> {
        self.cell(pos).and_then(|c| c.citytile.as_ref())
    }

    pub fn has_citytile(&self, pos: Position) -> bool {
        self.citytile_at(pos).is_some()
    }

    pub fn road_at(&self, pos: Position) -> f64 {
        self.cell(pos).map_or(0.0, |c| c.road)
    }

    /// In bounds with neither a resource nor a city tile.
    pub fn is_empty(&self, pos: Position) -> bool {
        match self.cell(pos) {
            Some(c) => c.citytile.is_none() && !c.has_resource(true, self.max_wood_amount),
            None => false,
        }
    }

    /// How many units can collect from `pos` at once: its open cardinal neighbors.
    pub fn max_collectors_allowed_at(&self, pos: Position) -> usize {
        pos.adjacent_positions(false, false)
            .into_iter()
            .filter(|&p| self.is_within_bounds(p) && !self.has_citytile(p))
            .count()
    }

    /// Resource cells among `pos`'s cardinal neighbors (and `pos` itself if
    /// `include_center`), restricted to `harvestable` types.
    pub fn num_adjacent_resources(
        &self,
        pos: Position,
        include_center: bool,
        include_wood_that_is_growing: bool,
        harvestable: &[ResourceType],
    ) -> usize {
        pos.adjacent_positions(include_center, false)
            .into_iter()
            .filter_map(|p| self.cell(p))
            .filter(|c| c.has_resource(include_wood_that_is_growing, self.max_wood_amount))
            .filter(|c| c.resource_type().map_or(false, |rt| harvestable.contains(&rt)))
            .count()
    }

    pub fn set_resource(&mut self, pos: Position, resource_type: ResourceType, amount: i32) -> bool {
        match self.cell_mut(pos) {
            Some(cell) => {
                cell.resource = Some(Resource { resource_type, amount });
                true
            }
            None => false,
        }
    }
}
