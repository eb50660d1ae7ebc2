// ═══════════════════════════════════════════════════════════════════════
// Cluster Engine — resource clusters, their rings, and how badly we want them
//
// Flow:
//   find_clusters()    once, when resources are first seen. 8-connected
//                      flood fill over same-type cells; ids are handed
//                      out in discovery order and never reused.
//   update()           every turn. Membership is frozen at creation, only
//                      the derived state (amount, ring, ring order,
//                      contested flag, defended cells) is recomputed.
//   score()            per colonizable cluster, after the turn sweep.
// ═══════════════════════════════════════════════════════════════════════

use crate::strategy::StrategyKind;
use lux_engine::navigation::{Navigator, Orientation};
use lux_engine::{ClusterId, GameMap, GameState, Hyperparameters, Player, Position, ResourceType};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

// ── ResourceCluster ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ResourceCluster {
    pub id: ClusterId,
    pub resource_type: ResourceType,
    members: BTreeSet<Position>,
    pub total_amount: i32,
    /// Bounding box corners, inclusive.
    pub min_loc: Position,
    pub max_loc: Position,
    pub center: Position,
    /// Empty ring cells, best first.
    pub pos_to_defend: Vec<Position>,
    /// Any city tile within one cell of the bounding box.
    pub pos_defended: Vec<Position>,
    pub pos_defended_by_player: BTreeSet<Position>,
    /// Our cities touching the padded bounding box.
    pub city_ids: BTreeSet<String>,
    pub needs_defending_from_opponent: bool,
    pub current_score: f64,
    pub n_workers_spawned: u32,
    pub n_workers_sent_to_colonize: u32,
    /// Fixed reference point for ordering the ring, set on turn 0.
    pub sort_position: Option<Position>,
}

impl ResourceCluster {
    pub fn new(id: ClusterId, resource_type: ResourceType, members: BTreeSet<Position>) -> Self {
        let (min_loc, max_loc) = bounding_box(&members);
        ResourceCluster {
            id,
            resource_type,
            members,
            total_amount: 0,
            min_loc,
            max_loc,
            center: midpoint(min_loc, max_loc),
            pos_to_defend: Vec::new(),
            pos_defended: Vec::new(),
            pos_defended_by_player: BTreeSet::new(),
            city_ids: BTreeSet::new(),
            needs_defending_from_opponent: false,
            current_score: 0.0,
            n_workers_spawned: 0,
            n_workers_sent_to_colonize: 0,
            sort_position: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn resource_positions(&self) -> &BTreeSet<Position> {
        &self.members
    }

    pub fn is_depleted(&self) -> bool {
        self.total_amount <= 0
    }

    /// Refresh every derived field from this turn's state.
    pub fn update_state(&mut self, state: &GameState, hp: &Hyperparameters, orientation: Orientation) {
        let map = &state.map;
        self.total_amount = self
            .members
            .iter()
            .filter_map(|&p| map.resource_at(p))
            .map(|r| r.amount)
            .sum();

        let (min_loc, max_loc) = bounding_box(&self.members);
        self.min_loc = min_loc;
        self.max_loc = max_loc;
        self.center = midpoint(min_loc, max_loc);

        let ring = ring_positions(min_loc, max_loc, map, hp.max_distance_from_edge);
        let nav = Navigator::new(state, hp, orientation);
        let anchor = self.sort_anchor(&ring, state, &nav);
        let mut ring: Vec<Position> = ring.into_iter().collect();
        ring.sort_by_key(|&p| (nav.tile_distance(anchor, p, &self.members), orientation.key(p)));
        self.pos_to_defend = ring;

        self.needs_defending_from_opponent = self.contested(state, orientation);
        self.scan_defended(state);
    }

    /// The explicit anchor if one was set; otherwise the nearest opponent
    /// position when none of them already sits in the ring, else our own
    /// nearest position.
    fn sort_anchor(&self, ring: &BTreeSet<Position>, state: &GameState, nav: &Navigator<'_>) -> Position {
        if let Some(p) = self.sort_position {
            return p;
        }
        let opponent = state.opponent();
        let theirs: BTreeSet<Position> = opponent.city_positions().into_iter().chain(opponent.unit_positions()).collect();
        let candidates = if !theirs.is_empty() && theirs.is_disjoint(ring) {
            theirs
        } else {
            let player = state.player();
            let ours: BTreeSet<Position> = player.city_positions().into_iter().chain(player.unit_positions()).collect();
            if ours.is_empty() {
                BTreeSet::from([Position::new(0, 0)])
            } else {
                ours
            }
        };
        candidates
            .into_iter()
            .min_by_key(|&p| (nav.tile_distance(self.center, p, &self.members), nav.orientation.key(p)))
            .unwrap_or(self.center)
    }

    /// Whether the opponent can reach the ring no more than a turn after us.
    fn contested(&self, state: &GameState, orientation: Orientation) -> bool {
        let opponent = state.opponent();
        if opponent.units.is_empty() {
            return false;
        }
        let own = &state.player().units;
        let closest = self
            .pos_to_defend
            .iter()
            .map(|&p| {
                let theirs = opponent.units.iter().map(|u| p.distance_to(u.pos)).min().unwrap_or(i32::MAX);
                let ours = own.iter().map(|u| p.distance_to(u.pos)).min().unwrap_or(0);
                let (kx, ky) = orientation.key(p);
                (theirs, -ours, kx, ky)
            })
            .min();
        match closest {
            Some((theirs, neg_ours, _, _)) => -neg_ours + 1 >= theirs,
            None => false,
        }
    }

    fn scan_defended(&mut self, state: &GameState) {
        self.pos_defended.clear();
        self.pos_defended_by_player.clear();
        self.city_ids.clear();
        let team = state.player().team;
        for x in self.min_loc.x - 1..=self.max_loc.x + 1 {
            for y in self.min_loc.y - 1..=self.max_loc.y + 1 {
                let pos = Position::new(x, y);
                let Some(tile) = state.map.citytile_at(pos) else { continue };
                if tile.team == team {
                    self.city_ids.insert(tile.city_id.clone());
                    self.pos_defended_by_player.insert(pos);
                }
                self.pos_defended.push(pos);
            }
        }
    }

    /// Desirability relative to both players, normalized by `scaling_factor`.
    /// Lots of resource, few defenders, far from our base and close to the
    /// opponent all push the score up.
    pub fn calculate_score(&mut self, player: &Player, opponent: &Player, scaling_factor: i32) -> f64 {
        let mut score = self.total_amount as f64 / scaling_factor.max(1) as f64;
        score /= self.pos_defended.len().max(1) as f64;

        let own_nearest = player
            .city_positions()
            .into_iter()
            .map(|p| self.center.distance_to(p))
            .fold(1, i32::min);
        if own_nearest > 0 {
            score /= own_nearest as f64;
        }

        let threat_nearest = opponent
            .city_positions()
            .into_iter()
            .chain(opponent.units.iter().map(|u| u.pos))
            .map(|p| self.center.distance_to(p))
            .fold(1, i32::min);
        score *= threat_nearest as f64;

        self.current_score = score;
        score
    }
}

fn bounding_box(members: &BTreeSet<Position>) -> (Position, Position) {
    let min_x = members.iter().map(|p| p.x).min().unwrap_or(0);
    let min_y = members.iter().map(|p| p.y).min().unwrap_or(0);
    let max_x = members.iter().map(|p| p.x).max().unwrap_or(0);
    let max_y = members.iter().map(|p| p.y).max().unwrap_or(0);
    (Position::new(min_x, min_y), Position::new(max_x, max_y))
}

fn midpoint(min: Position, max: Position) -> Position {
    Position::new((max.x - min.x) / 2 + min.x, (max.y - min.y) / 2 + min.y)
}

// ── Ring construction ──────────────────────────────────────────────────
// One cell outside each side of the bounding box. A side closer than
// `edge` to the map border is not defended directly; the two flanking
// columns (or rows) are run out to the border instead. The four diagonal
// corners are added only when they are farther than `edge` from the
// matching map corner. Only currently empty cells survive.

pub fn ring_positions(min: Position, max: Position, map: &GameMap, edge: i32) -> BTreeSet<Position> {
    let (w, h) = (map.width, map.height);
    let mut ring = BTreeSet::new();
    let column = |ring: &mut BTreeSet<Position>, x: i32, ys: std::ops::RangeInclusive<i32>| {
        ring.extend(ys.map(|y| Position::new(x, y)));
    };

    // top side
    if min.y < edge {
        if min.x >= edge {
            column(&mut ring, min.x - 1, 0..=min.y);
        }
        if max.x < w - edge {
            column(&mut ring, max.x + 1, 0..=min.y);
        }
    } else {
        ring.extend((min.x..=max.x).map(|x| Position::new(x, min.y - 1)));
    }

    // bottom side
    if max.y > h - edge - 1 {
        if min.x >= edge {
            column(&mut ring, min.x - 1, max.y..=h - 1);
        }
        if max.x < w - edge {
            column(&mut ring, max.x + 1, max.y..=h - 1);
        }
    } else {
        ring.extend((min.x..=max.x).map(|x| Position::new(x, max.y + 1)));
    }

    // left side
    if min.x < edge {
        if min.y >= edge {
            ring.extend((0..=min.x).map(|x| Position::new(x, min.y - 1)));
        }
        if max.y < h - edge {
            ring.extend((0..=min.x).map(|x| Position::new(x, max.y + 1)));
        }
    } else {
        column(&mut ring, min.x - 1, min.y..=max.y);
    }

    // right side
    if max.x > w - edge - 1 {
        if min.y >= edge {
            ring.extend((max.x..=w - 1).map(|x| Position::new(x, min.y - 1)));
        }
        if max.y < h - edge {
            ring.extend((max.x..=w - 1).map(|x| Position::new(x, max.y + 1)));
        }
    } else {
        column(&mut ring, max.x + 1, min.y..=max.y);
    }

    let corners = [
        (Position::new(min.x - 1, min.y - 1), Position::new(0, 0)),
        (Position::new(min.x - 1, max.y + 1), Position::new(0, h - 1)),
        (Position::new(max.x + 1, min.y - 1), Position::new(w - 1, 0)),
        (Position::new(max.x + 1, max.y + 1), Position::new(w - 1, h - 1)),
    ];
    for (corner, map_corner) in corners {
        if corner.distance_to(map_corner) > edge {
            ring.insert(corner);
        }
    }

    ring.retain(|&p| map.is_empty(p));
    ring
}

// ── ClusterSet ─────────────────────────────────────────────────────────

/// The live clusters, keyed by id, plus a position → cluster lookup that
/// is rebuilt on every update.
#[derive(Debug, Clone, Default)]
pub struct ClusterSet {
    clusters: BTreeMap<ClusterId, ResourceCluster>,
    lookup: HashMap<Position, ClusterId>,
    found: bool,
}

impl ClusterSet {
    pub fn is_found(&self) -> bool {
        self.found
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn get(&self, id: ClusterId) -> Option<&ResourceCluster> {
        self.clusters.get(&id)
    }

    pub fn get_mut(&mut self, id: ClusterId) -> Option<&mut ResourceCluster> {
        self.clusters.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceCluster> + '_ {
        self.clusters.values()
    }

    /// Flood-fill the map into same-type, 8-connected clusters.
    pub fn find_clusters(&mut self, map: &GameMap) {
        let mut seen: BTreeSet<Position> = BTreeSet::new();
        let mut next_id = 0;
        self.clusters.clear();
        for pos in map.positions() {
            if seen.contains(&pos) {
                continue;
            }
            let Some(resource_type) = map.resource_at(pos).map(|r| r.resource_type) else { continue };

            let mut members = BTreeSet::from([pos]);
            let mut stack = vec![pos];
            while let Some(current) = stack.pop() {
                for next in current.adjacent_positions(false, true) {
                    if members.contains(&next) {
                        continue;
                    }
                    if map.resource_at(next).map_or(false, |r| r.resource_type == resource_type) {
                        members.insert(next);
                        stack.push(next);
                    }
                }
            }
            seen.extend(members.iter().copied());

            let id = ClusterId(next_id);
            next_id += 1;
            debug!(cluster = id.0, %resource_type, size = members.len(), "found cluster");
            self.clusters.insert(id, ResourceCluster::new(id, resource_type, members));
        }
        self.found = true;
    }

    /// Refresh every cluster and drop the depleted, unsettled ones the
    /// active strategy has no use for.
    pub fn update(&mut self, state: &GameState, hp: &Hyperparameters, orientation: Orientation, strategy: StrategyKind) {
        let mut discard = Vec::new();
        for cluster in self.clusters.values_mut() {
            cluster.update_state(state, hp, orientation);
            if cluster.is_depleted() && cluster.pos_defended_by_player.is_empty() && !strategy.keeps_depleted_clusters() {
                discard.push(cluster.id);
            }
        }
        for id in discard {
            debug!(cluster = id.0, "discarding depleted cluster");
            self.clusters.remove(&id);
        }
        self.rebuild_lookup();
    }

    fn rebuild_lookup(&mut self) {
        self.lookup.clear();
        for cluster in self.clusters.values() {
            for x in cluster.min_loc.x - 1..=cluster.max_loc.x + 1 {
                for y in cluster.min_loc.y - 1..=cluster.max_loc.y + 1 {
                    self.lookup.entry(Position::new(x, y)).or_insert(cluster.id);
                }
            }
            for &p in &cluster.pos_to_defend {
                self.lookup.entry(p).or_insert(cluster.id);
            }
        }
    }

    /// The cluster whose padded bounding box or ring holds `pos`.
    pub fn position_to_cluster(&self, pos: Option<Position>) -> Option<ClusterId> {
        pos.and_then(|p| self.lookup.get(&p).copied())
    }

    /// Give clusters around our starting city a fixed ring anchor so the
    /// ring order does not flip between symmetric ties.
    pub fn set_sort_anchors(&mut self, start: Position, player: &Player) {
        let ours = player.city_positions();
        for cluster in self.clusters.values_mut() {
            cluster.sort_position = match cluster.pos_defended.as_slice() {
                [] => continue,
                [only] if !ours.contains(only) => Some(only.reflect_about(cluster.center)),
                _ => Some(start),
            };
        }
    }
}
