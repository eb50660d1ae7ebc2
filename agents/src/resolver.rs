// ═══════════════════════════════════════════════════════════════════════
// Movement Resolver — simultaneous moves without two units on one cell
//
// Every moving unit brings a ranked list of first steps. Resolution runs
// in rounds:
//   1. Each unit without a live proposal takes its next candidate; a
//      unit with none left stalls and its cell becomes blocked.
//   2. Proposals are grouped by destination, most contested first.
//      Blocked destinations are refused. Own city tiles take everyone.
//      A contested cell goes to one winner and is then blocked; losers
//      try their next candidate next round.
//   3. Another round runs only while some unit is waiting to re-propose,
//      and never more rounds than there are units.
// A cleanup pass then settles the remaining single proposals, and a
// final check cancels any move onto a cell whose occupant stayed put.
// ═══════════════════════════════════════════════════════════════════════

use crate::context::TurnContext;
use crate::tasks::should_avoid_citytiles;
use lux_engine::navigation::DirectionCandidate;
use lux_engine::protocol::Command;
use lux_engine::{numeric_suffix, Direction, Position, ResourceType, Unit};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

// ── Requests ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MoveRequest {
    pub unit_id: String,
    pub pos: Position,
    /// Where the unit is ultimately headed, not just this turn's step.
    pub target: Position,
    /// Acceptable first steps, best first.
    pub candidates: Vec<DirectionCandidate>,
    pub wait: u32,
    pub is_building: bool,
}

/// Rank the first steps `unit` may take toward `target`. `None` when the
/// unit is already there.
pub fn move_request(unit: &Unit, target: Position, ctx: &TurnContext<'_>) -> Option<MoveRequest> {
    if unit.pos == target {
        return None;
    }
    let state = &*ctx.state;
    let map = &state.map;
    let hp = ctx.hp;
    let player = state.player();
    let avoid = should_avoid_citytiles(unit, state, hp);
    let escaping = unit.turns_spent_waiting_to_move >= hp.stall_escape_turns;
    let stranded_at_dusk = map.has_citytile(unit.pos) && state.turns_until_next_night() <= 1;

    let mut passable: BTreeSet<Position> = BTreeSet::from([unit.pos, target]);
    for p in [unit.pos, target] {
        if let Some(city) = player.city_at(p) {
            passable.extend(city.tile_positions());
        }
    }

    let steps: Vec<(Direction, Position)> = Direction::CARDINAL
        .into_iter()
        .map(|dir| (dir, unit.pos.translate(dir, 1)))
        .filter(|(_, p)| map.is_within_bounds(*p))
        .filter(|(_, p)| !ctx.enemy_blocked_positions.contains(p))
        .filter(|(_, p)| !unit.previous_pos.contains(p))
        .filter(|(_, p)| {
            !(stranded_at_dusk
                && !map.has_citytile(*p)
                && map.num_adjacent_resources(*p, true, true, &ResourceType::ALL) == 0)
        })
        .filter(|(_, p)| !avoid || escaping || !map.has_citytile(*p) || passable.contains(p))
        .collect();

    let tolerance = unit.turns_spent_waiting_to_move.saturating_sub(hp.stall_tolerance_offset) as i32;
    let cooldown = state.constants.cooldown(unit.unit_type);
    let candidates = ctx
        .nav()
        .sort_directions_by_turn_distance(target, &steps, cooldown, Some(tolerance), avoid);

    Some(MoveRequest {
        unit_id: unit.id.clone(),
        pos: unit.pos,
        target,
        candidates,
        wait: unit.turns_spent_waiting_to_move,
        is_building: unit.is_building(),
    })
}

// ── Resolution ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Finalized moves in the order they were settled.
    pub moves: Vec<(String, Direction)>,
    pub stalled: Vec<String>,
    /// Each requesting unit's wait counter after this turn.
    pub waits: BTreeMap<String, u32>,
}

impl Resolution {
    pub fn commands(&self) -> Vec<Command> {
        self.moves
            .iter()
            .map(|(unit_id, dir)| Command::Move { unit_id: unit_id.clone(), dir: *dir })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Moved(Direction, Position),
    Stalled,
}

struct Slot {
    req: MoveRequest,
    next: usize,
    proposal: Option<DirectionCandidate>,
    outcome: Option<Outcome>,
}

impl Slot {
    fn next_candidate(&mut self) -> Option<DirectionCandidate> {
        let c = self.req.candidates.get(self.next).copied();
        self.next += 1;
        c
    }

    fn is_open(&self) -> bool {
        self.outcome.is_none()
    }
}

struct Board<'b> {
    slots: Vec<Slot>,
    blocked: &'b mut BTreeSet<Position>,
    own_cities: &'b BTreeSet<Position>,
    settled: Vec<usize>,
}

/// Settle all move requests. `blocked` holds cells nobody may end on;
/// it is updated with every contested or vacated-then-stalled cell.
/// `own_cities` are our city tiles, which any number of units may share.
pub fn resolve(
    requests: Vec<MoveRequest>,
    blocked: &mut BTreeSet<Position>,
    own_cities: &BTreeSet<Position>,
) -> Resolution {
    for req in &requests {
        blocked.remove(&req.pos);
    }
    let rounds = requests.len();
    let mut board = Board {
        slots: requests
            .into_iter()
            .map(|req| Slot { req, next: 0, proposal: None, outcome: None })
            .collect(),
        blocked,
        own_cities,
        settled: Vec::new(),
    };

    for round in 0..rounds {
        for i in 0..board.slots.len() {
            let slot = &mut board.slots[i];
            if !slot.is_open() || slot.proposal.is_some() {
                continue;
            }
            match slot.next_candidate() {
                Some(c) => slot.proposal = Some(c),
                None => board.stall(i),
            }
        }
        board.contend(false);
        let waiting = board.slots.iter().any(|s| s.is_open() && s.proposal.is_none());
        debug!(round, waiting, "resolver round done");
        if !waiting {
            break;
        }
    }
    board.contend(true);
    for i in 0..board.slots.len() {
        if board.slots[i].is_open() {
            board.stall(i);
        }
    }
    board.cancel_moves_into_stationary();
    board.finish()
}

impl<'b> Board<'b> {
    fn stall(&mut self, i: usize) {
        let slot = &mut self.slots[i];
        slot.outcome = Some(Outcome::Stalled);
        slot.proposal = None;
        if !self.own_cities.contains(&slot.req.pos) {
            self.blocked.insert(slot.req.pos);
        }
    }

    fn finalize(&mut self, i: usize) {
        let slot = &mut self.slots[i];
        if let Some(c) = slot.proposal.take() {
            slot.outcome = Some(Outcome::Moved(c.dir, c.pos));
            self.settled.push(i);
        }
    }

    fn refuse(&mut self, i: usize, cleanup: bool) {
        if cleanup {
            self.stall(i);
        } else {
            self.slots[i].proposal = None;
        }
    }

    /// One pass over the current proposals, most contested cell first.
    fn contend(&mut self, cleanup: bool) {
        let mut groups: BTreeMap<Position, Vec<usize>> = BTreeMap::new();
        for (i, slot) in self.slots.iter().enumerate() {
            if let (true, Some(c)) = (slot.is_open(), slot.proposal) {
                groups.entry(c.pos).or_default().push(i);
            }
        }
        let mut groups: Vec<(Position, Vec<usize>)> = groups.into_iter().collect();
        groups.sort_by_key(|(dest, ids)| (Reverse(ids.len()), *dest));

        for (dest, ids) in groups {
            if self.blocked.contains(&dest) {
                for i in ids {
                    self.refuse(i, cleanup);
                }
            } else if self.own_cities.contains(&dest) {
                for i in ids {
                    self.finalize(i);
                }
            } else if ids.len() > 1 {
                let Some(winner) = ids.iter().copied().max_by_key(|&i| self.priority(i, dest)) else { continue };
                self.finalize(winner);
                self.blocked.insert(dest);
                for i in ids.into_iter().filter(|&i| i != winner) {
                    self.refuse(i, cleanup);
                }
            } else if cleanup {
                self.finalize(ids[0]);
            }
        }
    }

    /// Larger wins: swapping with the unit on `dest`, passing through
    /// rather than arriving, longest wait, currently building, lowest id.
    fn priority(&self, i: usize, dest: Position) -> (bool, bool, u32, bool, Reverse<i64>) {
        let me = &self.slots[i].req;
        let swapping = self
            .slots
            .iter()
            .any(|s| s.is_open() && s.req.pos == dest && s.proposal.map(|c| c.pos) == Some(me.pos));
        (swapping, dest != me.target, me.wait, me.is_building, Reverse(numeric_suffix(&me.unit_id)))
    }

    /// Undo moves onto a non-city cell whose unit ended up not moving,
    /// repeating until no such move remains.
    fn cancel_moves_into_stationary(&mut self) {
        loop {
            let stationary: BTreeSet<Position> = self
                .slots
                .iter()
                .filter(|s| s.outcome == Some(Outcome::Stalled))
                .map(|s| s.req.pos)
                .collect();
            let bad = self.slots.iter().position(|s| match s.outcome {
                Some(Outcome::Moved(_, dest)) => !self.own_cities.contains(&dest) && stationary.contains(&dest),
                _ => false,
            });
            let Some(i) = bad else { break };
            debug!(unit = %self.slots[i].req.unit_id, "cancelling move into a unit that stayed put");
            self.settled.retain(|&j| j != i);
            self.stall(i);
        }
    }

    fn finish(self) -> Resolution {
        let mut out = Resolution::default();
        for &i in &self.settled {
            if let Some(Outcome::Moved(dir, _)) = self.slots[i].outcome {
                out.moves.push((self.slots[i].req.unit_id.clone(), dir));
            }
        }
        for slot in &self.slots {
            let wait = match slot.outcome {
                Some(Outcome::Moved(..)) => 0,
                _ => {
                    out.stalled.push(slot.req.unit_id.clone());
                    slot.req.wait + 1
                }
            };
            out.waits.insert(slot.req.unit_id.clone(), wait);
        }
        out
    }
}
