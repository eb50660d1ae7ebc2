// ═══════════════════════════════════════════════════════════════════════
// Test suite for clusters, tasks, placement, movement resolution and the
// turn pipeline
// ═══════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use crate::cluster::{ring_positions, ResourceCluster};
    use crate::context::{AgentMemory, TurnContext};
    use crate::placement::{city_tile_to_build_from_id, switch_builds_if_needed};
    use crate::random::RandomWalkStrategy;
    use crate::strategy::{Strategy, StrategyKind};
    use crate::tasks::{check_for_task_completion, propose_action, set_task, TaskError};
    use crate::turn::{unit_action_resolution, Agent};
    use lux_engine::navigation::Orientation;
    use lux_engine::protocol::{self, Command, Record};
    use lux_engine::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use std::collections::{BTreeMap, BTreeSet};

    // ── Helpers ─────────────────────────────────────────────────────────

    /// Never hands out tasks; scenarios set them by hand.
    struct IdleStrategy;

    impl Strategy for IdleStrategy {
        fn name(&self) -> &str { "Idle" }
        fn kind(&self) -> StrategyKind { StrategyKind::Starter }
        fn assign_task(&mut self, _unit: &mut Unit, _ctx: &mut TurnContext<'_>) {}
    }

    fn records(lines: &[&str]) -> Vec<Record> {
        protocol::parse_turn(lines.iter().copied()).expect("records parse")
    }

    fn state_from(width: i32, height: i32, lines: &[&str]) -> GameState {
        let mut state = GameState::new(0, width, height, GameConstants::default());
        state.update(&records(lines)).expect("update applies");
        state
    }

    fn pos(x: i32, y: i32) -> Position {
        Position::new(x, y)
    }

    fn give(state: &mut GameState, id: &str, task: Task) {
        state.player_mut().unit_mut(id).expect("unit exists").current_task = Some(task);
    }

    fn unit<'s>(state: &'s GameState, id: &str) -> &'s Unit {
        state.player().unit(id).expect("unit exists")
    }

    fn resolve_turn(state: &mut GameState, memory: &mut AgentMemory, hp: &Hyperparameters) -> Vec<Command> {
        let mut ctx = TurnContext::new(state, hp, memory);
        unit_action_resolution(&mut ctx, &mut IdleStrategy)
    }

    fn strings(commands: &[Command]) -> Vec<String> {
        commands.iter().map(|c| c.to_string()).collect()
    }

    /// Settle one unit's plan and report how many tasks were examined.
    fn settle(state: &mut GameState, memory: &mut AgentMemory, hp: &Hyperparameters, id: &str) -> usize {
        let idx = state.player().units.iter().position(|u| u.id == id).expect("unit exists");
        let mut ctx = TurnContext::new(state, hp, memory);
        ctx.with_unit(idx, |u, ctx| check_for_task_completion(u, ctx)).unwrap_or(0)
    }

    /// Run only the proposal step for one unit.
    fn propose(state: &mut GameState, memory: &mut AgentMemory, hp: &Hyperparameters, id: &str) -> Option<Task> {
        let idx = state.player().units.iter().position(|u| u.id == id).expect("unit exists");
        let mut ctx = TurnContext::new(state, hp, memory);
        ctx.with_unit(idx, |u, ctx| propose_action(u, ctx)).flatten()
    }

    fn plan(state: &GameState, id: &str) -> (Option<Task>, Vec<Task>) {
        let u = unit(state, id);
        (u.current_task.clone(), u.task_queue.iter().cloned().collect())
    }

    fn memory_with_clusters(state: &GameState, hp: &Hyperparameters) -> AgentMemory {
        let mut memory = AgentMemory::default();
        memory.clusters.find_clusters(&state.map);
        memory.clusters.update(state, hp, Orientation::default(), StrategyKind::Starter);
        memory
    }

    // ── Resolver scenarios ──────────────────────────────────────────────

    #[test]
    fn test_single_unit_steps_toward_target() {
        let hp = Hyperparameters::default();
        let mut memory = AgentMemory::default();
        let mut state = state_from(3, 3, &["rp 0 0", "rp 1 0", "u 0 0 u_1 1 0 0 0 0 0"]);
        give(&mut state, "u_1", Task::Move(pos(1, 2)));

        let out = resolve_turn(&mut state, &mut memory, &hp);
        assert_eq!(strings(&out), vec!["m u_1 s"]);
        assert_eq!(unit(&state, "u_1").turns_spent_waiting_to_move, 0);
    }

    #[test]
    fn test_crossing_paths_both_move() {
        let hp = Hyperparameters::default();
        let mut memory = AgentMemory::default();
        let mut state = state_from(3, 3, &["u 0 0 u_1 0 0 0 0 0 0", "u 0 0 u_2 1 1 0 0 0 0"]);
        give(&mut state, "u_1", Task::Move(pos(2, 2)));
        give(&mut state, "u_2", Task::Move(pos(0, 1)));

        let out = resolve_turn(&mut state, &mut memory, &hp);
        assert_eq!(strings(&out), vec!["m u_2 w", "m u_1 e"]);
    }

    #[test]
    fn test_three_way_funnel() {
        let hp = Hyperparameters::default();
        let mut memory = AgentMemory::default();
        let mut state = state_from(5, 5, &[
            "u 0 0 u_1 2 0 0 0 0 0",
            "u 0 0 u_2 1 1 0 0 0 0",
            "u 0 0 u_3 0 1 0 0 0 0",
        ]);
        give(&mut state, "u_1", Task::Move(pos(2, 1)));
        give(&mut state, "u_2", Task::Move(pos(4, 1)));
        give(&mut state, "u_3", Task::Move(pos(3, 1)));

        let out = strings(&resolve_turn(&mut state, &mut memory, &hp));
        assert_eq!(out.len(), 2);
        assert!(out.contains(&"m u_2 e".to_string()));
        assert!(out.contains(&"m u_3 e".to_string()));
        assert_eq!(unit(&state, "u_1").turns_spent_waiting_to_move, 1);

        state
            .update(&records(&[
                "u 0 0 u_1 2 0 0 0 0 0",
                "u 0 0 u_2 2 1 0 0 0 0",
                "u 0 0 u_3 1 1 0 0 0 0",
            ]))
            .unwrap();
        let out = strings(&resolve_turn(&mut state, &mut memory, &hp));
        assert!(!out.iter().any(|c| c.starts_with("m u_1")));
        assert_eq!(unit(&state, "u_1").turns_spent_waiting_to_move, 2);

        state
            .update(&records(&[
                "u 0 0 u_1 2 0 0 0 0 0",
                "u 0 0 u_2 3 1 0 0 0 0",
                "u 0 0 u_3 2 1 0 0 0 0",
            ]))
            .unwrap();
        let out = strings(&resolve_turn(&mut state, &mut memory, &hp));
        assert_eq!(out.len(), 3);
        assert!(out.contains(&"m u_1 s".to_string()));
        assert_eq!(unit(&state, "u_1").turns_spent_waiting_to_move, 0);
    }

    #[test]
    fn test_own_city_takes_every_proposer() {
        let hp = Hyperparameters::default();
        let mut memory = AgentMemory::default();
        let mut state = state_from(3, 3, &[
            "c 0 c_1 100 23",
            "ct 0 c_1 1 1 0",
            "u 0 0 u_1 0 1 0 0 0 0",
            "u 0 0 u_2 1 0 0 0 0 0",
            "u 0 0 u_3 2 1 0 0 0 0",
            "u 0 0 u_4 1 2 0 0 0 0",
        ]);
        for id in ["u_1", "u_2", "u_3", "u_4"] {
            give(&mut state, id, Task::Move(pos(1, 1)));
        }
        let out = resolve_turn(&mut state, &mut memory, &hp);
        assert_eq!(out.len(), 4);
        assert!(out.iter().all(|c| matches!(c, Command::Move { .. })));
    }

    #[test]
    fn test_manage_without_resources_is_idle() {
        let hp = Hyperparameters::default();
        let mut memory = AgentMemory::default();
        let mut state = state_from(3, 3, &["c 0 c_1 0 23", "ct 0 c_1 1 1 0", "u 0 0 u_1 0 1 0 0 0 0"]);
        give(&mut state, "u_1", Task::Manage("c_1".into()));

        let out = resolve_turn(&mut state, &mut memory, &hp);
        assert!(out.is_empty());
        assert_eq!(unit(&state, "u_1").current_task, Some(Task::Manage("c_1".into())));
    }

    #[test]
    fn test_never_steps_on_opponent_city() {
        let hp = Hyperparameters::default();
        let mut memory = AgentMemory::default();
        let mut state = state_from(3, 1, &["c 1 c_2 100 23", "ct 1 c_2 1 0 0", "u 0 0 u_1 0 0 0 0 0 0"]);
        give(&mut state, "u_1", Task::Move(pos(2, 0)));

        let out = resolve_turn(&mut state, &mut memory, &hp);
        assert!(out.is_empty());
        assert_eq!(unit(&state, "u_1").turns_spent_waiting_to_move, 1);
    }

    #[test]
    fn test_opponent_unit_on_cooldown_blocks_its_cell() {
        let hp = Hyperparameters::default();
        for (cooldown, expected) in [(2, vec![]), (0, vec!["m u_1 e"])] {
            let mut memory = AgentMemory::default();
            let opponent = format!("u 0 1 u_9 1 0 {} 0 0 0", cooldown);
            let mut state = state_from(3, 1, &["u 0 0 u_1 0 0 0 0 0 0", opponent.as_str()]);
            give(&mut state, "u_1", Task::Move(pos(2, 0)));

            let out = resolve_turn(&mut state, &mut memory, &hp);
            assert_eq!(strings(&out), expected, "opponent cooldown {}", cooldown);
        }
    }

    // ── Resolver properties ─────────────────────────────────────────────

    /// An 8x8 board with a few opponent city tiles, up to three of our own,
    /// and a crowd of our workers, each walking to a random cell. Targets
    /// lean toward our city tiles so units pile onto them.
    fn random_crowd(rng: &mut ChaCha8Rng) -> (GameState, BTreeSet<Position>, BTreeSet<Position>) {
        let (w, h) = (8, 8);
        let mut cells: Vec<Position> = (0..w).flat_map(|x| (0..h).map(move |y| pos(x, y))).collect();
        for i in (1..cells.len()).rev() {
            cells.swap(i, rng.gen_range(0..=i));
        }
        let enemy: BTreeSet<Position> = cells[..3].iter().copied().collect();
        let n_own = rng.gen_range(0..4);
        let own: BTreeSet<Position> = cells[3..3 + n_own].iter().copied().collect();
        let n_units = rng.gen_range(2..12);

        let mut lines = vec!["c 1 c_99 100 23".to_string(), "c 0 c_1 100 23".to_string()];
        lines.extend(enemy.iter().map(|p| format!("ct 1 c_99 {} {} 0", p.x, p.y)));
        lines.extend(own.iter().map(|p| format!("ct 0 c_1 {} {} 0", p.x, p.y)));
        // Some workers start on our city tiles.
        let first_unit = 3 + n_own - rng.gen_range(0..=n_own);
        for (i, p) in cells[first_unit..first_unit + n_units].iter().enumerate() {
            lines.push(format!("u 0 0 u_{} {} {} 0 0 0 0", i + 1, p.x, p.y));
        }
        let refs: Vec<&str> = lines.iter().map(|s| s.as_str()).collect();
        let mut state = state_from(w, h, &refs);

        let own_list: Vec<Position> = own.iter().copied().collect();
        for unit in &mut state.player_mut().units {
            let target = loop {
                let t = if !own_list.is_empty() && rng.gen_bool(0.4) {
                    let c = own_list[rng.gen_range(0..own_list.len())];
                    let d = Direction::CARDINAL[rng.gen_range(0..4)];
                    if rng.gen_bool(0.5) { c } else { c.translate(d, 1) }
                } else {
                    pos(rng.gen_range(0..w), rng.gen_range(0..h))
                };
                if t != unit.pos && in_board(w, h, t) {
                    break t;
                }
            };
            unit.current_task = Some(Task::Move(target));
            unit.turns_spent_waiting_to_move = rng.gen_range(0..8);
        }
        (state, enemy, own)
    }

    fn in_board(w: i32, h: i32, p: Position) -> bool {
        (0..w).contains(&p.x) && (0..h).contains(&p.y)
    }

    fn apply_moves(state: &GameState, commands: &[Command]) -> BTreeMap<String, Position> {
        let mut out: BTreeMap<String, Position> = state.player().units.iter().map(|u| (u.id.clone(), u.pos)).collect();
        for cmd in commands {
            if let Command::Move { unit_id, dir } = cmd {
                let p = out.get_mut(unit_id).expect("move for a known unit");
                *p = p.translate(*dir, 1);
            }
        }
        out
    }

    #[test]
    fn test_random_crowds_never_collide() {
        let hp = Hyperparameters::default();
        for seed in 0..200 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let (mut state, enemy, own) = random_crowd(&mut rng);
            let before: BTreeMap<String, u32> =
                state.player().units.iter().map(|u| (u.id.clone(), u.turns_spent_waiting_to_move)).collect();
            let mut memory = AgentMemory::default();
            let out = resolve_turn(&mut state, &mut memory, &hp);
            let after = apply_moves(&state, &out);

            let outside: Vec<Position> = after.values().copied().filter(|p| !own.contains(p)).collect();
            let distinct: BTreeSet<Position> = outside.iter().copied().collect();
            assert_eq!(distinct.len(), outside.len(), "seed {}: two units share a cell", seed);
            assert!(distinct.is_disjoint(&enemy), "seed {}: unit entered a blocked cell", seed);

            let moved: BTreeSet<&String> = out
                .iter()
                .filter_map(|c| match c {
                    Command::Move { unit_id, .. } => Some(unit_id),
                    _ => None,
                })
                .collect();
            for u in &state.player().units {
                let expected = if moved.contains(&u.id) { 0 } else { before[&u.id] + 1 };
                assert_eq!(u.turns_spent_waiting_to_move, expected, "seed {}: wait of {}", seed, u.id);
            }
        }
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let hp = Hyperparameters::default();
        for seed in 0..50 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let (state, _, _) = random_crowd(&mut rng);
            let (mut a, mut b) = (state.clone(), state);
            let first = resolve_turn(&mut a, &mut AgentMemory::default(), &hp);
            let second = resolve_turn(&mut b, &mut AgentMemory::default(), &hp);
            assert_eq!(first, second, "seed {}", seed);
        }
    }

    // ── Task completion ─────────────────────────────────────────────────

    #[test]
    fn test_arrival_advances_to_next_task() {
        let hp = Hyperparameters::default();
        let mut memory = AgentMemory::default();
        let mut state = state_from(4, 4, &["u 0 0 u_1 1 1 0 0 0 0"]);
        {
            let u = state.player_mut().unit_mut("u_1").unwrap();
            u.current_task = Some(Task::Move(pos(1, 1)));
            u.task_queue.push_back(Task::Move(pos(3, 3)));
        }
        let steps = settle(&mut state, &mut memory, &hp, "u_1");
        let u = unit(&state, "u_1");
        assert_eq!(steps, 2);
        assert_eq!(u.current_task, Some(Task::Move(pos(3, 3))));
        assert!(u.task_queue.is_empty());
    }

    #[test]
    fn test_collect_finishes_when_cargo_is_full() {
        let hp = Hyperparameters::default();
        let mut memory = AgentMemory::default();
        let mut state = state_from(4, 4, &["r wood 0 0 500", "u 0 0 u_1 1 0 0 100 0 0"]);
        give(&mut state, "u_1", Task::Collect(pos(0, 0)));
        settle(&mut state, &mut memory, &hp, "u_1");
        assert_eq!(unit(&state, "u_1").current_task, None);
    }

    #[test]
    fn test_build_finishes_once_the_tile_stands() {
        let hp = Hyperparameters::default();
        let mut memory = AgentMemory::default();
        let mut state = state_from(4, 4, &["c 0 c_1 0 23", "ct 0 c_1 1 1 0", "u 0 0 u_1 1 1 0 0 0 0"]);
        {
            let u = state.player_mut().unit_mut("u_1").unwrap();
            u.current_task = Some(Task::Build(pos(1, 1)));
            u.cluster_to_defend_id = Some(ClusterId(4));
        }
        settle(&mut state, &mut memory, &hp, "u_1");
        let u = unit(&state, "u_1");
        assert_eq!(u.current_task, None);
        assert!(u.has_colonized);
        assert_eq!(state.player().cities["c_1"].citytiles[0].cluster_to_defend_id, Some(ClusterId(4)));
    }

    #[test]
    fn test_pillage_and_transfer_completion() {
        let hp = Hyperparameters::default();
        let mut memory = AgentMemory::default();
        let mut state = state_from(4, 4, &["u 0 0 u_1 1 1 0 50 0 0", "u 0 0 u_2 2 1 0 0 0 0"]);
        give(&mut state, "u_1", Task::Pillage(pos(1, 1)));
        settle(&mut state, &mut memory, &hp, "u_1");
        assert_eq!(unit(&state, "u_1").current_task, None, "no road left to pillage");

        {
            let u = state.player_mut().unit_mut("u_1").unwrap();
            u.current_task = Some(Task::Transfer {
                target: pos(2, 1),
                dest_id: "u_2".into(),
                resource: ResourceType::Wood,
                amount: 50,
            });
            u.did_just_transfer = false;
        }
        settle(&mut state, &mut memory, &hp, "u_1");
        assert!(unit(&state, "u_1").current_task.is_some());

        state.player_mut().unit_mut("u_1").unwrap().did_just_transfer = true;
        settle(&mut state, &mut memory, &hp, "u_1");
        let u = unit(&state, "u_1");
        assert_eq!(u.current_task, None);
        assert!(!u.did_just_transfer);
    }

    #[test]
    fn test_manage_of_missing_city_clears_plan() {
        let hp = Hyperparameters::default();
        let mut memory = AgentMemory::default();
        let mut state = state_from(4, 4, &["u 0 0 u_1 1 1 0 0 0 0"]);
        {
            let u = state.player_mut().unit_mut("u_1").unwrap();
            u.current_task = Some(Task::Move(pos(3, 3)));
            u.task_queue.push_back(Task::Manage("c_9".into()));
        }
        assert_eq!(settle(&mut state, &mut memory, &hp, "u_1"), 0);
        let u = unit(&state, "u_1");
        assert_eq!(u.current_task, None);
        assert!(u.task_queue.is_empty());
    }

    #[test]
    fn test_manager_released_when_city_is_safe() {
        let hp = Hyperparameters::default();
        let mut memory = AgentMemory::default();
        let mut state = state_from(4, 4, &["c 0 c_1 460 23", "ct 0 c_1 1 1 0", "u 0 0 u_1 1 2 0 0 0 0"]);
        state.turn = 340;
        {
            let u = state.player_mut().unit_mut("u_1").unwrap();
            u.current_task = Some(Task::Manage("c_1".into()));
            u.cluster_to_defend_id = Some(ClusterId(0));
        }
        settle(&mut state, &mut memory, &hp, "u_1");
        let u = unit(&state, "u_1");
        assert_eq!(u.current_task, None);
        assert_eq!(u.cluster_to_defend_id, None);
    }

    #[test]
    fn test_settling_terminates_on_all_invalid_plans() {
        let hp = Hyperparameters::default();
        for seed in 0..100 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let mut memory = AgentMemory::default();
            let mut state = state_from(6, 6, &["u 0 0 u_1 2 2 0 0 0 0"]);
            let here = pos(2, 2);
            let random_task = |rng: &mut ChaCha8Rng| {
                let p = pos(rng.gen_range(0..6), rng.gen_range(0..6));
                match rng.gen_range(0..4) {
                    0 => Task::Move(here),
                    1 => Task::Pillage(p),
                    2 => Task::Build(p),
                    _ => Task::Collect(p),
                }
            };
            let len = rng.gen_range(0..7);
            {
                let current = random_task(&mut rng);
                let queue: Vec<Task> = (0..len).map(|_| random_task(&mut rng)).collect();
                let u = state.player_mut().unit_mut("u_1").unwrap();
                u.current_task = Some(current);
                u.task_queue.extend(queue);
            }
            let steps = settle(&mut state, &mut memory, &hp, "u_1");
            let u = unit(&state, "u_1");
            assert!(steps <= len + 1, "seed {}: {} steps for {} queued", seed, steps, len);
            assert_eq!(u.current_task, None, "seed {}", seed);
            assert!(u.task_queue.is_empty(), "seed {}", seed);
        }
    }

    // ── Task assignment ─────────────────────────────────────────────────

    #[test]
    fn test_set_task_rejections() {
        let hp = Hyperparameters::default();
        let mut memory = AgentMemory::default();
        let mut state = state_from(4, 4, &["u 0 0 u_1 1 1 0 100 0 0", "u 1 0 u_2 2 2 0 0 0 0"]);
        let mut ctx = TurnContext::new(&mut state, &hp, &mut memory);

        let errs = ctx
            .with_unit(0, |u, ctx| {
                (
                    set_task(u, Task::Move(pos(1, 1)), ctx),
                    set_task(u, Task::Collect(pos(0, 0)), ctx),
                    set_task(u, Task::Move(pos(3, 3)), ctx),
                )
            })
            .unwrap();
        assert_eq!(errs.0, Err(TaskError::MoveToOwnPosition(pos(1, 1))));
        assert_eq!(errs.1, Err(TaskError::CollectWithFullCargo));
        assert_eq!(errs.2, Ok(()));

        let cart = ctx.with_unit(1, |u, ctx| set_task(u, Task::Build(pos(0, 0)), ctx)).unwrap();
        assert_eq!(cart, Err(TaskError::InvalidForUnitType { kind: TaskKind::Build, unit_type: UnitType::Cart }));
        assert_eq!(ctx.state.player().units[1].current_task, None);
    }

    #[test]
    fn test_set_task_enrols_roles() {
        let hp = Hyperparameters::default();
        let mut memory = AgentMemory::default();
        let mut state = state_from(4, 4, &["c 0 c_1 0 23", "ct 0 c_1 0 0 0", "u 0 0 u_1 1 1 0 0 0 0"]);
        state.player_mut().units[0].cluster_to_defend_id = Some(ClusterId(2));
        let mut ctx = TurnContext::new(&mut state, &hp, &mut memory);

        ctx.with_unit(0, |u, ctx| set_task(u, Task::Build(pos(2, 2)), ctx)).unwrap().unwrap();
        assert!(ctx.memory.roles.is_builder("u_1", ClusterId(2)));
        ctx.with_unit(0, |u, ctx| set_task(u, Task::Manage("c_1".into()), ctx)).unwrap().unwrap();
        assert!(ctx.memory.roles.is_manager("u_1", ClusterId(2)));
        assert!(!ctx.memory.roles.is_builder("u_1", ClusterId(2)));
    }

    // ── Action proposals ────────────────────────────────────────────────

    #[test]
    fn test_build_on_target_in_daylight() {
        let hp = Hyperparameters::default();
        let mut state = state_from(5, 5, &["r wood 3 2 500", "u 0 0 u_1 2 2 0 100 0 0"]);
        let mut memory = memory_with_clusters(&state, &hp);
        give(&mut state, "u_1", Task::Build(pos(2, 2)));

        let out = resolve_turn(&mut state, &mut memory, &hp);
        assert_eq!(strings(&out), vec!["bcity u_1"]);
        assert_eq!(plan(&state, "u_1"), (Some(Task::Build(pos(2, 2))), vec![]));
    }

    #[test]
    fn test_build_waits_out_the_dusk_buffer() {
        let hp = Hyperparameters::default();
        let mut state = state_from(5, 5, &["r wood 3 2 500", "u 0 0 u_1 2 2 0 100 0 0"]);
        let mut memory = memory_with_clusters(&state, &hp);
        give(&mut state, "u_1", Task::Build(pos(2, 2)));
        state.turn = 28;
        assert!(state.turns_until_next_night() < hp.build_night_turn_buffer);

        let out = resolve_turn(&mut state, &mut memory, &hp);
        assert!(out.is_empty());
        assert_eq!(plan(&state, "u_1"), (Some(Task::Build(pos(2, 2))), vec![]));
    }

    #[test]
    fn test_build_without_material_collects_first() {
        let hp = Hyperparameters::default();
        let mut state = state_from(5, 5, &["r wood 2 0 500", "u 0 0 u_1 2 3 0 0 0 0"]);
        let mut memory = memory_with_clusters(&state, &hp);
        give(&mut state, "u_1", Task::Build(pos(2, 1)));

        let out = resolve_turn(&mut state, &mut memory, &hp);
        assert_eq!(strings(&out), vec!["m u_1 n"]);
        assert_eq!(
            plan(&state, "u_1"),
            (Some(Task::Move(pos(2, 0))), vec![Task::Collect(pos(2, 0)), Task::Build(pos(2, 1))])
        );
    }

    #[test]
    fn test_builder_shelters_when_the_way_round_the_city_is_too_long() {
        // Straight through the city tile is 7 turns, the detour 11; with
        // 14 turns of daylight left only the straight line fits the margin.
        let hp = Hyperparameters::default();
        let mut state = state_from(5, 3, &["r wood 4 0 500", "c 0 c_1 100 23", "ct 0 c_1 2 1 0", "u 0 0 u_1 0 1 0 100 0 0"]);
        let mut memory = memory_with_clusters(&state, &hp);
        give(&mut state, "u_1", Task::Build(pos(4, 1)));
        state.turn = 16;

        let out = resolve_turn(&mut state, &mut memory, &hp);
        assert_eq!(strings(&out), vec!["m u_1 e"]);
        assert_eq!(plan(&state, "u_1"), (Some(Task::Move(pos(2, 1))), vec![Task::Build(pos(4, 1))]));
    }

    #[test]
    fn test_starving_move_detours_to_fuel() {
        let hp = Hyperparameters::default();
        let mut memory = AgentMemory::default();
        let mut state = state_from(10, 3, &["r wood 1 2 500", "u 0 0 u_1 0 0 0 0 0 0"]);
        give(&mut state, "u_1", Task::Move(pos(8, 0)));
        state.turn = 30;
        assert!(state.is_night());

        let out = strings(&resolve_turn(&mut state, &mut memory, &hp));
        assert_eq!(out.len(), 1);
        assert!(out[0].starts_with("m u_1 "));
        assert_eq!(
            plan(&state, "u_1"),
            (Some(Task::Move(pos(1, 2))), vec![Task::Collect(pos(1, 2)), Task::Move(pos(8, 0))])
        );
    }

    #[test]
    fn test_collect_retargets_a_depleted_cell() {
        let hp = Hyperparameters::default();
        let mut memory = AgentMemory::default();
        let mut state = state_from(5, 1, &["r wood 2 0 500", "u 0 0 u_1 0 0 0 0 0 0"]);
        give(&mut state, "u_1", Task::Collect(pos(4, 0)));

        let action = propose(&mut state, &mut memory, &hp, "u_1");
        assert_eq!(action, Some(Task::Move(pos(2, 0))));
        assert_eq!(plan(&state, "u_1"), (Some(Task::Move(pos(2, 0))), vec![Task::Collect(pos(2, 0))]));
    }

    #[test]
    fn test_collect_retarget_onto_own_cell_harvests_in_place() {
        let hp = Hyperparameters::default();
        let mut memory = AgentMemory::default();
        let mut state = state_from(5, 1, &["r wood 2 0 500", "u 0 0 u_1 2 0 0 0 0 0"]);
        give(&mut state, "u_1", Task::Collect(pos(4, 0)));

        let action = propose(&mut state, &mut memory, &hp, "u_1");
        assert_eq!(action, Some(Task::Collect(pos(2, 0))));
        assert_eq!(plan(&state, "u_1"), (Some(Task::Collect(pos(2, 0))), vec![]));
    }

    #[test]
    fn test_transfer_follows_its_receiver() {
        let hp = Hyperparameters::default();
        let transfer = |target| Task::Transfer { target, dest_id: "u_2".into(), resource: ResourceType::Wood, amount: 50 };

        let mut memory = AgentMemory::default();
        let mut state = state_from(5, 1, &["u 0 0 u_1 0 0 0 50 0 0", "u 0 0 u_2 3 0 0 0 0 0"]);
        give(&mut state, "u_1", transfer(pos(1, 0)));
        let out = resolve_turn(&mut state, &mut memory, &hp);
        assert_eq!(strings(&out), vec!["m u_1 e"]);
        assert_eq!(plan(&state, "u_1"), (Some(Task::Move(pos(3, 0))), vec![transfer(pos(3, 0))]));

        let mut memory = AgentMemory::default();
        let mut state = state_from(5, 1, &["u 0 0 u_1 0 0 0 50 0 0", "u 0 0 u_2 1 0 0 0 0 0"]);
        give(&mut state, "u_1", transfer(pos(4, 0)));
        let out = resolve_turn(&mut state, &mut memory, &hp);
        assert_eq!(strings(&out), vec!["t u_1 u_2 wood 50"]);
        assert!(unit(&state, "u_1").did_just_transfer);
    }

    // ── Clusters ────────────────────────────────────────────────────────

    #[test]
    fn test_find_clusters_groups_by_type_and_diagonals() {
        let state = state_from(8, 8, &[
            "r wood 1 1 100",
            "r wood 2 2 100",
            "r coal 3 3 50",
            "r wood 6 6 100",
        ]);
        let hp = Hyperparameters::default();
        let memory = memory_with_clusters(&state, &hp);
        let clusters = &memory.clusters;
        assert_eq!(clusters.len(), 3);
        let sizes: Vec<(ResourceType, usize, i32)> = clusters
            .iter()
            .map(|c| (c.resource_type, c.resource_positions().len(), c.total_amount))
            .collect();
        assert_eq!(sizes, vec![
            (ResourceType::Wood, 2, 200),
            (ResourceType::Coal, 1, 50),
            (ResourceType::Wood, 1, 100),
        ]);
        assert_eq!(clusters.position_to_cluster(Some(pos(0, 0))), Some(ClusterId(0)));
        assert_eq!(clusters.position_to_cluster(Some(pos(7, 7))), Some(ClusterId(2)));
        assert_eq!(clusters.position_to_cluster(None), None);
    }

    #[test]
    fn test_ring_in_open_field() {
        let state = state_from(12, 12, &["r wood 5 5 500"]);
        let ring = ring_positions(pos(5, 5), pos(5, 5), &state.map, 3);
        let expected: BTreeSet<Position> = [(4, 4), (4, 5), (4, 6), (5, 4), (5, 6), (6, 4), (6, 5), (6, 6)]
            .into_iter()
            .map(|(x, y)| pos(x, y))
            .collect();
        assert_eq!(ring, expected);
    }

    #[test]
    fn test_ring_near_top_edge_runs_flanks_to_border() {
        let state = state_from(12, 12, &["r wood 5 1 500"]);
        let ring = ring_positions(pos(5, 1), pos(5, 1), &state.map, 3);
        let expected: BTreeSet<Position> = [(4, 0), (4, 1), (6, 0), (6, 1), (5, 2), (4, 2), (6, 2)]
            .into_iter()
            .map(|(x, y)| pos(x, y))
            .collect();
        assert_eq!(ring, expected);
        assert!(!ring.contains(&pos(5, 0)));
    }

    #[test]
    fn test_ring_in_map_corner() {
        let state = state_from(12, 12, &["r wood 0 0 500"]);
        let ring = ring_positions(pos(0, 0), pos(0, 0), &state.map, 3);
        assert_eq!(ring, BTreeSet::from([pos(1, 0), pos(0, 1), pos(1, 1)]));
    }

    #[test]
    fn test_ring_order_follows_anchor() {
        let state = state_from(12, 12, &["r wood 5 5 500"]);
        let hp = Hyperparameters::default();
        let mut cluster = ResourceCluster::new(ClusterId(0), ResourceType::Wood, BTreeSet::from([pos(5, 5)]));
        cluster.sort_position = Some(pos(5, 3));
        cluster.update_state(&state, &hp, Orientation::default());

        assert_eq!(cluster.pos_to_defend.len(), 8);
        assert_eq!(&cluster.pos_to_defend[..3], &[pos(5, 4), pos(4, 4), pos(6, 4)]);
        assert_eq!(cluster.pos_to_defend.last(), Some(&pos(5, 6)));
        assert_eq!(cluster.total_amount, 500);
        assert_eq!(cluster.center, pos(5, 5));
    }

    #[test]
    fn test_contested_when_opponent_is_close() {
        let hp = Hyperparameters::default();
        let near = state_from(12, 12, &["r wood 5 5 500", "u 0 0 u_1 0 0 0 0 0 0", "u 0 1 u_2 5 7 0 0 0 0"]);
        let memory = memory_with_clusters(&near, &hp);
        assert!(memory.clusters.get(ClusterId(0)).unwrap().needs_defending_from_opponent);

        let far = state_from(12, 12, &["r wood 5 5 500", "u 0 0 u_1 5 7 0 0 0 0", "u 0 1 u_2 0 0 0 0 0 0"]);
        let memory = memory_with_clusters(&far, &hp);
        assert!(!memory.clusters.get(ClusterId(0)).unwrap().needs_defending_from_opponent);
    }

    #[test]
    fn test_defended_cells_and_city_ids() {
        let hp = Hyperparameters::default();
        let state = state_from(12, 12, &[
            "r wood 5 5 500",
            "c 0 c_1 0 23",
            "ct 0 c_1 4 5 0",
            "c 1 c_2 0 23",
            "ct 1 c_2 6 6 0",
        ]);
        let memory = memory_with_clusters(&state, &hp);
        let cluster = memory.clusters.get(ClusterId(0)).unwrap();
        assert_eq!(cluster.pos_defended.len(), 2);
        assert_eq!(cluster.pos_defended_by_player, BTreeSet::from([pos(4, 5)]));
        assert_eq!(cluster.city_ids, BTreeSet::from(["c_1".to_string()]));
        assert!(!cluster.pos_to_defend.contains(&pos(4, 5)));
        assert!(!cluster.pos_to_defend.contains(&pos(6, 6)));
    }

    #[test]
    fn test_cluster_score() {
        let hp = Hyperparameters::default();
        let mut state = state_from(12, 12, &["r wood 5 5 500"]);
        let mut memory = memory_with_clusters(&state, &hp);
        let (player, opponent) = (state.player().clone(), state.opponent().clone());
        let cluster = memory.clusters.get_mut(ClusterId(0)).unwrap();
        assert!((cluster.calculate_score(&player, &opponent, 1000) - 0.5).abs() < 1e-9);

        state.update(&records(&["r wood 5 5 500", "u 0 1 u_9 5 5 0 0 0 0"])).unwrap();
        let cluster = memory.clusters.get_mut(ClusterId(0)).unwrap();
        assert_eq!(cluster.calculate_score(state.player(), state.opponent(), 1000), 0.0);
    }

    #[test]
    fn test_cluster_amount_only_shrinks() {
        let hp = Hyperparameters::default();
        let mut state = state_from(8, 8, &["r wood 2 2 300", "r wood 3 2 200"]);
        let mut memory = memory_with_clusters(&state, &hp);
        let mut last = memory.clusters.get(ClusterId(0)).unwrap().total_amount;
        for remaining in [(280, 200), (250, 180), (250, 0)] {
            let a = format!("r wood 2 2 {}", remaining.0);
            let b = format!("r wood 3 2 {}", remaining.1);
            state.update(&records(&[a.as_str(), b.as_str()])).unwrap();
            memory.clusters.update(&state, &hp, Orientation::default(), StrategyKind::Starter);
            let now = memory.clusters.get(ClusterId(0)).unwrap().total_amount;
            assert!(now <= last);
            last = now;
        }
        assert_eq!(last, 250);
    }

    #[test]
    fn test_depleted_cluster_dropped_for_starter_only() {
        let hp = Hyperparameters::default();
        let mut state = state_from(8, 8, &["r wood 2 2 300"]);
        let mut starter = memory_with_clusters(&state, &hp);
        let mut other = starter.clone();
        state.update(&records(&["rp 0 0"])).unwrap();

        starter.clusters.update(&state, &hp, Orientation::default(), StrategyKind::Starter);
        other.clusters.update(&state, &hp, Orientation::default(), StrategyKind::ResearchBased);
        assert!(starter.clusters.is_empty());
        assert_eq!(other.clusters.len(), 1);
    }

    // ── Placement ───────────────────────────────────────────────────────

    #[test]
    fn test_build_site_prefers_city_neighbors_on_ties() {
        let hp = Hyperparameters::default();
        for (with_city, expected) in [(false, pos(4, 4)), (true, pos(6, 4))] {
            let mut lines = vec!["r wood 5 5 500", "u 0 0 u_1 5 3 0 0 0 0"];
            if with_city {
                lines.extend(["c 0 c_1 0 23", "ct 0 c_1 7 4 0"]);
            }
            let mut state = state_from(12, 12, &lines);
            let mut memory = memory_with_clusters(&state, &hp);
            let mut ctx = TurnContext::new(&mut state, &hp, &mut memory);
            ctx.pos_being_built.insert(pos(5, 4));
            let u = ctx.state.player().units[0].clone();
            assert_eq!(city_tile_to_build_from_id(ClusterId(0), &u, &ctx), Some(expected));
        }
    }

    #[test]
    fn test_builder_switches_to_closer_site() {
        let hp = Hyperparameters::default();
        let mut state = state_from(12, 12, &["r wood 5 5 500", "u 0 0 u_1 5 3 0 0 0 0"]);
        {
            let u = state.player_mut().unit_mut("u_1").unwrap();
            u.cluster_to_defend_id = Some(ClusterId(0));
            u.current_task = Some(Task::Build(pos(6, 6)));
        }
        let mut memory = memory_with_clusters(&state, &hp);
        memory.roles.add_as_builder("u_1", Some(ClusterId(0)));
        let mut ctx = TurnContext::new(&mut state, &hp, &mut memory);
        ctx.pos_being_built.insert(pos(6, 6));

        switch_builds_if_needed(&mut ctx);
        assert_eq!(ctx.state.player().units[0].current_task, Some(Task::Build(pos(5, 4))));
        assert_eq!(ctx.pos_being_built, BTreeSet::from([pos(5, 4)]));
    }

    #[test]
    fn test_builder_leaves_target_taken_by_opponent() {
        let hp = Hyperparameters::default();
        let mut state = state_from(12, 12, &["r wood 5 5 500", "u 0 0 u_1 5 3 0 0 0 0", "u 0 1 u_2 6 6 0 0 0 0"]);
        {
            let u = state.player_mut().unit_mut("u_1").unwrap();
            u.cluster_to_defend_id = Some(ClusterId(0));
            u.current_task = Some(Task::Build(pos(6, 6)));
        }
        let mut memory = memory_with_clusters(&state, &hp);
        assert!(memory.clusters.get(ClusterId(0)).unwrap().needs_defending_from_opponent);
        memory.roles.add_as_builder("u_1", Some(ClusterId(0)));
        let mut ctx = TurnContext::new(&mut state, &hp, &mut memory);
        ctx.pos_being_built.insert(pos(6, 6));

        switch_builds_if_needed(&mut ctx);
        assert_eq!(ctx.state.player().units[0].current_task, Some(Task::Build(pos(5, 4))));
    }

    #[test]
    fn test_settled_builder_is_not_moved() {
        let hp = Hyperparameters::default();
        let mut state = state_from(12, 12, &["r wood 5 5 500", "u 0 0 u_1 6 6 0 100 0 0"]);
        {
            let u = state.player_mut().unit_mut("u_1").unwrap();
            u.cluster_to_defend_id = Some(ClusterId(0));
            u.current_task = Some(Task::Build(pos(6, 6)));
        }
        let mut memory = memory_with_clusters(&state, &hp);
        memory.roles.add_as_builder("u_1", Some(ClusterId(0)));
        let mut ctx = TurnContext::new(&mut state, &hp, &mut memory);
        ctx.pos_being_built.insert(pos(6, 6));

        switch_builds_if_needed(&mut ctx);
        assert_eq!(ctx.state.player().units[0].current_task, Some(Task::Build(pos(6, 6))));
    }

    // ── Turn pipeline ───────────────────────────────────────────────────

    #[test]
    fn test_starter_first_turn() {
        let mut state = state_from(12, 12, &[
            "rp 0 0",
            "rp 1 0",
            "r wood 3 3 500",
            "r wood 4 3 500",
            "c 0 c_1 0 23",
            "ct 0 c_1 2 2 0",
            "u 0 0 u_1 2 2 0 0 0 0",
        ]);
        let mut agent = Agent::starter(Hyperparameters::default());
        let out = agent.play_turn(&mut state);

        assert!(out.contains(&Command::Research { pos: pos(2, 2) }));
        let u = unit(&state, "u_1");
        assert!(u.has_colonized);
        assert_eq!(u.cluster_to_defend_id, Some(ClusterId(0)));
        assert!(u.current_task.iter().chain(u.task_queue.iter()).any(|t| matches!(t, Task::Build(_))));
        assert!(agent.memory.roles.is_builder("u_1", ClusterId(0)));
    }

    #[test]
    fn test_city_spawns_when_tiles_outnumber_units() {
        let lines = ["r wood 3 3 500", "c 0 c_1 0 23", "ct 0 c_1 2 2 0", "ct 0 c_1 2 3 0"];
        let count = |out: &[Command]| {
            (
                out.iter().filter(|c| matches!(c, Command::BuildWorker { .. })).count(),
                out.iter().filter(|c| matches!(c, Command::Research { .. })).count(),
            )
        };

        let mut empty = state_from(12, 12, &lines);
        let mut agent = Agent::starter(Hyperparameters::default());
        assert_eq!(count(&agent.play_turn(&mut empty)), (2, 0));
        assert_eq!(agent.memory.clusters.get(ClusterId(0)).unwrap().n_workers_spawned, 2);

        let mut lines = lines.to_vec();
        lines.push("u 0 0 u_1 8 8 0 0 0 0");
        let mut staffed = state_from(12, 12, &lines);
        let mut agent = Agent::starter(Hyperparameters::default());
        assert_eq!(count(&agent.play_turn(&mut staffed)), (1, 1));
    }

    #[test]
    fn test_random_walk_is_reproducible() {
        let lines = [
            "u 0 0 u_1 0 0 0 0 0 0",
            "u 0 0 u_2 3 3 0 0 0 0",
            "u 0 0 u_3 5 1 0 0 0 0",
            "u 0 0 u_4 7 7 0 0 0 0",
        ];
        let run = || {
            let mut state = state_from(8, 8, &lines);
            let mut agent = Agent::new(Hyperparameters::default(), Box::new(RandomWalkStrategy::new(42)));
            let out = agent.play_turn(&mut state);
            let positions = apply_moves(&state, &out);
            (out, positions)
        };
        let (first, positions) = run();
        let (second, _) = run();
        assert_eq!(first, second);
        let distinct: BTreeSet<Position> = positions.values().copied().collect();
        assert_eq!(distinct.len(), positions.len());
    }
}
