// ═══════════════════════════════════════════════════════════════════════
// Runner — CLI entry point speaking the match protocol
//
// stdout carries protocol output only; all diagnostics go to stderr
// through tracing.
// ═══════════════════════════════════════════════════════════════════════

use clap::{Parser, Subcommand, ValueEnum};
use lux_agents::{Agent, RandomWalkStrategy, StarterStrategy, Strategy};
use lux_engine::protocol::{self, Command, DONE, FINISH};
use lux_engine::{Config, GameState};
use std::error::Error;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "lux_agents=info,lux_engine=info,lux_runner=info";

#[derive(Parser)]
#[command(name = "lux-runner", about = "Lux AI 2021 agent")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// JSON file overriding game constants and hyperparameters
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Log filter, e.g. "debug" or "lux_agents=debug"; RUST_LOG wins if set
    #[arg(short, long, global = true)]
    log_level: Option<String>,
    #[arg(short, long, global = true, value_enum, default_value_t = StrategyArg::Starter)]
    strategy: StrategyArg,
    /// Seed for the random-walk strategy
    #[arg(long, global = true, default_value_t = 42)]
    seed: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a match over stdin/stdout
    Play,
    /// Re-run a recorded observation file and print each turn's commands
    Replay {
        #[arg(short, long)]
        file: PathBuf,
        /// Print one JSON array of command strings per turn
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StrategyArg {
    Starter,
    RandomWalk,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    let config = match &cli.config {
        Some(path) => Config::from_json_file(path).map_err(|e| format!("loading {}: {}", path.display(), e))?,
        None => Config::default(),
    };
    let strategy: Box<dyn Strategy> = match cli.strategy {
        StrategyArg::Starter => Box::new(StarterStrategy::new()),
        StrategyArg::RandomWalk => Box::new(RandomWalkStrategy::new(cli.seed)),
    };
    let agent = Agent::new(config.hyperparameters.clone(), strategy);

    match cli.command {
        Commands::Play => {
            let stdin = io::stdin();
            let stdout = io::stdout();
            let mut session = Session::new(agent, config, stdin.lock(), stdout.lock());
            session.run(Output::Protocol)
        }
        Commands::Replay { file, json } => {
            let reader = std::fs::File::open(&file).map_err(|e| format!("opening {}: {}", file.display(), e))?;
            let stdout = io::stdout();
            let mut session = Session::new(agent, config, BufReader::new(reader), stdout.lock());
            session.run(if json { Output::Json } else { Output::Listing })
        }
    }
}

fn init_logging(level: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.unwrap_or(DEFAULT_FILTER)))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

// ── Session ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Output {
    /// Comma-separated commands, then the finish sentinel.
    Protocol,
    /// "turn N: cmd, cmd"
    Listing,
    Json,
}

struct Session<R, W> {
    agent: Agent,
    config: Config,
    input: R,
    out: W,
}

impl<R: BufRead, W: Write> Session<R, W> {
    fn new(agent: Agent, config: Config, input: R, out: W) -> Self {
        Session { agent, config, input, out }
    }

    fn run(&mut self, mode: Output) -> Result<(), Box<dyn Error>> {
        let Some(id_line) = self.next_line()? else { return Ok(()) };
        let size_line = self.next_line()?.ok_or("input ended before the map size line")?;
        let (player_id, width, height) = protocol::parse_header(&id_line, &size_line)?;
        info!(player_id, width, height, strategy = self.agent.strategy_name(), "match started");

        let mut state = GameState::new(player_id, width, height, self.config.constants.clone());
        while let Some(lines) = self.next_turn()? {
            let commands = self.play(&mut state, &lines);
            self.emit(mode, state.turn, &commands)?;
        }
        info!(turns = state.turn + 1, "input closed");
        Ok(())
    }

    fn next_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end().to_string()))
    }

    /// Lines of one turn, without the sentinel. `None` at end of input.
    fn next_turn(&mut self) -> io::Result<Option<Vec<String>>> {
        let mut lines = Vec::new();
        loop {
            match self.next_line()? {
                None if lines.is_empty() => return Ok(None),
                None => return Ok(Some(lines)),
                Some(line) if line.trim() == DONE => return Ok(Some(lines)),
                Some(line) => lines.push(line),
            }
        }
    }

    /// A malformed turn is answered with no commands rather than ending
    /// the match.
    fn play(&mut self, state: &mut GameState, lines: &[String]) -> Vec<Command> {
        let records = match protocol::parse_turn(lines.iter().map(|s| s.as_str())) {
            Ok(r) => r,
            Err(e) => {
                warn!(turn = state.turn + 1, error = %e, "malformed turn, skipping");
                return Vec::new();
            }
        };
        if let Err(e) = state.update(&records) {
            warn!(turn = state.turn, error = %e, "could not apply turn, skipping");
            return Vec::new();
        }
        self.agent.play_turn(state)
    }

    fn emit(&mut self, mode: Output, turn: i32, commands: &[Command]) -> io::Result<()> {
        let strings: Vec<String> = commands.iter().map(|c| c.to_string()).collect();
        match mode {
            Output::Protocol => {
                writeln!(self.out, "{}", strings.join(","))?;
                writeln!(self.out, "{}", FINISH)?;
            }
            Output::Listing => writeln!(self.out, "turn {}: {}", turn, strings.join(", "))?,
            Output::Json => {
                let line = serde_json::to_string(&strings).map_err(io::Error::other)?;
                writeln!(self.out, "{}", line)?;
            }
        }
        self.out.flush()
    }
}
