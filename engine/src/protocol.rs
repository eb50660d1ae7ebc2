// ═══════════════════════════════════════════════════════════════════════
// Wire protocol — turn-update records in, command strings out
// ═══════════════════════════════════════════════════════════════════════

use crate::error::ProtocolError;
use crate::types::*;
use std::str::FromStr;

/// Sentinel that closes one turn's batch of records.
pub const DONE: &str = "D_DONE";
/// Sentinel the agent writes after its commands.
pub const FINISH: &str = "D_FINISH";

// ── Records ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    ResearchPoints { team: u8, points: i32 },
    Resource { resource_type: ResourceType, x: i32, y: i32, amount: i32 },
    Unit {
        unit_type: UnitType,
        team: u8,
        id: String,
        x: i32,
        y: i32,
        cooldown: f64,
        cargo: Cargo,
    },
    City { team: u8, id: String, fuel: f64, light_upkeep: f64 },
    CityTile { team: u8, city_id: String, x: i32, y: i32, cooldown: f64 },
    Road { x: i32, y: i32, level: f64 },
    Done,
}

fn num<T: FromStr>(s: &str) -> Result<T, ProtocolError> {
    s.parse().map_err(|_| ProtocolError::BadNumber(s.to_string()))
}

/// Integer field that may arrive written as a float.
fn int(s: &str) -> Result<i32, ProtocolError> {
    match s.parse::<i32>() {
        Ok(v) => Ok(v),
        Err(_) => num::<f64>(s).map(|v| v as i32),
    }
}

fn team(s: &str) -> Result<u8, ProtocolError> {
    let t: u8 = num(s)?;
    if t > 1 {
        return Err(ProtocolError::BadTeam(t));
    }
    Ok(t)
}

fn expect_fields(tag: &str, fields: &[&str], expected: usize) -> Result<(), ProtocolError> {
    if fields.len() != expected {
        return Err(ProtocolError::FieldCount {
            tag: tag.to_string(),
            expected,
            got: fields.len(),
        });
    }
    Ok(())
}

/// Parse one whitespace-delimited record.
pub fn parse_record(line: &str) -> Result<Record, ProtocolError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let (&tag, rest) = fields.split_first().ok_or(ProtocolError::EmptyRecord)?;
    match tag {
        "rp" => {
            expect_fields(tag, rest, 2)?;
            Ok(Record::ResearchPoints { team: team(rest[0])?, points: int(rest[1])? })
        }
        "r" => {
            expect_fields(tag, rest, 4)?;
            let resource_type = ResourceType::from_wire(rest[0])
                .ok_or_else(|| ProtocolError::UnknownResource(rest[0].to_string()))?;
            Ok(Record::Resource {
                resource_type,
                x: int(rest[1])?,
                y: int(rest[2])?,
                amount: int(rest[3])?,
            })
        }
        "u" => {
            expect_fields(tag, rest, 9)?;
            let code: u8 = num(rest[0])?;
            let unit_type = UnitType::from_wire(code).ok_or(ProtocolError::UnknownUnitType(code))?;
            Ok(Record::Unit {
                unit_type,
                team: team(rest[1])?,
                id: rest[2].to_string(),
                x: int(rest[3])?,
                y: int(rest[4])?,
                cooldown: num(rest[5])?,
                cargo: Cargo {
                    wood: int(rest[6])?,
                    coal: int(rest[7])?,
                    uranium: int(rest[8])?,
                },
            })
        }
        "c" => {
            expect_fields(tag, rest, 4)?;
            Ok(Record::City {
                team: team(rest[0])?,
                id: rest[1].to_string(),
                fuel: num(rest[2])?,
                light_upkeep: num(rest[3])?,
            })
        }
        "ct" => {
            expect_fields(tag, rest, 5)?;
            Ok(Record::CityTile {
                team: team(rest[0])?,
                city_id: rest[1].to_string(),
                x: int(rest[2])?,
                y: int(rest[3])?,
                cooldown: num(rest[4])?,
            })
        }
        "ccd" => {
            expect_fields(tag, rest, 3)?;
            Ok(Record::Road { x: int(rest[0])?, y: int(rest[1])?, level: num(rest[2])? })
        }
        DONE => Ok(Record::Done),
        other => Err(ProtocolError::UnknownTag(other.to_string())),
    }
}

/// Parse every line up to (not including) the turn sentinel.
pub fn parse_turn<'a, I>(lines: I) -> Result<Vec<Record>, ProtocolError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut records = Vec::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        match parse_record(line)? {
            Record::Done => break,
            r => records.push(r),
        }
    }
    Ok(records)
}

/// First two lines of a match: our team id, then `<width> <height>`.
pub fn parse_header(id_line: &str, size_line: &str) -> Result<(u8, i32, i32), ProtocolError> {
    let player_id = team(id_line.trim())?;
    let mut dims = size_line.split_whitespace();
    let width = int(dims.next().ok_or(ProtocolError::MissingHeader("width"))?)?;
    let height = int(dims.next().ok_or(ProtocolError::MissingHeader("height"))?)?;
    Ok((player_id, width, height))
}

// ── Commands ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Move { unit_id: String, dir: Direction },
    BuildCity { unit_id: String },
    Pillage { unit_id: String },
    Transfer { src_id: String, dst_id: String, resource: ResourceType, amount: i32 },
    BuildWorker { pos: Position },
    BuildCart { pos: Position },
    Research { pos: Position },
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Move { unit_id, dir } => write!(f, "m {} {}", unit_id, dir),
            Command::BuildCity { unit_id } => write!(f, "bcity {}", unit_id),
            Command::Pillage { unit_id } => write!(f, "p {}", unit_id),
            Command::Transfer { src_id, dst_id, resource, amount } => {
                write!(f, "t {} {} {} {}", src_id, dst_id, resource, amount)
            }
            Command::BuildWorker { pos } => write!(f, "bw {} {}", pos.x, pos.y),
            Command::BuildCart { pos } => write!(f, "bc {} {}", pos.x, pos.y),
            Command::Research { pos } => write!(f, "r {} {}", pos.x, pos.y),
        }
    }
}
