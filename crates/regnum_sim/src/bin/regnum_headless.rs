//! # REGNUM Headless Runner
//!
//! Runs the simulation core with no presentation layer attached and prints
//! one checksum line per simulated day. Two runs with the same arguments
//! must print identical output.
//!
//! ## Usage
//!
//! ```bash
//! RUST_LOG=info regnum_headless [config.toml] [--ticks N] [--entities N] [--save PATH]
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::process::ExitCode;

use regnum_core::{AuxStore, EntityId, EntityRecord, PersistError};
use regnum_sim::{
    Command, CommandKind, PeriodicContext, PeriodicSystem, SimConfig, SimResult, Simulation,
    SYSTEM_PLAYER,
};

/// Number of simulated players the demo world is split between.
const PLAYERS: u16 = 8;

/// Background "AI" that hands each due entity to its neighbour's owner now
/// and then. Stands in for a real game's periodic rules.
struct BorderDrift;

impl PeriodicSystem for BorderDrift {
    fn name(&self) -> &'static str {
        "border_drift"
    }

    fn run(&mut self, ctx: &PeriodicContext<'_>) {
        let view = ctx.state.view();
        for &id in ctx.due {
            // Deterministic pseudo-choice from tick and ID only.
            let roll = (ctx.tick ^ u64::from(id.raw()).wrapping_mul(0x9E37_79B9)) % 97;
            if roll != 0 {
                continue;
            }
            let Some(record) = view.get_entity(id) else {
                continue;
            };
            let neighbour = EntityId(id.raw().wrapping_add(1));
            let Some(target) = view.get_entity(neighbour) else {
                continue;
            };
            if target.owner_id == record.owner_id {
                continue;
            }
            let command = Command::new(
                ctx.tick + 1,
                record.owner_id,
                CommandKind::TransferOwnership {
                    entity: id,
                    to: target.owner_id,
                },
            );
            if let Err(error) = ctx.commands.submit(command) {
                tracing::warn!("{} could not submit for {}: {}", self.name(), id, error);
            }
        }
    }
}

struct Args {
    config: Option<String>,
    ticks: u64,
    entities: u16,
    save: Option<String>,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        config: None,
        ticks: 24 * 30,
        entities: 4096,
        save: None,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--ticks" | "-t" => {
                let value = iter.next().ok_or("--ticks needs a value")?;
                args.ticks = value.parse().map_err(|_| format!("bad tick count '{value}'"))?;
            }
            "--entities" | "-e" => {
                let value = iter.next().ok_or("--entities needs a value")?;
                args.entities = value
                    .parse()
                    .map_err(|_| format!("bad entity count '{value}'"))?;
            }
            "--save" | "-s" => {
                args.save = Some(iter.next().ok_or("--save needs a path")?);
            }
            "--help" | "-h" => {
                return Err(String::from(
                    "Usage: regnum_headless [config.toml] [--ticks N] [--entities N] [--save PATH]",
                ));
            }
            path => args.config = Some(path.to_string()),
        }
    }
    Ok(args)
}

fn run(args: &Args) -> SimResult<()> {
    let config = match &args.config {
        Some(path) => SimConfig::load(path)?,
        None => SimConfig::default(),
    };
    let entities = usize::from(args.entities).min(config.capacity.saturating_sub(1));

    let mut sim = Simulation::init(config)?;
    for raw in 1..=entities as u16 {
        let owner = raw % PLAYERS + 1;
        let relevance = u32::from(raw % 16);
        sim.insert_entity(EntityId(raw), EntityRecord::new(owner, raw % 4), relevance)?;
    }
    // Capitals carry a name in cold storage; the hot record holds only the slot.
    let mut names: AuxStore<String> = AuxStore::new();
    for player in 1..=PLAYERS.min(entities as u16) {
        sim.attach_aux(&mut names, EntityId(player), format!("Capital of player {player}"))?;
    }
    sim.add_system(Box::new(BorderDrift));
    sim.finish_loading()?;

    // Player 1 consolidates its first holding on day one.
    sim.submit(Command::new(
        1,
        SYSTEM_PLAYER,
        CommandKind::SetCategory {
            entity: EntityId(1),
            category: 9,
        },
    ))?;

    let mut executed = 0;
    let mut rejected = 0;
    for _ in 0..args.ticks {
        let report = sim.step()?;
        executed += report.executed;
        rejected += report.rejected;
        if sim.date().is_day_start() {
            println!("{} tick {:>6} checksum {:016x}", sim.date(), report.tick, report.checksum);
        }
    }

    let capital = sim.store().index_of(EntityId(1));
    if let Some(name) = capital.and_then(|index| names.of(sim.store(), index)) {
        println!("{name}: {:?}", sim.store().get_entity(EntityId(1))?);
    }
    println!(
        "done: {} ticks, {} commands executed, {} rejected, {} events delivered",
        sim.tick(),
        executed,
        rejected,
        sim.bus().stats().delivered
    );

    if let Some(path) = &args.save {
        let file = File::create(path).map_err(PersistError::from)?;
        let mut writer = BufWriter::new(file);
        sim.save(&mut writer)?;
        writer.flush().map_err(PersistError::from)?;
        println!("saved to {path}");
    }
    sim.shutdown();
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::from(2);
        }
    };

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!("Simulation failed: {}", error);
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}
