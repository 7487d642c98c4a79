//! # CRD Replay
//!
//! Replays a motion program through the look-ahead planner against the
//! simulated card and reports the planned exit speed of every record the
//! card received.
//!
//! # Usage
//!
//! ```bash
//! crd_replay --config config/replay.toml --program config/program.toml
//!
//! # Second FIFO, verbose, JSON report
//! crd_replay -c config/replay.toml -p config/program.toml --fifo 1 -v --json
//! ```

#![deny(warnings)]

use clap::Parser;
use crd::prelude::{ConfigLoader, LogLevel, ReplayConfig, Segment};
use crd::wire::{Frame, MsgType};
use crd_lookahead::{Admission, Controller, ControllerConfig, LookAheadError, SimulatedCard};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{debug, error, info, Level};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

/// Forced drains tolerated for one segment before giving up.
const FULL_RETRIES: usize = 4;

/// CRD Replay - run a motion program through the look-ahead planner
#[derive(Parser, Debug)]
#[command(name = "crd_replay")]
#[command(version)]
#[command(about = "Replay a motion program through the look-ahead planner on a simulated card")]
#[command(long_about = None)]
struct Args {
    /// Replay configuration (card, coordinate systems, look-ahead).
    #[arg(short, long, default_value = "config/replay.toml")]
    config: PathBuf,

    /// Motion program: a list of `[[segment]]` tables.
    #[arg(short, long)]
    program: PathBuf,

    /// Coordinate system to run on.
    #[arg(long, default_value_t = 0)]
    crd: usize,

    /// Look-ahead FIFO to feed.
    #[arg(long, default_value_t = 0)]
    fifo: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs and the report in JSON format
    #[arg(long)]
    json: bool,
}

/// Program file layout.
#[derive(Debug, Deserialize)]
struct Program {
    #[serde(default)]
    segment: Vec<Segment>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        error!("replay failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = ReplayConfig::load(&args.config);
    let level = config
        .as_ref()
        .map_or(LogLevel::Info, |c| c.shared.log_level);
    setup_tracing(&args, level);

    let config = config?;
    config.validate()?;
    info!(
        "{} v{} starting (card {})",
        config.shared.service_name,
        env!("CARGO_PKG_VERSION"),
        config.card.card_id
    );

    let ctl = Controller::new(
        SimulatedCard::new(config.card.card_id),
        ControllerConfig::from(&config.card),
    );
    for crd_cfg in &config.crd {
        let crd = crd_cfg.index as usize;
        for (fifo, la) in crd_cfg.fifo.iter().enumerate() {
            ctl.set_look_ahead_config(crd, fifo, la.clone())?;
        }
        ctl.set_coordinate_system_context(crd, crd_cfg.prm.clone())?;
    }

    let program = Program::load(&args.program)?;
    info!("Loaded {} segments from {:?}", program.segment.len(), args.program);

    for (line, segment) in program.segment.iter().enumerate() {
        enqueue_with_retry(&ctl, &args, line, segment)?;
    }
    let flush = ctl.flush_to_end_of_program(args.crd, args.fifo)?;
    ctl.start(1 << args.crd)?;
    let status = ctl.snapshot_system_status()?;

    let (records, frames) = ctl.with_link(|card| {
        (card.received(args.crd, args.fifo).to_vec(), data_frames(card.requests()))
    });

    if args.json {
        let records: Vec<_> = records
            .iter()
            .map(|r| {
                serde_json::json!({
                    "cmd": format!("{:?}", r.segment.code()),
                    "seg_num": r.segment.seg_num(),
                    "exit_speed": r.segment.is_motion().then_some(r.exit_speed),
                })
            })
            .collect();
        let report = serde_json::json!({
            "crd": args.crd,
            "fifo": args.fifo,
            "segments": records.len(),
            "data_frames": frames,
            "records": records,
            "status": status,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for (k, r) in records.iter().enumerate() {
            let exit = if r.segment.is_motion() {
                format!("{:>10.4}", r.exit_speed)
            } else {
                format!("{:>10}", "-")
            };
            println!(
                "{k:>5}  {:<18} seg {:>6}  exit {exit}",
                format!("{:?}", r.segment.code()),
                r.segment.seg_num(),
            );
        }
        println!(
            "{} records in {} data frames ({} in final flush), user segment {}, position {:?}",
            records.len(),
            frames,
            flush.segments,
            status.user_seg_num[args.crd],
            status.crd_pos[args.crd]
        );
    }

    info!("replay complete");
    Ok(())
}

/// Distinct `CrdData` frames the card was sent; resends of the same bytes
/// count once.
fn data_frames(requests: &[Vec<u8>]) -> usize {
    let mut prev: Option<&Vec<u8>> = None;
    let mut count = 0;
    for req in requests {
        let is_data = Frame::decode(req)
            .ok()
            .and_then(|f| f.header.kind())
            == Some(MsgType::CrdData);
        if is_data && prev != Some(req) {
            count += 1;
        }
        prev = Some(req);
    }
    count
}

fn enqueue_with_retry(
    ctl: &Controller<SimulatedCard>,
    args: &Args,
    line: usize,
    segment: &Segment,
) -> Result<(), LookAheadError> {
    for _ in 0..=FULL_RETRIES {
        match ctl.enqueue_segment(args.crd, args.fifo, segment)? {
            Admission::Accepted { seq } => {
                debug!(line, seq, "segment queued");
                return Ok(());
            }
            Admission::BufferFull => debug!(line, "window full, retrying after drain"),
        }
    }
    Err(LookAheadError::BufferFull)
}

/// Setup tracing subscriber based on CLI arguments and the configured level.
fn setup_tracing(args: &Args, level: LogLevel) {
    let directive: Directive = if args.verbose {
        Level::DEBUG.into()
    } else {
        level
            .as_directive()
            .parse()
            .unwrap_or_else(|_| Level::INFO.into())
    };

    let filter = EnvFilter::from_default_env().add_directive(directive);

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}
