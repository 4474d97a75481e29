/*
 * Copyright (c) 2024 Yunshan Networks
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use log::{info, warn};

use public::counter::{Counter, OwnedCountable, RefCountable};

use ::l7_observer::{
    common::PacketEvent, utils::logger::init_logger, Error, FlowMap, L7Record, ObserverConfig,
};

/// Replays captured packet events through the observer and prints the aggregated records as
/// json lines.
#[derive(Parser)]
struct Opts {
    /// Specify config file location, defaults are used when omitted
    #[clap(short = 'f', long)]
    config_file: Option<String>,

    /// Packet events, one json object per line, '-' for stdin
    #[clap(short, long, default_value = "-")]
    input: String,

    /// Lines are hex encoded binary events instead of json
    #[clap(long, action = ArgAction::SetTrue)]
    raw: bool,

    /// Override gc-interval of the config file, e.g. "30s"
    #[clap(long, value_parser = humantime::parse_duration)]
    gc_interval: Option<Duration>,

    /// Display the version
    #[clap(short, long, action = ArgAction::SetTrue)]
    version: bool,
}

// drives garbage collection and flushing by the clock of the replayed events
struct Replay<W: Write> {
    flow_map: FlowMap,
    gc_interval_ns: u64,
    flush_interval_ns: u64,
    last_gc_ns: u64,
    last_flush_ns: u64,
    now_ns: u64,
    records: Vec<L7Record>,
    out: W,
}

impl<W: Write> Replay<W> {
    fn new(config: &ObserverConfig, out: W) -> Self {
        Self {
            flow_map: FlowMap::new(config),
            gc_interval_ns: config.gc_interval.as_nanos() as u64,
            flush_interval_ns: config.flush_interval.as_nanos() as u64,
            last_gc_ns: 0,
            last_flush_ns: 0,
            now_ns: 0,
            records: vec![],
            out,
        }
    }

    fn feed_line(&mut self, line_no: usize, line: &str, raw: bool) -> Result<(), Error> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(());
        }
        let event = if raw {
            let bytes = hex::decode(line).map_err(|e| Error::ReplayInput(line_no, e.to_string()))?;
            PacketEvent::decode(&bytes)?
        } else {
            serde_json::from_str::<PacketEvent>(line)
                .map_err(|e| Error::ReplayInput(line_no, e.to_string()))?
        };
        self.flow_map
            .on_packet_event(&event.header, event.data.as_ref());
        let time_ns = event.header.time_nano;
        self.tick(time_ns)
    }

    fn tick(&mut self, time_ns: u64) -> Result<(), Error> {
        self.now_ns = self.now_ns.max(time_ns);
        if self.last_gc_ns == 0 {
            self.last_gc_ns = self.now_ns;
            self.last_flush_ns = self.now_ns;
        }
        if self.now_ns.saturating_sub(self.last_gc_ns) >= self.gc_interval_ns {
            self.flow_map.garbage_collection(self.now_ns);
            self.last_gc_ns = self.now_ns;
        }
        if self.now_ns.saturating_sub(self.last_flush_ns) >= self.flush_interval_ns {
            self.flush()?;
            self.last_flush_ns = self.now_ns;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Error> {
        self.flow_map.flush_out_metrics(&mut self.records);
        for record in self.records.drain(..) {
            serde_json::to_writer(&mut self.out, &record)
                .map_err(|e| Error::IoError(e.into()))?;
            self.out.write_all(b"\n")?;
        }
        self.out.flush()?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), Error> {
        self.flow_map.garbage_collection(self.now_ns);
        self.flush()
    }
}

fn log_counters(module: &str, counters: Vec<Counter>) {
    let line = counters
        .iter()
        .map(|(name, _, value)| format!("{}={:?}", name, value))
        .collect::<Vec<_>>()
        .join(" ");
    info!("{}: {}", module, line);
}

fn main() -> Result<()> {
    let opts = Opts::parse();
    if opts.version {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let mut config = match opts.config_file.as_ref() {
        Some(path) => ObserverConfig::load_from_file(path)
            .with_context(|| format!("load config {}", path))?,
        None => ObserverConfig::default(),
    };
    if let Some(interval) = opts.gc_interval {
        config.gc_interval = interval;
        config.validate()?;
    }
    let (_logger, log_counter) = init_logger(&config.log).context("init logger")?;

    let input: Box<dyn BufRead> = if opts.input == "-" {
        Box::new(BufReader::new(io::stdin()))
    } else {
        Box::new(BufReader::new(
            File::open(&opts.input).with_context(|| format!("open {}", opts.input))?,
        ))
    };

    let stdout = io::stdout();
    let mut replay = Replay::new(&config, BufWriter::new(stdout.lock()));
    let counter = replay.flow_map.counter();
    for (i, line) in input.lines().enumerate() {
        let line = line.with_context(|| format!("read {}", opts.input))?;
        if let Err(e) = replay.feed_line(i + 1, &line, opts.raw) {
            warn!("skip line {}: {}", i + 1, e);
        }
    }
    replay.finish()?;

    log_counters("flow-map", counter.get_counters());
    for stat in replay.flow_map.protocol_stats() {
        log_counters(stat.protocol().as_str(), stat.get_counters());
    }
    log_counters("log", log_counter.get_counters());
    Ok(())
}
