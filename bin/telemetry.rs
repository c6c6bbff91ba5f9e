//! Substation telemetry carried as the mesh payload.
//!
//! Each turn a node broadcasts one [`Telemetry`] record. Records received
//! from other nodes are optionally written to disk by a [`CsvSink`].

use std::{
    fmt,
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use meshturn::{Application, NodeId};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Name of the append-only index of written records.
pub const LOG_FILE: &str = "node-data.log";

/// Encoded size of a [`Telemetry`] record.
pub const RECORD_LEN: usize = 5;

/// One reading of a substation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Telemetry {
    /// Phase angle in degrees, `1..=91`.
    pub phase_angle: u8,
    /// Phase on each bus in kW, `1..=101`.
    pub bus_phase: u8,
    /// Power flow on each transmission line in MW, `1..=101`.
    pub line_power_flow: u8,
    /// Substation load in kW, `1..=101`.
    pub load: u8,
    /// Whether the monitored component is up.
    pub component_up: bool,
}

impl Telemetry {
    /// Draws a plausible reading.
    pub fn sample(rng: &mut impl Rng) -> Self {
        Self {
            phase_angle: rng.gen_range(1..=91),
            bus_phase: rng.gen_range(1..=101),
            line_power_flow: rng.gen_range(1..=101),
            load: rng.gen_range(1..=101),
            component_up: rng.gen_bool(0.5),
        }
    }

    /// Wire form of the record.
    pub const fn encode(&self) -> [u8; RECORD_LEN] {
        [
            self.phase_angle,
            self.bus_phase,
            self.line_power_flow,
            self.load,
            self.component_up as u8,
        ]
    }

    /// Parses a record, rejecting anything that is not exactly
    /// [`RECORD_LEN`] bytes.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let &[phase_angle, bus_phase, line_power_flow, load, status] = bytes else {
            return None;
        };
        Some(Self { phase_angle, bus_phase, line_power_flow, load, component_up: status != 0 })
    }

    /// CSV rendering, one parameter per row.
    pub fn to_csv(&self) -> String {
        format!(
            "Substation Parameters,Values,Measurements Units\n\
             Phase angle,{},degrees\n\
             Phase on each bus,{},kW\n\
             Power flow on each transmission line,{},MW\n\
             Substation load,{},kW\n\
             Substation component status,{},boolean\n",
            self.phase_angle,
            self.bus_phase,
            self.line_power_flow,
            self.load,
            u8::from(self.component_up),
        )
    }
}

impl fmt::Display for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "angle={}deg bus={}kW line={}MW load={}kW up={}",
            self.phase_angle, self.bus_phase, self.line_power_flow, self.load, self.component_up
        )
    }
}

/// Writes one CSV file per received record and indexes it in [`LOG_FILE`].
#[derive(Debug, Clone)]
pub struct CsvSink {
    dir: PathBuf,
}

impl CsvSink {
    /// Creates the sink, making `dir` if it does not exist.
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Directory records are written to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `record` and returns the path of the new file.
    pub fn write(&self, from: NodeId, record: &Telemetry) -> std::io::Result<PathBuf> {
        let stamp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        let path = self.dir.join(format!("node-{from}-{stamp}.csv"));
        fs::write(&path, record.to_csv())?;

        let mut log = OpenOptions::new().create(true).append(true).open(self.dir.join(LOG_FILE))?;
        writeln!(log, "[{stamp}] file created: [{}] from node {from}", path.display())?;
        Ok(path)
    }
}

/// Broadcasts sampled telemetry and records what the other nodes send.
#[derive(Debug)]
pub struct TelemetryApp {
    rng: StdRng,
    sink: Option<CsvSink>,
    received: u64,
    last: Option<(NodeId, Telemetry)>,
}

impl TelemetryApp {
    /// Creates the application; records are only logged when `sink` is `None`.
    pub fn new(sink: Option<CsvSink>) -> Self {
        Self { rng: StdRng::from_entropy(), sink, received: 0, last: None }
    }

    /// Records received so far.
    pub const fn received(&self) -> u64 {
        self.received
    }

    /// The most recent record and its sender.
    pub const fn last(&self) -> Option<&(NodeId, Telemetry)> {
        self.last.as_ref()
    }
}

impl Application for TelemetryApp {
    fn next_payload(&mut self) -> Vec<u8> {
        Telemetry::sample(&mut self.rng).encode().to_vec()
    }

    fn deliver(&mut self, from: NodeId, payload: Vec<u8>) {
        let Some(record) = Telemetry::decode(&payload) else {
            warn!(%from, len = payload.len(), "payload is not a telemetry record");
            return;
        };
        info!(%from, %record, "telemetry received");
        self.received += 1;
        self.last = Some((from, record));

        if let Some(sink) = &self.sink {
            if let Err(err) = sink.write(from, &record) {
                warn!(%from, %err, dir = %sink.dir().display(), "failed to store telemetry");
            }
        }
    }
}
