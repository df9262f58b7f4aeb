use crate::error::SimError;
use log::{debug, error, info, warn};
use msabm_common::{OutputConfig, OutputFormat, RunMetadata, Snapshot, Species};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::thread::{self, JoinHandle};

/// Records in flight between the stepping loop and the writer thread.
const CHANNEL_CAPACITY: usize = 64;

pub const TRAJECTORY_FILE: &str = "trajectory.csv";
pub const METADATA_FILE: &str = "metadata.json";

pub fn snapshot_file_name(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::Json => "snapshots.jsonl",
        OutputFormat::Bincode => "snapshots.bin",
        OutputFormat::Messagepack => "snapshots.msgpack",
    }
}

/// Writes records to one run directory.
struct SnapshotWriter {
    dir: PathBuf,
    format: OutputFormat,
    species: Vec<Species>,
    trajectory: csv::Writer<BufWriter<File>>,
    snapshots: BufWriter<File>,
    flush_every: usize,
    pending: usize,
    written: usize,
}

impl SnapshotWriter {
    fn create(dir: &Path, format: OutputFormat, species: Vec<Species>, flush_every: usize) -> Result<Self, SimError> {
        fs::create_dir_all(dir)?;
        let trajectory_file = File::create(dir.join(TRAJECTORY_FILE))?;
        let mut trajectory = csv::Writer::from_writer(BufWriter::new(trajectory_file));

        let mut header: Vec<String> = [
            "time_h",
            "coarse_step",
            "tumor_proliferative",
            "tumor_quiescent",
            "tumor_apoptotic",
            "macrophage_m0",
            "macrophage_m1",
            "macrophage_m2",
            "total_agents",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        header.extend(species.iter().map(|s| format!("mean_{s}")));
        trajectory.write_record(&header)?;

        let snapshots = BufWriter::new(File::create(dir.join(snapshot_file_name(format)))?);
        Ok(SnapshotWriter {
            dir: dir.to_path_buf(),
            format,
            species,
            trajectory,
            snapshots,
            flush_every,
            pending: 0,
            written: 0,
        })
    }

    fn write(&mut self, snapshot: &Snapshot) -> Result<(), SimError> {
        let c = &snapshot.counts;
        let mut row = vec![
            format!("{:.6}", snapshot.time_h),
            snapshot.coarse_step.to_string(),
            c.tumor_proliferative.to_string(),
            c.tumor_quiescent.to_string(),
            c.tumor_apoptotic.to_string(),
            c.macrophage_m0.to_string(),
            c.macrophage_m1.to_string(),
            c.macrophage_m2.to_string(),
            snapshot.total_agents.to_string(),
        ];
        for species in &self.species {
            let mean = snapshot.mean_concentrations.get(species).copied().unwrap_or(0.0);
            row.push(format!("{mean:.9e}"));
        }
        self.trajectory.write_record(&row)?;

        match self.format {
            OutputFormat::Json => {
                serde_json::to_writer(&mut self.snapshots, snapshot)
                    .map_err(|e| SimError::Output(format!("JSON encoding failed: {e}")))?;
                self.snapshots.write_all(b"\n")?;
            }
            OutputFormat::Bincode => {
                bincode::serialize_into(&mut self.snapshots, snapshot)
                    .map_err(|e| SimError::Output(format!("bincode encoding failed: {e}")))?;
            }
            OutputFormat::Messagepack => {
                rmp_serde::encode::write_named(&mut self.snapshots, snapshot)
                    .map_err(|e| SimError::Output(format!("MessagePack encoding failed: {e}")))?;
            }
        }

        self.written += 1;
        self.pending += 1;
        if self.pending >= self.flush_every {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SimError> {
        self.trajectory.flush()?;
        self.snapshots.flush()?;
        debug!("Flushed {} records to {}.", self.pending, self.dir.display());
        self.pending = 0;
        Ok(())
    }

    fn finish(mut self, metadata: Option<&RunMetadata>) -> Result<usize, SimError> {
        self.flush()?;
        if let Some(metadata) = metadata {
            let file = File::create(self.dir.join(METADATA_FILE))?;
            serde_json::to_writer_pretty(BufWriter::new(file), metadata)
                .map_err(|e| SimError::Output(format!("metadata encoding failed: {e}")))?;
        }
        info!("Wrote {} records to {}.", self.written, self.dir.display());
        Ok(self.written)
    }
}

enum WriterMessage {
    Record(Box<Snapshot>),
    Finish(Box<RunMetadata>),
}

fn writer_loop(mut writer: SnapshotWriter, receiver: Receiver<WriterMessage>) -> Result<usize, SimError> {
    while let Ok(message) = receiver.recv() {
        match message {
            WriterMessage::Record(snapshot) => writer.write(&snapshot)?,
            WriterMessage::Finish(metadata) => return writer.finish(Some(&metadata)),
        }
    }
    // Sender dropped without a final record (run abandoned).
    writer.finish(None)
}

enum Sink {
    /// Keep records in memory only.
    Memory,
    /// Write everything when the run finishes.
    Deferred(Box<SnapshotWriter>),
    /// Background writer thread fed over a bounded channel.
    Streaming {
        sender: SyncSender<WriterMessage>,
        handle: JoinHandle<Result<usize, SimError>>,
    },
}

/// Collects snapshots and forwards them to disk without blocking the stepping loop.
pub struct OutputRecorder {
    snapshots: Vec<Snapshot>,
    include_fields: bool,
    include_agents: bool,
    sink: Sink,
}

impl OutputRecorder {
    /// Records are written under `directory` when one is given.
    pub fn new(output: &OutputConfig, directory: Option<&Path>, species: Vec<Species>) -> Result<Self, SimError> {
        let sink = match directory {
            None => Sink::Memory,
            Some(dir) => {
                let writer = SnapshotWriter::create(dir, output.format, species, output.flush_every)?;
                if output.streaming {
                    let (sender, receiver) = sync_channel(CHANNEL_CAPACITY);
                    let handle = thread::Builder::new()
                        .name("msabm-writer".to_string())
                        .spawn(move || writer_loop(writer, receiver))?;
                    Sink::Streaming { sender, handle }
                } else {
                    Sink::Deferred(Box::new(writer))
                }
            }
        };
        Ok(OutputRecorder {
            snapshots: Vec::new(),
            include_fields: output.include_fields,
            include_agents: output.include_agents,
            sink,
        })
    }

    pub fn include_fields(&self) -> bool {
        self.include_fields
    }

    pub fn include_agents(&self) -> bool {
        self.include_agents
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn record(&mut self, snapshot: Snapshot) -> Result<(), SimError> {
        if let Sink::Streaming { sender, .. } = &self.sink {
            if sender.send(WriterMessage::Record(Box::new(snapshot.clone()))).is_err() {
                return Err(self.join_writer().err().unwrap_or_else(|| {
                    SimError::Output("snapshot writer stopped unexpectedly".to_string())
                }));
            }
        }
        self.snapshots.push(snapshot);
        Ok(())
    }

    /// Flushes outstanding records and writes the metadata file.
    pub fn finish(&mut self, metadata: &RunMetadata) -> Result<(), SimError> {
        match std::mem::replace(&mut self.sink, Sink::Memory) {
            Sink::Memory => Ok(()),
            Sink::Deferred(mut writer) => {
                for snapshot in &self.snapshots {
                    writer.write(snapshot)?;
                }
                writer.finish(Some(metadata)).map(|_| ())
            }
            Sink::Streaming { sender, handle } => {
                let sent = sender.send(WriterMessage::Finish(Box::new(metadata.clone())));
                drop(sender);
                let result = join(handle);
                if sent.is_err() && result.is_ok() {
                    return Err(SimError::Output("snapshot writer stopped before metadata was written".to_string()));
                }
                result.map(|_| ())
            }
        }
    }

    fn join_writer(&mut self) -> Result<usize, SimError> {
        match std::mem::replace(&mut self.sink, Sink::Memory) {
            Sink::Streaming { sender, handle } => {
                drop(sender);
                join(handle)
            }
            _ => Ok(0),
        }
    }
}

fn join(handle: JoinHandle<Result<usize, SimError>>) -> Result<usize, SimError> {
    handle
        .join()
        .unwrap_or_else(|_| Err(SimError::Output("snapshot writer thread panicked".to_string())))
}

impl Drop for OutputRecorder {
    fn drop(&mut self) {
        if let Sink::Streaming { .. } = self.sink {
            warn!("Output recorder dropped before finish; flushing without metadata.");
            if let Err(e) = self.join_writer() {
                error!("Snapshot writer failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use msabm_common::{PhenotypeCounts, RunStatus, SeedSource};
    use std::collections::BTreeMap;

    fn snapshot(step: u64) -> Snapshot {
        Snapshot {
            time_h: step as f64 * 0.5,
            coarse_step: step,
            counts: PhenotypeCounts { tumor_proliferative: step, ..PhenotypeCounts::default() },
            total_agents: step,
            mean_concentrations: BTreeMap::from([(Species::Csf1, 0.5)]),
            fields: None,
            agents: None,
        }
    }

    fn metadata(records: usize) -> RunMetadata {
        RunMetadata {
            case: "test".to_string(),
            regimen_id: "none".to_string(),
            seed: 1,
            seed_source: SeedSource::Configured,
            reproducible: true,
            threads: 1,
            status: RunStatus::Completed,
            abort_reason: None,
            warning_count: 0,
            warnings: Vec::new(),
            records,
            coarse_steps_completed: 3,
            final_time_h: 1.5,
        }
    }

    #[test]
    fn streaming_writer_produces_all_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let output = OutputConfig { flush_every: 2, ..OutputConfig::default() };
        let mut recorder = OutputRecorder::new(&output, Some(dir.path()), vec![Species::Csf1]).expect("recorder");
        for step in 0..4 {
            recorder.record(snapshot(step)).expect("record");
        }
        recorder.finish(&metadata(4)).expect("finish");

        let csv = fs::read_to_string(dir.path().join(TRAJECTORY_FILE)).expect("csv");
        let lines: Vec<_> = csv.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("time_h,coarse_step,tumor_proliferative"));
        assert!(lines[0].ends_with("mean_csf1"));

        let jsonl = fs::read_to_string(dir.path().join("snapshots.jsonl")).expect("jsonl");
        assert_eq!(jsonl.lines().count(), 4);
        let meta: RunMetadata =
            serde_json::from_str(&fs::read_to_string(dir.path().join(METADATA_FILE)).expect("meta")).expect("parse");
        assert_eq!(meta.records, 4);
        assert_eq!(recorder.snapshots().len(), 4);
    }

    #[test]
    fn deferred_writer_matches_streaming_layout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let output = OutputConfig { streaming: false, format: OutputFormat::Messagepack, ..OutputConfig::default() };
        let mut recorder = OutputRecorder::new(&output, Some(dir.path()), vec![Species::Csf1]).expect("recorder");
        recorder.record(snapshot(0)).expect("record");
        recorder.finish(&metadata(1)).expect("finish");
        assert!(dir.path().join("snapshots.msgpack").exists());
        assert!(dir.path().join(METADATA_FILE).exists());
        let csv = fs::read_to_string(dir.path().join(TRAJECTORY_FILE)).expect("csv");
        assert_eq!(csv.lines().count(), 2);
    }

    #[test]
    fn memory_only_recorder_keeps_records() {
        let mut recorder = OutputRecorder::new(&OutputConfig::default(), None, vec![]).expect("recorder");
        recorder.record(snapshot(0)).expect("record");
        recorder.finish(&metadata(1)).expect("finish");
        assert_eq!(recorder.snapshots().len(), 1);
    }
}
