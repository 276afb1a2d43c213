//! Recording sinks and file formats.
//!
//! Rows are written with `write!` into a buffered file and flushed after
//! every sample, so a crash loses at most the row being written.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use super::recorder::Sample;
use crate::config::RecordingConfig;
use crate::error::RecorderError;

/// Column names of a recording
pub const CSV_HEADER: &str = "Timestamp,Throttle,Gear,RPM,ControllerTemp_C,MotorTemp_C,Speed_kmh,Power_W,Voltage_V,PacketCount,Latency_ms";

/// Destination for recorded samples
#[cfg_attr(test, mockall::automock)]
pub trait SampleSink: Send {
    /// Write the header row
    fn write_header(&mut self) -> io::Result<()>;

    /// Append and flush one sample
    fn append(&mut self, sample: &Sample) -> io::Result<()>;

    /// Flush and release the underlying resource
    fn close(&mut self) -> io::Result<()>;

    /// Human-readable location, used in logs
    fn describe(&self) -> String;
}

/// Export file format, picked from the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    /// `.json` selects JSON, anything else CSV
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("json") => ExportFormat::Json,
            _ => ExportFormat::Csv,
        }
    }
}

/// CSV file that is flushed after every row
pub struct CsvFileSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl CsvFileSink {
    /// Create (or truncate) the file, creating parent directories as needed
    ///
    /// # Errors
    ///
    /// Returns `RecorderError::SinkUnavailable` if the directory or file
    /// cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, RecorderError> {
        let path = path.as_ref().to_path_buf();
        let unavailable = |source| RecorderError::SinkUnavailable {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(unavailable)?;
        }
        let file = File::create(&path).map_err(unavailable)?;

        Ok(Self {
            writer: Some(BufWriter::new(file)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&mut self) -> io::Result<&mut BufWriter<File>> {
        self.writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "recording file closed"))
    }
}

impl SampleSink for CsvFileSink {
    fn write_header(&mut self) -> io::Result<()> {
        let writer = self.writer()?;
        writeln!(writer, "{}", CSV_HEADER)?;
        writer.flush()
    }

    fn append(&mut self, sample: &Sample) -> io::Result<()> {
        let writer = self.writer()?;
        write_row(writer, sample)?;
        writer.flush()
    }

    fn close(&mut self) -> io::Result<()> {
        match self.writer.take() {
            Some(mut writer) => writer.flush(),
            None => Ok(()),
        }
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

fn write_row<W: Write>(writer: &mut W, sample: &Sample) -> io::Result<()> {
    writeln!(
        writer,
        "{},{},{},{},{},{},{},{},{},{},{}",
        sample.timestamp.format("%Y-%m-%dT%H:%M:%S%.6f"),
        sample.throttle,
        sample.gear,
        sample.rpm,
        sample.controller_temp,
        sample.motor_temp,
        sample.speed,
        sample.power,
        sample.voltage,
        sample.packet_count,
        sample.latency_ms,
    )
}

/// Write samples to a CSV file with the recording header
pub fn write_csv<P: AsRef<Path>>(path: P, samples: &[Sample]) -> io::Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    writeln!(writer, "{}", CSV_HEADER)?;
    for sample in samples {
        write_row(&mut writer, sample)?;
    }

    writer.flush()
}

/// Write samples as a pretty-printed JSON array
pub fn write_json<P: AsRef<Path>>(path: P, samples: &[Sample]) -> Result<(), RecorderError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, samples)?;
    writer.flush()?;
    Ok(())
}

/// Where a persisted recording goes
///
/// With no name the file is `<data_dir>/<prefix>_<YYYYmmdd_HHMMSS>.csv`.
/// A bare file name is placed in `data_dir`; a path with a directory is
/// used as-is.
pub fn resolve_recording_path(
    config: &RecordingConfig,
    name: Option<&Path>,
    now: DateTime<Local>,
) -> PathBuf {
    match name {
        Some(name) if name.parent().is_some_and(|p| !p.as_os_str().is_empty()) => {
            name.to_path_buf()
        }
        Some(name) => config.data_dir.join(name),
        None => config.data_dir.join(format!(
            "{}_{}.csv",
            config.file_prefix,
            now.format("%Y%m%d_%H%M%S")
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn sample(rpm: u16) -> Sample {
        Sample {
            timestamp: Local.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
            throttle: 2048,
            gear: 2,
            rpm,
            controller_temp: 40,
            motor_temp: 55,
            speed: 81.0,
            power: -900.0,
            voltage: 90.0,
            packet_count: 17,
            latency_ms: 0.25,
        }
    }

    #[test]
    fn test_csv_rows_keep_full_precision() {
        let mut row = sample(4000);
        row.speed = 81.123456;
        row.power = -903.0625;
        row.voltage = 90.05;
        row.latency_ms = 0.012345;

        let mut out = Vec::new();
        write_row(&mut out, &row).unwrap();

        let line = String::from_utf8(out).unwrap();
        assert!(
            line.ends_with(",81.123456,-903.0625,90.05,17,0.012345\n"),
            "got {}",
            line
        );
    }

    #[test]
    fn test_csv_sink_writes_header_and_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("ride.csv");

        let mut sink = CsvFileSink::create(&path).unwrap();
        sink.write_header().unwrap();
        sink.append(&sample(4000)).unwrap();

        // Readable before close: every row is flushed
        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(
            lines[1],
            "2024-05-01T12:30:00.000000,2048,2,4000,40,55,81,-900,90,17,0.25"
        );

        sink.close().unwrap();
        assert!(sink.append(&sample(1)).is_err(), "Closed sink must reject rows");
    }

    #[test]
    fn test_csv_sink_unavailable() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();

        let result = CsvFileSink::create(blocker.join("ride.csv"));
        assert!(matches!(result, Err(RecorderError::SinkUnavailable { .. })));
    }

    #[test]
    fn test_export_formats() {
        let dir = TempDir::new().unwrap();
        let samples = vec![sample(1), sample(2)];

        let csv_path = dir.path().join("out.csv");
        write_csv(&csv_path, &samples).unwrap();
        assert_eq!(fs::read_to_string(&csv_path).unwrap().lines().count(), 3);

        let json_path = dir.path().join("out.json");
        write_json(&json_path, &samples).unwrap();
        let parsed: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 2);
        assert_eq!(parsed[1]["rpm"], 2);
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(ExportFormat::from_path(Path::new("a.json")), ExportFormat::Json);
        assert_eq!(ExportFormat::from_path(Path::new("a.JSON")), ExportFormat::Json);
        assert_eq!(ExportFormat::from_path(Path::new("a.csv")), ExportFormat::Csv);
        assert_eq!(ExportFormat::from_path(Path::new("a")), ExportFormat::Csv);
    }

    #[test]
    fn test_resolve_recording_path() {
        let config = RecordingConfig::default();
        let now = Local.with_ymd_and_hms(2024, 5, 1, 8, 5, 9).unwrap();

        assert_eq!(
            resolve_recording_path(&config, None, now),
            PathBuf::from("data/eksr_data_20240501_080509.csv")
        );
        assert_eq!(
            resolve_recording_path(&config, Some(Path::new("ride.csv")), now),
            PathBuf::from("data/ride.csv")
        );
        assert_eq!(
            resolve_recording_path(&config, Some(Path::new("/tmp/ride.csv")), now),
            PathBuf::from("/tmp/ride.csv")
        );
    }
}
