//! Per-run info files with embedded current notes.
//!
//! Each run lives in `<base>/<prefix>_<run>/` next to its event and monitor
//! files. The run-info XML records `StartTime`, `StopTime` and a `Notes`
//! element whose text is HTML-escaped JSON:
//!
//! ```json
//! {"Flipper": -5.0, "Guides": 3.0, "Phase": 1.5, "Sample": 0.0,
//!  "Triangle1": 3.0, ..., "Triangle8": 0.0}
//! ```
//!
//! A run without a monitor file is still being acquired and is skipped.

use super::{parse_current, ConfigurationSource, SkippedEntry, SourceBatch, SubrunRecord};
use crate::{Error, Result};
use chrono::DateTime;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::Value;
use sesame_core::{CurrentSettings, KeyField, ReductionConfig, SubrunMetadata};
use sesame_event::validate_length;
use std::path::{Path, PathBuf};

/// File name prefix used by the acquisition system.
pub const DEFAULT_PREFIX: &str = "SESAME";

/// Files belonging to one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInfoPaths {
    pub run_info: PathBuf,
    pub events: PathBuf,
    pub monitor: PathBuf,
}

impl RunInfoPaths {
    #[must_use]
    pub fn new(base: &Path, prefix: &str, run: u32) -> Self {
        let stem = format!("{prefix}_{run}");
        let dir = base.join(&stem);
        Self {
            run_info: dir.join(format!("{stem}_runinfo.xml")),
            events: dir.join(format!("{stem}_neutron_event.dat")),
            monitor: dir.join(format!("{stem}_bmon_histo.dat")),
        }
    }
}

/// A range of runs under one data directory.
#[derive(Debug, Clone)]
pub struct RunInfoSource {
    base: PathBuf,
    prefix: String,
    runs: Vec<u32>,
}

impl RunInfoSource {
    /// Runs listed explicitly, in order.
    pub fn new<P: AsRef<Path>>(base: P, runs: Vec<u32>) -> Self {
        Self {
            base: base.as_ref().to_path_buf(),
            prefix: DEFAULT_PREFIX.to_string(),
            runs,
        }
    }

    /// Runs `first..=last`, minus any in `skip`. Both ends are included, so
    /// `range(base, 10, 14, &[])` lists five runs.
    pub fn range<P: AsRef<Path>>(base: P, first: u32, last: u32, skip: &[u32]) -> Self {
        let runs = (first..=last).filter(|r| !skip.contains(r)).collect();
        Self::new(base, runs)
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn runs(&self) -> &[u32] {
        &self.runs
    }

    #[must_use]
    pub fn paths(&self, run: u32) -> RunInfoPaths {
        RunInfoPaths::new(&self.base, &self.prefix, run)
    }

    fn read_run(&self, run: u32, config: &ReductionConfig) -> Result<SubrunRecord> {
        let paths = self.paths(run);
        if !paths.monitor.is_file() {
            return Err(Error::InvalidMetadata(format!(
                "no monitor file {}; run not finished",
                paths.monitor.display()
            )));
        }

        let xml = std::fs::read_to_string(&paths.run_info).map_err(|source| {
            sesame_io::Error::File {
                path: paths.run_info.clone(),
                source,
            }
        })?;
        let info = parse_run_info(&xml)?;
        let settings = parse_notes(&info.notes)?;

        let monitor = sesame_io::read_monitor(&paths.monitor, &config.monitor)?;
        let event_len = std::fs::metadata(&paths.events)
            .map_err(|source| sesame_io::Error::File {
                path: paths.events.clone(),
                source,
            })?
            .len();
        let event_len = usize::try_from(event_len)
            .map_err(|_| Error::InvalidMetadata("event file too large".into()))?;
        let records = validate_length(config.layout, event_len).map_err(|source| {
            Error::UnsafeInput {
                path: paths.events.clone(),
                source,
            }
        })?;

        Ok(SubrunRecord {
            settings,
            metadata: SubrunMetadata {
                run_id: run.to_string(),
                start_time: info.start,
                elapsed_s: info.elapsed_s,
                monitor_count: monitor.histogram.total(),
                detector_count: records as u64,
                event_path: paths.events,
                monitor_path: paths.monitor,
            },
        })
    }
}

impl ConfigurationSource for RunInfoSource {
    fn describe(&self) -> String {
        format!("{} runs under {}", self.prefix, self.base.display())
    }

    fn read(&self, config: &ReductionConfig) -> Result<SourceBatch> {
        let mut batch = SourceBatch::default();
        for &run in &self.runs {
            match self.read_run(run, config) {
                Ok(record) => batch.records.push(record),
                Err(e) => batch.skipped.push(SkippedEntry::new(run.to_string(), e.to_string())),
            }
        }
        Ok(batch)
    }
}

/// Fields extracted from a run-info document.
#[derive(Debug, Clone, PartialEq)]
pub struct RunInfo {
    pub start: String,
    pub elapsed_s: f64,
    /// Notes text with all escaping removed.
    pub notes: String,
}

/// Extracts start, stop and notes from run-info XML. Element namespaces are
/// ignored.
///
/// # Errors
/// Returns an error if the XML is malformed, an element is missing, or a
/// timestamp is not RFC 3339.
pub fn parse_run_info(xml: &str) -> Result<RunInfo> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut start = None;
    let mut stop = None;
    let mut notes = None;
    let mut target: Option<&'static str> = None;

    loop {
        match reader.read_event()? {
            Event::Start(ref e) => {
                target = match e.local_name().as_ref() {
                    b"StartTime" => Some("StartTime"),
                    b"StopTime" => Some("StopTime"),
                    b"Notes" => Some("Notes"),
                    _ => None,
                };
            }
            Event::Text(ref t) => {
                let text = t.unescape()?.trim().to_string();
                match target {
                    Some("StartTime") => start = Some(text),
                    Some("StopTime") => stop = Some(text),
                    Some("Notes") => notes = Some(text),
                    _ => {}
                }
            }
            Event::End(_) => target = None,
            Event::Eof => break,
            _ => {}
        }
    }

    let missing = |name: &str| Error::InvalidMetadata(format!("run info has no {name}"));
    let start = start.ok_or_else(|| missing("StartTime"))?;
    let stop = stop.ok_or_else(|| missing("StopTime"))?;
    let notes = notes.ok_or_else(|| missing("Notes"))?;

    let begin = DateTime::parse_from_rfc3339(&start)?;
    let end = DateTime::parse_from_rfc3339(&stop)?;
    #[allow(clippy::cast_precision_loss)]
    let elapsed_s = (end - begin).num_milliseconds() as f64 / 1000.0;

    // Notes are escaped once more on top of the XML escaping.
    let notes = match quick_xml::escape::unescape(&notes) {
        Ok(unescaped) => unescaped.into_owned(),
        Err(_) => notes,
    };

    Ok(RunInfo {
        start,
        elapsed_s,
        notes,
    })
}

/// Parses the JSON notes into currents.
///
/// Keys are matched by field name or alias (`Guides`, `GuideFields`,
/// `PhaseCoil`, `SampleCoil`, `Triangle3`, `3`). A `Triangles` array may
/// stand in for the individual triangle keys. Values may be numbers or
/// numeric strings.
///
/// # Errors
/// Returns an error if the text is not a JSON object or a current is missing
/// or not numeric.
pub fn parse_notes(text: &str) -> Result<CurrentSettings> {
    let value: Value = serde_json::from_str(text)?;
    let object = value
        .as_object()
        .ok_or_else(|| Error::InvalidMetadata("notes are not a JSON object".into()))?;

    let mut found: [Option<f64>; 12] = [None; 12];
    for (key, value) in object {
        if key.eq_ignore_ascii_case("triangles") {
            if let Some(items) = value.as_array() {
                for (i, item) in items.iter().enumerate().take(8) {
                    if let Some(field) = KeyField::triangle(i + 1) {
                        found[field.index()] = Some(json_number(field, item)?);
                    }
                }
            }
            continue;
        }
        if let Ok(field) = key.parse::<KeyField>() {
            found[field.index()] = Some(json_number(field, value)?);
        }
    }

    let mut settings = CurrentSettings::default();
    for field in KeyField::ALL {
        let value = found[field.index()]
            .ok_or_else(|| Error::InvalidMetadata(format!("notes have no {field} current")))?;
        settings.set(field, value);
    }
    Ok(settings)
}

fn json_number(field: KeyField, value: &Value) -> Result<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_current(field, s).ok(),
        _ => None,
    }
    .ok_or_else(|| Error::InvalidMetadata(format!("{field} current {value} is not a number")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const NOTES: &str = r#"{&amp;quot;Flipper&amp;quot;: -5, &amp;quot;Guides&amp;quot;: &amp;quot;3.000&amp;quot;, &amp;quot;Phase&amp;quot;: 1.5, &amp;quot;Sample&amp;quot;: 0, &amp;quot;Triangles&amp;quot;: [1, 2, 3, 4, 5, 6, 7, 8]}"#;

    fn run_info(notes: &str) -> String {
        format!(
            r#"<?xml version="1.0"?>
            <RunInfo xmlns="http://neutrons.ornl.gov/SNS/DAS/runinfo_v4_3">
              <StartTime>2012-03-01T10:00:00-04:00</StartTime>
              <StopTime>2012-03-01T10:10:00.500-04:00</StopTime>
              <Notes>{notes}</Notes>
            </RunInfo>"#
        )
    }

    #[test]
    fn test_parse_run_info() {
        let info = parse_run_info(&run_info(NOTES)).unwrap();
        assert_eq!(info.start, "2012-03-01T10:00:00-04:00");
        assert_relative_eq!(info.elapsed_s, 600.5);
        assert!(info.notes.starts_with(r#"{"Flipper": -5"#));

        let settings = parse_notes(&info.notes).unwrap();
        assert_relative_eq!(settings.get(KeyField::Flipper), -5.0);
        assert_relative_eq!(settings.get(KeyField::Guide), 3.0);
        assert_relative_eq!(settings.get(KeyField::Triangle8), 8.0);
    }

    #[test]
    fn test_single_escaped_notes() {
        let info = parse_run_info(&run_info(
            r#"{&quot;Flipper&quot;: 5, &quot;Guide&quot;: 0, &quot;Phase&quot;: 0, &quot;Sample&quot;: 0, &quot;Triangle1&quot;: 1, &quot;Triangle2&quot;: 2, &quot;Triangle3&quot;: 3, &quot;Triangle4&quot;: 4, &quot;Triangle5&quot;: 5, &quot;Triangle6&quot;: 6, &quot;Triangle7&quot;: 7, &quot;Triangle8&quot;: 8}"#,
        ))
        .unwrap();
        let settings = parse_notes(&info.notes).unwrap();
        assert_relative_eq!(settings.get(KeyField::Triangle3), 3.0);
    }

    #[test]
    fn test_bad_notes() {
        assert!(parse_notes("not json").is_err());
        assert!(parse_notes("[1, 2]").is_err());
        assert!(parse_notes(r#"{"Flipper": 1}"#).is_err());
        assert!(parse_notes(
            r#"{"Flipper": "x", "Guide": 0, "Phase": 0, "Sample": 0, "Triangles": [1,2,3,4,5,6,7,8]}"#
        )
        .is_err());
    }

    #[test]
    fn test_bad_timestamp() {
        let xml = "<R><StartTime>yesterday</StartTime><StopTime>today</StopTime><Notes>{}</Notes></R>";
        assert!(matches!(parse_run_info(xml), Err(Error::Timestamp(_))));
    }

    #[test]
    fn test_range_with_skips() {
        let source = RunInfoSource::range("/data", 10, 14, &[12]);
        assert_eq!(source.runs(), &[10, 11, 13, 14]);
        let paths = source.paths(10);
        assert_eq!(
            paths.events,
            PathBuf::from("/data/SESAME_10/SESAME_10_neutron_event.dat")
        );
        assert_eq!(
            paths.run_info,
            PathBuf::from("/data/SESAME_10/SESAME_10_runinfo.xml")
        );
    }
}
