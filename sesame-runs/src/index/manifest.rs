//! Structured subrun manifests.
//!
//! ```xml
//! <Manifest Run="1234">
//!   <SubRun number="1" start="2012-03-01T10:00:00" time="29.99">
//!     <Detector count="501" path="1.pel"/>
//!     <Monitor count="3" path="1.txt"/>
//!     <Flipper>-5.0</Flipper>
//!     <GuideFields>3.0</GuideFields>
//!     <PhaseCoil>1.5</PhaseCoil>
//!     <SampleCoil>0.0</SampleCoil>
//!     <Triangle number="1">3.000</Triangle>
//!     ...
//!   </SubRun>
//! </Manifest>
//! ```
//!
//! Relative paths resolve against the manifest's directory.

use super::{parse_current, ConfigurationSource, SkippedEntry, SourceBatch, SubrunRecord};
use crate::Result;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use sesame_core::{CurrentSettings, KeyField, ReductionConfig, SubrunMetadata};
use std::path::{Path, PathBuf};

/// A manifest file on disk.
#[derive(Debug, Clone)]
pub struct ManifestSource {
    path: PathBuf,
}

impl ManifestSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigurationSource for ManifestSource {
    fn describe(&self) -> String {
        format!("manifest {}", self.path.display())
    }

    fn read(&self, _config: &ReductionConfig) -> Result<SourceBatch> {
        let text =
            std::fs::read_to_string(&self.path).map_err(|source| sesame_io::Error::File {
                path: self.path.clone(),
                source,
            })?;
        let base = self
            .path
            .parent()
            .map_or_else(PathBuf::new, Path::to_path_buf);
        parse_manifest(&text, &base)
    }
}

/// Raw fields of one `<SubRun>` element.
#[derive(Debug, Default)]
struct RawSubrun {
    number: Option<String>,
    start: Option<String>,
    time: Option<String>,
    detector: Option<(String, String)>,
    monitor: Option<(String, String)>,
    currents: [Option<String>; 12],
}

/// Parses manifest XML. Subruns with missing or malformed fields are skipped.
///
/// # Errors
/// Returns an error if the document is not well-formed XML.
pub fn parse_manifest(text: &str, base: &Path) -> Result<SourceBatch> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut run = String::new();
    let mut batch = SourceBatch::default();
    let mut current: Option<RawSubrun> = None;
    let mut field: Option<KeyField> = None;

    loop {
        match reader.read_event()? {
            Event::Start(ref e) => {
                field = open_element(e, &mut run, &mut current)?;
            }
            Event::Empty(ref e) => {
                open_element(e, &mut run, &mut current)?;
            }
            Event::Text(ref t) => {
                if let (Some(f), Some(sub)) = (field, current.as_mut()) {
                    sub.currents[f.index()] = Some(t.unescape()?.into_owned());
                }
            }
            Event::End(ref e) => {
                if e.local_name().as_ref() == b"SubRun" {
                    if let Some(sub) = current.take() {
                        match finish(sub, &run, base) {
                            Ok(record) => batch.records.push(record),
                            Err(skip) => batch.skipped.push(skip),
                        }
                    }
                }
                field = None;
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(batch)
}

/// Handles an opening tag; returns the current field whose text follows.
fn open_element(
    e: &BytesStart<'_>,
    run: &mut String,
    current: &mut Option<RawSubrun>,
) -> Result<Option<KeyField>> {
    let name = e.local_name();
    match name.as_ref() {
        b"Manifest" => {
            *run = get_attribute(e, "Run")?.unwrap_or_default();
        }
        b"SubRun" => {
            *current = Some(RawSubrun {
                number: get_attribute(e, "number")?,
                start: get_attribute(e, "start")?,
                time: get_attribute(e, "time")?,
                ..RawSubrun::default()
            });
        }
        b"Detector" | b"Monitor" => {
            if let Some(sub) = current.as_mut() {
                let pair = get_attribute(e, "count")?.zip(get_attribute(e, "path")?);
                if name.as_ref() == b"Detector" {
                    sub.detector = pair;
                } else {
                    sub.monitor = pair;
                }
            }
        }
        b"Triangle" => {
            let number = get_attribute(e, "number")?.and_then(|n| n.trim().parse().ok());
            return Ok(number.and_then(KeyField::triangle));
        }
        other => {
            let tag = std::str::from_utf8(other).unwrap_or_default();
            return Ok(match tag {
                "Flipper" | "GuideFields" | "Guide" | "PhaseCoil" | "Phase" | "SampleCoil"
                | "Sample" => tag.parse().ok(),
                _ => None,
            });
        }
    }
    Ok(None)
}

fn get_attribute(e: &BytesStart<'_>, name: &str) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.as_ref() == name.as_bytes() {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn finish(sub: RawSubrun, run: &str, base: &Path) -> std::result::Result<SubrunRecord, SkippedEntry> {
    let number = sub.number.unwrap_or_default();
    let run_id = format!("{run}.{number}");
    let skip = |reason: String| SkippedEntry::new(run_id.clone(), reason);

    let elapsed_s = sub
        .time
        .as_deref()
        .and_then(|t| t.trim().parse::<f64>().ok())
        .ok_or_else(|| skip(format!("bad or missing time {:?}", sub.time)))?;
    let (detector_count, detector_path) = sub
        .detector
        .ok_or_else(|| skip("missing Detector element".into()))?;
    let (monitor_count, monitor_path) = sub
        .monitor
        .ok_or_else(|| skip("missing Monitor element".into()))?;
    let detector_count = parse_count(&detector_count).map_err(skip)?;
    let monitor_count = parse_count(&monitor_count).map_err(skip)?;

    let mut settings = CurrentSettings::default();
    for field in KeyField::ALL {
        let text = sub.currents[field.index()]
            .as_deref()
            .ok_or_else(|| skip(format!("missing {field} current")))?;
        settings.set(field, parse_current(field, text).map_err(skip)?);
    }

    Ok(SubrunRecord {
        settings,
        metadata: SubrunMetadata {
            run_id: run_id.clone(),
            start_time: sub.start.unwrap_or_default(),
            elapsed_s,
            monitor_count,
            detector_count,
            event_path: base.join(detector_path),
            monitor_path: base.join(monitor_path),
        },
    })
}

fn parse_count(text: &str) -> std::result::Result<u64, String> {
    text.trim()
        .parse()
        .map_err(|_| format!("count {text:?} is not a non-negative integer"))
}
