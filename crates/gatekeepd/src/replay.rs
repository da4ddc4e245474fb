//! Replay frame source: pre-computed observations, one JSON object per line.
//!
//! Each line describes one frame as produced by an external detection
//! pipeline:
//!
//! ```text
//! {"sequence": 41, "observations": [
//!   {"sighting": {"bounding_box": {"x": 210, "y": 90, "width": 80, "height": 80},
//!                 "embedding": {"values": [0.01, -0.12, ...]}},
//!    "evidence": {"recognized_text": "1RV21CS042 MEERA", "card_embedding": null}}]}
//! ```

use gatekeep_core::{Observation, Perception, SensorError};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

#[derive(Debug, Deserialize)]
struct FrameRecord {
    #[serde(default)]
    sequence: Option<u64>,
    #[serde(default)]
    observations: Vec<Observation>,
}

pub struct ReplaySource<R> {
    lines: Lines<R>,
    line_no: usize,
}

impl ReplaySource<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self, SensorError> {
        let file = File::open(path)
            .map_err(|e| SensorError::Unavailable(format!("{}: {e}", path.display())))?;
        tracing::info!(path = %path.display(), "replay source opened");
        Ok(Self::from_reader(BufReader::new(file)))
    }
}

impl<R: BufRead> ReplaySource<R> {
    pub fn from_reader(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
        }
    }
}

impl<R: BufRead> Perception for ReplaySource<R> {
    fn observe(&mut self) -> Result<Vec<Observation>, SensorError> {
        loop {
            let line = match self.lines.next() {
                None => return Err(SensorError::EndOfStream),
                Some(Err(e)) => return Err(SensorError::ReadFailed(e.to_string())),
                Some(Ok(line)) => line,
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }

            let record: FrameRecord = serde_json::from_str(&line).map_err(|e| {
                SensorError::ReadFailed(format!("line {}: {e}", self.line_no))
            })?;
            tracing::trace!(
                line = self.line_no,
                sequence = ?record.sequence,
                faces = record.observations.len(),
                "replayed frame"
            );
            return Ok(record.observations);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const FRAMES: &str = r#"{"sequence": 1, "observations": []}

{"sequence": 2, "observations": [{"sighting": {"bounding_box": {"x": 1, "y": 2, "width": 3, "height": 4}, "embedding": {"values": [0.5, 0.25]}}}]}
{"observations": [{"sighting": {"bounding_box": {"x": 0, "y": 0, "width": 9, "height": 9}, "embedding": {"values": [1.0]}}, "evidence": {"recognized_text": "S1 ASHA"}}]}
"#;

    #[test]
    fn test_replays_frames_in_order() {
        let mut source = ReplaySource::from_reader(Cursor::new(FRAMES));

        assert!(source.observe().unwrap().is_empty());

        let second = source.observe().unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].sighting.embedding.values, vec![0.5, 0.25]);
        assert!(second[0].evidence.is_none());

        let third = source.observe().unwrap();
        let evidence = third[0].evidence.as_ref().unwrap();
        assert_eq!(evidence.recognized_text, "S1 ASHA");
        assert!(evidence.card_embedding.is_none());

        assert!(matches!(source.observe(), Err(SensorError::EndOfStream)));
    }

    #[test]
    fn test_malformed_line_is_read_failure() {
        let mut source = ReplaySource::from_reader(Cursor::new("{\"observations\": 7}\n"));
        match source.observe() {
            Err(SensorError::ReadFailed(msg)) => assert!(msg.contains("line 1")),
            other => panic!("expected ReadFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_file_is_unavailable() {
        let err = ReplaySource::open(Path::new("/nonexistent/frames.jsonl")).err().unwrap();
        assert!(matches!(err, SensorError::Unavailable(_)));
    }
}
