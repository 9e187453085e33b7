// Copyright (c) 2023 The TQUIC Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Diagnostic stream of congestion control decisions.
//!
//! The stream uses JSON Text Sequences (RFC 7464 without the record
//! separator): a header line followed by one line per control tick, suitable
//! for offline analysis of queue length and window evolution.

use std::io::Write;
use std::time::Instant;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Version of the trace record layout.
pub const TRACE_VERSION: &str = "0.1";

/// The serialization format of the stream.
pub const JSON_TEXT_SEQS: &str = "JSON-SEQ";

/// The first line of a trace stream.
#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct TraceHeader {
    /// Always "JSON-SEQ".
    pub trace_format: String,

    /// Always `TRACE_VERSION`.
    pub trace_version: String,

    /// Free-text title, usually the controller name.
    pub title: Option<String>,
}

/// One control tick.
#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug, Default)]
pub struct TickRecord {
    /// Milliseconds since the stream started.
    pub time: f32,

    /// Sequence number acknowledged by the ACK that triggered the tick.
    pub ack: u32,

    /// Congestion window after the tick, in segments.
    pub cwnd: u32,

    /// Estimated queue length, in segments.
    pub queue_len: i64,

    /// Target queue length, in segments.
    pub target_queue_len: i64,

    /// Outstanding adjustment for data sent since sampling started.
    pub outstanding: i64,

    /// Estimated delivery rate, in segments per second.
    pub bandwidth: f64,

    /// Estimated bandwidth-delay product, in segments.
    pub bdp: f64,

    /// Base delay used for the tick, in milliseconds.
    pub base_delay: Option<f64>,
}

/// Trace writer using the JSON-SEQ layout.
pub struct TraceWriter {
    /// Header written once at start.
    header: TraceHeader,

    /// The underlying writer.
    writer: Box<dyn Write + Send + Sync>,

    /// Whether the header has been written.
    ready: bool,

    /// The created time for the writer.
    start_time: Instant,
}

impl TraceWriter {
    pub fn new(
        title: Option<String>,
        writer: Box<dyn Write + Send + Sync>,
        start_time: Instant,
    ) -> Self {
        let header = TraceHeader {
            trace_format: JSON_TEXT_SEQS.to_string(),
            trace_version: TRACE_VERSION.to_string(),
            title,
        };

        TraceWriter {
            header,
            writer,
            ready: false,
            start_time,
        }
    }

    /// Start the stream by writing the header.
    pub fn start(&mut self) -> Result<()> {
        if self.ready {
            return Err(Error::Done);
        }

        serde_json::to_writer(self.writer.as_mut(), &self.header)?;
        self.writer.as_mut().write_all(b"\n")?;
        self.ready = true;
        Ok(())
    }

    /// Flush buffered records.
    pub fn flush(&mut self) -> Result<()> {
        if !self.ready {
            return Err(Error::InvalidState("expect ready state".into()));
        }

        self.writer.as_mut().flush()?;
        Ok(())
    }

    /// Write a tick record stamped with `time`.
    pub fn add_record(&mut self, time: Instant, mut record: TickRecord) -> Result<()> {
        if !self.ready {
            return Err(Error::InvalidState("not ready".into()));
        }

        record.time = self.relative_time(time);
        serde_json::to_writer(self.writer.as_mut(), &record)?;
        self.writer.as_mut().write_all(b"\n")?;
        Ok(())
    }

    /// Return the relative time for the writer, in milliseconds.
    pub fn relative_time(&self, time: Instant) -> f32 {
        let duration = time.saturating_duration_since(self.start_time);
        duration.as_secs_f32() * 1000.0
    }
}

impl std::fmt::Debug for TraceWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "TraceWriter ready={:?} ", self.ready)?;
        write!(f, "title={:?}", self.header.title)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::time::Duration;

    /// A writer whose content stays readable after it was boxed.
    #[derive(Clone, Default)]
    pub(crate) struct SharedBuf(pub Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        pub(crate) fn lines(&self) -> Vec<String> {
            let buf = self.0.lock().unwrap();
            String::from_utf8(buf.clone())
                .unwrap()
                .lines()
                .map(|l| l.to_string())
                .collect()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn trace_not_ready() {
        let buf = SharedBuf::default();
        let now = Instant::now();
        let mut w = TraceWriter::new(None, Box::new(buf.clone()), now);

        assert_eq!(
            w.add_record(now, TickRecord::default()),
            Err(Error::InvalidState("not ready".into()))
        );
        assert_eq!(
            w.flush(),
            Err(Error::InvalidState("expect ready state".into()))
        );
        assert!(buf.lines().is_empty());
    }

    #[test]
    fn trace_records() -> Result<()> {
        let buf = SharedBuf::default();
        let now = Instant::now();
        let mut w = TraceWriter::new(Some("SOD".into()), Box::new(buf.clone()), now);

        w.start()?;
        assert_eq!(w.start(), Err(Error::Done));

        let record = TickRecord {
            ack: 1000,
            cwnd: 12,
            queue_len: 8,
            target_queue_len: 10,
            ..Default::default()
        };
        w.add_record(now + Duration::from_millis(5), record)?;
        w.flush()?;

        let lines = buf.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "{\"trace_format\":\"JSON-SEQ\",\"trace_version\":\"0.1\",\"title\":\"SOD\"}"
        );

        let tick: TickRecord = serde_json::from_str(&lines[1]).unwrap();
        assert_eq!(tick.ack, 1000);
        assert_eq!(tick.cwnd, 12);
        assert_eq!(tick.queue_len, 8);
        assert_eq!(tick.base_delay, None);
        assert!((tick.time - 5.0).abs() < 0.01);
        assert!(!lines[1].contains("base_delay"));

        Ok(())
    }
}
