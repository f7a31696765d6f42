//! File pump module
//!
//! Moves an inclusive byte window from an open file into a [`BodySink`] in
//! fixed-size chunks. Reads are positional, so any number of pumps can share
//! one descriptor. The pump's working state comes from a [`Pool`] and goes
//! back to it only after the source reference has been released.
//!
//! ```text
//! read(offset) -> write(chunk) -> [drained] -> yield -> read(offset + n) ...
//!
//! finish: end sink -> release source -> state back to pool
//! ```

use crate::cache::Lease;
use crate::error::ServeError;
use crate::http::body::BodySink;
use crate::http::range::RangeWindow;
use crate::logger;
use crate::pool::{Pool, Pooled, Recycle};
use hyper::body::Bytes;
use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;

/// Bytes read per chunk
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Written into recycled state so a missing `prepare` shows up immediately
const POISON: u64 = u64::MAX;

/// Reusable per-transfer state
pub struct PumpState {
    buf: Vec<u8>,
    start: u64,
    end: u64,
    transferred: u64,
    armed: bool,
}

impl PumpState {
    pub fn new() -> Self {
        Self {
            buf: vec![0; CHUNK_SIZE],
            start: POISON,
            end: 0,
            transferred: POISON,
            armed: false,
        }
    }

    /// Shared pool for pump states
    pub fn pool(max_idle: usize) -> Arc<Pool<Self>> {
        Pool::new(Self::new, max_idle)
    }

    fn prepare(&mut self, window: RangeWindow) {
        debug_assert!(
            !self.armed && self.transferred == POISON,
            "pump state reused without being recycled"
        );
        if self.buf.len() < CHUNK_SIZE {
            // Lost to a read abandoned mid-flight
            self.buf = vec![0; CHUNK_SIZE];
        }
        self.start = window.start;
        self.end = window.end;
        self.transferred = 0;
        self.armed = true;
    }

    /// Absolute offset of the next byte to read
    const fn offset(&self) -> u64 {
        self.start + self.transferred
    }

    const fn is_done(&self) -> bool {
        self.offset() > self.end
    }
}

impl Default for PumpState {
    fn default() -> Self {
        Self::new()
    }
}

impl Recycle for PumpState {
    fn recycle(&mut self) {
        self.start = POISON;
        self.end = 0;
        self.transferred = POISON;
        self.armed = false;
    }
}

/// Descriptor a pump reads from
pub enum PumpSource {
    /// Reference held on a descriptor cache entry
    Cached(Lease),
    /// Descriptor opened for this transfer only
    Direct(Arc<File>),
}

impl PumpSource {
    /// Open `path` for a single transfer
    pub async fn open(path: &Path) -> io::Result<Self> {
        let file = tokio::fs::File::open(path).await?.into_std().await;
        Ok(Self::Direct(Arc::new(file)))
    }

    fn file(&self) -> &Arc<File> {
        match self {
            Self::Cached(lease) => lease.file(),
            Self::Direct(file) => file,
        }
    }
}

/// How a pump run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpOutcome {
    /// Whole window transferred
    Complete,
    /// Zero-byte read before the end of the window
    Eof,
    /// Consumer went away
    SinkClosed,
    /// Read failure; already logged
    Failed(ServeError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumpReport {
    pub outcome: PumpOutcome,
    pub bytes: u64,
}

/// One in-flight transfer
pub struct FilePump {
    // Field order matters: the source is released before the state returns to its pool
    source: Option<PumpSource>,
    state: Pooled<PumpState>,
}

impl FilePump {
    /// Check out pump state and bind it to a source and window
    pub fn new(pool: &Arc<Pool<PumpState>>, source: PumpSource, window: RangeWindow) -> Self {
        let mut state = pool.get();
        state.prepare(window);
        Self {
            source: Some(source),
            state,
        }
    }

    /// Transfer the window into `sink`
    ///
    /// Every exit path ends the sink, then releases the source, then returns
    /// the state to the pool. Read errors are logged and end the stream; they
    /// are never retried.
    pub async fn run<S: BodySink>(mut self, mut sink: S) -> PumpReport {
        let outcome = self.transfer(&mut sink).await;
        let bytes = self.state.transferred;

        if !sink.is_ended() {
            sink.end();
        }
        drop(sink);
        drop(self.source.take());
        drop(self);

        PumpReport { outcome, bytes }
    }

    async fn transfer<S: BodySink>(&mut self, sink: &mut S) -> PumpOutcome {
        let Some(file) = self.source.as_ref().map(|s| Arc::clone(s.file())) else {
            return PumpOutcome::Failed(ServeError::Internal("pump has no source".to_string()));
        };

        loop {
            if self.state.is_done() {
                return PumpOutcome::Complete;
            }

            if sink.is_closed() {
                return PumpOutcome::SinkClosed;
            }

            let offset = self.state.offset();
            let want = usize::try_from(self.state.end - offset + 1)
                .map_or(CHUNK_SIZE, |n| n.min(CHUNK_SIZE));
            let mut buf = std::mem::take(&mut self.state.buf);
            let file = Arc::clone(&file);

            let mut read = tokio::task::spawn_blocking(move || {
                let result = read_at(&file, &mut buf[..want], offset);
                (buf, result)
            });

            let joined = tokio::select! {
                biased;
                () = sink.closed() => {
                    // The read holds its own descriptor reference; wait it out
                    // so the source is really released when `run` returns
                    if let Ok((buf, _)) = read.await {
                        self.state.buf = buf;
                    }
                    return PumpOutcome::SinkClosed;
                }
                joined = &mut read => joined,
            };

            let (buf, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    logger::log_transfer_error(&format!("Read task failed at offset {offset}: {e}"));
                    return PumpOutcome::Failed(ServeError::Transfer(e.to_string()));
                }
            };
            self.state.buf = buf;

            let n = match result {
                Ok(0) => return PumpOutcome::Eof,
                Ok(n) => n,
                Err(e) => {
                    logger::log_transfer_error(&format!("Read failed at offset {offset}: {e}"));
                    return PumpOutcome::Failed(ServeError::Transfer(e.to_string()));
                }
            };
            self.state.transferred += n as u64;

            let chunk = Bytes::copy_from_slice(&self.state.buf[..n]);
            match sink.write(chunk) {
                Ok(true) => {}
                Ok(false) => {
                    if sink.drained().await.is_err() {
                        return PumpOutcome::SinkClosed;
                    }
                }
                Err(_) => return PumpOutcome::SinkClosed,
            }

            if self.state.is_done() {
                return PumpOutcome::Complete;
            }

            // Next read on a fresh scheduler turn
            tokio::task::yield_now().await;
        }
    }
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    loop {
        match file.read_at(buf, offset) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            result => return result,
        }
    }
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::body::{BodySink, ChannelSink, SinkClosed};
    use tempfile::TempDir;

    fn fixture(len: usize) -> (TempDir, Vec<u8>, Arc<File>) {
        let dir = tempfile::tempdir().unwrap();
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, &data).unwrap();
        let file = Arc::new(File::open(&path).unwrap());
        (dir, data, file)
    }

    async fn collect(mut rx: tokio::sync::mpsc::Receiver<Bytes>) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = rx.recv().await {
            out.extend_from_slice(&chunk);
        }
        out
    }

    #[tokio::test]
    async fn test_whole_window() {
        let (_dir, data, file) = fixture(10);
        let pool = PumpState::pool(4);
        let (sink, rx) = ChannelSink::with_capacity(4);

        let pump = FilePump::new(
            &pool,
            PumpSource::Direct(Arc::clone(&file)),
            RangeWindow { start: 0, end: 9 },
        );
        let (report, body) = tokio::join!(pump.run(sink), collect(rx));

        assert_eq!(report.outcome, PumpOutcome::Complete);
        assert_eq!(report.bytes, 10);
        assert_eq!(body, data);
        assert_eq!(Arc::strong_count(&file), 1, "source must be released");
        assert_eq!(pool.idle(), 1, "state must return to the pool");
    }

    #[tokio::test]
    async fn test_multi_chunk_window_with_backpressure() {
        let (_dir, data, file) = fixture(CHUNK_SIZE * 3 + 123);
        let pool = PumpState::pool(4);
        let (sink, rx) = ChannelSink::with_capacity(1);
        let window = RangeWindow {
            start: 100,
            end: (CHUNK_SIZE * 3 + 50) as u64,
        };

        let pump = FilePump::new(&pool, PumpSource::Direct(file), window);
        let (report, body) = tokio::join!(pump.run(sink), collect(rx));

        assert_eq!(report.outcome, PumpOutcome::Complete);
        assert_eq!(report.bytes, window.len());
        assert_eq!(body, &data[100..=CHUNK_SIZE * 3 + 50]);
    }

    #[tokio::test]
    async fn test_short_file_ends_with_eof() {
        let (_dir, data, file) = fixture(10);
        let pool = PumpState::pool(4);
        let (sink, rx) = ChannelSink::with_capacity(4);

        // Window planned against a larger size than the file has now
        let window = RangeWindow { start: 4, end: 99 };
        let pump = FilePump::new(&pool, PumpSource::Direct(file), window);
        let (report, body) = tokio::join!(pump.run(sink), collect(rx));

        assert_eq!(report.outcome, PumpOutcome::Eof);
        assert_eq!(report.bytes, 6);
        assert_eq!(body, &data[4..]);
    }

    #[tokio::test]
    async fn test_closed_sink_stops_transfer() {
        let (_dir, _data, file) = fixture(CHUNK_SIZE * 4);
        let pool = PumpState::pool(4);
        let (sink, rx) = ChannelSink::with_capacity(1);
        drop(rx);

        let window = RangeWindow::whole((CHUNK_SIZE * 4) as u64).unwrap();
        let pump = FilePump::new(&pool, PumpSource::Direct(Arc::clone(&file)), window);
        let report = pump.run(sink).await;

        assert_eq!(report.outcome, PumpOutcome::SinkClosed);
        assert_eq!(Arc::strong_count(&file), 1);
        assert_eq!(pool.idle(), 1);
    }

    /// Sink whose consumer goes away right after the first chunk, without
    /// `is_closed` noticing, so the close lands while a read is in flight
    struct HangUpSink {
        hung_up: bool,
        ended: bool,
    }

    impl BodySink for HangUpSink {
        fn write(&mut self, _chunk: Bytes) -> Result<bool, SinkClosed> {
            self.hung_up = true;
            Ok(true)
        }

        async fn drained(&mut self) -> Result<(), SinkClosed> {
            Ok(())
        }

        async fn closed(&self) {
            if !self.hung_up {
                std::future::pending::<()>().await;
            }
        }

        fn is_closed(&self) -> bool {
            false
        }

        fn end(&mut self) {
            self.ended = true;
        }

        fn is_ended(&self) -> bool {
            self.ended
        }
    }

    #[tokio::test]
    async fn test_close_during_read_releases_source() {
        let (_dir, _data, file) = fixture(CHUNK_SIZE * 4);
        let pool = PumpState::pool(4);
        let sink = HangUpSink {
            hung_up: false,
            ended: false,
        };

        let window = RangeWindow::whole((CHUNK_SIZE * 4) as u64).unwrap();
        let pump = FilePump::new(&pool, PumpSource::Direct(Arc::clone(&file)), window);
        let report = pump.run(sink).await;

        assert_eq!(report.outcome, PumpOutcome::SinkClosed);
        assert_eq!(report.bytes, CHUNK_SIZE as u64);
        assert_eq!(Arc::strong_count(&file), 1, "in-flight read must be awaited");
        assert_eq!(pool.idle(), 1);
    }

    #[tokio::test]
    async fn test_recycled_state_is_reset() {
        let (_dir, data, file) = fixture(100);
        let pool = PumpState::pool(1);

        for (start, end) in [(0, 49), (50, 99)] {
            let (sink, rx) = ChannelSink::with_capacity(4);
            let window = RangeWindow { start, end };
            let pump = FilePump::new(&pool, PumpSource::Direct(Arc::clone(&file)), window);
            let (report, body) = tokio::join!(pump.run(sink), collect(rx));
            assert_eq!(report.bytes, 50);
            assert_eq!(body, &data[start as usize..=end as usize]);
        }
        assert_eq!(pool.created(), 1);
    }

    #[test]
    fn test_recycle_poisons_state() {
        let mut state = PumpState::new();
        state.prepare(RangeWindow { start: 3, end: 7 });
        assert_eq!(state.offset(), 3);

        state.recycle();
        assert_eq!(state.transferred, POISON);
        assert!(!state.armed);
    }

    #[test]
    #[should_panic(expected = "reused without being recycled")]
    #[cfg(debug_assertions)]
    fn test_double_prepare_detected() {
        let mut state = PumpState::new();
        state.prepare(RangeWindow { start: 0, end: 1 });
        state.prepare(RangeWindow { start: 0, end: 1 });
    }

    /// Sink that records the order of lifecycle calls
    struct RecordingSink {
        events: Arc<std::sync::Mutex<Vec<&'static str>>>,
        ended: bool,
    }

    impl BodySink for RecordingSink {
        fn write(&mut self, _chunk: Bytes) -> Result<bool, SinkClosed> {
            self.events.lock().unwrap().push("write");
            Ok(true)
        }

        async fn drained(&mut self) -> Result<(), SinkClosed> {
            Ok(())
        }

        async fn closed(&self) {
            std::future::pending::<()>().await;
        }

        fn is_closed(&self) -> bool {
            false
        }

        fn end(&mut self) {
            self.events.lock().unwrap().push("end");
            self.ended = true;
        }

        fn is_ended(&self) -> bool {
            self.ended
        }
    }

    #[tokio::test]
    async fn test_sink_ended_once_after_writes() {
        let (_dir, _data, file) = fixture(CHUNK_SIZE + 1);
        let pool = PumpState::pool(1);
        let events = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = RecordingSink {
            events: Arc::clone(&events),
            ended: false,
        };

        let window = RangeWindow::whole((CHUNK_SIZE + 1) as u64).unwrap();
        let report = FilePump::new(&pool, PumpSource::Direct(file), window).run(sink).await;

        assert_eq!(report.outcome, PumpOutcome::Complete);
        assert_eq!(*events.lock().unwrap(), vec!["write", "write", "end"]);
    }
}
