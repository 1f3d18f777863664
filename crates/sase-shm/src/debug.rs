//! Firmware Debug Channel
//!
//! Firmware owns the write line (`wr_idx`, `wr_cnt`) and the slots, the
//! host owns the read line (`rd_idx`, `rd_cnt`). Counts run free and wrap;
//! `wr_cnt - rd_cnt` is the number of unread messages. Firmware never
//! waits for space, so a writer more than [`DEBUG_SLOTS`] ahead has
//! overwritten the oldest messages and the reader skips them.
//!
//! ```text
//! slot: [level u8][len u8][rsvd u16][text .. 60 B]
//! ```

use crate::layout::{
    debug_slot_offset, DEBUG_RD_CNT, DEBUG_RD_IDX, DEBUG_SLOTS, DEBUG_SLOT_BYTES, DEBUG_TEXT_BYTES,
    DEBUG_WR_CNT, GEN_FLAGS, GEN_FLAG_DEBUG,
};
use crate::region::SharedMemory;
use crate::{Result, ShmError};
use crossbeam::channel::{bounded, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const SLOT_WORDS: usize = DEBUG_SLOT_BYTES / 4;

/// Severity carried in a debug slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum DebugLevel {
    /// Error
    Error = 0,
    /// Warning
    Warn = 1,
    /// Informational
    Info = 2,
    /// Debug
    Debug = 3,
    /// Anything more verbose
    Trace = 4,
}

impl DebugLevel {
    /// Decode a level byte; unknown values are treated as trace
    pub fn from_byte(b: u8) -> Self {
        match b {
            0 => DebugLevel::Error,
            1 => DebugLevel::Warn,
            2 => DebugLevel::Info,
            3 => DebugLevel::Debug,
            _ => DebugLevel::Trace,
        }
    }
}

/// One firmware message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugMessage {
    /// Write count at which firmware produced it
    pub seq: u32,
    /// Severity
    pub level: DebugLevel,
    /// Text, lossily decoded
    pub text: String,
}

impl DebugMessage {
    /// Re-emit as a host `tracing` event
    pub fn emit(&self) {
        let seq = self.seq;
        match self.level {
            DebugLevel::Error => tracing::error!(target: "sase_fw", seq, "{}", self.text),
            DebugLevel::Warn => tracing::warn!(target: "sase_fw", seq, "{}", self.text),
            DebugLevel::Info => tracing::info!(target: "sase_fw", seq, "{}", self.text),
            DebugLevel::Debug => tracing::debug!(target: "sase_fw", seq, "{}", self.text),
            DebugLevel::Trace => tracing::trace!(target: "sase_fw", seq, "{}", self.text),
        }
    }
}

/// Pack a message into slot words
pub fn encode_slot(level: DebugLevel, text: &str) -> [u32; SLOT_WORDS] {
    let bytes = text.as_bytes();
    let len = bytes.len().min(DEBUG_TEXT_BYTES);
    let mut raw = [0u8; DEBUG_SLOT_BYTES];
    raw[0] = level as u8;
    raw[1] = len as u8;
    raw[4..4 + len].copy_from_slice(&bytes[..len]);
    let mut words = [0u32; SLOT_WORDS];
    for (w, chunk) in words.iter_mut().zip(raw.chunks_exact(4)) {
        *w = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    words
}

fn decode_slot(seq: u32, words: &[u32; SLOT_WORDS]) -> DebugMessage {
    let mut raw = [0u8; DEBUG_SLOT_BYTES];
    for (chunk, w) in raw.chunks_exact_mut(4).zip(words) {
        chunk.copy_from_slice(&w.to_le_bytes());
    }
    let len = (raw[1] as usize).min(DEBUG_TEXT_BYTES);
    DebugMessage {
        seq,
        level: DebugLevel::from_byte(raw[0]),
        text: String::from_utf8_lossy(&raw[4..4 + len]).into_owned(),
    }
}

/// Outcome of one drain pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainReport {
    /// Messages handed to the sink
    pub delivered: u32,
    /// Messages overwritten before they could be read
    pub lost: u32,
}

/// Host end of the debug ring
pub struct DebugChannel<M: SharedMemory> {
    region: M,
    enabled: AtomicBool,
}

impl<M: SharedMemory> DebugChannel<M> {
    pub(crate) fn new(region: M) -> Self {
        let enabled = region.read_word(GEN_FLAGS) & GEN_FLAG_DEBUG != 0;
        Self {
            region,
            enabled: AtomicBool::new(enabled),
        }
    }

    /// Draining enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Enable or pause draining
    pub fn set_enabled(&self, on: bool) {
        self.enabled.store(on, Ordering::Release);
    }

    /// Unread message count, overwritten ones included
    pub fn pending(&self) -> u32 {
        let wr = self.region.read_word(DEBUG_WR_CNT);
        wr.wrapping_sub(self.region.read_word(DEBUG_RD_CNT))
    }

    /// Read every message published so far, oldest first
    pub fn drain(&self, mut sink: impl FnMut(DebugMessage)) -> DrainReport {
        let r = &self.region;
        let wr = r.read_word(DEBUG_WR_CNT);
        let mut rd = r.read_word(DEBUG_RD_CNT);
        let mut report = DrainReport::default();

        let mut pending = wr.wrapping_sub(rd);
        if pending > DEBUG_SLOTS as u32 {
            report.lost = pending - DEBUG_SLOTS as u32;
            rd = rd.wrapping_add(report.lost);
            pending = DEBUG_SLOTS as u32;
        }

        for _ in 0..pending {
            let mut words = [0u32; SLOT_WORDS];
            r.read_words(debug_slot_offset(rd as usize), &mut words);
            // Message `rd + DEBUG_SLOTS` goes into this slot before the count
            // moves past it, so at a full lap the slot may already be torn
            let wr_now = r.read_word(DEBUG_WR_CNT);
            if wr_now.wrapping_sub(rd) >= DEBUG_SLOTS as u32 {
                report.lost += 1;
            } else {
                sink(decode_slot(rd, &words));
                report.delivered += 1;
            }
            rd = rd.wrapping_add(1);
        }

        if pending > 0 || report.lost > 0 {
            r.fence();
            r.write_word(DEBUG_RD_IDX, rd % DEBUG_SLOTS as u32);
            r.write_word(DEBUG_RD_CNT, rd);
        }
        if report.lost > 0 {
            tracing::warn!(lost = report.lost, "firmware debug ring overrun");
        }
        report
    }
}

enum Command {
    Kick,
    Stop,
}

/// Drainer scheduling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainerConfig {
    /// Delay before the next pass while messages remain pending
    pub interval: Duration,
    /// Wake without a kick this often (platforms without a debug interrupt)
    pub idle_poll: Option<Duration>,
}

impl Default for DrainerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(10),
            idle_poll: None,
        }
    }
}

/// Drainer counters
#[derive(Debug, Default)]
pub struct DrainStats {
    /// Messages delivered to the sink
    pub delivered: AtomicU64,
    /// Messages lost to overruns
    pub lost: AtomicU64,
    /// Drain passes run
    pub passes: AtomicU64,
}

/// Background worker draining the debug ring
pub struct DebugDrainer {
    tx: Sender<Command>,
    running: Arc<AtomicBool>,
    stats: Arc<DrainStats>,
    handle: Option<thread::JoinHandle<()>>,
}

impl DebugDrainer {
    /// Drain into host `tracing` events
    pub fn spawn<M>(channel: Arc<DebugChannel<M>>, config: DrainerConfig) -> Result<Self>
    where
        M: SharedMemory + 'static,
    {
        Self::spawn_with_sink(channel, config, |msg| msg.emit())
    }

    /// Drain into a custom sink
    pub fn spawn_with_sink<M, F>(channel: Arc<DebugChannel<M>>, config: DrainerConfig, mut sink: F) -> Result<Self>
    where
        M: SharedMemory + 'static,
        F: FnMut(DebugMessage) + Send + 'static,
    {
        // A single queued kick is enough to cause a pass
        let (tx, rx) = bounded::<Command>(1);
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(DrainStats::default());

        let worker_running = Arc::clone(&running);
        let worker_stats = Arc::clone(&stats);
        let handle = thread::Builder::new()
            .name("sase-fw-debug".into())
            .spawn(move || {
                tracing::debug!("debug drainer starting");
                let mut rescheduled = false;
                while worker_running.load(Ordering::Acquire) {
                    let wait = if rescheduled { Some(config.interval) } else { config.idle_poll };
                    let cmd = match wait {
                        Some(d) => match rx.recv_timeout(d) {
                            Ok(cmd) => cmd,
                            Err(RecvTimeoutError::Timeout) => Command::Kick,
                            Err(RecvTimeoutError::Disconnected) => break,
                        },
                        None => match rx.recv() {
                            Ok(cmd) => cmd,
                            Err(_) => break,
                        },
                    };
                    if matches!(cmd, Command::Stop) || !worker_running.load(Ordering::Acquire) {
                        break;
                    }
                    if !channel.is_enabled() {
                        rescheduled = false;
                        continue;
                    }

                    let report = channel.drain(&mut sink);
                    worker_stats.passes.fetch_add(1, Ordering::Relaxed);
                    worker_stats.delivered.fetch_add(report.delivered as u64, Ordering::Relaxed);
                    worker_stats.lost.fetch_add(report.lost as u64, Ordering::Relaxed);
                    rescheduled = channel.pending() > 0;
                }
                tracing::debug!("debug drainer stopped");
            })
            .map_err(|e| ShmError::Spawn(e.to_string()))?;

        Ok(Self {
            tx,
            running,
            stats,
            handle: Some(handle),
        })
    }

    /// Request a drain pass (firmware debug interrupt)
    pub fn kick(&self) {
        let _ = self.tx.try_send(Command::Kick);
    }

    /// Counters
    pub fn stats(&self) -> &DrainStats {
        &self.stats
    }

    /// Check if running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && self.handle.is_some()
    }

    /// Stop the worker and wait for it
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        let _ = self.tx.try_send(Command::Stop);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DebugDrainer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{DEBUG_WR_IDX, SHM_SIZE};
    use crate::region::HeapRegion;
    use crate::sim::FirmwareSim;
    use std::time::Instant;

    fn setup() -> (Arc<HeapRegion>, FirmwareSim<Arc<HeapRegion>>, DebugChannel<Arc<HeapRegion>>) {
        let region = Arc::new(HeapRegion::new(SHM_SIZE));
        region.write_word(GEN_FLAGS, GEN_FLAG_DEBUG);
        let sim = FirmwareSim::new(Arc::clone(&region));
        let channel = DebugChannel::new(Arc::clone(&region));
        (region, sim, channel)
    }

    #[test]
    fn test_slot_encoding() {
        let words = encode_slot(DebugLevel::Warn, "ring 3 stalled");
        let msg = decode_slot(9, &words);
        assert_eq!(msg.level, DebugLevel::Warn);
        assert_eq!(msg.text, "ring 3 stalled");
        assert_eq!(msg.seq, 9);
        assert_eq!(words[0] & 0xFFFF, 1 | (14 << 8));
    }

    #[test]
    fn test_long_text_truncated() {
        let long = "x".repeat(200);
        let msg = decode_slot(0, &encode_slot(DebugLevel::Info, &long));
        assert_eq!(msg.text.len(), DEBUG_TEXT_BYTES);
    }

    #[test]
    fn test_emit_under_subscriber() {
        let subscriber = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::TRACE)
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            for level in [DebugLevel::Error, DebugLevel::Warn, DebugLevel::Info, DebugLevel::Debug, DebugLevel::Trace] {
                decode_slot(1, &encode_slot(level, "fw says hi")).emit();
            }
        });
    }

    #[test]
    fn test_drain_in_order() {
        let (region, sim, channel) = setup();
        assert!(channel.is_enabled());
        sim.write_debug(DebugLevel::Info, "boot");
        sim.write_debug(DebugLevel::Error, "ecc");
        assert_eq!(channel.pending(), 2);

        let mut got = Vec::new();
        let report = channel.drain(|m| got.push(m));
        assert_eq!(report, DrainReport { delivered: 2, lost: 0 });
        assert_eq!(got[0].text, "boot");
        assert_eq!(got[1].level, DebugLevel::Error);
        assert_eq!(channel.pending(), 0);
        assert_eq!(region.read_word(DEBUG_RD_IDX), 2);
        assert_eq!(region.read_word(DEBUG_WR_IDX), 2);

        // nothing new: no index write
        assert_eq!(channel.drain(|_| {}), DrainReport::default());
    }

    #[test]
    fn test_overrun_skips_to_oldest_intact() {
        let (_region, sim, channel) = setup();
        for i in 0..(DEBUG_SLOTS + 5) {
            sim.write_debug(DebugLevel::Debug, &format!("m{i}"));
        }
        let mut got = Vec::new();
        let report = channel.drain(|m| got.push(m));
        // m5 shares its slot with the next message the writer may be filling
        assert_eq!(report.lost, 6);
        assert_eq!(report.delivered, DEBUG_SLOTS as u32 - 1);
        assert_eq!(got.first().map(|m| m.text.as_str()), Some("m6"));
        assert_eq!(got.last().map(|m| m.seq), Some((DEBUG_SLOTS + 4) as u32));
    }

    /// Rewrites slot 0 the first time the host reads it, like a writer
    /// that has started the next lap without bumping the count yet
    struct LappingRegion {
        inner: HeapRegion,
        lapped: AtomicBool,
    }

    impl SharedMemory for LappingRegion {
        fn size(&self) -> usize {
            self.inner.size()
        }

        fn read_word(&self, offset: usize) -> u32 {
            if offset == debug_slot_offset(0) && !self.lapped.swap(true, Ordering::SeqCst) {
                self.inner.write_words(offset, &encode_slot(DebugLevel::Warn, "next lap"));
            }
            self.inner.read_word(offset)
        }

        fn write_word(&self, offset: usize, value: u32) {
            self.inner.write_word(offset, value)
        }

        fn fence(&self) {
            self.inner.fence()
        }
    }

    #[test]
    fn test_full_ring_with_writer_mid_lap() {
        let region = Arc::new(LappingRegion {
            inner: HeapRegion::new(SHM_SIZE),
            lapped: AtomicBool::new(false),
        });
        region.write_word(GEN_FLAGS, GEN_FLAG_DEBUG);
        let sim = FirmwareSim::new(Arc::clone(&region));
        let channel = DebugChannel::new(Arc::clone(&region));
        for i in 0..DEBUG_SLOTS {
            sim.write_debug(DebugLevel::Info, &format!("msg-{i}"));
        }
        assert_eq!(channel.pending(), DEBUG_SLOTS as u32);

        let mut got = Vec::new();
        let report = channel.drain(|m| got.push((m.seq, m.text)));
        assert!(region.lapped.load(Ordering::SeqCst));
        assert_eq!(report, DrainReport { delivered: DEBUG_SLOTS as u32 - 1, lost: 1 });
        assert_eq!(got.first(), Some(&(1, "msg-1".to_string())));
        assert!(got.iter().all(|(_, text)| text != "next lap"));
        assert_eq!(channel.pending(), 0);
    }

    #[test]
    fn test_counts_wrap() {
        let (region, sim, channel) = setup();
        region.write_word(DEBUG_RD_CNT, u32::MAX - 1);
        sim.set_write_count(u32::MAX - 1);
        sim.write_debug(DebugLevel::Info, "a");
        sim.write_debug(DebugLevel::Info, "b");
        sim.write_debug(DebugLevel::Info, "c");
        let mut got = Vec::new();
        assert_eq!(channel.drain(|m| got.push(m.text)).delivered, 3);
        assert_eq!(got, vec!["a", "b", "c"]);
        assert_eq!(region.read_word(DEBUG_RD_CNT), 1);
    }

    #[test]
    fn test_drainer_kick_and_reschedule() {
        let (_region, sim, channel) = setup();
        let channel = Arc::new(channel);
        let (tx, rx) = crossbeam::channel::unbounded();
        let mut drainer = DebugDrainer::spawn_with_sink(
            Arc::clone(&channel),
            DrainerConfig {
                interval: Duration::from_millis(1),
                idle_poll: None,
            },
            move |m| {
                let _ = tx.send(m.text);
            },
        )
        .unwrap();
        assert!(drainer.is_running());

        sim.write_debug(DebugLevel::Info, "one");
        drainer.kick();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "one");

        sim.write_debug(DebugLevel::Info, "two");
        drainer.kick();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "two");

        let deadline = Instant::now() + Duration::from_secs(2);
        while drainer.stats().delivered.load(Ordering::Relaxed) < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(drainer.stats().delivered.load(Ordering::Relaxed), 2);

        drainer.stop();
        assert!(!drainer.is_running());
    }

    #[test]
    fn test_disabled_channel_not_drained() {
        let (_region, sim, channel) = setup();
        channel.set_enabled(false);
        let channel = Arc::new(channel);
        let drainer = DebugDrainer::spawn(
            Arc::clone(&channel),
            DrainerConfig {
                interval: Duration::from_millis(1),
                idle_poll: Some(Duration::from_millis(1)),
            },
        )
        .unwrap();
        sim.write_debug(DebugLevel::Info, "held");
        drainer.kick();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(channel.pending(), 1);
        assert_eq!(drainer.stats().passes.load(Ordering::Relaxed), 0);
        drop(drainer);
    }
}
