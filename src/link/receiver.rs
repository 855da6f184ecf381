//! Target link: pulls frames off the modem and assembles the waypoint pair.
//!
//! Two threads run while the link is armed. The stats thread polls the modem's
//! frame statistics for diagnostics. The receive thread feeds frames into a
//! [`BlockAssembler`] and hands the first complete pair to a one-shot callback,
//! after which both threads stop.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::mission::TargetWaypointPair;
use crate::system::messages::{MissionEvent, emit};

use super::codec::{BlockAssembler, CodecError, MAX_FRAME_LEN};

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("modem I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("receiver closed")]
    Closed,

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Per-frame modem diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    pub rssi: f32,
    pub evm: f32,
    pub valid: bool,
}

/// Demodulated frame source.
///
/// Both methods are called from different threads and must not block for
/// longer than the implementation's own receive timeout.
pub trait FrameReceiver: Send + Sync {
    /// Copy the next frame into `buf`. `Ok(0)` means nothing arrived yet.
    fn receive(&self, buf: &mut [u8]) -> Result<usize, LinkError>;
    fn stats(&self) -> Result<FrameStats, LinkError>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinkParams {
    pub stats_interval_ms: u64,
    /// Pause after an empty receive or an error.
    pub idle_poll_ms: u64,
}

impl Default for LinkParams {
    fn default() -> Self {
        Self {
            stats_interval_ms: 500,
            idle_poll_ms: 5,
        }
    }
}

pub struct TargetLink {
    receiver: Arc<dyn FrameReceiver>,
    params: LinkParams,
    events: Sender<MissionEvent>,
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl TargetLink {
    pub fn new(receiver: Arc<dyn FrameReceiver>, params: LinkParams, events: Sender<MissionEvent>) -> Self {
        Self {
            receiver,
            params,
            events,
            stop: Arc::new(AtomicBool::new(true)),
            handles: Vec::new(),
        }
    }

    pub fn is_listening(&self) -> bool {
        !self.stop.load(Ordering::SeqCst)
    }

    /// Start listening. `on_pair` runs once, on the receive thread, with the
    /// first complete pair. Does nothing if the link is already listening.
    pub fn arm<F>(&mut self, on_pair: F) -> bool
    where
        F: FnOnce(TargetWaypointPair) + Send + 'static,
    {
        if self.is_listening() {
            return false;
        }
        self.join_finished();

        info!("target link armed");
        emit(&self.events, MissionEvent::LinkArmed);
        let stop = Arc::new(AtomicBool::new(false));
        self.stop = Arc::clone(&stop);
        self.handles.push(self.spawn_stats(Arc::clone(&stop)));
        self.handles.push(self.spawn_receive(stop, on_pair));
        true
    }

    /// Stop both threads and wait for them.
    pub fn cancel(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!("target link thread panicked");
            }
        }
    }

    fn join_finished(&mut self) {
        for handle in std::mem::take(&mut self.handles) {
            let _ = handle.join();
        }
    }

    fn spawn_stats(&self, stop: Arc<AtomicBool>) -> JoinHandle<()> {
        let receiver = Arc::clone(&self.receiver);
        let interval = Duration::from_millis(self.params.stats_interval_ms);
        thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                match receiver.stats() {
                    Ok(s) => debug!(rssi = s.rssi, evm = s.evm, valid = s.valid, "link frame stats"),
                    Err(e) => debug!("link stats unavailable: {}", e),
                }
                thread::sleep(interval);
            }
        })
    }

    fn spawn_receive<F>(&self, stop: Arc<AtomicBool>, on_pair: F) -> JoinHandle<()>
    where
        F: FnOnce(TargetWaypointPair) + Send + 'static,
    {
        let receiver = Arc::clone(&self.receiver);
        let events = self.events.clone();
        let idle = Duration::from_millis(self.params.idle_poll_ms);
        thread::spawn(move || {
            let mut assembler = BlockAssembler::new();
            let mut buf = [0u8; MAX_FRAME_LEN];
            let mut on_pair = Some(on_pair);

            while !stop.load(Ordering::SeqCst) {
                let len = match receiver.receive(&mut buf) {
                    Ok(0) => {
                        thread::sleep(idle);
                        continue;
                    }
                    Ok(len) => len.min(buf.len()),
                    Err(LinkError::Closed) => {
                        warn!("link receiver closed");
                        emit(&events, MissionEvent::LinkFault(LinkError::Closed.to_string()));
                        break;
                    }
                    Err(e) => {
                        warn!("link receive failed: {}", e);
                        emit(&events, MissionEvent::LinkFault(e.to_string()));
                        thread::sleep(idle);
                        continue;
                    }
                };

                match assembler.push(&buf[..len]) {
                    Ok(Some(pair)) => {
                        info!(?pair, "target pair decoded");
                        if let Some(callback) = on_pair.take() {
                            callback(pair);
                        }
                        break;
                    }
                    Ok(None) => debug!(len, pending = assembler.pending_blocks(), "link block received"),
                    Err(e) => {
                        warn!("malformed link block: {}", e);
                        emit(&events, MissionEvent::LinkFault(e.to_string()));
                    }
                }
            }
            stop.store(true, Ordering::SeqCst);
        })
    }
}

impl Drop for TargetLink {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::codec::encode_blocks;
    use crate::mission::GeoCoordinate;
    use crate::sim::ScriptedReceiver;
    use approx::assert_abs_diff_eq;
    use crossbeam_channel::{bounded, unbounded};

    fn pair() -> TargetWaypointPair {
        TargetWaypointPair::new(GeoCoordinate::new(55.6761, 12.5683), GeoCoordinate::new(55.6771, 12.5701))
    }

    #[test]
    fn test_callback_fires_once_and_link_stops() {
        let mut frames = encode_blocks(&pair(), 5).unwrap();
        frames.insert(0, vec![0xF0, 1, 2]);
        let receiver = Arc::new(ScriptedReceiver::new(frames));
        let (events_tx, events_rx) = unbounded();
        let (pair_tx, pair_rx) = bounded(4);

        let mut link = TargetLink::new(receiver, LinkParams::default(), events_tx);
        assert!(link.arm(move |p| {
            let _ = pair_tx.send(p);
        }));

        let got = pair_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_abs_diff_eq!(got.first.latitude, 55.6761, epsilon = 1e-9);
        assert_abs_diff_eq!(got.second.longitude, 12.5701, epsilon = 1e-9);
        link.cancel();
        assert!(!link.is_listening());
        assert!(pair_rx.try_recv().is_err());

        let events: Vec<_> = events_rx.try_iter().collect();
        assert_eq!(events[0], MissionEvent::LinkArmed);
        assert!(events.iter().any(|e| matches!(e, MissionEvent::LinkFault(_))));
    }

    #[test]
    fn test_cancel_before_completion() {
        let receiver = Arc::new(ScriptedReceiver::new(Vec::new()));
        let (events_tx, _events_rx) = unbounded();
        let mut link = TargetLink::new(receiver, LinkParams::default(), events_tx);
        link.arm(|_| panic!("no pair expected"));
        assert!(link.is_listening());
        link.cancel();
        assert!(!link.is_listening());
    }
}
