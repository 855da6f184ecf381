//! Visual-lock worker: runs the pattern matcher on demand.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::mission::LockRequest;
use crate::vision::{ColorFrameSource, PatternFix, PatternMatcher};

use super::shared_state::{SharedState, Worker};

const RECV_TIMEOUT: Duration = Duration::from_millis(50);

pub struct PatternWorker {
    handle: Option<JoinHandle<()>>,
    shared: Arc<SharedState>,
}

impl PatternWorker {
    pub fn spawn(
        source: Box<dyn ColorFrameSource>,
        matcher: Box<dyn PatternMatcher>,
        requests: Receiver<LockRequest>,
        fixes: Sender<PatternFix>,
        shared: Arc<SharedState>,
    ) -> Self {
        let thread_shared = Arc::clone(&shared);
        let handle = thread::spawn(move || run(source, matcher, requests, fixes, thread_shared));
        Self {
            handle: Some(handle),
            shared,
        }
    }

    pub fn shutdown(&mut self) {
        self.shared.request_stop(Worker::Pattern);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PatternWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(
    mut source: Box<dyn ColorFrameSource>,
    mut matcher: Box<dyn PatternMatcher>,
    requests: Receiver<LockRequest>,
    fixes: Sender<PatternFix>,
    shared: Arc<SharedState>,
) {
    info!("pattern worker started");
    loop {
        if shared.should_stop(Worker::Pattern) {
            break;
        }
        let request = match requests.recv_timeout(RECV_TIMEOUT) {
            Ok(r) => r,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        // Requests that queued up while matching are answered by this attempt.
        let skipped = requests.try_iter().count();

        let frame = match source.capture() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("visual lock capture failed: {:#}", e);
                continue;
            }
        };
        match matcher.locate(&frame) {
            Some((x, y)) => {
                debug!(x, y, tick = request.tick, height_cm = ?request.height_cm, skipped, "pattern located");
                let fix = PatternFix {
                    x,
                    y,
                    timestamp_ns: frame.timestamp_ns,
                };
                if fixes.send(fix).is_err() {
                    break;
                }
            }
            None => debug!(tick = request.tick, height_cm = ?request.height_cm, skipped, "pattern not found"),
        }
    }
    debug!("pattern worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mission::MissionState;
    use crate::sim::PatternScene;
    use crate::vision::{ColorBlobMatcher, HsvRange};
    use approx::assert_relative_eq;
    use crossbeam_channel::{bounded, unbounded};

    #[test]
    fn test_request_yields_fix() {
        let shared = SharedState::new();
        let scene = PatternScene::new(320, 240);
        scene.place_pattern(Some((190.0, 150.0)));
        let (req_tx, req_rx) = bounded(2);
        let (fix_tx, fix_rx) = unbounded();
        let mut worker = PatternWorker::spawn(
            Box::new(scene.source()),
            Box::new(ColorBlobMatcher::new(HsvRange::default(), 20)),
            req_rx,
            fix_tx,
            Arc::clone(&shared),
        );
        req_tx
            .send(LockRequest {
                state: MissionState::VisualSeek,
                tick: 1,
                guidance: None,
                height_cm: Some(120.0),
            })
            .unwrap();
        let fix = fix_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        worker.shutdown();
        assert_relative_eq!(fix.x, 190.0, epsilon = 1.0);
        assert_relative_eq!(fix.y, 150.0, epsilon = 1.0);
    }
}
