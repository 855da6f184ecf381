//! Flight state machine.
//!
//! Advanced once per control tick with a [`TickSnapshot`]. Transitions happen
//! only on operator events, the arrival of a target pair, the periodic
//! re-acquisition throttle in the seek states, and the acceptance-box test on a
//! pattern fix. Every other input leaves the state unchanged.

use serde::Deserialize;
use tracing::{debug, info};

use crate::control::mixer::Calibration;
use crate::control::snapshot::TickSnapshot;
use crate::vision::PatternFix;

use super::location::{BestFix, LocationFix};
use super::state::MissionState;
use super::waypoint::TargetWaypointPair;

/// Operator confirmations delivered to the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorEvent {
    /// Attitude is level; capture the baseline.
    ConfirmCalibration,
    ConfirmLiftoff,
    ConfirmLanded,
    /// Take off again from the landing site.
    Rearm,
    /// Head back to the start point.
    BeginReturn,
    /// Back at the start point; wait for a new target.
    ConfirmArrival,
}

/// Pixel rectangle that counts as "centred over the pattern". Bounds are
/// exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct AcceptanceBox {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl Default for AcceptanceBox {
    fn default() -> Self {
        Self {
            x_min: 140.0,
            x_max: 240.0,
            y_min: 100.0,
            y_max: 200.0,
        }
    }
}

impl AcceptanceBox {
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x > self.x_min && x < self.x_max && y > self.y_min && y < self.y_max
    }

    pub fn is_empty(&self) -> bool {
        !(self.x_min < self.x_max && self.y_min < self.y_max)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SeekParams {
    /// Ticks between visual-lock requests in GPS seek.
    pub gps_lock_interval: u64,
    /// Ticks between visual-lock requests in visual seek.
    pub visual_lock_interval: u64,
    pub acceptance: AcceptanceBox,
}

impl Default for SeekParams {
    fn default() -> Self {
        Self {
            gps_lock_interval: 540,
            visual_lock_interval: 230,
            acceptance: AcceptanceBox::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: MissionState,
    pub to: MissionState,
}

/// Distance and bearing from the current position to the target aim point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Guidance {
    pub distance_m: f64,
    /// Degrees clockwise from north.
    pub bearing_deg: f64,
}

/// Request for the pattern worker to attempt a visual lock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LockRequest {
    pub state: MissionState,
    pub tick: u64,
    pub guidance: Option<Guidance>,
    /// Last ultrasonic range reading, if the sensor has reported.
    pub height_cm: Option<f64>,
}

/// What one step did, for the control loop to act on.
#[derive(Debug, Clone, Default)]
pub struct StepOutcome {
    pub transition: Option<Transition>,
    pub lock_request: Option<LockRequest>,
    /// Start (or restart) listening on the target link.
    pub arm_link: bool,
    pub calibrated: Option<Calibration>,
    pub target_acquired: Option<TargetWaypointPair>,
    pub pattern_sighted: Option<PatternFix>,
    /// State after the step.
    pub state: MissionState,
}

impl StepOutcome {
    pub fn armed(&self) -> bool {
        self.state.is_armed()
    }
}

pub struct FlightStateMachine {
    state: MissionState,
    params: SeekParams,
    /// Ticks spent in the current seek state.
    seek_ticks: u64,
    baseline: Option<Calibration>,
    target: Option<TargetWaypointPair>,
    /// Most accurate fix seen while waiting in IDLE.
    best_fix: BestFix,
    /// Latest fix reported by the location source.
    current_fix: Option<LocationFix>,
}

impl FlightStateMachine {
    pub fn new(params: SeekParams) -> Self {
        Self {
            state: MissionState::Calibrate,
            params,
            seek_ticks: 0,
            baseline: None,
            target: None,
            best_fix: BestFix::default(),
            current_fix: None,
        }
    }

    pub fn state(&self) -> MissionState {
        self.state
    }

    pub fn baseline(&self) -> Option<Calibration> {
        self.baseline
    }

    pub fn target(&self) -> Option<TargetWaypointPair> {
        self.target
    }

    /// Start fix: the most accurate one seen in IDLE.
    pub fn best_fix(&self) -> Option<LocationFix> {
        self.best_fix.get()
    }

    /// Where the vehicle is now, falling back to the start fix before the
    /// location source has reported.
    pub fn position(&self) -> Option<LocationFix> {
        self.current_fix.or_else(|| self.best_fix.get())
    }

    pub fn seek_ticks(&self) -> u64 {
        self.seek_ticks
    }

    /// Advance by one tick.
    pub fn step(&mut self, snap: &TickSnapshot) -> StepOutcome {
        let mut out = StepOutcome::default();

        if let Some(fix) = snap.location {
            self.current_fix = Some(fix);
            if self.state == MissionState::Idle {
                self.best_fix.offer(fix);
            }
        }

        match self.state {
            MissionState::Calibrate => {
                if snap.has_event(OperatorEvent::ConfirmCalibration) {
                    let baseline = Calibration::capture(&snap.orientation);
                    info!(
                        roll_deg = baseline.roll_deg,
                        pitch_deg = baseline.pitch_deg,
                        "calibration captured"
                    );
                    self.baseline = Some(baseline);
                    out.calibrated = Some(baseline);
                    self.enter(MissionState::Idle, &mut out);
                }
            }
            MissionState::Idle => {
                if let Some(pair) = snap.target.filter(|_| self.target.is_none()) {
                    info!(?pair, "target acquired");
                    self.target = Some(pair);
                    out.target_acquired = Some(pair);
                    self.enter(MissionState::Liftoff, &mut out);
                }
            }
            MissionState::Liftoff => {
                if snap.has_event(OperatorEvent::ConfirmLiftoff) {
                    self.enter(MissionState::GpsSeek, &mut out);
                }
            }
            MissionState::GpsSeek => {
                self.seek_ticks += 1;
                if let Some(fix) = snap.pattern {
                    out.pattern_sighted = Some(fix);
                    self.enter(MissionState::VisualSeek, &mut out);
                } else if self.seek_ticks % self.params.gps_lock_interval.max(1) == 0 {
                    out.lock_request = Some(LockRequest {
                        state: self.state,
                        tick: snap.tick,
                        guidance: self.guidance(),
                        height_cm: snap.ranging.map(|r| r.distance_cm),
                    });
                }
            }
            MissionState::VisualSeek => {
                self.seek_ticks += 1;
                if let Some(fix) = snap.pattern {
                    out.pattern_sighted = Some(fix);
                    if self.params.acceptance.contains(fix.x, fix.y) {
                        self.enter(MissionState::Landing, &mut out);
                    } else {
                        debug!(x = fix.x, y = fix.y, "pattern outside acceptance box");
                    }
                }
                if self.state == MissionState::VisualSeek
                    && self.seek_ticks % self.params.visual_lock_interval.max(1) == 0
                {
                    out.lock_request = Some(LockRequest {
                        state: self.state,
                        tick: snap.tick,
                        guidance: None,
                        height_cm: snap.ranging.map(|r| r.distance_cm),
                    });
                }
            }
            MissionState::Landing => {
                let next = snap.events.iter().find_map(|e| match e {
                    OperatorEvent::ConfirmLanded => Some(MissionState::Landed),
                    OperatorEvent::Rearm => Some(MissionState::Liftoff),
                    OperatorEvent::BeginReturn => Some(MissionState::Return),
                    _ => None,
                });
                if let Some(next) = next {
                    self.enter(next, &mut out);
                }
            }
            MissionState::Landed => {}
            MissionState::Return => {
                if snap.has_event(OperatorEvent::ConfirmArrival) {
                    self.target = None;
                    self.enter(MissionState::Idle, &mut out);
                }
            }
        }

        out.state = self.state;
        out
    }

    /// Jump straight to LANDED after losing the actuators.
    pub fn force_landed(&mut self) -> Option<Transition> {
        if self.state == MissionState::Landed {
            return None;
        }
        let mut out = StepOutcome::default();
        self.enter(MissionState::Landed, &mut out);
        out.transition
    }

    fn guidance(&self) -> Option<Guidance> {
        let fix = self.position()?;
        let aim = self.target?.aim_point();
        let here = fix.coordinate();
        Some(Guidance {
            distance_m: here.distance_to(&aim),
            bearing_deg: here.bearing_to(&aim),
        })
    }

    fn enter(&mut self, next: MissionState, out: &mut StepOutcome) {
        let from = self.state;
        self.state = next;
        if next.is_seeking() {
            self.seek_ticks = 0;
        }
        if next == MissionState::Idle {
            out.arm_link = true;
        }
        info!(%from, to = %next, "mission state change");
        out.transition = Some(Transition { from, to: next });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::mixer::Orientation;
    use crate::mission::GeoCoordinate;
    use approx::assert_relative_eq;

    fn pair() -> TargetWaypointPair {
        TargetWaypointPair::new(GeoCoordinate::new(55.0, 12.0), GeoCoordinate::new(55.001, 12.002))
    }

    fn snap_with(events: &[OperatorEvent]) -> TickSnapshot {
        let mut s = TickSnapshot::quiet(0);
        s.events = events.to_vec();
        s
    }

    fn pattern(x: f64, y: f64) -> PatternFix {
        PatternFix {
            x,
            y,
            timestamp_ns: 0,
        }
    }

    fn machine_in_gps_seek(params: SeekParams) -> FlightStateMachine {
        let mut sm = FlightStateMachine::new(params);
        sm.step(&snap_with(&[OperatorEvent::ConfirmCalibration]));
        let mut s = TickSnapshot::quiet(1);
        s.target = Some(pair());
        sm.step(&s);
        sm.step(&snap_with(&[OperatorEvent::ConfirmLiftoff]));
        assert_eq!(sm.state(), MissionState::GpsSeek);
        sm
    }

    #[test]
    fn test_calibrate_waits_for_confirmation() {
        let mut sm = FlightStateMachine::new(SeekParams::default());
        let mut s = TickSnapshot::quiet(0);
        s.target = Some(pair());
        s.pattern = Some(pattern(190.0, 150.0));
        s.events = vec![OperatorEvent::ConfirmLiftoff, OperatorEvent::ConfirmLanded];
        for _ in 0..1000 {
            let out = sm.step(&s);
            assert!(out.transition.is_none());
        }
        assert_eq!(sm.state(), MissionState::Calibrate);

        let mut s = snap_with(&[OperatorEvent::ConfirmCalibration]);
        s.orientation = Orientation::from_roll_pitch_deg(2.0, -1.0);
        let out = sm.step(&s);
        assert_eq!(sm.state(), MissionState::Idle);
        assert!(out.arm_link);
        let baseline = out.calibrated.unwrap();
        assert_relative_eq!(baseline.roll_deg, 2.0, epsilon = 1e-9);
        assert_relative_eq!(baseline.pitch_deg, -1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_target_pair_triggers_liftoff_once() {
        let mut sm = FlightStateMachine::new(SeekParams::default());
        sm.step(&snap_with(&[OperatorEvent::ConfirmCalibration]));

        let mut s = TickSnapshot::quiet(1);
        s.target = Some(pair());
        let out = sm.step(&s);
        assert_eq!(
            out.transition,
            Some(Transition {
                from: MissionState::Idle,
                to: MissionState::Liftoff
            })
        );
        assert_eq!(out.target_acquired, Some(pair()));

        let mut other = TickSnapshot::quiet(2);
        other.target = Some(TargetWaypointPair::new(
            GeoCoordinate::new(1.0, 1.0),
            GeoCoordinate::new(2.0, 2.0),
        ));
        let out = sm.step(&other);
        assert!(out.transition.is_none());
        assert_eq!(sm.target(), Some(pair()));
        assert!(out.armed());
    }

    #[test]
    fn test_idle_keeps_most_accurate_fix() {
        let mut sm = FlightStateMachine::new(SeekParams::default());
        sm.step(&snap_with(&[OperatorEvent::ConfirmCalibration]));
        for accuracy_m in [9.0, 4.0, 6.0] {
            let mut s = TickSnapshot::quiet(1);
            s.location = Some(LocationFix {
                latitude: 55.0,
                longitude: 12.0,
                altitude_m: 0.0,
                accuracy_m,
            });
            sm.step(&s);
        }
        assert_eq!(sm.best_fix().map(|f| f.accuracy_m), Some(4.0));
    }

    #[test]
    fn test_gps_seek_lock_requests_follow_interval() {
        let params = SeekParams {
            gps_lock_interval: 5,
            ..SeekParams::default()
        };
        let mut sm = machine_in_gps_seek(params);
        let requests: Vec<u64> = (1..=12)
            .filter_map(|t| sm.step(&TickSnapshot::quiet(t)).lock_request.map(|r| r.tick))
            .collect();
        assert_eq!(requests, vec![5, 10]);
    }

    #[test]
    fn test_any_pattern_fix_enters_visual_seek_and_resets_ticks() {
        let mut sm = machine_in_gps_seek(SeekParams::default());
        for t in 0..7 {
            sm.step(&TickSnapshot::quiet(t));
        }
        assert_eq!(sm.seek_ticks(), 7);
        let mut s = TickSnapshot::quiet(8);
        s.pattern = Some(pattern(5.0, 5.0));
        let out = sm.step(&s);
        assert_eq!(sm.state(), MissionState::VisualSeek);
        assert_eq!(sm.seek_ticks(), 0);
        assert_eq!(out.pattern_sighted, Some(pattern(5.0, 5.0)));
    }

    #[test]
    fn test_acceptance_box_is_exclusive() {
        let mut sm = machine_in_gps_seek(SeekParams::default());
        let mut s = TickSnapshot::quiet(0);
        s.pattern = Some(pattern(10.0, 10.0));
        sm.step(&s);
        assert_eq!(sm.state(), MissionState::VisualSeek);

        for (x, y) in [(140.0, 150.0), (240.0, 150.0), (190.0, 100.0), (190.0, 200.0)] {
            s.pattern = Some(pattern(x, y));
            sm.step(&s);
            assert_eq!(sm.state(), MissionState::VisualSeek, "({x}, {y})");
        }

        s.pattern = Some(pattern(141.0, 199.0));
        sm.step(&s);
        assert_eq!(sm.state(), MissionState::Landing);
    }

    #[test]
    fn test_landing_branches_and_return_restart() {
        let mut sm = machine_in_gps_seek(SeekParams::default());
        let mut s = TickSnapshot::quiet(0);
        s.pattern = Some(pattern(190.0, 150.0));
        sm.step(&s);
        sm.step(&s);
        assert_eq!(sm.state(), MissionState::Landing);

        sm.step(&snap_with(&[OperatorEvent::Rearm]));
        assert_eq!(sm.state(), MissionState::Liftoff);
        sm.step(&snap_with(&[OperatorEvent::ConfirmLiftoff]));
        sm.step(&s);
        sm.step(&s);
        assert_eq!(sm.state(), MissionState::Landing);

        sm.step(&snap_with(&[OperatorEvent::BeginReturn]));
        assert_eq!(sm.state(), MissionState::Return);
        assert!(!sm.step(&TickSnapshot::quiet(0)).armed());
        let out = sm.step(&snap_with(&[OperatorEvent::ConfirmArrival]));
        assert_eq!(sm.state(), MissionState::Idle);
        assert!(out.arm_link);
        assert!(sm.target().is_none());
    }

    #[test]
    fn test_landed_is_terminal() {
        let mut sm = machine_in_gps_seek(SeekParams::default());
        let mut s = TickSnapshot::quiet(0);
        s.pattern = Some(pattern(190.0, 150.0));
        sm.step(&s);
        sm.step(&s);
        sm.step(&snap_with(&[OperatorEvent::ConfirmLanded]));
        assert_eq!(sm.state(), MissionState::Landed);

        let all = [
            OperatorEvent::ConfirmCalibration,
            OperatorEvent::ConfirmLiftoff,
            OperatorEvent::Rearm,
            OperatorEvent::BeginReturn,
            OperatorEvent::ConfirmArrival,
        ];
        let out = sm.step(&snap_with(&all));
        assert!(out.transition.is_none());
        assert!(!out.armed());
    }

    fn fix_at(latitude: f64, longitude: f64, accuracy_m: f64) -> LocationFix {
        LocationFix {
            latitude,
            longitude,
            altitude_m: 0.0,
            accuracy_m,
        }
    }

    #[test]
    fn test_guidance_follows_current_position() {
        let params = SeekParams {
            gps_lock_interval: 1,
            ..SeekParams::default()
        };
        let mut sm = FlightStateMachine::new(params);
        sm.step(&snap_with(&[OperatorEvent::ConfirmCalibration]));
        let mut s = TickSnapshot::quiet(1);
        s.location = Some(fix_at(55.0, 12.0, 2.0));
        sm.step(&s);
        s.target = Some(pair());
        sm.step(&s);
        sm.step(&snap_with(&[OperatorEvent::ConfirmLiftoff]));

        // A less accurate fix right over the aim point still wins: it is newer.
        let aim = pair().aim_point();
        let mut s = TickSnapshot::quiet(4);
        s.location = Some(fix_at(aim.latitude, aim.longitude, 4.0));
        let req = sm.step(&s).lock_request.unwrap();
        assert_relative_eq!(req.guidance.unwrap().distance_m, 0.0, epsilon = 1e-6);

        // The start fix is only collected in IDLE.
        assert_eq!(sm.best_fix().map(|f| f.accuracy_m), Some(2.0));
        assert_eq!(sm.position().map(|f| f.accuracy_m), Some(4.0));
    }

    #[test]
    fn test_lock_request_reports_height() {
        let params = SeekParams {
            gps_lock_interval: 1,
            ..SeekParams::default()
        };
        let mut sm = machine_in_gps_seek(params);
        let mut s = TickSnapshot::quiet(3);
        s.ranging = Some(crate::hardware::RangingReading { distance_cm: 142.0 });
        let req = sm.step(&s).lock_request.unwrap();
        assert_eq!(req.height_cm, Some(142.0));
        assert_eq!(sm.step(&TickSnapshot::quiet(4)).lock_request.unwrap().height_cm, None);
    }

    #[test]
    fn test_gps_lock_request_carries_guidance() {
        let params = SeekParams {
            gps_lock_interval: 1,
            ..SeekParams::default()
        };
        let mut sm = FlightStateMachine::new(params);
        sm.step(&snap_with(&[OperatorEvent::ConfirmCalibration]));
        let mut s = TickSnapshot::quiet(1);
        s.location = Some(LocationFix {
            latitude: 55.0,
            longitude: 12.0,
            altitude_m: 0.0,
            accuracy_m: 3.0,
        });
        sm.step(&s);
        s.target = Some(pair());
        sm.step(&s);
        sm.step(&snap_with(&[OperatorEvent::ConfirmLiftoff]));

        let req = sm.step(&TickSnapshot::quiet(4)).lock_request.unwrap();
        let g = req.guidance.unwrap();
        let aim = pair().aim_point();
        assert_relative_eq!(
            g.distance_m,
            GeoCoordinate::new(55.0, 12.0).distance_to(&aim),
            epsilon = 1e-9
        );
        assert!(g.bearing_deg > 0.0 && g.bearing_deg < 90.0);
    }
}
