//! Frame admission and completion accounting for a canvas.
//!
//! A frame moves through `Idle → Rendering → Presented → Idle`. The canvas asks
//! [`FrameScheduler::try_consume_budget`] before issuing any GPU work; a granted
//! [`FramePermit`] is later handed back through
//! [`FrameScheduler::record_completion`] (which notifies the host) or
//! [`FrameScheduler::abort`] when the frame fails. Budget that has been
//! consumed is never returned.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use canvasconfig::{BudgetConfig, BudgetMode};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("frame permit #{0} does not match the frame in flight")]
    StalePermit(u64),
}

/// Host notification invoked with the 1-based index of each completed frame.
pub type CompletionCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// How many frames a canvas may produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameBudget {
    /// No limit.
    Unbounded,
    /// At most `n` frames over the lifetime of the canvas.
    Lifetime(u64),
    /// At most `frames` frames in any rolling `period`.
    Window { frames: u32, period: Duration },
}

impl FrameBudget {
    /// Maps the host's `maximum_frames` convention: values `<= 0` are unbounded.
    pub fn from_max_frames(max_frames: i64) -> Self {
        if max_frames <= 0 {
            FrameBudget::Unbounded
        } else {
            FrameBudget::Lifetime(max_frames as u64)
        }
    }

    pub fn from_config(config: &BudgetConfig) -> Self {
        match config.mode {
            BudgetMode::Unbounded => FrameBudget::Unbounded,
            BudgetMode::Lifetime => FrameBudget::Lifetime(config.frames.unwrap_or(0)),
            BudgetMode::Window => match config.window {
                Some(period) if !period.is_zero() => FrameBudget::Window {
                    frames: config.frames.unwrap_or(0).min(u64::from(u32::MAX)) as u32,
                    period,
                },
                _ => {
                    tracing::warn!("window budget without a period; treating as unbounded");
                    FrameBudget::Unbounded
                }
            },
        }
    }

    pub fn is_bounded(&self) -> bool {
        !matches!(self, FrameBudget::Unbounded)
    }
}

impl Default for FrameBudget {
    fn default() -> Self {
        Self::Unbounded
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    Idle,
    Rendering,
    Presented,
}

/// Why a frame request was declined. None of these are faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Throttle {
    /// The lifetime budget is spent.
    Exhausted,
    /// The rolling window is full; a slot frees up after `retry_after`.
    WindowFull { retry_after: Duration },
    /// Another frame has not finished yet.
    InFlight,
}

impl fmt::Display for Throttle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Throttle::Exhausted => f.write_str("frame budget exhausted"),
            Throttle::WindowFull { retry_after } => write!(
                f,
                "frame window full; retry in {}ms",
                retry_after.as_millis()
            ),
            Throttle::InFlight => f.write_str("previous frame still in flight"),
        }
    }
}

/// Proof that budget was consumed for one frame.
#[must_use = "a granted permit must be completed or aborted"]
#[derive(Debug, PartialEq, Eq)]
pub struct FramePermit {
    sequence: u64,
}

impl FramePermit {
    /// Position of this frame among all admitted frames (1-based).
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

#[derive(Debug)]
pub enum Admission {
    Granted(FramePermit),
    Denied(Throttle),
}

pub struct FrameScheduler {
    budget: FrameBudget,
    consumed: u64,
    completed: u64,
    phase: FramePhase,
    in_flight: Option<u64>,
    window_starts: VecDeque<Instant>,
    callback: Option<CompletionCallback>,
}

impl FrameScheduler {
    pub fn new(budget: FrameBudget, callback: Option<CompletionCallback>) -> Self {
        Self {
            budget,
            consumed: 0,
            completed: 0,
            phase: FramePhase::Idle,
            in_flight: None,
            window_starts: VecDeque::new(),
            callback,
        }
    }

    pub fn budget(&self) -> FrameBudget {
        self.budget
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    /// Frames admitted so far, including frames that later failed.
    pub fn frames_consumed(&self) -> u64 {
        self.consumed
    }

    /// Frames that reached the host callback.
    pub fn frames_produced(&self) -> u64 {
        self.completed
    }

    /// Remaining lifetime frames; `None` when the budget is not a lifetime cap.
    pub fn remaining(&self) -> Option<u64> {
        match self.budget {
            FrameBudget::Lifetime(max) => Some(max.saturating_sub(self.consumed)),
            _ => None,
        }
    }

    pub fn try_consume_budget(&mut self) -> Admission {
        self.try_consume_budget_at(Instant::now())
    }

    /// Admits a frame at `now`. Denials leave every counter untouched.
    pub fn try_consume_budget_at(&mut self, now: Instant) -> Admission {
        if self.phase != FramePhase::Idle {
            return Admission::Denied(Throttle::InFlight);
        }

        match self.budget {
            FrameBudget::Unbounded => {}
            FrameBudget::Lifetime(max) => {
                if self.consumed >= max {
                    tracing::trace!(max, "frame budget exhausted");
                    return Admission::Denied(Throttle::Exhausted);
                }
            }
            FrameBudget::Window { frames, period } => {
                let live: Vec<&Instant> = self
                    .window_starts
                    .iter()
                    .filter(|start| now.saturating_duration_since(**start) < period)
                    .collect();
                if live.len() >= frames as usize {
                    let oldest = live.first().copied().copied().unwrap_or(now);
                    let retry_after = period.saturating_sub(now.saturating_duration_since(oldest));
                    tracing::trace!(
                        frames,
                        retry_after_ms = retry_after.as_millis() as u64,
                        "frame window full"
                    );
                    return Admission::Denied(Throttle::WindowFull { retry_after });
                }
                while let Some(front) = self.window_starts.front() {
                    if now.saturating_duration_since(*front) >= period {
                        self.window_starts.pop_front();
                    } else {
                        break;
                    }
                }
                self.window_starts.push_back(now);
            }
        }

        self.consumed += 1;
        self.phase = FramePhase::Rendering;
        self.in_flight = Some(self.consumed);
        Admission::Granted(FramePermit {
            sequence: self.consumed,
        })
    }

    /// Records that the frame's work reached the presentation queue.
    pub fn mark_presented(&mut self, permit: &FramePermit) -> Result<(), SchedulerError> {
        self.check_permit(permit)?;
        self.phase = FramePhase::Presented;
        Ok(())
    }

    /// Completes the frame, notifies the host and returns the new frame index.
    pub fn record_completion(&mut self, permit: FramePermit) -> Result<u64, SchedulerError> {
        self.check_permit(&permit)?;
        self.completed += 1;
        self.phase = FramePhase::Idle;
        self.in_flight = None;
        let frame_index = self.completed;
        if let Some(callback) = &self.callback {
            callback(frame_index);
        }
        Ok(frame_index)
    }

    /// Returns to `Idle` without completing the frame. Consumed budget stays consumed.
    pub fn abort(&mut self, permit: FramePermit) {
        if self.in_flight == Some(permit.sequence) {
            tracing::debug!(sequence = permit.sequence, "frame aborted");
            self.phase = FramePhase::Idle;
            self.in_flight = None;
        }
    }

    fn check_permit(&self, permit: &FramePermit) -> Result<(), SchedulerError> {
        if self.in_flight == Some(permit.sequence) {
            Ok(())
        } else {
            Err(SchedulerError::StalePermit(permit.sequence))
        }
    }
}

impl fmt::Debug for FrameScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameScheduler")
            .field("budget", &self.budget)
            .field("consumed", &self.consumed)
            .field("completed", &self.completed)
            .field("phase", &self.phase)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recording_callback() -> (CompletionCallback, Arc<Mutex<Vec<u64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: CompletionCallback = Arc::new(move |index| {
            sink.lock().unwrap().push(index);
        });
        (callback, seen)
    }

    fn run_frame(scheduler: &mut FrameScheduler, now: Instant) -> Option<u64> {
        match scheduler.try_consume_budget_at(now) {
            Admission::Granted(permit) => {
                scheduler.mark_presented(&permit).unwrap();
                Some(scheduler.record_completion(permit).unwrap())
            }
            Admission::Denied(_) => None,
        }
    }

    #[test]
    fn lifetime_budget_caps_completions() {
        let (callback, seen) = recording_callback();
        let mut scheduler = FrameScheduler::new(FrameBudget::Lifetime(3), Some(callback));
        let now = Instant::now();
        let results: Vec<_> = (0..5).map(|_| run_frame(&mut scheduler, now)).collect();
        assert_eq!(results, vec![Some(1), Some(2), Some(3), None, None]);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(scheduler.frames_produced(), 3);
        assert_eq!(scheduler.remaining(), Some(0));
    }

    #[test]
    fn exhausted_denial_does_not_mutate_state() {
        let mut scheduler = FrameScheduler::new(FrameBudget::Lifetime(1), None);
        let now = Instant::now();
        assert_eq!(run_frame(&mut scheduler, now), Some(1));
        let consumed = scheduler.frames_consumed();
        match scheduler.try_consume_budget_at(now) {
            Admission::Denied(Throttle::Exhausted) => {}
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(scheduler.frames_consumed(), consumed);
        assert_eq!(scheduler.phase(), FramePhase::Idle);
    }

    #[test]
    fn second_request_while_rendering_is_in_flight() {
        let mut scheduler = FrameScheduler::new(FrameBudget::Unbounded, None);
        let now = Instant::now();
        let Admission::Granted(permit) = scheduler.try_consume_budget_at(now) else {
            panic!("first frame should be admitted");
        };
        assert_eq!(scheduler.phase(), FramePhase::Rendering);
        assert!(matches!(
            scheduler.try_consume_budget_at(now),
            Admission::Denied(Throttle::InFlight)
        ));
        scheduler.mark_presented(&permit).unwrap();
        assert_eq!(scheduler.phase(), FramePhase::Presented);
        scheduler.record_completion(permit).unwrap();
        assert_eq!(scheduler.phase(), FramePhase::Idle);
    }

    #[test]
    fn aborted_frames_keep_consumed_budget() {
        let (callback, seen) = recording_callback();
        let mut scheduler = FrameScheduler::new(FrameBudget::Lifetime(2), Some(callback));
        let now = Instant::now();
        let Admission::Granted(permit) = scheduler.try_consume_budget_at(now) else {
            panic!("frame should be admitted");
        };
        scheduler.abort(permit);
        assert_eq!(scheduler.phase(), FramePhase::Idle);
        assert_eq!(scheduler.frames_consumed(), 1);
        assert_eq!(scheduler.frames_produced(), 0);
        assert_eq!(run_frame(&mut scheduler, now), Some(1));
        assert_eq!(run_frame(&mut scheduler, now), None);
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[test]
    fn window_budget_refills_after_period() {
        let period = Duration::from_millis(100);
        let mut scheduler =
            FrameScheduler::new(FrameBudget::Window { frames: 2, period }, None);
        let start = Instant::now();
        assert!(run_frame(&mut scheduler, start).is_some());
        assert!(run_frame(&mut scheduler, start + Duration::from_millis(10)).is_some());
        match scheduler.try_consume_budget_at(start + Duration::from_millis(50)) {
            Admission::Denied(Throttle::WindowFull { retry_after }) => {
                assert_eq!(retry_after, Duration::from_millis(50));
            }
            other => panic!("expected a full window, got {other:?}"),
        }
        assert!(run_frame(&mut scheduler, start + Duration::from_millis(100)).is_some());
        assert_eq!(scheduler.frames_produced(), 3);
    }

    #[test]
    fn stale_permit_is_rejected() {
        let mut scheduler = FrameScheduler::new(FrameBudget::Unbounded, None);
        let mut other = FrameScheduler::new(FrameBudget::Unbounded, None);
        let now = Instant::now();
        let Admission::Granted(_mine) = scheduler.try_consume_budget_at(now) else {
            panic!("admitted");
        };
        let Admission::Granted(foreign) = other.try_consume_budget_at(now) else {
            panic!("admitted");
        };
        scheduler.abort(FramePermit { sequence: 1 });
        assert!(matches!(
            scheduler.record_completion(foreign),
            Err(SchedulerError::StalePermit(1))
        ));
    }

    #[test]
    fn maps_host_maximum_frames() {
        assert_eq!(FrameBudget::from_max_frames(0), FrameBudget::Unbounded);
        assert_eq!(FrameBudget::from_max_frames(-1), FrameBudget::Unbounded);
        assert_eq!(FrameBudget::from_max_frames(3), FrameBudget::Lifetime(3));
    }

    #[test]
    fn builds_budget_from_config() {
        let config = BudgetConfig {
            mode: BudgetMode::Window,
            frames: Some(30),
            window: Some(Duration::from_secs(1)),
        };
        assert_eq!(
            FrameBudget::from_config(&config),
            FrameBudget::Window {
                frames: 30,
                period: Duration::from_secs(1)
            }
        );
        let lifetime = BudgetConfig {
            mode: BudgetMode::Lifetime,
            frames: Some(12),
            window: None,
        };
        assert_eq!(FrameBudget::from_config(&lifetime), FrameBudget::Lifetime(12));
        assert!(!FrameBudget::from_config(&BudgetConfig::default()).is_bounded());
    }
}
