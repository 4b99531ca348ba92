//! Frame pacing
//!
//! Keeps the 50 Hz simulation in step with wall-clock time independently of
//! how often the presentation layer calls back. The next frame is due at an
//! accumulated deadline that advances by one period per request, so a tick
//! that arrives a little late is paid back over the following frames. When a
//! frame comes back after its successor was already due, the next one is
//! issued straight away and the deadline is re-armed from the current time.

use std::time::{Duration, Instant};

use log::{debug, info, warn};

/// One frame at 50 Hz.
pub const FRAME_PERIOD: Duration = Duration::from_millis(20);

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Whether frames are being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Stopped,
    Running,
}

/// The side effects the scheduler drives on each tick and completion.
pub trait FramePipeline {
    /// A completed frame is waiting to be shown.
    fn frame_ready(&self) -> bool;
    fn present_frame(&mut self);
    /// Send a frame request to the worker. Returns false if nothing was sent.
    fn request_frame(&mut self) -> bool;
}

/// Frame counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub frames_requested: u64,
    pub frames_completed: u64,
    /// Requests issued directly from a late completion.
    pub fast_path_frames: u64,
    pub frames_presented: u64,
}

#[derive(Debug)]
pub struct FrameScheduler {
    state: RunState,
    exited: bool,
    period: Duration,
    next_due: Option<Instant>,
    frame_in_flight: bool,
    stats: SchedulerStats,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self::with_period(FRAME_PERIOD)
    }

    pub fn with_period(period: Duration) -> Self {
        Self {
            state: RunState::Stopped,
            exited: false,
            period,
            next_due: None,
            frame_in_flight: false,
            stats: SchedulerStats::default(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == RunState::Running
    }

    pub fn has_exited(&self) -> bool {
        self.exited
    }

    pub fn frame_in_flight(&self) -> bool {
        self.frame_in_flight
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.next_due
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Begin requesting frames. Returns true on an actual state change.
    pub fn start(&mut self, now: Instant) -> bool {
        if self.exited {
            warn!("start ignored: scheduler has exited");
            return false;
        }
        if self.state == RunState::Running {
            return false;
        }
        info!("scheduler running");
        self.state = RunState::Running;
        self.next_due = Some(now);
        true
    }

    /// Stop requesting frames. A frame already in flight still completes.
    pub fn pause(&mut self) -> bool {
        if self.state == RunState::Stopped {
            return false;
        }
        info!("scheduler paused");
        self.state = RunState::Stopped;
        true
    }

    /// Stop for good.
    pub fn exit(&mut self) {
        if !self.exited {
            info!("scheduler exited");
        }
        self.state = RunState::Stopped;
        self.exited = true;
    }

    /// One presentation callback.
    pub fn tick<P: FramePipeline + ?Sized>(&mut self, now: Instant, pipeline: &mut P) {
        if pipeline.frame_ready() {
            pipeline.present_frame();
            self.stats.frames_presented += 1;
        }

        if self.state != RunState::Running || self.frame_in_flight {
            return;
        }
        let Some(due) = self.next_due else {
            return;
        };
        if now >= due && self.issue(pipeline) {
            self.next_due = Some(due + self.period);
        }
    }

    /// The worker handed a frame back. Returns false if no frame was in
    /// flight, in which case nothing changes.
    pub fn frame_completed<P: FramePipeline + ?Sized>(
        &mut self,
        now: Instant,
        pipeline: &mut P,
    ) -> bool {
        if !self.frame_in_flight {
            warn!("frame completion received with no frame in flight");
            return false;
        }
        self.frame_in_flight = false;
        self.stats.frames_completed += 1;

        if self.state == RunState::Running
            && self.next_due.is_some_and(|due| now > due)
            && self.issue(pipeline)
        {
            self.stats.fast_path_frames += 1;
            self.next_due = Some(now + self.period);
        }
        true
    }

    fn issue<P: FramePipeline + ?Sized>(&mut self, pipeline: &mut P) -> bool {
        if !pipeline.request_frame() {
            debug!("frame request not sent");
            return false;
        }
        self.frame_in_flight = true;
        self.stats.frames_requested += 1;
        true
    }
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct Recorder {
        ready: bool,
        presented: usize,
        requested: usize,
        refuse: bool,
    }

    impl FramePipeline for Recorder {
        fn frame_ready(&self) -> bool {
            self.ready
        }

        fn present_frame(&mut self) {
            self.ready = false;
            self.presented += 1;
        }

        fn request_frame(&mut self) -> bool {
            if self.refuse {
                return false;
            }
            self.requested += 1;
            true
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn start_and_pause_are_idempotent() {
        let t0 = Instant::now();
        let mut sched = FrameScheduler::new();
        assert!(sched.start(t0));
        assert!(!sched.start(t0 + ms(5)));
        assert_eq!(sched.next_due(), Some(t0));

        assert!(sched.pause());
        assert!(!sched.pause());
        assert_eq!(sched.state(), RunState::Stopped);
    }

    #[test]
    fn exit_is_terminal() {
        let t0 = Instant::now();
        let mut sched = FrameScheduler::new();
        sched.start(t0);
        sched.exit();
        assert!(!sched.start(t0));
        assert!(!sched.is_running());
        assert!(sched.has_exited());
    }

    #[test]
    fn never_more_than_one_frame_in_flight() {
        let t0 = Instant::now();
        let mut sched = FrameScheduler::new();
        let mut pipe = Recorder::default();
        sched.start(t0);
        for n in 0..10 {
            sched.tick(t0 + ms(n * 40), &mut pipe);
            sched.start(t0 + ms(n * 40));
        }
        assert_eq!(pipe.requested, 1);
        assert!(sched.frame_in_flight());
    }

    #[test]
    fn on_time_ticks_issue_one_frame_each_without_drift() {
        let t0 = Instant::now();
        let mut sched = FrameScheduler::new();
        let mut pipe = Recorder::default();
        sched.start(t0);

        for n in 0..10u64 {
            sched.tick(t0 + FRAME_PERIOD * n as u32, &mut pipe);
            assert_eq!(pipe.requested as u64, n + 1);
            assert!(sched.frame_completed(t0 + FRAME_PERIOD * n as u32 + ms(5), &mut pipe));
        }
        assert_eq!(sched.next_due(), Some(t0 + FRAME_PERIOD * 10));
        assert_eq!(sched.stats().fast_path_frames, 0);
    }

    #[test]
    fn small_overruns_are_paid_back() {
        let t0 = Instant::now();
        let mut sched = FrameScheduler::new();
        let mut pipe = Recorder::default();
        sched.start(t0);

        sched.tick(t0 + ms(7), &mut pipe);
        assert_eq!(sched.next_due(), Some(t0 + ms(20)));
        sched.frame_completed(t0 + ms(10), &mut pipe);

        // a tick 13ms after the previous still catches the 20ms deadline
        sched.tick(t0 + ms(20), &mut pipe);
        assert_eq!(pipe.requested, 2);
        assert_eq!(sched.next_due(), Some(t0 + ms(40)));
    }

    #[test]
    fn late_completion_takes_the_fast_path() {
        let t0 = Instant::now();
        let mut sched = FrameScheduler::new();
        let mut pipe = Recorder::default();
        sched.start(t0);
        sched.tick(t0, &mut pipe);

        // the worker took 35ms: frame 2 was due at 20ms
        let late = t0 + ms(35);
        assert!(sched.frame_completed(late, &mut pipe));
        assert_eq!(pipe.requested, 2);
        assert_eq!(sched.next_due(), Some(late + FRAME_PERIOD));
        assert_eq!(sched.stats().fast_path_frames, 1);
    }

    #[test]
    fn long_stall_does_not_cause_a_burst_of_requests() {
        let t0 = Instant::now();
        let mut sched = FrameScheduler::new();
        let mut pipe = Recorder::default();
        sched.start(t0);
        sched.tick(t0, &mut pipe);

        // three deadlines pass while the worker is stuck
        for n in 1..=3 {
            sched.tick(t0 + ms(n * 20), &mut pipe);
        }
        assert_eq!(pipe.requested, 1);

        assert!(sched.frame_completed(t0 + ms(70), &mut pipe));
        assert_eq!(pipe.requested, 2);
        assert_eq!(sched.next_due(), Some(t0 + ms(90)));

        sched.tick(t0 + ms(75), &mut pipe);
        assert!(sched.frame_completed(t0 + ms(80), &mut pipe));
        sched.tick(t0 + ms(85), &mut pipe);
        assert_eq!(pipe.requested, 2);
        assert!(!sched.frame_in_flight());

        sched.tick(t0 + ms(90), &mut pipe);
        assert_eq!(pipe.requested, 3);
        assert_eq!(sched.next_due(), Some(t0 + ms(110)));

        let stats = sched.stats();
        assert_eq!(stats.frames_requested, 3);
        assert_eq!(stats.frames_completed, 2);
        assert_eq!(stats.fast_path_frames, 1);
    }

    #[test]
    fn exactly_due_completion_waits_for_a_tick() {
        let t0 = Instant::now();
        let mut sched = FrameScheduler::new();
        let mut pipe = Recorder::default();
        sched.start(t0);
        sched.tick(t0, &mut pipe);
        sched.frame_completed(t0 + ms(20), &mut pipe);
        assert_eq!(pipe.requested, 1);
        assert!(!sched.frame_in_flight());
    }

    #[test]
    fn paused_scheduler_accepts_in_flight_frame_but_requests_nothing() {
        let t0 = Instant::now();
        let mut sched = FrameScheduler::new();
        let mut pipe = Recorder::default();
        sched.start(t0);
        sched.tick(t0, &mut pipe);
        sched.pause();

        assert!(sched.frame_completed(t0 + ms(50), &mut pipe));
        pipe.ready = true;
        sched.tick(t0 + ms(60), &mut pipe);

        assert_eq!(pipe.requested, 1);
        assert_eq!(pipe.presented, 1);
        assert_eq!(
            sched.stats(),
            SchedulerStats {
                frames_requested: 1,
                frames_completed: 1,
                fast_path_frames: 0,
                frames_presented: 1,
            }
        );
    }

    #[test]
    fn stray_completion_is_ignored() {
        let mut sched = FrameScheduler::new();
        let mut pipe = Recorder::default();
        assert!(!sched.frame_completed(Instant::now(), &mut pipe));
        assert_eq!(sched.stats().frames_completed, 0);
    }

    #[test]
    fn refused_request_keeps_the_deadline() {
        let t0 = Instant::now();
        let mut sched = FrameScheduler::new();
        let mut pipe = Recorder {
            refuse: true,
            ..Recorder::default()
        };
        sched.start(t0);
        sched.tick(t0, &mut pipe);
        assert!(!sched.frame_in_flight());
        assert_eq!(sched.next_due(), Some(t0));
    }

    #[test]
    fn presentation_runs_while_stopped() {
        let mut sched = FrameScheduler::new();
        let mut pipe = Recorder {
            ready: true,
            ..Recorder::default()
        };
        sched.tick(Instant::now(), &mut pipe);
        assert_eq!(pipe.presented, 1);
        assert_eq!(pipe.requested, 0);
    }
}
