use std::time::Duration;

use crate::config::Stage;

/// Position within the stage sequence at some instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSnapshot {
    pub index: usize,
    pub count: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current_target: u64,
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    index: usize,
    start: Duration,
    end: Duration,
    from: u64,
    to: u64,
}

/// Piecewise-linear concurrency profile: each stage ramps evenly from the
/// previous stage's target to its own over its duration.
#[derive(Debug, Clone)]
pub struct RampSchedule {
    start: u64,
    stages: Vec<Stage>,
    cumulative_ends: Vec<Duration>,
}

impl RampSchedule {
    pub fn new(start: u64, stages: Vec<Stage>) -> Self {
        let mut cumulative_ends = Vec::with_capacity(stages.len());
        let mut acc = Duration::ZERO;
        for s in &stages {
            acc = acc.saturating_add(s.duration);
            cumulative_ends.push(acc);
        }

        Self {
            start,
            stages,
            cumulative_ends,
        }
    }

    pub fn total_duration(&self) -> Duration {
        self.cumulative_ends
            .last()
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_done(&self, elapsed: Duration) -> bool {
        elapsed >= self.total_duration()
    }

    fn segment(&self, elapsed: Duration) -> Option<Segment> {
        if self.stages.is_empty() {
            return None;
        }

        // First stage whose end lies strictly after `elapsed`; a stage end
        // belongs to the next stage. Past the end we stay on the last one.
        let index = self
            .cumulative_ends
            .partition_point(|end| *end <= elapsed)
            .min(self.stages.len() - 1);

        let start = index
            .checked_sub(1)
            .map_or(Duration::ZERO, |i| self.cumulative_ends[i]);
        let from = index
            .checked_sub(1)
            .map_or(self.start, |i| self.stages[i].target);

        Some(Segment {
            index,
            start,
            end: self.cumulative_ends[index],
            from,
            to: self.stages[index].target,
        })
    }

    /// Interpolated target at `elapsed`, rounded down. Holds the last stage's
    /// target once the sequence is exhausted.
    pub fn target_at(&self, elapsed: Duration) -> u64 {
        let Some(seg) = self.segment(elapsed) else {
            return self.start;
        };
        if elapsed >= seg.end {
            return seg.to;
        }

        let span = seg.end.saturating_sub(seg.start);
        if span.is_zero() {
            return seg.to;
        }

        let from = i128::from(seg.from);
        let delta = i128::from(seg.to) - from;
        let num = elapsed.saturating_sub(seg.start).as_nanos() as i128;
        let den = (span.as_nanos() as i128).max(1);

        let cur = from + delta.saturating_mul(num).div_euclid(den);
        cur.clamp(0, i128::from(u64::MAX)) as u64
    }

    pub fn stage_at(&self, elapsed: Duration) -> Option<StageSnapshot> {
        let clamped = elapsed.min(self.total_duration());
        let seg = self.segment(clamped)?;

        let stage_elapsed = clamped.saturating_sub(seg.start);
        let stage_remaining = seg.end.saturating_sub(clamped);

        Some(StageSnapshot {
            index: seg.index,
            count: self.stages.len(),
            stage_elapsed,
            stage_remaining,
            start_target: seg.from,
            end_target: seg.to,
            current_target: self.target_at(clamped),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn interpolates_linearly_within_each_stage() {
        let s = RampSchedule::new(0, vec![Stage::new(secs(10), 5), Stage::new(secs(20), 10)]);

        assert_eq!(s.target_at(Duration::ZERO), 0);
        assert_eq!(s.target_at(secs(2)), 1);
        assert_eq!(s.target_at(secs(5)), 2);
        assert_eq!(s.target_at(secs(10)), 5);
        assert_eq!(s.target_at(secs(20)), 7);
        assert_eq!(s.target_at(secs(30)), 10);
        assert_eq!(s.target_at(secs(99)), 10);
    }

    #[test]
    fn target_is_non_decreasing_over_a_rising_profile() {
        let s = RampSchedule::new(0, vec![Stage::new(secs(10), 5), Stage::new(secs(20), 10)]);
        let mut prev = 0;
        for t in (0..=30_000).step_by(50) {
            let cur = s.target_at(ms(t));
            assert!(cur >= prev, "target dropped at {t}ms: {prev} -> {cur}");
            prev = cur;
        }
        assert_eq!(prev, 10);
    }

    #[test]
    fn ramps_down_from_previous_target() {
        let s = RampSchedule::new(1, vec![Stage::new(secs(10), 11), Stage::new(secs(10), 1)]);
        assert_eq!(s.target_at(Duration::ZERO), 1);
        assert_eq!(s.target_at(secs(10)), 11);
        assert_eq!(s.target_at(secs(15)), 6);
        assert_eq!(s.target_at(secs(20)), 1);
    }

    #[test]
    fn zero_length_stage_jumps_to_target() {
        let s = RampSchedule::new(0, vec![Stage::new(Duration::ZERO, 4), Stage::new(secs(10), 4)]);
        assert_eq!(s.target_at(Duration::ZERO), 4);
        assert_eq!(s.target_at(secs(3)), 4);
    }

    #[test]
    fn empty_schedule_holds_start() {
        let s = RampSchedule::new(3, Vec::new());
        assert_eq!(s.target_at(secs(5)), 3);
        assert!(s.is_done(Duration::ZERO));
        assert!(s.stage_at(secs(1)).is_none());
    }

    #[test]
    fn stage_snapshot_tracks_position() {
        let s = RampSchedule::new(0, vec![Stage::new(secs(10), 5), Stage::new(secs(20), 10)]);

        let snap = s.stage_at(secs(15)).unwrap_or_else(|| panic!("snapshot"));
        assert_eq!(snap.index, 1);
        assert_eq!(snap.count, 2);
        assert_eq!(snap.stage_elapsed, secs(5));
        assert_eq!(snap.stage_remaining, secs(15));
        assert_eq!((snap.start_target, snap.end_target), (5, 10));
        assert_eq!(snap.current_target, 6);

        let end = s.stage_at(secs(60)).unwrap_or_else(|| panic!("snapshot"));
        assert_eq!(end.index, 1);
        assert_eq!(end.stage_remaining, Duration::ZERO);
        assert_eq!(end.current_target, 10);
    }
}
