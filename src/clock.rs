use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Monotonic recording clock for one session.
///
/// Media time is measured in milliseconds since the session anchor,
/// excluding paused intervals. All operations take explicit wall-clock
/// millisecond inputs so tests can drive the clock deterministically;
/// callers use [`wall_clock_ms`] in production.
#[derive(Debug, Clone)]
pub struct RecordingClock {
    session_start_ms: u64,
    cumulative_pause_ms: u64,
    pause_started_ms: Option<u64>,
}

impl RecordingClock {
    /// Start a session clock nominally anchored `preroll_ms` before `now_ms`.
    ///
    /// The nominal anchor is adjusted by [`anchor_to`](Self::anchor_to) once
    /// the buffered pre-roll content is known.
    pub fn start(now_ms: u64, preroll_ms: u64) -> Self {
        Self {
            session_start_ms: now_ms.saturating_sub(preroll_ms),
            cumulative_pause_ms: 0,
            pause_started_ms: None,
        }
    }

    /// Re-anchor the session start to the oldest buffered frame's capture
    /// time, so the first encoded frame maps to media time zero. With an
    /// empty buffer, callers pass the current time.
    pub fn anchor_to(&mut self, oldest_capture_ms: u64) {
        if oldest_capture_ms != self.session_start_ms {
            debug!(
                "Re-anchoring session start {} -> {}",
                self.session_start_ms, oldest_capture_ms
            );
            self.session_start_ms = oldest_capture_ms;
        }
    }

    /// Enter the paused state. No-op when already paused.
    pub fn pause(&mut self, now_ms: u64) {
        if self.pause_started_ms.is_none() {
            self.pause_started_ms = Some(now_ms);
        }
    }

    /// Leave the paused state, folding the pause interval into the
    /// cumulative pause total. No-op when not paused.
    pub fn resume(&mut self, now_ms: u64) {
        if let Some(pause_start) = self.pause_started_ms.take() {
            self.cumulative_pause_ms += now_ms.saturating_sub(pause_start);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.pause_started_ms.is_some()
    }

    pub fn session_start_ms(&self) -> u64 {
        self.session_start_ms
    }

    pub fn cumulative_pause_ms(&self) -> u64 {
        self.cumulative_pause_ms
    }

    /// Media time of an instant on the capture timeline: milliseconds since
    /// the session anchor, paused intervals excluded. While paused, the
    /// clock is frozen at the pause entry instant, so the result does not
    /// advance.
    pub fn media_time_ms(&self, instant_ms: u64) -> u64 {
        let effective = match self.pause_started_ms {
            Some(pause_start) => pause_start.min(instant_ms),
            None => instant_ms,
        };
        effective
            .saturating_sub(self.session_start_ms)
            .saturating_sub(self.cumulative_pause_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nominal_preroll_anchor() {
        let clock = RecordingClock::start(10_000, 3_000);
        assert_eq!(clock.session_start_ms(), 7_000);
        assert_eq!(clock.media_time_ms(10_000), 3_000);
    }

    #[test]
    fn test_anchor_to_oldest_frame() {
        let mut clock = RecordingClock::start(10_000, 3_000);
        // Only 2s of pre-roll accumulated; oldest buffered frame is at 8_000
        clock.anchor_to(8_000);
        assert_eq!(clock.media_time_ms(8_000), 0);
        assert_eq!(clock.media_time_ms(10_000), 2_000);
    }

    #[test]
    fn test_pause_freezes_media_time() {
        let mut clock = RecordingClock::start(1_000, 0);
        assert_eq!(clock.media_time_ms(3_000), 2_000);

        clock.pause(3_000);
        assert!(clock.is_paused());
        // Frozen at the pause entry instant
        assert_eq!(clock.media_time_ms(4_000), 2_000);
        assert_eq!(clock.media_time_ms(9_999), 2_000);
    }

    #[test]
    fn test_resume_excludes_pause_interval() {
        let mut clock = RecordingClock::start(0, 0);
        clock.pause(2_000);
        clock.resume(5_000);
        assert!(!clock.is_paused());
        assert_eq!(clock.cumulative_pause_ms(), 3_000);

        // An instant right after resume continues where the pause began
        assert_eq!(clock.media_time_ms(5_000), 2_000);
        assert_eq!(clock.media_time_ms(5_033), 2_033);
    }

    #[test]
    fn test_repeated_pause_resume_accumulates() {
        let mut clock = RecordingClock::start(0, 0);
        clock.pause(1_000);
        clock.resume(2_000);
        clock.pause(3_000);
        clock.resume(4_500);
        assert_eq!(clock.cumulative_pause_ms(), 2_500);
        assert_eq!(clock.media_time_ms(5_000), 2_500);
    }

    #[test]
    fn test_double_pause_is_noop() {
        let mut clock = RecordingClock::start(0, 0);
        clock.pause(1_000);
        clock.pause(2_000);
        clock.resume(3_000);
        assert_eq!(clock.cumulative_pause_ms(), 2_000);
    }

    #[test]
    fn test_resume_without_pause_is_noop() {
        let mut clock = RecordingClock::start(0, 0);
        clock.resume(5_000);
        assert_eq!(clock.cumulative_pause_ms(), 0);
        assert_eq!(clock.media_time_ms(5_000), 5_000);
    }

    #[test]
    fn test_media_time_monotonic_across_pause_cycle() {
        let mut clock = RecordingClock::start(0, 0);
        let before = clock.media_time_ms(1_967);
        clock.pause(1_967);
        let during = clock.media_time_ms(3_000);
        clock.resume(3_967);
        let after = clock.media_time_ms(4_000);

        assert!(during >= before);
        assert!(after >= during);
        assert_eq!(after, 2_000);
    }
}
