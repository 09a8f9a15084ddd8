#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerPhase {
    Running,
    Paused,
    Completed,
}

impl TimerPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
        }
    }
}

/// Outcome of feeding one tick into the timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Counting { remaining_seconds: i64 },
    Completed,
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    Restarted,
    NeedsConfirmation,
    AlreadyCompleted,
}

/// Countdown for a single focus session.
///
/// The timer starts running on construction and performs no I/O. Callers
/// drive it with [`FocusTimer::tick`] once per second and react to the
/// returned [`TickOutcome`]; completion is reported by exactly one tick.
/// A non-positive duration is completed from the start and never ticks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusTimer {
    duration_seconds: i64,
    remaining_seconds: i64,
    phase: TimerPhase,
}

impl FocusTimer {
    pub fn new(duration_seconds: i64) -> Self {
        if duration_seconds <= 0 {
            return Self {
                duration_seconds: 0,
                remaining_seconds: 0,
                phase: TimerPhase::Completed,
            };
        }
        Self {
            duration_seconds,
            remaining_seconds: duration_seconds,
            phase: TimerPhase::Running,
        }
    }

    pub fn phase(&self) -> TimerPhase {
        self.phase
    }

    pub fn duration_seconds(&self) -> i64 {
        self.duration_seconds
    }

    pub fn remaining_seconds(&self) -> i64 {
        self.remaining_seconds
    }

    pub fn elapsed_seconds(&self) -> i64 {
        self.duration_seconds - self.remaining_seconds
    }

    pub fn is_running(&self) -> bool {
        self.phase == TimerPhase::Running
    }

    pub fn is_completed(&self) -> bool {
        self.phase == TimerPhase::Completed
    }

    pub fn tick(&mut self) -> TickOutcome {
        if self.phase != TimerPhase::Running {
            return TickOutcome::Ignored;
        }
        self.remaining_seconds = (self.remaining_seconds - 1).max(0);
        if self.remaining_seconds == 0 {
            self.phase = TimerPhase::Completed;
            return TickOutcome::Completed;
        }
        TickOutcome::Counting {
            remaining_seconds: self.remaining_seconds,
        }
    }

    /// Returns whether the phase changed.
    pub fn pause(&mut self) -> bool {
        if self.phase != TimerPhase::Running {
            return false;
        }
        self.phase = TimerPhase::Paused;
        true
    }

    /// Returns whether the phase changed.
    pub fn resume(&mut self) -> bool {
        if self.phase != TimerPhase::Paused {
            return false;
        }
        self.phase = TimerPhase::Running;
        true
    }

    /// Restores the full duration. Destructive, so the caller has to pass
    /// the user's confirmation through.
    pub fn reset(&mut self, confirmed: bool) -> ResetOutcome {
        if self.phase == TimerPhase::Completed {
            return ResetOutcome::AlreadyCompleted;
        }
        if !confirmed {
            return ResetOutcome::NeedsConfirmation;
        }
        self.remaining_seconds = self.duration_seconds;
        self.phase = TimerPhase::Running;
        ResetOutcome::Restarted
    }

    /// Whole-number percentage of the countdown already elapsed.
    pub fn progress(&self) -> u8 {
        if self.duration_seconds <= 0 {
            return 100;
        }
        let elapsed = self.elapsed_seconds().clamp(0, self.duration_seconds);
        // round half up on integers: (200*e + d) / (2*d)
        let percent = (200 * elapsed + self.duration_seconds) / (2 * self.duration_seconds);
        u8::try_from(percent.clamp(0, 100)).unwrap_or(100)
    }

    pub fn remaining_label(&self) -> String {
        format_clock(self.remaining_seconds)
    }
}

/// `MM:SS`, or `H:MM:SS` from one hour up.
pub fn format_clock(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes:02}:{secs:02}")
    }
}
