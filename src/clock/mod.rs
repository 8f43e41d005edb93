use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

const MILLIS_PER_HOUR: f64 = 60.0 * 60.0 * 1000.0;

/// Key of the single record stored in the state file.
const STATE_KEY: &str = "last_poll_ms";

/// Tracks the wall-clock time of the previous poll and derives the factor
/// that converts a per-hour cost rate into cost-for-this-interval.
///
/// The timestamp is held in memory and, when a state directory is
/// configured, mirrored to a small text file so cost accrual survives
/// restarts. Only one running instance may use a given state file; nothing
/// here enforces that.
pub struct PollClock {
    /// Epoch milliseconds of the previous poll; 0 = unknown.
    last_poll_ms: i64,
    state_path: Option<PathBuf>,
}

impl PollClock {
    /// Creates a clock persisting under `state_dir`, or a purely in-memory
    /// clock when no directory is configured.
    pub fn new(state_dir: Option<&Path>, unique_id: &str) -> Self {
        let state_path = state_dir
            .map(|dir| dir.join(format!("costoor-{}.state", sanitize_file_name(unique_id))));

        Self {
            last_poll_ms: 0,
            state_path,
        }
    }

    /// Advances the clock to now, returning the hours elapsed since the
    /// previous poll.
    ///
    /// On the first call the persisted timestamp is loaded if one exists;
    /// without any prior timestamp the factor defaults to 1.0, i.e. the
    /// resources are assumed to have run for the full hour being reported.
    pub fn advance(&mut self) -> f64 {
        self.advance_at(now_ms())
    }

    fn advance_at(&mut self, now_ms: i64) -> f64 {
        if self.last_poll_ms == 0 {
            self.load_persisted();
        }

        let factor = if self.last_poll_ms != 0 {
            let elapsed_ms = now_ms - self.last_poll_ms;
            if elapsed_ms < 0 {
                warn!(
                    elapsed_ms,
                    last_poll_ms = self.last_poll_ms,
                    "clock went backwards since last poll, clamping adjustment factor to 0",
                );
                0.0
            } else {
                let factor = elapsed_ms as f64 / MILLIS_PER_HOUR;
                debug!(elapsed_ms, factor, "computed cost adjustment factor");
                factor
            }
        } else {
            1.0
        };

        self.last_poll_ms = now_ms;

        factor
    }

    /// Writes the in-memory timestamp to the state file.
    ///
    /// Best-effort: failures are logged and never abort the caller. A no-op
    /// when no state directory is configured.
    pub fn persist(&self) {
        let Some(path) = &self.state_path else {
            return;
        };

        let contents = format!("{}={}\n", STATE_KEY, self.last_poll_ms);
        match std::fs::write(path, contents) {
            Ok(()) => {
                info!(
                    last_poll_ms = self.last_poll_ms,
                    path = %path.display(),
                    "persisted time of last poll",
                );
            }
            Err(e) => {
                warn!(
                    error = %e,
                    path = %path.display(),
                    "could not persist time of last poll",
                );
            }
        }
    }

    /// Loads a previously persisted timestamp, tolerating absence and
    /// unreadable or malformed files.
    fn load_persisted(&mut self) {
        let Some(path) = &self.state_path else {
            return;
        };

        if !path.exists() {
            return;
        }

        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!(error = %e, path = %path.display(), "could not read clock state file");
                return;
            }
        };

        match parse_state(&contents) {
            Some(last_poll_ms) => {
                info!(last_poll_ms, "loaded time of last poll");
                self.last_poll_ms = last_poll_ms;
            }
            None => {
                warn!(path = %path.display(), "could not parse clock state file, ignoring it");
            }
        }
    }
}

/// Extracts the `last_poll_ms` record from the state file contents.
fn parse_state(contents: &str) -> Option<i64> {
    contents.lines().find_map(|line| {
        let value = line.strip_prefix(STATE_KEY)?.strip_prefix('=')?;
        value.trim().parse::<i64>().ok()
    })
}

/// Replaces characters that are invalid in file names on common filesystems.
fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '\\' | '/' | '?' | ':' | '*' | '"' | '<' | '>' | '|' => '-',
            other => other,
        })
        .collect()
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR_MS: i64 = 60 * 60 * 1000;

    #[test]
    fn test_first_poll_defaults_to_one_hour() {
        let mut clock = PollClock::new(None, "test");
        assert_eq!(clock.advance_at(1_700_000_000_000), 1.0);
    }

    #[test]
    fn test_two_hours_elapsed_doubles_the_factor() {
        let mut clock = PollClock::new(None, "test");
        let start = 1_700_000_000_000;
        clock.advance_at(start);
        assert_eq!(clock.advance_at(start + 2 * HOUR_MS), 2.0);
    }

    #[test]
    fn test_half_hour_elapsed_halves_the_factor() {
        let mut clock = PollClock::new(None, "test");
        let start = 1_700_000_000_000;
        clock.advance_at(start);
        assert_eq!(clock.advance_at(start + HOUR_MS / 2), 0.5);
    }

    #[test]
    fn test_backward_clock_jump_clamps_to_zero() {
        let mut clock = PollClock::new(None, "test");
        let start = 1_700_000_000_000;
        clock.advance_at(start);
        assert_eq!(clock.advance_at(start - HOUR_MS), 0.0);
    }

    #[test]
    fn test_in_memory_timestamp_applies_within_the_same_process() {
        let mut clock = PollClock::new(None, "test");
        assert_eq!(clock.advance_at(1_700_000_000_000), 1.0);
        assert_eq!(clock.advance_at(1_700_000_000_000 + HOUR_MS), 1.0);
    }

    #[test]
    fn test_persist_and_reload_across_instances() {
        let dir = tempfile::tempdir().expect("create temp dir");

        let start = 1_700_000_000_000;
        let mut first = PollClock::new(Some(dir.path()), "account-1");
        first.advance_at(start);
        first.persist();

        // A fresh instance picks the timestamp up from disk.
        let mut second = PollClock::new(Some(dir.path()), "account-1");
        assert_eq!(second.advance_at(start + HOUR_MS), 1.0);
    }

    #[test]
    fn test_distinct_ids_use_distinct_state_files() {
        let dir = tempfile::tempdir().expect("create temp dir");

        let start = 1_700_000_000_000;
        let mut first = PollClock::new(Some(dir.path()), "account-1");
        first.advance_at(start);
        first.persist();

        let mut other = PollClock::new(Some(dir.path()), "account-2");
        assert_eq!(other.advance_at(start + HOUR_MS), 1.0);
    }

    #[test]
    fn test_malformed_state_file_falls_back_to_default() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("costoor-acc.state");
        std::fs::write(&path, "last_poll_ms=not-a-number\n").expect("write state");

        let mut clock = PollClock::new(Some(dir.path()), "acc");
        assert_eq!(clock.advance_at(1_700_000_000_000), 1.0);
    }

    #[test]
    fn test_parse_state() {
        assert_eq!(parse_state("last_poll_ms=42\n"), Some(42));
        assert_eq!(parse_state("# comment\nlast_poll_ms=42"), Some(42));
        assert_eq!(parse_state("other=1\n"), None);
        assert_eq!(parse_state(""), None);
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("prod/eu:1"), "prod-eu-1");
        assert_eq!(sanitize_file_name("plain-id"), "plain-id");
    }
}
