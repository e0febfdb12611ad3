use std::thread;
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::error::ProvisionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    #[serde(alias = "PENDING")]
    Submitted,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_wait: Duration::from_secs(3600),
        }
    }
}

/// Re-fetches a job on a fixed interval until it reaches a terminal state.
/// The wait is bounded by `max_wait`; an overdue job fails with `PollTimeout`
/// rather than blocking the caller forever. The terminal job is returned
/// as-is, including the FAILED case, so the call site can attach its own
/// context to the failure.
pub fn await_terminal<J, F, S>(
    policy: PollPolicy,
    mut fetch: F,
    state_of: S,
) -> Result<J, ProvisionError>
where
    F: FnMut() -> Result<J, ProvisionError>,
    S: Fn(&J) -> JobState,
{
    let started = Instant::now();
    loop {
        let job = fetch()?;
        let state = state_of(&job);
        if state.is_terminal() {
            return Ok(job);
        }
        tracing::debug!(?state, elapsed = ?started.elapsed(), "job not terminal yet");
        if started.elapsed() + policy.interval > policy.max_wait {
            return Err(ProvisionError::PollTimeout {
                waited: started.elapsed(),
            });
        }
        thread::sleep(policy.interval);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use assert_matches::assert_matches;

    use super::*;

    fn fast_policy() -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(1),
            max_wait: Duration::from_millis(50),
        }
    }

    #[test]
    fn returns_on_completed() {
        let polls = Cell::new(0);
        let job = await_terminal(
            fast_policy(),
            || {
                polls.set(polls.get() + 1);
                let state = match polls.get() {
                    1 => JobState::Submitted,
                    2 => JobState::Running,
                    _ => JobState::Completed,
                };
                Ok(state)
            },
            |state| *state,
        )
        .unwrap();
        assert_eq!(job, JobState::Completed);
        assert_eq!(polls.get(), 3);
    }

    #[test]
    fn returns_failed_job_for_caller_context() {
        let job = await_terminal(fast_policy(), || Ok(JobState::Failed), |state| *state).unwrap();
        assert_eq!(job, JobState::Failed);
    }

    #[test]
    fn times_out_on_nonterminal_job() {
        let err =
            await_terminal(fast_policy(), || Ok(JobState::Running), |state| *state).unwrap_err();
        assert_matches!(err, ProvisionError::PollTimeout { .. });
    }

    #[test]
    fn propagates_fetch_failure() {
        let err = await_terminal::<JobState, _, _>(
            fast_policy(),
            || Err(ProvisionError::SbgHttp("connection reset".to_string())),
            |state| *state,
        )
        .unwrap_err();
        assert_matches!(err, ProvisionError::SbgHttp(_));
    }

    #[test]
    fn terminal_states() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Submitted.is_terminal());
        assert!(!JobState::Running.is_terminal());
    }

    #[test]
    fn parses_platform_state_names() {
        let state: JobState = serde_json::from_str("\"PENDING\"").unwrap();
        assert_eq!(state, JobState::Submitted);
        let state: JobState = serde_json::from_str("\"COMPLETED\"").unwrap();
        assert_eq!(state, JobState::Completed);
    }
}
