//! Stream start-up off the caller's thread, bounded by a deadline.
//!
//! Opening devices can hang on some drivers; a start that does not report
//! back within the deadline is a failure. The job and its caller settle who
//! wins through a [`StartTicket`]: a job that commits after the caller gave up
//! rolls itself back before anyone can observe it.

use std::{
    sync::{
        Arc, Mutex, PoisonError,
        mpsc::{self, RecvTimeoutError},
    },
    thread,
    time::Duration,
};

use crate::{log::log_sink::LogSink, sink_info, sink_warn};

use super::{
    call_media_manager::CallMediaManager,
    conference_media_manager::ConferenceMediaManager,
    media_context::MediaContext,
    media_error::{MediaError, Result},
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum TicketState {
    #[default]
    Waiting,
    Committed,
    Abandoned,
}

/// One-shot agreement between a start job and the caller waiting on it.
///
/// Exactly one of [`claim`](Self::claim) and [`abandon`](Self::abandon)
/// succeeds.
#[derive(Debug, Default)]
pub struct StartTicket {
    state: Mutex<TicketState>,
}

impl StartTicket {
    /// Job side, called while the job's result is still private. `false`
    /// means the caller already gave up and the job must undo its work.
    pub fn claim(&self) -> bool {
        self.settle(TicketState::Committed)
    }

    /// Caller side. `false` means the job has already committed and its
    /// result is on the way.
    pub fn abandon(&self) -> bool {
        self.settle(TicketState::Abandoned)
    }

    fn settle(&self, to: TicketState) -> bool {
        let mut st = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *st {
            TicketState::Waiting => {
                *st = to;
                true
            }
            current => current == to,
        }
    }
}

/// Runs `job` on its own thread and waits up to `deadline` for it.
///
/// # Errors
/// The job's own error, [`MediaError::StartTimeout`] when the deadline
/// passes, or [`MediaError::StartAborted`] when the job panicked.
pub fn run_with_deadline<T, F>(label: &str, deadline: Duration, job: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    run_with_ticket(label, deadline, move |_| job())
}

/// Like [`run_with_deadline`], for jobs that commit through a [`StartTicket`].
///
/// A job that committed just as the deadline passed still counts: its
/// result is awaited instead of reporting a timeout.
///
/// # Errors
/// See [`run_with_deadline`].
pub fn run_with_ticket<T, F>(label: &str, deadline: Duration, job: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&StartTicket) -> Result<T> + Send + 'static,
{
    let ticket = Arc::new(StartTicket::default());
    let job_ticket = Arc::clone(&ticket);
    let (tx, rx) = mpsc::channel::<Result<T>>();
    thread::Builder::new()
        .name(format!("callmedia-start-{label}"))
        .spawn(move || {
            let _ = tx.send(job(&job_ticket));
        })?;

    match rx.recv_timeout(deadline) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) if ticket.abandon() => Err(MediaError::StartTimeout {
            label: label.to_string(),
            after: deadline,
        }),
        Err(RecvTimeoutError::Timeout) => rx
            .recv()
            .unwrap_or_else(|_| Err(MediaError::StartAborted(label.to_string()))),
        Err(RecvTimeoutError::Disconnected) => Err(MediaError::StartAborted(label.to_string())),
    }
}

/// Starts call and conference streams in the background and reports each
/// outcome to a callback.
pub struct StreamStarter {
    deadline: Duration,
    logger: Arc<dyn LogSink>,
}

impl StreamStarter {
    #[must_use]
    pub fn new(deadline: Duration, logger: Arc<dyn LogSink>) -> Self {
        Self { deadline, logger }
    }

    /// Uses the context's configured start timeout.
    #[must_use]
    pub fn from_context(ctx: &MediaContext) -> Self {
        Self::new(ctx.settings().start_timeout, ctx.logger())
    }

    #[must_use]
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// # Errors
    /// Only when the supervising thread cannot be spawned.
    pub fn start_audio_async<C>(
        &self,
        manager: Arc<CallMediaManager>,
        remote_descriptor: String,
        on_done: C,
    ) -> Result<()>
    where
        C: FnOnce(Result<()>) + Send + 'static,
    {
        self.supervise(
            "audio",
            move |ticket| manager.start_audio(&remote_descriptor, Some(ticket)),
            on_done,
        )
    }

    /// # Errors
    /// Only when the supervising thread cannot be spawned.
    pub fn start_video_async<C>(
        &self,
        manager: Arc<CallMediaManager>,
        remote_descriptor: String,
        on_done: C,
    ) -> Result<()>
    where
        C: FnOnce(Result<()>) + Send + 'static,
    {
        self.supervise(
            "video",
            move |ticket| manager.start_video(&remote_descriptor, Some(ticket)),
            on_done,
        )
    }

    /// A timeout only affects this participant; one that finishes late is
    /// torn down before it joins.
    ///
    /// # Errors
    /// Only when the supervising thread cannot be spawned.
    pub fn add_participant_async<C>(
        &self,
        manager: Arc<ConferenceMediaManager>,
        username: String,
        remote_descriptor: String,
        include_video: bool,
        on_done: C,
    ) -> Result<()>
    where
        C: FnOnce(Result<()>) + Send + 'static,
    {
        self.supervise(
            "participant",
            move |ticket| manager.join(&username, &remote_descriptor, include_video, Some(ticket)),
            on_done,
        )
    }

    fn supervise<F, C>(&self, label: &'static str, job: F, on_done: C) -> Result<()>
    where
        F: FnOnce(&StartTicket) -> Result<()> + Send + 'static,
        C: FnOnce(Result<()>) + Send + 'static,
    {
        let deadline = self.deadline;
        let logger = Arc::clone(&self.logger);
        thread::Builder::new()
            .name(format!("callmedia-supervise-{label}"))
            .spawn(move || {
                let result = run_with_ticket(label, deadline, job);
                match &result {
                    Ok(()) => sink_info!(logger, "[StreamStarter] {} started", label),
                    Err(e) => sink_warn!(logger, "[StreamStarter] {} failed: {}", label, e),
                }
                on_done(result);
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn fast_job_returns_its_value() {
        let v = run_with_deadline("fast", Duration::from_secs(1), || Ok(7)).unwrap();
        assert_eq!(v, 7);
    }

    #[test]
    fn job_error_is_passed_through() {
        let r: Result<()> =
            run_with_deadline("err", Duration::from_secs(1), || Err(MediaError::NotActive));
        assert!(matches!(r, Err(MediaError::NotActive)));
    }

    #[test]
    fn late_job_cannot_claim_its_ticket() {
        let kept = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&kept);
        let r = run_with_ticket("slow", Duration::from_millis(20), move |ticket| {
            thread::sleep(Duration::from_millis(150));
            flag.store(ticket.claim(), Ordering::SeqCst);
            Ok(())
        });
        assert!(matches!(r, Err(MediaError::StartTimeout { .. })));
        thread::sleep(Duration::from_millis(400));
        assert!(!kept.load(Ordering::SeqCst));
    }

    #[test]
    fn job_committed_at_the_deadline_still_reports_success() {
        let r = run_with_ticket("tight", Duration::from_millis(50), |ticket| {
            assert!(ticket.claim());
            thread::sleep(Duration::from_millis(200));
            Ok(5)
        });
        assert_eq!(r.unwrap(), 5);
    }

    #[test]
    fn ticket_settles_once() {
        let t = StartTicket::default();
        assert!(t.claim());
        assert!(t.claim());
        assert!(!t.abandon());

        let t = StartTicket::default();
        assert!(t.abandon());
        assert!(!t.claim());
    }

    #[test]
    fn panicking_job_is_reported() {
        let r: Result<()> = run_with_deadline("boom", Duration::from_secs(1), || panic!("boom"));
        assert!(matches!(r, Err(MediaError::StartAborted(_))));
    }
}
