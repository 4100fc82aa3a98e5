// Judging session orchestration.
//
// Owns the reactive judging state (judge, team slots, finished flag, visible
// error, loading), drives the judging API, and keeps the cached credential
// snapshot in step with what the server reports. Every cell is a
// `tokio::sync::watch` channel so front ends can read or subscribe.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::credentials::CredentialStore;
use crate::error::{ApiError, JudgmentError, StepOutcome};
use crate::gateway::JudgeApi;
use crate::loading::{InFlight, MinDurationGate, DEFAULT_MIN_DURATION};
use crate::model::{Judge, Judgment, JudgmentRequest, RotationSignal, Team, UpgradeRequest};

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Floor applied to the loading indicator of user-triggered operations.
    pub min_loading: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            min_loading: DEFAULT_MIN_DURATION,
        }
    }
}

/// The two team slots a judge compares. Kept in one cell so moving the
/// current team into the previous slot is a single write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeamSlots {
    pub current: Option<Team>,
    pub previous: Option<Team>,
}

impl TeamSlots {
    /// Move the current team into the previous slot and install `next`.
    pub fn shift_in(&mut self, next: Option<Team>) {
        self.previous = self.current.take();
        self.current = next;
    }
}

/// Where the session is in the submit/advance cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JudgingPhase {
    #[default]
    Idle,
    Submitting,
    Advancing,
    Finished,
}

/// Which team won, as chosen in the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeamChoice {
    /// Whatever team is in the current slot.
    Current,
    /// Whatever team is in the previous slot.
    Previous,
    /// An explicit team id.
    Team(String),
}

impl TeamChoice {
    /// `"current"` and `"previous"` select a slot; anything else is a team id.
    pub fn parse(value: &str) -> Self {
        match value {
            "current" => TeamChoice::Current,
            "previous" => TeamChoice::Previous,
            id => TeamChoice::Team(id.to_string()),
        }
    }
}

impl From<&str> for TeamChoice {
    fn from(value: &str) -> Self {
        TeamChoice::parse(value)
    }
}

impl fmt::Display for TeamChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeamChoice::Current => f.write_str("current"),
            TeamChoice::Previous => f.write_str("previous"),
            TeamChoice::Team(id) => f.write_str(id),
        }
    }
}

/// Result of [`JudgingSession::restore_session`], with each best-effort
/// step classified instead of only logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub judge: Option<Judge>,
    pub refresh: StepOutcome,
    pub current_team: StepOutcome,
    pub previous_team: StepOutcome,
}

impl RestoreReport {
    fn skipped(judge: Option<Judge>, refresh: StepOutcome, reason: &'static str) -> Self {
        Self {
            judge,
            refresh,
            current_team: StepOutcome::Skipped(reason),
            previous_team: StepOutcome::Skipped(reason),
        }
    }
}

/// True iff `error` is the "judging finished" signal.
pub fn detect_judging_finished(error: &ApiError) -> bool {
    error.is_judging_finished()
}

/// Turn a winner choice into concrete team ids using the held slots.
///
/// The loser is the opposite slot's team, or `loser_fallback` when that slot
/// is empty. An explicit team id is paired with `loser_fallback` directly.
pub fn resolve_judgment(
    slots: &TeamSlots,
    winner: &TeamChoice,
    loser_fallback: &str,
) -> Result<JudgmentRequest, JudgmentError> {
    let opposite_or_fallback = |team: &Option<Team>| {
        team.as_ref()
            .map(|t| t.id.as_str())
            .filter(|id| !id.is_empty())
            .unwrap_or(loser_fallback)
            .to_string()
    };

    let (winning_team_id, losing_team_id) = match winner {
        TeamChoice::Current => {
            let current = slots
                .current
                .as_ref()
                .ok_or(JudgmentError::EmptySlot(TeamChoice::Current))?;
            (current.id.clone(), opposite_or_fallback(&slots.previous))
        }
        TeamChoice::Previous => {
            let previous = slots
                .previous
                .as_ref()
                .ok_or(JudgmentError::EmptySlot(TeamChoice::Previous))?;
            (previous.id.clone(), opposite_or_fallback(&slots.current))
        }
        TeamChoice::Team(id) => (id.clone(), loser_fallback.to_string()),
    };

    Ok(JudgmentRequest {
        winning_team_id,
        losing_team_id,
    })
}

// ---------------------------------------------------------------------------
// JudgingSession
// ---------------------------------------------------------------------------

/// One judge's client-side session. Create it inside a Tokio runtime; the
/// loading gate runs on a background task until [`dispose`](Self::dispose)
/// or drop.
pub struct JudgingSession {
    api: Arc<dyn JudgeApi>,
    credentials: CredentialStore,
    options: SessionOptions,

    judge: watch::Sender<Option<Judge>>,
    teams: watch::Sender<TeamSlots>,
    selected_winner: watch::Sender<Option<String>>,
    judging_finished: watch::Sender<bool>,
    error: watch::Sender<Option<String>>,
    phase: watch::Sender<JudgingPhase>,

    in_flight: InFlight,
    loading: MinDurationGate,
}

impl JudgingSession {
    pub fn new(
        api: Arc<dyn JudgeApi>,
        credentials: CredentialStore,
        options: SessionOptions,
    ) -> Self {
        let in_flight = InFlight::new();
        let loading = MinDurationGate::spawn(in_flight.subscribe_pending(), options.min_loading);

        JudgingSession {
            api,
            credentials,
            options,
            judge: watch::channel(None).0,
            teams: watch::channel(TeamSlots::default()).0,
            selected_winner: watch::channel(None).0,
            judging_finished: watch::channel(false).0,
            error: watch::channel(None).0,
            phase: watch::channel(JudgingPhase::Idle).0,
            in_flight,
            loading,
        }
    }

    /// Stop background work. Cells stay readable.
    pub fn dispose(&self) {
        self.loading.close();
        debug!("Judging session disposed");
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    // -----------------------------------------------------------------------
    // Session lifecycle
    // -----------------------------------------------------------------------

    /// Restore a session after a restart.
    ///
    /// With no stored token this returns immediately without touching the
    /// network. Otherwise the cached judge is shown at once, then refreshed
    /// from the server, and the team slots are repopulated. Every failure
    /// here is recoverable: a stale identity is better than no identity.
    pub async fn restore_session(&self) -> RestoreReport {
        if self.credentials.load().is_none() {
            info!("No stored token; skipping judge session restoration");
            return RestoreReport::skipped(None, StepOutcome::Skipped("no token"), "no token");
        }

        info!("Restoring judge session from stored token");
        let cached = self.credentials.load_judge();
        if let Some(judge) = &cached {
            debug!(
                judge_id = %judge.id,
                current_team = judge.current_team,
                "Judge initialized from cached snapshot"
            );
            self.set_judge(Some(judge.clone()));
        }

        let refresh = self.refresh_judge().await;
        if !refresh.is_applied() {
            warn!("Judge refresh failed during restore; keeping cached snapshot");
            return RestoreReport::skipped(cached, refresh, "refresh failed");
        }

        let judge = self.judge();
        if judge.as_ref().is_some_and(Judge::is_finished) {
            info!("Judging finished detected during restore");
            self.clear_error();
            return RestoreReport::skipped(judge, refresh, "judging finished");
        }

        let mut report = RestoreReport::skipped(judge.clone(), refresh, "judging not started");
        if judge.as_ref().is_some_and(Judge::has_started) {
            report.current_team = self.restore_current_team().await;
            report.previous_team = self.restore_previous_team().await;
            // The current-team restore refreshes the cursor again.
            report.judge = self.judge();
        }

        self.clear_error();
        info!(
            judge_id = report.judge.as_ref().map(|j| j.id.as_str()),
            current_team = report.judge.as_ref().map(|j| j.current_team),
            "Judge session restored"
        );
        report
    }

    /// Exchange a short-lived QR token for a session token and judge record.
    ///
    /// The exchange failing is fatal to the caller. Repopulating the current
    /// team afterwards is best-effort.
    pub async fn upgrade(&self, short_token: &str) -> Result<Judge, ApiError> {
        self.with_in_flight(async {
            let request = UpgradeRequest {
                token: short_token.to_string(),
            };
            let response = match self.api.upgrade(&request).await {
                Ok(response) => response,
                Err(e) => {
                    warn!("Token upgrade failed: {}", e);
                    self.set_error(&e);
                    return Err(e);
                }
            };

            self.credentials.save(&response.token);
            let judge = response.judge;
            info!(
                judge_id = %judge.id,
                current_team = judge.current_team,
                "Judge initialized from upgrade"
            );
            // A new login replaces whatever the previous judge left behind.
            self.teams.send_replace(TeamSlots::default());
            self.selected_winner.send_replace(None);
            self.judging_finished.send_replace(judge.is_finished());
            self.phase.send_replace(if judge.is_finished() {
                JudgingPhase::Finished
            } else {
                JudgingPhase::Idle
            });
            self.set_judge(Some(judge.clone()));
            self.credentials.save_judge(&judge);
            self.clear_error();

            if judge.has_started() && !judge.is_finished() {
                if let StepOutcome::Recoverable(e) = self.restore_current_team().await {
                    error!("Failed to recover current team after upgrade: {}", e);
                }
            }

            Ok(judge)
        })
        .await
    }

    /// First rotation call after upgrade.
    pub async fn start_judging(&self) -> Result<RotationSignal, ApiError> {
        self.get_next_team().await
    }

    /// Advance the rotation and refresh the team slots and judge cursor.
    ///
    /// A finished rotation (status 410) is returned unchanged and leaves the
    /// current slot untouched; any other failure also sets the visible error.
    pub async fn get_next_team(&self) -> Result<RotationSignal, ApiError> {
        self.with_in_flight(async {
            self.phase.send_replace(JudgingPhase::Advancing);

            let signal = match self.api.next_team().await {
                Ok(signal) => signal,
                Err(e) => return Err(self.rotation_failed(e)),
            };

            self.teams
                .send_modify(|slots| slots.current = signal.team().cloned());
            log_signal("next team", &signal);

            // Previous slot and cursor come from the server.
            let _ = self.restore_previous_team().await;
            let _ = self.refresh_judge().await;

            self.clear_error();
            self.settle_phase();
            Ok(signal)
        })
        .await
    }

    /// Submit a judgment and advance the rotation under one loading scope.
    ///
    /// Once the judgment is accepted it stays recorded: a failing rotation
    /// call afterwards surfaces as [`JudgmentError::Advance`] carrying the
    /// recorded judgment.
    pub async fn record_judgment(
        &self,
        winner: TeamChoice,
        loser_fallback: &str,
    ) -> Result<Judgment, JudgmentError> {
        let request = resolve_judgment(&self.team_slots(), &winner, loser_fallback)?;

        self.with_in_flight(async {
            self.phase.send_replace(JudgingPhase::Submitting);
            let judgment = match self.api.judgment(&request).await {
                Ok(judgment) => judgment,
                Err(e) => {
                    warn!("Judgment submission failed: {}", e);
                    self.set_error(&e);
                    self.phase.send_replace(JudgingPhase::Idle);
                    return Err(JudgmentError::Submit(e));
                }
            };
            info!(
                judgment_id = %judgment.id,
                winner = %judgment.winning_team_id,
                loser = %judgment.losing_team_id,
                "Judgment recorded"
            );

            self.phase.send_replace(JudgingPhase::Advancing);
            let signal = match self.api.next_team().await {
                Ok(signal) => signal,
                Err(e) => {
                    let source = self.rotation_failed(e);
                    return Err(JudgmentError::Advance { judgment, source });
                }
            };
            log_signal("next team after judgment", &signal);
            self.teams
                .send_modify(|slots| slots.shift_in(signal.into_team()));

            let _ = self.refresh_judge().await;

            self.clear_error();
            self.settle_phase();
            Ok(judgment)
        })
        .await
    }

    /// Clear all judging state and the cached judge snapshot. The bearer
    /// token is kept; see [`logout`](Self::logout).
    pub fn reset(&self) {
        self.judge.send_replace(None);
        self.teams.send_replace(TeamSlots::default());
        self.selected_winner.send_replace(None);
        self.judging_finished.send_replace(false);
        self.phase.send_replace(JudgingPhase::Idle);
        self.credentials.remove_judge();
        info!("Judging state cleared on reset");
    }

    /// Reset and forget the bearer token.
    pub fn logout(&self) {
        self.reset();
        self.credentials.remove();
        info!("Bearer token removed");
    }

    pub fn set_selected_winner(&self, winner: Option<String>) {
        self.selected_winner.send_replace(winner);
    }

    pub fn clear_error(&self) {
        self.error.send_if_modified(|e| e.take().is_some());
    }

    // -----------------------------------------------------------------------
    // Reads and subscriptions
    // -----------------------------------------------------------------------

    pub fn judge(&self) -> Option<Judge> {
        self.judge.borrow().clone()
    }

    pub fn subscribe_judge(&self) -> watch::Receiver<Option<Judge>> {
        self.judge.subscribe()
    }

    pub fn team_slots(&self) -> TeamSlots {
        self.teams.borrow().clone()
    }

    pub fn current_team(&self) -> Option<Team> {
        self.teams.borrow().current.clone()
    }

    pub fn previous_team(&self) -> Option<Team> {
        self.teams.borrow().previous.clone()
    }

    pub fn subscribe_teams(&self) -> watch::Receiver<TeamSlots> {
        self.teams.subscribe()
    }

    pub fn selected_winner(&self) -> Option<String> {
        self.selected_winner.borrow().clone()
    }

    pub fn subscribe_selected_winner(&self) -> watch::Receiver<Option<String>> {
        self.selected_winner.subscribe()
    }

    pub fn is_judging_finished(&self) -> bool {
        *self.judging_finished.borrow()
    }

    pub fn subscribe_judging_finished(&self) -> watch::Receiver<bool> {
        self.judging_finished.subscribe()
    }

    pub fn error(&self) -> Option<String> {
        self.error.borrow().clone()
    }

    pub fn subscribe_error(&self) -> watch::Receiver<Option<String>> {
        self.error.subscribe()
    }

    pub fn phase(&self) -> JudgingPhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<JudgingPhase> {
        self.phase.subscribe()
    }

    /// Loading indicator with the minimum visible duration applied.
    pub fn loading(&self) -> bool {
        self.loading.get()
    }

    pub fn subscribe_loading(&self) -> watch::Receiver<bool> {
        self.loading.subscribe()
    }

    /// Raw "anything in flight" flag, without the floor.
    pub fn loading_pending(&self) -> bool {
        self.in_flight.is_pending()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.count()
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Run `task` as one in-flight operation. The outermost caller holds the
    /// counter for at least the loading floor.
    async fn with_in_flight<F: Future>(&self, task: F) -> F::Output {
        let guard = self.in_flight.begin();
        let output = task.await;
        guard.hold_floor(self.options.min_loading).await;
        output
    }

    fn set_judge(&self, judge: Option<Judge>) {
        if judge.as_ref().is_some_and(Judge::is_finished) {
            self.judging_finished.send_replace(true);
        }
        self.judge.send_replace(judge);
    }

    fn set_error(&self, error: &ApiError) {
        self.error.send_replace(Some(error.to_string()));
    }

    fn settle_phase(&self) {
        let phase = if self.is_judging_finished() {
            JudgingPhase::Finished
        } else {
            JudgingPhase::Idle
        };
        self.phase.send_replace(phase);
    }

    /// Classify a rotation failure. "Finished" is a state change, not an
    /// error to display.
    fn rotation_failed(&self, e: ApiError) -> ApiError {
        if detect_judging_finished(&e) {
            info!("Rotation exhausted; judging finished");
            self.judging_finished.send_replace(true);
            self.phase.send_replace(JudgingPhase::Finished);
        } else {
            warn!("Failed to fetch next team: {}", e);
            self.set_error(&e);
            self.phase.send_replace(JudgingPhase::Idle);
        }
        e
    }

    /// Pull the rotation cursor and next-team time from `/judge/me` into the
    /// held judge, keeping its identity fields.
    async fn refresh_judge(&self) -> StepOutcome {
        let me = match self.api.me().await {
            Ok(me) => me,
            Err(e) => {
                warn!("Failed to refresh judge metadata: {}", e);
                return StepOutcome::Recoverable(e);
            }
        };

        let Some(current) = self.judge() else {
            warn!("No judge in session to refresh");
            return StepOutcome::Skipped("no judge in session");
        };

        let updated = current.refreshed(&me);
        debug!(
            current_team = updated.current_team,
            next_team_time = %updated.next_team_time,
            "Judge refreshed from server"
        );
        self.credentials.save_judge(&updated);
        self.set_judge(Some(updated));
        StepOutcome::Applied
    }

    async fn restore_current_team(&self) -> StepOutcome {
        match self.api.current_team().await {
            Ok(team) => {
                debug!(team_id = %team.id, table = ?team.table, "Current team restored");
                self.teams.send_modify(|slots| slots.current = Some(team));
                let _ = self.refresh_judge().await;
                StepOutcome::Applied
            }
            Err(e) => {
                warn!("Failed to restore current team: {}", e);
                StepOutcome::Recoverable(e)
            }
        }
    }

    async fn restore_previous_team(&self) -> StepOutcome {
        match self.api.previous_team().await {
            Ok(signal) => {
                log_signal("previous team", &signal);
                self.teams
                    .send_modify(|slots| slots.previous = signal.into_team());
                StepOutcome::Applied
            }
            Err(e) => {
                warn!("Failed to fetch previous team: {}", e);
                self.teams.send_modify(|slots| slots.previous = None);
                StepOutcome::Recoverable(e)
            }
        }
    }
}

impl Drop for JudgingSession {
    fn drop(&mut self) {
        self.loading.close();
    }
}

fn log_signal(what: &str, signal: &RotationSignal) {
    match signal {
        RotationSignal::Assigned(team) => debug!(team_id = %team.id, "{what}: assigned"),
        RotationSignal::Resting(message) => debug!(%message, "{what}: resting"),
        RotationSignal::Unknown => debug!("{what}: unrecognized response, treating as resting"),
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
