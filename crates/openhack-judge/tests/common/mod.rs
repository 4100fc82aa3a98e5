// Shared fixtures for the integration tests: a scripted in-memory JudgeApi
// and builders for the payloads it returns.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use openhack_judge::credentials::CredentialStore;
use openhack_judge::error::ApiError;
use openhack_judge::gateway::JudgeApi;
use openhack_judge::model::{
    Judge, JudgeMe, Judgment, JudgmentRequest, RotationSignal, Team, UpgradeRequest,
    UpgradeResponse,
};
use openhack_judge::session::{JudgingSession, SessionOptions};
use openhack_judge::storage::MemoryStore;

pub const ME: &str = "me";
pub const CURRENT: &str = "current_team";
pub const PREVIOUS: &str = "previous_team";
pub const NEXT: &str = "next_team";
pub const JUDGMENT: &str = "judgment";
pub const UPGRADE: &str = "upgrade";

type Script<T> = Mutex<VecDeque<Result<T, ApiError>>>;

/// JudgeApi fake. Each endpoint answers from its own queue of scripted
/// results; an empty queue answers with a 500. Every call is recorded.
/// Endpoints can be given a simulated latency or held until released.
#[derive(Default)]
pub struct FakeApi {
    me: Script<JudgeMe>,
    current: Script<Team>,
    previous: Script<RotationSignal>,
    next: Script<RotationSignal>,
    judgment: Script<Judgment>,
    upgrade: Script<UpgradeResponse>,

    calls: Mutex<Vec<&'static str>>,
    judgments: Mutex<Vec<JudgmentRequest>>,
    upgrades: Mutex<Vec<String>>,
    latency: Mutex<HashMap<&'static str, Duration>>,
    holds: Mutex<HashMap<&'static str, Arc<Notify>>>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_me(&self, result: Result<JudgeMe, ApiError>) -> &Self {
        self.me.lock().unwrap().push_back(result);
        self
    }

    pub fn push_current(&self, result: Result<Team, ApiError>) -> &Self {
        self.current.lock().unwrap().push_back(result);
        self
    }

    pub fn push_previous(&self, result: Result<RotationSignal, ApiError>) -> &Self {
        self.previous.lock().unwrap().push_back(result);
        self
    }

    pub fn push_next(&self, result: Result<RotationSignal, ApiError>) -> &Self {
        self.next.lock().unwrap().push_back(result);
        self
    }

    pub fn push_judgment(&self, result: Result<Judgment, ApiError>) -> &Self {
        self.judgment.lock().unwrap().push_back(result);
        self
    }

    pub fn push_upgrade(&self, result: Result<UpgradeResponse, ApiError>) -> &Self {
        self.upgrade.lock().unwrap().push_back(result);
        self
    }

    /// Every call to `endpoint` sleeps for `delay` before answering.
    pub fn set_latency(&self, endpoint: &'static str, delay: Duration) {
        self.latency.lock().unwrap().insert(endpoint, delay);
    }

    /// The next call to `endpoint` waits until the returned handle is
    /// notified.
    pub fn hold(&self, endpoint: &'static str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.holds.lock().unwrap().insert(endpoint, notify.clone());
        notify
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, endpoint: &str) -> usize {
        self.calls().iter().filter(|c| **c == endpoint).count()
    }

    pub fn judgments(&self) -> Vec<JudgmentRequest> {
        self.judgments.lock().unwrap().clone()
    }

    pub fn upgrades(&self) -> Vec<String> {
        self.upgrades.lock().unwrap().clone()
    }

    async fn answer<T>(&self, endpoint: &'static str, script: &Script<T>) -> Result<T, ApiError> {
        self.calls.lock().unwrap().push(endpoint);

        let hold = self.holds.lock().unwrap().remove(endpoint);
        if let Some(notify) = hold {
            notify.notified().await;
        }
        let delay = self.latency.lock().unwrap().get(endpoint).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        script.lock().unwrap().pop_front().unwrap_or_else(|| {
            Err(ApiError::Status {
                status: 500,
                message: format!("unscripted call to {endpoint}"),
            })
        })
    }
}

#[async_trait]
impl JudgeApi for FakeApi {
    async fn me(&self) -> Result<JudgeMe, ApiError> {
        self.answer(ME, &self.me).await
    }

    async fn current_team(&self) -> Result<Team, ApiError> {
        self.answer(CURRENT, &self.current).await
    }

    async fn previous_team(&self) -> Result<RotationSignal, ApiError> {
        self.answer(PREVIOUS, &self.previous).await
    }

    async fn next_team(&self) -> Result<RotationSignal, ApiError> {
        self.answer(NEXT, &self.next).await
    }

    async fn judgment(&self, request: &JudgmentRequest) -> Result<Judgment, ApiError> {
        self.judgments.lock().unwrap().push(request.clone());
        self.answer(JUDGMENT, &self.judgment).await
    }

    async fn upgrade(&self, request: &UpgradeRequest) -> Result<UpgradeResponse, ApiError> {
        self.upgrades.lock().unwrap().push(request.token.clone());
        self.answer(UPGRADE, &self.upgrade).await
    }
}

// ---------------------------------------------------------------------------
// Payload builders
// ---------------------------------------------------------------------------

pub fn judge(current_team: i64) -> Judge {
    Judge {
        id: "j1".into(),
        name: "Ada".into(),
        pair: "pair-1".into(),
        current_team,
        next_team_time: String::new(),
    }
}

pub fn me(current_team: i64, next_team_time: &str) -> JudgeMe {
    JudgeMe {
        current_team,
        next_team_time: next_team_time.into(),
    }
}

pub fn team(id: &str) -> Team {
    Team {
        id: id.into(),
        name: format!("Team {id}"),
        table: Some("7".into()),
        submission: None,
        members: None,
        deleted: None,
    }
}

pub fn assigned(id: &str) -> RotationSignal {
    RotationSignal::Assigned(team(id))
}

pub fn resting() -> RotationSignal {
    RotationSignal::Resting("resting".into())
}

pub fn judgment(id: &str, winner: &str, loser: &str) -> Judgment {
    Judgment {
        id: id.into(),
        judge_id: "j1".into(),
        winning_team_id: winner.into(),
        losing_team_id: loser.into(),
        date: "2026-03-01T12:00:00Z".into(),
    }
}

pub fn status(status: u16, message: &str) -> ApiError {
    ApiError::Status {
        status,
        message: message.into(),
    }
}

pub fn gone() -> ApiError {
    status(410, "judging finished")
}

// ---------------------------------------------------------------------------
// Session builders
// ---------------------------------------------------------------------------

pub fn memory_credentials() -> CredentialStore {
    CredentialStore::new(Arc::new(MemoryStore::new()))
}

/// Credentials holding a token and, optionally, a cached judge snapshot.
pub fn logged_in(cached: Option<&Judge>) -> CredentialStore {
    let credentials = memory_credentials();
    credentials.save("session-token");
    if let Some(judge) = cached {
        credentials.save_judge(judge);
    }
    credentials
}

pub fn session(api: &Arc<FakeApi>, credentials: CredentialStore) -> JudgingSession {
    session_with_floor(api, credentials, Duration::from_millis(300))
}

pub fn session_with_floor(
    api: &Arc<FakeApi>,
    credentials: CredentialStore,
    min_loading: Duration,
) -> JudgingSession {
    JudgingSession::new(api.clone(), credentials, SessionOptions { min_loading })
}

/// Let spawned tasks observe pending channel updates.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
