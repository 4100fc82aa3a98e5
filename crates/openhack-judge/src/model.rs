// Wire types exchanged with the judging API and cached on the client.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Rotation cursor value the server uses once a judge has seen every team.
pub const FINISHED_SENTINEL: i64 = 9000;

/// Rotation cursor value before the first assignment.
pub const NOT_STARTED: i64 = -1;

/// Snapshot of feature flags as served by `/accounts/flags`.
pub type FlagMap = BTreeMap<String, Value>;

// ---------------------------------------------------------------------------
// Judge
// ---------------------------------------------------------------------------

/// An authenticated judge and their position in the rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Judge {
    pub id: String,
    pub name: String,
    /// Pairing identifier shared with the co-judge.
    pub pair: String,
    /// `-1` before judging starts, an index while judging, and
    /// [`FINISHED_SENTINEL`] once every team has been seen.
    #[serde(rename = "currentTeam", deserialize_with = "lenient_cursor")]
    pub current_team: i64,
    /// Server hint for when the next assignment becomes available.
    #[serde(rename = "nextTeamTime", default)]
    pub next_team_time: String,
}

impl Judge {
    pub fn is_finished(&self) -> bool {
        self.current_team == FINISHED_SENTINEL
    }

    pub fn has_started(&self) -> bool {
        self.current_team >= 0
    }

    /// Parse `next_team_time` as an RFC 3339 timestamp. Returns `None` for
    /// empty or malformed hints.
    pub fn next_team_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.next_team_time)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Merge a `/judge/me` refresh into this judge, keeping the display
    /// metadata and taking the cursor and timing from the server.
    pub fn refreshed(&self, me: &JudgeMe) -> Judge {
        Judge {
            id: self.id.clone(),
            name: self.name.clone(),
            pair: self.pair.clone(),
            current_team: me.current_team,
            next_team_time: me.next_team_time.clone(),
        }
    }
}

/// Response of `GET /judge/me`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JudgeMe {
    #[serde(rename = "currentTeam", deserialize_with = "lenient_cursor", default = "not_started")]
    pub current_team: i64,
    #[serde(rename = "nextTeamTime", default)]
    pub next_team_time: String,
}

fn not_started() -> i64 {
    NOT_STARTED
}

/// The server sometimes encodes the cursor as a string. Anything that is
/// neither an integer nor a numeric string maps to [`NOT_STARTED`].
fn lenient_cursor<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(parse_cursor(&value))
}

pub(crate) fn parse_cursor(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .unwrap_or(NOT_STARTED),
        Value::String(s) => parse_leading_int(s).unwrap_or(NOT_STARTED),
        _ => NOT_STARTED,
    }
}

/// Integer prefix parse: `"12"` and `"12abc"` give 12, `" 7"` gives 7.
fn parse_leading_int(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, s.strip_prefix('+').unwrap_or(s)),
    };
    let end = digits
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().ok().map(|n| sign * n)
}

// ---------------------------------------------------------------------------
// Teams
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamSubmission {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pres: Option<String>,
}

/// A team a judge compares against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Physical table the team is seated at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission: Option<TeamSubmission>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<bool>,
}

/// Classified response of the next-team and previous-team endpoints.
///
/// Both endpoints answer with either a team object or a `{ "message": .. }`
/// payload while the judge is resting. A finished rotation is reported as an
/// HTTP 410 error instead, see [`crate::error::ApiError::is_judging_finished`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationSignal {
    Assigned(Team),
    Resting(String),
    /// Neither a team nor a resting message. Treated like resting.
    Unknown,
}

impl RotationSignal {
    /// Decode a raw response body. Presence of `id` wins over `message`.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        let Value::Object(map) = &value else {
            return Ok(RotationSignal::Unknown);
        };
        if map.contains_key("id") {
            let team: Team = serde_json::from_value(value)?;
            return Ok(RotationSignal::Assigned(team));
        }
        if let Some(message) = map.get("message") {
            let message = message.as_str().unwrap_or("Resting").to_string();
            return Ok(RotationSignal::Resting(message));
        }
        Ok(RotationSignal::Unknown)
    }

    pub fn team(&self) -> Option<&Team> {
        match self {
            RotationSignal::Assigned(team) => Some(team),
            _ => None,
        }
    }

    pub fn into_team(self) -> Option<Team> {
        match self {
            RotationSignal::Assigned(team) => Some(team),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Judgments and token upgrade
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgmentRequest {
    #[serde(rename = "winningTeamID")]
    pub winning_team_id: String,
    #[serde(rename = "losingTeamID")]
    pub losing_team_id: String,
}

/// A recorded pairwise comparison. Immutable once returned by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Judgment {
    pub id: String,
    #[serde(rename = "judgeID")]
    pub judge_id: String,
    #[serde(rename = "winningTeamID")]
    pub winning_team_id: String,
    #[serde(rename = "losingTeamID")]
    pub losing_team_id: String,
    #[serde(default)]
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeRequest {
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeResponse {
    pub token: String,
    pub judge: Judge,
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn judge_me_accepts_numeric_and_string_cursor() {
        let me: JudgeMe =
            serde_json::from_value(json!({ "currentTeam": 3, "nextTeamTime": "t" })).unwrap();
        assert_eq!(me.current_team, 3);

        let me: JudgeMe =
            serde_json::from_value(json!({ "currentTeam": "9000", "nextTeamTime": "t" }))
                .unwrap();
        assert_eq!(me.current_team, FINISHED_SENTINEL);
    }

    #[test]
    fn unparseable_cursor_means_not_started() {
        let me: JudgeMe =
            serde_json::from_value(json!({ "currentTeam": "abc", "nextTeamTime": "" })).unwrap();
        assert_eq!(me.current_team, NOT_STARTED);

        let me: JudgeMe = serde_json::from_value(json!({ "currentTeam": null })).unwrap();
        assert_eq!(me.current_team, NOT_STARTED);

        let me: JudgeMe = serde_json::from_value(json!({})).unwrap();
        assert_eq!(me.current_team, NOT_STARTED);
    }

    #[test]
    fn string_cursor_uses_integer_prefix() {
        assert_eq!(parse_cursor(&json!("12abc")), 12);
        assert_eq!(parse_cursor(&json!(" -1")), -1);
        assert_eq!(parse_cursor(&json!(4.7)), 4);
    }

    #[test]
    fn judge_uses_camel_case_wire_names() {
        let judge = Judge {
            id: "j1".into(),
            name: "Ada".into(),
            pair: "p1".into(),
            current_team: 2,
            next_team_time: "2026-10-19T12:00:00Z".into(),
        };
        let value = serde_json::to_value(&judge).unwrap();
        assert_eq!(value["currentTeam"], json!(2));
        assert_eq!(value["nextTeamTime"], json!("2026-10-19T12:00:00Z"));
        assert!(judge.has_started());
        assert!(!judge.is_finished());
        assert_eq!(
            judge.next_team_at().unwrap().to_rfc3339(),
            "2026-10-19T12:00:00+00:00"
        );
    }

    #[test]
    fn refreshed_keeps_identity_and_takes_cursor() {
        let cached = Judge {
            id: "j1".into(),
            name: "Ada".into(),
            pair: "p1".into(),
            current_team: 0,
            next_team_time: "old".into(),
        };
        let me = JudgeMe {
            current_team: 4,
            next_team_time: "new".into(),
        };
        let merged = cached.refreshed(&me);
        assert_eq!(merged.id, "j1");
        assert_eq!(merged.name, "Ada");
        assert_eq!(merged.pair, "p1");
        assert_eq!(merged.current_team, 4);
        assert_eq!(merged.next_team_time, "new");
    }

    #[test]
    fn rotation_signal_prefers_team_identity() {
        let signal = RotationSignal::from_value(json!({
            "id": "T1", "name": "Rustaceans", "table": "12", "message": "ignored"
        }))
        .unwrap();
        let team = signal.team().expect("assigned");
        assert_eq!(team.id, "T1");
        assert_eq!(team.table.as_deref(), Some("12"));
    }

    #[test]
    fn rotation_signal_resting_and_unknown() {
        assert_eq!(
            RotationSignal::from_value(json!({ "message": "resting" })).unwrap(),
            RotationSignal::Resting("resting".into())
        );
        assert_eq!(
            RotationSignal::from_value(json!({ "message": 5 })).unwrap(),
            RotationSignal::Resting("Resting".into())
        );
        assert_eq!(
            RotationSignal::from_value(json!({ "status": "ok" })).unwrap(),
            RotationSignal::Unknown
        );
        assert_eq!(RotationSignal::from_value(Value::Null).unwrap(), RotationSignal::Unknown);
    }

    #[test]
    fn judgment_wire_names() {
        let judgment: Judgment = serde_json::from_value(json!({
            "id": "jd1",
            "judgeID": "j1",
            "winningTeamID": "A",
            "losingTeamID": "B",
            "date": "2026-10-19T12:00:00Z"
        }))
        .unwrap();
        assert_eq!(judgment.winning_team_id, "A");
        assert_eq!(judgment.losing_team_id, "B");

        let req = serde_json::to_value(JudgmentRequest {
            winning_team_id: "A".into(),
            losing_team_id: "B".into(),
        })
        .unwrap();
        assert_eq!(req, json!({ "winningTeamID": "A", "losingTeamID": "B" }));
    }
}
