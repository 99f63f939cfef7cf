//! JSON payloads for the `/wait` endpoint.
//!
//! `wait` (nanoseconds) and `weight` are written as JSON strings and
//! accepted as either strings or numbers.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Simulated work time when the request does not specify one.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);

/// A unit of work offered for admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitRequest {
    /// Caller-chosen request id, echoed back
    #[serde(default)]
    pub id: String,
    /// Admission key
    pub application_id: String,
    /// How long the simulated work takes, in nanoseconds
    #[serde(default = "default_wait", with = "stringified")]
    pub wait: u64,
    /// Cost multiplier for the weighted token bucket
    #[serde(default = "default_weight", with = "stringified")]
    pub weight: u32,
}

impl WaitRequest {
    pub fn wait_duration(&self) -> Duration {
        Duration::from_nanos(self.wait)
    }
}

fn default_wait() -> u64 {
    DEFAULT_WAIT.as_nanos() as u64
}

fn default_weight() -> u32 {
    crate::ratelimit::DEFAULT_WEIGHT
}

/// Response to a completed wait; echoes the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitResponse {
    pub id: String,
    pub application_id: String,
    #[serde(with = "stringified")]
    pub wait: u64,
    #[serde(with = "stringified")]
    pub weight: u32,
}

impl From<WaitRequest> for WaitResponse {
    fn from(request: WaitRequest) -> Self {
        Self {
            id: request.id,
            application_id: request.application_id,
            wait: request.wait,
            weight: request.weight,
        }
    }
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

mod stringified {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::fmt::Display;
    use std::str::FromStr;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr<T> {
        Text(String),
        Number(T),
    }

    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Display,
        S: Serializer,
    {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: FromStr + Deserialize<'de>,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        match Repr::<T>::deserialize(deserializer)? {
            Repr::Text(text) => text.trim().parse().map_err(D::Error::custom),
            Repr::Number(number) => Ok(number),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_with_string_fields() {
        let json = r#"{
            "id": "req-1",
            "application_id": "app-1",
            "wait": "1000000000",
            "weight": "3"
        }"#;

        let request: WaitRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.id, "req-1");
        assert_eq!(request.application_id, "app-1");
        assert_eq!(request.wait_duration(), Duration::from_secs(1));
        assert_eq!(request.weight, 3);
    }

    #[test]
    fn test_request_with_numeric_fields() {
        let json = r#"{"application_id": "app-1", "wait": 250, "weight": 2}"#;

        let request: WaitRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.wait, 250);
        assert_eq!(request.weight, 2);
    }

    #[test]
    fn test_request_defaults() {
        let request: WaitRequest = serde_json::from_str(r#"{"application_id": "app"}"#).unwrap();
        assert_eq!(request.id, "");
        assert_eq!(request.wait_duration(), DEFAULT_WAIT);
        assert_eq!(request.weight, 1);
    }

    #[test]
    fn test_request_rejects_bad_numbers() {
        assert!(serde_json::from_str::<WaitRequest>(
            r#"{"application_id": "app", "weight": "-1"}"#
        )
        .is_err());
        assert!(serde_json::from_str::<WaitRequest>(
            r#"{"application_id": "app", "wait": "soon"}"#
        )
        .is_err());
    }

    #[test]
    fn test_response_writes_strings() {
        let response = WaitResponse {
            id: "req-1".to_string(),
            application_id: "app-1".to_string(),
            wait: 5,
            weight: 1,
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["wait"], "5");
        assert_eq!(json["weight"], "1");
    }
}
