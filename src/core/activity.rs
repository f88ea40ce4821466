use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::service::Action;

/// Opaque identifier assigned by the execution service when an operation is submitted.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ActivityId(String);
impl ActivityId {
    pub fn new(id: impl Into<String>) -> Self {
        ActivityId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct InstanceId(String);
impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        InstanceId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActivityStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ActivityStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ActivityStatus::Completed | ActivityStatus::Failed)
    }
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ActivityStatus::Pending => "Pending",
            ActivityStatus::Running => "Running",
            ActivityStatus::Completed => "Completed",
            ActivityStatus::Failed => "Failed",
        };
        f.write_str(s)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct OutputTag {
    pub name: String,
    pub value: String,
}

/// Where a successful activity wrote its results.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResultInfo {
    pub min_timestamp: i64,
    pub max_timestamp: i64,
    pub bucket: String,
    pub measurement: String,
    #[serde(default)]
    pub output_tags: Vec<OutputTag>,
}

/// One invocation of an operation against a service instance, as reported by
/// `GET /api/activities`. Only the id and status are required on the wire.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub activity_id: ActivityId,
    pub status: ActivityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<InstanceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_measurement: Option<String>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_info: Option<ResultInfo>,
}

impl Activity {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Caller-supplied output routing for a submitted operation.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutputSpec {
    pub output_database: String,
    pub output_measurement: String,
    pub params: BTreeMap<String, String>,
}

impl OutputSpec {
    /// Routing pre-filled from what the action declares; callers override before submitting.
    pub fn from_action(action: &Action) -> Self {
        let (output_database, output_measurement) = match &action.output {
            Some(output) => (
                output.default_database.clone().unwrap_or_default(),
                output.default_measurement.clone().unwrap_or_default(),
            ),
            None => (String::new(), String::new()),
        };
        Self {
            output_database,
            output_measurement,
            params: action.default_params(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// Body of `POST /api/activities`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubmitActivityRequest {
    pub instance_id: InstanceId,
    pub operation_name: String,
    pub input_query: String,
    pub output_database: String,
    pub output_measurement: String,
    pub params: BTreeMap<String, String>,
}

impl SubmitActivityRequest {
    pub fn new(
        instance_id: InstanceId,
        operation_name: impl Into<String>,
        input_query: impl Into<String>,
        output: OutputSpec,
    ) -> Self {
        Self {
            instance_id,
            operation_name: operation_name.into(),
            input_query: input_query.into(),
            output_database: output.output_database,
            output_measurement: output.output_measurement,
            params: output.params,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubmitActivityResponse {
    pub activity_id: ActivityId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn minimal_activity_parses() {
        let activity: Activity =
            serde_json::from_value(json!({"activityId": "a1", "status": "Running"})).unwrap();
        assert_eq!(activity.activity_id, ActivityId::new("a1"));
        assert_eq!(activity.status, ActivityStatus::Running);
        assert!(activity.result_info.is_none());
        assert!(!activity.is_terminal());
    }

    #[test]
    fn unknown_status_is_rejected() {
        let parsed =
            serde_json::from_value::<Activity>(json!({"activityId": "a1", "status": "Sleeping"}));
        assert!(parsed.is_err());
    }

    #[test]
    fn submit_request_uses_camel_case() {
        let output = OutputSpec {
            output_database: "ds-bucket".into(),
            output_measurement: "forecasting".into(),
            params: BTreeMap::new(),
        }
        .with_param("Days", "365");
        let request =
            SubmitActivityRequest::new(InstanceId::new("i1"), "Forecast", "from(bucket:\"x\")", output);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["instanceId"], "i1");
        assert_eq!(value["operationName"], "Forecast");
        assert_eq!(value["outputDatabase"], "ds-bucket");
        assert_eq!(value["outputMeasurement"], "forecasting");
        assert_eq!(value["params"]["Days"], "365");
    }

    #[test]
    fn terminal_statuses() {
        assert!(ActivityStatus::Completed.is_terminal());
        assert!(ActivityStatus::Failed.is_terminal());
        assert!(!ActivityStatus::Pending.is_terminal());
        assert!(!ActivityStatus::Running.is_terminal());
    }
}
