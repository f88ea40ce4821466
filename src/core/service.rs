use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::activity::InstanceId;

const CATEGORY_TAG_PREFIX: &str = "Category=";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ServiceId(String);
impl ServiceId {
    pub fn new(id: impl Into<String>) -> Self {
        ServiceId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActionParameter {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActionOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_measurement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_tags: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresentationHints {
    #[serde(default)]
    pub default_fields: Vec<String>,
}

/// A named, parameterized unit of work a service can execute.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ActionParameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<ActionOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presentation_hints: Option<PresentationHints>,
}

impl Action {
    /// Every declared parameter mapped to its default, or an empty string when it has none.
    pub fn default_params(&self) -> BTreeMap<String, String> {
        self.parameters
            .iter()
            .map(|p| (p.name.clone(), p.default.clone().unwrap_or_default()))
            .collect()
    }

    pub fn default_fields(&self) -> &[String] {
        self.presentation_hints
            .as_ref()
            .map(|hints| hints.default_fields.as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: ServiceId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl Service {
    pub fn action(&self, name: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.name == name)
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.tags
            .iter()
            .filter_map(|t| t.strip_prefix(CATEGORY_TAG_PREFIX))
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstanceStatus {
    Pending,
    Running,
    Stopped,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: InstanceId,
    pub name: String,
    pub service_id: ServiceId,
    #[serde(default = "unknown_status")]
    pub status: InstanceStatus,
}

fn unknown_status() -> InstanceStatus {
    InstanceStatus::Unknown
}

/// Body of `POST /api/instances`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewInstance {
    pub name: String,
    pub service_id: ServiceId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceSummary {
    pub id: ServiceId,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceCategory {
    pub name: String,
    pub services: Vec<ServiceSummary>,
}

/// Groups services by their `Category=` tags, categories in first-seen order.
/// Untagged services are left out; a service tagged twice is listed under both.
pub fn categorize_services(services: &[Service]) -> Vec<ServiceCategory> {
    let mut categories: Vec<ServiceCategory> = Vec::new();
    for service in services {
        for category in service.categories() {
            let summary = ServiceSummary {
                id: service.id.clone(),
                name: service.name.clone(),
            };
            match categories.iter_mut().find(|c| c.name == category) {
                Some(existing) => existing.services.push(summary),
                None => categories.push(ServiceCategory {
                    name: category.to_string(),
                    services: vec![summary],
                }),
            }
        }
    }
    categories
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service(id: &str, tags: &[&str]) -> Service {
        Service {
            id: ServiceId::new(id),
            name: id.to_uppercase(),
            description: String::new(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            actions: vec![],
        }
    }

    #[test]
    fn categories_keep_first_seen_order() {
        let services = vec![
            service("prophet", &["Category=Forecast", "vendor=fb"]),
            service("outliers", &["Category=Anomaly"]),
            service("arima", &["Category=Forecast", "Category=Anomaly"]),
            service("untagged", &[]),
        ];
        let categories = categorize_services(&services);
        let names: Vec<_> = categories.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Forecast", "Anomaly"]);

        let forecast: Vec<_> = categories[0].services.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(forecast, vec!["prophet", "arima"]);
        let anomaly: Vec<_> = categories[1].services.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(anomaly, vec!["outliers", "arima"]);
    }

    #[test]
    fn action_defaults_fill_missing_values() {
        let action: Action = serde_json::from_value(json!({
            "name": "Forecast",
            "parameters": [
                {"name": "Days", "description": "horizon", "default": "365"},
                {"name": "Seasonality"}
            ],
            "output": {"defaultDatabase": "ds-bucket", "defaultMeasurement": "forecasting"},
            "presentationHints": {"defaultFields": ["yhat"]}
        }))
        .unwrap();

        let params = action.default_params();
        assert_eq!(params.get("Days").map(String::as_str), Some("365"));
        assert_eq!(params.get("Seasonality").map(String::as_str), Some(""));
        assert_eq!(action.default_fields(), ["yhat".to_string()]);

        let output = crate::core::activity::OutputSpec::from_action(&action);
        assert_eq!(output.output_database, "ds-bucket");
        assert_eq!(output.output_measurement, "forecasting");
        assert_eq!(output.params, params);
    }

    #[test]
    fn instance_with_unrecognised_status_still_parses() {
        let instance: Instance = serde_json::from_value(json!({
            "id": "i1", "name": "MyFB1", "serviceId": "sha256:b8", "status": "Hibernating"
        }))
        .unwrap();
        assert_eq!(instance.status, InstanceStatus::Unknown);
        assert_eq!(instance.service_id, ServiceId::new("sha256:b8"));
    }
}
