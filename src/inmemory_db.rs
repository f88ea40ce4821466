use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::core::activity::{
    Activity, ActivityId, ActivityStatus, InstanceId, OutputTag, ResultInfo, SubmitActivityRequest,
};
use crate::core::service::{Instance, InstanceStatus, NewInstance, Service, ServiceId};

#[derive(Debug, Clone)]
pub struct ActivityRecord {
    pub activity: Activity,
    pub created_at: DateTime<Utc>,
    pub polls_remaining: u32,
}

#[derive(Clone)]
pub struct Db {
    pub services: Arc<DashMap<ServiceId, Service>>,
    pub instances: Arc<DashMap<InstanceId, Instance>>,
    pub activities: Arc<DashMap<ActivityId, ActivityRecord>>,
}

impl Db {
    pub fn new() -> Self {
        Self {
            services: Arc::new(DashMap::new()),
            instances: Arc::new(DashMap::new()),
            activities: Arc::new(DashMap::new()),
        }
    }

    pub async fn add_service(&self, service: Service) {
        self.services.insert(service.id.clone(), service);
    }

    pub async fn list_services(&self) -> Vec<Service> {
        let mut services: Vec<Service> = self.services.iter().map(|s| s.clone()).collect();
        services.sort_by(|a, b| a.name.cmp(&b.name));
        services
    }

    pub async fn list_instances(&self) -> Vec<Instance> {
        let mut instances: Vec<Instance> = self.instances.iter().map(|i| i.clone()).collect();
        instances.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.as_str().cmp(b.id.as_str())));
        instances
    }

    pub async fn create_instance(&self, new: NewInstance) -> Option<Instance> {
        if !self.services.contains_key(&new.service_id) {
            return None;
        }
        let instance = Instance {
            id: InstanceId::new(Uuid::new_v4().to_string()),
            name: new.name,
            service_id: new.service_id,
            status: InstanceStatus::Running,
        };
        self.instances.insert(instance.id.clone(), instance.clone());
        Some(instance)
    }

    /// Records a new pending activity; `None` if the instance does not exist.
    pub async fn add_activity(
        &self,
        request: SubmitActivityRequest,
        polls_to_complete: u32,
    ) -> Option<ActivityId> {
        let instance = self.instances.get(&request.instance_id)?.clone();
        let activity_id = ActivityId::new(Uuid::new_v4().to_string());
        let activity = Activity {
            activity_id: activity_id.clone(),
            status: ActivityStatus::Pending,
            instance_id: Some(instance.id),
            instance_name: Some(instance.name),
            operation_name: Some(request.operation_name),
            input_query: Some(request.input_query),
            output_database: Some(request.output_database),
            output_measurement: Some(request.output_measurement),
            params: request.params,
            result_info: None,
        };
        self.activities.insert(
            activity_id.clone(),
            ActivityRecord {
                activity,
                created_at: Utc::now(),
                polls_remaining: polls_to_complete,
            },
        );
        Some(activity_id)
    }

    /// Snapshot of every activity, oldest first. Each call moves unfinished
    /// activities one step closer to a terminal state.
    pub async fn poll_activities(&self) -> Vec<Activity> {
        let now = Utc::now();
        for mut record in self.activities.iter_mut() {
            if record.activity.is_terminal() {
                continue;
            }
            if record.polls_remaining == 0 {
                let record = record.value_mut();
                self.finish(record, now);
            } else {
                record.polls_remaining -= 1;
                record.activity.status = ActivityStatus::Running;
            }
        }

        let mut records: Vec<ActivityRecord> = self.activities.iter().map(|r| r.clone()).collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        records.into_iter().map(|r| r.activity).collect()
    }

    pub async fn remove_activity(&self, activity_id: &ActivityId) -> Option<Activity> {
        self.activities.remove(activity_id).map(|(_, r)| r.activity)
    }

    fn finish(&self, record: &mut ActivityRecord, now: DateTime<Utc>) {
        let activity = &mut record.activity;
        let supported = activity
            .instance_id
            .as_ref()
            .and_then(|id| self.instances.get(id).map(|i| i.service_id.clone()))
            .and_then(|service_id| self.services.get(&service_id).map(|s| s.clone()))
            .zip(activity.operation_name.as_deref())
            .is_some_and(|(service, op)| service.action(op).is_some());

        if !supported {
            activity.status = ActivityStatus::Failed;
            return;
        }

        activity.status = ActivityStatus::Completed;
        activity.result_info = Some(ResultInfo {
            min_timestamp: record.created_at.timestamp_nanos_opt().unwrap_or_default(),
            max_timestamp: now.timestamp_nanos_opt().unwrap_or_default(),
            bucket: activity.output_database.clone().unwrap_or_default(),
            measurement: activity.output_measurement.clone().unwrap_or_default(),
            output_tags: activity
                .instance_name
                .iter()
                .map(|name| OutputTag {
                    name: "instance".to_string(),
                    value: name.clone(),
                })
                .collect(),
        });
    }
}

impl Default for Db {
    fn default() -> Self {
        Self::new()
    }
}
