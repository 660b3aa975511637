use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event type names published by the dashboard backend.
pub mod event_types {
    pub const CONNECTED: &str = "connected";

    pub const SYSTEM_NOTIFICATION: &str = "system-notification";
    pub const SYSTEM_ALERT: &str = "system-alert";

    pub const VM_STATUS: &str = "vm-status";
    pub const VM_RESOURCE: &str = "vm-resource";
    pub const VM_ERROR: &str = "vm-error";
    pub const PROVIDER_STATUS: &str = "provider-status";
    pub const PROVIDER_INSTANCE: &str = "provider-instance";

    pub const KUBERNETES_CLUSTER_CREATED: &str = "kubernetes-cluster-created";
    pub const KUBERNETES_CLUSTER_UPDATED: &str = "kubernetes-cluster-updated";
    pub const KUBERNETES_CLUSTER_DELETED: &str = "kubernetes-cluster-deleted";
    pub const KUBERNETES_CLUSTER_LIST: &str = "kubernetes-cluster-list";
    pub const KUBERNETES_NODE_POOL_CREATED: &str = "kubernetes-node-pool-created";
    pub const KUBERNETES_NODE_POOL_UPDATED: &str = "kubernetes-node-pool-updated";
    pub const KUBERNETES_NODE_POOL_DELETED: &str = "kubernetes-node-pool-deleted";
    pub const KUBERNETES_NODE_CREATED: &str = "kubernetes-node-created";
    pub const KUBERNETES_NODE_UPDATED: &str = "kubernetes-node-updated";
    pub const KUBERNETES_NODE_DELETED: &str = "kubernetes-node-deleted";

    pub const NETWORK_VPC_CREATED: &str = "network-vpc-created";
    pub const NETWORK_VPC_UPDATED: &str = "network-vpc-updated";
    pub const NETWORK_VPC_DELETED: &str = "network-vpc-deleted";
    pub const NETWORK_VPC_LIST: &str = "network-vpc-list";
    pub const NETWORK_SUBNET_CREATED: &str = "network-subnet-created";
    pub const NETWORK_SUBNET_UPDATED: &str = "network-subnet-updated";
    pub const NETWORK_SUBNET_DELETED: &str = "network-subnet-deleted";
    pub const NETWORK_SUBNET_LIST: &str = "network-subnet-list";
    pub const NETWORK_SECURITY_GROUP_CREATED: &str = "network-security-group-created";
    pub const NETWORK_SECURITY_GROUP_UPDATED: &str = "network-security-group-updated";
    pub const NETWORK_SECURITY_GROUP_DELETED: &str = "network-security-group-deleted";
    pub const NETWORK_SECURITY_GROUP_LIST: &str = "network-security-group-list";
}

/// Resource type names used for secondary filtering.
pub mod resource_types {
    pub const PROVIDER: &str = "provider";
    pub const CREDENTIAL_ID: &str = "credential_id";
    pub const REGION: &str = "region";
    pub const CLUSTER_ID: &str = "cluster_id";
    pub const VPC_ID: &str = "vpc_id";
    pub const VM_ID: &str = "vm_id";
}

/// A `(resource_type, resource_id)` tag carried by an event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub resource_type: String,
    pub resource_id: String,
}

impl ResourceRef {
    pub fn new(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
        }
    }
}

/// Greeting sent to a client right after its stream opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectedPayload {
    pub connection_id: String,
    pub message: String,
    pub timestamp: i64,
}

/// A cloud resource (cluster, node pool, VPC, subnet, ...) changed state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceChange {
    pub provider: String,
    pub credential_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    /// Provider specific representation of the resource.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub level: NotificationLevel,
}

/// Event body. Serialized untagged so the SSE `data:` line is the payload
/// object itself; `Raw` keeps event types this crate doesn't model.
///
/// The typed variants reject unknown fields, so an open-ended object only
/// decodes as a typed payload when it has exactly that shape and otherwise
/// stays `Raw` with every field intact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    Connected(ConnectedPayload),
    Resource(ResourceChange),
    Notification(Notification),
    Raw(Value),
}

impl From<Value> for EventPayload {
    fn from(value: Value) -> Self {
        EventPayload::Raw(value)
    }
}

impl From<ResourceChange> for EventPayload {
    fn from(change: ResourceChange) -> Self {
        EventPayload::Resource(change)
    }
}

impl From<Notification> for EventPayload {
    fn from(notification: Notification) -> Self {
        EventPayload::Notification(notification)
    }
}

/// A domain event flowing through the bus.
///
/// Fields are private: an event is built once through the constructors and
/// the `with_*`/`for_*` builders, then only read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default = "generate_event_id")]
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    resources: Vec<ResourceRef>,
    data: EventPayload,
    timestamp: i64,
}

fn generate_event_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

impl Event {
    pub fn new(event_type: impl Into<String>, payload: impl Into<EventPayload>) -> Self {
        Self {
            id: generate_event_id(),
            event_type: event_type.into(),
            workspace_id: None,
            user_id: None,
            resources: Vec::new(),
            data: payload.into(),
            timestamp: Utc::now().timestamp(),
        }
    }

    /// Builds an event for a changed cloud resource, tagged with its provider,
    /// credential and (when known) region so clients can filter on them.
    pub fn resource_change(event_type: impl Into<String>, change: ResourceChange) -> Self {
        let mut resources = vec![
            ResourceRef::new(resource_types::PROVIDER, change.provider.clone()),
            ResourceRef::new(resource_types::CREDENTIAL_ID, change.credential_id.clone()),
        ];
        if let Some(region) = &change.region {
            resources.push(ResourceRef::new(resource_types::REGION, region.clone()));
        }

        let mut event = Self::new(event_type, change);
        event.resources = resources;
        event
    }

    /// Adds a resource tag, replacing an existing tag of the same type.
    pub fn with_resource(
        mut self,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        let tag = ResourceRef::new(resource_type, resource_id);
        self.resources
            .retain(|existing| existing.resource_type != tag.resource_type);
        self.resources.push(tag);
        self
    }

    pub fn for_workspace(mut self, workspace_id: impl Into<String>) -> Self {
        self.workspace_id = Some(workspace_id.into());
        self
    }

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Unique per published event; sent to clients as the SSE `id:` field.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn payload(&self) -> &EventPayload {
        &self.data
    }

    pub fn resources(&self) -> &[ResourceRef] {
        &self.resources
    }

    pub fn workspace_id(&self) -> Option<&str> {
        self.workspace_id.as_deref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }
}
