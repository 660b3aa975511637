use serde::Deserialize;
use sse::{ConnectionId, SubscriptionFilters};
use utoipa::{IntoParams, ToSchema};

/// Query string of `GET /realtime/events`. Every list is comma separated.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub(crate) struct StreamParams {
    /// Event types to receive; omit to receive every type
    #[param(example = "kubernetes-node-pool-created,kubernetes-node-pool-deleted")]
    pub(crate) event_types: Option<String>,
    pub(crate) providers: Option<String>,
    pub(crate) credential_ids: Option<String>,
    pub(crate) regions: Option<String>,
}

fn split_list(list: &Option<String>) -> Vec<String> {
    list.as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

impl StreamParams {
    pub(crate) fn event_types(&self) -> Vec<String> {
        split_list(&self.event_types)
    }

    pub(crate) fn filters(&self) -> SubscriptionFilters {
        SubscriptionFilters {
            providers: split_list(&self.providers),
            credential_ids: split_list(&self.credential_ids),
            regions: split_list(&self.regions),
        }
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub(crate) struct FilterParams {
    #[serde(default)]
    pub(crate) providers: Vec<String>,
    #[serde(default)]
    pub(crate) credential_ids: Vec<String>,
    #[serde(default)]
    pub(crate) regions: Vec<String>,
}

impl From<FilterParams> for SubscriptionFilters {
    fn from(params: FilterParams) -> Self {
        SubscriptionFilters {
            providers: params.providers,
            credential_ids: params.credential_ids,
            regions: params.regions,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[schema(example = json!({
    "connection_id": "user-1-8f14e45fceea167a5a36dedd4bea2543",
    "event_type": "kubernetes-node-pool-created",
    "filters": {"credential_ids": ["cred-123"]}
}))]
pub(crate) struct EventSubscriptionParams {
    pub(crate) connection_id: String,
    pub(crate) event_type: String,
    /// Only honoured when subscribing
    pub(crate) filters: Option<FilterParams>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[schema(example = json!({
    "connection_id": "user-1-8f14e45fceea167a5a36dedd4bea2543",
    "resource_type": "credential_id",
    "resource_id": "cred-123"
}))]
pub(crate) struct ResourceSubscriptionParams {
    pub(crate) connection_id: String,
    pub(crate) resource_type: String,
    pub(crate) resource_id: String,
}

impl EventSubscriptionParams {
    pub(crate) fn connection_id(&self) -> ConnectionId {
        ConnectionId::from(self.connection_id.as_str())
    }
}

impl ResourceSubscriptionParams {
    pub(crate) fn connection_id(&self) -> ConnectionId {
        ConnectionId::from(self.connection_id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_params_split_comma_lists() {
        let params = StreamParams {
            event_types: Some("vm-status, vm-error,,".to_string()),
            credential_ids: Some("cred-1".to_string()),
            ..Default::default()
        };

        assert_eq!(params.event_types(), vec!["vm-status", "vm-error"]);
        let filters = params.filters();
        assert_eq!(filters.credential_ids, vec!["cred-1"]);
        assert!(filters.providers.is_empty());
        assert!(StreamParams::default().event_types().is_empty());
    }
}
