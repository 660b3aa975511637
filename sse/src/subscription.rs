//! Per-connection filter state and the subscription operations on `Manager`.

use crate::connection::{ConnectionId, ConnectionInfo};
use crate::error::Error;
use crate::manager::Manager;
use crate::message::validate_event_type;
use events::{resource_types, ResourceRef};
use log::*;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Event-type and resource filters of one connection.
///
/// An empty event-type set means the connection receives every event type.
/// Resource filters only constrain the resource types that have at least one
/// subscribed id.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Subscriptions {
    event_types: HashSet<String>,
    resources: HashMap<String, HashSet<String>>,
}

impl Subscriptions {
    pub fn accepts(&self, event_type: &str, resources: &[ResourceRef]) -> bool {
        if !self.event_types.is_empty() && !self.event_types.contains(event_type) {
            return false;
        }

        resources.iter().all(|resource| {
            match self.resources.get(&resource.resource_type) {
                Some(ids) => ids.contains(&resource.resource_id),
                None => true,
            }
        })
    }

    /// Returns false if the type was already subscribed.
    pub fn subscribe_event(&mut self, event_type: &str) -> bool {
        self.event_types.insert(event_type.to_string())
    }

    pub fn unsubscribe_event(&mut self, event_type: &str) -> bool {
        self.event_types.remove(event_type)
    }

    pub fn subscribe_resource(&mut self, resource_type: &str, resource_id: &str) -> bool {
        self.resources
            .entry(resource_type.to_string())
            .or_default()
            .insert(resource_id.to_string())
    }

    pub fn unsubscribe_resource(&mut self, resource_type: &str, resource_id: &str) -> bool {
        let Some(ids) = self.resources.get_mut(resource_type) else {
            return false;
        };
        let removed = ids.remove(resource_id);
        if ids.is_empty() {
            self.resources.remove(resource_type);
        }
        removed
    }

    pub fn event_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.event_types.iter().cloned().collect();
        types.sort();
        types
    }

    pub fn resources(&self) -> BTreeMap<String, Vec<String>> {
        self.resources
            .iter()
            .map(|(resource_type, ids)| {
                let mut ids: Vec<String> = ids.iter().cloned().collect();
                ids.sort();
                (resource_type.clone(), ids)
            })
            .collect()
    }
}

/// Resource filters accepted alongside an event-type subscription, e.g. from
/// the `GET /realtime/events` query string.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
pub struct SubscriptionFilters {
    #[serde(default)]
    pub providers: Vec<String>,
    #[serde(default)]
    pub credential_ids: Vec<String>,
    #[serde(default)]
    pub regions: Vec<String>,
}

impl SubscriptionFilters {
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty() && self.credential_ids.is_empty() && self.regions.is_empty()
    }

    pub fn resource_refs(&self) -> Vec<ResourceRef> {
        let tagged = |resource_type: &'static str, ids: &[String]| {
            ids.iter()
                .filter(|id| !id.is_empty())
                .map(move |id| ResourceRef::new(resource_type, id.clone()))
                .collect::<Vec<_>>()
        };

        let mut refs = tagged(resource_types::PROVIDER, &self.providers);
        refs.extend(tagged(resource_types::CREDENTIAL_ID, &self.credential_ids));
        refs.extend(tagged(resource_types::REGION, &self.regions));
        refs
    }
}

impl Manager {
    /// Rejects event types no frame could carry, which would otherwise
    /// silence the connection.
    pub fn subscribe_to_event(&self, id: &ConnectionId, event_type: &str) -> Result<(), Error> {
        validate_event_type(event_type)?;
        self.with_subscriptions(id, |subs| {
            if subs.subscribe_event(event_type) {
                debug!("Connection {id} subscribed to {event_type}");
            }
        })
    }

    pub fn unsubscribe_from_event(&self, id: &ConnectionId, event_type: &str) -> Result<(), Error> {
        self.with_subscriptions(id, |subs| {
            if subs.unsubscribe_event(event_type) {
                debug!("Connection {id} unsubscribed from {event_type}");
            }
        })
    }

    pub fn subscribe_to_resource(
        &self,
        id: &ConnectionId,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<(), Error> {
        self.with_subscriptions(id, |subs| {
            if subs.subscribe_resource(resource_type, resource_id) {
                debug!("Connection {id} subscribed to {resource_type}={resource_id}");
            }
        })
    }

    pub fn unsubscribe_from_resource(
        &self,
        id: &ConnectionId,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<(), Error> {
        self.with_subscriptions(id, |subs| {
            if subs.unsubscribe_resource(resource_type, resource_id) {
                debug!("Connection {id} unsubscribed from {resource_type}={resource_id}");
            }
        })
    }

    /// Subscribes to `event_type` and narrows delivery to the given
    /// providers, credentials and regions in one step.
    pub fn subscribe_with_filters(
        &self,
        id: &ConnectionId,
        event_type: &str,
        filters: &SubscriptionFilters,
    ) -> Result<(), Error> {
        validate_event_type(event_type)?;
        let refs = filters.resource_refs();
        self.with_subscriptions(id, |subs| {
            subs.subscribe_event(event_type);
            for resource in &refs {
                subs.subscribe_resource(&resource.resource_type, &resource.resource_id);
            }
        })?;
        debug!(
            "Connection {id} subscribed to {event_type} with {} resource filters",
            refs.len()
        );
        Ok(())
    }

    pub fn connection_info(&self, id: &ConnectionId) -> Result<ConnectionInfo, Error> {
        self.registry()
            .get(id)
            .map(|connection| connection.info())
            .ok_or_else(|| Error::ConnectionNotFound(id.clone()))
    }

    fn with_subscriptions<R>(
        &self,
        id: &ConnectionId,
        update: impl FnOnce(&mut Subscriptions) -> R,
    ) -> Result<R, Error> {
        match self.registry().get(id) {
            Some(connection) => Ok(connection.update_subscriptions(update)),
            None => {
                warn!("Subscription change for unknown connection {id}");
                Err(Error::ConnectionNotFound(id.clone()))
            }
        }
    }
}
