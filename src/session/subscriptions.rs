//! Topic filters the session has asked the broker for

use crate::protocol::{topic_matches, QoS, SubscribeFilter};
use std::collections::BTreeMap;

#[derive(Debug, Default, Clone)]
pub(crate) struct SubscriptionTable {
    filters: BTreeMap<String, QoS>,
}

impl SubscriptionTable {
    pub fn insert(&mut self, filter: &str, qos: QoS) {
        self.filters.insert(filter.to_string(), qos);
    }

    pub fn remove(&mut self, filter: &str) -> Option<QoS> {
        self.filters.remove(filter)
    }

    pub fn contains(&self, filter: &str) -> bool {
        self.filters.contains_key(filter)
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Whether any filter matches an inbound topic
    pub fn matches(&self, topic: &[u8]) -> bool {
        self.filters.keys().any(|filter| topic_matches(filter, topic))
    }

    pub fn to_filters(&self) -> Vec<SubscribeFilter> {
        self.filters
            .iter()
            .map(|(filter, qos)| SubscribeFilter {
                filter: filter.clone(),
                qos: *qos,
            })
            .collect()
    }

    pub fn entries(&self) -> Vec<(String, QoS)> {
        self.filters
            .iter()
            .map(|(filter, qos)| (filter.clone(), *qos))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_any_filter() {
        let mut table = SubscriptionTable::default();
        assert!(!table.matches(b"a/x/c"));

        table.insert("a/+/c", QoS::AtMostOnce);
        table.insert("v1/devices/me/rpc/request/+", QoS::AtLeastOnce);

        assert!(table.matches(b"a/x/c"));
        assert!(!table.matches(b"a/x/y/c"));
        assert!(table.matches(b"v1/devices/me/rpc/request/42"));
    }

    #[test]
    fn test_resubscribing_replaces_qos() {
        let mut table = SubscriptionTable::default();
        table.insert("a/#", QoS::AtMostOnce);
        table.insert("a/#", QoS::AtLeastOnce);

        assert_eq!(table.entries(), vec![("a/#".to_string(), QoS::AtLeastOnce)]);
        assert_eq!(table.remove("a/#"), Some(QoS::AtLeastOnce));
        assert!(table.is_empty());
    }
}
