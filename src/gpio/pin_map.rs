use std::collections::BTreeMap;

/// BCM pin number
pub type PinId = u8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinMapping {
    pub topic: String,
    pub pin: PinId,
}

/// Topic a pin's observed state is published on
pub fn status_topic_for(topic: &str) -> String {
    format!("{}/status", topic)
}

/// Topic to pin table, fixed after startup
///
/// Ordered by topic so sweeps visit pins in a stable order.
#[derive(Debug, Clone, Default)]
pub struct PinMap {
    by_topic: BTreeMap<String, PinId>,
}

impl PinMap {
    pub fn new(table: BTreeMap<String, PinId>) -> Self {
        Self { by_topic: table }
    }

    pub fn pin_for(&self, topic: &str) -> Option<PinId> {
        self.by_topic.get(topic).copied()
    }

    pub fn len(&self) -> usize {
        self.by_topic.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_topic.is_empty()
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.by_topic.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = PinMapping> + '_ {
        self.by_topic.iter().map(|(topic, pin)| PinMapping {
            topic: topic.clone(),
            pin: *pin,
        })
    }
}

impl FromIterator<(String, PinId)> for PinMap {
    fn from_iter<T: IntoIterator<Item = (String, PinId)>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
