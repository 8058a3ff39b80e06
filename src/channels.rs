use crate::prelude::*;

#[derive(Debug, Clone)]
pub struct Channels {
    pub to_coordinator: broadcast::Sender<coordinator::ChannelData>,
    pub to_poller: broadcast::Sender<inverter::ChannelData>,
    pub from_mqtt: broadcast::Sender<mqtt::ChannelData>,
    pub to_mqtt: broadcast::Sender<mqtt::ChannelData>,
}

impl Default for Channels {
    fn default() -> Self {
        Self::new()
    }
}

impl Channels {
    pub fn new() -> Self {
        Self {
            to_coordinator: Self::channel(),
            to_poller: Self::channel(),
            from_mqtt: Self::channel(),
            to_mqtt: Self::channel(),
        }
    }

    fn channel<T: Clone>() -> broadcast::Sender<T> {
        broadcast::channel(2048).0
    }
}
