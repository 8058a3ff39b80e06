pub mod client;
pub mod poller;

pub use client::InverterClient;
pub use poller::{ChannelData, Poller};
