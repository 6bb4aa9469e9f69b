pub mod events;
pub mod hub;

pub use events::RelayEvent;
pub use hub::RelayHub;
