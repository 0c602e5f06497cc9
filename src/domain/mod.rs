pub mod errors;
pub mod events;
pub mod outbox;
pub mod part;
pub mod ports;
