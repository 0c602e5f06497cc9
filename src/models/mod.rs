pub mod outbox;
pub mod part;
