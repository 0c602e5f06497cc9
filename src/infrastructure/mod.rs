pub mod kafka;
pub mod memory;
pub mod outbox_repo;
pub mod part_repo;

#[cfg(test)]
pub(crate) mod test_support;
