pub mod clock;
pub mod replication;
