pub mod analyzer;
pub mod grain;
pub mod mailbox;
pub mod synth;
pub mod transport;
