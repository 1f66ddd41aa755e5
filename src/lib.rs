//! Concatenative (mosaicing) synthesis: index a source recording by MFCC
//! frames and resynthesize a target from the source grains closest to it.

pub mod audio;
pub mod corpus;
pub mod encode;
pub mod engine;
pub mod error;
pub mod scheduler;
pub mod session;
pub mod sync;
