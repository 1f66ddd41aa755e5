pub mod analysis;
pub mod buffer;
pub mod decode;
pub mod features;
pub mod mfcc;
