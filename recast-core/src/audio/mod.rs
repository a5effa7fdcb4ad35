//! Audio path between decoder and encoder
//!
//! Sample rates are never converted; only the channel layout is remixed.

pub mod channel;
pub mod remix;

pub use channel::{AudioChannel, duration_us};
pub use remix::{Remix, RemixCount, mix_pair};
