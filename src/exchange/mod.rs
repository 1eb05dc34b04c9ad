//! Exchange integrations for the two hedge venues.
//!
//! ## Binance (primary)
//! USDⓈ-M perpetuals in hedge mode. Sizes are base-asset quantities and
//! closes carry the exact quantity.
//!
//! ## Gate.io (secondary)
//! USDT-settled perpetuals in dual mode. Sizes are contract counts and
//! closes are auto-sized by side.
//!
//! Both implement [`VenueClient`]; [`MockVenue`] stands in for either.

pub mod binance;
pub mod gate;
pub mod mock;
mod traits;
mod types;

pub use binance::BinanceClient;
pub use gate::GateClient;
pub use mock::{MockOp, MockVenue};
pub use traits::VenueClient;
pub use types::*;
