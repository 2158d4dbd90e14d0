// src/lib.rs
pub mod ports {
    pub mod replay_feed;
}
pub mod trade {
    pub mod execution {
        pub mod gateway;
        pub mod paper_gateway;
    }
}
pub mod autotrader;
pub mod config;
pub mod hedge;
pub mod market;
pub mod orders;
pub mod session;
pub mod signal;
pub mod status;

use trade::execution::gateway::Volume;

/// Volume of every primary order we quote.
pub const LOT_SIZE: Volume = 10;
/// Hard cap on the primary position, in lots.
pub const POSITION_LIMIT: i64 = 100;
/// Soft band on the primary position; outside it we unwind.
pub const TRADE_LIMIT: i64 = 60;
