//! Auction market core: validation, lifecycle, storage seams and the bid
//! acceptance protocol.

pub mod events;
pub mod lifecycle;
pub mod protocol;
pub mod repository;
pub mod validator;

pub use events::{BroadcastSink, FanoutSink, NotificationSink, OutboxSink};
pub use protocol::BidDesk;
pub use repository::{AgentConfigStore, AuctionRepository};
