pub mod broker;
pub mod error;
pub mod loopback;
pub mod minter;
pub mod ws;

pub use broker::{Attachment, Broker, BrokerConnection, BrokerMessage};
pub use error::{BrokerError, Result};
pub use loopback::LoopbackBroker;
pub use minter::{Activity, TokenMinter, TokenRequest};
pub use ws::WsBroker;
