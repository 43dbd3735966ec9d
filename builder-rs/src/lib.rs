pub mod beacon;
pub mod builder_api;
pub mod chain;
mod config;
pub mod dispatch;
pub mod engine;
pub mod epbs;
mod error;
pub mod payload;
pub mod serde;
mod service;
pub mod signing;
pub mod types;

pub use config::{BidScheduleConfig, Config, EpbsTimingConfig, ScheduleMode};
pub use dispatch::{Dispatcher, Subscription};
pub use error::{BuildError, BuilderApiError, Error, ErrorMessage};
pub use service::{Service, ServiceHandle};
