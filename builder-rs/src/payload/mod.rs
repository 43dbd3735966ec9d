mod builder;
mod cache;

pub use builder::{PayloadBuilder, PayloadBuilderConfig, DEFAULT_PAYLOAD_BUILD_TIME_MS};
pub use cache::{PayloadCache, DEFAULT_MAX_SLOTS};
