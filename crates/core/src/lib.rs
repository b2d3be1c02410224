// crates/core/src/lib.rs
pub mod config;
pub mod error;
pub mod latency;
pub mod llm;
pub mod normalize;
pub mod paths;
pub mod pricing;
pub mod project;
pub mod providers;
pub mod summary;
pub mod tools;
pub mod types;

pub use config::Config;
pub use error::*;
pub use pricing::{ModelPricing, PricingTable};
pub use providers::{ParseContext, ProviderRegistry, TranscriptParser};
pub use types::*;
