pub mod health;
pub mod hierarchy;
pub mod metrics;

pub use health::*;
pub use hierarchy::*;
pub use metrics::*;
