pub mod config;
pub mod decode;
pub mod derive;
pub mod error;
pub mod metrics_consts;
pub mod normalize;
pub mod pipeline;
pub mod progress;
pub mod sink;
pub mod source;
pub mod types;
