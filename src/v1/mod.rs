pub mod health;
pub mod segment;

pub use health::{health_check, HealthResponse};
pub use segment::{segment_file, segment_input, segment_url, PathRequest, UrlRequest};
