pub mod health;
pub mod jobs;
pub mod pipeline;

pub use health::health_routes;
pub use jobs::job_routes;
pub use pipeline::pipeline_routes;
