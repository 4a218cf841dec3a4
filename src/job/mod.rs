pub mod request;
pub mod status;

pub use request::{ClientMetadata, JobRequest, JobSpecification};
pub use status::JobStatus;
