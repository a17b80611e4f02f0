pub mod routes;

pub use routes::{dispatch, health_check, health_index, ApiState, ControlRequest};
