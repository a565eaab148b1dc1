mod admin;
mod middleware;
mod public;

pub use admin::{AdminState, build_admin_router};
pub use middleware::RequestTrace;
pub use public::{HttpState, build_router};
