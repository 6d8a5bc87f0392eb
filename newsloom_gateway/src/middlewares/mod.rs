pub mod csrf;
pub mod panic_guard;
pub mod request_id;
pub mod security;
pub mod session;

pub use csrf::{csrf_middleware, csrf_presence_middleware};
pub use panic_guard::panic_guard_middleware;
pub use request_id::{request_id_middleware, REQUEST_ID_HEADER};
pub use security::security_headers_middleware;
pub use session::{optional_session_middleware, require_session_middleware, OptionalUserContext};
