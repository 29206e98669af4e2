pub mod session;

pub use session::{new_session_id, SessionStore};
