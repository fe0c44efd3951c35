//! Client-side authentication: token decoding, persistence, transport and
//! the session manager tying them together.

pub mod claims;
pub mod session;
pub mod token_store;
pub mod transport;

pub use claims::{Claims, Role};
pub use session::{AuthState, LoginOutcome, LogoutOutcome, Session, SessionManager, SessionView};
pub use token_store::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use transport::{CredentialTransport, Credentials, HttpTransport, Registration, RoleProfile};
