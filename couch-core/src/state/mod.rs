pub mod connection;
pub mod session;

pub use connection::ClientPhase;
pub use session::{
    ClosedSession, InputOutcome, Registration, SessionInfo, SessionState, SessionTable,
};
