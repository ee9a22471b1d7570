//! Application services layer.
//!
//! These services sit between the protocol surface (`api/`) and the
//! collaborators (library, engine, focus broker).

pub mod browse;
pub mod command_router;
pub mod focus;
pub mod session;

pub use browse::{BrowseNode, BrowseServer, Connection, RootHandle};
pub use command_router::{CommandRouter, Dispatch, RemoteCommand};
pub use focus::{AudioFocusArbiter, FocusBroker, FocusChange, FocusGrant, LocalFocusBroker};
pub use session::{
    PlaybackSession, PlaybackSnapshot, PlaybackState, SessionCommand, SessionConfig,
    SessionDeps, SessionHandle,
};
