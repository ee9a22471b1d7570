//! Routes remote controller commands into the playback session.
//!
//! Every command is authorized first. Unauthorized, malformed or
//! unresolvable commands are dropped without telling the caller; the
//! returned [`Dispatch`] exists for logging and tests only.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::session::{SessionCommand, SessionHandle};
use crate::auth::{CallerAllowList, CallerIdentity};
use crate::catalog::{ContentTreeBuilder, NodeId, NodeKind};
use crate::protocol_constants::{SKIP_BACK_SECS, SKIP_FORWARD_SECS};

/// Commands a remote controller can issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum RemoteCommand {
    PlayById {
        id: String,
    },
    Play,
    Pause,
    Stop,
    SeekTo {
        #[serde(rename = "positionMs")]
        position_ms: u64,
    },
    /// Fixed forward skip.
    SkipNext,
    /// Fixed backward skip.
    SkipPrevious,
    SkipToNextChapter,
    SkipToPreviousChapter,
    SetSpeed {
        speed: f32,
    },
    PlayFromSearch {
        query: String,
    },
}

/// What happened to a dispatched command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Forwarded,
    Ignored(&'static str),
}

pub struct CommandRouter {
    allow_list: Arc<CallerAllowList>,
    catalog: Arc<ContentTreeBuilder>,
    session: SessionHandle,
    skip_forward_ms: i64,
    skip_back_ms: i64,
}

impl CommandRouter {
    pub fn new(
        allow_list: Arc<CallerAllowList>,
        catalog: Arc<ContentTreeBuilder>,
        session: SessionHandle,
    ) -> Self {
        Self {
            allow_list,
            catalog,
            session,
            skip_forward_ms: secs_to_ms(SKIP_FORWARD_SECS),
            skip_back_ms: secs_to_ms(SKIP_BACK_SECS),
        }
    }

    /// Overrides the fixed skip increments.
    pub fn with_skip_increments(mut self, forward_secs: u64, back_secs: u64) -> Self {
        self.skip_forward_ms = secs_to_ms(forward_secs);
        self.skip_back_ms = secs_to_ms(back_secs);
        self
    }

    pub async fn dispatch(&self, caller: &CallerIdentity, command: RemoteCommand) -> Dispatch {
        if self.allow_list.authorize(caller).is_err() {
            log::debug!("[Router] Dropping {:?} from unauthorized caller", command);
            return Dispatch::Ignored("unauthorized");
        }

        let session_command = match command {
            RemoteCommand::PlayById { id } => match NodeId::parse(&id) {
                Some(node) if node.is_playable() => SessionCommand::Load(node),
                _ => {
                    log::debug!("[Router] PlayById({}) is not playable", id);
                    return Dispatch::Ignored("not playable");
                }
            },
            RemoteCommand::PlayFromSearch { query } => {
                if query.trim().is_empty() {
                    return Dispatch::Ignored("empty query");
                }
                match self.single_playable_match(&query).await {
                    Some(node) => {
                        log::info!("[Router] Search {:?} resolved to {}", query, node);
                        SessionCommand::Load(node)
                    }
                    None => {
                        log::debug!("[Router] Search {:?} is not a single match", query);
                        return Dispatch::Ignored("no single match");
                    }
                }
            }
            RemoteCommand::Play => SessionCommand::Play,
            RemoteCommand::Pause => SessionCommand::Pause,
            RemoteCommand::Stop => SessionCommand::Stop,
            RemoteCommand::SeekTo { position_ms } => SessionCommand::SeekTo(position_ms),
            RemoteCommand::SkipNext => SessionCommand::SkipBy(self.skip_forward_ms),
            RemoteCommand::SkipPrevious => SessionCommand::SkipBy(-self.skip_back_ms),
            RemoteCommand::SkipToNextChapter => SessionCommand::NextChapter,
            RemoteCommand::SkipToPreviousChapter => SessionCommand::PreviousChapter,
            RemoteCommand::SetSpeed { speed } => SessionCommand::SetSpeed(speed),
        };

        match self.session.send(session_command).await {
            Ok(()) => Dispatch::Forwarded,
            Err(e) => {
                log::warn!("[Router] {}", e);
                Dispatch::Ignored("session closed")
            }
        }
    }

    async fn single_playable_match(&self, query: &str) -> Option<NodeId> {
        let results = self.catalog.search(query).await;
        let mut playable = results.iter().filter(|n| n.kind == NodeKind::Playable);
        match (playable.next(), playable.next()) {
            (Some(only), None) => NodeId::parse(&only.id),
            _ => None,
        }
    }
}

fn secs_to_ms(secs: u64) -> i64 {
    i64::try_from(secs.saturating_mul(1000)).unwrap_or(i64::MAX)
}
