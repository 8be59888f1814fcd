//! services/api/src/web/state.rs
//!
//! Defines the application's shared state: every core service, wired once at
//! startup against the selected store.

use crate::config::Config;
use school_sync_core::ports::{ConversationStore, DirectoryStore, RemarkStore, SchoolStore};
use school_sync_core::{
    ChatService, HomeworkService, IdentityResolver, RemarkService, RosterAggregator,
    SchoolDirectory, UnreadAggregator,
};
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
pub struct AppState {
    pub directory: Arc<dyn DirectoryStore>,
    pub config: Arc<Config>,
    pub identity: IdentityResolver,
    pub roster: RosterAggregator,
    pub school: SchoolDirectory,
    pub chat: ChatService,
    pub unread: UnreadAggregator,
    pub remarks: RemarkService,
    pub homework: HomeworkService,
}

impl AppState {
    /// Builds every service on top of a single store implementing all ports.
    pub fn from_stores<S>(store: Arc<S>, config: Arc<Config>) -> Self
    where
        S: DirectoryStore + SchoolStore + ConversationStore + RemarkStore + 'static,
    {
        let directory: Arc<dyn DirectoryStore> = store.clone();
        let school: Arc<dyn SchoolStore> = store.clone();
        let conversations: Arc<dyn ConversationStore> = store.clone();
        let remarks: Arc<dyn RemarkStore> = store;

        Self {
            identity: IdentityResolver::new(directory.clone()),
            roster: RosterAggregator::new(school.clone()),
            school: SchoolDirectory::new(school.clone()),
            chat: ChatService::new(conversations.clone()),
            unread: UnreadAggregator::new(conversations, remarks.clone()),
            remarks: RemarkService::new(remarks, school.clone()),
            homework: HomeworkService::new(school),
            directory,
            config,
        }
    }
}
