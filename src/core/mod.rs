//! Core of the working-copy status cache.
//!
//! Data model, the store and its helpers, the background workers, the
//! filesystem interceptor and the git backend.

pub mod backend;
pub mod colors;
pub mod command_init;
pub mod config;
pub mod dirs;
pub mod error;
pub mod file_ref;
pub mod fs_ops;
pub mod git;
pub mod index;
pub mod interceptor;
pub mod labels;
pub mod listeners;
pub mod output;
pub mod persist;
pub mod scheduler;
pub mod status;
pub mod store;

// === Error handling ===
pub use error::{BackendError, Result, StatusCacheError};

// === Data model ===
pub use file_ref::FileRef;
pub use status::{
    FileStatus, NodeKind, PropStatus, RemoteChange, RepositoryHint, StatusFlags, StatusInfo,
    StatusMask, StatusRecord, TextStatus,
};

// === Backend ===
pub use backend::{BackendResult, RevisionInfo, VcsBackend};
pub use git::GitBackend;

// === Cache components ===
pub use index::ReverseIndex;
pub use interceptor::{FilesystemInterceptor, InterceptorConfig, TransferStrategy};
pub use labels::{LabelCache, LabelInfo};
pub use listeners::{ListenerId, StatusChangeEvent, StatusListener};
pub use scheduler::{DelayPolicy, NoDelay, RefreshScheduler};
pub use store::{StatusStore, StoreSnapshot};

// === Configuration and persistence ===
pub use command_init::{CommandContext, CommandInit};
pub use config::CacheConfig;

// === Output formatting ===
pub use colors::{format_file_status, get_aligned_status, get_colored_path, get_status_color_style};
pub use output::{print_error, print_field, print_info, print_success};
