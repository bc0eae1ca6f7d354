//! wc-status-cache - an in-memory cache of version-control status for the
//! files of a working copy.
//!
//! The [`StatusStore`] answers status queries, scanning a directory on first
//! access and keeping only files whose status is worth remembering. The
//! [`RefreshScheduler`] coalesces background refreshes, the
//! [`FilesystemInterceptor`] turns create/delete/move/copy into backend
//! operations and keeps the cache in step, and the [`LabelCache`] serves
//! display-only revision labels.
//!
//! The repository side is abstracted by [`VcsBackend`]; [`GitBackend`] is the
//! bundled implementation.

pub mod commands;
pub mod core;

pub use core::{
    BackendError,
    BackendResult,
    CacheConfig,
    DelayPolicy,
    FileRef,
    FileStatus,
    FilesystemInterceptor,
    GitBackend,
    InterceptorConfig,
    LabelCache,
    LabelInfo,
    ListenerId,
    NoDelay,
    RefreshScheduler,
    RepositoryHint,
    Result,
    RevisionInfo,
    StatusCacheError,
    StatusChangeEvent,
    StatusFlags,
    StatusInfo,
    StatusListener,
    StatusMask,
    StatusRecord,
    StatusStore,
    VcsBackend,
};
