pub mod attachments;
pub mod auth;
pub mod backup;
pub mod diagnostics;
pub mod export;
pub mod records;
pub mod runtime;
pub mod settings;
pub mod sync;
