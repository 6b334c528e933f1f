pub mod ask;
pub mod chat;
pub mod ingest;
pub mod init;
pub mod runtime;
pub mod serve;
pub mod status;
