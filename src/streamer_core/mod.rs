pub mod car;
pub mod commit_decoder;
pub mod config;
pub mod consumer;
pub mod decode_error;
pub mod error_handler;
pub mod firehose_client;
pub mod frame;

pub use commit_decoder::{decode_commit, Operation, OpKind};
pub use config::RuntimeConfig;
pub use consumer::FirehoseIngestor;
pub use firehose_client::run_with_reconnect;
