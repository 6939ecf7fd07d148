pub mod pipeline;
pub mod sqlite_pragma;
pub mod streamer_core;
