pub mod handlers;

pub use handlers::{register_builtin, DelayHandler, LogHandler, TransformHandler};
