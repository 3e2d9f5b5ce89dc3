//! Structured tracing helpers for the RPC command dispatcher, matching the
//! teacher's terse per-request log-and-reply macro pattern.

/// Log one RPC command at debug level with its connection and torrent context.
#[macro_export]
macro_rules! rpc_log {
    ($conn:expr, $cmd:expr) => {
        tracing::debug!(conn = $conn, cmd = $cmd, "rpc command");
    };
    ($conn:expr, $cmd:expr, $($field:tt)*) => {
        tracing::debug!(conn = $conn, cmd = $cmd, $($field)*, "rpc command");
    };
}

/// Log a command failure and return its wire token.
#[macro_export]
macro_rules! rpc_error {
    ($conn:expr, $cmd:expr, $err:expr) => {{
        let err = $err;
        tracing::warn!(conn = $conn, cmd = $cmd, error = %err, "rpc command failed");
        err
    }};
}
