//! Helper macros for logging (console printing).

use std::sync::OnceLock;

use env_logger::Env;

/// Global variable holding the process identity string used as logging
/// prefix, e.g. "p" for a primary, "b" for a backup, "c7" for a clerk.
pub static ME: OnceLock<String> = OnceLock::new();

/// Log TRACE message prefixed with the process identity.
///
/// Example:
/// ```no_compile
/// pf_trace!("forwarded {}", req);
/// ```
#[macro_export]
macro_rules! pf_trace {
    ($($fmt_args:tt)*) => {
        log::trace!(
            "({}) {}",
            $crate::ME.get().map_or("-", |me| me.as_str()),
            format!($($fmt_args)*)
        )
    };
}

/// Log DEBUG message prefixed with the process identity. Used for every
/// inbound request and every grant or release.
///
/// Example:
/// ```no_compile
/// pf_debug!("{} on {}", req, role);
/// ```
#[macro_export]
macro_rules! pf_debug {
    ($($fmt_args:tt)*) => {
        log::debug!(
            "({}) {}",
            $crate::ME.get().map_or("-", |me| me.as_str()),
            format!($($fmt_args)*)
        )
    };
}

/// Log INFO message prefixed with the process identity.
///
/// Example:
/// ```no_compile
/// pf_info!("accepting lock clients on '{}'", addr);
/// ```
#[macro_export]
macro_rules! pf_info {
    ($($fmt_args:tt)*) => {
        log::info!(
            "({}) {}",
            $crate::ME.get().map_or("-", |me| me.as_str()),
            format!($($fmt_args)*)
        )
    };
}

/// Log WARN message prefixed with the process identity. Demotions and
/// clerk failovers go here.
///
/// Example:
/// ```no_compile
/// pf_warn!("demoted myself to {}", role);
/// ```
#[macro_export]
macro_rules! pf_warn {
    ($($fmt_args:tt)*) => {
        log::warn!(
            "({}) {}",
            $crate::ME.get().map_or("-", |me| me.as_str()),
            format!($($fmt_args)*)
        )
    };
}

/// Log ERROR message prefixed with the process identity.
///
/// Example:
/// ```no_compile
/// pf_error!("server_main exited: {}", e);
/// ```
#[macro_export]
macro_rules! pf_error {
    ($($fmt_args:tt)*) => {
        log::error!(
            "({}) {}",
            $crate::ME.get().map_or("-", |me| me.as_str()),
            format!($($fmt_args)*)
        )
    };
}

/// Initialize `env_logger` to desired configuration if haven't.
pub fn logger_init() {
    let _ =
        env_logger::Builder::from_env(Env::default().default_filter_or("info"))
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .try_init();
}

/// Log an error string to logger and then return a `DuolockError`
/// containing the string.
///
/// Example:
/// ```no_compile
/// return logged_err!("invalid config.rpc_timeout_ms '{}'", timeout_ms);
/// ```
#[macro_export]
macro_rules! logged_err {
    ($($fmt_args:tt)*) => {
        {
            $crate::pf_error!($($fmt_args)*);
            Err($crate::DuolockError::msg(format!($($fmt_args)*)))
        }
    };
}
