// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logging macros for convenient logging
//
// The message accepts `format!` arguments, so call sites read
// `log_debug!(logger, Facility::Host, "join {} on {}", group, iface)`.

/// Log a message with critical severity
///
/// # Examples
/// ```ignore
/// log_critical!(logger, Facility::Timers, "timer fired for missing record");
/// ```
#[macro_export]
macro_rules! log_critical {
    ($logger:expr, $facility:expr, $($arg:tt)+) => {
        $logger.critical($facility, &format!($($arg)+))
    };
}

/// Log a message with error severity
///
/// # Examples
/// ```ignore
/// log_error!(logger, Facility::Dispatcher, "unhandled type {:#04x}", msg_type);
/// ```
#[macro_export]
macro_rules! log_error {
    ($logger:expr, $facility:expr, $($arg:tt)+) => {
        $logger.error($facility, &format!($($arg)+))
    };
}

/// Log a message with warning severity
///
/// # Examples
/// ```ignore
/// log_warning!(logger, Facility::Dispatcher, "dropping malformed packet");
/// ```
#[macro_export]
macro_rules! log_warning {
    ($logger:expr, $facility:expr, $($arg:tt)+) => {
        $logger.warning($facility, &format!($($arg)+))
    };
}

/// Log a message with notice severity
///
/// # Examples
/// ```ignore
/// log_notice!(logger, Facility::Querier, "{} is now querier", iface);
/// ```
#[macro_export]
macro_rules! log_notice {
    ($logger:expr, $facility:expr, $($arg:tt)+) => {
        $logger.notice($facility, &format!($($arg)+))
    };
}

/// Log a message with info severity
///
/// # Examples
/// ```ignore
/// log_info!(logger, Facility::Router, "group {} registered", group);
/// ```
#[macro_export]
macro_rules! log_info {
    ($logger:expr, $facility:expr, $($arg:tt)+) => {
        $logger.info($facility, &format!($($arg)+))
    };
}

/// Log a message with debug severity
///
/// # Examples
/// ```ignore
/// log_debug!(logger, Facility::Host, "response timer armed");
/// ```
#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $facility:expr, $($arg:tt)+) => {
        $logger.debug($facility, &format!($($arg)+))
    };
}

/// Log a message with key-value pairs
///
/// # Examples
/// ```ignore
/// log_kv!(logger, Severity::Info, Facility::Router, "Group registered",
///         "iface" => "if1", "group" => "239.1.1.1");
/// ```
#[macro_export]
macro_rules! log_kv {
    ($logger:expr, $severity:expr, $facility:expr, $msg:expr, $($key:expr => $value:expr),+) => {{
        let kvs: &[(&str, &str)] = &[$(($key, $value)),+];
        $logger.log_kv($severity, $facility, $msg, kvs)
    }};
}
