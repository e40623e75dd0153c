//! Logging macros.
//!
//! Each macro formats into a 256-byte stack buffer and forwards to
//! `logging::log_impl` with the module path captured at the call site.
//! Allocation-free, so they are safe in panic handlers, interrupt handlers,
//! and early boot code.

/// Log an ERROR level message.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        use core::fmt::Write;
        let mut buf = [0u8; 256];
        let mut writer = $crate::logging::StackWriter::new(&mut buf);
        let _ = write!(writer, $($arg)*);
        $crate::logging::log_impl(
            $crate::logging::LogLevel::Error,
            module_path!(),
            writer.as_str(),
        )
    }};
}

/// Log a WARN level message.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        use core::fmt::Write;
        let mut buf = [0u8; 256];
        let mut writer = $crate::logging::StackWriter::new(&mut buf);
        let _ = write!(writer, $($arg)*);
        $crate::logging::log_impl(
            $crate::logging::LogLevel::Warn,
            module_path!(),
            writer.as_str(),
        )
    }};
}

/// Log an INFO level message.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        use core::fmt::Write;
        let mut buf = [0u8; 256];
        let mut writer = $crate::logging::StackWriter::new(&mut buf);
        let _ = write!(writer, $($arg)*);
        $crate::logging::log_impl(
            $crate::logging::LogLevel::Info,
            module_path!(),
            writer.as_str(),
        )
    }};
}

/// Log a DEBUG level message.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        use core::fmt::Write;
        let mut buf = [0u8; 256];
        let mut writer = $crate::logging::StackWriter::new(&mut buf);
        let _ = write!(writer, $($arg)*);
        $crate::logging::log_impl(
            $crate::logging::LogLevel::Debug,
            module_path!(),
            writer.as_str(),
        )
    }};
}

/// Log a TRACE level message.
#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {{
        use core::fmt::Write;
        let mut buf = [0u8; 256];
        let mut writer = $crate::logging::StackWriter::new(&mut buf);
        let _ = write!(writer, $($arg)*);
        $crate::logging::log_impl(
            $crate::logging::LogLevel::Trace,
            module_path!(),
            writer.as_str(),
        )
    }};
}
