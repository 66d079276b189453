// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Log output for partitions.

use core::fmt::{Arguments, Write};
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
use core::panic::PanicInfo;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::{Once, mutex::SpinMutex};

static LOGGER: Once<Logger> = Once::new();

struct Logger {
    sink: &'static (dyn LogSink + Sync),
    endpoint: &'static str,
}

impl Log for Logger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        writeln!(
            self.sink,
            "{}: {}: {}",
            self.endpoint,
            record.level(),
            record.args()
        );
    }

    fn flush(&self) {
        self.sink.flush();
    }
}

/// Initialises the logger, prefixing every line with the name of the endpoint we are running in.
pub fn init(
    sink: &'static (dyn LogSink + Sync),
    endpoint: &'static str,
) -> Result<(), SetLoggerError> {
    let logger = LOGGER.call_once(|| Logger { sink, endpoint });
    log::set_logger(logger)?;
    log::set_max_level(build_time_log_level());
    Ok(())
}

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    log::error!("{info}");
    let _ = smccc::psci::system_off::<smccc::Smc>();
    loop {}
}

/// Returns the logging [`LevelFilter`] set by the build-time environment variable `VAL_LOG_LEVEL`.
/// `VAL_LOG_LEVEL` can have the lower-case string values "off", "error", "warn", "info", "debug",
/// or "trace", corresponding to the named values of [`LevelFilter`]. If `VAL_LOG_LEVEL` is absent
/// or has some other value, this function returns `LevelFilter::Debug` in debug builds, otherwise
/// `LevelFilter::Info`.
pub const fn build_time_log_level() -> LevelFilter {
    let level = match option_env!("VAL_LOG_LEVEL") {
        Some(level) => level,
        None => "",
    };
    match level.as_bytes() {
        b"off" => LevelFilter::Off,
        b"error" => LevelFilter::Error,
        b"warn" => LevelFilter::Warn,
        b"info" => LevelFilter::Info,
        b"debug" => LevelFilter::Debug,
        b"trace" => LevelFilter::Trace,
        _ => {
            if cfg!(debug_assertions) {
                LevelFilter::Debug
            } else {
                LevelFilter::Info
            }
        }
    }
}

/// Something to which logs can be sent.
///
/// Note that unlike `core::fmt::Write`, the `write_fmt` method on this trait takes `&self` rather
/// than `&mut self`. This means that the implementation is responsible for handling locking if
/// necessary, or can be made lock-free.
pub trait LogSink {
    /// Writes the given format arguments to the log sink.
    fn write_fmt(&self, args: Arguments);

    /// Flushes any buffered output.
    fn flush(&self) {}
}

/// An implementation of `LogSink` that wraps around any implementation of `core::fmt::Write`.
///
/// This wraps the given writer in a spin mutex, so that partitions running on several cores can
/// share a console without interleaving their lines.
pub struct LockedWriter<W: Write> {
    writer: SpinMutex<W>,
}

impl<W: Write> LockedWriter<W> {
    /// Creates a new `LockedWriter` wrapping the given [`Write`] implementation.
    pub const fn new(writer: W) -> Self {
        Self {
            writer: SpinMutex::new(writer),
        }
    }
}

impl<W: Write> LogSink for LockedWriter<W> {
    fn write_fmt(&self, args: Arguments) {
        // Ignore errors.
        let _ = self.writer.lock().write_fmt(args);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::test::StdOutSink;
    use log::Level;

    struct RecordingSink(SpinMutex<String>);

    impl LogSink for RecordingSink {
        fn write_fmt(&self, args: Arguments) {
            self.0.lock().write_fmt(args).unwrap();
        }
    }

    #[test]
    fn lines_are_prefixed_with_endpoint() {
        static SINK: RecordingSink = RecordingSink(SpinMutex::new(String::new()));
        let logger = Logger {
            sink: &SINK,
            endpoint: "SP1",
        };

        logger.log(
            &Record::builder()
                .args(format_args!("NVM write at {:#x}", 4))
                .level(Level::Warn)
                .build(),
        );
        assert_eq!(*SINK.0.lock(), "SP1: WARN: NVM write at 0x4\n");
    }

    #[test]
    fn locked_writer_ignores_errors() {
        struct Failing;

        impl Write for Failing {
            fn write_str(&mut self, _: &str) -> core::fmt::Result {
                Err(core::fmt::Error)
            }
        }

        let sink = LockedWriter::new(Failing);
        LogSink::write_fmt(&sink, format_args!("dropped"));
    }

    #[test]
    fn init_installs_logger() {
        static STDOUT: StdOutSink = StdOutSink;
        init(&STDOUT, "VM1").unwrap();
        log::info!("logger installed");
        assert_eq!(log::max_level(), build_time_log_level());
    }
}
