use crate::{
    config::Config,
    log::{log_level::LogLevel, log_msg::LogMsg, log_sink::LogSink, logger_handle::LoggerHandle},
};

use std::{
    fs::{self, OpenOptions},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    sync::mpsc::{self, TrySendError},
    thread,
    time::{SystemTime, UNIX_EPOCH},
};

// -----------------------------------------------------------------------------
// COMPILE-TIME CONFIGURATION
// -----------------------------------------------------------------------------

/// Flush to disk every 100 lines if debugging/tracing (to see crashes near real-time).
#[cfg(feature = "log-debug")]
const FLUSH_BATCH_SIZE: u32 = 100;

/// Flush to disk every 1000 lines in production/default (to save I/O & CPU).
#[cfg(not(feature = "log-debug"))]
const FLUSH_BATCH_SIZE: u32 = 1_000;

// -----------------------------------------------------------------------------

/// Bounded, non-blocking logger that writes to a per-process log file.
///
/// A background worker thread consumes log messages from a bounded channel
/// and writes them to a file. It also forwards a sample of lines to a
/// secondary "status" channel so a presentation layer can show progress
/// without being flooded.
///
/// # Architecture
///
/// 1. **Producers**: media threads log through a cloned [`LoggerHandle`].
/// 2. **Queue**: A bounded `mpsc` channel buffers messages.
/// 3. **Consumer**: A dedicated background thread writes to disk and flushes periodically.
/// 4. **Sampler**: Warn/Error always, other levels 1-in-N, go to the status channel.
pub struct Logger {
    handle: LoggerHandle,
    status_rx: std::sync::mpsc::Receiver<String>,
    _thread: Option<std::thread::JoinHandle<()>>,
    file_path: std::path::PathBuf,
    _sample_every: u32,
}

impl Logger {
    /// Initializes the logger from the `[Logging]` section of `Config`.
    ///
    /// Uses `log_path` as the directory (falls back to `logs/` next to the
    /// executable), `log_filename` as the file prefix and `level` as the
    /// runtime threshold (default `info`).
    #[must_use]
    pub fn start_from_config(
        cap: usize,
        status_cap: usize,
        sample_every: u32,
        config: &Config,
    ) -> Self {
        let app_name = config.get_non_empty("Logging", "log_filename");
        let level = config.get_parsed_or("Logging", "level", LogLevel::Info);

        let logger = if let Some(dir_str) = config.get_non_empty("Logging", "log_path") {
            let dir = expand_path(dir_str);
            Self::start_in_dir(dir, app_name, cap, status_cap, sample_every)
        } else {
            Self::start_default(app_name, cap, status_cap, sample_every)
        };
        logger.with_min_level(level)
    }

    /// Drops every line below `level`, in this logger and in handles taken
    /// from it afterwards.
    #[must_use]
    pub fn with_min_level(mut self, level: LogLevel) -> Self {
        self.handle.min_level = level;
        self
    }

    /// Creates a `logs/` directory next to the executable and starts the logger there.
    ///
    /// # Example Filename
    /// `target/debug/logs/callmedia-20251102_023045-pid1234.log`
    #[must_use]
    pub fn start_default(
        app_name: Option<&str>,
        cap: usize,
        status_cap: usize,
        sample_every: u32,
    ) -> Self {
        let base = exe_dir_fallback_cwd().join("logs");
        Self::start_in_dir(base, app_name, cap, status_cap, sample_every)
    }

    /// Starts the logger in a specific directory.
    ///
    /// This function:
    /// 1. Creates the target directory if it is missing.
    /// 2. Generates a unique filename based on the timestamp and process ID (PID).
    /// 3. Spawns the background worker thread.
    ///
    /// # Arguments
    ///
    /// * `dir` - The directory where the log file will be created.
    /// * `app_name` - Optional prefix for the log filename.
    /// * `cap` - Capacity of the main log channel (backpressure buffer).
    /// * `status_cap` - Capacity of the status channel.
    /// * `sample_every` - Only 1 out of every N info/debug messages is sent to the status channel.
    pub fn start_in_dir<D: AsRef<Path>>(
        dir: D,
        app_name: Option<&str>,
        cap: usize,
        status_cap: usize,
        sample_every: u32,
    ) -> Self {
        let dir = dir.as_ref().to_path_buf();
        let _ = fs::create_dir_all(&dir);

        // Avoid potential modulo-by-zero later.
        let _sample_every = sample_every.max(1);

        // Calculated once to avoid code repetition.
        let ts = timestamp_for_filename();
        let pid = std::process::id();

        // Determine filename based on whether app_name is provided.
        let fname = if let Some(name) = app_name {
            format!("{}-{}-pid{}.log", name, ts, pid)
        } else {
            format!("{}-pid{}.log", ts, pid)
        };

        let file_path = dir.join(&fname);

        let (tx, rx) = mpsc::sync_channel::<LogMsg>(cap);
        let (status_tx, status_rx) = mpsc::sync_channel::<String>(status_cap);

        let handle_for_field = LoggerHandle {
            tx,
            min_level: LogLevel::Trace,
        };

        let file_path_clone = file_path.clone();

        let _thread = thread::Builder::new()
            .name("callmedia-logger".into())
            .spawn(move || {
                // Try target file -> temp file -> sink (never panic).
                let writer: Box<dyn Write + Send> = if let Ok(f) = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&file_path_clone)
                {
                    Box::new(f)
                } else {
                    let fallback = std::env::temp_dir().join("callmedia-fallback.log");
                    match OpenOptions::new().create(true).append(true).open(&fallback) {
                        Ok(f) => Box::new(f),
                        Err(_) => Box::new(io::sink()),
                    }
                };

                let mut out: BufWriter<Box<dyn Write + Send>> = BufWriter::new(writer);

                let mut n: u32 = 0;
                let mut lines_written: u32 = 0;
                let mut dropped_to_status: usize = 0;

                while let Ok(m) = rx.recv() {
                    let _ = writeln!(&mut out, "{m}");
                    lines_written = lines_written.wrapping_add(1);

                    // Flush periodically to ensure data persists on crash.
                    if lines_written.is_multiple_of(FLUSH_BATCH_SIZE) {
                        let _ = out.flush();
                    }

                    // Determine if this message should be forwarded to the status channel.
                    // Warn/Error are always forwarded; others are sampled.
                    let forward = matches!(m.level, LogLevel::Warn | LogLevel::Error) || {
                        n = n.wrapping_add(1);
                        n.is_multiple_of(sample_every)
                    };

                    if forward
                        && status_tx
                            .try_send(m.status_line())
                            .is_err()
                    {
                        dropped_to_status += 1;
                    }

                    // Report dropped status lines if the queue is backing up.
                    if dropped_to_status >= 10 {
                        let _ = status_tx.try_send(format!(
                            "(logger) status queue dropped {dropped_to_status} lines"
                        ));
                        dropped_to_status = 0;
                    }
                }

                let _ = out.flush();
            })
            .ok();

        Self {
            handle: handle_for_field,
            status_rx,
            _thread,
            file_path,
            _sample_every,
        }
    }

    /// Attempts to enqueue a log message without blocking the current thread.
    ///
    /// This method sends the message to the logger’s internal synchronous channel.
    /// If the channel is full, the message is **dropped** and an error is returned.
    ///
    /// This function never blocks.
    ///
    /// # Parameters
    /// - `level`: The severity level of the message (e.g. `Info`, `Warn`, `Error`).
    /// - `text`: Any type convertible into a `String`, containing the log message.
    /// - `target`: The static module path where the log originated.
    ///
    /// # Returns
    /// Returns `Ok(())` if the message was successfully enqueued for logging.
    /// Otherwise, returns a [`TrySendError<LogMsg>`] indicating that the internal
    /// queue was full and the message was **not sent**.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// // Assuming logger is initialized
    /// let _ = logger.try_log(LogLevel::Info, "Processing started", module_path!());
    /// ```
    pub fn try_log<S: Into<String>>(
        &self,
        level: LogLevel,
        text: S,
        target: &'static str,
    ) -> Result<(), TrySendError<LogMsg>> {
        self.handle.try_log(level, text, target)
    }

    /// Returns a cloneable handle to the logger sink.
    ///
    /// Useful for passing the logging capability to other modules or threads
    /// without transferring ownership of the main `Logger` struct.
    #[must_use]
    pub fn handle(&self) -> LoggerHandle {
        self.handle.clone()
    }

    /// Attempts to retrieve one sampled status line.
    ///
    /// Returns `None` if the status channel is empty.
    #[must_use]
    pub fn try_recv_status(&self) -> Option<String> {
        self.status_rx.try_recv().ok()
    }

    /// Returns the path of the active log file.
    ///
    /// Useful for debugging or displaying the log location to the user.
    #[must_use]
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }
}

impl LogSink for Logger {
    #[inline]
    fn log(&self, level: LogLevel, msg: &str, target: &'static str) {
        let _ = self.try_log(level, msg, target);
    }

    fn enabled(&self, level: LogLevel) -> bool {
        self.handle.enabled(level)
    }
}

/// Locates the `logs` directory next to the executable (target/{debug,release}),
/// or falls back to the current working directory on error.
fn exe_dir_fallback_cwd() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

/// Generates a human-readable timestamp for filenames without external dependencies.
///
/// Output Format: `YYYYMMDD_HHMMSS` (e.g., `20251102_023045`)
fn timestamp_for_filename() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    unix_to_utc(secs).map_or_else(
        |_| format!("unix_{secs}"), // graceful fallback, never panics
        |tm| {
            format!(
                "{:04}{:02}{:02}_{:02}{:02}{:02}",
                tm.year, tm.mon, tm.day, tm.hour, tm.min, tm.sec
            )
        },
    )
}

#[derive(Clone, Copy, Debug)]
struct SimpleUtc {
    year: i32,
    mon: u32,
    day: u32,
    hour: u32,
    min: u32,
    sec: u32,
}

#[derive(Debug)]
enum UtcConvError {
    Year,
    Month,
    Day,
}

/// Minimal UTC conversion (Civl Time) to avoid importing `chrono`.
///
/// Implements the algorithm to convert UNIX timestamp to a Gregorian date.
/// Note: not a `const fn` because it uses `Result/try_from`.
///
/// # Errors
///
/// Returns a [`UtcConvError`] if the calculated components generally overflow or
/// cannot be represented in standard integer types:
///
/// * [`UtcConvError::Year`] - If the calculated year does not fit in an `i32`.
/// * [`UtcConvError::Month`] - If the month cannot be converted to `u32` (unlikely by algorithm design).
/// * [`UtcConvError::Day`] - If the day cannot be converted to `u32` (unlikely by algorithm design).
#[allow(clippy::missing_const_for_fn, clippy::many_single_char_names)]
fn unix_to_utc(mut s: u64) -> Result<SimpleUtc, UtcConvError> {
    use std::convert::TryFrom;

    let sec = (s % 60) as u32;
    s /= 60;
    let min = (s % 60) as u32;
    s /= 60;
    let hour = (s % 24) as u32;
    s /= 24;

    // Use i128 to prevent overflow during intermediate calculations.
    let z: i128 = i128::from(s) + 719_468;

    let era = (if z >= 0 { z } else { z - 146_096 }) / 146_097;
    let doe = z - era * 146_097; // [0, 146096]
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100); // [0, 365]
    let mp = (5 * doy + 2) / 153; // [0, 11]
    let d = doy - (153 * mp + 2) / 5 + 1; // [1, 31]
    let m = mp + if mp < 10 { 3 } else { -9 }; // [1, 12]

    let year_i = y + i128::from(m <= 2);

    let year = i32::try_from(year_i).map_err(|_| UtcConvError::Year)?;
    let mon = u32::try_from(m).map_err(|_| UtcConvError::Month)?;
    let day = u32::try_from(d).map_err(|_| UtcConvError::Day)?;

    Ok(SimpleUtc {
        year,
        mon,
        day,
        hour,
        min,
        sec,
    })
}

/// Expands tilde (`~`) in file paths to the user's home directory.
fn expand_path(path_str: &str) -> PathBuf {
    if path_str.starts_with("~") {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .ok()
            .map(PathBuf::from);

        if let Some(mut home_path) = home {
            if path_str == "~" {
                return home_path;
            }
            if path_str.starts_with("~/") || path_str.starts_with("~\\") {
                home_path.push(&path_str[2..]);
                return home_path;
            }
        }
    }
    PathBuf::from(path_str)
}
