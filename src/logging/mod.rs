//! Logging and user-facing output
//!
//! This module provides the [`Logger`] for controlling output verbosity and
//! formatting, the [`ProgressBar`] used for blob transfers, and
//! [`init_tracing`] which routes the library's `tracing` events to stderr.

use std::io::{self, Write};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Minimum time between two progress redraws
pub const PROGRESS_REDRAW_INTERVAL: Duration = Duration::from_millis(100);
const PROGRESS_BAR_WIDTH: usize = 40;

/// Install the `tracing` subscriber.
///
/// `RUST_LOG` wins when set; otherwise `warn`, or `debug` with `--verbose`.
pub fn init_tracing(verbose: bool) {
    let default_level = if verbose { "image_courier=debug,warn" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

/// Logger responsible for all user-visible output
#[derive(Debug, Clone)]
pub struct Logger {
    pub verbose: bool,
    pub quiet: bool,
    pub start_time: Option<Instant>,
}

impl Logger {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            quiet: false,
            start_time: Some(Instant::now()),
        }
    }

    pub fn new_quiet() -> Self {
        Self {
            verbose: false,
            quiet: true,
            start_time: Some(Instant::now()),
        }
    }

    /// Main section heading
    pub fn section(&self, title: &str) {
        if !self.quiet {
            println!("\n=== {} ===", title);
        }
    }

    /// Information message
    pub fn info(&self, message: &str) {
        if !self.quiet {
            println!("ℹ️  {}", message);
        }
    }

    /// Success message
    pub fn success(&self, message: &str) {
        if !self.quiet {
            println!("✅ {}", message);
        }
    }

    /// Warning message
    pub fn warning(&self, message: &str) {
        if !self.quiet {
            println!("⚠️  WARNING: {}", message);
        }
    }

    /// Error message, shown even in quiet mode
    pub fn error(&self, message: &str) {
        eprintln!("❌ ERROR: {}", message);
    }

    /// Step information
    pub fn step(&self, message: &str) {
        if !self.quiet {
            println!("▶️  {}", message);
        }
    }

    /// Detailed information (only shown in verbose mode)
    pub fn detail(&self, message: &str) {
        if self.verbose && !self.quiet {
            println!("   {}", message);
        }
    }

    /// Titled block of aligned `key: value` lines
    pub fn summary_kv(&self, title: &str, items: &[(&str, String)]) {
        if !self.quiet {
            println!("\n--- {} ---", title);
            for line in summary_lines(items) {
                println!("{}", line);
            }
        }
    }

    /// Plain list, one item per line; always printed since it is command output
    pub fn list(&self, items: &[String]) {
        for item in items {
            println!("  {}", item);
        }
    }

    /// Time since the logger was created
    pub fn elapsed(&self) -> Duration {
        self.start_time.map(|t| t.elapsed()).unwrap_or_default()
    }

    pub fn progress_bar(&self, label: impl Into<String>) -> ProgressBar {
        ProgressBar::new(label, self.quiet)
    }

    /// Format file size in human-readable units
    pub fn format_size(&self, bytes: u64) -> String {
        format_size(bytes)
    }

    /// Format duration in human-readable format
    pub fn format_duration(&self, duration: Duration) -> String {
        let secs = duration.as_secs();
        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m{}s", secs / 60, secs % 60)
        } else {
            format!("{}h{}m{}s", secs / 3600, (secs % 3600) / 60, secs % 60)
        }
    }

    /// Average rate for `bytes` moved in `elapsed`
    pub fn format_speed(&self, bytes: u64, elapsed: Duration) -> String {
        let secs = elapsed.as_secs_f64();
        if secs < 0.001 {
            return "-".to_string();
        }
        format!("{}/s", format_size((bytes as f64 / secs) as u64))
    }
}

fn summary_lines(items: &[(&str, String)]) -> Vec<String> {
    let width = items.iter().map(|(key, _)| key.len()).max().unwrap_or(0) + 1;
    items
        .iter()
        .map(|(key, value)| format!("  {:<width$} {}", format!("{}:", key), value, width = width))
        .collect()
}

pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Single-line transfer progress.
///
/// Redraws at most once per [`PROGRESS_REDRAW_INTERVAL`]; the completed state
/// and [`ProgressBar::finish`] always draw.
#[derive(Debug)]
pub struct ProgressBar {
    label: String,
    quiet: bool,
    last_draw: Option<Instant>,
    done: u64,
    total: Option<u64>,
}

impl ProgressBar {
    pub fn new(label: impl Into<String>, quiet: bool) -> Self {
        Self {
            label: label.into(),
            quiet,
            last_draw: None,
            done: 0,
            total: None,
        }
    }

    /// Record progress and redraw if the rate limit allows it
    pub fn update(&mut self, done: u64, total: Option<u64>) {
        self.done = done;
        self.total = total;
        let complete = total.is_some_and(|t| done >= t);
        if self.should_draw(Instant::now(), complete) && !self.quiet {
            print!("\r{}", self.render());
            let _ = io::stdout().flush();
        }
    }

    /// Draw the final state and end the line
    pub fn finish(&mut self) {
        if self.total.is_none() {
            self.total = Some(self.done);
        }
        if !self.quiet {
            println!("\r{}", self.render());
        }
    }

    fn should_draw(&mut self, now: Instant, complete: bool) -> bool {
        let due = match self.last_draw {
            Some(last) => now.duration_since(last) >= PROGRESS_REDRAW_INTERVAL,
            None => true,
        };
        if due || complete {
            self.last_draw = Some(now);
            return true;
        }
        false
    }

    /// `[████░░░░] label 12.0 MB / 30.0 MB`; unknown totals show only the byte count
    pub fn render(&self) -> String {
        match self.total {
            Some(total) if total > 0 => {
                let ratio = (self.done as f64 / total as f64).min(1.0);
                let filled = (ratio * PROGRESS_BAR_WIDTH as f64) as usize;
                format!(
                    "[{}{}] {} {} / {}",
                    "█".repeat(filled),
                    "░".repeat(PROGRESS_BAR_WIDTH - filled),
                    self.label,
                    format_size(self.done),
                    format_size(total)
                )
            }
            Some(_) => format!("[{}] {} {}", "█".repeat(PROGRESS_BAR_WIDTH), self.label, format_size(self.done)),
            None => format!("[{}] {} {}", "░".repeat(PROGRESS_BAR_WIDTH), self.label, format_size(self.done)),
        }
    }
}
