//! Occurrence records
//!
//! An [`Occurrence`] is one captured failure (panic, reported error or fatal
//! signal) in the shape the Squash notify API expects. Building an occurrence
//! is pure: it walks the captured frames and formats strings, nothing else.
//!
//! ## Frame order
//!
//! Captures arrive innermost frame first (the faulting function at index 0),
//! which is how `std::backtrace` renders and how a stack walk proceeds. The
//! notify API wants the outermost caller first, so every builder reverses the
//! raw frames before storing them.

use std::backtrace::Backtrace;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, Local, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::signals::signal_name;

/// Name of the single thread entry every occurrence carries
pub const CRASHED_THREAD: &str = "Crashed Thread";

/// Class name used for panics reaching the panic hook
pub const PANIC_CLASS: &str = "panic";

/// Leading frames that belong to the capture machinery, not the application
const CAPTURE_FRAME_PREFIXES: &[&str] = &[
    "std::backtrace",
    "std::panicking",
    "core::panicking",
    "rust_begin_unwind",
    "__rustc::",
    "squash_core::occurrence::",
    "squash_core::interceptor::",
    "squash_core::client::SquashClient::record_error",
];

/// One stack frame as captured, before path normalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub file: String,
    pub line: u32,
    pub symbol: String,
}

impl RawFrame {
    pub fn new(file: impl Into<String>, line: u32, symbol: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line,
            symbol: symbol.into(),
        }
    }
}

/// One stack frame as reported to Squash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub file: String,
    pub line: u32,
    pub symbol: String,
}

/// A named thread and its backtrace, outermost caller first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadBacktrace {
    pub name: String,
    pub faulted: bool,
    pub backtrace: Vec<Frame>,
}

/// A failure handed to the builder: what went wrong and where
#[derive(Debug, Clone)]
pub struct ExceptionInfo {
    pub class_name: String,
    pub message: String,
    /// Innermost frame first
    pub frames: Vec<RawFrame>,
}

impl ExceptionInfo {
    pub fn new(
        class_name: impl Into<String>,
        message: impl Into<String>,
        frames: Vec<RawFrame>,
    ) -> Self {
        Self {
            class_name: class_name.into(),
            message: message.into(),
            frames,
        }
    }
}

/// A captured failure ready to be enriched and queued
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Occurrence {
    #[serde(rename = "UUID")]
    pub id: Uuid,
    pub class_name: String,
    pub message: String,
    pub backtraces: Vec<ThreadBacktrace>,
    pub occurred_at: DateTime<FixedOffset>,
    /// Fields attached at record time (identity, process and platform data)
    #[serde(skip)]
    pub context: serde_json::Map<String, serde_json::Value>,
}

impl Occurrence {
    fn new(
        class_name: String,
        message: String,
        backtrace: Vec<Frame>,
        utc_offset: FixedOffset,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            class_name,
            message,
            backtraces: vec![ThreadBacktrace {
                name: CRASHED_THREAD.to_string(),
                faulted: true,
                backtrace,
            }],
            occurred_at: Utc::now().with_timezone(&utc_offset),
            context: serde_json::Map::new(),
        }
    }

    /// Flatten into the JSON object that is stored and transmitted
    ///
    /// Context entries are merged after the built-in fields and win on
    /// conflicts.
    pub fn to_payload(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut payload = match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        for (key, value) in &self.context {
            payload.insert(key.clone(), value.clone());
        }
        payload
    }
}

/// Builds occurrences, normalizing frame paths against a base directory
///
/// The local UTC offset is read once, when the builder is made, so that
/// stamping an occurrence never consults time-zone data.
#[derive(Debug, Clone)]
pub struct OccurrenceBuilder {
    base_dir: Option<PathBuf>,
    utc_offset: FixedOffset,
}

impl Default for OccurrenceBuilder {
    fn default() -> Self {
        Self {
            base_dir: None,
            utc_offset: *Local::now().offset(),
        }
    }
}

impl OccurrenceBuilder {
    /// Builder rooted at the directory holding the running executable
    pub fn for_current_process() -> Self {
        Self {
            base_dir: script_dir(),
            ..Self::default()
        }
    }

    /// Builder rooted at an explicit directory
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
            ..Self::default()
        }
    }

    pub fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }

    pub fn from_exception(&self, info: &ExceptionInfo) -> Occurrence {
        Occurrence::new(
            info.class_name.clone(),
            info.message.clone(),
            self.backtrace(&info.frames),
            self.utc_offset,
        )
    }

    /// Occurrence for a fatal signal; message and class name are both the
    /// signal's display name.
    pub fn from_signal(&self, signal_number: i32, frames: &[RawFrame]) -> Occurrence {
        let name = signal_name(signal_number);
        Occurrence::new(name.clone(), name, self.backtrace(frames), self.utc_offset)
    }

    /// Occurrence for a panic. When the backtrace is unavailable the panic
    /// location stands in as the only frame.
    pub fn from_panic(
        &self,
        message: String,
        location: Option<RawFrame>,
        frames: &[RawFrame],
    ) -> Occurrence {
        let backtrace = match (&location, frames.is_empty()) {
            (Some(location), true) => self.backtrace(std::slice::from_ref(location)),
            _ => self.backtrace(frames),
        };
        Occurrence::new(PANIC_CLASS.to_string(), message, backtrace, self.utc_offset)
    }

    fn backtrace(&self, innermost_first: &[RawFrame]) -> Vec<Frame> {
        innermost_first
            .iter()
            .rev()
            .map(|raw| Frame {
                file: match &self.base_dir {
                    Some(base) => relative_path(&raw.file, base),
                    None => raw.file.clone(),
                },
                line: raw.line,
                symbol: raw.symbol.clone(),
            })
            .collect()
    }
}

/// Rewrite an absolute path below `base` as a path relative to it
pub fn relative_path(path: &str, base: &Path) -> String {
    let candidate = Path::new(path);
    if !candidate.is_absolute() {
        return path.to_string();
    }
    match candidate.strip_prefix(base) {
        Ok(rel) if !rel.as_os_str().is_empty() => rel.to_string_lossy().into_owned(),
        _ => path.to_string(),
    }
}

/// Directory containing the starting executable, made absolute
fn script_dir() -> Option<PathBuf> {
    let argv0 = PathBuf::from(std::env::args_os().next()?);
    let absolute = if argv0.is_absolute() {
        argv0
    } else {
        std::env::current_dir().ok()?.join(argv0)
    };
    absolute.parent().map(Path::to_path_buf)
}

/// Capture the calling thread's frames, innermost first
pub fn capture_current_frames() -> Vec<RawFrame> {
    capture_frames(&Backtrace::force_capture())
}

/// Parse a rendered backtrace into frames, innermost first
///
/// Frames belonging to the capture machinery at the top of the stack are
/// dropped. A disabled or unsupported backtrace yields no frames.
pub fn capture_frames(backtrace: &Backtrace) -> Vec<RawFrame> {
    let frames = parse_backtrace(&backtrace.to_string());
    let skip = frames
        .iter()
        .take_while(|f| {
            CAPTURE_FRAME_PREFIXES
                .iter()
                .any(|prefix| f.symbol.starts_with(prefix))
        })
        .count();
    frames.into_iter().skip(skip).collect()
}

/// Parse the `N: symbol` / `at file:line:col` rendering of `std::backtrace`
pub fn parse_backtrace(rendered: &str) -> Vec<RawFrame> {
    let mut frames: Vec<RawFrame> = Vec::new();

    for line in rendered.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("note:") {
            continue;
        }

        if let Some(location) = line.strip_prefix("at ") {
            if let Some(frame) = frames.last_mut() {
                let (file, line_no) = split_location(location);
                frame.file = file;
                frame.line = line_no;
            }
            continue;
        }

        let symbol = match line.split_once(": ") {
            Some((index, symbol)) if index.chars().all(|c| c.is_ascii_digit()) => symbol,
            // Inlined symbols share the frame index and are printed unnumbered
            _ if !frames.is_empty() => line,
            _ => continue,
        };
        frames.push(RawFrame::new("<unknown>", 0, symbol.trim()));
    }

    frames
}

/// Split `file:line:col` (or `file:line`) from the right
fn split_location(location: &str) -> (String, u32) {
    let mut parts = location.rsplitn(3, ':');
    let last = parts.next().unwrap_or_default();
    let middle = parts.next();
    let rest = parts.next();

    match (rest, middle) {
        (Some(file), Some(line)) if line.parse::<u32>().is_ok() => {
            (file.to_string(), line.parse().unwrap_or(0))
        }
        (_, Some(file)) if last.parse::<u32>().is_ok() => {
            let file = match rest {
                Some(prefix) => format!("{}:{}", prefix, file),
                None => file.to_string(),
            };
            (file, last.parse().unwrap_or(0))
        }
        _ => (location.to_string(), 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exception_backtrace_is_reversed() {
        // Captured innermost first: inner() raised, outer() called it.
        let info = ExceptionInfo::new(
            "STBoomException",
            "boom",
            vec![
                RawFrame::new("a.py", 20, "inner"),
                RawFrame::new("a.py", 10, "outer"),
            ],
        );
        let occ = OccurrenceBuilder::default().from_exception(&info);

        assert_eq!(occ.class_name, "STBoomException");
        assert_eq!(occ.message, "boom");
        assert_eq!(occ.backtraces.len(), 1);
        let thread = &occ.backtraces[0];
        assert_eq!(thread.name, "Crashed Thread");
        assert!(thread.faulted);
        assert_eq!(
            thread.backtrace,
            vec![
                Frame {
                    file: "a.py".to_string(),
                    line: 10,
                    symbol: "outer".to_string()
                },
                Frame {
                    file: "a.py".to_string(),
                    line: 20,
                    symbol: "inner".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_deep_chain_keeps_every_frame() {
        let raw: Vec<RawFrame> = (0..25)
            .map(|i| RawFrame::new("deep.rs", i, format!("f{}", i)))
            .collect();
        let occ = OccurrenceBuilder::default().from_exception(&ExceptionInfo::new(
            "Deep",
            "deep",
            raw.clone(),
        ));
        let stored = &occ.backtraces[0].backtrace;
        assert_eq!(stored.len(), raw.len());
        for (stored, raw) in stored.iter().zip(raw.iter().rev()) {
            assert_eq!(stored.symbol, raw.symbol);
            assert_eq!(stored.line, raw.line);
        }
    }

    #[test]
    fn test_signal_occurrence_uses_display_name() {
        let occ = OccurrenceBuilder::default().from_signal(
            libc::SIGSEGV,
            &[RawFrame::new("main.rs", 3, "main")],
        );
        assert_eq!(occ.message, "SIGSEGV (Segmentation Violation)");
        assert_eq!(occ.class_name, occ.message);

        let occ = OccurrenceBuilder::default().from_signal(99, &[]);
        assert_eq!(occ.message, "Signal 99");
        assert!(occ.backtraces[0].backtrace.is_empty());
    }

    #[test]
    fn test_panic_falls_back_to_location() {
        let occ = OccurrenceBuilder::default().from_panic(
            "oh no".to_string(),
            Some(RawFrame::new("src/main.rs", 7, "<panic location>")),
            &[],
        );
        assert_eq!(occ.class_name, PANIC_CLASS);
        assert_eq!(occ.backtraces[0].backtrace.len(), 1);
        assert_eq!(occ.backtraces[0].backtrace[0].line, 7);
    }

    #[test]
    fn test_ids_are_unique_and_ordered() {
        let builder = OccurrenceBuilder::default();
        let a = builder.from_signal(libc::SIGABRT, &[]);
        let b = builder.from_signal(libc::SIGABRT, &[]);
        assert_ne!(a.id, b.id);
        assert!(a.id < b.id);
    }

    #[test]
    fn test_paths_below_base_become_relative() {
        let builder = OccurrenceBuilder::with_base_dir("/opt/app");
        let occ = builder.from_exception(&ExceptionInfo::new(
            "E",
            "m",
            vec![
                RawFrame::new("/opt/app/src/lib.rs", 1, "inner"),
                RawFrame::new("/usr/lib/rust/core.rs", 2, "outer"),
            ],
        ));
        let files: Vec<_> = occ.backtraces[0]
            .backtrace
            .iter()
            .map(|f| f.file.as_str())
            .collect();
        assert_eq!(files, vec!["/usr/lib/rust/core.rs", "src/lib.rs"]);
    }

    #[test]
    fn test_relative_path_requires_whole_components() {
        let base = Path::new("/opt/app");
        assert_eq!(relative_path("/opt/application/x.rs", base), "/opt/application/x.rs");
        assert_eq!(relative_path("already/relative.rs", base), "already/relative.rs");
        assert_eq!(relative_path("/opt/app/x.rs", base), "x.rs");
    }

    #[test]
    fn test_payload_merges_context_last() {
        let mut occ = OccurrenceBuilder::default().from_exception(&ExceptionInfo::new(
            "E",
            "original",
            vec![],
        ));
        occ.context
            .insert("api_key".to_string(), serde_json::json!("abc"));
        occ.context
            .insert("message".to_string(), serde_json::json!("overridden"));

        let payload = occ.to_payload();
        assert_eq!(payload["UUID"], occ.id.to_string());
        assert_eq!(payload["api_key"], "abc");
        assert_eq!(payload["message"], "overridden");
        assert_eq!(payload["backtraces"][0]["name"], "Crashed Thread");
        assert!(payload["occurred_at"].is_string());
    }

    #[test]
    fn test_parse_std_backtrace_rendering() {
        let rendered = "   0: std::backtrace::Backtrace::force_capture
             at /rustc/abc/library/std/src/backtrace.rs:312:13
   1: app::inner
             at ./src/main.rs:20:5
   2: app::outer
             at ./src/main.rs:10:5
   3: main
note: Some details are omitted, run with `RUST_BACKTRACE=full` for a verbose backtrace.
";
        let frames = parse_backtrace(rendered);
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[1], RawFrame::new("./src/main.rs", 20, "app::inner"));
        assert_eq!(frames[3], RawFrame::new("<unknown>", 0, "main"));
    }

    #[test]
    fn test_parse_disabled_backtrace_is_empty() {
        assert!(parse_backtrace("disabled backtrace").is_empty());
        assert!(parse_backtrace("unsupported backtrace").is_empty());
    }

    #[test]
    fn test_split_location_without_column() {
        assert_eq!(split_location("src/x.rs:12"), ("src/x.rs".to_string(), 12));
        assert_eq!(split_location("src/x.rs:12:3"), ("src/x.rs".to_string(), 12));
        assert_eq!(split_location("C:\\x.rs:4:1"), ("C:\\x.rs".to_string(), 4));
    }
}
