//! The Squash client
//!
//! [`SquashClient`] is the explicit context object shared by the
//! interceptor and the delivery loop: it owns the configuration, the
//! occurrence queue and the platform facts collected at startup.
//!
//! Recording happens in two steps. Building an occurrence is fast and pure
//! (see [`crate::occurrence`]); [`SquashClient::record`] then redacts the
//! message, attaches identity, process and platform context, and persists
//! the result. Process and platform context (arguments, environment, pid,
//! uname) is snapshotted when the client is created, so recording from a
//! signal handler does not touch the environment lock or query the host.
//! Once persisted an occurrence is never touched again except to
//! be deleted.

use std::path::PathBuf;
use std::time::Duration;

use chrono::SecondsFormat;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::config::{home_dir, ClientConfig};
use crate::delivery::{deliver_pending, ReportSummary};
use crate::error::{Error, Result};
use crate::occurrence::{capture_current_frames, ExceptionInfo, Occurrence, OccurrenceBuilder};
use crate::platform::PlatformInfo;
use crate::queue::OccurrenceQueue;
use crate::redact::redact_message;
use crate::transport::{HttpTransport, Transport};

/// Identifies this client implementation to the server
pub const CLIENT_NAME: &str = "squash_rust";

pub struct SquashClient {
    config: ClientConfig,
    queue: OccurrenceQueue,
    builder: OccurrenceBuilder,
    process_context: Map<String, Value>,
    home: Option<PathBuf>,
}

impl SquashClient {
    /// Create a client; collects platform facts once, up front.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_builder(config, OccurrenceBuilder::for_current_process())
    }

    /// Create a client with a specific occurrence builder
    pub fn with_builder(config: ClientConfig, builder: OccurrenceBuilder) -> Self {
        let queue = OccurrenceQueue::at(config.occurrence_folder());
        Self {
            config,
            queue,
            builder,
            process_context: process_context(&PlatformInfo::collect()),
            home: Some(home_dir()),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn queue(&self) -> &OccurrenceQueue {
        &self.queue
    }

    pub fn builder(&self) -> &OccurrenceBuilder {
        &self.builder
    }

    pub fn is_disabled(&self) -> bool {
        self.config.disabled
    }

    /// Whether occurrences of `class_name` are suppressed
    pub fn is_ignored(&self, class_name: &str) -> bool {
        self.config.ignored_exceptions.contains(class_name)
    }

    /// Enrich an occurrence with context and persist it
    pub fn record(&self, mut occurrence: Occurrence) -> Result<Uuid> {
        occurrence.message = redact_message(
            &occurrence.message,
            &self.config.filter_strings,
            self.home.as_deref(),
        );
        occurrence.context = self.context_for(&occurrence);
        self.queue.enqueue(&occurrence)
    }

    /// Record a failure the application handled itself
    ///
    /// Returns `Ok(None)` when the client is disabled or the class name is
    /// ignored.
    pub fn record_exception(&self, info: &ExceptionInfo) -> Result<Option<Uuid>> {
        if self.is_disabled() || self.is_ignored(&info.class_name) {
            tracing::debug!(class_name = %info.class_name, "Skipping occurrence");
            return Ok(None);
        }
        let occurrence = self.builder.from_exception(info);
        self.record(occurrence).map(Some)
    }

    /// Record an error value, capturing the caller's stack
    ///
    /// The class name is the error type's name without its module path.
    pub fn record_error<E>(&self, error: &E) -> Result<Option<Uuid>>
    where
        E: std::error::Error + ?Sized,
    {
        let info = ExceptionInfo::new(
            short_type_name(std::any::type_name::<E>()),
            error.to_string(),
            capture_current_frames(),
        );
        self.record_exception(&info)
    }

    /// Record a fatal signal
    pub fn record_signal(&self, signal_number: i32) -> Result<Option<Uuid>> {
        if self.is_disabled() {
            return Ok(None);
        }
        let occurrence = self
            .builder
            .from_signal(signal_number, &capture_current_frames());
        self.record(occurrence).map(Some)
    }

    /// Send every queued occurrence through `transport`
    pub fn report_errors(&self, transport: &dyn Transport) -> Result<ReportSummary> {
        if self.is_disabled() {
            return Ok(ReportSummary::default());
        }
        deliver_pending(&self.queue, &self.config.notify_path, transport)
    }

    /// Send every queued occurrence to the configured host over HTTP
    pub fn report_errors_http(&self) -> Result<ReportSummary> {
        if self.is_disabled() {
            return Ok(ReportSummary::default());
        }
        let transport = self.http_transport()?;
        self.report_errors(&transport)
    }

    /// HTTP transport for the configured host and timeout
    pub fn http_transport(&self) -> Result<HttpTransport> {
        let host = self
            .config
            .host
            .as_deref()
            .ok_or(Error::MissingConfig("a host"))?;
        HttpTransport::new(host, Some(Duration::from_secs(self.config.timeout_secs)))
    }

    fn context_for(&self, occurrence: &Occurrence) -> Map<String, Value> {
        let config = &self.config;
        let mut context = Map::new();

        context.insert("api_key".to_string(), json!(config.api_key));
        context.insert("environment".to_string(), json!(config.environment));
        context.insert("client".to_string(), json!(CLIENT_NAME));
        context.insert(
            "occurred_at".to_string(),
            json!(occurrence
                .occurred_at
                .to_rfc3339_opts(SecondsFormat::Micros, false)),
        );
        context.insert("revision".to_string(), json!(config.revision));

        for (key, value) in &self.process_context {
            context.insert(key.clone(), value.clone());
        }

        if let Some(version) = &config.version {
            context.insert("version".to_string(), json!(version));
        }
        if let Some(build) = &config.build {
            context.insert("build".to_string(), json!(build));
        }

        for (key, value) in &config.extra {
            context.insert(key.clone(), value.clone());
        }
        context
    }
}

/// Arguments, environment, pid and platform facts of the running process
fn process_context(platform: &PlatformInfo) -> Map<String, Value> {
    let mut context = Map::new();
    context.insert(
        "arguments".to_string(),
        json!(std::env::args_os()
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>()),
    );
    let env_vars: Map<String, Value> = std::env::vars_os()
        .map(|(k, v)| {
            (
                k.to_string_lossy().into_owned(),
                Value::String(v.to_string_lossy().into_owned()),
            )
        })
        .collect();
    context.insert("env_vars".to_string(), Value::Object(env_vars));
    context.insert("pid".to_string(), json!(std::process::id()));

    if let Ok(Value::Object(platform)) = serde_json::to_value(platform) {
        context.extend(platform);
    }
    context
}

/// `my_app::errors::Boom<T>` -> `Boom`
fn short_type_name(full: &str) -> String {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::occurrence::RawFrame;
    use tempfile::TempDir;

    #[derive(Debug)]
    struct StBoomError;

    impl std::fmt::Display for StBoomError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "boom")
        }
    }

    impl std::error::Error for StBoomError {}

    fn client(root: &TempDir) -> SquashClient {
        let config = ClientConfig {
            host: Some("https://squash.example.com".to_string()),
            api_key: Some("key".to_string()),
            environment: Some("test".to_string()),
            revision: Some("cafebabe".to_string()),
            occurrence_root: root.path().to_path_buf(),
            ..Default::default()
        };
        SquashClient::with_builder(config, OccurrenceBuilder::default())
    }

    #[test]
    fn test_record_attaches_context() {
        let dir = TempDir::new().unwrap();
        let mut client = client(&dir);
        client.config.version = Some("1.2".to_string());
        client
            .config
            .extra
            .insert("environment".to_string(), json!("overridden"));

        let id = client
            .record_exception(&ExceptionInfo::new(
                "Boom",
                "boom",
                vec![RawFrame::new("a.rs", 1, "f")],
            ))
            .unwrap()
            .unwrap();

        let record = client.queue().read(id).unwrap();
        assert_eq!(record["UUID"], id.to_string());
        assert_eq!(record["api_key"], "key");
        assert_eq!(record["client"], CLIENT_NAME);
        assert_eq!(record["revision"], "cafebabe");
        assert_eq!(record["version"], "1.2");
        assert!(record.get("build").is_none());
        assert_eq!(record["environment"], "overridden");
        assert_eq!(record["pid"], std::process::id());
        assert!(record["arguments"].is_array());
        assert!(record["env_vars"].is_object());
        assert!(record["device_id"].is_string());
        assert_eq!(record["backtraces"][0]["faulted"], true);
    }

    #[test]
    fn test_process_context_is_snapshotted_at_construction() {
        let dir = TempDir::new().unwrap();
        let client = client(&dir);
        std::env::set_var("SQUASH_CLIENT_TEST_LATE_VAR", "1");

        let id = client.record_signal(libc::SIGABRT).unwrap().unwrap();
        let record = client.queue().read(id).unwrap();
        std::env::remove_var("SQUASH_CLIENT_TEST_LATE_VAR");

        assert!(record["env_vars"].is_object());
        assert!(record["env_vars"].get("SQUASH_CLIENT_TEST_LATE_VAR").is_none());
        assert_eq!(record["pid"], std::process::id());
        assert_eq!(record["operating_system"], std::env::consts::OS);
    }

    #[test]
    fn test_record_redacts_before_persisting() {
        let dir = TempDir::new().unwrap();
        let mut client = client(&dir);
        client.config.filter_strings = vec!["s3cret".to_string()];

        let id = client
            .record_exception(&ExceptionInfo::new("E", "token s3cret leaked", vec![]))
            .unwrap()
            .unwrap();

        let raw = std::fs::read_to_string(client.queue().folder().join(id.to_string())).unwrap();
        assert!(!raw.contains("s3cret"));
        assert_eq!(client.queue().read(id).unwrap()["message"], "token [REDACTED] leaked");
    }

    #[test]
    fn test_ignored_and_disabled_are_skipped() {
        let dir = TempDir::new().unwrap();
        let mut client = client(&dir);
        client.config.ignored_exceptions.insert("StBoomError".to_string());

        assert_eq!(client.record_error(&StBoomError).unwrap(), None);

        client.config.ignored_exceptions.clear();
        client.config.disabled = true;
        assert_eq!(client.record_error(&StBoomError).unwrap(), None);
        assert_eq!(client.record_signal(libc::SIGABRT).unwrap(), None);
        assert!(client.queue().list_pending().unwrap().is_empty());
    }

    #[test]
    fn test_record_error_uses_short_type_name() {
        let dir = TempDir::new().unwrap();
        let client = client(&dir);
        let id = client.record_error(&StBoomError).unwrap().unwrap();
        let record = client.queue().read(id).unwrap();
        assert_eq!(record["class_name"], "StBoomError");
        assert_eq!(record["message"], "boom");
    }

    #[test]
    fn test_record_signal_names_the_signal() {
        let dir = TempDir::new().unwrap();
        let client = client(&dir);
        let id = client.record_signal(libc::SIGABRT).unwrap().unwrap();
        assert_eq!(client.queue().read(id).unwrap()["class_name"], "SIGABRT (Aborted)");
    }

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name("app::errors::Boom"), "Boom");
        assert_eq!(short_type_name("std::io::Error"), "Error");
        assert_eq!(short_type_name("app::Wrapper<core::fmt::Error>"), "Wrapper");
        assert_eq!(short_type_name("dyn core::error::Error"), "Error");
    }

    #[test]
    fn test_http_transport_needs_host() {
        let dir = TempDir::new().unwrap();
        let mut client = client(&dir);
        client.config.host = None;
        assert!(matches!(
            client.http_transport(),
            Err(Error::MissingConfig("a host"))
        ));
    }
}
