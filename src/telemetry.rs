//! Structured telemetry pipeline for protocol and runtime violations.
//!
//! The game loop never fails: a frame for the wrong phase, a result from an
//! unbound controller or a command that ran out of retries is reported and the
//! game continues. Reports are structured data rather than bare log lines, so
//! they can be:
//!
//! - Logged via tracing (default behavior)
//! - Collected programmatically for testing
//! - Sent to custom observers (metrics, alerting, etc.)
//!
//! # Example
//!
//! ```
//! use reflex_duel::telemetry::{CollectingObserver, ViolationObserver};
//! use std::sync::Arc;
//!
//! let observer = Arc::new(CollectingObserver::new());
//! let as_dyn: Option<Arc<dyn ViolationObserver>> = Some(observer.clone());
//!
//! // ... hand `as_dyn` to an orchestrator, run it ...
//! assert!(observer.violations().is_empty(), "unexpected violations");
//! ```

use crate::DeviceId;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Severity of a violation.
///
/// Severities are ordered from least to most severe, allowing filtering
/// and comparison operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    /// Expected on a lossy link; the event was ignored.
    ///
    /// Example: a result arriving for a slot that already finished.
    Warning,
    /// The game continued but a player-visible cue was lost.
    ///
    /// Example: a reliable command exhausted its retries.
    Error,
    /// Internal bookkeeping is inconsistent.
    Critical,
}

impl ViolationSeverity {
    /// Returns a string representation suitable for logging/metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Categories of violations.
///
/// # Forward Compatibility
///
/// This enum is marked `#[non_exhaustive]` because new categories may be added.
/// Always include a wildcard arm when matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ViolationKind {
    /// The link delivered something that could not be used.
    ///
    /// Examples:
    /// - A checksum-valid frame with an unknown command code
    /// - A transport send failure
    Transport,
    /// A well-formed message arrived in the wrong context.
    ///
    /// Examples:
    /// - A result outside the collecting phases
    /// - A frame from a device that holds no slot
    /// - A duplicate result
    Protocol,
    /// Reliable delivery gave up on a command.
    Delivery,
    /// A join request that could not be honoured.
    Join,
    /// A timing measurement was clamped or timed out.
    Timing,
    /// Configuration constraint violated at runtime.
    Configuration,
    /// The render boundary could not be acquired in time.
    Boundary,
    /// Internal logic error (should never happen).
    InternalError,
}

impl ViolationKind {
    /// Returns a string representation suitable for logging/metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Protocol => "protocol",
            Self::Delivery => "delivery",
            Self::Join => "join",
            Self::Timing => "timing",
            Self::Configuration => "configuration",
            Self::Boundary => "boundary",
            Self::InternalError => "internal_error",
        }
    }
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded violation.
///
/// # Serialization
///
/// This type implements `serde::Serialize` for structured JSON output. The
/// device is serialized as its raw address, or `null`.
///
/// # Example
///
/// ```
/// use reflex_duel::telemetry::{Violation, ViolationKind, ViolationSeverity};
/// use reflex_duel::DeviceId;
///
/// let violation = Violation::new(
///     ViolationSeverity::Warning,
///     ViolationKind::Protocol,
///     "result for finished slot",
///     "orchestrator.rs:42",
/// )
/// .with_device(DeviceId::STICK2)
/// .with_context("slot", "2");
///
/// assert_eq!(violation.device, Some(DeviceId::STICK2));
/// assert!(violation.to_string().contains("device=stick2"));
/// ```
#[derive(Debug, Clone, serde::Serialize)]
pub struct Violation {
    /// The severity level of this violation.
    pub severity: ViolationSeverity,
    /// The category where the violation occurred.
    pub kind: ViolationKind,
    /// Human-readable description of what went wrong.
    pub message: String,
    /// Source location where the violation was detected (file:line).
    pub location: &'static str,
    /// The device involved, if any.
    pub device: Option<DeviceId>,
    /// Additional structured context as key-value pairs.
    pub context: BTreeMap<String, String>,
}

impl Violation {
    /// Creates a new violation.
    #[must_use]
    pub fn new(
        severity: ViolationSeverity,
        kind: ViolationKind,
        message: impl Into<String>,
        location: &'static str,
    ) -> Self {
        Self {
            severity,
            kind,
            message: message.into(),
            location,
            device: None,
            context: BTreeMap::new(),
        }
    }

    /// Sets the device involved.
    #[must_use]
    pub fn with_device(mut self, device: DeviceId) -> Self {
        self.device = Some(device);
        self
    }

    /// Adds a context key-value pair.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Serializes this violation to a JSON string.
    ///
    /// Returns `None` if serialization fails.
    #[cfg(feature = "json")]
    #[must_use]
    pub fn to_json(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }

    /// Serializes this violation to a pretty-printed JSON string.
    #[cfg(feature = "json")]
    #[must_use]
    pub fn to_json_pretty(&self) -> Option<String> {
        serde_json::to_string_pretty(self).ok()
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}/{}] {} (at {}",
            self.severity, self.kind, self.message, self.location
        )?;
        if let Some(device) = self.device {
            write!(f, ", device={device}")?;
        }
        if !self.context.is_empty() {
            write!(f, ", context={:?}", self.context)?;
        }
        write!(f, ")")
    }
}

/// Trait for observing violations.
///
/// Observers are shared between the coordinator loop and whatever context
/// installed them, so they must be `Send + Sync`.
///
/// # Example
///
/// ```
/// use reflex_duel::telemetry::{Violation, ViolationObserver};
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// #[derive(Default)]
/// struct CountingObserver(AtomicUsize);
///
/// impl ViolationObserver for CountingObserver {
///     fn on_violation(&self, _violation: &Violation) {
///         self.0.fetch_add(1, Ordering::Relaxed);
///     }
/// }
/// ```
pub trait ViolationObserver: Send + Sync {
    /// Called when a violation is detected.
    ///
    /// This runs inside the game loop and should return quickly.
    fn on_violation(&self, violation: &Violation);
}

/// Built-in observer that logs violations via the `tracing` crate.
///
/// - `Warning` severity → `tracing::warn!`
/// - `Error` and `Critical` severity → `tracing::error!`
///
/// Every field is emitted as a structured tracing field (`severity`, `kind`,
/// `location`, `device`, `context`).
#[derive(Debug, Default, Clone)]
pub struct TracingObserver;

impl TracingObserver {
    /// Creates a new tracing observer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn format_device(device: Option<DeviceId>) -> String {
        device.map_or_else(|| "null".to_owned(), |d| d.to_string())
    }
}

impl ViolationObserver for TracingObserver {
    fn on_violation(&self, violation: &Violation) {
        let severity = violation.severity.as_str();
        let kind = violation.kind.as_str();
        let location = violation.location;
        let device = Self::format_device(violation.device);

        let context_str = if violation.context.is_empty() {
            "{}".to_owned()
        } else {
            let pairs: Vec<String> = violation
                .context
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            format!("{{{}}}", pairs.join(", "))
        };

        match violation.severity {
            ViolationSeverity::Warning => {
                tracing::warn!(
                    severity,
                    kind,
                    location,
                    device = %device,
                    context = %context_str,
                    "{}",
                    violation.message
                );
            },
            ViolationSeverity::Error | ViolationSeverity::Critical => {
                tracing::error!(
                    severity,
                    kind,
                    location,
                    device = %device,
                    context = %context_str,
                    "{}",
                    violation.message
                );
            },
        }
    }
}

/// Built-in observer that collects violations for testing.
///
/// # Example
///
/// ```
/// use reflex_duel::telemetry::{
///     CollectingObserver, Violation, ViolationKind, ViolationObserver, ViolationSeverity,
/// };
///
/// let observer = CollectingObserver::new();
/// observer.on_violation(&Violation::new(
///     ViolationSeverity::Warning,
///     ViolationKind::Protocol,
///     "test violation",
///     "test.rs:1",
/// ));
///
/// assert_eq!(observer.violations().len(), 1);
/// assert!(observer.has_violation(ViolationKind::Protocol));
/// ```
#[derive(Debug, Default)]
pub struct CollectingObserver {
    violations: Mutex<Vec<Violation>>,
}

impl CollectingObserver {
    /// Creates a new collecting observer with an empty violation list.
    #[must_use]
    pub fn new() -> Self {
        Self {
            violations: Mutex::new(Vec::new()),
        }
    }

    /// Returns a copy of all collected violations.
    #[must_use]
    pub fn violations(&self) -> Vec<Violation> {
        self.violations.lock().clone()
    }

    /// Returns the number of collected violations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.violations.lock().len()
    }

    /// Returns true if no violations have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.violations.lock().is_empty()
    }

    /// Checks if any violation of the specified kind has been collected.
    #[must_use]
    pub fn has_violation(&self, kind: ViolationKind) -> bool {
        self.violations.lock().iter().any(|v| v.kind == kind)
    }

    /// Checks if any violation with the specified severity has been collected.
    #[must_use]
    pub fn has_severity(&self, severity: ViolationSeverity) -> bool {
        self.violations
            .lock()
            .iter()
            .any(|v| v.severity == severity)
    }

    /// Returns all violations matching the specified kind.
    #[must_use]
    pub fn violations_of_kind(&self, kind: ViolationKind) -> Vec<Violation> {
        self.violations
            .lock()
            .iter()
            .filter(|v| v.kind == kind)
            .cloned()
            .collect()
    }

    /// Clears all collected violations.
    pub fn clear(&self) {
        self.violations.lock().clear();
    }
}

impl ViolationObserver for CollectingObserver {
    fn on_violation(&self, violation: &Violation) {
        self.violations.lock().push(violation.clone());
    }
}

/// A composite observer that forwards violations to multiple observers.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn ViolationObserver>>,
}

impl CompositeObserver {
    /// Creates a new composite observer with no child observers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
        }
    }

    /// Adds an observer to the composite.
    pub fn add(&mut self, observer: Arc<dyn ViolationObserver>) {
        self.observers.push(observer);
    }
}

impl ViolationObserver for CompositeObserver {
    fn on_violation(&self, violation: &Violation) {
        for observer in &self.observers {
            observer.on_violation(violation);
        }
    }
}

impl std::fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("num_observers", &self.observers.len())
            .finish()
    }
}

/// Reports a violation straight to the [`TracingObserver`].
///
/// # Syntax
///
/// ```text
/// report_violation!(severity, kind, "message");
/// report_violation!(severity, kind, "message with {}", format_args);
/// ```
///
/// # Example
///
/// ```
/// use reflex_duel::{report_violation, telemetry::{ViolationKind, ViolationSeverity}};
///
/// report_violation!(ViolationSeverity::Warning, ViolationKind::Timing,
///     "elapsed {} us clamped to 1 ms", 312);
/// ```
#[macro_export]
macro_rules! report_violation {
    ($severity:expr, $kind:expr, $msg:literal) => {{
        use $crate::telemetry::ViolationObserver as _;
        let violation = $crate::telemetry::Violation::new(
            $severity,
            $kind,
            $msg,
            concat!(file!(), ":", line!()),
        );
        $crate::telemetry::TracingObserver.on_violation(&violation);
    }};

    ($severity:expr, $kind:expr, $fmt:literal, $($arg:tt)+) => {{
        use $crate::telemetry::ViolationObserver as _;
        let violation = $crate::telemetry::Violation::new(
            $severity,
            $kind,
            format!($fmt, $($arg)+),
            concat!(file!(), ":", line!()),
        );
        $crate::telemetry::TracingObserver.on_violation(&violation);
    }};
}

/// Asserts that no violations have been collected.
///
/// # Panics
///
/// Panics if the observer contains any violations, printing them for debugging.
#[macro_export]
macro_rules! assert_no_violations {
    ($observer:expr) => {{
        let violations = $observer.violations();
        assert!(
            violations.is_empty(),
            "Expected no violations, but found {}:\n{:#?}",
            violations.len(),
            violations
        );
    }};
}

/// Asserts that a violation of the specified kind was collected.
///
/// # Panics
///
/// Panics if no violation of the specified kind was found.
#[macro_export]
macro_rules! assert_violation {
    ($observer:expr, $kind:expr) => {{
        assert!(
            $observer.has_violation($kind),
            "Expected violation of kind {:?}, but found: {:#?}",
            $kind,
            $observer.violations()
        );
    }};
}

/// Reports a violation to an optional observer, falling back to [`TracingObserver`] if `None`.
pub fn report_to_observer<O: ViolationObserver + ?Sized>(
    observer: Option<&Arc<O>>,
    violation: &Violation,
) {
    match observer {
        Some(obs) => obs.on_violation(violation),
        None => TracingObserver.on_violation(violation),
    }
}

/// Reports a violation through an optional observer.
///
/// Like [`report_violation!`], but routes to `observer` when it is `Some`.
/// An optional trailing `device = expr` attaches the device involved.
///
/// # Syntax
///
/// ```text
/// report_violation_to!(observer, severity, kind, "message");
/// report_violation_to!(observer, severity, kind, "message with {}", format_args);
/// report_violation_to!(observer, device = id, severity, kind, "message with {}", format_args);
/// ```
///
/// # Example
///
/// ```
/// use reflex_duel::{report_violation_to, telemetry::{CollectingObserver, ViolationKind, ViolationObserver, ViolationSeverity}};
/// use reflex_duel::DeviceId;
/// use std::sync::Arc;
///
/// let observer: Option<Arc<dyn ViolationObserver>> = Some(Arc::new(CollectingObserver::new()));
///
/// report_violation_to!(&observer, device = DeviceId::STICK3, ViolationSeverity::Warning,
///     ViolationKind::Protocol, "duplicate result from slot {}", 3);
/// ```
#[macro_export]
macro_rules! report_violation_to {
    ($observer:expr, device = $device:expr, $severity:expr, $kind:expr, $msg:literal) => {{
        let violation = $crate::telemetry::Violation::new(
            $severity,
            $kind,
            $msg,
            concat!(file!(), ":", line!()),
        )
        .with_device($device);
        $crate::telemetry::report_to_observer($observer.as_ref(), &violation);
    }};

    ($observer:expr, device = $device:expr, $severity:expr, $kind:expr, $fmt:literal, $($arg:tt)+) => {{
        let violation = $crate::telemetry::Violation::new(
            $severity,
            $kind,
            format!($fmt, $($arg)+),
            concat!(file!(), ":", line!()),
        )
        .with_device($device);
        $crate::telemetry::report_to_observer($observer.as_ref(), &violation);
    }};

    ($observer:expr, $severity:expr, $kind:expr, $msg:literal) => {{
        let violation = $crate::telemetry::Violation::new(
            $severity,
            $kind,
            $msg,
            concat!(file!(), ":", line!()),
        );
        $crate::telemetry::report_to_observer($observer.as_ref(), &violation);
    }};

    ($observer:expr, $severity:expr, $kind:expr, $fmt:literal, $($arg:tt)+) => {{
        let violation = $crate::telemetry::Violation::new(
            $severity,
            $kind,
            format!($fmt, $($arg)+),
            concat!(file!(), ":", line!()),
        );
        $crate::telemetry::report_to_observer($observer.as_ref(), &violation);
    }};
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_severity_ordering() {
        assert!(ViolationSeverity::Warning < ViolationSeverity::Error);
        assert!(ViolationSeverity::Error < ViolationSeverity::Critical);
    }

    #[test]
    fn test_violation_kind_as_str() {
        assert_eq!(ViolationKind::Transport.as_str(), "transport");
        assert_eq!(ViolationKind::Protocol.as_str(), "protocol");
        assert_eq!(ViolationKind::Delivery.as_str(), "delivery");
        assert_eq!(ViolationKind::Boundary.as_str(), "boundary");
        assert_eq!(ViolationKind::InternalError.as_str(), "internal_error");
    }

    #[test]
    fn test_violation_builder() {
        let violation = Violation::new(
            ViolationSeverity::Error,
            ViolationKind::Delivery,
            "round-start dropped",
            "test.rs:42",
        )
        .with_device(DeviceId::STICK4)
        .with_context("cmd", "0x21");

        assert_eq!(violation.severity, ViolationSeverity::Error);
        assert_eq!(violation.kind, ViolationKind::Delivery);
        assert_eq!(violation.device, Some(DeviceId::STICK4));
        assert_eq!(violation.context.get("cmd"), Some(&"0x21".to_owned()));

        let display = violation.to_string();
        assert!(display.contains("error/delivery"));
        assert!(display.contains("device=stick4"));
        assert!(display.contains("test.rs:42"));
    }

    #[test]
    fn test_collecting_observer() {
        let observer = CollectingObserver::new();
        assert!(observer.is_empty());

        observer.on_violation(&Violation::new(
            ViolationSeverity::Warning,
            ViolationKind::Protocol,
            "first",
            "test.rs:1",
        ));
        observer.on_violation(&Violation::new(
            ViolationSeverity::Error,
            ViolationKind::Delivery,
            "second",
            "test.rs:2",
        ));

        assert_eq!(observer.len(), 2);
        assert!(observer.has_violation(ViolationKind::Protocol));
        assert!(!observer.has_violation(ViolationKind::Join));
        assert!(observer.has_severity(ViolationSeverity::Error));
        assert!(!observer.has_severity(ViolationSeverity::Critical));
        assert_eq!(observer.violations_of_kind(ViolationKind::Delivery).len(), 1);

        observer.clear();
        assert!(observer.is_empty());
    }

    #[test]
    fn test_collecting_observer_concurrent_writes() {
        let observer = Arc::new(CollectingObserver::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let observer = observer.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        observer.on_violation(&Violation::new(
                            ViolationSeverity::Warning,
                            ViolationKind::Protocol,
                            format!("thread {i}"),
                            "test.rs:1",
                        ));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(observer.len(), 100);
    }

    #[test]
    fn test_composite_observer() {
        let collector1 = Arc::new(CollectingObserver::new());
        let collector2 = Arc::new(CollectingObserver::new());

        let mut composite = CompositeObserver::new();
        composite.add(collector1.clone());
        composite.add(collector2.clone());

        composite.on_violation(&Violation::new(
            ViolationSeverity::Warning,
            ViolationKind::Join,
            "test",
            "test.rs:1",
        ));

        assert_eq!(collector1.len(), 1);
        assert_eq!(collector2.len(), 1);
    }

    #[test]
    fn test_tracing_observer_handles_every_severity() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            let observer = TracingObserver::new();
            for severity in [
                ViolationSeverity::Warning,
                ViolationSeverity::Error,
                ViolationSeverity::Critical,
            ] {
                observer.on_violation(
                    &Violation::new(severity, ViolationKind::Timing, "test", "test.rs:1")
                        .with_context("k", "v"),
                );
            }
        });
    }

    #[test]
    fn test_violation_serializes_structured_fields() {
        let violation = Violation::new(
            ViolationSeverity::Error,
            ViolationKind::Delivery,
            "gave up",
            "delivery.rs:1",
        )
        .with_device(DeviceId::DISPLAY)
        .with_context("retries", "3");
        let value = serde_json::to_value(&violation).unwrap();
        assert_eq!(value["severity"], "error");
        assert_eq!(value["kind"], "delivery");
        assert_eq!(value["device"], 5);
        assert_eq!(value["context"]["retries"], "3");
    }

    #[test]
    fn test_report_violation_to_routes_to_observer() {
        let collector = Arc::new(CollectingObserver::new());
        let observer: Option<Arc<dyn ViolationObserver>> = Some(collector.clone());
        report_violation_to!(
            &observer,
            ViolationSeverity::Warning,
            ViolationKind::Protocol,
            "unexpected {} in {}",
            "go",
            "idle"
        );
        report_violation_to!(
            &observer,
            device = DeviceId::DISPLAY,
            ViolationSeverity::Warning,
            ViolationKind::Protocol,
            "skip ignored"
        );
        assert_eq!(collector.len(), 2);
        assert_eq!(collector.violations()[0].message, "unexpected go in idle");
        assert_eq!(collector.violations()[1].device, Some(DeviceId::DISPLAY));
    }

    #[test]
    fn test_report_violation_to_with_none_falls_back() {
        let observer: Option<Arc<dyn ViolationObserver>> = None;
        report_violation_to!(
            &observer,
            ViolationSeverity::Warning,
            ViolationKind::Protocol,
            "test message"
        );
    }

    #[test]
    fn test_assert_macros() {
        let observer = CollectingObserver::new();
        assert_no_violations!(observer);
        observer.on_violation(&Violation::new(
            ViolationSeverity::Warning,
            ViolationKind::Boundary,
            "busy",
            "test.rs:1",
        ));
        assert_violation!(observer, ViolationKind::Boundary);
    }

    #[test]
    fn test_report_violation_macro_compiles() {
        report_violation!(
            ViolationSeverity::Warning,
            ViolationKind::Timing,
            "clamped {} us",
            300
        );
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_violation_to_json() {
        let violation = Violation::new(
            ViolationSeverity::Warning,
            ViolationKind::Protocol,
            "test",
            "test.rs:1",
        )
        .with_device(DeviceId::STICK1);
        let json = violation.to_json().unwrap();
        assert!(json.contains(r#""severity":"warning""#));
        assert!(json.contains(r#""kind":"protocol""#));
        assert!(json.contains(r#""device":1"#));
    }
}
