/// Alert delivery, sinks and message rendering
pub mod alert_manager;
pub mod formatter;
pub mod sinks;

pub use alert_manager::AlertManager;
pub use formatter::{escape_html, format_alert, format_check_report, format_single_check};
pub use sinks::{AlertSink, LogSink, MockSink, TelegramSink};
