use crate::types::Phase;
use tracing::{debug, error, info, trace, warn};

/// Context information for log messages
#[derive(Debug, Clone)]
pub struct LogContext {
    /// Component name (e.g., "controller", "meter", "charger")
    pub component: String,
    /// Phase the messages concern
    pub phase: Option<Phase>,
    /// Charger the messages concern
    pub charger_id: Option<String>,
    /// Additional context fields
    pub extra_fields: std::collections::BTreeMap<String, String>,
}

impl LogContext {
    pub fn new(component: &str) -> Self {
        Self {
            component: component.to_string(),
            phase: None,
            charger_id: None,
            extra_fields: std::collections::BTreeMap::new(),
        }
    }

    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn with_charger(mut self, charger_id: &str) -> Self {
        self.charger_id = Some(charger_id.to_string());
        self
    }

    pub fn with_field(mut self, key: &str, value: String) -> Self {
        self.extra_fields.insert(key.to_string(), value);
        self
    }
}

/// Structured logger with context
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    pub(crate) context: LogContext,
}

impl StructuredLogger {
    pub fn new(context: LogContext) -> Self {
        Self { context }
    }

    /// Same logger narrowed to one phase
    pub fn for_phase(&self, phase: Phase) -> Self {
        Self::new(self.context.clone().with_phase(phase))
    }

    pub fn info(&self, message: &str) {
        let fields = self.format_fields();
        info!(%fields, "{}", message);
    }
    pub fn warn(&self, message: &str) {
        let fields = self.format_fields();
        warn!(%fields, "{}", message);
    }
    pub fn error(&self, message: &str) {
        let fields = self.format_fields();
        error!(%fields, "{}", message);
    }
    pub fn debug(&self, message: &str) {
        let fields = self.format_fields();
        debug!(%fields, "{}", message);
    }
    pub fn trace(&self, message: &str) {
        let fields = self.format_fields();
        trace!(%fields, "{}", message);
    }

    fn format_fields(&self) -> String {
        let mut fields = vec![format!("component={}", self.context.component)];
        if let Some(phase) = self.context.phase {
            fields.push(format!("phase={}", phase));
        }
        if let Some(ref charger_id) = self.context.charger_id {
            fields.push(format!("charger={}", charger_id));
        }
        for (key, value) in &self.context.extra_fields {
            fields.push(format!("{}={}", key, value));
        }
        fields.join(",")
    }
}

/// Create a logger for a specific component
pub fn get_logger(component: &str) -> StructuredLogger {
    StructuredLogger::new(LogContext::new(component))
}
/// Create a logger with full context
pub fn get_logger_with_context(context: LogContext) -> StructuredLogger {
    StructuredLogger::new(context)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_include_phase_and_charger() {
        let logger = get_logger_with_context(
            LogContext::new("controller")
                .with_charger("garage")
                .with_field("mode", "optimised".to_string()),
        )
        .for_phase(Phase::L2);
        assert_eq!(
            logger.format_fields(),
            "component=controller,phase=L2,charger=garage,mode=optimised"
        );
    }

    #[test]
    fn logging_without_subscriber_does_not_panic() {
        let logger = get_logger("test_component");
        logger.info("info");
        logger.warn("warn");
        logger.error("error");
        logger.debug("debug");
        logger.trace("trace");
    }
}
