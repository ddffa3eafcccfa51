use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use serde::Deserialize;
use serde_json::{json, Value};

use agent_core::registry::{parse_input, Tool, ToolError, ToolOutput};

/// Year/month/day with unpadded month, day and hour, as the ja-JP locale
/// prints it: `2100/12/31 23:59:59`, `2024/1/5 9:03:07`.
const DATETIME_FORMAT: &str = "%Y/%-m/%-d %-H:%M:%S";

type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

/// Takes no parameters. Stray keys from the model are ignored.
#[derive(Debug, Deserialize)]
struct DateTimeInput {}

/// Reports the current local date and time.
#[derive(Clone)]
pub struct DateTimeTool {
    clock: Clock,
}

impl DateTimeTool {
    pub fn new() -> Self {
        Self::with_clock(|| Local::now().naive_local())
    }

    /// Use a custom clock, e.g. a fixed instant in tests.
    pub fn with_clock<F>(clock: F) -> Self
    where
        F: Fn() -> NaiveDateTime + Send + Sync + 'static,
    {
        Self {
            clock: Arc::new(clock),
        }
    }
}

impl Default for DateTimeTool {
    fn default() -> Self {
        Self::new()
    }
}

pub fn format_datetime(at: NaiveDateTime) -> String {
    at.format(DATETIME_FORMAT).to_string()
}

#[async_trait]
impl Tool for DateTimeTool {
    fn name(&self) -> &str {
        "get_current_datetime"
    }

    fn description(&self) -> &str {
        "Get the current date and time in the local timezone, formatted Japanese style (YYYY/M/D H:MM:SS)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        })
    }

    async fn invoke(&self, input: Value) -> Result<ToolOutput, ToolError> {
        let input = if input.is_null() { json!({}) } else { input };
        let _: DateTimeInput = parse_input(self.name(), input)?;

        let body = json!({
            "datetime": format_datetime((self.clock)()),
            "timezone": "local",
        });
        Ok(ToolOutput::text(body.to_string()))
    }
}
