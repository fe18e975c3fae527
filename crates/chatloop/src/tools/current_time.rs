use std::future::ready;

use chatloop_core::tool::{Tool, ToolResult};
use chrono::{DateTime, Local, TimeZone, Utc};
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S %:z";

#[derive(Deserialize, JsonSchema)]
pub struct CurrentTimeParameters {
    #[schemars(
        description = "Return the time in UTC instead of the local time zone."
    )]
    #[serde(default)]
    utc: bool,
}

/// A tool that tells the current date and time.
pub struct CurrentTimeTool {
    parameter_schema: Value,
}

impl CurrentTimeTool {
    /// Creates a new current time tool.
    #[inline]
    pub fn new() -> Self {
        CurrentTimeTool {
            parameter_schema: schema_for!(CurrentTimeParameters).to_value(),
        }
    }
}

impl Default for CurrentTimeTool {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for CurrentTimeTool {
    type Input = CurrentTimeParameters;

    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> &str {
        "Returns the current date and time, with the UTC offset."
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        input: CurrentTimeParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let now = if input.utc {
            format_time(&Utc::now())
        } else {
            format_time(&Local::now())
        };
        ready(Ok(Value::String(now)))
    }
}

fn format_time<Tz: TimeZone>(time: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    time.format(TIME_FORMAT).to_string()
}
