//! Current time tool: reports the server clock, optionally in a fixed offset.

use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use reagent_core::error::ToolError;
use reagent_core::tool::{Tool, ToolOutput};

pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time. Optionally pass a UTC offset in hours (e.g. -5 or 5.5)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "utc_offset_hours": {
                    "type": "number",
                    "description": "Offset from UTC in hours, between -12 and 14"
                }
            }
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let now = Utc::now();
        let mut result = serde_json::json!({
            "utc": now.to_rfc3339(),
            "unix_ms": now.timestamp_millis(),
        });

        if let Some(raw) = arguments.get("utc_offset_hours").filter(|v| !v.is_null()) {
            let hours = raw
                .as_f64()
                .or_else(|| raw.as_str().and_then(|s| s.trim().parse().ok()))
                .ok_or_else(|| ToolError::InvalidArguments("utc_offset_hours must be a number".into()))?;
            let offset = FixedOffset::east_opt((hours * 3600.0).round() as i32)
                .filter(|_| (-12.0..=14.0).contains(&hours))
                .ok_or_else(|| ToolError::InvalidArguments(format!("utc_offset_hours out of range: {hours}")))?;
            result["local"] = serde_json::json!(now.with_timezone(&offset).to_rfc3339());
        }

        Ok(ToolOutput::json(result))
    }
}
