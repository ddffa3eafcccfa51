use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use agent_core::registry::{parse_input, Tool, ToolError, ToolOutput};

#[derive(Debug, Deserialize)]
struct WeatherInput {
    city: String,
}

/// Weather lookup stub. Always sunny.
#[derive(Debug, Default)]
pub struct WeatherTool;

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "get_weather"
    }

    fn description(&self) -> &str {
        "Get the weather for a given city"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "city": { "type": "string" }
            },
            "required": ["city"]
        })
    }

    async fn invoke(&self, input: Value) -> Result<ToolOutput, ToolError> {
        let input: WeatherInput = parse_input(self.name(), input)?;
        Ok(ToolOutput::text(format!("It's always sunny in {}!", input.city)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_and_description() {
        assert_eq!(WeatherTool.name(), "get_weather");
        assert_eq!(WeatherTool.description(), "Get the weather for a given city");
    }

    #[tokio::test]
    async fn test_sunny_everywhere() {
        for city in ["Tokyo", "London", "New York", "São Paulo"] {
            let out = WeatherTool.invoke(json!({ "city": city })).await.unwrap();
            assert_eq!(out, ToolOutput::text(format!("It's always sunny in {}!", city)));
        }
    }

    #[tokio::test]
    async fn test_rejects_non_string_city() {
        let err = WeatherTool.invoke(json!({ "city": 123 })).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput { tool, .. } if tool == "get_weather"));
    }

    #[tokio::test]
    async fn test_city_is_required() {
        let err = WeatherTool.invoke(json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput { .. }));
    }
}
