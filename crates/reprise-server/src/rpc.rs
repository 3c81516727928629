use serde::{Deserialize, Serialize};

use reprise_engine::EngineError;

/// Request envelope as clients send it over the socket.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    pub params: Option<serde_json::Value>,
    pub id: Option<serde_json::Value>,
}

/// Response envelope: `{ id, success, result?, error?: { code, message } }`.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub id: Option<serde_json::Value>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: ErrorCode,
    pub message: String,
}

/// Wire error codes. Serialized as SCREAMING_SNAKE strings so clients can
/// match on names instead of a numbers table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ParseError,
    MethodNotFound,
    InvalidParams,
    InternalError,
    InvalidRedaction,
    GenerationInFlight,
}

impl From<&EngineError> for ErrorCode {
    fn from(error: &EngineError) -> Self {
        match error {
            EngineError::InvalidRedaction { .. } => ErrorCode::InvalidRedaction,
            EngineError::GenerationInFlight(_) => ErrorCode::GenerationInFlight,
            _ => ErrorCode::InternalError,
        }
    }
}

impl RpcResponse {
    pub fn ok(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self {
            id,
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn fail(
        id: Option<serde_json::Value>,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn parse_error() -> Self {
        Self::fail(None, ErrorCode::ParseError, "request is not valid JSON")
    }

    pub fn method_not_found(id: Option<serde_json::Value>, method: &str) -> Self {
        Self::fail(
            id,
            ErrorCode::MethodNotFound,
            format!("unknown method: {method}"),
        )
    }

    pub fn invalid_params(id: Option<serde_json::Value>, message: impl Into<String>) -> Self {
        Self::fail(id, ErrorCode::InvalidParams, message)
    }

    /// Map an engine failure onto its wire code.
    pub fn engine_error(id: Option<serde_json::Value>, error: &EngineError) -> Self {
        Self::fail(id, ErrorCode::from(error), error.to_string())
    }
}

/// Pull a required string field out of the params object.
pub fn str_param<'a>(params: &'a serde_json::Value, key: &str) -> Result<&'a str, String> {
    match params.get(key).and_then(serde_json::Value::as_str) {
        Some(value) => Ok(value),
        None => Err(format!("missing or invalid parameter: {key}")),
    }
}

/// Pull a required unsigned integer field.
pub fn u64_param(params: &serde_json::Value, key: &str) -> Result<u64, String> {
    match params.get(key).and_then(serde_json::Value::as_u64) {
        Some(value) => Ok(value),
        None => Err(format!("missing or invalid parameter: {key}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_envelope_parses() {
        let raw = r#"{"method":"chat.strike","params":{"identity":"alice","message_idx":3},"id":7}"#;
        let request: RpcRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(request.method, "chat.strike");
        assert_eq!(request.id, Some(serde_json::json!(7)));
        assert_eq!(request.params.unwrap()["message_idx"], 3);
    }

    #[test]
    fn ok_response_wire_shape() {
        let response = RpcResponse::ok(Some(serde_json::json!(1)), serde_json::json!({"n": 2}));
        let wire = serde_json::to_value(&response).unwrap();
        assert_eq!(wire["success"], true);
        assert_eq!(wire["result"]["n"], 2);
        assert!(wire.get("error").is_none());
    }

    #[test]
    fn fail_response_wire_shape() {
        let response = RpcResponse::fail(
            Some(serde_json::json!(1)),
            ErrorCode::InvalidParams,
            "bad index",
        );
        let wire = serde_json::to_value(&response).unwrap();
        assert_eq!(wire["success"], false);
        assert_eq!(wire["error"]["code"], "INVALID_PARAMS");
        assert_eq!(wire["error"]["message"], "bad index");
        assert!(wire.get("result").is_none());
    }

    #[test]
    fn error_codes_serialize_screaming_snake() {
        assert_eq!(
            serde_json::to_value(ErrorCode::GenerationInFlight).unwrap(),
            serde_json::json!("GENERATION_IN_FLIGHT")
        );
        assert_eq!(
            serde_json::to_value(ErrorCode::MethodNotFound).unwrap(),
            serde_json::json!("METHOD_NOT_FOUND")
        );
    }

    #[test]
    fn parse_error_carries_no_id() {
        let response = RpcResponse::parse_error();
        assert!(response.id.is_none());
        assert!(!response.success);
        assert_eq!(response.error.unwrap().code, ErrorCode::ParseError);
    }

    #[test]
    fn engine_errors_map_to_wire_codes() {
        let invalid = EngineError::InvalidRedaction {
            index: 2,
            reason: "does not address an assistant turn".into(),
        };
        assert_eq!(ErrorCode::from(&invalid), ErrorCode::InvalidRedaction);

        let busy = EngineError::GenerationInFlight("alice".into());
        assert_eq!(ErrorCode::from(&busy), ErrorCode::GenerationInFlight);

        let store = EngineError::Store(std::io::Error::other("disk gone").into());
        assert_eq!(ErrorCode::from(&store), ErrorCode::InternalError);

        let response = RpcResponse::engine_error(None, &busy);
        assert!(response.error.unwrap().message.contains("alice"));
    }

    #[test]
    fn str_param_requires_a_string() {
        let params = serde_json::json!({"name": "test", "count": 5});
        assert_eq!(str_param(&params, "name").unwrap(), "test");
        assert!(str_param(&params, "count").is_err());
        assert!(str_param(&params, "absent").is_err());
    }

    #[test]
    fn u64_param_requires_unsigned() {
        let params = serde_json::json!({"index": 3, "name": "x", "negative": -1});
        assert_eq!(u64_param(&params, "index").unwrap(), 3);
        assert!(u64_param(&params, "name").is_err());
        assert!(u64_param(&params, "negative").is_err());
        assert!(u64_param(&params, "absent").is_err());
    }
}
