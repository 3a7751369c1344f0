//! Control Plane (JSON-RPC 2.0)
//!
//! Maps remote method calls onto daemon operations. The method table is a
//! fixed enum: every name maps to exactly one typed [`Call`], and params are
//! validated into that call before any domain state is touched.
//!
//! Params may be positional (`["robot", "image"]`), keyed
//! (`{"robot": "..", "image": ".."}`) or a keyed object wrapped in a
//! one-element array (`[{"username": .., "password": ..}]`).

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::daemon::Daemon;
use crate::error::{ErrorCategory, IncubatorError, IncubatorResult};
use crate::model::{RobotId, TaskId};

/// JSON-RPC 2.0 Request
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    /// `"2.0"`; some clients send the number `2.0`
    #[serde(default)]
    pub jsonrpc: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 Error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
            id,
        }
    }

    fn with_data(mut self, data: Value) -> Self {
        if let Some(ref mut err) = self.error {
            err.data = Some(data);
        }
        self
    }
}

/// Error codes
pub mod error_codes {
    // JSON-RPC standard errors
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    // Incubator errors (-32000 to -32099)
    pub const NOT_FOUND: i32 = -32001;
    pub const CONFLICT: i32 = -32002;
    pub const RUNTIME_ERROR: i32 = -32003;
    pub const AUTH_FAILED: i32 = -32004;
}

/// Remote methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    ListRobots,
    CreateRobot,
    DeleteRobot,
    ListSkills,
    LearnSkill,
    ForgetSkill,
    StartSkill,
    StopSkill,
    Export,
    Login,
    Ping,
}

impl Method {
    pub const ALL: [Method; 11] = [
        Method::ListRobots,
        Method::CreateRobot,
        Method::DeleteRobot,
        Method::ListSkills,
        Method::LearnSkill,
        Method::ForgetSkill,
        Method::StartSkill,
        Method::StopSkill,
        Method::Export,
        Method::Login,
        Method::Ping,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::ListRobots => "list_robots",
            Self::CreateRobot => "create_robot",
            Self::DeleteRobot => "delete_robot",
            Self::ListSkills => "list_skills",
            Self::LearnSkill => "learn_skill",
            Self::ForgetSkill => "forget_skill",
            Self::StartSkill => "start_skill",
            Self::StopSkill => "stop_skill",
            Self::Export => "export",
            Self::Login => "login",
            Self::Ping => "ping",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.name() == name)
    }
}

/// Check the method table once at startup: names unique and resolvable
pub fn validate_method_table() -> anyhow::Result<()> {
    let mut seen = HashSet::new();
    for method in Method::ALL {
        if !seen.insert(method.name()) {
            anyhow::bail!("duplicate RPC method name '{}'", method.name());
        }
        if Method::from_name(method.name()) != Some(method) {
            anyhow::bail!("RPC method '{}' does not resolve to itself", method.name());
        }
    }
    Ok(())
}

/// A validated call, ready for dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListRobots,
    CreateRobot,
    DeleteRobot { robot: RobotId },
    ListSkills { robot: RobotId },
    LearnSkill { robot: RobotId, image: String },
    ForgetSkill { robot: RobotId, task: TaskId },
    StartSkill { robot: RobotId, task: TaskId },
    StopSkill { robot: RobotId, task: TaskId },
    Export,
    Login { username: String, password: String },
    Ping,
}

impl Call {
    /// Validate `params` for `method`
    pub fn parse(method: Method, params: &Value) -> IncubatorResult<Self> {
        let p = Params::new(params)?;
        let call = match method {
            Method::ListRobots => Self::ListRobots,
            Method::CreateRobot => Self::CreateRobot,
            Method::DeleteRobot => Self::DeleteRobot {
                robot: p.string(0, "robot")?.into(),
            },
            Method::ListSkills => Self::ListSkills {
                robot: p.string(0, "robot")?.into(),
            },
            Method::LearnSkill => Self::LearnSkill {
                robot: p.string(0, "robot")?.into(),
                image: p.string(1, "image")?,
            },
            Method::ForgetSkill => Self::ForgetSkill {
                robot: p.string(0, "robot")?.into(),
                task: p.string(1, "task")?.into(),
            },
            Method::StartSkill => Self::StartSkill {
                robot: p.string(0, "robot")?.into(),
                task: p.string(1, "task")?.into(),
            },
            Method::StopSkill => Self::StopSkill {
                robot: p.string(0, "robot")?.into(),
                task: p.string(1, "task")?.into(),
            },
            Method::Export => Self::Export,
            Method::Login => Self::Login {
                username: p.any_string(0, "username")?,
                password: p.any_string(1, "password")?,
            },
            Method::Ping => Self::Ping,
        };
        Ok(call)
    }
}

/// Uniform access to positional or keyed params
enum Params<'a> {
    None,
    Positional(&'a [Value]),
    Keyed(&'a serde_json::Map<String, Value>),
}

impl<'a> Params<'a> {
    fn new(params: &'a Value) -> IncubatorResult<Self> {
        match params {
            Value::Null => Ok(Self::None),
            Value::Array(items) => match items.as_slice() {
                [Value::Object(map)] => Ok(Self::Keyed(map)),
                items => Ok(Self::Positional(items)),
            },
            Value::Object(map) => Ok(Self::Keyed(map)),
            _ => Err(IncubatorError::InvalidRequest(
                "params must be an array or an object".to_string(),
            )),
        }
    }

    fn get(&self, index: usize, key: &str) -> Option<&'a Value> {
        match self {
            Self::None => None,
            Self::Positional(items) => items.get(index),
            Self::Keyed(map) => map.get(key),
        }
    }

    /// Required non-empty string parameter
    fn string(&self, index: usize, key: &str) -> IncubatorResult<String> {
        let value = self.any_string(index, key)?;
        if value.trim().is_empty() {
            return Err(IncubatorError::InvalidRequest(format!(
                "parameter '{}' must not be empty",
                key
            )));
        }
        Ok(value)
    }

    /// Required string parameter, possibly empty
    fn any_string(&self, index: usize, key: &str) -> IncubatorResult<String> {
        match self.get(index, key) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(other) => Err(IncubatorError::InvalidRequest(format!(
                "parameter '{}' must be a string, got {}",
                key, other
            ))),
            None => Err(IncubatorError::InvalidRequest(format!(
                "missing parameter '{}'",
                key
            ))),
        }
    }
}

/// JSON-RPC front door of the daemon
#[derive(Clone)]
pub struct ControlPlane {
    daemon: Arc<Daemon>,
}

impl ControlPlane {
    pub fn new(daemon: Arc<Daemon>) -> Self {
        Self { daemon }
    }

    pub fn daemon(&self) -> &Arc<Daemon> {
        &self.daemon
    }

    /// Handle a raw request body
    pub async fn handle_raw(&self, body: &[u8]) -> RpcResponse {
        match serde_json::from_slice::<RpcRequest>(body) {
            Ok(request) => self.handle(request).await,
            Err(e) if e.is_data() => {
                warn!("Invalid request: {}", e);
                RpcResponse::error(None, error_codes::INVALID_REQUEST, format!("Invalid request: {}", e))
            }
            Err(e) => {
                warn!("Parse error: {}", e);
                RpcResponse::error(None, error_codes::PARSE_ERROR, format!("Parse error: {}", e))
            }
        }
    }

    /// Handle a single request
    pub async fn handle(&self, request: RpcRequest) -> RpcResponse {
        let id = request.id.clone();
        debug!("← {} {}", request.method, request.params);

        if !is_supported_version(&request.jsonrpc) {
            return RpcResponse::error(
                id,
                error_codes::INVALID_REQUEST,
                format!("Unsupported jsonrpc version: {}", request.jsonrpc),
            );
        }

        let method = match Method::from_name(&request.method) {
            Some(m) => m,
            None => {
                warn!("Unknown method: {}", request.method);
                return RpcResponse::error(
                    id,
                    error_codes::METHOD_NOT_FOUND,
                    format!("Method not found: {}", request.method),
                );
            }
        };

        let result = match Call::parse(method, &request.params) {
            Ok(call) => self.dispatch(call).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(value) => RpcResponse::success(id, value),
            Err(e) => error_response(id, method, &e),
        }
    }

    /// Run a validated call against the daemon
    pub async fn dispatch(&self, call: Call) -> IncubatorResult<Value> {
        let registry = self.daemon.registry();
        let value = match call {
            Call::ListRobots => serde_json::to_value(registry.list_robots())?,
            Call::CreateRobot => serde_json::to_value(registry.create_robot())?,
            Call::DeleteRobot { robot } => {
                registry.delete_robot(&robot).await?;
                Value::Null
            }
            Call::ListSkills { robot } => serde_json::to_value(registry.list_skills(&robot)?)?,
            Call::LearnSkill { robot, image } => {
                serde_json::to_value(registry.teach_skill(&robot, &image).await?)?
            }
            Call::ForgetSkill { robot, task } => {
                registry.forget_skill(&robot, &task).await?;
                Value::Null
            }
            Call::StartSkill { robot, task } => {
                serde_json::to_value(registry.start_skill(&robot, &task).await?)?
            }
            Call::StopSkill { robot, task } => {
                serde_json::to_value(registry.stop_skill(&robot, &task).await?)?
            }
            Call::Export => serde_json::to_value(self.daemon.export().await?)?,
            Call::Login { username, password } => {
                Value::String(self.daemon.login(&username, &password)?)
            }
            Call::Ping => json!("pong"),
        };
        Ok(value)
    }
}

fn is_supported_version(version: &Value) -> bool {
    match version {
        Value::Null => true,
        Value::String(s) => s == "2.0",
        Value::Number(n) => n.as_f64() == Some(2.0),
        _ => false,
    }
}

/// Map a domain error to a structured JSON-RPC error
pub fn error_response(id: Option<Value>, method: Method, err: &IncubatorError) -> RpcResponse {
    let category = err.category();
    let code = match category {
        ErrorCategory::Validation => error_codes::INVALID_PARAMS,
        ErrorCategory::NotFound => error_codes::NOT_FOUND,
        ErrorCategory::Conflict => error_codes::CONFLICT,
        ErrorCategory::Runtime => error_codes::RUNTIME_ERROR,
        ErrorCategory::Auth => error_codes::AUTH_FAILED,
        ErrorCategory::Internal => error_codes::INTERNAL_ERROR,
    };

    let message = if category == ErrorCategory::Internal {
        error!("{} failed: {}", method.name(), err);
        "Internal error".to_string()
    } else {
        warn!("{} failed: {}", method.name(), err);
        format!("{}: {}", method.name(), err)
    };

    RpcResponse::error(id, code, message).with_data(json!({
        "category": category.as_str(),
        "kind": err.kind(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_table_is_valid() {
        validate_method_table().unwrap();
        assert_eq!(Method::from_name("learn_skill"), Some(Method::LearnSkill));
        assert_eq!(Method::from_name("echo"), None);
    }

    #[test]
    fn test_positional_params() {
        let call = Call::parse(Method::LearnSkill, &json!(["r1", "worker:v1"])).unwrap();
        assert_eq!(
            call,
            Call::LearnSkill {
                robot: RobotId::from("r1"),
                image: "worker:v1".to_string()
            }
        );
    }

    #[test]
    fn test_keyed_params() {
        let call = Call::parse(Method::ForgetSkill, &json!({"robot": "r1", "task": "t1"})).unwrap();
        assert_eq!(
            call,
            Call::ForgetSkill {
                robot: RobotId::from("r1"),
                task: TaskId::from("t1")
            }
        );
    }

    #[test]
    fn test_wrapped_keyed_params() {
        let call = Call::parse(
            Method::Login,
            &json!([{"username": "alice", "password": "pw"}]),
        )
        .unwrap();
        assert_eq!(
            call,
            Call::Login {
                username: "alice".to_string(),
                password: "pw".to_string()
            }
        );
    }

    #[test]
    fn test_missing_and_mistyped_params() {
        let err = Call::parse(Method::DeleteRobot, &Value::Null).unwrap_err();
        assert!(matches!(err, IncubatorError::InvalidRequest(_)));

        let err = Call::parse(Method::LearnSkill, &json!(["r1", 42])).unwrap_err();
        assert!(err.to_string().contains("image"));

        let err = Call::parse(Method::DeleteRobot, &json!("r1")).unwrap_err();
        assert!(matches!(err, IncubatorError::InvalidRequest(_)));
    }

    #[test]
    fn test_no_param_methods_ignore_params() {
        assert_eq!(Call::parse(Method::ListRobots, &Value::Null).unwrap(), Call::ListRobots);
        assert_eq!(Call::parse(Method::CreateRobot, &json!({})).unwrap(), Call::CreateRobot);
    }

    #[test]
    fn test_error_response_shape() {
        let resp = error_response(
            Some(json!(7)),
            Method::DeleteRobot,
            &IncubatorError::RobotNotFound("r9".to_string()),
        );
        let err = resp.error.unwrap();
        assert_eq!(err.code, error_codes::NOT_FOUND);
        assert!(err.message.starts_with("delete_robot: "));
        assert_eq!(err.data.unwrap()["kind"], "RobotNotFound");
        assert_eq!(resp.id, Some(json!(7)));
    }

    #[test]
    fn test_internal_errors_are_opaque() {
        let resp = error_response(
            None,
            Method::Export,
            &IncubatorError::Internal("disk on fire at /secret/path".to_string()),
        );
        let err = resp.error.unwrap();
        assert_eq!(err.code, error_codes::INTERNAL_ERROR);
        assert_eq!(err.message, "Internal error");
    }

    #[test]
    fn test_version_check() {
        assert!(is_supported_version(&json!("2.0")));
        assert!(is_supported_version(&json!(2.0)));
        assert!(is_supported_version(&Value::Null));
        assert!(!is_supported_version(&json!("1.0")));
    }
}
