//! Inbound call events as delivered by the voice platform's tool calls.

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::EventError;

/// One tool call from the voice agent for a specific call.
#[derive(Debug)]
pub enum CallEvent {
    IdentifyByPhone { phone: String },
    IdentifyById { patient_id: String },
    VerifyDob { dob: SecretString },
    VerifySsn { ssn_last4: SecretString },
    RouteCall { department: String },
    ListDepartments,
    GetInfo,
}

impl CallEvent {
    /// Wire name of the tool.
    pub fn tool(&self) -> &'static str {
        match self {
            Self::IdentifyByPhone { .. } => "identify_by_phone",
            Self::IdentifyById { .. } => "identify_by_id",
            Self::VerifyDob { .. } => "verify_dob",
            Self::VerifySsn { .. } => "verify_ssn",
            Self::RouteCall { .. } => "route_call",
            Self::ListDepartments => "list_departments",
            Self::GetInfo => "get_info",
        }
    }
}

/// Raw `{"tool": "...", "args": {...}}` envelope.
#[derive(Debug, Deserialize)]
struct ToolCall {
    tool: String,
    #[serde(default)]
    args: Value,
}

#[derive(Deserialize)]
struct PhoneArgs {
    phone: String,
}

#[derive(Deserialize)]
struct PatientIdArgs {
    patient_id: String,
}

#[derive(Deserialize)]
struct DobArgs {
    #[serde(deserialize_with = "secret_string")]
    dob: SecretString,
}

#[derive(Deserialize)]
struct SsnArgs {
    #[serde(deserialize_with = "secret_string")]
    ssn_last4: SecretString,
}

#[derive(Deserialize)]
struct RouteArgs {
    department: String,
}

fn secret_string<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

fn args<T: serde::de::DeserializeOwned>(tool: &str, args: Value) -> Result<T, EventError> {
    serde_json::from_value(args).map_err(|source| EventError::InvalidArgs {
        tool: tool.to_string(),
        source,
    })
}

impl CallEvent {
    fn from_tool_call(call: ToolCall) -> Result<Self, EventError> {
        let tool = call.tool.trim();
        let event = match tool {
            "identify_by_phone" => {
                let PhoneArgs { phone } = args(tool, call.args)?;
                Self::IdentifyByPhone { phone }
            }
            "identify_by_id" => {
                let PatientIdArgs { patient_id } = args(tool, call.args)?;
                Self::IdentifyById { patient_id }
            }
            "verify_dob" => {
                let DobArgs { dob } = args(tool, call.args)?;
                Self::VerifyDob { dob }
            }
            "verify_ssn" => {
                let SsnArgs { ssn_last4 } = args(tool, call.args)?;
                Self::VerifySsn { ssn_last4 }
            }
            "route_call" => {
                let RouteArgs { department } = args(tool, call.args)?;
                Self::RouteCall { department }
            }
            "list_departments" => Self::ListDepartments,
            "get_info" => Self::GetInfo,
            other => return Err(EventError::UnknownTool(other.to_string())),
        };
        Ok(event)
    }
}

impl<'de> Deserialize<'de> for CallEvent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let call = ToolCall::deserialize(deserializer)?;
        CallEvent::from_tool_call(call).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;
    use serde_json::json;

    use super::*;

    fn parse(value: Value) -> Result<CallEvent, serde_json::Error> {
        serde_json::from_value(value)
    }

    #[test]
    fn parses_every_tool() {
        let event = parse(json!({"tool": "identify_by_phone", "args": {"phone": "+15551234567"}}))
            .unwrap();
        assert!(matches!(event, CallEvent::IdentifyByPhone { ref phone } if phone == "+15551234567"));

        let event = parse(json!({"tool": "identify_by_id", "args": {"patient_id": "P001"}})).unwrap();
        assert_eq!(event.tool(), "identify_by_id");

        let event = parse(json!({"tool": "route_call", "args": {"department": "billing"}})).unwrap();
        assert!(matches!(event, CallEvent::RouteCall { ref department } if department == "billing"));

        for tool in ["list_departments", "get_info"] {
            assert_eq!(parse(json!({"tool": tool})).unwrap().tool(), tool);
            assert_eq!(parse(json!({"tool": tool, "args": {}})).unwrap().tool(), tool);
        }
    }

    #[test]
    fn secrets_stay_out_of_debug_output() {
        let event = parse(json!({"tool": "verify_dob", "args": {"dob": "1985-03-15"}})).unwrap();
        assert!(!format!("{event:?}").contains("1985"));
        match event {
            CallEvent::VerifyDob { dob } => assert_eq!(dob.expose_secret(), "1985-03-15"),
            other => panic!("unexpected event {other:?}"),
        }

        let event = parse(json!({"tool": "verify_ssn", "args": {"ssn_last4": "1234"}})).unwrap();
        assert!(!format!("{event:?}").contains("1234"));
    }

    #[test]
    fn rejects_unknown_tools_and_missing_args() {
        let err = parse(json!({"tool": "open_pod_bay_doors"})).unwrap_err();
        assert!(err.to_string().contains("Unknown tool"));

        let err = parse(json!({"tool": "verify_dob", "args": {}})).unwrap_err();
        assert!(err.to_string().contains("verify_dob"));
    }
}
