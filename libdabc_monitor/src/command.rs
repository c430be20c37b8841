use serde_json::Value;

use super::error::CommandError;
use super::transport::{
    execute_url, value_url, Request, RequestToken, ResponseBody, ResponseKind, Transport,
    TransportResult,
};

/// Argument type as advertised by the command descriptor
#[derive(Debug, Clone, PartialEq)]
pub enum ArgKind {
    Int { min: i64, max: i64 },
    String,
}

/// One argument slot of a command, with its server-side default
#[derive(Debug, Clone, PartialEq)]
pub struct CommandArg {
    pub name: String,
    pub kind: ArgKind,
    pub default: String,
}

/// Outcome of a finished command round trip
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult {
    pub success: bool,
    pub document: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingKind {
    Descriptor,
    Execute,
}

/// What handling a command response amounted to
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Idle,
    DescriptorLoaded,
    Executed(CommandResult),
}

/// Invokable server command. The argument descriptor is loaded once over the
/// document endpoint; executions go out with explicit or default argument
/// values
#[derive(Debug)]
pub struct CommandItem {
    pub name: String,
    descriptor: Option<Vec<CommandArg>>,
    pending: Option<(RequestToken, PendingKind)>,
    last_result: Option<CommandResult>,
}

impl CommandItem {
    pub fn new(name: &str) -> Self {
        Self {
            name: String::from(name),
            descriptor: None,
            pending: None,
            last_result: None,
        }
    }

    pub fn descriptor(&self) -> Option<&[CommandArg]> {
        self.descriptor.as_deref()
    }

    pub fn last_result(&self) -> Option<&CommandResult> {
        self.last_result.as_ref()
    }

    pub fn pending_token(&self) -> Option<RequestToken> {
        self.pending.map(|(token, _)| token)
    }

    pub fn clear(&mut self, transport: &mut dyn Transport) {
        if let Some((token, _)) = self.pending.take() {
            transport.cancel(token);
        }
        self.descriptor = None;
        self.last_result = None;
    }

    /// Fetch the descriptor if it has not been loaded yet
    pub fn regular_check(&mut self, transport: &mut dyn Transport) -> Option<RequestToken> {
        if self.descriptor.is_some() || self.pending.is_some() {
            return None;
        }
        let request = Request {
            url: value_url(&self.name),
            kind: ResponseKind::Document,
        };
        let token = transport.submit(request);
        self.pending = Some((token, PendingKind::Descriptor));
        Some(token)
    }

    /// Invoke the command. Arguments not supplied by the caller are filled
    /// from the descriptor defaults
    pub fn execute(
        &mut self,
        transport: &mut dyn Transport,
        args: &[(String, String)],
    ) -> Result<RequestToken, CommandError> {
        if self.pending.is_some() {
            return Err(CommandError::Busy(self.name.clone()));
        }
        let descriptor = self
            .descriptor
            .as_ref()
            .ok_or_else(|| CommandError::NoDescriptor(self.name.clone()))?;

        let mut pairs = Vec::with_capacity(descriptor.len());
        for arg in descriptor {
            let value = args
                .iter()
                .find(|(name, _)| name == &arg.name)
                .map(|(_, value)| value.clone())
                .unwrap_or_else(|| arg.default.clone());
            pairs.push((arg.name.clone(), value));
        }

        let request = Request {
            url: execute_url(&self.name, &pairs),
            kind: ResponseKind::Document,
        };
        let token = transport.submit(request);
        self.pending = Some((token, PendingKind::Execute));
        Ok(token)
    }

    pub fn on_response(
        &mut self,
        token: RequestToken,
        result: TransportResult,
    ) -> Result<CommandOutcome, CommandError> {
        let kind = match self.pending {
            Some((pending, kind)) if pending == token => kind,
            _ => {
                log::debug!("Dropping command response for stale request {token:?}");
                return Ok(CommandOutcome::Idle);
            }
        };
        self.pending = None;

        let doc = match result {
            Ok(ResponseBody::Document(doc)) => doc,
            Ok(ResponseBody::Binary(_)) => return Err(CommandError::NotADocument),
            Err(e) => {
                log::warn!("Command request for {} failed: {e}", self.name);
                if kind == PendingKind::Execute {
                    self.last_result = Some(CommandResult {
                        success: false,
                        document: Value::Null,
                    });
                }
                return Ok(CommandOutcome::Idle);
            }
        };

        match kind {
            PendingKind::Descriptor => {
                self.descriptor = Some(parse_descriptor(&doc)?);
                Ok(CommandOutcome::DescriptorLoaded)
            }
            PendingKind::Execute => {
                let success = doc.get("_Result_").and_then(Value::as_i64) == Some(1);
                let result = CommandResult {
                    success,
                    document: doc,
                };
                self.last_result = Some(result.clone());
                Ok(CommandOutcome::Executed(result))
            }
        }
    }
}

/// Parse the argument list out of a command node document: `numargs`, then
/// `argN` / `argN_kind` / `argN_dflt` / `argN_min` / `argN_max` per slot
fn parse_descriptor(doc: &Value) -> Result<Vec<CommandArg>, CommandError> {
    let obj = doc
        .as_object()
        .ok_or_else(|| CommandError::BadDescriptor(String::from("not an object")))?;
    let numargs = obj
        .get("numargs")
        .and_then(field_as_i64)
        .unwrap_or(0);

    let mut args = Vec::with_capacity(numargs as usize);
    for index in 0..numargs {
        let name = obj
            .get(&format!("arg{index}"))
            .and_then(Value::as_str)
            .ok_or_else(|| CommandError::BadDescriptor(format!("missing arg{index} name")))?;
        let kind = match obj
            .get(&format!("arg{index}_kind"))
            .and_then(Value::as_str)
            .unwrap_or("string")
        {
            "int" => ArgKind::Int {
                min: obj
                    .get(&format!("arg{index}_min"))
                    .and_then(field_as_i64)
                    .unwrap_or(i64::MIN),
                max: obj
                    .get(&format!("arg{index}_max"))
                    .and_then(field_as_i64)
                    .unwrap_or(i64::MAX),
            },
            _ => ArgKind::String,
        };
        let default = match obj.get(&format!("arg{index}_dflt")) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };
        args.push(CommandArg {
            name: String::from(name),
            kind,
            default,
        });
    }
    Ok(args)
}

fn field_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use serde_json::json;

    fn descriptor_doc() -> Value {
        json!({
            "_kind": "DABC.Command",
            "numargs": 2,
            "arg0": "count",
            "arg0_kind": "int",
            "arg0_dflt": 10,
            "arg0_min": 1,
            "arg0_max": 100,
            "arg1": "mode",
            "arg1_dflt": "fast"
        })
    }

    #[test]
    fn test_descriptor_load() {
        let mut transport = MockTransport::new();
        let mut command = CommandItem::new("/sys/app1/Start");
        let token = command.regular_check(&mut transport).unwrap();
        assert_eq!(transport.last().1.url, "/sys/app1/Start/get.json");

        let outcome = command
            .on_response(token, Ok(ResponseBody::Document(descriptor_doc())))
            .unwrap();
        assert_eq!(outcome, CommandOutcome::DescriptorLoaded);
        let args = command.descriptor().unwrap();
        assert_eq!(args.len(), 2);
        assert_eq!(args[0].name, "count");
        assert_eq!(args[0].kind, ArgKind::Int { min: 1, max: 100 });
        assert_eq!(args[0].default, "10");
        assert_eq!(args[1].kind, ArgKind::String);
        // loaded once, never refetched
        assert!(command.regular_check(&mut transport).is_none());
    }

    #[test]
    fn test_execute_fills_defaults() {
        let mut transport = MockTransport::new();
        let mut command = CommandItem::new("/sys/app1/Start");
        let token = command.regular_check(&mut transport).unwrap();
        command
            .on_response(token, Ok(ResponseBody::Document(descriptor_doc())))
            .unwrap();

        let token = command
            .execute(&mut transport, &[(String::from("count"), String::from("5"))])
            .unwrap();
        assert_eq!(
            transport.last().1.url,
            "/sys/app1/Start/execute?count=5&mode=fast"
        );

        let outcome = command
            .on_response(token, Ok(ResponseBody::Document(json!({ "_Result_": 1 }))))
            .unwrap();
        match outcome {
            CommandOutcome::Executed(result) => assert!(result.success),
            other => panic!("expected an execution result, got {other:?}"),
        }
    }

    #[test]
    fn test_execute_before_descriptor_is_rejected() {
        let mut transport = MockTransport::new();
        let mut command = CommandItem::new("/sys/app1/Start");
        let err = command.execute(&mut transport, &[]).unwrap_err();
        assert!(matches!(err, CommandError::NoDescriptor(_)));
    }

    #[test]
    fn test_busy_while_waiting() {
        let mut transport = MockTransport::new();
        let mut command = CommandItem::new("/sys/app1/Start");
        let token = command.regular_check(&mut transport).unwrap();
        command
            .on_response(token, Ok(ResponseBody::Document(descriptor_doc())))
            .unwrap();
        command.execute(&mut transport, &[]).unwrap();
        let err = command.execute(&mut transport, &[]).unwrap_err();
        assert!(matches!(err, CommandError::Busy(_)));
    }

    #[test]
    fn test_failed_execution_reports_failure() {
        let mut transport = MockTransport::new();
        let mut command = CommandItem::new("/sys/app1/Start");
        let token = command.regular_check(&mut transport).unwrap();
        command
            .on_response(token, Ok(ResponseBody::Document(descriptor_doc())))
            .unwrap();
        let token = command.execute(&mut transport, &[]).unwrap();
        let outcome = command
            .on_response(token, Ok(ResponseBody::Document(json!({ "_Result_": 0 }))))
            .unwrap();
        match outcome {
            CommandOutcome::Executed(result) => assert!(!result.success),
            other => panic!("expected an execution result, got {other:?}"),
        }
        assert!(!command.last_result().unwrap().success);
    }
}
