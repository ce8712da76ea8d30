//! The `split` node: one message in, N sibling messages out,
//! each carrying [`Parts`] metadata a downstream `join` can reassemble.

use uuid::Uuid;

use crate::error::{ExecutionError, Result};
use crate::message::{Message, Parts, PartsType};
use crate::node::{
    Category, Config, Dispatch, ExecContext, Executor, ExecutorFactory, NodeInfo, PortSchema,
    PropertySchema,
};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SplitMode {
    Auto,
    FixedLength,
}

#[derive(Debug)]
pub struct Split {
    mode: SplitMode,
    chunk_len: usize,
    delimiter: String,
}

impl Split {
    fn new() -> Self {
        Self {
            mode: SplitMode::Auto,
            chunk_len: 1,
            delimiter: "\n".to_string(),
        }
    }
}

impl Executor for Split {
    fn init(&mut self, config: &Config) -> Result<()> {
        if let Some(len) = config.get("length").and_then(Value::as_f64) {
            self.mode = SplitMode::FixedLength;
            self.chunk_len = (len as usize).max(1);
        }
        if let Some(Value::Str(d)) = config.get("delimiter") {
            self.delimiter = d.clone();
        }
        Ok(())
    }

    fn execute(&mut self, _ctx: &ExecContext, msg: Message) -> Result<Dispatch> {
        let id = Uuid::new_v4();
        let kind = parts_kind(&msg.payload);
        let siblings = split_payload(&msg.payload, self.mode, self.chunk_len, &self.delimiter)?;
        let count = siblings.len();
        let mut dispatch = Dispatch::default();
        for (index, (key, value)) in siblings.into_iter().enumerate() {
            let mut parts = Parts::new(id, index, count, kind);
            if let Some(key) = key {
                parts = parts.with_key(key);
            }
            if kind == PartsType::String {
                parts = parts.with_ch(self.delimiter.clone());
            }
            let out = Message {
                payload: value,
                topic: msg.topic.clone(),
                msg_type: msg.msg_type,
                parts: Some(parts),
            };
            dispatch.push(0, out);
        }
        Ok(dispatch)
    }
}

fn parts_kind(payload: &Value) -> PartsType {
    match payload {
        Value::Array(_) => PartsType::Array,
        Value::Object(_) => PartsType::Object,
        Value::Str(_) => PartsType::String,
        Value::Bytes(_) => PartsType::Buffer,
        _ => PartsType::Array,
    }
}

/// Splits `payload` by its runtime kind (table):
/// array -> one sibling per element; object -> one sibling per entry,
/// `key` carrying the original field name; string -> segments on
/// `delimiter`; buffer -> fixed-length chunks of `chunk_len` bytes.
/// Any other kind fails `unsupported-type`.
fn split_payload(
    payload: &Value,
    mode: SplitMode,
    chunk_len: usize,
    delimiter: &str,
) -> Result<Vec<(Option<String>, Value)>> {
    match payload {
        Value::Array(items) => Ok(items.iter().cloned().map(|v| (None, v)).collect()),
        Value::Object(map) => Ok(map
            .iter()
            .map(|(k, v)| (Some(k.clone()), v.clone()))
            .collect()),
        Value::Str(s) => {
            if mode == SplitMode::FixedLength {
                Ok(s
                    .as_bytes()
                    .chunks(chunk_len)
                    .map(|c| (None, Value::Str(String::from_utf8_lossy(c).into_owned())))
                    .collect())
            } else {
                Ok(s.split(delimiter)
                    .map(|part| (None, Value::Str(part.to_string())))
                    .collect())
            }
        }
        Value::Bytes(b) => Ok(b
            .chunks(chunk_len.max(1))
            .map(|c| (None, Value::Bytes(c.to_vec())))
            .collect()),
        other => Err(ExecutionError::UnsupportedType(format!(
            "split cannot handle payload type '{}'",
            other.type_name()
        ))),
    }
}

pub fn node_info() -> NodeInfo {
    NodeInfo {
        node_type: "split".to_string(),
        name: "Split".to_string(),
        category: Category::Function,
        description: "Splits an array, object, string, or buffer into a sequence of messages."
            .to_string(),
        icon: None,
        color: None,
        properties: vec![
            PropertySchema::number("length").with_description("fixed-length chunk size"),
            PropertySchema::string("delimiter").with_default(Value::from("\n")),
        ],
        inputs: vec![PortSchema::new("in")],
        outputs: vec![PortSchema::new("out")],
    }
}

#[derive(Debug)]
pub struct SplitFactory;

impl ExecutorFactory for SplitFactory {
    fn create(&self) -> Box<dyn Executor> {
        Box::new(Split::new())
    }
}
