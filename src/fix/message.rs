use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::fix::tags;
use crate::simulator::error::{SimulatorError, SimulatorResult};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MsgType {
    Heartbeat,
    Logon,
    Logout,
    NewOrderSingle,
    ExecutionReport,
    MarketDataSnapshot,
    Other(String),
}

impl MsgType {
    pub fn as_str(&self) -> &str {
        match self {
            MsgType::Heartbeat => "0",
            MsgType::Logon => "A",
            MsgType::Logout => "5",
            MsgType::NewOrderSingle => "D",
            MsgType::ExecutionReport => "8",
            MsgType::MarketDataSnapshot => "W",
            MsgType::Other(value) => value,
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "0" => MsgType::Heartbeat,
            "A" => MsgType::Logon,
            "5" => MsgType::Logout,
            "D" => MsgType::NewOrderSingle,
            "8" => MsgType::ExecutionReport,
            "W" => MsgType::MarketDataSnapshot,
            other => MsgType::Other(other.to_string()),
        }
    }

    /// Session-level message handled by the session itself
    pub fn is_admin(&self) -> bool {
        matches!(self, MsgType::Heartbeat | MsgType::Logon | MsgType::Logout)
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub tag: u32,
    pub value: String,
}

/// A tag=value message. Framing tags (8, 9, 35, 10) are owned by the codec;
/// everything else lives in `fields` in insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    msg_type: MsgType,
    fields: Vec<Field>,
}

impl Message {
    pub fn new(msg_type: MsgType) -> Self {
        Self {
            msg_type,
            fields: Vec::new(),
        }
    }

    pub fn msg_type(&self) -> &MsgType {
        &self.msg_type
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Set a field, replacing an existing value for the same tag in place.
    pub fn set_field(&mut self, tag: u32, value: impl ToString) {
        debug_assert!(!tags::is_framing_tag(tag), "tag {} is codec-owned", tag);
        let value = value.to_string();
        match self.fields.iter_mut().find(|f| f.tag == tag) {
            Some(field) => field.value = value,
            None => self.fields.push(Field { tag, value }),
        }
    }

    pub fn with_field(mut self, tag: u32, value: impl ToString) -> Self {
        self.set_field(tag, value);
        self
    }

    /// Append without de-duplication; used by the decoder.
    pub(crate) fn push_field(&mut self, tag: u32, value: &str) {
        self.fields.push(Field {
            tag,
            value: value.to_string(),
        });
    }

    pub fn has_field(&self, tag: u32) -> bool {
        self.fields.iter().any(|f| f.tag == tag)
    }

    pub fn get_field(&self, tag: u32) -> SimulatorResult<&str> {
        self.fields
            .iter()
            .find(|f| f.tag == tag)
            .map(|f| f.value.as_str())
            .ok_or(SimulatorError::FieldNotFound(tag))
    }

    /// Fetch and parse a field. An unparseable value counts as not found.
    pub fn get_parsed<T: FromStr>(&self, tag: u32) -> SimulatorResult<T> {
        self.get_field(tag)?
            .parse::<T>()
            .map_err(|_| SimulatorError::FieldNotFound(tag))
    }

    pub fn seq_num(&self) -> SimulatorResult<u64> {
        self.get_parsed(tags::MSG_SEQ_NUM)
    }
}

impl fmt::Display for Message {
    /// Human-readable form with `|` standing in for SOH
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "35={}", self.msg_type)?;
        for field in &self.fields {
            write!(f, "|{}={}", field.tag, field.value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_field_replaces_in_place() {
        let mut msg = Message::new(MsgType::NewOrderSingle)
            .with_field(tags::SYMBOL, "EUR/USD")
            .with_field(tags::ORDER_QTY, 10);
        msg.set_field(tags::SYMBOL, "GBP/USD");

        assert_eq!(msg.fields().len(), 2);
        assert_eq!(msg.fields()[0].tag, tags::SYMBOL);
        assert_eq!(msg.get_field(tags::SYMBOL).unwrap(), "GBP/USD");
    }

    #[test]
    fn test_missing_and_unparseable_fields() {
        let msg = Message::new(MsgType::NewOrderSingle).with_field(tags::ORDER_QTY, "lots");

        assert_eq!(
            msg.get_field(tags::SYMBOL),
            Err(SimulatorError::FieldNotFound(tags::SYMBOL))
        );
        assert_eq!(
            msg.get_parsed::<f64>(tags::ORDER_QTY),
            Err(SimulatorError::FieldNotFound(tags::ORDER_QTY))
        );
    }

    #[test]
    fn test_msg_type_mapping() {
        assert_eq!(MsgType::parse("W"), MsgType::MarketDataSnapshot);
        assert_eq!(MsgType::parse("Z"), MsgType::Other("Z".to_string()));
        assert!(MsgType::Logout.is_admin());
        assert!(!MsgType::NewOrderSingle.is_admin());
        assert_eq!(
            Message::new(MsgType::Logon)
                .with_field(tags::MSG_SEQ_NUM, 1)
                .to_string(),
            "35=A|34=1"
        );
    }
}
