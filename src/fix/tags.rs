//! Tag numbers and message types used by the simulator.

pub const AVG_PX: u32 = 6;
pub const BEGIN_STRING: u32 = 8;
pub const BODY_LENGTH: u32 = 9;
pub const CHECKSUM: u32 = 10;
pub const CL_ORD_ID: u32 = 11;
pub const LAST_PX: u32 = 31;
pub const MSG_SEQ_NUM: u32 = 34;
pub const MSG_TYPE: u32 = 35;
pub const ORDER_QTY: u32 = 38;
pub const ORD_TYPE: u32 = 40;
pub const PRICE: u32 = 44;
pub const SENDER_COMP_ID: u32 = 49;
pub const SENDING_TIME: u32 = 52;
pub const SIDE: u32 = 54;
pub const SYMBOL: u32 = 55;
pub const TARGET_COMP_ID: u32 = 56;
pub const TEXT: u32 = 58;
pub const TRANSACT_TIME: u32 = 60;
pub const ENCRYPT_METHOD: u32 = 98;
pub const HEART_BT_INT: u32 = 108;

/// Standard header fields, emitted right after MsgType in this order.
pub const HEADER_ORDER: [u32; 4] = [SENDER_COMP_ID, TARGET_COMP_ID, MSG_SEQ_NUM, SENDING_TIME];

/// Tags owned by the codec; never stored as message fields.
pub fn is_framing_tag(tag: u32) -> bool {
    matches!(tag, BEGIN_STRING | BODY_LENGTH | MSG_TYPE | CHECKSUM)
}
