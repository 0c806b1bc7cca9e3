//! Message encoder.

use crate::decoder::missing_header;
use crate::error::{CodecError, CodecResult};
use crate::headers::names;
use crate::limits::{CodecLimits, LENGTH_PREFIX_SIZE};
use crate::message::{parse_version_tag, Message, MAX_SUPPORTED_VERSION, MIN_SUPPORTED_VERSION};

/// Encode a message with the default limits.
///
/// # Errors
///
/// Returns `Encoding` if a header cannot be carried unambiguously, the
/// `type` header disagrees with the message kind, a header the kind
/// requires is missing, or a limit is exceeded.
pub fn encode(message: &Message) -> CodecResult<Vec<u8>> {
    MessageEncoder::new(CodecLimits::default()).encode(message)
}

/// Encodes messages into length-prefixed frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageEncoder {
    limits: CodecLimits,
}

impl MessageEncoder {
    /// Creates an encoder enforcing `limits`.
    pub fn new(limits: CodecLimits) -> Self {
        Self { limits }
    }

    /// Returns the limits this encoder enforces.
    pub fn limits(&self) -> &CodecLimits {
        &self.limits
    }

    /// Encodes one message into a complete frame.
    pub fn encode(&self, message: &Message) -> CodecResult<Vec<u8>> {
        check_type(message)?;
        check_protocol(message)?;
        if let Some(name) = missing_header(message.kind(), message.headers()) {
            return Err(CodecError::encoding(format!(
                "{} message is missing required header '{name}'",
                message.kind()
            )));
        }

        if message.body().len() > self.limits.max_records {
            return Err(CodecError::encoding(format!(
                "body has {} records, limit is {}",
                message.body().len(),
                self.limits.max_records
            )));
        }

        let mut text = String::new();
        for (key, value) in message.headers().iter() {
            check_header(key, value)?;
            text.push_str(key);
            text.push_str(": ");
            text.push_str(value);
            text.push('\n');
        }
        text.push('\n');

        for record in message.body() {
            record.write_line(&mut text)?;
        }

        let total = LENGTH_PREFIX_SIZE + text.len();
        if total > self.limits.max_message_size {
            return Err(CodecError::encoding(format!(
                "encoded message is {total} bytes, limit is {}",
                self.limits.max_message_size
            )));
        }
        let prefix = u32::try_from(total)
            .map_err(|_| CodecError::encoding("message too large for the length prefix"))?;

        let mut frame = Vec::with_capacity(total);
        frame.extend_from_slice(&prefix.to_be_bytes());
        frame.extend_from_slice(text.as_bytes());
        Ok(frame)
    }
}

fn check_type(message: &Message) -> CodecResult<()> {
    match message.header(names::TYPE) {
        Some(tag) if tag.eq_ignore_ascii_case(message.kind().as_str()) => Ok(()),
        Some(tag) => Err(CodecError::encoding(format!(
            "'type' header '{tag}' does not match message kind {}",
            message.kind()
        ))),
        None => Err(CodecError::encoding("message has no 'type' header")),
    }
}

fn check_protocol(message: &Message) -> CodecResult<()> {
    let tag = message
        .header(names::PROTOCOL)
        .ok_or_else(|| CodecError::encoding("message has no 'protocol' header"))?;
    match parse_version_tag(tag) {
        Some(v) if (MIN_SUPPORTED_VERSION..=MAX_SUPPORTED_VERSION).contains(&v) => Ok(()),
        _ => Err(CodecError::encoding(format!(
            "cannot encode protocol version '{tag}'"
        ))),
    }
}

fn check_header(key: &str, value: &str) -> CodecResult<()> {
    if key.is_empty() {
        return Err(CodecError::encoding("header key must not be empty"));
    }
    if key.contains(':') || key.contains(['\n', '\r']) || key.trim() != key {
        return Err(CodecError::encoding(format!(
            "header key '{}' cannot be encoded",
            key.escape_debug()
        )));
    }
    if value.contains(['\n', '\r']) {
        return Err(CodecError::encoding(format!(
            "value of header '{key}' contains a line break"
        )));
    }
    Ok(())
}
