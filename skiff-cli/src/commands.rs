//! Command execution.

use colored::Colorize;
use skiff_client::Client;
use skiff_protocol::value::decode_untyped;
use skiff_protocol::{read_envelope, CodecOptions, Decoder, TType, Value};
use std::error::Error;

/// Sends `args_hex` as the args struct of `method` and renders the result.
pub async fn call(
    client: &Client,
    method: &str,
    args_hex: &str,
    oneway: bool,
) -> Result<String, Box<dyn Error>> {
    let args = parse_hex(args_hex)?;
    // Catch malformed args locally instead of drawing a protocol error.
    decode_struct(&args, client.connection().config().codec)?;
    tracing::debug!("Calling '{}' with {} arg bytes", method, args.len());

    if oneway {
        client.connection().send_oneway_raw(method, &args).await?;
        return Ok(format!("{} {}", "Sent".green(), method.cyan()));
    }

    let body = client.call_raw(method, &args).await?;
    let result = decode_struct(&body, client.connection().config().codec)?;
    Ok(format!(
        "{} {}\n{}",
        "Reply".green(),
        method.cyan(),
        format_json(&result)
    ))
}

/// Decodes a hex dump of a message (optionally framed) or a bare struct.
pub fn decode(input: &str, options: CodecOptions, struct_only: bool) -> Result<String, Box<dyn Error>> {
    let bytes = parse_hex(input)?;
    let payload = strip_frame(&bytes);

    if struct_only {
        return Ok(format_json(&decode_struct(payload, options)?));
    }

    let mut dec = Decoder::with_options(payload.to_vec(), options);
    let header = read_envelope(&mut dec)?;
    let body = decode_struct(dec.peek_remaining(), options)?;
    Ok(format!(
        "{} {} seq={}\n{}",
        header.kind.to_string().bold(),
        header.name.cyan(),
        header.seq_id,
        format_json(&body)
    ))
}

/// Parses hex input, ignoring whitespace and an optional `0x` prefix.
fn parse_hex(input: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let digits = compact
        .strip_prefix("0x")
        .or_else(|| compact.strip_prefix("0X"))
        .unwrap_or(&compact);
    hex::decode(digits)
}

/// Drops a frame length prefix when it matches the rest of the input.
fn strip_frame(bytes: &[u8]) -> &[u8] {
    if bytes.len() >= 4 {
        let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        if len == bytes.len() - 4 {
            return &bytes[4..];
        }
    }
    bytes
}

fn decode_struct(bytes: &[u8], options: CodecOptions) -> Result<Value, Box<dyn Error>> {
    let mut dec = Decoder::with_options(bytes.to_vec(), options);
    let value = decode_untyped(&mut dec, TType::Struct)?;
    if !dec.is_empty() {
        return Err(format!("{} trailing bytes after struct", dec.remaining()).into());
    }
    Ok(value)
}

/// Formats a decoded value as JSON for display.
fn format_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| format!("{:?}", value))
}
