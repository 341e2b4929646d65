//! `encode`: show the host frame for a command without sending it.

use anyhow::{Result, bail};
use fiulink::{ChannelMask, Direction, Frame, Request};

use super::link::hex;

/// Build the host frame for `request`.
///
/// Offline there are no configured channels, so batch operations need an
/// explicit mask.
pub(crate) fn encode_request(request: &Request) -> Result<Frame> {
    if let Request::SetConfig(params) = request {
        params.validate()?;
    }
    let Some(payload) = request.payload(ChannelMask::EMPTY) else {
        bail!("{} needs --channels when encoding offline", request.command().name());
    };
    Ok(Frame::with_payload(
        Direction::ToDevice,
        request.command().as_u8(),
        &payload,
    ))
}

/// JSON view of an encoded frame.
fn frame_json(request: &Request, frame: &Frame) -> serde_json::Value {
    serde_json::json!({
        "command": request.command().name(),
        "cmd_id": frame.cmd_id(),
        "payload": hex(&frame.payload()),
        "checksum": frame.checksum(),
        "frame": hex(frame.as_bytes()),
    })
}

/// Print the encoded frame to stdout.
pub(crate) fn cmd_encode(request: &Request, json: bool) -> Result<()> {
    let frame = encode_request(request)?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&frame_json(request, &frame))?
        );
    } else {
        println!("{}", hex(frame.as_bytes()));
    }
    Ok(())
}
