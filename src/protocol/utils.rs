//! pkt-line helpers shared by the advertisement rewriter and the upstream adapter: encoding
//! length-prefixed lines, decoding them back, and the smart HTTP reply framing.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::types::{MAX_PKT_LINE_LEN, PKT_LINE_END_MARKER, ProtocolError};

/// One decoded pkt-line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine {
    /// The `0000` flush packet.
    Flush,
    Data(Bytes),
}

impl PktLine {
    /// Payload without the trailing LF, if any.
    pub fn text(&self) -> Option<&[u8]> {
        match self {
            PktLine::Flush => None,
            PktLine::Data(data) => Some(data.strip_suffix(b"\n").unwrap_or(data)),
        }
    }
}

/// Parse the 4 byte hexadecimal length prefix of a pkt-line.
pub fn parse_pkt_len(prefix: &[u8]) -> Result<usize, ProtocolError> {
    let text = core::str::from_utf8(prefix)
        .map_err(|_| ProtocolError::invalid_request("Invalid UTF-8 in packet length"))?;
    let len = usize::from_str_radix(text, 16).map_err(|_| {
        ProtocolError::InvalidRequest(format!("Invalid hex packet length: {text:?}"))
    })?;
    if len != 0 && len < 4 {
        return Err(ProtocolError::InvalidRequest(format!(
            "Invalid packet length: {len} (must be >= 4)"
        )));
    }
    Ok(len)
}

/// Read a packet line from the given bytes buffer, advancing it past the packet.
pub fn read_pkt_line(bytes: &mut Bytes) -> Result<PktLine, ProtocolError> {
    if bytes.len() < 4 {
        return Err(ProtocolError::invalid_request("Truncated packet length"));
    }

    let pkt_length = parse_pkt_len(&bytes[..4])?;
    if pkt_length == 0 {
        bytes.advance(4);
        return Ok(PktLine::Flush);
    }

    if bytes.len() < pkt_length {
        return Err(ProtocolError::InvalidRequest(format!(
            "Insufficient data: need {} bytes, have {}",
            pkt_length,
            bytes.len()
        )));
    }

    bytes.advance(4);
    let pkt_line = bytes.split_to(pkt_length - 4);
    tracing::trace!("pkt line: {:?}", pkt_line);
    Ok(PktLine::Data(pkt_line))
}

/// Add a packet line string to the buffer with proper length prefix
pub fn add_pkt_line_string(
    pkt_line_stream: &mut BytesMut,
    buf_str: String,
) -> Result<(), ProtocolError> {
    let buf_str_length = buf_str.len() + 4;
    if buf_str_length > MAX_PKT_LINE_LEN {
        return Err(ProtocolError::Encoding(format!(
            "pkt-line of {buf_str_length} bytes exceeds the {MAX_PKT_LINE_LEN} byte limit"
        )));
    }
    pkt_line_stream.put(Bytes::from(format!("{buf_str_length:04x}")));
    pkt_line_stream.put(buf_str.as_bytes());
    Ok(())
}

/// Build a smart HTTP reply: service announcement, flush, one packet per line, flush.
pub fn build_smart_reply(ref_list: &[String], service: String) -> Result<BytesMut, ProtocolError> {
    let mut pkt_line_stream = BytesMut::new();
    add_pkt_line_string(&mut pkt_line_stream, format!("# service={service}\n"))?;
    pkt_line_stream.put(&PKT_LINE_END_MARKER[..]);

    for ref_line in ref_list {
        add_pkt_line_string(&mut pkt_line_stream, ref_line.to_string())?;
    }
    pkt_line_stream.put(&PKT_LINE_END_MARKER[..]);
    Ok(pkt_line_stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_prefix_counts_itself_and_newline() {
        let mut buf = BytesMut::new();
        add_pkt_line_string(&mut buf, "NAK\n".to_string()).unwrap();
        assert_eq!(&buf[..], b"0008NAK\n");
    }

    #[test]
    fn oversized_line_is_an_encoding_error() {
        let mut buf = BytesMut::new();
        let err = add_pkt_line_string(&mut buf, "x".repeat(MAX_PKT_LINE_LEN)).unwrap_err();
        assert!(matches!(err, ProtocolError::Encoding(_)));
        assert!(buf.is_empty());
    }

    #[test]
    fn read_data_then_flush() {
        let mut bytes = Bytes::from_static(b"000ahello\n0000");
        let line = read_pkt_line(&mut bytes).unwrap();
        assert_eq!(line, PktLine::Data(Bytes::from_static(b"hello\n")));
        assert_eq!(line.text(), Some(&b"hello"[..]));
        assert_eq!(read_pkt_line(&mut bytes).unwrap(), PktLine::Flush);
        assert!(bytes.is_empty());
    }

    #[test]
    fn malformed_lengths_are_rejected() {
        assert!(read_pkt_line(&mut Bytes::from_static(b"00")).is_err());
        assert!(read_pkt_line(&mut Bytes::from_static(b"zzzzdata")).is_err());
        assert!(read_pkt_line(&mut Bytes::from_static(b"0002")).is_err());
        assert!(read_pkt_line(&mut Bytes::from_static(b"0010short")).is_err());
    }

    #[test]
    fn smart_reply_frames_service_and_refs() {
        let reply = build_smart_reply(&["a b\n".to_string()], "git-upload-pack".to_string())
            .unwrap();
        assert_eq!(
            &reply[..],
            b"001e# service=git-upload-pack\n00000008a b\n0000"
        );
    }
}
