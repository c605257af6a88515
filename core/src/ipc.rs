use anyhow::{Context, Result};
use relay_api::Frame;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Read a single line-delimited JSON frame. Returns `Ok(None)` once the peer
/// closed its side.
///
/// Only transport failures surface as `std::io::Error`. A line that is not
/// UTF-8 or not a frame is consumed and reported as a plain decode error, so
/// the caller can keep reading.
pub async fn read_frame<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<Frame>> {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        let line = std::str::from_utf8(&buf).context("frame is not valid UTF-8")?;
        if !line.trim().is_empty() {
            return Frame::parse(line).map(Some);
        }
    }
}

/// Write a single frame as line-delimited JSON.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> Result<()> {
    let s = frame.to_json()?;
    writer.write_all(s.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn blank_lines_are_skipped() {
        let input = b"\n  \n{\"kind\":\"subscribe\",\"destination\":\"/topic/a\"}\n";
        let mut reader = BufReader::new(&input[..]);
        let frame = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(frame, Frame::subscribe("/topic/a"));
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_utf8_line_is_skipped_not_fatal() {
        let input = b"\xff\xfe\n{\"kind\":\"subscribe\",\"destination\":\"/topic/a\"}\n";
        let mut reader = BufReader::new(&input[..]);
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(err.downcast_ref::<std::io::Error>().is_none());
        assert!(format!("{err:#}").contains("not valid UTF-8"));
        let frame = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(frame, Frame::subscribe("/topic/a"));
    }

    #[tokio::test]
    async fn written_frames_are_newline_terminated() {
        let mut out = Vec::new();
        write_frame(&mut out, &Frame::send("/app/request", "hi")).await.unwrap();
        assert_eq!(out.last(), Some(&b'\n'));
        let mut reader = BufReader::new(&out[..]);
        let frame = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(frame.payload.as_deref(), Some("hi"));
    }
}
