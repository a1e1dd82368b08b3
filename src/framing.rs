//! Bounded newline framing shared by the driver socket and the mount proxy.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Longest line either server accepts, terminator excluded.
pub(crate) const MAX_LINE_BYTES: usize = 1 << 20;

/// One read from a newline-framed stream.
#[derive(Debug, Eq, PartialEq)]
pub(crate) enum Frame {
    /// A line without its terminator. The last line may lack one.
    Line(Vec<u8>),
    /// The line ran past the limit and was skipped up to its terminator.
    TooLong,
    /// The peer closed its end.
    Closed,
}

/// Reads the next line, never buffering more than `limit + 1` bytes of it.
pub(crate) async fn read_frame<R>(reader: &mut R, limit: usize) -> io::Result<Frame>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let cap = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
    let read = (&mut *reader).take(cap).read_until(b'\n', &mut line).await?;
    if read == 0 {
        return Ok(Frame::Closed);
    }
    if line.last() == Some(&b'\n') {
        line.pop();
    } else if line.len() > limit {
        skip_line(reader).await?;
        return Ok(Frame::TooLong);
    }
    Ok(Frame::Line(line))
}

async fn skip_line<R>(reader: &mut R) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let buffered = reader.fill_buf().await?;
        if buffered.is_empty() {
            return Ok(());
        }
        let (consumed, done) = match buffered.iter().position(|byte| *byte == b'\n') {
            Some(index) => (index + 1, true),
            None => (buffered.len(), false),
        };
        reader.consume(consumed);
        if done {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    async fn frames(input: &[u8], limit: usize) -> Vec<Frame> {
        let mut reader = input;
        let mut seen = Vec::new();
        loop {
            let frame = read_frame(&mut reader, limit)
                .await
                .unwrap_or_else(|err| panic!("read: {err}"));
            if frame == Frame::Closed {
                return seen;
            }
            seen.push(frame);
        }
    }

    #[rstest]
    #[case::two_lines(b"ab\ncd\n", vec![Frame::Line(b"ab".to_vec()), Frame::Line(b"cd".to_vec())])]
    #[case::unterminated_tail(b"ab\ncd", vec![Frame::Line(b"ab".to_vec()), Frame::Line(b"cd".to_vec())])]
    #[case::exactly_at_limit(b"abcd\n", vec![Frame::Line(b"abcd".to_vec())])]
    #[case::over_limit_then_resync(b"abcdefgh\nok\n", vec![Frame::TooLong, Frame::Line(b"ok".to_vec())])]
    #[case::over_limit_at_eof(b"abcdefgh", vec![Frame::TooLong])]
    #[case::empty(b"", Vec::new())]
    #[tokio::test]
    async fn lines_are_split_and_capped(#[case] input: &[u8], #[case] expected: Vec<Frame>) {
        assert_eq!(frames(input, 4).await, expected);
    }
}
