use std::io::{self, Write};

/// Receives transfer progress as a whole-number percentage (0..=100).
///
/// Implemented for any `FnMut(u8)`, so a closure forwarding into a channel
/// works as an observer.
pub trait ProgressObserver {
    fn on_progress(&mut self, percent: u8);
}

impl<F> ProgressObserver for F
where
    F: FnMut(u8),
{
    fn on_progress(&mut self, percent: u8) {
        self(percent)
    }
}

/// Write `payload` to `sink` in pieces of at most `chunk_size` bytes.
///
/// Each chunk is written completely before the next one starts, and the
/// observer sees `floor(sent * 100 / total)` after every chunk. An empty
/// payload writes nothing and reports nothing.
pub fn send_chunked<W: Write + ?Sized>(
    sink: &mut W,
    payload: &[u8],
    chunk_size: usize,
    mut progress: Option<&mut dyn ProgressObserver>,
) -> io::Result<()> {
    if chunk_size == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "chunk size must be greater than zero",
        ));
    }

    if payload.is_empty() {
        return Ok(());
    }

    let total = payload.len() as u64;
    let mut sent: u64 = 0;

    for chunk in payload.chunks(chunk_size) {
        sink.write_all(chunk)?;
        sent += chunk.len() as u64;

        if let Some(observer) = progress.as_mut() {
            observer.on_progress((sent * 100 / total) as u8);
        }
    }

    log::trace!("Sent {} bytes in chunks of {}", total, chunk_size);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records the size of every write call
    #[derive(Default)]
    struct RecordingSink {
        writes: Vec<usize>,
        data: Vec<u8>,
    }

    impl Write for RecordingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.writes.push(buf.len());
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_ten_thousand_bytes_in_4096_chunks() {
        let payload = vec![0xABu8; 10_000];
        let mut sink = RecordingSink::default();
        let mut seen = Vec::new();
        let mut observer = |p: u8| seen.push(p);

        send_chunked(&mut sink, &payload, 4096, Some(&mut observer)).unwrap();

        assert_eq!(sink.writes, vec![4096, 4096, 1808]);
        assert_eq!(sink.data, payload);
        assert_eq!(seen, vec![40, 81, 100]);
    }

    #[test]
    fn test_write_count_is_ceiling_of_size_over_chunk() {
        for (size, chunk) in [(1usize, 4096usize), (4096, 4096), (4097, 4096), (999, 10)] {
            let payload = vec![1u8; size];
            let mut sink = RecordingSink::default();
            let mut seen: Vec<u8> = Vec::new();
            let mut observer = |p: u8| seen.push(p);

            send_chunked(&mut sink, &payload, chunk, Some(&mut observer)).unwrap();

            assert_eq!(sink.writes.len(), size.div_ceil(chunk));
            assert_eq!(sink.writes.iter().sum::<usize>(), size);
            assert!(seen.windows(2).all(|w| w[0] <= w[1]));
            assert_eq!(seen.last(), Some(&100));
        }
    }

    #[test]
    fn test_empty_payload_is_noop() {
        let mut sink = RecordingSink::default();
        let mut calls = 0;
        let mut observer = |_: u8| calls += 1;

        send_chunked(&mut sink, &[], 4096, Some(&mut observer)).unwrap();

        assert!(sink.writes.is_empty());
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_zero_chunk_size_is_invalid() {
        let mut sink = RecordingSink::default();
        let err = send_chunked(&mut sink, &[1, 2, 3], 0, None).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_progress_into_channel() {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut observer = move |p: u8| {
            let _ = tx.send(p);
        };

        let mut sink = Vec::new();
        send_chunked(&mut sink, &[0u8; 300], 100, Some(&mut observer)).unwrap();
        drop(observer);

        assert_eq!(rx.iter().collect::<Vec<_>>(), vec![33, 66, 100]);
    }

    #[test]
    fn test_write_failure_stops_transfer() {
        struct FailingSink {
            remaining: usize,
        }

        impl Write for FailingSink {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                if self.remaining == 0 {
                    return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"));
                }
                self.remaining -= 1;
                Ok(buf.len())
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut sink = FailingSink { remaining: 1 };
        let mut seen = Vec::new();
        let mut observer = |p: u8| seen.push(p);

        let err = send_chunked(&mut sink, &[0u8; 30], 10, Some(&mut observer)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(seen, vec![33]);
    }
}
