use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

/// Keeps the last `cap` bytes written to it.
#[derive(Debug)]
pub struct OutputTail {
    inner: Mutex<VecDeque<u8>>,
    cap: usize,
}

impl OutputTail {
    pub fn new(cap: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(VecDeque::with_capacity(cap.min(64 * 1024))),
            cap,
        })
    }

    pub fn push(&self, data: &[u8]) {
        if self.cap == 0 {
            return;
        }
        let mut g = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let data = if data.len() > self.cap {
            &data[data.len() - self.cap..]
        } else {
            data
        };
        let overflow = g.len().saturating_add(data.len()).saturating_sub(self.cap);
        if overflow > 0 {
            g.drain(..overflow);
        }
        g.extend(data);
    }

    /// Lossy UTF-8 rendering with surrounding whitespace trimmed.
    pub fn text(&self) -> String {
        let g = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let bytes: Vec<u8> = g.iter().copied().collect();
        String::from_utf8_lossy(&bytes).trim().to_string()
    }
}

/// Copy a child stream into `tail` until EOF. Returns bytes read.
pub(crate) fn pump<R>(mut rd: R, tail: Arc<OutputTail>) -> JoinHandle<std::io::Result<u64>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; 16 * 1024];
        let mut total = 0u64;
        loop {
            let n = rd.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            tail.push(&buf[..n]);
            total += n as u64;
        }
        Ok(total)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn keeps_only_the_newest_bytes() {
        let tail = OutputTail::new(8);
        tail.push(b"hello ");
        tail.push(b"world!");
        assert_eq!(tail.text(), "o world!");

        tail.push(b"0123456789abcdef");
        assert_eq!(tail.text(), "89abcdef");
    }

    #[test]
    fn zero_capacity_discards_everything() {
        let tail = OutputTail::new(0);
        tail.push(b"ignored");
        assert_eq!(tail.text(), "");
    }

    #[tokio::test]
    async fn pump_reads_to_eof() {
        let tail = OutputTail::new(1024);
        let total = pump(&b"line one\nline two\n"[..], Arc::clone(&tail))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(total, 18);
        assert_eq!(tail.text(), "line one\nline two");
    }
}
