//! Append-only capture buffer shared between reader threads and consumers.

use crate::error::{HarnessError, HarnessResult};
use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

const READ_CHUNK: usize = 4096;

/// Monotonically growing byte buffer.
///
/// Writers are background reader threads; every other caller only reads.
/// The buffer is `closed` once all registered writers have hit EOF.
#[derive(Clone, Debug, Default)]
pub struct OutputBuffer {
    inner: Arc<Shared>,
}

#[derive(Debug, Default)]
struct Shared {
    bytes: Mutex<Vec<u8>>,
    open_writers: AtomicUsize,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> HarnessResult<MutexGuard<'_, Vec<u8>>> {
        self.inner
            .bytes
            .lock()
            .map_err(|_| HarnessError::internal("output buffer lock poisoned"))
    }

    /// Append bytes. Only reader threads call this.
    pub fn append(&self, data: &[u8]) -> HarnessResult<()> {
        self.lock()?.extend_from_slice(data);
        Ok(())
    }

    /// Total bytes captured so far.
    pub fn len(&self) -> usize {
        self.lock().map_or(0, |bytes| bytes.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of everything captured so far.
    pub fn snapshot(&self) -> Vec<u8> {
        self.lock().map(|bytes| bytes.clone()).unwrap_or_default()
    }

    /// Bytes at or after `offset`; empty when nothing new arrived.
    pub fn read_from(&self, offset: usize) -> HarnessResult<Vec<u8>> {
        let bytes = self.lock()?;
        Ok(bytes.get(offset..).map(<[u8]>::to_vec).unwrap_or_default())
    }

    /// The last `n` bytes, for diagnostics.
    pub fn tail(&self, n: usize) -> Vec<u8> {
        self.lock()
            .map(|bytes| {
                let start = bytes.len().saturating_sub(n);
                bytes.get(start..).map(<[u8]>::to_vec).unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Whether `needle` appears anywhere in the captured bytes.
    pub fn contains(&self, needle: &[u8]) -> bool {
        if needle.is_empty() {
            return true;
        }
        self.lock()
            .map(|bytes| bytes.windows(needle.len()).any(|window| window == needle))
            .unwrap_or(false)
    }

    /// Lossy text view of the tail.
    pub fn tail_string(&self, n: usize) -> String {
        String::from_utf8_lossy(&self.tail(n)).into_owned()
    }

    /// Lossy text view of everything captured so far.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.snapshot()).into_owned()
    }

    /// True once every writer has finished and no more bytes can arrive.
    pub fn is_closed(&self) -> bool {
        self.inner.open_writers.load(Ordering::Acquire) == 0
    }

    fn register_writer(&self) {
        self.inner.open_writers.fetch_add(1, Ordering::AcqRel);
    }

    fn release_writer(&self) {
        self.inner.open_writers.fetch_sub(1, Ordering::AcqRel);
    }

    /// Spawn a thread that drains `reader` into this buffer until EOF.
    ///
    /// With `crlf` set, the terminal's `\r\n` output translation is undone so
    /// consumers see plain `\n` line endings.
    pub(crate) fn spawn_drain<R>(&self, name: &str, mut reader: R, crlf: bool) -> HarnessResult<JoinHandle<()>>
    where
        R: Read + Send + 'static,
    {
        self.register_writer();
        let buffer = self.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("attachbox-{name}"))
            .spawn(move || {
                let mut chunk = [0u8; READ_CHUNK];
                let mut normalizer = CrlfNormalizer::default();
                loop {
                    match reader.read(&mut chunk) {
                        Ok(0) => break,
                        Ok(count) => {
                            let data = chunk.get(..count).unwrap_or_default();
                            let result = if crlf {
                                buffer.append(&normalizer.push(data))
                            } else {
                                buffer.append(data)
                            };
                            if result.is_err() {
                                break;
                            }
                        }
                        Err(err) if err.kind() == ErrorKind::Interrupted => {}
                        // EIO is how a PTY master reports that the child side closed.
                        Err(_) => break,
                    }
                }
                if crlf {
                    let _ = buffer.append(&normalizer.finish());
                }
                buffer.release_writer();
            });
        match spawned {
            Ok(handle) => Ok(handle),
            Err(err) => {
                self.release_writer();
                Err(HarnessError::io("failed to spawn output reader thread", err))
            }
        }
    }
}

/// Streaming `\r\n` → `\n` conversion that survives chunk boundaries.
#[derive(Debug, Default)]
struct CrlfNormalizer {
    pending_cr: bool,
}

impl CrlfNormalizer {
    fn push(&mut self, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len() + 1);
        for &byte in data {
            if self.pending_cr {
                self.pending_cr = false;
                if byte != b'\n' {
                    out.push(b'\r');
                }
            }
            if byte == b'\r' {
                self.pending_cr = true;
            } else {
                out.push(byte);
            }
        }
        out
    }

    fn finish(&mut self) -> Vec<u8> {
        if std::mem::take(&mut self.pending_cr) {
            vec![b'\r']
        } else {
            Vec::new()
        }
    }
}
