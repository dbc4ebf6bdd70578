//! Kernel log ring buffer.
//!
//! A fixed-size ring of variable-length records, each a [`LogHeader`]
//! followed by the message text, padded to 8-byte alignment. `head` and
//! `tail` are absolute byte counters (never wrapped); the byte offset of
//! a record is `counter & (LOG_BUF_SIZE - 1)`. Records never straddle
//! the end of the buffer: when one would, the remaining tail space is
//! filled with a zero-length pad marker and the record starts at offset
//! zero again.
//!
//! Readers address records by sequence number. Sequences older than
//! `tail_seq` have been overwritten; a read for one snaps forward to the
//! oldest record still present.

use crate::config::{LOG_BUF_SIZE, PRINTK_BUF_SIZE};
use crate::sync::IrqSpinLock;

const LOG_ALIGN: usize = 8;

const HDR_SIZE: usize = core::mem::size_of::<LogHeader>();

/// On-buffer record header. 16 bytes, 8-byte aligned.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct LogHeader {
    /// Length of the message text in bytes. Zero marks buffer-tail padding.
    pub len: u16,
    /// printk severity (0 = emergency .. 7 = debug).
    pub level: u8,
    flags: u8,
    _reserved: u32,
    /// Milliseconds of uptime when the record was committed.
    pub ts_ms: u64,
}

/// The log ring proper. One global instance lives behind an
/// [`IrqSpinLock`]; tests build their own.
pub struct LogRing {
    buf: [u8; LOG_BUF_SIZE],
    head: u64,
    tail: u64,
    head_seq: u64,
    tail_seq: u64,
}

const fn align_rec(len: usize) -> usize {
    (len + LOG_ALIGN - 1) & !(LOG_ALIGN - 1)
}

impl LogRing {
    pub const fn new() -> Self {
        Self {
            buf: [0; LOG_BUF_SIZE],
            head: 0,
            tail: 0,
            head_seq: 0,
            tail_seq: 0,
        }
    }

    /// Sequence number the next written record will get.
    pub fn head_seq(&self) -> u64 {
        self.head_seq
    }

    /// Sequence number of the oldest record still in the buffer.
    pub fn tail_seq(&self) -> u64 {
        self.tail_seq
    }

    fn offset(counter: u64) -> usize {
        (counter as usize) & (LOG_BUF_SIZE - 1)
    }

    fn header_at(&self, off: usize) -> LogHeader {
        // Alignment is guaranteed by record layout, but read_unaligned
        // keeps this independent of it.
        unsafe { core::ptr::read_unaligned(self.buf.as_ptr().add(off) as *const LogHeader) }
    }

    fn put_header(&mut self, off: usize, hdr: LogHeader) {
        unsafe {
            core::ptr::write_unaligned(self.buf.as_mut_ptr().add(off) as *mut LogHeader, hdr);
        }
    }

    /// Drop the oldest record (or tail padding) to make room.
    fn evict_oldest(&mut self) {
        let off = Self::offset(self.tail);
        let room = LOG_BUF_SIZE - off;

        if room < HDR_SIZE {
            self.tail += room as u64;
            return;
        }

        let hdr = self.header_at(off);
        if hdr.len == 0 {
            // Pad marker: skip to the start of the buffer.
            self.tail += room as u64;
            return;
        }

        self.tail += align_rec(HDR_SIZE + hdr.len as usize) as u64;
        self.tail_seq += 1;
    }

    /// Append one record. Returns the number of text bytes stored.
    pub fn write(&mut self, level: u8, text: &str) -> usize {
        let bytes = text.as_bytes();
        let len = bytes.len().min(PRINTK_BUF_SIZE);
        if len == 0 {
            return 0;
        }

        let rec = align_rec(HDR_SIZE + len);
        let head_off = Self::offset(self.head);
        let room = LOG_BUF_SIZE - head_off;
        let need = if room >= rec { rec } else { room + rec };

        while LOG_BUF_SIZE - ((self.head - self.tail) as usize) < need {
            self.evict_oldest();
        }

        if room < rec {
            // Pad out to the end of the buffer so the record is contiguous.
            if room >= HDR_SIZE {
                self.put_header(
                    head_off,
                    LogHeader {
                        len: 0,
                        level: 0,
                        flags: 0,
                        _reserved: 0,
                        ts_ms: 0,
                    },
                );
            }
            self.head += room as u64;
        }

        let off = Self::offset(self.head);
        self.put_header(
            off,
            LogHeader {
                len: len as u16,
                level,
                flags: 0,
                _reserved: 0,
                ts_ms: crate::arch::timer::uptime_ms(),
            },
        );
        self.buf[off + HDR_SIZE..off + HDR_SIZE + len].copy_from_slice(&bytes[..len]);

        self.head += rec as u64;
        self.head_seq += 1;
        len
    }

    /// Copy the record with sequence number `*seq` into `out`.
    ///
    /// Returns `None` when `*seq` has not been written yet. A sequence
    /// older than the live window snaps forward to the oldest record.
    /// At most `out.len() - 1` bytes are copied and a NUL terminator is
    /// appended; on success `*seq` is advanced by one.
    pub fn read(&self, out: &mut [u8], seq: &mut u64) -> Option<(LogHeader, usize)> {
        if out.is_empty() || *seq >= self.head_seq {
            return None;
        }
        if *seq < self.tail_seq {
            *seq = self.tail_seq;
        }

        // Walk forward from the tail to the requested record.
        let mut idx = self.tail;
        let mut remaining = *seq - self.tail_seq;
        let (hdr, off) = loop {
            let off = Self::offset(idx);
            let room = LOG_BUF_SIZE - off;
            if room < HDR_SIZE {
                idx += room as u64;
                continue;
            }
            let hdr = self.header_at(off);
            if hdr.len == 0 {
                idx += room as u64;
                continue;
            }
            if remaining == 0 {
                break (hdr, off);
            }
            remaining -= 1;
            idx += align_rec(HDR_SIZE + hdr.len as usize) as u64;
        };

        let copied = (hdr.len as usize).min(out.len() - 1);
        out[..copied].copy_from_slice(&self.buf[off + HDR_SIZE..off + HDR_SIZE + copied]);
        out[copied] = 0;
        *seq += 1;
        Some((hdr, copied))
    }
}

impl Default for LogRing {
    fn default() -> Self {
        Self::new()
    }
}

/// The global kernel log.
static LOG_RING: IrqSpinLock<LogRing> = IrqSpinLock::new(LogRing::new());

/// Commit one record to the global log. Returns the stored text length.
pub fn klog_write(level: u8, text: &str) -> usize {
    LOG_RING.lock().write(level, text)
}

/// Read the record at `*seq` from the global log. See [`LogRing::read`].
pub fn klog_read(out: &mut [u8], seq: &mut u64) -> Option<(LogHeader, usize)> {
    LOG_RING.lock().read(out, seq)
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use std::{boxed::Box, format, string::String, vec::Vec};

    fn ring() -> Box<LogRing> {
        Box::new(LogRing::new())
    }

    fn read_text(ring: &LogRing, seq: &mut u64) -> Option<String> {
        let mut buf = [0u8; 600];
        ring.read(&mut buf, seq).map(|(_, n)| {
            String::from_utf8(buf[..n].to_vec()).expect("log text is valid UTF-8")
        })
    }

    #[test]
    fn test_records_read_back_in_write_order() {
        let mut r = ring();
        let texts: Vec<String> = (0..10).map(|i| format!("record number {}", i)).collect();
        for t in &texts {
            r.write(6, t);
        }

        let mut seq = 0;
        for t in &texts {
            let got = read_text(&r, &mut seq).expect("record should be readable");
            assert_eq!(&got, t);
        }
        assert!(read_text(&r, &mut seq).is_none());
    }

    #[test]
    fn test_header_fields() {
        let mut r = ring();
        r.write(3, "an error line");

        let mut buf = [0u8; 64];
        let mut seq = 0;
        let (hdr, n) = r.read(&mut buf, &mut seq).expect("record present");
        assert_eq!(hdr.level, 3);
        assert_eq!(hdr.len as usize, "an error line".len());
        assert_eq!(n, "an error line".len());
        assert_eq!(buf[n], 0);
    }

    #[test]
    fn test_eviction_keeps_newest_and_snaps_old_sequences() {
        let mut r = ring();
        // Write about 3x the ring capacity.
        let msg = "x".repeat(112);
        let rec = super::align_rec(HDR_SIZE + msg.len());
        let total = (3 * LOG_BUF_SIZE) / rec + 1;
        for i in 0..total {
            r.write(6, &format!("{:04}{}", i, &msg[4..]));
        }

        assert!(r.tail_seq() > 0, "old records must have been evicted");

        // Reading from sequence 0 snaps to the oldest live record.
        let mut seq = 0;
        let first = read_text(&r, &mut seq).expect("oldest live record readable");
        assert_eq!(seq, r.tail_seq() + 1);
        let first_idx: usize = first[..4].parse().expect("record carries its index");
        assert_eq!(first_idx as u64, r.tail_seq());

        // The live window is roughly ring_size / record_size records.
        let live = (r.head_seq() - r.tail_seq()) as usize;
        let expect = LOG_BUF_SIZE / rec;
        assert!(
            live >= expect - 2 && live <= expect + 2,
            "live records {} vs expected {}",
            live,
            expect
        );

        // And the remainder reads back in order.
        let mut prev = first_idx;
        while let Some(t) = read_text(&r, &mut seq) {
            let idx: usize = t[..4].parse().expect("record carries its index");
            assert_eq!(idx, prev + 1);
            prev = idx;
        }
        assert_eq!(prev + 1, total);
    }

    #[test]
    fn test_truncating_read_null_terminates() {
        let mut r = ring();
        r.write(6, "a fairly long message body");

        let mut buf = [0u8; 8];
        let mut seq = 0;
        let (hdr, n) = r.read(&mut buf, &mut seq).expect("record present");
        assert_eq!(n, 7);
        assert_eq!(&buf[..7], b"a fairl");
        assert_eq!(buf[7], 0);
        assert_eq!(hdr.len as usize, "a fairly long message body".len());
    }

    #[test]
    fn test_empty_write_is_dropped() {
        let mut r = ring();
        assert_eq!(r.write(6, ""), 0);
        assert_eq!(r.head_seq(), 0);
    }
}
