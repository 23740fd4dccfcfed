//! Capture File Decoding
//!
//! Reads classic pcap files (microsecond timestamps, either byte order) holding
//! radiotap + 802.11 frames and folds every probe request into an
//! [`ObservationSet`]. Only a missing or unrecognized magic number aborts a
//! decode; a header cut short after the magic reads as an empty capture, and
//! short or malformed records are skipped while the rest of the file is still read.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use tracing::{debug, info, trace, warn};

use super::ieee80211::parse_probe_request;
use super::radiotap;
use crate::error::CaptureError;
use crate::ignore::IgnoreLists;
use crate::models::ObservationSet;

/// Size of the pcap global header
pub const GLOBAL_HEADER_LEN: usize = 24;

/// Size of the magic number opening the global header
const MAGIC_LEN: usize = 4;

/// Size of each per-record header
pub const RECORD_HEADER_LEN: usize = 16;

/// Magic as stored by a little-endian writer
const MAGIC_LE: [u8; 4] = [0xd4, 0xc3, 0xb2, 0xa1];
/// Magic as stored by a big-endian writer
const MAGIC_BE: [u8; 4] = [0xa1, 0xb2, 0xc3, 0xd4];

/// Byte order of the header fields, selected by the magic number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    fn u16(self, b: &[u8]) -> u16 {
        let raw = [b[0], b[1]];
        match self {
            ByteOrder::Little => u16::from_le_bytes(raw),
            ByteOrder::Big => u16::from_be_bytes(raw),
        }
    }

    fn u32(self, b: &[u8]) -> u32 {
        let raw = [b[0], b[1], b[2], b[3]];
        match self {
            ByteOrder::Little => u32::from_le_bytes(raw),
            ByteOrder::Big => u32::from_be_bytes(raw),
        }
    }
}

/// pcap global header
#[derive(Debug, Clone)]
pub struct PcapHeader {
    pub byte_order: ByteOrder,
    pub version_major: u16,
    pub version_minor: u16,
    pub snaplen: u32,
    /// Link type (127 = radiotap, 105 = bare 802.11)
    pub linktype: u32,
    /// False when the stream ended inside the header; no records follow
    pub complete: bool,
}

impl PcapHeader {
    /// Parse the global header. Only the magic is mandatory: a valid magic
    /// followed by a short header leaves the remaining fields zeroed and
    /// `complete` unset.
    pub fn parse(data: &[u8]) -> Result<Self, CaptureError> {
        if data.len() < MAGIC_LEN {
            return Err(CaptureError::TruncatedHeader(data.len()));
        }

        let byte_order = match [data[0], data[1], data[2], data[3]] {
            MAGIC_LE => ByteOrder::Little,
            MAGIC_BE => ByteOrder::Big,
            other => return Err(CaptureError::InvalidMagic(u32::from_be_bytes(other))),
        };

        if data.len() < GLOBAL_HEADER_LEN {
            debug!("pcap header cut short at {} bytes", data.len());
            return Ok(Self {
                byte_order,
                version_major: 0,
                version_minor: 0,
                snaplen: 0,
                linktype: 0,
                complete: false,
            });
        }

        Ok(Self {
            byte_order,
            version_major: byte_order.u16(&data[4..]),
            version_minor: byte_order.u16(&data[6..]),
            snaplen: byte_order.u32(&data[16..]),
            linktype: byte_order.u32(&data[20..]),
            complete: true,
        })
    }
}

/// One captured record
#[derive(Debug, Clone)]
pub struct PcapRecord {
    pub ts_sec: u32,
    pub ts_usec: u32,
    pub orig_len: u32,
    /// Captured bytes (`incl_len` of them)
    pub data: Vec<u8>,
}

/// Streaming pcap reader
pub struct PcapReader<R: Read> {
    reader: R,
    header: PcapHeader,
}

impl<R: Read> PcapReader<R> {
    /// Read and validate the global header
    pub fn new(mut reader: R) -> Result<Self, CaptureError> {
        let mut buf = [0u8; GLOBAL_HEADER_LEN];
        let n = read_up_to(&mut reader, &mut buf)?;
        let header = PcapHeader::parse(&buf[..n])?;
        Ok(Self { reader, header })
    }

    pub fn header(&self) -> &PcapHeader {
        &self.header
    }

    /// Next record, or `None` at end of stream. A trailing record cut short
    /// (header or payload) also ends the stream.
    pub fn next_record(&mut self) -> Result<Option<PcapRecord>, CaptureError> {
        if !self.header.complete {
            return Ok(None);
        }

        let mut hdr = [0u8; RECORD_HEADER_LEN];
        if read_up_to(&mut self.reader, &mut hdr)? < RECORD_HEADER_LEN {
            return Ok(None);
        }

        let order = self.header.byte_order;
        let ts_sec = order.u32(&hdr[0..]);
        let ts_usec = order.u32(&hdr[4..]);
        let incl_len = order.u32(&hdr[8..]);
        let orig_len = order.u32(&hdr[12..]);

        // Grows with the data actually present, so a bogus length cannot
        // force a huge allocation.
        let mut data = Vec::new();
        (&mut self.reader).take(incl_len as u64).read_to_end(&mut data)?;
        if data.len() < incl_len as usize {
            trace!("Truncated record: {} of {} bytes", data.len(), incl_len);
            return Ok(None);
        }

        Ok(Some(PcapRecord {
            ts_sec,
            ts_usec,
            orig_len,
            data,
        }))
    }
}

/// Fill as much of `buf` as the reader can provide
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Per-pass counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub records: u64,
    pub probes: u64,
    /// Records too short for a radiotap length field
    pub skipped: u64,
    /// Probe requests dropped by the MAC ignore list
    pub ignored: u64,
}

/// Turns capture files into observation sets
#[derive(Debug, Clone, Default)]
pub struct ProbeDecoder {
    ignore: IgnoreLists,
}

impl ProbeDecoder {
    pub fn new(ignore: IgnoreLists) -> Self {
        Self { ignore }
    }

    /// Decode a whole capture stream
    pub fn decode<R: Read>(&self, reader: R) -> Result<(ObservationSet, DecodeStats), CaptureError> {
        let mut pcap = PcapReader::new(reader)?;
        debug!(
            "pcap v{}.{} {:?}-endian, linktype {}",
            pcap.header().version_major,
            pcap.header().version_minor,
            pcap.header().byte_order,
            pcap.header().linktype
        );

        let mut set = ObservationSet::new();
        let mut stats = DecodeStats::default();

        loop {
            let record = match pcap.next_record() {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(e) => {
                    // Keep what was decoded so far
                    warn!("Read error mid-capture, stopping: {}", e);
                    break;
                }
            };
            stats.records += 1;
            self.process_record(&record, &mut set, &mut stats);
        }

        Ok((set, stats))
    }

    fn process_record(&self, record: &PcapRecord, set: &mut ObservationSet, stats: &mut DecodeStats) {
        let data = &record.data;

        let Some(rt_len) = radiotap::header_len(data) else {
            stats.skipped += 1;
            return;
        };
        let frame = data.get(rt_len..).unwrap_or(&[]);

        let Some(probe) = parse_probe_request(frame) else {
            return;
        };

        if self.ignore.ignores_mac(&probe.source) {
            stats.ignored += 1;
            return;
        }

        stats.probes += 1;
        let ssid = self.ignore.filter_ssid(probe.ssid);
        set.record(probe.source, record.ts_sec as i64, ssid);

        if let Some(dbm) = radiotap::antenna_signal(data) {
            set.entry(probe.source).add_signal(dbm);
        }
    }

    /// Decode a capture file. Any failure is logged and yields an empty set.
    pub fn decode_file<P: AsRef<Path>>(&self, path: P) -> CaptureOutcome {
        let path = path.as_ref();

        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) => {
                warn!("Capture not readable: {}: {}", path.display(), e);
                return CaptureOutcome::Unavailable;
            }
        };

        match self.decode(BufReader::new(file)) {
            Ok((set, stats)) => {
                info!(
                    "Decoded {}: {} devices from {} probes ({} records, {} skipped)",
                    path.display(),
                    set.len(),
                    stats.probes,
                    stats.records,
                    stats.skipped
                );
                CaptureOutcome::Decoded(set)
            }
            Err(e) => {
                warn!("Invalid capture {}: {}", path.display(), e);
                CaptureOutcome::Invalid
            }
        }
    }
}

/// Result of decoding one capture artifact
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    Decoded(ObservationSet),
    /// Unrecognized global header
    Invalid,
    /// File missing or unreadable
    Unavailable,
}

impl CaptureOutcome {
    /// The observations, empty for a failed source
    pub fn into_set(self) -> ObservationSet {
        match self {
            CaptureOutcome::Decoded(set) => set,
            _ => ObservationSet::new(),
        }
    }

    pub fn is_usable(&self) -> bool {
        matches!(self, CaptureOutcome::Decoded(_))
    }
}
