//! Radiotap Header Parser
//!
//! Captures taken in monitor mode prefix every 802.11 frame with a radiotap header.
//! The decoder only needs its length to find the frame, plus the antenna signal
//! when a driver reports one.
//!
//! Reference: https://www.radiotap.org/

/// Offset of the little-endian `it_len` field
pub const LENGTH_OFFSET: usize = 2;

/// Radiotap present flags used here
pub mod flags {
    pub const TSFT: u32 = 1 << 0;
    pub const FLAGS: u32 = 1 << 1;
    pub const RATE: u32 = 1 << 2;
    pub const CHANNEL: u32 = 1 << 3;
    pub const FHSS: u32 = 1 << 4;
    pub const DBM_ANTSIGNAL: u32 = 1 << 5;
    pub const EXT: u32 = 1 << 31;
}

/// Declared header length, or `None` if the payload cannot hold the length field.
///
/// The length is not checked against the payload: a header claiming more bytes
/// than were captured simply leaves an empty frame behind it.
pub fn header_len(data: &[u8]) -> Option<usize> {
    let raw = data.get(LENGTH_OFFSET..LENGTH_OFFSET + 2)?;
    Some(u16::from_le_bytes([raw[0], raw[1]]) as usize)
}

/// Parsed fixed part of a radiotap header
#[derive(Debug, Clone, Default)]
pub struct RadiotapHeader {
    /// Header version (always 0)
    pub version: u8,
    /// Total header length including fields
    pub length: u16,
    /// First present bitmap
    pub present_flags: u32,
}

impl RadiotapHeader {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 8 || data[0] != 0 {
            return None;
        }

        let length = u16::from_le_bytes([data[2], data[3]]);
        if (length as usize) < 8 || data.len() < length as usize {
            return None;
        }

        Some(Self {
            version: data[0],
            length,
            present_flags: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
        })
    }
}

/// Antenna signal in dBm, if the header carries it.
///
/// Walks the fields that precede `DBM_ANTSIGNAL` in the first present bitmap,
/// honouring their alignment. Extended bitmaps are skipped over.
pub fn antenna_signal(data: &[u8]) -> Option<i8> {
    let header = RadiotapHeader::parse(data)?;
    let present = header.present_flags;
    if present & flags::DBM_ANTSIGNAL == 0 {
        return None;
    }

    // Additional present words follow while the EXT bit is set
    let mut pos = 8;
    let mut word = present;
    while word & flags::EXT != 0 {
        let next = data.get(pos..pos + 4)?;
        word = u32::from_le_bytes([next[0], next[1], next[2], next[3]]);
        pos += 4;
    }

    let align = |pos: usize, to: usize| (pos + to - 1) / to * to;

    if present & flags::TSFT != 0 {
        pos = align(pos, 8) + 8;
    }
    if present & flags::FLAGS != 0 {
        pos += 1;
    }
    if present & flags::RATE != 0 {
        pos += 1;
    }
    if present & flags::CHANNEL != 0 {
        pos = align(pos, 2) + 4;
    }
    if present & flags::FHSS != 0 {
        pos += 2;
    }

    if pos < header.length as usize {
        data.get(pos).map(|&b| b as i8)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_len() {
        assert_eq!(header_len(&[0x00, 0x00, 0x12, 0x00]), Some(18));
        assert_eq!(header_len(&[0x00, 0x00, 0x00, 0x01]), Some(256));
        assert_eq!(header_len(&[0x00, 0x00, 0x12]), None);
    }

    #[test]
    fn test_parse_minimal_radiotap() {
        let data = [0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00];
        let header = RadiotapHeader::parse(&data).unwrap();
        assert_eq!(header.length, 8);
        assert_eq!(header.present_flags, 0);
        assert_eq!(antenna_signal(&data), None);
    }

    #[test]
    fn test_antenna_signal_after_flags_rate_channel() {
        // present: FLAGS | RATE | CHANNEL | DBM_ANTSIGNAL
        let present: u32 = flags::FLAGS | flags::RATE | flags::CHANNEL | flags::DBM_ANTSIGNAL;
        let mut data = vec![0x00, 0x00, 0x0f, 0x00];
        data.extend_from_slice(&present.to_le_bytes());
        data.push(0x10); // flags
        data.push(0x02); // rate
        data.extend_from_slice(&2437u16.to_le_bytes());
        data.extend_from_slice(&0x00a0u16.to_le_bytes());
        data.push((-42i8) as u8);
        assert_eq!(data.len(), 15);

        assert_eq!(antenna_signal(&data), Some(-42));
    }

    #[test]
    fn test_antenna_signal_with_tsft_alignment() {
        let present: u32 = flags::TSFT | flags::DBM_ANTSIGNAL;
        let mut data = vec![0x00, 0x00, 0x11, 0x00];
        data.extend_from_slice(&present.to_le_bytes());
        data.extend_from_slice(&1_000_000u64.to_le_bytes());
        data.push((-70i8) as u8);

        assert_eq!(antenna_signal(&data), Some(-70));
    }

    #[test]
    fn test_rejects_bad_version_and_short_header() {
        assert!(RadiotapHeader::parse(&[0x01, 0, 8, 0, 0, 0, 0, 0]).is_none());
        assert!(RadiotapHeader::parse(&[0x00, 0, 32, 0, 0, 0, 0, 0]).is_none());
        assert!(RadiotapHeader::parse(&[0x00, 0, 8]).is_none());
    }
}
