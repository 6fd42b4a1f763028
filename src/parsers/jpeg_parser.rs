//! JPEG detector, grounded on `original_source/parsers/jpegparser.{hpp,cpp}`.
//!
//! Walks the marker stream from SOI, requiring a quantization table
//! (DQT) before an SOS is accepted, and validating DHT/SOF payload
//! bytes along the way. Once SOS is found, the scan's entropy-coded
//! data is not itself marker-structured — it's walked byte-by-byte
//! looking for the terminating marker, treating a stuffed `0x00` byte
//! and the RST0-RST7 restart markers as non-terminating (progressive
//! scans additionally treat DHT/SOS as scan continuations rather than
//! an end). Only a true EOI closes out a match. Progressive frames
//! (SOF2) are rejected unless `allow_progressive_jpeg` is set, mirroring
//! the source's default of treating progressive scans as out of scope
//! for the downstream recompressor.

use super::{Parser, ParserClass, ParserOptions};
use crate::tree::{BlockData, BlockInfo, BlockType, ImageInfo, Io, Segmentation};

const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOF0: u8 = 0xC0;
const SOF1: u8 = 0xC1;
const SOF2: u8 = 0xC2;
const DHT: u8 = 0xC4;
const SOS: u8 = 0xDA;
const DQT: u8 = 0xDB;
const MARKER: u8 = 0xFF;

fn is_standalone(marker: u8) -> bool {
    matches!(marker, 0x01 | 0xD0..=0xD9)
}

pub struct JpegParser;

impl Parser for JpegParser {
    fn name(&self) -> &'static str {
        "jpeg"
    }

    fn priority(&self) -> i32 {
        9
    }

    fn class(&self) -> ParserClass {
        ParserClass::Strict
    }

    fn scan(&self, io: &mut Io, data: BlockData, offset: i64, end: i64, opts: &ParserOptions) -> Option<Segmentation> {
        let mut pos = offset;
        while pos + 1 < end {
            io.seek(data, pos);
            let mut signature = [0u8; 2];
            if io.read(data, &mut signature) != 2 || signature[0] != MARKER || signature[1] != SOI {
                pos += 1;
                continue;
            }

            if let Some(result) = self.parse_from_soi(io, data, pos, end, opts) {
                return Some(result);
            }
            pos += 1;
        }
        None
    }
}

impl JpegParser {
    fn parse_from_soi(&self, io: &mut Io, data: BlockData, start: i64, end: i64, opts: &ParserOptions) -> Option<Segmentation> {
        let mut cursor = start + 2;
        let mut dimensions: Option<(u32, u32, u8)> = None;
        let mut progressive = false;
        let mut has_quant_table = false;

        loop {
            if cursor + 2 > end {
                return None;
            }
            io.seek(data, cursor);
            let mut head = [0u8; 2];
            if io.read(data, &mut head) != 2 || head[0] != MARKER {
                return None;
            }
            let marker = head[1];
            cursor += 2;

            if marker == EOI {
                return None; // EOI before any SOS: nothing to carve out
            }
            if is_standalone(marker) {
                continue;
            }

            io.seek(data, cursor);
            let mut len_bytes = [0u8; 2];
            if io.read(data, &mut len_bytes) != 2 {
                return None;
            }
            let segment_len = u16::from_be_bytes(len_bytes) as i64;
            if segment_len < 2 {
                return None;
            }
            let payload = cursor + 2;
            let next = payload + (segment_len - 2);

            match marker {
                DQT => {
                    if segment_len > 262 || (segment_len - 2) % 65 != 0 {
                        return None;
                    }
                    io.seek(data, payload);
                    let mut qt_id = [0u8; 1];
                    if io.read(data, &mut qt_id) != 1 || qt_id[0] > 3 {
                        return None;
                    }
                    has_quant_table = true;
                }
                DHT => {
                    io.seek(data, payload);
                    let mut tc_th = [0u8; 1];
                    if io.read(data, &mut tc_th) != 1 {
                        return None;
                    }
                    let v = tc_th[0];
                    if (v & 0xF) > 3 || (v >> 4) > 1 {
                        return None;
                    }
                }
                SOF0 | SOF1 | SOF2 => {
                    if marker == SOF2 && !opts.allow_progressive_jpeg {
                        return None;
                    }
                    let mut sof = [0u8; 6];
                    io.seek(data, payload);
                    if io.read(data, &mut sof) != 6 || sof[0] != 8 {
                        return None;
                    }
                    let height = u16::from_be_bytes([sof[1], sof[2]]) as u32;
                    let width = u16::from_be_bytes([sof[3], sof[4]]) as u32;
                    let components = sof[5].max(1);
                    dimensions = Some((width, height, components));
                    progressive = marker == SOF2;
                }
                SOS => {
                    if !has_quant_table {
                        return None;
                    }
                    let (width, height, components) = dimensions?;
                    let eoi_end = Self::skip_entropy_data(io, data, next, end, progressive)?;
                    let info = ImageInfo {
                        width,
                        height,
                        stride: width * components as u32,
                        bpp: components * 8,
                        grayscale: components == 1,
                    };
                    return Some(Segmentation {
                        offset: start,
                        length: eoi_end - start,
                        kind: BlockType::Jpeg,
                        info: BlockInfo::Image(info),
                        child_stream: None,
                    });
                }
                _ => {}
            }

            cursor = next;
        }
    }

    /// Walks entropy-coded scan data following an SOS marker until the
    /// terminating marker: an 0xFF byte not followed by 0x00 (stuffed
    /// data byte) or an RST0-RST7 restart marker. Progressive scans
    /// additionally treat DHT/SOS as continuation points rather than a
    /// terminator, since a progressive frame interleaves several scans.
    /// Returns the offset just past a genuine EOI, or `None` if the
    /// data runs out or terminates on anything else.
    fn skip_entropy_data(io: &mut Io, data: BlockData, start: i64, end: i64, progressive: bool) -> Option<i64> {
        let mut pos = start;
        io.seek(data, pos);
        let mut is_marker = false;
        let mut byte = [0u8; 1];
        while pos < end {
            if io.read(data, &mut byte) != 1 {
                return None;
            }
            let c = byte[0];
            pos += 1;
            if !is_marker {
                is_marker = c == MARKER;
                continue;
            }
            if c == 0 {
                is_marker = false; // stuffed byte, still entropy data
                continue;
            }
            if (c & 0xF8) == 0xD0 {
                is_marker = false; // RST0-RST7
                continue;
            }
            if progressive && (c == DHT || c == SOS) {
                is_marker = false;
                continue;
            }
            return if c == EOI { Some(pos) } else { None };
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Manager;
    use crate::streams::FileStream;

    fn scratch(bytes: &[u8]) -> (tempfile::NamedTempFile, FileStream) {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), bytes).unwrap();
        let fs = FileStream::open(tmp.path(), false).unwrap();
        (tmp, fs)
    }

    fn io_for<'a>(fs: &'a mut FileStream, manager: &'a mut Manager) -> Io<'a> {
        Io { file: fs, manager }
    }

    /// Builds a minimal but structurally real baseline JPEG: SOI, one
    /// DQT (67-byte segment so `(67-2) % 65 == 0`), one SOF0 (8x8,
    /// 1 component, precision 8), one DHT, SOS, a run of entropy bytes
    /// containing a stuffed 0xFF 0x00 and a restart marker, then EOI.
    fn minimal_jpeg() -> Vec<u8> {
        let mut buf = vec![0xFF, SOI];

        buf.extend_from_slice(&[0xFF, DQT]);
        buf.extend_from_slice(&67u16.to_be_bytes());
        buf.push(0); // table id 0
        buf.extend_from_slice(&[1u8; 64]);

        buf.extend_from_slice(&[0xFF, SOF0]);
        buf.extend_from_slice(&8u16.to_be_bytes());
        buf.push(8); // precision
        buf.extend_from_slice(&8u16.to_be_bytes()); // height
        buf.extend_from_slice(&8u16.to_be_bytes()); // width
        buf.push(1); // components

        buf.extend_from_slice(&[0xFF, DHT]);
        buf.extend_from_slice(&3u16.to_be_bytes());
        buf.push(0x00); // Tc=0, Th=0

        buf.extend_from_slice(&[0xFF, SOS]);
        buf.extend_from_slice(&2u16.to_be_bytes());

        buf.extend_from_slice(&[0x12, 0x34, 0xFF, 0x00, 0x56, 0xFF, 0xD1, 0x78]);
        buf.extend_from_slice(&[0xFF, EOI]);
        buf
    }

    #[test]
    fn detects_minimal_real_looking_jpeg() {
        let bytes = minimal_jpeg();
        let (_tmp, mut fs) = scratch(&bytes);
        let mut manager = Manager::new(1 << 20, 0).unwrap();
        let mut io = io_for(&mut fs, &mut manager);

        let parser = JpegParser;
        let seg = parser
            .scan(&mut io, BlockData::File, 0, bytes.len() as i64, &ParserOptions::default())
            .expect("should detect the jpeg");
        assert_eq!(seg.kind, BlockType::Jpeg);
        assert_eq!(seg.offset, 0);
        assert_eq!(seg.length, bytes.len() as i64);
        match seg.info {
            BlockInfo::Image(info) => {
                assert_eq!(info.width, 8);
                assert_eq!(info.height, 8);
                assert!(info.grayscale);
            }
            _ => panic!("expected image info"),
        }
    }

    #[test]
    fn rejects_sos_without_prior_quantization_table() {
        let mut buf = vec![0xFF, SOI];
        buf.extend_from_slice(&[0xFF, SOF0]);
        buf.extend_from_slice(&8u16.to_be_bytes());
        buf.push(8);
        buf.extend_from_slice(&8u16.to_be_bytes());
        buf.extend_from_slice(&8u16.to_be_bytes());
        buf.push(1);
        buf.extend_from_slice(&[0xFF, SOS]);
        buf.extend_from_slice(&2u16.to_be_bytes());
        buf.extend_from_slice(&[0x00, 0xFF, EOI]);

        let (_tmp, mut fs) = scratch(&buf);
        let mut manager = Manager::new(1 << 20, 0).unwrap();
        let mut io = io_for(&mut fs, &mut manager);

        let parser = JpegParser;
        assert!(parser.scan(&mut io, BlockData::File, 0, buf.len() as i64, &ParserOptions::default()).is_none());
    }

    #[test]
    fn rejects_noise_with_no_jpeg_signature() {
        let bytes: Vec<u8> = (0u32..256).map(|i| (i.wrapping_mul(37) % 251) as u8).collect();
        let (_tmp, mut fs) = scratch(&bytes);
        let mut manager = Manager::new(1 << 20, 0).unwrap();
        let mut io = io_for(&mut fs, &mut manager);

        let parser = JpegParser;
        assert!(parser.scan(&mut io, BlockData::File, 0, bytes.len() as i64, &ParserOptions::default()).is_none());
    }

    #[test]
    fn entropy_data_with_stray_marker_after_sos_is_rejected() {
        let mut bytes = minimal_jpeg();
        // Replace the stuffed FF00 pair with a bare, non-restart marker
        // byte, which should terminate the scan without reaching EOI.
        let pos = bytes.iter().position(|&b| b == 0x12).unwrap();
        bytes[pos + 2] = 0xFF;
        bytes[pos + 3] = 0xC3; // arbitrary non-terminating-allowed marker

        let (_tmp, mut fs) = scratch(&bytes);
        let mut manager = Manager::new(1 << 20, 0).unwrap();
        let mut io = io_for(&mut fs, &mut manager);

        let parser = JpegParser;
        assert!(parser.scan(&mut io, BlockData::File, 0, bytes.len() as i64, &ParserOptions::default()).is_none());
    }
}
