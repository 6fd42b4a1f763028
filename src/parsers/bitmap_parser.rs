//! BMP detector, grounded on `original_source/parsers/bitmapparser.{hpp,cpp}`.
//!
//! Covers the BITMAPCOREHEADER/INFOHEADER/V2/V3/V4/V5 header family,
//! both behind a `"BM"` file header and as a bare DIB header with no
//! file header at all (the source gates the header-less path behind a
//! `file_header_required` constructor option; this port always tries
//! both, since nothing here wires a per-call override through). A
//! signature match alone isn't enough — every header field is
//! validated the way the source does (plane count, bit depth, color
//! masks, gamma/profile fields for the V2-V5 extensions) before a
//! block is accepted, and the returned segmentation is the pixel data
//! alone (`offset` = first pixel byte, `length` = `stride * height`),
//! never the header/palette bytes or the rest of the file.
//!
//! Bare-DIB detection additionally runs the icon/cursor height-doubling
//! heuristic: an image reporting `height == 2 * width` with a size or
//! dimension profile matching a known icon/cursor asset is treated as
//! a half-height color image followed by a 1bpp AND mask, and `height`
//! is corrected down to `width`.

use super::{Parser, ParserClass, ParserOptions};
use crate::misc::image::has_grayscale_palette;
use crate::tree::{BlockData, BlockInfo, BlockType, ImageInfo, Io, Segmentation};

const BITMAPFILEHEADER: i64 = 14;
const BITMAPCOREHEADER: u32 = 12;
const BITMAPINFOHEADER: u32 = 40;
const BITMAPV2INFOHEADER: u32 = 52;
const BITMAPV3INFOHEADER: u32 = 56;
const BITMAPV4INFOHEADER: u32 = 108;
const BITMAPV5INFOHEADER: u32 = 124;
const SIGNATURE: u16 = 0x4D42; // "BM"

const BI_RGB: u32 = 0;
const BI_BITFIELDS: u32 = 3;

const LCS_CALIBRATED_RGB: u32 = 0x0000_0000;
const LCS_SRGB: u32 = 0x7352_4742; // "sRGB"
const LCS_WINDOWS_COLOR_SPACE: u32 = 0x5769_6E20; // "Win "
const PROFILE_LINKED: u32 = 0x4C49_4E4B; // "LINK"
const PROFILE_EMBEDDED: u32 = 0x4D42_4544; // "MBED"

const LCS_GM_BUSINESS: u32 = 1;
const LCS_GM_GRAPHICS: u32 = 2;
const LCS_GM_IMAGES: u32 = 4;
const LCS_GM_ABS_COLORIMETRIC: u32 = 8;

const ICON_WIDTHS: [i64; 17] = [8, 10, 14, 16, 20, 22, 24, 32, 40, 48, 60, 64, 72, 80, 96, 128, 256];

fn read_u16(io: &mut Io, data: BlockData) -> Option<u16> {
    let mut b = [0u8; 2];
    if io.read(data, &mut b) != 2 {
        return None;
    }
    Some(u16::from_le_bytes(b))
}

fn read_i16(io: &mut Io, data: BlockData) -> Option<i16> {
    read_u16(io, data).map(|v| v as i16)
}

fn read_u32(io: &mut Io, data: BlockData) -> Option<u32> {
    let mut b = [0u8; 4];
    if io.read(data, &mut b) != 4 {
        return None;
    }
    Some(u32::from_le_bytes(b))
}

fn read_i32(io: &mut Io, data: BlockData) -> Option<i32> {
    read_u32(io, data).map(|v| v as i32)
}

fn skip(io: &mut Io, data: BlockData, n: usize) -> Option<()> {
    let mut buf = vec![0u8; n];
    if io.read(data, &mut buf) != n {
        return None;
    }
    Some(())
}

pub struct BitmapParser;

impl Parser for BitmapParser {
    fn name(&self) -> &'static str {
        "bitmap"
    }

    fn priority(&self) -> i32 {
        8
    }

    fn class(&self) -> ParserClass {
        ParserClass::Strict
    }

    fn scan(&self, io: &mut Io, data: BlockData, offset: i64, end: i64, _opts: &ParserOptions) -> Option<Segmentation> {
        if end - offset < 256 {
            return None;
        }
        let size = io.size(data);
        let mut dib_start = offset;
        while dib_start + 4 <= end {
            if let Some(seg) = Self::try_at(io, data, dib_start, end, size) {
                return Some(seg);
            }
            dib_start += 1;
        }
        None
    }
}

impl BitmapParser {
    fn try_at(io: &mut Io, data: BlockData, dib_start: i64, end: i64, size: i64) -> Option<Segmentation> {
        io.seek(data, dib_start);
        let bi_size = read_u32(io, data)?;
        let has_core_header = bi_size == BITMAPCOREHEADER;
        let known_size = matches!(
            bi_size,
            BITMAPCOREHEADER | BITMAPINFOHEADER | BITMAPV2INFOHEADER | BITMAPV3INFOHEADER | BITMAPV4INFOHEADER | BITMAPV5INFOHEADER
        );

        let file_header_start = dib_start - BITMAPFILEHEADER;
        let has_file_header = file_header_start >= 0 && {
            io.seek(data, file_header_start);
            read_u16(io, data) == Some(SIGNATURE)
        };

        let quick_check = (has_file_header && known_size) || (!has_file_header && bi_size == BITMAPINFOHEADER);
        if !quick_check {
            return None;
        }

        let (bf_size, bf_off_bits) = if has_file_header {
            io.seek(data, file_header_start + 2);
            let bf_size = read_u32(io, data)?;
            io.seek(data, file_header_start + 10);
            let bf_off_bits = read_u32(io, data)?;
            (bf_size as i64, bf_off_bits as i64)
        } else {
            (0, 0)
        };

        let bound = BITMAPFILEHEADER + BITMAPV5INFOHEADER as i64 + if has_core_header { 3 * 256 } else { 4 * 256 };
        if bf_off_bits > bound {
            return None;
        }

        let mut pixel_offset = dib_start + if !has_file_header { BITMAPINFOHEADER as i64 } else { bf_off_bits - BITMAPFILEHEADER };

        io.seek(data, dib_start + 4);

        let (width, height_raw): (i64, i64) = if !has_core_header {
            let w = read_i32(io, data)? as i64;
            if !(0..0x0080_0000).contains(&w) {
                return None;
            }
            let h = read_i32(io, data)? as i64;
            if h.unsigned_abs() >= 0x0080_0000 {
                return None;
            }
            (w, h)
        } else {
            let w = read_i16(io, data)? as i64;
            if (w as u16 as u32) & 0xC000 != 0 {
                return None;
            }
            let h = read_i16(io, data)? as i64;
            if (h as u16 as u32) & 0xC000 != 0 {
                return None;
            }
            (w, h)
        };

        let planes = read_u16(io, data)?;
        if planes != 1 {
            return None;
        }
        let bpp = read_u16(io, data)?;
        if !matches!(bpp, 1 | 4 | 8 | 24) && !(bpp == 32 && !has_core_header) {
            return None;
        }
        let max_palette_entries: u32 = 1u32 << bpp.min(8);

        let mut compression = BI_RGB;
        let mut reported_size: i64 = 0;
        let mut clr_used: u32 = 0;

        if bi_size > BITMAPCOREHEADER {
            compression = read_u32(io, data)?;
            if compression != BI_RGB && compression != BI_BITFIELDS {
                return None;
            }
            reported_size = read_u32(io, data)? as i64;
            skip(io, data, 8)?; // biXPelsPerMeter, biYPelsPerMeter

            clr_used = read_u32(io, data)?;
            if clr_used != 0 && clr_used > max_palette_entries {
                return None;
            }
            let clr_important = read_u32(io, data)?;
            if clr_important != 0 && clr_important > max_palette_entries {
                return None;
            }

            if bi_size > BITMAPINFOHEADER {
                let red_mask = read_u32(io, data)?;
                let green_mask = read_u32(io, data)?;
                let blue_mask = read_u32(io, data)?;
                if compression == BI_BITFIELDS
                    && ((red_mask != 0x0000_00FF && red_mask != 0x00FF_0000)
                        || green_mask != 0x0000_FF00
                        || (blue_mask != 0x0000_00FF && blue_mask != 0x00FF_0000))
                {
                    return None;
                }

                if bi_size > BITMAPV2INFOHEADER {
                    let alpha_mask = read_u32(io, data)?;
                    if compression == BI_BITFIELDS && alpha_mask != 0xFF00_0000 {
                        return None;
                    }

                    if bi_size > BITMAPV3INFOHEADER {
                        let cs_type = read_u32(io, data)?;
                        let valid_cs = cs_type == LCS_CALIBRATED_RGB
                            || (bi_size >= BITMAPV5INFOHEADER
                                && matches!(cs_type, LCS_SRGB | LCS_WINDOWS_COLOR_SPACE | PROFILE_EMBEDDED | PROFILE_LINKED));
                        if !valid_cs {
                            return None;
                        }
                        skip(io, data, 0x24 + 4 + 4 + 4)?; // endpoints + gamma red/green/blue

                        if bi_size > BITMAPV4INFOHEADER {
                            let intent = read_u32(io, data)?;
                            if !matches!(intent, LCS_GM_ABS_COLORIMETRIC | LCS_GM_BUSINESS | LCS_GM_GRAPHICS | LCS_GM_IMAGES) {
                                return None;
                            }
                            let profile_data = read_u32(io, data)? as i64;
                            if matches!(cs_type, PROFILE_EMBEDDED | PROFILE_LINKED) && bf_off_bits > 0 && profile_data < bf_off_bits - BITMAPFILEHEADER {
                                return None;
                            }
                            skip(io, data, 4)?; // bV5ProfileSize
                            let reserved = read_u32(io, data)?;
                            if reserved != 0 {
                                return None;
                            }
                        }
                    }
                }
            }
        }

        let num_palette_entries: u32 = if bpp > 8 {
            if !has_core_header {
                clr_used
            } else {
                0
            }
        } else if !has_core_header && clr_used > 0 {
            clr_used
        } else {
            max_palette_entries
        };
        let palette_size: u32 = num_palette_entries * if !has_core_header { 4 } else { 3 };

        if has_file_header && bf_off_bits < BITMAPFILEHEADER + bi_size as i64 + palette_size as i64 {
            return None;
        }

        let (width, height) = if !has_core_header {
            let h = height_raw.unsigned_abs() as i64;
            let w = width;
            if !has_file_header && h == 2 * w {
                let half_plus_mask = reported_size > 0 && reported_size == (w * h * (bpp as i64 + 1)) >> 4;
                let plausible_icon = (reported_size == 0 || reported_size < (w * h * bpp as i64) >> 3) && ICON_WIDTHS.contains(&w);
                if half_plus_mask || plausible_icon {
                    (w, w)
                } else {
                    (w, h)
                }
            } else {
                (w, h)
            }
        } else {
            (width, height_raw)
        };
        if !has_file_header && !has_core_header {
            pixel_offset += 4 * num_palette_entries as i64;
        }

        let stride = (((width * bpp as i64 + 31) & !31) >> 3) as i64;
        let actual_size = stride * height;

        if (reported_size > 0 && reported_size < actual_size)
            || (has_file_header && bf_size < actual_size + BITMAPFILEHEADER + bi_size as i64 + palette_size as i64)
            || actual_size < 128
        {
            return None;
        }

        let mut grayscale = false;
        if bpp == 8 {
            io.seek(data, dib_start + bi_size as i64);
            let mut palette = vec![0u8; palette_size as usize];
            let n = io.read(data, &mut palette);
            palette.truncate(n);
            grayscale = has_grayscale_palette(&palette, num_palette_entries as usize, !has_core_header);
        }

        let effective_end = end.min(size);
        if pixel_offset >= effective_end {
            return None;
        }
        let length = actual_size.min(effective_end - pixel_offset);

        let info = ImageInfo { width: width as u32, height: height as u32, stride: stride as u32, bpp: bpp as u8, grayscale };
        Some(Segmentation {
            offset: pixel_offset,
            length,
            kind: BlockType::Image,
            info: BlockInfo::Image(info),
            child_stream: None,
        })
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

    fn push_u32(buf: &mut Vec<u8>, v: u32) {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    fn push_i32(buf: &mut Vec<u8>, v: i32) {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    fn push_u16(buf: &mut Vec<u8>, v: u16) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    /// A full file-header + BITMAPINFOHEADER 8bpp grayscale bitmap,
    /// 16x16, BI_RGB, with a real 256-entry grayscale palette.
    fn full_bmp_8bpp(width: i32, height: i32) -> Vec<u8> {
        let bpp = 8u16;
        let stride = (((width as i64 * bpp as i64 + 31) & !31) >> 3) as usize;
        let pixel_data = vec![0x10u8; stride * height as usize];
        let palette_size = 256 * 4;
        let header_size = 14 + 40 + palette_size;
        let off_bits = header_size as u32;
        let file_size = header_size as u32 + pixel_data.len() as u32;

        let mut buf = Vec::new();
        buf.extend_from_slice(b"BM");
        push_u32(&mut buf, file_size);
        push_u16(&mut buf, 0);
        push_u16(&mut buf, 0);
        push_u32(&mut buf, off_bits);

        push_u32(&mut buf, 40); // biSize
        push_i32(&mut buf, width);
        push_i32(&mut buf, height);
        push_u16(&mut buf, 1); // planes
        push_u16(&mut buf, bpp);
        push_u32(&mut buf, BI_RGB);
        push_u32(&mut buf, pixel_data.len() as u32); // biSizeImage
        push_i32(&mut buf, 0);
        push_i32(&mut buf, 0);
        push_u32(&mut buf, 0); // biClrUsed
        push_u32(&mut buf, 0); // biClrImportant

        for i in 0..256u32 {
            buf.push(i as u8);
            buf.push(i as u8);
            buf.push(i as u8);
            buf.push(0);
        }

        buf.extend_from_slice(&pixel_data);
        buf
    }

    #[test]
    fn detects_full_header_grayscale_bitmap() {
        let bytes = full_bmp_8bpp(16, 16);
        let (_tmp, mut fs) = scratch(&bytes);
        let mut manager = Manager::new(1 << 20, 0).unwrap();
        let mut io = io_for(&mut fs, &mut manager);

        let parser = BitmapParser;
        let seg = parser
            .scan(&mut io, BlockData::File, 0, bytes.len() as i64, &ParserOptions::default())
            .expect("should detect the bitmap");
        assert_eq!(seg.kind, BlockType::Image);
        assert_eq!(seg.offset, 14 + 40 + 256 * 4);
        match seg.info {
            BlockInfo::Image(info) => {
                assert_eq!(info.width, 16);
                assert_eq!(info.height, 16);
                assert!(info.grayscale);
            }
            _ => panic!("expected image info"),
        }
    }

    /// A bare 40-byte BITMAPINFOHEADER with no `"BM"` file header,
    /// width 32/height 64 (2x width), reported size 0, matching the
    /// icon/cursor height-doubling heuristic.
    #[test]
    fn detects_headerless_dib_and_corrects_icon_height() {
        let width = 32i32;
        let height = 64i32; // 2 * width
        let bpp = 1u16;

        let mut buf = Vec::new();
        push_u32(&mut buf, 40); // biSize
        push_i32(&mut buf, width);
        push_i32(&mut buf, height);
        push_u16(&mut buf, 1);
        push_u16(&mut buf, bpp);
        push_u32(&mut buf, BI_RGB);
        push_u32(&mut buf, 0); // biSizeImage = 0, triggers the no-reported-size icon path
        push_i32(&mut buf, 0);
        push_i32(&mut buf, 0);
        push_u32(&mut buf, 0);
        push_u32(&mut buf, 0);

        // 1bpp palette: 2 entries, 4 bytes each.
        buf.extend_from_slice(&[0, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0]);

        let corrected_height = width as i64; // 32, after the heuristic fires
        let stride = (((width as i64 * bpp as i64 + 31) & !31) >> 3) as usize;
        let pixel_data = vec![0u8; stride * corrected_height as usize];
        buf.extend_from_slice(&pixel_data);

        while buf.len() < 256 {
            buf.push(0);
        }

        let (_tmp, mut fs) = scratch(&buf);
        let mut manager = Manager::new(1 << 20, 0).unwrap();
        let mut io = io_for(&mut fs, &mut manager);

        let parser = BitmapParser;
        let seg = parser
            .scan(&mut io, BlockData::File, 0, buf.len() as i64, &ParserOptions::default())
            .expect("should detect the headerless dib");
        match seg.info {
            BlockInfo::Image(info) => {
                assert_eq!(info.width, 32);
                assert_eq!(info.height, 32, "expected icon height-correction heuristic to fire");
            }
            _ => panic!("expected image info"),
        }
    }

    #[test]
    fn rejects_data_with_no_bitmap_signature() {
        let bytes = vec![0x41u8; 512];
        let (_tmp, mut fs) = scratch(&bytes);
        let mut manager = Manager::new(1 << 20, 0).unwrap();
        let mut io = io_for(&mut fs, &mut manager);

        let parser = BitmapParser;
        assert!(parser.scan(&mut io, BlockData::File, 0, bytes.len() as i64, &ParserOptions::default()).is_none());
    }
}
