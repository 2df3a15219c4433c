//! Minimal container-box layer (JP2 family and the MJ2 sample entry).
//!
//! Boxes are modelled as one tagged enum with a central read/write pair;
//! unknown box types round-trip through the `Raw` variant so parsing stays
//! tolerant. Box headers carry a 4-byte big-endian length (or `1` plus an
//! 8-byte extended length) followed by a 4-byte ASCII type.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{J3kError, Result};

/// The 4-byte payload of the JP2 signature box.
pub const JP2_SIGNATURE_PAYLOAD: [u8; 4] = [0x0D, 0x0A, 0x87, 0x0A];

/// File-type brands the core emits or consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Brand {
    Jp2,
    Jpx,
    Jpm,
    Jph,
    Mjp2,
    Mj2s,
}

impl Brand {
    pub fn fourcc(&self) -> [u8; 4] {
        match self {
            Self::Jp2 => *b"jp2 ",
            Self::Jpx => *b"jpx ",
            Self::Jpm => *b"jpm ",
            Self::Jph => *b"jph ",
            Self::Mjp2 => *b"mjp2",
            Self::Mj2s => *b"mj2s",
        }
    }

    pub fn from_fourcc(cc: &[u8; 4]) -> Option<Self> {
        match cc {
            b"jp2 " => Some(Self::Jp2),
            b"jpx " => Some(Self::Jpx),
            b"jpm " => Some(Self::Jpm),
            b"jph " => Some(Self::Jph),
            b"mjp2" => Some(Self::Mjp2),
            b"mj2s" => Some(Self::Mj2s),
            _ => None,
        }
    }
}

/// One container box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Box3 {
    /// `jP  ` signature box; its payload is fixed.
    Signature,
    /// `ftyp`.
    FileType {
        brand: Brand,
        minor_version: u32,
        compatible: Vec<Brand>,
    },
    /// `jp2h` super-box.
    Jp2Header(Vec<Box3>),
    /// `ihdr`.
    ImageHeader {
        height: u32,
        width: u32,
        components: u16,
        bit_depth: u32,
        signed: bool,
        compression: u8,
        colorspace_unknown: bool,
        ip: bool,
    },
    /// MJ2 `mjp2` visual sample entry, reduced to the fields the core uses.
    MovieSampleEntry {
        width: u16,
        height: u16,
        depth: u16,
        frame_count: u16,
    },
    /// Any box this layer does not interpret.
    Raw { box_type: [u8; 4], bytes: Vec<u8> },
}

fn write_header(out: &mut Vec<u8>, box_type: &[u8; 4], payload_len: usize) {
    let mut len = [0u8; 4];
    BigEndian::write_u32(&mut len, (payload_len + 8) as u32);
    out.extend_from_slice(&len);
    out.extend_from_slice(box_type);
}

/// Serialise one box.
pub fn write_box(b: &Box3, out: &mut Vec<u8>) -> Result<()> {
    match b {
        Box3::Signature => {
            write_header(out, b"jP  ", 4);
            out.extend_from_slice(&JP2_SIGNATURE_PAYLOAD);
        }
        Box3::FileType {
            brand,
            minor_version,
            compatible,
        } => {
            write_header(out, b"ftyp", 8 + 4 * compatible.len());
            out.extend_from_slice(&brand.fourcc());
            let mut v = [0u8; 4];
            BigEndian::write_u32(&mut v, *minor_version);
            out.extend_from_slice(&v);
            for c in compatible {
                out.extend_from_slice(&c.fourcc());
            }
        }
        Box3::Jp2Header(children) => {
            let mut body = Vec::new();
            for child in children {
                write_box(child, &mut body)?;
            }
            write_header(out, b"jp2h", body.len());
            out.extend_from_slice(&body);
        }
        Box3::ImageHeader {
            height,
            width,
            components,
            bit_depth,
            signed,
            compression,
            colorspace_unknown,
            ip,
        } => {
            write_header(out, b"ihdr", 14);
            let mut v = [0u8; 4];
            BigEndian::write_u32(&mut v, *height);
            out.extend_from_slice(&v);
            BigEndian::write_u32(&mut v, *width);
            out.extend_from_slice(&v);
            let mut c = [0u8; 2];
            BigEndian::write_u16(&mut c, *components);
            out.extend_from_slice(&c);
            out.push(((bit_depth - 1) as u8 & 0x7F) | if *signed { 0x80 } else { 0 });
            out.push(*compression);
            out.push(*colorspace_unknown as u8);
            out.push(*ip as u8);
        }
        Box3::MovieSampleEntry {
            width,
            height,
            depth,
            frame_count,
        } => {
            write_header(out, b"mjp2", 8);
            for v in [*width, *height, *depth, *frame_count] {
                let mut b2 = [0u8; 2];
                BigEndian::write_u16(&mut b2, v);
                out.extend_from_slice(&b2);
            }
        }
        Box3::Raw { box_type, bytes } => {
            write_header(out, box_type, bytes.len());
            out.extend_from_slice(bytes);
        }
    }
    Ok(())
}

/// Read one box at `data[pos..]`; returns the box and the bytes consumed.
fn read_box(data: &[u8], pos: usize) -> Result<(Box3, usize)> {
    if data.len() - pos < 8 {
        return Err(J3kError::Truncated("box header cut short".into()));
    }
    let declared = BigEndian::read_u32(&data[pos..]) as u64;
    let box_type: [u8; 4] = data[pos + 4..pos + 8].try_into().unwrap_or(*b"????");
    let (header_len, total) = if declared == 1 {
        if data.len() - pos < 16 {
            return Err(J3kError::Truncated("extended box header cut short".into()));
        }
        (16usize, BigEndian::read_u64(&data[pos + 8..]))
    } else if declared == 0 {
        (8usize, (data.len() - pos) as u64)
    } else {
        (8usize, declared)
    };
    if total < header_len as u64 || pos as u64 + total > data.len() as u64 {
        return Err(J3kError::Truncated(format!(
            "box {:?} declares {total} bytes, {} available",
            String::from_utf8_lossy(&box_type),
            data.len() - pos
        )));
    }
    let payload = &data[pos + header_len..pos + total as usize];

    let parsed = match &box_type {
        b"jP  " => {
            if payload != JP2_SIGNATURE_PAYLOAD {
                return Err(J3kError::Corrupted("bad JP2 signature payload".into()));
            }
            Box3::Signature
        }
        b"ftyp" => {
            if payload.len() < 8 {
                return Err(J3kError::Corrupted("ftyp too short".into()));
            }
            let cc: [u8; 4] = payload[0..4].try_into().unwrap_or(*b"????");
            let brand = Brand::from_fourcc(&cc)
                .ok_or_else(|| J3kError::Unsupported(format!("unknown brand {cc:?}")))?;
            let minor_version = BigEndian::read_u32(&payload[4..]);
            let compatible = payload[8..]
                .chunks_exact(4)
                .filter_map(|c| Brand::from_fourcc(c.try_into().ok()?))
                .collect();
            Box3::FileType {
                brand,
                minor_version,
                compatible,
            }
        }
        b"jp2h" => {
            let mut children = Vec::new();
            let mut p = 0usize;
            while p < payload.len() {
                let (child, used) = read_box(payload, p)?;
                children.push(child);
                p += used;
            }
            Box3::Jp2Header(children)
        }
        b"ihdr" => {
            if payload.len() < 14 {
                return Err(J3kError::Corrupted("ihdr too short".into()));
            }
            let bpc = payload[10];
            Box3::ImageHeader {
                height: BigEndian::read_u32(payload),
                width: BigEndian::read_u32(&payload[4..]),
                components: BigEndian::read_u16(&payload[8..]),
                bit_depth: (bpc & 0x7F) as u32 + 1,
                signed: bpc & 0x80 != 0,
                compression: payload[11],
                colorspace_unknown: payload[12] != 0,
                ip: payload[13] != 0,
            }
        }
        b"mjp2" => {
            if payload.len() < 8 {
                return Err(J3kError::Corrupted("mjp2 sample entry too short".into()));
            }
            Box3::MovieSampleEntry {
                width: BigEndian::read_u16(payload),
                height: BigEndian::read_u16(&payload[2..]),
                depth: BigEndian::read_u16(&payload[4..]),
                frame_count: BigEndian::read_u16(&payload[6..]),
            }
        }
        _ => Box3::Raw {
            box_type,
            bytes: payload.to_vec(),
        },
    };
    Ok((parsed, total as usize))
}

/// Read every box in a buffer.
pub fn read_boxes(data: &[u8]) -> Result<Vec<Box3>> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos < data.len() {
        let (b, used) = read_box(data, pos)?;
        out.push(b);
        pos += used;
    }
    Ok(out)
}

/// Wrap a raw codestream in a minimal JP2-branded container.
pub fn wrap_jp2(
    codestream: &[u8],
    width: u32,
    height: u32,
    components: u16,
    bit_depth: u32,
    signed: bool,
) -> Result<Vec<u8>> {
    let boxes = [
        Box3::Signature,
        Box3::FileType {
            brand: Brand::Jp2,
            minor_version: 0,
            compatible: vec![Brand::Jp2],
        },
        Box3::Jp2Header(vec![Box3::ImageHeader {
            height,
            width,
            components,
            bit_depth,
            signed,
            compression: 7,
            colorspace_unknown: true,
            ip: false,
        }]),
        Box3::Raw {
            box_type: *b"jp2c",
            bytes: codestream.to_vec(),
        },
    ];
    let mut out = Vec::new();
    for b in &boxes {
        write_box(b, &mut out)?;
    }
    Ok(out)
}

/// Locate the raw codestream inside a JP2-branded container.
pub fn find_codestream(data: &[u8]) -> Result<Vec<u8>> {
    for b in read_boxes(data)? {
        if let Box3::Raw { box_type, bytes } = b {
            if &box_type == b"jp2c" {
                return Ok(bytes);
            }
        }
    }
    Err(J3kError::Parse("container has no codestream box".into()))
}
