//! Codestream parsing.
//!
//! The parser transforms raw marker segments into a [`ParsedCodestream`].
//! In tolerant mode a malformed segment sets `is_partial`, records a
//! warning, and resumes at the next recognisable marker; in strict mode it
//! is fatal.

use super::io::StreamReader;
use super::{
    CapInfo, CodInfo, CpfInfo, ParsedCodestream, QcdInfo, QuantStyle, SizComponent, SizInfo,
    TileEntry,
};
use crate::error::{J3kError, Result};
use crate::marker::Marker;
use crate::progression::ProgressionOrder;

pub struct CodestreamParser<'a> {
    reader: StreamReader<'a>,
    tolerant: bool,
}

impl<'a> CodestreamParser<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            reader: StreamReader::new(data),
            tolerant: false,
        }
    }

    /// Continue past malformed segments instead of failing.
    pub fn with_tolerance(mut self, tolerant: bool) -> Self {
        self.tolerant = tolerant;
        self
    }

    pub fn parse(mut self) -> Result<ParsedCodestream> {
        if self.reader.remaining() == 0 {
            return Err(J3kError::Parse("empty codestream".into()));
        }
        let soc = self.reader.read_u16()?;
        if soc != Marker::StartOfCodestream as u16 {
            return Err(J3kError::Parse(format!(
                "expected SOC, found {soc:#06X}"
            )));
        }

        let mut siz: Option<SizInfo> = None;
        let mut cod: Option<CodInfo> = None;
        let mut qcd: Option<QcdInfo> = None;
        let mut cap: Option<CapInfo> = None;
        let mut cpf: Option<CpfInfo> = None;
        let mut tiles: Vec<TileEntry> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();
        let mut is_partial = false;
        let mut saw_eoc = false;

        while !self.reader.is_at_end() {
            let at = self.reader.pos();
            let code = match self.reader.read_u16() {
                Ok(v) => v,
                Err(_) => {
                    self.recover(
                        "stray byte at end of codestream",
                        &mut warnings,
                        &mut is_partial,
                    )?;
                    break;
                }
            };
            let marker = match Marker::try_from(code) {
                Ok(m) => m,
                Err(_) => {
                    self.recover(
                        &format!("unknown marker {code:#06X} at offset {at}"),
                        &mut warnings,
                        &mut is_partial,
                    )?;
                    continue;
                }
            };

            let step = match marker {
                Marker::VolumeAndTileSize => self.parse_siz().map(|v| siz = Some(v)),
                Marker::CodingStyleDefault => self.parse_cod().map(|v| cod = Some(v)),
                Marker::QuantizationDefault => self.parse_qcd().map(|v| qcd = Some(v)),
                Marker::Capability => self.parse_cap().map(|v| cap = Some(v)),
                Marker::CorrespondingProfile => self.parse_cpf().map(|v| cpf = Some(v)),
                Marker::StartOfTile => self.parse_tile(&mut tiles),
                Marker::EndOfCodestream => {
                    saw_eoc = true;
                    break;
                }
                Marker::Comment => self.skip_segment(),
                Marker::StartOfCodestream | Marker::StartOfData => Err(J3kError::Parse(format!(
                    "unexpected {marker:?} at offset {at}"
                ))),
            };
            if let Err(e) = step {
                self.recover(
                    &format!("malformed {marker:?} segment: {e}"),
                    &mut warnings,
                    &mut is_partial,
                )?;
            }
        }

        if !saw_eoc {
            if self.tolerant {
                warnings.push("codestream ended without EOC".into());
                is_partial = true;
            } else {
                return Err(J3kError::Truncated("codestream ended without EOC".into()));
            }
        }

        let siz = siz.ok_or_else(|| J3kError::Parse("missing SIZ segment".into()))?;
        let cod = cod.ok_or_else(|| J3kError::Parse("missing COD segment".into()))?;
        let qcd = qcd.ok_or_else(|| J3kError::Parse("missing QCD segment".into()))?;

        Ok(ParsedCodestream {
            siz,
            cod,
            qcd,
            cap,
            cpf,
            tiles,
            is_partial,
            warnings,
        })
    }

    /// In tolerant mode: warn, flag partial, resync. Otherwise fail.
    fn recover(
        &mut self,
        message: &str,
        warnings: &mut Vec<String>,
        is_partial: &mut bool,
    ) -> Result<()> {
        if !self.tolerant {
            return Err(J3kError::Parse(message.into()));
        }
        log::warn!("codestream recovery: {message}");
        warnings.push(message.into());
        *is_partial = true;
        self.reader.resync_to_marker();
        Ok(())
    }

    fn parse_siz(&mut self) -> Result<SizInfo> {
        let len = self.reader.read_u16()?;
        if len < 28 {
            return Err(J3kError::Parse(format!("SIZ length {len} too small")));
        }
        let profile = self.reader.read_u16()?;
        let width = self.reader.read_u32()?;
        let height = self.reader.read_u32()?;
        let depth = self.reader.read_u32()?;
        let tile_w = self.reader.read_u32()?;
        let tile_h = self.reader.read_u32()?;
        let tile_d = self.reader.read_u32()?;
        let count = self.reader.read_u16()?;
        if count == 0 {
            return Err(J3kError::Parse("SIZ declares zero components".into()));
        }
        if len != 28 + 4 * count {
            return Err(J3kError::Parse(format!(
                "SIZ length {len} does not match {count} components"
            )));
        }
        let mut components = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let ssiz = self.reader.read_u8()?;
            components.push(SizComponent {
                bit_depth: (ssiz & 0x7F) as u32 + 1,
                signed: ssiz & 0x80 != 0,
                sub_x: self.reader.read_u8()?,
                sub_y: self.reader.read_u8()?,
                sub_z: self.reader.read_u8()?,
            });
        }
        if width == 0 || height == 0 || depth == 0 {
            return Err(J3kError::Parse(format!(
                "SIZ declares empty volume {width}x{height}x{depth}"
            )));
        }
        Ok(SizInfo {
            profile,
            width,
            height,
            depth,
            tile_w,
            tile_h,
            tile_d,
            components,
        })
    }

    fn parse_cod(&mut self) -> Result<CodInfo> {
        let len = self.reader.read_u16()?;
        if len != 10 {
            return Err(J3kError::Parse(format!("COD length {len}, expected 10")));
        }
        let progression = ProgressionOrder::try_from(self.reader.read_u8()?)
            .map_err(|e| J3kError::Parse(format!("bad progression order: {e}")))?;
        let layers = self.reader.read_u16()?;
        if layers == 0 {
            return Err(J3kError::Parse("COD declares zero layers".into()));
        }
        let levels_x = self.reader.read_u8()?;
        let levels_y = self.reader.read_u8()?;
        let levels_z = self.reader.read_u8()?;
        let filter = CodInfo::filter_from_selector(self.reader.read_u8()?)?;
        let use_tile_parts = self.reader.read_u8()? != 0;
        Ok(CodInfo {
            progression,
            layers,
            levels_x,
            levels_y,
            levels_z,
            filter,
            use_tile_parts,
        })
    }

    fn parse_qcd(&mut self) -> Result<QcdInfo> {
        let len = self.reader.read_u16()?;
        if len < 3 || (len - 3) % 2 != 0 {
            return Err(J3kError::Parse(format!("QCD length {len} malformed")));
        }
        let sqcd = self.reader.read_u8()?;
        let style = QuantStyle::from_u8(sqcd & 0x03)?;
        let guard_bits = sqcd >> 5;
        let entries = (len - 3) / 2;
        let mut steps = Vec::with_capacity(entries as usize);
        for _ in 0..entries {
            let v = self.reader.read_u16()?;
            steps.push(((v >> 11) as u8, v & 0x07FF));
        }
        Ok(QcdInfo {
            style,
            guard_bits,
            steps,
        })
    }

    fn parse_cap(&mut self) -> Result<CapInfo> {
        let len = self.reader.read_u16()?;
        if len != 10 {
            return Err(J3kError::Parse(format!("CAP length {len}, expected 10")));
        }
        let pcap = self.reader.read_u32()?;
        let _reserved = self.reader.read_u16()?;
        let ccap15 = self.reader.read_u16()?;
        Ok(CapInfo { pcap, ccap15 })
    }

    fn parse_cpf(&mut self) -> Result<CpfInfo> {
        let len = self.reader.read_u16()?;
        if len != 6 {
            return Err(J3kError::Parse(format!("CPF length {len}, expected 6")));
        }
        Ok(CpfInfo {
            profile: self.reader.read_u16()?,
            flags: self.reader.read_u16()?,
        })
    }

    fn parse_tile(&mut self, tiles: &mut Vec<TileEntry>) -> Result<()> {
        let lsot = self.reader.read_u16()?;
        if lsot != 10 {
            return Err(J3kError::Parse(format!("SOT length {lsot}, expected 10")));
        }
        let index = self.reader.read_u16()? as usize;
        let psot = self.reader.read_u32()?;
        let _tpsot = self.reader.read_u8()?;
        let _tnsot = self.reader.read_u8()?;
        if psot < 14 {
            return Err(J3kError::Parse(format!("Psot {psot} too small")));
        }
        let sod = self.reader.read_u16()?;
        if sod != Marker::StartOfData as u16 {
            return Err(J3kError::Parse(format!(
                "expected SOD after SOT, found {sod:#06X}"
            )));
        }
        let length = (psot - 14) as usize;
        let offset = self.reader.pos();
        let payload = self.reader.read_bytes(length)?;
        let is_ht = payload.first().copied() == Some(0x01);
        tiles.push(TileEntry {
            index,
            offset,
            length,
            is_ht,
        });
        Ok(())
    }

    fn skip_segment(&mut self) -> Result<()> {
        let len = self.reader.read_u16()?;
        if len < 2 {
            return Err(J3kError::Parse(format!("segment length {len} too small")));
        }
        self.reader.skip((len - 2) as usize)
    }
}
