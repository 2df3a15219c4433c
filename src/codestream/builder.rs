//! Codestream assembly.

use super::io::StreamWriter;
use super::{CapInfo, CodInfo, CpfInfo, QcdInfo, SizInfo};
use crate::error::{J3kError, Result};
use crate::marker::Marker;

/// Serialises header segments and tile-parts in order.
///
/// Callers must write tiles in linear index order; the builder enforces the
/// header-before-tiles sequencing.
pub struct CodestreamBuilder {
    writer: StreamWriter,
    header_written: bool,
    tiles_written: usize,
}

impl CodestreamBuilder {
    pub fn new() -> Self {
        Self {
            writer: StreamWriter::new(),
            header_written: false,
            tiles_written: 0,
        }
    }

    /// Write SOC and the main header segments.
    ///
    /// `htj2k` adds the CAP/CPF pair between QCD and the first tile.
    pub fn write_header(
        &mut self,
        siz: &SizInfo,
        cod: &CodInfo,
        qcd: &QcdInfo,
        htj2k: Option<(CapInfo, CpfInfo)>,
    ) -> Result<()> {
        if self.header_written {
            return Err(J3kError::InvalidParameter(
                "codestream header already written".into(),
            ));
        }
        if siz.components.is_empty() {
            return Err(J3kError::InvalidComponentConfiguration(
                "SIZ needs at least one component".into(),
            ));
        }

        let w = &mut self.writer;
        w.write_marker(Marker::StartOfCodestream)?;

        // SIZ
        w.write_marker(Marker::VolumeAndTileSize)?;
        let lsiz = 28 + 4 * siz.components.len() as u16;
        w.write_u16(lsiz)?;
        w.write_u16(siz.profile)?;
        w.write_u32(siz.width)?;
        w.write_u32(siz.height)?;
        w.write_u32(siz.depth)?;
        w.write_u32(siz.tile_w)?;
        w.write_u32(siz.tile_h)?;
        w.write_u32(siz.tile_d)?;
        w.write_u16(siz.components.len() as u16)?;
        for c in &siz.components {
            let ssiz = ((c.bit_depth - 1) as u8 & 0x7F) | if c.signed { 0x80 } else { 0 };
            w.write_u8(ssiz)?;
            w.write_u8(c.sub_x)?;
            w.write_u8(c.sub_y)?;
            w.write_u8(c.sub_z)?;
        }

        // COD
        w.write_marker(Marker::CodingStyleDefault)?;
        w.write_u16(10)?;
        w.write_u8(cod.progression as u8)?;
        w.write_u16(cod.layers)?;
        w.write_u8(cod.levels_x)?;
        w.write_u8(cod.levels_y)?;
        w.write_u8(cod.levels_z)?;
        w.write_u8(cod.filter_selector())?;
        w.write_u8(cod.use_tile_parts as u8)?;

        // QCD
        w.write_marker(Marker::QuantizationDefault)?;
        let lqcd = 3 + 2 * qcd.steps.len() as u16;
        w.write_u16(lqcd)?;
        w.write_u8((qcd.style as u8) | (qcd.guard_bits << 5))?;
        for &(exponent, mantissa) in &qcd.steps {
            w.write_u16(((exponent as u16) << 11) | (mantissa & 0x07FF))?;
        }

        if let Some((cap, cpf)) = htj2k {
            w.write_marker(Marker::Capability)?;
            w.write_u16(10)?;
            w.write_u32(cap.pcap)?;
            w.write_u16(0)?; // reserved
            w.write_u16(cap.ccap15)?;

            w.write_marker(Marker::CorrespondingProfile)?;
            w.write_u16(6)?;
            w.write_u16(cpf.profile)?;
            w.write_u16(cpf.flags)?;
        }

        self.header_written = true;
        Ok(())
    }

    /// Append one tile-part: SOT, SOD, then the payload bytes.
    pub fn write_tile(&mut self, tile_index: u16, payload: &[u8]) -> Result<()> {
        if !self.header_written {
            return Err(J3kError::InvalidParameter(
                "tile written before codestream header".into(),
            ));
        }
        // Psot spans from the SOT marker through the end of the payload:
        // 2 (marker) + 10 (segment) + 2 (SOD) + payload.
        let psot = 14 + payload.len() as u32;
        let w = &mut self.writer;
        w.write_marker(Marker::StartOfTile)?;
        w.write_u16(10)?;
        w.write_u16(tile_index)?;
        w.write_u32(psot)?;
        w.write_u8(0)?; // TPsot
        w.write_u8(1)?; // TNsot
        w.write_marker(Marker::StartOfData)?;
        w.write_bytes(payload)?;
        self.tiles_written += 1;
        Ok(())
    }

    /// Terminate with EOC and return the assembled bytes.
    pub fn finish(mut self) -> Result<Vec<u8>> {
        if !self.header_written {
            return Err(J3kError::InvalidParameter(
                "cannot finish a codestream without a header".into(),
            ));
        }
        self.writer.write_marker(Marker::EndOfCodestream)?;
        log::debug!(
            "codestream assembled: {} tiles, {} bytes",
            self.tiles_written,
            self.writer.len()
        );
        Ok(self.writer.into_bytes())
    }
}

impl Default for CodestreamBuilder {
    fn default() -> Self {
        Self::new()
    }
}
