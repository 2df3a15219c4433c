//! Transcoding between legacy and high-throughput block coding.
//!
//! Header geometry (SIZ dimensions, component count, decomposition levels)
//! is preserved exactly; only the tile payloads are re-coded and the
//! CAP/CPF signalling toggled. Vendor metadata segments are carried on a
//! best-effort basis only.

use crate::codestream::{CapInfo, CodestreamBuilder, CodestreamParser, CpfInfo};
use crate::error::{J3kError, Result};
use crate::htj2k::{BlockCodec, BlockMode, Htj2kConfig};

/// Re-code every tile payload of `bytes` with the requested block scheme.
pub fn transcode(bytes: &[u8], to_htj2k: bool) -> Result<Vec<u8>> {
    let parsed = CodestreamParser::new(bytes).parse()?;
    let grid = parsed.tile_grid()?;

    let target_mode = if to_htj2k {
        BlockMode::HighThroughput
    } else {
        BlockMode::Legacy
    };
    let codec = BlockCodec::new(Htj2kConfig {
        mode: target_mode,
        ..Htj2kConfig::default()
    });

    let htj2k = to_htj2k.then(|| {
        let cap = parsed
            .cap
            .unwrap_or_else(|| CapInfo::htj2k(false));
        let cpf = parsed.cpf.unwrap_or(CpfInfo {
            profile: 15,
            flags: 0,
        });
        (cap, cpf)
    });

    let mut builder = CodestreamBuilder::new();
    builder.write_header(&parsed.siz, &parsed.cod, &parsed.qcd, htj2k)?;

    for entry in &parsed.tiles {
        let tile = grid.tile_at(entry.index).ok_or_else(|| {
            J3kError::Corrupted(format!("tile index {} outside the grid", entry.index))
        })?;
        let payload = &bytes[entry.offset..entry.offset + entry.length];
        let voxels = tile.voxel_count();
        let values = BlockCodec::default().decode_tile(payload, voxels)?;
        let indices: Vec<i32> = values.iter().map(|&v| v as i32).collect();
        let recoded = codec.encode_tile(&indices, voxels)?;
        builder.write_tile(entry.index as u16, &recoded)?;
    }
    let out = builder.finish()?;
    log::info!(
        "transcoded {} tiles to {}: {} -> {} bytes",
        parsed.tiles.len(),
        if to_htj2k { "HT" } else { "legacy" },
        bytes.len(),
        out.len()
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codestream::CodestreamParser;
    use crate::decoder::Decoder;
    use crate::encoder::{Encoder, EncoderConfig};
    use crate::volume::Volume;

    fn gradient_volume(w: u32, h: u32, d: u32) -> Volume {
        let mut data = Vec::with_capacity((w * h * d) as usize);
        for z in 0..d {
            for y in 0..h {
                for x in 0..w {
                    data.push(((x + 2 * y + 3 * z) % 256) as u8);
                }
            }
        }
        Volume::monochrome(w, h, d, data).unwrap()
    }

    #[test]
    fn test_transcode_to_ht_and_back() {
        let vol = gradient_volume(8, 8, 4);
        let plain = Encoder::new(EncoderConfig::default().with_levels((1, 1, 1)))
            .encode(&vol)
            .unwrap()
            .bytes;

        let ht = transcode(&plain, true).unwrap();
        let parsed = CodestreamParser::new(&ht).parse().unwrap();
        assert!(parsed.cap.is_some());
        assert!(parsed.contains_htj2k_tiles());
        // Geometry preserved.
        assert_eq!(parsed.siz.width, 8);
        assert_eq!(parsed.siz.depth, 4);
        assert_eq!(parsed.cod.levels_x, 1);

        let back = transcode(&ht, false).unwrap();
        let parsed = CodestreamParser::new(&back).parse().unwrap();
        assert!(!parsed.contains_htj2k_tiles());

        // Both transcoded streams decode to the original voxels.
        for stream in [&ht, &back] {
            let result = Decoder::default().decode(stream).unwrap();
            assert_eq!(result.volume.components[0].data, vol.components[0].data);
        }
    }
}
