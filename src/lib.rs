/*!
# jp3d-rs

`jp3d-rs` is a pure Rust volumetric JPEG 2000 codec with an HTJ2K
high-throughput block-coding path and a JPIP-style progressive streaming
layer.

## Subsystems

- **Volume model**: [`volume::Volume`], [`volume::Component`], and the
  half-open [`volume::Region`] used for ROI decoding and streaming.
- **Wavelet transform**: 3D separable (and full-3D) DWT with the
  reversible 5/3 and irreversible 9/7 kernels (`dwt`).
- **Rate control**: step sizes from the compression mode, scalar
  quantization, quality-layer budgets (`rate`).
- **Codestream**: SOC/SIZ/COD/QCD (+ CAP/CPF for HTJ2K) marker syntax,
  builder and tolerant parser (`codestream`).
- **Block coding**: legacy raw and HT cleanup-pass tile payloads with
  adaptive selection (`htj2k`).
- **Pipelines**: parallel tile [`encoder::Encoder`], ROI-aware
  [`decoder::Decoder`], and the stepwise
  [`progressive::ProgressiveDecoder`].
- **Streaming**: precinct-keyed [`jpip::BinCache`] with pluggable
  eviction, [`jpip::ProgressiveDelivery`] scheduling, and the
  session-based [`jpip::JpipServer`] / [`jpip::JpipClient`] pair.
- **Containers**: the minimal JP2/MJ2 box layer (`container`).
*/

pub mod codestream;
pub mod container;
pub mod decoder;
pub mod dwt;
pub mod encoder;
pub mod error;
pub mod htj2k;
pub mod jpip;
pub mod marker;
pub mod progress;
pub mod progression;
pub mod progressive;
pub mod rate;
pub mod tiling;
pub mod transcode;
pub mod volume;

pub use decoder::{DecodeResult, Decoder, DecoderConfig};
pub use encoder::{EncodeResult, Encoder, EncoderConfig};
pub use error::{J3kError, Result};
pub use progressive::{ProgressiveDecoder, ProgressiveMode, ProgressiveStep};
pub use rate::CompressionMode;
pub use tiling::TilingConfig;
pub use volume::{Component, Region, Volume};

#[cfg(test)]
mod tests {
    use super::*;

    /// End-to-end: the public surface round-trips a volume losslessly.
    #[test]
    fn smoke_roundtrip() {
        let mut data = Vec::new();
        for z in 0..2u32 {
            for y in 0..4u32 {
                for x in 0..4u32 {
                    data.push(((x + 2 * y + 3 * z) % 256) as u8);
                }
            }
        }
        let volume = Volume::monochrome(4, 4, 2, data).unwrap();
        let encoded = Encoder::new(EncoderConfig::default().with_levels((1, 1, 1)))
            .encode(&volume)
            .unwrap();
        let decoded = Decoder::default().decode(&encoded.bytes).unwrap();
        assert_eq!(
            decoded.volume.components[0].data,
            volume.components[0].data
        );
    }
}
