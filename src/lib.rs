
pub mod bits;
pub mod block;
pub mod demod;
pub mod dft;
pub mod error;
pub mod filter;
pub mod pcm;
pub mod pulse;
pub mod sync;
pub mod tracing_init;
pub mod wav;

pub use bits::SoftBit;
pub use block::{BlockConsumer, BlockReader};
pub use demod::{DecimateConfig, Demod, DemodConfig, HeaderSpec, IqMode};
pub use error::{DspError, DspResult};
pub use pcm::{PcmReader, PcmSpec};
pub use sync::Detection;
pub use wav::read_wav_header;
