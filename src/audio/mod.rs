pub mod decode;
pub mod wav;

pub use decode::{decode_audio, DecodedAudio};
pub use wav::WavSink;
