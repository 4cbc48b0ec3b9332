//! Export of rendered audio

pub mod wav;

pub use wav::{encode_block, encode_wav, save_wav, write_wav, WAV_HEADER_LEN};
