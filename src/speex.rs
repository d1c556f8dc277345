//! Safe wrapper around libspeex's decoder API.

use std::ffi::{c_char, c_int, c_void};
use std::mem::MaybeUninit;

use anyhow::Result;

use crate::voice::{VoiceDecoder, VoiceDecoderFactory};

// ======================== FFI declarations ========================

/// Opaque type for the mode descriptors returned by `speex_lib_get_mode`.
#[repr(C)]
pub struct RawSpeexMode {
    _private: [u8; 0],
}

/// Bit-packing state. libspeex expects callers to allocate this by value,
/// so the layout must match `speex_bits.h` exactly.
#[repr(C)]
#[allow(dead_code)]
struct SpeexBits {
    chars: *mut c_char,
    nb_bits: c_int,
    char_ptr: c_int,
    bit_ptr: c_int,
    owner: c_int,
    overflow: c_int,
    buf_size: c_int,
    reserved1: c_int,
    reserved2: *mut c_void,
}

const SPEEX_MODEID_NB: c_int = 0;
const SPEEX_MODEID_WB: c_int = 1;
const SPEEX_MODEID_UWB: c_int = 2;

const SPEEX_SET_ENH: c_int = 0;
const SPEEX_GET_FRAME_SIZE: c_int = 3;

unsafe extern "C" {
    fn speex_lib_get_mode(mode: c_int) -> *const RawSpeexMode;
    fn speex_decoder_init(mode: *const RawSpeexMode) -> *mut c_void;
    fn speex_decoder_destroy(state: *mut c_void);
    fn speex_decoder_ctl(state: *mut c_void, request: c_int, ptr: *mut c_void) -> c_int;
    fn speex_decode_int(state: *mut c_void, bits: *mut SpeexBits, out: *mut i16) -> c_int;

    fn speex_bits_init(bits: *mut SpeexBits);
    fn speex_bits_destroy(bits: *mut SpeexBits);
    fn speex_bits_read_from(bits: *mut SpeexBits, bytes: *const c_char, len: c_int);
}

// ======================== Decoder ========================

/// Speex band mode, matching the mode id field of the stream header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeexMode {
    Narrowband,
    Wideband,
    UltraWideband,
}

impl SpeexMode {
    /// Map a stream header mode id (0/1/2) to a band mode.
    pub fn from_header_mode(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Narrowband),
            1 => Some(Self::Wideband),
            2 => Some(Self::UltraWideband),
            _ => None,
        }
    }

    fn id(self) -> c_int {
        match self {
            Self::Narrowband => SPEEX_MODEID_NB,
            Self::Wideband => SPEEX_MODEID_WB,
            Self::UltraWideband => SPEEX_MODEID_UWB,
        }
    }
}

/// Safe wrapper around a libspeex decoder state plus its bit reader.
pub struct SpeexDecoder {
    state: *mut c_void,
    bits: SpeexBits,
    frame_size: usize,
}

// The decoder state is used from a single thread only
unsafe impl Send for SpeexDecoder {}

impl SpeexDecoder {
    pub fn new(mode: SpeexMode, enhanced: bool) -> Result<Self> {
        let raw_mode = unsafe { speex_lib_get_mode(mode.id()) };
        if raw_mode.is_null() {
            anyhow::bail!("libspeex does not provide mode {:?}", mode);
        }
        let state = unsafe { speex_decoder_init(raw_mode) };
        if state.is_null() {
            anyhow::bail!("failed to initialize speex decoder");
        }

        let bits = unsafe {
            let mut bits = MaybeUninit::<SpeexBits>::uninit();
            speex_bits_init(bits.as_mut_ptr());
            bits.assume_init()
        };

        let mut enh: c_int = enhanced as c_int;
        unsafe {
            speex_decoder_ctl(state, SPEEX_SET_ENH, &mut enh as *mut c_int as *mut c_void);
        }

        let mut frame_size: c_int = 0;
        unsafe {
            speex_decoder_ctl(
                state,
                SPEEX_GET_FRAME_SIZE,
                &mut frame_size as *mut c_int as *mut c_void,
            );
        }

        log::debug!("speex decoder ready: mode={:?}, frame_size={}", mode, frame_size);

        Ok(Self {
            state,
            bits,
            frame_size: frame_size as usize,
        })
    }

    /// Samples produced per encoded frame for the configured mode.
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }
}

impl VoiceDecoder for SpeexDecoder {
    fn decode(&mut self, packet: &[u8], pcm: &mut [i16]) -> Result<usize> {
        unsafe {
            speex_bits_read_from(
                &mut self.bits,
                packet.as_ptr() as *const c_char,
                packet.len() as c_int,
            );
        }

        // A packet may carry several frames; keep decoding until the bits
        // run out or the output buffer is full.
        let mut written = 0;
        while pcm.len() - written >= self.frame_size {
            let ret = unsafe {
                speex_decode_int(self.state, &mut self.bits, pcm[written..].as_mut_ptr())
            };
            match ret {
                0 => written += self.frame_size,
                -1 => break, // no more frames in this packet
                code => {
                    if written == 0 {
                        anyhow::bail!("corrupt speex frame (code {})", code);
                    }
                    break;
                }
            }
        }
        Ok(written)
    }
}

impl Drop for SpeexDecoder {
    fn drop(&mut self) {
        unsafe {
            speex_decoder_destroy(self.state);
            speex_bits_destroy(&mut self.bits);
        }
    }
}

// ======================== Factory ========================

/// Creates a fresh [`SpeexDecoder`] for each decode session.
pub struct SpeexDecoderFactory {
    mode: SpeexMode,
    enhanced: bool,
}

impl SpeexDecoderFactory {
    pub fn new(mode: SpeexMode, enhanced: bool) -> Self {
        Self { mode, enhanced }
    }
}

impl VoiceDecoderFactory for SpeexDecoderFactory {
    fn create(&self) -> Result<Box<dyn VoiceDecoder>> {
        Ok(Box::new(SpeexDecoder::new(self.mode, self.enhanced)?))
    }
}
