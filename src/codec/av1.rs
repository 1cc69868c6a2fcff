// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! AV1 picture and tile parameters.
//!
//! Field semantics follow the AV1 specification. Values are taken as the entry point provides
//! them: some of them may be out of range, in which case the pipeline either rejects the frame or
//! conceals the error.

use enumn::N;

use crate::decoder::MarkerParams;
use crate::decoder::PredicationParams;

pub const TOTAL_REFS_PER_FRAME: usize = 8;
pub const NUM_REF_FRAMES: usize = 8;
pub const REFS_PER_FRAME: usize = 7;
pub const MAX_TILE_COLS: usize = 64;
pub const MAX_TILE_ROWS: usize = 64;
pub const CDEF_MAX: usize = 1 << 3;
pub const PRIMARY_REF_NONE: u8 = 7;
pub const SUPERRES_NUM: u8 = 8;
pub const SUPERRES_DENOM_MIN: u8 = 9;
pub const SUPERRES_DENOM_MAX: u8 = 16;
/// Number of entries in the decoded picture buffer the frame indices refer to.
pub const MAX_DPB_SIZE: u8 = 127;
pub const MAX_NUM_Y_POINTS: usize = 16;
pub const MAX_NUM_CB_POINTS: usize = 16;
pub const MAX_NUM_CR_POINTS: usize = 16;
pub const MAX_NUM_POS_LUMA: usize = 25;

#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum FrameType {
    #[default]
    KeyFrame = 0,
    InterFrame = 1,
    IntraOnlyFrame = 2,
    SwitchFrame = 3,
}

impl FrameType {
    pub fn is_intra(&self) -> bool {
        matches!(self, FrameType::KeyFrame | FrameType::IntraOnlyFrame)
    }
}

#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum TxMode {
    #[default]
    Only4x4 = 0,
    Largest = 1,
    Select = 2,
}

#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReferenceMode {
    #[default]
    SingleReference = 0,
    ReferenceModeSelect = 1,
}

/// Sequence-level flags.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SeqInfoFlags {
    pub mono_chrome: bool,
    pub subsampling_x: bool,
    pub subsampling_y: bool,
    pub enable_order_hint: bool,
    pub enable_jnt_comp: bool,
    pub enable_cdef: bool,
    pub film_grain_params_present: bool,
    pub use_128x128_superblock: bool,
}

/// Frame-level flags.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PicInfoFlags {
    pub frame_type: FrameType,
    pub show_frame: bool,
    pub showable_frame: bool,
    pub use_superres: bool,
    pub allow_intrabc: bool,
    pub allow_screen_content_tools: bool,
    pub force_integer_mv: bool,
    pub allow_high_precision_mv: bool,
    pub use_ref_frame_mvs: bool,
    pub allow_warped_motion: bool,
    pub disable_cdf_update: bool,
    pub disable_frame_end_update_cdf: bool,
    /// Large scale tile decoding (camera-array use case). Tiles are then addressed by an explicit
    /// index rather than by their position in the grid.
    pub large_scale_tile: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModeControlFlags {
    pub delta_q_present: bool,
    pub log2_delta_q_res: u8,
    pub delta_lf_present: bool,
    pub log2_delta_lf_res: u8,
    pub delta_lf_multi: bool,
    pub tx_mode: TxMode,
    pub reference_mode: ReferenceMode,
    pub skip_mode_present: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoopRestorationFlags {
    /// Restoration type for each plane.
    pub frame_restoration_type: [u8; 3],
    pub lr_unit_shift: u8,
    pub lr_uv_shift: u8,
}

impl LoopRestorationFlags {
    pub fn is_enabled(&self) -> bool {
        self.frame_restoration_type.iter().any(|t| *t != 0)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilmGrainParams {
    /// If set, specifies that film grain should be added to this frame.
    pub apply_grain: bool,
    /// Specifies the starting value for the pseudo-random numbers used during
    /// film grain synthesis.
    pub grain_seed: u16,
    pub update_grain: bool,
    /// Specifies the number of points for the piece-wise linear scaling
    /// function of the luma component.
    pub num_y_points: u8,
    /// Represents the x (luma value) coordinate for the i-th point of the
    /// piecewise linear scaling function for luma component. The values are
    /// signaled on the scale of 0..255.
    pub point_y_value: [u8; MAX_NUM_Y_POINTS],
    /// Represents the scaling (output) value for the i-th point of the
    /// piecewise linear scaling function for luma component.
    pub point_y_scaling: [u8; MAX_NUM_Y_POINTS],
    /// Specifies that the chroma scaling is inferred from the luma scaling.
    pub chroma_scaling_from_luma: bool,
    pub num_cb_points: u8,
    pub point_cb_value: [u8; MAX_NUM_CB_POINTS],
    pub point_cb_scaling: [u8; MAX_NUM_CB_POINTS],
    pub num_cr_points: u8,
    pub point_cr_value: [u8; MAX_NUM_CR_POINTS],
    pub point_cr_scaling: [u8; MAX_NUM_CR_POINTS],
    pub grain_scaling_minus_8: u8,
    pub ar_coeff_lag: u8,
    pub ar_coeffs_y_plus_128: [u8; MAX_NUM_POS_LUMA],
    pub ar_coeffs_cb_plus_128: [u8; MAX_NUM_POS_LUMA],
    pub ar_coeffs_cr_plus_128: [u8; MAX_NUM_POS_LUMA],
    pub ar_coeff_shift_minus_6: u8,
    pub grain_scale_shift: u8,
    pub cb_mult: u8,
    pub cb_luma_mult: u8,
    /// Offset used in derivation of the input index to the cb component scaling function.
    pub cb_offset: u16,
    pub cr_mult: u8,
    pub cr_luma_mult: u8,
    pub cr_offset: u16,
    pub overlap_flag: bool,
    pub clip_to_restricted_range: bool,
}

/// Picture-level parameters of one AV1 frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Av1PicParams {
    pub profile: u8,
    pub seq_info: SeqInfoFlags,
    pub pic_info: PicInfoFlags,
    pub frame_width_minus1: u16,
    pub frame_height_minus1: u16,
    /// Index of the current frame in the decoded picture buffer.
    pub current_frame_idx: u8,
    /// Decoded picture buffer index of each reference slot.
    pub ref_frame_map: [u8; NUM_REF_FRAMES],
    /// Reference slot used by each of the LAST..ALTREF references.
    pub ref_frame_idx: [u8; REFS_PER_FRAME],
    pub primary_ref_frame: u8,
    pub order_hint: u8,
    pub order_hint_bits_minus1: u8,
    pub superres_scale_denominator: u8,
    pub interp_filter: u8,
    pub filter_level: [u8; 2],
    pub filter_level_u: u8,
    pub filter_level_v: u8,
    pub ref_deltas: [i8; TOTAL_REFS_PER_FRAME],
    pub mode_deltas: [i8; 2],
    pub base_qindex: u8,
    pub y_dc_delta_q: i8,
    pub u_dc_delta_q: i8,
    pub u_ac_delta_q: i8,
    pub v_dc_delta_q: i8,
    pub v_ac_delta_q: i8,
    pub mode_control: ModeControlFlags,
    /// Set when the frame is coded lossless.
    pub lossless: bool,
    pub cdef_damping_minus3: u8,
    pub cdef_bits: u8,
    pub cdef_y_strengths: [u8; CDEF_MAX],
    pub cdef_uv_strengths: [u8; CDEF_MAX],
    pub loop_restoration: LoopRestorationFlags,
    pub tile_cols: u16,
    pub tile_rows: u16,
    /// Number of tiles minus one, only meaningful in large scale tile mode.
    pub tile_count_minus1: u16,
    /// In large scale tile mode, set when this call only inserts an anchor frame.
    pub anchor_frame_insertion: bool,
    pub film_grain: FilmGrainParams,
    /// Number the caller uses to recognize the frame in status reports.
    pub status_report_feedback_number: u32,
}

impl Av1PicParams {
    /// Total number of tiles in the frame.
    pub fn total_tiles(&self) -> u32 {
        if self.pic_info.large_scale_tile {
            u32::from(self.tile_count_minus1) + 1
        } else {
            u32::from(self.tile_cols) * u32::from(self.tile_rows)
        }
    }
}

/// Parameters of one tile, as found in the frame's tile groups.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Av1TileParams {
    /// Byte offset of the tile data in the bitstream buffer.
    pub bs_tile_data_location: u32,
    /// Size of the tile data in bytes.
    pub bs_tile_bytes_in_buffer: u32,
    pub tile_row: u16,
    pub tile_column: u16,
    /// Index of the first tile of the tile group this tile belongs to.
    pub start_tile_idx: u16,
    /// Index of the last tile of the tile group this tile belongs to.
    pub end_tile_idx: u16,
    /// Explicit tile index, large scale tile mode only.
    pub tile_index: u16,
    /// Anchor frame this tile predicts from, large scale tile mode only.
    pub anchor_frame_idx: u8,
}

/// Everything the pipeline needs to decode one AV1 frame, or part of it.
#[derive(Clone, Debug, Default)]
pub struct Av1DecodeParams {
    pub pic_params: Av1PicParams,
    /// Tiles received in this call. A frame's tiles may be split over several calls.
    pub tile_params: Vec<Av1TileParams>,
    /// Size in bytes of the bitstream buffer.
    pub data_size: u32,
    pub predication: Option<PredicationParams>,
    pub marker: Option<MarkerParams>,
}
