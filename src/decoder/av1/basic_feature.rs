// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Picture-level validation and concealment of AV1 frames.

use std::any::Any;

use crate::codec::av1::Av1DecodeParams;
use crate::codec::av1::Av1PicParams;
use crate::codec::av1::FilmGrainParams;
use crate::codec::av1::LoopRestorationFlags;
use crate::codec::av1::ReferenceMode;
use crate::codec::av1::TxMode;
use crate::codec::av1::CDEF_MAX;
use crate::codec::av1::MAX_DPB_SIZE;
use crate::codec::av1::MAX_TILE_COLS;
use crate::codec::av1::MAX_TILE_ROWS;
use crate::codec::av1::NUM_REF_FRAMES;
use crate::codec::av1::PRIMARY_REF_NONE;
use crate::codec::av1::SUPERRES_DENOM_MAX;
use crate::codec::av1::SUPERRES_DENOM_MIN;
use crate::codec::av1::SUPERRES_NUM;
use crate::decoder::av1::tile_coding::Av1TileCoding;
use crate::decoder::feature::Feature;
use crate::decoder::feature::FeatureLookup;
use crate::decoder::DecodeSettings;
use crate::decoder::PipelineError;
use crate::decoder::PipelineResult;

/// Loop filter reference deltas of a frame that does not filter.
const DEFAULT_REF_DELTAS: [i8; 8] = [1, 0, 0, 0, -1, 0, -1, -1];

const MIN_FRAME_SIZE_MINUS1: u16 = 15;
const MAX_FILTER_LEVEL: u8 = 63;
const MAX_INTERP_FILTER: u8 = 4;
const MAX_CDEF_BITS: u8 = 3;
const MAX_CDEF_STRENGTH: u8 = 63;
const MAX_LR_UNIT_SHIFT: u8 = 2;
const MAX_ORDER_HINT_BITS_MINUS1: u8 = 7;
const MAX_FILM_GRAIN_Y_POINTS: u8 = 14;
const MAX_FILM_GRAIN_CHROMA_POINTS: u8 = 10;

macro_rules! ensure_param {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err(PipelineError::InvalidParameter(format!($($arg)+)));
        }
    };
}

fn check_points_increasing(values: &[u8], plane: &str) -> PipelineResult<()> {
    ensure_param!(
        values.windows(2).all(|w| w[0] < w[1]),
        "film grain {} point values are not increasing",
        plane
    );
    Ok(())
}

fn check_film_grain(film_grain: &FilmGrainParams) -> PipelineResult<()> {
    ensure_param!(
        film_grain.num_y_points <= MAX_FILM_GRAIN_Y_POINTS,
        "{} film grain luma points",
        film_grain.num_y_points
    );
    ensure_param!(
        film_grain.num_cb_points <= MAX_FILM_GRAIN_CHROMA_POINTS
            && film_grain.num_cr_points <= MAX_FILM_GRAIN_CHROMA_POINTS,
        "{}/{} film grain chroma points",
        film_grain.num_cb_points,
        film_grain.num_cr_points
    );

    check_points_increasing(
        &film_grain.point_y_value[..film_grain.num_y_points as usize],
        "luma",
    )?;
    check_points_increasing(
        &film_grain.point_cb_value[..film_grain.num_cb_points as usize],
        "cb",
    )?;
    check_points_increasing(
        &film_grain.point_cr_value[..film_grain.num_cr_points as usize],
        "cr",
    )
}

/// Validates the syntax of `pic` against what the hardware supports.
fn check_pic_params(pic: &Av1PicParams) -> PipelineResult<()> {
    let seq = &pic.seq_info;
    let info = &pic.pic_info;
    let mode = &pic.mode_control;

    ensure_param!(
        pic.frame_width_minus1 >= MIN_FRAME_SIZE_MINUS1
            && pic.frame_height_minus1 >= MIN_FRAME_SIZE_MINUS1,
        "frame size {}x{} is too small",
        u32::from(pic.frame_width_minus1) + 1,
        u32::from(pic.frame_height_minus1) + 1
    );
    ensure_param!(
        pic.profile == 0 && !seq.mono_chrome && seq.subsampling_x && seq.subsampling_y,
        "only 4:2:0 profile 0 streams are supported"
    );
    ensure_param!(
        pic.current_frame_idx < MAX_DPB_SIZE,
        "current frame index {} out of range",
        pic.current_frame_idx
    );

    if !info.frame_type.is_intra() {
        ensure_param!(
            pic.ref_frame_map.iter().all(|&idx| idx < MAX_DPB_SIZE),
            "reference frame map {:?} out of range",
            pic.ref_frame_map
        );
        ensure_param!(
            pic.ref_frame_idx
                .iter()
                .all(|&idx| (idx as usize) < NUM_REF_FRAMES),
            "reference frame indices {:?} out of range",
            pic.ref_frame_idx
        );
    }
    ensure_param!(
        pic.primary_ref_frame <= PRIMARY_REF_NONE,
        "primary reference frame {} out of range",
        pic.primary_ref_frame
    );

    if info.use_superres && pic.superres_scale_denominator != SUPERRES_NUM {
        ensure_param!(
            (SUPERRES_DENOM_MIN..=SUPERRES_DENOM_MAX).contains(&pic.superres_scale_denominator),
            "superres denominator {} out of range",
            pic.superres_scale_denominator
        );
    }

    ensure_param!(
        pic.tile_cols > 0 && pic.tile_rows > 0,
        "{}x{} tile grid is empty",
        pic.tile_cols,
        pic.tile_rows
    );
    ensure_param!(
        pic.tile_cols as usize <= MAX_TILE_COLS && pic.tile_rows as usize <= MAX_TILE_ROWS,
        "{}x{} tiles exceed the hardware maximum",
        pic.tile_cols,
        pic.tile_rows
    );
    ensure_param!(
        pic.cdef_bits <= MAX_CDEF_BITS,
        "cdef bits {} out of range",
        pic.cdef_bits
    );

    if info.allow_intrabc {
        ensure_param!(
            info.frame_type.is_intra() && info.allow_screen_content_tools && !info.use_superres,
            "intra block copy needs an intra frame with screen content tools and no superres"
        );
    }
    ensure_param!(
        !pic.lossless || mode.tx_mode == TxMode::Only4x4,
        "lossless frame with tx mode {:?}",
        mode.tx_mode
    );
    if info.force_integer_mv {
        ensure_param!(
            info.allow_screen_content_tools && !info.allow_high_precision_mv,
            "integer motion vectors forced without screen content tools"
        );
    }

    if !seq.enable_order_hint {
        ensure_param!(
            !seq.enable_jnt_comp && !info.use_ref_frame_mvs && pic.order_hint == 0,
            "order hint based tools used while order hints are disabled"
        );
    }
    ensure_param!(
        pic.order_hint_bits_minus1 <= MAX_ORDER_HINT_BITS_MINUS1,
        "{} order hint bits",
        u32::from(pic.order_hint_bits_minus1) + 1
    );
    ensure_param!(
        info.disable_frame_end_update_cdf || !info.disable_cdf_update,
        "frame end cdf update requested with cdf updates disabled"
    );

    if info.frame_type.is_intra() {
        ensure_param!(
            mode.reference_mode == ReferenceMode::SingleReference && !mode.skip_mode_present,
            "intra frame with compound references or skip mode"
        );
        ensure_param!(
            !info.allow_warped_motion && pic.primary_ref_frame == PRIMARY_REF_NONE,
            "intra frame predicting from a reference"
        );
    }

    if seq.film_grain_params_present && pic.film_grain.apply_grain {
        check_film_grain(&pic.film_grain)?;
    }

    Ok(())
}

/// Brings out-of-range syntax elements back into their range.
fn clamp_pic_params(pic: &mut Av1PicParams) {
    pic.interp_filter = pic.interp_filter.min(MAX_INTERP_FILTER);

    for level in pic
        .filter_level
        .iter_mut()
        .chain([&mut pic.filter_level_u, &mut pic.filter_level_v])
    {
        *level = (*level).min(MAX_FILTER_LEVEL);
    }
    for delta in pic.ref_deltas.iter_mut().chain(pic.mode_deltas.iter_mut()) {
        *delta = (*delta).clamp(-64, 63);
    }
    for delta_q in [
        &mut pic.y_dc_delta_q,
        &mut pic.u_dc_delta_q,
        &mut pic.u_ac_delta_q,
        &mut pic.v_dc_delta_q,
        &mut pic.v_ac_delta_q,
    ] {
        *delta_q = (*delta_q).clamp(-64, 63);
    }

    let strengths = (1usize << pic.cdef_bits.min(MAX_CDEF_BITS)).min(CDEF_MAX);
    for strength in pic.cdef_y_strengths[..strengths]
        .iter_mut()
        .chain(pic.cdef_uv_strengths[..strengths].iter_mut())
    {
        *strength = (*strength).min(MAX_CDEF_STRENGTH);
    }

    pic.loop_restoration.lr_unit_shift = pic.loop_restoration.lr_unit_shift.min(MAX_LR_UNIT_SHIFT);
}

/// Disables the tools the frame cannot use.
fn conceal_pic_params(pic: &mut Av1PicParams) {
    let intrabc = pic.pic_info.allow_intrabc;

    if pic.lossless || intrabc || !pic.seq_info.enable_cdef {
        pic.cdef_bits = 0;
        pic.cdef_y_strengths = Default::default();
        pic.cdef_uv_strengths = Default::default();
        pic.cdef_damping_minus3 = 0;
    }

    if pic.lossless || intrabc {
        pic.filter_level = [0, 0];
        pic.filter_level_u = 0;
        pic.filter_level_v = 0;
        pic.ref_deltas = DEFAULT_REF_DELTAS;
        pic.mode_deltas = [0, 0];
    }

    let lr = &pic.loop_restoration;
    if (!pic.pic_info.use_superres && pic.lossless)
        || intrabc
        || (pic.seq_info.use_128x128_superblock && lr.is_enabled() && lr.lr_unit_shift == 0)
    {
        pic.loop_restoration = LoopRestorationFlags::default();
    }

    let mode = &mut pic.mode_control;
    if pic.base_qindex == 0 {
        mode.delta_q_present = false;
    }
    if intrabc && mode.delta_q_present {
        mode.delta_lf_present = false;
    }
    if !mode.delta_q_present {
        mode.log2_delta_q_res = 0;
        mode.delta_lf_present = false;
    }
    if !mode.delta_lf_present {
        mode.log2_delta_lf_res = 0;
        mode.delta_lf_multi = false;
    }

    if !pic.seq_info.film_grain_params_present
        || !(pic.pic_info.show_frame || pic.pic_info.showable_frame)
    {
        pic.film_grain = FilmGrainParams::default();
    }
}

/// Keeps the concealed picture parameters of the current frame along with its tile accounting.
#[derive(Debug, Default)]
pub struct Av1BasicFeature {
    max_width: u32,
    max_height: u32,
    pic_params: Av1PicParams,
    tile_coding: Av1TileCoding,
    /// Anchor frames inserted since the last regular frame, large scale tile mode only.
    anchor_frames: Vec<u8>,
    anchor_frame_insertion: bool,
}

impl Av1BasicFeature {
    /// Picture parameters of the current frame, after concealment.
    pub fn pic_params(&self) -> &Av1PicParams {
        &self.pic_params
    }

    pub fn tile_coding(&self) -> &Av1TileCoding {
        &self.tile_coding
    }

    pub fn anchor_frames(&self) -> &[u8] {
        &self.anchor_frames
    }

    /// Number of decode passes of the current call.
    pub fn num_passes(&self) -> u32 {
        if self.anchor_frame_insertion {
            0
        } else {
            self.tile_coding.num_passes()
        }
    }

    /// Whether the current call completes a frame to decode.
    pub fn is_complete(&self) -> bool {
        !self.anchor_frame_insertion && self.tile_coding.is_complete()
    }
}

impl Feature<Av1DecodeParams> for Av1BasicFeature {
    fn init(&mut self, settings: &DecodeSettings) -> PipelineResult<()> {
        self.max_width = settings.width;
        self.max_height = settings.height;
        Ok(())
    }

    fn check(&self, params: &Av1DecodeParams) -> PipelineResult<()> {
        let pic = &params.pic_params;
        ensure_param!(
            u32::from(pic.frame_width_minus1) < self.max_width
                && u32::from(pic.frame_height_minus1) < self.max_height,
            "frame size {}x{} exceeds the configured {}x{}",
            u32::from(pic.frame_width_minus1) + 1,
            u32::from(pic.frame_height_minus1) + 1,
            self.max_width,
            self.max_height
        );

        check_pic_params(pic)
    }

    fn update(&mut self, params: &Av1DecodeParams, _: &dyn FeatureLookup) -> PipelineResult<()> {
        let mut pic = params.pic_params.clone();
        clamp_pic_params(&mut pic);
        conceal_pic_params(&mut pic);
        self.pic_params = pic;

        self.anchor_frame_insertion = self.pic_params.anchor_frame_insertion;
        if self.anchor_frame_insertion {
            let anchor = self.pic_params.current_frame_idx;
            if !self.anchor_frames.contains(&anchor) {
                self.anchor_frames.push(anchor);
            }
            log::debug!("anchor frame {} inserted", anchor);
            return Ok(());
        }
        if !self.pic_params.pic_info.large_scale_tile {
            self.anchor_frames.clear();
        }

        self.tile_coding
            .update(&self.pic_params, &params.tile_params, params.data_size)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
