// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Film grain synthesis, applied after the decode passes of a frame.
//!
//! The noise is produced by four kernels running in sequence: the random values of the grain
//! templates are generated, the two auto-regression phases filter them, and the result is blended
//! into the decoded frame using the scaling look-up tables computed here.

use std::any::Any;

use enumn::N;

use crate::backend::CommandBuffer;
use crate::codec::av1::Av1DecodeParams;
use crate::codec::av1::FilmGrainParams;
use crate::decoder::activation::ActivationList;
use crate::decoder::av1::basic_feature::Av1BasicFeature;
use crate::decoder::feature::Feature;
use crate::decoder::feature::FeatureId;
use crate::decoder::feature::FeatureLookup;
use crate::decoder::packet::CommandSize;
use crate::decoder::packet::Packet;
use crate::decoder::packet::PacketContext;
use crate::decoder::packet::PacketId;
use crate::decoder::packet::PacketList;
use crate::decoder::packet::PacketProperties;
use crate::decoder::sub_pipeline::SubPipeline;
use crate::decoder::DecodeSettings;
use crate::decoder::PipelineError;
use crate::decoder::PipelineResult;

pub const SCALING_LUT_SIZE: usize = 256;
const MAX_CHROMA_OFFSET: u16 = 512;

pub type ScalingLut = [i16; SCALING_LUT_SIZE];

/// Builds the piecewise-linear scaling function going through the given points.
///
/// `values` must be strictly increasing. An empty set of points gives a null function.
pub fn init_scaling_function(values: &[u8], scalings: &[u8]) -> PipelineResult<ScalingLut> {
    let mut lut = [0i16; SCALING_LUT_SIZE];
    let num_points = values.len().min(scalings.len());
    if num_points == 0 {
        return Ok(lut);
    }

    let first = values[0] as usize;
    lut[..first].fill(i16::from(scalings[0]));

    for point in 0..num_points - 1 {
        let delta_y = i32::from(scalings[point + 1]) - i32::from(scalings[point]);
        let delta_x = i32::from(values[point + 1]) - i32::from(values[point]);
        if delta_x <= 0 {
            return Err(PipelineError::InvalidParameter(format!(
                "scaling points {} and {} are not increasing",
                values[point],
                values[point + 1]
            )));
        }

        let delta = delta_y * ((65536 + (delta_x >> 1)) / delta_x);
        for x in 0..delta_x {
            let v = i32::from(scalings[point]) + ((x * delta + 32768) >> 16);
            lut[values[point] as usize + x as usize] = v as i16;
        }
    }

    let last = values[num_points - 1] as usize;
    lut[last..].fill(i16::from(scalings[num_points - 1]));

    Ok(lut)
}

/// Whether `params` actually produce any grain.
fn grain_applies(params: &FilmGrainParams) -> bool {
    params.apply_grain
        && (params.num_y_points > 0
            || params.num_cb_points > 0
            || params.num_cr_points > 0
            || params.chroma_scaling_from_luma)
}

/// Film grain state of the current frame, derived from the concealed picture parameters.
#[derive(Debug)]
pub struct FilmGrainFeature {
    enabled: bool,
    params: FilmGrainParams,
    y_scaling_lut: ScalingLut,
    cb_scaling_lut: ScalingLut,
    cr_scaling_lut: ScalingLut,
    cb_offset: u16,
    cr_offset: u16,
}

impl Default for FilmGrainFeature {
    fn default() -> Self {
        Self {
            enabled: false,
            params: Default::default(),
            y_scaling_lut: [0; SCALING_LUT_SIZE],
            cb_scaling_lut: [0; SCALING_LUT_SIZE],
            cr_scaling_lut: [0; SCALING_LUT_SIZE],
            cb_offset: 0,
            cr_offset: 0,
        }
    }
}

impl FilmGrainFeature {
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn params(&self) -> &FilmGrainParams {
        &self.params
    }

    pub fn y_scaling_lut(&self) -> &ScalingLut {
        &self.y_scaling_lut
    }

    pub fn cb_scaling_lut(&self) -> &ScalingLut {
        &self.cb_scaling_lut
    }

    pub fn cr_scaling_lut(&self) -> &ScalingLut {
        &self.cr_scaling_lut
    }

    pub fn cb_offset(&self) -> u16 {
        self.cb_offset
    }

    pub fn cr_offset(&self) -> u16 {
        self.cr_offset
    }
}

impl Feature<Av1DecodeParams> for FilmGrainFeature {
    fn update(&mut self, _: &Av1DecodeParams, updated: &dyn FeatureLookup) -> PipelineResult<()> {
        let basic = updated.get::<Av1BasicFeature>(FeatureId::BASIC)?;
        let params = &basic.pic_params().film_grain;

        self.enabled = grain_applies(params);
        self.params = params.clone();
        if !self.enabled {
            return Ok(());
        }

        self.y_scaling_lut = init_scaling_function(
            &params.point_y_value[..params.num_y_points as usize],
            &params.point_y_scaling[..params.num_y_points as usize],
        )?;
        if params.chroma_scaling_from_luma {
            self.cb_scaling_lut = self.y_scaling_lut;
            self.cr_scaling_lut = self.y_scaling_lut;
        } else {
            self.cb_scaling_lut = init_scaling_function(
                &params.point_cb_value[..params.num_cb_points as usize],
                &params.point_cb_scaling[..params.num_cb_points as usize],
            )?;
            self.cr_scaling_lut = init_scaling_function(
                &params.point_cr_value[..params.num_cr_points as usize],
                &params.point_cr_scaling[..params.num_cr_points as usize],
            )?;
        }

        self.cb_offset = params.cb_offset.min(MAX_CHROMA_OFFSET);
        self.cr_offset = params.cr_offset.min(MAX_CHROMA_OFFSET);
        log::debug!("film grain enabled, seed {:#x}", params.grain_seed);

        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Kernels of the film grain synthesis, in execution order.
#[derive(N, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum FilmGrainKernel {
    GetRandomValues = 0,
    RegressPhase1 = 1,
    RegressPhase2 = 2,
    ApplyNoise = 3,
}

pub const FILM_GRAIN_KERNELS: [FilmGrainKernel; 4] = [
    FilmGrainKernel::GetRandomValues,
    FilmGrainKernel::RegressPhase1,
    FilmGrainKernel::RegressPhase2,
    FilmGrainKernel::ApplyNoise,
];

impl FilmGrainKernel {
    pub fn packet_id(&self) -> PacketId {
        match self {
            FilmGrainKernel::GetRandomValues => PacketId::FILM_GRAIN_GET_RANDOM_VALUES,
            FilmGrainKernel::RegressPhase1 => PacketId::FILM_GRAIN_REGRESS_PHASE1,
            FilmGrainKernel::RegressPhase2 => PacketId::FILM_GRAIN_REGRESS_PHASE2,
            FilmGrainKernel::ApplyNoise => PacketId::FILM_GRAIN_APPLY_NOISE,
        }
    }

    /// Number of dwords of the kernel's curbe.
    fn curbe_len(&self) -> usize {
        match self {
            FilmGrainKernel::GetRandomValues => 3,
            FilmGrainKernel::RegressPhase1 => 2 + pack_bytes_len(25),
            FilmGrainKernel::RegressPhase2 => 2 + 2 * pack_bytes_len(25),
            FilmGrainKernel::ApplyNoise => 8 + 3 * SCALING_LUT_SIZE / 2,
        }
    }
}

fn pack_bytes_len(len: usize) -> usize {
    (len + 3) / 4
}

fn pack_bytes(bytes: &[u8], out: &mut Vec<u32>) {
    out.extend(bytes.chunks(4).map(|chunk| {
        chunk
            .iter()
            .enumerate()
            .fold(0u32, |dword, (i, b)| dword | u32::from(*b) << (8 * i))
    }));
}

fn pack_lut(lut: &ScalingLut, out: &mut Vec<u32>) {
    out.extend(
        lut.chunks(2)
            .map(|pair| u32::from(pair[0] as u16) | u32::from(pair[1] as u16) << 16),
    );
}

/// Dispatches one film grain kernel.
pub struct FilmGrainPacket {
    kernel: FilmGrainKernel,
}

impl FilmGrainPacket {
    pub fn new(kernel: FilmGrainKernel) -> Self {
        Self { kernel }
    }

    fn curbe(&self, feature: &FilmGrainFeature) -> Vec<u32> {
        let params = feature.params();
        let mut curbe = Vec::with_capacity(self.kernel.curbe_len());

        match self.kernel {
            FilmGrainKernel::GetRandomValues => {
                curbe.push(u32::from(params.grain_seed));
                curbe.push(u32::from(params.grain_scaling_minus_8) + 8);
                curbe.push(u32::from(params.grain_scale_shift));
            }
            FilmGrainKernel::RegressPhase1 => {
                curbe.push(u32::from(params.ar_coeff_lag));
                curbe.push(u32::from(params.ar_coeff_shift_minus_6) + 6);
                pack_bytes(&params.ar_coeffs_y_plus_128, &mut curbe);
            }
            FilmGrainKernel::RegressPhase2 => {
                curbe.push(u32::from(params.ar_coeff_lag));
                curbe.push(u32::from(params.ar_coeff_shift_minus_6) + 6);
                pack_bytes(&params.ar_coeffs_cb_plus_128, &mut curbe);
                pack_bytes(&params.ar_coeffs_cr_plus_128, &mut curbe);
            }
            FilmGrainKernel::ApplyNoise => {
                curbe.push(u32::from(params.cb_mult));
                curbe.push(u32::from(params.cb_luma_mult));
                curbe.push(u32::from(feature.cb_offset()));
                curbe.push(u32::from(params.cr_mult));
                curbe.push(u32::from(params.cr_luma_mult));
                curbe.push(u32::from(feature.cr_offset()));
                curbe.push(u32::from(params.overlap_flag));
                curbe.push(u32::from(params.clip_to_restricted_range));
                pack_lut(feature.y_scaling_lut(), &mut curbe);
                pack_lut(feature.cb_scaling_lut(), &mut curbe);
                pack_lut(feature.cr_scaling_lut(), &mut curbe);
            }
        }

        curbe
    }
}

impl Packet for FilmGrainPacket {
    fn submit(
        &mut self,
        cmd: &mut CommandBuffer,
        _: &PacketProperties,
        ctx: &PacketContext,
    ) -> PipelineResult<()> {
        let feature = ctx.feature::<FilmGrainFeature>(FeatureId::FILM_GRAIN)?;
        log::trace!("dispatching film grain kernel {:?}", self.kernel);
        cmd.kernel_dispatch(self.kernel as u32, &self.curbe(feature));
        Ok(())
    }

    fn calculate_command_size(&self, _: &PacketContext) -> PipelineResult<CommandSize> {
        Ok(CommandSize::new(4 * (2 + self.kernel.curbe_len()), 0))
    }
}

/// Post-decode stage activating the film grain kernels of frames that need them.
#[derive(Debug, Default)]
pub struct FilmGrainSubPipeline;

impl SubPipeline<Av1DecodeParams> for FilmGrainSubPipeline {
    fn init(&mut self, _: &DecodeSettings, packets: &mut PacketList) -> PipelineResult<()> {
        for kernel in FILM_GRAIN_KERNELS {
            packets.register(kernel.packet_id(), Box::new(FilmGrainPacket::new(kernel)))?;
        }

        Ok(())
    }

    fn prepare(
        &mut self,
        _: &Av1DecodeParams,
        features: &dyn FeatureLookup,
        activations: &mut ActivationList,
    ) -> PipelineResult<()> {
        let film_grain = features.get::<FilmGrainFeature>(FeatureId::FILM_GRAIN)?;
        let basic = features.get::<Av1BasicFeature>(FeatureId::BASIC)?;
        if !film_grain.is_enabled() || !basic.is_complete() {
            return Ok(());
        }

        for kernel in FILM_GRAIN_KERNELS {
            activations.activate(kernel.packet_id(), false, 0, 0);
        }

        Ok(())
    }
}
