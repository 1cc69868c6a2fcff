// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Tile accounting of AV1 frames.
//!
//! [`Av1TileCoding`] collects the tiles of a frame as they arrive, possibly over several calls,
//! decides how many decode passes the current call needs, and conceals broken tile tables so that
//! every pass programs a valid workload.

use crate::codec::av1::Av1PicParams;
use crate::codec::av1::Av1TileParams;
use crate::codec::av1::MAX_TILE_COLS;
use crate::codec::av1::MAX_TILE_ROWS;
use crate::decoder::PipelineError;
use crate::decoder::PipelineResult;

/// Size of the payload programmed for a missing tile.
pub const DUMMY_TILE_SIZE: u32 = 4;

/// What is known about one tile slot of the frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TileDesc {
    /// Byte offset of the tile data in the bitstream buffer.
    pub offset: u32,
    /// Size of the tile data in bytes. Zero until the tile is received.
    pub size: u32,
    pub tile_group_id: u16,
    /// Position of the tile in its tile group.
    pub tile_num: u16,
    pub last_in_group: bool,
    pub tile_row: u16,
    pub tile_column: u16,
    pub tile_index: u16,
    pub anchor_frame_idx: u8,
    /// Number of times the tile was received during the frame.
    pub occurrences: u16,
}

#[derive(Debug)]
pub struct Av1TileCoding {
    /// Descriptor arena. Only the first `total_tiles` entries belong to the current frame.
    tile_desc: Vec<TileDesc>,
    total_tiles: usize,
    tile_cols: u16,
    large_scale_tile: bool,
    tile_count_minus1: u16,

    new_frame_start: bool,
    last_tile_id: Option<u32>,
    cur_tile: Option<u32>,
    tile_group_id: Option<u16>,
    group_start_tile: Option<u16>,
    tile_num_in_group: u16,

    pass_start_tile: u32,
    num_passes: u32,

    has_duplicate_tile: bool,
    has_tile_missing: bool,
    is_truncated_tile: bool,
    concealed_tiles: usize,
    arena_allocations: usize,
}

impl Default for Av1TileCoding {
    fn default() -> Self {
        Self {
            tile_desc: Vec::new(),
            total_tiles: 0,
            tile_cols: 0,
            large_scale_tile: false,
            tile_count_minus1: 0,
            new_frame_start: true,
            last_tile_id: None,
            cur_tile: None,
            tile_group_id: None,
            group_start_tile: None,
            tile_num_in_group: 0,
            pass_start_tile: 0,
            num_passes: 0,
            has_duplicate_tile: false,
            has_tile_missing: false,
            is_truncated_tile: false,
            concealed_tiles: 0,
            arena_allocations: 0,
        }
    }
}

impl Av1TileCoding {
    pub fn new() -> Self {
        Default::default()
    }

    /// Processes the tiles of one call for the frame described by `pic_params`, then conceals
    /// what cannot be decoded and computes the number of passes of the call.
    pub fn update(
        &mut self,
        pic_params: &Av1PicParams,
        tiles: &[Av1TileParams],
        data_size: u32,
    ) -> PipelineResult<()> {
        if pic_params.tile_cols as usize > MAX_TILE_COLS
            || pic_params.tile_rows as usize > MAX_TILE_ROWS
        {
            return Err(PipelineError::InvalidParameter(format!(
                "{}x{} tiles exceed the maximum of {}x{}",
                pic_params.tile_cols, pic_params.tile_rows, MAX_TILE_COLS, MAX_TILE_ROWS
            )));
        }

        let total_tiles = pic_params.total_tiles() as usize;
        if total_tiles == 0 {
            return Err(PipelineError::InvalidParameter("frame has no tile".into()));
        }

        if self.new_frame_start || total_tiles != self.total_tiles {
            self.begin_frame(pic_params, total_tiles);
        }

        let next_tile = self.last_tile_id.map_or(0, |id| id + 1);
        let first_group_start = self.parse_tile_info(tiles);
        self.error_detect_and_conceal(data_size);

        // Passes of this call start at its first tile group, or right after what the previous
        // calls parsed.
        self.pass_start_tile = match first_group_start {
            Some(start) if (start as usize) < self.total_tiles => u32::from(start),
            _ => next_tile.min(self.total_tiles as u32 - 1),
        };

        self.num_passes = if self.large_scale_tile {
            u32::from(self.tile_count_minus1) + 1
        } else {
            match self.last_tile_id {
                Some(last) if last >= self.pass_start_tile => last - self.pass_start_tile + 1,
                _ => 0,
            }
        };

        self.new_frame_start = self.is_complete();
        log::debug!(
            "{} tiles parsed, last tile {:?} of {}, {} passes starting at tile {}",
            tiles.len(),
            self.last_tile_id,
            self.total_tiles,
            self.num_passes,
            self.pass_start_tile
        );

        Ok(())
    }

    /// Clears the per-frame tracking, reusing the descriptor arena if it is large enough.
    fn begin_frame(&mut self, pic_params: &Av1PicParams, total_tiles: usize) {
        if self.tile_desc.len() < total_tiles {
            self.tile_desc = vec![TileDesc::default(); total_tiles];
            self.arena_allocations += 1;
        } else {
            self.tile_desc[..total_tiles].fill(TileDesc::default());
        }

        self.total_tiles = total_tiles;
        self.tile_cols = pic_params.tile_cols;
        self.large_scale_tile = pic_params.pic_info.large_scale_tile;
        self.tile_count_minus1 = pic_params.tile_count_minus1;
        self.last_tile_id = None;
        self.cur_tile = None;
        self.tile_group_id = None;
        self.group_start_tile = None;
        self.tile_num_in_group = 0;
        self.pass_start_tile = 0;
        self.num_passes = 0;
        self.has_duplicate_tile = false;
        self.has_tile_missing = false;
        self.is_truncated_tile = false;
        self.concealed_tiles = 0;
    }

    fn tile_linear_index(&self, tile: &Av1TileParams) -> u32 {
        if self.large_scale_tile {
            u32::from(tile.tile_index)
        } else {
            u32::from(tile.tile_row) * u32::from(self.tile_cols) + u32::from(tile.tile_column)
        }
    }

    /// Records `tiles` into the descriptors. Returns the start tile of the first tile group seen.
    pub fn parse_tile_info(&mut self, tiles: &[Av1TileParams]) -> Option<u16> {
        let mut first_group_start = None;

        for tile in tiles {
            let index = self.tile_linear_index(tile);
            if index as usize >= self.total_tiles {
                log::warn!(
                    "dropping tile {} (row {}, column {}) of a frame of {} tiles",
                    index,
                    tile.tile_row,
                    tile.tile_column,
                    self.total_tiles
                );
                continue;
            }

            if self.group_start_tile != Some(tile.start_tile_idx) {
                self.group_start_tile = Some(tile.start_tile_idx);
                self.tile_group_id = Some(self.tile_group_id.map_or(0, |id| id + 1));
                self.tile_num_in_group = 0;
            } else {
                self.tile_num_in_group += 1;
            }
            first_group_start.get_or_insert(tile.start_tile_idx);

            let desc = &mut self.tile_desc[index as usize];
            if desc.occurrences > 0 {
                self.has_duplicate_tile = true;
                log::warn!("tile {} received {} times", index, desc.occurrences + 1);
            }

            if desc.occurrences == 0 || tile.bs_tile_bytes_in_buffer > desc.size {
                desc.offset = tile.bs_tile_data_location;
                desc.size = tile.bs_tile_bytes_in_buffer;
                desc.tile_group_id = self.tile_group_id.unwrap_or(0);
                desc.tile_num = self.tile_num_in_group;
                desc.last_in_group = index == u32::from(tile.end_tile_idx);
                desc.tile_row = tile.tile_row;
                desc.tile_column = tile.tile_column;
                desc.tile_index = tile.tile_index;
                desc.anchor_frame_idx = tile.anchor_frame_idx;
            }
            desc.occurrences = desc.occurrences.saturating_add(1);

            self.cur_tile = Some(index);
            self.last_tile_id = Some(index);
        }

        first_group_start
    }

    /// Makes every descriptor of the frame decodable.
    ///
    /// The frame is complete once this returns: missing tiles are given up on. Tiles overflowing
    /// the bitstream buffer are truncated, and any tile left without data gets a dummy payload.
    pub fn error_detect_and_conceal(&mut self, data_size: u32) {
        let received = self.tile_desc[..self.total_tiles]
            .iter()
            .filter(|desc| desc.occurrences > 0)
            .count();
        // The frame is completed whether its tiles are missing or only arrived out of order.
        if received < self.total_tiles {
            log::warn!(
                "only {} of {} tiles received, completing the frame",
                received,
                self.total_tiles
            );
            self.has_tile_missing = true;
        } else if !self.is_complete() {
            log::debug!("all tiles received out of order, completing the frame");
        }
        self.last_tile_id = Some(self.total_tiles as u32 - 1);

        let last = self.total_tiles - 1;
        let cols = u32::from(self.tile_cols.max(1));
        for (i, desc) in self.tile_desc[..self.total_tiles].iter_mut().enumerate() {
            if u64::from(desc.offset) + u64::from(desc.size) > u64::from(data_size) {
                if i == last && desc.offset < data_size {
                    log::warn!(
                        "truncating last tile from {} to {} bytes",
                        desc.size,
                        data_size - desc.offset
                    );
                    desc.size = data_size - desc.offset;
                    self.is_truncated_tile = true;
                } else {
                    log::warn!(
                        "tile {} ({} bytes at {}) exceeds the {} bytes bitstream",
                        i,
                        desc.size,
                        desc.offset,
                        data_size
                    );
                    desc.size = 0;
                }
            }

            if desc.size == 0 {
                log::warn!("concealing tile {} with a dummy workload", i);
                desc.offset = 0;
                desc.size = DUMMY_TILE_SIZE;
                desc.tile_row = (i as u32 / cols) as u16;
                desc.tile_column = (i as u32 % cols) as u16;
                self.concealed_tiles += 1;
            }
        }
    }

    /// Descriptors of the current frame.
    pub fn tiles(&self) -> &[TileDesc] {
        &self.tile_desc[..self.total_tiles]
    }

    /// Descriptor of the tile decoded by `pass` in the current call.
    pub fn tile_for_pass(&self, pass: u16) -> Option<&TileDesc> {
        let index = if self.large_scale_tile {
            u32::from(pass)
        } else {
            self.pass_start_tile + u32::from(pass)
        };

        self.tiles().get(index as usize)
    }

    pub fn total_tiles(&self) -> usize {
        self.total_tiles
    }

    pub fn tile_cols(&self) -> u16 {
        self.tile_cols
    }

    pub fn last_tile_id(&self) -> Option<u32> {
        self.last_tile_id
    }

    pub fn cur_tile(&self) -> Option<u32> {
        self.cur_tile
    }

    /// Whether all the tiles of the frame have been received, or given up on.
    pub fn is_complete(&self) -> bool {
        self.last_tile_id
            .is_some_and(|last| last as usize + 1 == self.total_tiles)
    }

    pub fn num_passes(&self) -> u32 {
        self.num_passes
    }

    pub fn pass_start_tile(&self) -> u32 {
        self.pass_start_tile
    }

    pub fn has_duplicate_tile(&self) -> bool {
        self.has_duplicate_tile
    }

    pub fn has_tile_missing(&self) -> bool {
        self.has_tile_missing
    }

    pub fn is_truncated_tile(&self) -> bool {
        self.is_truncated_tile
    }

    /// Number of descriptors replaced by a dummy workload during the frame.
    pub fn concealed_tiles(&self) -> usize {
        self.concealed_tiles
    }

    /// Number of times the descriptor arena had to be allocated.
    pub fn arena_allocations(&self) -> usize {
        self.arena_allocations
    }
}
